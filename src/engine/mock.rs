//! Scriptable in-memory engine for tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use super::{ContainerEngine, ContainerSpec, EngineError, EngineResult, EngineStatus, ExecOutput, LogTail};

#[derive(Default)]
pub struct MockEngine {
    containers: DashMap<String, EngineStatus>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
    exec_result: Mutex<ExecOutput>,
    exec_delay: Mutex<Duration>,
    pub exec_calls: Mutex<Vec<(String, Vec<String>)>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    log_feeds: DashMap<String, mpsc::UnboundedSender<Bytes>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            exec_result: Mutex::new(ExecOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            }),
            ..Default::default()
        }
    }

    pub fn add_container(&self, status: EngineStatus) -> String {
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.insert(id.clone(), status);
        id
    }

    pub fn set_status(&self, id: &str, status: EngineStatus) {
        self.containers.insert(id.to_string(), status);
    }

    pub fn forget(&self, id: &str) {
        self.containers.remove(id);
    }

    /// Make every subsequent call fail with `Unavailable`.
    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    pub fn set_exec_result(&self, output: ExecOutput) {
        *self.exec_result.lock() = output;
    }

    /// Make exec calls take this long before returning.
    pub fn set_exec_delay(&self, delay: Duration) {
        *self.exec_delay.lock() = delay;
    }

    /// Feed a line into an attached log tail.
    pub fn push_log(&self, id: &str, data: &[u8]) {
        if let Some(tx) = self.log_feeds.get(id) {
            let _ = tx.send(Bytes::copy_from_slice(data));
        }
    }

    /// Close an attached log tail (container exit).
    pub fn close_log(&self, id: &str) {
        self.log_feeds.remove(id);
    }

    fn check_available(&self) -> EngineResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(EngineError::Unavailable("mock engine offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn create(&self, _spec: &ContainerSpec) -> EngineResult<String> {
        self.check_available()?;
        Ok(self.add_container(EngineStatus::Stopped))
    }

    async fn start(&self, id: &str) -> EngineResult<()> {
        self.check_available()?;
        match self.containers.get_mut(id) {
            Some(mut status) => {
                *status = EngineStatus::Running;
                self.started.lock().push(id.to_string());
                Ok(())
            }
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> EngineResult<bool> {
        self.check_available()?;
        match self.containers.get_mut(id) {
            Some(mut status) => {
                *status = EngineStatus::Stopped;
                self.stopped.lock().push(id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> EngineResult<()> {
        self.check_available()?;
        if self.containers.remove(id).is_some() {
            self.removed.lock().push(id.to_string());
            Ok(())
        } else {
            Err(EngineError::NotFound(id.to_string()))
        }
    }

    async fn status(&self, id: &str) -> EngineResult<EngineStatus> {
        self.check_available()?;
        Ok(self
            .containers
            .get(id)
            .map(|s| *s)
            .unwrap_or(EngineStatus::NotFound))
    }

    async fn exec(&self, id: &str, argv: &[String]) -> EngineResult<ExecOutput> {
        self.check_available()?;
        if !self.containers.contains_key(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }
        self.exec_calls
            .lock()
            .push((id.to_string(), argv.to_vec()));

        let delay = *self.exec_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.exec_result.lock().clone())
    }

    async fn logs(&self, id: &str) -> EngineResult<LogTail> {
        self.check_available()?;
        if !self.containers.contains_key(id) {
            return Err(EngineError::NotFound(id.to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.log_feeds.insert(id.to_string(), tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx).map(Ok)))
    }

    async fn list_managed(&self) -> EngineResult<Vec<String>> {
        self.check_available()?;
        let mut ids: Vec<String> = self.containers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn ensure_network(&self) -> EngineResult<()> {
        self.check_available()
    }

    async fn cleanup_orphans(&self, tracked: &HashSet<String>) -> EngineResult<Vec<String>> {
        self.check_available()?;
        let mut removed = Vec::new();
        let ids = self.list_managed().await?;
        for id in ids {
            if !tracked.contains(&id) {
                self.containers.remove(&id);
                self.removed.lock().push(id.clone());
                removed.push(id);
            }
        }
        Ok(removed)
    }
}
