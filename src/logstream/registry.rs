//! Container log registry
//!
//! Owns the ring buffers and the long-lived tail readers feeding them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::ContainerEngine;
use crate::error::{Error, Result};

use super::{LogBuffer, LogEntry, LogType, NoiseFilter, TailParser};

struct TailHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry of per-container log buffers and tail tasks.
///
/// Buffers are container-scoped: a server that gets a new container gets a
/// fresh buffer under the new id, while the old one survives until dropped.
pub struct LogRegistry {
    engine: Arc<dyn ContainerEngine>,
    buffers: DashMap<String, Arc<LogBuffer>>,
    tails: DashMap<String, TailHandle>,
    capacity: usize,
    noise: Arc<NoiseFilter>,
}

impl LogRegistry {
    pub fn new(engine: Arc<dyn ContainerEngine>, capacity: usize, noise_patterns: &[String]) -> Self {
        Self {
            engine,
            buffers: DashMap::new(),
            tails: DashMap::new(),
            capacity,
            noise: Arc::new(NoiseFilter::new(noise_patterns)),
        }
    }

    fn buffer(&self, container_id: &str) -> Arc<LogBuffer> {
        self.buffers
            .entry(container_id.to_string())
            .or_insert_with(|| Arc::new(LogBuffer::new(container_id, self.capacity)))
            .clone()
    }

    /// Start tailing a container's output. Idempotent: a live tail for the
    /// same container id is left untouched.
    pub async fn attach(&self, container_id: &str) -> Result<()> {
        if let Some(existing) = self.tails.get(container_id) {
            if !existing.handle.is_finished() {
                debug!("Tail already attached for {}", container_id);
                return Ok(());
            }
        }

        let stream = self.engine.logs(container_id).await.map_err(Error::from)?;
        let buffer = self.buffer(container_id);
        let noise = self.noise.clone();
        let token = CancellationToken::new();

        let task_token = token.clone();
        let task_id = container_id.to_string();
        let handle = tokio::spawn(async move {
            let mut stream = stream;
            let mut parser = TailParser::new();

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Tail cancelled for {}", task_id);
                        return;
                    }
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(bytes)) => {
                                for line in parser.feed(&bytes) {
                                    if noise.is_noise(&line) {
                                        continue;
                                    }
                                    buffer.push(LogEntry::new(Utc::now(), LogType::Stdout, line));
                                }
                            }
                            Some(Err(e)) => {
                                warn!("Tail error for {}: {}", task_id, e);
                                return;
                            }
                            None => {
                                debug!("Tail ended for {}", task_id);
                                return;
                            }
                        }
                    }
                }
            }
        });

        self.tails
            .insert(container_id.to_string(), TailHandle { token, handle });
        Ok(())
    }

    /// Stop the tail, keeping the buffer.
    pub fn detach(&self, container_id: &str) {
        if let Some((_, tail)) = self.tails.remove(container_id) {
            tail.token.cancel();
        }
    }

    /// The most recent `limit` entries in stored order.
    pub fn read(&self, container_id: &str, limit: usize) -> Vec<LogEntry> {
        self.buffers
            .get(container_id)
            .map(|b| b.read(limit))
            .unwrap_or_default()
    }

    /// Splice a command echo into the stream with the caller's timestamp.
    pub async fn append_command(
        &self,
        container_id: &str,
        timestamp: DateTime<Utc>,
        command: &str,
    ) {
        let buffer = self.buffer(container_id);
        buffer
            .push_yielding(LogEntry::spliced(timestamp, LogType::Command, command))
            .await;
    }

    /// Splice command output: one entry per line, a synthetic failure line
    /// when a failed command produced nothing.
    pub async fn append_output(
        &self,
        container_id: &str,
        timestamp: DateTime<Utc>,
        output: &str,
        success: bool,
    ) {
        let buffer = self.buffer(container_id);

        let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            if !success {
                buffer
                    .push_yielding(LogEntry::spliced(
                        timestamp,
                        LogType::CommandOutput,
                        "Command failed to execute",
                    ))
                    .await;
            }
            return;
        }

        for line in lines {
            buffer
                .push_yielding(LogEntry::spliced(timestamp, LogType::CommandOutput, line))
                .await;
        }
    }

    pub fn clear(&self, container_id: &str) {
        if let Some(buffer) = self.buffers.get(container_id) {
            buffer.clear();
        }
    }

    /// Detach and forget a container entirely (server deletion).
    pub fn drop_container(&self, container_id: &str) {
        self.detach(container_id);
        self.buffers.remove(container_id);
    }

    /// Cancel every tail and wait for the readers to wind down.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.tails.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, tail)) = self.tails.remove(&id) {
                tail.token.cancel();
                let _ = tail.handle.await;
            }
        }
    }
}
