//! Chunked upload manager
//!
//! Resumable, idempotent large-file ingest. Each session owns a temp file
//! pre-truncated to the final size so chunks land at their offsets in any
//! order; a background janitor revokes expired sessions.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Janitor sweep interval
const JANITOR_INTERVAL: Duration = Duration::from_secs(300);

/// One in-flight chunked upload
pub struct UploadSession {
    pub id: Uuid,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    received: HashSet<u32>,
    pub bytes_received: u64,
    pub temp_path: PathBuf,
    file: Option<tokio::fs::File>,
    pub expires_at: DateTime<Utc>,
    pub completed: bool,
}

impl UploadSession {
    fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains(i))
            .collect()
    }
}

/// Counters returned from a chunk write
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChunkResult {
    pub completed: bool,
    pub bytes_received: u64,
    pub chunks_received: u32,
    /// Set once the session completes; the caller moves the file
    pub temp_path: Option<PathBuf>,
}

/// Point-in-time session status
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadStatus {
    pub id: Uuid,
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunks_received: u32,
    pub bytes_received: u64,
    pub missing_chunks: Vec<u32>,
    pub completed: bool,
}

pub struct UploadManager {
    temp_dir: PathBuf,
    max_upload_size: u64,
    ttl: chrono::Duration,
    sessions: Mutex<HashMap<Uuid, Arc<AsyncMutex<UploadSession>>>>,
    janitor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl UploadManager {
    pub fn new(temp_dir: PathBuf, max_upload_size: u64, ttl_secs: u64) -> Self {
        Self {
            temp_dir,
            max_upload_size,
            ttl: chrono::Duration::seconds(ttl_secs as i64),
            sessions: Mutex::new(HashMap::new()),
            janitor: Mutex::new(None),
        }
    }

    /// Open a new session and pre-allocate its temp file.
    pub async fn init(&self, filename: &str, total_size: u64, chunk_size: u64) -> Result<Uuid> {
        if total_size == 0 {
            return Err(Error::InvalidArgument("upload size must be non-zero".into()));
        }
        if self.max_upload_size > 0 && total_size > self.max_upload_size {
            return Err(Error::InvalidArgument(format!(
                "upload of {} bytes exceeds the {} byte limit",
                total_size, self.max_upload_size
            )));
        }
        if chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk size must be non-zero".into()));
        }

        let id = Uuid::new_v4();
        let total_chunks = (total_size.div_ceil(chunk_size)).max(1) as u32;
        let temp_path = self
            .temp_dir
            .join(format!("upload-{}-{}", id, sanitize_filename(filename)));

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .map_err(|e| Error::Internal(format!("failed to create temp file: {}", e)))?;
        file.set_len(total_size)
            .await
            .map_err(|e| Error::Internal(format!("failed to allocate temp file: {}", e)))?;

        let session = UploadSession {
            id,
            filename: filename.to_string(),
            total_size,
            chunk_size,
            total_chunks,
            received: HashSet::new(),
            bytes_received: 0,
            temp_path,
            file: Some(file),
            expires_at: Utc::now() + self.ttl,
            completed: false,
        };

        self.sessions
            .lock()
            .insert(id, Arc::new(AsyncMutex::new(session)));

        debug!(
            "Upload session {} opened: {} ({} bytes, {} chunks)",
            id, filename, total_size, total_chunks
        );
        Ok(id)
    }

    fn session(&self, id: &Uuid) -> Result<Arc<AsyncMutex<UploadSession>>> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound("upload session", id.to_string()))
    }

    /// Write one chunk at its offset. Duplicate chunks and writes after
    /// completion are no-op successes.
    pub async fn write_chunk(&self, id: &Uuid, index: u32, data: &[u8]) -> Result<ChunkResult> {
        let session = self.session(id)?;
        let mut session = session.lock().await;

        if session.completed {
            return Ok(chunk_result(&session));
        }

        if index >= session.total_chunks {
            return Err(Error::InvalidArgument(format!(
                "chunk index {} out of range (total {})",
                index, session.total_chunks
            )));
        }

        if session.received.contains(&index) {
            return Ok(chunk_result(&session));
        }

        let offset = index as u64 * session.chunk_size;
        let expected = if index == session.total_chunks - 1 {
            session.total_size - offset
        } else {
            session.chunk_size
        };
        if data.len() as u64 != expected {
            return Err(Error::InvalidArgument(format!(
                "chunk {} expects {} bytes, got {}",
                index,
                expected,
                data.len()
            )));
        }

        let file = session
            .file
            .as_mut()
            .ok_or_else(|| Error::Internal("upload temp file closed".into()))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::Internal(format!("seek failed: {}", e)))?;
        file.write_all(data)
            .await
            .map_err(|e| Error::Internal(format!("chunk write failed: {}", e)))?;

        session.received.insert(index);
        session.bytes_received += data.len() as u64;

        if session.received.len() as u32 == session.total_chunks {
            let file = session.file.take();
            if let Some(file) = file {
                file.sync_all()
                    .await
                    .map_err(|e| Error::Internal(format!("fsync failed: {}", e)))?;
            }
            session.completed = true;
            info!(
                "Upload session {} completed: {} ({} bytes)",
                session.id, session.filename, session.bytes_received
            );
        }

        Ok(chunk_result(&session))
    }

    pub async fn status(&self, id: &Uuid) -> Result<UploadStatus> {
        let session = self.session(id)?;
        let session = session.lock().await;
        Ok(UploadStatus {
            id: session.id,
            filename: session.filename.clone(),
            total_size: session.total_size,
            total_chunks: session.total_chunks,
            chunks_received: session.received.len() as u32,
            bytes_received: session.bytes_received,
            missing_chunks: session.missing_chunks(),
            completed: session.completed,
        })
    }

    /// Abort a session and delete its temp file.
    pub async fn cancel(&self, id: &Uuid) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .remove(id)
            .ok_or_else(|| Error::NotFound("upload session", id.to_string()))?;

        let mut session = session.lock().await;
        session.file.take();
        if let Err(e) = tokio::fs::remove_file(&session.temp_path).await {
            debug!("Temp file already gone for {}: {}", id, e);
        }
        Ok(())
    }

    /// Claim a completed session's temp file and drop the session. The
    /// caller owns the file afterwards.
    pub async fn finish(&self, id: &Uuid) -> Result<std::path::PathBuf> {
        let session = self.session(id)?;
        let temp_path = {
            let session = session.lock().await;
            if !session.completed {
                return Err(Error::Precondition("upload is not complete".into()));
            }
            session.temp_path.clone()
        };

        self.cleanup(id).await?;
        Ok(temp_path)
    }

    /// Drop a completed session, preserving the temp file the caller moved.
    pub async fn cleanup(&self, id: &Uuid) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .remove(id)
            .ok_or_else(|| Error::NotFound("upload session", id.to_string()))?;

        session.lock().await.file.take();
        Ok(())
    }

    /// Revoke every session past its deadline.
    pub async fn revoke_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<Uuid> = {
            let sessions = self.sessions.lock();
            let mut expired = Vec::new();
            for (id, session) in sessions.iter() {
                if let Ok(session) = session.try_lock() {
                    if session.expires_at < now {
                        expired.push(*id);
                    }
                }
            }
            expired
        };

        let count = expired.len();
        for id in expired {
            warn!("Revoking expired upload session {}", id);
            let _ = self.cancel(&id).await;
        }
        count
    }

    /// Delete stale scratch files from a previous process life.
    pub async fn sweep_temp_dir(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.temp_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("upload-") {
                if tokio::fs::remove_file(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Start the expiry janitor.
    pub fn start(self: Arc<Self>) {
        let mut janitor = self.janitor.lock();
        if janitor.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let manager = self.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(JANITOR_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => return,
                    _ = interval.tick() => {
                        let revoked = manager.revoke_expired().await;
                        if revoked > 0 {
                            info!("Upload janitor revoked {} expired sessions", revoked);
                        }
                    }
                }
            }
        });

        *janitor = Some((token, handle));
    }

    pub async fn shutdown(&self) {
        let taken = self.janitor.lock().take();
        if let Some((token, handle)) = taken {
            token.cancel();
            let _ = handle.await;
        }
    }
}

fn chunk_result(session: &UploadSession) -> ChunkResult {
    ChunkResult {
        completed: session.completed,
        bytes_received: session.bytes_received,
        chunks_received: session.received.len() as u32,
        temp_path: session.completed.then(|| session.temp_path.clone()),
    }
}

/// Keep only path-safe characters of an upload's original filename.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "upload.bin".to_string()
    } else {
        trimmed.to_string()
    }
}
