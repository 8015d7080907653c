//! Per-server file access
//!
//! Sanitized operations under one server's data directory, used by the mods
//! surface and by upload finalization. Every path is resolved through a
//! traversal guard before touching the filesystem.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// Directory mods are ingested into, relative to the server's data dir
pub const MODS_DIR: &str = "mods";

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<DateTime<Utc>>,
}

/// Handle on one server's data directory
pub struct ServerFiles {
    root: PathBuf,
}

impl ServerFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Join a client-supplied relative path onto the root, rejecting
    /// absolute paths and any traversal component.
    fn safe_join(&self, relative: &str) -> Result<PathBuf> {
        let relative = relative.trim_start_matches('/');
        let path = Path::new(relative);

        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "path {:?} escapes the server directory",
                        relative
                    )))
                }
            }
        }
        Ok(resolved)
    }

    /// List a directory relative to the root.
    pub async fn list(&self, relative: &str) -> Result<Vec<FileInfo>> {
        let dir = self.safe_join(relative)?;

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound("directory", relative.to_string()))
            }
            Err(e) => return Err(Error::Internal(format!("read_dir failed: {}", e))),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("read_dir failed: {}", e)))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| Error::Internal(format!("stat failed: {}", e)))?;

            files.push(FileInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                size: metadata.len(),
                is_dir: metadata.is_dir(),
                modified: metadata
                    .modified()
                    .ok()
                    .map(DateTime::<Utc>::from),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Move an ingested file (an upload's temp file) to a destination under
    /// the root. Falls back to copy+remove across filesystems.
    pub async fn import(&self, source: &Path, relative_dest: &str) -> Result<PathBuf> {
        let dest = self.safe_join(relative_dest)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Internal(format!("mkdir failed: {}", e)))?;
        }

        match tokio::fs::rename(source, &dest).await {
            Ok(()) => Ok(dest),
            Err(_) => {
                tokio::fs::copy(source, &dest)
                    .await
                    .map_err(|e| Error::Internal(format!("copy failed: {}", e)))?;
                let _ = tokio::fs::remove_file(source).await;
                Ok(dest)
            }
        }
    }

    pub async fn delete(&self, relative: &str) -> Result<()> {
        let path = self.safe_join(relative)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound("file", relative.to_string()))
            }
            Err(e) => Err(Error::Internal(format!("delete failed: {}", e))),
        }
    }

    /// List mod files, filtered to the allowed extensions.
    pub async fn list_mods(&self, allowed_extensions: &[String]) -> Result<Vec<FileInfo>> {
        let mods = match self.list(MODS_DIR).await {
            Ok(mods) => mods,
            Err(Error::NotFound(..)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(mods
            .into_iter()
            .filter(|f| {
                !f.is_dir
                    && allowed_extensions
                        .iter()
                        .any(|ext| f.name.to_lowercase().ends_with(&ext.to_lowercase()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_safe_join_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let files = ServerFiles::new(tmp.path());

        assert!(files.safe_join("mods/mod.jar").is_ok());
        assert!(files.safe_join("/mods/mod.jar").is_ok());
        assert!(files.safe_join("../other").is_err());
        assert!(files.safe_join("mods/../../etc").is_err());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("world")).unwrap();
        std::fs::write(tmp.path().join("server.properties"), b"motd=hi").unwrap();

        let files = ServerFiles::new(tmp.path());
        let listing = files.list("").await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "server.properties");
        assert!(!listing[0].is_dir);
        assert!(listing[1].is_dir);

        files.delete("server.properties").await.unwrap();
        assert!(matches!(
            files.delete("server.properties").await,
            Err(Error::NotFound(..))
        ));
    }

    #[tokio::test]
    async fn test_import_moves_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();

        let source = staging.path().join("upload-x-mod.jar");
        std::fs::write(&source, b"jar bytes").unwrap();

        let files = ServerFiles::new(tmp.path());
        let dest = files
            .import(&source, "mods/better-furnaces.jar")
            .await
            .unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(dest).unwrap(), b"jar bytes");
    }

    #[tokio::test]
    async fn test_list_mods_filters_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        let mods_dir = tmp.path().join(MODS_DIR);
        std::fs::create_dir(&mods_dir).unwrap();
        std::fs::write(mods_dir.join("a.jar"), b"x").unwrap();
        std::fs::write(mods_dir.join("notes.txt"), b"x").unwrap();

        let files = ServerFiles::new(tmp.path());
        let mods = files.list_mods(&[".jar".to_string()]).await.unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].name, "a.jar");

        // No mods dir yet is an empty listing, not an error
        let empty = ServerFiles::new(tmp.path().join("missing"));
        assert!(empty.list_mods(&[".jar".to_string()]).await.unwrap().is_empty());
    }
}
