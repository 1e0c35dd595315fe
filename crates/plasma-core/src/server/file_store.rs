//! Ephemeral storage for uploaded files.
//!
//! Each upload lands in the managed directory as `<id>_<name>`, where `id`
//! is 8 random alphanumeric characters. Files are never expired during a
//! run; the directory is emptied when the server starts.

use crate::error::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Length of a download id.
pub const FILE_ID_LEN: usize = 8;

/// Attempts at finding an unused id before giving up.
const MAX_ID_ATTEMPTS: usize = 16;

fn io_error(action: &str, e: std::io::Error) -> Error {
    Error::Server(format!("{}: {}", action, e))
}

/// Managed upload directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the managed directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("creating file store", e))?;
        Ok(Self { dir })
    }

    /// Directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove everything in the managed directory.
    pub async fn purge(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error("listing file store", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing file store", e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_error("inspecting file store", e))?;
            let result = if file_type.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            result.map_err(|e| io_error("purging file store", e))?;
            removed += 1;
        }

        debug!(dir = %self.dir.display(), removed, "File store purged");
        Ok(removed)
    }

    /// Reject names that could escape the managed directory.
    pub fn validate_name(name: &str) -> Result<()> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0']);
        if invalid {
            return Err(Error::InvalidInput("Provided filename is invalid.".into()));
        }
        Ok(())
    }

    /// Persist an upload and return its download id.
    pub async fn store(&self, name: &str, bytes: &[u8]) -> Result<String> {
        Self::validate_name(name)?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_id();
            let path = self.dir.join(format!("{}_{}", id, name));

            let file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match file {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_error("writing upload", e)),
            };
            file.write_all(bytes)
                .await
                .map_err(|e| io_error("writing upload", e))?;
            file.flush().await.map_err(|e| io_error("writing upload", e))?;
            return Ok(id);
        }

        Err(Error::Server("no free file id".into()))
    }

    /// Look up an upload by id, returning its original name and bytes.
    pub async fn load(&self, id: &str) -> Result<(String, Vec<u8>)> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::NotFound(format!("file {:?}", id)));
        }
        let prefix = format!("{}_", id);

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error("listing file store", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing file store", e))?
        {
            let file_name = entry.file_name();
            let Some(stored) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = stored.strip_prefix(&prefix) {
                let bytes = fs::read(entry.path())
                    .await
                    .map_err(|e| io_error("reading upload", e))?;
                return Ok((name.to_string(), bytes));
            }
        }

        Err(Error::NotFound(format!("file {:?}", id)))
    }
}

fn generate_id() -> String {
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(FILE_ID_LEN)
        .map(char::from)
        .collect()
}
