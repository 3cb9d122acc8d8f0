//! Upload collaborator: turns a video payload into a stable URL.
//!
//! The playback timeline only ever sees the returned URL; how and where the
//! bytes are kept is up to the [`UploadStore`] implementation.

use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::registry::now_millis;

/// URL prefix under which stored files are served.
pub const UPLOAD_URL_PREFIX: &str = "/uploads";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Empty upload")]
    Empty,
    #[error("Unusable file name: {0:?}")]
    BadFileName(String),
}

pub trait UploadStore: Send + Sync {
    /// Store `bytes` and return the URL it will be served at.
    fn store(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> impl Future<Output = Result<String, UploadError>> + Send;
}

/// Stores uploads as `<millis>-<name>` in a local directory.
#[derive(Debug, Clone)]
pub struct DiskUploadStore {
    dir: PathBuf,
}

impl DiskUploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Reduce a client-supplied name to a safe single path component.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes
/// `_`. Directory parts and leading dots are dropped.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let clean = clean.trim_start_matches('.');

    clean
        .chars()
        .any(|c| c.is_ascii_alphanumeric())
        .then(|| clean.to_string())
}

impl UploadStore for DiskUploadStore {
    async fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        let clean =
            sanitize_file_name(file_name).ok_or_else(|| UploadError::BadFileName(file_name.to_string()))?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let stored = format!("{}-{clean}", now_millis());
        tokio::fs::write(self.dir.join(&stored), bytes).await?;

        log::info!("Stored upload {stored} ({} bytes)", bytes.len());
        Ok(format!("{UPLOAD_URL_PREFIX}/{stored}"))
    }
}
