//! Bundle sources
//!
//! A [`BundleSource`] lists bundle locations and decodes one location into its
//! ordered resource entries. Decoding failures are per file and never fatal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};
use zephyrus_common::{Result, ZephyrusError};

use crate::models::RawResource;

pub const DEFAULT_EXTENSION: &str = "json";

/// A bundle file that could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed bundle {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("decode task for {path} failed: {message}")]
    Task { path: PathBuf, message: String },
}

#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Bundle locations in processing order
    async fn list(&self) -> Result<Vec<PathBuf>>;

    /// Decode one bundle into its entries, in document order
    async fn decode(&self, location: &Path) -> std::result::Result<Vec<RawResource>, DecodeError>;
}

#[derive(Debug, Deserialize)]
struct BundleDocument {
    #[serde(default)]
    entry: Vec<BundleEntry>,
}

#[derive(Debug, Deserialize)]
struct BundleEntry {
    #[serde(default)]
    resource: Option<Value>,
}

/// Decode a bundle document from bytes.
///
/// An entry with no `resource` is kept as an empty entry so it is reported
/// as a failure rather than silently dropped.
pub fn decode_bundle(bytes: &[u8]) -> serde_json::Result<Vec<RawResource>> {
    let document: BundleDocument = serde_json::from_slice(bytes)?;
    Ok(document
        .entry
        .into_iter()
        .map(|entry| RawResource::new(entry.resource.unwrap_or(Value::Null)))
        .collect())
}

/// Bundle files with a given extension in one directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extension: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}

#[async_trait]
impl BundleSource for DirectorySource {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list(&self) -> Result<Vec<PathBuf>> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Err(ZephyrusError::DirectoryNotFound(self.root.display().to_string()));
        }

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && self.matches(&path) {
                files.push(path);
            }
        }
        files.sort();

        debug!(count = files.len(), extension = %self.extension, "Listed bundle files");
        Ok(files)
    }

    async fn decode(&self, location: &Path) -> std::result::Result<Vec<RawResource>, DecodeError> {
        let path = location.to_path_buf();
        let task_path = path.clone();

        tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&task_path).map_err(|source| DecodeError::Io {
                path: task_path.clone(),
                source,
            })?;
            decode_bundle(&bytes).map_err(|source| DecodeError::Json {
                path: task_path,
                source,
            })
        })
        .await
        .map_err(|e| DecodeError::Task {
            path,
            message: e.to_string(),
        })?
    }
}
