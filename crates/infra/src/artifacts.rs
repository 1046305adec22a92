//! Where generated report documents are read from.
//!
//! Reports are rendered elsewhere; the delivery pipeline only needs to fetch the
//! bytes by `artifact_key` to attach them.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use workhub_core::TenantId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("invalid artifact key: {0}")]
    InvalidKey(String),
    #[error("artifact I/O error: {0}")]
    Io(String),
}

impl ArtifactError {
    /// Missing or malformed artifacts won't appear by waiting.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArtifactError::Io(_))
    }
}

/// A rendered report document ready to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ReportArtifact {
    /// Build an artifact, guessing the content type from the file extension.
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            filename,
            content_type,
            bytes,
        }
    }
}

#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, tenant_id: TenantId, artifact_key: &str) -> Result<ReportArtifact, ArtifactError>;
}

/// Rejects empty, absolute and parent-escaping keys.
fn validate_key(key: &str) -> Result<&Path, ArtifactError> {
    let path = Path::new(key);
    if key.trim().is_empty() {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }
    let all_normal = path.components().all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }
    Ok(path)
}

fn filename_of(path: &Path, key: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryArtifactSource {
    artifacts: RwLock<HashMap<(TenantId, String), Vec<u8>>>,
}

impl InMemoryArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, tenant_id: TenantId, artifact_key: impl Into<String>, bytes: Vec<u8>) {
        if let Ok(mut artifacts) = self.artifacts.write() {
            artifacts.insert((tenant_id, artifact_key.into()), bytes);
        }
    }
}

#[async_trait]
impl ArtifactSource for InMemoryArtifactSource {
    async fn fetch(&self, tenant_id: TenantId, artifact_key: &str) -> Result<ReportArtifact, ArtifactError> {
        let path = validate_key(artifact_key)?;
        let artifacts = self
            .artifacts
            .read()
            .map_err(|_| ArtifactError::Io("artifact store lock poisoned".to_string()))?;
        let bytes = artifacts
            .get(&(tenant_id, artifact_key.to_string()))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(artifact_key.to_string()))?;
        Ok(ReportArtifact::from_bytes(filename_of(path, artifact_key), bytes))
    }
}

/// Reads artifacts from `<root>/<tenant_id>/<artifact_key>`.
#[derive(Debug, Clone)]
pub struct FsArtifactSource {
    root: PathBuf,
}

impl FsArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, tenant_id: TenantId, artifact_key: &str) -> Result<PathBuf, ArtifactError> {
        let key = validate_key(artifact_key)?;
        Ok(self.root.join(tenant_id.to_string()).join(key))
    }
}

#[async_trait]
impl ArtifactSource for FsArtifactSource {
    async fn fetch(&self, tenant_id: TenantId, artifact_key: &str) -> Result<ReportArtifact, ArtifactError> {
        let path = self.path_for(tenant_id, artifact_key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(ReportArtifact::from_bytes(filename_of(&path, artifact_key), bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(artifact_key.to_string()))
            }
            Err(e) => Err(ArtifactError::Io(format!("{}: {e}", path.display()))),
        }
    }
}
