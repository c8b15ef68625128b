//! Model file locations and asset resolution.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Asset not found: {repo_id}/{filename}")]
    NotFound { repo_id: String, filename: String },

    #[error("Invalid asset name: {0}")]
    InvalidName(String),

    #[error("Asset fetch failed for {repo_id}/{filename}: {reason}")]
    Fetch {
        repo_id: String,
        filename: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a model or auxiliary file lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLocation {
    /// A file already on disk.
    Local(PathBuf),
    /// A file in a model repository, fetched by an [`AssetResolver`].
    Hub {
        repo_id: String,
        revision: String,
        filename: String,
    },
}

impl ModelLocation {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local(path.into())
    }

    /// A repository file at the `main` revision.
    pub fn hub(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::Hub {
            repo_id: repo_id.into(),
            revision: "main".to_string(),
            filename: filename.into(),
        }
    }

    pub fn repo_id(&self) -> Option<&str> {
        match self {
            Self::Local(_) => None,
            Self::Hub { repo_id, .. } => Some(repo_id),
        }
    }

    /// File name component, for either variant.
    pub fn filename(&self) -> Option<String> {
        match self {
            Self::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Self::Hub { filename, .. } => Some(filename.clone()),
        }
    }

    /// Resolve to a local path. Local paths are returned as given; the
    /// native loader reports a missing file as a load failure.
    pub async fn resolve(&self, assets: &dyn AssetResolver) -> Result<PathBuf, AssetError> {
        match self {
            Self::Local(path) => Ok(path.clone()),
            Self::Hub { repo_id, revision, filename } => {
                assets.ensure_file_on_disk(repo_id, revision, filename).await
            }
        }
    }
}

/// Makes repository files available on local disk.
///
/// Retries and caching are the implementor's concern.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn ensure_file_on_disk(
        &self,
        repo_id: &str,
        revision: &str,
        filename: &str,
    ) -> Result<PathBuf, AssetError>;
}

/// Resolves repository files from a pre-populated directory tree laid out
/// as `root/<repo_id>/<filename>`. The revision is ignored.
#[derive(Debug, Clone)]
pub struct LocalAssetResolver {
    root: PathBuf,
}

impl LocalAssetResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Reject absolute paths and parent-directory components.
fn check_relative(name: &str) -> Result<(), AssetError> {
    let path = Path::new(name);
    if name.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(AssetError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl AssetResolver for LocalAssetResolver {
    async fn ensure_file_on_disk(
        &self,
        repo_id: &str,
        _revision: &str,
        filename: &str,
    ) -> Result<PathBuf, AssetError> {
        check_relative(repo_id)?;
        check_relative(filename)?;

        let path = self.root.join(repo_id).join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                debug!(path = %path.display(), "asset resolved");
                Ok(path)
            }
            Ok(_) => Err(AssetError::NotFound {
                repo_id: repo_id.to_string(),
                filename: filename.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AssetError::NotFound {
                repo_id: repo_id.to_string(),
                filename: filename.to_string(),
            }),
            Err(e) => Err(AssetError::Io(e)),
        }
    }
}
