//! Artifact sources: discovery and download against AWS backends.
//!
//! The object-store source implements the full [`ArtifactSource`] contract:
//! it lists keys, filters them through collection state, and streams object
//! bodies into a per-run scratch directory. The log-stream source produces
//! rows directly from the events API and only shares the scratch-free parts
//! of the contract.

mod client;
mod cloudwatch;
mod rate_limit;
mod s3;

pub use cloudwatch::{CloudWatchSource, LogEvent};
pub use rate_limit::RateLimiter;
pub use s3::S3Source;

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::collector::RunContext;
use crate::constants::SCRATCH_DIR_PREFIX;
use crate::errors::{CollectError, CollectResult};
use crate::models::ArtifactInfo;

/// A backend that discovers artifacts and fetches them to local scratch.
#[async_trait]
pub trait ArtifactSource: Send {
    fn identifier(&self) -> &'static str;

    /// Enumerate candidate artifacts into `discovered`, newest-known state
    /// applied. A dropped receiver means the run is shutting down.
    async fn discover(
        &self,
        ctx: &RunContext,
        discovered: &mpsc::Sender<ArtifactInfo>,
    ) -> CollectResult<()>;

    /// Fetch one artifact to scratch, returning info pointing at the local
    /// copy.
    async fn download(&self, ctx: &RunContext, info: &ArtifactInfo)
        -> CollectResult<ArtifactInfo>;

    /// Release per-run resources, including the scratch directory.
    fn close(&self) -> CollectResult<()>;
}

/// Per-run scratch directory under the system temp dir.
#[derive(Debug)]
pub(crate) struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub(crate) fn create() -> CollectResult<Self> {
        let root = std::env::temp_dir().join(format!(
            "{}-{}",
            SCRATCH_DIR_PREFIX,
            Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&root).map_err(|e| {
            CollectError::Fatal(format!("cannot create scratch dir {}: {}", root.display(), e))
        })?;
        debug!("Created scratch dir {}", root.display());
        Ok(ScratchDir { root })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Local path for a remote key, with parent directories created. Path
    /// traversal segments in the key are rejected.
    pub(crate) fn path_for(&self, key: &str) -> CollectResult<PathBuf> {
        let relative = key.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|part| part == "..") {
            return Err(CollectError::Fatal(format!(
                "refusing scratch path for key '{}'",
                key
            )));
        }
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CollectError::Fatal(format!(
                    "cannot create scratch subdir {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(path)
    }

    /// Remove the whole scratch tree. Partial artifacts from a cancelled run
    /// stay behind only if this is never called.
    pub(crate) fn remove(&self) -> CollectResult<()> {
        if self.root.exists() {
            if let Err(e) = fs::remove_dir_all(&self.root) {
                warn!("Failed to remove scratch dir {}: {}", self.root.display(), e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_paths_mirror_keys() {
        let scratch = ScratchDir::create().unwrap();
        let path = scratch.path_for("AWSLogs/123/2023/11/14/x.json.gz").unwrap();
        assert!(path.starts_with(scratch.root()));
        assert!(path.parent().unwrap().is_dir());
        scratch.remove().unwrap();
        assert!(!scratch.root().exists());
    }

    #[test]
    fn test_scratch_rejects_traversal() {
        let scratch = ScratchDir::create().unwrap();
        assert!(scratch.path_for("../escape").is_err());
        assert!(scratch.path_for("a/../../b").is_err());
        assert!(scratch.path_for("").is_err());
        scratch.remove().unwrap();
    }

    #[test]
    fn test_remove_is_idempotent() {
        let scratch = ScratchDir::create().unwrap();
        scratch.remove().unwrap();
        scratch.remove().unwrap();
    }
}
