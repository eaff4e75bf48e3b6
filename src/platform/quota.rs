//! Disk quota capability
//!
//! The native backend binds to the host volume quota API; the local backend
//! accounts directory sizes directly, with a short-lived cache.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Per-directory disk usage control
#[async_trait]
pub trait QuotaControl: Send + Sync {
    /// Directory the quota is scoped to
    fn directory(&self) -> &Path;

    /// Configured ceiling in bytes (0 for unlimited)
    fn limit(&self) -> u64;

    /// Whether the quota is enforced
    fn enabled(&self) -> bool;

    /// Replace the ceiling
    fn set_limit(&self, bytes: u64);

    /// Current usage in bytes
    async fn usage(&self) -> Result<u64>;

    /// Fail if usage plus `additional_bytes` would exceed the ceiling
    async fn check_space(&self, additional_bytes: u64) -> Result<()>;
}

/// Factory for quota controls
#[async_trait]
pub trait QuotaManager: Send + Sync {
    /// Obtain a quota control scoped to a container directory
    async fn create_quota_control(&self, directory: &Path) -> Result<Arc<dyn QuotaControl>>;
}

/// Local quota backend using directory-size accounting
pub struct LocalQuotaManager {
    default_limit: u64,
}

impl LocalQuotaManager {
    pub fn new(default_limit: u64) -> Self {
        Self { default_limit }
    }
}

#[async_trait]
impl QuotaManager for LocalQuotaManager {
    async fn create_quota_control(&self, directory: &Path) -> Result<Arc<dyn QuotaControl>> {
        Ok(Arc::new(DirectoryQuota::new(
            directory.to_path_buf(),
            self.default_limit,
        )))
    }
}

/// Directory-scoped quota with cached usage.
///
/// Remeasuring a whole container tree on every check is too expensive, so
/// measurements are reused until the TTL lapses.
pub struct DirectoryQuota {
    directory: PathBuf,

    /// Ceiling in bytes (0 for unlimited)
    limit: AtomicU64,

    /// Most recent measurement in bytes
    cached: AtomicU64,

    /// When the cached measurement was taken
    refreshed_at: Mutex<Option<Instant>>,

    ttl: Duration,
}

impl DirectoryQuota {
    pub fn new(directory: PathBuf, limit: u64) -> Self {
        Self {
            directory,
            limit: AtomicU64::new(limit),
            cached: AtomicU64::new(0),
            refreshed_at: Mutex::new(None),
            ttl: Duration::from_secs(60),
        }
    }

    async fn refresh_if_stale(&self) -> Result<u64> {
        let fresh = {
            let refreshed = self.refreshed_at.lock();
            matches!(*refreshed, Some(at) if at.elapsed() < self.ttl)
        };
        if fresh {
            return Ok(self.cached.load(Ordering::SeqCst));
        }

        let bytes = measure_tree(&self.directory).await?;
        self.cached.store(bytes, Ordering::SeqCst);
        *self.refreshed_at.lock() = Some(Instant::now());

        debug!("Disk usage under {:?}: {} bytes", self.directory, bytes);
        Ok(bytes)
    }
}

#[async_trait]
impl QuotaControl for DirectoryQuota {
    fn directory(&self) -> &Path {
        &self.directory
    }

    fn limit(&self) -> u64 {
        self.limit.load(Ordering::SeqCst)
    }

    fn enabled(&self) -> bool {
        true
    }

    fn set_limit(&self, bytes: u64) {
        self.limit.store(bytes, Ordering::SeqCst);
    }

    async fn usage(&self) -> Result<u64> {
        self.refresh_if_stale().await
    }

    async fn check_space(&self, additional_bytes: u64) -> Result<()> {
        let limit = self.limit();
        if limit == 0 {
            return Ok(());
        }

        let used = self.refresh_if_stale().await?;
        if used.saturating_add(additional_bytes) > limit {
            return Err(Error::Quota(format!(
                "{} of {} bytes used in {:?}",
                used, limit, self.directory
            )));
        }

        Ok(())
    }
}

/// Sum of file sizes under `root`.
///
/// Unreadable entries are skipped rather than failing the whole
/// measurement; a partially counted tree still gives the quota something
/// to enforce against.
async fn measure_tree(root: &Path) -> Result<u64> {
    let root = root.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut bytes = 0u64;

        for entry in walkdir::WalkDir::new(&root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {:?}: {}", root, e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            match entry.metadata() {
                Ok(meta) => bytes = bytes.saturating_add(meta.len()),
                Err(e) => debug!("Skipping {:?}: {}", entry.path(), e),
            }
        }

        bytes
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_usage_calculation() {
        let temp = TempDir::new().unwrap();

        let mut f1 = File::create(temp.path().join("file1.bin")).unwrap();
        f1.write_all(&[0u8; 1000]).unwrap();

        std::fs::create_dir(temp.path().join("subdir")).unwrap();
        let mut f2 = File::create(temp.path().join("subdir/file2.bin")).unwrap();
        f2.write_all(&[0u8; 500]).unwrap();

        let quota = DirectoryQuota::new(temp.path().to_path_buf(), 0);
        assert_eq!(quota.usage().await.unwrap(), 1500);
    }

    #[tokio::test]
    async fn test_usage_is_cached_within_ttl() {
        let temp = TempDir::new().unwrap();

        std::fs::write(temp.path().join("a.bin"), [0u8; 100]).unwrap();

        let quota = DirectoryQuota::new(temp.path().to_path_buf(), 0);
        assert_eq!(quota.usage().await.unwrap(), 100);

        // Growth inside the TTL window is not observed yet
        std::fs::write(temp.path().join("b.bin"), [0u8; 400]).unwrap();
        assert_eq!(quota.usage().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_check_space_enforces_limit() {
        let temp = TempDir::new().unwrap();

        let mut f = File::create(temp.path().join("data.bin")).unwrap();
        f.write_all(&[0u8; 800]).unwrap();

        let quota = DirectoryQuota::new(temp.path().to_path_buf(), 1000);
        assert!(quota.enabled());

        quota.check_space(100).await.unwrap();
        let err = quota.check_space(300).await.unwrap_err();
        assert!(matches!(err, Error::Quota(_)));
    }

    #[tokio::test]
    async fn test_zero_limit_means_unlimited() {
        let temp = TempDir::new().unwrap();
        let quota = DirectoryQuota::new(temp.path().to_path_buf(), 0);

        quota.check_space(u64::MAX).await.unwrap();
    }

    #[tokio::test]
    async fn test_manager_applies_default_limit() {
        let temp = TempDir::new().unwrap();
        let manager = LocalQuotaManager::new(4096);

        let quota = manager.create_quota_control(temp.path()).await.unwrap();
        assert_eq!(quota.limit(), 4096);
        assert_eq!(quota.directory(), temp.path());

        quota.set_limit(8192);
        assert_eq!(quota.limit(), 8192);
    }
}
