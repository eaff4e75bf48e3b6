//! Kernel job grouping capability
//!
//! A job object groups every process a container launches so they can be
//! controlled and terminated in bulk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::process::runner::ProcessHandle;

/// Handle to one named job object
#[async_trait]
pub trait JobObjectHandle: Send + Sync {
    /// Name the job object was created under
    fn name(&self) -> &str;

    /// Place a process into the job
    async fn attach(&self, process: &Arc<dyn ProcessHandle>) -> Result<()>;

    /// Terminate every process in the job
    async fn terminate(&self) -> Result<()>;

    /// Release the job object
    async fn dispose(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn JobObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobObjectHandle").field("name", &self.name()).finish()
    }
}

/// Job object table operations
#[async_trait]
pub trait JobObjectManager: Send + Sync {
    /// Create a job object under a unique name.
    ///
    /// Fails with a resource-exists error if the name is taken.
    async fn create(&self, name: &str) -> Result<Arc<dyn JobObjectHandle>>;

    /// Open an existing job object by name, creating it if absent
    async fn open_or_create(&self, name: &str) -> Result<Arc<dyn JobObjectHandle>>;
}

/// Portable job object backend tracking member processes in memory
pub struct LocalJobObjectManager {
    jobs: DashMap<String, Arc<LocalJobObject>>,
}

impl LocalJobObjectManager {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }
}

impl Default for LocalJobObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobObjectManager for LocalJobObjectManager {
    async fn create(&self, name: &str) -> Result<Arc<dyn JobObjectHandle>> {
        let job = Arc::new(LocalJobObject::new(name));

        match self.jobs.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                // A disposed job frees its name for reuse
                if entry.get().is_disposed() {
                    entry.insert(job.clone());
                    Ok(job)
                } else {
                    Err(Error::ResourceExists(format!("job object {:?}", name)))
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(job.clone());
                Ok(job)
            }
        }
    }

    async fn open_or_create(&self, name: &str) -> Result<Arc<dyn JobObjectHandle>> {
        if let Some(existing) = self.jobs.get(name) {
            if !existing.is_disposed() {
                return Ok(existing.value().clone() as Arc<dyn JobObjectHandle>);
            }
        }
        self.create(name).await
    }
}

/// In-memory job object holding weak references to its members
pub struct LocalJobObject {
    name: String,
    members: Mutex<Vec<Weak<dyn ProcessHandle>>>,
    disposed: AtomicBool,
}

impl LocalJobObject {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Number of member processes still alive
    pub fn member_count(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|m| m.strong_count() > 0)
            .count()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobObjectHandle for LocalJobObject {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attach(&self, process: &Arc<dyn ProcessHandle>) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::ResourceMissing(format!("job object {:?}", self.name)));
        }

        let mut members = self.members.lock();
        members.retain(|m| m.strong_count() > 0);
        members.push(Arc::downgrade(process));
        debug!("Attached process {} to job {:?}", process.id(), self.name);
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        let members: Vec<Weak<dyn ProcessHandle>> = std::mem::take(&mut *self.members.lock());

        for member in members {
            if let Some(process) = member.upgrade() {
                if let Err(e) = process.kill().await {
                    warn!(
                        "Failed to terminate process {} in job {:?}: {}",
                        process.id(),
                        self.name,
                        e
                    );
                }
            }
        }

        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.terminate().await?;
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProcess {
        killed: AtomicBool,
    }

    #[async_trait]
    impl ProcessHandle for FakeProcess {
        fn id(&self) -> u32 {
            1
        }

        async fn wait(&self) -> Result<i32> {
            Ok(0)
        }

        async fn write_stdin(&self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn close_stdin(&self) -> Result<()> {
            Ok(())
        }

        async fn kill(&self) -> Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn exit_code(&self) -> Option<i32> {
            None
        }

        fn stdout(&self) -> String {
            String::new()
        }

        fn stderr(&self) -> String {
            String::new()
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let manager = LocalJobObjectManager::new();

        manager.create("c_AAAA").await.unwrap();
        let err = manager.create("c_AAAA").await.unwrap_err();
        assert!(matches!(err, Error::ResourceExists(_)));
    }

    #[tokio::test]
    async fn test_open_or_create_reattaches() {
        let manager = LocalJobObjectManager::new();

        let first = manager.create("c_BBBB").await.unwrap();
        let second = manager.open_or_create("c_BBBB").await.unwrap();
        assert_eq!(first.name(), second.name());

        // A fresh name is created on demand
        let third = manager.open_or_create("c_CCCC").await.unwrap();
        assert_eq!(third.name(), "c_CCCC");
    }

    #[tokio::test]
    async fn test_terminate_kills_members() {
        let manager = LocalJobObjectManager::new();
        let job = manager.create("c_DDDD").await.unwrap();

        let process = Arc::new(FakeProcess {
            killed: AtomicBool::new(false),
        });
        let as_handle: Arc<dyn ProcessHandle> = process.clone();
        job.attach(&as_handle).await.unwrap();

        job.terminate().await.unwrap();
        assert!(process.killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispose_frees_the_name() {
        let manager = LocalJobObjectManager::new();

        let job = manager.create("c_EEEE").await.unwrap();
        job.dispose().await.unwrap();

        // Attaching to a disposed job fails, and the name is available again
        let process: Arc<dyn ProcessHandle> = Arc::new(FakeProcess {
            killed: AtomicBool::new(false),
        });
        assert!(job.attach(&process).await.is_err());
        manager.create("c_EEEE").await.unwrap();
    }
}
