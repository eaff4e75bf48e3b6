//! Container host agent capability
//!
//! Each container owns a long-running host agent executing work under the
//! container's credentials. The native backend talks to a separate agent
//! process; the local backend supervises runs in-process, which keeps the
//! same contract observable end to end.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::platform::jobs::JobObjectHandle;
use crate::platform::users::{UserCredential, UserManager};
use crate::process::runner::{LocalProcessRunner, ProcessHandle, ProcessRunSpec, ProcessRunner};

/// Connection to one container's host agent
#[async_trait]
pub trait ContainerHostClient: Send + Sync {
    /// Execute a process inside the container
    async fn run_process(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>>;

    /// Stop the agent; subsequent runs fail as host-unavailable
    async fn shutdown(&self) -> Result<()>;
}

/// Factory starting host agents
#[async_trait]
pub trait ContainerHostService: Send + Sync {
    /// Start the host agent for a container.
    ///
    /// The agent runs under `credential`, bound to `job_object`, with
    /// `directory` as its working directory.
    async fn start_host(
        &self,
        id: &str,
        directory: &Path,
        job_object: Arc<dyn JobObjectHandle>,
        credential: &UserCredential,
    ) -> Result<Arc<dyn ContainerHostClient>>;
}

/// In-process host backend
pub struct LocalHostService {
    users: Arc<dyn UserManager>,
}

impl LocalHostService {
    pub fn new(users: Arc<dyn UserManager>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl ContainerHostService for LocalHostService {
    async fn start_host(
        &self,
        id: &str,
        directory: &Path,
        job_object: Arc<dyn JobObjectHandle>,
        credential: &UserCredential,
    ) -> Result<Arc<dyn ContainerHostClient>> {
        info!("Starting host for container {}", id);

        Ok(Arc::new(LocalHostClient {
            id: id.to_string(),
            directory: directory.to_path_buf(),
            job_object,
            credential: credential.clone(),
            runner: LocalProcessRunner::new(self.users.clone()),
            down: AtomicBool::new(false),
        }))
    }
}

/// Host client executing runs in-process.
///
/// Every launch lands in the container's job object and defaults to the
/// container's credentials and working directory.
pub struct LocalHostClient {
    id: String,
    directory: PathBuf,
    job_object: Arc<dyn JobObjectHandle>,
    credential: UserCredential,
    runner: LocalProcessRunner,
    down: AtomicBool,
}

#[async_trait]
impl ContainerHostClient for LocalHostClient {
    async fn run_process(&self, mut spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::HostUnavailable(format!(
                "host for container {} is shut down",
                self.id
            )));
        }

        if spec.working_directory.is_none() {
            spec.working_directory = Some(self.directory.clone());
        }
        if spec.credential.is_none() {
            spec.credential = Some(self.credential.clone());
        }

        let handle = self.runner.run(spec).await?;
        self.job_object.attach(&handle).await?;

        Ok(handle)
    }

    async fn shutdown(&self) -> Result<()> {
        if self.down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!("Shutting down host for container {}", self.id);
        self.job_object.terminate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::jobs::{JobObjectManager, LocalJobObjectManager};
    use crate::platform::users::LogonToken;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct StubUsers;

    #[async_trait]
    impl UserManager for StubUsers {
        async fn create_user(&self, name: &str) -> Result<UserCredential> {
            Ok(UserCredential::new(name, "pw"))
        }

        async fn delete_user(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn get_sid(&self, name: &str) -> Result<String> {
            Ok(format!("S-1-5-21-{}", name))
        }

        async fn add_to_group(&self, _name: &str, _group: &str) -> Result<()> {
            Ok(())
        }

        async fn logon_user(&self, _credential: &UserCredential) -> Result<LogonToken> {
            Ok(LogonToken::new(1))
        }

        async fn load_user_environment(
            &self,
            _token: &LogonToken,
        ) -> Result<HashMap<String, String>> {
            Ok(HashMap::from([(
                "USERPROFILE".to_string(),
                "present".to_string(),
            )]))
        }
    }

    async fn start_client(temp: &TempDir) -> (Arc<dyn ContainerHostClient>, Arc<dyn JobObjectHandle>) {
        let jobs = LocalJobObjectManager::new();
        let job = jobs.create("c_HOST").await.unwrap();
        let service = LocalHostService::new(Arc::new(StubUsers));

        let client = service
            .start_host(
                "c_HOST",
                temp.path(),
                job.clone(),
                &UserCredential::new("c_HOST", "pw"),
            )
            .await
            .unwrap();

        (client, job)
    }

    #[tokio::test]
    async fn test_runs_default_to_container_context() {
        let temp = TempDir::new().unwrap();
        let (client, _job) = start_client(&temp).await;

        let mut spec = ProcessRunSpec::new("/bin/sh").with_args(["-c", "pwd; printf \"$USERPROFILE\""]);
        spec.buffered_io = true;

        let handle = client.run_process(spec).await.unwrap();
        assert_eq!(handle.wait().await.unwrap(), 0);

        let output = handle.stdout();
        // Working directory and profile environment both come from the container
        assert!(output.contains(temp.path().to_str().unwrap()));
        assert!(output.contains("present"));
    }

    #[tokio::test]
    async fn test_shutdown_makes_host_unavailable() {
        let temp = TempDir::new().unwrap();
        let (client, _job) = start_client(&temp).await;

        client.shutdown().await.unwrap();

        let err = client
            .run_process(ProcessRunSpec::new("/bin/sh").with_args(["-c", "true"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HostUnavailable(_)));

        // Shutdown is idempotent
        client.shutdown().await.unwrap();
    }
}
