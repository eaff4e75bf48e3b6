//! Process runner that tunnels launches through the container host
//!
//! Presents the same contract as the local runner, but every run is proxied
//! to the per-container host agent so the process starts inside the
//! container's job object under the container's credentials.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::platform::host::ContainerHostClient;

use super::runner::{ProcessHandle, ProcessRunSpec, ProcessRunner};

/// Runner dispatching through a [`ContainerHostClient`]
pub struct ConstrainedProcessRunner {
    client: Arc<dyn ContainerHostClient>,
    sessions: Mutex<Vec<Weak<dyn ProcessHandle>>>,
}

impl ConstrainedProcessRunner {
    pub fn new(client: Arc<dyn ContainerHostClient>) -> Self {
        Self {
            client,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Number of sessions still alive
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.strong_count() > 0)
            .count()
    }
}

#[async_trait]
impl ProcessRunner for ConstrainedProcessRunner {
    async fn run(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
        let handle = self.client.run_process(spec).await?;

        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(Arc::downgrade(&handle));

        Ok(handle)
    }

    async fn dispose(&self) -> Result<()> {
        let sessions: Vec<Weak<dyn ProcessHandle>> = std::mem::take(&mut *self.sessions.lock());

        for session in sessions {
            if let Some(handle) = session.upgrade() {
                if let Err(e) = handle.kill().await {
                    warn!("Failed to end session {}: {}", handle.id(), e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeHandle {
        killed: AtomicBool,
    }

    #[async_trait]
    impl ProcessHandle for FakeHandle {
        fn id(&self) -> u32 {
            42
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
            Some(0)
        }

        fn stdout(&self) -> String {
            String::new()
        }

        fn stderr(&self) -> String {
            String::new()
        }
    }

    struct FakeClient {
        runs: AtomicUsize,
        down: AtomicBool,
        last: Mutex<Option<Arc<FakeHandle>>>,
    }

    impl FakeClient {
        fn new(down: bool) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                down: AtomicBool::new(down),
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ContainerHostClient for FakeClient {
        async fn run_process(&self, _spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::HostUnavailable("host is down".into()));
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            let handle = Arc::new(FakeHandle {
                killed: AtomicBool::new(false),
            });
            *self.last.lock() = Some(handle.clone());
            Ok(handle)
        }

        async fn shutdown(&self) -> Result<()> {
            self.down.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runs_are_proxied_to_the_host() {
        let client = FakeClient::new(false);
        let runner = ConstrainedProcessRunner::new(client.clone());

        let handle = runner.run(ProcessRunSpec::new("cmd.exe")).await.unwrap();
        assert_eq!(handle.id(), 42);
        assert_eq!(client.runs.load(Ordering::SeqCst), 1);
        assert_eq!(runner.active_sessions(), 1);

        drop(handle);
        assert_eq!(runner.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_dispose_kills_outstanding_sessions() {
        let client = FakeClient::new(false);
        let runner = ConstrainedProcessRunner::new(client.clone());

        let _handle = runner.run(ProcessRunSpec::new("cmd.exe")).await.unwrap();
        runner.dispose().await.unwrap();

        let last = client.last.lock().clone().unwrap();
        assert!(last.killed.load(Ordering::SeqCst));
        assert_eq!(runner.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_host_failure_propagates() {
        let client = FakeClient::new(true);
        let runner = ConstrainedProcessRunner::new(client);

        let err = runner.run(ProcessRunSpec::new("cmd.exe")).await.unwrap_err();
        assert!(matches!(err, Error::HostUnavailable(_)));
    }
}
