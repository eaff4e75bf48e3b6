//! OS process launch and supervision

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::platform::users::{UserCredential, UserManager};

use super::environment::EnvironmentBlock;
use super::escape::escape_arguments;

/// Callback invoked with each line of process output
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked once with the process exit code
pub type ExitCallback = Arc<dyn Fn(i32) + Send + Sync>;

/// Specification for one process launch
#[derive(Clone, Default)]
pub struct ProcessRunSpec {
    /// Program to execute
    pub executable: PathBuf,

    /// Argument vector, unescaped
    pub arguments: Vec<String>,

    /// Working directory for the process
    pub working_directory: Option<PathBuf>,

    /// Credentials to run under; absent means the daemon's own identity
    pub credential: Option<UserCredential>,

    /// Explicit environment; when absent or empty one is synthesized
    pub environment: Option<HashMap<String, String>>,

    /// Collect output instead of streaming it through callbacks
    pub buffered_io: bool,

    /// Line-oriented standard output callback (streaming mode)
    pub output_callback: Option<OutputCallback>,

    /// Line-oriented standard error callback (streaming mode)
    pub error_callback: Option<OutputCallback>,

    /// Invoked once when the process exits
    pub exit_callback: Option<ExitCallback>,
}

impl ProcessRunSpec {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn with_args<S: Into<String>>(mut self, arguments: impl IntoIterator<Item = S>) -> Self {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }
}

/// Handle to a launched process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id
    fn id(&self) -> u32;

    /// Wait until the process exits and return its exit code
    async fn wait(&self) -> Result<i32>;

    /// Write to the process standard input
    async fn write_stdin(&self, data: &[u8]) -> Result<()>;

    /// Close the process standard input
    async fn close_stdin(&self) -> Result<()>;

    /// Terminate the process
    async fn kill(&self) -> Result<()>;

    /// Exit code, once the process has completed
    fn exit_code(&self) -> Option<i32>;

    /// Captured standard output so far
    fn stdout(&self) -> String;

    /// Captured standard error so far
    fn stderr(&self) -> String;
}

impl std::fmt::Debug for dyn ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").field("id", &self.id()).finish()
    }
}

/// Contract for launching processes on behalf of a container
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Launch a process from a run specification
    async fn run(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>>;

    /// Stop every process this runner started
    async fn stop_all(&self, _kill: bool) -> Result<()> {
        Err(Error::Unimplemented("stop_all"))
    }

    /// Find a previously started process by id
    fn find_by_id(&self, _id: u32) -> Result<Arc<dyn ProcessHandle>> {
        Err(Error::Unimplemented("find_by_id"))
    }

    /// Release runner resources, ending any sessions it still tracks
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// Runner that launches processes directly on the host.
///
/// Shell execution is disabled, all three standard streams are redirected,
/// and no user profile is loaded at spawn; profile environments come in
/// through the environment block instead.
pub struct LocalProcessRunner {
    users: Arc<dyn UserManager>,
}

impl LocalProcessRunner {
    pub fn new(users: Arc<dyn UserManager>) -> Self {
        Self { users }
    }

    async fn resolve_environment(&self, spec: &ProcessRunSpec) -> Result<HashMap<String, String>> {
        if let Some(map) = &spec.environment {
            if !map.is_empty() {
                return Ok(map.clone());
            }
        }

        match &spec.credential {
            Some(credential) => Ok(EnvironmentBlock::for_user(self.users.as_ref(), credential)
                .await?
                .into_map()),
            None => Ok(EnvironmentBlock::inherited().into_map()),
        }
    }
}

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(&self, spec: ProcessRunSpec) -> Result<Arc<dyn ProcessHandle>> {
        let environment = self.resolve_environment(&spec).await?;

        debug!(
            "Launching {:?} {}",
            spec.executable,
            escape_arguments(&spec.arguments)
        );

        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.arguments)
            .env_clear()
            .envs(&environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &spec.working_directory {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ResourceMissing(format!("executable {:?}", spec.executable))
            } else {
                Error::Io(e)
            }
        })?;

        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take();

        let stdout_buffer = Arc::new(parking_lot::Mutex::new(String::new()));
        let stderr_buffer = Arc::new(parking_lot::Mutex::new(String::new()));

        // Streaming callbacks only apply outside buffered mode
        let (stdout_cb, stderr_cb) = if spec.buffered_io {
            (None, None)
        } else {
            (spec.output_callback.clone(), spec.error_callback.clone())
        };

        let mut readers = Vec::new();
        if let Some(stream) = child.stdout.take() {
            readers.push(spawn_line_reader(stream, stdout_buffer.clone(), stdout_cb));
        }
        if let Some(stream) = child.stderr.take() {
            readers.push(spawn_line_reader(stream, stderr_buffer.clone(), stderr_cb));
        }

        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        let (exit_tx, exit_rx) = watch::channel(None::<i32>);
        let exit_callback = spec.exit_callback.clone();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx.recv() => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill process {}: {}", pid, e);
                    }
                    child.wait().await
                }
            };

            // Drain output before publishing the exit, so buffered reads
            // observe the complete streams.
            for reader in readers {
                let _ = reader.await;
            }

            let code = match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    warn!("Waiting on process {} failed: {}", pid, e);
                    -1
                }
            };

            let _ = exit_tx.send(Some(code));
            if let Some(callback) = exit_callback {
                callback(code);
            }
        });

        Ok(Arc::new(ManagedProcess {
            pid,
            stdin: Mutex::new(stdin),
            kill_tx,
            exit_rx,
            stdout: stdout_buffer,
            stderr: stderr_buffer,
        }))
    }
}

fn spawn_line_reader<R>(
    stream: R,
    buffer: Arc<parking_lot::Mutex<String>>,
    callback: Option<OutputCallback>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            {
                let mut buffer = buffer.lock();
                buffer.push_str(&line);
                buffer.push('\n');
            }
            if let Some(callback) = &callback {
                callback(&line);
            }
        }
    })
}

/// Supervised process started by a [`LocalProcessRunner`]
struct ManagedProcess {
    pid: u32,
    stdin: Mutex<Option<ChildStdin>>,
    kill_tx: mpsc::Sender<()>,
    exit_rx: watch::Receiver<Option<i32>>,
    stdout: Arc<parking_lot::Mutex<String>>,
    stderr: Arc<parking_lot::Mutex<String>>,
}

#[async_trait]
impl ProcessHandle for ManagedProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    async fn wait(&self) -> Result<i32> {
        let mut rx = self.exit_rx.clone();
        let value = rx
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| Error::HostUnavailable("process supervisor ended unexpectedly".into()))?;
        Ok(value.unwrap_or(-1))
    }

    async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidInput("process stdin is closed".into()))?;

        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close_stdin(&self) -> Result<()> {
        self.stdin.lock().await.take();
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        // A closed channel means the process already exited
        let _ = self.kill_tx.send(()).await;
        Ok(())
    }

    fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    fn stdout(&self) -> String {
        self.stdout.lock().clone()
    }

    fn stderr(&self) -> String {
        self.stderr.lock().clone()
    }
}
