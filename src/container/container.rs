//! Container entity
//!
//! Aggregates everything one container owns — user, directory, job object,
//! host client, runners, quota, ports, properties — and exposes its
//! lifecycle and execution operations. Teardown runs in reverse creation
//! order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::command::builtin::{RunCommand, RUN_VERB};
use crate::command::runner::{CommandContext, CommandRunner, TaskCommandArgs, TaskCommandResult};
use crate::error::{Error, Result};
use crate::platform::host::ContainerHostClient;
use crate::platform::jobs::JobObjectHandle;
use crate::platform::net::TcpPortManager;
use crate::platform::quota::QuotaControl;
use crate::process::environment::EnvironmentBlock;
use crate::process::runner::{ProcessHandle, ProcessRunSpec, ProcessRunner};

use super::directory::ContainerDirectory;
use super::properties::PropertyService;
use super::user::ContainerUser;

/// Lifecycle state; transitions are monotonic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Active,
    Destroying,
    Destroyed,
}

/// Queryable snapshot of one container
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub state: ContainerState,
    pub properties: HashMap<String, String>,
    pub reserved_ports: Vec<u16>,
}

/// Everything assembled by the service for one container
pub struct ContainerComponents {
    pub id: String,
    pub handle: String,
    pub user: ContainerUser,
    pub directory: ContainerDirectory,
    pub job_object: Arc<dyn JobObjectHandle>,
    pub host_client: Option<Arc<dyn ContainerHostClient>>,
    pub runner: Arc<dyn ProcessRunner>,
    pub privileged_runner: Arc<dyn ProcessRunner>,
    pub quota: Arc<dyn QuotaControl>,
    pub ports: Arc<dyn TcpPortManager>,
    pub environment: EnvironmentBlock,
    pub properties: Arc<PropertyService>,
}

/// One isolated execution domain
pub struct Container {
    id: String,
    handle: String,
    user: ContainerUser,
    directory: ContainerDirectory,
    job_object: Arc<dyn JobObjectHandle>,
    host_client: Option<Arc<dyn ContainerHostClient>>,

    /// Default execution path, routed through the host agent
    runner: Arc<dyn ProcessRunner>,

    /// Service-identity execution path
    privileged_runner: Arc<dyn ProcessRunner>,

    quota: Arc<dyn QuotaControl>,
    ports: Arc<dyn TcpPortManager>,
    reserved_ports: Mutex<Vec<u16>>,
    environment: EnvironmentBlock,
    properties: Arc<PropertyService>,
    commands: CommandRunner,
    state: RwLock<ContainerState>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl Container {
    pub fn new(components: ContainerComponents) -> Self {
        let commands = CommandRunner::new();
        commands.register(
            RUN_VERB,
            Arc::new(|| Box::new(RunCommand) as Box<dyn crate::command::runner::TaskCommand>),
        );

        Self {
            id: components.id,
            handle: components.handle,
            user: components.user,
            directory: components.directory,
            job_object: components.job_object,
            host_client: components.host_client,
            runner: components.runner,
            privileged_runner: components.privileged_runner,
            quota: components.quota,
            ports: components.ports,
            reserved_ports: Mutex::new(Vec::new()),
            environment: components.environment,
            properties: components.properties,
            commands,
            state: RwLock::new(ContainerState::Active),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn state(&self) -> ContainerState {
        *self.state.read()
    }

    pub fn directory(&self) -> &ContainerDirectory {
        &self.directory
    }

    pub fn user(&self) -> &ContainerUser {
        &self.user
    }

    pub fn quota(&self) -> &Arc<dyn QuotaControl> {
        &self.quota
    }

    pub fn environment(&self) -> &EnvironmentBlock {
        &self.environment
    }

    /// Verb registry for this container
    pub fn commands(&self) -> &CommandRunner {
        &self.commands
    }

    fn ensure_active(&self) -> Result<()> {
        let state = self.state();
        if state == ContainerState::Active {
            Ok(())
        } else {
            Err(Error::ResourceMissing(format!(
                "container {:?} is {:?}",
                self.handle, state
            )))
        }
    }

    /// Launch a process in the container.
    ///
    /// Privileged runs use the service identity instead of tunnelling
    /// through the host agent. The container's baseline environment and
    /// user directory fill any gaps in the spec.
    pub async fn run(
        &self,
        mut spec: ProcessRunSpec,
        privileged: bool,
    ) -> Result<Arc<dyn ProcessHandle>> {
        self.ensure_active()?;

        if spec.environment.is_none() && !self.environment.is_empty() {
            spec.environment = Some(self.environment.as_map().clone());
        }
        if spec.working_directory.is_none() {
            spec.working_directory = Some(self.directory.user_path());
        }

        let runner = if privileged {
            &self.privileged_runner
        } else {
            &self.runner
        };
        runner.run(spec).await
    }

    /// Dispatch a task verb through the command registry
    pub async fn run_command(
        &self,
        verb: &str,
        arguments: Vec<String>,
        privileged: bool,
    ) -> Result<TaskCommandResult> {
        self.ensure_active()?;

        let runner = if privileged {
            self.privileged_runner.clone()
        } else {
            self.runner.clone()
        };

        let args = TaskCommandArgs {
            arguments,
            context: CommandContext {
                runner,
                working_directory: self.directory.user_path(),
                environment: self.environment.as_map().clone(),
            },
        };

        self.commands.run(verb, args).await
    }

    /// Reserve a TCP port for this container.
    ///
    /// Port 0 requests an ephemeral port. Reservations are released on
    /// destroy.
    pub async fn reserve_port(&self, port: u16) -> Result<u16> {
        self.ensure_active()?;

        let reserved = self.ports.reserve(&self.id, port).await?;
        self.reserved_ports.lock().push(reserved);
        Ok(reserved)
    }

    /// Snapshot of state, properties, and reservations
    pub async fn info(&self) -> Result<ContainerInfo> {
        let properties = self.properties.get_all(&self.directory, &self.id).await?;

        Ok(ContainerInfo {
            state: self.state(),
            properties,
            reserved_ports: self.reserved_ports.lock().clone(),
        })
    }

    /// Read one property
    pub async fn get_property(&self, key: &str) -> Result<Option<String>> {
        self.properties
            .get_property(&self.directory, &self.id, key)
            .await
    }

    /// Insert or replace one property
    pub async fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_active()?;
        self.properties
            .set_property(&self.directory, &self.id, key, value)
            .await
    }

    /// Remove one property
    pub async fn remove_property(&self, key: &str) -> Result<Option<String>> {
        self.ensure_active()?;
        self.properties
            .remove_property(&self.directory, &self.id, key)
            .await
    }

    /// Tear down everything the container owns, in reverse creation order.
    ///
    /// Destroying a container that is already gone is a no-op.
    pub async fn destroy(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ContainerState::Active {
                return Ok(());
            }
            *state = ContainerState::Destroying;
        }

        info!("Destroying container {} ({})", self.handle, self.id);

        if let Some(host) = &self.host_client {
            host.shutdown().await?;
        }
        self.runner.dispose().await?;
        self.job_object.dispose().await?;
        self.directory.destroy().await?;
        self.user.delete().await?;

        self.ports.release_all(&self.id).await?;
        self.reserved_ports.lock().clear();
        self.properties.forget(&self.id);

        *self.state.write() = ContainerState::Destroyed;
        info!("Destroyed container {}", self.handle);
        Ok(())
    }
}
