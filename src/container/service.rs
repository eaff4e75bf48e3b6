//! Transactional container provisioning and registry
//!
//! Creation walks a fixed sequence of host resources, pushing a
//! compensating action for each; any failure unwinds the stack so the host
//! is left with no orphaned resources. The registry maps case-folded
//! handles to live containers.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::platform::fs::{FileSystemManager, LocalFileSystem};
use crate::platform::host::{ContainerHostClient, ContainerHostService, LocalHostService};
use crate::platform::jobs::{JobObjectHandle, JobObjectManager, LocalJobObjectManager};
use crate::platform::net::{LocalTcpPortManager, TcpPortManager};
use crate::platform::quota::{LocalQuotaManager, QuotaManager};
use crate::platform::users::UserManager;
use crate::process::constrained::ConstrainedProcessRunner;
use crate::process::environment::EnvironmentBlock;
use crate::process::runner::{LocalProcessRunner, ProcessRunner};
use crate::system::UndoStack;

use super::container::{Container, ContainerComponents};
use super::directory::{BindMount, ContainerDirectory};
use super::handle::{generate_handle, generate_id};
use super::properties::PropertyService;
use super::user::ContainerUser;

/// Input specification for a new container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Caller-visible name; generated when absent or empty
    pub handle: Option<String>,

    /// Source trees copied into the user subtree
    pub bind_mounts: Vec<BindMount>,

    /// Initial property map
    pub properties: std::collections::HashMap<String, String>,

    /// Baseline environment for processes in the container
    pub environment: std::collections::HashMap<String, String>,
}

/// Creates, destroys, restores, and looks up containers
pub struct ContainerService {
    /// Case-folded handle to container
    containers: DashMap<String, Arc<Container>>,

    config: Arc<Configuration>,
    users: Arc<dyn UserManager>,
    fs: Arc<dyn FileSystemManager>,
    jobs: Arc<dyn JobObjectManager>,
    quotas: Arc<dyn QuotaManager>,
    ports: Arc<dyn TcpPortManager>,
    hosts: Arc<dyn ContainerHostService>,
    properties: Arc<PropertyService>,
}

impl ContainerService {
    /// Construct against an explicit capability set
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Configuration>,
        users: Arc<dyn UserManager>,
        fs: Arc<dyn FileSystemManager>,
        jobs: Arc<dyn JobObjectManager>,
        quotas: Arc<dyn QuotaManager>,
        ports: Arc<dyn TcpPortManager>,
        hosts: Arc<dyn ContainerHostService>,
    ) -> Self {
        let properties = Arc::new(PropertyService::new(
            fs.clone(),
            config.containers.properties_file.clone(),
        ));

        Self {
            containers: DashMap::new(),
            config,
            users,
            fs,
            jobs,
            quotas,
            ports,
            hosts,
            properties,
        }
    }

    /// Assemble the service over the portable local backends.
    ///
    /// Only the user database has no portable backend and must be supplied.
    pub fn with_local_backends(config: Arc<Configuration>, users: Arc<dyn UserManager>) -> Self {
        let quota = config.containers.disk_quota_bytes;

        Self::new(
            config,
            users.clone(),
            Arc::new(LocalFileSystem),
            Arc::new(LocalJobObjectManager::new()),
            Arc::new(LocalQuotaManager::new(quota)),
            Arc::new(LocalTcpPortManager::new()),
            Arc::new(LocalHostService::new(users)),
        )
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Provision a container from a specification.
    ///
    /// On any failure every step already taken is compensated in reverse
    /// order; if a compensation itself fails, the caller receives the
    /// triggering error aggregated with the undo failures.
    pub async fn create_container(&self, spec: ContainerSpec) -> Result<Arc<Container>> {
        let handle = match &spec.handle {
            Some(h) if !h.is_empty() => h.clone(),
            _ => generate_handle(),
        };
        let id = generate_id(&handle);

        info!("Creating container {:?} ({})", handle, id);

        let mut undo = UndoStack::new();
        match self.build_container(&handle, &id, &spec, &mut undo).await {
            Ok(container) => {
                undo.commit();
                info!("Created container {:?} ({})", handle, id);
                Ok(container)
            }
            Err(e) => {
                warn!("Creating container {:?} failed: {}; rolling back", handle, e);
                let failures = undo.undo_all().await;
                Err(UndoStack::rollback_error(e, failures))
            }
        }
    }

    async fn build_container(
        &self,
        handle: &str,
        id: &str,
        spec: &ContainerSpec,
        undo: &mut UndoStack,
    ) -> Result<Arc<Container>> {
        // User account
        let user = ContainerUser::create(
            self.users.clone(),
            id,
            self.config.containers.users_group.as_deref(),
        )
        .await?;
        {
            let users = self.users.clone();
            let id = id.to_string();
            undo.push("delete user", move || {
                Box::pin(async move { users.delete_user(&id).await })
            });
        }

        // Directory layout
        let directory = ContainerDirectory::new(
            self.fs.clone(),
            self.config.system.base_directory.join(id),
        );
        directory.create_subdirectories(user.username()).await?;
        {
            let directory = directory.clone();
            undo.push("destroy directory", move || {
                Box::pin(async move { directory.destroy().await })
            });
        }

        // Bind mounts ride on the directory compensator
        directory
            .create_bind_mounts(&spec.bind_mounts, user.username())
            .await?;

        // Job object
        let job_object = self.jobs.create(id).await?;
        {
            let job = job_object.clone();
            undo.push("dispose job object", move || {
                Box::pin(async move { job.dispose().await })
            });
        }

        // Host agent under the container credentials
        let credential = user
            .credential()
            .cloned()
            .ok_or_else(|| Error::HostUnavailable(format!("no credential for {}", id)))?;
        let host_client = self
            .hosts
            .start_host(id, directory.root(), job_object.clone(), &credential)
            .await?;
        {
            let host = host_client.clone();
            undo.push("shutdown host", move || {
                Box::pin(async move { host.shutdown().await })
            });
        }

        // Constrained runner over the host
        let runner = Arc::new(ConstrainedProcessRunner::new(host_client.clone()));
        {
            let runner = runner.clone();
            undo.push("dispose runner", move || {
                Box::pin(async move { runner.dispose().await })
            });
        }

        // Quota against the container volume
        let quota = self.quotas.create_quota_control(directory.root()).await?;
        debug!(
            "Attached quota for {} on volume {:?}",
            id,
            directory.volume()
        );

        let container = Arc::new(Container::new(ContainerComponents {
            id: id.to_string(),
            handle: handle.to_string(),
            user,
            directory: directory.clone(),
            job_object,
            host_client: Some(host_client),
            runner,
            privileged_runner: Arc::new(LocalProcessRunner::new(self.users.clone())),
            quota,
            ports: self.ports.clone(),
            environment: EnvironmentBlock::from_map(spec.environment.clone()),
            properties: self.properties.clone(),
        }));

        self.properties
            .set_properties(&directory, id, &spec.properties)
            .await?;

        // Publish; a lost handle race surfaces as resource-exists and
        // unwinds like any other failure
        match self.containers.entry(handle.to_lowercase()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::ResourceExists(format!("container handle {:?}", handle)))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(container.clone());
                Ok(container)
            }
        }
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Destroy a container by handle.
    ///
    /// Unknown handles are a no-op.
    pub async fn destroy_container(&self, handle: &str) -> Result<()> {
        let Some((_, container)) = self.containers.remove(&handle.to_lowercase()) else {
            debug!("Destroy of unknown handle {:?} is a no-op", handle);
            return Ok(());
        };

        container.destroy().await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Look up a container; handles compare case-insensitively
    pub fn get_by_handle(&self, handle: &str) -> Option<Arc<Container>> {
        self.containers
            .get(&handle.to_lowercase())
            .map(|r| r.value().clone())
    }

    /// Snapshot of all live containers
    pub fn get_containers(&self) -> Vec<Arc<Container>> {
        self.containers.iter().map(|r| r.value().clone()).collect()
    }

    /// Snapshot of all live handles, in their original case
    pub fn get_handles(&self) -> Vec<String> {
        self.containers
            .iter()
            .map(|r| r.value().handle().to_string())
            .collect()
    }

    /// Number of live containers
    pub fn count(&self) -> usize {
        self.containers.len()
    }

    // ========================================================================
    // Restore
    // ========================================================================

    /// Re-attach containers found under the base directory.
    ///
    /// Restored containers run degraded: no live host agent, so both
    /// execution paths use the unconstrained runner, and the handle is the
    /// id since no handle is persisted. Directories that fail to restore
    /// are logged and skipped.
    pub async fn restore_containers(&self) -> Result<usize> {
        let base = self.config.system.base_directory.clone();

        let ids = match self.fs.enumerate_directories(&base).await {
            Ok(ids) => ids,
            Err(e) if e.is_missing() => {
                debug!("Base directory {:?} absent; nothing to restore", base);
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        info!("Restoring {} container directories from {:?}", ids.len(), base);

        // Restore in parallel with bounded concurrency
        let semaphore = Arc::new(Semaphore::new(num_cpus::get()));
        let mut handles = Vec::new();

        for id in ids {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::InvalidInput("restore semaphore closed".into()))?;

            let users = self.users.clone();
            let fs = self.fs.clone();
            let jobs = self.jobs.clone();
            let quotas = self.quotas.clone();
            let ports = self.ports.clone();
            let properties = self.properties.clone();
            let root = base.join(&id);

            handles.push(tokio::spawn(async move {
                let _permit = permit;

                match Self::restore_one(users, fs, jobs, quotas, ports, properties, root, &id).await
                {
                    Ok(container) => {
                        debug!("Restored container {}", id);
                        Some((id, container))
                    }
                    Err(e) => {
                        error!("Failed to restore container {}: {}", id, e);
                        None
                    }
                }
            }));
        }

        let mut restored = 0;
        for handle in handles {
            if let Ok(Some((id, container))) = handle.await {
                match self.containers.entry(id.to_lowercase()) {
                    dashmap::mapref::entry::Entry::Occupied(_) => {
                        warn!("Container {} is already registered; skipping restore", id);
                    }
                    dashmap::mapref::entry::Entry::Vacant(entry) => {
                        entry.insert(container);
                        restored += 1;
                    }
                }
            }
        }

        info!("Restored {} containers", restored);
        Ok(restored)
    }

    #[allow(clippy::too_many_arguments)]
    async fn restore_one(
        users: Arc<dyn UserManager>,
        fs: Arc<dyn FileSystemManager>,
        jobs: Arc<dyn JobObjectManager>,
        quotas: Arc<dyn QuotaManager>,
        ports: Arc<dyn TcpPortManager>,
        properties: Arc<PropertyService>,
        root: PathBuf,
        id: &str,
    ) -> Result<Arc<Container>> {
        let user = ContainerUser::restore(users.clone(), id);
        let directory = ContainerDirectory::new(fs, root);
        let job_object = jobs.open_or_create(id).await?;
        let quota = quotas.create_quota_control(directory.root()).await?;

        // No live host agent; both paths share the unconstrained runner
        let runner: Arc<dyn ProcessRunner> = Arc::new(LocalProcessRunner::new(users));

        Ok(Arc::new(Container::new(ContainerComponents {
            // The handle is not persisted, so it restores as the id
            id: id.to_string(),
            handle: id.to_string(),
            user,
            directory,
            job_object,
            host_client: None,
            runner: runner.clone(),
            privileged_runner: runner,
            quota,
            ports,
            environment: EnvironmentBlock::default(),
            properties,
        })))
    }
}
