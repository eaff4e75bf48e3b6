//! Container user principal
//!
//! Every container is backed by a dedicated local account named after the
//! container id. The account exists exactly as long as the container does.

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::platform::users::{UserCredential, UserManager};

/// The local account owned by one container
pub struct ContainerUser {
    manager: Arc<dyn UserManager>,
    username: String,
    credential: Option<UserCredential>,
}

impl std::fmt::Debug for ContainerUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerUser")
            .field("username", &self.username)
            .finish()
    }
}

impl ContainerUser {
    /// Create the account, optionally adding it to a preconfigured group.
    pub async fn create(
        manager: Arc<dyn UserManager>,
        id: &str,
        group: Option<&str>,
    ) -> Result<Self> {
        let credential = manager.create_user(id).await?;

        if let Some(group) = group {
            manager.add_to_group(id, group).await?;
        }

        info!("Created container user {}", id);
        Ok(Self {
            manager,
            username: id.to_string(),
            credential: Some(credential),
        })
    }

    /// Reattach to an existing account.
    ///
    /// The original password is not recoverable, so a restored user carries
    /// no credential and cannot back a host agent.
    pub fn restore(manager: Arc<dyn UserManager>, id: &str) -> Self {
        Self {
            manager,
            username: id.to_string(),
            credential: None,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn credential(&self) -> Option<&UserCredential> {
        self.credential.as_ref()
    }

    /// Security identifier of the account
    pub async fn sid(&self) -> Result<String> {
        self.manager.get_sid(&self.username).await
    }

    /// Delete the account
    pub async fn delete(&self) -> Result<()> {
        self.manager.delete_user(&self.username).await?;
        info!("Deleted container user {}", self.username);
        Ok(())
    }
}
