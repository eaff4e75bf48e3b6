//! TCP port reservation capability

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};

/// Port reservations scoped by container
#[async_trait]
pub trait TcpPortManager: Send + Sync {
    /// Reserve a port for a container.
    ///
    /// Port 0 requests an ephemeral port chosen by the host. Returns the
    /// port actually reserved.
    async fn reserve(&self, container_id: &str, port: u16) -> Result<u16>;

    /// Release one reservation
    async fn release(&self, container_id: &str, port: u16) -> Result<()>;

    /// Release every reservation held by a container
    async fn release_all(&self, container_id: &str) -> Result<()>;
}

/// In-memory reservation table
pub struct LocalTcpPortManager {
    reservations: DashMap<u16, String>,
}

impl LocalTcpPortManager {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
        }
    }

    fn pick_ephemeral(&self) -> Result<u16> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .map_err(|e| Error::PortAllocation(format!("no ephemeral port available: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::PortAllocation(e.to_string()))?
            .port();
        Ok(port)
    }
}

impl Default for LocalTcpPortManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TcpPortManager for LocalTcpPortManager {
    async fn reserve(&self, container_id: &str, port: u16) -> Result<u16> {
        let port = if port == 0 { self.pick_ephemeral()? } else { port };

        match self.reservations.entry(port) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                if entry.get() == container_id {
                    Ok(port)
                } else {
                    Err(Error::PortAllocation(format!(
                        "port {} already reserved by {}",
                        port,
                        entry.get()
                    )))
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(container_id.to_string());
                debug!("Reserved port {} for container {}", port, container_id);
                Ok(port)
            }
        }
    }

    async fn release(&self, container_id: &str, port: u16) -> Result<()> {
        self.reservations
            .remove_if(&port, |_, owner| owner.as_str() == container_id);
        Ok(())
    }

    async fn release_all(&self, container_id: &str) -> Result<()> {
        self.reservations
            .retain(|_, owner| owner.as_str() != container_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reserve_and_conflict() {
        let manager = LocalTcpPortManager::new();

        assert_eq!(manager.reserve("c_ONE", 40100).await.unwrap(), 40100);

        // Same owner may re-reserve, another may not
        assert_eq!(manager.reserve("c_ONE", 40100).await.unwrap(), 40100);
        let err = manager.reserve("c_TWO", 40100).await.unwrap_err();
        assert!(matches!(err, Error::PortAllocation(_)));
    }

    #[tokio::test]
    async fn test_ephemeral_reservation() {
        let manager = LocalTcpPortManager::new();

        let port = manager.reserve("c_ONE", 0).await.unwrap();
        assert!(port > 0);
    }

    #[tokio::test]
    async fn test_release_all() {
        let manager = LocalTcpPortManager::new();

        manager.reserve("c_ONE", 40200).await.unwrap();
        manager.reserve("c_ONE", 40201).await.unwrap();
        manager.reserve("c_TWO", 40202).await.unwrap();

        manager.release_all("c_ONE").await.unwrap();

        // Freed ports are reusable; the other owner's reservation survives
        assert_eq!(manager.reserve("c_TWO", 40200).await.unwrap(), 40200);
        let err = manager.reserve("c_ONE", 40202).await.unwrap_err();
        assert!(matches!(err, Error::PortAllocation(_)));
    }
}
