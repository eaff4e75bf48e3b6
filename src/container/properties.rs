//! Per-container property persistence
//!
//! Properties are a string-to-string map stored as one JSON file under the
//! container's `private/` subtree. Writes are atomic, and read-modify-write
//! cycles take a per-container exclusive lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::platform::fs::FileSystemManager;
use crate::system::Locker;

use super::directory::ContainerDirectory;

/// Persists the property map of every container
pub struct PropertyService {
    fs: Arc<dyn FileSystemManager>,
    locks: DashMap<String, Arc<Locker>>,
    file_name: String,
}

impl PropertyService {
    pub fn new(fs: Arc<dyn FileSystemManager>, file_name: impl Into<String>) -> Self {
        Self {
            fs,
            locks: DashMap::new(),
            file_name: file_name.into(),
        }
    }

    fn locker(&self, id: &str) -> Arc<Locker> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Locker::new()))
            .clone()
    }

    fn file_path(&self, directory: &ContainerDirectory) -> PathBuf {
        directory.private_path().join(&self.file_name)
    }

    async fn load(&self, directory: &ContainerDirectory) -> Result<HashMap<String, String>> {
        match self.fs.read_file(&self.file_path(directory)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(HashMap::new()),
        }
    }

    async fn store(
        &self,
        directory: &ContainerDirectory,
        properties: &HashMap<String, String>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(properties)?;
        self.fs
            .write_file_atomic(&self.file_path(directory), &bytes)
            .await
    }

    /// Replace the whole property map
    pub async fn set_properties(
        &self,
        directory: &ContainerDirectory,
        id: &str,
        properties: &HashMap<String, String>,
    ) -> Result<()> {
        let locker = self.locker(id);
        let _guard = locker.acquire().await.map_err(lock_error)?;

        self.store(directory, properties).await
    }

    /// Read the whole property map; a missing file reads as empty
    pub async fn get_all(
        &self,
        directory: &ContainerDirectory,
        id: &str,
    ) -> Result<HashMap<String, String>> {
        let locker = self.locker(id);
        let _guard = locker.acquire().await.map_err(lock_error)?;

        self.load(directory).await
    }

    /// Read one property
    pub async fn get_property(
        &self,
        directory: &ContainerDirectory,
        id: &str,
        key: &str,
    ) -> Result<Option<String>> {
        Ok(self.get_all(directory, id).await?.remove(key))
    }

    /// Insert or replace one property
    pub async fn set_property(
        &self,
        directory: &ContainerDirectory,
        id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let locker = self.locker(id);
        let _guard = locker.acquire().await.map_err(lock_error)?;

        let mut properties = self.load(directory).await?;
        properties.insert(key.to_string(), value.to_string());
        self.store(directory, &properties).await
    }

    /// Remove one property, returning its previous value
    pub async fn remove_property(
        &self,
        directory: &ContainerDirectory,
        id: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let locker = self.locker(id);
        let _guard = locker.acquire().await.map_err(lock_error)?;

        let mut properties = self.load(directory).await?;
        let previous = properties.remove(key);
        if previous.is_some() {
            self.store(directory, &properties).await?;
        }

        Ok(previous)
    }

    /// Drop the lock entry of a destroyed container
    pub fn forget(&self, id: &str) {
        self.locks.remove(id);
    }
}

fn lock_error(e: crate::system::LockerError) -> crate::error::Error {
    crate::error::Error::InvalidInput(format!("property lock unavailable: {}", e))
}
