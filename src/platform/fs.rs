//! Filesystem capability with ACL-aware directory creation

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};

/// Principal an access rule applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The built-in administrators group
    Administrators,

    /// The account the daemon itself runs under
    Service,

    /// A container user, by account name
    User(String),
}

/// Rights granted by an access rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRights {
    Read,
    ReadWrite,
}

/// One entry of a directory access list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub principal: Principal,
    pub rights: AccessRights,
}

impl AccessRule {
    pub fn read(principal: Principal) -> Self {
        Self {
            principal,
            rights: AccessRights::Read,
        }
    }

    pub fn read_write(principal: Principal) -> Self {
        Self {
            principal,
            rights: AccessRights::ReadWrite,
        }
    }
}

/// Operations against the host filesystem
#[async_trait]
pub trait FileSystemManager: Send + Sync {
    /// Create a directory (and any missing parents) with the given access list
    async fn create_directory(&self, path: &Path, rules: &[AccessRule]) -> Result<()>;

    /// Recursively delete a directory.
    ///
    /// Fails with a missing-resource error if the directory does not exist.
    async fn delete_directory(&self, path: &Path) -> Result<()>;

    /// Copy a directory tree, or a single file, into `destination`
    async fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()>;

    /// Names of the immediate subdirectories of `path`
    async fn enumerate_directories(&self, path: &Path) -> Result<Vec<String>>;

    /// Write a file atomically (write-temp-then-rename)
    async fn write_file_atomic(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Read a file; `None` when it does not exist
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>>;
}

/// Portable filesystem backend.
///
/// Creates plain directories; applying the access list to native ACLs is the
/// platform binding's concern.
pub struct LocalFileSystem;

#[async_trait]
impl FileSystemManager for LocalFileSystem {
    async fn create_directory(&self, path: &Path, rules: &[AccessRule]) -> Result<()> {
        fs::create_dir_all(path).await?;
        debug!("Created directory {:?} with {} access rule(s)", path, rules.len());
        Ok(())
    }

    async fn delete_directory(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::ResourceMissing(format!("directory {:?}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()> {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || copy_tree_blocking(&source, &destination))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    async fn enumerate_directories(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();

        let mut entries = match fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ResourceMissing(format!("directory {:?}", path)));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    async fn write_file_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = temp_sibling(path);

        fs::write(&tmp, contents).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

fn copy_tree_blocking(source: &Path, destination: &Path) -> Result<()> {
    let meta = std::fs::metadata(source).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ResourceMissing(format!("copy source {:?}", source))
        } else {
            Error::Io(e)
        }
    })?;

    if meta.is_file() {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, destination)?;
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}
