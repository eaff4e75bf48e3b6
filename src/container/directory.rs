//! On-disk layout and path confinement for one container
//!
//! Each container owns `{base}/{id}` with fixed subtrees: `bin/` (read-only
//! tooling), `user/` (the container's writable area), and `private/`
//! (service-only state). User-supplied paths are mapped into a subtree and
//! verified to stay inside it.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::platform::fs::{AccessRule, FileSystemManager, Principal};

const BIN_SUBDIR: &str = "bin";
const USER_SUBDIR: &str = "user";
const PRIVATE_SUBDIR: &str = "private";

/// A source tree copied into the container's user area
#[derive(Debug, Clone)]
pub struct BindMount {
    /// Path on the host to copy from
    pub source: PathBuf,

    /// Destination, relative to the container's user subtree
    pub destination: String,
}

/// The directory subtree owned by one container
#[derive(Clone)]
pub struct ContainerDirectory {
    fs: Arc<dyn FileSystemManager>,
    root: PathBuf,
}

impl ContainerDirectory {
    pub fn new(fs: Arc<dyn FileSystemManager>, root: PathBuf) -> Self {
        Self { fs, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_path(&self) -> PathBuf {
        self.root.join(BIN_SUBDIR)
    }

    pub fn user_path(&self) -> PathBuf {
        self.root.join(USER_SUBDIR)
    }

    pub fn private_path(&self) -> PathBuf {
        self.root.join(PRIVATE_SUBDIR)
    }

    /// Path root of the container directory, for quota scoping
    pub fn volume(&self) -> PathBuf {
        match self.root.components().next() {
            Some(Component::Prefix(prefix)) => PathBuf::from(prefix.as_os_str()),
            Some(Component::RootDir) => PathBuf::from(std::path::MAIN_SEPARATOR.to_string()),
            _ => self.root.clone(),
        }
    }

    /// Create the container layout with its access lists.
    ///
    /// `user_account` is the container user granted read access to `bin/`
    /// and read-write access to `user/`; `private/` stays service-only.
    pub async fn create_subdirectories(&self, user_account: &str) -> Result<()> {
        let user = || Principal::User(user_account.to_string());

        self.fs
            .create_directory(
                &self.root,
                &[
                    AccessRule::read_write(Principal::Administrators),
                    AccessRule::read_write(Principal::Service),
                    AccessRule::read(user()),
                ],
            )
            .await?;

        self.fs
            .create_directory(
                &self.private_path(),
                &[
                    AccessRule::read_write(Principal::Administrators),
                    AccessRule::read_write(Principal::Service),
                ],
            )
            .await?;

        self.fs
            .create_directory(
                &self.bin_path(),
                &[
                    AccessRule::read_write(Principal::Administrators),
                    AccessRule::read_write(Principal::Service),
                    AccessRule::read(user()),
                ],
            )
            .await?;

        self.fs
            .create_directory(
                &self.user_path(),
                &[
                    AccessRule::read_write(Principal::Administrators),
                    AccessRule::read_write(Principal::Service),
                    AccessRule::read_write(user()),
                ],
            )
            .await?;

        Ok(())
    }

    /// Map a path into the `bin/` subtree
    pub fn map_bin_path(&self, path: &str) -> Result<PathBuf> {
        self.map_into(self.bin_path(), path)
    }

    /// Map a path into the `user/` subtree
    pub fn map_user_path(&self, path: &str) -> Result<PathBuf> {
        self.map_into(self.user_path(), path)
    }

    /// Map a path into the `private/` subtree
    pub fn map_private_path(&self, path: &str) -> Result<PathBuf> {
        self.map_into(self.private_path(), path)
    }

    /// Copy each bind-mount source into the user subtree.
    ///
    /// Destinations are confined like any other user path and created
    /// writable for the container user.
    pub async fn create_bind_mounts(&self, mounts: &[BindMount], user_account: &str) -> Result<()> {
        for mount in mounts {
            let destination = self.map_user_path(&mount.destination)?;

            self.fs
                .create_directory(
                    &destination,
                    &[
                        AccessRule::read_write(Principal::Administrators),
                        AccessRule::read_write(Principal::Service),
                        AccessRule::read_write(Principal::User(user_account.to_string())),
                    ],
                )
                .await?;

            self.fs.copy_tree(&mount.source, &destination).await?;
        }

        Ok(())
    }

    /// Recursively delete the container directory.
    ///
    /// An already-absent directory is not an error.
    pub async fn destroy(&self) -> Result<()> {
        match self.fs.delete_directory(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_missing() => {
                debug!("Container directory {:?} already absent", self.root);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn map_into(&self, subtree: PathBuf, path: &str) -> Result<PathBuf> {
        // Drive-rooted paths are host-absolute and pass through verbatim
        if is_drive_rooted(path) {
            return Ok(PathBuf::from(path));
        }

        // Tolerate both separator styles in caller-supplied paths
        let unified = path.replace('\\', "/");
        let trimmed = unified.trim_start_matches('/');

        let mut joined = subtree.clone();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => joined.push(part),
                Component::ParentDir => joined.push(".."),
                Component::CurDir | Component::Prefix(_) | Component::RootDir => {}
            }
        }

        let resolved = normalize(&joined);
        if resolved.starts_with(&subtree) {
            Ok(resolved)
        } else {
            Err(Error::InvalidPath {
                path: path.to_string(),
                subtree,
            })
        }
    }
}

/// Whether a path names a drive-rooted location, e.g. `C:\tools`
fn is_drive_rooted(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolve `.` and `..` lexically, without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            _ => result.push(component),
        }
    }

    result
}
