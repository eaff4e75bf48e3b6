//! Configuration structures and loading

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Main daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// System paths and settings
    #[serde(default)]
    pub system: SystemConfiguration,

    /// Container provisioning settings
    #[serde(default)]
    pub containers: ContainerConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Configuration = toml::from_str(&content)
            .with_context(|| "Failed to parse configuration")?;

        // Resolve relative paths against the config file's parent directory
        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        if config.system.base_directory.is_relative() {
            config.system.base_directory = base_dir.join(&config.system.base_directory);
        }

        std::fs::create_dir_all(&config.system.base_directory)?;

        Ok(config)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            debug: false,
            system: SystemConfiguration::default(),
            containers: ContainerConfiguration::default(),
        }
    }
}

/// System paths and settings
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfiguration {
    /// Directory under which every container root is created
    #[serde(default = "default_base_directory")]
    pub base_directory: PathBuf,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
        }
    }
}

fn default_base_directory() -> PathBuf {
    PathBuf::from("containers")
}

/// Container provisioning settings
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfiguration {
    /// Local group every container user is added to, if set
    #[serde(default)]
    pub users_group: Option<String>,

    /// Disk quota applied to each container root, in bytes (0 for unlimited)
    #[serde(default = "default_disk_quota_bytes")]
    pub disk_quota_bytes: u64,

    /// File name of the per-container property store
    #[serde(default = "default_properties_file")]
    pub properties_file: String,
}

impl Default for ContainerConfiguration {
    fn default() -> Self {
        Self {
            users_group: None,
            disk_quota_bytes: default_disk_quota_bytes(),
            properties_file: default_properties_file(),
        }
    }
}

fn default_disk_quota_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_properties_file() -> String {
    "properties.json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert!(!config.debug);
        assert_eq!(config.system.base_directory, PathBuf::from("containers"));
        assert_eq!(config.containers.properties_file, "properties.json");
        assert!(config.containers.users_group.is_none());
    }

    #[test]
    fn test_load_resolves_relative_base() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");

        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(f, "debug = true").unwrap();
        writeln!(f, "[system]").unwrap();
        writeln!(f, "base_directory = \"vessels\"").unwrap();
        writeln!(f, "[containers]").unwrap();
        writeln!(f, "users_group = \"ContainerUsers\"").unwrap();
        drop(f);

        let config = Configuration::load(config_path.to_str().unwrap()).unwrap();
        assert!(config.debug);
        assert_eq!(config.system.base_directory, temp.path().join("vessels"));
        assert!(config.system.base_directory.is_dir());
        assert_eq!(config.containers.users_group.as_deref(), Some("ContainerUsers"));
    }
}
