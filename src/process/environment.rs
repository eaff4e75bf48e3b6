//! Process environment construction
//!
//! An environment block is the flat string-to-string map handed to a
//! launched process, either inherited from the daemon or loaded from a
//! container user's profile.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::platform::users::{UserCredential, UserManager};

/// Flat process environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentBlock {
    vars: HashMap<String, String>,
}

impl EnvironmentBlock {
    /// Capture the daemon's own environment
    pub fn inherited() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Load the profile environment of a container user.
    ///
    /// Logs the user on and reads the environment through the primary token.
    pub async fn for_user(manager: &dyn UserManager, credential: &UserCredential) -> Result<Self> {
        let token = manager.logon_user(credential).await?;
        let vars = manager.load_user_environment(&token).await?;
        Ok(Self { vars })
    }

    /// Wrap an existing variable map
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// Parse `KEY=VALUE` entries.
    ///
    /// Each entry must contain at least one `=` and a non-empty key; the
    /// value keeps any further `=` characters.
    pub fn from_list<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut vars = HashMap::with_capacity(entries.len());

        for entry in entries {
            let entry = entry.as_ref();
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| Error::InvalidInput(format!("environment entry {:?} has no '='", entry)))?;

            if key.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "environment entry {:?} has an empty key",
                    entry
                )));
            }

            vars.insert(key.to_string(), value.to_string());
        }

        Ok(Self { vars })
    }

    /// Render as `KEY=VALUE` entries, sorted by key
    pub fn to_list(&self) -> Vec<String> {
        let mut entries: Vec<String> = self.vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        entries.sort();
        entries
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_list_basic() {
        let block = EnvironmentBlock::from_list(&["a=b", "test=1234", "my=varwith=init"]).unwrap();

        assert_eq!(block.get("a"), Some("b"));
        assert_eq!(block.get("test"), Some("1234"));
        // Value keeps its embedded '='
        assert_eq!(block.get("my"), Some("varwith=init"));
    }

    #[test]
    fn test_from_list_rejects_bad_entries() {
        assert!(matches!(
            EnvironmentBlock::from_list(&["novalue"]),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            EnvironmentBlock::from_list(&["=orphan"]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let entries = ["a=b", "my=varwith=init", "test=1234"];
        let block = EnvironmentBlock::from_list(&entries).unwrap();

        assert_eq!(block.to_list(), entries.to_vec());
    }

    #[test]
    fn test_empty_value_is_kept() {
        let block = EnvironmentBlock::from_list(&["empty="]).unwrap();
        assert_eq!(block.get("empty"), Some(""));
        assert_eq!(block.to_list(), vec!["empty=".to_string()]);
    }

    #[test]
    fn test_inherited_captures_process_environment() {
        std::env::set_var("PERMAFROST_ENV_PROBE", "probe-value");
        let block = EnvironmentBlock::inherited();
        assert_eq!(block.get("PERMAFROST_ENV_PROBE"), Some("probe-value"));
        std::env::remove_var("PERMAFROST_ENV_PROBE");
    }
}
