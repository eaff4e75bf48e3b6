//! Local user principal capability

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Credential material for a container user.
///
/// The password never appears in debug output or logs.
#[derive(Clone)]
pub struct UserCredential {
    pub username: String,
    pub password: String,
}

impl UserCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque primary logon token for a user session
#[derive(Debug, Clone)]
pub struct LogonToken {
    raw: u64,
}

impl LogonToken {
    pub fn new(raw: u64) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }
}

/// Operations against the host user database
#[async_trait]
pub trait UserManager: Send + Sync {
    /// Create a local user account and return its credential.
    ///
    /// Fails with a resource-exists error if the account is already present.
    async fn create_user(&self, name: &str) -> Result<UserCredential>;

    /// Delete a local user account
    async fn delete_user(&self, name: &str) -> Result<()>;

    /// Resolve the security identifier of an account
    async fn get_sid(&self, name: &str) -> Result<String>;

    /// Add an account to a local group
    async fn add_to_group(&self, name: &str, group: &str) -> Result<()>;

    /// Log the user on and return a primary token
    async fn logon_user(&self, credential: &UserCredential) -> Result<LogonToken>;

    /// Load the profile environment for a logged-on user
    async fn load_user_environment(&self, token: &LogonToken) -> Result<HashMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = UserCredential::new("c_AB12", "hunter2");
        let debug = format!("{:?}", cred);
        assert!(debug.contains("c_AB12"));
        assert!(!debug.contains("hunter2"));
    }
}
