//! Tenant identity: owners, installation keys, and namespace derivation.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kubernetes caps namespace names at 63 characters.
pub const MAX_NAMESPACE_LEN: usize = 63;

/// Helm caps release names at 53 characters.
pub const MAX_RELEASE_LEN: usize = 53;

const DNS_LABEL_PATTERN: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

/// `None` only if the pattern fails to compile, which rejects every label.
static DNS_LABEL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(DNS_LABEL_PATTERN).ok());

/// True if `s` is an RFC 1123 label (lowercase alphanumerics and `-`).
pub fn is_dns_label(s: &str) -> bool {
    s.len() <= MAX_NAMESPACE_LEN && DNS_LABEL.as_ref().is_some_and(|re| re.is_match(s))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("username `{0}` cannot form a tenant namespace")]
    InvalidUsername(String),
}

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub id: u64,
    pub username: String,
}

impl Owner {
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }

    /// Deterministic tenant namespace: `{prefix}-{username}`.
    pub fn namespace(&self, prefix: &str) -> Result<String, TenantError> {
        let namespace = format!("{prefix}-{}", self.username);
        if is_dns_label(&self.username) && is_dns_label(&namespace) {
            Ok(namespace)
        } else {
            Err(TenantError::InvalidUsername(self.username.clone()))
        }
    }
}

/// Identity of one installation: (owner, service key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstallationKey {
    pub owner_id: u64,
    pub service_key: String,
}

impl InstallationKey {
    pub fn new(owner_id: u64, service_key: impl Into<String>) -> Self {
        Self {
            owner_id,
            service_key: service_key.into(),
        }
    }

    /// Composite key `{owner_id}/{service_key}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.owner_id, self.service_key)
    }
}

impl fmt::Display for InstallationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.service_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_labels() {
        assert!(is_dns_label("alice"));
        assert!(is_dns_label("team-7"));
        assert!(!is_dns_label("Alice"));
        assert!(!is_dns_label("-alice"));
        assert!(!is_dns_label("alice-"));
        assert!(!is_dns_label("al_ice"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn dns_label_pattern_compiles() {
        assert!(DNS_LABEL.is_some());
    }

    #[test]
    fn namespace_is_prefixed_username() {
        let owner = Owner::new(1, "alice");
        assert_eq!(owner.namespace("seedling").unwrap(), "seedling-alice");
    }

    #[test]
    fn namespace_rejects_unsafe_usernames() {
        assert!(Owner::new(1, "Bob Smith").namespace("seedling").is_err());
        let long = Owner::new(1, "a".repeat(60));
        assert_eq!(
            long.namespace("seedling"),
            Err(TenantError::InvalidUsername("a".repeat(60)))
        );
    }

    #[test]
    fn installation_key_format() {
        let key = InstallationKey::new(42, "wordpress");
        assert_eq!(key.table_key(), "42/wordpress");
        assert_eq!(key.to_string(), "42/wordpress");
    }
}
