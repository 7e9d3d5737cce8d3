//! seedling.toml configuration parser.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable that overrides `auth.token_secret`.
pub const TOKEN_SECRET_ENV: &str = "SEEDLING_TOKEN_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedlingConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Await driver completion inside the request instead of returning 202.
    #[serde(default)]
    pub blocking_operations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: u64,
    #[serde(default = "default_password_iterations")]
    pub password_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
    #[serde(default = "default_helm_binary")]
    pub helm_binary: PathBuf,
    pub kube_context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    #[serde(default = "default_operation_timeout")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_operation_timeout")]
    pub uninstall_timeout_secs: u64,
    /// Host prefix for generated access points (`{access_host}:{port}`).
    #[serde(default)]
    pub access_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

fn default_token_ttl_days() -> u64 {
    30
}

fn default_password_iterations() -> u32 {
    100_000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/seedling")
}

fn default_namespace_prefix() -> String {
    "seedling".to_string()
}

fn default_helm_binary() -> PathBuf {
    PathBuf::from("helm")
}

fn default_operation_timeout() -> u64 {
    300
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            blocking_operations: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: default_namespace_prefix(),
            helm_binary: default_helm_binary(),
            kube_context: None,
            kubeconfig: None,
            install_timeout_secs: default_operation_timeout(),
            uninstall_timeout_secs: default_operation_timeout(),
            access_host: String::new(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval(),
        }
    }
}

impl ClusterConfig {
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn uninstall_timeout(&self) -> Duration {
        Duration::from_secs(self.uninstall_timeout_secs)
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_days * 24 * 60 * 60)
    }
}

impl SeedlingConfig {
    /// Read and validate a config file. `SEEDLING_TOKEN_SECRET` overrides
    /// the configured signing secret.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        if let Ok(secret) = std::env::var(TOKEN_SECRET_ENV) {
            config.auth.token_secret = secret;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse without environment overrides or validation.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.token_secret.trim().is_empty() {
            anyhow::bail!("auth.token_secret is empty (set it or {TOKEN_SECRET_ENV})");
        }
        if self.auth.password_iterations == 0 {
            anyhow::bail!("auth.password_iterations must be positive");
        }
        if !crate::tenant::is_dns_label(&self.cluster.namespace_prefix) {
            anyhow::bail!(
                "cluster.namespace_prefix `{}` is not a DNS label",
                self.cluster.namespace_prefix
            );
        }
        if self.cluster.install_timeout_secs == 0 || self.cluster.uninstall_timeout_secs == 0 {
            anyhow::bail!("cluster operation timeouts must be positive");
        }
        if self.reconcile.enabled && self.reconcile.interval_secs == 0 {
            anyhow::bail!("reconcile.interval_secs must be positive");
        }
        Ok(())
    }

    /// Path of the redb database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join("seedling.redb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[auth]
token_secret = "s3cret"

[catalog]
path = "catalog.json"
"#;

    #[test]
    fn parse_minimal_with_defaults() {
        let config = SeedlingConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 8081);
        assert!(!config.server.blocking_operations);
        assert_eq!(config.auth.token_ttl(), Duration::from_secs(30 * 86_400));
        assert_eq!(config.cluster.namespace_prefix, "seedling");
        assert_eq!(config.cluster.install_timeout(), Duration::from_secs(300));
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/seedling/seedling.redb"));
        assert!(config.reconcile.enabled);
    }

    #[test]
    fn parse_full() {
        let config = SeedlingConfig::from_toml_str(
            r#"
[server]
listen = "127.0.0.1:9000"
blocking_operations = true

[auth]
token_secret = "s3cret"
token_ttl_days = 1
password_iterations = 10

[storage]
data_dir = "/tmp/seedling"

[catalog]
path = "/etc/seedling/catalog.json"

[cluster]
namespace_prefix = "tenant"
kube_context = "kind-dev"
install_timeout_secs = 60
access_host = "apps.example.com"

[reconcile]
enabled = false
interval_secs = 0
"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.cluster.kube_context.as_deref(), Some("kind-dev"));
        assert_eq!(config.cluster.uninstall_timeout(), Duration::from_secs(300));
        assert_eq!(config.cluster.access_host, "apps.example.com");
    }

    #[test]
    fn validate_rejects_empty_secret_and_bad_prefix() {
        let mut config = SeedlingConfig::from_toml_str(MINIMAL).unwrap();
        config.auth.token_secret = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = SeedlingConfig::from_toml_str(MINIMAL).unwrap();
        config.cluster.namespace_prefix = "Seed_ling".to_string();
        assert!(config.validate().is_err());
    }
}
