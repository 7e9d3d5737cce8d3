//! Service catalog: the immutable table of installable services.
//!
//! The catalog file is JSON (or TOML, chosen by extension) and is validated
//! in full before the daemon starts. A definition that passes validation can
//! always be resolved once its managers supply values, so configuration bugs
//! surface at startup instead of on the first install.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::chart::{ChartError, ChartRef};
use crate::release::{ReleaseNameError, ReleaseNameFormat};
use crate::tenant::is_dns_label;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog: {0}")]
    Parse(String),

    #[error("duplicate service key: {0}")]
    DuplicateKey(String),

    #[error("service key `{0}` is not a DNS label")]
    InvalidKey(String),

    #[error("service `{service}` value `{value}`: sub-key `{sub_key}` has no path")]
    SubKeyWithoutPath {
        service: String,
        value: String,
        sub_key: String,
    },

    #[error("service `{service}` value `{value}`: empty target path")]
    EmptyPath { service: String, value: String },

    #[error("service `{service}` value `{value}`: unknown manager `{manager}`")]
    UnknownManager {
        service: String,
        value: String,
        manager: String,
    },

    #[error("service `{service}` uses manager `{manager}` but managers.{manager} is not configured")]
    UnconfiguredManager {
        service: String,
        manager: &'static str,
    },

    #[error("service `{service}` value `{value}`: default must be a string, number, or boolean")]
    InvalidDefault { service: String, value: String },

    #[error("invalid port range {start}..={end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("service `{service}`: {source}")]
    Chart {
        service: String,
        #[source]
        source: ChartError,
    },

    #[error("service `{service}`: invalid chart version requirement `{version}`")]
    ChartVersion { service: String, version: String },

    #[error("service `{service}`: {source}")]
    ReleaseName {
        service: String,
        #[source]
        source: ReleaseNameError,
    },

    #[error("unknown service: {0}")]
    UnknownService(String),
}

// ── File format ────────────────────────────────────────────────────

/// Top-level catalog document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub managers: ManagersConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagersConfig {
    #[serde(default)]
    pub port_allocator: Option<PortRange>,
}

/// Inclusive port range handed to the port allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start_port: u16,
    pub end_port: u16,
}

impl PortRange {
    pub fn new(start_port: u16, end_port: u16) -> Self {
        Self {
            start_port,
            end_port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start_port..=self.end_port).contains(&port)
    }

    /// Number of ports in the range (0 if inverted).
    pub fn len(&self) -> usize {
        if self.start_port > self.end_port {
            0
        } else {
            usize::from(self.end_port - self.start_port) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_url: String,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub helm: HelmConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmConfig {
    pub remote_type: String,
    #[serde(default)]
    pub release_name_format: String,
    #[serde(default)]
    pub oci: Option<OciConfig>,
    #[serde(default)]
    pub repo: Option<RepoConfig>,
    /// Chart version requirement (`--version`).
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub values: Vec<ValueConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciConfig {
    pub chart_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo_url: String,
    pub chart_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueConfig {
    pub name: String,
    #[serde(rename = "path", default)]
    pub paths: Vec<ValuePathConfig>,
    #[serde(default)]
    pub default: serde_json::Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub manager: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuePathConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub key: String,
}

// ── Validated definitions ─────────────────────────────────────────

/// A computed-value source referenced by a value mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Manager {
    PortAllocator,
}

impl Manager {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "port_allocator" => Some(Manager::PortAllocator),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Manager::PortAllocator => "port_allocator",
        }
    }
}

/// One target parameter path, optionally wrapped as `{sub_key: value}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueTarget {
    pub path: String,
    pub sub_key: Option<String>,
}

/// A rule producing one value for one or more parameter paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueMapping {
    pub name: String,
    pub targets: Vec<ValueTarget>,
    pub default: String,
    pub description: String,
    pub manager: Option<Manager>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTemplate {
    pub chart: ChartRef,
    pub chart_version: Option<String>,
    pub release_name: ReleaseNameFormat,
    pub values: Vec<ValueMapping>,
}

/// A validated, installable service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub key: String,
    pub name: String,
    pub description: String,
    pub project_url: String,
    pub links: Vec<Link>,
    pub icon: String,
    pub tags: Vec<String>,
    pub template: DeploymentTemplate,
}

impl ServiceDefinition {
    /// True if any value mapping draws from `manager`.
    pub fn requires(&self, manager: Manager) -> bool {
        self.template
            .values
            .iter()
            .any(|v| v.manager == Some(manager))
    }
}

/// The loaded catalog. Services keep their declaration order.
#[derive(Debug, Clone)]
pub struct Catalog {
    services: Vec<ServiceDefinition>,
    index: HashMap<String, usize>,
    port_range: Option<PortRange>,
}

impl Catalog {
    /// Load a catalog file. `.toml` files are parsed as TOML, anything else as JSON.
    pub fn from_file(path: &Path) -> CatalogResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CatalogFile = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content).map_err(|e| CatalogError::Parse(e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| CatalogError::Parse(e.to_string()))?
        };
        let catalog = Self::from_config(file)?;
        debug!(?path, services = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> CatalogResult<Self> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))?;
        Self::from_config(file)
    }

    /// Validate a parsed catalog document.
    pub fn from_config(file: CatalogFile) -> CatalogResult<Self> {
        let port_range = file.managers.port_allocator;
        if let Some(range) = port_range {
            if range.is_empty() {
                return Err(CatalogError::InvalidPortRange {
                    start: range.start_port,
                    end: range.end_port,
                });
            }
        }

        let mut services = Vec::with_capacity(file.services.len());
        let mut index = HashMap::new();
        for config in file.services {
            let definition = validate_service(config, port_range)?;
            if index.contains_key(&definition.key) {
                return Err(CatalogError::DuplicateKey(definition.key));
            }
            index.insert(definition.key.clone(), services.len());
            services.push(definition);
        }

        Ok(Self {
            services,
            index,
            port_range,
        })
    }

    pub fn lookup(&self, key: &str) -> CatalogResult<&ServiceDefinition> {
        self.index
            .get(key)
            .map(|&i| &self.services[i])
            .ok_or_else(|| CatalogError::UnknownService(key.to_string()))
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.iter()
    }

    pub fn port_range(&self) -> Option<PortRange> {
        self.port_range
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn validate_service(
    config: ServiceConfig,
    port_range: Option<PortRange>,
) -> CatalogResult<ServiceDefinition> {
    let key = config.key;
    if !is_dns_label(&key) {
        return Err(CatalogError::InvalidKey(key));
    }

    let helm = config.helm;
    let chart = ChartRef::from_remote(&helm.remote_type, helm.oci.as_ref(), helm.repo.as_ref())
        .map_err(|source| CatalogError::Chart {
            service: key.clone(),
            source,
        })?;

    let chart_version = match helm.version.map(|v| v.trim().to_string()) {
        Some(v) if v.is_empty() => None,
        Some(v) => {
            if semver::VersionReq::parse(&v).is_err() {
                return Err(CatalogError::ChartVersion {
                    service: key,
                    version: v,
                });
            }
            Some(v)
        }
        None => None,
    };

    let release_name = if helm.release_name_format.trim().is_empty() {
        ReleaseNameFormat::default()
    } else {
        ReleaseNameFormat::parse(helm.release_name_format.trim()).map_err(|source| {
            CatalogError::ReleaseName {
                service: key.clone(),
                source,
            }
        })?
    };

    let mut values = Vec::with_capacity(helm.values.len());
    for value in helm.values {
        values.push(validate_value(&key, value, port_range)?);
    }

    Ok(ServiceDefinition {
        key,
        name: config.name,
        description: config.description,
        project_url: config.project_url,
        links: config.links,
        icon: config.icon,
        tags: config.tags,
        template: DeploymentTemplate {
            chart,
            chart_version,
            release_name,
            values,
        },
    })
}

fn validate_value(
    service: &str,
    value: ValueConfig,
    port_range: Option<PortRange>,
) -> CatalogResult<ValueMapping> {
    let mut targets = Vec::with_capacity(value.paths.len());
    for target in value.paths {
        let path = target.path.trim();
        let sub_key = target.key.trim();
        if path.is_empty() {
            if sub_key.is_empty() {
                return Err(CatalogError::EmptyPath {
                    service: service.to_string(),
                    value: value.name,
                });
            }
            return Err(CatalogError::SubKeyWithoutPath {
                service: service.to_string(),
                value: value.name,
                sub_key: sub_key.to_string(),
            });
        }
        targets.push(ValueTarget {
            path: path.to_string(),
            sub_key: (!sub_key.is_empty()).then(|| sub_key.to_string()),
        });
    }
    if targets.is_empty() {
        warn!(%service, value = %value.name, "value mapping declares no target paths");
    }

    let manager = match value.manager.trim() {
        "" => None,
        tag => Some(Manager::parse(tag).ok_or_else(|| CatalogError::UnknownManager {
            service: service.to_string(),
            value: value.name.clone(),
            manager: tag.to_string(),
        })?),
    };
    if manager == Some(Manager::PortAllocator) && port_range.is_none() {
        return Err(CatalogError::UnconfiguredManager {
            service: service.to_string(),
            manager: Manager::PortAllocator.as_str(),
        });
    }

    let default = match value.default {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            return Err(CatalogError::InvalidDefault {
                service: service.to_string(),
                value: value.name,
            });
        }
    };

    Ok(ValueMapping {
        name: value.name,
        targets,
        default,
        description: value.description,
        manager,
    })
}
