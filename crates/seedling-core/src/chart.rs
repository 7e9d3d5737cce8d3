//! Chart references resolved from a catalog template's remote block.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{OciConfig, RepoConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartRef {
    /// A chart addressed directly: oci://registry.example.com/charts/app or https://…/app.tgz
    Direct { url: String },
    /// A chart looked up by name in a classic Helm repository.
    Repository { repo_url: String, chart: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChartError {
    #[error("unsupported remote type: {0}")]
    UnsupportedRemoteType(String),
    #[error("remote type `{remote_type}` requires a non-empty `{block}` block")]
    MissingBlock {
        remote_type: String,
        block: &'static str,
    },
    #[error("invalid chart reference: {0}")]
    Invalid(String),
}

impl ChartRef {
    /// Build a chart reference from the catalog's `remote_type` and the
    /// matching `oci` / `repo` block.
    pub fn from_remote(
        remote_type: &str,
        oci: Option<&OciConfig>,
        repo: Option<&RepoConfig>,
    ) -> Result<Self, ChartError> {
        match remote_type {
            "oci" | "direct" | "chart" => {
                let url = oci
                    .map(|o| o.chart_url.trim())
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| ChartError::MissingBlock {
                        remote_type: remote_type.to_string(),
                        block: "oci",
                    })?;
                if !is_direct_url(url) {
                    return Err(ChartError::Invalid(url.to_string()));
                }
                Ok(ChartRef::Direct {
                    url: url.to_string(),
                })
            }
            "repo" | "repository" => {
                let repo = repo
                    .filter(|r| !r.repo_url.trim().is_empty() && !r.chart_name.trim().is_empty())
                    .ok_or_else(|| ChartError::MissingBlock {
                        remote_type: remote_type.to_string(),
                        block: "repo",
                    })?;
                let repo_url = repo.repo_url.trim();
                let chart = repo.chart_name.trim();
                if !(repo_url.starts_with("https://") || repo_url.starts_with("http://")) {
                    return Err(ChartError::Invalid(repo_url.to_string()));
                }
                if chart.contains(char::is_whitespace) {
                    return Err(ChartError::Invalid(chart.to_string()));
                }
                Ok(ChartRef::Repository {
                    repo_url: repo_url.to_string(),
                    chart: chart.to_string(),
                })
            }
            other => Err(ChartError::UnsupportedRemoteType(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChartRef::Direct { .. } => "direct",
            ChartRef::Repository { .. } => "repository",
        }
    }

    /// The positional chart argument handed to the installer.
    pub fn chart_arg(&self) -> &str {
        match self {
            ChartRef::Direct { url } => url,
            ChartRef::Repository { chart, .. } => chart,
        }
    }

    /// Repository URL for repository charts (`--repo`).
    pub fn repo_url(&self) -> Option<&str> {
        match self {
            ChartRef::Direct { .. } => None,
            ChartRef::Repository { repo_url, .. } => Some(repo_url),
        }
    }
}

impl fmt::Display for ChartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartRef::Direct { url } => f.write_str(url),
            ChartRef::Repository { repo_url, chart } => write!(f, "{chart} ({repo_url})"),
        }
    }
}

fn is_direct_url(url: &str) -> bool {
    let known_scheme = ["oci://", "https://", "http://", "file://"]
        .iter()
        .any(|scheme| url.starts_with(scheme));
    (known_scheme || url.starts_with("./") || url.starts_with('/'))
        && !url.contains(char::is_whitespace)
}
