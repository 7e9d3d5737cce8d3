use std::time::Duration;

use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("release {release} not found in namespace {namespace}")]
    ReleaseNotFound { namespace: String, release: String },

    #[error("{operation} failed ({status}): {stderr}")]
    Command {
        operation: &'static str,
        status: String,
        stderr: String,
    },

    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected backend output: {0}")]
    Output(String),
}
