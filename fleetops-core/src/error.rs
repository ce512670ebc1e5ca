//! Error taxonomy shared by every fleetops operation.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    // configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid inventory YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("host key not defined in inventory file")]
    MissingHosts,
    #[error("host list empty")]
    EmptyHosts,
    #[error("invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("no SSH user configured for host '{0}'")]
    MissingUser(String),

    // addressing
    #[error("unknown host: {0}")]
    UnknownHost(String),

    // remote execution
    #[error("command `{command}` on '{host}' exited with status {exit_status:?}: {output}")]
    CommandFailed {
        host: String,
        command: String,
        exit_status: Option<u32>,
        output: String,
    },
    #[error("SSH authentication failed for user '{user}' on '{host}'")]
    AuthFailed { host: String, user: String },
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    // broker
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("management API returned {status}: {body}")]
    Management { status: u16, body: String },
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("message #{index} is not valid JSON: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("listener task failed: {0}")]
    ListenerTask(String),

    // timeout
    #[error("queue '{queue}' still holds {last_depth} messages after {waited:?}")]
    Timeout {
        queue: String,
        waited: Duration,
        last_depth: u64,
    },
}

impl FleetError {
    pub(crate) fn invalid_host(host: &str, reason: impl Into<String>) -> Self {
        FleetError::InvalidHost {
            host: host.to_string(),
            reason: reason.into(),
        }
    }

    /// True for configuration-class failures (bad or missing inventory).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            FleetError::Io(_)
                | FleetError::Yaml(_)
                | FleetError::MissingHosts
                | FleetError::EmptyHosts
                | FleetError::InvalidHost { .. }
                | FleetError::MissingUser(_)
        )
    }
}
