//! Remote command execution over SSH
//!
//! Handles:
//! - Session setup (password, SSH agent, default key files)
//! - Optional agent forwarding
//! - Combined stdout/stderr capture and exit status
//! - Exit status policy (`allow_failure`)

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};
use crate::models::SshTarget;

/// Command run when the caller does not give one.
pub const DEFAULT_COMMAND: &str = "true";

/// Keepalive period once the session is up; three unanswered keepalives
/// close it. Silence from the remote command alone never does.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Request SSH agent forwarding on the session channel.
    pub forward_agent: bool,
    /// Return the output even when the exit status is non-zero.
    pub allow_failure: bool,
    /// Bounds TCP connect and key exchange only, not the command itself.
    pub connect_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            forward_agent: true,
            allow_failure: false,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a remote command
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout and stderr interleaved in arrival order
    pub output: String,
    pub exit_status: Option<u32>,
    pub execution_time_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Executes one command on a resolved target.
///
/// Implementations report the exit status as-is; [`check_exit`] applies the
/// failure policy.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, target: &SshTarget, command: &str, opts: &RunOptions) -> Result<CommandOutput>;
}

/// Turns a non-zero exit into `FleetError::CommandFailed` unless failures are
/// tolerated.
pub fn check_exit(host: &str, command: &str, output: CommandOutput, allow_failure: bool) -> Result<CommandOutput> {
    if output.success() || allow_failure {
        return Ok(output);
    }
    Err(FleetError::CommandFailed {
        host: host.to_string(),
        command: command.to_string(),
        exit_status: output.exit_status,
        output: output.output,
    })
}

struct SshHandler {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
    strict: bool,
}

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    // Un hôte connu doit présenter la même clé; un hôte inconnu passe
    // seulement hors mode strict, avec son empreinte dans les logs.
    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        let checked = match &self.known_hosts {
            Some(path) => russh_keys::check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => russh_keys::check_known_hosts(&self.host, self.port, server_public_key),
        };
        let fingerprint = server_public_key.fingerprint();
        match checked {
            Ok(true) => {
                debug!("host key for {}:{} found in known_hosts", self.host, self.port);
                Ok(true)
            }
            Err(russh_keys::Error::KeyChanged { line }) => {
                warn!(
                    "host key for {}:{} ({}) differs from known_hosts line {}, refusing",
                    self.host, self.port, fingerprint, line
                );
                Ok(false)
            }
            other => {
                if let Err(e) = other {
                    debug!("known_hosts not usable: {}", e);
                }
                if self.strict {
                    warn!("unknown host key for {}:{} ({}), refusing", self.host, self.port, fingerprint);
                    Ok(false)
                } else {
                    warn!("accepting unverified host key for {}:{} ({})", self.host, self.port, fingerprint);
                    Ok(true)
                }
            }
        }
    }
}

/// Production [`CommandRunner`] backed by `russh`.
#[derive(Debug, Clone, Default)]
pub struct SshRunner {
    /// Key files tried when neither a password nor an agent identity works.
    /// Empty means `~/.ssh/id_ed25519`, `~/.ssh/id_rsa`, `~/.ssh/id_ecdsa`.
    pub key_files: Vec<PathBuf>,
    /// known_hosts file to check server keys against; `None` is `~/.ssh/known_hosts`.
    pub known_hosts: Option<PathBuf>,
    /// Refuse hosts missing from known_hosts instead of logging and accepting them.
    pub strict_host_keys: bool,
}

impl SshRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_files(mut self, key_files: Vec<PathBuf>) -> Self {
        self.key_files = key_files;
        self
    }

    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    pub fn strict_host_keys(mut self, strict: bool) -> Self {
        self.strict_host_keys = strict;
        self
    }

    fn handler(&self, target: &SshTarget) -> SshHandler {
        SshHandler {
            host: target.address.clone(),
            port: target.port,
            known_hosts: self.known_hosts.clone(),
            strict: self.strict_host_keys,
        }
    }

    fn candidate_keys(&self) -> Vec<PathBuf> {
        if !self.key_files.is_empty() {
            return self.key_files.clone();
        }
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        ["id_ed25519", "id_rsa", "id_ecdsa"]
            .iter()
            .map(|name| home.join(".ssh").join(name))
            .collect()
    }

    async fn connect(&self, target: &SshTarget, opts: &RunOptions) -> Result<client::Handle<SshHandler>> {
        let config = Arc::new(session_config());

        let addr = format!("{}:{}", target.address, target.port);
        let mut session = tokio::time::timeout(
            opts.connect_timeout,
            client::connect(config, (target.address.as_str(), target.port), self.handler(target)),
        )
        .await
        .map_err(|_| FleetError::ConnectTimeout(addr.clone()))??;

        if !self.authenticate(&mut session, target).await? {
            return Err(FleetError::AuthFailed {
                host: target.host_id.clone(),
                user: target.user.clone(),
            });
        }
        info!("SSH session open to {} as {}", addr, target.user);
        Ok(session)
    }

    async fn authenticate(&self, session: &mut client::Handle<SshHandler>, target: &SshTarget) -> Result<bool> {
        if let Some(password) = &target.password {
            return Ok(session.authenticate_password(&target.user, password).await?);
        }

        #[cfg(unix)]
        {
            if authenticate_with_agent(session, &target.user).await {
                return Ok(true);
            }
        }

        for key_path in self.candidate_keys() {
            if !key_path.exists() {
                continue;
            }
            let key = match russh_keys::load_secret_key(&key_path, None) {
                Ok(key) => key,
                Err(e) => {
                    debug!("skipping key {}: {}", key_path.display(), e);
                    continue;
                }
            };
            if session.authenticate_publickey(&target.user, Arc::new(key)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn session_config() -> client::Config {
    client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        ..Default::default()
    }
}

// Tries every identity of the running ssh-agent; any agent failure just means
// "not authenticated".
#[cfg(unix)]
async fn authenticate_with_agent(session: &mut client::Handle<SshHandler>, user: &str) -> bool {
    let mut agent = match russh_keys::agent::client::AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(e) => {
            debug!("no SSH agent available: {}", e);
            return false;
        }
    };
    let identities = match agent.request_identities().await {
        Ok(ids) => ids,
        Err(e) => {
            debug!("SSH agent refused to list identities: {}", e);
            return false;
        }
    };
    for key in identities {
        let (returned, result) = session.authenticate_future(user, key, agent).await;
        agent = returned;
        match result {
            Ok(true) => return true,
            Ok(false) => continue,
            Err(e) => debug!("agent authentication attempt failed: {:?}", e),
        }
    }
    false
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn execute(&self, target: &SshTarget, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        let start_time = Instant::now();
        debug!("Executing on {}: {} (forward_agent: {})", target.host_id, command, opts.forward_agent);

        let session = self.connect(target, opts).await?;
        let mut channel = session.channel_open_session().await?;
        if opts.forward_agent {
            channel.agent_forward(true).await?;
        }
        channel.exec(true, command).await?;

        let mut output = Vec::new();
        let mut exit_status = None;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, .. }) => output.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        session.disconnect(Disconnect::ByApplication, "", "en").await?;

        let result = CommandOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_status,
            execution_time_ms: start_time.elapsed().as_millis(),
        };
        info!(
            "{} on {} exited with {:?} in {}ms",
            command, target.host_id, result.exit_status, result.execution_time_ms
        );
        Ok(result)
    }
}
