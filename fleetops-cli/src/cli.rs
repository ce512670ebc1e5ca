//! Command-line structure for `fleetops`.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use fleetops_core::DEFAULT_INVENTORY_PATH;

/// Drive a fleet of test machines and a shared AMQP broker from scripts.
#[derive(Parser, Debug)]
#[command(name = "fleetops")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Inventory file
    #[arg(short, long, env = "FLEETOPS_INVENTORY", default_value = DEFAULT_INVENTORY_PATH, global = true)]
    pub inventory: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the hosts of the inventory
    Hosts,

    /// Run a command on a host over SSH
    Exec(ExecArgs),

    /// Print the current depth of a queue
    QueueDepth {
        host: String,
        queue: String,
        #[arg(long)]
        vhost: Option<String>,
    },

    /// Block until a queue is empty
    WaitQueue(WaitArgs),

    /// Collect JSON messages published to an exchange with a routing key
    Listen(ListenArgs),
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    pub host: String,
    /// Shell command; defaults to `true`
    pub command: Option<String>,
    /// Do not request SSH agent forwarding
    #[arg(long)]
    pub no_forward_agent: bool,
    /// Print the output even when the command exits non-zero
    #[arg(long)]
    pub allow_failure: bool,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub connect_timeout: Duration,
    /// Refuse hosts whose key is not in known_hosts
    #[arg(long)]
    pub strict_host_keys: bool,
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    pub host: String,
    pub queue: String,
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub interval: Duration,
    /// Fail if the queue is still non-empty after this long
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
    #[arg(long)]
    pub vhost: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    pub host: String,
    pub exchange: String,
    pub routing_key: String,
    /// How long to collect before closing
    #[arg(long = "for", value_parser = humantime::parse_duration, default_value = "5s")]
    pub duration: Duration,
}
