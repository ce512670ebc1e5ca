//! fleetops - command-line front end for integration scripts
//!
//! - Inventory listing
//! - Remote command execution over SSH
//! - Queue depth checks and drain waits (management API)
//! - Message collection from an AMQP exchange

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ExecArgs, ListenArgs, WaitArgs};
use fleetops_core::{Cluster, FleetError, PollOptions, RunOptions, SshRunner};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "fleetops=info,fleetops_core=info",
        _ => "fleetops=debug,fleetops_core=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn exec(cluster: &Cluster, args: ExecArgs) -> Result<()> {
    let opts = RunOptions {
        forward_agent: !args.no_forward_agent,
        allow_failure: args.allow_failure,
        connect_timeout: args.connect_timeout,
    };

    let cluster = if args.strict_host_keys {
        cluster
            .clone()
            .with_runner(Arc::new(SshRunner::new().strict_host_keys(true)))
    } else {
        cluster.clone()
    };

    match cluster.run(&args.host, args.command.as_deref(), &opts).await {
        Ok(out) => {
            print!("{}", out.output);
            if let Some(status) = out.exit_status.filter(|s| *s != 0) {
                info!("command exited with {} (tolerated)", status);
            }
            Ok(())
        }
        // mirror the remote status so shell scripts can branch on it
        Err(FleetError::CommandFailed { output, exit_status, command, .. }) => {
            print!("{}", output);
            eprintln!("fleetops: `{}` failed on {} with status {:?}", command, args.host, exit_status);
            std::process::exit(exit_status.map(|s| s.clamp(1, 255) as i32).unwrap_or(1));
        }
        Err(e) => Err(e).with_context(|| format!("exec on {}", args.host)),
    }
}

async fn wait_queue(cluster: &Cluster, args: WaitArgs) -> Result<()> {
    let opts = PollOptions {
        interval: args.interval,
        timeout: args.timeout,
        vhost: args.vhost,
    };
    cluster
        .wait_for_empty_queue(&args.host, &args.queue, &opts)
        .await
        .with_context(|| format!("waiting for queue {} on {}", args.queue, args.host))?;
    info!("queue {} on {} is empty", args.queue, args.host);
    Ok(())
}

async fn listen(cluster: &Cluster, args: ListenArgs) -> Result<()> {
    let listener = cluster
        .create_listener(&args.host, &args.exchange, &args.routing_key)
        .await
        .with_context(|| format!("connecting listener to {}", args.host))?;
    info!(
        "collecting {}/{} for {}",
        args.exchange,
        args.routing_key,
        humantime::format_duration(args.duration)
    );

    tokio::select! {
        _ = tokio::time::sleep(args.duration) => {},
        _ = tokio::signal::ctrl_c() => debug!("interrupted, closing listener early"),
    }

    // ce qui a été décodé est affiché même si la fermeture échoue
    let collected = listener.drain().await;
    println!("{}", serde_json::to_string_pretty(&collected.messages)?);
    match collected.error {
        Some(e) => Err(anyhow::Error::new(e).context("closing listener")),
        None => Ok(()),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cluster = Cluster::load(&cli.inventory)
        .with_context(|| format!("loading inventory {}", cli.inventory.display()))?;

    match cli.command {
        Commands::Hosts => {
            let inventory = cluster.inventory();
            for id in inventory.ids() {
                if let Some(host) = inventory.get(id) {
                    println!("{}\t{}", id, host.address());
                }
            }
            Ok(())
        }
        Commands::Exec(args) => exec(&cluster, args).await,
        Commands::QueueDepth { host, queue, vhost } => {
            let depth = cluster
                .queue_depth(&host, &queue, vhost.as_deref())
                .await
                .with_context(|| format!("reading depth of {} on {}", queue, host))?;
            println!("{}", depth);
            Ok(())
        }
        Commands::WaitQueue(args) => wait_queue(&cluster, args).await,
        Commands::Listen(args) => listen(&cluster, args).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel (FLEETOPS_INVENTORY, RUST_LOG)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);
    debug!("using inventory {}", cli.inventory.display());

    run(cli).await
}
