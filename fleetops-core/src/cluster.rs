//! Entry point tying the inventory to the remote and broker operations.
//!
//! Every operation resolves the host id first, so an unknown id fails before
//! any network activity.

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::inventory::Inventory;
use crate::listener::MessageListener;
use crate::models::HostRecord;
use crate::queue::{wait_until_empty, ManagementClient, PollOptions, QueueDepthSource};
use crate::remote::{check_exit, CommandOutput, CommandRunner, RunOptions, SshRunner, DEFAULT_COMMAND};

#[derive(Clone)]
pub struct Cluster {
    inventory: Arc<Inventory>,
    runner: Arc<dyn CommandRunner>,
    depth_source: Arc<dyn QueueDepthSource>,
}

impl Cluster {
    /// Uses the SSH runner and the HTTP management client.
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: Arc::new(inventory),
            runner: Arc::new(SshRunner::new()),
            depth_source: Arc::new(ManagementClient::new()),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Inventory::load(path)?))
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_depth_source(mut self, source: Arc<dyn QueueDepthSource>) -> Self {
        self.depth_source = source;
        self
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn host(&self, id: &str) -> Option<&HostRecord> {
        self.inventory.get(id)
    }

    /// Runs `command` (default `true`) on host `id` and returns its combined
    /// output. A non-zero exit is an error unless `opts.allow_failure`.
    pub async fn run(&self, id: &str, command: Option<&str>, opts: &RunOptions) -> Result<CommandOutput> {
        let target = self.inventory.ssh_target(id)?;
        let command = command.unwrap_or(DEFAULT_COMMAND);
        let output = self.runner.execute(&target, command, opts).await?;
        check_exit(id, command, output, opts.allow_failure)
    }

    /// Single depth read. `vhost` falls back to the inventory default.
    pub async fn queue_depth(&self, id: &str, queue: &str, vhost: Option<&str>) -> Result<u64> {
        let endpoint = self.inventory.management_endpoint(id)?;
        let vhost = vhost.unwrap_or(self.inventory.defaults().broker.vhost.as_str());
        self.depth_source.queue_depth(&endpoint, vhost, queue).await
    }

    pub async fn wait_for_empty_queue(&self, id: &str, queue: &str, opts: &PollOptions) -> Result<()> {
        let endpoint = self.inventory.management_endpoint(id)?;
        let vhost = opts
            .vhost
            .as_deref()
            .unwrap_or(self.inventory.defaults().broker.vhost.as_str());
        debug!("waiting for {}/{} on {} ({:?})", vhost, queue, id, opts.timeout);
        wait_until_empty(self.depth_source.as_ref(), &endpoint, vhost, queue, opts).await
    }

    /// Connects a listener to the broker running on host `id`.
    pub async fn create_listener(&self, id: &str, exchange: &str, routing_key: &str) -> Result<MessageListener> {
        let endpoint = self.inventory.broker_endpoint(id)?;
        MessageListener::connect(exchange, routing_key, &endpoint).await
    }
}
