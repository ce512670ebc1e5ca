/*!
Runner SSH simulé

Enregistre chaque commande demandée et renvoie des sorties scriptées,
sans ouvrir de connexion.
*/

use async_trait::async_trait;
use fleetops_core::{CommandOutput, CommandRunner, RunOptions, SshTarget};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub host_id: String,
    pub address: String,
    pub user: String,
    pub command: String,
    pub forward_agent: bool,
}

#[derive(Clone, Default)]
pub struct MockCommandRunner {
    responses: Arc<Mutex<HashMap<String, (String, Option<u32>)>>>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sortie renvoyée pour `command` ; les commandes inconnues sortent en 0 sans sortie
    pub fn respond(&self, command: &str, output: &str, exit_status: Option<u32>) -> &Self {
        self.responses
            .lock()
            .insert(command.to_string(), (output.to_string(), exit_status));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn execute(&self, target: &SshTarget, command: &str, opts: &RunOptions) -> fleetops_core::Result<CommandOutput> {
        self.invocations.lock().push(Invocation {
            host_id: target.host_id.clone(),
            address: target.address.clone(),
            user: target.user.clone(),
            command: command.to_string(),
            forward_agent: opts.forward_agent,
        });

        let (output, exit_status) = self
            .responses
            .lock()
            .get(command)
            .cloned()
            .unwrap_or_else(|| (String::new(), Some(0)));
        log::info!("🖥️ [MOCK] {}@{}: {} -> {:?}", target.user, target.address, command, exit_status);

        Ok(CommandOutput {
            output,
            exit_status,
            execution_time_ms: 0,
        })
    }
}
