//! Static host inventory loaded from YAML.
//!
//! The file holds a top-level `hosts` mapping (id -> connection attributes)
//! and an optional `defaults` section. It is parsed and validated once; the
//! resulting [`Inventory`] is immutable.

use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::models::{BrokerEndpoint, Defaults, HostRecord, ManagementEndpoint, SshTarget};

/// Inventory file looked up in the working directory when none is given.
pub const DEFAULT_INVENTORY_PATH: &str = "inventory.yml";

#[derive(Debug, Clone)]
pub struct Inventory {
    hosts: HashMap<String, HostRecord>,
    defaults: Defaults,
}

impl Inventory {
    /// Reads and validates an inventory file. A missing file surfaces as
    /// `FleetError::Io` carrying the original `NotFound` error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path)?;
        let inventory = Self::from_yaml_str(&txt)?;
        info!("loaded {} hosts from {}", inventory.len(), path.display());
        Ok(inventory)
    }

    pub fn from_yaml_str(txt: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(txt)?;

        let hosts = match doc.get("hosts") {
            None => return Err(FleetError::MissingHosts),
            Some(Value::Null) => return Err(FleetError::EmptyHosts),
            Some(Value::Mapping(m)) if m.is_empty() => return Err(FleetError::EmptyHosts),
            Some(Value::Mapping(m)) => parse_hosts(m)?,
            Some(_) => return Err(FleetError::invalid_host("hosts", "expected a mapping of host entries")),
        };

        let defaults = match doc.get("defaults") {
            None | Some(Value::Null) => Defaults::default(),
            Some(v) => serde_yaml::from_value(v.clone())?,
        };

        Ok(Self { hosts, defaults })
    }

    pub fn get(&self, id: &str) -> Option<&HostRecord> {
        self.hosts.get(id)
    }

    /// Like [`Inventory::get`] but an unknown id is an error.
    pub fn require(&self, id: &str) -> Result<&HostRecord> {
        self.get(id).ok_or_else(|| FleetError::UnknownHost(id.to_string()))
    }

    /// Host ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.hosts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn ssh_target(&self, id: &str) -> Result<SshTarget> {
        let host = self.require(id)?;
        let user = host
            .user
            .clone()
            .or_else(|| self.defaults.ssh.user.clone())
            .ok_or_else(|| FleetError::MissingUser(id.to_string()))?;
        Ok(SshTarget {
            host_id: id.to_string(),
            address: host.address().to_string(),
            port: host.ssh_port.unwrap_or(self.defaults.ssh.port),
            user,
            password: host.password.clone(),
        })
    }

    pub fn broker_endpoint(&self, id: &str) -> Result<BrokerEndpoint> {
        let host = self.require(id)?;
        let broker = &self.defaults.broker;
        Ok(BrokerEndpoint {
            address: host.address().to_string(),
            port: host.port.unwrap_or(broker.port),
            username: host.rmq_username.clone().unwrap_or_else(|| broker.username.clone()),
            password: host.rmq_password.clone().unwrap_or_else(|| broker.password.clone()),
            vhost: broker.vhost.clone(),
        })
    }

    pub fn management_endpoint(&self, id: &str) -> Result<ManagementEndpoint> {
        let host = self.require(id)?;
        let broker = &self.defaults.broker;
        Ok(ManagementEndpoint {
            address: host.address().to_string(),
            port: host.management_port.unwrap_or(broker.management_port),
            username: host.rmq_username.clone().unwrap_or_else(|| broker.username.clone()),
            password: host.rmq_password.clone().unwrap_or_else(|| broker.password.clone()),
        })
    }
}

fn parse_hosts(entries: &Mapping) -> Result<HashMap<String, HostRecord>> {
    let mut hosts = HashMap::with_capacity(entries.len());
    for (key, value) in entries {
        let id = scalar_to_string(key)
            .ok_or_else(|| FleetError::invalid_host(&format!("{key:?}"), "host id must be a scalar"))?;
        let record = parse_host(&id, value)?;
        debug!("inventory host {} -> {}", id, record.address());
        // `42` et `"42"` sont deux clés YAML distinctes mais le même id
        if hosts.contains_key(&id) {
            return Err(FleetError::invalid_host(&id, "duplicate host id"));
        }
        hosts.insert(id, record);
    }
    Ok(hosts)
}

fn parse_host(id: &str, value: &Value) -> Result<HostRecord> {
    let Value::Mapping(fields) = value else {
        return Err(FleetError::invalid_host(id, "entry must be a mapping"));
    };

    let text = |name: &str| -> Result<Option<String>> {
        match fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => scalar_to_string(v)
                .map(Some)
                .ok_or_else(|| FleetError::invalid_host(id, format!("`{name}` must be a scalar"))),
        }
    };
    let port = |name: &str| -> Result<Option<u16>> {
        match fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => parse_port(v)
                .map(Some)
                .ok_or_else(|| FleetError::invalid_host(id, format!("`{name}` must be a port number, got {v:?}"))),
        }
    };

    let record = HostRecord {
        id: id.to_string(),
        ip: text("ip")?,
        hostname: text("hostname")?,
        user: text("user")?,
        password: text("password")?,
        ssh_port: port("ssh_port")?,
        rmq_username: text("rmq_username")?,
        rmq_password: text("rmq_password")?,
        port: port("port")?,
        management_port: port("management_port")?,
    };

    if record.ip.is_none() && record.hostname.is_none() {
        return Err(FleetError::invalid_host(id, "either `ip` or `hostname` is required"));
    }
    Ok(record)
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// integers, or strings made only of digits; 0 is not a usable port
fn parse_port(v: &Value) -> Option<u16> {
    let port = match v {
        Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => s.parse().ok()?,
        _ => return None,
    };
    (port != 0).then_some(port)
}
