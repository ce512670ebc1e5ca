/*!
Construction d'inventaires de test

Facilite l'écriture de fichiers `inventory.yml` :
- builder d'hôtes avec les champs usuels
- section `defaults` optionnelle
- inventaires volontairement invalides pour les tests d'erreur
*/

use anyhow::Result;
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Un hôte de l'inventaire en cours de construction
#[derive(Debug, Clone)]
pub struct HostEntry {
    id: String,
    fields: Mapping,
}

impl HostEntry {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            fields: Mapping::new(),
        }
    }

    /// Définit un champ arbitraire (y compris des valeurs invalides)
    pub fn set_field<V: Into<Value>>(mut self, field: &str, value: V) -> Self {
        self.fields.insert(Value::String(field.to_string()), value.into());
        self
    }

    pub fn ip(self, ip: &str) -> Self {
        self.set_field("ip", ip)
    }

    pub fn hostname(self, hostname: &str) -> Self {
        self.set_field("hostname", hostname)
    }

    pub fn user(self, user: &str) -> Self {
        self.set_field("user", user)
    }

    pub fn broker_credentials(self, username: &str, password: &str) -> Self {
        self.set_field("rmq_username", username)
            .set_field("rmq_password", password)
    }

    pub fn port(self, port: u16) -> Self {
        self.set_field("port", u64::from(port))
    }
}

/// Builder d'inventaire complet
#[derive(Debug, Clone, Default)]
pub struct InventoryBuilder {
    hosts: Vec<HostEntry>,
    defaults: Option<Value>,
    omit_hosts_key: bool,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: HostEntry) -> Self {
        self.hosts.push(host);
        self
    }

    /// Section `defaults` brute, ex: `json!({"ssh": {"user": "deploy"}})`
    pub fn defaults(mut self, defaults: serde_json::Value) -> Result<Self> {
        self.defaults = Some(serde_yaml::to_value(defaults)?);
        Ok(self)
    }

    /// Produit un fichier sans clé `hosts`
    pub fn without_hosts_key(mut self) -> Self {
        self.omit_hosts_key = true;
        self
    }

    pub fn to_yaml(&self) -> Result<String> {
        let mut doc = Mapping::new();
        if let Some(defaults) = &self.defaults {
            doc.insert("defaults".into(), defaults.clone());
        }
        if !self.omit_hosts_key {
            let mut hosts = Mapping::new();
            for host in &self.hosts {
                hosts.insert(Value::String(host.id.clone()), Value::Mapping(host.fields.clone()));
            }
            doc.insert("hosts".into(), Value::Mapping(hosts));
        }
        Ok(serde_yaml::to_string(&doc)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        log::info!("📝 Wrote inventory with {} hosts to {}", self.hosts.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetops_core::{FleetError, Inventory};

    #[test]
    fn test_builder_round_trips_through_loader() {
        let yaml = InventoryBuilder::new()
            .host(HostEntry::new("postgres").ip("192.168.100.4").user("vagrant").port(5672))
            .host(HostEntry::new("web").hostname("web.local"))
            .to_yaml()
            .unwrap();

        let inv = Inventory::from_yaml_str(&yaml).unwrap();
        assert_eq!(inv.ids(), vec!["postgres", "web"]);
        assert_eq!(inv.get("postgres").unwrap().port, Some(5672));
    }

    #[test]
    fn test_builder_produces_invalid_fixtures() {
        let yaml = InventoryBuilder::new().without_hosts_key().to_yaml().unwrap();
        assert!(matches!(Inventory::from_yaml_str(&yaml), Err(FleetError::MissingHosts)));

        let yaml = InventoryBuilder::new().to_yaml().unwrap();
        assert!(matches!(Inventory::from_yaml_str(&yaml), Err(FleetError::EmptyHosts)));

        let yaml = InventoryBuilder::new()
            .host(HostEntry::new("db").ip("10.0.0.1").set_field("port", "amqp"))
            .to_yaml()
            .unwrap();
        assert!(matches!(Inventory::from_yaml_str(&yaml), Err(FleetError::InvalidHost { .. })));
    }

    #[test]
    fn test_defaults_section() {
        let yaml = InventoryBuilder::new()
            .defaults(serde_json::json!({"ssh": {"user": "deploy"}}))
            .unwrap()
            .host(HostEntry::new("db").ip("10.0.0.1"))
            .to_yaml()
            .unwrap();

        let inv = Inventory::from_yaml_str(&yaml).unwrap();
        assert_eq!(inv.ssh_target("db").unwrap().user, "deploy");
    }
}
