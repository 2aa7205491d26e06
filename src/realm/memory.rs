// [rust] In-memory realm store - records are validated on every resolve, like the Postgres store

use super::{Realm, RealmRecord, RealmStore};
use crate::{
    auth::{AuthBackendConfig, AuthDefaults},
    error::{EnrollError, Result},
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{collections::BTreeMap, collections::BTreeSet, path::Path, sync::Arc};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct MemoryRealmStore {
    records: DashMap<String, RealmRecord>,
    auth_defaults: AuthDefaults,
}

impl MemoryRealmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from records, skipping (with a warning) any that would share key material.
    pub fn from_records(records: impl IntoIterator<Item = RealmRecord>) -> Self {
        let store = Self::new();
        for record in records {
            if let Err(e) = store.insert(record) {
                warn!(error = %e, "Skipping realm record");
            }
        }
        store
    }

    /// Loads a JSON array of realm records; key material reuse fails the load.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let records: Vec<RealmRecord> = serde_json::from_str(&raw)?;
        info!(
            count = records.len(),
            path = %path.as_ref().display(),
            "Loaded realm records"
        );
        let store = Self::new();
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }

    pub fn with_auth_defaults(mut self, auth_defaults: AuthDefaults) -> Self {
        self.auth_defaults = auth_defaults;
        self
    }

    // [security] A realm's token secret and CA key are its own; a record reusing another realm's is refused
    pub fn insert(&self, record: RealmRecord) -> Result<()> {
        let name = record.name.trim().to_string();
        if let Some(owner) = self.key_material_owner(&name, &record) {
            return Err(EnrollError::Config(format!(
                "realm {}: key material already used by realm {}",
                name, owner
            )));
        }
        self.records.insert(name, record);
        Ok(())
    }

    fn key_material_owner(&self, name: &str, record: &RealmRecord) -> Option<String> {
        let ca_key = record
            .ca_private_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty());
        self.records
            .iter()
            .find(|entry| {
                let other = entry.value();
                entry.key() != name
                    && (other.signing_secret == record.signing_secret
                        || (ca_key.is_some()
                            && other.ca_private_key.as_deref().map(str::trim) == ca_key))
            })
            .map(|entry| entry.key().clone())
    }
}

#[async_trait]
impl RealmStore for MemoryRealmStore {
    async fn resolve(&self, name: &str) -> Result<Arc<Realm>> {
        let record = self
            .records
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EnrollError::NotFound(format!("Realm {}", name)))?;
        Ok(Arc::new(record.into_realm_with(&self.auth_defaults)?))
    }

    async fn list_server_names(&self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .records
            .iter()
            .flat_map(|entry| entry.value().server_names.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    // [business] One broken realm must not take realm guessing down for the others
    async fn auth_configs(&self) -> Result<BTreeMap<String, AuthBackendConfig>> {
        let mut configs = BTreeMap::new();
        for entry in self.records.iter() {
            match self.auth_defaults.resolve(&entry.value().auth) {
                Ok(config) => {
                    configs.insert(entry.key().clone(), config);
                }
                Err(e) => {
                    warn!(realm = %entry.key(), error = %e, "Ignoring realm with invalid auth backend")
                }
            }
        }
        Ok(configs)
    }
}
