// [rust] Postgres-backed realm store

use super::{OAuthClient, Realm, RealmRecord, RealmStore};
use crate::{
    auth::{AuthBackendConfig, AuthDefaults},
    db::{queries, Database},
    error::{EnrollError, Result},
};
use async_trait::async_trait;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PgRealmStore {
    db: Database,
    auth_defaults: AuthDefaults,
}

impl PgRealmStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            auth_defaults: AuthDefaults::default(),
        }
    }

    pub fn with_auth_defaults(mut self, auth_defaults: AuthDefaults) -> Self {
        self.auth_defaults = auth_defaults;
        self
    }
}

#[async_trait]
impl RealmStore for PgRealmStore {
    async fn resolve(&self, name: &str) -> Result<Arc<Realm>> {
        let row = queries::get_realm(&self.db, name)
            .await?
            .ok_or_else(|| EnrollError::NotFound(format!("Realm {}", name)))?;
        let server_names = queries::get_realm_server_names(&self.db, name).await?;
        let clients = queries::get_realm_clients(&self.db, name)
            .await?
            .into_iter()
            .map(|c| OAuthClient {
                client_id: c.client_id,
                redirect_uris: c.redirect_uris,
                scopes: c.scopes,
            })
            .collect();

        let validity_days = u32::try_from(row.validity_days)
            .map_err(|_| EnrollError::Config(format!("realm {}: negative validity_days", name)))?;

        let record = RealmRecord {
            name: row.name,
            server_names,
            signing_algorithm: row.signing_algorithm,
            signing_secret: row.signing_secret,
            ca_certificate: row.ca_certificate,
            ca_private_key: row.ca_private_key,
            ca_chain: row.ca_chain,
            auth: row.auth_backend.0,
            clients,
            validity_days,
        };
        debug!(realm = %name, "Realm loaded from database");
        Ok(Arc::new(record.into_realm_with(&self.auth_defaults)?))
    }

    async fn list_server_names(&self) -> Result<Vec<String>> {
        Ok(queries::get_all_server_names(&self.db).await?)
    }

    // [business] Realms with an unusable auth backend are left out, not fatal
    async fn auth_configs(&self) -> Result<BTreeMap<String, AuthBackendConfig>> {
        let mut configs = BTreeMap::new();
        for (name, backend) in queries::get_auth_backends(&self.db).await? {
            match self.auth_defaults.resolve(&backend.0) {
                Ok(config) => {
                    configs.insert(name, config);
                }
                Err(e) => {
                    warn!(realm = %name, error = %e, "Ignoring realm with invalid auth backend")
                }
            }
        }
        Ok(configs)
    }
}
