// [rust] Library root - the server and the admin binaries share everything below
pub mod auth; // Identity providers and request context
pub mod ca; // Certificate authority, CSR parsing, issuance ledger
pub mod config; // Environment configuration
pub mod db; // Row models, queries and the Postgres pool
pub mod enroll; // Enrollment state machine
pub mod error; // Error taxonomy and HTTP mapping
pub mod keygen; // Realm CA and secret provisioning
pub mod oauth; // Authorization codes and access tokens
pub mod realm; // Realm registry
pub mod security; // JWT and PKCE primitives
pub mod web; // HTTP routing and handlers

use std::sync::Arc;
use tracing::info;

use ca::{CaPolicy, CertificateAuthority, IssuanceLedger, MemoryLedger, PgLedger};
use config::Config;
use enroll::EnrollmentOrchestrator;
use oauth::{AuthCodeStore, MemoryCodeStore, PgCodeStore, TokenIssuer};
use realm::{MemoryRealmStore, PgRealmStore, RealmStore};

/// Storage behind the enrollment services: Postgres when configured, memory otherwise.
#[derive(Debug, Clone)]
pub struct Backends {
    pub realms: Arc<dyn RealmStore>,
    pub codes: Arc<dyn AuthCodeStore>,
    pub ledger: Arc<dyn IssuanceLedger>,
}

impl Backends {
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        if let Some(url) = config.database_url() {
            info!("Connecting to database...");
            let db = db::create_pool(url, config.database_max_connections).await?;
            info!("Database connection established");
            let realms = PgRealmStore::new(db.clone()).with_auth_defaults(config.auth_defaults());
            return Ok(Self {
                realms: Arc::new(realms),
                codes: Arc::new(PgCodeStore::new(db.clone())),
                ledger: Arc::new(PgLedger::new(db)),
            });
        }

        let path = config
            .realms_file
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("REALMS_FILE is not set"))?;
        let realms =
            MemoryRealmStore::from_json_file(path)?.with_auth_defaults(config.auth_defaults());
        Ok(Self::in_memory(realms))
    }

    pub fn in_memory(realms: MemoryRealmStore) -> Self {
        Self {
            realms: Arc::new(realms),
            codes: Arc::new(MemoryCodeStore::new()),
            ledger: Arc::new(MemoryLedger::new()),
        }
    }

    pub fn orchestrator(&self, config: &Config) -> EnrollmentOrchestrator {
        let tokens = TokenIssuer::new(
            self.realms.clone(),
            self.codes.clone(),
            config.token_policy(),
        );
        let ca = CertificateAuthority::new(
            self.realms.clone(),
            self.ledger.clone(),
            CaPolicy::new(
                config.certificate_scope.clone(),
                config.max_certificate_validity_days,
            ),
        );
        EnrollmentOrchestrator::new(
            self.realms.clone(),
            tokens,
            ca,
            config.orchestrator_settings(),
        )
    }
}
