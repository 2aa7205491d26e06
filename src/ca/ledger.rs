// [business] Issuance ledger - audit record of every certificate and the serial uniqueness guard

use crate::{
    db::{queries, Database, IssuedCertificateRow},
    error::Result,
};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::fmt::Debug;
use tracing::debug;

#[async_trait]
pub trait IssuanceLedger: Send + Sync + Debug {
    /// Records the entry unless its serial is already taken in that realm.
    /// Returns `false` on collision; the caller picks a new serial.
    async fn claim(&self, entry: &IssuedCertificateRow) -> Result<bool>;

    /// Drops a claimed entry whose certificate was never produced.
    async fn release(&self, realm: &str, serial: &str) -> Result<()>;

    async fn entries(&self, realm: &str) -> Result<Vec<IssuedCertificateRow>>;
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: DashMap<(String, String), IssuedCertificateRow>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IssuanceLedger for MemoryLedger {
    async fn claim(&self, entry: &IssuedCertificateRow) -> Result<bool> {
        // [rust] Entry API holds the shard lock, so check and insert are one step
        match self
            .entries
            .entry((entry.realm.clone(), entry.serial.clone()))
        {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                Ok(true)
            }
        }
    }

    async fn release(&self, realm: &str, serial: &str) -> Result<()> {
        self.entries.remove(&(realm.to_string(), serial.to_string()));
        debug!(realm = %realm, serial = %serial, "Released serial");
        Ok(())
    }

    async fn entries(&self, realm: &str) -> Result<Vec<IssuedCertificateRow>> {
        let mut entries: Vec<IssuedCertificateRow> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == realm)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.issued_at);
        Ok(entries)
    }
}

#[derive(Debug, Clone)]
pub struct PgLedger {
    db: Database,
}

impl PgLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IssuanceLedger for PgLedger {
    async fn claim(&self, entry: &IssuedCertificateRow) -> Result<bool> {
        Ok(queries::claim_serial(&self.db, entry).await?)
    }

    async fn release(&self, realm: &str, serial: &str) -> Result<()> {
        Ok(queries::release_serial(&self.db, realm, serial).await?)
    }

    async fn entries(&self, realm: &str) -> Result<Vec<IssuedCertificateRow>> {
        Ok(queries::get_issued_certificates(&self.db, realm).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn entry(realm: &str, serial: &str) -> IssuedCertificateRow {
        let now = OffsetDateTime::now_utc();
        IssuedCertificateRow {
            realm: realm.to_string(),
            serial: serial.to_string(),
            subject: "CN=alice@example.org".to_string(),
            user_id: "alice@example.org".to_string(),
            not_before: now,
            not_after: now + time::Duration::days(1),
            issued_at: now,
        }
    }

    #[tokio::test]
    async fn test_claim_is_insert_if_absent() {
        let ledger = MemoryLedger::new();
        assert!(ledger.claim(&entry("example.org", "01")).await.unwrap());
        assert!(!ledger.claim(&entry("example.org", "01")).await.unwrap());
        // [business] Serials are unique per realm, not globally
        assert!(ledger.claim(&entry("example.com", "01")).await.unwrap());

        ledger.release("example.org", "01").await.unwrap();
        assert!(ledger.entries("example.org").await.unwrap().is_empty());
        assert_eq!(ledger.entries("example.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let ledger = Arc::new(MemoryLedger::new());
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.claim(&entry("example.org", "ab")).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
