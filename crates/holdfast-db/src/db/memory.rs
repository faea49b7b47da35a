//! In-process upload ledger.
//!
//! Same contract as the Postgres repository. A single mutex guards the whole
//! table, so every operation is serialized. Used by tests and by the daemon's
//! dry-run paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use holdfast_core::models::{NewUpload, UploadRecord};
use holdfast_core::retention::{extended, garbage_collect_at};
use holdfast_core::{Clock, PinError, PinResult};

use super::upload::UploadLedger;

type Key = (String, String, String);

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<Key, UploadRecord>,
}

pub struct MemoryUploadLedger {
    table: Mutex<Table>,
    clock: Arc<dyn Clock>,
}

impl MemoryUploadLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn select<F>(&self, predicate: F) -> Vec<UploadRecord>
    where
        F: Fn(&UploadRecord) -> bool,
    {
        let table = self.table.lock().await;
        let mut records: Vec<UploadRecord> =
            table.rows.values().filter(|r| predicate(r)).cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

fn key(content_id: &str, network_name: &str, user_name: &str) -> Key {
    (
        content_id.to_string(),
        network_name.to_string(),
        user_name.to_string(),
    )
}

#[async_trait::async_trait]
impl UploadLedger for MemoryUploadLedger {
    async fn create(&self, upload: NewUpload) -> PinResult<UploadRecord> {
        let now = self.clock.now();
        let gc_at = garbage_collect_at(now, upload.hold_months)?;

        let mut table = self.table.lock().await;
        let k = key(&upload.content_id, &upload.network_name, &upload.user_name);
        if table.rows.contains_key(&k) {
            return Err(PinError::DuplicateRecord {
                content_id: upload.content_id,
                network: upload.network_name,
                user: upload.user_name,
            });
        }

        table.next_id += 1;
        let record = UploadRecord {
            id: table.next_id,
            content_id: upload.content_id,
            kind: upload.kind,
            name: upload.name,
            network_name: upload.network_name,
            hold_months: upload.hold_months,
            co_owners: vec![upload.user_name.clone()],
            user_name: upload.user_name,
            garbage_collect_at: gc_at,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(k, record.clone());
        Ok(record)
    }

    async fn renew(
        &self,
        content_id: &str,
        network_name: &str,
        user_name: &str,
        hold_months: i64,
    ) -> PinResult<UploadRecord> {
        let now = self.clock.now();
        let candidate = garbage_collect_at(now, hold_months)?;

        let mut table = self.table.lock().await;
        let record = table
            .rows
            .get_mut(&key(content_id, network_name, user_name))
            .ok_or_else(|| PinError::not_found(content_id, network_name, user_name))?;

        if !record.is_co_owner(user_name) {
            record.co_owners.push(user_name.to_string());
        }
        let kept = extended(record.garbage_collect_at, candidate);
        if kept > record.garbage_collect_at {
            record.garbage_collect_at = kept;
            record.hold_months = hold_months;
        }
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn find_by_content_network_user(
        &self,
        content_id: &str,
        network_name: &str,
        user_name: &str,
    ) -> PinResult<UploadRecord> {
        let table = self.table.lock().await;
        table
            .rows
            .get(&key(content_id, network_name, user_name))
            .cloned()
            .ok_or_else(|| PinError::not_found(content_id, network_name, user_name))
    }

    async fn find_by_network(&self, network_name: &str) -> PinResult<Vec<UploadRecord>> {
        Ok(self.select(|r| r.network_name == network_name).await)
    }

    async fn find_by_user(&self, user_name: &str) -> PinResult<Vec<UploadRecord>> {
        Ok(self.select(|r| r.user_name == user_name).await)
    }

    async fn find_by_content(&self, content_id: &str) -> PinResult<Vec<UploadRecord>> {
        Ok(self.select(|r| r.content_id == content_id).await)
    }

    async fn find_by_content_and_user(
        &self,
        content_id: &str,
        user_name: &str,
    ) -> PinResult<Vec<UploadRecord>> {
        Ok(self
            .select(|r| r.content_id == content_id && r.user_name == user_name)
            .await)
    }

    async fn list_all(&self) -> PinResult<Vec<UploadRecord>> {
        Ok(self.select(|_| true).await)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> PinResult<Vec<UploadRecord>> {
        let mut table = self.table.lock().await;
        let expired_keys: Vec<Key> = table
            .rows
            .iter()
            .filter(|(_, r)| r.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut expired: Vec<UploadRecord> = expired_keys
            .iter()
            .filter_map(|k| table.rows.remove(k))
            .collect();
        expired.sort_by_key(|r| r.id);
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use holdfast_core::models::UploadKind;
    use holdfast_core::ManualClock;

    fn ledger() -> (Arc<ManualClock>, MemoryUploadLedger) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
        ));
        let ledger = MemoryUploadLedger::new(clock.clone());
        (clock, ledger)
    }

    #[tokio::test]
    async fn test_create_sets_owner_and_retention() {
        let (clock, ledger) = ledger();
        let record = ledger
            .create(NewUpload::pin("Qm123", "public", "alice", 1))
            .await
            .unwrap();

        assert_eq!(record.kind, UploadKind::Pin);
        assert_eq!(record.co_owners, vec!["alice".to_string()]);
        assert_eq!(
            record.garbage_collect_at,
            Utc.with_ymd_and_hms(2024, 2, 15, 10, 0, 0).unwrap()
        );
        assert_eq!(record.created_at, clock.now());
    }

    #[tokio::test]
    async fn test_duplicate_create_leaves_ledger_unchanged() {
        let (_, ledger) = ledger();
        let first = ledger
            .create(NewUpload::pin("Qm123", "public", "alice", 1))
            .await
            .unwrap();

        let err = ledger
            .create(NewUpload::pin("Qm123", "public", "alice", 12))
            .await
            .unwrap_err();
        assert!(matches!(err, PinError::DuplicateRecord { .. }));

        let stored = ledger
            .find_by_content_network_user("Qm123", "public", "alice")
            .await
            .unwrap();
        assert_eq!(stored, first);
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_content_other_user_is_a_separate_record() {
        let (_, ledger) = ledger();
        ledger
            .create(NewUpload::pin("Qm123", "public", "alice", 1))
            .await
            .unwrap();
        ledger
            .create(NewUpload::pin("Qm123", "public", "bob", 1))
            .await
            .unwrap();

        assert_eq!(ledger.find_by_content("Qm123").await.unwrap().len(), 2);
        assert_eq!(ledger.find_by_user("bob").await.unwrap().len(), 1);
        assert!(ledger.find_by_network("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_renew_with_shorter_hold_keeps_date() {
        let (clock, ledger) = ledger();
        let created = ledger
            .create(NewUpload::pin("Qm123", "public", "alice", 6))
            .await
            .unwrap();

        clock.advance(Duration::days(1));
        let renewed = ledger.renew("Qm123", "public", "alice", 1).await.unwrap();

        assert_eq!(renewed.garbage_collect_at, created.garbage_collect_at);
        assert_eq!(renewed.hold_months, 6);
    }

    #[tokio::test]
    async fn test_renew_with_longer_hold_extends() {
        let (_, ledger) = ledger();
        let created = ledger
            .create(NewUpload::pin("Qm123", "public", "alice", 1))
            .await
            .unwrap();

        let renewed = ledger.renew("Qm123", "public", "alice", 3).await.unwrap();

        assert!(renewed.garbage_collect_at > created.garbage_collect_at);
        assert_eq!(renewed.hold_months, 3);
        assert_eq!(renewed.co_owners, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_renew_missing_record() {
        let (_, ledger) = ledger();
        let err = ledger.renew("Qm404", "public", "alice", 1).await.unwrap_err();
        assert!(matches!(err, PinError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_sweep_removes_exactly_expired_and_is_idempotent() {
        let (clock, ledger) = ledger();
        ledger
            .create(NewUpload::pin("QmShort", "public", "alice", 0))
            .await
            .unwrap();
        ledger
            .create(NewUpload::pin("QmLong", "public", "alice", 12))
            .await
            .unwrap();

        let swept = ledger.sweep_expired(clock.now()).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].content_id, "QmShort");

        assert!(ledger.sweep_expired(clock.now()).await.unwrap().is_empty());
        assert_eq!(ledger.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_negative_hold_rejected_before_insert() {
        let (_, ledger) = ledger();
        let err = ledger
            .create(NewUpload::pin("Qm123", "public", "alice", -1))
            .await
            .unwrap_err();
        assert!(matches!(err, PinError::Validation(_)));
        assert!(ledger.is_empty().await);
    }
}
