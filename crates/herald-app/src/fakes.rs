//! In-memory collaborators for unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use herald_config::{ConfigEntry, ConfigError, ConfigFacade, ConfigResult, OwnerId};
use herald_data::{DataError, DataResult};
use tokio::time::Instant;

use crate::persistence::{PersistenceGateway, StoreOutcome, StoredMessage};

#[derive(Default)]
pub(crate) struct MemoryConfig {
    values: Mutex<BTreeMap<(OwnerId, String), String>>,
    failures: AtomicUsize,
}

impl MemoryConfig {
    pub(crate) fn fail_next_write(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn value(&self, owner: OwnerId, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap()
            .get(&(owner, key.to_string()))
            .cloned()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.lock().unwrap().is_empty()
    }

    fn take_failure(&self) -> ConfigResult<()> {
        let pending = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match pending {
            Ok(_) => Err(ConfigError::Database {
                operation: "begin config batch",
                source: sqlx::Error::PoolTimedOut,
            }),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl ConfigFacade for MemoryConfig {
    async fn upsert(&self, owner: OwnerId, key: &str, value: &str) -> ConfigResult<()> {
        self.upsert_many(owner, &[(key, value.to_string())]).await
    }

    async fn upsert_many(&self, owner: OwnerId, entries: &[(&str, String)]) -> ConfigResult<()> {
        self.take_failure()?;
        let mut values = self.values.lock().unwrap();
        for (key, value) in entries {
            values.insert((owner, (*key).to_string()), value.clone());
        }
        Ok(())
    }

    async fn get(&self, owner: OwnerId, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.value(owner, key))
    }

    async fn entries(&self, owner: OwnerId) -> ConfigResult<Vec<ConfigEntry>> {
        Ok(self
            .values
            .lock()
            .unwrap()
            .iter()
            .filter(|((entry_owner, _), _)| *entry_owner == owner)
            .map(|((owner_id, key), value)| ConfigEntry {
                owner_id: *owner_id,
                key: key.clone(),
                value: value.clone(),
                updated_at: Utc::now(),
            })
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryGateway {
    rows: Mutex<BTreeMap<(i64, i64), StoredMessage>>,
    stored_at: Mutex<Vec<(i64, Instant)>>,
    failures: AtomicUsize,
}

impl MemoryGateway {
    pub(crate) fn fail_next(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn rows(&self) -> Vec<StoredMessage> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub(crate) fn event_ids(&self) -> Vec<i64> {
        self.rows().into_iter().map(|row| row.event_id).collect()
    }

    /// Instant at which each event id was first written.
    pub(crate) fn stored_at(&self, event_id: i64) -> Option<Instant> {
        self.stored_at
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| *id == event_id)
            .map(|(_, at)| *at)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn store(&self, message: &StoredMessage) -> DataResult<StoreOutcome> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DataError::QueryFailed {
                operation: "insert message",
                source: sqlx::Error::PoolTimedOut,
            });
        }
        let mut rows = self.rows.lock().unwrap();
        let key = (message.source_id, message.event_id);
        if rows.contains_key(&key) {
            return Ok(StoreOutcome::Duplicate);
        }
        rows.insert(key, message.clone());
        self.stored_at
            .lock()
            .unwrap()
            .push((message.event_id, Instant::now()));
        Ok(StoreOutcome::Inserted)
    }
}
