//! `ConfigFacade` and its Postgres-backed implementation.
//!
//! There is no cache: every read and write is a round-trip on a connection
//! acquired for that call and released when it returns.

use async_trait::async_trait;
use herald_data::config as data_config;
use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    ConfigEntry, FilterThresholds, KEY_MIN_LIQ, KEY_MIN_MCAP, KEY_SPIKE_THRESHOLD,
    KEY_SPIKE_WINDOW, OwnerId, SpikeSettings,
};

/// Abstraction over the runtime settings store.
#[async_trait]
pub trait ConfigFacade: Send + Sync {
    /// Set `key` to `value` for `owner`; last write wins.
    async fn upsert(&self, owner: OwnerId, key: &str, value: &str) -> ConfigResult<()>;
    /// Set several keys for `owner` atomically.
    async fn upsert_many(&self, owner: OwnerId, entries: &[(&str, String)]) -> ConfigResult<()>;
    /// Current value of `key` for `owner`.
    async fn get(&self, owner: OwnerId, key: &str) -> ConfigResult<Option<String>>;
    /// Every entry stored for `owner`, ordered by key.
    async fn entries(&self, owner: OwnerId) -> ConfigResult<Vec<ConfigEntry>>;

    /// Decode the `/filtr` thresholds for `owner`, if both are set.
    async fn filter_thresholds(&self, owner: OwnerId) -> ConfigResult<Option<FilterThresholds>> {
        let mcap = self.get(owner, KEY_MIN_MCAP).await?;
        let liq = self.get(owner, KEY_MIN_LIQ).await?;
        FilterThresholds::decode(mcap.as_deref(), liq.as_deref())
    }

    /// Decode the `/spikesedit` settings for `owner`, if both are set.
    async fn spike_settings(&self, owner: OwnerId) -> ConfigResult<Option<SpikeSettings>> {
        let threshold = self.get(owner, KEY_SPIKE_THRESHOLD).await?;
        let window = self.get(owner, KEY_SPIKE_WINDOW).await?;
        SpikeSettings::decode(threshold.as_deref(), window.as_deref())
    }
}

/// Settings store backed by the `user_config` table.
#[derive(Clone)]
pub struct ConfigStore {
    pool: PgPool,
}

impl ConfigStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn connection(&self, operation: &'static str) -> ConfigResult<PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(ConfigError::database(operation))
    }
}

#[async_trait]
impl ConfigFacade for ConfigStore {
    async fn upsert(&self, owner: OwnerId, key: &str, value: &str) -> ConfigResult<()> {
        let mut conn = self.connection("acquire config connection").await?;
        data_config::upsert_config_value(&mut *conn, owner, key, value)
            .await
            .map_err(ConfigError::data("upsert config value"))?;
        debug!(owner, key, "config value stored");
        Ok(())
    }

    async fn upsert_many(&self, owner: OwnerId, entries: &[(&str, String)]) -> ConfigResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(ConfigError::database("begin config batch"))?;
        for (key, value) in entries {
            data_config::upsert_config_value(&mut *tx, owner, key, value)
                .await
                .map_err(ConfigError::data("upsert config value"))?;
        }
        tx.commit()
            .await
            .map_err(ConfigError::database("commit config batch"))?;
        debug!(owner, count = entries.len(), "config batch stored");
        Ok(())
    }

    async fn get(&self, owner: OwnerId, key: &str) -> ConfigResult<Option<String>> {
        let mut conn = self.connection("acquire config connection").await?;
        data_config::fetch_config_value(&mut *conn, owner, key)
            .await
            .map_err(ConfigError::data("fetch config value"))
    }

    async fn entries(&self, owner: OwnerId) -> ConfigResult<Vec<ConfigEntry>> {
        let mut conn = self.connection("acquire config connection").await?;
        let rows = data_config::fetch_config_rows(&mut *conn, owner)
            .await
            .map_err(ConfigError::data("fetch config rows"))?;
        Ok(rows.into_iter().map(ConfigEntry::from).collect())
    }
}
