//! Typed configuration entries and the views decoded from them.

use chrono::{DateTime, Utc};

use crate::error::{ConfigError, ConfigResult};

/// Operator identifier owning a set of configuration entries.
pub type OwnerId = i64;

/// Owner used by the command router; a single global operator.
pub const DEFAULT_OWNER: OwnerId = 0;

/// Minimum market capitalisation threshold.
pub const KEY_MIN_MCAP: &str = "min_mcap";
/// Minimum liquidity threshold.
pub const KEY_MIN_LIQ: &str = "min_liq";
/// Message count that qualifies as a spike.
pub const KEY_SPIKE_THRESHOLD: &str = "spike_threshold";
/// Window, in seconds, over which spikes are counted.
pub const KEY_SPIKE_WINDOW: &str = "spike_window_sec";

/// Spike window applied when the operator omits one.
pub const DEFAULT_SPIKE_WINDOW_SECS: u64 = 300;

/// One stored `(owner, key) -> value` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// Owner of the entry.
    pub owner_id: OwnerId,
    /// Setting name.
    pub key: String,
    /// Setting value as stored.
    pub value: String,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
}

impl From<herald_data::config::ConfigRow> for ConfigEntry {
    fn from(row: herald_data::config::ConfigRow) -> Self {
        Self {
            owner_id: row.user_id,
            key: row.config_key,
            value: row.config_value,
            updated_at: row.updated_at,
        }
    }
}

/// Token filter thresholds set through `/filtr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterThresholds {
    /// Minimum market capitalisation.
    pub min_mcap: u64,
    /// Minimum liquidity.
    pub min_liq: u64,
}

/// Spike detection settings set through `/spikesedit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikeSettings {
    /// Messages within the window that count as a spike.
    pub threshold: u64,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl FilterThresholds {
    /// Key/value pairs written for these thresholds.
    #[must_use]
    pub fn to_entries(self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_MIN_MCAP, self.min_mcap.to_string()),
            (KEY_MIN_LIQ, self.min_liq.to_string()),
        ]
    }

    pub(crate) fn decode(
        min_mcap: Option<&str>,
        min_liq: Option<&str>,
    ) -> ConfigResult<Option<Self>> {
        match (min_mcap, min_liq) {
            (Some(mcap), Some(liq)) => Ok(Some(Self {
                min_mcap: parse_u64(KEY_MIN_MCAP, mcap)?,
                min_liq: parse_u64(KEY_MIN_LIQ, liq)?,
            })),
            _ => Ok(None),
        }
    }
}

impl SpikeSettings {
    /// Key/value pairs written for these settings.
    #[must_use]
    pub fn to_entries(self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_SPIKE_THRESHOLD, self.threshold.to_string()),
            (KEY_SPIKE_WINDOW, self.window_secs.to_string()),
        ]
    }

    pub(crate) fn decode(
        threshold: Option<&str>,
        window: Option<&str>,
    ) -> ConfigResult<Option<Self>> {
        match (threshold, window) {
            (Some(threshold), Some(window)) => Ok(Some(Self {
                threshold: parse_u64(KEY_SPIKE_THRESHOLD, threshold)?,
                window_secs: parse_u64(KEY_SPIKE_WINDOW, window)?,
            })),
            _ => Ok(None),
        }
    }
}

fn parse_u64(key: &str, value: &str) -> ConfigResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(key, value, "stored value is not an unsigned integer"))
}
