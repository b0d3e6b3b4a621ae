#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Runtime configuration for Herald.
//!
//! Layout: `model.rs` (config entries and typed views), `service.rs`
//! (`ConfigFacade` + Postgres `ConfigStore`), `allow_list.rs` (source gates),
//! `settings.rs` (process settings from the environment).

pub mod allow_list;
pub mod error;
pub mod model;
pub mod service;
pub mod settings;

pub use allow_list::AllowList;
pub use error::{ConfigError, ConfigResult};
pub use model::{
    ConfigEntry, DEFAULT_OWNER, DEFAULT_SPIKE_WINDOW_SECS, FilterThresholds, KEY_MIN_LIQ,
    KEY_MIN_MCAP, KEY_SPIKE_THRESHOLD, KEY_SPIKE_WINDOW, OwnerId, SpikeSettings,
};
pub use service::{ConfigFacade, ConfigStore};
pub use settings::Settings;
