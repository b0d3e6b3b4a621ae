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

//! Herald ingestion service wiring.
//!
//! Layout: `consumer.rs` (receive loop and per-event handler), `commands.rs`
//! (operator command grammar and router), `persistence.rs` (message gateway),
//! `telegram.rs` (Bot API adapter), `bootstrap.rs` (service wiring).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Operator commands.
pub mod commands;
/// Event consumer and handler.
pub mod consumer;
/// Application error types.
pub mod error;
/// Message persistence.
pub mod persistence;
/// Telegram Bot API adapter.
pub mod telegram;

#[cfg(test)]
mod fakes;

pub use bootstrap::run_app;
pub use commands::{Command, CommandError, CommandRouter};
pub use consumer::{ConsumerReport, Disposition, EventConsumer, EventHandler, HandlerError};
pub use error::{AppError, AppResult};
pub use persistence::{PersistenceGateway, PgPersistenceGateway, StoreOutcome, StoredMessage};
pub use telegram::{TelegramClient, TelegramSource};
