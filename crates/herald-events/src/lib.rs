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

//! Upstream event model for Herald.
//!
//! The ingestion core never talks to the messaging platform directly. It pulls
//! [`InboundEvent`]s from an [`EventSource`] and answers operator commands
//! through a [`ReplySink`]; both seams report failures as [`UpstreamError`],
//! which carries the platform's rate-limit signal as a typed variant.
//!
//! Layout: `payloads.rs` (event records), `error.rs` (upstream failures),
//! `source.rs` (source/reply traits and the in-process channel source).

pub mod error;
pub mod payloads;
pub mod source;

pub use error::{UpstreamError, UpstreamResult};
pub use payloads::{EventId, InboundEvent, SenderId, SourceId, UNKNOWN_SENDER};
pub use source::{ChannelSource, EventSender, EventSource, ReplySink, StreamSource, channel};
