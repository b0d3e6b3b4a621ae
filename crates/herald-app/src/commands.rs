//! Operator command grammar and the router that applies it.
//!
//! Commands share the event stream with ordinary messages. A text is a command
//! only when its first whitespace-delimited token is one of the known names,
//! optionally followed by a `@bot_username` mention suffix.

use std::sync::Arc;

use herald_config::{
    ConfigFacade, DEFAULT_OWNER, DEFAULT_SPIKE_WINDOW_SECS, FilterThresholds, SpikeSettings,
};
use herald_events::{InboundEvent, ReplySink};
use herald_telemetry::Metrics;
use thiserror::Error;
use tracing::{info, warn};

use crate::consumer::HandlerError;

/// Reply to `/help`.
pub const HELP_TEXT: &str =
    "Commands: /help, /filtr <mcap> <liq> [chain], /spikesedit <threshold> [sec]";
/// Reply when a command could not be persisted.
pub const STORE_FAILED_TEXT: &str = "Failed to save settings, please retry.";
/// Chain echoed when `/filtr` omits one.
pub const DEFAULT_CHAIN: &str = "all";

const HELP: &str = "/help";
const FILTR: &str = "/filtr";
const SPIKESEDIT: &str = "/spikesedit";

const FILTR_USAGE: &str = "/filtr <mcap> <liq> [chain]";
const SPIKESEDIT_USAGE: &str = "/spikesedit <threshold> [sec]";

/// A recognised operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show usage.
    Help,
    /// Set filter thresholds; `chain` is echoed only.
    Filter {
        /// Thresholds to store.
        thresholds: FilterThresholds,
        /// Chain token from the command, or [`DEFAULT_CHAIN`].
        chain: String,
    },
    /// Set spike detection parameters.
    SpikeEdit(SpikeSettings),
}

/// Arguments of a recognised command were unusable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// A required argument was absent.
    #[error("missing command argument")]
    MissingArgument {
        /// Command name including the slash.
        command: &'static str,
        /// Argument placeholder.
        argument: &'static str,
    },
    /// A numeric argument was not a non-negative integer.
    #[error("invalid numeric argument")]
    InvalidNumber {
        /// Command name including the slash.
        command: &'static str,
        /// Argument placeholder.
        argument: &'static str,
        /// Offending token.
        value: String,
    },
    /// The chain token contained characters outside `[A-Za-z0-9_]`.
    #[error("invalid chain token")]
    InvalidChain {
        /// Command name including the slash.
        command: &'static str,
        /// Offending token.
        value: String,
    },
}

impl CommandError {
    /// Command the error belongs to.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::MissingArgument { command, .. }
            | Self::InvalidNumber { command, .. }
            | Self::InvalidChain { command, .. } => command,
        }
    }

    /// Operator-facing explanation used in the error reply.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::MissingArgument { argument, .. } => format!("missing {argument}"),
            Self::InvalidNumber {
                argument, value, ..
            } => format!("{argument} must be a non-negative integer, got '{value}'"),
            Self::InvalidChain { value, .. } => {
                format!("chain must contain only letters, digits or '_', got '{value}'")
            }
        }
    }

    /// Full reply sent back to the operator.
    #[must_use]
    pub fn reply_text(&self) -> String {
        let command = self.command();
        let usage = if command == FILTR {
            FILTR_USAGE
        } else {
            SPIKESEDIT_USAGE
        };
        format!(
            "Invalid {command} arguments: {}. Usage: {usage}",
            self.reason()
        )
    }
}

impl Command {
    /// Parse `text`; `None` when the text is not a command at all.
    ///
    /// A `/command@name` suffix is never ours here; see [`Command::parse_addressed`].
    #[must_use]
    pub fn parse(text: &str) -> Option<Result<Self, CommandError>> {
        Self::parse_addressed(text, None)
    }

    /// Parse `text` sent to the bot named `bot_username`.
    ///
    /// An unsuffixed command is always accepted. A `@mention` suffix must name
    /// `bot_username` (ASCII case-insensitive); commands addressed to another
    /// bot are not commands.
    #[must_use]
    pub fn parse_addressed(
        text: &str,
        bot_username: Option<&str>,
    ) -> Option<Result<Self, CommandError>> {
        let mut tokens = text.split_whitespace();
        let head = tokens.next()?;
        let name = match head.split_once('@') {
            None => head,
            Some((name, mention)) => {
                let ours = bot_username.is_some_and(|bot| {
                    mention.eq_ignore_ascii_case(bot.trim_start_matches('@'))
                });
                if !ours {
                    return None;
                }
                name
            }
        };
        match name {
            HELP => Some(Ok(Self::Help)),
            FILTR => Some(parse_filtr(tokens)),
            SPIKESEDIT => Some(parse_spikesedit(tokens)),
            _ => None,
        }
    }

    /// Metric label for the command.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Filter { .. } => "filtr",
            Self::SpikeEdit(_) => "spikesedit",
        }
    }

    /// Confirmation sent after the command is applied.
    #[must_use]
    pub fn confirmation(&self) -> String {
        match self {
            Self::Help => HELP_TEXT.to_string(),
            Self::Filter { thresholds, chain } => format!(
                "Filter updated: mcap>={}, liq>={} (chain: {chain})",
                thresholds.min_mcap, thresholds.min_liq
            ),
            Self::SpikeEdit(settings) => format!(
                "Spike settings: threshold={} msgs, window={}s",
                settings.threshold, settings.window_secs
            ),
        }
    }

    /// Config entries written by the command.
    fn entries(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Help => Vec::new(),
            Self::Filter { thresholds, .. } => thresholds.to_entries(),
            Self::SpikeEdit(settings) => settings.to_entries(),
        }
    }
}

fn parse_filtr<'a>(mut args: impl Iterator<Item = &'a str>) -> Result<Command, CommandError> {
    let min_mcap = required_uint(FILTR, "<mcap>", args.next())?;
    let min_liq = required_uint(FILTR, "<liq>", args.next())?;
    let chain = match args.next() {
        Some(token) if is_chain_token(token) => token.to_string(),
        Some(token) => {
            return Err(CommandError::InvalidChain {
                command: FILTR,
                value: token.to_string(),
            });
        }
        None => DEFAULT_CHAIN.to_string(),
    };
    Ok(Command::Filter {
        thresholds: FilterThresholds { min_mcap, min_liq },
        chain,
    })
}

fn parse_spikesedit<'a>(mut args: impl Iterator<Item = &'a str>) -> Result<Command, CommandError> {
    let threshold = required_uint(SPIKESEDIT, "<threshold>", args.next())?;
    let window_secs = match args.next() {
        Some(token) => parse_uint(SPIKESEDIT, "[sec]", token)?,
        None => DEFAULT_SPIKE_WINDOW_SECS,
    };
    Ok(Command::SpikeEdit(SpikeSettings {
        threshold,
        window_secs,
    }))
}

fn required_uint(
    command: &'static str,
    argument: &'static str,
    token: Option<&str>,
) -> Result<u64, CommandError> {
    let token = token.ok_or(CommandError::MissingArgument { command, argument })?;
    parse_uint(command, argument, token)
}

fn parse_uint(
    command: &'static str,
    argument: &'static str,
    token: &str,
) -> Result<u64, CommandError> {
    let invalid = || CommandError::InvalidNumber {
        command,
        argument,
        value: token.to_string(),
    };
    // `u64::from_str` accepts a leading '+'; operators must type plain digits.
    if token.is_empty() || !token.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(invalid());
    }
    token.parse::<u64>().map_err(|_| invalid())
}

fn is_chain_token(token: &str) -> bool {
    token
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}

/// Applies parsed commands to the settings store and answers the operator.
pub struct CommandRouter {
    config: Arc<dyn ConfigFacade>,
    replies: Arc<dyn ReplySink>,
    metrics: Metrics,
}

impl CommandRouter {
    /// Build a router over injected collaborators.
    #[must_use]
    pub fn new(config: Arc<dyn ConfigFacade>, replies: Arc<dyn ReplySink>, metrics: Metrics) -> Self {
        Self {
            config,
            replies,
            metrics,
        }
    }

    /// Apply `parsed` for `event` and send exactly one reply.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Config`] when the settings store failed, whether or
    /// not the operator could be told, and [`HandlerError::Reply`] when the reply
    /// to an applied or rejected command could not be delivered.
    pub async fn execute(
        &self,
        event: &InboundEvent,
        parsed: Result<Command, CommandError>,
    ) -> Result<(), HandlerError> {
        let (label, outcome) = match parsed {
            Ok(command) => {
                let label = command.label();
                let entries = command.entries();
                let stored = if entries.is_empty() {
                    Ok(())
                } else {
                    self.config.upsert_many(DEFAULT_OWNER, &entries).await
                };
                match stored {
                    Ok(()) => {
                        info!(command = label, "operator command applied");
                        (label, Ok(command.confirmation()))
                    }
                    Err(source) => {
                        warn!(command = label, error = %source, "operator command could not be saved");
                        (label, Err(source))
                    }
                }
            }
            Err(err) => {
                info!(command = err.command(), reason = %err.reason(), "malformed operator command");
                ("malformed", Ok(err.reply_text()))
            }
        };
        self.metrics.inc_command(label);

        let text = match &outcome {
            Ok(text) => text.as_str(),
            Err(_) => STORE_FAILED_TEXT,
        };
        let delivered = self
            .replies
            .reply(event.source_id, event.event_id, text)
            .await;

        match (outcome, delivered) {
            (Err(source), delivered) => {
                if let Err(reply_error) = delivered {
                    warn!(command = label, error = %reply_error, "store failure reply not delivered");
                }
                Err(HandlerError::Config {
                    command: label,
                    source,
                })
            }
            (Ok(_), Err(source)) => Err(HandlerError::Reply { source }),
            (Ok(_), Ok(())) => Ok(()),
        }
    }
}
