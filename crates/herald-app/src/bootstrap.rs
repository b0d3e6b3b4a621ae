use std::future::Future;
use std::sync::Arc;

use herald_config::{ConfigFacade, ConfigStore, Settings};
use herald_events::ReplySink;
use herald_telemetry::{
    DEFAULT_LOG_LEVEL, GlobalContextGuard, LogFormat, LoggingConfig, Metrics, init_logging,
};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::commands::CommandRouter;
use crate::consumer::{EventConsumer, EventHandler};
use crate::error::{AppError, AppResult};
use crate::persistence::{PersistenceGateway, PgPersistenceGateway};
use crate::telegram::{TelegramClient, TelegramSource};

/// Dependencies required to bootstrap the Herald service.
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig,
    settings: Settings,
    pool: PgPool,
    metrics: Metrics,
    telegram: TelegramClient,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let settings = Settings::from_env().map_err(AppError::settings)?;
        let logging = logging_config(&settings);

        let pool = herald_data::connect(&settings.database_url, settings.db_max_connections)
            .await
            .map_err(|err| AppError::data("data.connect", err))?;
        herald_data::run_migrations(&pool)
            .await
            .map_err(|err| AppError::data("data.run_migrations", err))?;

        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let telegram = TelegramClient::new(&settings.api_base, &settings.bot_token)
            .map_err(|err| AppError::http("telegram.client", err))?;

        Ok(Self {
            logging,
            settings,
            pool,
            metrics,
            telegram,
        })
    }
}

/// Entry point for the Herald boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction fails or the upstream
/// connection is lost.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env().await?;
    run_app_with(dependencies, shutdown_signal()).await
}

/// Boot sequence that relies entirely on injected dependencies.
pub(crate) async fn run_app_with<F>(dependencies: BootstrapDependencies, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()>,
{
    init_logging(&dependencies.logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("ingest");

    info!("Herald ingestion starting");

    let BootstrapDependencies {
        logging: _,
        settings,
        pool,
        metrics,
        telegram,
    } = dependencies;

    let identity = telegram
        .get_me()
        .await
        .map_err(|err| AppError::upstream("telegram.get_me", err))?;
    info!(bot_id = identity.id, username = ?identity.username, "bot identity verified");
    info!(
        allowed_sources = settings.allow_list.len(),
        permit_all = settings.allow_list.is_empty(),
        control_sources = settings.control_chats.len(),
        "allow-list loaded"
    );

    let config: Arc<dyn ConfigFacade> = Arc::new(ConfigStore::new(pool.clone()));
    let replies: Arc<dyn ReplySink> = Arc::new(telegram.clone());
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(PgPersistenceGateway::new(pool.clone()));
    let router = CommandRouter::new(config, replies, metrics.clone());
    let mut handler =
        EventHandler::new(settings.allow_list, settings.control_chats, gateway, router);
    if let Some(username) = identity.username {
        handler = handler.with_bot_username(username);
    }
    let consumer = EventConsumer::new(handler, metrics.clone());

    let outcome = consumer.run(TelegramSource::new(telegram), shutdown).await;

    log_metrics(&metrics);
    pool.close().await;

    let report = outcome.map_err(|err| AppError::upstream("consumer.run", err))?;
    info!(
        received = report.received,
        joined = report.joined,
        panicked = report.panicked,
        stream_pauses = report.stream_pauses,
        "Herald ingestion stopped"
    );
    Ok(())
}

fn logging_config(settings: &Settings) -> LoggingConfig {
    LoggingConfig {
        level: settings
            .log_level
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        format: settings
            .log_format
            .as_deref()
            .map_or_else(LogFormat::infer, LogFormat::parse),
        ..LoggingConfig::default()
    }
}

fn log_metrics(metrics: &Metrics) {
    let snapshot = metrics.snapshot();
    info!(
        persisted = snapshot.persisted,
        duplicates = snapshot.duplicates,
        filtered = snapshot.filtered,
        commands = snapshot.commands,
        failed = snapshot.failed,
        rate_limited = snapshot.rate_limited,
        backoff_seconds = snapshot.backoff_seconds,
        "ingestion totals"
    );
    match metrics.render() {
        Ok(rendered) => info!(metrics = %rendered, "final metrics"),
        Err(err) => warn!(error = %err, "failed to render metrics"),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal; running until the stream ends");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|name| {
            pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        })
        .expect("settings")
    }

    #[test]
    fn logging_defaults_follow_build_profile() {
        let config = logging_config(&settings(&[
            ("DATABASE_URL", "postgres://localhost/herald"),
            ("TELEGRAM_BOT_TOKEN", "1:a"),
        ]));
        assert_eq!(config.level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.format, LogFormat::infer());
    }

    #[test]
    fn logging_overrides_are_applied() {
        let config = logging_config(&settings(&[
            ("DATABASE_URL", "postgres://localhost/herald"),
            ("TELEGRAM_BOT_TOKEN", "1:a"),
            ("HERALD_LOG_LEVEL", "herald_app=debug"),
            ("HERALD_LOG_FORMAT", "json"),
        ]));
        assert_eq!(config.level, "herald_app=debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn metrics_logging_tolerates_empty_registry() {
        let metrics = Metrics::new().expect("metrics");
        log_metrics(&metrics);
    }
}
