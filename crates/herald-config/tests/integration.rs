use herald_config::{
    ConfigFacade, ConfigStore, DEFAULT_OWNER, FilterThresholds, KEY_MIN_LIQ, KEY_MIN_MCAP,
    SpikeSettings,
};
use herald_test_support::postgres::start_postgres;

async fn store_for(url: &str) -> anyhow::Result<ConfigStore> {
    let pool = herald_data::connect(url, 2).await?;
    herald_data::run_migrations(&pool).await?;
    Ok(ConfigStore::new(pool))
}

#[tokio::test]
async fn config_store_is_last_write_wins() -> anyhow::Result<()> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping config_store_is_last_write_wins: {err}");
            return Ok(());
        }
    };
    let store = store_for(postgres.connection_string()).await?;

    store
        .upsert_many(
            DEFAULT_OWNER,
            &FilterThresholds {
                min_mcap: 100,
                min_liq: 50,
            }
            .to_entries(),
        )
        .await?;
    store
        .upsert_many(
            DEFAULT_OWNER,
            &FilterThresholds {
                min_mcap: 200,
                min_liq: 75,
            }
            .to_entries(),
        )
        .await?;

    assert_eq!(
        store.get(DEFAULT_OWNER, KEY_MIN_MCAP).await?.as_deref(),
        Some("200")
    );
    assert_eq!(
        store.get(DEFAULT_OWNER, KEY_MIN_LIQ).await?.as_deref(),
        Some("75")
    );
    assert_eq!(
        store.filter_thresholds(DEFAULT_OWNER).await?,
        Some(FilterThresholds {
            min_mcap: 200,
            min_liq: 75
        })
    );

    let entries = store.entries(DEFAULT_OWNER).await?;
    assert_eq!(entries.len(), 2, "one row per key, no history");
    Ok(())
}

#[tokio::test]
async fn owners_are_isolated_and_missing_keys_read_as_none() -> anyhow::Result<()> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping owners_are_isolated_and_missing_keys_read_as_none: {err}");
            return Ok(());
        }
    };
    let store = store_for(postgres.connection_string()).await?;

    assert_eq!(store.get(DEFAULT_OWNER, "spike_threshold").await?, None);
    assert_eq!(store.spike_settings(DEFAULT_OWNER).await?, None);

    store
        .upsert_many(
            7,
            &SpikeSettings {
                threshold: 10,
                window_secs: 300,
            }
            .to_entries(),
        )
        .await?;
    store.upsert(7, "spike_window_sec", "60").await?;

    assert_eq!(
        store.spike_settings(7).await?,
        Some(SpikeSettings {
            threshold: 10,
            window_secs: 60
        })
    );
    assert!(store.entries(DEFAULT_OWNER).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_batch_leaves_no_partial_settings() -> anyhow::Result<()> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping failed_batch_leaves_no_partial_settings: {err}");
            return Ok(());
        }
    };
    let store = store_for(postgres.connection_string()).await?;

    // Postgres rejects NUL bytes in TEXT, so the second write fails mid-batch.
    let result = store
        .upsert_many(
            DEFAULT_OWNER,
            &[
                (KEY_MIN_MCAP, "100".to_string()),
                (KEY_MIN_LIQ, "bad\0value".to_string()),
            ],
        )
        .await;

    assert!(result.is_err());
    assert_eq!(store.get(DEFAULT_OWNER, KEY_MIN_MCAP).await?, None);
    assert!(store.entries(DEFAULT_OWNER).await?.is_empty());
    Ok(())
}
