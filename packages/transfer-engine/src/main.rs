//! Transfer Engine binary: wires the ten components together and runs
//! them in one process (spec §5, "each replica runs all ten components
//! in the same process, sharing nothing except the external stores").
//!
//! Grounded on `monitoring-engine/src/main.rs`'s logging-init / config /
//! start / `tokio::select!`-shutdown shape.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use transfer_engine::api::start_api_server;
use transfer_engine::balance::BalanceMutator;
use transfer_engine::bus::{KafkaBus, MessageBus};
use transfer_engine::cache::{Cache, RedisCache};
use transfer_engine::consumers::Consumers;
use transfer_engine::events::EventDispatcher;
use transfer_engine::ledger::{LedgerStore, PostgresLedger};
use transfer_engine::lock::{LeaseStore, RedisLeaseStore};
use transfer_engine::orchestrator::Orchestrator;
use transfer_engine::sweeper::Sweeper;
use transfer_engine::transfer::TransferEngine;
use transfer_engine::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("starting transfer engine");

    let config = AppConfig::load()?;

    let ledger: Arc<dyn LedgerStore> = Arc::new(
        PostgresLedger::connect(&config.database_url, config.database_max_connections).await?,
    );
    let cache: Arc<dyn Cache> = Arc::new(RedisCache::connect(&config.redis_url)?);
    let lock: Arc<dyn LeaseStore> = Arc::new(RedisLeaseStore::connect(&config.redis_url)?);
    let bus: Arc<dyn MessageBus> = Arc::new(
        KafkaBus::connect(
            &config.kafka_brokers,
            &config.request_topic,
            &config.result_topic,
            config.topic_partitions,
        )
        .await?,
    );

    let events = Arc::new(EventDispatcher::new(cache.clone(), bus.clone()));
    let transfer = Arc::new(TransferEngine::new(
        ledger.clone(),
        events.clone(),
        config.cancellation_window_seconds,
    ));
    let balance = Arc::new(BalanceMutator::new(ledger.clone(), events));
    let orchestrator = Arc::new(Orchestrator::new(
        transfer,
        balance,
        ledger.clone(),
        cache.clone(),
        bus.clone(),
    ));

    let sweeper = Sweeper::new(orchestrator.clone(), lock.clone(), config.sweep.clone());
    let consumers = Consumers::connect(
        orchestrator.clone(),
        &config.kafka_brokers,
        &config.request_topic,
        &config.result_topic,
        config.topic_partitions,
        &config.request_consumer,
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_handle = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { sweeper.run(shutdown_rx).await })
    };
    let consumers_handle = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { consumers.run(shutdown_rx).await })
    };

    tracing::info!(bind_address = %config.http_bind_address, "press ctrl+c to stop");
    let api_result = tokio::select! {
        result = start_api_server(orchestrator, ledger, cache, lock, &config.http_bind_address) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    let _ = consumers_handle.await;

    api_result?;
    Ok(())
}
