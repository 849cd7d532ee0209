//! Mystery Round Server
//!
//! Runs the round scheduler, the retention sweeper and the WebSocket
//! gateway against in-process storage.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mystery_round::{
    AppConfig, DrawCategory, InMemoryStore, InMemoryWallet, NewRound, RetentionSweeper,
    RoundEngine, RoundScheduler, SystemClock, VERSION,
    network::RoundServer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = AppConfig::from_env();
    config.validate().context("invalid configuration")?;

    info!("Mystery Round Server v{}", VERSION);
    info!(
        "Rounds last {}h, cooldown {}s, tick every {:?}",
        config.engine.round_duration.num_hours(),
        config.engine.guess_cooldown.num_seconds(),
        config.engine.tick_interval
    );

    let store = Arc::new(InMemoryStore::new());
    let wallet = Arc::new(InMemoryWallet::new());
    let engine = Arc::new(RoundEngine::new(
        store.clone(),
        wallet,
        Arc::new(SystemClock),
        config.engine.clone(),
    ));

    if let Some(secret) = demo_secret() {
        let round = engine
            .create_round(NewRound {
                category: DrawCategory::Mystery,
                secret,
                registration_fee: 500,
                seed_prize: 10_000,
                start_time: engine.now(),
            })
            .await
            .context("failed to seed demo round")?;
        info!("Seeded demo round {} ({} slots)", round.id, round.slot_count);
    }

    let server = RoundServer::new(config.server.clone(), config.auth.clone(), engine.clone());

    let scheduler = RoundScheduler::new(engine.clone()).spawn(server.subscribe_shutdown());
    let sweeper = Arc::new(RetentionSweeper::new(store, config.retention.clone()))
        .run(server.subscribe_shutdown());

    tokio::select! {
        result = server.run() => {
            result.context("gateway stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    for (name, handle) in [("scheduler", scheduler), ("retention sweeper", sweeper)] {
        if let Err(e) = handle.await {
            warn!("{} task ended abnormally: {}", name, e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Secret for a demo round, from `DEMO_SECRET` (space separated).
fn demo_secret() -> Option<Vec<String>> {
    let raw = std::env::var("DEMO_SECRET").ok()?;
    let tokens: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    (!tokens.is_empty()).then_some(tokens)
}
