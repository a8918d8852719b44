use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wallet_ledger::{
    bin_utils::Service, config::Config, engine::TransferEngine, miner::NoMiner,
    notify::OutboxNotifier,
};

fn main() -> Result<()> {
    // stdout carries frames, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    let store = config.open_store().with_context(|| {
        format!(
            "Failed to open wallet store at `{}`",
            config.storage_location.display()
        )
    })?;

    let outbox = Arc::new(OutboxNotifier::new());
    let engine = TransferEngine::new(store, Arc::new(NoMiner), outbox.clone())
        .with_lock_stripes(config.lock_stripes);

    info!(
        store = ?config.store,
        location = %config.storage_location.display(),
        stripes = config.lock_stripes,
        "Wallet ledger ready"
    );

    let service = Service {
        input: std::io::stdin().lock(),
        output: &mut std::io::stdout(),
        engine,
        outbox,
        error_printer: Box::new(|line, err| warn!(line, "Malformed frame: {err}")),
    };
    service.run()
}
