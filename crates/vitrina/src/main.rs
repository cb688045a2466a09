use std::sync::Arc;

use tracing::{info, warn};

use vitrina_core::{
    config::Config,
    display::SnapshotDisplay,
    service::Service,
    storage::JsonFileStorage,
};
use vitrina_telegram::TelegramConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vitrina_core::logging::init("vitrina")?;

    let cfg = Config::load()?;

    let storage = Arc::new(JsonFileStorage::open(&cfg.storage_path).await?);
    info!(
        storage = %storage.path().display(),
        auxiliary = cfg.auxiliary.is_some(),
        "vitrina starting"
    );

    let display = Arc::new(SnapshotDisplay::new(cfg.activity_capacity));
    let snapshot_path = cfg.snapshot_path.clone();
    if let Some(path) = &snapshot_path {
        display.persist_to(path.clone());
    }

    let service = Service::build(cfg, storage, display.clone(), Arc::new(TelegramConnector)).await?;
    let shutdown = service.shutdown_token();
    let mut run = tokio::spawn(service.run());

    tokio::select! {
        res = &mut run => res??,
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => {
                    info!("shutting down");
                    shutdown.cancel();
                }
                Err(e) => {
                    warn!(error = %e, "failed to listen for Ctrl-C, running until the service exits");
                }
            }
            run.await??;
        }
    }

    if let Some(path) = &snapshot_path {
        if let Err(e) = display.write_snapshot(path).await {
            warn!(path = %path.display(), error = %e, "final display snapshot failed");
        }
    }
    Ok(())
}
