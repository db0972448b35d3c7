use anyhow::Result;
use tarifa::coordinator::{Coordinator, CoordinatorCommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Create coordinator command channel
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<CoordinatorCommand>();

    // Initialize the engine with command receiver
    let mut coordinator = Coordinator::new(cmd_rx, cmd_tx.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create price engine: {}", e))?;

    info!("Tarifa PVPC price engine {} starting up", tarifa::APP_VERSION);

    // Translate Ctrl-C into a shutdown signal for the run loop
    let shutdown = coordinator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if shutdown.send(()).is_err() {
                warn!("Run loop already stopped");
            }
        } else {
            error!("Failed to listen for shutdown signal");
        }
    });

    match coordinator.run().await {
        Ok(_) => {
            info!("Price engine shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Price engine failed with error: {}", e);
            Err(anyhow::anyhow!("Engine error: {}", e))
        }
    }
}
