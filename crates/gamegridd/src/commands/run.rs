use tracing::{error, info};

use crate::app::App;

/// Probe every registered node until interrupted.
///
/// The monitor set is resynced with the registry once per probe interval,
/// picking up nodes added or removed since startup.
pub async fn run(app: App) -> anyhow::Result<()> {
    info!(interval = ?app.health_interval, "GameGrid control plane running");
    app.monitor.sync_with_registry().await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut resync = tokio::time::interval(app.health_interval);
    // The first tick fires immediately; the initial sync above covers it.
    resync.tick().await;

    loop {
        tokio::select! {
            _ = resync.tick() => {
                if let Err(e) = app.monitor.sync_with_registry().await {
                    error!(error = %e, "monitor resync failed");
                }
            }
            signal = &mut shutdown => {
                signal?;
                info!("shutdown signal received");
                break;
            }
        }
    }

    app.shutdown().await;
    Ok(())
}
