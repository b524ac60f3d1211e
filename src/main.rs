use anyhow::Result;
use elspot::clock::SystemClock;
use elspot::driver::{DriverCommand, PriceDriver};
use elspot::market::nordpool::NordPoolClient;
use elspot::storage::FileBlobStore;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = elspot::Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Create driver command channel
    let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<DriverCommand>();

    let market = NordPoolClient::new(&config.market.api_base_url)
        .map_err(|e| anyhow::anyhow!("Failed to create market client: {}", e))?;
    let store = FileBlobStore::new(&config.storage.dir);

    let mut driver = PriceDriver::new(config, market, store, SystemClock, cmd_rx)
        .map_err(|e| anyhow::anyhow!("Failed to create driver: {}", e))?;

    info!(
        "Elspot day-ahead price driver {} starting up",
        env!("APP_VERSION")
    );

    // Log every snapshot change; this is where a display frontend hooks in
    let mut snapshots = driver.subscribe();
    let display_task = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            if snapshot.ok {
                info!(
                    "Price update: points={} current={:.3} {} level={:?}",
                    snapshot.points.len(),
                    snapshot.current.price,
                    snapshot.currency,
                    snapshot.current.level,
                );
            } else {
                info!("Price update: error={}", snapshot.error);
            }
        }
    });

    match driver.run().await {
        Ok(_) => {
            info!("Driver shutdown complete");
            display_task.abort();
            Ok(())
        }
        Err(e) => {
            error!("Driver failed with error: {}", e);
            display_task.abort();
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}
