use std::sync::Arc;

use breezer_core::config::ConfigBuilder;
use breezer_core::logging;
use breezer_core::types::{Value, ValueMap};
use breezer_devices::{Breezer, Device, DeviceEvent, DummyTransport, Model};

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults, overridable with BREEZER__SESSION__POLL_INTERVAL_MS=... etc.
    let config = ConfigBuilder::new()
        .with_environment_prefix("BREEZER")
        .build()?;
    logging::init_from_config(&config.logging)?;
    breezer_devices::init()?;

    let model: Model = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Lite".to_string())
        .parse()?;

    let dummy = Arc::new(DummyTransport::new("AA:BB:CC:DD:EE:FF", model));
    let breezer = Breezer::with_config(model, dummy.clone(), &config);

    let mut events = breezer.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DeviceEvent::SessionChanged { address, state } => {
                    info!("{} session is now {:?}", address, state)
                }
                DeviceEvent::StatusUpdated { address, status } => {
                    info!("{} reported {} parameters", address, status.len())
                }
            }
        }
    });

    breezer.pair().await?;

    let status = breezer.get(false).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let mut change = ValueMap::new();
    change.insert("fan_speed".into(), Value::from(2));
    change.insert("target_temp".into(), Value::from(18));
    breezer.set(&change).await?;

    info!(
        "Wrote {} frames in {} requests, link is {}",
        dummy.written_frames().len(),
        dummy.requests().len(),
        breezer.connection_status().await
    );
    Ok(())
}
