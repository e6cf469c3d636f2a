use std::sync::Arc;

use breezer_core::config::ConfigBuilder;
use breezer_core::logging;
use breezer_devices::transport::btleplug::BtleplugTransport;
use breezer_devices::{Breezer, Device, Model};

use tracing::info;

/// Usage: btleplug_example <address> <model> [pair]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .with_config_file("breezer.toml")
        .with_environment_prefix("BREEZER")
        .build()?;
    logging::init_from_config(&config.logging)?;

    let mut args = std::env::args().skip(1);
    let address = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("missing device address"))?;
    let model: Model = args.next().unwrap_or_else(|| "S3".to_string()).parse()?;
    let pair = args.next().as_deref() == Some("pair");

    let transport = BtleplugTransport::find(&address).await?;
    let breezer = Breezer::with_config(model, Arc::new(transport), &config);

    if pair {
        info!("Pairing with {}, hold the button on the breezer", address);
        breezer.pair().await?;
    }

    let status = breezer.get(true).await?;
    for (key, value) in &status {
        println!("{:>24}: {}", key, value);
    }
    Ok(())
}
