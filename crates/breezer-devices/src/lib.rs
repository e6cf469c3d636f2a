/*!
 * Breezer Devices
 *
 * This crate drives Tion breezers (S3, Lite, S4) over Bluetooth Low Energy:
 * frame segmentation, the connection session, per-model command tables and
 * the [`Breezer`] facade. The BLE stack itself sits behind the
 * [`transport::Transport`] trait.
 */

#![warn(missing_docs)]

// Re-export core types
pub use breezer_core::prelude;

pub mod device;
pub mod error;
pub mod event;
pub mod frame;
pub mod models;
pub mod session;
pub mod transport;

pub use device::{Breezer, Device, DeviceInfo};
pub use error::{DeviceError, Result, TransportError};
pub use event::DeviceEvent;
pub use models::{BreezerState, Mode, Model, Settings};
pub use session::{Session, SessionState};
pub use transport::dummy::DummyTransport;
pub use transport::Transport;

/// Breezer devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device layer
pub fn init() -> std::result::Result<(), breezer_core::error::Error> {
    tracing::info!(
        "Breezer Devices {} initialized, models: {}",
        VERSION,
        supported_models().join(", ")
    );
    Ok(())
}

/// Names of the supported models
pub fn supported_models() -> Vec<&'static str> {
    Model::ALL.iter().map(Model::name).collect()
}

/// Names of the compiled-in transports
pub fn available_transports() -> Vec<&'static str> {
    let mut transports = vec!["dummy"];

    #[cfg(feature = "btleplug")]
    transports.push("btleplug");

    transports
}
