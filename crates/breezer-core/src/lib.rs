/*!
 * Breezer Core
 *
 * This crate provides the shared foundation of the Breezer driver:
 * configuration, logging, error types, the normalized value mapping and the
 * bounded retry executor used for every transport operation.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use serde;
    pub use tokio;
    pub use tracing;
}

/// Breezer core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("Breezer Core {} initialized", VERSION);
    Ok(())
}
