/*!
 * Logging functionality for Breezer.
 *
 * This module provides tracing setup and span helpers so that every driver
 * component logs the same way.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system from the `[logging]` configuration section
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    install(&config.level, config.with_target)
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "breezer_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    install(filter, true)
}

fn install(filter: &str, with_target: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(with_target))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a component
///
/// # Arguments
///
/// * `name` - The name of the component
/// * `id` - An optional ID for the component instance (e.g. a device address)
pub fn component_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = %id),
        None => tracing::info_span!("component", name = %name),
    }
}

/// Create a new span for an operation
///
/// # Arguments
///
/// * `name` - The name of the operation
/// * `component` - The component performing the operation
pub fn operation_span(name: &str, component: &str) -> Span {
    tracing::info_span!("operation", name = %name, component = %component)
}
