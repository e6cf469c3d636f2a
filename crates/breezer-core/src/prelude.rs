/*!
 * Prelude module for Breezer Core.
 *
 * This module re-exports commonly used types and functions from the Breezer Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Value, ValueMap};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, FramingConfig, SessionConfig, SharedConfig};

// Re-export retry executor
pub use crate::utils::{with_retry, with_timeout, MaxTriesExceeded, RetryPolicy, RetryableError};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
