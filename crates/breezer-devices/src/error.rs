/*!
 * Error types for device operations.
 */
use thiserror::Error;

use breezer_core::error::Error as CoreError;
use breezer_core::utils::{MaxTriesExceeded, RetryableError};

/// Error raised by a transport primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The link dropped or the stack reported an internal failure
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// An operation needed a connected peripheral
    #[error("Not connected")]
    NotConnected,

    /// The peripheral does not expose the characteristic
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// GATT-level failure
    #[error("GATT error: {0}")]
    Gatt(String),

    /// Other error
    #[error("Transport error: {0}")]
    Other(String),
}

impl RetryableError for TransportError {
    fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected(_))
    }
}

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A single transport operation failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A retried operation ran out of attempts
    #[error(transparent)]
    MaxTriesExceeded(#[from] MaxTriesExceeded),

    /// Malformed or out-of-sequence frame
    #[error("Framing error: {0}")]
    Framing(String),

    /// Response too short for the model's field table
    #[error("{model}: response too short, needed index {index} in {} bytes", .raw.len())]
    Decode {
        /// Model whose table was applied
        model: String,
        /// First offset that was out of range
        index: usize,
        /// The offending response
        raw: Vec<u8>,
    },

    /// Pairing failed
    #[error("Pairing failed: {0}")]
    Pair(String),

    /// A parameter value could not be used
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// The model name is not one of the supported models
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;
