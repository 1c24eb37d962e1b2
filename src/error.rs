//! Error types for the application

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transmit error: {0}")]
    Transmit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AppError {
    /// Only configuration errors stop the process; everything else costs one tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Config(_))
    }
}
