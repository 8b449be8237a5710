// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the depth viewer

use crate::backends::sensor::SensorStatus;
use thiserror::Error;

/// Result type alias for device boundary calls
pub type SensorResult<T> = Result<T, SensorError>;

/// Result type alias for capture pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for the binary and config layer
pub type AppResult<T> = Result<T, AppError>;

/// Errors reported by a sensor driver
///
/// All of these are recoverable: the session manager absorbs them and
/// reflects the outcome in its running state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    /// Another process holds exclusive access to the sensor
    #[error("sensor is in use by another application")]
    DeviceConflict,
    /// The sensor handle was invalidated mid-operation
    #[error("sensor was removed")]
    DeviceRemoved,
    /// The requested format, range or mode was rejected by the hardware
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    /// Operation requires a running sensor
    #[error("sensor is not running")]
    NotRunning,
    /// Operation requires a connected sensor
    #[error("sensor is not connected (status: {0})")]
    NotConnected(SensorStatus),
}

/// Converter precondition violations
///
/// These indicate a geometry-tracking bug in the caller and are never
/// recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("buffer invariant violated: {samples} samples need a buffer of {expected}, got {actual}")]
    BufferInvariant {
        samples: usize,
        expected: usize,
        actual: usize,
    },
}

/// Capture pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The worker thread never established its event loop
    #[error("capture worker failed to start: {0}")]
    WorkerStartup(String),
    /// The presentation dispatcher is no longer running
    #[error("presentation dispatcher has shut down")]
    DispatcherShutDown,
    /// A blocking invoke was issued from the dispatcher's own thread
    #[error("blocking invoke from the presentation thread would deadlock")]
    ReentrantInvoke,
    /// The presentation thread panicked
    #[error("presentation dispatcher panicked")]
    DispatcherPanicked,
    /// The worker thread panicked
    #[error("capture worker panicked")]
    WorkerPanicked,
    /// Fatal converter failure on the worker
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no config directory available on this platform")]
    NoConfigDir,
}

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("image export failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Other(String),
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}
