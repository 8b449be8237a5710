// SPDX-License-Identifier: GPL-3.0-only

//! Depth Viewer - depth sensor session management and false-color viewer
//!
//! This library keeps a depth sensor configured to match what the user
//! asked for, and feeds its depth and color streams through dedicated
//! capture workers into a presentation thread.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Sensor driver boundary, session manager and simulated sensor
//! - [`pipelines`]: Frame conversion and per-stream capture workers
//! - [`viewer`]: Presentation thread, display surfaces and frame rate counter
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! // Stream a simulated sensor through the depth pipeline:
//! // depth-viewer run --stream depth --frames 60
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipelines;
pub mod viewer;

// Re-export commonly used types
pub use backends::sensor::{
    DepthSensor, DesiredConfig, SensorHandle, SensorSessionManager, SessionNotification,
};
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use pipelines::capture::CapturePipeline;
pub use viewer::{Dispatcher, ViewerHost};
