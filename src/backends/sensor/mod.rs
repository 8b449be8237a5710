// SPDX-License-Identifier: GPL-3.0-only

//! Depth sensor backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ Application / Viewer │
//! └──────────┬───────────┘
//!            │ setters, status events
//!            ▼
//! ┌──────────────────────┐      ┌─────────────────┐
//! │ SensorSessionManager │ ───▶ │ SessionRegistry │  ← process-wide flags
//! └──────────┬───────────┘      └─────────────────┘
//!            │ reconcile
//!            ▼
//! ┌──────────────────────┐
//! │  DepthSensor trait   │  ← driver boundary
//! └──────────┬───────────┘
//!            ▼
//!   ┌─────────────────┐
//!   │ driver / SimSen │
//!   └─────────────────┘
//! ```

pub mod frames;
pub mod manager;
pub mod motor_control;
pub mod registry;
pub mod simulated;
pub mod types;

pub use frames::*;
pub use manager::{SensorSessionManager, SessionNotification, SessionObserver};
pub use registry::{SessionId, SessionRegistry};
pub use simulated::SimulatedSensor;
pub use types::*;

use crate::errors::SensorResult;
use std::sync::Arc;

/// Driver boundary for one physical depth sensor
///
/// Implementations are shared between the session manager, the capture
/// workers and the elevation task, so every method takes `&self`.
/// `disable_*`, `stop` and `stop_audio` are idempotent and never fail.
pub trait DepthSensor: Send + Sync {
    // ===== Identity & status =====

    /// Stable identifier of the physical device
    ///
    /// May fail while the device is going away.
    fn unique_id(&self) -> SensorResult<String>;

    /// Current connectivity status
    fn status(&self) -> SensorStatus;

    // ===== Run state =====

    fn is_running(&self) -> bool;

    /// Start streaming
    ///
    /// # Returns
    /// * `Err(SensorError::DeviceConflict)` - another process owns the device
    /// * `Err(SensorError::DeviceRemoved)` - the device went away mid-start
    fn start(&self) -> SensorResult<()>;

    fn stop(&self);

    /// Stop the audio source, if the device has one
    fn stop_audio(&self);

    // ===== Elevation =====

    fn elevation_limits(&self) -> ElevationLimits;

    /// Current elevation angle; only readable while running
    fn elevation_angle(&self) -> SensorResult<i32>;

    /// Command the elevation motor; only allowed while running
    fn set_elevation_angle(&self, degrees: i32) -> SensorResult<()>;

    // ===== Color stream =====

    fn enable_color_stream(&self, format: ColorImageFormat) -> SensorResult<()>;
    fn disable_color_stream(&self);
    fn color_stream_enabled(&self) -> bool;

    // ===== Depth stream =====

    fn enable_depth_stream(&self, format: DepthImageFormat) -> SensorResult<()>;
    fn disable_depth_stream(&self);
    fn depth_stream_enabled(&self) -> bool;

    /// Select the depth range; `Near` fails on hardware without near mode
    fn set_depth_range(&self, range: DepthRange) -> SensorResult<()>;

    /// Sentinel codes the depth stream uses for out-of-range readings
    fn depth_thresholds(&self) -> DepthThresholds;

    // ===== Skeleton stream =====

    fn enable_skeleton_stream(&self, smoothing: &SmoothingParameters) -> SensorResult<()>;
    fn set_skeleton_tracking_mode(&self, mode: SkeletonTrackingMode) -> SensorResult<()>;
    fn set_skeleton_tracking_in_near_range(&self, enabled: bool) -> SensorResult<()>;
    fn disable_skeleton_stream(&self);
    fn skeleton_stream_enabled(&self) -> bool;

    // ===== Frame notifications =====

    fn subscribe_depth_frames(&self, listener: FrameListener<DepthImageFrame>) -> SubscriptionId;
    fn subscribe_color_frames(&self, listener: FrameListener<ColorImageFrame>) -> SubscriptionId;

    /// Remove a subscription; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Shared handle to a sensor
pub type SensorHandle = Arc<dyn DepthSensor>;

/// Identity comparison of two sensor handles
pub fn same_sensor(a: &SensorHandle, b: &SensorHandle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Identity comparison of two optional sensor handles
pub fn same_optional_sensor(a: Option<&SensorHandle>, b: Option<&SensorHandle>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => same_sensor(a, b),
        _ => false,
    }
}

/// Human-readable label for logs
pub(crate) fn sensor_label(sensor: Option<&SensorHandle>) -> String {
    match sensor {
        Some(sensor) => sensor
            .unique_id()
            .unwrap_or_else(|_| "<unavailable>".to_string()),
        None => "<none>".to_string(),
    }
}
