// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the depth sensor boundary and session state

use crate::constants::{DEFAULT_MAX_ELEVATION_ANGLE, DEFAULT_MIN_ELEVATION_ANGLE, depth_sentinels};
use serde::{Deserialize, Serialize};

/// Connectivity status reported by a sensor driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorStatus {
    #[default]
    Undefined,
    Connected,
    Disconnected,
    DeviceNotGenuine,
    DeviceNotSupported,
    InsufficientBandwidth,
    NotPowered,
    NotReady,
    Error,
}

impl SensorStatus {
    pub fn is_connected(self) -> bool {
        self == SensorStatus::Connected
    }
}

impl std::fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SensorStatus::Undefined => "undefined",
            SensorStatus::Connected => "connected",
            SensorStatus::Disconnected => "disconnected",
            SensorStatus::DeviceNotGenuine => "not genuine",
            SensorStatus::DeviceNotSupported => "not supported",
            SensorStatus::InsufficientBandwidth => "insufficient bandwidth",
            SensorStatus::NotPowered => "not powered",
            SensorStatus::NotReady => "not ready",
            SensorStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Color stream formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorImageFormat {
    Undefined,
    #[default]
    RgbResolution640x480Fps30,
    RgbResolution1280x960Fps12,
    YuvResolution640x480Fps15,
    /// UYVY 4:2:2, 2 bytes per pixel
    RawYuvResolution640x480Fps15,
    /// 16-bit infrared intensity
    InfraredResolution640x480Fps30,
    /// GRBG Bayer mosaic, 1 byte per pixel
    RawBayerResolution640x480Fps30,
    RawBayerResolution1280x960Fps12,
}

impl ColorImageFormat {
    pub const ALL: [ColorImageFormat; 7] = [
        ColorImageFormat::RgbResolution640x480Fps30,
        ColorImageFormat::RgbResolution1280x960Fps12,
        ColorImageFormat::YuvResolution640x480Fps15,
        ColorImageFormat::RawYuvResolution640x480Fps15,
        ColorImageFormat::InfraredResolution640x480Fps30,
        ColorImageFormat::RawBayerResolution640x480Fps30,
        ColorImageFormat::RawBayerResolution1280x960Fps12,
    ];

    /// Frame dimensions as (width, height); (0, 0) for `Undefined`
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ColorImageFormat::Undefined => (0, 0),
            ColorImageFormat::RgbResolution1280x960Fps12
            | ColorImageFormat::RawBayerResolution1280x960Fps12 => (1280, 960),
            _ => (640, 480),
        }
    }

    pub fn frames_per_second(self) -> u32 {
        match self {
            ColorImageFormat::Undefined => 0,
            ColorImageFormat::RgbResolution1280x960Fps12
            | ColorImageFormat::RawBayerResolution1280x960Fps12 => 12,
            ColorImageFormat::YuvResolution640x480Fps15
            | ColorImageFormat::RawYuvResolution640x480Fps15 => 15,
            _ => 30,
        }
    }

    /// Bytes per pixel of the data the driver delivers for this format
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorImageFormat::Undefined => 0,
            ColorImageFormat::RawYuvResolution640x480Fps15
            | ColorImageFormat::InfraredResolution640x480Fps30 => 2,
            ColorImageFormat::RawBayerResolution640x480Fps30
            | ColorImageFormat::RawBayerResolution1280x960Fps12 => 1,
            _ => 4,
        }
    }
}

impl std::fmt::Display for ColorImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (width, height) = self.dimensions();
        let kind = match self {
            ColorImageFormat::Undefined => return f.write_str("undefined"),
            ColorImageFormat::RgbResolution640x480Fps30
            | ColorImageFormat::RgbResolution1280x960Fps12 => "RGB",
            ColorImageFormat::YuvResolution640x480Fps15 => "YUV",
            ColorImageFormat::RawYuvResolution640x480Fps15 => "Raw YUV",
            ColorImageFormat::InfraredResolution640x480Fps30 => "Infrared",
            ColorImageFormat::RawBayerResolution640x480Fps30
            | ColorImageFormat::RawBayerResolution1280x960Fps12 => "Raw Bayer",
        };
        write!(f, "{} {}x{} @ {}fps", kind, width, height, self.frames_per_second())
    }
}

/// Depth stream formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DepthImageFormat {
    Undefined,
    #[default]
    Resolution640x480Fps30,
    Resolution320x240Fps30,
    Resolution80x60Fps30,
}

impl DepthImageFormat {
    pub const ALL: [DepthImageFormat; 3] = [
        DepthImageFormat::Resolution640x480Fps30,
        DepthImageFormat::Resolution320x240Fps30,
        DepthImageFormat::Resolution80x60Fps30,
    ];

    /// Frame dimensions as (width, height); (0, 0) for `Undefined`
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            DepthImageFormat::Undefined => (0, 0),
            DepthImageFormat::Resolution640x480Fps30 => (640, 480),
            DepthImageFormat::Resolution320x240Fps30 => (320, 240),
            DepthImageFormat::Resolution80x60Fps30 => (80, 60),
        }
    }

    pub fn pixel_count(self) -> usize {
        let (width, height) = self.dimensions();
        width as usize * height as usize
    }
}

impl std::fmt::Display for DepthImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepthImageFormat::Undefined => f.write_str("undefined"),
            _ => {
                let (width, height) = self.dimensions();
                write!(f, "Depth {}x{} @ 30fps", width, height)
            }
        }
    }
}

/// Depth measurement range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DepthRange {
    #[default]
    Default,
    Near,
}

/// Skeleton tracking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SkeletonTrackingMode {
    #[default]
    Default,
    /// Upper body only
    Seated,
}

/// Joint smoothing filter parameters for the skeleton engine
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SmoothingParameters {
    pub smoothing: f32,
    pub correction: f32,
    pub prediction: f32,
    pub jitter_radius: f32,
    pub max_deviation_radius: f32,
}

/// Sentinel depth codes of a depth stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthThresholds {
    pub too_near: u16,
    pub too_far: u16,
    pub unknown: u16,
}

impl Default for DepthThresholds {
    fn default() -> Self {
        Self {
            too_near: depth_sentinels::TOO_NEAR,
            too_far: depth_sentinels::TOO_FAR,
            unknown: depth_sentinels::UNKNOWN,
        }
    }
}

/// Elevation motor limits in degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElevationLimits {
    pub min: i32,
    pub max: i32,
}

impl ElevationLimits {
    pub fn clamp(&self, degrees: i32) -> i32 {
        degrees.clamp(self.min, self.max)
    }
}

impl Default for ElevationLimits {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_ELEVATION_ANGLE,
            max: DEFAULT_MAX_ELEVATION_ANGLE,
        }
    }
}

/// Target sensor configuration owned by the application
///
/// Mutate through the session manager setters so every change is coerced
/// and reconciled against the hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesiredConfig {
    pub sensor_enabled: bool,
    pub color_stream_enabled: bool,
    pub color_format: ColorImageFormat,
    pub depth_stream_enabled: bool,
    pub depth_format: DepthImageFormat,
    pub depth_range: DepthRange,
    pub skeleton_stream_enabled: bool,
    pub skeleton_tracking_mode: SkeletonTrackingMode,
    pub skeleton_tracking_in_near_range: bool,
    pub smoothing_parameters: SmoothingParameters,
    pub elevation_angle: i32,
}

impl Default for DesiredConfig {
    fn default() -> Self {
        Self {
            sensor_enabled: true,
            color_stream_enabled: true,
            color_format: ColorImageFormat::default(),
            depth_stream_enabled: true,
            depth_format: DepthImageFormat::default(),
            depth_range: DepthRange::Default,
            skeleton_stream_enabled: false,
            skeleton_tracking_mode: SkeletonTrackingMode::Default,
            skeleton_tracking_in_near_range: true,
            smoothing_parameters: SmoothingParameters::default(),
            elevation_angle: 0,
        }
    }
}

/// Derived, read-only session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunningState {
    pub is_running: bool,
    pub has_app_conflict: bool,
    pub last_known_tilt: i32,
}

/// What a UI should show for the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorAvailability {
    NoSensor,
    NotConnected(SensorStatus),
    InUseByAnotherApp,
    Stopped,
    Running,
}

impl std::fmt::Display for SensorAvailability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorAvailability::NoSensor => f.write_str("no sensor"),
            SensorAvailability::NotConnected(status) => write!(f, "not connected ({})", status),
            SensorAvailability::InUseByAnotherApp => f.write_str("in use by another application"),
            SensorAvailability::Stopped => f.write_str("stopped"),
            SensorAvailability::Running => f.write_str("running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_limits_clamp() {
        let limits = ElevationLimits::default();
        assert_eq!(limits.clamp(40), 27);
        assert_eq!(limits.clamp(-40), -27);
        assert_eq!(limits.clamp(5), 5);
    }

    #[test]
    fn test_format_geometry() {
        assert_eq!(DepthImageFormat::Resolution320x240Fps30.pixel_count(), 320 * 240);
        assert_eq!(ColorImageFormat::RawBayerResolution1280x960Fps12.dimensions(), (1280, 960));
        assert_eq!(ColorImageFormat::RawYuvResolution640x480Fps15.bytes_per_pixel(), 2);
    }

    #[test]
    fn test_desired_config_partial_json() {
        let config: DesiredConfig =
            serde_json::from_str(r#"{"elevation_angle": 10, "depth_range": "Near"}"#).unwrap();
        assert_eq!(config.elevation_angle, 10);
        assert_eq!(config.depth_range, DepthRange::Near);
        assert!(config.sensor_enabled);
    }
}
