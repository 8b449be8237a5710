// SPDX-License-Identifier: GPL-3.0-only

//! In-memory sensor for tests and the demo binary
//!
//! Behaves like a real driver at the [`DepthSensor`] boundary: stream state
//! only changes while connected, elevation is only reachable while running,
//! frames are delivered through a single-frame slot. Failure modes (device
//! held by another process, removal during start, unsupported formats, no
//! near mode) can be scripted per instance.

use super::frames::{
    ColorImageFrame, DepthImageFrame, FrameListener, FrameReady, FrameSlot, SubscriptionId,
};
use super::types::*;
use super::DepthSensor;
use crate::constants::{PLAYER_INDEX_BITMASK_WIDTH, depth_sentinels};
use crate::errors::{SensorError, SensorResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, trace};

struct SimState {
    status: SensorStatus,
    running: bool,
    audio_running: bool,
    elevation: i32,
    color_enabled: bool,
    color_format: ColorImageFormat,
    depth_enabled: bool,
    depth_format: DepthImageFormat,
    depth_range: DepthRange,
    skeleton_enabled: bool,
    tracking_mode: SkeletonTrackingMode,
    tracking_in_near_range: bool,
    supports_near_mode: bool,
    held_by_other_process: bool,
    remove_on_next_start: bool,
    fail_next_elevation: bool,
    rejected_color_formats: HashSet<ColorImageFormat>,
    rejected_depth_formats: HashSet<DepthImageFormat>,
    elevation_log: Vec<(Instant, i32)>,
    start_attempts: u32,
    next_subscription: u64,
    depth_listeners: Vec<(SubscriptionId, FrameListener<DepthImageFrame>)>,
    color_listeners: Vec<(SubscriptionId, FrameListener<ColorImageFrame>)>,
    depth_frame_number: u64,
    color_frame_number: u64,
}

/// Scriptable in-memory depth sensor
pub struct SimulatedSensor {
    unique_id: String,
    limits: ElevationLimits,
    state: Mutex<SimState>,
    depth_slot: Arc<FrameSlot<DepthImageFrame>>,
    color_slot: Arc<FrameSlot<ColorImageFrame>>,
}

impl SimulatedSensor {
    /// Create a connected, stopped sensor
    pub fn new(unique_id: &str) -> Self {
        Self::with_limits(unique_id, ElevationLimits::default())
    }

    pub fn with_limits(unique_id: &str, limits: ElevationLimits) -> Self {
        Self {
            unique_id: unique_id.to_string(),
            limits,
            state: Mutex::new(SimState {
                status: SensorStatus::Connected,
                running: false,
                audio_running: false,
                elevation: 0,
                color_enabled: false,
                color_format: ColorImageFormat::Undefined,
                depth_enabled: false,
                depth_format: DepthImageFormat::Undefined,
                depth_range: DepthRange::Default,
                skeleton_enabled: false,
                tracking_mode: SkeletonTrackingMode::Default,
                tracking_in_near_range: false,
                supports_near_mode: true,
                held_by_other_process: false,
                remove_on_next_start: false,
                fail_next_elevation: false,
                rejected_color_formats: HashSet::new(),
                rejected_depth_formats: HashSet::new(),
                elevation_log: Vec::new(),
                start_attempts: 0,
                next_subscription: 1,
                depth_listeners: Vec::new(),
                color_listeners: Vec::new(),
                depth_frame_number: 0,
                color_frame_number: 0,
            }),
            depth_slot: Arc::new(FrameSlot::new()),
            color_slot: Arc::new(FrameSlot::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===== Scripting =====

    /// Simulate a hot status change (unplug, power loss, replug)
    pub fn set_status(&self, status: SensorStatus) {
        let mut state = self.state();
        debug!(sensor = %self.unique_id, from = %state.status, to = %status, "Simulated status change");
        state.status = status;
        if status != SensorStatus::Connected {
            state.running = false;
            state.audio_running = false;
            self.depth_slot.clear();
            self.color_slot.clear();
        }
    }

    /// While set, `start` fails with `DeviceConflict`
    pub fn set_held_by_other_process(&self, held: bool) {
        self.state().held_by_other_process = held;
    }

    /// Make the next `start` fail with `DeviceRemoved`
    pub fn remove_during_next_start(&self) {
        self.state().remove_on_next_start = true;
    }

    /// Make the next elevation command on a running sensor fail with `DeviceRemoved`
    pub fn fail_next_elevation_command(&self) {
        self.state().fail_next_elevation = true;
    }

    pub fn set_supports_near_mode(&self, supported: bool) {
        self.state().supports_near_mode = supported;
    }

    pub fn reject_color_format(&self, format: ColorImageFormat) {
        self.state().rejected_color_formats.insert(format);
    }

    pub fn reject_depth_format(&self, format: DepthImageFormat) {
        self.state().rejected_depth_formats.insert(format);
    }

    /// Physical mounting angle reported once the sensor runs
    pub fn set_physical_elevation(&self, degrees: i32) {
        self.state().elevation = self.limits.clamp(degrees);
    }

    // ===== Inspection =====

    pub fn elevation_commands(&self) -> Vec<i32> {
        self.state().elevation_log.iter().map(|(_, angle)| *angle).collect()
    }

    pub fn elevation_command_times(&self) -> Vec<Instant> {
        self.state().elevation_log.iter().map(|(at, _)| *at).collect()
    }

    pub fn start_attempts(&self) -> u32 {
        self.state().start_attempts
    }

    pub fn color_format(&self) -> ColorImageFormat {
        self.state().color_format
    }

    pub fn depth_format(&self) -> DepthImageFormat {
        self.state().depth_format
    }

    pub fn depth_range(&self) -> DepthRange {
        self.state().depth_range
    }

    pub fn skeleton_tracking_mode(&self) -> SkeletonTrackingMode {
        self.state().tracking_mode
    }

    pub fn skeleton_tracking_in_near_range(&self) -> bool {
        self.state().tracking_in_near_range
    }

    pub fn audio_running(&self) -> bool {
        self.state().audio_running
    }

    pub fn depth_subscriber_count(&self) -> usize {
        self.state().depth_listeners.len()
    }

    pub fn color_subscriber_count(&self) -> usize {
        self.state().color_listeners.len()
    }

    // ===== Frame emission =====

    /// Publish a depth frame in the current depth format
    ///
    /// Returns false when nothing was delivered (not running or stream off).
    /// The sample count is not validated, so tests can feed malformed frames.
    pub fn emit_depth_frame(&self, pixels: Vec<u16>) -> bool {
        let (ready, listeners) = {
            let mut state = self.state();
            if !state.running || !state.depth_enabled {
                return false;
            }
            state.depth_frame_number += 1;
            let (width, height) = state.depth_format.dimensions();
            let frame = DepthImageFrame {
                width,
                height,
                format: state.depth_format,
                frame_number: state.depth_frame_number,
                pixels: Arc::from(pixels),
            };
            let ready = self.depth_slot.publish(state.depth_frame_number, frame);
            let listeners: Vec<_> = state
                .depth_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (ready, listeners)
        };

        trace!(sensor = %self.unique_id, frame = ready.sequence(), "Depth frame ready");
        notify(&listeners, ready);
        true
    }

    /// Publish a generated depth frame in the current depth format
    pub fn emit_synthetic_depth_frame(&self) -> bool {
        let (format, frame_number) = {
            let state = self.state();
            (state.depth_format, state.depth_frame_number + 1)
        };
        self.emit_depth_frame(synthetic_depth_pixels(format, frame_number))
    }

    /// Publish a color frame in the current color format
    pub fn emit_color_frame(&self, pixels: Vec<u8>) -> bool {
        let (ready, listeners) = {
            let mut state = self.state();
            if !state.running || !state.color_enabled {
                return false;
            }
            state.color_frame_number += 1;
            let (width, height) = state.color_format.dimensions();
            let frame = ColorImageFrame {
                width,
                height,
                format: state.color_format,
                frame_number: state.color_frame_number,
                pixels: Arc::from(pixels),
            };
            let ready = self.color_slot.publish(state.color_frame_number, frame);
            let listeners: Vec<_> = state
                .color_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (ready, listeners)
        };

        trace!(sensor = %self.unique_id, frame = ready.sequence(), "Color frame ready");
        notify(&listeners, ready);
        true
    }

    /// Publish a generated color frame in the current color format
    pub fn emit_synthetic_color_frame(&self) -> bool {
        let (format, frame_number) = {
            let state = self.state();
            (state.color_format, state.color_frame_number + 1)
        };
        self.emit_color_frame(synthetic_color_pixels(format, frame_number))
    }

    fn ensure_connected(state: &SimState) -> SensorResult<()> {
        if state.status == SensorStatus::Connected {
            Ok(())
        } else {
            Err(SensorError::DeviceRemoved)
        }
    }
}

fn notify<F: Clone>(listeners: &[FrameListener<F>], ready: FrameReady<F>) {
    for listener in listeners {
        listener(ready.clone());
    }
}

impl DepthSensor for SimulatedSensor {
    fn unique_id(&self) -> SensorResult<String> {
        Ok(self.unique_id.clone())
    }

    fn status(&self) -> SensorStatus {
        self.state().status
    }

    fn is_running(&self) -> bool {
        self.state().running
    }

    fn start(&self) -> SensorResult<()> {
        let mut state = self.state();
        state.start_attempts += 1;
        Self::ensure_connected(&state)?;
        if state.running {
            return Ok(());
        }
        if state.held_by_other_process {
            return Err(SensorError::DeviceConflict);
        }
        if state.remove_on_next_start {
            state.remove_on_next_start = false;
            return Err(SensorError::DeviceRemoved);
        }
        state.running = true;
        state.audio_running = true;
        debug!(sensor = %self.unique_id, "Simulated sensor started");
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state();
        if state.running {
            debug!(sensor = %self.unique_id, "Simulated sensor stopped");
        }
        state.running = false;
        self.depth_slot.clear();
        self.color_slot.clear();
    }

    fn stop_audio(&self) {
        self.state().audio_running = false;
    }

    fn elevation_limits(&self) -> ElevationLimits {
        self.limits
    }

    fn elevation_angle(&self) -> SensorResult<i32> {
        let state = self.state();
        Self::ensure_connected(&state)?;
        if !state.running {
            return Err(SensorError::NotRunning);
        }
        Ok(state.elevation)
    }

    fn set_elevation_angle(&self, degrees: i32) -> SensorResult<()> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        if !state.running {
            return Err(SensorError::NotRunning);
        }
        if std::mem::take(&mut state.fail_next_elevation) {
            debug!(sensor = %self.unique_id, degrees, "Simulated motor fault");
            return Err(SensorError::DeviceRemoved);
        }
        let degrees = self.limits.clamp(degrees);
        state.elevation = degrees;
        state.elevation_log.push((Instant::now(), degrees));
        Ok(())
    }

    fn enable_color_stream(&self, format: ColorImageFormat) -> SensorResult<()> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        if format == ColorImageFormat::Undefined || state.rejected_color_formats.contains(&format) {
            return Err(SensorError::UnsupportedConfiguration(format.to_string()));
        }
        if state.color_format != format {
            self.color_slot.clear();
        }
        state.color_enabled = true;
        state.color_format = format;
        Ok(())
    }

    fn disable_color_stream(&self) {
        self.state().color_enabled = false;
        self.color_slot.clear();
    }

    fn color_stream_enabled(&self) -> bool {
        self.state().color_enabled
    }

    fn enable_depth_stream(&self, format: DepthImageFormat) -> SensorResult<()> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        if format == DepthImageFormat::Undefined || state.rejected_depth_formats.contains(&format) {
            return Err(SensorError::UnsupportedConfiguration(format.to_string()));
        }
        if state.depth_format != format {
            self.depth_slot.clear();
        }
        state.depth_enabled = true;
        state.depth_format = format;
        Ok(())
    }

    fn disable_depth_stream(&self) {
        self.state().depth_enabled = false;
        self.depth_slot.clear();
    }

    fn depth_stream_enabled(&self) -> bool {
        self.state().depth_enabled
    }

    fn set_depth_range(&self, range: DepthRange) -> SensorResult<()> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        if range == DepthRange::Near && !state.supports_near_mode {
            return Err(SensorError::UnsupportedConfiguration(
                "near mode not supported".to_string(),
            ));
        }
        state.depth_range = range;
        Ok(())
    }

    fn depth_thresholds(&self) -> DepthThresholds {
        DepthThresholds::default()
    }

    fn enable_skeleton_stream(&self, _smoothing: &SmoothingParameters) -> SensorResult<()> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        state.skeleton_enabled = true;
        Ok(())
    }

    fn set_skeleton_tracking_mode(&self, mode: SkeletonTrackingMode) -> SensorResult<()> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        state.tracking_mode = mode;
        Ok(())
    }

    fn set_skeleton_tracking_in_near_range(&self, enabled: bool) -> SensorResult<()> {
        let mut state = self.state();
        Self::ensure_connected(&state)?;
        state.tracking_in_near_range = enabled;
        Ok(())
    }

    fn disable_skeleton_stream(&self) {
        self.state().skeleton_enabled = false;
    }

    fn skeleton_stream_enabled(&self) -> bool {
        self.state().skeleton_enabled
    }

    fn subscribe_depth_frames(&self, listener: FrameListener<DepthImageFrame>) -> SubscriptionId {
        let mut state = self.state();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.depth_listeners.push((id, listener));
        id
    }

    fn subscribe_color_frames(&self, listener: FrameListener<ColorImageFrame>) -> SubscriptionId {
        let mut state = self.state();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.color_listeners.push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state();
        state.depth_listeners.retain(|(sub, _)| *sub != id);
        state.color_listeners.retain(|(sub, _)| *sub != id);
    }
}

/// Generated depth scene: a far-to-near ramp with a player blob moving
/// across it and sentinel readings along the borders
pub fn synthetic_depth_pixels(format: DepthImageFormat, frame_number: u64) -> Vec<u16> {
    let (width, height) = format.dimensions();
    let (width, height) = (width as usize, height as usize);
    let mut pixels = Vec::with_capacity(width * height);
    if width == 0 || height == 0 {
        return pixels;
    }

    let blob_x = (frame_number as usize * 4) % width;
    let blob_y = height / 2;
    let radius = (height / 6).max(1);

    for y in 0..height {
        for x in 0..width {
            let sample = if y == 0 {
                depth_sentinels::TOO_NEAR << PLAYER_INDEX_BITMASK_WIDTH
            } else if y == height - 1 {
                depth_sentinels::TOO_FAR << PLAYER_INDEX_BITMASK_WIDTH
            } else if x == 0 {
                depth_sentinels::UNKNOWN << PLAYER_INDEX_BITMASK_WIDTH
            } else {
                let depth = 800 + (x * 3200 / width) as u16;
                let dx = x.abs_diff(blob_x);
                let dy = y.abs_diff(blob_y);
                let player = if dx * dx + dy * dy <= radius * radius {
                    1 + (frame_number % 7) as u16
                } else {
                    0
                };
                (depth << PLAYER_INDEX_BITMASK_WIDTH) | player
            };
            pixels.push(sample);
        }
    }
    pixels
}

/// Generated color scene in the format's native byte layout
pub fn synthetic_color_pixels(format: ColorImageFormat, frame_number: u64) -> Vec<u8> {
    let (width, height) = format.dimensions();
    let (width, height) = (width as usize, height as usize);
    let bytes_per_pixel = format.bytes_per_pixel();
    let mut pixels = vec![0u8; width * height * bytes_per_pixel];
    let shift = frame_number as usize;

    for y in 0..height {
        for x in 0..width {
            let value = ((x + y + shift) % 256) as u8;
            let offset = (y * width + x) * bytes_per_pixel;
            match bytes_per_pixel {
                4 => {
                    pixels[offset] = value;
                    pixels[offset + 1] = (y % 256) as u8;
                    pixels[offset + 2] = 255 - value;
                }
                2 => {
                    pixels[offset] = value;
                    pixels[offset + 1] = 128;
                }
                1 => pixels[offset] = value,
                _ => {}
            }
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_start_outcomes() {
        let sensor = SimulatedSensor::new("sim-0");
        sensor.set_held_by_other_process(true);
        assert_eq!(sensor.start(), Err(SensorError::DeviceConflict));
        sensor.set_held_by_other_process(false);

        sensor.remove_during_next_start();
        assert_eq!(sensor.start(), Err(SensorError::DeviceRemoved));
        assert!(!sensor.is_running());

        assert_eq!(sensor.start(), Ok(()));
        assert!(sensor.is_running());
        assert_eq!(sensor.start_attempts(), 3);
    }

    #[test]
    fn test_elevation_requires_running() {
        let sensor = SimulatedSensor::new("sim-0");
        assert_eq!(sensor.set_elevation_angle(5), Err(SensorError::NotRunning));
        sensor.start().unwrap();
        sensor.set_elevation_angle(50).unwrap();
        assert_eq!(sensor.elevation_angle(), Ok(27));
        assert_eq!(sensor.elevation_commands(), vec![27]);
    }

    #[test]
    fn test_frames_only_delivered_while_streaming() {
        let sensor = SimulatedSensor::new("sim-0");
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        let id = sensor.subscribe_depth_frames(Arc::new(move |ready: FrameReady<DepthImageFrame>| {
            if ready.open().is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        assert!(!sensor.emit_synthetic_depth_frame());

        sensor.enable_depth_stream(DepthImageFormat::Resolution80x60Fps30).unwrap();
        sensor.start().unwrap();
        assert!(sensor.emit_synthetic_depth_frame());
        assert_eq!(received.load(Ordering::SeqCst), 1);

        sensor.unsubscribe(id);
        assert!(sensor.emit_synthetic_depth_frame());
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_stops_sensor() {
        let sensor = SimulatedSensor::new("sim-0");
        sensor.start().unwrap();
        sensor.set_status(SensorStatus::Disconnected);
        assert!(!sensor.is_running());
        assert_eq!(
            sensor.enable_depth_stream(DepthImageFormat::Resolution640x480Fps30),
            Err(SensorError::DeviceRemoved)
        );
    }

    #[test]
    fn test_synthetic_depth_has_sentinels_and_players() {
        let pixels = synthetic_depth_pixels(DepthImageFormat::Resolution80x60Fps30, 3);
        assert_eq!(pixels.len(), 80 * 60);
        assert_eq!(pixels[0] >> PLAYER_INDEX_BITMASK_WIDTH, depth_sentinels::TOO_NEAR);
        assert_eq!(
            pixels[80 * 59] >> PLAYER_INDEX_BITMASK_WIDTH,
            depth_sentinels::TOO_FAR
        );
        assert!(pixels.iter().any(|p| p & 0x7 != 0));
    }
}
