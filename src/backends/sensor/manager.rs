// SPDX-License-Identifier: GPL-3.0-only

//! Sensor session lifecycle manager
//!
//! The manager owns one sensor handle, the desired configuration and the
//! derived running state. Every setter follows the same shape: coerce the
//! value, compare it with the stored one, reconcile the affected part of the
//! hardware state, then notify observers.
//!
//! Reconciliation never propagates recoverable sensor errors. Conflicts,
//! removals and unsupported settings are absorbed and reflected in
//! [`RunningState`] and [`DesiredConfig`].
//!
//! The manager is single-owner: all mutation happens on the thread that holds
//! it. The only background work is elevation convergence, whose completion is
//! handled by [`SensorSessionManager::process_pending_events`].

use super::motor_control::{ElevationControl, ElevationTaskOutcome};
use super::registry::{SessionEntry, SessionId, SessionRegistry};
use super::types::*;
use super::{SensorHandle, same_optional_sensor, sensor_label};
use crate::errors::SensorError;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Change notifications fired by the session manager
#[derive(Clone)]
pub enum SessionNotification {
    SensorChanged {
        old: Option<SensorHandle>,
        new: Option<SensorHandle>,
    },
    StatusChanged {
        old: SensorStatus,
        new: SensorStatus,
    },
    RunningStateChanged {
        was_running: bool,
        is_running: bool,
    },
    AppConflictChanged {
        old: bool,
        new: bool,
    },
    /// Changing the skeleton engine on a running sensor resets its audio
    /// stream; audio consumers must rearm.
    AudioResetBySkeletonEngine,
}

impl std::fmt::Debug for SessionNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SensorChanged { old, new } => f
                .debug_struct("SensorChanged")
                .field("old", &sensor_label(old.as_ref()))
                .field("new", &sensor_label(new.as_ref()))
                .finish(),
            Self::StatusChanged { old, new } => f
                .debug_struct("StatusChanged")
                .field("old", old)
                .field("new", new)
                .finish(),
            Self::RunningStateChanged {
                was_running,
                is_running,
            } => f
                .debug_struct("RunningStateChanged")
                .field("was_running", was_running)
                .field("is_running", is_running)
                .finish(),
            Self::AppConflictChanged { old, new } => f
                .debug_struct("AppConflictChanged")
                .field("old", old)
                .field("new", new)
                .finish(),
            Self::AudioResetBySkeletonEngine => f.write_str("AudioResetBySkeletonEngine"),
        }
    }
}

/// Observer callback registered with [`SensorSessionManager::subscribe`]
pub type SessionObserver = Box<dyn FnMut(&SessionNotification) + Send>;

/// Session state machine over one sensor handle
pub struct SensorSessionManager {
    id: SessionId,
    registry: SessionRegistry,
    sensor: Option<SensorHandle>,
    status: SensorStatus,
    unique_id: Option<String>,
    config: DesiredConfig,
    app_conflict: bool,
    elevation: ElevationControl,
    observers: Vec<SessionObserver>,
}

impl SensorSessionManager {
    /// Create a session registered with the process-wide registry
    pub fn new(config: DesiredConfig) -> Self {
        Self::with_registry(config, SessionRegistry::global().clone())
    }

    /// Create a session registered with a specific registry
    pub fn with_registry(config: DesiredConfig, registry: SessionRegistry) -> Self {
        let id = registry.register();
        let mut config = config;
        config.elevation_angle = ElevationLimits::default().clamp(config.elevation_angle);
        config.skeleton_stream_enabled =
            config.skeleton_stream_enabled && !registry.skeleton_engine_active_elsewhere(id);

        info!(session = %id, "Creating sensor session manager");

        Self {
            id,
            registry,
            sensor: None,
            status: SensorStatus::Undefined,
            unique_id: None,
            config,
            app_conflict: false,
            elevation: ElevationControl::new(),
            observers: Vec::new(),
        }
    }

    /// Override the settle interval between elevation commands
    pub fn with_elevation_interval(mut self, interval: Duration) -> Self {
        self.elevation = ElevationControl::with_interval(interval);
        self
    }

    /// Register an observer for change notifications
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(&SessionNotification) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    // ===== Accessors =====

    pub fn session_id(&self) -> SessionId {
        self.id
    }

    pub fn sensor(&self) -> Option<&SensorHandle> {
        self.sensor.as_ref()
    }

    pub fn status(&self) -> SensorStatus {
        self.status
    }

    /// Unique id of the attached sensor, if it could be read
    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    pub fn config(&self) -> &DesiredConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.sensor.as_ref().is_some_and(|sensor| sensor.is_running())
    }

    pub fn has_app_conflict(&self) -> bool {
        self.app_conflict
    }

    pub fn running_state(&self) -> RunningState {
        RunningState {
            is_running: self.is_running(),
            has_app_conflict: self.app_conflict,
            last_known_tilt: self.config.elevation_angle,
        }
    }

    /// Summary suitable for a status line
    pub fn availability(&self) -> SensorAvailability {
        match &self.sensor {
            None => SensorAvailability::NoSensor,
            Some(_) if self.status != SensorStatus::Connected => {
                SensorAvailability::NotConnected(self.status)
            }
            Some(sensor) if sensor.is_running() => SensorAvailability::Running,
            Some(_) if self.app_conflict => SensorAvailability::InUseByAnotherApp,
            Some(_) => SensorAvailability::Stopped,
        }
    }

    pub fn elevation_task_outstanding(&self) -> bool {
        self.elevation.is_outstanding()
    }

    // ===== Sensor handle & status =====

    /// Attach a sensor (or detach with `None`)
    pub fn set_sensor(&mut self, sensor: Option<SensorHandle>) {
        if same_optional_sensor(self.sensor.as_ref(), sensor.as_ref()) {
            return;
        }
        let old = std::mem::replace(&mut self.sensor, sensor);
        info!(
            session = %self.id,
            old = %sensor_label(old.as_ref()),
            new = %sensor_label(self.sensor.as_ref()),
            "Sensor changed"
        );
        self.on_sensor_or_status_changed(old, true);
    }

    /// Re-read the attached sensor's status and reconcile if it changed
    pub fn refresh_status(&mut self) {
        let status = self.current_sensor_status();
        if status == self.status {
            return;
        }
        info!(session = %self.id, old = %self.status, new = %status, "Sensor status changed");
        let current = self.sensor.clone();
        self.on_sensor_or_status_changed(current, false);
    }

    fn current_sensor_status(&self) -> SensorStatus {
        self.sensor
            .as_ref()
            .map_or(SensorStatus::Undefined, |sensor| sensor.status())
    }

    fn on_sensor_or_status_changed(&mut self, old_sensor: Option<SensorHandle>, sensor_changed: bool) {
        let old_status = self.status;
        let status = self.current_sensor_status();
        let status_changed = status != old_status;

        if sensor_changed {
            // Elevation convergence is per sensor
            self.elevation.reset();
            self.unique_id = self
                .sensor
                .as_ref()
                .and_then(|sensor| sensor.unique_id().ok());
            self.config.elevation_angle = self.elevation_limits().clamp(self.config.elevation_angle);
        }

        if sensor_changed || (status_changed && status != SensorStatus::Connected) {
            self.uninitialize(old_sensor.as_ref());
        }

        let was_running = self.is_running();
        self.initialize_services();
        let is_running = self.is_running();

        self.status = status;
        self.publish_to_registry();

        if sensor_changed {
            self.notify(SessionNotification::SensorChanged {
                old: old_sensor,
                new: self.sensor.clone(),
            });
        }
        if status_changed {
            self.notify(SessionNotification::StatusChanged {
                old: old_status,
                new: status,
            });
        }
        if was_running != is_running {
            self.notify(SessionNotification::RunningStateChanged {
                was_running,
                is_running,
            });
        }
    }

    // ===== Desired configuration =====

    /// Replace the whole desired configuration and reconcile everything
    pub fn set_desired_config(&mut self, config: DesiredConfig) {
        let mut config = config;
        config.elevation_angle = self.elevation_limits().clamp(config.elevation_angle);
        config.skeleton_stream_enabled = self.coerce_skeleton_enabled(config.skeleton_stream_enabled);
        if config == self.config {
            return;
        }
        self.config = config;
        self.reconcile(Self::initialize_services);
    }

    pub fn set_sensor_enabled(&mut self, enabled: bool) {
        if self.config.sensor_enabled == enabled {
            return;
        }
        self.config.sensor_enabled = enabled;
        self.reconcile(Self::ensure_running_state);
    }

    pub fn set_color_stream_enabled(&mut self, enabled: bool) {
        if self.config.color_stream_enabled == enabled {
            return;
        }
        self.config.color_stream_enabled = enabled;
        self.reconcile(Self::ensure_color_stream);
    }

    pub fn set_color_format(&mut self, format: ColorImageFormat) {
        if self.config.color_format == format {
            return;
        }
        self.config.color_format = format;
        self.reconcile(Self::ensure_color_stream);
    }

    pub fn set_depth_stream_enabled(&mut self, enabled: bool) {
        if self.config.depth_stream_enabled == enabled {
            return;
        }
        self.config.depth_stream_enabled = enabled;
        self.reconcile(Self::ensure_depth_stream);
    }

    pub fn set_depth_format(&mut self, format: DepthImageFormat) {
        if self.config.depth_format == format {
            return;
        }
        self.config.depth_format = format;
        self.reconcile(Self::ensure_depth_stream);
    }

    pub fn set_depth_range(&mut self, range: DepthRange) {
        if self.config.depth_range == range {
            return;
        }
        self.config.depth_range = range;
        self.reconcile(Self::ensure_depth_stream);
    }

    /// Request skeleton tracking; returns the value actually stored
    ///
    /// Enabling is refused while another session runs a skeleton engine.
    pub fn set_skeleton_stream_enabled(&mut self, enabled: bool) -> bool {
        let coerced = self.coerce_skeleton_enabled(enabled);
        if coerced != enabled {
            info!(session = %self.id, "Skeleton engine already active in another session");
        }
        if self.config.skeleton_stream_enabled != coerced {
            self.config.skeleton_stream_enabled = coerced;
            self.reconcile(Self::ensure_skeleton_stream);
        }
        coerced
    }

    pub fn set_skeleton_tracking_mode(&mut self, mode: SkeletonTrackingMode) {
        if self.config.skeleton_tracking_mode == mode {
            return;
        }
        self.config.skeleton_tracking_mode = mode;
        self.reconcile(Self::ensure_skeleton_stream);
    }

    pub fn set_skeleton_tracking_in_near_range(&mut self, enabled: bool) {
        if self.config.skeleton_tracking_in_near_range == enabled {
            return;
        }
        self.config.skeleton_tracking_in_near_range = enabled;
        self.reconcile(Self::ensure_skeleton_stream);
    }

    pub fn set_smoothing_parameters(&mut self, parameters: SmoothingParameters) {
        if self.config.smoothing_parameters == parameters {
            return;
        }
        self.config.smoothing_parameters = parameters;
        self.reconcile(Self::ensure_skeleton_stream);
    }

    /// Request an elevation angle; returns the clamped value actually stored
    pub fn set_elevation_angle(&mut self, degrees: i32) -> i32 {
        let clamped = self.elevation_limits().clamp(degrees);
        if self.config.elevation_angle != clamped {
            self.config.elevation_angle = clamped;
            self.reconcile(Self::ensure_elevation);
        }
        clamped
    }

    fn elevation_limits(&self) -> ElevationLimits {
        self.sensor
            .as_ref()
            .map_or_else(ElevationLimits::default, |sensor| sensor.elevation_limits())
    }

    fn coerce_skeleton_enabled(&self, requested: bool) -> bool {
        requested
            && (self.config.skeleton_stream_enabled
                || !self.registry.skeleton_engine_active_elsewhere(self.id))
    }

    // ===== Teardown =====

    /// Tear down the attached sensor's streams without detaching it
    ///
    /// Safe to call repeatedly; a second call changes nothing and fires no
    /// notifications.
    pub fn teardown(&mut self) {
        let sensor = self.sensor.clone();
        self.reconcile(|manager| manager.uninitialize(sensor.as_ref()));
    }

    fn uninitialize(&mut self, sensor: Option<&SensorHandle>) {
        self.set_app_conflict(false);

        let Some(sensor) = sensor else {
            return;
        };

        debug!(session = %self.id, sensor = %sensor_label(Some(sensor)), "Tearing down sensor");
        sensor.stop();
        sensor.stop_audio();
        sensor.disable_skeleton_stream();
        sensor.disable_depth_stream();
        sensor.disable_color_stream();
    }

    // ===== Reconciliation =====

    fn reconcile<F: FnOnce(&mut Self)>(&mut self, step: F) {
        let was_running = self.is_running();
        step(self);
        let is_running = self.is_running();
        self.publish_to_registry();
        if was_running != is_running {
            self.notify(SessionNotification::RunningStateChanged {
                was_running,
                is_running,
            });
        }
    }

    fn initialize_services(&mut self) {
        self.ensure_color_stream();
        self.ensure_depth_stream();
        self.ensure_skeleton_stream();
        self.ensure_elevation();
        self.ensure_running_state();
    }

    fn connected_sensor(&self) -> Option<SensorHandle> {
        self.sensor
            .as_ref()
            .filter(|sensor| sensor.status() == SensorStatus::Connected)
            .cloned()
    }

    fn ensure_running_state(&mut self) {
        let Some(sensor) = self.connected_sensor() else {
            return;
        };

        if !self.config.sensor_enabled {
            sensor.stop();
            self.set_app_conflict(false);
            return;
        }
        if sensor.is_running() {
            return;
        }

        match sensor.start() {
            Ok(()) => {
                info!(session = %self.id, sensor = %sensor_label(Some(&sensor)), "Sensor started");
                // Tilt is only readable once running and reflects the mounting
                match sensor.elevation_angle() {
                    Ok(angle) => self.adopt_hardware_elevation(angle),
                    Err(e) => debug!(error = %e, "Could not read elevation after start"),
                }
                self.set_app_conflict(false);
            }
            Err(SensorError::DeviceConflict) => {
                warn!(session = %self.id, "Sensor is in use by another application");
                self.set_app_conflict(true);
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Sensor went away while starting");
                sensor.stop();
                self.set_app_conflict(false);
            }
        }
    }

    fn adopt_hardware_elevation(&mut self, angle: i32) {
        let angle = self.elevation_limits().clamp(angle);
        if self.config.elevation_angle != angle {
            debug!(session = %self.id, angle, "Adopting hardware elevation angle");
            self.config.elevation_angle = angle;
        }
        // The motor already sits here; nothing to command
        self.elevation.set_target(angle);
    }

    fn ensure_color_stream(&mut self) {
        let Some(sensor) = self.connected_sensor() else {
            return;
        };

        if !self.config.color_stream_enabled {
            sensor.disable_color_stream();
            return;
        }

        let format = self.config.color_format;
        match sensor.enable_color_stream(format) {
            Ok(()) => {}
            Err(SensorError::UnsupportedConfiguration(reason)) => {
                let fallback = ColorImageFormat::default();
                if format != fallback && sensor.enable_color_stream(fallback).is_ok() {
                    warn!(%format, %fallback, %reason, "Color format unsupported, using default");
                    self.config.color_format = fallback;
                } else {
                    warn!(%format, %reason, "Color format unsupported, disabling color stream");
                    sensor.disable_color_stream();
                }
            }
            Err(e) => {
                debug!(error = %e, "Color stream could not be enabled");
                sensor.disable_color_stream();
            }
        }
    }

    fn ensure_depth_stream(&mut self) {
        let Some(sensor) = self.connected_sensor() else {
            return;
        };

        if !self.config.depth_stream_enabled {
            sensor.disable_depth_stream();
            return;
        }

        let format = self.config.depth_format;
        match sensor.enable_depth_stream(format) {
            Ok(()) => {}
            Err(SensorError::UnsupportedConfiguration(reason)) => {
                let fallback = DepthImageFormat::default();
                if format != fallback && sensor.enable_depth_stream(fallback).is_ok() {
                    warn!(%format, %fallback, %reason, "Depth format unsupported, using default");
                    self.config.depth_format = fallback;
                } else {
                    warn!(%format, %reason, "Depth format unsupported, disabling depth stream");
                    sensor.disable_depth_stream();
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "Depth stream could not be enabled");
                sensor.disable_depth_stream();
                return;
            }
        }

        if let Err(e) = sensor.set_depth_range(self.config.depth_range) {
            warn!(range = ?self.config.depth_range, error = %e, "Depth range unsupported, using default");
            self.config.depth_range = DepthRange::Default;
            if let Err(e) = sensor.set_depth_range(DepthRange::Default) {
                debug!(error = %e, "Default depth range rejected");
            }
        }
    }

    fn ensure_skeleton_stream(&mut self) {
        let Some(sensor) = self.connected_sensor() else {
            return;
        };

        let will_reset_audio = sensor.skeleton_stream_enabled() != self.config.skeleton_stream_enabled;

        if self.config.skeleton_stream_enabled {
            let enabled = sensor
                .enable_skeleton_stream(&self.config.smoothing_parameters)
                .and_then(|()| sensor.set_skeleton_tracking_mode(self.config.skeleton_tracking_mode))
                .and_then(|()| {
                    sensor.set_skeleton_tracking_in_near_range(self.config.skeleton_tracking_in_near_range)
                });
            if let Err(e) = enabled {
                debug!(error = %e, "Skeleton stream could not be enabled");
                sensor.disable_skeleton_stream();
                return;
            }
        } else {
            sensor.disable_skeleton_stream();
        }

        if will_reset_audio && sensor.is_running() {
            debug!(session = %self.id, "Skeleton engine change reset the audio stream");
            self.notify(SessionNotification::AudioResetBySkeletonEngine);
        }
    }

    fn ensure_elevation(&mut self) {
        // Elevation can only be commanded on a running sensor; this runs
        // again once the sensor starts.
        let Some(sensor) = self.connected_sensor().filter(|sensor| sensor.is_running()) else {
            return;
        };
        self.elevation.set_target(self.config.elevation_angle);
        self.elevation.ensure_task(&sensor);
    }

    // ===== Background completions =====

    /// Handle finished elevation tasks; returns how many reports were handled
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(outcome) = self.elevation.try_recv() {
            self.on_elevation_task_finished(&outcome);
            handled += 1;
        }
        handled
    }

    /// Block until elevation convergence is idle or `timeout` elapses
    ///
    /// Returns `true` if convergence went idle.
    pub fn wait_for_elevation(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending_events();
            if !self.elevation.is_outstanding() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if let Some(outcome) = self.elevation.recv_timeout(deadline - now) {
                self.on_elevation_task_finished(&outcome);
            }
        }
    }

    fn on_elevation_task_finished(&mut self, outcome: &ElevationTaskOutcome) {
        if !self.elevation.complete(outcome) {
            return;
        }
        // The target moved while the task was finishing
        if let Some(sensor) = self.connected_sensor().filter(|sensor| sensor.is_running()) {
            debug!(session = %self.id, target = self.elevation.target(), "Restarting elevation task");
            self.elevation.ensure_task(&sensor);
        }
    }

    // ===== Notifications =====

    fn set_app_conflict(&mut self, conflict: bool) {
        if self.app_conflict == conflict {
            return;
        }
        let old = std::mem::replace(&mut self.app_conflict, conflict);
        self.notify(SessionNotification::AppConflictChanged { old, new: conflict });
    }

    fn publish_to_registry(&self) {
        let (running, skeleton_enabled) = self.sensor.as_ref().map_or((false, false), |sensor| {
            (sensor.is_running(), sensor.skeleton_stream_enabled())
        });
        self.registry.publish(
            self.id,
            SessionEntry {
                sensor_id: self.unique_id.clone(),
                running,
                skeleton_enabled,
            },
        );
    }

    fn notify(&mut self, notification: SessionNotification) {
        debug!(session = %self.id, ?notification, "Session notification");
        for observer in &mut self.observers {
            observer(&notification);
        }
    }
}

impl Drop for SensorSessionManager {
    fn drop(&mut self) {
        self.elevation.reset();
        self.registry.unregister(self.id);
    }
}

impl std::fmt::Debug for SensorSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSessionManager")
            .field("id", &self.id)
            .field("sensor", &sensor_label(self.sensor.as_ref()))
            .field("status", &self.status)
            .field("config", &self.config)
            .field("app_conflict", &self.app_conflict)
            .field("elevation", &self.elevation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{DepthSensor, SimulatedSensor};
    use std::sync::{Arc, Mutex};

    fn attach(manager: &mut SensorSessionManager, name: &str) -> Arc<SimulatedSensor> {
        let sim = Arc::new(SimulatedSensor::new(name));
        manager.set_sensor(Some(sim.clone()));
        sim
    }

    fn recorder(manager: &mut SensorSessionManager) -> Arc<Mutex<Vec<SessionNotification>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        manager.subscribe(move |n| sink.lock().unwrap().push(n.clone()));
        log
    }

    #[test]
    fn test_attach_starts_sensor_with_defaults() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        let sim = attach(&mut manager, "sensor-a");

        assert!(manager.is_running());
        assert_eq!(manager.unique_id(), Some("sensor-a"));
        assert!(sim.color_stream_enabled());
        assert!(sim.depth_stream_enabled());
        assert!(!sim.skeleton_stream_enabled());
        assert_eq!(manager.availability(), SensorAvailability::Running);
    }

    #[test]
    fn test_notification_order_on_attach() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        let log = recorder(&mut manager);
        attach(&mut manager, "sensor-a");

        let log = log.lock().unwrap();
        assert!(matches!(log[0], SessionNotification::SensorChanged { .. }));
        assert!(matches!(
            log[1],
            SessionNotification::StatusChanged {
                old: SensorStatus::Undefined,
                new: SensorStatus::Connected
            }
        ));
        assert!(matches!(
            log[2],
            SessionNotification::RunningStateChanged {
                was_running: false,
                is_running: true
            }
        ));
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        let sim = attach(&mut manager, "sensor-a");
        let log = recorder(&mut manager);

        manager.teardown();
        assert!(!sim.is_running());
        assert!(!sim.depth_stream_enabled());
        let after_first = log.lock().unwrap().len();
        assert_eq!(after_first, 1);

        manager.teardown();
        assert_eq!(log.lock().unwrap().len(), after_first);
    }

    #[test]
    fn test_elevation_request_is_clamped() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        assert_eq!(manager.set_elevation_angle(90), 27);
        assert_eq!(manager.set_elevation_angle(-90), -27);

        let sim = Arc::new(SimulatedSensor::with_limits(
            "narrow",
            ElevationLimits { min: -10, max: 10 },
        ));
        manager.set_sensor_enabled(false);
        manager.set_sensor(Some(sim));
        assert_eq!(manager.config().elevation_angle, -10);
        assert_eq!(manager.set_elevation_angle(15), 10);
    }

    #[test]
    fn test_conflict_then_retry_on_config_change() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        let sim = Arc::new(SimulatedSensor::new("busy"));
        sim.set_held_by_other_process(true);
        manager.set_sensor(Some(sim.clone()));

        assert!(manager.has_app_conflict());
        assert_eq!(manager.availability(), SensorAvailability::InUseByAnotherApp);

        sim.set_held_by_other_process(false);
        manager.set_sensor_enabled(false);
        assert!(!manager.has_app_conflict());
        manager.set_sensor_enabled(true);
        assert!(manager.is_running());
    }

    #[test]
    fn test_removed_during_start_keeps_enabled_flag() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        let sim = Arc::new(SimulatedSensor::new("flaky"));
        sim.remove_during_next_start();
        manager.set_sensor(Some(sim.clone()));

        assert!(!manager.is_running());
        assert!(!manager.has_app_conflict());
        assert!(manager.config().sensor_enabled);

        sim.set_status(SensorStatus::Disconnected);
        manager.refresh_status();
        sim.set_status(SensorStatus::Connected);
        manager.refresh_status();
        assert!(manager.is_running());
    }

    #[test]
    fn test_near_range_falls_back_to_default() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        let sim = Arc::new(SimulatedSensor::new("far-only"));
        sim.set_supports_near_mode(false);
        manager.set_sensor(Some(sim.clone()));

        manager.set_depth_range(DepthRange::Near);
        assert_eq!(manager.config().depth_range, DepthRange::Default);
        assert_eq!(sim.depth_range(), DepthRange::Default);
    }

    #[test]
    fn test_skeleton_change_while_running_resets_audio() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        attach(&mut manager, "sensor-a");
        let log = recorder(&mut manager);

        assert!(manager.set_skeleton_stream_enabled(true));
        let resets = log
            .lock()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, SessionNotification::AudioResetBySkeletonEngine))
            .count();
        assert_eq!(resets, 1);
    }

    #[test]
    fn test_adopted_elevation_is_not_commanded() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
        let sim = Arc::new(SimulatedSensor::new("tilted"));
        sim.set_physical_elevation(-4);
        manager.set_sensor(Some(sim.clone()));

        assert_eq!(manager.config().elevation_angle, -4);
        assert_eq!(manager.elevation.target(), -4);
        assert!(!manager.elevation_task_outstanding());
        assert!(sim.elevation_commands().is_empty());
    }

    #[test]
    fn test_motor_fault_ends_convergence_without_retry() {
        let mut manager =
            SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new())
                .with_elevation_interval(Duration::from_millis(5));
        let sim = attach(&mut manager, "motor");
        sim.fail_next_elevation_command();

        manager.set_elevation_angle(10);
        assert!(manager.wait_for_elevation(Duration::from_secs(2)));
        assert!(!manager.elevation_task_outstanding());
        assert!(sim.elevation_commands().is_empty());
        assert_eq!(manager.config().elevation_angle, 10);

        // The next request starts a fresh task
        manager.set_elevation_angle(12);
        assert!(manager.wait_for_elevation(Duration::from_secs(2)));
        assert_eq!(sim.elevation_commands(), vec![12]);
    }
}
