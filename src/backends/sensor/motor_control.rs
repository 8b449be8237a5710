// SPDX-License-Identifier: GPL-3.0-only

//! Elevation motor convergence
//!
//! The elevation motor accepts at most ~15 commands per 20 seconds and needs
//! a settle interval after each command, so angle changes are applied by a
//! background task rather than inline. The owning session only publishes the
//! latest target; the task keeps commanding until the last commanded value
//! matches the target or the sensor stops running.
//!
//! Completion is reported back over a channel and handled on the owning
//! thread, which decides whether the target moved again while the task was
//! finishing. Tasks started for a previous sensor carry an older generation
//! and are ignored.

use super::SensorHandle;
use crate::constants::ELEVATION_COMMAND_INTERVAL;
use crate::errors::SensorError;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Report sent by a finished elevation task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationTaskOutcome {
    pub generation: u64,
    /// Last angle this task commanded, if any
    pub last_set: Option<i32>,
    /// Fault that ended the task early
    pub fault: Option<SensorError>,
}

/// Owner-side state of the elevation convergence task
pub struct ElevationControl {
    target: Arc<AtomicI32>,
    generation: Arc<AtomicU64>,
    interval: Duration,
    outstanding: bool,
    tx: Sender<ElevationTaskOutcome>,
    rx: Receiver<ElevationTaskOutcome>,
}

impl ElevationControl {
    pub fn new() -> Self {
        Self::with_interval(ELEVATION_COMMAND_INTERVAL)
    }

    /// Use a custom settle interval between motor commands
    pub fn with_interval(interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            target: Arc::new(AtomicI32::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
            interval,
            outstanding: false,
            tx,
            rx,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Publish a new target; a running task picks it up before its next command
    pub fn set_target(&self, degrees: i32) {
        self.target.store(degrees, Ordering::Relaxed);
    }

    pub fn target(&self) -> i32 {
        self.target.load(Ordering::Relaxed)
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    /// Forget any outstanding task (the sensor changed)
    ///
    /// A task still running for the previous sensor exits at its next check
    /// and its completion report is discarded.
    pub fn reset(&mut self) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        if self.outstanding {
            debug!(generation, "Abandoning outstanding elevation task");
        }
        self.outstanding = false;
    }

    /// Start a convergence task unless one is already outstanding
    pub fn ensure_task(&mut self, sensor: &SensorHandle) {
        if self.outstanding {
            return;
        }
        self.spawn_task(Arc::clone(sensor));
    }

    fn spawn_task(&mut self, sensor: SensorHandle) {
        let generation = self.generation.load(Ordering::Relaxed);
        let current_generation = Arc::clone(&self.generation);
        let target = Arc::clone(&self.target);
        let interval = self.interval;
        let tx = self.tx.clone();

        let spawned = thread::Builder::new()
            .name("sensor-elevation".to_string())
            .spawn(move || {
                let mut last_set = None;
                let mut fault = None;
                let mut angle = target.load(Ordering::Relaxed);

                while last_set != Some(angle)
                    && sensor.is_running()
                    && current_generation.load(Ordering::Relaxed) == generation
                {
                    if let Err(e) = sensor.set_elevation_angle(angle) {
                        fault = Some(e);
                        break;
                    }
                    debug!(angle, generation, "Elevation command sent");
                    last_set = Some(angle);
                    thread::sleep(interval);
                    angle = target.load(Ordering::Relaxed);
                }

                // The owner may already be gone; nothing left to report to.
                let _ = tx.send(ElevationTaskOutcome {
                    generation,
                    last_set,
                    fault,
                });
            });

        match spawned {
            Ok(_) => self.outstanding = true,
            Err(e) => {
                warn!(error = %e, "Failed to spawn elevation task");
                self.outstanding = false;
            }
        }
    }

    /// Non-blocking poll for a finished task report
    pub fn try_recv(&self) -> Option<ElevationTaskOutcome> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a finished task report
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ElevationTaskOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Handle a task report on the owning thread
    ///
    /// Returns `true` if the target moved after the task's last command and
    /// the caller should call [`ensure_task`](Self::ensure_task) again (when
    /// the sensor still runs).
    /// Stale reports from abandoned tasks return `false` and change nothing.
    /// A task that ended with a fault also returns `false`: convergence goes
    /// idle until the next request.
    pub fn complete(&mut self, outcome: &ElevationTaskOutcome) -> bool {
        if outcome.generation != self.generation.load(Ordering::Relaxed) {
            debug!(generation = outcome.generation, "Ignoring stale elevation task");
            return false;
        }
        self.outstanding = false;
        if let Some(fault) = &outcome.fault {
            warn!(error = %fault, target = self.target(), "Elevation task ended with a fault");
            return false;
        }
        outcome.last_set != Some(self.target())
    }
}

impl Default for ElevationControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ElevationControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevationControl")
            .field("target", &self.target())
            .field("interval", &self.interval)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{DepthSensor, SimulatedSensor};

    fn running_sensor() -> (Arc<SimulatedSensor>, SensorHandle) {
        let sim = Arc::new(SimulatedSensor::new("motor-test"));
        sim.start().unwrap();
        let handle: SensorHandle = sim.clone();
        (sim, handle)
    }

    #[test]
    fn test_task_converges_to_target() {
        let (sim, handle) = running_sensor();
        let mut control = ElevationControl::with_interval(Duration::from_millis(5));
        control.set_target(12);
        control.ensure_task(&handle);
        assert!(control.is_outstanding());

        let outcome = control.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.last_set, Some(12));
        assert!(!control.complete(&outcome));
        assert!(!control.is_outstanding());
        assert_eq!(sim.elevation_commands(), vec![12]);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let (_sim, handle) = running_sensor();
        let mut control = ElevationControl::with_interval(Duration::from_millis(5));
        control.set_target(5);
        control.ensure_task(&handle);
        control.reset();

        let outcome = control.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!control.complete(&outcome));
        assert!(!control.is_outstanding());
    }

    #[test]
    fn test_stopped_sensor_sends_nothing() {
        let sim = Arc::new(SimulatedSensor::new("motor-test"));
        let handle: SensorHandle = sim.clone();
        let mut control = ElevationControl::with_interval(Duration::from_millis(5));
        control.set_target(-10);
        control.ensure_task(&handle);

        let outcome = control.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.last_set, None);
        assert!(control.complete(&outcome));
        assert!(sim.elevation_commands().is_empty());
    }

    #[test]
    fn test_faulted_task_goes_idle() {
        let (sim, handle) = running_sensor();
        sim.fail_next_elevation_command();
        let mut control = ElevationControl::with_interval(Duration::from_millis(5));
        control.set_target(7);
        control.ensure_task(&handle);

        let outcome = control.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.fault, Some(SensorError::DeviceRemoved));
        assert_eq!(outcome.last_set, None);
        assert!(!control.complete(&outcome));
        assert!(!control.is_outstanding());
        assert!(sim.elevation_commands().is_empty());
    }
}
