// SPDX-License-Identifier: GPL-3.0-only

//! Capture worker lifecycle
//!
//! A [`CapturePipeline`] runs one dedicated worker thread per stream. The
//! worker owns the sensor subscription and the conversion buffers, and
//! processes commands strictly in arrival order:
//!
//! ```text
//!  sensor_changed() ──┐
//!  driver frame-ready ┼──► command queue ──► worker loop ──► SinkHandle::write_pixels
//!  shutdown ──────────┘                      (one frame)      (blocks until painted)
//! ```
//!
//! Because the handoff to the presentation thread is a blocking call, at
//! most one frame is in flight end to end. Frame-ready notifications that
//! pile up behind a slow consumer open to `None` once the driver has a newer
//! frame, so skipping happens at the driver instead of in a queue.
//!
//! States: `Uninitialized → Starting → Running → ShuttingDown → Stopped`.

pub mod processors;

pub use processors::{ColorFrameProcessor, DepthFrameProcessor};

use crate::backends::sensor::{
    DepthSensor, FrameListener, FrameReady, SensorHandle, SubscriptionId, same_optional_sensor,
    sensor_label,
};
use crate::errors::{ConversionError, PipelineError, PipelineResult};
use crate::viewer::{FrameDescriptor, SinkHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Uninitialized,
    Starting,
    Running,
    ShuttingDown,
    /// Terminal
    Stopped,
}

/// Per-stream conversion run on the capture worker
pub trait FrameProcessor: Send + 'static {
    type Frame: Clone + Send + 'static;

    /// Short stream name for thread names and logs
    fn stream_name(&self) -> &'static str;

    /// One-time setup on the worker thread before it accepts commands
    fn prepare(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn subscribe(&self, sensor: &dyn DepthSensor, listener: FrameListener<Self::Frame>) -> SubscriptionId;

    /// Convert one frame into `output`, reallocating buffers on format change
    fn process(
        &mut self,
        frame: &Self::Frame,
        sensor: &dyn DepthSensor,
        output: &mut Vec<u8>,
    ) -> Result<FrameDescriptor, ConversionError>;

    /// Forget the last seen format so the next frame reallocates
    fn reset(&mut self);
}

/// Counters published by the capture worker
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_converted: AtomicU64,
    frames_skipped: AtomicU64,
    buffer_allocations: AtomicU64,
    handoffs: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub frames_converted: u64,
    /// Notifications whose frame was already superseded when opened
    pub frames_skipped: u64,
    pub buffer_allocations: u64,
    pub handoffs: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            frames_converted: self.frames_converted.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            buffer_allocations: self.buffer_allocations.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
        }
    }
}

enum WorkerCommand<F> {
    SensorChanged {
        old: Option<SensorHandle>,
        new: Option<SensorHandle>,
    },
    FrameReady {
        epoch: u64,
        ready: FrameReady<F>,
    },
    Shutdown,
}

/// Cloneable handle for forwarding sensor changes to a running pipeline
pub struct PipelineController<F> {
    name: &'static str,
    tx: Sender<WorkerCommand<F>>,
}

impl<F> Clone for PipelineController<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<F> PipelineController<F> {
    /// Queue a sensor swap; ignored once the worker has exited
    pub fn sensor_changed(&self, old: Option<SensorHandle>, new: Option<SensorHandle>) {
        if self.tx.send(WorkerCommand::SensorChanged { old, new }).is_err() {
            debug!(pipeline = self.name, "Sensor change after worker exit ignored");
        }
    }
}

/// Capture pipeline for one stream
pub struct CapturePipeline<P: FrameProcessor> {
    name: &'static str,
    tx: Sender<WorkerCommand<P::Frame>>,
    state: Arc<Mutex<PipelineState>>,
    stats: Arc<PipelineStats>,
    thread: Option<JoinHandle<PipelineResult<()>>>,
}

fn set_state(state: &Mutex<PipelineState>, next: PipelineState) {
    let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
    *guard = next;
}

impl<P: FrameProcessor> CapturePipeline<P> {
    /// Spawn the worker and wait until its command loop is ready
    ///
    /// Returns [`PipelineError::WorkerStartup`] if the thread cannot be
    /// spawned, its setup fails, or it dies before signalling readiness.
    pub fn start<S: 'static>(processor: P, sink: SinkHandle<S>) -> PipelineResult<Self> {
        let name = processor.stream_name();
        let state = Arc::new(Mutex::new(PipelineState::Uninitialized));
        let stats = Arc::new(PipelineStats::default());

        info!(pipeline = name, "Starting capture pipeline");
        set_state(&state, PipelineState::Starting);

        let (init_tx, init_rx) =
            mpsc::sync_channel::<Result<Sender<WorkerCommand<P::Frame>>, String>>(1);

        let worker_state = Arc::clone(&state);
        let worker_stats = Arc::clone(&stats);
        let spawned = thread::Builder::new()
            .name(format!("{}-capture", name))
            .spawn(move || worker_main(processor, sink, worker_state, worker_stats, init_tx));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                set_state(&state, PipelineState::Stopped);
                return Err(PipelineError::WorkerStartup(format!("spawn worker: {}", e)));
            }
        };

        // A dropped sender unblocks this even if the worker dies early
        let tx = match init_rx.recv() {
            Ok(Ok(tx)) => tx,
            Ok(Err(message)) => {
                set_state(&state, PipelineState::Stopped);
                let _ = thread.join();
                error!(pipeline = name, error = %message, "Capture worker failed to start");
                return Err(PipelineError::WorkerStartup(message));
            }
            Err(_) => {
                set_state(&state, PipelineState::Stopped);
                let _ = thread.join();
                error!(pipeline = name, "Capture worker died during startup");
                return Err(PipelineError::WorkerStartup(
                    "worker exited before its loop was ready".to_string(),
                ));
            }
        };

        info!(pipeline = name, "Capture pipeline running");

        Ok(Self {
            name,
            tx,
            state,
            stats,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Handle for forwarding sensor changes from other threads
    pub fn controller(&self) -> PipelineController<P::Frame> {
        PipelineController {
            name: self.name,
            tx: self.tx.clone(),
        }
    }

    /// Queue a sensor swap; runs asynchronously on the worker
    pub fn sensor_changed(&self, old: Option<SensorHandle>, new: Option<SensorHandle>) {
        self.controller().sensor_changed(old, new);
    }

    /// Ask the worker to exit without waiting for it
    ///
    /// An in-flight conversion completes first; the worker unsubscribes
    /// from its sensor before the loop exits.
    pub fn begin_invoke_shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == PipelineState::Running {
                *state = PipelineState::ShuttingDown;
            }
        }
        if self.tx.send(WorkerCommand::Shutdown).is_ok() {
            debug!(pipeline = self.name, "Shutdown requested");
        }
    }

    /// True once the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|thread| thread.is_finished())
    }

    /// Request shutdown and wait for the worker's result
    ///
    /// A fatal conversion error that stopped the worker is returned here.
    pub fn join(mut self) -> PipelineResult<()> {
        self.begin_invoke_shutdown();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                error!(pipeline = self.name, "Capture worker panicked");
                set_state(&self.state, PipelineState::Stopped);
                Err(PipelineError::WorkerPanicked)
            }),
            None => Ok(()),
        }
    }
}

impl<P: FrameProcessor> Drop for CapturePipeline<P> {
    fn drop(&mut self) {
        // Never join here: the worker may be blocked on a handoff to the
        // thread that is dropping us.
        if self.thread.is_some() {
            self.begin_invoke_shutdown();
        }
    }
}

struct Worker<P: FrameProcessor, S> {
    name: &'static str,
    processor: P,
    sink: SinkHandle<S>,
    tx: Sender<WorkerCommand<P::Frame>>,
    sensor: Option<SensorHandle>,
    subscription: Option<SubscriptionId>,
    epoch: u64,
    output: Vec<u8>,
    stats: Arc<PipelineStats>,
}

fn worker_main<P: FrameProcessor, S: 'static>(
    mut processor: P,
    sink: SinkHandle<S>,
    state: Arc<Mutex<PipelineState>>,
    stats: Arc<PipelineStats>,
    init_tx: mpsc::SyncSender<Result<Sender<WorkerCommand<P::Frame>>, String>>,
) -> PipelineResult<()> {
    let name = processor.stream_name();

    if let Err(message) = processor.prepare() {
        let _ = init_tx.send(Err(message.clone()));
        return Err(PipelineError::WorkerStartup(message));
    }

    let (tx, rx) = mpsc::channel();
    let mut worker = Worker {
        name,
        processor,
        sink,
        tx: tx.clone(),
        sensor: None,
        subscription: None,
        epoch: 0,
        output: Vec::new(),
        stats,
    };

    set_state(&state, PipelineState::Running);
    if init_tx.send(Ok(tx)).is_err() {
        set_state(&state, PipelineState::Stopped);
        return Err(PipelineError::WorkerStartup("constructor went away".to_string()));
    }
    drop(init_tx);

    debug!(pipeline = name, "Capture worker loop running");
    let result = worker.run(&rx);

    set_state(&state, PipelineState::ShuttingDown);
    worker.detach();
    set_state(&state, PipelineState::Stopped);

    match &result {
        Ok(()) => info!(pipeline = name, "Capture worker exiting"),
        Err(e) => error!(pipeline = name, error = %e, "Capture worker stopped on error"),
    }
    result
}

impl<P: FrameProcessor, S: 'static> Worker<P, S> {
    fn run(&mut self, rx: &Receiver<WorkerCommand<P::Frame>>) -> PipelineResult<()> {
        // The worker holds a sender for its listeners, so recv only fails
        // if that invariant is broken.
        while let Ok(command) = rx.recv() {
            match command {
                WorkerCommand::SensorChanged { old, new } => self.on_sensor_changed(old, new)?,
                WorkerCommand::FrameReady { epoch, ready } => self.on_frame_ready(epoch, ready)?,
                WorkerCommand::Shutdown => break,
            }
        }
        Ok(())
    }

    fn on_sensor_changed(
        &mut self,
        old: Option<SensorHandle>,
        new: Option<SensorHandle>,
    ) -> PipelineResult<()> {
        if !same_optional_sensor(old.as_ref(), self.sensor.as_ref()) {
            debug!(
                pipeline = self.name,
                expected = %sensor_label(old.as_ref()),
                actual = %sensor_label(self.sensor.as_ref()),
                "Sensor change does not match the attached sensor"
            );
        }

        self.detach();
        self.epoch += 1;

        if let Some(sensor) = new {
            let tx = self.tx.clone();
            let epoch = self.epoch;
            let listener: FrameListener<P::Frame> = Arc::new(move |ready: FrameReady<P::Frame>| {
                // Worker gone; nothing to deliver to
                let _ = tx.send(WorkerCommand::FrameReady { epoch, ready });
            });
            self.subscription = Some(self.processor.subscribe(sensor.as_ref(), listener));
            info!(pipeline = self.name, sensor = %sensor_label(Some(&sensor)), "Attached to sensor");
            self.sensor = Some(sensor);
        }

        let retained = self.sink.reset()?;
        if !retained {
            self.processor.reset();
        }
        Ok(())
    }

    fn on_frame_ready(&mut self, epoch: u64, ready: FrameReady<P::Frame>) -> PipelineResult<()> {
        if epoch != self.epoch {
            trace!(pipeline = self.name, "Dropping notification from a previous sensor");
            return Ok(());
        }
        let Some(sensor) = self.sensor.clone() else {
            return Ok(());
        };
        let Some(frame) = ready.open() else {
            self.stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
            trace!(pipeline = self.name, sequence = ready.sequence(), "Frame superseded before open");
            return Ok(());
        };

        let descriptor = self
            .processor
            .process(&frame, sensor.as_ref(), &mut self.output)
            .inspect_err(|e| error!(pipeline = self.name, error = %e, "Frame conversion failed"))?;

        if descriptor.format_changed {
            self.stats.buffer_allocations.fetch_add(1, Ordering::Relaxed);
            info!(
                pipeline = self.name,
                width = descriptor.width,
                height = descriptor.height,
                "Stream format changed, buffers reallocated"
            );
        }
        self.stats.frames_converted.fetch_add(1, Ordering::Relaxed);

        // Ownership of the buffer moves to the presentation thread for the
        // duration of the call and comes back with the reply.
        let buffer = std::mem::take(&mut self.output);
        self.output = self.sink.write_pixels(descriptor, buffer)?;
        self.stats.handoffs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(sensor) = self.sensor.take() {
            if let Some(id) = self.subscription.take() {
                sensor.unsubscribe(id);
            }
            info!(pipeline = self.name, sensor = %sensor_label(Some(&sensor)), "Detached from sensor");
        } else if self.subscription.take().is_some() {
            warn!(pipeline = self.name, "Subscription without a sensor");
        }
    }
}
