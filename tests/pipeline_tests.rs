// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for capture pipelines feeding a presentation thread

use depth_viewer::backends::sensor::{
    DepthImageFormat, DepthImageFrame, DepthSensor, DesiredConfig, FrameListener, SensorHandle,
    SensorSessionManager, SessionNotification, SessionRegistry, SimulatedSensor, SubscriptionId,
};
use depth_viewer::errors::{ConversionError, PipelineError};
use depth_viewer::pipelines::capture::{
    CapturePipeline, DepthFrameProcessor, FrameProcessor, PipelineState,
};
use depth_viewer::viewer::{
    Dispatcher, FrameDescriptor, PresentationSink, SinkHandle, ViewerSurface,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SMALL: DepthImageFormat = DepthImageFormat::Resolution80x60Fps30;
const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn streaming_sensor(id: &str, format: DepthImageFormat) -> Arc<SimulatedSensor> {
    let sensor = Arc::new(SimulatedSensor::new(id));
    sensor.enable_depth_stream(format).unwrap();
    sensor.start().unwrap();
    sensor
}

fn surface_writes(dispatcher: &Dispatcher<ViewerSurface>) -> u64 {
    dispatcher.handle().invoke(|surface| surface.writes()).unwrap()
}

fn attach(pipeline: &CapturePipeline<impl FrameProcessor>, sensor: &Arc<SimulatedSensor>) {
    let handle: SensorHandle = sensor.clone();
    pipeline.sensor_changed(None, Some(handle));
    assert!(wait_until(|| sensor.depth_subscriber_count() == 1));
}

#[test]
fn test_ten_frames_one_allocation() {
    let dispatcher = Dispatcher::start("test-presentation", ViewerSurface::new).unwrap();
    let pipeline =
        CapturePipeline::start(DepthFrameProcessor::new(), SinkHandle::direct(dispatcher.handle()))
            .unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);

    let sensor = streaming_sensor("depth-10", SMALL);
    attach(&pipeline, &sensor);

    for i in 1..=10 {
        assert!(sensor.emit_synthetic_depth_frame());
        assert!(wait_until(|| surface_writes(&dispatcher) == i));
    }

    let stats = pipeline.stats();
    assert_eq!(stats.frames_converted, 10);
    assert_eq!(stats.buffer_allocations, 1);
    assert_eq!(stats.handoffs, 10);
    assert_eq!(stats.frames_skipped, 0);

    let (allocations, total_frames, top_left_sentinel) = dispatcher
        .handle()
        .invoke(|surface| {
            let image = surface.image().unwrap();
            let offset = 5 * 4;
            (
                surface.allocations(),
                surface.frame_rate().total_frames(),
                image.pixels[offset..offset + 3].to_vec(),
            )
        })
        .unwrap();
    assert_eq!(allocations, 1);
    assert_eq!(total_frames, 10);
    // Top row is the too-near sentinel
    assert_eq!(top_left_sentinel, vec![255, 255, 255]);

    pipeline.join().unwrap();
    dispatcher.shutdown().unwrap();
}

#[test]
fn test_format_change_reallocates() {
    let dispatcher = Dispatcher::start("test-presentation", ViewerSurface::new).unwrap();
    let pipeline =
        CapturePipeline::start(DepthFrameProcessor::new(), SinkHandle::direct(dispatcher.handle()))
            .unwrap();
    let sensor = streaming_sensor("depth-format", SMALL);
    attach(&pipeline, &sensor);

    sensor.emit_synthetic_depth_frame();
    assert!(wait_until(|| surface_writes(&dispatcher) == 1));
    sensor.emit_synthetic_depth_frame();
    assert!(wait_until(|| surface_writes(&dispatcher) == 2));

    sensor
        .enable_depth_stream(DepthImageFormat::Resolution320x240Fps30)
        .unwrap();
    sensor.emit_synthetic_depth_frame();
    assert!(wait_until(|| surface_writes(&dispatcher) == 3));

    assert_eq!(pipeline.stats().buffer_allocations, 2);
    let (allocations, dims) = dispatcher
        .handle()
        .invoke(|surface| {
            let image = surface.image().unwrap();
            (surface.allocations(), (image.width, image.height, image.pixels.len()))
        })
        .unwrap();
    assert_eq!(allocations, 2);
    assert_eq!(dims, (320, 240, 320 * 240 * 4));

    pipeline.join().unwrap();
}

/// Sink that paints slowly and flags when it is busy
struct SlowSink {
    delay: Duration,
    busy: Arc<AtomicBool>,
    writes: u64,
}

impl PresentationSink for SlowSink {
    fn write_pixels(&mut self, _descriptor: &FrameDescriptor, _pixels: &[u8]) {
        self.busy.store(true, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.writes += 1;
        self.busy.store(false, Ordering::SeqCst);
    }

    fn reset(&mut self) -> bool {
        false
    }
}

/// Depth processor that counts conversions started while the sink is busy
struct OverlapDetector {
    inner: DepthFrameProcessor,
    sink_busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl FrameProcessor for OverlapDetector {
    type Frame = DepthImageFrame;

    fn stream_name(&self) -> &'static str {
        "overlap"
    }

    fn subscribe(&self, sensor: &dyn DepthSensor, listener: FrameListener<DepthImageFrame>) -> SubscriptionId {
        self.inner.subscribe(sensor, listener)
    }

    fn process(
        &mut self,
        frame: &DepthImageFrame,
        sensor: &dyn DepthSensor,
        output: &mut Vec<u8>,
    ) -> Result<FrameDescriptor, ConversionError> {
        if self.sink_busy.load(Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.process(frame, sensor, output)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[test]
fn test_slow_sink_applies_back_pressure() {
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let sink_busy = Arc::clone(&busy);
    let dispatcher = Dispatcher::start("slow-presentation", move || SlowSink {
        delay: Duration::from_millis(40),
        busy: sink_busy,
        writes: 0,
    })
    .unwrap();
    let processor = OverlapDetector {
        inner: DepthFrameProcessor::new(),
        sink_busy: Arc::clone(&busy),
        overlaps: Arc::clone(&overlaps),
    };
    let pipeline = CapturePipeline::start(processor, SinkHandle::direct(dispatcher.handle())).unwrap();
    let sensor = streaming_sensor("fast", SMALL);
    attach(&pipeline, &sensor);

    let emitted = 20;
    for _ in 0..emitted {
        sensor.emit_synthetic_depth_frame();
        thread::sleep(Duration::from_millis(2));
    }

    assert!(wait_until(|| {
        let stats = pipeline.stats();
        stats.frames_converted + stats.frames_skipped == emitted
            && stats.handoffs == stats.frames_converted
    }));
    let stats = pipeline.stats();
    assert!(stats.frames_skipped > 0, "stats: {:?}", stats);
    assert_eq!(stats.frames_converted, stats.handoffs);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);

    pipeline.join().unwrap();
    let sink = dispatcher.shutdown().unwrap();
    assert_eq!(sink.writes, stats.handoffs);
}

#[test]
fn test_malformed_frame_stops_worker() {
    let dispatcher = Dispatcher::start("test-presentation", ViewerSurface::new).unwrap();
    let pipeline =
        CapturePipeline::start(DepthFrameProcessor::new(), SinkHandle::direct(dispatcher.handle()))
            .unwrap();
    let sensor = streaming_sensor("broken", SMALL);
    attach(&pipeline, &sensor);

    assert!(sensor.emit_depth_frame(vec![0; 10]));
    assert!(wait_until(|| pipeline.is_finished()));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    // The worker unsubscribed on the way out
    assert_eq!(sensor.depth_subscriber_count(), 0);

    match pipeline.join() {
        Err(PipelineError::Conversion(ConversionError::BufferInvariant { .. })) => {}
        other => panic!("expected a buffer invariant error, got {:?}", other),
    }
    assert_eq!(surface_writes(&dispatcher), 0);
}

struct FailingProcessor;

impl FrameProcessor for FailingProcessor {
    type Frame = DepthImageFrame;

    fn stream_name(&self) -> &'static str {
        "failing"
    }

    fn prepare(&mut self) -> Result<(), String> {
        Err("no conversion backend".to_string())
    }

    fn subscribe(&self, sensor: &dyn DepthSensor, listener: FrameListener<DepthImageFrame>) -> SubscriptionId {
        sensor.subscribe_depth_frames(listener)
    }

    fn process(
        &mut self,
        _frame: &DepthImageFrame,
        _sensor: &dyn DepthSensor,
        _output: &mut Vec<u8>,
    ) -> Result<FrameDescriptor, ConversionError> {
        unreachable!("worker never starts")
    }

    fn reset(&mut self) {}
}

#[test]
fn test_worker_startup_failure_is_reported() {
    let dispatcher = Dispatcher::start("test-presentation", ViewerSurface::new).unwrap();
    match CapturePipeline::start(FailingProcessor, SinkHandle::direct(dispatcher.handle())) {
        Err(PipelineError::WorkerStartup(message)) => assert_eq!(message, "no conversion backend"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("pipeline should not start"),
    }
}

#[test]
fn test_sensor_swap_resubscribes_and_clears_image() {
    let dispatcher = Dispatcher::start("test-presentation", ViewerSurface::new).unwrap();
    let pipeline =
        CapturePipeline::start(DepthFrameProcessor::new(), SinkHandle::direct(dispatcher.handle()))
            .unwrap();
    let first = streaming_sensor("first", SMALL);
    let second = streaming_sensor("second", DepthImageFormat::Resolution320x240Fps30);
    attach(&pipeline, &first);

    first.emit_synthetic_depth_frame();
    assert!(wait_until(|| surface_writes(&dispatcher) == 1));

    let old: SensorHandle = first.clone();
    let new: SensorHandle = second.clone();
    pipeline.sensor_changed(Some(old), Some(new));
    assert!(wait_until(|| dispatcher.handle().invoke(|s| s.image().is_none()).unwrap()));
    assert_eq!(first.depth_subscriber_count(), 0);
    assert_eq!(second.depth_subscriber_count(), 1);

    // Frames from the old sensor no longer arrive
    first.emit_synthetic_depth_frame();
    second.emit_synthetic_depth_frame();
    assert!(wait_until(|| surface_writes(&dispatcher) == 2));
    assert_eq!(pipeline.stats().buffer_allocations, 2);

    pipeline.join().unwrap();
    assert_eq!(second.depth_subscriber_count(), 0);
}

#[test]
fn test_retained_image_survives_sensor_change() {
    let dispatcher = Dispatcher::start("test-presentation", || {
        ViewerSurface::with_options(true, Duration::from_secs(1))
    })
    .unwrap();
    let pipeline =
        CapturePipeline::start(DepthFrameProcessor::new(), SinkHandle::direct(dispatcher.handle()))
            .unwrap();
    let sensor = streaming_sensor("keep", SMALL);
    attach(&pipeline, &sensor);

    sensor.emit_synthetic_depth_frame();
    assert!(wait_until(|| surface_writes(&dispatcher) == 1));

    let old: SensorHandle = sensor.clone();
    pipeline.sensor_changed(Some(old), None);
    assert!(wait_until(|| {
        dispatcher
            .handle()
            .invoke(|s| s.frame_rate().total_frames() == 0)
            .unwrap()
    }));
    assert_eq!(sensor.depth_subscriber_count(), 0);
    assert!(dispatcher.handle().invoke(|s| s.image().is_some()).unwrap());

    pipeline.join().unwrap();
}

#[test]
fn test_session_manager_drives_pipeline() {
    let dispatcher = Dispatcher::start("test-presentation", ViewerSurface::new).unwrap();
    let pipeline =
        CapturePipeline::start(DepthFrameProcessor::new(), SinkHandle::direct(dispatcher.handle()))
            .unwrap();

    let mut manager =
        SensorSessionManager::with_registry(DesiredConfig::default(), SessionRegistry::new());
    let controller = pipeline.controller();
    manager.subscribe(move |notification| {
        if let SessionNotification::SensorChanged { old, new } = notification {
            controller.sensor_changed(old.clone(), new.clone());
        }
    });

    let sensor = Arc::new(SimulatedSensor::new("managed"));
    manager.set_sensor(Some(sensor.clone()));
    assert!(wait_until(|| sensor.depth_subscriber_count() == 1));

    sensor.emit_synthetic_depth_frame();
    assert!(wait_until(|| surface_writes(&dispatcher) == 1));

    manager.set_sensor(None);
    assert!(wait_until(|| sensor.depth_subscriber_count() == 0));
    assert!(!sensor.is_running());

    pipeline.join().unwrap();
}

#[test]
fn test_presentation_shutdown_stops_worker() {
    let dispatcher = Dispatcher::start("test-presentation", ViewerSurface::new).unwrap();
    let pipeline =
        CapturePipeline::start(DepthFrameProcessor::new(), SinkHandle::direct(dispatcher.handle()))
            .unwrap();
    let sensor = streaming_sensor("orphan", SMALL);
    attach(&pipeline, &sensor);

    dispatcher.shutdown().unwrap();
    sensor.emit_synthetic_depth_frame();
    assert!(wait_until(|| pipeline.is_finished()));

    match pipeline.join() {
        Err(PipelineError::DispatcherShutDown) => {}
        other => panic!("expected dispatcher shutdown, got {:?}", other),
    }
}
