// SPDX-License-Identifier: GPL-3.0-only

//! Command-line front end driving a simulated sensor

use depth_viewer::backends::sensor::simulated::synthetic_depth_pixels;
use depth_viewer::backends::sensor::{
    ColorImageFormat, DepthImageFormat, SensorHandle, SensorSessionManager, SessionNotification,
    SimulatedSensor,
};
use depth_viewer::config::Config;
use depth_viewer::errors::AppResult;
use depth_viewer::pipelines::capture::{
    CapturePipeline, ColorFrameProcessor, DepthFrameProcessor, FrameProcessor,
    PipelineStatsSnapshot,
};
use depth_viewer::pipelines::format_converters::depth_at;
use depth_viewer::viewer::{
    Dispatcher, DispatcherHandle, DisplayImage, SinkHandle, ViewerHost, ViewerSurface,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SIMULATED_SENSOR_ID: &str = "simulated-0";
/// How long to wait for in-flight frames after the last emission
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Depth,
    Color,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub stream: Stream,
    pub frames: u64,
    pub fps: u32,
    /// Empty path means a timestamped default name
    pub snapshot: Option<PathBuf>,
}

/// Summary of one streaming run
struct RunReport {
    emitted: u64,
    stats: PipelineStatsSnapshot,
    writes: u64,
    total_frames: u64,
    frame_rate: f64,
    image: Option<DisplayImage>,
}

/// Stream synthetic frames through a capture pipeline into the viewer
pub fn run_stream(config: &Config, options: RunOptions) -> AppResult<()> {
    let retain = config.retain_image_on_sensor_change;
    let window = config.frame_rate_window();
    let dispatcher = Dispatcher::start("presentation", move || ViewerHost::new(retain, window))?;

    let sensor = Arc::new(SimulatedSensor::new(SIMULATED_SENSOR_ID));
    let mut manager = SensorSessionManager::new(config.sensor.clone())
        .with_elevation_interval(config.elevation_command_interval());

    println!("Sensor: {}", SIMULATED_SENSOR_ID);
    let mut readout = None;
    let report = match options.stream {
        Stream::Depth => {
            println!("Depth format: {}", config.sensor.depth_format);
            let mut frame_number = 0;
            run_pipeline(
                DepthFrameProcessor::new(),
                ViewerHost::depth_sink(dispatcher.handle()),
                &dispatcher.handle(),
                depth_view,
                &mut manager,
                &sensor,
                &options,
                |sensor| {
                    frame_number += 1;
                    let format = sensor.depth_format();
                    let pixels = synthetic_depth_pixels(format, frame_number);
                    let centre = center_depth(&pixels, format.dimensions());
                    let delivered = sensor.emit_depth_frame(pixels);
                    if delivered {
                        readout = Some(centre);
                    }
                    delivered
                },
            )?
        }
        Stream::Color => {
            println!("Color format: {}", config.sensor.color_format);
            run_pipeline(
                ColorFrameProcessor::new(),
                ViewerHost::color_sink(dispatcher.handle()),
                &dispatcher.handle(),
                color_view,
                &mut manager,
                &sensor,
                &options,
                |sensor| sensor.emit_synthetic_color_frame(),
            )?
        }
    };

    println!();
    println!("Frames emitted:    {}", report.emitted);
    println!("Frames converted:  {}", report.stats.frames_converted);
    println!("Frames skipped:    {}", report.stats.frames_skipped);
    println!("Buffer allocations:{:>3}", report.stats.buffer_allocations);
    println!("Frames presented:  {}", report.writes);
    println!("Frame counter:     {}", report.total_frames);
    println!("Frame rate:        {:.1} fps", report.frame_rate);

    if let Some((x, y, depth)) = readout {
        match depth {
            Some(depth) => println!("Depth at ({}, {}): {} mm", x, y, depth),
            None => println!("Depth at ({}, {}): out of range", x, y),
        }
    }

    if let Some(path) = options.snapshot {
        let path = if path.as_os_str().is_empty() {
            default_snapshot_path()
        } else {
            path
        };
        save_snapshot(report.image.as_ref(), &path)?;
    }

    dispatcher.shutdown()?;
    Ok(())
}

fn depth_view(host: &ViewerHost) -> &ViewerSurface {
    &host.depth
}

fn color_view(host: &ViewerHost) -> &ViewerSurface {
    &host.color
}

#[allow(clippy::too_many_arguments)]
fn run_pipeline<P, E>(
    processor: P,
    sink: SinkHandle<ViewerHost>,
    presentation: &DispatcherHandle<ViewerHost>,
    view: fn(&ViewerHost) -> &ViewerSurface,
    manager: &mut SensorSessionManager,
    sensor: &Arc<SimulatedSensor>,
    options: &RunOptions,
    mut emit: E,
) -> AppResult<RunReport>
where
    P: FrameProcessor,
    E: FnMut(&SimulatedSensor) -> bool,
{
    let pipeline = CapturePipeline::start(processor, sink)?;

    let controller = pipeline.controller();
    manager.subscribe(move |notification| {
        if let SessionNotification::SensorChanged { old, new } = notification {
            controller.sensor_changed(old.clone(), new.clone());
        }
    });
    manager.subscribe(|notification| debug!(?notification, "Session notification"));

    let handle: SensorHandle = sensor.clone();
    manager.set_sensor(Some(handle));
    println!("Availability: {:?}", manager.availability());
    if !manager.is_running() {
        manager.set_sensor(None);
        pipeline.join()?;
        return Err(format!("sensor did not start ({:?})", manager.running_state()).into());
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| format!("install Ctrl+C handler: {}", e))?;

    println!(
        "Streaming {} frames at {} fps... (press Ctrl+C to stop early)",
        options.frames, options.fps
    );
    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(options.fps.max(1)));
    let mut emitted = 0;
    for _ in 0..options.frames {
        if stop_flag.load(Ordering::SeqCst) {
            println!("Stopping early...");
            break;
        }
        if emit(sensor.as_ref()) {
            emitted += 1;
        }
        manager.process_pending_events();
        std::thread::sleep(frame_interval);
    }

    // Every delivered notification ends up either converted or skipped
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    loop {
        let stats = pipeline.stats();
        if stats.frames_converted + stats.frames_skipped >= emitted || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    let (writes, total_frames, frame_rate, image) = presentation.invoke(move |host| {
        let surface = view(host);
        (
            surface.writes(),
            surface.frame_rate().total_frames(),
            surface.frame_rate().frame_rate(),
            surface.image().cloned(),
        )
    })?;
    let stats = pipeline.stats();

    manager.set_sensor(None);
    pipeline.join()?;
    info!(emitted, converted = stats.frames_converted, "Run finished");

    Ok(RunReport {
        emitted,
        stats,
        writes,
        total_frames,
        frame_rate,
        image,
    })
}

/// Depth at the centre of a raw depth+player frame
fn center_depth(pixels: &[u16], (width, height): (u32, u32)) -> (u32, u32, Option<u16>) {
    let (x, y) = (width / 2, height / 2);
    (x, y, depth_at(pixels, width, x, y))
}

fn default_snapshot_path() -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("depth-viewer_{}.png", timestamp))
}

fn save_snapshot(image: Option<&DisplayImage>, path: &std::path::Path) -> AppResult<()> {
    let Some(rgba) = image.and_then(DisplayImage::to_rgba_image) else {
        println!("No image on screen, snapshot skipped");
        return Ok(());
    };
    rgba.save(path)?;
    println!("Snapshot saved: {}", path.display());
    Ok(())
}

/// Apply each angle in turn and wait for the motor to settle
pub fn tilt(config: &Config, angles: &[i32]) -> AppResult<()> {
    let sensor = Arc::new(SimulatedSensor::new(SIMULATED_SENSOR_ID));
    let mut manager = SensorSessionManager::new(config.sensor.clone())
        .with_elevation_interval(config.elevation_command_interval());

    let handle: SensorHandle = sensor.clone();
    manager.set_sensor(Some(handle));
    if !manager.is_running() {
        return Err(format!("sensor did not start ({:?})", manager.running_state()).into());
    }

    for &angle in angles {
        let applied = manager.set_elevation_angle(angle);
        if applied != angle {
            println!("Requested {}°, clamped to {}°", angle, applied);
        } else {
            println!("Requested {}°", angle);
        }
    }

    // Each command is followed by one settle interval
    let timeout = config.elevation_command_interval() * (angles.len() as u32 + 2) + DRAIN_TIMEOUT;
    let settled = manager.wait_for_elevation(timeout);

    let start = sensor
        .elevation_command_times()
        .first()
        .copied()
        .unwrap_or_else(Instant::now);
    println!();
    println!("Motor commands:");
    for (angle, at) in sensor.elevation_commands().iter().zip(sensor.elevation_command_times()) {
        println!("  +{:>6} ms  {}°", at.duration_since(start).as_millis(), angle);
    }
    println!("Final angle: {}°", manager.config().elevation_angle);
    if !settled {
        println!("Motor still moving after {:?}", timeout);
    }

    manager.teardown();
    Ok(())
}

/// List supported stream formats
pub fn list_formats() {
    println!("Color formats:");
    println!("{}", "-".repeat(50));
    for format in ColorImageFormat::ALL {
        println!("  {:<32} {} bytes/pixel", format.to_string(), format.bytes_per_pixel());
    }
    println!();
    println!("Depth formats:");
    println!("{}", "-".repeat(50));
    for format in DepthImageFormat::ALL {
        println!("  {}", format);
    }
}

/// Print the effective configuration, optionally saving it
pub fn show_config(config: &Config, save_to: Option<PathBuf>) -> AppResult<()> {
    let json = serde_json::to_string_pretty(config).map_err(|e| e.to_string())?;
    println!("{}", json);
    if let Some(path) = save_to {
        config.save(&path)?;
        println!("Config saved: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use depth_viewer::constants::PLAYER_INDEX_BITMASK_WIDTH;

    #[test]
    fn test_center_depth_reads_the_given_frame() {
        let mut pixels = vec![0u16; 4 * 3];
        pixels[4 + 2] = (1234 << PLAYER_INDEX_BITMASK_WIDTH) | 2;
        assert_eq!(center_depth(&pixels, (4, 3)), (2, 1, Some(1234)));

        // Short buffer: nothing to read at the centre
        assert_eq!(center_depth(&pixels[..5], (4, 3)), (2, 1, None));
    }
}
