// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use depth_viewer::backends::sensor::{ColorImageFormat, DepthImageFormat};
use depth_viewer::config::Config;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depth-viewer")]
#[command(about = "Depth sensor session manager and frame viewer")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/depth-viewer/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set (e.g. "info", "depth_viewer=debug")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a simulated sensor through a capture pipeline
    Run {
        /// Stream to display
        #[arg(short, long, value_enum, default_value = "depth")]
        stream: StreamArg,

        /// Number of frames to emit
        #[arg(short, long, default_value = "30")]
        frames: u64,

        /// Emission rate in frames per second
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Depth resolution
        #[arg(long, value_enum)]
        depth_resolution: Option<DepthResolutionArg>,

        /// Color format
        #[arg(long, value_enum)]
        color_format: Option<ColorFormatArg>,

        /// Save the last presented frame as PNG (default name: depth-viewer_TIMESTAMP.png)
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        snapshot: Option<PathBuf>,
    },

    /// Drive the elevation motor through a sequence of angles
    Tilt {
        /// Target angles in degrees, applied back to back
        #[arg(required = true, allow_negative_numbers = true)]
        angles: Vec<i32>,

        /// Override the settle interval between motor commands
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// List supported color and depth formats
    Formats,

    /// Print the effective configuration
    Config {
        /// Write the effective configuration back to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StreamArg {
    Depth,
    Color,
}

#[derive(Clone, Copy, ValueEnum)]
enum DepthResolutionArg {
    #[value(name = "640x480")]
    R640x480,
    #[value(name = "320x240")]
    R320x240,
    #[value(name = "80x60")]
    R80x60,
}

impl From<DepthResolutionArg> for DepthImageFormat {
    fn from(arg: DepthResolutionArg) -> Self {
        match arg {
            DepthResolutionArg::R640x480 => DepthImageFormat::Resolution640x480Fps30,
            DepthResolutionArg::R320x240 => DepthImageFormat::Resolution320x240Fps30,
            DepthResolutionArg::R80x60 => DepthImageFormat::Resolution80x60Fps30,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ColorFormatArg {
    Rgb,
    RgbHigh,
    Yuv,
    RawYuv,
    Infrared,
    Bayer,
    BayerHigh,
}

impl From<ColorFormatArg> for ColorImageFormat {
    fn from(arg: ColorFormatArg) -> Self {
        match arg {
            ColorFormatArg::Rgb => ColorImageFormat::RgbResolution640x480Fps30,
            ColorFormatArg::RgbHigh => ColorImageFormat::RgbResolution1280x960Fps12,
            ColorFormatArg::Yuv => ColorImageFormat::YuvResolution640x480Fps15,
            ColorFormatArg::RawYuv => ColorImageFormat::RawYuvResolution640x480Fps15,
            ColorFormatArg::Infrared => ColorImageFormat::InfraredResolution640x480Fps30,
            ColorFormatArg::Bayer => ColorImageFormat::RawBayerResolution640x480Fps30,
            ColorFormatArg::BayerHigh => ColorImageFormat::RawBayerResolution1280x960Fps12,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => Some(path),
        None => Config::default_path().ok(),
    };
    let mut config = config_path
        .as_deref()
        .map(Config::load_from_or_default)
        .unwrap_or_default();
    if let Some(level) = cli.log_level {
        config.log_filter = level;
    }

    // Initialize logging
    // RUST_LOG takes precedence over --log-level and the config file
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::Run {
            stream,
            frames,
            fps,
            depth_resolution,
            color_format,
            snapshot,
        } => {
            if let Some(resolution) = depth_resolution {
                config.sensor.depth_format = resolution.into();
            }
            if let Some(format) = color_format {
                config.sensor.color_format = format.into();
            }
            let options = cli::RunOptions {
                stream: match stream {
                    StreamArg::Depth => cli::Stream::Depth,
                    StreamArg::Color => cli::Stream::Color,
                },
                frames,
                fps,
                snapshot,
            };
            cli::run_stream(&config, options)?;
        }
        Commands::Tilt {
            angles,
            interval_ms,
        } => {
            if let Some(interval) = interval_ms {
                config.elevation_command_interval_ms = interval;
            }
            cli::tilt(&config, &angles)?;
        }
        Commands::Formats => cli::list_formats(),
        Commands::Config { save } => cli::show_config(&config, save.then_some(config_path).flatten())?,
    }

    Ok(())
}
