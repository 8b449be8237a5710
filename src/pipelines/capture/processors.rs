// SPDX-License-Identifier: GPL-3.0-only

//! Depth and color frame processors for the capture worker

use super::FrameProcessor;
use crate::backends::sensor::{
    ColorImageFormat, ColorImageFrame, DepthImageFormat, DepthImageFrame, DepthSensor,
    FrameListener, SubscriptionId,
};
use crate::constants::BGR32_BYTES_PER_PIXEL;
use crate::errors::ConversionError;
use crate::pipelines::format_converters::{convert_color_frame, convert_depth_frame};
use crate::viewer::FrameDescriptor;
use tracing::debug;

/// Colorizes depth+player frames
#[derive(Debug)]
pub struct DepthFrameProcessor {
    raw: Vec<u16>,
    last_format: DepthImageFormat,
}

impl DepthFrameProcessor {
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            last_format: DepthImageFormat::Undefined,
        }
    }
}

impl Default for DepthFrameProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProcessor for DepthFrameProcessor {
    type Frame = DepthImageFrame;

    fn stream_name(&self) -> &'static str {
        "depth"
    }

    fn subscribe(&self, sensor: &dyn DepthSensor, listener: FrameListener<DepthImageFrame>) -> SubscriptionId {
        sensor.subscribe_depth_frames(listener)
    }

    fn process(
        &mut self,
        frame: &DepthImageFrame,
        sensor: &dyn DepthSensor,
        output: &mut Vec<u8>,
    ) -> Result<FrameDescriptor, ConversionError> {
        let format_changed = self.last_format != frame.format;
        if format_changed {
            debug!(format = %frame.format, "Reallocating depth buffers");
            self.raw = vec![0; frame.pixel_data_length()];
            *output = vec![0; frame.width as usize * frame.height as usize * BGR32_BYTES_PER_PIXEL];
            self.last_format = frame.format;
        }

        frame.copy_pixel_data_to(&mut self.raw)?;
        convert_depth_frame(&self.raw, &sensor.depth_thresholds(), output)?;

        Ok(FrameDescriptor::bgr32(frame.width, frame.height, format_changed))
    }

    fn reset(&mut self) {
        self.last_format = DepthImageFormat::Undefined;
    }
}

/// Converts color frames of any supported format to BGR32
#[derive(Debug)]
pub struct ColorFrameProcessor {
    raw: Vec<u8>,
    last_format: ColorImageFormat,
}

impl ColorFrameProcessor {
    pub fn new() -> Self {
        Self {
            raw: Vec::new(),
            last_format: ColorImageFormat::Undefined,
        }
    }
}

impl Default for ColorFrameProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProcessor for ColorFrameProcessor {
    type Frame = ColorImageFrame;

    fn stream_name(&self) -> &'static str {
        "color"
    }

    fn subscribe(&self, sensor: &dyn DepthSensor, listener: FrameListener<ColorImageFrame>) -> SubscriptionId {
        sensor.subscribe_color_frames(listener)
    }

    fn process(
        &mut self,
        frame: &ColorImageFrame,
        _sensor: &dyn DepthSensor,
        output: &mut Vec<u8>,
    ) -> Result<FrameDescriptor, ConversionError> {
        let format_changed = self.last_format != frame.format;
        if format_changed {
            debug!(format = %frame.format, "Reallocating color buffers");
            self.raw = vec![0; frame.pixel_data_length()];
            *output = vec![0; frame.width as usize * frame.height as usize * BGR32_BYTES_PER_PIXEL];
            self.last_format = frame.format;
        }

        frame.copy_pixel_data_to(&mut self.raw)?;
        convert_color_frame(frame.format, &self.raw, frame.width, frame.height, output)?;

        Ok(FrameDescriptor::bgr32(frame.width, frame.height, format_changed))
    }

    fn reset(&mut self) {
        self.last_format = ColorImageFormat::Undefined;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::SimulatedSensor;
    use crate::backends::sensor::simulated::synthetic_depth_pixels;
    use std::sync::Arc;

    fn depth_frame(format: DepthImageFormat, frame_number: u64, pixels: Vec<u16>) -> DepthImageFrame {
        let (width, height) = format.dimensions();
        DepthImageFrame {
            width,
            height,
            format,
            frame_number,
            pixels: Arc::from(pixels),
        }
    }

    #[test]
    fn test_reallocates_only_on_format_change() {
        let sensor = SimulatedSensor::new("proc");
        let mut processor = DepthFrameProcessor::new();
        let mut output = Vec::new();
        let format = DepthImageFormat::Resolution80x60Fps30;

        let first = depth_frame(format, 1, synthetic_depth_pixels(format, 1));
        let desc = processor.process(&first, &sensor, &mut output).unwrap();
        assert!(desc.format_changed);
        assert_eq!(output.len(), 80 * 60 * 4);

        let second = depth_frame(format, 2, synthetic_depth_pixels(format, 2));
        let desc = processor.process(&second, &sensor, &mut output).unwrap();
        assert!(!desc.format_changed);

        processor.reset();
        let desc = processor.process(&second, &sensor, &mut output).unwrap();
        assert!(desc.format_changed);
    }

    #[test]
    fn test_sample_count_mismatch_is_fatal() {
        let sensor = SimulatedSensor::new("proc");
        let mut processor = DepthFrameProcessor::new();
        let mut output = Vec::new();
        let format = DepthImageFormat::Resolution80x60Fps30;

        let short = depth_frame(format, 1, vec![0; 10]);
        assert!(matches!(
            processor.process(&short, &sensor, &mut output),
            Err(ConversionError::BufferInvariant { .. })
        ));
    }
}
