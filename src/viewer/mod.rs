// SPDX-License-Identifier: GPL-3.0-only

//! Presentation side of the frame pipelines
//!
//! Finished BGR32 buffers arrive on the presentation thread through a
//! [`SinkHandle`], which posts a blocking call to the [`Dispatcher`] that
//! owns the display state. Display buffers are created and written only on
//! that thread; capture workers only ever hand over raw bytes.

pub mod dispatcher;
pub mod frame_rate;

pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use frame_rate::FrameRateCounter;

use crate::constants::{BGR32_BYTES_PER_PIXEL, FRAME_RATE_WINDOW};
use crate::errors::PipelineResult;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Pixel layout of buffers handed to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel: B, G, R, unused
    Bgr32,
}

/// Geometry of one finished frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: usize,
    pub pixel_format: PixelFormat,
    /// The stream format changed and the capture buffers were reallocated
    pub format_changed: bool,
}

impl FrameDescriptor {
    pub fn bgr32(width: u32, height: u32, format_changed: bool) -> Self {
        Self {
            width,
            height,
            stride: width as usize * BGR32_BYTES_PER_PIXEL,
            pixel_format: PixelFormat::Bgr32,
            format_changed,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.stride * self.height as usize
    }
}

/// Display surface receiving finished frames on the presentation thread
pub trait PresentationSink {
    /// Paint one finished frame
    fn write_pixels(&mut self, descriptor: &FrameDescriptor, pixels: &[u8]);

    /// Clear output after a sensor change
    ///
    /// Returns `true` if the last image was kept on screen.
    fn reset(&mut self) -> bool;
}

/// Selects a sink inside the dispatcher state
pub type SinkSelector<S> = fn(&mut S) -> &mut dyn PresentationSink;

fn select_self<S: PresentationSink>(state: &mut S) -> &mut dyn PresentationSink {
    state
}

/// Cross-thread handle to one sink owned by a dispatcher
pub struct SinkHandle<S> {
    dispatcher: DispatcherHandle<S>,
    select: SinkSelector<S>,
}

impl<S> Clone for SinkHandle<S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            select: self.select,
        }
    }
}

impl<S: 'static> SinkHandle<S> {
    pub fn new(dispatcher: DispatcherHandle<S>, select: SinkSelector<S>) -> Self {
        Self { dispatcher, select }
    }

    /// Paint a buffer on the presentation thread and get it back
    ///
    /// Blocks until the sink has consumed the buffer.
    pub fn write_pixels(&self, descriptor: FrameDescriptor, pixels: Vec<u8>) -> PipelineResult<Vec<u8>> {
        let select = self.select;
        self.dispatcher.invoke(move |state| {
            select(state).write_pixels(&descriptor, &pixels);
            pixels
        })
    }

    /// Run the sink's reset hook; returns whether the image was retained
    pub fn reset(&self) -> PipelineResult<bool> {
        let select = self.select;
        self.dispatcher.invoke(move |state| select(state).reset())
    }
}

impl<S: PresentationSink + 'static> SinkHandle<S> {
    /// Handle to a dispatcher whose whole state is the sink
    pub fn direct(dispatcher: DispatcherHandle<S>) -> Self {
        Self::new(dispatcher, select_self::<S>)
    }
}

/// Display buffer of a surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayImage {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub pixels: Vec<u8>,
}

impl DisplayImage {
    /// Copy into an RGBA image for export
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        if self.stride == 0 {
            return None;
        }
        let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for row in self.pixels.chunks_exact(self.stride) {
            for px in row.chunks_exact(BGR32_BYTES_PER_PIXEL).take(self.width as usize) {
                rgba.extend_from_slice(&[px[2], px[1], px[0], 255]);
            }
        }
        image::RgbaImage::from_raw(self.width, self.height, rgba)
    }
}

/// Presentation surface for one stream
///
/// Owns the display buffer, reallocating it when the frame geometry or
/// stream format changes.
#[derive(Debug)]
pub struct ViewerSurface {
    image: Option<DisplayImage>,
    retain_image_on_sensor_change: bool,
    frame_rate: FrameRateCounter,
    allocations: u64,
    writes: u64,
}

impl ViewerSurface {
    pub fn new() -> Self {
        Self::with_options(false, FRAME_RATE_WINDOW)
    }

    pub fn with_options(retain_image_on_sensor_change: bool, frame_rate_window: Duration) -> Self {
        Self {
            image: None,
            retain_image_on_sensor_change,
            frame_rate: FrameRateCounter::with_window(frame_rate_window),
            allocations: 0,
            writes: 0,
        }
    }

    pub fn set_retain_image_on_sensor_change(&mut self, retain: bool) {
        self.retain_image_on_sensor_change = retain;
    }

    pub fn image(&self) -> Option<&DisplayImage> {
        self.image.as_ref()
    }

    pub fn frame_rate(&self) -> &FrameRateCounter {
        &self.frame_rate
    }

    /// Display buffers allocated so far
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Frames painted so far
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl Default for ViewerSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationSink for ViewerSurface {
    fn write_pixels(&mut self, descriptor: &FrameDescriptor, pixels: &[u8]) {
        if pixels.len() != descriptor.byte_len() {
            warn!(
                expected = descriptor.byte_len(),
                actual = pixels.len(),
                "Buffer does not match frame geometry, frame dropped"
            );
            return;
        }

        let needs_allocation = descriptor.format_changed
            || self.image.as_ref().is_none_or(|image| {
                image.width != descriptor.width
                    || image.height != descriptor.height
                    || image.stride != descriptor.stride
            });

        if needs_allocation {
            debug!(
                width = descriptor.width,
                height = descriptor.height,
                "Allocating display buffer"
            );
            self.image = Some(DisplayImage {
                width: descriptor.width,
                height: descriptor.height,
                stride: descriptor.stride,
                pixels: vec![0; descriptor.byte_len()],
            });
            self.allocations += 1;
        }

        if let Some(image) = self.image.as_mut() {
            image.pixels.copy_from_slice(pixels);
        }

        self.writes += 1;
        self.frame_rate.tick();
        trace!(writes = self.writes, "Frame presented");
    }

    fn reset(&mut self) -> bool {
        if !self.retain_image_on_sensor_change {
            self.image = None;
        }
        self.frame_rate.reset();
        self.retain_image_on_sensor_change
    }
}

/// Presentation state of a depth + color viewer
#[derive(Debug, Default)]
pub struct ViewerHost {
    pub depth: ViewerSurface,
    pub color: ViewerSurface,
}

impl ViewerHost {
    pub fn new(retain_image_on_sensor_change: bool, frame_rate_window: Duration) -> Self {
        Self {
            depth: ViewerSurface::with_options(retain_image_on_sensor_change, frame_rate_window),
            color: ViewerSurface::with_options(retain_image_on_sensor_change, frame_rate_window),
        }
    }

    pub fn depth_sink(dispatcher: DispatcherHandle<ViewerHost>) -> SinkHandle<ViewerHost> {
        SinkHandle::new(dispatcher, depth_surface)
    }

    pub fn color_sink(dispatcher: DispatcherHandle<ViewerHost>) -> SinkHandle<ViewerHost> {
        SinkHandle::new(dispatcher, color_surface)
    }
}

fn depth_surface(host: &mut ViewerHost) -> &mut dyn PresentationSink {
    &mut host.depth
}

fn color_surface(host: &mut ViewerHost) -> &mut dyn PresentationSink {
    &mut host.color
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_allocates_once_per_geometry() {
        let mut surface = ViewerSurface::new();
        surface.write_pixels(&FrameDescriptor::bgr32(2, 2, true), &[1u8; 16]);
        let same = FrameDescriptor::bgr32(2, 2, false);
        for value in 2..4u8 {
            surface.write_pixels(&same, &[value; 16]);
        }
        assert_eq!(surface.allocations(), 1);
        assert_eq!(surface.writes(), 3);
        assert_eq!(surface.image().map(|i| i.pixels[0]), Some(3));

        let bigger = FrameDescriptor::bgr32(4, 2, true);
        surface.write_pixels(&bigger, &[2u8; 32]);
        assert_eq!(surface.allocations(), 2);
        assert_eq!(surface.image().map(|i| i.pixels.len()), Some(32));
    }

    #[test]
    fn test_mismatched_buffer_is_refused() {
        let mut surface = ViewerSurface::new();
        surface.write_pixels(&FrameDescriptor::bgr32(2, 2, true), &[5u8; 12]);
        assert_eq!(surface.writes(), 0);
        assert_eq!(surface.allocations(), 0);
        assert!(surface.image().is_none());

        let frame = FrameDescriptor::bgr32(2, 2, false);
        surface.write_pixels(&frame, &[7u8; 16]);
        surface.write_pixels(&frame, &[8u8; 20]);
        assert_eq!(surface.writes(), 1);
        assert_eq!(surface.frame_rate().total_frames(), 1);
        assert_eq!(surface.image().map(|i| i.pixels.clone()), Some(vec![7u8; 16]));
    }

    #[test]
    fn test_reset_honors_retain_flag() {
        let mut surface = ViewerSurface::new();
        surface.write_pixels(&FrameDescriptor::bgr32(1, 1, true), &[9, 9, 9, 0]);
        assert!(!surface.reset());
        assert!(surface.image().is_none());

        surface.set_retain_image_on_sensor_change(true);
        surface.write_pixels(&FrameDescriptor::bgr32(1, 1, true), &[9, 9, 9, 0]);
        assert!(surface.reset());
        assert!(surface.image().is_some());
        assert_eq!(surface.frame_rate().total_frames(), 0);
    }

    #[test]
    fn test_rgba_export_swaps_channels() {
        let image = DisplayImage {
            width: 1,
            height: 1,
            stride: 4,
            pixels: vec![10, 20, 30, 0],
        };
        let rgba = image.to_rgba_image().unwrap();
        assert_eq!(rgba.get_pixel(0, 0).0, [30, 20, 10, 255]);
    }
}
