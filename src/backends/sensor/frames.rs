// SPDX-License-Identifier: GPL-3.0-only

//! Frame handles delivered by sensor frame-ready notifications
//!
//! A driver publishes each new frame into a [`FrameSlot`] and notifies its
//! listeners with a [`FrameReady`] handle. Opening the handle succeeds only
//! while that frame is still the newest one in the slot, so a consumer that
//! falls behind sees stale notifications open to `None` and frames are
//! skipped at the driver rather than queued.

use super::types::{ColorImageFormat, DepthImageFormat};
use crate::errors::ConversionError;
use std::sync::{Arc, Mutex};

/// One depth frame: 16-bit samples packed as (depth << 3) | player
#[derive(Debug, Clone)]
pub struct DepthImageFrame {
    pub width: u32,
    pub height: u32,
    pub format: DepthImageFormat,
    pub frame_number: u64,
    pub pixels: Arc<[u16]>,
}

impl DepthImageFrame {
    pub fn pixel_data_length(&self) -> usize {
        self.pixels.len()
    }

    /// Copy the raw samples into a caller-owned buffer of identical length
    pub fn copy_pixel_data_to(&self, buffer: &mut [u16]) -> Result<(), ConversionError> {
        if buffer.len() != self.pixels.len() {
            return Err(ConversionError::BufferInvariant {
                samples: self.pixels.len(),
                expected: self.pixels.len(),
                actual: buffer.len(),
            });
        }
        buffer.copy_from_slice(&self.pixels);
        Ok(())
    }
}

/// One color frame in the format's native byte layout
#[derive(Debug, Clone)]
pub struct ColorImageFrame {
    pub width: u32,
    pub height: u32,
    pub format: ColorImageFormat,
    pub frame_number: u64,
    pub pixels: Arc<[u8]>,
}

impl ColorImageFrame {
    pub fn pixel_data_length(&self) -> usize {
        self.pixels.len()
    }

    pub fn copy_pixel_data_to(&self, buffer: &mut [u8]) -> Result<(), ConversionError> {
        if buffer.len() != self.pixels.len() {
            return Err(ConversionError::BufferInvariant {
                samples: self.pixels.len(),
                expected: self.pixels.len(),
                actual: buffer.len(),
            });
        }
        buffer.copy_from_slice(&self.pixels);
        Ok(())
    }
}

/// Single-frame buffer owned by a driver stream
pub struct FrameSlot<F> {
    latest: Mutex<Option<(u64, F)>>,
}

impl<F: Clone> FrameSlot<F> {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
        }
    }

    /// Replace the newest frame and return the handle listeners receive
    pub fn publish(self: &Arc<Self>, sequence: u64, frame: F) -> FrameReady<F> {
        let mut guard = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some((sequence, frame));
        FrameReady {
            slot: Arc::clone(self),
            sequence,
        }
    }

    /// Drop whatever frame is buffered (stream disabled or sensor stopped)
    pub fn clear(&self) {
        let mut guard = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

impl<F: Clone> Default for FrameSlot<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Openable handle carried by a frame-ready notification
pub struct FrameReady<F> {
    slot: Arc<FrameSlot<F>>,
    sequence: u64,
}

impl<F: Clone> FrameReady<F> {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Open the frame; `None` once a newer frame has replaced it
    pub fn open(&self) -> Option<F> {
        let guard = self.slot.latest.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some((sequence, frame)) if *sequence == self.sequence => Some(frame.clone()),
            _ => None,
        }
    }
}

impl<F> Clone for FrameReady<F> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            sequence: self.sequence,
        }
    }
}

impl<F> std::fmt::Debug for FrameReady<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReady")
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Callback a driver invokes for every new frame.
///
/// Invoked on the driver's thread; implementations must only hand the
/// notification off, never process it inline.
pub type FrameListener<F> = Arc<dyn Fn(FrameReady<F>) + Send + Sync>;

/// Token returned by a frame subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);
