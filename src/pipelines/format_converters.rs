// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion into BGR32 display buffers
//!
//! Every converter writes into a caller-owned output buffer so the capture
//! worker can reuse one allocation per stream format. Output pixels are
//! 4 bytes in B, G, R, unused order.
//!
//! Length mismatches between input and output are geometry-tracking bugs in
//! the caller and are reported as [`ConversionError::BufferInvariant`]
//! instead of silently truncating.

use crate::backends::sensor::{ColorImageFormat, DepthThresholds};
use crate::constants::{BGR32_BYTES_PER_PIXEL, PLAYER_COUNT, PLAYER_INDEX_BITMASK, PLAYER_INDEX_BITMASK_WIDTH};
use crate::errors::ConversionError;
use bytemuck::{Pod, Zeroable};

/// One output pixel
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Bgr32 {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub unused: u8,
}

impl Bgr32 {
    fn set_rgb(&mut self, r: u8, g: u8, b: u8) {
        self.r = r;
        self.g = g;
        self.b = b;
    }

    fn gray(value: u8) -> Self {
        Self {
            b: value,
            g: value,
            r: value,
            unused: 0xFF,
        }
    }
}

/// Per-player intensity shifts, indexed by player id (0 = no player)
const INTENSITY_SHIFT_BY_PLAYER_R: [u8; PLAYER_COUNT] = [1, 2, 0, 2, 0, 0, 2, 0];
const INTENSITY_SHIFT_BY_PLAYER_G: [u8; PLAYER_COUNT] = [1, 2, 2, 0, 2, 0, 0, 1];
const INTENSITY_SHIFT_BY_PLAYER_B: [u8; PLAYER_COUNT] = [1, 0, 2, 2, 0, 2, 0, 2];

const TOO_NEAR_COLOR: (u8, u8, u8) = (255, 255, 255);
const TOO_FAR_COLOR: (u8, u8, u8) = (66, 0, 66);
const UNKNOWN_DEPTH_COLOR: (u8, u8, u8) = (66, 66, 33);

fn check_output(samples: usize, output: &[u8]) -> Result<(), ConversionError> {
    let expected = samples * BGR32_BYTES_PER_PIXEL;
    if output.len() != expected {
        return Err(ConversionError::BufferInvariant {
            samples,
            expected,
            actual: output.len(),
        });
    }
    Ok(())
}

fn check_input(pixels: usize, bytes_per_pixel: usize, input: &[u8]) -> Result<(), ConversionError> {
    let expected = pixels * bytes_per_pixel;
    if input.len() != expected {
        return Err(ConversionError::BufferInvariant {
            samples: pixels,
            expected,
            actual: input.len(),
        });
    }
    Ok(())
}

/// Split a raw depth sample into (player, depth)
#[inline]
pub fn unpack_depth_sample(sample: u16) -> (usize, u16) {
    (
        (sample & PLAYER_INDEX_BITMASK) as usize,
        sample >> PLAYER_INDEX_BITMASK_WIDTH,
    )
}

/// Colorize a depth+player frame
///
/// Pixels without a player that carry a sentinel depth get a fixed color;
/// everything else is an inverted 8-bit intensity (near = bright) tinted by
/// the player id. The unused byte of each output pixel is left untouched.
pub fn convert_depth_frame(
    raw: &[u16],
    thresholds: &DepthThresholds,
    output: &mut [u8],
) -> Result<(), ConversionError> {
    check_output(raw.len(), output)?;
    let pixels: &mut [Bgr32] = bytemuck::cast_slice_mut(output);

    for (&sample, pixel) in raw.iter().zip(pixels.iter_mut()) {
        let (player, depth) = unpack_depth_sample(sample);

        let sentinel = if player == 0 {
            if depth == thresholds.too_near {
                Some(TOO_NEAR_COLOR)
            } else if depth == thresholds.too_far {
                Some(TOO_FAR_COLOR)
            } else if depth == thresholds.unknown {
                Some(UNKNOWN_DEPTH_COLOR)
            } else {
                None
            }
        } else {
            None
        };

        match sentinel {
            Some((r, g, b)) => pixel.set_rgb(r, g, b),
            None => {
                // Drops the most significant depth bit
                let intensity = !(depth >> 4) as u8;
                pixel.set_rgb(
                    intensity >> INTENSITY_SHIFT_BY_PLAYER_R[player],
                    intensity >> INTENSITY_SHIFT_BY_PLAYER_G[player],
                    intensity >> INTENSITY_SHIFT_BY_PLAYER_B[player],
                );
            }
        }
    }

    Ok(())
}

/// Depth (player bits stripped) at a pixel, `None` outside the frame
pub fn depth_at(raw: &[u16], width: u32, x: u32, y: u32) -> Option<u16> {
    if x >= width {
        return None;
    }
    let index = (y as usize).checked_mul(width as usize)? + x as usize;
    raw.get(index).map(|&sample| unpack_depth_sample(sample).1)
}

/// Convert a color frame in any supported format to BGR32
pub fn convert_color_frame(
    format: ColorImageFormat,
    raw: &[u8],
    width: u32,
    height: u32,
    output: &mut [u8],
) -> Result<(), ConversionError> {
    let pixel_count = width as usize * height as usize;
    check_output(pixel_count, output)?;
    check_input(pixel_count, format.bytes_per_pixel(), raw)?;

    match format {
        ColorImageFormat::Undefined => Ok(()),
        ColorImageFormat::RgbResolution640x480Fps30
        | ColorImageFormat::RgbResolution1280x960Fps12
        | ColorImageFormat::YuvResolution640x480Fps15 => {
            // Delivered by the driver already as BGR32
            output.copy_from_slice(raw);
            Ok(())
        }
        ColorImageFormat::RawYuvResolution640x480Fps15 => {
            uyvy_to_bgr32(raw, output);
            Ok(())
        }
        ColorImageFormat::RawBayerResolution640x480Fps30
        | ColorImageFormat::RawBayerResolution1280x960Fps12 => {
            grbg_to_bgr32(raw, width, height, output);
            Ok(())
        }
        ColorImageFormat::InfraredResolution640x480Fps30 => {
            infrared_to_bgr32(raw, output);
            Ok(())
        }
    }
}

/// Convert UYVY (YUV 4:2:2) to BGR32
///
/// UYVY format: U0 Y0 V0 Y1 - each 4-byte group encodes 2 pixels.
/// Uses BT.601 coefficients.
fn uyvy_to_bgr32(data: &[u8], output: &mut [u8]) {
    let pixels: &mut [Bgr32] = bytemuck::cast_slice_mut(output);

    for (chunk, pair) in data.chunks_exact(4).zip(pixels.chunks_mut(2)) {
        let u = chunk[0] as f32 - 128.0;
        let y0 = chunk[1] as f32;
        let v = chunk[2] as f32 - 128.0;
        let y1 = chunk[3] as f32;

        for (y, pixel) in [y0, y1].into_iter().zip(pair.iter_mut()) {
            let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
            let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
            let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
            *pixel = Bgr32 { b, g, r, unused: 0xFF };
        }
    }
}

/// Convert Bayer GRBG to BGR32 with a nearest-neighbor demosaic
///
/// ```text
/// G R
/// B G
/// ```
/// Every pixel takes the colors of the 2x2 block it belongs to; a trailing
/// odd row or column reuses the last sample.
fn grbg_to_bgr32(data: &[u8], width: u32, height: u32, output: &mut [u8]) {
    let w = width as usize;
    let h = height as usize;
    let pixels: &mut [Bgr32] = bytemuck::cast_slice_mut(output);
    let at = |x: usize, y: usize| data[y.min(h - 1) * w + x.min(w - 1)] as u16;

    for y in 0..h {
        let by = y & !1;
        for x in 0..w {
            let bx = x & !1;
            let g0 = at(bx, by);
            let r = at(bx + 1, by) as u8;
            let b = at(bx, by + 1) as u8;
            let g1 = at(bx + 1, by + 1);
            let g = ((g0 + g1) / 2) as u8;
            pixels[y * w + x] = Bgr32 { b, g, r, unused: 0xFF };
        }
    }
}

/// Convert 16-bit little-endian infrared intensity to gray BGR32
fn infrared_to_bgr32(data: &[u8], output: &mut [u8]) {
    let pixels: &mut [Bgr32] = bytemuck::cast_slice_mut(output);
    for (chunk, pixel) in data.chunks_exact(2).zip(pixels.iter_mut()) {
        let value = u16::from_le_bytes([chunk[0], chunk[1]]);
        *pixel = Bgr32::gray((value >> 8) as u8);
    }
}
