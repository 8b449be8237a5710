// SPDX-License-Identifier: GPL-3.0-only

//! Sensor-wide constants
//!
//! Values here describe the depth sensor hardware contract: the packing of
//! depth samples, the elevation motor limits and its command rate limit.

use std::time::Duration;

/// Number of low-order bits in a depth sample that carry the player index
pub const PLAYER_INDEX_BITMASK_WIDTH: u16 = 3;

/// Mask selecting the player index from a raw depth sample
pub const PLAYER_INDEX_BITMASK: u16 = (1 << PLAYER_INDEX_BITMASK_WIDTH) - 1;

/// Number of distinct player ids (0 = no player, 1-7 = tracked bodies)
pub const PLAYER_COUNT: usize = 8;

/// Bytes per output pixel (B, G, R, unused)
pub const BGR32_BYTES_PER_PIXEL: usize = 4;

/// Fallback elevation limits used when no sensor reports its own (degrees)
pub const DEFAULT_MIN_ELEVATION_ANGLE: i32 = -27;
pub const DEFAULT_MAX_ELEVATION_ANGLE: i32 = 27;

/// Minimum spacing between two elevation commands.
///
/// The motor accepts at most 15 commands per 20 seconds and needs at least
/// one second between commands; 1350ms satisfies both.
pub const ELEVATION_COMMAND_INTERVAL: Duration = Duration::from_millis(1350);

/// Sliding window used by the frame rate counter
pub const FRAME_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Depth sentinel codes reported by the sensor's depth stream
pub mod depth_sentinels {
    /// Object closer than the sensor can measure
    pub const TOO_NEAR: u16 = 0x0000;
    /// Object farther than the sensor can measure
    pub const TOO_FAR: u16 = 0x0FFF;
    /// No reading for this pixel (all 13 depth bits set)
    pub const UNKNOWN: u16 = 0x1FFF;
}
