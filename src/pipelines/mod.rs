// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing pipelines
//!
//! # Pipeline Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────┐     ┌──────────────────┐
//! │ Sensor frame │ ──▶ │  Capture worker    │ ──▶ │ Presentation     │
//! │  ready event │     │  - open frame      │     │ thread           │
//! │              │     │  - realloc on fmt  │     │  - write pixels  │
//! │              │     │  - convert → BGR32 │     │  - frame rate    │
//! └──────────────┘     └────────────────────┘     └──────────────────┘
//! ```
//!
//! # Design Principles
//!
//! 1. **One frame in flight**: the worker blocks on the presentation handoff
//! 2. **Reuse buffers**: reallocation only happens when the stream format changes
//! 3. **Ordered control**: sensor swaps and frames share one worker queue
//!
//! # Modules
//!
//! - [`capture`]: Worker thread, handshake and shutdown
//! - [`format_converters`]: Depth colorization and color format conversion

pub mod capture;
pub mod format_converters;
