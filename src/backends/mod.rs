// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for depth sensors
//!
//! - [`sensor`]: Driver trait, session manager, elevation control and a
//!   simulated sensor for tests and the CLI

pub mod sensor;
