//! # CAC Shared Memory
//!
//! Typed, named shared state regions and the handshake channel that
//! coordinates the control endpoint with the sensor and valve actors.
//!
//! ## Overview
//!
//! - [`SharedStateRegion`] maps a POSIX shared memory segment as a fixed
//!   array of one plain-data record type. Any process that knows the name
//!   can attach and copy slots in or out.
//! - [`HandshakeChannel`] holds the poll and actuate signals as futex words
//!   inside its own region, so waits block without polling and work between
//!   processes as well as threads.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cac_shared_memory::{AccessMode, SharedStateRegion};
//! use cac::state::SensorState;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let owner = SharedStateRegion::<SensorState>::create("sensor_shm", 4)?;
//! let reader = SharedStateRegion::<SensorState>::attach("sensor_shm", AccessMode::ReadOnly)?;
//! let first = reader.read(0)?;
//! # let _ = first;
//! owner.destroy()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handshake;
pub mod platform;
pub mod region;

pub use error::{HandshakeError, ShmError, ShmResult};
pub use handshake::{ActuatePhase, HandshakeChannel, PollPhase, SignalBlock};
pub use region::{AccessMode, RetryPolicy, SharedStateRegion};
