//! CAC Common Library
//!
//! This crate provides the constants, board tables, configuration loading and
//! plain-data state types shared by every CAC workspace crate.
//!
//! # Module Structure
//!
//! - [`consts`] - Capacities, default paths and segment names
//! - [`device`] - Device ids, component kinds and the per-board slot table
//! - [`state`] - Plain-data slot types mirrored in shared memory
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! cac = { package = "cac_common", path = "../cac_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use cac_common::consts::*;
//! use cac_common::config::{CacConfig, ConfigLoader};
//! ```

pub mod config;
pub mod consts;
pub mod device;
pub mod prelude;
pub mod state;
