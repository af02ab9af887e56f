//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use cac_common::prelude::*;` and get
//! the most important types without listing individual paths.

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    BoardConfig, CacConfig, ConfigError, ConfigLoader, LogLevel, RuntimeConfig, SharedConfig,
};

// ─── Devices ────────────────────────────────────────────────────────
pub use crate::device::{BoardLayout, ComponentKind, DeviceId, SlotIndex};

// ─── Shared state ───────────────────────────────────────────────────
pub use crate::state::{
    DeviceStatus, FixedName, PlainState, SensorDescriptor, SensorState, ValveDescriptor,
    ValveState,
};
