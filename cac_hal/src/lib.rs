//! # CAC HAL Library
//!
//! Device drivers, per-process device tables, the sensor and valve actors,
//! the control endpoint and the `CacCore` orchestration behind the `cac_hal`
//! binary.
//!
//! # Module Structure
//!
//! - [`drivers`] - ADC and GPIO drivers, hardware ports, simulation backend
//! - [`registry`] - `DeviceRegistry`: device id → descriptor and owned driver
//! - [`sensor_actor`] / [`valve_actor`] - the two hardware-owning contexts
//! - [`control`] - `ControlEndpoint`: poll request and valve commands
//! - [`core`] - `CacCore`: region lifecycle, actor threads, shutdown
//! - [`menu`] - interactive command parsing and rendering
//! - [`error`] - `DeviceError` and `CacError`
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   request / ready    ┌──────────────────┐
//! │ ControlEndpoint├─────────────────────►│  SensorActor     │
//! │                │◄─────────────────────┤  (ADC drivers)   │
//! │                │                      └────────┬─────────┘
//! │                │   actuate                     │ writes
//! │                ├─────────────┐                 ▼
//! └───────┬────────┘             │        ┌──────────────────┐
//!         │ desired              ▼        │  sensor region   │
//!         ▼               ┌──────────────┐└──────────────────┘
//! ┌────────────────┐      │  ValveActor  │
//! │  valve region  │◄─────┤ (GPIO lines) │
//! └────────────────┘      └──────────────┘
//! ```

pub mod control;
pub mod core;
pub mod drivers;
pub mod error;
pub mod menu;
pub mod registry;
pub mod sensor_actor;
pub mod valve_actor;

// Re-export key types for convenience
pub use crate::control::{ControlEndpoint, SensorReading};
pub use crate::core::CacCore;
pub use crate::drivers::{BackendRegistry, DriverFactory, SimulationFactory};
pub use crate::error::{CacError, DeviceError};
pub use crate::registry::DeviceRegistry;
pub use crate::sensor_actor::SensorActor;
pub use crate::valve_actor::ValveActor;
