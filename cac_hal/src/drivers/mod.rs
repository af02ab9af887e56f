//! Device drivers and their hardware ports.
//!
//! A driver owns exactly one physical resource and holds the per-device
//! state machine. The raw system calls sit behind two small port traits so
//! that the same driver runs against Linux hardware or the simulation:
//!
//! - [`AdcPort`] - open / read / close of one ADC channel file
//! - [`GpioPort`] - chip, line and output request of one GPIO line
//!
//! Backends are chosen by name through [`BackendRegistry`]:
//!
//! - `linux` - sysfs IIO files and the GPIO character device
//! - `simulation` - scripted values and an in-memory line recorder

pub mod adc;
pub mod gpio;
pub mod simulation;

use cac_common::config::BoardConfig;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

pub use adc::{SensorDriver, SysfsAdcPort};
pub use gpio::{CdevGpioPort, ValveDriver, ValvePhase};
pub use simulation::{SimAdc, SimGpio, SimulationFactory};

// ─── Ports ──────────────────────────────────────────────────────────

/// Access to one ADC channel, opened and closed around every read.
pub trait AdcPort: Send {
    /// Open the channel's backing file.
    fn open(&mut self, channel: u16) -> io::Result<()>;

    /// Read raw text into `buf`, returning the byte count.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Close the channel. Closing a closed port is a no-op.
    fn close(&mut self) -> io::Result<()>;
}

/// Access to one GPIO line held as an output.
pub trait GpioPort: Send {
    /// Open the chip device.
    fn open_chip(&mut self, path: &str) -> io::Result<()>;

    /// Look up a line by offset on the open chip.
    fn get_line(&mut self, pin: u16) -> io::Result<()>;

    /// Request the line as an output driven to `initial`.
    fn request_output(&mut self, label: &str, initial: u8) -> io::Result<()>;

    /// Drive the requested line.
    fn set_value(&mut self, value: u8) -> io::Result<()>;

    /// Give the line back.
    fn release_line(&mut self);

    /// Close the chip device.
    fn close_chip(&mut self);
}

// ─── Factories ──────────────────────────────────────────────────────

/// Creates the ports a [`crate::registry::DeviceRegistry`] hands to new drivers.
pub trait DriverFactory: Send + Sync {
    /// Backend name, e.g. `"linux"`.
    fn name(&self) -> &'static str;

    /// New ADC port for a board.
    fn adc_port(&self, board: &BoardConfig) -> Box<dyn AdcPort>;

    /// New GPIO port for a board.
    fn gpio_port(&self, board: &BoardConfig) -> Box<dyn GpioPort>;
}

/// Real hardware: sysfs ADC files and `gpio-cdev` lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxFactory;

impl DriverFactory for LinuxFactory {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn adc_port(&self, board: &BoardConfig) -> Box<dyn AdcPort> {
        Box::new(SysfsAdcPort::new(&board.iio_sysfs_path))
    }

    fn gpio_port(&self, _board: &BoardConfig) -> Box<dyn GpioPort> {
        Box::new(CdevGpioPort::new())
    }
}

// ─── BackendRegistry ────────────────────────────────────────────────

/// Named driver backends.
///
/// Constructed at startup, populated via `register()`, and passed to
/// `CacCore` by value.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<&'static str, Arc<dyn DriverFactory>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `linux` and `simulation` backends.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(LinuxFactory));
        reg.register(Arc::new(SimulationFactory::new()));
        reg
    }

    /// Register a backend under its own name, returning the one it replaces.
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) -> Option<Arc<dyn DriverFactory>> {
        self.factories.insert(factory.name(), factory)
    }

    /// Get a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DriverFactory>> {
        self.factories.get(name).cloned()
    }

    /// List all registered backend names.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_backends_are_registered() {
        let reg = BackendRegistry::with_builtin();
        assert_eq!(reg.list(), vec!["linux", "simulation"]);
        assert_eq!(reg.get("linux").unwrap().name(), "linux");
        assert!(reg.get("ethercat").is_none());
    }

    #[test]
    fn register_replaces_same_name() {
        let mut reg = BackendRegistry::new();
        assert!(reg.register(Arc::new(SimulationFactory::new())).is_none());
        assert!(reg.register(Arc::new(SimulationFactory::new())).is_some());
        assert_eq!(reg.list().len(), 1);
    }
}
