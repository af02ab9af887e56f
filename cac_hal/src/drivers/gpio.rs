//! GPIO valve driver.
//!
//! State machine: `Uninitialized → Ready → Released`. The line is acquired
//! once, held for the life of the owning actor, and written only while
//! `Ready`. Release is idempotent and also runs on drop.

use super::GpioPort;
use crate::error::DeviceError;
use cac_common::device::DeviceId;
use gpio_cdev::{Chip, Line, LineHandle, LineRequestFlags};
use std::io;
use tracing::{debug, info};

// ─── CdevGpioPort ───────────────────────────────────────────────────

/// GPIO character device port backed by `gpio-cdev`.
#[derive(Default)]
pub struct CdevGpioPort {
    chip: Option<Chip>,
    line: Option<Line>,
    handle: Option<LineHandle>,
}

impl std::fmt::Debug for CdevGpioPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdevGpioPort")
            .field("chip_open", &self.chip.is_some())
            .field("line_requested", &self.handle.is_some())
            .finish()
    }
}

impl CdevGpioPort {
    /// Port with nothing acquired.
    pub fn new() -> Self {
        Self::default()
    }
}

fn cdev_err(e: gpio_cdev::Error) -> io::Error {
    io::Error::other(e.to_string())
}

fn not_acquired(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{what} not acquired"))
}

impl GpioPort for CdevGpioPort {
    fn open_chip(&mut self, path: &str) -> io::Result<()> {
        self.chip = Some(Chip::new(path).map_err(cdev_err)?);
        Ok(())
    }

    fn get_line(&mut self, pin: u16) -> io::Result<()> {
        let chip = self.chip.as_mut().ok_or_else(|| not_acquired("chip"))?;
        self.line = Some(chip.get_line(u32::from(pin)).map_err(cdev_err)?);
        Ok(())
    }

    fn request_output(&mut self, label: &str, initial: u8) -> io::Result<()> {
        let line = self.line.as_ref().ok_or_else(|| not_acquired("line"))?;
        let handle = line
            .request(LineRequestFlags::OUTPUT, initial, label)
            .map_err(cdev_err)?;
        self.handle = Some(handle);
        Ok(())
    }

    fn set_value(&mut self, value: u8) -> io::Result<()> {
        let handle = self.handle.as_ref().ok_or_else(|| not_acquired("line"))?;
        handle.set_value(value).map_err(cdev_err)
    }

    fn release_line(&mut self) {
        // Dropping the handle closes the line request fd.
        self.handle = None;
        self.line = None;
    }

    fn close_chip(&mut self) {
        self.chip = None;
    }
}

// ─── ValveDriver ────────────────────────────────────────────────────

/// Lifecycle phase of a [`ValveDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValvePhase {
    /// Nothing acquired yet
    Uninitialized,
    /// Line held as an output
    Ready,
    /// Line given back; terminal
    Released,
}

/// Exclusive owner of one valve's GPIO line.
pub struct ValveDriver {
    id: DeviceId,
    pin: u16,
    chip_path: String,
    label: String,
    port: Box<dyn GpioPort>,
    phase: ValvePhase,
    applied: Option<bool>,
}

impl ValveDriver {
    /// New driver in `Uninitialized`.
    pub fn new(
        id: DeviceId,
        pin: u16,
        chip_path: &str,
        label: &str,
        port: Box<dyn GpioPort>,
    ) -> Self {
        Self {
            id,
            pin,
            chip_path: chip_path.to_string(),
            label: label.to_string(),
            port,
            phase: ValvePhase::Uninitialized,
            applied: None,
        }
    }

    /// Device id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Line offset.
    pub fn pin(&self) -> u16 {
        self.pin
    }

    /// Current phase.
    pub fn phase(&self) -> ValvePhase {
        self.phase
    }

    /// Last value written successfully, if any.
    pub fn applied(&self) -> Option<bool> {
        self.applied
    }

    /// Acquire chip, line and output request, driving the line low.
    ///
    /// Anything acquired before a failing step is given back before the
    /// error is returned. Calling this on a `Ready` driver is a no-op; a
    /// released driver cannot be re-acquired.
    pub fn init(&mut self) -> Result<(), DeviceError> {
        match self.phase {
            ValvePhase::Ready => return Ok(()),
            ValvePhase::Released => return Err(DeviceError::NotReady),
            ValvePhase::Uninitialized => {}
        }

        if self.chip_path.is_empty() {
            return Err(DeviceError::GpioPathEmpty);
        }

        self.port
            .open_chip(&self.chip_path)
            .map_err(|e| DeviceError::OpenGpio {
                path: self.chip_path.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self.port.get_line(self.pin) {
            self.port.close_chip();
            return Err(DeviceError::GpioGetLine {
                pin: self.pin,
                reason: e.to_string(),
            });
        }

        if let Err(e) = self.port.request_output(&self.label, 0) {
            self.port.release_line();
            self.port.close_chip();
            return Err(DeviceError::GpioRequestOutput {
                pin: self.pin,
                reason: e.to_string(),
            });
        }

        self.phase = ValvePhase::Ready;
        self.applied = Some(false);
        info!("valve {} acquired line {} on {}", self.id, self.pin, self.chip_path);
        Ok(())
    }

    /// Write `open` to the line. Failures are reported, never retried.
    pub fn apply(&mut self, open: bool) -> Result<(), DeviceError> {
        if self.phase != ValvePhase::Ready {
            return Err(DeviceError::NotReady);
        }
        self.port
            .set_value(u8::from(open))
            .map_err(|e| DeviceError::WriteGpio {
                pin: self.pin,
                reason: e.to_string(),
            })?;
        self.applied = Some(open);
        debug!("valve {} line {} <- {}", self.id, self.pin, u8::from(open));
        Ok(())
    }

    /// Give the line and chip back. Safe to call any number of times.
    pub fn release(&mut self) {
        if self.phase == ValvePhase::Ready {
            self.port.release_line();
            self.port.close_chip();
            info!("valve {} released line {}", self.id, self.pin);
        }
        self.phase = ValvePhase::Released;
    }
}

impl Drop for ValveDriver {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ValveDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValveDriver")
            .field("id", &self.id)
            .field("pin", &self.pin)
            .field("phase", &self.phase)
            .field("applied", &self.applied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimGpio;

    fn driver(gpio: &SimGpio, pin: u16) -> ValveDriver {
        ValveDriver::new(DeviceId(10), pin, "/dev/gpiochip0", "Valve_control", gpio.port())
    }

    #[test]
    fn init_drives_line_low_without_a_write() {
        let gpio = SimGpio::new();
        let mut valve = driver(&gpio, 5);
        valve.init().unwrap();

        assert_eq!(valve.phase(), ValvePhase::Ready);
        assert_eq!(gpio.value(5), Some(0));
        assert_eq!(gpio.write_count(5), 0);
        assert!(gpio.is_held(5));
        assert_eq!(gpio.label(5).as_deref(), Some("Valve_control"));
    }

    #[test]
    fn empty_chip_path_is_rejected_before_any_acquisition() {
        let gpio = SimGpio::new();
        let mut valve = ValveDriver::new(DeviceId(10), 5, "", "Valve_control", gpio.port());
        assert_eq!(valve.init(), Err(DeviceError::GpioPathEmpty));
        assert_eq!(gpio.chip_opens(), 0);
    }

    #[test]
    fn line_failure_closes_chip() {
        let gpio = SimGpio::new();
        gpio.fail_get_line(6, true);
        let mut valve = driver(&gpio, 6);

        assert!(matches!(valve.init(), Err(DeviceError::GpioGetLine { pin: 6, .. })));
        assert_eq!(gpio.open_chips(), 0);
        assert_eq!(valve.phase(), ValvePhase::Uninitialized);
    }

    #[test]
    fn request_failure_releases_line_and_chip() {
        let gpio = SimGpio::new();
        gpio.fail_request(19, true);
        let mut valve = driver(&gpio, 19);

        assert!(matches!(
            valve.init(),
            Err(DeviceError::GpioRequestOutput { pin: 19, .. })
        ));
        assert_eq!(gpio.open_chips(), 0);
        assert!(!gpio.is_held(19));
    }

    #[test]
    fn line_held_by_another_owner_cannot_be_requested() {
        let gpio = SimGpio::new();
        let mut first = driver(&gpio, 5);
        first.init().unwrap();

        let mut second = driver(&gpio, 5);
        assert!(matches!(
            second.init(),
            Err(DeviceError::GpioRequestOutput { .. })
        ));

        first.release();
        second.init().unwrap();
    }

    #[test]
    fn apply_writes_once_per_call() {
        let gpio = SimGpio::new();
        let mut valve = driver(&gpio, 26);
        valve.init().unwrap();

        valve.apply(true).unwrap();
        valve.apply(true).unwrap();
        assert_eq!(gpio.writes(26), vec![1, 1]);
        assert_eq!(valve.applied(), Some(true));
    }

    #[test]
    fn apply_failure_is_reported_not_retried() {
        let gpio = SimGpio::new();
        let mut valve = driver(&gpio, 5);
        valve.init().unwrap();
        gpio.fail_write(5, true);

        assert!(matches!(valve.apply(true), Err(DeviceError::WriteGpio { .. })));
        assert_eq!(gpio.write_attempts(5), 1);
        assert_eq!(valve.applied(), Some(false));
    }

    #[test]
    fn apply_requires_ready() {
        let gpio = SimGpio::new();
        let mut valve = driver(&gpio, 5);
        assert_eq!(valve.apply(true), Err(DeviceError::NotReady));

        valve.init().unwrap();
        valve.release();
        assert_eq!(valve.apply(true), Err(DeviceError::NotReady));
        assert_eq!(valve.init(), Err(DeviceError::NotReady));
    }

    #[test]
    fn release_twice_releases_once() {
        let gpio = SimGpio::new();
        let mut valve = driver(&gpio, 5);
        valve.init().unwrap();

        valve.release();
        valve.release();
        drop(valve);
        assert_eq!(gpio.release_count(5), 1);
        assert_eq!(gpio.open_chips(), 0);
    }

    #[test]
    fn drop_releases_held_line() {
        let gpio = SimGpio::new();
        {
            let mut valve = driver(&gpio, 6);
            valve.init().unwrap();
        }
        assert!(!gpio.is_held(6));
        assert_eq!(gpio.release_count(6), 1);
    }
}
