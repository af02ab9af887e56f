//! Simulation backend.
//!
//! [`SimAdc`] serves scripted channel text; [`SimGpio`] records every line
//! operation. Both are cheap handles over shared state, so a test keeps one
//! clone to script faults and inspect counters while the actors own the
//! ports created from another.

use super::{AdcPort, DriverFactory, GpioPort};
use cac_common::config::BoardConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

fn injected(what: &str) -> io::Error {
    io::Error::other(format!("simulated {what} failure"))
}

// ─── SimAdc ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AdcChannel {
    raw: Option<String>,
    fail_open: bool,
    fail_read: bool,
    fail_close: bool,
    open: bool,
    opens: u32,
    reads: u32,
    closes: u32,
}

/// Scripted ADC channels. Unscripted channels read `"0"`.
#[derive(Debug, Clone, Default)]
pub struct SimAdc {
    channels: Arc<Mutex<HashMap<u16, AdcChannel>>>,
}

impl SimAdc {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_channel<R>(&self, channel: u16, f: impl FnOnce(&mut AdcChannel) -> R) -> R {
        f(self.channels.lock().entry(channel).or_default())
    }

    /// Text returned by the next reads of `channel`.
    pub fn set_raw(&self, channel: u16, raw: &str) {
        self.with_channel(channel, |c| c.raw = Some(raw.to_string()));
    }

    /// Integer value returned by the next reads of `channel`, sysfs style.
    pub fn set_value(&self, channel: u16, value: i16) {
        self.set_raw(channel, &format!("{value}\n"));
    }

    /// Make opening `channel` fail.
    pub fn fail_open(&self, channel: u16, fail: bool) {
        self.with_channel(channel, |c| c.fail_open = fail);
    }

    /// Make reading `channel` fail.
    pub fn fail_read(&self, channel: u16, fail: bool) {
        self.with_channel(channel, |c| c.fail_read = fail);
    }

    /// Make closing `channel` fail.
    pub fn fail_close(&self, channel: u16, fail: bool) {
        self.with_channel(channel, |c| c.fail_close = fail);
    }

    /// Successful opens of `channel`.
    pub fn open_count(&self, channel: u16) -> u32 {
        self.with_channel(channel, |c| c.opens)
    }

    /// Read attempts on `channel`.
    pub fn read_count(&self, channel: u16) -> u32 {
        self.with_channel(channel, |c| c.reads)
    }

    /// Close attempts on `channel`.
    pub fn close_count(&self, channel: u16) -> u32 {
        self.with_channel(channel, |c| c.closes)
    }

    /// Whether `channel` is currently open.
    pub fn is_open(&self, channel: u16) -> bool {
        self.with_channel(channel, |c| c.open)
    }

    /// New port over these channels.
    pub fn port(&self) -> Box<dyn AdcPort> {
        Box::new(SimAdcPort {
            adc: self.clone(),
            channel: None,
        })
    }
}

/// [`AdcPort`] over a [`SimAdc`].
#[derive(Debug)]
pub struct SimAdcPort {
    adc: SimAdc,
    channel: Option<u16>,
}

impl AdcPort for SimAdcPort {
    fn open(&mut self, channel: u16) -> io::Result<()> {
        self.adc.with_channel(channel, |c| {
            if c.fail_open {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            c.open = true;
            c.opens += 1;
            Ok(())
        })?;
        self.channel = Some(channel);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let channel = self
            .channel
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        self.adc.with_channel(channel, |c| {
            c.reads += 1;
            if c.fail_read {
                return Err(injected("read"));
            }
            let raw = c.raw.as_deref().unwrap_or("0\n").as_bytes();
            let n = raw.len().min(buf.len());
            buf[..n].copy_from_slice(&raw[..n]);
            Ok(n)
        })
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(channel) = self.channel.take() else {
            return Ok(());
        };
        self.adc.with_channel(channel, |c| {
            c.closes += 1;
            c.open = false;
            if c.fail_close {
                Err(injected("close"))
            } else {
                Ok(())
            }
        })
    }
}

// ─── SimGpio ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimLine {
    held: bool,
    label: Option<String>,
    value: Option<u8>,
    writes: Vec<u8>,
    write_attempts: u32,
    releases: u32,
    fail_get_line: bool,
    fail_request: bool,
    fail_write: bool,
}

#[derive(Debug, Default)]
struct GpioState {
    fail_open_chip: bool,
    chip_opens: u32,
    open_chips: u32,
    lines: HashMap<u16, SimLine>,
}

/// In-memory GPIO chip recording every line operation.
///
/// A line can be held by one port at a time; a second request for a held
/// line fails the way the kernel reports `EBUSY`.
#[derive(Debug, Clone, Default)]
pub struct SimGpio {
    state: Arc<Mutex<GpioState>>,
}

impl SimGpio {
    /// Chip with every line free.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_line<R>(&self, pin: u16, f: impl FnOnce(&mut SimLine) -> R) -> R {
        f(self.state.lock().lines.entry(pin).or_default())
    }

    /// Make opening the chip fail.
    pub fn fail_open_chip(&self, fail: bool) {
        self.state.lock().fail_open_chip = fail;
    }

    /// Make looking up `pin` fail.
    pub fn fail_get_line(&self, pin: u16, fail: bool) {
        self.with_line(pin, |l| l.fail_get_line = fail);
    }

    /// Make requesting `pin` as output fail.
    pub fn fail_request(&self, pin: u16, fail: bool) {
        self.with_line(pin, |l| l.fail_request = fail);
    }

    /// Make writes to `pin` fail.
    pub fn fail_write(&self, pin: u16, fail: bool) {
        self.with_line(pin, |l| l.fail_write = fail);
    }

    /// Total chip opens.
    pub fn chip_opens(&self) -> u32 {
        self.state.lock().chip_opens
    }

    /// Chips currently open.
    pub fn open_chips(&self) -> u32 {
        self.state.lock().open_chips
    }

    /// Current line level, `None` if never driven.
    pub fn value(&self, pin: u16) -> Option<u8> {
        self.with_line(pin, |l| l.value)
    }

    /// Successful writes to `pin`, in order.
    pub fn writes(&self, pin: u16) -> Vec<u8> {
        self.with_line(pin, |l| l.writes.clone())
    }

    /// Number of successful writes to `pin`.
    pub fn write_count(&self, pin: u16) -> usize {
        self.with_line(pin, |l| l.writes.len())
    }

    /// Number of write attempts on `pin`, failed ones included.
    pub fn write_attempts(&self, pin: u16) -> u32 {
        self.with_line(pin, |l| l.write_attempts)
    }

    /// Number of times `pin` was released.
    pub fn release_count(&self, pin: u16) -> u32 {
        self.with_line(pin, |l| l.releases)
    }

    /// Whether `pin` is currently held as an output.
    pub fn is_held(&self, pin: u16) -> bool {
        self.with_line(pin, |l| l.held)
    }

    /// Consumer label of `pin`'s last request.
    pub fn label(&self, pin: u16) -> Option<String> {
        self.with_line(pin, |l| l.label.clone())
    }

    /// New port over this chip.
    pub fn port(&self) -> Box<dyn GpioPort> {
        Box::new(SimGpioPort {
            gpio: self.clone(),
            chip_open: false,
            pin: None,
            requested: false,
        })
    }
}

/// [`GpioPort`] over a [`SimGpio`].
#[derive(Debug)]
pub struct SimGpioPort {
    gpio: SimGpio,
    chip_open: bool,
    pin: Option<u16>,
    requested: bool,
}

impl GpioPort for SimGpioPort {
    fn open_chip(&mut self, _path: &str) -> io::Result<()> {
        let mut state = self.gpio.state.lock();
        if state.fail_open_chip {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        state.chip_opens += 1;
        state.open_chips += 1;
        self.chip_open = true;
        Ok(())
    }

    fn get_line(&mut self, pin: u16) -> io::Result<()> {
        if !self.chip_open {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        if self.gpio.with_line(pin, |l| l.fail_get_line) {
            return Err(injected("get line"));
        }
        self.pin = Some(pin);
        Ok(())
    }

    fn request_output(&mut self, label: &str, initial: u8) -> io::Result<()> {
        let pin = self
            .pin
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        self.gpio.with_line(pin, |l| {
            if l.fail_request {
                return Err(injected("request"));
            }
            if l.held {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            l.held = true;
            l.label = Some(label.to_string());
            l.value = Some(initial);
            Ok(())
        })?;
        self.requested = true;
        Ok(())
    }

    fn set_value(&mut self, value: u8) -> io::Result<()> {
        let pin = match (self.pin, self.requested) {
            (Some(pin), true) => pin,
            _ => return Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        self.gpio.with_line(pin, |l| {
            l.write_attempts += 1;
            if l.fail_write {
                return Err(injected("write"));
            }
            l.value = Some(value);
            l.writes.push(value);
            Ok(())
        })
    }

    fn release_line(&mut self) {
        if let Some(pin) = self.pin.take() {
            if self.requested {
                self.gpio.with_line(pin, |l| {
                    l.held = false;
                    l.releases += 1;
                });
            }
        }
        self.requested = false;
    }

    fn close_chip(&mut self) {
        if self.chip_open {
            self.gpio.state.lock().open_chips -= 1;
            self.chip_open = false;
        }
    }
}

// ─── SimulationFactory ──────────────────────────────────────────────

/// Backend handing out ports over one shared [`SimAdc`] and [`SimGpio`].
#[derive(Debug, Clone, Default)]
pub struct SimulationFactory {
    adc: SimAdc,
    gpio: SimGpio,
}

impl SimulationFactory {
    /// Fresh simulated hardware.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend over existing simulated hardware.
    pub fn with_hardware(adc: SimAdc, gpio: SimGpio) -> Self {
        Self { adc, gpio }
    }

    /// Simulated ADC.
    pub fn adc(&self) -> &SimAdc {
        &self.adc
    }

    /// Simulated GPIO chip.
    pub fn gpio(&self) -> &SimGpio {
        &self.gpio
    }
}

impl DriverFactory for SimulationFactory {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn adc_port(&self, _board: &BoardConfig) -> Box<dyn AdcPort> {
        self.adc.port()
    }

    fn gpio_port(&self, _board: &BoardConfig) -> Box<dyn GpioPort> {
        self.gpio.port()
    }
}
