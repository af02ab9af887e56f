//! ADC sensor driver.
//!
//! One poll cycle is `Closed → Open → {ReadOk | ReadError} → Closed`: the
//! channel file is opened and closed around every read and never held
//! between cycles. A close is attempted whatever the read produced, and the
//! first error of the cycle is the one reported.

use super::AdcPort;
use crate::error::DeviceError;
use cac_common::consts::{ADC_READ_BUF_LEN, adc_channel_path};
use cac_common::device::DeviceId;
use cac_common::state::DeviceStatus;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::IntoRawFd;
use tracing::debug;

// ─── SysfsAdcPort ───────────────────────────────────────────────────

/// `in_voltage<N>_raw` files under an IIO sysfs directory.
#[derive(Debug)]
pub struct SysfsAdcPort {
    base: String,
    file: Option<File>,
}

impl SysfsAdcPort {
    /// Port rooted at `base` (with trailing separator).
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            file: None,
        }
    }
}

impl AdcPort for SysfsAdcPort {
    fn open(&mut self, channel: u16) -> io::Result<()> {
        self.file = Some(File::open(adc_channel_path(&self.base, channel))?);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "channel not open")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        // Dropping a File ignores close(2) errors; close by hand to report them.
        let fd = file.into_raw_fd();
        if unsafe { libc::close(fd) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl Drop for SysfsAdcPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ─── SensorDriver ───────────────────────────────────────────────────

/// Exclusive owner of one ADC channel.
pub struct SensorDriver {
    id: DeviceId,
    channel: u16,
    path: String,
    port: Box<dyn AdcPort>,
    last_value: Option<i16>,
    last_status: DeviceStatus,
}

impl SensorDriver {
    /// New driver; no hardware is touched until the first [`read`](Self::read).
    pub fn new(id: DeviceId, channel: u16, base: &str, port: Box<dyn AdcPort>) -> Self {
        Self {
            id,
            channel,
            path: adc_channel_path(base, channel),
            port,
            last_value: None,
            last_status: DeviceStatus::NotRead,
        }
    }

    /// Device id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// ADC channel.
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Run one open / read / close cycle.
    pub fn read(&mut self) -> Result<i16, DeviceError> {
        if let Err(e) = self.port.open(self.channel) {
            let err = DeviceError::OpenAdc {
                path: self.path.clone(),
                reason: e.to_string(),
            };
            self.last_status = err.status();
            return Err(err);
        }

        let mut buf = [0u8; ADC_READ_BUF_LEN];
        let read = match self.port.read(&mut buf) {
            Ok(n) => parse_raw(&buf[..n]).map_err(|reason| DeviceError::ReadAdc {
                path: self.path.clone(),
                reason,
            }),
            Err(e) => Err(DeviceError::ReadAdc {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        };

        let closed = self.port.close().map_err(|e| DeviceError::CloseAdc {
            path: self.path.clone(),
            reason: e.to_string(),
        });

        let outcome = match (read, closed) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
        };

        match &outcome {
            Ok(value) => {
                self.last_value = Some(*value);
                self.last_status = DeviceStatus::Ok;
                debug!("sensor {} channel {} = {}", self.id, self.channel, value);
            }
            Err(e) => self.last_status = e.status(),
        }
        outcome
    }

    /// Value of the last successful cycle. Never touches hardware.
    pub fn last_value(&self) -> Option<i16> {
        self.last_value
    }

    /// Status of the last cycle. Never touches hardware.
    pub fn last_status(&self) -> DeviceStatus {
        self.last_status
    }
}

impl std::fmt::Debug for SensorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorDriver")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("last_value", &self.last_value)
            .field("last_status", &self.last_status)
            .finish()
    }
}

fn parse_raw(bytes: &[u8]) -> Result<i16, String> {
    if bytes.is_empty() {
        return Err("short read".to_string());
    }
    let text = std::str::from_utf8(bytes).map_err(|_| "non-text data".to_string())?;
    let trimmed = text.trim();
    trimmed
        .parse::<i16>()
        .map_err(|_| format!("not an integer: {trimmed:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimAdc;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parse_accepts_sysfs_text() {
        assert_eq!(parse_raw(b"1023\n"), Ok(1023));
        assert_eq!(parse_raw(b"-12"), Ok(-12));
        assert!(parse_raw(b"").is_err());
        assert!(parse_raw(b"abc\n").is_err());
        assert!(parse_raw(b"\n").is_err());
    }

    #[test]
    fn sysfs_port_reads_channel_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("in_voltage3_raw"), "777\n").unwrap();
        let base = format!("{}/", dir.path().display());

        let mut driver =
            SensorDriver::new(DeviceId(18), 3, &base, Box::new(SysfsAdcPort::new(&base)));
        assert_eq!(driver.read(), Ok(777));
        assert_eq!(driver.last_value(), Some(777));
        assert_eq!(driver.last_status(), DeviceStatus::Ok);
    }

    #[test]
    fn missing_channel_file_is_open_error() {
        let dir = TempDir::new().unwrap();
        let base = format!("{}/", dir.path().display());
        let mut driver =
            SensorDriver::new(DeviceId(15), 0, &base, Box::new(SysfsAdcPort::new(&base)));
        assert!(matches!(driver.read(), Err(DeviceError::OpenAdc { .. })));
        assert_eq!(driver.last_status(), DeviceStatus::ErrOpenAdc);
        assert_eq!(driver.last_value(), None);
    }

    #[test]
    fn open_failure_skips_read_and_close() {
        let adc = SimAdc::new();
        adc.fail_open(1, true);
        let mut driver = SensorDriver::new(DeviceId(16), 1, "/sim/", adc.port());

        assert!(matches!(driver.read(), Err(DeviceError::OpenAdc { .. })));
        assert_eq!(adc.read_count(1), 0);
        assert_eq!(adc.close_count(1), 0);
    }

    #[test]
    fn read_error_still_closes_and_wins_over_close_error() {
        let adc = SimAdc::new();
        adc.set_raw(0, "oops");
        adc.fail_close(0, true);
        let mut driver = SensorDriver::new(DeviceId(15), 0, "/sim/", adc.port());

        assert!(matches!(driver.read(), Err(DeviceError::ReadAdc { .. })));
        assert_eq!(adc.close_count(0), 1);
        assert!(!adc.is_open(0));
    }

    #[test]
    fn close_error_reported_after_good_read() {
        let adc = SimAdc::new();
        adc.set_value(2, 100);
        adc.fail_close(2, true);
        let mut driver = SensorDriver::new(DeviceId(17), 2, "/sim/", adc.port());

        assert!(matches!(driver.read(), Err(DeviceError::CloseAdc { .. })));
        assert_eq!(driver.last_status(), DeviceStatus::ErrCloseAdc);
    }

    #[test]
    fn failed_cycle_keeps_last_good_value() {
        let adc = SimAdc::new();
        adc.set_value(0, 42);
        let mut driver = SensorDriver::new(DeviceId(15), 0, "/sim/", adc.port());
        assert_eq!(driver.read(), Ok(42));

        adc.fail_open(0, true);
        assert!(driver.read().is_err());
        assert_eq!(driver.last_value(), Some(42));
        assert_eq!(driver.last_status(), DeviceStatus::ErrOpenAdc);
    }

    #[test]
    fn cached_value_needs_no_hardware() {
        let adc = SimAdc::new();
        adc.set_value(0, 5);
        let mut driver = SensorDriver::new(DeviceId(15), 0, "/sim/", adc.port());
        driver.read().unwrap();
        let opens = adc.open_count(0);

        for _ in 0..3 {
            assert_eq!(driver.last_value(), Some(5));
        }
        assert_eq!(adc.open_count(0), opens);
    }
}
