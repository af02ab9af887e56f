//! Plain-data slot types mirrored in shared memory.
//!
//! Everything in this module may be copied byte-for-byte into a mapped
//! segment and read back by another process. The types therefore hold only
//! integers and fixed byte arrays: no references, no heap data, no file
//! descriptors and no driver handles. Live resources stay in the owning
//! process and are looked up by [`DeviceId`].
//!
//! Booleans and status codes are stored as raw `u8` so that a slot filled
//! with arbitrary bytes is still a valid value; decoding goes through
//! [`DeviceStatus::from_u8`] and never transmutes.

use core::fmt;
use core::mem::offset_of;
use static_assertions::{const_assert, const_assert_eq};

use crate::consts::NAME_LEN;
use crate::device::DeviceId;

// ─── PlainState ─────────────────────────────────────────────────────

/// Marker for types that may live inside a shared state region.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain only integer and byte-array
/// fields, have no drop glue, and treat every bit pattern as a valid value.
/// In particular they must never contain a pointer, reference, file
/// descriptor or any other value only meaningful inside one address space.
pub unsafe trait PlainState: Copy + Send + Sync + 'static {}

// ─── DeviceStatus ───────────────────────────────────────────────────

/// Per-slot status flag published alongside the last known value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceStatus {
    /// Last operation succeeded.
    Ok = 0,
    /// No cycle has touched this slot yet.
    NotRead = 1,
    /// The ADC channel path could not be opened.
    ErrOpenAdc = 2,
    /// The ADC read was short or not numeric.
    ErrReadAdc = 3,
    /// The ADC channel could not be closed.
    ErrCloseAdc = 4,
    /// No GPIO chip path configured.
    ErrGpioPathEmpty = 5,
    /// The GPIO chip could not be opened.
    ErrOpenGpio = 6,
    /// The GPIO line could not be acquired.
    ErrGpioGetLine = 7,
    /// The GPIO line could not be requested as output.
    ErrGpioRequestOutput = 8,
    /// Writing the GPIO line failed.
    ErrWriteGpio = 9,
    /// The device has no live driver in the owning process.
    ErrNotReady = 10,
}

impl DeviceStatus {
    /// Decode a raw status byte. Unknown values yield `None`.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Ok),
            1 => Some(Self::NotRead),
            2 => Some(Self::ErrOpenAdc),
            3 => Some(Self::ErrReadAdc),
            4 => Some(Self::ErrCloseAdc),
            5 => Some(Self::ErrGpioPathEmpty),
            6 => Some(Self::ErrOpenGpio),
            7 => Some(Self::ErrGpioGetLine),
            8 => Some(Self::ErrGpioRequestOutput),
            9 => Some(Self::ErrWriteGpio),
            10 => Some(Self::ErrNotReady),
            _ => None,
        }
    }

    /// True for [`DeviceStatus::Ok`].
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::NotRead => "not read",
            Self::ErrOpenAdc => "errOpenAdc",
            Self::ErrReadAdc => "errReadAdc",
            Self::ErrCloseAdc => "errCloseAdc",
            Self::ErrGpioPathEmpty => "errGPIOPathEmpty",
            Self::ErrOpenGpio => "errOpenGPIO",
            Self::ErrGpioGetLine => "errGPIOGetLine",
            Self::ErrGpioRequestOutput => "errGPIORequestOutput",
            Self::ErrWriteGpio => "errWriteGPIO",
            Self::ErrNotReady => "errNotReady",
        };
        f.write_str(s)
    }
}

// ─── FixedName ──────────────────────────────────────────────────────

/// NUL-padded UTF-8 name of at most [`NAME_LEN`] bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct FixedName([u8; NAME_LEN]);

impl FixedName {
    /// Empty name (all zero bytes).
    pub const EMPTY: Self = Self([0; NAME_LEN]);

    /// Encode `name`, or `None` if it does not fit or contains a NUL byte.
    pub fn new(name: &str) -> Option<Self> {
        let bytes = name.as_bytes();
        if bytes.len() > NAME_LEN || bytes.contains(&0) {
            return None;
        }
        let mut buf = [0u8; NAME_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Some(Self(buf))
    }

    /// Decoded name. Bytes that are not valid UTF-8 decode to `"?"`.
    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.0[..len]).unwrap_or("?")
    }
}

impl Default for FixedName {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for FixedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for FixedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Descriptors ────────────────────────────────────────────────────

/// Static description of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDescriptor {
    /// Sensor name.
    pub name: FixedName,
    /// Owning board name.
    pub board: FixedName,
    /// ADC channel number.
    pub channel: u16,
}

/// Static description of a valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveDescriptor {
    /// Valve name.
    pub name: FixedName,
    /// Owning board name.
    pub board: FixedName,
    /// GPIO line offset on the chip.
    pub pin: u16,
}

// ─── SensorState ────────────────────────────────────────────────────

/// One sensor slot.
///
/// Size: 44 bytes (2×16 name bytes + 3×u16 + 2×u8 + u32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SensorState {
    /// Sensor name.
    pub name: FixedName,
    /// Owning board name.
    pub board: FixedName,
    /// Device id.
    pub id: u16,
    /// ADC channel number.
    pub channel: u16,
    /// Last value read (raw ADC counts).
    pub value: i16,
    /// Raw [`DeviceStatus`] of the last cycle.
    pub status: u8,
    /// Reserved, always zero.
    pub _reserved: u8,
    /// Poll cycle that produced `status` (0 = never polled).
    pub cycle: u32,
}

const_assert_eq!(core::mem::size_of::<SensorState>(), 44);
const_assert!(!core::mem::needs_drop::<SensorState>());

// SAFETY: repr(C), integer and byte-array fields only, every bit pattern valid.
unsafe impl PlainState for SensorState {}

impl SensorState {
    /// Fresh slot for a configured sensor.
    pub fn new(id: DeviceId, desc: &SensorDescriptor) -> Self {
        Self {
            name: desc.name,
            board: desc.board,
            id: id.get(),
            channel: desc.channel,
            value: 0,
            status: DeviceStatus::NotRead as u8,
            _reserved: 0,
            cycle: 0,
        }
    }

    /// Device id of this slot.
    #[inline]
    pub fn device_id(&self) -> DeviceId {
        DeviceId(self.id)
    }

    /// Decoded status, `None` if the byte is not a known code.
    #[inline]
    pub fn status(&self) -> Option<DeviceStatus> {
        DeviceStatus::from_u8(self.status)
    }

    /// Static descriptor of this slot.
    pub fn descriptor(&self) -> SensorDescriptor {
        SensorDescriptor {
            name: self.name,
            board: self.board,
            channel: self.channel,
        }
    }

    /// Record the outcome of one poll cycle. The value is kept when the
    /// cycle failed so readers still see the last known reading.
    pub fn record(&mut self, value: Option<i16>, status: DeviceStatus, cycle: u32) {
        if let Some(v) = value {
            self.value = v;
        }
        self.status = status as u8;
        self.cycle = cycle;
    }
}

// ─── ValveState ─────────────────────────────────────────────────────

/// One valve slot.
///
/// Size: 40 bytes (2×16 name bytes + 2×u16 + 4×u8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ValveState {
    /// Valve name.
    pub name: FixedName,
    /// Owning board name.
    pub board: FixedName,
    /// Device id.
    pub id: u16,
    /// GPIO line offset.
    pub pin: u16,
    /// Desired state written by the control endpoint (0 = closed).
    pub desired: u8,
    /// State last written to the line by the valve actor.
    pub applied: u8,
    /// Raw [`DeviceStatus`] of the last apply.
    pub status: u8,
    /// Reserved, always zero.
    pub _reserved: u8,
}

const_assert_eq!(core::mem::size_of::<ValveState>(), 40);
const_assert!(!core::mem::needs_drop::<ValveState>());

// SAFETY: repr(C), integer and byte-array fields only, every bit pattern valid.
unsafe impl PlainState for ValveState {}

impl ValveState {
    /// Byte offset of `desired`. Stored only by the control endpoint.
    pub const DESIRED_OFFSET: usize = offset_of!(ValveState, desired);
    /// Byte offset of `applied`. Stored only by the valve actor.
    pub const APPLIED_OFFSET: usize = offset_of!(ValveState, applied);
    /// Byte offset of `status`. Stored only by the valve actor.
    pub const STATUS_OFFSET: usize = offset_of!(ValveState, status);

    /// Fresh slot for a configured valve: closed, never applied.
    pub fn new(id: DeviceId, desc: &ValveDescriptor) -> Self {
        Self {
            name: desc.name,
            board: desc.board,
            id: id.get(),
            pin: desc.pin,
            desired: 0,
            applied: 0,
            status: DeviceStatus::NotRead as u8,
            _reserved: 0,
        }
    }

    /// Device id of this slot.
    #[inline]
    pub fn device_id(&self) -> DeviceId {
        DeviceId(self.id)
    }

    /// Desired state as a boolean (any non-zero byte is "open").
    #[inline]
    pub fn desired(&self) -> bool {
        self.desired != 0
    }

    /// Last applied state as a boolean.
    #[inline]
    pub fn applied(&self) -> bool {
        self.applied != 0
    }

    /// Decoded status, `None` if the byte is not a known code.
    #[inline]
    pub fn status(&self) -> Option<DeviceStatus> {
        DeviceStatus::from_u8(self.status)
    }

    /// Static descriptor of this slot.
    pub fn descriptor(&self) -> ValveDescriptor {
        ValveDescriptor {
            name: self.name,
            board: self.board,
            pin: self.pin,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor_desc() -> SensorDescriptor {
        SensorDescriptor {
            name: FixedName::new("P1").unwrap(),
            board: FixedName::new("CACMO").unwrap(),
            channel: 2,
        }
    }

    #[test]
    fn fixed_name_roundtrip() {
        let n = FixedName::new("Vanne3").unwrap();
        assert_eq!(n.as_str(), "Vanne3");
        assert_eq!(n.to_string(), "Vanne3");
        assert_eq!(FixedName::EMPTY.as_str(), "");
    }

    #[test]
    fn fixed_name_rejects_overflow_and_nul() {
        assert!(FixedName::new(&"x".repeat(NAME_LEN)).is_some());
        assert!(FixedName::new(&"x".repeat(NAME_LEN + 1)).is_none());
        assert!(FixedName::new("a\0b").is_none());
    }

    #[test]
    fn fixed_name_garbage_bytes() {
        let garbage = FixedName([0xFF; NAME_LEN]);
        assert_eq!(garbage.as_str(), "?");
    }

    #[test]
    fn status_decoding() {
        for raw in 0..=10u8 {
            let status = DeviceStatus::from_u8(raw).unwrap();
            assert_eq!(status as u8, raw);
        }
        assert!(DeviceStatus::from_u8(11).is_none());
        assert!(DeviceStatus::from_u8(255).is_none());
    }

    #[test]
    fn sensor_record_keeps_last_value_on_error() {
        let mut s = SensorState::new(DeviceId(15), &sensor_desc());
        assert_eq!(s.status(), Some(DeviceStatus::NotRead));
        assert_eq!(s.descriptor(), sensor_desc());

        s.record(Some(512), DeviceStatus::Ok, 1);
        assert_eq!((s.value, s.cycle), (512, 1));

        s.record(None, DeviceStatus::ErrReadAdc, 2);
        assert_eq!(s.value, 512);
        assert_eq!(s.status(), Some(DeviceStatus::ErrReadAdc));
        assert_eq!(s.cycle, 2);
    }

    #[test]
    fn valve_starts_closed_and_unapplied() {
        let desc = ValveDescriptor {
            name: FixedName::new("VCE").unwrap(),
            board: FixedName::new("CACMO").unwrap(),
            pin: 5,
        };
        let v = ValveState::new(DeviceId(10), &desc);
        assert!(!v.desired() && !v.applied());
        assert_eq!(v.status(), Some(DeviceStatus::NotRead));
        assert_eq!(v.descriptor(), desc);
    }

    #[test]
    fn valve_writer_bytes_are_distinct() {
        assert_eq!(ValveState::DESIRED_OFFSET, 36);
        assert_eq!(ValveState::APPLIED_OFFSET, 37);
        assert_eq!(ValveState::STATUS_OFFSET, 38);
    }
}
