//! Typed shared state regions.
//!
//! A region is a named segment holding exactly `capacity` consecutive
//! records of one [`PlainState`] type. There is no header: the byte size is
//! `capacity * size_of::<T>()`, and an attaching process derives the
//! capacity from the segment size. Every slot read or write copies the whole
//! record through a volatile access so that another process's update is
//! never cached away.
//!
//! When two parties write different fields of the same slot, each stores
//! only its own bytes with [`SharedStateRegion::store_byte`]. A whole-record
//! write would put back whatever the other party changed in between.

use crate::error::{ShmError, ShmResult};
use crate::platform;
use cac::state::PlainState;
use memmap2::MmapRaw;
use nix::errno::Errno;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// How a process maps an existing region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Observe only; writes fail with [`ShmError::ReadOnly`]
    ReadOnly,
    /// Read and write slots
    ReadWrite,
}

/// Retry schedule for attaching to a region that may not exist yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,
    /// Pause between attempts
    pub interval: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub const fn none() -> Self {
        Self {
            retries: 0,
            interval: Duration::ZERO,
        }
    }

    /// Retry `retries` times, sleeping `interval` between attempts
    pub const fn new(retries: u32, interval: Duration) -> Self {
        Self { retries, interval }
    }
}

/// Named, fixed-capacity array of `T` shared between processes
pub struct SharedStateRegion<T: PlainState> {
    name: String,
    capacity: usize,
    mode: AccessMode,
    map: MmapRaw,
    _marker: PhantomData<T>,
}

// SAFETY: the mapping is process-shared memory; all slot access goes through
// volatile copies of `T: PlainState`, which is itself Send + Sync.
unsafe impl<T: PlainState> Send for SharedStateRegion<T> {}
unsafe impl<T: PlainState> Sync for SharedStateRegion<T> {}

impl<T: PlainState> SharedStateRegion<T> {
    /// Create a new zero-filled region of `capacity` slots.
    ///
    /// Fails with [`ShmError::SegmentCreate`] if the name already exists; use
    /// [`SharedStateRegion::unlink`] first to clear a stale segment.
    pub fn create(name: &str, capacity: usize) -> ShmResult<Self> {
        validate_name(name)?;
        let len = byte_len::<T>(name, capacity)?;
        let object = platform::shm_object_name(name);

        let file =
            platform::create_segment(&object, len).map_err(|source| ShmError::SegmentCreate {
                name: name.to_string(),
                source,
            })?;

        let map = match platform::map_segment(&file, len, true) {
            Ok(map) => map,
            Err(source) => {
                // Leave no half-created segment behind.
                let _ = platform::unlink_segment(&object);
                return Err(ShmError::SegmentCreate {
                    name: name.to_string(),
                    source,
                });
            }
        };

        debug!(
            "Created region {} ({} x {} bytes)",
            name,
            capacity,
            size_of::<T>()
        );

        Ok(Self {
            name: name.to_string(),
            capacity,
            mode: AccessMode::ReadWrite,
            map,
            _marker: PhantomData,
        })
    }

    /// Attach to an existing region created by any process.
    pub fn attach(name: &str, mode: AccessMode) -> ShmResult<Self> {
        validate_name(name)?;
        let object = platform::shm_object_name(name);
        let writable = mode == AccessMode::ReadWrite;

        let file = platform::open_segment(&object, writable).map_err(|e| match e {
            Errno::ENOENT => ShmError::SegmentMissing {
                name: name.to_string(),
            },
            other => ShmError::Nix { source: other },
        })?;

        let len = file.metadata()?.len();
        let element_size = size_of::<T>();
        if len == 0 || len % element_size as u64 != 0 {
            return Err(ShmError::LayoutMismatch {
                name: name.to_string(),
                len,
                element_size,
            });
        }

        let capacity = (len / element_size as u64) as usize;
        let map = platform::map_segment(&file, len as usize, writable)?;

        debug!("Attached region {} ({:?}, {} slots)", name, mode, capacity);

        Ok(Self {
            name: name.to_string(),
            capacity,
            mode,
            map,
            _marker: PhantomData,
        })
    }

    /// Attach, retrying while the region does not exist yet.
    ///
    /// Only [`ShmError::SegmentMissing`] is retried; any other error is
    /// returned immediately.
    pub fn attach_with_retry(name: &str, mode: AccessMode, policy: RetryPolicy) -> ShmResult<Self> {
        let mut attempt = 0;
        loop {
            match Self::attach(name, mode) {
                Err(ShmError::SegmentMissing { .. }) if attempt < policy.retries => {
                    attempt += 1;
                    thread::sleep(policy.interval);
                }
                other => return other,
            }
        }
    }

    /// Remove a region name without mapping it.
    ///
    /// Returns `Ok(false)` if nothing by that name existed.
    pub fn unlink(name: &str) -> ShmResult<bool> {
        validate_name(name)?;
        match platform::unlink_segment(&platform::shm_object_name(name)) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(source) => Err(ShmError::Nix { source }),
        }
    }

    /// Unmap this handle and remove the region name.
    ///
    /// Other processes' mappings stay valid until they drop them, but no new
    /// attach succeeds afterwards.
    pub fn destroy(self) -> ShmResult<()> {
        let name = self.name.clone();
        drop(self);
        if Self::unlink(&name)? {
            debug!("Destroyed region {}", name);
            Ok(())
        } else {
            warn!("Region {} was already removed", name);
            Err(ShmError::SegmentMissing { name })
        }
    }

    /// Copy slot `slot` out of the region.
    pub fn read(&self, slot: usize) -> ShmResult<T> {
        let ptr = self.slot_ptr(slot)?;
        // SAFETY: in bounds and aligned (page-aligned base, slot stride is a
        // multiple of align_of::<T>()); any bit pattern is a valid T.
        Ok(unsafe { ptr.read_volatile() })
    }

    /// Copy `value` into slot `slot`.
    pub fn write(&mut self, slot: usize, value: T) -> ShmResult<()> {
        self.check_writable()?;
        let ptr = self.slot_ptr(slot)?;
        // SAFETY: as in `read`, and the mapping is writable.
        unsafe { ptr.write_volatile(value) };
        Ok(())
    }

    /// Read-modify-write a slot and return the new value.
    pub fn update<F>(&mut self, slot: usize, f: F) -> ShmResult<T>
    where
        F: FnOnce(&mut T),
    {
        let mut value = self.read(slot)?;
        f(&mut value);
        self.write(slot, value)?;
        Ok(value)
    }

    /// Load the byte at `offset` within slot `slot`.
    pub fn load_byte(&self, slot: usize, offset: usize) -> ShmResult<u8> {
        let ptr = self.byte_ptr(slot, offset)?;
        // SAFETY: in bounds of the mapping, which outlives the reference;
        // a byte has no alignment requirement.
        Ok(unsafe { AtomicU8::from_ptr(ptr) }.load(Ordering::Acquire))
    }

    /// Store the byte at `offset` within slot `slot`, leaving the rest of
    /// the record untouched.
    pub fn store_byte(&mut self, slot: usize, offset: usize, value: u8) -> ShmResult<()> {
        self.check_writable()?;
        let ptr = self.byte_ptr(slot, offset)?;
        // SAFETY: as in `load_byte`, and the mapping is writable.
        unsafe { AtomicU8::from_ptr(ptr) }.store(value, Ordering::Release);
        Ok(())
    }

    /// Copy every slot out of the region.
    pub fn snapshot(&self) -> Vec<T> {
        (0..self.capacity)
            // SAFETY: every index below capacity is in bounds.
            .map(|slot| unsafe { self.base().add(slot).read_volatile() })
            .collect()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Logical region name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapping mode of this handle
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Raw pointer to a slot, for in-place atomic access.
    pub(crate) fn slot_ptr(&self, slot: usize) -> ShmResult<*mut T> {
        if slot >= self.capacity {
            return Err(ShmError::SlotOutOfRange {
                slot,
                capacity: self.capacity,
            });
        }
        // SAFETY: slot < capacity and the mapping holds capacity elements.
        Ok(unsafe { self.base().add(slot) })
    }

    fn byte_ptr(&self, slot: usize, offset: usize) -> ShmResult<*mut u8> {
        let size = size_of::<T>();
        if offset >= size {
            return Err(ShmError::OffsetOutOfRange { offset, size });
        }
        let ptr = self.slot_ptr(slot)?;
        // SAFETY: offset < size_of::<T>() keeps the pointer inside the slot.
        Ok(unsafe { ptr.cast::<u8>().add(offset) })
    }

    fn check_writable(&self) -> ShmResult<()> {
        if self.mode == AccessMode::ReadOnly {
            return Err(ShmError::ReadOnly {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn base(&self) -> *mut T {
        self.map.as_mut_ptr().cast()
    }
}

impl<T: PlainState> std::fmt::Debug for SharedStateRegion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStateRegion")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("mode", &self.mode)
            .finish()
    }
}

fn validate_name(name: &str) -> ShmResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') || name.len() > 200 {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn byte_len<T>(name: &str, capacity: usize) -> ShmResult<usize> {
    capacity
        .checked_mul(size_of::<T>())
        .filter(|len| *len > 0)
        .ok_or_else(|| ShmError::InvalidCapacity {
            name: name.to_string(),
            capacity,
        })
}
