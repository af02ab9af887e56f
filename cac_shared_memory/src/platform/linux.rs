//! Linux-specific shared memory operations
//!
//! Segments are POSIX shared memory objects (`shm_open`) mapped with
//! `memmap2`. Cross-process waiting uses non-private futexes on words that
//! live inside a mapped segment, so the same wait works between threads and
//! between processes.

use memmap2::{MmapOptions, MmapRaw};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use std::fs::File;
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Prefix applied to every segment name in the POSIX shm namespace
pub const SHM_PREFIX: &str = "cac_";

/// Map a logical segment name to its POSIX shm object name
pub fn shm_object_name(name: &str) -> String {
    format!("/{SHM_PREFIX}{name}")
}

/// Create a new segment exclusively and size it to `len` zero bytes
pub fn create_segment(object: &str, len: usize) -> std::io::Result<File> {
    let fd = shm_open(
        object,
        OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
        Mode::S_IRUSR | Mode::S_IWUSR,
    )?;
    let file = File::from(fd);

    if let Err(e) = file.set_len(len as u64) {
        let _ = shm_unlink(object);
        return Err(e);
    }
    Ok(file)
}

/// Open an existing segment
pub fn open_segment(object: &str, writable: bool) -> nix::Result<File> {
    let flags = if writable {
        OFlag::O_RDWR
    } else {
        OFlag::O_RDONLY
    };
    let fd = shm_open(object, flags, Mode::empty())?;
    Ok(File::from(fd))
}

/// Remove a segment name. Existing mappings stay valid until unmapped.
pub fn unlink_segment(object: &str) -> nix::Result<()> {
    shm_unlink(object)
}

/// Map `len` bytes of an opened segment
pub fn map_segment(file: &File, len: usize, writable: bool) -> std::io::Result<MmapRaw> {
    let mut options = MmapOptions::new();
    options.len(len);
    if writable {
        options.map_raw(file)
    } else {
        options.map_raw_read_only(file)
    }
}

/// Outcome of a futex wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexWait {
    /// Woken, interrupted, or the word no longer held the expected value
    Woken,
    /// The timeout elapsed
    TimedOut,
}

/// Sleep while `word` still holds `expected`
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> FutexWait {
    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null(), |t| t as *const libc::timespec);

    // Non-private op: the word may be mapped by other processes.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
            ptr::null::<u32>(),
            0u32,
        )
    };
    if rc == -1 && Errno::last() == Errno::ETIMEDOUT {
        FutexWait::TimedOut
    } else {
        FutexWait::Woken
    }
}

/// Wake every waiter sleeping on `word`
pub fn futex_wake_all(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            i32::MAX,
            ptr::null::<libc::timespec>(),
            ptr::null::<u32>(),
            0u32,
        );
    }
}
