//! Error types for shared memory operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during shared state region operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment could not be allocated, sized or mapped
    #[error("Failed to create segment {name}: {source}")]
    SegmentCreate {
        /// Segment name
        name: String,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// Segment does not exist (never created, or destroyed)
    #[error("Segment not found: {name}")]
    SegmentMissing {
        /// Segment name
        name: String,
    },

    /// Segment name is empty or contains a path separator
    #[error("Invalid segment name: {name:?}")]
    InvalidName {
        /// Offending name
        name: String,
    },

    /// Capacity is zero or the byte size overflows
    #[error("Invalid capacity {capacity} for segment {name}")]
    InvalidCapacity {
        /// Segment name
        name: String,
        /// Requested capacity
        capacity: usize,
    },

    /// Existing segment size is not a whole number of elements
    #[error("Segment {name} is {len} bytes, not a multiple of the {element_size}-byte element")]
    LayoutMismatch {
        /// Segment name
        name: String,
        /// Actual byte length
        len: u64,
        /// Expected element size
        element_size: usize,
    },

    /// Slot index beyond the region capacity
    #[error("Slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange {
        /// Requested slot
        slot: usize,
        /// Region capacity
        capacity: usize,
    },

    /// Byte offset beyond the element size
    #[error("Offset {offset} out of range (element is {size} bytes)")]
    OffsetOutOfRange {
        /// Requested byte offset
        offset: usize,
        /// Element size
        size: usize,
    },

    /// Write attempted through a read-only mapping
    #[error("Segment {name} is attached read-only")]
    ReadOnly {
        /// Segment name
        name: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;

/// Errors raised by the handshake protocol
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The signal is already raised and not yet consumed
    #[error("{signal} signal already pending")]
    AlreadyPending {
        /// Signal name
        signal: &'static str,
    },

    /// A poll cycle is in progress
    #[error("poll cycle already in progress")]
    Busy,

    /// The bounded wait elapsed (`ErrTimeout`)
    #[error("timed out after {waited:?}")]
    Timeout {
        /// Time spent waiting
        waited: Duration,
    },

    /// Shutdown was signalled while waiting
    #[error("handshake is shutting down")]
    ShuttingDown,

    /// The channel was found in a phase the protocol does not allow here
    #[error("unexpected {signal} phase {phase}")]
    UnexpectedPhase {
        /// Signal name
        signal: &'static str,
        /// Raw phase value found
        phase: u32,
    },

    /// Underlying region error
    #[error(transparent)]
    Shm(#[from] ShmError),
}
