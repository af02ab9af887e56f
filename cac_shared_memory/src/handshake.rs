//! Cross-process handshake between the control endpoint and the actors.
//!
//! The channel is a one-slot region holding a [`SignalBlock`] of futex words.
//! Each signal is an explicit phase machine:
//!
//! ```text
//! poll:     Idle ──request──► Requested ──claim──► Polling ──complete──► Ready
//!            ▲                    │                                        │
//!            └──────withdraw──────┘◄──────────────consume──────────────────┘
//!
//! actuate:  Idle ──raise──► Pending ──take──► Idle
//! ```
//!
//! Raising a signal that is already raised is rejected rather than queued.
//! Shutdown is a flag bit OR-ed into every phase word, so a waiter can never
//! miss it and every transition attempted after shutdown fails.
//!
//! Ordering: the sensor actor writes its slots before the `Release` store
//! that publishes `Ready`; the control side loads `Ready` with `Acquire`
//! before reading those slots.

use crate::error::{HandshakeError, ShmResult};
use crate::platform::{self, FutexWait};
use crate::region::{AccessMode, RetryPolicy, SharedStateRegion};
use cac::state::PlainState;
use static_assertions::const_assert_eq;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const SHUTDOWN_BIT: u32 = 0x8000_0000;
const PHASE_MASK: u32 = 0xFF;

// ─── Phases ─────────────────────────────────────────────────────────

/// Phase of the poll request / ready exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PollPhase {
    /// No request outstanding
    Idle = 0,
    /// Control asked for a poll cycle
    Requested = 1,
    /// Sensor actor is reading hardware
    Polling = 2,
    /// Every slot holds this cycle's result
    Ready = 3,
}

impl PollPhase {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw & PHASE_MASK {
            0 => Some(Self::Idle),
            1 => Some(Self::Requested),
            2 => Some(Self::Polling),
            3 => Some(Self::Ready),
            _ => None,
        }
    }
}

/// Phase of the actuate signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ActuatePhase {
    /// Nothing to apply
    Idle = 0,
    /// Desired valve states changed
    Pending = 1,
}

// ─── SignalBlock ────────────────────────────────────────────────────

/// Raw futex words stored in the handshake region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SignalBlock {
    poll: u32,
    actuate: u32,
    cycle: u32,
    _reserved: u32,
}

const_assert_eq!(core::mem::size_of::<SignalBlock>(), 16);

// SAFETY: repr(C), four u32 fields, every bit pattern valid.
unsafe impl PlainState for SignalBlock {}

#[derive(Debug, Clone, Copy)]
enum Word {
    Poll,
    Actuate,
    Cycle,
}

// ─── HandshakeChannel ───────────────────────────────────────────────

/// Handle to the shared handshake block
#[derive(Debug)]
pub struct HandshakeChannel {
    region: SharedStateRegion<SignalBlock>,
}

impl HandshakeChannel {
    /// Create the handshake region with every signal idle
    pub fn create(name: &str) -> ShmResult<Self> {
        let region = SharedStateRegion::create(name, 1)?;
        Ok(Self { region })
    }

    /// Attach to an existing handshake region
    pub fn attach(name: &str) -> ShmResult<Self> {
        Self::attach_with_retry(name, RetryPolicy::none())
    }

    /// Attach, retrying while the region does not exist yet
    pub fn attach_with_retry(name: &str, policy: RetryPolicy) -> ShmResult<Self> {
        let region = SharedStateRegion::attach_with_retry(name, AccessMode::ReadWrite, policy)?;
        Ok(Self { region })
    }

    /// Unmap and remove the handshake region
    pub fn destroy(self) -> ShmResult<()> {
        self.region.destroy()
    }

    /// Region name
    pub fn name(&self) -> &str {
        self.region.name()
    }

    fn word(&self, word: Word) -> &AtomicU32 {
        // Capacity is at least one: create uses 1 and attach rejects empty segments.
        let block = self.region.base();
        // SAFETY: the block lives in a mapping owned by `self.region` for as
        // long as `&self`; the u32 fields are 4-aligned and only ever
        // accessed atomically.
        unsafe {
            let ptr = match word {
                Word::Poll => addr_of_mut!((*block).poll),
                Word::Actuate => addr_of_mut!((*block).actuate),
                Word::Cycle => addr_of_mut!((*block).cycle),
            };
            AtomicU32::from_ptr(ptr)
        }
    }

    // ─── Inspection ─────────────────────────────────────────────────

    /// Current poll phase
    pub fn poll_phase(&self) -> Option<PollPhase> {
        PollPhase::from_raw(self.word(Word::Poll).load(Ordering::Acquire))
    }

    /// Whether an actuate signal is waiting to be taken
    pub fn actuate_pending(&self) -> bool {
        self.word(Word::Actuate).load(Ordering::Acquire) & PHASE_MASK
            == ActuatePhase::Pending as u32
    }

    /// Last completed poll cycle number (0 before the first cycle)
    pub fn last_cycle(&self) -> u32 {
        self.word(Word::Cycle).load(Ordering::Acquire)
    }

    /// Whether shutdown has been signalled
    pub fn is_shutting_down(&self) -> bool {
        self.word(Word::Poll).load(Ordering::Acquire) & SHUTDOWN_BIT != 0
    }

    // ─── Poll signal: control side ──────────────────────────────────

    /// Ask the sensor actor for a poll cycle.
    ///
    /// Allowed from `Idle`, or from `Ready` when a previous result was never
    /// consumed. Rejected with [`HandshakeError::AlreadyPending`] while a
    /// request is queued and [`HandshakeError::Busy`] while a cycle runs.
    pub fn request_poll(&self) -> Result<(), HandshakeError> {
        let word = self.word(Word::Poll);
        let mut current = word.load(Ordering::Acquire);
        loop {
            if current & SHUTDOWN_BIT != 0 {
                return Err(HandshakeError::ShuttingDown);
            }
            match PollPhase::from_raw(current) {
                Some(PollPhase::Idle) | Some(PollPhase::Ready) => {}
                Some(PollPhase::Requested) => {
                    return Err(HandshakeError::AlreadyPending { signal: "poll" });
                }
                Some(PollPhase::Polling) => return Err(HandshakeError::Busy),
                None => {
                    return Err(HandshakeError::UnexpectedPhase {
                        signal: "poll",
                        phase: current,
                    });
                }
            }
            match word.compare_exchange(
                current,
                PollPhase::Requested as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        platform::futex_wake_all(word);
        trace!("poll requested");
        Ok(())
    }

    /// Block until the requested cycle is ready, consume it, and return its
    /// cycle number.
    ///
    /// On timeout a still-queued request is withdrawn so the sensor actor
    /// does not run a cycle nobody waits for.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> Result<u32, HandshakeError> {
        let word = self.word(Word::Poll);
        match self.wait_for(Word::Poll, timeout, |raw| {
            raw & PHASE_MASK == PollPhase::Ready as u32
        }) {
            Ok(raw) => {
                let cycle = self.last_cycle();
                // Consume; a concurrent shutdown keeps its bit.
                let _ = word.compare_exchange(
                    raw,
                    PollPhase::Idle as u32,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                Ok(cycle)
            }
            Err(HandshakeError::Timeout { waited }) => {
                let withdrawn = word
                    .compare_exchange(
                        PollPhase::Requested as u32,
                        PollPhase::Idle as u32,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                debug!("poll wait timed out (request withdrawn: {})", withdrawn);
                Err(HandshakeError::Timeout { waited })
            }
            Err(e) => Err(e),
        }
    }

    // ─── Poll signal: sensor side ───────────────────────────────────

    /// Block until a poll is requested, claim it and return the number the
    /// new cycle should carry.
    pub fn wait_poll_request(&self, timeout: Option<Duration>) -> Result<u32, HandshakeError> {
        let word = self.word(Word::Poll);
        loop {
            let raw = self.wait_for(Word::Poll, timeout, |raw| {
                raw & PHASE_MASK == PollPhase::Requested as u32
            })?;
            if word
                .compare_exchange(
                    raw,
                    PollPhase::Polling as u32,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(self.last_cycle().wrapping_add(1));
            }
            // Withdrawn between wake-up and claim; wait again.
        }
    }

    /// Publish a finished cycle. Slots must already be written.
    pub fn complete_poll(&self, cycle: u32) -> Result<(), HandshakeError> {
        let word = self.word(Word::Poll);
        self.word(Word::Cycle).store(cycle, Ordering::Release);
        match word.compare_exchange(
            PollPhase::Polling as u32,
            PollPhase::Ready as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                platform::futex_wake_all(word);
                Ok(())
            }
            Err(actual) if actual & SHUTDOWN_BIT != 0 => Err(HandshakeError::ShuttingDown),
            Err(actual) => Err(HandshakeError::UnexpectedPhase {
                signal: "poll",
                phase: actual,
            }),
        }
    }

    // ─── Actuate signal ─────────────────────────────────────────────

    /// Tell the valve actor the desired states changed.
    ///
    /// The flag is set with a read-modify-write even when it is already
    /// raised, so slot writes made before a rejected call are still ordered
    /// before the actor's next take.
    pub fn raise_actuate(&self) -> Result<(), HandshakeError> {
        let word = self.word(Word::Actuate);
        let previous = word.fetch_or(ActuatePhase::Pending as u32, Ordering::AcqRel);
        if previous & SHUTDOWN_BIT != 0 {
            return Err(HandshakeError::ShuttingDown);
        }
        if previous & PHASE_MASK == ActuatePhase::Pending as u32 {
            return Err(HandshakeError::AlreadyPending { signal: "actuate" });
        }
        platform::futex_wake_all(word);
        Ok(())
    }

    /// Block until an actuate signal is raised, then take it
    pub fn wait_actuate(&self, timeout: Option<Duration>) -> Result<(), HandshakeError> {
        loop {
            self.wait_for(Word::Actuate, timeout, |raw| {
                raw & PHASE_MASK == ActuatePhase::Pending as u32
            })?;
            if self.try_take_actuate() {
                return Ok(());
            }
        }
    }

    /// Take a raised actuate signal without blocking
    pub fn try_take_actuate(&self) -> bool {
        self.word(Word::Actuate)
            .compare_exchange(
                ActuatePhase::Pending as u32,
                ActuatePhase::Idle as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Mark every signal as shutting down and wake all waiters
    pub fn signal_shutdown(&self) {
        for word in [Word::Poll, Word::Actuate] {
            let atomic = self.word(word);
            atomic.fetch_or(SHUTDOWN_BIT, Ordering::AcqRel);
            platform::futex_wake_all(atomic);
        }
        debug!("shutdown signalled on {}", self.name());
    }

    /// Return every signal to idle and clear the shutdown flag.
    ///
    /// Re-arms a channel whose peer crashed or was shut down, so restarted
    /// actors can attach to the same region instead of it being recreated.
    /// Only call this while no actor is using the channel.
    pub fn reset(&self) {
        self.word(Word::Poll)
            .store(PollPhase::Idle as u32, Ordering::Release);
        self.word(Word::Actuate)
            .store(ActuatePhase::Idle as u32, Ordering::Release);
    }

    fn wait_for<F>(
        &self,
        word: Word,
        timeout: Option<Duration>,
        ready: F,
    ) -> Result<u32, HandshakeError>
    where
        F: Fn(u32) -> bool,
    {
        let atomic = self.word(word);
        let start = Instant::now();
        let deadline = timeout.map(|t| start + t);
        loop {
            let raw = atomic.load(Ordering::Acquire);
            if raw & SHUTDOWN_BIT != 0 {
                return Err(HandshakeError::ShuttingDown);
            }
            if ready(raw) {
                return Ok(raw);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(HandshakeError::Timeout {
                            waited: now - start,
                        });
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            // A timed-out wait loops once more so the value is re-checked
            // before the timeout is reported.
            let _: FutexWait = platform::futex_wait(atomic, raw, remaining);
        }
    }
}
