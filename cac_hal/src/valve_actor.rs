//! Valve actor.
//!
//! Owns every valve line of the board for its whole life. Each `actuate`
//! signal is taken first and the desired states are read afterwards, so a
//! burst of changes made before the actor wakes is applied once with the
//! latest values. The actor stores only the `applied` and `status` bytes of
//! a slot, never `desired`, so a command written mid-apply is not lost.

use crate::drivers::DriverFactory;
use crate::error::CacError;
use crate::registry::DeviceRegistry;
use cac_common::config::{BoardConfig, RuntimeConfig};
use cac_common::device::ComponentKind;
use cac_common::state::{DeviceStatus, ValveState};
use cac_shared_memory::{AccessMode, HandshakeChannel, HandshakeError, RetryPolicy, SharedStateRegion};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome counts of one apply pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Valves written successfully
    pub applied: usize,
    /// Valves whose write failed
    pub failed: usize,
}

/// Execution context owning the valve drivers.
#[derive(Debug)]
pub struct ValveActor {
    registry: DeviceRegistry,
    region: SharedStateRegion<ValveState>,
    channel: HandshakeChannel,
}

impl ValveActor {
    /// Acquire every valve line and attach to the valve and handshake regions.
    pub fn start(
        board: &BoardConfig,
        runtime: &RuntimeConfig,
        factory: &dyn DriverFactory,
    ) -> Result<Self, CacError> {
        let mut registry = DeviceRegistry::from_board(board)?;
        let owned = registry.init_kind(ComponentKind::Valve, factory)?;

        let policy = RetryPolicy::new(runtime.attach_retries, runtime.attach_retry_interval());
        let region =
            SharedStateRegion::attach_with_retry(&runtime.valve_segment, AccessMode::ReadWrite, policy)?;
        let channel = HandshakeChannel::attach_with_retry(&runtime.handshake_segment, policy)?;

        info!("Valve actor ready with {} valves", owned);
        Ok(Self {
            registry,
            region,
            channel,
        })
    }

    /// Write every slot's desired state to its line.
    pub fn apply_all(&mut self) -> Result<ApplySummary, CacError> {
        let mut summary = ApplySummary::default();
        let slots: Vec<_> = self.registry.layout().slots(ComponentKind::Valve).collect();

        for (slot, id) in slots {
            let desired = self
                .region
                .load_byte(slot.get(), ValveState::DESIRED_OFFSET)?
                != 0;
            let status = match self.registry.apply_valve(id, desired) {
                Ok(()) => {
                    summary.applied += 1;
                    DeviceStatus::Ok
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("valve {} (slot {}): {}", id, slot.get(), e);
                    e.status()
                }
            };
            if status.is_ok() {
                self.region
                    .store_byte(slot.get(), ValveState::APPLIED_OFFSET, u8::from(desired))?;
            }
            self.region
                .store_byte(slot.get(), ValveState::STATUS_OFFSET, status as u8)?;
        }

        debug!(
            "actuate: {} applied, {} failed",
            summary.applied, summary.failed
        );
        Ok(summary)
    }

    /// Take a raised `actuate` signal if there is one and apply. Non-blocking.
    pub fn service_pending(&mut self) -> Result<Option<ApplySummary>, CacError> {
        if self.channel.try_take_actuate() {
            self.apply_all().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Wait for `actuate`, take it, then apply the current desired states.
    pub fn step(&mut self, timeout: Option<Duration>) -> Result<ApplySummary, CacError> {
        self.channel.wait_actuate(timeout)?;
        self.apply_all()
    }

    /// Serve `actuate` signals until shutdown. Lines are released on return.
    pub fn run(mut self) -> Result<(), CacError> {
        info!("Valve actor started");
        loop {
            match self.step(None) {
                Ok(_) => {}
                Err(CacError::Handshake(HandshakeError::ShuttingDown)) => break,
                Err(e) => return Err(e),
            }
        }
        info!("Valve actor stopped");
        Ok(())
    }

    /// Device table of this actor.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }
}
