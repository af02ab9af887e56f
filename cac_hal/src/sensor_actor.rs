//! Sensor actor.
//!
//! Owns every ADC channel of the board. On each poll request it reads all of
//! its sensors, writes every result into the sensor region, and only then
//! publishes `ready`. A failing sensor is reported in its own slot and never
//! stops the cycle.

use crate::drivers::DriverFactory;
use crate::error::CacError;
use crate::registry::DeviceRegistry;
use cac_common::config::{BoardConfig, RuntimeConfig};
use cac_common::device::ComponentKind;
use cac_common::state::{DeviceStatus, SensorState};
use cac_shared_memory::{AccessMode, HandshakeChannel, HandshakeError, RetryPolicy, SharedStateRegion};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome counts of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Cycle number written to the slots
    pub cycle: u32,
    /// Sensors read successfully
    pub ok: usize,
    /// Sensors that reported an error
    pub failed: usize,
}

/// Execution context owning the sensor drivers.
#[derive(Debug)]
pub struct SensorActor {
    registry: DeviceRegistry,
    region: SharedStateRegion<SensorState>,
    channel: HandshakeChannel,
}

impl SensorActor {
    /// Acquire every sensor and attach to the sensor and handshake regions.
    ///
    /// Fails if any sensor cannot be acquired; sensors already acquired are
    /// released when the partially built actor is dropped.
    pub fn start(
        board: &BoardConfig,
        runtime: &RuntimeConfig,
        factory: &dyn DriverFactory,
    ) -> Result<Self, CacError> {
        let mut registry = DeviceRegistry::from_board(board)?;
        let owned = registry.init_kind(ComponentKind::Sensor, factory)?;

        let policy = RetryPolicy::new(runtime.attach_retries, runtime.attach_retry_interval());
        let region =
            SharedStateRegion::attach_with_retry(&runtime.sensor_segment, AccessMode::ReadWrite, policy)?;
        let channel = HandshakeChannel::attach_with_retry(&runtime.handshake_segment, policy)?;

        info!("Sensor actor ready with {} sensors", owned);
        Ok(Self {
            registry,
            region,
            channel,
        })
    }

    /// Read every owned sensor once and write the results, tagged `cycle`.
    pub fn poll_once(&mut self, cycle: u32) -> Result<PollSummary, CacError> {
        let mut summary = PollSummary {
            cycle,
            ..PollSummary::default()
        };
        let slots: Vec<_> = self.registry.layout().slots(ComponentKind::Sensor).collect();

        for (slot, id) in slots {
            let (value, status) = match self.registry.read_sensor(id) {
                Ok(value) => {
                    summary.ok += 1;
                    (Some(value), DeviceStatus::Ok)
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("sensor {} (slot {}): {}", id, slot.get(), e);
                    (None, e.status())
                }
            };
            self.region
                .update(slot.get(), |s| s.record(value, status, cycle))?;
        }

        debug!(
            "poll cycle {}: {} ok, {} failed",
            cycle, summary.ok, summary.failed
        );
        Ok(summary)
    }

    /// Serve one poll request: wait, read everything, publish `ready`.
    pub fn step(&mut self, timeout: Option<Duration>) -> Result<PollSummary, CacError> {
        let cycle = self.channel.wait_poll_request(timeout)?;
        let summary = self.poll_once(cycle)?;
        self.channel.complete_poll(cycle)?;
        Ok(summary)
    }

    /// Serve poll requests until shutdown. Drivers are released on return.
    pub fn run(mut self) -> Result<(), CacError> {
        info!("Sensor actor started");
        loop {
            match self.step(None) {
                Ok(_) => {}
                Err(CacError::Handshake(HandshakeError::ShuttingDown)) => break,
                Err(e) => return Err(e),
            }
        }
        info!("Sensor actor stopped");
        Ok(())
    }

    /// Device table of this actor.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }
}
