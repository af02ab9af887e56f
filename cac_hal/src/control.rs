//! Control endpoint.
//!
//! The surface consumed by the interactive menu: a synchronous sensor poll
//! that blocks until the sensor actor publishes `ready`, and asynchronous
//! valve commands that return as soon as `actuate` is raised.

use crate::error::CacError;
use cac_common::config::{BoardConfig, RuntimeConfig};
use cac_common::device::{BoardLayout, ComponentKind, DeviceId, SlotIndex};
use cac_common::state::{DeviceStatus, SensorState, ValveState};
use cac_shared_memory::{AccessMode, HandshakeChannel, HandshakeError, RetryPolicy, SharedStateRegion};
use std::time::Duration;
use tracing::{debug, info};

/// One sensor slot as seen by the control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReading {
    /// Device id
    pub id: DeviceId,
    /// Sensor slot
    pub slot: SlotIndex,
    /// Sensor name
    pub name: String,
    /// Last known value
    pub value: i16,
    /// Status of the last cycle, `None` for an unknown code
    pub status: Option<DeviceStatus>,
    /// Cycle that produced `status`
    pub cycle: u32,
}

impl SensorReading {
    fn from_slot(slot: SlotIndex, state: &SensorState) -> Self {
        Self {
            id: state.device_id(),
            slot,
            name: state.name.as_str().to_string(),
            value: state.value,
            status: state.status(),
            cycle: state.cycle,
        }
    }
}

/// Control side of the handshake.
#[derive(Debug)]
pub struct ControlEndpoint {
    layout: BoardLayout,
    sensors: SharedStateRegion<SensorState>,
    valves: SharedStateRegion<ValveState>,
    channel: HandshakeChannel,
    poll_timeout: Option<Duration>,
}

impl ControlEndpoint {
    /// Attach to the regions named in `runtime`.
    pub fn attach(board: &BoardConfig, runtime: &RuntimeConfig) -> Result<Self, CacError> {
        let layout = board.layout()?;
        let policy = RetryPolicy::new(runtime.attach_retries, runtime.attach_retry_interval());
        let sensors =
            SharedStateRegion::attach_with_retry(&runtime.sensor_segment, AccessMode::ReadOnly, policy)?;
        let valves =
            SharedStateRegion::attach_with_retry(&runtime.valve_segment, AccessMode::ReadWrite, policy)?;
        let channel = HandshakeChannel::attach_with_retry(&runtime.handshake_segment, policy)?;

        info!("Control endpoint attached");
        Ok(Self {
            layout,
            sensors,
            valves,
            channel,
            poll_timeout: runtime.poll_timeout(),
        })
    }

    /// Bound the wait for `ready`; `None` waits forever.
    pub fn set_poll_timeout(&mut self, timeout: Option<Duration>) {
        self.poll_timeout = timeout;
    }

    /// Current bound on the wait for `ready`.
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout
    }

    /// Request a poll cycle and block until it completes.
    ///
    /// Returns every sensor slot, all written by that cycle.
    pub fn trigger_sensor_poll(&self) -> Result<Vec<SensorReading>, CacError> {
        self.channel.request_poll()?;
        let cycle = self.channel.wait_ready(self.poll_timeout)?;
        debug!("poll cycle {} ready", cycle);
        self.sensor_snapshot()
    }

    /// Last published sensor values. Never touches hardware.
    pub fn sensor_snapshot(&self) -> Result<Vec<SensorReading>, CacError> {
        self.layout
            .slots(ComponentKind::Sensor)
            .map(|(slot, _)| {
                let state = self.sensors.read(slot.get())?;
                Ok(SensorReading::from_slot(slot, &state))
            })
            .collect()
    }

    /// Last published valve states, in slot order.
    pub fn valve_states(&self) -> Result<Vec<ValveState>, CacError> {
        self.layout
            .slots(ComponentKind::Valve)
            .map(|(slot, _)| Ok(self.valves.read(slot.get())?))
            .collect()
    }

    /// Set one valve's desired state and raise `actuate`.
    ///
    /// Returns once the signal is raised, not once the line has changed. If
    /// an earlier `actuate` is still pending this change rides on it. Only
    /// the `desired` byte is stored; `applied` and `status` belong to the
    /// valve actor.
    pub fn set_valve(&mut self, id: DeviceId, open: bool) -> Result<(), CacError> {
        let slot = self.valve_slot(id)?;
        self.valves
            .store_byte(slot.get(), ValveState::DESIRED_OFFSET, u8::from(open))?;
        debug!("valve {} desired {}", id, open);
        self.raise_actuate()
    }

    /// Open a valve.
    pub fn activate(&mut self, id: DeviceId) -> Result<(), CacError> {
        self.set_valve(id, true)
    }

    /// Close a valve.
    pub fn deactivate(&mut self, id: DeviceId) -> Result<(), CacError> {
        self.set_valve(id, false)
    }

    /// Invert every valve's desired state and raise `actuate` once.
    pub fn toggle_all(&mut self) -> Result<(), CacError> {
        let slots: Vec<_> = self.layout.slots(ComponentKind::Valve).collect();
        for (slot, _) in slots {
            let open = self.valves.load_byte(slot.get(), ValveState::DESIRED_OFFSET)? == 0;
            self.valves
                .store_byte(slot.get(), ValveState::DESIRED_OFFSET, u8::from(open))?;
        }
        self.raise_actuate()
    }

    fn raise_actuate(&self) -> Result<(), CacError> {
        match self.channel.raise_actuate() {
            Ok(()) => Ok(()),
            Err(HandshakeError::AlreadyPending { .. }) => {
                debug!("actuate already pending, change coalesced");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn valve_slot(&self, id: DeviceId) -> Result<SlotIndex, CacError> {
        match self.layout.slot_of(id) {
            Some((ComponentKind::Valve, slot)) => Ok(slot),
            Some(_) => Err(CacError::WrongKind {
                id,
                expected: ComponentKind::Valve,
            }),
            None => Err(CacError::UnknownDevice(id)),
        }
    }
}
