//! Per-process device table.
//!
//! A `DeviceRegistry` maps each configured [`DeviceId`] to its kind, slot,
//! static descriptor and, when this process owns the hardware, its live
//! driver. Drivers never leave the registry; only descriptors and state
//! values are copied into shared regions.

use crate::drivers::{DriverFactory, SensorDriver, ValveDriver};
use crate::error::{AcquisitionFailures, CacError, DeviceError};
use cac_common::config::BoardConfig;
use cac_common::device::{BoardLayout, ComponentKind, DeviceId, SlotIndex};
use cac_common::state::{SensorDescriptor, SensorState, ValveDescriptor, ValveState};
use cac_shared_memory::SharedStateRegion;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Static description of a device, as mirrored into its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    /// ADC sensor
    Sensor(SensorDescriptor),
    /// GPIO valve
    Valve(ValveDescriptor),
}

/// Live driver owned by this process.
#[derive(Debug)]
pub enum Driver {
    /// ADC sensor driver
    Sensor(SensorDriver),
    /// GPIO valve driver
    Valve(ValveDriver),
}

/// One row of the registry.
#[derive(Debug)]
pub struct DeviceEntry {
    /// Device class
    pub kind: ComponentKind,
    /// Slot in the region of that class
    pub slot: SlotIndex,
    /// Static descriptor
    pub descriptor: Descriptor,
    driver: Option<Driver>,
}

impl DeviceEntry {
    /// True once this process holds the device's resource.
    pub fn is_owned(&self) -> bool {
        self.driver.is_some()
    }
}

/// Device table of one owning process.
#[derive(Debug)]
pub struct DeviceRegistry {
    board: BoardConfig,
    layout: BoardLayout,
    entries: BTreeMap<DeviceId, DeviceEntry>,
}

impl DeviceRegistry {
    /// Build the table from a board configuration. No hardware is touched.
    pub fn from_board(board: &BoardConfig) -> Result<Self, CacError> {
        let layout = board.layout()?;
        let mut entries = BTreeMap::new();

        for entry in &board.sensors {
            let (kind, slot) = layout
                .slot_of(entry.id)
                .ok_or(CacError::UnknownDevice(entry.id))?;
            let descriptor = Descriptor::Sensor(board.sensor_descriptor(entry)?);
            entries.insert(
                entry.id,
                DeviceEntry {
                    kind,
                    slot,
                    descriptor,
                    driver: None,
                },
            );
        }
        for entry in &board.valves {
            let (kind, slot) = layout
                .slot_of(entry.id)
                .ok_or(CacError::UnknownDevice(entry.id))?;
            let descriptor = Descriptor::Valve(board.valve_descriptor(entry)?);
            entries.insert(
                entry.id,
                DeviceEntry {
                    kind,
                    slot,
                    descriptor,
                    driver: None,
                },
            );
        }

        debug!(
            "Device registry for {}: {} sensors, {} valves",
            board.name,
            layout.capacity(ComponentKind::Sensor),
            layout.capacity(ComponentKind::Valve)
        );

        Ok(Self {
            board: board.clone(),
            layout,
            entries,
        })
    }

    /// Slot table.
    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    /// Board this table was built from.
    pub fn board(&self) -> &BoardConfig {
        &self.board
    }

    /// Row of a device.
    pub fn get(&self, id: DeviceId) -> Option<&DeviceEntry> {
        self.entries.get(&id)
    }

    /// Ids of one kind, in slot order.
    pub fn ids(&self, kind: ComponentKind) -> &[DeviceId] {
        self.layout.ids(kind)
    }

    /// Whether this process holds the resource of `id`.
    pub fn is_owned(&self, id: DeviceId) -> bool {
        self.entries.get(&id).is_some_and(DeviceEntry::is_owned)
    }

    /// Acquire the resource of one device.
    ///
    /// A sensor is acquired by a successful test read; a valve by holding
    /// its line as an output. Acquiring an owned device is a no-op, so a
    /// resource is never held twice.
    pub fn init(&mut self, id: DeviceId, factory: &dyn DriverFactory) -> Result<(), CacError> {
        let board = &self.board;
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(CacError::UnknownDevice(id))?;
        if entry.driver.is_some() {
            return Ok(());
        }

        let driver = match entry.descriptor {
            Descriptor::Sensor(desc) => {
                let mut driver = SensorDriver::new(
                    id,
                    desc.channel,
                    &board.iio_sysfs_path,
                    factory.adc_port(board),
                );
                driver
                    .read()
                    .map_err(|source| CacError::Device { id, source })?;
                Driver::Sensor(driver)
            }
            Descriptor::Valve(desc) => {
                let mut driver = ValveDriver::new(
                    id,
                    desc.pin,
                    &board.gpio_chip_path,
                    &board.line_label,
                    factory.gpio_port(board),
                );
                driver
                    .init()
                    .map_err(|source| CacError::Device { id, source })?;
                Driver::Valve(driver)
            }
        };

        entry.driver = Some(driver);
        info!("{} {} initialized ({})", entry.kind, id, factory.name());
        Ok(())
    }

    /// Acquire every device of one kind.
    ///
    /// Every device is attempted; the ones that succeed stay owned. If any
    /// failed, all failures are returned together.
    pub fn init_kind(
        &mut self,
        kind: ComponentKind,
        factory: &dyn DriverFactory,
    ) -> Result<usize, CacError> {
        let ids = self.layout.ids(kind).to_vec();
        let mut failures = Vec::new();

        for id in &ids {
            match self.init(*id, factory) {
                Ok(()) => {}
                Err(CacError::Device { id, source }) => {
                    error!("{} {} acquisition failed: {}", kind, id, source);
                    failures.push((id, source));
                }
                Err(e) => return Err(e),
            }
        }

        if failures.is_empty() {
            Ok(ids.len())
        } else {
            Err(CacError::Acquisition {
                kind,
                failures: AcquisitionFailures(failures),
            })
        }
    }

    /// Owned sensor driver.
    pub fn sensor_mut(&mut self, id: DeviceId) -> Option<&mut SensorDriver> {
        match self.entries.get_mut(&id)?.driver.as_mut()? {
            Driver::Sensor(d) => Some(d),
            Driver::Valve(_) => None,
        }
    }

    /// Owned valve driver.
    pub fn valve_mut(&mut self, id: DeviceId) -> Option<&mut ValveDriver> {
        match self.entries.get_mut(&id)?.driver.as_mut()? {
            Driver::Valve(d) => Some(d),
            Driver::Sensor(_) => None,
        }
    }

    /// Read one owned sensor.
    pub fn read_sensor(&mut self, id: DeviceId) -> Result<i16, DeviceError> {
        self.sensor_mut(id).ok_or(DeviceError::NotReady)?.read()
    }

    /// Drive one owned valve.
    pub fn apply_valve(&mut self, id: DeviceId, open: bool) -> Result<(), DeviceError> {
        self.valve_mut(id).ok_or(DeviceError::NotReady)?.apply(open)
    }

    /// Write every sensor's initial state (descriptor, `NotRead`) to its slot.
    pub fn seed_sensor_region(
        &self,
        region: &mut SharedStateRegion<SensorState>,
    ) -> Result<(), CacError> {
        for (slot, id) in self.layout.slots(ComponentKind::Sensor) {
            if let Some(Descriptor::Sensor(desc)) = self.get(id).map(|e| e.descriptor) {
                region.write(slot.get(), SensorState::new(id, &desc))?;
            }
        }
        Ok(())
    }

    /// Write every valve's initial state (descriptor, closed) to its slot.
    pub fn seed_valve_region(
        &self,
        region: &mut SharedStateRegion<ValveState>,
    ) -> Result<(), CacError> {
        for (slot, id) in self.layout.slots(ComponentKind::Valve) {
            if let Some(Descriptor::Valve(desc)) = self.get(id).map(|e| e.descriptor) {
                region.write(slot.get(), ValveState::new(id, &desc))?;
            }
        }
        Ok(())
    }

    /// Give back every resource this process holds.
    pub fn release_all(&mut self) {
        for (id, entry) in self.entries.iter_mut() {
            match entry.driver.take() {
                Some(Driver::Valve(mut valve)) => valve.release(),
                Some(Driver::Sensor(_)) => debug!("sensor {} dropped", id),
                None => {}
            }
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}
