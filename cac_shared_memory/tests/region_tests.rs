//! Shared state region tests

use cac::device::DeviceId;
use cac::state::{DeviceStatus, FixedName, SensorDescriptor, SensorState, ValveDescriptor, ValveState};
use cac_shared_memory::{AccessMode, RetryPolicy, SharedStateRegion, ShmError, ShmResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique(name: &str) -> String {
    format!(
        "{}_{}_{}",
        name,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn sensor(id: u16, channel: u16) -> SensorState {
    let desc = SensorDescriptor {
        name: FixedName::new(&format!("Sensor{channel}")).unwrap(),
        board: FixedName::new("CACMO").unwrap(),
        channel,
    };
    SensorState::new(DeviceId(id), &desc)
}

#[test]
fn test_create_starts_zeroed() -> ShmResult<()> {
    let name = unique("zeroed");
    let region = SharedStateRegion::<SensorState>::create(&name, 4)?;
    assert_eq!(region.capacity(), 4);
    for slot in region.snapshot() {
        assert_eq!(slot.id, 0);
        assert_eq!(slot.value, 0);
    }
    region.destroy()
}

#[test]
fn test_write_is_visible_through_other_mapping() -> ShmResult<()> {
    let name = unique("visible");
    let mut owner = SharedStateRegion::<SensorState>::create(&name, 4)?;
    let reader = SharedStateRegion::<SensorState>::attach(&name, AccessMode::ReadOnly)?;
    assert_eq!(reader.capacity(), 4);

    let mut state = sensor(15, 0);
    state.record(Some(1023), DeviceStatus::Ok, 1);
    owner.write(0, state)?;

    let seen = reader.read(0)?;
    assert_eq!(seen, state);
    assert_eq!(seen.value, 1023);
    assert_eq!(seen.status(), Some(DeviceStatus::Ok));

    drop(reader);
    owner.destroy()
}

#[test]
fn test_write_read_from_another_thread() -> ShmResult<()> {
    let name = unique("threaded");
    let owner = SharedStateRegion::<ValveState>::create(&name, 2)?;

    let writer_name = name.clone();
    thread::spawn(move || -> ShmResult<()> {
        let mut region = SharedStateRegion::<ValveState>::attach(&writer_name, AccessMode::ReadWrite)?;
        let desc = ValveDescriptor {
            name: FixedName::new("VCO").unwrap(),
            board: FixedName::new("CACMO").unwrap(),
            pin: 6,
        };
        let mut valve = ValveState::new(DeviceId(11), &desc);
        valve.desired = 1;
        region.write(1, valve)
    })
    .join()
    .unwrap()?;

    let valve = owner.read(1)?;
    assert_eq!(valve.device_id(), DeviceId(11));
    assert!(valve.desired());
    assert_eq!(valve.name.as_str(), "VCO");
    owner.destroy()
}

#[test]
fn test_slot_out_of_range() -> ShmResult<()> {
    let name = unique("range");
    let mut region = SharedStateRegion::<SensorState>::create(&name, 2)?;
    assert!(matches!(
        region.read(2),
        Err(ShmError::SlotOutOfRange { slot: 2, capacity: 2 })
    ));
    assert!(matches!(
        region.write(5, sensor(1, 0)),
        Err(ShmError::SlotOutOfRange { .. })
    ));
    region.destroy()
}

#[test]
fn test_read_only_mapping_rejects_writes() -> ShmResult<()> {
    let name = unique("readonly");
    let owner = SharedStateRegion::<SensorState>::create(&name, 1)?;
    let mut reader = SharedStateRegion::<SensorState>::attach(&name, AccessMode::ReadOnly)?;
    assert!(matches!(
        reader.write(0, sensor(1, 0)),
        Err(ShmError::ReadOnly { .. })
    ));
    drop(reader);
    owner.destroy()
}

#[test]
fn test_zero_capacity_rejected() {
    let name = unique("empty");
    assert!(matches!(
        SharedStateRegion::<SensorState>::create(&name, 0),
        Err(ShmError::InvalidCapacity { capacity: 0, .. })
    ));
    assert!(matches!(
        SharedStateRegion::<SensorState>::attach(&name, AccessMode::ReadOnly),
        Err(ShmError::SegmentMissing { .. })
    ));
}

#[test]
fn test_invalid_names_rejected() {
    assert!(matches!(
        SharedStateRegion::<SensorState>::create("", 1),
        Err(ShmError::InvalidName { .. })
    ));
    assert!(matches!(
        SharedStateRegion::<SensorState>::create("a/b", 1),
        Err(ShmError::InvalidName { .. })
    ));
}

#[test]
fn test_create_twice_fails_until_unlinked() -> ShmResult<()> {
    let name = unique("twice");
    let first = SharedStateRegion::<SensorState>::create(&name, 1)?;
    assert!(matches!(
        SharedStateRegion::<SensorState>::create(&name, 1),
        Err(ShmError::SegmentCreate { .. })
    ));

    // Clearing a stale name lets a fresh region take its place.
    assert!(SharedStateRegion::<SensorState>::unlink(&name)?);
    drop(first);
    let second = SharedStateRegion::<SensorState>::create(&name, 3)?;
    assert_eq!(second.capacity(), 3);
    second.destroy()
}

#[test]
fn test_attach_missing_segment() {
    let name = unique("missing");
    assert!(matches!(
        SharedStateRegion::<SensorState>::attach(&name, AccessMode::ReadWrite),
        Err(ShmError::SegmentMissing { .. })
    ));
}

#[test]
fn test_attach_with_mismatched_element_size() -> ShmResult<()> {
    // 3 sensor slots are 132 bytes, not a whole number of 40-byte valve slots.
    let name = unique("mismatch");
    let region = SharedStateRegion::<SensorState>::create(&name, 3)?;
    assert!(matches!(
        SharedStateRegion::<ValveState>::attach(&name, AccessMode::ReadOnly),
        Err(ShmError::LayoutMismatch { element_size: 40, .. })
    ));
    region.destroy()
}

#[test]
fn test_destroy_removes_name() -> ShmResult<()> {
    let name = unique("destroy");
    let region = SharedStateRegion::<SensorState>::create(&name, 1)?;
    region.destroy()?;
    assert!(matches!(
        SharedStateRegion::<SensorState>::attach(&name, AccessMode::ReadOnly),
        Err(ShmError::SegmentMissing { .. })
    ));
    assert!(!SharedStateRegion::<SensorState>::unlink(&name)?);
    Ok(())
}

#[test]
fn test_attach_with_retry_waits_for_creator() -> ShmResult<()> {
    let name = unique("retry");
    let creator_name = name.clone();
    let creator = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        SharedStateRegion::<SensorState>::create(&creator_name, 2)
    });

    let policy = RetryPolicy::new(100, Duration::from_millis(5));
    let attached = SharedStateRegion::<SensorState>::attach_with_retry(&name, AccessMode::ReadOnly, policy)?;
    assert_eq!(attached.capacity(), 2);

    let owner = creator.join().unwrap()?;
    drop(attached);
    owner.destroy()
}

#[test]
fn test_attach_with_retry_gives_up() {
    let name = unique("giveup");
    let policy = RetryPolicy::new(2, Duration::from_millis(1));
    assert!(matches!(
        SharedStateRegion::<SensorState>::attach_with_retry(&name, AccessMode::ReadOnly, policy),
        Err(ShmError::SegmentMissing { .. })
    ));
}

#[test]
fn test_update_read_modify_write() -> ShmResult<()> {
    let name = unique("update");
    let mut region = SharedStateRegion::<SensorState>::create(&name, 1)?;
    region.write(0, sensor(15, 0))?;
    let updated = region.update(0, |s| s.record(Some(-4), DeviceStatus::Ok, 9))?;
    assert_eq!(updated.value, -4);
    assert_eq!(region.read(0)?.cycle, 9);
    region.destroy()
}

fn valve(id: u16, pin: u16) -> ValveState {
    let desc = ValveDescriptor {
        name: FixedName::new("VCE").unwrap(),
        board: FixedName::new("CACMO").unwrap(),
        pin,
    };
    ValveState::new(DeviceId(id), &desc)
}

#[test]
fn test_store_byte_leaves_other_fields() -> ShmResult<()> {
    let name = unique("bytes");
    let mut owner = SharedStateRegion::<ValveState>::create(&name, 2)?;
    owner.write(1, valve(10, 5))?;

    let mut control = SharedStateRegion::<ValveState>::attach(&name, AccessMode::ReadWrite)?;
    control.store_byte(1, ValveState::DESIRED_OFFSET, 1)?;
    owner.store_byte(1, ValveState::APPLIED_OFFSET, 1)?;
    owner.store_byte(1, ValveState::STATUS_OFFSET, DeviceStatus::Ok as u8)?;

    let slot = owner.read(1)?;
    assert!(slot.desired());
    assert!(slot.applied());
    assert_eq!(slot.status(), Some(DeviceStatus::Ok));
    assert_eq!(slot.device_id(), DeviceId(10));
    assert_eq!(slot.pin, 5);
    assert_eq!(control.load_byte(1, ValveState::APPLIED_OFFSET)?, 1);
    drop(control);
    owner.destroy()
}

#[test]
fn test_byte_access_checks_bounds_and_mode() -> ShmResult<()> {
    let name = unique("bytecheck");
    let mut owner = SharedStateRegion::<ValveState>::create(&name, 1)?;
    assert!(matches!(
        owner.load_byte(0, 40),
        Err(ShmError::OffsetOutOfRange { offset: 40, size: 40 })
    ));
    assert!(matches!(
        owner.store_byte(1, 0, 1),
        Err(ShmError::SlotOutOfRange { slot: 1, capacity: 1 })
    ));

    let mut reader = SharedStateRegion::<ValveState>::attach(&name, AccessMode::ReadOnly)?;
    assert!(matches!(
        reader.store_byte(0, ValveState::DESIRED_OFFSET, 1),
        Err(ShmError::ReadOnly { .. })
    ));
    assert_eq!(reader.load_byte(0, ValveState::DESIRED_OFFSET)?, 0);
    drop(reader);
    owner.destroy()
}
