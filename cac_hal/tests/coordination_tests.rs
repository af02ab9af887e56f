//! End-to-end coordination tests on the simulation backend.
//!
//! Each test uses its own region names so tests can run in parallel.

use cac_common::config::CacConfig;
use cac_common::device::{ComponentKind, DeviceId};
use cac_common::state::{DeviceStatus, SensorState, ValveState};
use cac_hal::control::ControlEndpoint;
use cac_hal::drivers::{BackendRegistry, SimAdc, SimGpio, SimulationFactory};
use cac_hal::error::CacError;
use cac_hal::registry::DeviceRegistry;
use cac_hal::valve_actor::ValveActor;
use cac_hal::CacCore;
use cac_shared_memory::{
    AccessMode, HandshakeChannel, HandshakeError, PollPhase, SharedStateRegion, ShmError,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

static COUNTER: AtomicU32 = AtomicU32::new(0);

const VALVE_PINS: [u16; 4] = [5, 6, 19, 26];

/// CACMO board with region names private to one test.
fn test_config(tag: &str) -> CacConfig {
    let suffix = format!(
        "{}_{}_{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    );
    let mut config = CacConfig::default();
    config.runtime.sensor_segment = format!("test_sensor_{suffix}");
    config.runtime.valve_segment = format!("test_valve_{suffix}");
    config.runtime.handshake_segment = format!("test_hs_{suffix}");
    config.runtime.poll_timeout_ms = Some(5000);
    config
}

fn sim_core(config: CacConfig, factory: SimulationFactory) -> CacCore {
    let mut backends = BackendRegistry::new();
    backends.register(Arc::new(factory));
    CacCore::new(config).unwrap().with_backends(backends)
}

fn segment_exists(name: &str) -> bool {
    match SharedStateRegion::<ByteProbe>::attach(name, AccessMode::ReadOnly) {
        Ok(_) => true,
        Err(ShmError::SegmentMissing { .. }) => false,
        Err(e) => panic!("unexpected attach error for {name}: {e}"),
    }
}

/// One-byte element so any existing segment attaches.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct ByteProbe(u8);

// SAFETY: a single byte, every bit pattern valid.
unsafe impl cac_common::state::PlainState for ByteProbe {}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Regions created by hand, for tests that drive an actor directly.
struct Regions {
    sensors: SharedStateRegion<SensorState>,
    valves: SharedStateRegion<ValveState>,
    handshake: HandshakeChannel,
}

impl Regions {
    fn create(config: &CacConfig) -> Self {
        let board = &config.board;
        let runtime = &config.runtime;
        let layout = board.layout().unwrap();
        let mut sensors = SharedStateRegion::<SensorState>::create(
            &runtime.sensor_segment,
            layout.capacity(ComponentKind::Sensor),
        )
        .unwrap();
        let mut valves = SharedStateRegion::<ValveState>::create(
            &runtime.valve_segment,
            layout.capacity(ComponentKind::Valve),
        )
        .unwrap();
        let handshake = HandshakeChannel::create(&runtime.handshake_segment).unwrap();

        let table = DeviceRegistry::from_board(board).unwrap();
        table.seed_sensor_region(&mut sensors).unwrap();
        table.seed_valve_region(&mut valves).unwrap();
        Self {
            sensors,
            valves,
            handshake,
        }
    }

    fn destroy(self) {
        self.sensors.destroy().unwrap();
        self.valves.destroy().unwrap();
        self.handshake.destroy().unwrap();
    }
}

// ─── Sensor polling ─────────────────────────────────────────────────

#[test]
fn poll_returns_every_sensor_value() {
    let adc = SimAdc::new();
    for (ch, v) in [(0, 512), (1, 0), (2, 1023), (3, 7)] {
        adc.set_value(ch, v);
    }
    let mut core = sim_core(
        test_config("poll"),
        SimulationFactory::with_hardware(adc, SimGpio::new()),
    );
    core.init("simulation").unwrap();

    let readings = core.control().unwrap().trigger_sensor_poll().unwrap();
    let values: Vec<_> = readings.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![512, 0, 1023, 7]);
    assert!(readings.iter().all(|r| r.status == Some(DeviceStatus::Ok)));
    assert_eq!(readings[0].id, DeviceId(15));
    assert_eq!(readings[0].name, "Sensor1");

    core.shutdown().unwrap();
}

#[test]
fn failing_channel_reported_in_its_own_slot() {
    let adc = SimAdc::new();
    for ch in 0..4 {
        adc.set_value(ch, 100 + ch as i16);
    }
    let mut core = sim_core(
        test_config("fail"),
        SimulationFactory::with_hardware(adc.clone(), SimGpio::new()),
    );
    core.init("simulation").unwrap();

    // First cycle succeeds so slot 2 has a known value.
    core.control().unwrap().trigger_sensor_poll().unwrap();

    adc.fail_open(2, true);
    let readings = core.control().unwrap().trigger_sensor_poll().unwrap();

    assert_eq!(readings[2].status, Some(DeviceStatus::ErrOpenAdc));
    assert_eq!(readings[2].value, 102);
    for i in [0, 1, 3] {
        assert_eq!(readings[i].status, Some(DeviceStatus::Ok));
        assert_eq!(readings[i].value, 100 + i as i16);
    }

    core.shutdown().unwrap();
}

#[test]
fn readings_carry_the_cycle_that_wrote_them() {
    let mut core = sim_core(test_config("cycle"), SimulationFactory::new());
    core.init("simulation").unwrap();
    let control = core.control().unwrap();

    let first = control.trigger_sensor_poll().unwrap();
    let second = control.trigger_sensor_poll().unwrap();
    assert!(first.iter().all(|r| r.cycle == 1));
    assert!(second.iter().all(|r| r.cycle == 2));

    core.shutdown().unwrap();
}

#[test]
fn snapshot_does_not_touch_hardware() {
    let factory = SimulationFactory::new();
    let adc = factory.adc().clone();
    let mut core = sim_core(test_config("snap"), factory);
    core.init("simulation").unwrap();

    let before_poll = core.control().unwrap().sensor_snapshot().unwrap();
    assert!(before_poll
        .iter()
        .all(|r| r.status == Some(DeviceStatus::NotRead)));

    core.control().unwrap().trigger_sensor_poll().unwrap();
    let reads = adc.read_count(0);
    let snapshot = core.control().unwrap().sensor_snapshot().unwrap();
    assert_eq!(adc.read_count(0), reads);
    assert!(snapshot.iter().all(|r| r.cycle == 1));

    core.shutdown().unwrap();
}

#[test]
fn poll_timeout_withdraws_request() {
    let config = test_config("timeout");
    let regions = Regions::create(&config);

    // No sensor actor: nobody answers the request.
    let mut control = ControlEndpoint::attach(&config.board, &config.runtime).unwrap();
    control.set_poll_timeout(Some(Duration::from_millis(50)));
    match control.trigger_sensor_poll() {
        Err(CacError::Handshake(HandshakeError::Timeout { .. })) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(regions.handshake.poll_phase(), Some(PollPhase::Idle));

    drop(control);
    regions.destroy();
}

// ─── Valves ─────────────────────────────────────────────────────────

#[test]
fn coalesced_valve_changes_apply_latest_value_once() {
    let config = test_config("coalesce");
    let regions = Regions::create(&config);
    let factory = SimulationFactory::new();
    let gpio = factory.gpio().clone();

    let mut actor = ValveActor::start(&config.board, &config.runtime, &factory).unwrap();
    let mut control = ControlEndpoint::attach(&config.board, &config.runtime).unwrap();

    // Both changes land before the actor looks at the signal.
    control.set_valve(DeviceId(10), true).unwrap();
    control.set_valve(DeviceId(10), false).unwrap();
    assert!(regions.handshake.actuate_pending());

    let summary = actor.service_pending().unwrap().unwrap();
    assert_eq!(summary.applied, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(gpio.write_count(5), 1);
    assert_eq!(gpio.value(5), Some(0));

    let valves = control.valve_states().unwrap();
    assert!(!valves[0].applied());
    assert_eq!(valves[0].status(), Some(DeviceStatus::Ok));

    // Signal consumed: nothing left to do.
    assert!(actor.service_pending().unwrap().is_none());

    drop(actor);
    drop(control);
    regions.destroy();
}

#[test]
fn failed_write_keeps_applied_state() {
    let config = test_config("wfail");
    let regions = Regions::create(&config);
    let factory = SimulationFactory::new();
    let gpio = factory.gpio().clone();

    let mut actor = ValveActor::start(&config.board, &config.runtime, &factory).unwrap();
    let mut control = ControlEndpoint::attach(&config.board, &config.runtime).unwrap();

    gpio.fail_write(6, true);
    control.activate(DeviceId(11)).unwrap();
    let summary = actor.service_pending().unwrap().unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(gpio.write_attempts(6), 1);

    let valves = control.valve_states().unwrap();
    assert!(valves[1].desired());
    assert!(!valves[1].applied());
    assert_eq!(valves[1].status(), Some(DeviceStatus::ErrWriteGpio));

    drop(actor);
    drop(control);
    regions.destroy();
}

#[test]
fn valve_command_during_apply_is_not_lost() {
    let config = test_config("lastcmd");
    let regions = Regions::create(&config);
    let factory = SimulationFactory::new();
    let gpio = factory.gpio().clone();

    let actor = ValveActor::start(&config.board, &config.runtime, &factory).unwrap();
    let mut control = ControlEndpoint::attach(&config.board, &config.runtime).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let actor_stop = Arc::clone(&stop);
    let worker = thread::spawn(move || {
        let mut actor = actor;
        while !actor_stop.load(Ordering::Acquire) {
            actor.service_pending().unwrap();
            thread::yield_now();
        }
        actor
    });

    // Commands keep landing while the actor applies earlier ones.
    for i in 0..5_000 {
        control.set_valve(DeviceId(10), i % 2 == 0).unwrap();
        if i % 64 == 0 {
            thread::yield_now();
        }
    }
    control.set_valve(DeviceId(10), false).unwrap();

    stop.store(true, Ordering::Release);
    let mut actor = worker.join().unwrap();
    // The last command left `actuate` raised unless the worker already served it.
    actor.service_pending().unwrap();

    let vce = control.valve_states().unwrap()[0];
    assert!(!vce.desired());
    assert!(!vce.applied());
    assert_eq!(vce.status(), Some(DeviceStatus::Ok));
    assert_eq!(gpio.value(5), Some(0));

    drop(actor);
    drop(control);
    regions.destroy();
}

#[test]
fn toggle_all_reaches_every_line() {
    let factory = SimulationFactory::new();
    let gpio = factory.gpio().clone();
    let mut core = sim_core(test_config("toggle"), factory);
    core.init("simulation").unwrap();

    core.control().unwrap().toggle_all().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        VALVE_PINS.iter().all(|pin| gpio.value(*pin) == Some(1))
    }));

    let control = core.control().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        control
            .valve_states()
            .unwrap()
            .iter()
            .all(|v| v.desired() && v.applied())
    }));

    core.shutdown().unwrap();
}

#[test]
fn valve_commands_check_the_device_table() {
    let mut core = sim_core(test_config("ids"), SimulationFactory::new());
    core.init("simulation").unwrap();
    let control = core.control().unwrap();

    assert!(matches!(
        control.set_valve(DeviceId(99), true),
        Err(CacError::UnknownDevice(DeviceId(99)))
    ));
    assert!(matches!(
        control.set_valve(DeviceId(15), true),
        Err(CacError::WrongKind {
            expected: ComponentKind::Valve,
            ..
        })
    ));

    core.shutdown().unwrap();
}

// ─── Lifecycle ──────────────────────────────────────────────────────

#[test]
fn acquisition_failure_aborts_startup_and_cleans_up() {
    let factory = SimulationFactory::new();
    let gpio = factory.gpio().clone();
    let adc = factory.adc().clone();
    gpio.fail_request(19, true);

    let config = test_config("startfail");
    let runtime = config.runtime.clone();
    let mut core = sim_core(config, factory);

    match core.init("simulation") {
        Err(CacError::Acquisition { kind, failures }) => {
            assert_eq!(kind, ComponentKind::Valve);
            assert_eq!(failures.0.len(), 1);
            assert_eq!(failures.0[0].0, DeviceId(12));
        }
        other => panic!("expected acquisition failure, got {other:?}"),
    }
    assert!(!core.is_running());

    assert!(!segment_exists(&runtime.sensor_segment));
    assert!(!segment_exists(&runtime.valve_segment));
    assert!(!segment_exists(&runtime.handshake_segment));

    for pin in VALVE_PINS {
        assert!(!gpio.is_held(pin), "pin {pin} still held");
    }
    for ch in 0..4 {
        assert!(!adc.is_open(ch));
    }
}

#[test]
fn shutdown_releases_lines_and_destroys_regions() {
    let factory = SimulationFactory::new();
    let gpio = factory.gpio().clone();
    let config = test_config("shutdown");
    let runtime = config.runtime.clone();
    let mut core = sim_core(config, factory);
    core.init("simulation").unwrap();

    assert!(core.is_running());
    assert!(segment_exists(&runtime.valve_segment));
    assert!(VALVE_PINS.iter().all(|pin| gpio.is_held(*pin)));

    core.shutdown().unwrap();
    assert!(!core.is_running());
    for pin in VALVE_PINS {
        assert!(!gpio.is_held(pin));
        assert_eq!(gpio.release_count(pin), 1);
    }
    assert!(!segment_exists(&runtime.sensor_segment));
    assert!(!segment_exists(&runtime.valve_segment));
    assert!(!segment_exists(&runtime.handshake_segment));

    // Second shutdown is a no-op.
    core.shutdown().unwrap();
    assert!(VALVE_PINS.iter().all(|pin| gpio.release_count(*pin) == 1));
    assert!(matches!(core.control(), Err(CacError::NotRunning)));
}

#[test]
fn stale_regions_are_replaced_on_init() {
    let config = test_config("stale");
    let stale = Regions::create(&config);
    // Simulate a crashed run: mappings gone, names left behind.
    drop(stale);

    let mut core = sim_core(config, SimulationFactory::new());
    core.init("simulation").unwrap();
    let readings = core.control().unwrap().trigger_sensor_poll().unwrap();
    assert_eq!(readings.len(), 4);
    core.shutdown().unwrap();
}

#[test]
fn unknown_backend_is_rejected() {
    let config = test_config("backend");
    let runtime = config.runtime.clone();
    let mut core = sim_core(config, SimulationFactory::new());
    assert!(matches!(
        core.init("nope"),
        Err(CacError::DriverNotFound(name)) if name == "nope"
    ));
    assert!(!segment_exists(&runtime.sensor_segment));
}

#[test]
fn shipped_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/cac.toml");
    let config = CacCore::load_config(&path).unwrap();
    assert_eq!(config.board.name, "CACMO");
    assert_eq!(config.board.valves.len(), 4);
    assert_eq!(config.board.sensors.len(), 4);
    assert_eq!(config.runtime.poll_timeout(), Some(Duration::from_millis(2000)));
}

#[test]
fn bad_config_path_exits_with_a_diagnostic() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_cac_hal"))
        .args(["--config", "/nonexistent/cac.toml"])
        .stdin(std::process::Stdio::null())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    assert!(text.contains("CAC startup failed"), "output was: {text:?}");
    assert!(text.contains("not found"), "output was: {text:?}");
}
