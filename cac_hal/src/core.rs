//! CAC Core: region lifecycle and actor management.
//!
//! `CacCore` creates every shared region before any actor starts, spawns the
//! sensor and valve actors as threads (each attaching its own mappings and
//! owning its own device table), waits for both to report ready, and then
//! hands out the control endpoint. Shutdown reverses the order.

use crate::control::ControlEndpoint;
use crate::drivers::{BackendRegistry, DriverFactory};
use crate::error::CacError;
use crate::registry::DeviceRegistry;
use crate::sensor_actor::SensorActor;
use crate::valve_actor::ValveActor;
use cac_common::config::CacConfig;
use cac_common::device::ComponentKind;
use cac_common::state::{SensorState, ValveState};
use cac_shared_memory::{HandshakeChannel, SharedStateRegion, SignalBlock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Regions created and destroyed by the core.
struct OwnedRegions {
    sensors: SharedStateRegion<SensorState>,
    valves: SharedStateRegion<ValveState>,
    handshake: HandshakeChannel,
}

/// Owns the regions, the actor threads and the control endpoint.
pub struct CacCore {
    config: CacConfig,
    backends: BackendRegistry,
    running: Arc<AtomicBool>,
    regions: Option<OwnedRegions>,
    actors: Vec<(&'static str, JoinHandle<Result<(), CacError>>)>,
    control: Option<ControlEndpoint>,
}

impl CacCore {
    /// Create a core for a validated configuration, with the built-in backends.
    pub fn new(config: CacConfig) -> Result<Self, CacError> {
        config.validate()?;

        info!(
            "CacCore created for board {} ({} sensors, {} valves)",
            config.board.name,
            config.board.sensors.len(),
            config.board.valves.len()
        );

        Ok(Self {
            config,
            backends: BackendRegistry::with_builtin(),
            running: Arc::new(AtomicBool::new(false)),
            regions: None,
            actors: Vec::new(),
            control: None,
        })
    }

    /// Replace the backend registry.
    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    /// Load and validate a configuration file.
    pub fn load_config(path: &Path) -> Result<CacConfig, CacError> {
        info!("Loading configuration from {:?}", path);
        Ok(CacConfig::load_validated(path)?)
    }

    /// Configuration in use.
    pub fn config(&self) -> &CacConfig {
        &self.config
    }

    /// Flag cleared to request shutdown (e.g. from a signal handler).
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Whether the core is initialised and no shutdown was requested.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Create regions, start both actors with backend `driver_name`, attach
    /// the control endpoint.
    ///
    /// If either actor cannot acquire its devices the core is shut down and
    /// the actor's error returned.
    pub fn init(&mut self, driver_name: &str) -> Result<(), CacError> {
        if self.regions.is_some() {
            return Err(CacError::InitFailed("core already initialized".to_string()));
        }
        info!("Initializing CacCore with driver '{}'...", driver_name);

        let factory = self
            .backends
            .get(driver_name)
            .ok_or_else(|| CacError::DriverNotFound(driver_name.to_string()))?;

        self.regions = Some(self.create_regions()?);
        self.running.store(true, Ordering::SeqCst);

        if let Err(e) = self.spawn_actors(factory) {
            error!("Actor startup failed: {}", e);
            if let Err(shutdown_err) = self.shutdown() {
                warn!("Cleanup after failed startup: {}", shutdown_err);
            }
            return Err(e);
        }

        let control = ControlEndpoint::attach(&self.config.board, &self.config.runtime);
        match control {
            Ok(control) => self.control = Some(control),
            Err(e) => {
                let _ = self.shutdown();
                return Err(e);
            }
        }

        info!("CacCore initialized successfully");
        Ok(())
    }

    fn create_regions(&self) -> Result<OwnedRegions, CacError> {
        let board = &self.config.board;
        let runtime = &self.config.runtime;
        let layout = board.layout()?;

        // A previous run may have died without tearing down.
        if SharedStateRegion::<SensorState>::unlink(&runtime.sensor_segment)? {
            warn!("Removed stale region {}", runtime.sensor_segment);
        }
        if SharedStateRegion::<ValveState>::unlink(&runtime.valve_segment)? {
            warn!("Removed stale region {}", runtime.valve_segment);
        }
        if SharedStateRegion::<SignalBlock>::unlink(&runtime.handshake_segment)? {
            warn!("Removed stale region {}", runtime.handshake_segment);
        }

        let mut sensors = SharedStateRegion::<SensorState>::create(
            &runtime.sensor_segment,
            layout.capacity(ComponentKind::Sensor).max(1),
        )?;
        let mut valves = SharedStateRegion::<ValveState>::create(
            &runtime.valve_segment,
            layout.capacity(ComponentKind::Valve).max(1),
        )?;
        let handshake = HandshakeChannel::create(&runtime.handshake_segment)?;

        let table = DeviceRegistry::from_board(board)?;
        table.seed_sensor_region(&mut sensors)?;
        table.seed_valve_region(&mut valves)?;

        info!(
            "Created regions {}, {}, {}",
            runtime.sensor_segment, runtime.valve_segment, runtime.handshake_segment
        );
        Ok(OwnedRegions {
            sensors,
            valves,
            handshake,
        })
    }

    fn spawn_actors(&mut self, factory: Arc<dyn DriverFactory>) -> Result<(), CacError> {
        let (ready_tx, ready_rx) = mpsc::channel::<(&'static str, Result<(), CacError>)>();

        let board = self.config.board.clone();
        let runtime = self.config.runtime.clone();
        let tx = ready_tx.clone();
        let sensor_factory = Arc::clone(&factory);
        let handle = thread::Builder::new()
            .name("cac-sensor".to_string())
            .spawn(move || {
                match SensorActor::start(&board, &runtime, sensor_factory.as_ref()) {
                    Ok(actor) => {
                        let _ = tx.send(("sensor", Ok(())));
                        actor.run()
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        let _ = tx.send(("sensor", Err(e)));
                        Err(CacError::InitFailed(msg))
                    }
                }
            })?;
        self.actors.push(("sensor", handle));

        let board = self.config.board.clone();
        let runtime = self.config.runtime.clone();
        let tx = ready_tx;
        let handle = thread::Builder::new()
            .name("cac-valve".to_string())
            .spawn(move || match ValveActor::start(&board, &runtime, factory.as_ref()) {
                Ok(actor) => {
                    let _ = tx.send(("valve", Ok(())));
                    actor.run()
                }
                Err(e) => {
                    let msg = e.to_string();
                    let _ = tx.send(("valve", Err(e)));
                    Err(CacError::InitFailed(msg))
                }
            })?;
        self.actors.push(("valve", handle));

        // Startup barrier: both actors hold their devices before control starts.
        let mut first_error = None;
        for _ in 0..self.actors.len() {
            match ready_rx.recv() {
                Ok((name, Ok(()))) => debug!("{} actor reported ready", name),
                Ok((name, Err(e))) => {
                    error!("{} actor failed to start: {}", name, e);
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert(CacError::InitFailed(
                        "actor exited before reporting".to_string(),
                    ));
                    break;
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Control endpoint of a running core.
    pub fn control(&mut self) -> Result<&mut ControlEndpoint, CacError> {
        self.control.as_mut().ok_or(CacError::NotRunning)
    }

    /// Stop actors, release their devices and destroy the regions.
    ///
    /// Safe to call more than once; also runs on drop.
    pub fn shutdown(&mut self) -> Result<(), CacError> {
        self.running.store(false, Ordering::SeqCst);
        let Some(regions) = self.regions.take() else {
            return Ok(());
        };
        info!("Shutting down CacCore...");

        self.control = None;
        regions.handshake.signal_shutdown();

        for (name, handle) in self.actors.drain(..) {
            match handle.join() {
                Ok(Ok(())) => debug!("{} actor joined", name),
                Ok(Err(e)) => warn!("{} actor exited with error: {}", name, e),
                Err(_) => error!("{} actor panicked", name),
            }
        }

        let OwnedRegions {
            sensors,
            valves,
            handshake,
        } = regions;
        let results = [sensors.destroy(), valves.destroy(), handshake.destroy()];
        for result in results {
            result?;
        }

        info!("CacCore shutdown complete");
        Ok(())
    }
}

impl Drop for CacCore {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("CacCore shutdown on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for CacCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacCore")
            .field("board", &self.config.board.name)
            .field("running", &self.is_running())
            .field("actors", &self.actors.len())
            .field("backends", &self.backends)
            .finish()
    }
}
