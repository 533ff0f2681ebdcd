//! Background daemon exposing the device tree on D-Bus.
//!
//! The daemon:
//! 1. Connects to the configured bus and serves the manager interface
//! 2. Attaches every plugged-in device, building and registering its objects
//! 3. Handles hardware events one at a time from a single dispatch loop
//! 4. Detaches every device on shutdown so no registration outlives its node

use crate::bus::{BusRegistrar, DbusClient, DbusService, NullRegistrar};
use crate::config::{Config, ConfigError};
use crate::error::CoreError;
use crate::hardware::{HandleId, MemoryLibrary};
use crate::tree::ObjectTree;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zbus::zvariant::OwnedObjectPath;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("Object tree error: {0}")]
    Tree(#[from] CoreError),

    #[error("Daemon already running")]
    AlreadyRunning,

    #[error("Daemon not running")]
    NotRunning,

    #[error("Failed to signal daemon: {0}")]
    Signal(#[from] nix::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hardware changes fed to the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    /// A device appeared; build and expose its objects.
    Attached(HandleId),
    /// The device with this name disappeared.
    Detached(String),
}

/// Main daemon struct
pub struct Daemon {
    config: Config,
    library: Arc<MemoryLibrary>,
    tree: ObjectTree,
    events_tx: mpsc::UnboundedSender<HardwareEvent>,
    events_rx: mpsc::UnboundedReceiver<HardwareEvent>,
}

impl Daemon {
    /// Create a daemon whose hardware comes from the config's device fixtures.
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        let library = Arc::new(MemoryLibrary::from_fixtures(&config.devices));
        let tree = ObjectTree::new(library.clone(), &config.bus.root)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            library,
            tree,
            events_tx,
            events_rx,
        })
    }

    /// Sender for hot-plug sources to deliver hardware events.
    pub fn events(&self) -> mpsc::UnboundedSender<HardwareEvent> {
        self.events_tx.clone()
    }

    pub fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    /// Queue an `Attached` event for every plugged-in device.
    fn announce_devices(&self) {
        for device in self.library.devices() {
            // The receiver lives in `self`, so this cannot fail.
            let _ = self.events_tx.send(HardwareEvent::Attached(device));
        }
    }

    /// Apply one hardware event to the tree.
    ///
    /// Returns `true` if the set of attached devices changed.
    pub async fn handle_event(
        &mut self,
        event: HardwareEvent,
        registrar: &dyn BusRegistrar,
    ) -> bool {
        match event {
            HardwareEvent::Attached(handle) => {
                match self.tree.attach_device(handle, registrar).await {
                    Ok(objects) => {
                        debug!("Device {} exposed as {} objects", handle, objects.len());
                        true
                    }
                    Err(e) => {
                        error!("Failed to attach device {}: {} (errno {})", handle, e, e.errno());
                        false
                    }
                }
            }
            HardwareEvent::Detached(name) => {
                let path = match self.tree.device_path(&name) {
                    Ok(path) => path,
                    Err(e) => {
                        warn!("Ignoring removal of '{}': {}", name, e);
                        return false;
                    }
                };
                match self.tree.detach_device(path.as_str(), registrar).await {
                    Ok(_) => {
                        if let Some(handle) = self.library.device_by_name(&name) {
                            if let Err(e) = self.library.remove_device(handle) {
                                warn!("Library refused removal of '{}': {}", name, e);
                            }
                        }
                        true
                    }
                    Err(e) => {
                        warn!("Ignoring removal of '{}': {}", name, e);
                        false
                    }
                }
            }
        }
    }

    /// Main daemon loop
    pub async fn run_loop(&mut self) -> Result<(), DaemonError> {
        let service = DbusService::start(&self.config.bus).await?;
        let registrar = service.registrar();
        let mut sigterm = signal(SignalKind::terminate())?;

        self.announce_devices();
        info!(
            "Daemon running with {} device(s) under {}",
            self.library.devices().len(),
            self.tree.root()
        );

        // Main event loop
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    if self.handle_event(event, &registrar).await {
                        publish_devices(&service, self.tree.device_paths()).await;
                    }
                }

                // Handle shutdown signals
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received");
                    break;
                }
            }
        }

        let removed = self.tree.detach_all(&registrar).await;
        publish_devices(&service, Vec::new()).await;
        info!("Daemon stopped ({} objects torn down)", removed);
        Ok(())
    }
}

async fn publish_devices(service: &DbusService, paths: Vec<OwnedObjectPath>) {
    if let Err(e) = service.set_devices(paths).await {
        warn!("Failed to publish device list: {}", e);
    }
}

/// Attach every configured device into a tree with no bus behind it and
/// return all object paths in construction order.
pub async fn dry_run(config: &Config) -> Result<Vec<OwnedObjectPath>, DaemonError> {
    let library = Arc::new(MemoryLibrary::from_fixtures(&config.devices));
    let mut tree = ObjectTree::new(library.clone(), &config.bus.root)?;

    for device in library.devices() {
        tree.attach_device(device, &NullRegistrar).await?;
    }
    let paths = tree.paths();
    tree.detach_all(&NullRegistrar).await;

    Ok(paths)
}

/// Get the PID file path
fn pid_file() -> Result<PathBuf, DaemonError> {
    let runtime_dir = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .ok_or(DaemonError::Config(ConfigError::NoConfigDir))?;

    Ok(runtime_dir.join("devicemgrd.pid"))
}

/// PID of the running daemon, if any
fn running_pid() -> Option<Pid> {
    let path = pid_file().ok()?;
    let pid_str = std::fs::read_to_string(path).ok()?;
    let pid = Pid::from_raw(pid_str.trim().parse::<i32>().ok()?);
    kill(pid, None).ok().map(|_| pid)
}

/// Write PID file
fn write_pid() -> Result<(), DaemonError> {
    let path = pid_file()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, std::process::id().to_string())?;
    Ok(())
}

/// Remove PID file
fn remove_pid() -> Result<(), DaemonError> {
    let path = pid_file()?;
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Start the daemon
pub async fn run(config: Config) -> Result<(), DaemonError> {
    if running_pid().is_some() {
        return Err(DaemonError::AlreadyRunning);
    }

    write_pid()?;

    let mut daemon = Daemon::new(config)?;
    let result = daemon.run_loop().await;

    remove_pid()?;

    result
}

/// Stop the daemon
pub async fn stop() -> Result<(), DaemonError> {
    let pid = running_pid().ok_or(DaemonError::NotRunning)?;
    kill(pid, Signal::SIGTERM)?;
    info!("Sent SIGTERM to daemon (PID: {})", pid);
    Ok(())
}

/// Check daemon status
pub async fn status(config: &Config) -> Result<(), DaemonError> {
    let Some(pid) = running_pid() else {
        println!("devicemgrd is not running");
        return Ok(());
    };
    println!("devicemgrd is running (PID: {})", pid);

    let client = DbusClient::connect(&config.bus).await?;
    if !client.is_daemon_running().await {
        println!("  {} is not owned on the {} bus", config.bus.name, config.bus.kind);
        return Ok(());
    }

    println!("  API version: {}", client.api_version().await?);
    for device in client.devices().await? {
        println!("  {} ({})", client.device_name(&device).await?, device.as_str());
        for profile in client.profiles(&device).await? {
            println!(
                "    profile {}{}{}",
                profile.index,
                if profile.is_active { " [active]" } else { "" },
                if profile.is_default { " [default]" } else { "" },
            );
        }
    }

    Ok(())
}
