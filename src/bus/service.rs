//! D-Bus service setup and client for the device manager.

use super::interface::ManagerInterface;
use super::registrar::ZbusRegistrar;
use crate::config::{BusConfig, BusKind};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use zbus::names::BusName;
use zbus::zvariant::OwnedObjectPath;
use zbus::{connection::Builder, Connection, Result};

/// D-Bus service handle.
///
/// Keeps the connection (and with it the well-known name) alive, serves the
/// manager interface at the root path and hands out the registrar used for
/// tree nodes.
pub struct DbusService {
    connection: Connection,
    root: String,
    devices: Arc<RwLock<Vec<OwnedObjectPath>>>,
}

impl DbusService {
    /// Connect to the configured bus, serve the manager at the root path and
    /// request the well-known name.
    pub async fn start(config: &BusConfig) -> Result<Self> {
        let devices = Arc::new(RwLock::new(Vec::new()));
        let manager = ManagerInterface::new(devices.clone());

        let builder = match config.kind {
            BusKind::Session => Builder::session()?,
            BusKind::System => Builder::system()?,
        };
        let connection = builder
            .name(config.name.as_str())?
            .serve_at(config.root.as_str(), manager)?
            .build()
            .await?;

        info!(
            "D-Bus service started: {} at {} ({} bus)",
            config.name, config.root, config.kind
        );

        Ok(Self {
            connection,
            root: config.root.clone(),
            devices,
        })
    }

    /// Registrar that serves tree nodes on this connection.
    pub fn registrar(&self) -> ZbusRegistrar {
        ZbusRegistrar::new(self.connection.clone())
    }

    /// Publish the attached device list and emit the property change.
    pub async fn set_devices(&self, paths: Vec<OwnedObjectPath>) -> Result<()> {
        *self.devices.write().await = paths;

        debug!("Emitting Devices property change");
        let iface_ref = self
            .connection
            .object_server()
            .interface::<_, ManagerInterface>(self.root.as_str())
            .await?;
        let iface = iface_ref.get().await;
        iface.devices_changed(iface_ref.signal_emitter()).await?;
        Ok(())
    }
}

/// One profile as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub path: OwnedObjectPath,
    pub index: u32,
    pub is_active: bool,
    pub is_default: bool,
}

/// D-Bus client for inspecting a running daemon.
pub struct DbusClient {
    connection: Connection,
    name: String,
    root: String,
}

impl DbusClient {
    /// Connect to the bus the daemon is configured for.
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        let connection = match config.kind {
            BusKind::Session => Connection::session().await?,
            BusKind::System => Connection::system().await?,
        };
        Ok(Self {
            connection,
            name: config.name.clone(),
            root: config.root.clone(),
        })
    }

    /// Check if the daemon is running (owns the bus name).
    pub async fn is_daemon_running(&self) -> bool {
        let Ok(name) = BusName::try_from(self.name.as_str()) else {
            return false;
        };
        match zbus::fdo::DBusProxy::new(&self.connection).await {
            Ok(proxy) => proxy.name_has_owner(name).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn api_version(&self) -> Result<i32> {
        let proxy = ManagerProxy::builder(&self.connection)
            .destination(self.name.as_str())?
            .path(self.root.as_str())?
            .build()
            .await?;
        proxy.api_version().await
    }

    pub async fn devices(&self) -> Result<Vec<OwnedObjectPath>> {
        let proxy = ManagerProxy::builder(&self.connection)
            .destination(self.name.as_str())?
            .path(self.root.as_str())?
            .build()
            .await?;
        proxy.devices().await
    }

    pub async fn device_name(&self, device: &OwnedObjectPath) -> Result<String> {
        self.device_proxy(device).await?.name().await
    }

    pub async fn profiles(&self, device: &OwnedObjectPath) -> Result<Vec<ProfileSummary>> {
        let paths = self.device_proxy(device).await?.profiles().await?;

        let mut profiles = Vec::with_capacity(paths.len());
        for path in paths {
            let proxy = ProfileProxy::builder(&self.connection)
                .destination(self.name.as_str())?
                .path(path.to_string())?
                .build()
                .await?;
            profiles.push(ProfileSummary {
                index: proxy.index().await?,
                is_active: proxy.is_active().await?,
                is_default: proxy.is_default().await?,
                path,
            });
        }
        Ok(profiles)
    }

    async fn device_proxy(&self, device: &OwnedObjectPath) -> Result<DeviceProxy<'static>> {
        DeviceProxy::builder(&self.connection)
            .destination(self.name.clone())?
            .path(device.to_string())?
            .build()
            .await
    }
}

#[zbus::proxy(
    interface = "org.example.devicemgr1.Manager",
    default_service = "org.example.devicemgr1",
    default_path = "/org/example/devicemgr1"
)]
trait Manager {
    #[zbus(property, name = "APIVersion")]
    fn api_version(&self) -> zbus::Result<i32>;

    #[zbus(property)]
    fn devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

#[zbus::proxy(
    interface = "org.example.devicemgr1.Device",
    default_service = "org.example.devicemgr1"
)]
trait Device {
    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn profiles(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

#[zbus::proxy(
    interface = "org.example.devicemgr1.Profile",
    default_service = "org.example.devicemgr1"
)]
trait Profile {
    #[zbus(property)]
    fn index(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn is_active(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn is_default(&self) -> zbus::Result<bool>;

    fn set_active(&self) -> zbus::Result<()>;
}
