//! D-Bus interfaces for the manager and for each kind of tree node.
//!
//! Node interfaces hold the [`BusObject`] they expose and read every property
//! through it, so values always reflect the library's current state. Once an
//! object has been torn down every read fails with `UnknownObject`.

use crate::error::CoreError;
use crate::hardware::EntityKind;
use crate::object::BusObject;
use std::sync::Arc;
use tokio::sync::RwLock;
use zbus::fdo;
use zbus::interface;
use zbus::object_server::ObjectServer;
use zbus::zvariant::OwnedObjectPath;

/// API version reported by the manager.
pub const API_VERSION: i32 = 1;

/// Entry point for clients: lists attached devices.
///
/// Registered at the bus root, e.g. `/org/example/devicemgr1`.
pub struct ManagerInterface {
    devices: Arc<RwLock<Vec<OwnedObjectPath>>>,
}

impl ManagerInterface {
    pub fn new(devices: Arc<RwLock<Vec<OwnedObjectPath>>>) -> Self {
        Self { devices }
    }
}

#[interface(name = "org.example.devicemgr1.Manager")]
impl ManagerInterface {
    #[zbus(property(emits_changed_signal = "const"), name = "APIVersion")]
    fn api_version(&self) -> i32 {
        API_VERSION
    }

    /// Object paths of the attached devices.
    #[zbus(property)]
    async fn devices(&self) -> Vec<OwnedObjectPath> {
        self.devices.read().await.clone()
    }
}

/// Fail with `UnknownObject` once `object` has been torn down.
fn live(object: &BusObject) -> fdo::Result<&BusObject> {
    if object.is_live() {
        Ok(object)
    } else {
        Err(CoreError::Gone.into())
    }
}

pub struct DeviceInterface {
    object: Arc<BusObject>,
}

impl DeviceInterface {
    pub fn new(object: Arc<BusObject>) -> Self {
        Self { object }
    }
}

#[interface(name = "org.example.devicemgr1.Device")]
impl DeviceInterface {
    #[zbus(property(emits_changed_signal = "const"))]
    fn name(&self) -> fdo::Result<String> {
        Ok(self.object.name()?)
    }

    #[zbus(property(emits_changed_signal = "const"))]
    fn profiles(&self) -> fdo::Result<Vec<OwnedObjectPath>> {
        Ok(live(&self.object)?.children(EntityKind::Profile))
    }
}

pub struct ProfileInterface {
    object: Arc<BusObject>,
}

impl ProfileInterface {
    pub fn new(object: Arc<BusObject>) -> Self {
        Self { object }
    }
}

#[interface(name = "org.example.devicemgr1.Profile")]
impl ProfileInterface {
    #[zbus(property(emits_changed_signal = "const"))]
    fn index(&self) -> fdo::Result<u32> {
        Ok(live(&self.object)?.index())
    }

    #[zbus(property)]
    fn is_active(&self) -> fdo::Result<bool> {
        Ok(self.object.is_active()?)
    }

    #[zbus(property)]
    fn is_default(&self) -> fdo::Result<bool> {
        Ok(self.object.is_default()?)
    }

    #[zbus(property(emits_changed_signal = "const"))]
    fn resolutions(&self) -> fdo::Result<Vec<OwnedObjectPath>> {
        Ok(live(&self.object)?.children(EntityKind::Resolution))
    }

    #[zbus(property(emits_changed_signal = "const"))]
    fn buttons(&self) -> fdo::Result<Vec<OwnedObjectPath>> {
        Ok(live(&self.object)?.children(EntityKind::Button))
    }

    /// Make this the device's active profile.
    async fn set_active(&self, #[zbus(object_server)] server: &ObjectServer) -> fdo::Result<()> {
        self.object.set_active()?;

        let siblings = match self.object.parent() {
            Some(device) => server
                .interface::<_, DeviceInterface>(device.as_str())
                .await?
                .get()
                .await
                .object
                .children(EntityKind::Profile),
            None => vec![self.object.path().clone()],
        };
        for sibling in siblings {
            let Ok(iface) = server
                .interface::<_, ProfileInterface>(sibling.as_str())
                .await
            else {
                continue;
            };
            iface
                .get()
                .await
                .is_active_changed(iface.signal_emitter())
                .await?;
        }
        Ok(())
    }
}

pub struct ResolutionInterface {
    object: Arc<BusObject>,
}

impl ResolutionInterface {
    pub fn new(object: Arc<BusObject>) -> Self {
        Self { object }
    }
}

#[interface(name = "org.example.devicemgr1.Resolution")]
impl ResolutionInterface {
    #[zbus(property(emits_changed_signal = "const"))]
    fn index(&self) -> fdo::Result<u32> {
        Ok(live(&self.object)?.index())
    }

    #[zbus(property)]
    fn is_active(&self) -> fdo::Result<bool> {
        Ok(self.object.is_active()?)
    }

    #[zbus(property)]
    fn is_default(&self) -> fdo::Result<bool> {
        Ok(self.object.is_default()?)
    }

    /// Resolution in dpi.
    #[zbus(property)]
    fn resolution(&self) -> fdo::Result<u32> {
        Ok(self.object.dpi()?)
    }

    /// Make this the profile's active resolution.
    async fn set_active(&self, #[zbus(object_server)] server: &ObjectServer) -> fdo::Result<()> {
        self.object.set_active()?;

        let siblings = match self.object.parent() {
            Some(profile) => server
                .interface::<_, ProfileInterface>(profile.as_str())
                .await?
                .get()
                .await
                .object
                .children(EntityKind::Resolution),
            None => vec![self.object.path().clone()],
        };
        for sibling in siblings {
            let Ok(iface) = server
                .interface::<_, ResolutionInterface>(sibling.as_str())
                .await
            else {
                continue;
            };
            iface
                .get()
                .await
                .is_active_changed(iface.signal_emitter())
                .await?;
        }
        Ok(())
    }
}

pub struct ButtonInterface {
    object: Arc<BusObject>,
}

impl ButtonInterface {
    pub fn new(object: Arc<BusObject>) -> Self {
        Self { object }
    }
}

#[interface(name = "org.example.devicemgr1.Button")]
impl ButtonInterface {
    #[zbus(property(emits_changed_signal = "const"))]
    fn index(&self) -> fdo::Result<u32> {
        Ok(live(&self.object)?.index())
    }

    #[zbus(property)]
    fn action_type(&self) -> fdo::Result<String> {
        Ok(self.object.action()?)
    }
}
