//! Registration of bus objects with the transport.

use super::interface::{ButtonInterface, DeviceInterface, ProfileInterface, ResolutionInterface};
use crate::hardware::EntityKind;
use crate::object::BusObject;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use zbus::Connection;

#[derive(Error, Debug)]
pub enum RegistrarError {
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("Path already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Path not registered: {0}")]
    NotRegistered(String),
}

/// Makes an object's property surface visible (or invisible) on the bus.
#[async_trait]
pub trait BusRegistrar: Send + Sync {
    async fn register(&self, object: Arc<BusObject>) -> Result<(), RegistrarError>;

    async fn unregister(&self, object: &BusObject) -> Result<(), RegistrarError>;
}

/// Registrar that exposes nothing, for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRegistrar;

#[async_trait]
impl BusRegistrar for NullRegistrar {
    async fn register(&self, _object: Arc<BusObject>) -> Result<(), RegistrarError> {
        Ok(())
    }

    async fn unregister(&self, _object: &BusObject) -> Result<(), RegistrarError> {
        Ok(())
    }
}

/// Registrar serving objects on a zbus connection's object server.
#[derive(Debug, Clone)]
pub struct ZbusRegistrar {
    connection: Connection,
}

impl ZbusRegistrar {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl BusRegistrar for ZbusRegistrar {
    async fn register(&self, object: Arc<BusObject>) -> Result<(), RegistrarError> {
        let server = self.connection.object_server();
        let path = object.path().to_string();

        let added = match object.kind() {
            EntityKind::Device => server.at(path.as_str(), DeviceInterface::new(object)).await?,
            EntityKind::Profile => server.at(path.as_str(), ProfileInterface::new(object)).await?,
            EntityKind::Resolution => {
                server
                    .at(path.as_str(), ResolutionInterface::new(object))
                    .await?
            }
            EntityKind::Button => server.at(path.as_str(), ButtonInterface::new(object)).await?,
        };

        if !added {
            return Err(RegistrarError::AlreadyRegistered(path));
        }
        debug!("Registered {}", path);
        Ok(())
    }

    async fn unregister(&self, object: &BusObject) -> Result<(), RegistrarError> {
        let server = self.connection.object_server();
        let path = object.path().as_str();

        // `Ok(false)` only means the node outlived the interface.
        let removed = match object.kind() {
            EntityKind::Device => server.remove::<DeviceInterface, _>(path).await,
            EntityKind::Profile => server.remove::<ProfileInterface, _>(path).await,
            EntityKind::Resolution => server.remove::<ResolutionInterface, _>(path).await,
            EntityKind::Button => server.remove::<ButtonInterface, _>(path).await,
        };

        match removed {
            Ok(_) => {
                debug!("Unregistered {}", path);
                Ok(())
            }
            Err(zbus::Error::InterfaceNotFound) => {
                Err(RegistrarError::NotRegistered(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
