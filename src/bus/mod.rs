//! D-Bus exposure of the device tree.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  register/unregister  ┌────────────────┐  org.example.devicemgr1.*  ┌────────┐
//! │  ObjectTree  │──────────────────────>│ ZbusRegistrar  │<───────────────────────────│ client │
//! │ (BusObjects) │                       │ (ObjectServer) │                            └────────┘
//! └──────────────┘                       └────────────────┘
//! ```
//!
//! The manager lives at the bus root; every tree node gets one interface at
//! its own path, registered for exactly as long as the node is in the tree.

mod interface;
mod registrar;
mod service;

pub use interface::{
    ButtonInterface, DeviceInterface, ManagerInterface, ProfileInterface, ResolutionInterface,
    API_VERSION,
};
pub use registrar::{BusRegistrar, NullRegistrar, RegistrarError, ZbusRegistrar};
pub use service::{DbusClient, DbusService, ProfileSummary};
