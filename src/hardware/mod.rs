//! Seam to the hardware-configuration library.
//!
//! The library owns every device, profile, resolution and button. It hands
//! out opaque, reference-counted handles; this crate never creates or frees
//! an entity, it only takes and drops references and queries live state.

pub mod memory;

use std::fmt;
use thiserror::Error;

pub use memory::{ButtonFixture, DeviceFixture, MemoryLibrary, ProfileFixture, ResolutionFixture};

/// Opaque handle to one library entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kinds of entity in the device tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Device,
    Profile,
    Resolution,
    Button,
}

impl EntityKind {
    /// Path element naming this kind under the bus root.
    pub fn segment(&self) -> &'static str {
        match self {
            EntityKind::Device => "device",
            EntityKind::Profile => "profile",
            EntityKind::Resolution => "resolution",
            EntityKind::Button => "button",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("Unknown handle {0}")]
    UnknownHandle(HandleId),

    #[error("Handle {handle} is not a {expected}")]
    WrongKind {
        handle: HandleId,
        expected: EntityKind,
    },
}

/// Operations the daemon needs from the hardware-configuration library.
///
/// Every query reads the library's current state. Implementations must be
/// cheap and non-blocking: they are called from bus property handlers.
pub trait HardwareLibrary: Send + Sync {
    /// Take one reference on `handle`.
    fn ref_handle(&self, handle: HandleId) -> Result<(), HardwareError>;

    /// Drop one reference on `handle`.
    fn unref_handle(&self, handle: HandleId);

    fn device_name(&self, device: HandleId) -> Result<String, HardwareError>;

    /// Profiles of `device`, in the library's order.
    fn profiles(&self, device: HandleId) -> Result<Vec<HandleId>, HardwareError>;

    /// Resolutions of `profile`, in the library's order.
    fn resolutions(&self, profile: HandleId) -> Result<Vec<HandleId>, HardwareError>;

    /// Buttons of `profile`, in the library's order.
    fn buttons(&self, profile: HandleId) -> Result<Vec<HandleId>, HardwareError>;

    fn profile_is_active(&self, profile: HandleId) -> Result<bool, HardwareError>;

    fn profile_is_default(&self, profile: HandleId) -> Result<bool, HardwareError>;

    /// Make `profile` the active one among its siblings.
    fn set_profile_active(&self, profile: HandleId) -> Result<(), HardwareError>;

    fn resolution_is_active(&self, resolution: HandleId) -> Result<bool, HardwareError>;

    fn resolution_is_default(&self, resolution: HandleId) -> Result<bool, HardwareError>;

    /// Resolution in dots per inch.
    fn resolution_dpi(&self, resolution: HandleId) -> Result<u32, HardwareError>;

    /// Make `resolution` the active one among its siblings.
    fn set_resolution_active(&self, resolution: HandleId) -> Result<(), HardwareError>;

    /// Name of the action bound to `button`.
    fn button_action(&self, button: HandleId) -> Result<String, HardwareError>;
}
