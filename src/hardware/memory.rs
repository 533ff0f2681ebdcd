//! In-memory hardware-configuration library.
//!
//! Devices are described by fixtures (usually from the `[[devices]]` section
//! of the config file). Each entity starts with one reference held by the
//! library itself; `remove_device` drops that reference, after which an
//! entity lives on only as long as someone else still references it.

use super::{EntityKind, HandleId, HardwareError, HardwareLibrary};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct DeviceFixture {
    /// Device name, unique among attached devices
    pub name: String,

    #[serde(default)]
    pub profiles: Vec<ProfileFixture>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProfileFixture {
    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub default: bool,

    #[serde(default)]
    pub resolutions: Vec<ResolutionFixture>,

    #[serde(default)]
    pub buttons: Vec<ButtonFixture>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ResolutionFixture {
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub default: bool,
}

impl Default for ResolutionFixture {
    fn default() -> Self {
        Self {
            dpi: default_dpi(),
            active: false,
            default: false,
        }
    }
}

fn default_dpi() -> u32 {
    800
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ButtonFixture {
    /// Bound action, e.g. "button1", "macro", "none"
    #[serde(default = "default_action")]
    pub action: String,
}

impl Default for ButtonFixture {
    fn default() -> Self {
        Self {
            action: default_action(),
        }
    }
}

fn default_action() -> String {
    "none".to_string()
}

#[derive(Debug)]
enum Entity {
    Device {
        name: String,
        profiles: Vec<HandleId>,
    },
    Profile {
        active: bool,
        default: bool,
        resolutions: Vec<HandleId>,
        buttons: Vec<HandleId>,
    },
    Resolution {
        dpi: u32,
        active: bool,
        default: bool,
    },
    Button {
        action: String,
    },
}

impl Entity {
    fn kind(&self) -> EntityKind {
        match self {
            Entity::Device { .. } => EntityKind::Device,
            Entity::Profile { .. } => EntityKind::Profile,
            Entity::Resolution { .. } => EntityKind::Resolution,
            Entity::Button { .. } => EntityKind::Button,
        }
    }

    fn children(&self) -> Vec<HandleId> {
        match self {
            Entity::Device { profiles, .. } => profiles.clone(),
            Entity::Profile {
                resolutions,
                buttons,
                ..
            } => resolutions.iter().chain(buttons).copied().collect(),
            Entity::Resolution { .. } | Entity::Button { .. } => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    refcount: u32,
    parent: Option<HandleId>,
    entity: Entity,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    entries: HashMap<HandleId, Entry>,
    devices: Vec<HandleId>,
}

impl State {
    fn insert(&mut self, parent: Option<HandleId>, entity: Entity) -> HandleId {
        self.next_id += 1;
        let handle = HandleId(self.next_id);
        self.entries.insert(
            handle,
            Entry {
                refcount: 1,
                parent,
                entity,
            },
        );
        handle
    }

    fn entry(&self, handle: HandleId, expected: EntityKind) -> Result<&Entry, HardwareError> {
        let entry = self
            .entries
            .get(&handle)
            .ok_or(HardwareError::UnknownHandle(handle))?;
        if entry.entity.kind() != expected {
            return Err(HardwareError::WrongKind { handle, expected });
        }
        Ok(entry)
    }

    fn unref(&mut self, handle: HandleId) {
        let Some(entry) = self.entries.get_mut(&handle) else {
            warn!("unref of unknown or freed handle {}", handle);
            return;
        };
        entry.refcount -= 1;
        if entry.refcount == 0 {
            self.entries.remove(&handle);
            debug!("Freed handle {}", handle);
        }
    }

    /// Make `handle` the only active child of its parent.
    fn activate(&mut self, handle: HandleId, kind: EntityKind) -> Result<(), HardwareError> {
        let siblings = match self.entry(handle, kind)?.parent {
            Some(parent) => match self.entries.get(&parent).map(|e| &e.entity) {
                Some(Entity::Device { profiles, .. }) => profiles.clone(),
                Some(Entity::Profile { resolutions, .. }) => resolutions.clone(),
                _ => vec![handle],
            },
            None => vec![handle],
        };

        for sibling in siblings {
            if let Some(entry) = self.entries.get_mut(&sibling) {
                match &mut entry.entity {
                    Entity::Profile { active, .. } | Entity::Resolution { active, .. } => {
                        *active = sibling == handle;
                    }
                    Entity::Device { .. } | Entity::Button { .. } => {}
                }
            }
        }
        Ok(())
    }
}

/// Hardware library backed by fixtures held in memory.
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    state: Mutex<State>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a library with one plugged-in device per fixture.
    pub fn from_fixtures(fixtures: &[DeviceFixture]) -> Self {
        let library = Self::new();
        for fixture in fixtures {
            library.add_device(fixture);
        }
        library
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug in a device described by `fixture`.
    pub fn add_device(&self, fixture: &DeviceFixture) -> HandleId {
        let mut state = self.lock();
        let device = state.insert(
            None,
            Entity::Device {
                name: fixture.name.clone(),
                profiles: Vec::new(),
            },
        );

        let mut profiles = Vec::with_capacity(fixture.profiles.len());
        for profile in &fixture.profiles {
            let handle = state.insert(
                Some(device),
                Entity::Profile {
                    active: profile.active,
                    default: profile.default,
                    resolutions: Vec::new(),
                    buttons: Vec::new(),
                },
            );

            let resolutions: Vec<HandleId> = profile
                .resolutions
                .iter()
                .map(|r| {
                    state.insert(
                        Some(handle),
                        Entity::Resolution {
                            dpi: r.dpi,
                            active: r.active,
                            default: r.default,
                        },
                    )
                })
                .collect();
            let buttons: Vec<HandleId> = profile
                .buttons
                .iter()
                .map(|b| {
                    state.insert(
                        Some(handle),
                        Entity::Button {
                            action: b.action.clone(),
                        },
                    )
                })
                .collect();

            if let Some(Entry {
                entity:
                    Entity::Profile {
                        resolutions: r,
                        buttons: b,
                        ..
                    },
                ..
            }) = state.entries.get_mut(&handle)
            {
                *r = resolutions;
                *b = buttons;
            }
            profiles.push(handle);
        }

        if let Some(Entry {
            entity: Entity::Device { profiles: p, .. },
            ..
        }) = state.entries.get_mut(&device)
        {
            *p = profiles;
        }

        state.devices.push(device);
        debug!("Added device '{}' as {}", fixture.name, device);
        device
    }

    /// Plugged-in devices, in plug order.
    pub fn devices(&self) -> Vec<HandleId> {
        self.lock().devices.clone()
    }

    pub fn device_by_name(&self, name: &str) -> Option<HandleId> {
        let state = self.lock();
        state.devices.iter().copied().find(|handle| {
            matches!(
                state.entries.get(handle).map(|e| &e.entity),
                Some(Entity::Device { name: n, .. }) if n == name
            )
        })
    }

    /// Unplug `device`: the library drops its own reference on the device
    /// and on everything below it. A device can be unplugged only once, even
    /// if other references keep its entry alive afterwards.
    pub fn remove_device(&self, device: HandleId) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.entry(device, EntityKind::Device)?;
        if !state.devices.contains(&device) {
            return Err(HardwareError::UnknownHandle(device));
        }
        state.devices.retain(|d| *d != device);

        let mut pending = vec![device];
        let mut owned = Vec::new();
        while let Some(handle) = pending.pop() {
            if let Some(entry) = state.entries.get(&handle) {
                pending.extend(entry.entity.children());
            }
            owned.push(handle);
        }
        for handle in owned {
            state.unref(handle);
        }
        Ok(())
    }

    /// Current reference count of `handle`; 0 once freed.
    pub fn refcount(&self, handle: HandleId) -> u32 {
        self.lock()
            .entries
            .get(&handle)
            .map(|e| e.refcount)
            .unwrap_or(0)
    }

    /// Make `profile` the default profile of its device.
    pub fn set_profile_default(&self, profile: HandleId) -> Result<(), HardwareError> {
        let mut state = self.lock();
        let siblings = match state.entry(profile, EntityKind::Profile)?.parent {
            Some(device) => state
                .entries
                .get(&device)
                .map(|e| e.entity.children())
                .unwrap_or_default(),
            None => vec![profile],
        };
        for sibling in siblings {
            if let Some(Entry {
                entity: Entity::Profile { default, .. },
                ..
            }) = state.entries.get_mut(&sibling)
            {
                *default = sibling == profile;
            }
        }
        Ok(())
    }
}

impl HardwareLibrary for MemoryLibrary {
    fn ref_handle(&self, handle: HandleId) -> Result<(), HardwareError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(&handle)
            .ok_or(HardwareError::UnknownHandle(handle))?;
        entry.refcount += 1;
        Ok(())
    }

    fn unref_handle(&self, handle: HandleId) {
        self.lock().unref(handle);
    }

    fn device_name(&self, device: HandleId) -> Result<String, HardwareError> {
        match &self.lock().entry(device, EntityKind::Device)?.entity {
            Entity::Device { name, .. } => Ok(name.clone()),
            _ => Err(HardwareError::WrongKind {
                handle: device,
                expected: EntityKind::Device,
            }),
        }
    }

    fn profiles(&self, device: HandleId) -> Result<Vec<HandleId>, HardwareError> {
        Ok(self
            .lock()
            .entry(device, EntityKind::Device)?
            .entity
            .children())
    }

    fn resolutions(&self, profile: HandleId) -> Result<Vec<HandleId>, HardwareError> {
        match &self.lock().entry(profile, EntityKind::Profile)?.entity {
            Entity::Profile { resolutions, .. } => Ok(resolutions.clone()),
            _ => Err(HardwareError::WrongKind {
                handle: profile,
                expected: EntityKind::Profile,
            }),
        }
    }

    fn buttons(&self, profile: HandleId) -> Result<Vec<HandleId>, HardwareError> {
        match &self.lock().entry(profile, EntityKind::Profile)?.entity {
            Entity::Profile { buttons, .. } => Ok(buttons.clone()),
            _ => Err(HardwareError::WrongKind {
                handle: profile,
                expected: EntityKind::Profile,
            }),
        }
    }

    fn profile_is_active(&self, profile: HandleId) -> Result<bool, HardwareError> {
        match &self.lock().entry(profile, EntityKind::Profile)?.entity {
            Entity::Profile { active, .. } => Ok(*active),
            _ => Err(HardwareError::WrongKind {
                handle: profile,
                expected: EntityKind::Profile,
            }),
        }
    }

    fn profile_is_default(&self, profile: HandleId) -> Result<bool, HardwareError> {
        match &self.lock().entry(profile, EntityKind::Profile)?.entity {
            Entity::Profile { default, .. } => Ok(*default),
            _ => Err(HardwareError::WrongKind {
                handle: profile,
                expected: EntityKind::Profile,
            }),
        }
    }

    fn set_profile_active(&self, profile: HandleId) -> Result<(), HardwareError> {
        self.lock().activate(profile, EntityKind::Profile)
    }

    fn resolution_is_active(&self, resolution: HandleId) -> Result<bool, HardwareError> {
        match &self.lock().entry(resolution, EntityKind::Resolution)?.entity {
            Entity::Resolution { active, .. } => Ok(*active),
            _ => Err(HardwareError::WrongKind {
                handle: resolution,
                expected: EntityKind::Resolution,
            }),
        }
    }

    fn resolution_is_default(&self, resolution: HandleId) -> Result<bool, HardwareError> {
        match &self.lock().entry(resolution, EntityKind::Resolution)?.entity {
            Entity::Resolution { default, .. } => Ok(*default),
            _ => Err(HardwareError::WrongKind {
                handle: resolution,
                expected: EntityKind::Resolution,
            }),
        }
    }

    fn resolution_dpi(&self, resolution: HandleId) -> Result<u32, HardwareError> {
        match &self.lock().entry(resolution, EntityKind::Resolution)?.entity {
            Entity::Resolution { dpi, .. } => Ok(*dpi),
            _ => Err(HardwareError::WrongKind {
                handle: resolution,
                expected: EntityKind::Resolution,
            }),
        }
    }

    fn set_resolution_active(&self, resolution: HandleId) -> Result<(), HardwareError> {
        self.lock().activate(resolution, EntityKind::Resolution)
    }

    fn button_action(&self, button: HandleId) -> Result<String, HardwareError> {
        match &self.lock().entry(button, EntityKind::Button)?.entity {
            Entity::Button { action } => Ok(action.clone()),
            _ => Err(HardwareError::WrongKind {
                handle: button,
                expected: EntityKind::Button,
            }),
        }
    }
}
