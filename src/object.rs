//! One bus-visible node of the device tree.
//!
//! A [`BusObject`] pairs an immutable object path with the [`HandleBinding`]
//! of the entity it mirrors. Every property is read from the library on each
//! call. Parents are referenced by path only, so a child never keeps its
//! parent alive.

use crate::binding::HandleBinding;
use crate::error::CoreError;
use crate::hardware::{EntityKind, HandleId, HardwareLibrary};
use crate::path;
use std::sync::Arc;
use tracing::debug;
use zbus::zvariant::OwnedObjectPath;

/// A child recorded by its parent for navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub kind: EntityKind,
    pub path: OwnedObjectPath,
}

#[derive(Debug)]
pub struct BusObject {
    path: OwnedObjectPath,
    root: Arc<str>,
    /// Identifier chain below the kind element, e.g. `["mouse0", "1"]`.
    segments: Vec<String>,
    parent: Option<OwnedObjectPath>,
    children: Vec<ChildRef>,
    binding: HandleBinding,
}

impl BusObject {
    /// Build the object for a device handle at `<root>/device/<name>`.
    pub fn construct_device(
        library: Arc<dyn HardwareLibrary>,
        root: &str,
        handle: HandleId,
    ) -> Result<Self, CoreError> {
        let name = library.device_name(handle)?;
        Self::construct(library, root.into(), EntityKind::Device, None, vec![name], handle, 0)
    }

    /// Build the object for the `index`-th `kind` child of `parent`.
    pub fn construct_child(
        parent: &BusObject,
        kind: EntityKind,
        handle: HandleId,
        index: u32,
    ) -> Result<Self, CoreError> {
        let mut segments = parent.segments.clone();
        segments.push(index.to_string());
        Self::construct(
            parent.binding.library().clone(),
            parent.root.clone(),
            kind,
            Some(parent.path.clone()),
            segments,
            handle,
            index,
        )
    }

    fn construct(
        library: Arc<dyn HardwareLibrary>,
        root: Arc<str>,
        kind: EntityKind,
        parent: Option<OwnedObjectPath>,
        segments: Vec<String>,
        handle: HandleId,
        index: u32,
    ) -> Result<Self, CoreError> {
        let binding = HandleBinding::new(library, kind, handle, index)?;
        // On failure `binding` is dropped here, which returns its reference.
        let path = path::encode(&format!("{}/{}", root, kind.segment()), &segments)?;
        debug!("Constructed {} object {}", kind, path.as_str());

        Ok(Self {
            path,
            root,
            segments,
            parent,
            children: Vec::new(),
            binding,
        })
    }

    /// Record `child` as belonging to this object.
    pub(crate) fn adopt(&mut self, child: &BusObject) {
        self.children.push(ChildRef {
            kind: child.kind(),
            path: child.path.clone(),
        });
    }

    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    pub fn kind(&self) -> EntityKind {
        self.binding.kind()
    }

    pub fn index(&self) -> u32 {
        self.binding.index()
    }

    pub fn parent(&self) -> Option<&OwnedObjectPath> {
        self.parent.as_ref()
    }

    /// Paths of the children of the given kind, in construction order.
    pub fn children(&self, kind: EntityKind) -> Vec<OwnedObjectPath> {
        self.children
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.path.clone())
            .collect()
    }

    pub fn handle(&self) -> Option<HandleId> {
        self.binding.handle()
    }

    pub fn is_live(&self) -> bool {
        !self.binding.is_released()
    }

    pub fn is_active(&self) -> Result<bool, CoreError> {
        self.binding.is_active()
    }

    pub fn is_default(&self) -> Result<bool, CoreError> {
        self.binding.is_default()
    }

    pub fn name(&self) -> Result<String, CoreError> {
        self.expect_kind(EntityKind::Device, "Name")?;
        self.binding.query(|lib, h| lib.device_name(h))
    }

    pub fn dpi(&self) -> Result<u32, CoreError> {
        self.expect_kind(EntityKind::Resolution, "Resolution")?;
        self.binding.query(|lib, h| lib.resolution_dpi(h))
    }

    pub fn action(&self) -> Result<String, CoreError> {
        self.expect_kind(EntityKind::Button, "ActionType")?;
        self.binding.query(|lib, h| lib.button_action(h))
    }

    /// Ask the library to make this profile or resolution the active one.
    pub fn set_active(&self) -> Result<(), CoreError> {
        match self.kind() {
            EntityKind::Profile => self.binding.query(|lib, h| lib.set_profile_active(h)),
            EntityKind::Resolution => self.binding.query(|lib, h| lib.set_resolution_active(h)),
            kind => Err(CoreError::Unsupported {
                property: "SetActive",
                kind,
            }),
        }
    }

    /// Drop the library reference. Safe to call more than once; the path is
    /// kept so late log lines can still name the object.
    pub fn teardown(&self) -> bool {
        let released = self.binding.release();
        if released {
            debug!("Tore down {} object {}", self.kind(), self.path.as_str());
        }
        released
    }

    fn expect_kind(&self, kind: EntityKind, property: &'static str) -> Result<(), CoreError> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(CoreError::Unsupported {
                property,
                kind: self.kind(),
            })
        }
    }
}
