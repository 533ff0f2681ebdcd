//! Ownership of one reference on a library handle.
//!
//! A [`HandleBinding`] takes its own reference when it is created; whatever
//! reference the caller holds stays the caller's. The binding's reference is
//! dropped exactly once, by the first of [`HandleBinding::release`] or `Drop`.

use crate::error::CoreError;
use crate::hardware::{EntityKind, HandleId, HardwareError, HardwareLibrary};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub struct HandleBinding {
    library: Arc<dyn HardwareLibrary>,
    kind: EntityKind,
    /// `None` once released.
    handle: Mutex<Option<HandleId>>,
    index: u32,
}

impl HandleBinding {
    /// Reference `handle` and bind it at sibling position `index`.
    pub fn new(
        library: Arc<dyn HardwareLibrary>,
        kind: EntityKind,
        handle: HandleId,
        index: u32,
    ) -> Result<Self, HardwareError> {
        library.ref_handle(handle)?;
        debug!("Bound {} handle {} at index {}", kind, handle, index);

        Ok(Self {
            library,
            kind,
            handle: Mutex::new(Some(handle)),
            index,
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<HandleId>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// The bound handle, or `None` once released.
    pub fn handle(&self) -> Option<HandleId> {
        *self.slot()
    }

    pub fn is_released(&self) -> bool {
        self.slot().is_none()
    }

    pub fn library(&self) -> &Arc<dyn HardwareLibrary> {
        &self.library
    }

    /// Drop the binding's reference. Returns `false` if it was already gone.
    pub fn release(&self) -> bool {
        let Some(handle) = self.slot().take() else {
            return false;
        };
        self.library.unref_handle(handle);
        debug!("Released {} handle {}", self.kind, handle);
        true
    }

    /// Run `query` against the live handle.
    ///
    /// The handle stays locked for the duration of the query, so a concurrent
    /// release can never free it mid-read.
    pub fn query<T>(
        &self,
        query: impl FnOnce(&dyn HardwareLibrary, HandleId) -> Result<T, HardwareError>,
    ) -> Result<T, CoreError> {
        let slot = self.slot();
        let handle = (*slot).ok_or(CoreError::Gone)?;
        Ok(query(self.library.as_ref(), handle)?)
    }

    pub fn is_active(&self) -> Result<bool, CoreError> {
        match self.kind {
            EntityKind::Profile => self.query(|lib, h| lib.profile_is_active(h)),
            EntityKind::Resolution => self.query(|lib, h| lib.resolution_is_active(h)),
            kind => Err(CoreError::Unsupported {
                property: "IsActive",
                kind,
            }),
        }
    }

    pub fn is_default(&self) -> Result<bool, CoreError> {
        match self.kind {
            EntityKind::Profile => self.query(|lib, h| lib.profile_is_default(h)),
            EntityKind::Resolution => self.query(|lib, h| lib.resolution_is_default(h)),
            kind => Err(CoreError::Unsupported {
                property: "IsDefault",
                kind,
            }),
        }
    }
}

impl Drop for HandleBinding {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for HandleBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleBinding")
            .field("kind", &self.kind)
            .field("handle", &self.handle())
            .field("index", &self.index)
            .finish()
    }
}
