//! The set of live bus objects, keyed by path.
//!
//! [`ObjectTree`] is the only place objects are created or destroyed. A
//! device is attached all-or-nothing: the device object, its profiles and
//! each profile's resolutions and buttons are built parent-first, then
//! registered with the bus. Detaching walks the same order backwards so
//! children always go before their parent.
//!
//! The tree is owned by the daemon's dispatch loop and mutated only from
//! there, one event at a time; it needs no internal locking.

use crate::bus::BusRegistrar;
use crate::error::CoreError;
use crate::hardware::{EntityKind, HandleId, HardwareLibrary};
use crate::object::BusObject;
use crate::path;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use zbus::zvariant::OwnedObjectPath;

pub struct ObjectTree {
    library: Arc<dyn HardwareLibrary>,
    root: String,
    objects: HashMap<String, Arc<BusObject>>,
    /// One entry per attached device: its object paths in construction
    /// order, device first.
    devices: Vec<Vec<String>>,
}

impl ObjectTree {
    pub fn new(library: Arc<dyn HardwareLibrary>, root: &str) -> Result<Self, CoreError> {
        path::validate_root(root)?;
        Ok(Self {
            library,
            root: root.to_string(),
            objects: HashMap::new(),
            devices: Vec::new(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Path the device called `name` has, or would have, in this tree.
    pub fn device_path(&self, name: &str) -> Result<OwnedObjectPath, CoreError> {
        Ok(path::encode(
            &format!("{}/{}", self.root, EntityKind::Device.segment()),
            &[name],
        )?)
    }

    /// Build and register every object for `device`.
    ///
    /// Objects are built parent-first and registered leaves-first. On any
    /// failure everything built so far is unregistered and torn down
    /// and the tree is left as it was.
    pub async fn attach_device(
        &mut self,
        device: HandleId,
        registrar: &dyn BusRegistrar,
    ) -> Result<Vec<Arc<BusObject>>, CoreError> {
        let built = self.build(device)?;

        if let Some(taken) = built
            .iter()
            .find(|o| self.objects.contains_key(o.path().as_str()))
        {
            let path = taken.path().to_string();
            teardown_in_reverse(built.iter());
            return Err(CoreError::DuplicatePath(path));
        }

        // Leaves go first and the device last, so no registered object ever
        // lists a child that is not registered yet.
        let objects: Vec<Arc<BusObject>> = built.into_iter().map(Arc::new).collect();
        for (registered, object) in objects.iter().rev().enumerate() {
            if let Err(e) = registrar.register(object.clone()).await {
                warn!(
                    "Registering {} failed, rolling back device attach: {}",
                    object.path().as_str(),
                    e
                );
                // Undo in the opposite order: parents before their children.
                for done in &objects[objects.len() - registered..] {
                    if let Err(e) = registrar.unregister(done).await {
                        warn!("Rollback of {} failed: {}", done.path().as_str(), e);
                    }
                }
                teardown_in_reverse(objects.iter().map(|o| &**o));
                return Err(CoreError::Registration(e.to_string()));
            }
        }

        let order: Vec<String> = objects.iter().map(|o| o.path().to_string()).collect();
        for object in &objects {
            self.objects.insert(object.path().to_string(), object.clone());
        }
        info!(
            "Attached device {} ({} objects)",
            order.first().map(String::as_str).unwrap_or_default(),
            order.len()
        );
        self.devices.push(order);

        Ok(objects)
    }

    /// Construct the objects for `device` without touching the tree.
    fn build(&self, device: HandleId) -> Result<Vec<BusObject>, CoreError> {
        let mut built = Vec::new();
        match self.build_into(&mut built, device) {
            Ok(()) => Ok(built),
            Err(e) => {
                teardown_in_reverse(built.iter());
                Err(e)
            }
        }
    }

    fn build_into(&self, built: &mut Vec<BusObject>, device: HandleId) -> Result<(), CoreError> {
        built.push(BusObject::construct_device(
            self.library.clone(),
            &self.root,
            device,
        )?);

        let profiles = self.library.profiles(device)?;
        for (index, profile) in (0u32..).zip(profiles) {
            let object = BusObject::construct_child(&built[0], EntityKind::Profile, profile, index)?;
            built[0].adopt(&object);
            let at = built.len();
            built.push(object);

            let children = self
                .library
                .resolutions(profile)?
                .into_iter()
                .map(|h| (EntityKind::Resolution, h))
                .zip(0u32..)
                .chain(
                    self.library
                        .buttons(profile)?
                        .into_iter()
                        .map(|h| (EntityKind::Button, h))
                        .zip(0u32..),
                );
            for ((kind, handle), index) in children {
                let child = BusObject::construct_child(&built[at], kind, handle, index)?;
                built[at].adopt(&child);
                built.push(child);
            }
        }
        Ok(())
    }

    /// Unregister and tear down every object of the device at `device_path`,
    /// deepest first. Returns the number of objects removed.
    pub async fn detach_device(
        &mut self,
        device_path: &str,
        registrar: &dyn BusRegistrar,
    ) -> Result<usize, CoreError> {
        let position = self
            .devices
            .iter()
            .position(|order| order.first().map(String::as_str) == Some(device_path))
            .ok_or_else(|| CoreError::NotFound(device_path.to_string()))?;
        let order = self.devices.remove(position);

        for path in order.iter().rev() {
            let Some(object) = self.objects.get(path).cloned() else {
                continue;
            };
            if let Err(e) = registrar.unregister(&object).await {
                // The object leaves the tree regardless; a registration left
                // behind answers every read with UnknownObject.
                error!("Unregistering {} failed: {}", path, e);
            }
            self.objects.remove(path);
            object.teardown();
        }

        info!("Detached device {} ({} objects)", device_path, order.len());
        Ok(order.len())
    }

    /// Detach every device, most recently attached first.
    pub async fn detach_all(&mut self, registrar: &dyn BusRegistrar) -> usize {
        let mut removed = 0;
        while let Some(device) = self.devices.last().and_then(|o| o.first()).cloned() {
            match self.detach_device(&device, registrar).await {
                Ok(count) => removed += count,
                Err(e) => {
                    // Cannot happen for a path taken from the list itself.
                    warn!("Detaching {} failed: {}", device, e);
                    self.devices.pop();
                }
            }
        }
        debug!("Object tree cleared ({} objects)", removed);
        removed
    }

    pub fn lookup(&self, path: &str) -> Result<Arc<BusObject>, CoreError> {
        self.objects
            .get(path)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(path.to_string()))
    }

    /// Attached device paths, in attach order.
    pub fn device_paths(&self) -> Vec<OwnedObjectPath> {
        self.devices
            .iter()
            .filter_map(|order| order.first())
            .filter_map(|path| self.objects.get(path))
            .map(|object| object.path().clone())
            .collect()
    }

    /// Every object path, device by device in construction order.
    pub fn paths(&self) -> Vec<OwnedObjectPath> {
        self.devices
            .iter()
            .flatten()
            .filter_map(|path| self.objects.get(path))
            .map(|object| object.path().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn teardown_in_reverse<'a>(objects: impl DoubleEndedIterator<Item = &'a BusObject>) {
    for object in objects.rev() {
        object.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{NullRegistrar, RegistrarError};
    use crate::hardware::{
        ButtonFixture, DeviceFixture, MemoryLibrary, ProfileFixture, ResolutionFixture,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Register(String),
        Unregister(String),
    }

    /// Records calls; fails to register `fail_on` if set, and fails every
    /// unregistration if `fail_unregister` is set.
    #[derive(Default)]
    struct RecordingRegistrar {
        events: Mutex<Vec<Event>>,
        fail_on: Option<String>,
        fail_unregister: bool,
    }

    impl RecordingRegistrar {
        fn failing_on(path: &str) -> Self {
            Self {
                fail_on: Some(path.to_string()),
                ..Default::default()
            }
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BusRegistrar for RecordingRegistrar {
        async fn register(&self, object: Arc<BusObject>) -> Result<(), RegistrarError> {
            let path = object.path().to_string();
            if self.fail_on.as_deref() == Some(path.as_str()) {
                return Err(RegistrarError::AlreadyRegistered(path));
            }
            self.events.lock().unwrap().push(Event::Register(path));
            Ok(())
        }

        async fn unregister(&self, object: &BusObject) -> Result<(), RegistrarError> {
            let path = object.path().to_string();
            if self.fail_unregister {
                return Err(RegistrarError::NotRegistered(path));
            }
            self.events.lock().unwrap().push(Event::Unregister(path));
            Ok(())
        }
    }

    /// After every registration, records each registered object that lists
    /// a child which is not registered.
    #[derive(Default)]
    struct VisibilityRegistrar {
        visible: Mutex<HashMap<String, Arc<BusObject>>>,
        dangling: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BusRegistrar for VisibilityRegistrar {
        async fn register(&self, object: Arc<BusObject>) -> Result<(), RegistrarError> {
            let mut visible = self.visible.lock().unwrap();
            visible.insert(object.path().to_string(), object);

            let kinds = [EntityKind::Profile, EntityKind::Resolution, EntityKind::Button];
            for (path, object) in visible.iter() {
                for child in kinds.iter().flat_map(|kind| object.children(*kind)) {
                    if !visible.contains_key(child.as_str()) {
                        self.dangling
                            .lock()
                            .unwrap()
                            .push(format!("{} -> {}", path, child.as_str()));
                    }
                }
            }
            Ok(())
        }

        async fn unregister(&self, object: &BusObject) -> Result<(), RegistrarError> {
            self.visible.lock().unwrap().remove(object.path().as_str());
            Ok(())
        }
    }

    fn mouse(name: &str) -> DeviceFixture {
        DeviceFixture {
            name: name.to_string(),
            profiles: vec![
                ProfileFixture {
                    active: true,
                    default: true,
                    resolutions: vec![
                        ResolutionFixture {
                            dpi: 800,
                            active: true,
                            default: true,
                        },
                        ResolutionFixture {
                            dpi: 1600,
                            ..Default::default()
                        },
                    ],
                    buttons: vec![ButtonFixture::default(), ButtonFixture::default()],
                },
                ProfileFixture::default(),
            ],
        }
    }

    fn setup(name: &str) -> (Arc<MemoryLibrary>, HandleId, ObjectTree) {
        let library = Arc::new(MemoryLibrary::new());
        let device = library.add_device(&mouse(name));
        let tree = ObjectTree::new(library.clone(), "/root").unwrap();
        (library, device, tree)
    }

    /// All handles of the device in the library, device first.
    fn all_handles(library: &MemoryLibrary, device: HandleId) -> Vec<HandleId> {
        let mut handles = vec![device];
        for profile in library.profiles(device).unwrap() {
            handles.push(profile);
            handles.extend(library.resolutions(profile).unwrap());
            handles.extend(library.buttons(profile).unwrap());
        }
        handles
    }

    #[tokio::test]
    async fn test_attach_builds_parent_first() {
        let (_library, device, mut tree) = setup("mouse0");
        let registrar = RecordingRegistrar::default();

        let objects = tree.attach_device(device, &registrar).await.unwrap();
        let paths: Vec<&str> = objects.iter().map(|o| o.path().as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/root/device/mouse0",
                "/root/profile/mouse0/0",
                "/root/resolution/mouse0/0/0",
                "/root/resolution/mouse0/0/1",
                "/root/button/mouse0/0/0",
                "/root/button/mouse0/0/1",
                "/root/profile/mouse0/1",
            ]
        );
        assert_eq!(tree.len(), 7);

        // Registered leaves-first, device last.
        let registered: Vec<Event> = paths
            .iter()
            .rev()
            .map(|p| Event::Register(p.to_string()))
            .collect();
        assert_eq!(registrar.events(), registered);
    }

    #[tokio::test]
    async fn test_registered_objects_never_list_unregistered_children() {
        let (library, first, mut tree) = setup("mouse0");
        let second = library.add_device(&mouse("mouse1"));
        let registrar = VisibilityRegistrar::default();

        tree.attach_device(first, &registrar).await.unwrap();
        tree.attach_device(second, &registrar).await.unwrap();

        assert_eq!(registrar.visible.lock().unwrap().len(), 14);
        assert!(
            registrar.dangling.lock().unwrap().is_empty(),
            "dangling children: {:?}",
            registrar.dangling.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn test_children_are_recorded() {
        let (_library, device, mut tree) = setup("mouse0");
        tree.attach_device(device, &NullRegistrar).await.unwrap();

        let dev = tree.lookup("/root/device/mouse0").unwrap();
        let profiles: Vec<String> = dev
            .children(EntityKind::Profile)
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(
            profiles,
            vec!["/root/profile/mouse0/0", "/root/profile/mouse0/1"]
        );

        let profile = tree.lookup("/root/profile/mouse0/0").unwrap();
        assert_eq!(profile.children(EntityKind::Resolution).len(), 2);
        assert_eq!(profile.children(EntityKind::Button).len(), 2);
        assert_eq!(
            profile.parent().map(|p| p.as_str()),
            Some("/root/device/mouse0")
        );
    }

    #[tokio::test]
    async fn test_lookup_unknown_profile() {
        let (_library, device, mut tree) = setup("mouse0");
        tree.attach_device(device, &NullRegistrar).await.unwrap();

        assert!(tree.lookup("/root/profile/mouse0/1").is_ok());
        assert_eq!(
            tree.lookup("/root/profile/mouse0/5").unwrap_err(),
            CoreError::NotFound("/root/profile/mouse0/5".to_string())
        );
    }

    #[tokio::test]
    async fn test_profile_reads_are_live() {
        let (library, device, mut tree) = setup("mouse0");
        tree.attach_device(device, &NullRegistrar).await.unwrap();
        let profiles = library.profiles(device).unwrap();

        let p0 = tree.lookup("/root/profile/mouse0/0").unwrap();
        assert!(p0.is_default().unwrap());

        library.set_profile_default(profiles[1]).unwrap();
        assert!(!p0.is_default().unwrap());
        let p1 = tree.lookup("/root/profile/mouse0/1").unwrap();
        assert!(p1.is_default().unwrap());
    }

    #[tokio::test]
    async fn test_attach_takes_one_reference_per_object() {
        let (library, device, mut tree) = setup("mouse0");
        let handles = all_handles(&library, device);

        tree.attach_device(device, &NullRegistrar).await.unwrap();
        for handle in &handles {
            assert_eq!(library.refcount(*handle), 2, "handle {}", handle);
        }

        tree.detach_device("/root/device/mouse0", &NullRegistrar)
            .await
            .unwrap();
        for handle in &handles {
            assert_eq!(library.refcount(*handle), 1, "handle {}", handle);
        }
    }

    #[tokio::test]
    async fn test_detach_removes_children_first() {
        let (_library, device, mut tree) = setup("mouse0");
        let registrar = RecordingRegistrar::default();
        let objects = tree.attach_device(device, &registrar).await.unwrap();

        let removed = tree
            .detach_device("/root/device/mouse0", &registrar)
            .await
            .unwrap();
        assert_eq!(removed, 7);
        assert!(tree.is_empty());
        assert!(objects.iter().all(|o| !o.is_live()));

        let unregistered: Vec<String> = registrar
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Unregister(p) => Some(p),
                Event::Register(_) => None,
            })
            .collect();
        assert_eq!(unregistered.last().unwrap(), "/root/device/mouse0");
        assert_eq!(unregistered.first().unwrap(), "/root/profile/mouse0/1");
        let device_at = unregistered.len() - 1;
        let profile0_at = unregistered
            .iter()
            .position(|p| p == "/root/profile/mouse0/0")
            .unwrap();
        let res0_at = unregistered
            .iter()
            .position(|p| p == "/root/resolution/mouse0/0/0")
            .unwrap();
        assert!(res0_at < profile0_at && profile0_at < device_at);
    }

    #[tokio::test]
    async fn test_detach_unknown_device() {
        let (_library, _device, mut tree) = setup("mouse0");
        assert_eq!(
            tree.detach_device("/root/device/nope", &NullRegistrar)
                .await
                .unwrap_err(),
            CoreError::NotFound("/root/device/nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_registration_rolls_back() {
        let (library, device, mut tree) = setup("mouse0");
        let handles = all_handles(&library, device);
        let registrar = RecordingRegistrar::failing_on("/root/profile/mouse0/0");

        let err = tree.attach_device(device, &registrar).await.unwrap_err();
        assert!(matches!(err, CoreError::Registration(_)));
        assert!(tree.is_empty());
        assert!(tree.device_paths().is_empty());
        for handle in &handles {
            assert_eq!(library.refcount(*handle), 1, "handle {}", handle);
        }

        // Every registration that happened was undone, in reverse.
        let events = registrar.events();
        let registered: Vec<&Event> = events
            .iter()
            .filter(|e| matches!(e, Event::Register(_)))
            .collect();
        let unregistered: Vec<&Event> = events
            .iter()
            .filter(|e| matches!(e, Event::Unregister(_)))
            .collect();
        assert_eq!(registered.len(), 5);
        assert_eq!(unregistered.len(), 5);
        assert!(!events.contains(&Event::Register("/root/device/mouse0".to_string())));

        let registered_paths: Vec<String> = registered
            .iter()
            .filter_map(|e| match e {
                Event::Register(p) => Some(p.clone()),
                Event::Unregister(_) => None,
            })
            .collect();
        let mut unregistered_paths: Vec<String> = unregistered
            .iter()
            .filter_map(|e| match e {
                Event::Unregister(p) => Some(p.clone()),
                Event::Register(_) => None,
            })
            .collect();
        unregistered_paths.reverse();
        assert_eq!(unregistered_paths, registered_paths);
    }

    #[tokio::test]
    async fn test_failed_unregister_still_detaches() {
        let (library, device, mut tree) = setup("mouse0");
        let handles = all_handles(&library, device);
        let registrar = RecordingRegistrar {
            fail_unregister: true,
            ..Default::default()
        };
        let objects = tree.attach_device(device, &registrar).await.unwrap();

        let removed = tree
            .detach_device("/root/device/mouse0", &registrar)
            .await
            .unwrap();
        assert_eq!(removed, 7);
        assert!(tree.is_empty());
        for handle in &handles {
            assert_eq!(library.refcount(*handle), 1, "handle {}", handle);
        }

        // A registration left behind can only answer with Gone.
        let profile = &objects[1];
        assert_eq!(profile.is_active(), Err(CoreError::Gone));
        let err: zbus::fdo::Error = profile.is_default().unwrap_err().into();
        assert!(matches!(err, zbus::fdo::Error::UnknownObject(_)));
    }

    #[tokio::test]
    async fn test_failed_child_construction_rolls_back() {
        let (library, device, mut tree) = setup("mouse0");
        let handles = all_handles(&library, device);

        // The second profile is freed behind the tree's back, so building
        // its object fails after the first profile's subtree was built.
        let doomed = library.profiles(device).unwrap()[1];
        library.unref_handle(doomed);

        let err = tree
            .attach_device(device, &NullRegistrar)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::HandleInvalid(_)));
        assert!(tree.is_empty());
        for handle in handles.iter().filter(|h| **h != doomed) {
            assert_eq!(library.refcount(*handle), 1, "handle {}", handle);
        }
    }

    #[tokio::test]
    async fn test_unencodable_device_name() {
        let (library, device, mut tree) = setup("bad\0name");
        let err = tree
            .attach_device(device, &NullRegistrar)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PathEncoding(_)));
        assert_eq!(library.refcount(device), 1);
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_device_is_rejected() {
        let (library, first, mut tree) = setup("mouse0");
        let second = library.add_device(&mouse("mouse0"));

        tree.attach_device(first, &NullRegistrar).await.unwrap();
        let err = tree
            .attach_device(second, &NullRegistrar)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::DuplicatePath("/root/device/mouse0".to_string())
        );
        assert_eq!(tree.len(), 7);
        for handle in all_handles(&library, second) {
            assert_eq!(library.refcount(handle), 1);
        }
    }

    #[tokio::test]
    async fn test_detach_all_clears_every_device() {
        let (library, first, mut tree) = setup("mouse0");
        let second = library.add_device(&mouse("mouse1"));
        tree.attach_device(first, &NullRegistrar).await.unwrap();
        tree.attach_device(second, &NullRegistrar).await.unwrap();

        let device_paths: Vec<String> =
            tree.device_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(
            device_paths,
            vec!["/root/device/mouse0", "/root/device/mouse1"]
        );
        assert_eq!(tree.paths().len(), 14);

        assert_eq!(tree.detach_all(&NullRegistrar).await, 14);
        assert!(tree.is_empty());
        assert_eq!(library.refcount(first), 1);
        assert_eq!(library.refcount(second), 1);
    }

    #[tokio::test]
    async fn test_objects_outlive_library_unplug() {
        let (library, device, mut tree) = setup("mouse0");
        tree.attach_device(device, &NullRegistrar).await.unwrap();

        library.remove_device(device).unwrap();
        let p0 = tree.lookup("/root/profile/mouse0/0").unwrap();
        assert!(p0.is_active().unwrap());

        tree.detach_device("/root/device/mouse0", &NullRegistrar)
            .await
            .unwrap();
        assert_eq!(library.refcount(device), 0);
        assert_eq!(p0.is_active(), Err(CoreError::Gone));
    }

    #[test]
    fn test_invalid_root() {
        let library = Arc::new(MemoryLibrary::new());
        assert!(ObjectTree::new(library, "not/a/path").is_err());
    }

    #[test]
    fn test_device_path_escapes_name() {
        let library = Arc::new(MemoryLibrary::new());
        let tree = ObjectTree::new(library, "/root").unwrap();
        assert_eq!(
            tree.device_path("G Pro/2").unwrap().as_str(),
            "/root/device/G_20Pro_2f2"
        );
    }
}
