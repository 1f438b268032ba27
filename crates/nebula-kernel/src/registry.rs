//! The scene registry: a table of live scene instances behind one lock.
//!
//! One exclusive lock guards the whole table. It serializes structural
//! changes (create, dispose, load, commit) and every query against every
//! scene, so two queries against unrelated scenes never run at the same
//! time. Backends are free to keep thread-affine state per device.

use parking_lot::Mutex;
use slotmap::{Key, KeyData, SlotMap};
use tracing::debug;

use nebula_raytrace::{Accelerator, AcceleratorScene, BvhDevice, DeviceConfig};

use crate::error::{Result, SceneError};

slotmap::new_key_type! {
    /// Generation-checked handle to a scene.
    ///
    /// A handle stays valid until its scene is disposed; afterwards it never
    /// resolves again, even if the slot is reused by a later scene.
    pub struct SceneHandle;
}

impl SceneHandle {
    /// Encode as a plain integer for host bindings.
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    /// Decode a handle produced by [`to_raw`](Self::to_raw).
    ///
    /// Any integer decodes; values never issued do not resolve. Issued
    /// handles always carry an odd version in the high half, and
    /// `KeyData::from_ffi` would force an even one odd and alias a live
    /// key, so those decode to the null handle.
    pub fn from_raw(raw: u64) -> Self {
        if (raw >> 32) & 1 == 0 {
            return Self::null();
        }
        KeyData::from_ffi(raw).into()
    }
}

/// One device and its current scene.
///
/// Device and scene are created together and dropped together; the scene
/// can be replaced on its own.
pub struct SceneInstance<A: Accelerator> {
    device: A,
    scene: A::Scene,
}

impl<A: Accelerator> SceneInstance<A> {
    fn new(config: &DeviceConfig) -> Result<Self> {
        let device = A::new_device(config)?;
        let scene = device.new_scene();
        Ok(Self { device, scene })
    }

    /// The device owning the scene.
    pub fn device(&self) -> &A {
        &self.device
    }

    /// The current scene.
    pub fn scene(&self) -> &A::Scene {
        &self.scene
    }

    /// The current scene, mutably.
    pub fn scene_mut(&mut self) -> &mut A::Scene {
        &mut self.scene
    }

    /// Drop the current scene and bind a fresh empty one to the same device.
    ///
    /// The new scene keeps the old scene's flags.
    pub fn replace_scene(&mut self) -> &mut A::Scene {
        let flags = self.scene.flags();
        self.scene = self.device.new_scene();
        self.scene.set_flags(flags);
        &mut self.scene
    }
}

/// Table of scene instances keyed by [`SceneHandle`].
pub struct SceneRegistry<A: Accelerator = BvhDevice> {
    config: DeviceConfig,
    table: Mutex<SlotMap<SceneHandle, SceneInstance<A>>>,
}

impl Default for SceneRegistry<BvhDevice> {
    fn default() -> Self {
        Self::new(DeviceConfig::default())
    }
}

impl<A: Accelerator> SceneRegistry<A> {
    /// Create an empty registry; every new device is created with `config`.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            table: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Device settings used for new scenes.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Create a device/scene pair and return its handle.
    ///
    /// Fails only if the backend cannot create a device, which leaves the
    /// registry unchanged.
    pub fn create(&self) -> Result<SceneHandle> {
        let mut table = self.table.lock();
        let instance = SceneInstance::new(&self.config)?;
        let handle = table.insert(instance);
        debug!(handle = ?handle, live = table.len(), "scene created");
        Ok(handle)
    }

    /// Release a scene and its device.
    pub fn dispose(&self, handle: SceneHandle) -> Result<()> {
        let mut table = self.table.lock();
        table
            .remove(handle)
            .ok_or(SceneError::NotFound(handle))?;
        debug!(handle = ?handle, live = table.len(), "scene disposed");
        Ok(())
    }

    /// Finalize the scene's current content for querying.
    ///
    /// Idempotent: committing unchanged content rebuilds an identical structure.
    pub fn commit(&self, handle: SceneHandle) -> Result<()> {
        self.with_instance_mut(handle, |instance| instance.scene_mut().commit())
    }

    /// Recompute the acceleration structure.
    ///
    /// The accelerator has no incremental refit, so this is a full rebuild.
    pub fn refit(&self, handle: SceneHandle) -> Result<()> {
        self.commit(handle)
    }

    /// Recompute the acceleration structure from scratch.
    pub fn rebuild(&self, handle: SceneHandle) -> Result<()> {
        self.commit(handle)
    }

    /// True if `handle` names a live scene.
    pub fn contains(&self, handle: SceneHandle) -> bool {
        self.table.lock().contains_key(handle)
    }

    /// Number of live scenes.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// True if no scene is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on a scene instance with the registry lock held.
    pub fn with_instance<R>(
        &self,
        handle: SceneHandle,
        f: impl FnOnce(&SceneInstance<A>) -> R,
    ) -> Result<R> {
        let table = self.table.lock();
        let instance = table.get(handle).ok_or(SceneError::NotFound(handle))?;
        Ok(f(instance))
    }

    /// Run `f` on a scene instance mutably with the registry lock held.
    ///
    /// The lock brackets the whole call, so queries see the scene either
    /// before or after `f`, never in between.
    pub fn with_instance_mut<R>(
        &self,
        handle: SceneHandle,
        f: impl FnOnce(&mut SceneInstance<A>) -> R,
    ) -> Result<R> {
        let mut table = self.table.lock();
        let instance = table
            .get_mut(handle)
            .ok_or(SceneError::NotFound(handle))?;
        Ok(f(instance))
    }
}
