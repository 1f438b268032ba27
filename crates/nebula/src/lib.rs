#![warn(missing_docs)]

//! nebula: ray-intersection scenes and GPU compute behind integer handles.
//!
//! [`Nebula`] is the surface host bindings talk to. Scenes are addressed by
//! `u64` handles and programs by `u32` ids. Nothing here fails on a bad
//! handle: unknown scenes and programs are logged at `debug` and skipped,
//! and the call answers with a neutral value (a miss, zero-filled output).
//! The typed APIs underneath ([`SceneRegistry`], [`GpuChannel`]) report the
//! same cases as errors.
//!
//! # Example
//!
//! ```rust
//! use nebula::{Nebula, NebulaConfig, Ray};
//!
//! let nebula = Nebula::new(NebulaConfig::default());
//! let scene = nebula.create_scene().unwrap();
//! nebula.load_geometry(
//!     scene,
//!     r#"{"geometry":[{"meshParts":[{"vertices":[0,0,0, 1,0,0, 0,1,0],"indices":[0,1,2]}]}]}"#,
//! );
//!
//! let hit = nebula.trace_ray(scene, Ray::from_arrays([0.1, 0.1, -1.0], [0.0, 0.0, 1.0]));
//! assert!(hit.hit);
//! assert_eq!(hit.geom_id, 0);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

pub mod config;

pub use config::{ConfigError, NebulaConfig};
pub use nebula_gpu::{ComputeBackend, DispatchShape, GpuChannel, GpuConfig, GpuError, ProgramId, WgpuBackend};
pub use nebula_ir::{GeometryDocument, Mesh, MeshPart};
pub use nebula_kernel::{HitResult, LoadStats, SceneError, SceneHandle, SceneRegistry};
pub use nebula_raytrace::{BvhDevice, DeviceConfig, Ray, SceneFlags, INVALID_GEOMETRY_ID};

type BackendFactory<B> = Arc<dyn Fn() -> nebula_gpu::Result<B> + Send + Sync>;

/// Scene registry plus a lazily spawned GPU channel.
pub struct Nebula<B: ComputeBackend = WgpuBackend> {
    config: NebulaConfig,
    scenes: SceneRegistry<BvhDevice>,
    gpu: Mutex<Option<GpuChannel<B>>>,
    gpu_factory: BackendFactory<B>,
}

impl Nebula<WgpuBackend> {
    /// Create an instance whose GPU context is a wgpu device chosen by `config.gpu`.
    pub fn new(config: NebulaConfig) -> Self {
        let gpu_config = config.gpu;
        Self::with_compute_backend(config, move || WgpuBackend::new_blocking(&gpu_config))
    }
}

impl Default for Nebula<WgpuBackend> {
    fn default() -> Self {
        Self::new(NebulaConfig::default())
    }
}

impl<B: ComputeBackend> Nebula<B> {
    /// Create an instance with a custom compute backend.
    ///
    /// `factory` runs on the GPU worker thread each time the context is
    /// initialized.
    pub fn with_compute_backend(
        config: NebulaConfig,
        factory: impl Fn() -> nebula_gpu::Result<B> + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            scenes: SceneRegistry::new(config.accel),
            gpu: Mutex::new(None),
            gpu_factory: Arc::new(factory),
        }
    }

    /// The configuration this instance was created with.
    pub fn config(&self) -> &NebulaConfig {
        &self.config
    }

    /// The typed scene registry.
    pub fn registry(&self) -> &SceneRegistry<BvhDevice> {
        &self.scenes
    }

    fn scene_op<T>(
        &self,
        op: &'static str,
        handle: u64,
        fallback: impl FnOnce() -> T,
        f: impl FnOnce(SceneHandle) -> nebula_kernel::Result<T>,
    ) -> T {
        match f(SceneHandle::from_raw(handle)) {
            Ok(value) => value,
            Err(SceneError::NotFound(_)) => {
                debug!(op, handle, "unknown scene, skipped");
                fallback()
            }
            Err(err) => {
                error!(op, handle, %err, "scene operation failed");
                fallback()
            }
        }
    }

    // =========================================================================
    // Scenes
    // =========================================================================

    /// Create a scene and return its handle.
    ///
    /// Fails only if the accelerator cannot create a device, which leaves
    /// nothing to recover.
    pub fn create_scene(&self) -> Result<u64, SceneError> {
        self.scenes.create().map(SceneHandle::to_raw)
    }

    /// Release a scene. Unknown handles are ignored.
    pub fn dispose_scene(&self, handle: u64) {
        self.scene_op("dispose", handle, || (), |h| self.scenes.dispose(h))
    }

    /// Finalize a scene's geometry for querying. Unknown handles are ignored.
    pub fn commit_scene(&self, handle: u64) {
        self.scene_op("commit", handle, || (), |h| self.scenes.commit(h))
    }

    /// Recompute a scene's acceleration structure. Unknown handles are ignored.
    pub fn refit_scene(&self, handle: u64) {
        self.scene_op("refit", handle, || (), |h| self.scenes.refit(h))
    }

    /// Rebuild a scene's acceleration structure. Unknown handles are ignored.
    pub fn rebuild_scene(&self, handle: u64) {
        self.scene_op("rebuild", handle, || (), |h| self.scenes.rebuild(h))
    }

    /// Replace a scene's geometry with a JSON mesh document and commit it.
    ///
    /// Text that is not valid JSON is logged and read as an empty document.
    /// Unknown handles are ignored and report nothing loaded.
    pub fn load_geometry(&self, handle: u64, json: &str) -> LoadStats {
        let doc = match GeometryDocument::from_json(json) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(handle, %err, "geometry document is not valid JSON, loading nothing");
                GeometryDocument::default()
            }
        };
        self.load_document(handle, &doc)
    }

    /// Replace a scene's geometry with a parsed document and commit it.
    pub fn load_document(&self, handle: u64, doc: &GeometryDocument) -> LoadStats {
        self.scene_op("load", handle, LoadStats::default, |h| {
            self.scenes.load_geometry(h, doc)
        })
    }

    /// Closest hit of one ray. Unknown handles answer with a miss.
    pub fn trace_ray(&self, handle: u64, ray: Ray) -> HitResult {
        self.scene_op("trace_ray", handle, HitResult::miss, |h| {
            self.scenes.trace_ray(h, ray)
        })
    }

    /// Closest hits of a batch of rays, in input order.
    ///
    /// Unknown handles answer with one miss per ray.
    pub fn trace_rays(&self, handle: u64, rays: &[Ray]) -> Vec<HitResult> {
        self.scene_op(
            "trace_rays",
            handle,
            || vec![HitResult::miss(); rays.len()],
            |h| self.scenes.trace_rays(h, rays),
        )
    }

    /// Like [`trace_rays`](Self::trace_rays), delivering each result to `f`
    /// in index order.
    pub fn trace_rays_with(&self, handle: u64, rays: &[Ray], mut f: impl FnMut(usize, HitResult)) {
        for (index, result) in self.trace_rays(handle, rays).into_iter().enumerate() {
            f(index, result);
        }
    }

    // =========================================================================
    // GPU
    // =========================================================================

    /// Spawn the GPU worker if needed and create the context on it.
    ///
    /// Initializing twice is a no-op. A failure to create the context is
    /// returned; the worker stays up so init can be retried.
    pub fn init_gpu(&self) -> Result<(), GpuError> {
        let mut gpu = self.gpu.lock();
        if gpu.is_none() {
            let factory = Arc::clone(&self.gpu_factory);
            *gpu = Some(GpuChannel::spawn(move || (*factory)())?);
        }
        let Some(channel) = gpu.as_ref() else {
            return Err(GpuError::ChannelClosed);
        };
        match channel.init() {
            Ok(()) | Err(GpuError::AlreadyInitialized) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// True while a GPU worker is running.
    pub fn gpu_running(&self) -> bool {
        self.gpu.lock().is_some()
    }

    fn gpu_op<T>(
        &self,
        op: &'static str,
        fallback: impl FnOnce() -> T,
        f: impl FnOnce(&GpuChannel<B>) -> nebula_gpu::Result<T>,
    ) -> T {
        let gpu = self.gpu.lock();
        let Some(channel) = gpu.as_ref() else {
            warn!(op, "GPU not initialized, skipped");
            return fallback();
        };
        match f(channel) {
            Ok(value) => value,
            Err(err) => {
                warn!(op, %err, "GPU task failed");
                fallback()
            }
        }
    }

    /// Compile a compute program and return its id.
    ///
    /// A program that fails to compile still gets an id and yields
    /// zero-filled output. Returns 0, which is never a valid id, if the GPU
    /// is not initialized.
    pub fn compile_program(&self, source: &str) -> u32 {
        self.gpu_op("compile", || 0, |gpu| {
            gpu.compile(source).map(ProgramId::to_raw)
        })
    }

    /// Remove a program. Unknown ids are ignored.
    pub fn remove_program(&self, program: u32) {
        self.gpu_op("remove", || (), |gpu| {
            gpu.remove(ProgramId::from_raw(program)).map(|_| ())
        })
    }

    /// Select the program used by [`dispatch_current`](Self::dispatch_current).
    /// Unknown ids are ignored.
    pub fn set_current_program(&self, program: u32) {
        self.gpu_op("set_current", || (), |gpu| {
            gpu.set_current(ProgramId::from_raw(program)).map(|_| ())
        })
    }

    /// Run a program over `groups` workgroups and return exactly
    /// `output_size` bytes of its output buffer.
    pub fn dispatch(&self, program: u32, input: &[u8], groups: [u32; 3], output_size: usize) -> Vec<u8> {
        self.gpu_op("dispatch", || vec![0; output_size], |gpu| {
            gpu.dispatch(
                ProgramId::from_raw(program),
                input,
                DispatchShape::new(output_size, groups),
            )
        })
    }

    /// Run the current program; see [`dispatch`](Self::dispatch).
    pub fn dispatch_current(&self, input: &[u8], groups: [u32; 3], output_size: usize) -> Vec<u8> {
        self.gpu_op("dispatch_current", || vec![0; output_size], |gpu| {
            gpu.dispatch_current(input, DispatchShape::new(output_size, groups))
        })
    }

    /// Compile, run and discard a program in one task.
    pub fn run_program_source(
        &self,
        source: &str,
        input: &[u8],
        groups: [u32; 3],
        output_size: usize,
    ) -> Vec<u8> {
        self.gpu_op("run_source", || vec![0; output_size], |gpu| {
            gpu.run_source(source, input, DispatchShape::new(output_size, groups))
        })
    }

    /// Release every program and the context, and stop the worker.
    ///
    /// A later [`init_gpu`](Self::init_gpu) starts a fresh worker.
    pub fn shutdown_gpu(&self) {
        let channel = self.gpu.lock().take();
        if let Some(channel) = channel {
            if let Err(err) = channel.shutdown() {
                error!(%err, "GPU worker did not shut down cleanly");
            }
        }
    }
}
