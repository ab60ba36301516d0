//! Runtime Root
//!
//! The one singleton-like object: owns the device, the resource pool, the
//! world, and the render world, and drives the per-frame sequence. Tests
//! construct private instances over the null backend; the host binary backs
//! it with Vulkan.
//!
//! # Frame sequence
//!
//! 1. `World::update` runs the component phases under the world's write
//!    lock on the main thread.
//! 2. `RenderWorld::begin_frame` rolls the device frame.
//! 3. Extraction tasks cull and extract per view (worker threads) under a
//!    shared read lock.
//! 4. `RenderWorld::render` executes each view's pipeline; it consumes only
//!    the extracted slots, so a threaded host may already be updating the
//!    next frame's world while this one renders.
//! 5. `RenderWorld::end_frame` submits and presents.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::core::tasks::TaskPool;
use crate::gal::backend::GalBackend;
use crate::gal::device::{Device, DeviceConfig};
use crate::gal::error::GalResult;
use crate::render::extract::RendererRegistry;
use crate::render::mesh::{MeshExtractor, MeshRenderer};
use crate::render::pool::GpuResourcePool;
use crate::render::shaders::ShaderLibrary;
use crate::render::world::{RenderWorld, RenderWorldConfig};
use crate::world::World;

/// Host configuration, loadable from a JSON file (`--config`).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub worker_threads: Option<usize>,
    pub max_instances: u32,
    pub occlusion_culling: bool,
    pub reflection_counts_direct: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            worker_threads: None,
            max_instances: crate::render::instance_data::DEFAULT_MAX_INSTANCES,
            occlusion_culling: false,
            reflection_counts_direct: false,
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

pub struct Runtime {
    device: Arc<Device>,
    pool: Arc<GpuResourcePool>,
    /// Write-locked for the update phases, read-locked for extraction.
    world: Arc<RwLock<World>>,
    render_world: RenderWorld,
    frame_counter: u64,
}

impl Runtime {
    /// Builds the full stack over `backend`. Registers the default sampler
    /// set, spatial and render categories, the mesh component path, and the
    /// standard renderers.
    pub fn new(
        backend: Box<dyn GalBackend>,
        device_config: DeviceConfig,
        config: &RuntimeConfig,
        shader_library: Arc<dyn ShaderLibrary>,
    ) -> GalResult<Self> {
        crate::gal::samplers::register_default_samplers();
        let device = Device::new(backend, device_config)?;
        let pool = GpuResourcePool::new(device.clone());

        let task_pool = config
            .worker_threads
            .map_or_else(TaskPool::with_default_workers, TaskPool::new);

        let mut world = World::new(0, task_pool);
        crate::render::mesh::MeshRenderComponent::register(&mut world)
            .expect("mesh component registration");
        crate::world::OccluderComponent::register(&mut world)
            .expect("occluder component registration");

        let categories = crate::render::category::DefaultRenderCategories::register();
        let mut renderers = RendererRegistry::new();
        MeshRenderer::register(&mut renderers, categories.lit_opaque);
        MeshRenderer::register(&mut renderers, categories.lit_masked);
        MeshRenderer::register(&mut renderers, categories.lit_transparent);
        MeshRenderer::register(&mut renderers, categories.simple_opaque);
        MeshRenderer::register(&mut renderers, categories.simple_transparent);

        let mut render_world = RenderWorld::new(
            device.clone(),
            pool.clone(),
            shader_library,
            renderers,
            RenderWorldConfig {
                reflection_counts_direct: config.reflection_counts_direct,
                max_instances: config.max_instances,
                occlusion_culling: config.occlusion_culling,
                ..Default::default()
            },
            task_pool,
        )?;
        render_world.add_world_extractor(Box::new(MeshExtractor));

        Ok(Self {
            device,
            pool,
            world: Arc::new(RwLock::new(world)),
            render_world,
            frame_counter: 0,
        })
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<GpuResourcePool> {
        &self.pool
    }

    /// The world behind its frame lock. Hold the write side only for
    /// update-phase work; extraction and queries take read locks.
    #[inline]
    #[must_use]
    pub fn world(&self) -> &Arc<RwLock<World>> {
        &self.world
    }

    #[inline]
    #[must_use]
    pub fn render_world(&self) -> &RenderWorld {
        &self.render_world
    }

    #[inline]
    #[must_use]
    pub fn render_world_mut(&mut self) -> &mut RenderWorld {
        &mut self.render_world
    }

    #[inline]
    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// One full frame. Returns the device submission result; device loss is
    /// sticky and surfaces here every frame after it happens.
    pub fn run_frame(&mut self, delta_seconds: f32) -> GalResult<()> {
        self.frame_counter += 1;
        self.world.write().update(delta_seconds);

        self.render_world.begin_frame();
        {
            // Extraction tasks share this read lock across the worker pool;
            // the write side stays free for the next frame's update once it
            // drops.
            let world = self.world.read();
            self.render_world.extract(&world);
        }
        self.render_world.render()?;
        self.render_world.end_frame()
    }

    /// Blocks for the GPU and tears down frame infrastructure. Call before
    /// dropping when a clean shutdown matters (the host does).
    pub fn shutdown(&mut self) {
        self.device.wait_idle();
        self.render_world.shutdown();
        self.pool.run_gc(0);
        self.device.wait_idle();
    }
}
