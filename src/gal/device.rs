//! GAL Device Frontend
//!
//! Owns every handle table, enforces lifetimes, and forwards work to the
//! backend. The backend never sees frontend state: descriptors are resolved
//! before they cross the trait boundary, and resources are addressed by the
//! same generational ids on both sides.
//!
//! # Lifetimes
//!
//! Destruction is deferred. A destroy request is queued with the current
//! frame counter; the queue drains at `begin_frame` once the backend reports
//! that frame's GPU work retired. Until then the handle keeps resolving, so
//! anything recorded in the destruction frame stays valid.
//!
//! # Failure semantics
//!
//! Creation failures return an error, never panic. Device loss is sticky:
//! after the backend reports it once, every later submission short-circuits
//! to [`GalError::DeviceLost`] until the device is recreated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::core::handle::{GenIdx, HandleTable};
use crate::core::interner::{self, Symbol};

use super::backend::{
    BufferViewDesc, CommandListBackend, GalBackend, ResolvedComputePipeline,
    ResolvedGraphicsPipeline, TextureViewDesc, TimestampResult,
};
use super::descriptors::{
    BlendStateDesc, BufferCreationDesc, DepthStencilStateDesc, RasterizerStateDesc,
    SamplerStateDesc, TextureCreationDesc, TextureInitData,
};
use super::error::{GalError, GalResult};
use super::fallback::FallbackResources;
use super::handles::{
    BlendStateHandle, BufferHandle, BufferResourceViewHandle, BufferUavHandle,
    DepthStencilStateHandle, PipelineHandle, QueryHandle, RasterizerStateHandle,
    SamplerStateHandle, ShaderHandle, SwapChainHandle, TextureHandle, TextureResourceViewHandle,
    TextureUavHandle, VertexDeclarationHandle,
};
use super::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, VertexDeclarationDesc};
use super::shader::ShaderCreationDesc;
use super::swapchain::{SwapChain, SwapChainCreationDesc, WindowSurface};

// ─── Configuration & events ───────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// Platform id stamped into shader permutation binaries.
    pub platform_id: u32,
    /// How many CPU frames may be in flight before `begin_frame` blocks.
    pub frames_in_flight: u32,
    /// Enable API validation layers (`NS_GPU_DEBUG=1`).
    pub validation: bool,
    /// Enable capture hooks (`NS_RENDERDOC=1`).
    pub renderdoc: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            platform_id: 1,
            frames_in_flight: 2,
            validation: false,
            renderdoc: false,
        }
    }
}

impl DeviceConfig {
    /// Reads the debug toggles from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let flag = |name: &str| std::env::var(name).is_ok_and(|v| v == "1");
        Self {
            validation: flag("NS_GPU_DEBUG"),
            renderdoc: flag("NS_RENDERDOC"),
            ..Default::default()
        }
    }
}

/// Infrastructure notifications. The resource pool and backend caches react
/// to these instead of polling device state.
#[derive(Clone, Copy, Debug)]
pub enum DeviceEvent {
    BeforeBeginFrame { frame: u64 },
    AfterBeginFrame { frame: u64 },
    BeforeEndFrame { frame: u64 },
    AfterEndFrame { frame: u64 },
    DeviceLost,
    TextureDestroyed(TextureHandle),
    BufferDestroyed(BufferHandle),
}

pub type DeviceEventSubscription = u32;

struct EventBus {
    subscribers: RwLock<Vec<(DeviceEventSubscription, Box<dyn Fn(&DeviceEvent) + Send + Sync>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribe(
        &self,
        f: Box<dyn Fn(&DeviceEvent) + Send + Sync>,
    ) -> DeviceEventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as DeviceEventSubscription;
        self.subscribers.write().push((id, f));
        id
    }

    fn unsubscribe(&self, id: DeviceEventSubscription) {
        self.subscribers.write().retain(|(sub_id, _)| *sub_id != id);
    }

    fn emit(&self, event: &DeviceEvent) {
        for (_, f) in self.subscribers.read().iter() {
            f(event);
        }
    }
}

// ─── Tables ───────────────────────────────────────────────────────────────────

pub(crate) struct TextureRecord {
    pub desc: TextureCreationDesc,
    pub default_view: TextureResourceViewHandle,
    pending_destroy: bool,
}

pub(crate) struct BufferRecord {
    pub desc: BufferCreationDesc,
    pub default_view: BufferResourceViewHandle,
    pending_destroy: bool,
}

struct TextureViewRecord {
    texture: TextureHandle,
}

struct BufferViewRecord {
    buffer: BufferHandle,
}

enum PipelineKind {
    Graphics(GraphicsPipelineDesc),
    Compute(ComputePipelineDesc),
}

#[derive(Default)]
struct Tables {
    textures: HandleTable<TextureRecord>,
    buffers: HandleTable<BufferRecord>,
    shaders: HandleTable<Arc<ShaderCreationDesc>>,
    vertex_declarations: HandleTable<VertexDeclarationDesc>,
    pipelines: HandleTable<PipelineKind>,
    sampler_states: HandleTable<SamplerStateDesc>,
    blend_states: HandleTable<BlendStateDesc>,
    depth_stencil_states: HandleTable<DepthStencilStateDesc>,
    rasterizer_states: HandleTable<RasterizerStateDesc>,
    queries: HandleTable<()>,
    swap_chains: HandleTable<SwapChain>,
    texture_views: HandleTable<TextureViewRecord>,
    buffer_views: HandleTable<BufferViewRecord>,
    texture_uavs: HandleTable<TextureViewRecord>,
    buffer_uavs: HandleTable<BufferViewRecord>,
}

enum Retire {
    Texture(TextureHandle),
    Buffer(BufferHandle),
    Shader(ShaderHandle),
    Pipeline(PipelineHandle),
    TextureView(TextureResourceViewHandle),
    BufferView(BufferResourceViewHandle),
    TextureUav(TextureUavHandle),
    BufferUav(BufferUavHandle),
    Query(QueryHandle),
    SwapChain(SwapChainHandle),
}

struct FrameState {
    /// `(requested_in_frame, what)` — drained once that frame retires.
    destroy_queue: Vec<(u64, Retire)>,
    /// Command lists recorded this frame, submitted in order at `end_frame`.
    pending_lists: Vec<Box<dyn CommandListBackend>>,
    inside_frame: bool,
}

// ─── Device ───────────────────────────────────────────────────────────────────

pub struct Device {
    backend: Box<dyn GalBackend>,
    config: DeviceConfig,
    tables: RwLock<Tables>,
    frame: Mutex<FrameState>,
    frame_counter: AtomicU64,
    device_lost: AtomicBool,
    events: EventBus,
    fallback: FallbackResources,
    immutable_samplers: FxHashMap<Symbol, SamplerStateHandle>,
    /// Descriptor-hash → pipeline cache.
    pipeline_cache: Mutex<FxHashMap<u64, PipelineHandle>>,
    /// State-object dedup by descriptor hash.
    state_dedup: Mutex<StateDedup>,
}

#[derive(Default)]
struct StateDedup {
    samplers: FxHashMap<u64, SamplerStateHandle>,
    blend: FxHashMap<u64, BlendStateHandle>,
    depth_stencil: FxHashMap<u64, DepthStencilStateHandle>,
    rasterizer: FxHashMap<u64, RasterizerStateHandle>,
}

fn hash_of<T: std::hash::Hash>(value: &T) -> u64 {
    use std::hash::Hasher;
    let mut hasher = xxhash_rust::xxh3::Xxh3::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl Device {
    /// Initializes a device over `backend`. Bakes the immutable sampler
    /// registry and creates the fallback resource matrix.
    pub fn new(backend: Box<dyn GalBackend>, config: DeviceConfig) -> GalResult<Arc<Self>> {
        let mut device = Self {
            backend,
            config,
            tables: RwLock::new(Tables::default()),
            frame: Mutex::new(FrameState {
                destroy_queue: Vec::new(),
                pending_lists: Vec::new(),
                inside_frame: false,
            }),
            frame_counter: AtomicU64::new(0),
            device_lost: AtomicBool::new(false),
            events: EventBus::new(),
            fallback: FallbackResources::empty(),
            immutable_samplers: FxHashMap::default(),
            pipeline_cache: Mutex::new(FxHashMap::default()),
            state_dedup: Mutex::new(StateDedup::default()),
        };

        let mut immutable = FxHashMap::default();
        for (sym, desc) in super::samplers::registered_immutable_samplers() {
            let handle = device.create_sampler_state_inner(&desc)?;
            immutable.insert(sym, handle);
        }
        device.immutable_samplers = immutable;
        device.fallback = FallbackResources::create(&device)?;
        Ok(Arc::new(device))
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[inline]
    #[must_use]
    pub fn current_frame(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Relaxed)
    }

    pub(crate) fn backend(&self) -> &dyn GalBackend {
        self.backend.as_ref()
    }

    // ── Events ─────────────────────────────────────────────────────────────

    pub fn subscribe_events(
        &self,
        f: impl Fn(&DeviceEvent) + Send + Sync + 'static,
    ) -> DeviceEventSubscription {
        self.events.subscribe(Box::new(f))
    }

    pub fn unsubscribe_events(&self, id: DeviceEventSubscription) {
        self.events.unsubscribe(id);
    }

    // ── Textures ───────────────────────────────────────────────────────────

    pub fn create_texture(
        &self,
        desc: &TextureCreationDesc,
        init: Option<&TextureInitData<'_>>,
    ) -> GalResult<TextureHandle> {
        if !desc.is_valid() {
            return Err(GalError::InvalidDesc);
        }
        if desc.format == super::format::ResourceFormat::Unknown {
            return Err(GalError::UnsupportedFormat);
        }

        let mut tables = self.tables.write();
        let id = tables.textures.insert(TextureRecord {
            desc: *desc,
            default_view: TextureResourceViewHandle::INVALID,
            pending_destroy: false,
        });
        if let Err(e) = self.backend.create_texture(id, desc, init) {
            tables.textures.remove(id);
            return Err(e);
        }
        let handle = TextureHandle::from_id(id);

        // Every shader-visible texture gets a full-resource default view.
        if desc.usage.contains(super::descriptors::TextureUsage::SHADER_RESOURCE) {
            let view_id = tables.texture_views.insert(TextureViewRecord { texture: handle });
            let view_desc = TextureViewDesc {
                texture: id,
                base_mip: 0,
                mip_count: desc.mip_levels,
                base_layer: 0,
                layer_count: desc.array_size,
            };
            if let Err(e) = self.backend.create_texture_view(view_id, &view_desc) {
                tables.texture_views.remove(view_id);
                self.backend.destroy_texture(id);
                tables.textures.remove(id);
                return Err(e);
            }
            tables.textures.get_mut(id).unwrap().default_view =
                TextureResourceViewHandle::from_id(view_id);
        }
        Ok(handle)
    }

    pub fn destroy_texture(&self, handle: TextureHandle) {
        let default_view = {
            let mut tables = self.tables.write();
            let Some(record) = tables.textures.get_mut(handle.id()) else {
                return;
            };
            if record.pending_destroy {
                return;
            }
            record.pending_destroy = true;
            record.default_view
        };
        let mut frame = self.frame.lock();
        let now = self.current_frame();
        if !default_view.is_invalid() {
            frame.destroy_queue.push((now, Retire::TextureView(default_view)));
        }
        frame.destroy_queue.push((now, Retire::Texture(handle)));
    }

    #[must_use]
    pub fn texture_desc(&self, handle: TextureHandle) -> Option<TextureCreationDesc> {
        self.tables.read().textures.get(handle.id()).map(|r| r.desc)
    }

    /// The full-resource shader view created alongside the texture.
    #[must_use]
    pub fn default_resource_view(&self, handle: TextureHandle) -> Option<TextureResourceViewHandle> {
        let tables = self.tables.read();
        let record = tables.textures.get(handle.id())?;
        (!record.default_view.is_invalid()).then_some(record.default_view)
    }

    pub fn create_texture_view(
        &self,
        texture: TextureHandle,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> GalResult<TextureResourceViewHandle> {
        let mut tables = self.tables.write();
        if !tables.textures.contains(texture.id()) {
            return Err(GalError::InvalidHandle);
        }
        let id = tables.texture_views.insert(TextureViewRecord { texture });
        let desc = TextureViewDesc {
            texture: texture.id(),
            base_mip,
            mip_count,
            base_layer,
            layer_count,
        };
        if let Err(e) = self.backend.create_texture_view(id, &desc) {
            tables.texture_views.remove(id);
            return Err(e);
        }
        Ok(TextureResourceViewHandle::from_id(id))
    }

    pub fn destroy_texture_view(&self, handle: TextureResourceViewHandle) {
        if self.tables.read().texture_views.contains(handle.id()) {
            self.frame
                .lock()
                .destroy_queue
                .push((self.current_frame(), Retire::TextureView(handle)));
        }
    }

    pub fn create_texture_uav(
        &self,
        texture: TextureHandle,
        mip_level: u32,
    ) -> GalResult<TextureUavHandle> {
        let mut tables = self.tables.write();
        let Some(record) = tables.textures.get(texture.id()) else {
            return Err(GalError::InvalidHandle);
        };
        let layer_count = record.desc.array_size;
        let id = tables.texture_uavs.insert(TextureViewRecord { texture });
        let desc = TextureViewDesc {
            texture: texture.id(),
            base_mip: mip_level,
            mip_count: 1,
            base_layer: 0,
            layer_count,
        };
        if let Err(e) = self.backend.create_texture_uav(id, &desc) {
            tables.texture_uavs.remove(id);
            return Err(e);
        }
        Ok(TextureUavHandle::from_id(id))
    }

    pub fn destroy_texture_uav(&self, handle: TextureUavHandle) {
        if self.tables.read().texture_uavs.contains(handle.id()) {
            self.frame
                .lock()
                .destroy_queue
                .push((self.current_frame(), Retire::TextureUav(handle)));
        }
    }

    // ── Buffers ────────────────────────────────────────────────────────────

    pub fn create_buffer(
        &self,
        desc: &BufferCreationDesc,
        init: Option<&[u8]>,
    ) -> GalResult<BufferHandle> {
        if !desc.is_valid() {
            return Err(GalError::InvalidDesc);
        }
        if desc.immutable && init.is_none() {
            return Err(GalError::InvalidDesc);
        }

        let mut tables = self.tables.write();
        let id = tables.buffers.insert(BufferRecord {
            desc: *desc,
            default_view: BufferResourceViewHandle::INVALID,
            pending_destroy: false,
        });
        if let Err(e) = self.backend.create_buffer(id, desc, init) {
            tables.buffers.remove(id);
            return Err(e);
        }
        let handle = BufferHandle::from_id(id);

        if desc.usage.contains(super::descriptors::BufferUsage::SHADER_RESOURCE) {
            let view_id = tables.buffer_views.insert(BufferViewRecord { buffer: handle });
            let view_desc = BufferViewDesc {
                buffer: id,
                byte_offset: 0,
                byte_size: desc.total_size,
            };
            if let Err(e) = self.backend.create_buffer_view(view_id, &view_desc) {
                tables.buffer_views.remove(view_id);
                self.backend.destroy_buffer(id);
                tables.buffers.remove(id);
                return Err(e);
            }
            tables.buffers.get_mut(id).unwrap().default_view =
                BufferResourceViewHandle::from_id(view_id);
        }
        Ok(handle)
    }

    pub fn destroy_buffer(&self, handle: BufferHandle) {
        let default_view = {
            let mut tables = self.tables.write();
            let Some(record) = tables.buffers.get_mut(handle.id()) else {
                return;
            };
            if record.pending_destroy {
                return;
            }
            record.pending_destroy = true;
            record.default_view
        };
        let mut frame = self.frame.lock();
        let now = self.current_frame();
        if !default_view.is_invalid() {
            frame.destroy_queue.push((now, Retire::BufferView(default_view)));
        }
        frame.destroy_queue.push((now, Retire::Buffer(handle)));
    }

    #[must_use]
    pub fn buffer_desc(&self, handle: BufferHandle) -> Option<BufferCreationDesc> {
        self.tables.read().buffers.get(handle.id()).map(|r| r.desc)
    }

    #[must_use]
    pub fn default_buffer_view(&self, handle: BufferHandle) -> Option<BufferResourceViewHandle> {
        let tables = self.tables.read();
        let record = tables.buffers.get(handle.id())?;
        (!record.default_view.is_invalid()).then_some(record.default_view)
    }

    pub fn create_buffer_uav(&self, buffer: BufferHandle) -> GalResult<BufferUavHandle> {
        let mut tables = self.tables.write();
        let Some(record) = tables.buffers.get(buffer.id()) else {
            return Err(GalError::InvalidHandle);
        };
        let size = record.desc.total_size;
        let id = tables.buffer_uavs.insert(BufferViewRecord { buffer });
        let desc = BufferViewDesc {
            buffer: buffer.id(),
            byte_offset: 0,
            byte_size: size,
        };
        if let Err(e) = self.backend.create_buffer_uav(id, &desc) {
            tables.buffer_uavs.remove(id);
            return Err(e);
        }
        Ok(BufferUavHandle::from_id(id))
    }

    pub fn destroy_buffer_uav(&self, handle: BufferUavHandle) {
        if self.tables.read().buffer_uavs.contains(handle.id()) {
            self.frame
                .lock()
                .destroy_queue
                .push((self.current_frame(), Retire::BufferUav(handle)));
        }
    }

    // ── Shaders & vertex declarations ──────────────────────────────────────

    pub fn create_shader(&self, desc: ShaderCreationDesc) -> GalResult<ShaderHandle> {
        if !desc.is_valid() {
            return Err(GalError::InvalidDesc);
        }
        let desc = Arc::new(desc);
        let mut tables = self.tables.write();
        let id = tables.shaders.insert(desc.clone());
        if let Err(e) = self.backend.create_shader(id, &desc) {
            tables.shaders.remove(id);
            return Err(e);
        }
        Ok(ShaderHandle::from_id(id))
    }

    pub fn destroy_shader(&self, handle: ShaderHandle) {
        if self.tables.read().shaders.contains(handle.id()) {
            self.frame
                .lock()
                .destroy_queue
                .push((self.current_frame(), Retire::Shader(handle)));
        }
    }

    #[must_use]
    pub fn shader_desc(&self, handle: ShaderHandle) -> Option<Arc<ShaderCreationDesc>> {
        self.tables.read().shaders.get(handle.id()).cloned()
    }

    pub fn create_vertex_declaration(
        &self,
        desc: VertexDeclarationDesc,
    ) -> GalResult<VertexDeclarationHandle> {
        if !desc.is_valid() {
            return Err(GalError::InvalidDesc);
        }
        let id = self.tables.write().vertex_declarations.insert(desc);
        Ok(VertexDeclarationHandle::from_id(id))
    }

    #[must_use]
    pub fn vertex_declaration_desc(
        &self,
        handle: VertexDeclarationHandle,
    ) -> Option<VertexDeclarationDesc> {
        self.tables
            .read()
            .vertex_declarations
            .get(handle.id())
            .cloned()
    }

    // ── State objects (deduplicated by descriptor hash) ────────────────────

    fn create_sampler_state_inner(&self, desc: &SamplerStateDesc) -> GalResult<SamplerStateHandle> {
        let key = hash_of(desc);
        if let Some(&handle) = self.state_dedup.lock().samplers.get(&key) {
            return Ok(handle);
        }
        let mut tables = self.tables.write();
        let id = tables.sampler_states.insert(*desc);
        if let Err(e) = self.backend.create_sampler(id, desc) {
            tables.sampler_states.remove(id);
            return Err(e);
        }
        let handle = SamplerStateHandle::from_id(id);
        self.state_dedup.lock().samplers.insert(key, handle);
        Ok(handle)
    }

    pub fn create_sampler_state(&self, desc: &SamplerStateDesc) -> GalResult<SamplerStateHandle> {
        self.create_sampler_state_inner(desc)
    }

    pub fn create_blend_state(&self, desc: &BlendStateDesc) -> GalResult<BlendStateHandle> {
        let key = hash_of(desc);
        if let Some(&handle) = self.state_dedup.lock().blend.get(&key) {
            return Ok(handle);
        }
        let id = self.tables.write().blend_states.insert(*desc);
        let handle = BlendStateHandle::from_id(id);
        self.state_dedup.lock().blend.insert(key, handle);
        Ok(handle)
    }

    pub fn create_depth_stencil_state(
        &self,
        desc: &DepthStencilStateDesc,
    ) -> GalResult<DepthStencilStateHandle> {
        let key = hash_of(desc);
        if let Some(&handle) = self.state_dedup.lock().depth_stencil.get(&key) {
            return Ok(handle);
        }
        let id = self.tables.write().depth_stencil_states.insert(*desc);
        let handle = DepthStencilStateHandle::from_id(id);
        self.state_dedup.lock().depth_stencil.insert(key, handle);
        Ok(handle)
    }

    pub fn create_rasterizer_state(
        &self,
        desc: &RasterizerStateDesc,
    ) -> GalResult<RasterizerStateHandle> {
        let key = hash_of(desc);
        if let Some(&handle) = self.state_dedup.lock().rasterizer.get(&key) {
            return Ok(handle);
        }
        let id = self.tables.write().rasterizer_states.insert(*desc);
        let handle = RasterizerStateHandle::from_id(id);
        self.state_dedup.lock().rasterizer.insert(key, handle);
        Ok(handle)
    }

    /// Resolves a registered immutable sampler by name.
    #[must_use]
    pub fn immutable_sampler(&self, name: &str) -> Option<SamplerStateHandle> {
        let sym = interner::get(name)?;
        self.immutable_samplers.get(&sym).copied()
    }

    #[must_use]
    pub fn immutable_sampler_by_symbol(&self, sym: Symbol) -> Option<SamplerStateHandle> {
        self.immutable_samplers.get(&sym).copied()
    }

    // ── Pipelines ──────────────────────────────────────────────────────────

    /// Creates (or returns the cached) graphics pipeline for `desc`.
    pub fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> GalResult<PipelineHandle> {
        let key = desc.calculate_hash();
        if let Some(&handle) = self.pipeline_cache.lock().get(&key) {
            return Ok(handle);
        }

        let mut tables = self.tables.write();
        let shader = tables
            .shaders
            .get(desc.shader.id())
            .ok_or(GalError::InvalidHandle)?
            .clone();
        let vertex_declaration = tables
            .vertex_declarations
            .get(desc.vertex_declaration.id())
            .ok_or(GalError::InvalidHandle)?
            .clone();
        let blend = *tables
            .blend_states
            .get(desc.blend_state.id())
            .ok_or(GalError::InvalidHandle)?;
        let depth_stencil = *tables
            .depth_stencil_states
            .get(desc.depth_stencil_state.id())
            .ok_or(GalError::InvalidHandle)?;
        let rasterizer = *tables
            .rasterizer_states
            .get(desc.rasterizer_state.id())
            .ok_or(GalError::InvalidHandle)?;

        let id = tables.pipelines.insert(PipelineKind::Graphics(desc.clone()));
        let resolved = ResolvedGraphicsPipeline {
            desc,
            shader: &shader,
            vertex_declaration: &vertex_declaration,
            blend,
            depth_stencil,
            rasterizer,
        };
        if let Err(e) = self.backend.create_graphics_pipeline(id, &resolved) {
            tables.pipelines.remove(id);
            return Err(e);
        }
        let handle = PipelineHandle::from_id(id);
        self.pipeline_cache.lock().insert(key, handle);
        Ok(handle)
    }

    pub fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> GalResult<PipelineHandle> {
        let key = desc.calculate_hash() ^ 0x9E37_79B9_7F4A_7C15;
        if let Some(&handle) = self.pipeline_cache.lock().get(&key) {
            return Ok(handle);
        }

        let mut tables = self.tables.write();
        let shader = tables
            .shaders
            .get(desc.shader.id())
            .ok_or(GalError::InvalidHandle)?
            .clone();
        let id = tables.pipelines.insert(PipelineKind::Compute(*desc));
        let resolved = ResolvedComputePipeline { desc, shader: &shader };
        if let Err(e) = self.backend.create_compute_pipeline(id, &resolved) {
            tables.pipelines.remove(id);
            return Err(e);
        }
        let handle = PipelineHandle::from_id(id);
        self.pipeline_cache.lock().insert(key, handle);
        Ok(handle)
    }

    pub fn destroy_pipeline(&self, handle: PipelineHandle) {
        if self.tables.read().pipelines.contains(handle.id()) {
            self.frame
                .lock()
                .destroy_queue
                .push((self.current_frame(), Retire::Pipeline(handle)));
        }
    }

    // ── Swap chains ────────────────────────────────────────────────────────

    pub fn create_swap_chain(
        &self,
        surface: WindowSurface,
        width: u32,
        height: u32,
        format: super::format::ResourceFormat,
        vsync: bool,
    ) -> GalResult<SwapChainHandle> {
        let mut tables = self.tables.write();
        // The backbuffer gets a frontend texture id so passes can bind it
        // like any other target; the backend maps it to the acquired image.
        let backbuffer_id = tables.textures.insert(TextureRecord {
            desc: TextureCreationDesc::render_target(width, height, format),
            default_view: TextureResourceViewHandle::INVALID,
            pending_destroy: false,
        });
        let backbuffer = TextureHandle::from_id(backbuffer_id);

        let desc = SwapChainCreationDesc {
            surface,
            width,
            height,
            format,
            vsync,
            backbuffer_texture: backbuffer,
        };
        let id = tables.swap_chains.insert(SwapChain {
            desc: desc.clone(),
            backbuffer,
        });
        if let Err(e) = self.backend.create_swap_chain(id, &desc) {
            tables.swap_chains.remove(id);
            tables.textures.remove(backbuffer_id);
            return Err(e);
        }
        Ok(SwapChainHandle::from_id(id))
    }

    pub fn destroy_swap_chain(&self, handle: SwapChainHandle) {
        let backbuffer = {
            let tables = self.tables.read();
            let Some(sc) = tables.swap_chains.get(handle.id()) else {
                return;
            };
            sc.backbuffer
        };
        let mut frame = self.frame.lock();
        let now = self.current_frame();
        frame.destroy_queue.push((now, Retire::SwapChain(handle)));
        frame.destroy_queue.push((now, Retire::Texture(backbuffer)));
    }

    #[must_use]
    pub fn swap_chain_backbuffer(&self, handle: SwapChainHandle) -> Option<TextureHandle> {
        self.tables
            .read()
            .swap_chains
            .get(handle.id())
            .map(|sc| sc.backbuffer)
    }

    pub fn present(&self, handle: SwapChainHandle) -> GalResult<()> {
        if self.is_device_lost() {
            return Err(GalError::DeviceLost);
        }
        if !self.tables.read().swap_chains.contains(handle.id()) {
            return Err(GalError::InvalidHandle);
        }
        match self.backend.present(handle.id()) {
            Err(GalError::DeviceLost) => {
                self.mark_device_lost();
                Err(GalError::DeviceLost)
            }
            other => other,
        }
    }

    // ── Queries ────────────────────────────────────────────────────────────

    pub fn create_query(&self) -> GalResult<QueryHandle> {
        let mut tables = self.tables.write();
        let id = tables.queries.insert(());
        if let Err(e) = self.backend.create_query(id) {
            tables.queries.remove(id);
            return Err(e);
        }
        Ok(QueryHandle::from_id(id))
    }

    pub fn destroy_query(&self, handle: QueryHandle) {
        if self.tables.read().queries.contains(handle.id()) {
            self.frame
                .lock()
                .destroy_queue
                .push((self.current_frame(), Retire::Query(handle)));
        }
    }

    /// Reads a timestamp. `force_wait` blocks until the GPU value lands.
    #[must_use]
    pub fn get_timestamp_result(&self, handle: QueryHandle, force_wait: bool) -> TimestampResult {
        if !self.tables.read().queries.contains(handle.id()) {
            return TimestampResult::Expired;
        }
        self.backend.get_timestamp_result(handle.id(), force_wait)
    }

    // ── Frame control ──────────────────────────────────────────────────────

    /// Advances the frame counter and drains deferred destruction for every
    /// frame the backend reports retired.
    pub fn begin_frame(&self) -> u64 {
        let frame = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.events.emit(&DeviceEvent::BeforeBeginFrame { frame });

        let retired = self.backend.begin_frame(frame);
        self.drain_destroy_queue(retired);

        self.frame.lock().inside_frame = true;
        self.events.emit(&DeviceEvent::AfterBeginFrame { frame });
        frame
    }

    /// Submits everything recorded this frame. Device loss is detected here
    /// and latched.
    pub fn end_frame(&self) -> GalResult<()> {
        let frame = self.current_frame();
        self.events.emit(&DeviceEvent::BeforeEndFrame { frame });

        let lists = {
            let mut state = self.frame.lock();
            state.inside_frame = false;
            std::mem::take(&mut state.pending_lists)
        };

        let result = if self.is_device_lost() {
            Err(GalError::DeviceLost)
        } else {
            match self.backend.end_frame(lists) {
                Err(GalError::DeviceLost) => {
                    self.mark_device_lost();
                    Err(GalError::DeviceLost)
                }
                other => other,
            }
        };

        self.events.emit(&DeviceEvent::AfterEndFrame { frame });
        result
    }

    /// Blocks until the GPU is idle. Shutdown only.
    pub fn wait_idle(&self) {
        self.backend.wait_idle();
        self.drain_destroy_queue(u64::MAX);
    }

    fn mark_device_lost(&self) {
        if !self.device_lost.swap(true, Ordering::Relaxed) {
            log::error!("GPU device lost; all further submissions are dropped");
            self.events.emit(&DeviceEvent::DeviceLost);
        }
    }

    fn drain_destroy_queue(&self, retired_frame: u64) {
        let drained: Vec<Retire> = {
            let mut frame = self.frame.lock();
            let mut drained = Vec::new();
            frame.destroy_queue.retain_mut(|(requested, retire)| {
                if *requested <= retired_frame {
                    // Retire is not Copy; move it out via replace.
                    drained.push(std::mem::replace(retire, Retire::Query(QueryHandle::INVALID)));
                    false
                } else {
                    true
                }
            });
            drained
        };

        if drained.is_empty() {
            return;
        }

        let mut tables = self.tables.write();
        for retire in drained {
            match retire {
                Retire::Texture(h) => {
                    if tables.textures.remove(h.id()).is_some() {
                        self.backend.destroy_texture(h.id());
                        self.events.emit(&DeviceEvent::TextureDestroyed(h));
                    }
                }
                Retire::Buffer(h) => {
                    if tables.buffers.remove(h.id()).is_some() {
                        self.backend.destroy_buffer(h.id());
                        self.events.emit(&DeviceEvent::BufferDestroyed(h));
                    }
                }
                Retire::Shader(h) => {
                    if tables.shaders.remove(h.id()).is_some() {
                        self.backend.destroy_shader(h.id());
                    }
                }
                Retire::Pipeline(h) => {
                    if tables.pipelines.remove(h.id()).is_some() {
                        self.backend.destroy_pipeline(h.id());
                    }
                }
                Retire::TextureView(h) => {
                    if tables.texture_views.remove(h.id()).is_some() {
                        self.backend.destroy_texture_view(h.id());
                    }
                }
                Retire::BufferView(h) => {
                    if tables.buffer_views.remove(h.id()).is_some() {
                        self.backend.destroy_buffer_view(h.id());
                    }
                }
                Retire::TextureUav(h) => {
                    if tables.texture_uavs.remove(h.id()).is_some() {
                        self.backend.destroy_texture_uav(h.id());
                    }
                }
                Retire::BufferUav(h) => {
                    if tables.buffer_uavs.remove(h.id()).is_some() {
                        self.backend.destroy_buffer_uav(h.id());
                    }
                }
                Retire::Query(h) => {
                    if !h.is_invalid() && tables.queries.remove(h.id()).is_some() {
                        self.backend.destroy_query(h.id());
                    }
                }
                Retire::SwapChain(h) => {
                    if tables.swap_chains.remove(h.id()).is_some() {
                        self.backend.destroy_swap_chain(h.id());
                    }
                }
            }
        }
    }

    pub(crate) fn submit_command_list(&self, list: Box<dyn CommandListBackend>) {
        self.frame.lock().pending_lists.push(list);
    }

    // ── View lookups used by encoders & the render context ─────────────────

    #[must_use]
    pub fn texture_view_is_valid(&self, handle: TextureResourceViewHandle) -> bool {
        self.tables.read().texture_views.contains(handle.id())
    }

    #[must_use]
    pub fn buffer_view_is_valid(&self, handle: BufferResourceViewHandle) -> bool {
        self.tables.read().buffer_views.contains(handle.id())
    }

    #[must_use]
    pub fn texture_uav_is_valid(&self, handle: TextureUavHandle) -> bool {
        self.tables.read().texture_uavs.contains(handle.id())
    }

    #[must_use]
    pub fn buffer_uav_is_valid(&self, handle: BufferUavHandle) -> bool {
        self.tables.read().buffer_uavs.contains(handle.id())
    }

    #[must_use]
    pub fn buffer_is_valid(&self, handle: BufferHandle) -> bool {
        self.tables.read().buffers.contains(handle.id())
    }

    #[must_use]
    pub fn texture_is_valid(&self, handle: TextureHandle) -> bool {
        self.tables.read().textures.contains(handle.id())
    }

    #[inline]
    #[must_use]
    pub fn fallback(&self) -> &FallbackResources {
        &self.fallback
    }
}
