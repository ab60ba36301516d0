//! Render Context
//!
//! Tracks bound state for draw submission: the active shader and its
//! permutation variables, named resource bindings, fixed-function state, and
//! constant-buffer storage. State changes set dirty bits; `draw_geometry`
//! resolves the pipeline (creating it through the device's descriptor-hash
//! cache if needed), flushes dirty state through the shader's reflection
//! tables, binds the per-instance buffer, and issues the call.

use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::core::handle::HandleTable;
use crate::core::interner::{self, Symbol};
use crate::define_handle;
use crate::gal::descriptors::PrimitiveTopology;
use crate::gal::device::Device;
use crate::gal::encoder::RenderCommandEncoder;
use crate::gal::error::{GalError, GalResult};
use crate::gal::handles::{
    BlendStateHandle, BufferHandle, DepthStencilStateHandle, PipelineHandle,
    RasterizerStateHandle, ResourceViewHandle, SamplerStateHandle, ShaderHandle,
    VertexDeclarationHandle,
};
use crate::gal::pipeline::{
    GraphicsPipelineDesc, IndexFormat, RenderPassCompatibility, VertexDeclarationDesc,
};
use crate::gal::shader::{PermutationSet, ShaderCreationDesc, ShaderResourceType};

use super::instance_data::InstanceData;
use super::shaders::ShaderLibrary;

define_handle!(
    /// Handle to a typed constant-buffer storage slot.
    pub struct ConstantStorageHandle
);

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    struct DirtyFlags: u8 {
        const SHADER    = 1 << 0;
        const PIPELINE  = 1 << 1;
        const BINDINGS  = 1 << 2;
    }
}

/// Geometry ready for drawing: GAL buffers plus counts.
#[derive(Clone, Copy, Debug)]
pub struct DrawableGeometry {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<(BufferHandle, IndexFormat)>,
    pub vertex_count: u32,
    pub index_count: u32,
    pub vertex_declaration: VertexDeclarationHandle,
}

struct ConstantStorage {
    buffer: BufferHandle,
    data: Vec<u8>,
    dirty: bool,
}

pub struct RenderContext {
    device: Arc<Device>,
    shader_library: Arc<dyn ShaderLibrary>,

    // Shader selection.
    shader_name: Option<String>,
    permutations: PermutationSet,
    active_shader: Option<(ShaderHandle, Arc<ShaderCreationDesc>)>,
    /// `(name, permutation hash)` → created shader.
    shader_cache: FxHashMap<(String, u64), ShaderHandle>,
    empty_declaration: Option<VertexDeclarationHandle>,

    // Named bindings.
    bound_views: FxHashMap<Symbol, ResourceViewHandle>,
    bound_constant_buffers: FxHashMap<Symbol, BufferHandle>,
    bound_samplers: FxHashMap<Symbol, SamplerStateHandle>,

    // Fixed-function state.
    blend_state: BlendStateHandle,
    depth_stencil_state: DepthStencilStateHandle,
    rasterizer_state: RasterizerStateHandle,
    topology: PrimitiveTopology,
    compatibility: RenderPassCompatibility,

    constant_storages: HandleTable<ConstantStorage>,
    instance_data: InstanceData,
    dirty: DirtyFlags,
    draws_issued: u64,
}

impl RenderContext {
    pub fn new(
        device: Arc<Device>,
        shader_library: Arc<dyn ShaderLibrary>,
        max_instances: u32,
    ) -> GalResult<Self> {
        let blend_state = device.create_blend_state(&Default::default())?;
        let depth_stencil_state = device.create_depth_stencil_state(&Default::default())?;
        let rasterizer_state = device.create_rasterizer_state(&Default::default())?;
        let instance_data = InstanceData::new(device.clone(), max_instances)?;
        Ok(Self {
            device,
            shader_library,
            shader_name: None,
            permutations: PermutationSet::new(),
            active_shader: None,
            shader_cache: FxHashMap::default(),
            empty_declaration: None,
            bound_views: FxHashMap::default(),
            bound_constant_buffers: FxHashMap::default(),
            bound_samplers: FxHashMap::default(),
            blend_state,
            depth_stencil_state,
            rasterizer_state,
            topology: PrimitiveTopology::Triangles,
            compatibility: RenderPassCompatibility::default(),
            constant_storages: HandleTable::new(),
            instance_data,
            dirty: DirtyFlags::all(),
            draws_issued: 0,
        })
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn instance_data(&mut self) -> &mut InstanceData {
        &mut self.instance_data
    }

    /// Current position of the per-instance ring.
    #[inline]
    #[must_use]
    pub fn instance_ring_offset(&self) -> u32 {
        self.instance_data.offset()
    }

    #[inline]
    #[must_use]
    pub fn draws_issued(&self) -> u64 {
        self.draws_issued
    }

    /// Per-frame reset: rewinds the instance ring and drops frame-scoped
    /// bindings.
    pub fn begin_frame(&mut self) {
        self.instance_data.reset();
        self.bound_views.clear();
        self.bound_constant_buffers.clear();
        self.bound_samplers.clear();
        self.dirty = DirtyFlags::all();
    }

    // ── Shader & permutation state ─────────────────────────────────────────

    pub fn set_shader(&mut self, name: &str) {
        if self.shader_name.as_deref() != Some(name) {
            self.shader_name = Some(name.to_owned());
            self.dirty |= DirtyFlags::SHADER | DirtyFlags::PIPELINE | DirtyFlags::BINDINGS;
        }
    }

    /// Sets a permutation variable routed into shader variant selection.
    pub fn set_permutation(&mut self, name: &str, value: &str) {
        if self.permutations.get(name) != Some(value) {
            self.permutations.set(name, value);
            self.dirty |= DirtyFlags::SHADER | DirtyFlags::PIPELINE | DirtyFlags::BINDINGS;
        }
    }

    pub fn clear_permutation(&mut self, name: &str) {
        self.permutations.remove(name);
        self.dirty |= DirtyFlags::SHADER | DirtyFlags::PIPELINE | DirtyFlags::BINDINGS;
    }

    // ── Named bindings ─────────────────────────────────────────────────────

    pub fn bind_resource(&mut self, name: &str, view: impl Into<ResourceViewHandle>) {
        let sym = interner::intern(name);
        let view = view.into();
        if self.bound_views.insert(sym, view) != Some(view) {
            self.dirty |= DirtyFlags::BINDINGS;
        }
    }

    pub fn bind_constant_buffer(&mut self, name: &str, buffer: BufferHandle) {
        let sym = interner::intern(name);
        if self.bound_constant_buffers.insert(sym, buffer) != Some(buffer) {
            self.dirty |= DirtyFlags::BINDINGS;
        }
    }

    pub fn bind_sampler(&mut self, name: &str, sampler: SamplerStateHandle) {
        let sym = interner::intern(name);
        if self.bound_samplers.insert(sym, sampler) != Some(sampler) {
            self.dirty |= DirtyFlags::BINDINGS;
        }
    }

    // ── Fixed-function state ───────────────────────────────────────────────

    pub fn set_blend_state(&mut self, state: BlendStateHandle) {
        if self.blend_state != state {
            self.blend_state = state;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_depth_stencil_state(&mut self, state: DepthStencilStateHandle) {
        if self.depth_stencil_state != state {
            self.depth_stencil_state = state;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_rasterizer_state(&mut self, state: RasterizerStateHandle) {
        if self.rasterizer_state != state {
            self.rasterizer_state = state;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    pub fn set_topology(&mut self, topology: PrimitiveTopology) {
        if self.topology != topology {
            self.topology = topology;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    /// Attachment shape of the pass currently recording. Render passes set
    /// this before issuing draws.
    pub fn set_render_pass_compatibility(&mut self, compatibility: RenderPassCompatibility) {
        if self.compatibility != compatibility {
            self.compatibility = compatibility;
            self.dirty |= DirtyFlags::PIPELINE;
        }
    }

    // ── Constant-buffer storage ────────────────────────────────────────────

    /// Allocates a typed constant-buffer slot with a CPU mirror.
    pub fn create_constant_buffer_storage<T: bytemuck::Pod + Default>(
        &mut self,
    ) -> GalResult<ConstantStorageHandle> {
        let buffer = self.device.create_buffer(
            &crate::gal::descriptors::BufferCreationDesc::constant(
                std::mem::size_of::<T>() as u32
            ),
            Some(bytemuck::bytes_of(&T::default())),
        )?;
        let id = self.constant_storages.insert(ConstantStorage {
            buffer,
            data: bytemuck::bytes_of(&T::default()).to_vec(),
            dirty: false,
        });
        Ok(ConstantStorageHandle::from_id(id))
    }

    pub fn delete_constant_buffer_storage(&mut self, handle: ConstantStorageHandle) {
        if let Some(storage) = self.constant_storages.remove(handle.id()) {
            self.device.destroy_buffer(storage.buffer);
        }
    }

    /// Mutable access to the CPU mirror; the GPU copy refreshes on the next
    /// draw.
    #[must_use]
    pub fn constant_buffer_data_mut<T: bytemuck::Pod>(
        &mut self,
        handle: ConstantStorageHandle,
    ) -> Option<&mut T> {
        let storage = self.constant_storages.get_mut(handle.id())?;
        storage.dirty = true;
        bytemuck::try_from_bytes_mut(storage.data.as_mut_slice()).ok()
    }

    /// Binds a constant storage slot under a shader name.
    pub fn bind_constant_storage(&mut self, name: &str, handle: ConstantStorageHandle) {
        if let Some(storage) = self.constant_storages.get(handle.id()) {
            let buffer = storage.buffer;
            self.bind_constant_buffer(name, buffer);
        }
    }

    // ── Draw submission ────────────────────────────────────────────────────

    /// Resolves shader + pipeline, flushes bindings through the shader's
    /// reflection table, and draws `geometry` with `instance_count`
    /// instances.
    pub fn draw_geometry(
        &mut self,
        encoder: &mut RenderCommandEncoder<'_>,
        geometry: &DrawableGeometry,
        instance_count: u32,
        first_instance: u32,
    ) -> GalResult<()> {
        let (pipeline, shader_desc) = self.resolve_pipeline(geometry.vertex_declaration)?;
        encoder.set_pipeline(pipeline);
        self.flush_constant_storages(encoder);
        self.flush_bindings(encoder, &shader_desc);

        encoder.bind_vertex_buffer(0, geometry.vertex_buffer, 0);
        if let Some((index_buffer, format)) = geometry.index_buffer {
            encoder.bind_index_buffer(index_buffer, format, 0);
            encoder.draw_indexed(geometry.index_count, instance_count, 0, 0, first_instance);
        } else {
            encoder.draw(geometry.vertex_count, instance_count, 0, first_instance);
        }
        self.draws_issued += 1;
        Ok(())
    }

    /// A fullscreen triangle with the current shader; post passes live on
    /// this.
    pub fn draw_fullscreen(&mut self, encoder: &mut RenderCommandEncoder<'_>) -> GalResult<()> {
        let declaration = match self.empty_declaration {
            Some(handle) => handle,
            None => {
                let handle = self
                    .device
                    .create_vertex_declaration(VertexDeclarationDesc::default())?;
                self.empty_declaration = Some(handle);
                handle
            }
        };
        let (pipeline, shader_desc) = self.resolve_pipeline(declaration)?;
        encoder.set_pipeline(pipeline);
        self.flush_constant_storages(encoder);
        self.flush_bindings(encoder, &shader_desc);
        encoder.draw(3, 1, 0, 0);
        self.draws_issued += 1;
        Ok(())
    }

    fn resolve_pipeline(
        &mut self,
        vertex_declaration: VertexDeclarationHandle,
    ) -> GalResult<(PipelineHandle, Arc<ShaderCreationDesc>)> {
        if self.dirty.contains(DirtyFlags::SHADER) || self.active_shader.is_none() {
            let name = self.shader_name.clone().ok_or(GalError::InvalidDesc)?;
            let key = (name.clone(), self.permutations.permutation_hash());
            let shader = if let Some(&handle) = self.shader_cache.get(&key) {
                handle
            } else {
                let desc = self
                    .shader_library
                    .load_shader(&name, &self.permutations)
                    .ok_or(GalError::ShaderCompileError {
                        stage: "unknown",
                        name: "shader not found",
                    })?;
                let handle = self.device.create_shader(desc)?;
                self.shader_cache.insert(key, handle);
                handle
            };
            let desc = self
                .device
                .shader_desc(shader)
                .ok_or(GalError::InvalidHandle)?;
            self.active_shader = Some((shader, desc));
            self.dirty.remove(DirtyFlags::SHADER);
        }

        let (shader, shader_desc) = self.active_shader.clone().ok_or(GalError::InvalidDesc)?;
        let desc = GraphicsPipelineDesc {
            shader,
            vertex_declaration,
            blend_state: self.blend_state,
            depth_stencil_state: self.depth_stencil_state,
            rasterizer_state: self.rasterizer_state,
            topology: self.topology,
            compatibility: self.compatibility.clone(),
        };
        let pipeline = self.device.create_graphics_pipeline(&desc)?;
        self.dirty.remove(DirtyFlags::PIPELINE);
        Ok((pipeline, shader_desc))
    }

    fn flush_constant_storages(&mut self, encoder: &mut RenderCommandEncoder<'_>) {
        for (_, storage) in self.constant_storages.iter_mut() {
            if storage.dirty {
                encoder.update_buffer(
                    storage.buffer,
                    0,
                    &storage.data,
                    crate::gal::descriptors::UpdateMode::Discard,
                );
                storage.dirty = false;
            }
        }
    }

    /// Walks the shader's reflected bindings and binds whatever the caller
    /// supplied — or the matching fallback resource, once-warned.
    fn flush_bindings(
        &mut self,
        encoder: &mut RenderCommandEncoder<'_>,
        shader_desc: &ShaderCreationDesc,
    ) {
        for binding in &shader_desc.bindings {
            let sym = interner::intern(&binding.name);
            match binding.resource_type {
                ShaderResourceType::ConstantBuffer => {
                    let buffer = self
                        .bound_constant_buffers
                        .get(&sym)
                        .copied()
                        .filter(|b| self.device.buffer_desc(*b).is_some())
                        .unwrap_or_else(|| self.device.fallback().constant_buffer());
                    encoder.bind_constant_buffer(binding.set, binding.binding, buffer);
                }
                ShaderResourceType::Sampler => {
                    // Immutable samplers are baked into the layout; only
                    // dynamic sampler slots bind here.
                    if self.device.immutable_sampler(&binding.name).is_some() {
                        continue;
                    }
                    if let Some(sampler) = self.bound_samplers.get(&sym) {
                        encoder.bind_sampler(binding.set, binding.binding, *sampler);
                    }
                }
                ShaderResourceType::Unknown => {}
                _ => {
                    let view = self.bound_views.get(&sym).copied().or_else(|| {
                        self.device.fallback().resource_for(
                            &binding.name,
                            binding.resource_type,
                            binding.texture_type,
                            binding.is_depth,
                        )
                    });
                    if let Some(view) = view {
                        encoder.bind_resource(binding.set, binding.binding, view);
                    }
                }
            }
        }
        self.dirty.remove(DirtyFlags::BINDINGS);
    }

    pub fn shutdown(&mut self) {
        self.instance_data.destroy();
        let device = self.device.clone();
        self.constant_storages.drain_with(|_, storage| {
            device.destroy_buffer(storage.buffer);
        });
    }
}
