//! Descriptor Layouts & Transient Sets
//!
//! Reflected resource bindings drive descriptor-set-layout creation;
//! immutable samplers are baked into the layouts at pipeline creation.
//! Descriptor sets themselves are transient: allocated per draw from a
//! per-frame pool that resets wholesale at frame reuse.

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::gal::shader::{ShaderCreationDesc, ShaderResourceType};

use super::conv;

/// One binding slot after layout assignment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// Index into the baked immutable sampler array, when this slot is one.
    pub immutable_sampler: Option<u32>,
}

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct SetLayoutKey {
    pub bindings: Vec<LayoutBinding>,
}

pub fn descriptor_type(resource_type: ShaderResourceType) -> vk::DescriptorType {
    match resource_type {
        ShaderResourceType::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        ShaderResourceType::Texture => vk::DescriptorType::SAMPLED_IMAGE,
        ShaderResourceType::TextureRW => vk::DescriptorType::STORAGE_IMAGE,
        ShaderResourceType::Sampler => vk::DescriptorType::SAMPLER,
        ShaderResourceType::StructuredBuffer
        | ShaderResourceType::ByteAddressBuffer
        | ShaderResourceType::StructuredBufferRW
        | ShaderResourceType::ByteAddressBufferRW => vk::DescriptorType::STORAGE_BUFFER,
        ShaderResourceType::Unknown => vk::DescriptorType::SAMPLED_IMAGE,
    }
}

/// Set layouts and pipeline layouts, cached by structural key.
pub struct DescriptorLayoutCache {
    set_layouts: Mutex<FxHashMap<SetLayoutKey, vk::DescriptorSetLayout>>,
    pipeline_layouts: Mutex<FxHashMap<Vec<vk::DescriptorSetLayout>, vk::PipelineLayout>>,
    /// Baked immutable samplers, indexed by `LayoutBinding::immutable_sampler`.
    immutable_samplers: Vec<vk::Sampler>,
    immutable_by_name: FxHashMap<String, u32>,
}

impl DescriptorLayoutCache {
    #[must_use]
    pub fn new(immutable: Vec<(String, vk::Sampler)>) -> Self {
        let mut immutable_samplers = Vec::with_capacity(immutable.len());
        let mut immutable_by_name = FxHashMap::default();
        for (name, sampler) in immutable {
            immutable_by_name.insert(name, immutable_samplers.len() as u32);
            immutable_samplers.push(sampler);
        }
        Self {
            set_layouts: Mutex::new(FxHashMap::default()),
            pipeline_layouts: Mutex::new(FxHashMap::default()),
            immutable_samplers,
            immutable_by_name,
        }
    }

    /// Builds the per-set layout keys for a shader's reflected bindings.
    /// Sampler slots whose name matches a registered immutable sampler are
    /// baked in.
    #[must_use]
    pub fn layout_keys_for_shader(&self, shader: &ShaderCreationDesc) -> Vec<SetLayoutKey> {
        let max_set = shader
            .bindings
            .iter()
            .map(|b| b.set as usize)
            .max()
            .map_or(0, |s| s + 1);
        let mut keys = vec![SetLayoutKey::default(); max_set];

        for binding in &shader.bindings {
            let immutable_sampler = (binding.resource_type == ShaderResourceType::Sampler)
                .then(|| self.immutable_by_name.get(&binding.name).copied())
                .flatten();
            keys[binding.set as usize].bindings.push(LayoutBinding {
                binding: u32::from(binding.binding),
                descriptor_type: descriptor_type(binding.resource_type),
                count: if binding.is_array {
                    u32::from(binding.array_size.max(1))
                } else {
                    1
                },
                stages: conv::stage_mask(binding.stages),
                immutable_sampler,
            });
        }
        for key in &mut keys {
            key.bindings.sort_by_key(|b| b.binding);
        }
        keys
    }

    pub fn set_layout(&self, device: &ash::Device, key: &SetLayoutKey) -> vk::DescriptorSetLayout {
        if let Some(&layout) = self.set_layouts.lock().get(key) {
            return layout;
        }

        // Immutable sampler arrays must outlive the create call.
        let sampler_refs: Vec<[vk::Sampler; 1]> = key
            .bindings
            .iter()
            .map(|b| {
                [b.immutable_sampler
                    .map_or(vk::Sampler::null(), |i| self.immutable_samplers[i as usize])]
            })
            .collect();

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = key
            .bindings
            .iter()
            .zip(&sampler_refs)
            .map(|(b, samplers)| {
                let mut binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages);
                if b.immutable_sampler.is_some() {
                    binding = binding.immutable_samplers(samplers);
                }
                binding
            })
            .collect();

        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe {
            device
                .create_descriptor_set_layout(&info, None)
                .expect("set layout creation")
        };
        self.set_layouts.lock().insert(key.clone(), layout);
        layout
    }

    pub fn pipeline_layout(
        &self,
        device: &ash::Device,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> vk::PipelineLayout {
        if let Some(&layout) = self.pipeline_layouts.lock().get(set_layouts) {
            return layout;
        }
        let info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        let layout = unsafe {
            device
                .create_pipeline_layout(&info, None)
                .expect("pipeline layout creation")
        };
        self.pipeline_layouts
            .lock()
            .insert(set_layouts.to_vec(), layout);
        layout
    }

    pub fn shutdown(&self, device: &ash::Device) {
        for (_, layout) in self.pipeline_layouts.lock().drain() {
            unsafe { device.destroy_pipeline_layout(layout, None) };
        }
        for (_, layout) in self.set_layouts.lock().drain() {
            unsafe { device.destroy_descriptor_set_layout(layout, None) };
        }
        for sampler in &self.immutable_samplers {
            unsafe { device.destroy_sampler(*sampler, None) };
        }
    }
}

/// Grow-only descriptor pool, reset once per frame slot reuse.
pub struct TransientDescriptorPool {
    pools: Vec<vk::DescriptorPool>,
    active: usize,
}

impl TransientDescriptorPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Vec::new(),
            active: 0,
        }
    }

    fn create_pool(device: &ash::Device) -> vk::DescriptorPool {
        const SETS_PER_POOL: u32 = 1024;
        let sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(SETS_PER_POOL),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(SETS_PER_POOL),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(2 * SETS_PER_POOL),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(SETS_PER_POOL / 4),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLER)
                .descriptor_count(SETS_PER_POOL / 4),
        ];
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(SETS_PER_POOL)
            .pool_sizes(&sizes);
        unsafe {
            device
                .create_descriptor_pool(&info, None)
                .expect("descriptor pool creation")
        }
    }

    pub fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> vk::DescriptorSet {
        loop {
            if self.active == self.pools.len() {
                self.pools.push(Self::create_pool(device));
            }
            let pool = self.pools[self.active];
            let layouts = [layout];
            let info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts);
            match unsafe { device.allocate_descriptor_sets(&info) } {
                Ok(sets) => return sets[0],
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                    self.active += 1;
                }
                Err(e) => panic!("descriptor set allocation failed: {e}"),
            }
        }
    }

    /// Recycles every pool for a new frame.
    pub fn reset(&mut self, device: &ash::Device) {
        for pool in &self.pools {
            unsafe {
                device
                    .reset_descriptor_pool(*pool, vk::DescriptorPoolResetFlags::empty())
                    .expect("descriptor pool reset");
            }
        }
        self.active = 0;
    }

    pub fn shutdown(&mut self, device: &ash::Device) {
        for pool in self.pools.drain(..) {
            unsafe { device.destroy_descriptor_pool(pool, None) };
        }
    }
}

impl Default for TransientDescriptorPool {
    fn default() -> Self {
        Self::new()
    }
}
