//! Vulkan Resources
//!
//! Backend-side objects, stored in dense tables indexed by the frontend
//! handle index. Images track their current layout so command recording can
//! insert the right transitions.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::Allocation;

use crate::gal::descriptors::{BufferCreationDesc, TextureCreationDesc};

pub struct VkTexture {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub desc: TextureCreationDesc,
    pub current_layout: vk::ImageLayout,
    /// Swap-chain images are owned by the swap chain, not the allocator.
    pub owned: bool,
}

pub struct VkBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub desc: BufferCreationDesc,
    pub location: MemoryLocation,
}

impl VkBuffer {
    /// Host-visible mapping, present for CpuToGpu buffers.
    #[must_use]
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr().cast())
    }
}

pub struct VkShaderModules {
    pub modules: Vec<(crate::gal::shader::ShaderStage, vk::ShaderModule)>,
    pub desc: std::sync::Arc<crate::gal::shader::ShaderCreationDesc>,
}

pub struct VkImageView {
    pub view: vk::ImageView,
    pub texture_index: u32,
}

pub struct VkBufferView {
    pub buffer_index: u32,
    pub offset: u32,
    pub size: u32,
}

/// Dense backend table; `None` slots are free.
pub struct VkTable<T> {
    entries: Vec<Option<T>>,
}

impl<T> VkTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn set(&mut self, index: u32, value: T) {
        let index = index as usize;
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = Some(value);
    }

    #[must_use]
    pub fn get(&self, index: u32) -> Option<&T> {
        self.entries.get(index as usize).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut T> {
        self.entries.get_mut(index as usize).and_then(Option::as_mut)
    }

    pub fn take(&mut self, index: u32) -> Option<T> {
        self.entries.get_mut(index as usize).and_then(Option::take)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.iter_mut().filter_map(Option::take)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().filter_map(Option::as_mut)
    }
}

impl<T> Default for VkTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
