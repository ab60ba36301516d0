//! Device Memory
//!
//! Thin wrapper over `gpu-allocator`. Every image and buffer allocation in
//! the backend flows through here so out-of-memory maps onto
//! [`GalError::OutOfDeviceMemory`] uniformly.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use parking_lot::Mutex;

use crate::gal::error::{GalError, GalResult};

pub struct DeviceMemory {
    allocator: Mutex<Option<Allocator>>,
}

impl DeviceMemory {
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> GalResult<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|_| GalError::OutOfDeviceMemory)?;
        Ok(Self {
            allocator: Mutex::new(Some(allocator)),
        })
    }

    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
    ) -> GalResult<Allocation> {
        self.allocator
            .lock()
            .as_mut()
            .expect("allocator alive")
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: location != MemoryLocation::GpuOnly || requirements.alignment <= 256,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                log::error!("device allocation '{name}' failed: {e}");
                GalError::OutOfDeviceMemory
            })
    }

    pub fn allocate_image(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
    ) -> GalResult<Allocation> {
        self.allocator
            .lock()
            .as_mut()
            .expect("allocator alive")
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                log::error!("image allocation '{name}' failed: {e}");
                GalError::OutOfDeviceMemory
            })
    }

    pub fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            let _ = allocator.free(allocation);
        }
    }

    /// Drops the allocator. Must run before the logical device is destroyed.
    pub fn shutdown(&self) {
        self.allocator.lock().take();
    }
}
