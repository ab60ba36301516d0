//! Vulkan Device Core
//!
//! Instance/device bring-up, queue ownership, frame-slot synchronization,
//! and the immediate-submit path used for resource uploads. The higher-level
//! backend trait implementation lives in the module root and drives this.

use std::ffi::CStr;

use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::gal::descriptors::{BufferCreationDesc, TextureCreationDesc, TextureInitData};
use crate::gal::device::DeviceConfig;
use crate::gal::error::{GalError, GalResult};
use crate::gal::format::ResourceFormat;

use super::conv;
use super::descriptors::{DescriptorLayoutCache, TransientDescriptorPool};
use super::image_copy::ImageCopyVulkan;
use super::memory::DeviceMemory;
use super::pipelines::VkPipeline;
use super::query_pool::QueryPools;
use super::renderpass_cache::RenderPassCache;
use super::resources::{VkBuffer, VkBufferView, VkImageView, VkTable, VkTexture};
use super::swapchain::{SwapChainSupport, VkSwapChain};

pub(super) struct VkTables {
    pub textures: VkTable<VkTexture>,
    pub buffers: VkTable<VkBuffer>,
    pub samplers: VkTable<vk::Sampler>,
    pub texture_views: VkTable<VkImageView>,
    pub buffer_views: VkTable<VkBufferView>,
    pub texture_uavs: VkTable<VkImageView>,
    pub buffer_uavs: VkTable<VkBufferView>,
    pub pipelines: VkTable<std::sync::Arc<VkPipeline>>,
    pub swap_chains: VkTable<VkSwapChain>,
}

pub(super) struct FrameSlot {
    pub fence: vk::Fence,
    pub fence_in_flight: bool,
    pub command_pool: vk::CommandPool,
    pub free_buffers: Vec<vk::CommandBuffer>,
    pub used_buffers: Vec<vk::CommandBuffer>,
    pub descriptors: TransientDescriptorPool,
    pub retired_staging: Vec<(vk::Buffer, gpu_allocator::vulkan::Allocation)>,
}

pub(super) struct FrameSync {
    pub slots: Vec<FrameSlot>,
    pub current: usize,
    pub frame_index: u64,
    /// Swap chains acquired this frame; their semaphores join the submit.
    pub acquired: Vec<u32>,
}

pub(super) struct VkShared {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    /// Queue access requires external synchronization.
    pub submit_lock: Mutex<()>,
    pub memory: DeviceMemory,
    pub tables: Mutex<VkTables>,
    pub frames: Mutex<FrameSync>,
    pub layouts: DescriptorLayoutCache,
    pub render_passes: RenderPassCache,
    pub queries: QueryPools,
    pub pipeline_cache: vk::PipelineCache,
    pub image_copy: ImageCopyVulkan,
    pub swapchain_support: SwapChainSupport,
    pub upload_pool: Mutex<vk::CommandPool>,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = unsafe {
        let p_message = (*data).p_message;
        if p_message.is_null() {
            std::borrow::Cow::Borrowed("<no message>")
        } else {
            CStr::from_ptr(p_message).to_string_lossy()
        }
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan] {message}");
    } else {
        log::debug!("[vulkan] {message}");
    }
    vk::FALSE
}

impl VkShared {
    pub fn create(config: &DeviceConfig) -> GalResult<Self> {
        let entry = unsafe { ash::Entry::load().map_err(|_| GalError::DeviceLost)? };

        // ── Instance ───────────────────────────────────────────────────────
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"arclight")
            .engine_name(c"arclight")
            .api_version(vk::API_VERSION_1_2);

        let mut extensions: Vec<*const i8> = vec![
            ash::khr::surface::NAME.as_ptr(),
            #[cfg(target_os = "linux")]
            ash::khr::xlib_surface::NAME.as_ptr(),
            #[cfg(target_os = "linux")]
            ash::khr::wayland_surface::NAME.as_ptr(),
            #[cfg(target_os = "windows")]
            ash::khr::win32_surface::NAME.as_ptr(),
        ];
        let mut layers: Vec<*const i8> = Vec::new();
        if config.validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
        }
        if config.renderdoc {
            // The capture layer is injected externally; nothing to enable
            // here beyond keeping the instance capture-friendly.
            log::info!("renderdoc capture hooks requested");
        }

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        let instance = unsafe {
            entry
                .create_instance(&instance_info, None)
                .map_err(|_| GalError::DeviceLost)?
        };

        let debug_messenger = if config.validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = unsafe {
                loader
                    .create_debug_utils_messenger(&info, None)
                    .map_err(|_| GalError::DeviceLost)?
            };
            Some((loader, messenger))
        } else {
            None
        };

        // ── Physical device & queue family ─────────────────────────────────
        let physical_devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(|_| GalError::DeviceLost)?
        };
        let (physical_device, queue_family) = physical_devices
            .iter()
            .find_map(|&pd| {
                let families =
                    unsafe { instance.get_physical_device_queue_family_properties(pd) };
                families.iter().enumerate().find_map(|(i, f)| {
                    f.queue_flags
                        .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                        .then_some((pd, i as u32))
                })
            })
            .ok_or(GalError::DeviceLost)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let timestamp_period = properties.limits.timestamp_period;
        let family_props =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let timestamp_valid_bits = family_props[queue_family as usize].timestamp_valid_bits;

        // ── Logical device ─────────────────────────────────────────────────
        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities);
        let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default()
            .fill_mode_non_solid(true)
            .sampler_anisotropy(true);
        // Host query reset keeps timestamp pools recyclable off the GPU
        // timeline.
        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default().host_query_reset(true);
        let queue_infos = [queue_info];
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features)
            .push_next(&mut vulkan12);
        let device = unsafe {
            instance
                .create_device(physical_device, &device_info, None)
                .map_err(|_| GalError::DeviceLost)?
        };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let memory = DeviceMemory::new(&instance, &device, physical_device)?;

        // ── Immutable samplers for the layout cache ────────────────────────
        let immutable: Vec<(String, vk::Sampler)> =
            crate::gal::samplers::registered_immutable_samplers()
                .into_iter()
                .map(|(sym, desc)| {
                    let name = crate::core::interner::resolve(sym).into_owned();
                    let sampler = create_vk_sampler(&device, &desc);
                    (name, sampler)
                })
                .collect();
        let layouts = DescriptorLayoutCache::new(immutable);

        // ── Frame slots ────────────────────────────────────────────────────
        let inflight = config.frames_in_flight.max(2) as usize;
        let mut slots = Vec::with_capacity(inflight);
        for _ in 0..inflight {
            let fence = unsafe {
                device
                    .create_fence(&vk::FenceCreateInfo::default(), None)
                    .map_err(|_| GalError::OutOfDeviceMemory)?
            };
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            let command_pool = unsafe {
                device
                    .create_command_pool(&pool_info, None)
                    .map_err(|_| GalError::OutOfDeviceMemory)?
            };
            slots.push(FrameSlot {
                fence,
                fence_in_flight: false,
                command_pool,
                free_buffers: Vec::new(),
                used_buffers: Vec::new(),
                descriptors: TransientDescriptorPool::new(),
                retired_staging: Vec::new(),
            });
        }

        let upload_pool = {
            let info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            unsafe {
                device
                    .create_command_pool(&info, None)
                    .map_err(|_| GalError::OutOfDeviceMemory)?
            }
        };

        let mut queries = QueryPools::new(&device, timestamp_period, timestamp_valid_bits);
        queries.calibrate(&device, queue, upload_pool);

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let pipeline_cache = super::pipelines::create_pipeline_cache(&device);

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            physical_device,
            device,
            queue,
            queue_family,
            submit_lock: Mutex::new(()),
            memory,
            tables: Mutex::new(VkTables {
                textures: VkTable::new(),
                buffers: VkTable::new(),
                samplers: VkTable::new(),
                texture_views: VkTable::new(),
                buffer_views: VkTable::new(),
                texture_uavs: VkTable::new(),
                buffer_uavs: VkTable::new(),
                pipelines: VkTable::new(),
                swap_chains: VkTable::new(),
            }),
            frames: Mutex::new(FrameSync {
                slots,
                current: 0,
                frame_index: 0,
                acquired: Vec::new(),
            }),
            layouts,
            render_passes: RenderPassCache::new(),
            queries,
            pipeline_cache,
            image_copy: ImageCopyVulkan::new(),
            swapchain_support: SwapChainSupport {
                surface_loader: Some(surface_loader),
                swapchain_loader: Some(swapchain_loader),
            },
            upload_pool: Mutex::new(upload_pool),
        })
    }

    /// Records and submits a one-shot command buffer, waiting for completion.
    /// Used by resource uploads; never on the frame path.
    pub fn immediate_submit(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) {
        unsafe {
            let pool = *self.upload_pool.lock();
            let alloc = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let cb = self
                .device
                .allocate_command_buffers(&alloc)
                .expect("upload command buffer")[0];
            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.begin_command_buffer(cb, &begin).unwrap();
            record(&self.device, cb);
            self.device.end_command_buffer(cb).unwrap();

            let buffers = [cb];
            let submit = vk::SubmitInfo::default().command_buffers(&buffers);
            {
                let _guard = self.submit_lock.lock();
                self.device
                    .queue_submit(self.queue, &[submit], vk::Fence::null())
                    .expect("upload submit");
                self.device.queue_wait_idle(self.queue).expect("upload wait");
            }
            self.device.free_command_buffers(pool, &buffers);
        }
    }

    /// Image layout transition with conservative stage masks.
    pub fn transition_image(
        device: &ash::Device,
        cb: vk::CommandBuffer,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) {
        if from == to {
            return;
        }
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            );
        unsafe {
            device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    // ── Resource creation ──────────────────────────────────────────────────

    pub fn make_texture(
        &self,
        desc: &TextureCreationDesc,
        init: Option<&TextureInitData<'_>>,
    ) -> GalResult<VkTexture> {
        let mut flags = vk::ImageCreateFlags::empty();
        if desc.texture_type == crate::gal::descriptors::TextureType::TextureCube {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
        let info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(conv::image_type(desc.texture_type))
            .format(conv::format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_size)
            .samples(conv::sample_count(desc.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(conv::texture_usage(desc.usage, desc.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            self.device.create_image(&info, None).map_err(|e| match e {
                vk::Result::ERROR_FORMAT_NOT_SUPPORTED => GalError::UnsupportedFormat,
                _ => GalError::OutOfDeviceMemory,
            })?
        };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.memory.allocate_image("texture", requirements) {
            Ok(a) => a,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(|_| GalError::OutOfDeviceMemory)?;
        }

        let mut texture = VkTexture {
            image,
            allocation: Some(allocation),
            desc: *desc,
            current_layout: vk::ImageLayout::UNDEFINED,
            owned: true,
        };

        if let Some(init) = init {
            self.upload_texture(&mut texture, init)?;
        }
        Ok(texture)
    }

    fn upload_texture(&self, texture: &mut VkTexture, init: &TextureInitData<'_>) -> GalResult<()> {
        let total: usize = init.subresources.iter().map(|s| s.len()).sum();
        let (staging_buffer, staging_alloc) = self.make_staging(total)?;
        if let Some(ptr) = staging_alloc.mapped_ptr() {
            let mut offset = 0usize;
            for sub in init.subresources {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        sub.as_ptr(),
                        ptr.as_ptr().cast::<u8>().add(offset),
                        sub.len(),
                    );
                }
                offset += sub.len();
            }
        }

        let desc = texture.desc;
        let aspect = conv::aspect_mask(desc.format);
        let image = texture.image;
        self.immediate_submit(|device, cb| {
            Self::transition_image(
                device,
                cb,
                image,
                aspect,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            let mut buffer_offset = 0u64;
            let mut regions = Vec::new();
            // One subresource per (layer, mip 0); mips beyond 0 are left to
            // the caller to generate.
            for (layer, sub) in (0..desc.array_size).zip(init.subresources) {
                regions.push(
                    vk::BufferImageCopy::default()
                        .buffer_offset(buffer_offset)
                        .image_subresource(
                            vk::ImageSubresourceLayers::default()
                                .aspect_mask(aspect)
                                .mip_level(0)
                                .base_array_layer(layer)
                                .layer_count(1),
                        )
                        .image_extent(vk::Extent3D {
                            width: desc.width,
                            height: desc.height,
                            depth: desc.depth,
                        }),
                );
                buffer_offset += sub.len() as u64;
            }
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cb,
                    staging_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                );
            }
            Self::transition_image(
                device,
                cb,
                image,
                aspect,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        });
        texture.current_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        unsafe { self.device.destroy_buffer(staging_buffer, None) };
        self.memory.free(staging_alloc);
        Ok(())
    }

    pub fn make_staging(
        &self,
        size: usize,
    ) -> GalResult<(vk::Buffer, gpu_allocator::vulkan::Allocation)> {
        let info = vk::BufferCreateInfo::default()
            .size(size.max(4) as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            self.device
                .create_buffer(&info, None)
                .map_err(|_| GalError::OutOfDeviceMemory)?
        };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = self
            .memory
            .allocate("staging", requirements, MemoryLocation::CpuToGpu)?;
        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|_| GalError::OutOfDeviceMemory)?;
        }
        Ok((buffer, allocation))
    }

    pub fn make_buffer(
        &self,
        desc: &BufferCreationDesc,
        init: Option<&[u8]>,
    ) -> GalResult<VkBuffer> {
        // Immutable buffers live in device memory behind a staging upload;
        // everything else is host-visible so dynamic updates are a memcpy.
        let location = if desc.immutable {
            MemoryLocation::GpuOnly
        } else {
            MemoryLocation::CpuToGpu
        };
        let info = vk::BufferCreateInfo::default()
            .size(u64::from(desc.total_size))
            .usage(conv::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            self.device
                .create_buffer(&info, None)
                .map_err(|_| GalError::OutOfDeviceMemory)?
        };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match self.memory.allocate("buffer", requirements, location) {
            Ok(a) => a,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|_| GalError::OutOfDeviceMemory)?;
        }

        let result = VkBuffer {
            buffer,
            allocation: Some(allocation),
            desc: *desc,
            location,
        };

        if let Some(init) = init {
            if let Some(ptr) = result.mapped_ptr() {
                unsafe {
                    std::ptr::copy_nonoverlapping(init.as_ptr(), ptr, init.len());
                }
            } else {
                let (staging_buffer, staging_alloc) = self.make_staging(init.len())?;
                if let Some(ptr) = staging_alloc.mapped_ptr() {
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            init.as_ptr(),
                            ptr.as_ptr().cast(),
                            init.len(),
                        );
                    }
                }
                let size = init.len() as u64;
                let dst = result.buffer;
                self.immediate_submit(|device, cb| unsafe {
                    device.cmd_copy_buffer(
                        cb,
                        staging_buffer,
                        dst,
                        &[vk::BufferCopy::default().size(size)],
                    );
                });
                unsafe { self.device.destroy_buffer(staging_buffer, None) };
                self.memory.free(staging_alloc);
            }
        }
        Ok(result)
    }

    /// Attachment view for render target binding, created lazily per texture.
    pub fn attachment_view(
        device: &ash::Device,
        texture: &VkTexture,
        format: ResourceFormat,
    ) -> vk::ImageView {
        let info = vk::ImageViewCreateInfo::default()
            .image(texture.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(conv::format(format))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(conv::aspect_mask(format))
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        unsafe {
            device
                .create_image_view(&info, None)
                .expect("attachment view creation")
        }
    }
}

pub(super) fn create_vk_sampler(
    device: &ash::Device,
    desc: &crate::gal::descriptors::SamplerStateDesc,
) -> vk::Sampler {
    let mut info = vk::SamplerCreateInfo::default()
        .min_filter(conv::filter(desc.min_filter))
        .mag_filter(conv::filter(desc.mag_filter))
        .mipmap_mode(conv::mipmap_mode(desc.mip_filter))
        .address_mode_u(conv::address_mode(desc.address_u))
        .address_mode_v(conv::address_mode(desc.address_v))
        .address_mode_w(conv::address_mode(desc.address_w))
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .anisotropy_enable(desc.max_anisotropy > 1)
        .max_anisotropy(f32::from(desc.max_anisotropy));
    if let Some(compare) = desc.compare {
        info = info
            .compare_enable(true)
            .compare_op(conv::compare_op(compare));
    }
    unsafe {
        device
            .create_sampler(&info, None)
            .expect("sampler creation")
    }
}
