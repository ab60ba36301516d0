//! Vulkan Swap Chains
//!
//! Window surfaces go through `VK_KHR_swapchain`; headless swap chains are
//! plain offscreen images that "present" by doing nothing. Either way the
//! frontend's backbuffer texture id maps to the image the next render pass
//! binds.

use ash::khr;
use ash::vk;

use crate::gal::error::{GalError, GalResult};
use crate::gal::swapchain::SwapChainCreationDesc;

use super::conv;

pub struct VkSwapChain {
    pub surface: vk::SurfaceKHR,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub acquired_index: u32,
    /// Signaled by acquire, waited by the frame submit.
    pub acquire_semaphore: vk::Semaphore,
    /// Signaled by the frame submit, waited by present.
    pub render_finished_semaphore: vk::Semaphore,
    pub backbuffer_texture_index: u32,
    pub headless: bool,
}

pub struct SwapChainSupport {
    pub surface_loader: Option<khr::surface::Instance>,
    pub swapchain_loader: Option<khr::swapchain::Device>,
}

impl SwapChainSupport {
    pub fn create_swap_chain(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        desc: &SwapChainCreationDesc,
    ) -> GalResult<VkSwapChain> {
        let semaphore = |device: &ash::Device| unsafe {
            device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(|_| GalError::OutOfDeviceMemory)
        };

        if desc.surface.is_headless() {
            return Ok(VkSwapChain {
                surface: vk::SurfaceKHR::null(),
                swapchain: vk::SwapchainKHR::null(),
                images: Vec::new(),
                acquired_index: 0,
                acquire_semaphore: vk::Semaphore::null(),
                render_finished_semaphore: vk::Semaphore::null(),
                backbuffer_texture_index: desc.backbuffer_texture.id().index(),
                headless: true,
            });
        }

        #[cfg(feature = "vulkan")]
        {
            let (Some(display), Some(window)) = (desc.surface.raw_display, desc.surface.raw_window)
            else {
                return Err(GalError::InvalidDesc);
            };

            let surface = unsafe {
                ash_window_create_surface(entry, instance, display, window)
                    .map_err(|_| GalError::InvalidDesc)?
            };

            let surface_loader = self.surface_loader.as_ref().ok_or(GalError::InvalidDesc)?;
            let swapchain_loader = self
                .swapchain_loader
                .as_ref()
                .ok_or(GalError::InvalidDesc)?;

            let caps = unsafe {
                surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(|_| GalError::InvalidDesc)?
            };

            let image_count = (caps.min_image_count + 1).min(if caps.max_image_count == 0 {
                u32::MAX
            } else {
                caps.max_image_count
            });

            let info = vk::SwapchainCreateInfoKHR::default()
                .surface(surface)
                .min_image_count(image_count)
                .image_format(conv::format(desc.format))
                .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
                .image_extent(vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                })
                .image_array_layers(1)
                .image_usage(
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                )
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(caps.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(if desc.vsync {
                    vk::PresentModeKHR::FIFO
                } else {
                    vk::PresentModeKHR::IMMEDIATE
                })
                .clipped(true);

            let swapchain = unsafe {
                swapchain_loader
                    .create_swapchain(&info, None)
                    .map_err(|_| GalError::OutOfDeviceMemory)?
            };
            let images = unsafe {
                swapchain_loader
                    .get_swapchain_images(swapchain)
                    .map_err(|_| GalError::OutOfDeviceMemory)?
            };

            Ok(VkSwapChain {
                surface,
                swapchain,
                images,
                acquired_index: 0,
                acquire_semaphore: semaphore(device)?,
                render_finished_semaphore: semaphore(device)?,
                backbuffer_texture_index: desc.backbuffer_texture.id().index(),
                headless: false,
            })
        }
    }

    pub fn acquire(&self, sc: &mut VkSwapChain) -> GalResult<Option<vk::Image>> {
        if sc.headless {
            return Ok(None);
        }
        let loader = self.swapchain_loader.as_ref().ok_or(GalError::InvalidDesc)?;
        let result = unsafe {
            loader.acquire_next_image(
                sc.swapchain,
                u64::MAX,
                sc.acquire_semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, _suboptimal)) => {
                sc.acquired_index = index;
                Ok(Some(sc.images[index as usize]))
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(GalError::DeviceLost),
            Err(_) => Err(GalError::OutOfDeviceMemory),
        }
    }

    pub fn present(&self, queue: vk::Queue, sc: &VkSwapChain) -> GalResult<()> {
        if sc.headless {
            return Ok(());
        }
        let loader = self.swapchain_loader.as_ref().ok_or(GalError::InvalidDesc)?;
        let wait = [sc.render_finished_semaphore];
        let swapchains = [sc.swapchain];
        let indices = [sc.acquired_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { loader.queue_present(queue, &info) } {
            Ok(_) => Ok(()),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(GalError::DeviceLost),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => Ok(()),
            Err(_) => Err(GalError::OutOfDeviceMemory),
        }
    }

    pub fn destroy(&self, device: &ash::Device, entry_surface: &Option<khr::surface::Instance>, sc: VkSwapChain) {
        if sc.headless {
            return;
        }
        unsafe {
            if let Some(loader) = &self.swapchain_loader {
                loader.destroy_swapchain(sc.swapchain, None);
            }
            device.destroy_semaphore(sc.acquire_semaphore, None);
            device.destroy_semaphore(sc.render_finished_semaphore, None);
            if let Some(loader) = entry_surface {
                loader.destroy_surface(sc.surface, None);
            }
        }
    }
}

/// `ash-window`-equivalent surface creation over raw handles.
#[cfg(feature = "vulkan")]
unsafe fn ash_window_create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display: raw_window_handle::RawDisplayHandle,
    window: raw_window_handle::RawWindowHandle,
) -> Result<vk::SurfaceKHR, vk::Result> {
    use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
    unsafe {
        match (display, window) {
            (RawDisplayHandle::Xlib(d), RawWindowHandle::Xlib(w)) => {
                let loader = khr::xlib_surface::Instance::new(entry, instance);
                let info = vk::XlibSurfaceCreateInfoKHR::default()
                    .dpy(d.display.map_or(std::ptr::null_mut(), |p| p.as_ptr()))
                    .window(w.window);
                loader.create_xlib_surface(&info, None)
            }
            (RawDisplayHandle::Wayland(d), RawWindowHandle::Wayland(w)) => {
                let loader = khr::wayland_surface::Instance::new(entry, instance);
                let info = vk::WaylandSurfaceCreateInfoKHR::default()
                    .display(d.display.as_ptr())
                    .surface(w.surface.as_ptr());
                loader.create_wayland_surface(&info, None)
            }
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(w)) => {
                let loader = khr::win32_surface::Instance::new(entry, instance);
                let info = vk::Win32SurfaceCreateInfoKHR::default()
                    .hinstance(w.hinstance.map_or(0, |h| h.get()))
                    .hwnd(w.hwnd.get());
                loader.create_win32_surface(&info, None)
            }
            _ => Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT),
        }
    }
}
