//! Swap Chains
//!
//! A swap chain pairs a presentable surface with the backbuffer texture the
//! render pipeline's sink pass binds. Headless swap chains are plain
//! offscreen textures that "present" by retiring the frame.

use super::descriptors::{TextureCreationDesc, TextureUsage};
use super::format::ResourceFormat;
use super::handles::TextureHandle;

/// Opaque window reference handed to the backend. `None` selects a headless
/// (offscreen) swap chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct WindowSurface {
    #[cfg(feature = "vulkan")]
    pub raw_display: Option<raw_window_handle::RawDisplayHandle>,
    #[cfg(feature = "vulkan")]
    pub raw_window: Option<raw_window_handle::RawWindowHandle>,
}

// SAFETY: `WindowSurface` only carries opaque platform handles (raw pointers
// used as identifiers) and never dereferences them; it is safe to move or
// share across threads.
unsafe impl Send for WindowSurface {}
unsafe impl Sync for WindowSurface {}

impl WindowSurface {
    #[must_use]
    pub fn headless() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_headless(&self) -> bool {
        #[cfg(feature = "vulkan")]
        {
            self.raw_window.is_none()
        }
        #[cfg(not(feature = "vulkan"))]
        {
            true
        }
    }
}

#[derive(Clone, Debug)]
pub struct SwapChainCreationDesc {
    pub surface: WindowSurface,
    pub width: u32,
    pub height: u32,
    pub format: ResourceFormat,
    pub vsync: bool,
    /// Frontend-allocated texture id the backbuffer is registered under.
    pub backbuffer_texture: TextureHandle,
}

impl SwapChainCreationDesc {
    /// The descriptor the backbuffer texture is registered with.
    #[must_use]
    pub fn backbuffer_desc(&self) -> TextureCreationDesc {
        TextureCreationDesc {
            width: self.width,
            height: self.height,
            format: self.format,
            usage: TextureUsage::RENDER_TARGET
                | TextureUsage::TRANSFER_SOURCE
                | TextureUsage::SHADER_RESOURCE,
            ..Default::default()
        }
    }
}

/// Frontend-side swap chain record.
#[derive(Clone, Debug)]
pub struct SwapChain {
    pub desc: SwapChainCreationDesc,
    pub backbuffer: TextureHandle,
}
