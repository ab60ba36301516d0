//! Resource Formats
//!
//! The format set the engine actually renders with, plus the size/aspect
//! queries the transient allocator and image-copy helper need. Backend
//! translation lives with the backend.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceFormat {
    #[default]
    Unknown = 0,

    // 8-bit
    R8Unorm,
    R8Uint,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba8Uint,

    // 16-bit
    R16Float,
    R16Uint,
    Rg16Float,
    Rgba16Float,

    // 32-bit
    R32Float,
    R32Uint,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    Rgba32Uint,

    // Packed
    Rgb10A2Unorm,
    Rg11B10Float,

    // Depth/stencil
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8Uint,
}

impl ResourceFormat {
    /// Bytes per pixel (uncompressed formats only).
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::R8Unorm | Self::R8Uint => 1,
            Self::Rg8Unorm | Self::R16Float | Self::R16Uint | Self::D16Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgba8Uint
            | Self::Rg16Float
            | Self::R32Float
            | Self::R32Uint
            | Self::Rgb10A2Unorm
            | Self::Rg11B10Float
            | Self::D24UnormS8Uint
            | Self::D32Float => 4,
            Self::Rg32Float | Self::Rgba16Float | Self::D32FloatS8Uint => 8,
            Self::Rgb32Float => 12,
            Self::Rgba32Float | Self::Rgba32Uint => 16,
        }
    }

    #[inline]
    #[must_use]
    pub const fn has_depth(self) -> bool {
        matches!(
            self,
            Self::D16Unorm | Self::D24UnormS8Uint | Self::D32Float | Self::D32FloatS8Uint
        )
    }

    #[inline]
    #[must_use]
    pub const fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32FloatS8Uint)
    }

    #[inline]
    #[must_use]
    pub const fn is_srgb(self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_classification() {
        assert!(ResourceFormat::D32Float.has_depth());
        assert!(!ResourceFormat::D32Float.has_stencil());
        assert!(ResourceFormat::D24UnormS8Uint.has_stencil());
        assert!(!ResourceFormat::Rgba8Unorm.has_depth());
    }

    #[test]
    fn pixel_sizes() {
        assert_eq!(ResourceFormat::Rgba8Unorm.bytes_per_pixel(), 4);
        assert_eq!(ResourceFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert_eq!(ResourceFormat::Rgba32Float.bytes_per_pixel(), 16);
    }
}
