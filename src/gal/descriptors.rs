//! Creation Descriptors & Pipeline States
//!
//! Plain-data descriptions for every resource the device can create. All of
//! them hash; descriptor hashes key the transient resource pool, the state
//! dedup tables, and the pipeline cache.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::format::ResourceFormat;
use super::handles::{BufferHandle, TextureHandle};

// ─── Textures ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TextureType {
    #[default]
    Texture2D = 0,
    Texture2DArray,
    TextureCube,
    Texture3D,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SampleCount {
    #[default]
    None = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
    pub struct TextureUsage: u16 {
        const SHADER_RESOURCE    = 1 << 0;
        const RENDER_TARGET      = 1 << 1;
        const DEPTH_STENCIL      = 1 << 2;
        const UNORDERED_ACCESS   = 1 << 3;
        const TRANSFER_SOURCE    = 1 << 4;
        const TRANSFER_DEST      = 1 << 5;
    }
}

/// Texture creation description. Connections in the render pipeline graph
/// carry one of these, and the resource pool keys its free lists by its hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct TextureCreationDesc {
    pub texture_type: TextureType,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub format: ResourceFormat,
    pub samples: SampleCount,
    pub usage: TextureUsage,
}

impl Default for TextureCreationDesc {
    fn default() -> Self {
        Self {
            texture_type: TextureType::Texture2D,
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_size: 1,
            format: ResourceFormat::Rgba8Unorm,
            samples: SampleCount::None,
            usage: TextureUsage::SHADER_RESOURCE,
        }
    }
}

impl TextureCreationDesc {
    /// A 2D render target without a mip chain.
    #[must_use]
    pub fn render_target(width: u32, height: u32, format: ResourceFormat) -> Self {
        let usage = if format.has_depth() {
            TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE
        } else {
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE
        };
        Self {
            width,
            height,
            format,
            usage,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return false;
        }
        if self.mip_levels == 0 || self.array_size == 0 {
            return false;
        }
        if self.texture_type != TextureType::Texture3D && self.depth != 1 {
            return false;
        }
        if self.texture_type == TextureType::TextureCube && self.array_size % 6 != 0 {
            return false;
        }
        let max_dim = self.width.max(self.height).max(self.depth);
        self.mip_levels <= 32 - max_dim.leading_zeros()
    }

    /// Total byte size over all mips and layers (uncompressed formats).
    #[must_use]
    pub fn memory_size(&self) -> u64 {
        let bpp = u64::from(self.format.bytes_per_pixel());
        let mut total = 0u64;
        let mut w = u64::from(self.width);
        let mut h = u64::from(self.height);
        let mut d = u64::from(self.depth);
        for _ in 0..self.mip_levels {
            total += w * h * d * bpp;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            d = (d / 2).max(1);
        }
        total * u64::from(self.array_size) * self.samples as u64
    }

    /// Stable hash used as pool / cache key.
    #[must_use]
    pub fn calculate_hash(&self) -> u64 {
        let mut bytes = [0u8; 28];
        bytes[0] = self.texture_type as u8;
        bytes[1] = self.samples as u8;
        bytes[2..4].copy_from_slice(&self.usage.bits().to_le_bytes());
        bytes[4..8].copy_from_slice(&self.width.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.height.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.depth.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.mip_levels.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.array_size.to_le_bytes());
        bytes[24..28].copy_from_slice(&(self.format as u32).to_le_bytes());
        xxhash_rust::xxh3::xxh3_64(&bytes)
    }
}

// ─── Buffers ──────────────────────────────────────────────────────────────────

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
    pub struct BufferUsage: u16 {
        const VERTEX_BUFFER      = 1 << 0;
        const INDEX_BUFFER       = 1 << 1;
        const CONSTANT_BUFFER    = 1 << 2;
        const STRUCTURED_BUFFER  = 1 << 3;
        const BYTE_ADDRESS       = 1 << 4;
        const SHADER_RESOURCE    = 1 << 5;
        const UNORDERED_ACCESS   = 1 << 6;
        const TRANSFER_SOURCE    = 1 << 7;
        const TRANSFER_DEST      = 1 << 8;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct BufferCreationDesc {
    pub total_size: u32,
    /// Element stride for structured buffers; 0 otherwise.
    pub struct_size: u32,
    pub usage: BufferUsage,
    /// Immutable buffers must be created with initial data and are never
    /// updated afterwards.
    pub immutable: bool,
}

impl BufferCreationDesc {
    #[must_use]
    pub fn structured(element_count: u32, struct_size: u32) -> Self {
        Self {
            total_size: element_count * struct_size,
            struct_size,
            usage: BufferUsage::STRUCTURED_BUFFER | BufferUsage::SHADER_RESOURCE,
            immutable: false,
        }
    }

    #[must_use]
    pub fn constant(size: u32) -> Self {
        Self {
            total_size: size,
            struct_size: 0,
            usage: BufferUsage::CONSTANT_BUFFER,
            immutable: false,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.total_size == 0 {
            return false;
        }
        if self.usage.contains(BufferUsage::STRUCTURED_BUFFER)
            && (self.struct_size == 0 || self.total_size % self.struct_size != 0)
        {
            return false;
        }
        !self.usage.is_empty()
    }

    #[must_use]
    pub fn calculate_hash(&self) -> u64 {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&self.total_size.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.struct_size.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.usage.bits().to_le_bytes());
        bytes[10] = u8::from(self.immutable);
        xxhash_rust::xxh3::xxh3_64(&bytes)
    }
}

// ─── Samplers ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FilterMode {
    #[default]
    Linear = 0,
    Nearest,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum AddressMode {
    #[default]
    Repeat = 0,
    ClampToEdge,
    MirrorRepeat,
    ClampToBorder,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompareFunc {
    #[default]
    Never = 0,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct SamplerStateDesc {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    /// `None` disables comparison sampling.
    pub compare: Option<CompareFunc>,
    pub max_anisotropy: u8,
}

impl Default for SamplerStateDesc {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            compare: None,
            max_anisotropy: 1,
        }
    }
}

// ─── Fixed-function states ────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlendFactor {
    #[default]
    One = 0,
    Zero,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstColor,
    InvDstColor,
    DstAlpha,
    InvDstAlpha,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlendOp {
    #[default]
    Add = 0,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct RenderTargetBlend {
    pub blend_enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: u8,
}

impl Default for RenderTargetBlend {
    fn default() -> Self {
        Self {
            blend_enabled: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: 0xF,
        }
    }
}

impl RenderTargetBlend {
    /// Standard premultiplied alpha blending.
    #[must_use]
    pub fn alpha_blended() -> Self {
        Self {
            blend_enabled: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::InvSrcAlpha,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::InvSrcAlpha,
            alpha_op: BlendOp::Add,
            write_mask: 0xF,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct BlendStateDesc {
    pub targets: [RenderTargetBlend; 8],
    pub alpha_to_coverage: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DepthStencilStateDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunc,
    pub stencil_enabled: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
}

impl Default for DepthStencilStateDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            // Reverse-Z.
            depth_compare: CompareFunc::GreaterEqual,
            stencil_enabled: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
        }
    }
}

impl DepthStencilStateDesc {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn read_only() -> Self {
        Self {
            depth_write: false,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CullMode {
    #[default]
    Back = 0,
    Front,
    None,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct RasterizerStateDesc {
    pub cull_mode: CullMode,
    pub wireframe: bool,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub scissor_test: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PrimitiveTopology {
    #[default]
    Triangles = 0,
    TriangleStrip,
    Lines,
    Points,
}

// ─── Rendering setup ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum LoadOp {
    #[default]
    Load = 0,
    Clear,
    DontCare,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum StoreOp {
    #[default]
    Store = 0,
    DontCare,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ColorAttachment {
    pub texture: TextureHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_color: [f32; 4],
}

impl ColorAttachment {
    #[must_use]
    pub fn clear(texture: TextureHandle, clear_color: [f32; 4]) -> Self {
        Self {
            texture,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_color,
        }
    }

    #[must_use]
    pub fn load(texture: TextureHandle) -> Self {
        Self {
            texture,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear_color: [0.0; 4],
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct DepthAttachment {
    pub texture: TextureHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u8,
}

impl DepthAttachment {
    #[must_use]
    pub fn clear(texture: TextureHandle, clear_depth: f32) -> Self {
        Self {
            texture,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_depth,
            clear_stencil: 0,
        }
    }

    #[must_use]
    pub fn load(texture: TextureHandle) -> Self {
        Self {
            texture,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear_depth: 0.0,
            clear_stencil: 0,
        }
    }
}

/// Everything `begin_rendering` needs: attachments, ops, and the render area.
#[derive(Clone, Default, Debug)]
pub struct RenderingSetup {
    pub color_attachments: smallvec::SmallVec<[ColorAttachment; 4]>,
    pub depth_attachment: Option<DepthAttachment>,
    /// `(x, y, width, height)`; zero extent means full target.
    pub render_area: (u32, u32, u32, u32),
}

impl RenderingSetup {
    #[must_use]
    pub fn color_count(&self) -> usize {
        self.color_attachments.len()
    }
}

/// Buffer update semantics for dynamic data.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UpdateMode {
    /// Orphan the previous contents; the whole buffer may be rewritten.
    Discard,
    /// The range is guaranteed untouched by in-flight GPU work.
    NoOverwrite,
    /// Stage through temp storage and copy on the GPU timeline.
    CopyToTempStorage,
}

/// Initial data for texture creation, one entry per (layer, mip).
pub struct TextureInitData<'a> {
    pub subresources: &'a [&'a [u8]],
}

/// Region for image copies.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextureSubresource {
    pub mip_level: u32,
    pub array_layer: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferRange {
    pub buffer: BufferHandle,
    pub offset: u32,
    pub size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_desc_validation() {
        let mut desc = TextureCreationDesc::render_target(1024, 512, ResourceFormat::Rgba8Unorm);
        assert!(desc.is_valid());

        desc.mip_levels = 11; // log2(1024) + 1 is the max
        assert!(desc.is_valid());
        desc.mip_levels = 12;
        assert!(!desc.is_valid());

        desc.mip_levels = 1;
        desc.width = 0;
        assert!(!desc.is_valid());
    }

    #[test]
    fn texture_desc_hash_discriminates() {
        let a = TextureCreationDesc::render_target(256, 256, ResourceFormat::Rgba8Unorm);
        let mut b = a;
        b.format = ResourceFormat::Rgba16Float;
        assert_ne!(a.calculate_hash(), b.calculate_hash());
        assert_eq!(a.calculate_hash(), a.calculate_hash());
    }

    #[test]
    fn structured_buffer_must_divide() {
        let good = BufferCreationDesc::structured(100, 64);
        assert!(good.is_valid());

        let bad = BufferCreationDesc {
            total_size: 100,
            struct_size: 64,
            usage: BufferUsage::STRUCTURED_BUFFER,
            immutable: false,
        };
        assert!(!bad.is_valid());
    }

    #[test]
    fn memory_size_includes_mips() {
        let desc = TextureCreationDesc {
            width: 4,
            height: 4,
            mip_levels: 3,
            format: ResourceFormat::Rgba8Unorm,
            ..Default::default()
        };
        // 4x4 + 2x2 + 1x1 = 21 texels * 4 bytes
        assert_eq!(desc.memory_size(), 84);
    }
}
