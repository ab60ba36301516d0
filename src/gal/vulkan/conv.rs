//! GAL → Vulkan enum translation.

use ash::vk;

use crate::gal::descriptors::{
    AddressMode, BlendFactor, BlendOp, CompareFunc, CullMode, FilterMode, LoadOp,
    PrimitiveTopology, SampleCount, StoreOp, TextureType,
};
use crate::gal::format::ResourceFormat;
use crate::gal::pipeline::IndexFormat;
use crate::gal::shader::{ShaderStage, ShaderStageMask, VertexInputFormat};

pub fn format(format: ResourceFormat) -> vk::Format {
    match format {
        ResourceFormat::Unknown => vk::Format::UNDEFINED,
        ResourceFormat::R8Unorm => vk::Format::R8_UNORM,
        ResourceFormat::R8Uint => vk::Format::R8_UINT,
        ResourceFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
        ResourceFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        ResourceFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        ResourceFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        ResourceFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        ResourceFormat::Rgba8Uint => vk::Format::R8G8B8A8_UINT,
        ResourceFormat::R16Float => vk::Format::R16_SFLOAT,
        ResourceFormat::R16Uint => vk::Format::R16_UINT,
        ResourceFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        ResourceFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        ResourceFormat::R32Float => vk::Format::R32_SFLOAT,
        ResourceFormat::R32Uint => vk::Format::R32_UINT,
        ResourceFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
        ResourceFormat::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
        ResourceFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        ResourceFormat::Rgba32Uint => vk::Format::R32G32B32A32_UINT,
        ResourceFormat::Rgb10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        ResourceFormat::Rg11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        ResourceFormat::D16Unorm => vk::Format::D16_UNORM,
        ResourceFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        ResourceFormat::D32Float => vk::Format::D32_SFLOAT,
        ResourceFormat::D32FloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

pub fn aspect_mask(format: ResourceFormat) -> vk::ImageAspectFlags {
    if format.has_depth() {
        if format.has_stencil() {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn image_type(texture_type: TextureType) -> vk::ImageType {
    match texture_type {
        TextureType::Texture3D => vk::ImageType::TYPE_3D,
        _ => vk::ImageType::TYPE_2D,
    }
}

pub fn image_view_type(texture_type: TextureType) -> vk::ImageViewType {
    match texture_type {
        TextureType::Texture2D => vk::ImageViewType::TYPE_2D,
        TextureType::Texture2DArray => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureType::TextureCube => vk::ImageViewType::CUBE,
        TextureType::Texture3D => vk::ImageViewType::TYPE_3D,
    }
}

pub fn sample_count(samples: SampleCount) -> vk::SampleCountFlags {
    match samples {
        SampleCount::None => vk::SampleCountFlags::TYPE_1,
        SampleCount::X2 => vk::SampleCountFlags::TYPE_2,
        SampleCount::X4 => vk::SampleCountFlags::TYPE_4,
        SampleCount::X8 => vk::SampleCountFlags::TYPE_8,
    }
}

pub fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn filter(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Linear => vk::Filter::LINEAR,
        FilterMode::Nearest => vk::Filter::NEAREST,
    }
}

pub fn mipmap_mode(mode: FilterMode) -> vk::SamplerMipmapMode {
    match mode {
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
    }
}

pub fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn compare_op(func: CompareFunc) -> vk::CompareOp {
    match func {
        CompareFunc::Never => vk::CompareOp::NEVER,
        CompareFunc::Less => vk::CompareOp::LESS,
        CompareFunc::Equal => vk::CompareOp::EQUAL,
        CompareFunc::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunc::Greater => vk::CompareOp::GREATER,
        CompareFunc::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareFunc::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunc::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::InvDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::InvDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub fn blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::None => vk::CullModeFlags::NONE,
    }
}

pub fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::Lines => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::Points => vk::PrimitiveTopology::POINT_LIST,
    }
}

pub fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

pub fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub fn stage_mask(mask: ShaderStageMask) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if mask.contains(ShaderStageMask::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if mask.contains(ShaderStageMask::GEOMETRY) {
        flags |= vk::ShaderStageFlags::GEOMETRY;
    }
    if mask.contains(ShaderStageMask::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if mask.contains(ShaderStageMask::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

pub fn vertex_format(format: VertexInputFormat) -> vk::Format {
    match format {
        VertexInputFormat::Float => vk::Format::R32_SFLOAT,
        VertexInputFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexInputFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexInputFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexInputFormat::UByte4 => vk::Format::R8G8B8A8_UINT,
        VertexInputFormat::UByte4Norm => vk::Format::R8G8B8A8_UNORM,
        VertexInputFormat::Half2 => vk::Format::R16G16_SFLOAT,
        VertexInputFormat::Half4 => vk::Format::R16G16B16A16_SFLOAT,
        VertexInputFormat::UInt => vk::Format::R32_UINT,
    }
}

pub fn texture_usage(
    usage: crate::gal::descriptors::TextureUsage,
    format: ResourceFormat,
) -> vk::ImageUsageFlags {
    use crate::gal::descriptors::TextureUsage as U;
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(U::SHADER_RESOURCE) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(U::RENDER_TARGET) && !format.has_depth() {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(U::DEPTH_STENCIL) || (usage.contains(U::RENDER_TARGET) && format.has_depth())
    {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(U::UNORDERED_ACCESS) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(U::TRANSFER_SOURCE) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(U::TRANSFER_DEST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    // Uploads always go through a staging copy.
    flags | vk::ImageUsageFlags::TRANSFER_DST
}

pub fn buffer_usage(usage: crate::gal::descriptors::BufferUsage) -> vk::BufferUsageFlags {
    use crate::gal::descriptors::BufferUsage as U;
    let mut flags = vk::BufferUsageFlags::TRANSFER_DST;
    if usage.contains(U::VERTEX_BUFFER) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(U::INDEX_BUFFER) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(U::CONSTANT_BUFFER) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(U::STRUCTURED_BUFFER) | usage.contains(U::BYTE_ADDRESS) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(U::UNORDERED_ACCESS) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(U::TRANSFER_SOURCE) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    flags
}
