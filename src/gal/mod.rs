//! Graphics Abstraction Layer
//!
//! A typed handle-based device: textures, buffers, shaders with reflected
//! resource bindings, pipelines, and command encoders, with immutable
//! samplers, timestamp query pools, and deferred resource destruction.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Device (frontend)                                        │
//! │   handle tables · lifetimes · fallbacks · pipeline cache │
//! ├──────────────────────────────────────────────────────────┤
//! │ GalBackend (trait)                                       │
//! │   vulkan (ash, `vulkan` feature)  ·  null (recording)    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Handles are 32-bit `{index, generation}` pairs scoped to the device; a
//! stale handle resolves to nothing and, at bind time, is replaced by a
//! fallback resource with a one-time warning.

pub mod backend;
pub mod descriptors;
pub mod device;
pub mod encoder;
pub mod error;
pub mod fallback;
pub mod format;
pub mod handles;
pub mod null;
pub mod pipeline;
pub mod samplers;
pub mod shader;
pub mod swapchain;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use backend::{PipelineStage, TimestampResult};
pub use descriptors::{
    BlendStateDesc, BufferCreationDesc, BufferUsage, ColorAttachment, DepthAttachment,
    DepthStencilStateDesc, LoadOp, RasterizerStateDesc, RenderingSetup, SampleCount,
    SamplerStateDesc, StoreOp, TextureCreationDesc, TextureType, TextureUsage, UpdateMode,
};
pub use device::{Device, DeviceConfig, DeviceEvent};
pub use encoder::{ComputeCommandEncoder, Pass, RenderCommandEncoder};
pub use error::{GalError, GalResult};
pub use format::ResourceFormat;
pub use handles::{
    BlendStateHandle, BufferHandle, BufferResourceViewHandle, BufferUavHandle,
    DepthStencilStateHandle, PipelineHandle, QueryHandle, RasterizerStateHandle,
    ResourceViewHandle, SamplerStateHandle, ShaderHandle, SwapChainHandle, TextureHandle,
    TextureResourceViewHandle, TextureUavHandle, VertexDeclarationHandle,
};
pub use pipeline::{
    ComputePipelineDesc, GraphicsPipelineDesc, IndexFormat, RenderPassCompatibility,
    VertexAttribute, VertexDeclarationDesc,
};
pub use samplers::{register_default_samplers, register_immutable_sampler};
pub use shader::{
    PermutationSet, ShaderCreationDesc, ShaderPermutationBinary, ShaderPermutationCache,
    ShaderResourceBinding, ShaderResourceType, ShaderStage, ShaderStageMask, ShaderTextureType,
    ShaderVertexInput, VertexInputFormat, VertexSemantic,
};
pub use swapchain::WindowSurface;
