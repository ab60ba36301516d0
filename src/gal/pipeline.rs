//! Pipeline Descriptors
//!
//! Graphics pipelines combine a shader permutation with fixed-function state
//! and a render-pass compatibility description. Creation is cached by
//! descriptor hash, so the render context can resolve pipelines on the fly
//! without redundant backend compilations.

use smallvec::SmallVec;

use super::descriptors::{PrimitiveTopology, SampleCount};
use super::format::ResourceFormat;
use super::handles::{
    BlendStateHandle, DepthStencilStateHandle, RasterizerStateHandle, ShaderHandle,
    VertexDeclarationHandle,
};
use super::shader::{VertexInputFormat, VertexSemantic};

/// One attribute of a vertex declaration, bound by shader `location`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct VertexAttribute {
    pub semantic: VertexSemantic,
    pub format: VertexInputFormat,
    pub location: u8,
    pub buffer_slot: u8,
    pub byte_offset: u32,
    /// Advance per instance instead of per vertex.
    pub per_instance: bool,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct VertexDeclarationDesc {
    pub attributes: SmallVec<[VertexAttribute; 8]>,
    /// Stride per buffer slot; indexed by `VertexAttribute::buffer_slot`.
    pub strides: SmallVec<[u32; 4]>,
}

impl VertexDeclarationDesc {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.attributes
            .iter()
            .all(|a| (a.buffer_slot as usize) < self.strides.len())
    }
}

/// The attachment shape a pipeline is compiled against. Two render passes
/// with the same compatibility may share pipelines.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct RenderPassCompatibility {
    pub color_formats: SmallVec<[ResourceFormat; 8]>,
    pub depth_format: Option<ResourceFormat>,
    pub samples: SampleCount,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct GraphicsPipelineDesc {
    pub shader: ShaderHandle,
    pub vertex_declaration: VertexDeclarationHandle,
    pub blend_state: BlendStateHandle,
    pub depth_stencil_state: DepthStencilStateHandle,
    pub rasterizer_state: RasterizerStateHandle,
    pub topology: PrimitiveTopology,
    pub compatibility: RenderPassCompatibility,
}

impl GraphicsPipelineDesc {
    /// Cache key over every field. Handles participate with index+generation,
    /// which is exactly the identity the tables guarantee.
    #[must_use]
    pub fn calculate_hash(&self) -> u64 {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&self.shader.id().to_raw().to_le_bytes());
        bytes.extend_from_slice(&self.vertex_declaration.id().to_raw().to_le_bytes());
        bytes.extend_from_slice(&self.blend_state.id().to_raw().to_le_bytes());
        bytes.extend_from_slice(&self.depth_stencil_state.id().to_raw().to_le_bytes());
        bytes.extend_from_slice(&self.rasterizer_state.id().to_raw().to_le_bytes());
        bytes.push(self.topology as u8);
        bytes.push(self.compatibility.samples as u8);
        for f in &self.compatibility.color_formats {
            bytes.push(*f as u8);
        }
        bytes.push(0xFF);
        bytes.push(self.compatibility.depth_format.map_or(0, |f| f as u8));
        xxhash_rust::xxh3::xxh3_64(&bytes)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComputePipelineDesc {
    pub shader: ShaderHandle,
}

impl ComputePipelineDesc {
    #[must_use]
    pub fn calculate_hash(&self) -> u64 {
        xxhash_rust::xxh3::xxh3_64(&self.shader.id().to_raw().to_le_bytes())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IndexFormat {
    U16,
    U32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_hash_depends_on_compatibility() {
        let base = GraphicsPipelineDesc {
            shader: ShaderHandle::INVALID,
            vertex_declaration: VertexDeclarationHandle::INVALID,
            blend_state: BlendStateHandle::INVALID,
            depth_stencil_state: DepthStencilStateHandle::INVALID,
            rasterizer_state: RasterizerStateHandle::INVALID,
            topology: PrimitiveTopology::Triangles,
            compatibility: RenderPassCompatibility {
                color_formats: smallvec::smallvec![ResourceFormat::Rgba8Unorm],
                depth_format: Some(ResourceFormat::D32Float),
                samples: SampleCount::None,
            },
        };
        let mut other = base.clone();
        other.compatibility.depth_format = None;
        assert_ne!(base.calculate_hash(), other.calculate_hash());
    }
}
