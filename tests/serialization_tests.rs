//! Serialization Round-Trip Tests
//!
//! Shader permutation binaries and render pipelines must reconstruct
//! structurally identical objects: bytecode bytes, binding tables, pass
//! order, and connection lists.

use std::io::Cursor;

use arclight::gal::shader::{
    PlatformBytecode, ShaderPermutationBinary, ShaderResourceBinding, ShaderResourceType,
    ShaderStage, ShaderStageMask, ShaderTextureType, ShaderVertexInput, VertexInputFormat,
    VertexSemantic,
};
use arclight::render::passes::{
    OpaqueForwardPass, TargetPass, TonemapPass, register_standard_passes,
};
use arclight::render::pipeline::{PassFactory, RenderPipeline};

fn sample_shader_binary() -> ShaderPermutationBinary {
    ShaderPermutationBinary {
        platforms: vec![
            PlatformBytecode {
                platform_id: 1,
                stages: vec![
                    (ShaderStage::Vertex, vec![0x03, 0x02, 0x23, 0x07, 1, 2, 3, 4]),
                    (ShaderStage::Fragment, vec![0x03, 0x02, 0x23, 0x07, 9, 9, 9, 9]),
                ],
            },
            PlatformBytecode {
                platform_id: 2,
                stages: vec![(ShaderStage::Compute, vec![5, 5, 5, 5])],
            },
        ],
        bindings: vec![
            ShaderResourceBinding {
                name: "frameConstants".into(),
                set: 0,
                binding: 0,
                resource_type: ShaderResourceType::ConstantBuffer,
                texture_type: ShaderTextureType::Unknown,
                is_depth: false,
                stages: ShaderStageMask::VERTEX | ShaderStageMask::FRAGMENT,
                is_array: false,
                array_size: 1,
            },
            ShaderResourceBinding {
                name: "diffuseTexture".into(),
                set: 1,
                binding: 0,
                resource_type: ShaderResourceType::Texture,
                texture_type: ShaderTextureType::Texture2D,
                is_depth: false,
                stages: ShaderStageMask::FRAGMENT,
                is_array: false,
                array_size: 1,
            },
            ShaderResourceBinding {
                name: "shadowCascades".into(),
                set: 1,
                binding: 1,
                resource_type: ShaderResourceType::Texture,
                texture_type: ShaderTextureType::Texture2DArray,
                is_depth: true,
                stages: ShaderStageMask::FRAGMENT,
                is_array: true,
                array_size: 4,
            },
        ],
        vertex_inputs: vec![
            ShaderVertexInput {
                name: "in_position".into(),
                semantic: VertexSemantic::Position,
                format: VertexInputFormat::Float3,
                location: 0,
            },
            ShaderVertexInput {
                name: "in_uv".into(),
                semantic: VertexSemantic::TexCoord0,
                format: VertexInputFormat::Float2,
                location: 1,
            },
        ],
    }
}

#[test]
fn shader_binary_round_trip_is_structural_identity() {
    let original = sample_shader_binary();
    let mut bytes = Vec::new();
    original.write(&mut bytes).unwrap();

    let read = ShaderPermutationBinary::read(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(read, original);
}

#[test]
fn shader_binary_shared_names_intern_in_the_heap() {
    // Two bindings with the same name must not bloat the heap, and must
    // both resolve after the round trip.
    let mut binary = sample_shader_binary();
    binary.bindings.push(ShaderResourceBinding {
        name: "diffuseTexture".into(),
        set: 2,
        binding: 0,
        resource_type: ShaderResourceType::Texture,
        texture_type: ShaderTextureType::Texture2D,
        is_depth: false,
        stages: ShaderStageMask::FRAGMENT,
        is_array: false,
        array_size: 1,
    });

    let mut bytes = Vec::new();
    binary.write(&mut bytes).unwrap();
    let read = ShaderPermutationBinary::read(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(read.bindings[1].name, read.bindings[3].name);
    assert_eq!(read, binary);
}

fn sample_pipeline() -> RenderPipeline {
    let mut pipeline = RenderPipeline::new();
    let opaque = pipeline.add_pass(Box::new(OpaqueForwardPass::new(
        false,
        [0.25, 0.5, 0.75, 1.0],
    )));
    let tonemap = pipeline.add_pass(Box::new(TonemapPass::new(1.5)));
    let target = pipeline.add_pass(Box::new(TargetPass::new()));
    pipeline.set_pass_active(tonemap, false);
    pipeline.connect(opaque, "Color", tonemap, "Color").unwrap();
    pipeline.connect(tonemap, "Output", target, "Color0").unwrap();
    pipeline
        .connect(opaque, "DepthStencil", target, "DepthStencil")
        .unwrap();
    pipeline
}

#[test]
fn pipeline_round_trip_preserves_structure() {
    let original = sample_pipeline();
    let mut bytes = Vec::new();
    original.serialize(&mut bytes).unwrap();

    let mut factory = PassFactory::new();
    register_standard_passes(&mut factory);
    let read = RenderPipeline::deserialize(&mut Cursor::new(bytes), &factory).unwrap();

    assert_eq!(read.pass_count(), original.pass_count());
    // Pass names in order.
    for node in 0..original.pass_count() as u32 {
        assert_eq!(read.pass_name(node), original.pass_name(node));
    }
    // Connection shape: same (src, pin) → destination sets.
    assert_eq!(read.connections().len(), original.connections().len());
    for original_connection in original.connections() {
        let found = read.connections().iter().any(|c| {
            c.src_node == original_connection.src_node
                && c.src_pin == original_connection.src_pin
                && c.destinations == original_connection.destinations
        });
        assert!(found, "missing connection {original_connection:?}");
    }
}

#[test]
fn pipeline_round_trip_preserves_pass_state() {
    let original = sample_pipeline();
    let mut bytes = Vec::new();
    original.serialize(&mut bytes).unwrap();

    let mut factory = PassFactory::new();
    register_standard_passes(&mut factory);
    let read = RenderPipeline::deserialize(&mut Cursor::new(bytes.clone()), &factory).unwrap();

    // Round-trip again; byte-identical output means pass blobs (clear
    // colors, exposure, active flags) survived intact.
    let mut second = Vec::new();
    read.serialize(&mut second).unwrap();
    assert_eq!(second, bytes);
}

#[test]
fn unknown_pass_name_fails_deserialization() {
    let original = sample_pipeline();
    let mut bytes = Vec::new();
    original.serialize(&mut bytes).unwrap();

    let factory = PassFactory::new(); // nothing registered
    assert!(RenderPipeline::deserialize(&mut Cursor::new(bytes), &factory).is_err());
}
