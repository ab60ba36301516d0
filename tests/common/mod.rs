//! Shared test harness: a runtime over the recording null backend, a unit
//! cube mesh, and the standard forward pipeline wiring.
#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;

use arclight::core::bounds::BoundingBox;
use arclight::gal::descriptors::{BufferCreationDesc, BufferUsage, TextureCreationDesc};
use arclight::gal::device::DeviceConfig;
use arclight::gal::format::ResourceFormat;
use arclight::gal::null::NullBackend;
use arclight::gal::pipeline::{IndexFormat, VertexAttribute, VertexDeclarationDesc};
use arclight::gal::shader::{VertexInputFormat, VertexSemantic};
use arclight::gal::swapchain::WindowSurface;
use arclight::render::context::DrawableGeometry;
use arclight::render::mesh::{MeshRenderComponent, RenderMesh};
use arclight::render::passes::{OpaqueForwardPass, TargetPass};
use arclight::render::pipeline::{RenderPipeline, RenderPipelineHandle};
use arclight::render::shaders::StubShaderLibrary;
use arclight::render::view::{Camera, CameraUsageHint, View, ViewKey, ViewTarget, ViewportRect};
use arclight::runtime::{Runtime, RuntimeConfig};
use arclight::world::object::{GameObjectDesc, GameObjectHandle, Transform};

pub const CLEAR_COLOR: [f32; 4] = [0.1, 0.2, 0.3, 1.0];

pub struct TestHost {
    pub runtime: Runtime,
    pub stats: NullBackend,
    pub view: ViewKey,
    pub pipeline: RenderPipelineHandle,
    pub backbuffer_index: u32,
    pub depth_index: u32,
}

/// Runtime + main view + clear-to-constant forward pipeline over the null
/// backend.
#[must_use]
pub fn test_host() -> TestHost {
    test_host_with(1280, 720, CLEAR_COLOR)
}

#[must_use]
pub fn test_host_with(width: u32, height: u32, clear_color: [f32; 4]) -> TestHost {
    let backend = NullBackend::new();
    let stats = backend.clone();
    let config = RuntimeConfig {
        width,
        height,
        worker_threads: Some(2),
        ..Default::default()
    };
    let mut runtime = Runtime::new(
        Box::new(backend),
        DeviceConfig::default(),
        &config,
        Arc::new(StubShaderLibrary),
    )
    .expect("runtime over null backend");

    let device = runtime.device().clone();
    let swap_chain = device
        .create_swap_chain(
            WindowSurface::headless(),
            width,
            height,
            ResourceFormat::Bgra8Unorm,
            true,
        )
        .unwrap();
    let backbuffer = device.swap_chain_backbuffer(swap_chain).unwrap();
    let depth = device
        .create_texture(
            &TextureCreationDesc::render_target(width, height, ResourceFormat::D24UnormS8Uint),
            None,
        )
        .unwrap();

    let mut pipeline = RenderPipeline::new();
    let opaque = pipeline.add_pass(Box::new(OpaqueForwardPass::new(true, clear_color)));
    let target = pipeline.add_pass(Box::new(TargetPass::new()));
    pipeline.connect(opaque, "Color", target, "Color0").unwrap();
    pipeline
        .connect(opaque, "DepthStencil", target, "DepthStencil")
        .unwrap();

    let render_world = runtime.render_world_mut();
    let pipeline_handle = render_world.create_pipeline(pipeline);

    let mut view = View::new(
        "MainView",
        Camera::look_at(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, Vec3::Y),
        ViewportRect {
            x: 0,
            y: 0,
            width,
            height,
        },
        ViewTarget::SwapChain {
            handle: swap_chain,
            backbuffer,
            depth_stencil: Some(depth),
        },
    );
    view.usage = CameraUsageHint::MainView;
    view.pipeline = pipeline_handle;
    let view_key = render_world.create_view(view);

    TestHost {
        runtime,
        stats,
        view: view_key,
        pipeline: pipeline_handle,
        backbuffer_index: backbuffer.id().index(),
        depth_index: depth.id().index(),
    }
}

impl TestHost {
    /// Queues the main view and pumps one frame.
    pub fn run_frame(&mut self) {
        self.runtime.render_world_mut().add_view_to_render(self.view);
        self.runtime.run_frame(1.0 / 60.0).expect("frame");
    }
}

/// Unit cube geometry on the device, shared by mesh components.
#[must_use]
pub fn unit_cube(runtime: &Runtime) -> Arc<RenderMesh> {
    let device = runtime.device();

    // 8 corners, 3 floats each.
    let positions: [f32; 24] = [
        -0.5, -0.5, -0.5, 0.5, -0.5, -0.5, 0.5, 0.5, -0.5, -0.5, 0.5, -0.5, -0.5, -0.5, 0.5, 0.5,
        -0.5, 0.5, 0.5, 0.5, 0.5, -0.5, 0.5, 0.5,
    ];
    #[rustfmt::skip]
    let indices: [u16; 36] = [
        0, 1, 2, 2, 3, 0, // back
        4, 6, 5, 6, 4, 7, // front
        0, 3, 7, 7, 4, 0, // left
        1, 5, 6, 6, 2, 1, // right
        3, 2, 6, 6, 7, 3, // top
        0, 4, 5, 5, 1, 0, // bottom
    ];

    let vertex_buffer = device
        .create_buffer(
            &BufferCreationDesc {
                total_size: std::mem::size_of_val(&positions) as u32,
                struct_size: 0,
                usage: BufferUsage::VERTEX_BUFFER,
                immutable: true,
            },
            Some(bytemuck::cast_slice(&positions)),
        )
        .unwrap();
    let index_buffer = device
        .create_buffer(
            &BufferCreationDesc {
                total_size: std::mem::size_of_val(&indices) as u32,
                struct_size: 0,
                usage: BufferUsage::INDEX_BUFFER,
                immutable: true,
            },
            Some(bytemuck::cast_slice(&indices)),
        )
        .unwrap();

    let declaration = device
        .create_vertex_declaration(VertexDeclarationDesc {
            attributes: smallvec::smallvec![VertexAttribute {
                semantic: VertexSemantic::Position,
                format: VertexInputFormat::Float3,
                location: 0,
                buffer_slot: 0,
                byte_offset: 0,
                per_instance: false,
            }],
            strides: smallvec::smallvec![12],
        })
        .unwrap();

    Arc::new(RenderMesh {
        geometry: DrawableGeometry {
            vertex_buffer,
            index_buffer: Some((index_buffer, IndexFormat::U16)),
            vertex_count: 8,
            index_count: 36,
            vertex_declaration: declaration,
        },
        material_id: 1,
        local_bounds: BoundingBox {
            min: Vec3::splat(-0.5),
            max: Vec3::splat(0.5),
        },
        shader: "Forward",
    })
}

/// Spawns a static cube object at `position`.
pub fn spawn_cube(
    runtime: &Runtime,
    mesh: &Arc<RenderMesh>,
    position: Vec3,
) -> (GameObjectHandle, arclight::world::ComponentHandle) {
    let mut world = runtime.world().write();
    let object = world.create_object(&GameObjectDesc {
        local_transform: Transform::from_translation(position),
        ..Default::default()
    });
    let component = world
        .create_component(object, MeshRenderComponent::new(mesh.clone()))
        .unwrap();
    (object, component)
}
