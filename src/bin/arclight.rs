//! Standalone Runtime Host
//!
//! Minimal host for the rendering core: brings up a device, a headless swap
//! chain, and a standard forward pipeline, then pumps frames. Windowed
//! presentation belongs to an embedding host; this binary exists for
//! soak-testing and CI.
//!
//! Exit codes: 0 on a clean run, 1 on device loss, 2 on pipeline
//! compilation failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use arclight::gal::backend::GalBackend;
use arclight::gal::descriptors::TextureCreationDesc;
use arclight::gal::device::DeviceConfig;
use arclight::gal::error::GalError;
use arclight::gal::format::ResourceFormat;
use arclight::gal::shader::{PermutationSet, ShaderPermutationBinary, ShaderPermutationCache};
use arclight::gal::swapchain::WindowSurface;
use arclight::render::passes::{DebugPass, OpaqueForwardPass, TargetPass, TransparentForwardPass};
use arclight::render::pipeline::{PipelineState, RenderPipeline};
use arclight::render::shaders::CachedShaderLibrary;
use arclight::render::view::{Camera, CameraUsageHint, View, ViewTarget, ViewportRect};
use arclight::runtime::{Runtime, RuntimeConfig};

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum RendererKind {
    /// Vulkan backend.
    Vk,
}

#[derive(Parser, Debug)]
#[command(name = "arclight", about = "Arclight rendering core host")]
struct Args {
    /// Graphics backend.
    #[arg(long, value_enum, default_value = "vk")]
    renderer: RendererKind,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Render offscreen without presenting to a window surface.
    #[arg(long)]
    headless: bool,

    /// Exit after N frames (0 = run until interrupted).
    #[arg(long, default_value_t = 0)]
    frames: u64,
}

fn create_backend(kind: RendererKind, config: &DeviceConfig) -> Option<Box<dyn GalBackend>> {
    match kind {
        RendererKind::Vk => {
            #[cfg(feature = "vulkan")]
            {
                match arclight::gal::vulkan::VulkanBackend::create(config) {
                    Ok(backend) => Some(Box::new(backend)),
                    Err(e) => {
                        log::error!("vulkan backend creation failed: {e}");
                        None
                    }
                }
            }
            #[cfg(not(feature = "vulkan"))]
            {
                let _ = config;
                log::error!("this build does not include the vulkan backend");
                None
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("failed to load config {}: {e}", path.display());
                return ExitCode::from(2);
            }
        },
        None => RuntimeConfig::default(),
    };

    let device_config = DeviceConfig::from_env();
    let Some(backend) = create_backend(args.renderer, &device_config) else {
        return ExitCode::from(1);
    };

    // Shader permutations resolve from the on-disk cache
    // (`NS_SHADER_CACHE_DIR`); the compiler is an external collaborator.
    let shader_library = Arc::new(CachedShaderLibrary::new(
        ShaderPermutationCache::with_default_dir(),
        device_config.platform_id,
        |name: &str, _perms: &PermutationSet| -> Option<ShaderPermutationBinary> {
            log::warn!("shader '{name}' not in permutation cache and no compiler is attached");
            None
        },
    ));

    let mut runtime = match Runtime::new(backend, device_config, &config, shader_library) {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("runtime initialization failed: {e}");
            return ExitCode::from(1);
        }
    };

    if !args.headless {
        log::warn!("no windowing host attached; presenting offscreen");
    }

    // Main view over a (headless) swap chain plus a depth target.
    let device = runtime.device().clone();
    let swap_chain = match device.create_swap_chain(
        WindowSurface::headless(),
        config.width,
        config.height,
        ResourceFormat::Bgra8Unorm,
        config.vsync,
    ) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("swap chain creation failed: {e}");
            return ExitCode::from(1);
        }
    };
    let backbuffer = device
        .swap_chain_backbuffer(swap_chain)
        .expect("swap chain has a backbuffer");
    let depth = match device.create_texture(
        &TextureCreationDesc::render_target(config.width, config.height, ResourceFormat::D24UnormS8Uint),
        None,
    ) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("depth target creation failed: {e}");
            return ExitCode::from(1);
        }
    };

    // Standard forward chain: opaque → transparent → debug → target.
    let mut pipeline = RenderPipeline::new();
    let opaque = pipeline.add_pass(Box::new(OpaqueForwardPass::new(
        true,
        [0.05, 0.05, 0.08, 1.0],
    )));
    let transparent = pipeline.add_pass(Box::new(TransparentForwardPass::new()));
    let debug = pipeline.add_pass(Box::new(DebugPass::new()));
    let target = pipeline.add_pass(Box::new(TargetPass::new()));
    let wired = pipeline
        .connect(opaque, "Color", transparent, "Color")
        .and_then(|()| pipeline.connect(opaque, "DepthStencil", transparent, "DepthStencil"))
        .and_then(|()| pipeline.connect(transparent, "Color", debug, "Color"))
        .and_then(|()| pipeline.connect(transparent, "DepthStencil", debug, "DepthStencil"))
        .and_then(|()| pipeline.connect(debug, "Color", target, "Color0"))
        .and_then(|()| pipeline.connect(debug, "DepthStencil", target, "DepthStencil"));
    if let Err(e) = wired {
        log::error!("pipeline wiring failed: {e}");
        return ExitCode::from(2);
    }

    let render_world = runtime.render_world_mut();
    let pipeline_handle = render_world.create_pipeline(pipeline);
    let mut view = View::new(
        "MainView",
        Camera::look_at(glam::Vec3::new(0.0, 2.0, -6.0), glam::Vec3::ZERO, glam::Vec3::Y),
        ViewportRect {
            x: 0,
            y: 0,
            width: config.width,
            height: config.height,
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

    let max_frames = if args.frames == 0 { u64::MAX } else { args.frames };
    let mut exit = ExitCode::SUCCESS;
    for frame in 0..max_frames {
        runtime.render_world_mut().add_view_to_render(view_key);
        match runtime.run_frame(1.0 / 60.0) {
            Ok(()) => {}
            Err(GalError::DeviceLost) => {
                log::error!("device lost at frame {frame}; aborting");
                exit = ExitCode::from(1);
                break;
            }
            Err(e) => {
                log::error!("frame {frame} failed: {e}");
                exit = ExitCode::from(1);
                break;
            }
        }

        // A pipeline that failed compilation renders nothing, ever; treat
        // it as a startup failure.
        if let Some(pipeline) = runtime.render_world().pipeline(pipeline_handle)
            && pipeline.state() == PipelineState::Invalid
        {
            log::error!("render pipeline failed to compile");
            exit = ExitCode::from(2);
            break;
        }
    }

    runtime.shutdown();
    exit
}
