//! Pipeline Compilation
//!
//! Builds `vk::Pipeline` objects from resolved frontend descriptors. The
//! backend-native `vk::PipelineCache` blob is loaded at startup and written
//! back at shutdown so repeat runs skip driver compilation.

use ash::vk;
use std::ffi::CStr;
use std::path::PathBuf;

use crate::gal::backend::{ResolvedComputePipeline, ResolvedGraphicsPipeline};
use crate::gal::error::{GalError, GalResult};

use super::conv;
use super::descriptors::{DescriptorLayoutCache, SetLayoutKey};
use super::renderpass_cache::{RenderPassCache, RenderPassKey};

const SHADER_ENTRY: &CStr = c"main";

/// A compiled pipeline plus the layout data command recording needs.
pub struct VkPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub layout_keys: Vec<SetLayoutKey>,
    pub bind_point: vk::PipelineBindPoint,
}

fn cache_path() -> PathBuf {
    crate::gal::shader::default_cache_dir().join("pipeline_cache.bin")
}

pub fn create_pipeline_cache(device: &ash::Device) -> vk::PipelineCache {
    let blob = std::fs::read(cache_path()).unwrap_or_default();
    let info = vk::PipelineCacheCreateInfo::default().initial_data(&blob);
    unsafe {
        device
            .create_pipeline_cache(&info, None)
            .unwrap_or(vk::PipelineCache::null())
    }
}

pub fn save_pipeline_cache(device: &ash::Device, cache: vk::PipelineCache) {
    if cache == vk::PipelineCache::null() {
        return;
    }
    if let Ok(blob) = unsafe { device.get_pipeline_cache_data(cache) } {
        let path = cache_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, blob) {
            log::warn!("failed to persist pipeline cache: {e}");
        }
    }
}

fn create_module(device: &ash::Device, bytecode: &[u8]) -> GalResult<vk::ShaderModule> {
    if bytecode.len() % 4 != 0 {
        return Err(GalError::ShaderCompileError {
            stage: "unknown",
            name: "bytecode not 4-byte aligned",
        });
    }
    let words: Vec<u32> = bytecode
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let info = vk::ShaderModuleCreateInfo::default().code(&words);
    unsafe {
        device
            .create_shader_module(&info, None)
            .map_err(|_| GalError::ShaderCompileError {
                stage: "unknown",
                name: "module creation failed",
            })
    }
}

pub fn create_graphics_pipeline(
    device: &ash::Device,
    pipeline_cache: vk::PipelineCache,
    layouts: &DescriptorLayoutCache,
    render_passes: &RenderPassCache,
    resolved: &ResolvedGraphicsPipeline<'_>,
) -> GalResult<VkPipeline> {
    use crate::gal::shader::ShaderStage;

    // Stage modules.
    let mut modules = Vec::new();
    let mut stages = Vec::new();
    for stage in [ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Fragment] {
        if let Some(code) = resolved.shader.bytecode(stage) {
            let module = create_module(device, code).map_err(|_| GalError::ShaderCompileError {
                stage: stage.name(),
                name: "module creation failed",
            })?;
            modules.push(module);
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(conv::shader_stage(stage))
                    .module(module)
                    .name(SHADER_ENTRY),
            );
        }
    }

    // Layout chain from reflection + immutable samplers.
    let layout_keys = layouts.layout_keys_for_shader(resolved.shader);
    let set_layouts: Vec<vk::DescriptorSetLayout> = layout_keys
        .iter()
        .map(|key| layouts.set_layout(device, key))
        .collect();
    let layout = layouts.pipeline_layout(device, &set_layouts);

    // Vertex input from the declaration.
    let decl = resolved.vertex_declaration;
    let bindings: Vec<vk::VertexInputBindingDescription> = decl
        .strides
        .iter()
        .enumerate()
        .map(|(slot, stride)| {
            let per_instance = decl
                .attributes
                .iter()
                .any(|a| a.buffer_slot as usize == slot && a.per_instance);
            vk::VertexInputBindingDescription::default()
                .binding(slot as u32)
                .stride(*stride)
                .input_rate(if per_instance {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                })
        })
        .collect();
    let attributes: Vec<vk::VertexInputAttributeDescription> = decl
        .attributes
        .iter()
        .map(|a| {
            vk::VertexInputAttributeDescription::default()
                .location(u32::from(a.location))
                .binding(u32::from(a.buffer_slot))
                .format(conv::vertex_format(a.format))
                .offset(a.byte_offset)
        })
        .collect();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(conv::topology(resolved.desc.topology));

    // Dynamic viewport/scissor; counts must still be declared.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let raster = &resolved.rasterizer;
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(if raster.wireframe {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        })
        .cull_mode(conv::cull_mode(raster.cull_mode))
        .front_face(if raster.front_counter_clockwise {
            vk::FrontFace::COUNTER_CLOCKWISE
        } else {
            vk::FrontFace::CLOCKWISE
        })
        .depth_bias_enable(raster.depth_bias != 0)
        .depth_bias_constant_factor(raster.depth_bias as f32)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(conv::sample_count(resolved.desc.compatibility.samples))
        .alpha_to_coverage_enable(resolved.blend.alpha_to_coverage);

    let ds = &resolved.depth_stencil;
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(ds.depth_test)
        .depth_write_enable(ds.depth_write)
        .depth_compare_op(conv::compare_op(ds.depth_compare))
        .stencil_test_enable(ds.stencil_enabled);

    let color_count = resolved.desc.compatibility.color_formats.len();
    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..color_count)
        .map(|i| {
            let target = &resolved.blend.targets[i.min(7)];
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(target.blend_enabled)
                .src_color_blend_factor(conv::blend_factor(target.src_color))
                .dst_color_blend_factor(conv::blend_factor(target.dst_color))
                .color_blend_op(conv::blend_op(target.color_op))
                .src_alpha_blend_factor(conv::blend_factor(target.src_alpha))
                .dst_alpha_blend_factor(conv::blend_factor(target.dst_alpha))
                .alpha_blend_op(conv::blend_op(target.alpha_op))
                .color_write_mask(vk::ColorComponentFlags::from_raw(u32::from(
                    target.write_mask,
                )))
        })
        .collect();
    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    // A compatibility render pass: load/store ops do not affect render pass
    // compatibility, so DONT_CARE stands in for whatever execution uses.
    let samples = conv::sample_count(resolved.desc.compatibility.samples);
    let key = RenderPassKey {
        colors: resolved
            .desc
            .compatibility
            .color_formats
            .iter()
            .map(|f| {
                (
                    conv::format(*f),
                    samples,
                    vk::AttachmentLoadOp::DONT_CARE,
                    vk::AttachmentStoreOp::STORE,
                )
            })
            .collect(),
        depth: resolved.desc.compatibility.depth_format.map(|f| {
            (
                conv::format(f),
                samples,
                vk::AttachmentLoadOp::DONT_CARE,
                vk::AttachmentStoreOp::STORE,
            )
        }),
    };
    let render_pass = render_passes.render_pass(device, &key);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let result = unsafe {
        device.create_graphics_pipelines(pipeline_cache, &[info], None)
    };

    for module in modules {
        unsafe { device.destroy_shader_module(module, None) };
    }

    let pipeline = match result {
        Ok(pipelines) => pipelines[0],
        Err((_, _)) => {
            return Err(GalError::ShaderCompileError {
                stage: "graphics",
                name: "pipeline compilation failed",
            });
        }
    };

    Ok(VkPipeline {
        pipeline,
        layout,
        set_layouts,
        layout_keys,
        bind_point: vk::PipelineBindPoint::GRAPHICS,
    })
}

pub fn create_compute_pipeline(
    device: &ash::Device,
    pipeline_cache: vk::PipelineCache,
    layouts: &DescriptorLayoutCache,
    resolved: &ResolvedComputePipeline<'_>,
) -> GalResult<VkPipeline> {
    use crate::gal::shader::ShaderStage;

    let code = resolved
        .shader
        .bytecode(ShaderStage::Compute)
        .ok_or(GalError::ShaderCompileError {
            stage: "compute",
            name: "missing bytecode",
        })?;
    let module = create_module(device, code)?;

    let layout_keys = layouts.layout_keys_for_shader(resolved.shader);
    let set_layouts: Vec<vk::DescriptorSetLayout> = layout_keys
        .iter()
        .map(|key| layouts.set_layout(device, key))
        .collect();
    let layout = layouts.pipeline_layout(device, &set_layouts);

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(SHADER_ENTRY);
    let info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(layout);

    let result = unsafe { device.create_compute_pipelines(pipeline_cache, &[info], None) };
    unsafe { device.destroy_shader_module(module, None) };

    let pipeline = match result {
        Ok(pipelines) => pipelines[0],
        Err((_, _)) => {
            return Err(GalError::ShaderCompileError {
                stage: "compute",
                name: "pipeline compilation failed",
            });
        }
    };

    Ok(VkPipeline {
        pipeline,
        layout,
        set_layouts,
        layout_keys,
        bind_point: vk::PipelineBindPoint::COMPUTE,
    })
}
