//! Compute pipeline construction for the Vulkan backend.
//!
//! The filter kernel is authored in WGSL and translated to SPIR-V at
//! startup with naga. Pipeline construction is glue around the graphics
//! API; the interesting part is the pipeline layout, which carries the two
//! bindless set layouts plus the push-constant range for the index record.

use ash::vk;

use crate::error::GraphicsError;
use crate::record::FILTER_INDICES_LAYOUT;

/// A compiled compute pipeline with its layout.
pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Translate WGSL to SPIR-V words.
pub fn compile_wgsl(source: &str) -> Result<Vec<u32>, GraphicsError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        GraphicsError::InitializationFailed(format!(
            "WGSL parse error: {}",
            e.emit_to_string(source)
        ))
    })?;

    let capabilities = naga::valid::Capabilities::PUSH_CONSTANT
        | naga::valid::Capabilities::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING
        | naga::valid::Capabilities::UNIFORM_BUFFER_AND_STORAGE_TEXTURE_ARRAY_NON_UNIFORM_INDEXING;
    let mut validator =
        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), capabilities);
    let info = validator.validate(&module).map_err(|e| {
        GraphicsError::InitializationFailed(format!("WGSL validation error: {:?}", e))
    })?;

    let options = naga::back::spv::Options {
        lang_version: (1, 5),
        ..Default::default()
    };

    naga::back::spv::write_vec(&module, &info, &options, None).map_err(|e| {
        GraphicsError::InitializationFailed(format!("SPIR-V generation failed: {:?}", e))
    })
}

/// Build the compute pipeline for the filter kernel.
///
/// `set_layouts` are the bindless table layouts in set order; the push
/// constant range matches the packed index record exactly.
pub fn create_filter_pipeline(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    wgsl_source: &str,
    entry_point: &std::ffi::CStr,
) -> Result<ComputePipeline, GraphicsError> {
    let spirv = compile_wgsl(wgsl_source)?;

    let shader_info = vk::ShaderModuleCreateInfo::default().code(&spirv);
    let shader_module =
        unsafe { device.create_shader_module(&shader_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create shader module: {:?}", e))
        })?;

    let push_constant_ranges = [vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .offset(0)
        .size(FILTER_INDICES_LAYOUT.size_bytes() as u32)];

    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(set_layouts)
        .push_constant_ranges(&push_constant_ranges);

    let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(|e| {
        unsafe { device.destroy_shader_module(shader_module, None) };
        GraphicsError::InitializationFailed(format!("Failed to create pipeline layout: {:?}", e))
    })?;

    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader_module)
        .name(entry_point);

    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage_info)
        .layout(layout);

    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| {
        GraphicsError::InitializationFailed(format!("Failed to create compute pipeline: {:?}", e))
    });

    // The shader module is no longer needed once the pipeline exists.
    let result = pipelines.map(|pipelines| ComputePipeline {
        pipeline: pipelines[0],
        layout,
    });
    unsafe { device.destroy_shader_module(shader_module, None) };

    if result.is_err() {
        unsafe { device.destroy_pipeline_layout(layout, None) };
    }
    result
}
