// Graphics pipeline creation
//
// A pipeline is described by a plain `PipelineConfig` value and created in
// one validated `build()` call. Nothing is half-built in between.

use anyhow::{Context, Result};
use ash::vk;

use super::deletion::DeletionQueue;
use super::shader::ShaderModule;
use crate::error::RendererError;

/// Smallest maxPushConstantsSize any Vulkan implementation may report
pub const MAX_PUSH_CONSTANT_BYTES: u32 = 128;

/// One programmable stage and its SPIR-V
#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub code: Vec<u32>,
}

/// Pipeline handles produced by a successful build
#[derive(Debug, Clone, Copy)]
pub struct BuiltPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Everything needed to create one graphics pipeline.
///
/// Multisampling is fixed at one sample and blending is disabled (straight
/// overwrite); the single color attachment writes RGBA.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stages: Vec<ShaderStage>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    /// Static viewport/scissor size; ignored when `dynamic_viewport` is set
    pub extent: vk::Extent2D,
    pub dynamic_viewport: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineConfig {
    /// Filled triangles, no culling, static full-extent viewport
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            extent,
            dynamic_viewport: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
        }
    }

    /// Reject configurations the driver would refuse or misbehave on
    pub fn validate(&self) -> Result<(), RendererError> {
        let invalid = |msg: String| Err(RendererError::InvalidPipelineConfig(msg));

        if self.stages.is_empty() {
            return invalid("no shader stages".to_string());
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.code.is_empty() {
                return invalid(format!("stage {:?} has empty bytecode", stage.stage));
            }
            if self.stages[..i].iter().any(|other| other.stage == stage.stage) {
                return invalid(format!("stage {:?} given twice", stage.stage));
            }
        }
        if !self
            .stages
            .iter()
            .any(|stage| stage.stage == vk::ShaderStageFlags::VERTEX)
        {
            return invalid("a vertex stage is required".to_string());
        }

        for attribute in &self.vertex_attributes {
            if !self
                .vertex_bindings
                .iter()
                .any(|binding| binding.binding == attribute.binding)
            {
                return invalid(format!(
                    "attribute at location {} uses undeclared binding {}",
                    attribute.location, attribute.binding
                ));
            }
        }

        if !self.dynamic_viewport && (self.extent.width == 0 || self.extent.height == 0) {
            return invalid("static viewport has a zero-sized extent".to_string());
        }

        for range in &self.push_constant_ranges {
            if range.size == 0 || range.size % 4 != 0 || range.offset % 4 != 0 {
                return invalid(format!(
                    "push constant range {}+{} is not 4-byte aligned",
                    range.offset, range.size
                ));
            }
            let end = range.offset.checked_add(range.size);
            if end.map_or(true, |end| end > MAX_PUSH_CONSTANT_BYTES) {
                return invalid(format!(
                    "push constant range {}+{} exceeds limit {}",
                    range.offset, range.size, MAX_PUSH_CONSTANT_BYTES
                ));
            }
        }

        Ok(())
    }

    /// Validate, then create the layout and pipeline against subpass 0 of
    /// `render_pass`. Shader modules are destroyed before this returns.
    pub fn build(
        &self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<BuiltPipeline> {
        self.validate()?;

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&self.set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);

        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        let pipeline = match self.create_pipeline(device, render_pass, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        let owner = device.clone();
        deletion_queue.push(move || unsafe {
            owner.destroy_pipeline_layout(layout, None);
        });

        let owner = device.clone();
        deletion_queue.push(move || unsafe {
            owner.destroy_pipeline(pipeline, None);
        });

        Ok(BuiltPipeline { pipeline, layout })
    }

    fn create_pipeline(
        &self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        // Modules drop (and are destroyed) at the end of this function
        let modules = self
            .stages
            .iter()
            .map(|stage| ShaderModule::new(device, &stage.code))
            .collect::<Result<Vec<_>>>()?;

        let entry_point = c"main";
        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .zip(&modules)
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(module.module)
                    .name(entry_point)
                    .build()
            })
            .collect();

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor cover the full extent unless set per frame
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }];
        let viewport_state = if self.dynamic_viewport {
            vk::PipelineViewportStateCreateInfo::builder()
                .viewport_count(1)
                .scissor_count(1)
        } else {
            vk::PipelineViewportStateCreateInfo::builder()
                .viewports(&viewports)
                .scissors(&scissors)
        };

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        // Multisampling (disabled)
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        // Color blending (no blending, opaque)
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(color_blend_attachments);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);
        if self.dynamic_viewport {
            pipeline_info = pipeline_info.dynamic_state(&dynamic_state);
        }

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, e)| e)
                .context("Failed to create graphics pipeline")?
        };

        Ok(pipelines[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(stage: vk::ShaderStageFlags) -> ShaderStage {
        ShaderStage {
            stage,
            code: vec![0x0723_0203, 0x0001_0000, 0, 1, 0],
        }
    }

    fn valid_config() -> PipelineConfig {
        let mut config = PipelineConfig::new(vk::Extent2D { width: 1700, height: 900 });
        config.stages = vec![
            stage(vk::ShaderStageFlags::VERTEX),
            stage(vk::ShaderStageFlags::FRAGMENT),
        ];
        config.vertex_bindings = vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: 36,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        config.vertex_attributes = vec![vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        }];
        config.push_constant_ranges = vec![vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: 80,
        }];
        config
    }

    fn rejection(config: &PipelineConfig) -> String {
        match config.validate() {
            Err(RendererError::InvalidPipelineConfig(msg)) => msg,
            other => panic!("expected InvalidPipelineConfig, got {:?}", other),
        }
    }

    #[test]
    fn defaults_are_fixed_function_basics() {
        let config = PipelineConfig::new(vk::Extent2D { width: 1, height: 1 });

        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(config.polygon_mode, vk::PolygonMode::FILL);
        assert!(!config.dynamic_viewport);
    }

    #[test]
    fn accepts_a_complete_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn requires_stages() {
        let mut config = valid_config();
        config.stages.clear();
        assert!(rejection(&config).contains("no shader stages"));
    }

    #[test]
    fn rejects_empty_bytecode() {
        let mut config = valid_config();
        config.stages[1].code.clear();
        assert!(rejection(&config).contains("empty bytecode"));
    }

    #[test]
    fn rejects_duplicate_stage() {
        let mut config = valid_config();
        config.stages.push(stage(vk::ShaderStageFlags::FRAGMENT));
        assert!(rejection(&config).contains("given twice"));
    }

    #[test]
    fn requires_vertex_stage() {
        let mut config = valid_config();
        config.stages.remove(0);
        assert!(rejection(&config).contains("vertex stage"));
    }

    #[test]
    fn attributes_need_a_binding() {
        let mut config = valid_config();
        config.vertex_attributes[0].binding = 3;
        assert!(rejection(&config).contains("undeclared binding 3"));
    }

    #[test]
    fn static_viewport_needs_an_extent() {
        let mut config = valid_config();
        config.extent = vk::Extent2D { width: 0, height: 900 };
        assert!(rejection(&config).contains("zero-sized"));

        config.dynamic_viewport = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn push_constants_must_fit_the_guaranteed_limit() {
        let mut config = valid_config();
        config.push_constant_ranges[0].size = 132;
        assert!(rejection(&config).contains("limit 128"));

        config.push_constant_ranges[0].size = 6;
        assert!(rejection(&config).contains("4-byte aligned"));
    }

    #[test]
    fn push_constant_range_end_does_not_overflow() {
        let mut config = valid_config();
        config.push_constant_ranges[0].offset = u32::MAX - 3;
        config.push_constant_ranges[0].size = 8;

        assert!(rejection(&config).contains("exceeds limit 128"));
    }
}
