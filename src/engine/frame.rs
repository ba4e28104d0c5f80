// Frame loop
//
// One frame in flight: the fence is waited on before the single command
// buffer is touched again, so recording never races the GPU.

use anyhow::{Context, Result};
use ash::vk;

use super::Engine;
use crate::backend::SurfaceProvider;
use crate::scene::{clear_color, spin, MeshPushConstants};

impl<W: SurfaceProvider> Engine<W> {
    /// Render and present one frame
    pub fn draw(&mut self) -> Result<()> {
        let device = &self.device.device;
        let timeout = self.settings.timeout_ns;

        // Step 1: Wait for the previous frame to retire, then re-arm
        self.sync.wait(device, timeout)?;
        self.sync.reset(device)?;

        // Step 2: Acquire next swapchain image
        let (image_index, acquire_suboptimal) = self
            .swapchain
            .acquire_next_image(timeout, self.sync.image_available)?;

        // Step 3: Record
        let cmd = self.command.begin(device)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color(self.frame_number),
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain.extent,
        };
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            if self.settings.dynamic_viewport {
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: render_area.extent.width as f32,
                    height: render_area.extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                device.cmd_set_viewport(cmd, 0, &[viewport]);
                device.cmd_set_scissor(cmd, 0, &[render_area]);
            }
        }

        self.draw_objects(cmd);

        unsafe { device.cmd_end_render_pass(cmd) };
        self.command.end(device)?;

        // Step 4: Submit. Color output waits for the acquired image; the
        // fence fires when the GPU is done with the command buffer.
        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                self.sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")?;

        // Step 5: Present
        let present_suboptimal = self.swapchain.present(
            self.device.present_queue,
            image_index,
            &signal_semaphores,
        )?;

        if (acquire_suboptimal || present_suboptimal) && !self.suboptimal_reported {
            log::warn!("Swapchain is suboptimal for the surface; continuing without recreation");
            self.suboptimal_reported = true;
        }

        self.frame_number += 1;
        Ok(())
    }

    /// Record every renderable, rebinding only what changed between draws
    fn draw_objects(&self, cmd: vk::CommandBuffer) {
        let device = &self.device.device;
        let view_projection = self.camera.view_projection(self.swapchain.extent);
        let spin = spin(self.frame_number, self.settings.spin_degrees_per_frame);

        for item in &self.draw_list {
            let constants =
                MeshPushConstants::new(view_projection * spin * item.transform);

            unsafe {
                if let Some(material) = item.bind_material {
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, material.pipeline);
                }
                if let Some(buffer) = item.bind_vertex_buffer {
                    device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]);
                }

                device.cmd_push_constants(
                    cmd,
                    item.layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&constants),
                );
                device.cmd_draw(cmd, item.vertex_count, 1, 0, 0);
            }
        }
    }
}
