//! Present/submit orchestration for the image filter.
//!
//! [`FilterRenderer`] sequences one tick of work: record barriers and the
//! filter dispatch into the current frame slot, submit with a fresh
//! completion marker, present, then advance the scheduler to the slot the
//! surface reports next. The bindless index record is built once at setup
//! and re-delivered each dispatch; it only changes if the view set changes.

use std::sync::Arc;

use crate::barrier::{BarrierBatch, ResourceState, ResourceStateTracker};
use crate::device::{GpuQueue, SwapSurface};
use crate::error::GraphicsError;
use crate::frame::{FrameScheduler, WaitPolicy};
use crate::record::{FilterIndices, IndexRecord};
use crate::types::{Extent2d, PipelineHandle, ResourceId};

/// Workgroup edge length of the filter kernel.
const WORKGROUP_SIZE: u32 = 8;

fn div_up(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Drives the per-frame record → submit → present → advance sequence.
///
/// The renderer owns the state tracker and the frame scheduler; the source
/// and result images are owned by the top-level assembly and referenced
/// here by handle only.
pub struct FilterRenderer {
    scheduler: FrameScheduler,
    tracker: ResourceStateTracker,
    pipeline: PipelineHandle,
    record: IndexRecord,
    result: ResourceId,
    extent: Extent2d,
}

impl FilterRenderer {
    /// Assemble the renderer.
    ///
    /// `indices` must hold valid table indices for the source view, result
    /// view, and sampler; the packed record is built here, once.
    ///
    /// The source image is expected in `ShaderResource` state (the upload
    /// path leaves it there) and the result image in `Common`.
    pub fn new(
        queue: Arc<dyn GpuQueue>,
        slot_count: usize,
        policy: WaitPolicy,
        pipeline: PipelineHandle,
        source: ResourceId,
        result: ResourceId,
        extent: Extent2d,
        indices: FilterIndices,
    ) -> Self {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(source, ResourceState::ShaderResource);
        tracker.track(result, ResourceState::Common);

        Self {
            scheduler: FrameScheduler::with_policy(queue, slot_count, policy),
            tracker,
            pipeline,
            record: indices.to_record(),
            result,
            extent,
        }
    }

    /// The frame scheduler, for introspection.
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Record, submit, and present one frame.
    ///
    /// # Errors
    ///
    /// Propagates submission and present failures, and
    /// [`GraphicsError::DeviceTimeout`] when a slot wait exceeds the
    /// configured policy.
    pub fn render_frame(&mut self, surface: &dyn SwapSurface) -> Result<(), GraphicsError> {
        let backbuffer = surface.image(surface.current_image_index());
        if self.tracker.state(backbuffer) == ResourceState::Common {
            // First use of this backbuffer; from here on it alternates
            // between CopyDst and Present.
            log::trace!("first use of backbuffer {:?}", backbuffer);
        }

        let commands = self.scheduler.begin_frame()?;

        // Filter dispatch: result becomes writable, then the kernel runs
        // with the packed index record as its only per-dispatch payload.
        let mut batch = BarrierBatch::new();
        batch.transition(&mut self.tracker, self.result, ResourceState::UnorderedAccess);
        batch.flush(commands);

        commands.bind_compute_pipeline(self.pipeline);
        commands.push_record(&self.record);
        commands.dispatch(
            div_up(self.extent.width, WORKGROUP_SIZE),
            div_up(self.extent.height, WORKGROUP_SIZE),
            1,
        );

        // Copy the result into the backbuffer.
        let mut batch = BarrierBatch::new();
        batch.transition(&mut self.tracker, self.result, ResourceState::CopySrc);
        batch.transition(&mut self.tracker, backbuffer, ResourceState::CopyDst);
        batch.flush(commands);

        commands.copy_image(self.result, backbuffer);

        let mut batch = BarrierBatch::new();
        batch.transition(&mut self.tracker, backbuffer, ResourceState::Present);
        batch.flush(commands);

        self.scheduler.end_frame()?;
        surface.present()?;
        self.scheduler.advance(surface.current_image_index())?;

        Ok(())
    }

    /// Drain all in-flight frames.
    ///
    /// Must be called before the top-level assembly releases the images;
    /// destroying memory the device may still touch is undefined behavior.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        self.scheduler.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::SimGpu;
    use crate::command::Command;
    use crate::types::{ImageDesc, ImageUsage, TextureFormat};

    fn make_renderer(gpu: &SimGpu) -> FilterRenderer {
        let source = gpu
            .create_image(&ImageDesc::new(
                64,
                48,
                TextureFormat::Rgba8Unorm,
                ImageUsage::SAMPLED | ImageUsage::COPY_DST,
            ))
            .unwrap();
        let result = gpu
            .create_image(&ImageDesc::new(
                64,
                48,
                TextureFormat::Bgra8Unorm,
                ImageUsage::STORAGE | ImageUsage::COPY_SRC,
            ))
            .unwrap();
        let pipeline = gpu.create_filter_pipeline().unwrap();

        FilterRenderer::new(
            Arc::new(gpu.clone()),
            3,
            WaitPolicy::default(),
            pipeline,
            source,
            result,
            Extent2d::new(64, 48),
            FilterIndices {
                tex_in: 0,
                tex_out: 1,
                smp_linear: 0,
            },
        )
    }

    #[test]
    fn test_render_frame_submits_and_presents() {
        let gpu = SimGpu::new(3);
        let mut renderer = make_renderer(&gpu);

        renderer.render_frame(&gpu).unwrap();

        assert_eq!(gpu.present_count(), 1);
        let submissions = gpu.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].signal_value, 1);
        assert_eq!(renderer.scheduler().current_slot(), 1);
    }

    #[test]
    fn test_dispatch_covers_image_with_partial_groups() {
        // 65x49 at workgroup 8 must round up to 9x7 groups.
        let gpu = SimGpu::manual(3);
        let source = gpu
            .create_image(&ImageDesc::new(
                65,
                49,
                TextureFormat::Rgba8Unorm,
                ImageUsage::SAMPLED,
            ))
            .unwrap();
        let result = gpu
            .create_image(&ImageDesc::new(
                65,
                49,
                TextureFormat::Bgra8Unorm,
                ImageUsage::STORAGE,
            ))
            .unwrap();
        let pipeline = gpu.create_filter_pipeline().unwrap();
        let mut renderer = FilterRenderer::new(
            Arc::new(gpu.clone()),
            3,
            WaitPolicy::default(),
            pipeline,
            source,
            result,
            Extent2d::new(65, 49),
            FilterIndices {
                tex_in: 0,
                tex_out: 1,
                smp_linear: 0,
            },
        );

        renderer.render_frame(&gpu).unwrap();
        let submissions = gpu.submissions();
        assert_eq!(submissions[0].dispatches, vec![[9, 7, 1]]);
    }

    #[test]
    fn test_steady_state_loop() {
        let gpu = SimGpu::new(3);
        let mut renderer = make_renderer(&gpu);

        for _ in 0..10 {
            renderer.render_frame(&gpu).unwrap();
        }

        assert_eq!(gpu.present_count(), 10);
        let submissions = gpu.submissions();
        assert_eq!(submissions.len(), 10);
        // Markers 1..=10, strictly increasing.
        for (i, submission) in submissions.iter().enumerate() {
            assert_eq!(submission.signal_value, (i + 1) as u64);
        }

        renderer.wait_idle().unwrap();
    }

    #[test]
    fn test_div_up() {
        assert_eq!(div_up(64, 8), 8);
        assert_eq!(div_up(65, 8), 9);
        assert_eq!(div_up(1, 8), 1);
        assert_eq!(div_up(8, 8), 1);
    }

    #[test]
    fn test_recorded_frame_shape() {
        // Record a frame but stop before submission to inspect the stream.
        let gpu = SimGpu::manual(3);
        let mut renderer = make_renderer(&gpu);

        let backbuffer = gpu.image(gpu.current_image_index());
        let result = renderer.result;
        let commands = renderer.scheduler.begin_frame().unwrap();

        let mut batch = BarrierBatch::new();
        batch.transition(
            &mut renderer.tracker,
            result,
            ResourceState::UnorderedAccess,
        );
        batch.flush(commands);
        commands.bind_compute_pipeline(renderer.pipeline);
        commands.push_record(&renderer.record);
        commands.dispatch(8, 6, 1);
        let mut batch = BarrierBatch::new();
        batch.transition(&mut renderer.tracker, result, ResourceState::CopySrc);
        batch.transition(&mut renderer.tracker, backbuffer, ResourceState::CopyDst);
        batch.flush(commands);
        commands.copy_image(result, backbuffer);

        let recorded = commands.commands();
        assert!(matches!(recorded[0], Command::Transition(ref b) if b.len() == 1));
        assert!(matches!(recorded[1], Command::BindComputePipeline(_)));
        assert!(matches!(recorded[2], Command::PushRecord(ref r) if r.size() == 12));
        assert!(matches!(recorded[3], Command::Dispatch { groups: [8, 6, 1] }));
        // The pre-copy batch carries both transitions in one command.
        assert!(matches!(recorded[4], Command::Transition(ref b) if b.len() == 2));
        assert!(matches!(recorded[5], Command::CopyImage { .. }));
    }
}
