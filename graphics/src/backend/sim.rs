//! Simulated GPU backend.
//!
//! Implements every device collaborator over an in-process timeline: a
//! monotonically increasing completed value guarded by a mutex/condvar
//! pair. In *auto* mode each submission completes immediately, which is
//! enough to run the sample headless. In *manual* mode the timeline only
//! advances through [`SimGpu::complete_to`], letting tests hold markers
//! back and observe exactly where the scheduler blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::bindless::{DescriptorIndex, TableKind, ViewDesc};
use crate::command::CommandList;
use crate::device::{DescriptorSink, GpuQueue, SwapSurface};
use crate::error::GraphicsError;
use crate::staging::StagingBuffer;
use crate::types::{ImageDesc, PipelineHandle, ResourceId, SamplerPreset};

/// Record of one submission, for test introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// The completion value the submission signals.
    pub signal_value: u64,
    /// Number of commands in the submitted list.
    pub command_count: usize,
    /// Workgroup counts of every dispatch in the list, in order.
    pub dispatches: Vec<[u32; 3]>,
}

/// Record of one descriptor binding, for test introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundDescriptor {
    /// Which table was written.
    pub table: TableKind,
    /// The slot that was written.
    pub index: u32,
}

#[derive(Debug, Default)]
struct Timeline {
    completed: Mutex<u64>,
    reached: Condvar,
}

impl Timeline {
    fn complete_to(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
            self.reached.notify_all();
        }
    }

    fn completed(&self) -> u64 {
        *self.completed.lock()
    }

    fn wait_until(&self, value: u64, timeout: Option<Duration>) -> Result<(), GraphicsError> {
        let mut completed = self.completed.lock();
        match timeout {
            Some(timeout) => {
                let result = self
                    .reached
                    .wait_while_for(&mut completed, |done| *done < value, timeout);
                if result.timed_out() && *completed < value {
                    return Err(GraphicsError::DeviceTimeout { value, timeout });
                }
                Ok(())
            }
            None => {
                self.reached.wait_while(&mut completed, |done| *done < value);
                Ok(())
            }
        }
    }
}

/// Simulated device, queue, surface, and descriptor heap in one.
///
/// Cheap to share: all state lives behind an `Arc`d interior, so cloning
/// hands out another handle to the same simulated device.
#[derive(Clone)]
pub struct SimGpu {
    inner: Arc<SimInner>,
}

struct SimInner {
    auto_complete: bool,
    timeline: Timeline,
    submissions: Mutex<Vec<Submission>>,
    bound: Mutex<Vec<BoundDescriptor>>,
    next_id: AtomicU64,
    surface_images: Vec<ResourceId>,
    surface_index: Mutex<usize>,
    present_count: AtomicU64,
}

/// Capacity of the simulated mixed resource table.
const SIM_RESOURCE_TABLE_CAPACITY: u32 = 1024;
/// Capacity of the simulated sampler table.
const SIM_SAMPLER_TABLE_CAPACITY: u32 = 64;

impl SimGpu {
    /// Create a simulated device that completes every submission as soon as
    /// it arrives.
    pub fn new(surface_image_count: usize) -> Self {
        Self::build(surface_image_count, true)
    }

    /// Create a simulated device whose timeline only advances through
    /// [`complete_to`](Self::complete_to).
    pub fn manual(surface_image_count: usize) -> Self {
        Self::build(surface_image_count, false)
    }

    fn build(surface_image_count: usize, auto_complete: bool) -> Self {
        assert!(surface_image_count > 0, "surface needs at least one image");

        let next_id = AtomicU64::new(1);
        let surface_images = (0..surface_image_count)
            .map(|_| ResourceId::from_raw(next_id.fetch_add(1, Ordering::Relaxed)))
            .collect();

        Self {
            inner: Arc::new(SimInner {
                auto_complete,
                timeline: Timeline::default(),
                submissions: Mutex::new(Vec::new()),
                bound: Mutex::new(Vec::new()),
                next_id,
                surface_images,
                surface_index: Mutex::new(0),
                present_count: AtomicU64::new(0),
            }),
        }
    }

    /// Backend name.
    pub fn name(&self) -> &'static str {
        "Simulated"
    }

    /// Advance the timeline to `value` (monotonic; lower values are ignored).
    pub fn complete_to(&self, value: u64) {
        self.inner.timeline.complete_to(value);
    }

    /// Allocate an image handle. No memory is involved.
    pub fn create_image(&self, desc: &ImageDesc) -> Result<ResourceId, GraphicsError> {
        let id = ResourceId::from_raw(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        log::trace!(
            "SimGpu: created image {:?} ({}x{})",
            desc.label,
            desc.extent.width,
            desc.extent.height
        );
        Ok(id)
    }

    /// Stage an upload. The staging handle goes into the caller's uploaders
    /// collection; the data itself has nowhere to go in simulation.
    pub fn upload_image(
        &self,
        image: ResourceId,
        data: &[u8],
        uploaders: &mut Vec<StagingBuffer>,
    ) -> Result<u64, GraphicsError> {
        let staging_id = ResourceId::from_raw(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        uploaders.push(StagingBuffer::new(
            staging_id,
            data.len(),
            Some(format!("upload-{}", image.raw())),
        ));

        // Uploads signal the next value past everything submitted so far.
        let signal = self.inner.timeline.completed() + 1;
        if self.inner.auto_complete {
            self.inner.timeline.complete_to(signal);
        }
        Ok(signal)
    }

    /// Release retired staging buffers.
    pub fn retire_staging(&self, uploaders: Vec<StagingBuffer>) {
        log::trace!("SimGpu: retired {} staging buffers", uploaders.len());
    }

    /// Hand out a pipeline handle. Nothing is compiled in simulation.
    pub fn create_filter_pipeline(&self) -> Result<PipelineHandle, GraphicsError> {
        Ok(PipelineHandle::from_raw(
            self.inner.next_id.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Submissions recorded so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.submissions.lock().clone()
    }

    /// Descriptor bindings recorded so far, in arrival order.
    pub fn bound_descriptors(&self) -> Vec<BoundDescriptor> {
        self.inner.bound.lock().clone()
    }

    /// Number of successful presents.
    pub fn present_count(&self) -> u64 {
        self.inner.present_count.load(Ordering::Relaxed)
    }
}

impl GpuQueue for SimGpu {
    fn submit(&self, commands: &CommandList, signal_value: u64) -> Result<(), GraphicsError> {
        {
            let mut submissions = self.inner.submissions.lock();
            if let Some(last) = submissions.last() {
                assert!(
                    signal_value > last.signal_value,
                    "submission signal values must strictly increase"
                );
            }
            let dispatches = commands
                .commands()
                .iter()
                .filter_map(|command| match command {
                    crate::command::Command::Dispatch { groups } => Some(*groups),
                    _ => None,
                })
                .collect();
            submissions.push(Submission {
                signal_value,
                command_count: commands.len(),
                dispatches,
            });
        }

        log::trace!(
            "SimGpu: submitted {} commands, signal {}",
            commands.len(),
            signal_value
        );

        if self.inner.auto_complete {
            self.inner.timeline.complete_to(signal_value);
        }
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.inner.timeline.completed()
    }

    fn wait_until(&self, value: u64, timeout: Option<Duration>) -> Result<(), GraphicsError> {
        self.inner.timeline.wait_until(value, timeout)
    }
}

impl SwapSurface for SimGpu {
    fn image_count(&self) -> usize {
        self.inner.surface_images.len()
    }

    fn current_image_index(&self) -> usize {
        *self.inner.surface_index.lock()
    }

    fn image(&self, index: usize) -> ResourceId {
        self.inner.surface_images[index]
    }

    fn present(&self) -> Result<(), GraphicsError> {
        let mut index = self.inner.surface_index.lock();
        *index = (*index + 1) % self.inner.surface_images.len();
        self.inner.present_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl DescriptorSink for SimGpu {
    fn bind_view(&self, index: DescriptorIndex, view: &ViewDesc) -> Result<(), GraphicsError> {
        log::trace!("SimGpu: bound view {:?} at index {}", view, index.get());
        self.inner.bound.lock().push(BoundDescriptor {
            table: TableKind::Resource,
            index: index.get(),
        });
        Ok(())
    }

    fn bind_sampler(
        &self,
        index: DescriptorIndex,
        preset: SamplerPreset,
    ) -> Result<(), GraphicsError> {
        log::trace!("SimGpu: bound sampler {:?} at index {}", preset, index.get());
        self.inner.bound.lock().push(BoundDescriptor {
            table: TableKind::Sampler,
            index: index.get(),
        });
        Ok(())
    }

    fn table_capacity(&self, table: TableKind) -> u32 {
        match table {
            TableKind::Resource => SIM_RESOURCE_TABLE_CAPACITY,
            TableKind::Sampler => SIM_SAMPLER_TABLE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_mode_completes_on_submit() {
        let gpu = SimGpu::new(3);
        let commands = CommandList::new();
        gpu.submit(&commands, 5).unwrap();
        assert_eq!(gpu.completed_value(), 5);
    }

    #[test]
    fn test_manual_mode_holds_back() {
        let gpu = SimGpu::manual(3);
        let commands = CommandList::new();
        gpu.submit(&commands, 1).unwrap();
        assert_eq!(gpu.completed_value(), 0);

        gpu.complete_to(1);
        assert_eq!(gpu.completed_value(), 1);
    }

    #[test]
    fn test_complete_to_is_monotonic() {
        let gpu = SimGpu::manual(1);
        gpu.complete_to(4);
        gpu.complete_to(2);
        assert_eq!(gpu.completed_value(), 4);
    }

    #[test]
    fn test_wait_until_times_out() {
        let gpu = SimGpu::manual(1);
        let err = gpu
            .wait_until(1, Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, GraphicsError::DeviceTimeout { value: 1, .. }));
    }

    #[test]
    fn test_wait_until_wakes_on_completion() {
        let gpu = SimGpu::manual(1);
        let signaller = {
            let gpu = gpu.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                gpu.complete_to(3);
            })
        };

        gpu.wait_until(3, Some(Duration::from_secs(5))).unwrap();
        signaller.join().unwrap();
        assert_eq!(gpu.completed_value(), 3);
    }

    #[test]
    fn test_surface_rotates_on_present() {
        let gpu = SimGpu::new(3);
        assert_eq!(gpu.current_image_index(), 0);

        gpu.present().unwrap();
        assert_eq!(gpu.current_image_index(), 1);
        gpu.present().unwrap();
        gpu.present().unwrap();
        assert_eq!(gpu.current_image_index(), 0);
        assert_eq!(gpu.present_count(), 3);
    }

    #[test]
    #[should_panic(expected = "strictly increase")]
    fn test_non_increasing_signal_panics() {
        let gpu = SimGpu::new(1);
        let commands = CommandList::new();
        gpu.submit(&commands, 2).unwrap();
        let _ = gpu.submit(&commands, 2);
    }

    #[test]
    fn test_upload_stages_into_caller_collection() {
        let gpu = SimGpu::new(1);
        let image = gpu
            .create_image(&ImageDesc::new(
                4,
                4,
                crate::types::TextureFormat::Rgba8Unorm,
                crate::types::ImageUsage::SAMPLED | crate::types::ImageUsage::COPY_DST,
            ))
            .unwrap();

        let mut uploaders = Vec::new();
        let signal = gpu.upload_image(image, &[0u8; 64], &mut uploaders).unwrap();

        assert_eq!(uploaders.len(), 1);
        assert_eq!(uploaders[0].len(), 64);
        // Auto mode: the upload is already complete, the initial wait
        // returns immediately and the uploaders can be retired.
        gpu.wait_until(signal, None).unwrap();
        gpu.retire_staging(uploaders);
    }
}
