//! Device collaborator traits.
//!
//! The core depends on the graphics device through three narrow
//! capabilities, each expressed as a trait:
//!
//! - [`GpuQueue`]: command submission plus a monotonically increasing
//!   completion counter with a single `wait_until` primitive. The core never
//!   touches OS-level wait objects; backends map `wait_until` onto whatever
//!   the API provides (timeline semaphore waits on Vulkan, a condvar on the
//!   simulated backend).
//! - [`SwapSurface`]: a presentable surface that reports a rotating
//!   current-backbuffer index.
//! - [`DescriptorSink`]: the descriptor heap/pool collaborator that
//!   materializes a view at a table slot chosen by the index allocator.
//!
//! Everything else a backend does (image creation, uploads, pipeline
//! construction) is pass-through glue and lives on the concrete backend
//! types, not in these traits.

use std::time::Duration;

use crate::bindless::{DescriptorIndex, TableKind, ViewDesc};
use crate::command::CommandList;
use crate::error::GraphicsError;
use crate::types::{ResourceId, SamplerPreset};

/// Default bound for device waits, matching the fence timeout the Vulkan
/// backend uses before declaring the device hung.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Command submission and completion tracking.
///
/// The completion counter only ever increases, and it is advanced only by
/// the device while the CPU only waits on it: a single-direction dependency
/// that makes deadlock impossible by construction.
pub trait GpuQueue: Send + Sync {
    /// Submit a recorded command list.
    ///
    /// The device signals the completion counter with `signal_value` once
    /// every command in the list has finished executing. Callers must pass
    /// strictly increasing values across submissions.
    fn submit(&self, commands: &CommandList, signal_value: u64) -> Result<(), GraphicsError>;

    /// The highest completion value the device has reached.
    fn completed_value(&self) -> u64;

    /// Block until the completion counter reaches `value`.
    ///
    /// Returns immediately if the counter is already there. `timeout = None`
    /// waits forever.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::DeviceTimeout`] if the timeout elapses first.
    fn wait_until(&self, value: u64, timeout: Option<Duration>) -> Result<(), GraphicsError>;
}

/// A presentable surface backed by a rotating set of backbuffer images.
pub trait SwapSurface {
    /// Number of backbuffer images.
    fn image_count(&self) -> usize;

    /// Index of the image the next present will target.
    fn current_image_index(&self) -> usize;

    /// Resource handle of the backbuffer image at `index`.
    fn image(&self, index: usize) -> ResourceId;

    /// Present the current image.
    ///
    /// After a successful present the surface reports a new current index.
    fn present(&self) -> Result<(), GraphicsError>;
}

/// Descriptor heap/pool collaborator.
///
/// The index allocator decides *which* slot a view occupies; the sink is
/// responsible for making the view visible to the device at that slot.
/// Calls arrive in allocation order with dense, increasing indices.
pub trait DescriptorSink {
    /// Bind a buffer or texture view at `index` of the mixed resource table.
    fn bind_view(&self, index: DescriptorIndex, view: &ViewDesc) -> Result<(), GraphicsError>;

    /// Bind a sampler preset at `index` of the sampler table.
    fn bind_sampler(
        &self,
        index: DescriptorIndex,
        preset: SamplerPreset,
    ) -> Result<(), GraphicsError>;

    /// Capacity of the given table.
    fn table_capacity(&self, table: TableKind) -> u32;
}
