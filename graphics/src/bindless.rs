//! Bindless descriptor index allocation.
//!
//! Two global tables exist for the process lifetime: a mixed buffer/texture
//! table and a sampler table. The allocator assigns each GPU-visible view a
//! dense, stable index (contiguous from 0, never recycled) and forwards
//! the binding to the [`DescriptorSink`] collaborator in allocation order.
//! Device-side code then addresses resources by these small integers
//! instead of per-dispatch bind slots; that indirection is what makes the
//! resources bindless.
//!
//! [`DescriptorSink`]: crate::device::DescriptorSink

use std::collections::HashMap;

use crate::device::DescriptorSink;
use crate::types::{ResourceId, SamplerPreset};

/// Which global descriptor table an index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// The mixed buffer/texture view table.
    Resource,
    /// The sampler preset table.
    Sampler,
}

/// A stable slot in one of the global descriptor tables.
///
/// Valid indices are dense starting at 0. [`DescriptorIndex::INVALID`] is
/// the sentinel returned when allocation fails; callers must treat it as
/// fatal during setup, since a dispatch cannot run without its bindless
/// handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorIndex(u32);

impl DescriptorIndex {
    /// Sentinel for a failed allocation.
    pub const INVALID: DescriptorIndex = DescriptorIndex(u32::MAX);

    /// Whether this index refers to a real table slot.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// The raw slot number.
    pub fn get(&self) -> u32 {
        self.0
    }
}

/// The shader-visible flavor of a resource view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Sampled texture view.
    SampledImage,
    /// Writable storage image view.
    StorageImage,
    /// Uniform buffer view.
    UniformBuffer,
    /// Storage buffer view.
    StorageBuffer,
}

/// A GPU-visible view over a resource.
///
/// The pair (resource, kind) is the view's identity: allocating the same
/// pair twice returns the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    /// The viewed resource.
    pub resource: ResourceId,
    /// How shaders access it.
    pub kind: ViewKind,
}

impl ViewDesc {
    /// A sampled-image view.
    pub fn sampled(resource: ResourceId) -> Self {
        Self {
            resource,
            kind: ViewKind::SampledImage,
        }
    }

    /// A storage-image view.
    pub fn storage(resource: ResourceId) -> Self {
        Self {
            resource,
            kind: ViewKind::StorageImage,
        }
    }
}

/// Assigns dense indices in the two global descriptor tables.
///
/// Index assignment is owned here for the process lifetime; components
/// request indices once during setup and cache them. Freeing or recycling
/// indices is deliberately unsupported: the sample never destroys views
/// mid-run, so an index stays valid for exactly the GPU-visible lifetime of
/// its view.
pub struct DescriptorIndexAllocator<'a> {
    sink: &'a dyn DescriptorSink,
    views: Vec<ViewDesc>,
    view_lookup: HashMap<ViewDesc, DescriptorIndex>,
    samplers: Vec<SamplerPreset>,
    sampler_lookup: HashMap<SamplerPreset, DescriptorIndex>,
}

impl<'a> DescriptorIndexAllocator<'a> {
    /// Create an allocator bound to a descriptor heap collaborator.
    pub fn new(sink: &'a dyn DescriptorSink) -> Self {
        Self {
            sink,
            views: Vec::new(),
            view_lookup: HashMap::new(),
            samplers: Vec::new(),
            sampler_lookup: HashMap::new(),
        }
    }

    /// Allocate (or look up) the index for a resource view.
    ///
    /// Returns [`DescriptorIndex::INVALID`] if the table is full or the sink
    /// rejects the view.
    pub fn allocate_view(&mut self, view: ViewDesc) -> DescriptorIndex {
        if let Some(index) = self.view_lookup.get(&view) {
            return *index;
        }

        let slot = self.views.len() as u32;
        if slot >= self.sink.table_capacity(TableKind::Resource) {
            log::error!(
                "resource descriptor table exhausted at {} entries",
                self.views.len()
            );
            return DescriptorIndex::INVALID;
        }

        let index = DescriptorIndex(slot);
        if let Err(err) = self.sink.bind_view(index, &view) {
            log::error!("failed to bind view {:?} at index {}: {}", view, slot, err);
            return DescriptorIndex::INVALID;
        }

        self.views.push(view);
        self.view_lookup.insert(view, index);
        log::trace!("allocated resource index {} for {:?}", slot, view);
        index
    }

    /// Allocate (or look up) the index for a sampler preset.
    ///
    /// Returns [`DescriptorIndex::INVALID`] if the sampler table is full or
    /// the sink rejects the preset.
    pub fn allocate_sampler(&mut self, preset: SamplerPreset) -> DescriptorIndex {
        if let Some(index) = self.sampler_lookup.get(&preset) {
            return *index;
        }

        let slot = self.samplers.len() as u32;
        if slot >= self.sink.table_capacity(TableKind::Sampler) {
            log::error!(
                "sampler descriptor table exhausted at {} entries",
                self.samplers.len()
            );
            return DescriptorIndex::INVALID;
        }

        let index = DescriptorIndex(slot);
        if let Err(err) = self.sink.bind_sampler(index, preset) {
            log::error!(
                "failed to bind sampler {:?} at index {}: {}",
                preset,
                slot,
                err
            );
            return DescriptorIndex::INVALID;
        }

        self.samplers.push(preset);
        self.sampler_lookup.insert(preset, index);
        log::trace!("allocated sampler index {} for {:?}", slot, preset);
        index
    }

    /// Number of views allocated in the mixed table.
    ///
    /// Because indices are dense, this is also the exact table size needed.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Number of presets allocated in the sampler table.
    pub fn sampler_count(&self) -> usize {
        self.samplers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphicsError;

    /// Sink that accepts everything up to a fixed capacity and records the
    /// order bindings arrive in.
    struct RecordingSink {
        capacity: u32,
        bound: std::cell::RefCell<Vec<(TableKind, u32)>>,
    }

    impl RecordingSink {
        fn new(capacity: u32) -> Self {
            Self {
                capacity,
                bound: std::cell::RefCell::new(Vec::new()),
            }
        }
    }

    impl DescriptorSink for RecordingSink {
        fn bind_view(&self, index: DescriptorIndex, _view: &ViewDesc) -> Result<(), GraphicsError> {
            self.bound
                .borrow_mut()
                .push((TableKind::Resource, index.get()));
            Ok(())
        }

        fn bind_sampler(
            &self,
            index: DescriptorIndex,
            _preset: SamplerPreset,
        ) -> Result<(), GraphicsError> {
            self.bound
                .borrow_mut()
                .push((TableKind::Sampler, index.get()));
            Ok(())
        }

        fn table_capacity(&self, _table: TableKind) -> u32 {
            self.capacity
        }
    }

    fn view(raw: u64, kind: ViewKind) -> ViewDesc {
        ViewDesc {
            resource: ResourceId::from_raw(raw),
            kind,
        }
    }

    #[test]
    fn test_indices_dense_from_zero() {
        let sink = RecordingSink::new(16);
        let mut alloc = DescriptorIndexAllocator::new(&sink);

        for i in 0..5u64 {
            let index = alloc.allocate_view(view(i, ViewKind::SampledImage));
            assert_eq!(index.get(), i as u32);
        }
        assert_eq!(alloc.view_count(), 5);
    }

    #[test]
    fn test_tables_have_independent_counters() {
        let sink = RecordingSink::new(16);
        let mut alloc = DescriptorIndexAllocator::new(&sink);

        // Interleave allocations across the two tables; each counts on its own.
        let tex_in = alloc.allocate_view(view(1, ViewKind::SampledImage));
        let smp = alloc.allocate_sampler(SamplerPreset::PointClamp);
        let tex_out = alloc.allocate_view(view(2, ViewKind::StorageImage));

        assert_eq!(tex_in.get(), 0);
        assert_eq!(tex_out.get(), 1);
        assert_eq!(smp.get(), 0);
    }

    #[test]
    fn test_allocation_is_idempotent_per_view() {
        let sink = RecordingSink::new(16);
        let mut alloc = DescriptorIndexAllocator::new(&sink);

        let first = alloc.allocate_view(view(7, ViewKind::SampledImage));
        let second = alloc.allocate_view(view(7, ViewKind::SampledImage));
        assert_eq!(first, second);
        assert_eq!(alloc.view_count(), 1);

        // Same resource under a different view flavor is a distinct view.
        let storage = alloc.allocate_view(view(7, ViewKind::StorageImage));
        assert_ne!(first, storage);
        assert_eq!(alloc.view_count(), 2);

        // The sink saw exactly one bind per distinct view.
        assert_eq!(sink.bound.borrow().len(), 2);
    }

    #[test]
    fn test_full_table_returns_invalid() {
        let sink = RecordingSink::new(2);
        let mut alloc = DescriptorIndexAllocator::new(&sink);

        assert!(alloc.allocate_view(view(1, ViewKind::SampledImage)).is_valid());
        assert!(alloc.allocate_view(view(2, ViewKind::SampledImage)).is_valid());

        let overflow = alloc.allocate_view(view(3, ViewKind::SampledImage));
        assert_eq!(overflow, DescriptorIndex::INVALID);
        assert!(!overflow.is_valid());
        // The failed allocation must not consume a slot.
        assert_eq!(alloc.view_count(), 2);
    }

    #[test]
    fn test_rejecting_sink_returns_invalid() {
        struct RejectingSink;
        impl DescriptorSink for RejectingSink {
            fn bind_view(
                &self,
                _index: DescriptorIndex,
                _view: &ViewDesc,
            ) -> Result<(), GraphicsError> {
                Err(GraphicsError::InvalidParameter("malformed view".into()))
            }
            fn bind_sampler(
                &self,
                _index: DescriptorIndex,
                _preset: SamplerPreset,
            ) -> Result<(), GraphicsError> {
                Err(GraphicsError::InvalidParameter("malformed sampler".into()))
            }
            fn table_capacity(&self, _table: TableKind) -> u32 {
                16
            }
        }

        let sink = RejectingSink;
        let mut alloc = DescriptorIndexAllocator::new(&sink);
        assert!(!alloc.allocate_view(view(1, ViewKind::SampledImage)).is_valid());
        assert!(!alloc.allocate_sampler(SamplerPreset::LinearClamp).is_valid());
        assert_eq!(alloc.view_count(), 0);
        assert_eq!(alloc.sampler_count(), 0);
    }

    #[test]
    fn test_sample_view_set_matches_expected_indices() {
        // Two texture views and one sampler preset: {0, 1} and {0}.
        let sink = RecordingSink::new(16);
        let mut alloc = DescriptorIndexAllocator::new(&sink);

        let tex_in = alloc.allocate_view(view(10, ViewKind::SampledImage));
        let tex_out = alloc.allocate_view(view(11, ViewKind::StorageImage));
        let smp = alloc.allocate_sampler(SamplerPreset::PointClamp);

        assert_eq!(tex_in.get(), 0);
        assert_eq!(tex_out.get(), 1);
        assert_eq!(smp.get(), 0);
    }
}
