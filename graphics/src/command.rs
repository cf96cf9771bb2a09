//! Recorded command lists.
//!
//! Commands are recorded into a [`CommandList`] on the CPU and translated by
//! the backend at submission time. Each frame slot owns exactly one list and
//! resets it before re-recording, so no two in-flight frames ever alias a
//! list; the frame scheduler's fence wait guarantees the device is done
//! with a list before its slot is reset.

use crate::barrier::BarrierDesc;
use crate::record::IndexRecord;
use crate::types::{PipelineHandle, ResourceId};

/// A single recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Transition one or more resources between access states.
    Transition(Vec<BarrierDesc>),
    /// Bind a compute pipeline.
    BindComputePipeline(PipelineHandle),
    /// Deliver a bindless index record as inline shader constants.
    PushRecord(IndexRecord),
    /// Dispatch a compute grid.
    Dispatch {
        /// Workgroup counts per dimension.
        groups: [u32; 3],
    },
    /// Copy a whole image to another image of the same extent.
    CopyImage {
        /// Source image; must be in `CopySrc` state.
        src: ResourceId,
        /// Destination image; must be in `CopyDst` state.
        dst: ResourceId,
    },
}

/// An ordered list of recorded commands.
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    /// Create an empty command list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all recorded commands.
    ///
    /// Called by the frame scheduler once the device has finished consuming
    /// the previous recording for this slot.
    pub fn reset(&mut self) {
        self.commands.clear();
    }

    /// Record a batch of state transitions.
    ///
    /// Empty batches are dropped rather than recorded; a same-state request
    /// upstream produces no barrier and therefore no command.
    pub fn transition(&mut self, barriers: Vec<BarrierDesc>) {
        if barriers.is_empty() {
            return;
        }
        self.commands.push(Command::Transition(barriers));
    }

    /// Record a compute pipeline bind.
    pub fn bind_compute_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(Command::BindComputePipeline(pipeline));
    }

    /// Record an inline index-record upload.
    pub fn push_record(&mut self, record: &IndexRecord) {
        self.commands.push(Command::PushRecord(record.clone()));
    }

    /// Record a compute dispatch.
    pub fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.commands.push(Command::Dispatch {
            groups: [groups_x, groups_y, groups_z],
        });
    }

    /// Record a whole-image copy.
    pub fn copy_image(&mut self, src: ResourceId, dst: ResourceId) {
        self.commands.push(Command::CopyImage { src, dst });
    }

    /// The recorded commands, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::ResourceState;

    #[test]
    fn test_record_and_reset() {
        let mut list = CommandList::new();
        assert!(list.is_empty());

        list.bind_compute_pipeline(PipelineHandle::from_raw(1));
        list.dispatch(4, 4, 1);
        assert_eq!(list.len(), 2);

        list.reset();
        assert!(list.is_empty());
    }

    #[test]
    fn test_empty_transition_not_recorded() {
        let mut list = CommandList::new();
        list.transition(Vec::new());
        assert!(list.is_empty());
    }

    #[test]
    fn test_transition_recorded() {
        let mut list = CommandList::new();
        list.transition(vec![BarrierDesc {
            resource: ResourceId::from_raw(1),
            from: ResourceState::Common,
            to: ResourceState::UnorderedAccess,
        }]);
        assert_eq!(list.len(), 1);
        assert!(matches!(list.commands()[0], Command::Transition(ref b) if b.len() == 1));
    }
}
