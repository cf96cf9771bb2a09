//! Resource state tracking and barrier generation.
//!
//! Every state-changing device operation goes through the
//! [`ResourceStateTracker`]: it records the access state each resource was
//! last transitioned into and emits the minimal transition set for a
//! requested state. A same-state request is a no-op, not an error. The
//! tracker is consulted, never authoritative over the resource's data; it
//! holds handles and states only.
//!
//! Barriers for several resources are collected into a [`BarrierBatch`] and
//! flushed as a single `Transition` command, keeping synchronization points
//! to a minimum.

use std::collections::HashMap;

use crate::command::CommandList;
use crate::types::ResourceId;

/// Access states a tracked resource can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Initial state after creation; no assumptions about contents.
    #[default]
    Common,
    /// Readable from shaders (sampled).
    ShaderResource,
    /// Read-write storage access from shaders.
    UnorderedAccess,
    /// Source of a copy operation.
    CopySrc,
    /// Destination of a copy operation.
    CopyDst,
    /// Ready for presentation.
    Present,
}

/// A single resource state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierDesc {
    /// The resource being transitioned.
    pub resource: ResourceId,
    /// State the resource is currently in.
    pub from: ResourceState,
    /// State the resource transitions into.
    pub to: ResourceState,
}

/// Tracks the recorded access state of each resource.
///
/// The recorded state must always match the state the device last
/// transitioned the resource into. That invariant is structural: as long as
/// every transition goes through this tracker and into the submitted command
/// stream, the two cannot diverge. A divergence is a programming error, not
/// a runtime condition; there is no recovery path.
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    states: HashMap<ResourceId, ResourceState>,
}

impl ResourceStateTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a resource in the given initial state.
    ///
    /// # Panics
    ///
    /// Panics if the resource is already tracked: double registration means
    /// two owners believe they control the same resource's state.
    pub fn track(&mut self, resource: ResourceId, state: ResourceState) {
        let previous = self.states.insert(resource, state);
        assert!(
            previous.is_none(),
            "resource {:?} is already tracked",
            resource
        );
    }

    /// Get the recorded state of a resource.
    ///
    /// Untracked resources report [`ResourceState::Common`].
    pub fn state(&self, resource: ResourceId) -> ResourceState {
        self.states
            .get(&resource)
            .copied()
            .unwrap_or(ResourceState::Common)
    }

    /// Request a transition to `target`.
    ///
    /// Returns `None` when the resource is already in `target` (no barrier
    /// needed), otherwise exactly one transition descriptor. The recorded
    /// state is updated to `target` either way.
    pub fn transition(
        &mut self,
        resource: ResourceId,
        target: ResourceState,
    ) -> Option<BarrierDesc> {
        let current = self.state(resource);
        if current == target {
            return None;
        }

        self.states.insert(resource, target);
        Some(BarrierDesc {
            resource,
            from: current,
            to: target,
        })
    }

    /// Number of tracked resources.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if any resources are tracked.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// A batch of transitions submitted together as one command.
///
/// Adding a barrier for a resource that is already in the batch replaces the
/// earlier entry; the later request reflects where the resource must end up.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    barriers: Vec<BarrierDesc>,
}

impl BarrierBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a transition through the tracker and collect the barrier, if
    /// one is needed.
    pub fn transition(
        &mut self,
        tracker: &mut ResourceStateTracker,
        resource: ResourceId,
        target: ResourceState,
    ) {
        let Some(barrier) = tracker.transition(resource, target) else {
            return;
        };

        if let Some(existing) = self
            .barriers
            .iter_mut()
            .find(|b| b.resource == barrier.resource)
        {
            existing.to = barrier.to;
        } else {
            self.barriers.push(barrier);
        }
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Get the number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// Record the batch into a command list and clear it.
    ///
    /// Does nothing if the batch is empty.
    pub fn flush(&mut self, commands: &mut CommandList) {
        if self.barriers.is_empty() {
            return;
        }
        commands.transition(std::mem::take(&mut self.barriers));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(raw: u64) -> ResourceId {
        ResourceId::from_raw(raw)
    }

    #[test]
    fn test_untracked_defaults_to_common() {
        let tracker = ResourceStateTracker::new();
        assert_eq!(tracker.state(res(1)), ResourceState::Common);
    }

    #[test]
    #[should_panic(expected = "already tracked")]
    fn test_double_track_panics() {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(res(1), ResourceState::Common);
        tracker.track(res(1), ResourceState::ShaderResource);
    }

    #[test]
    fn test_same_state_is_noop() {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(res(1), ResourceState::UnorderedAccess);

        let barrier = tracker.transition(res(1), ResourceState::UnorderedAccess);
        assert!(barrier.is_none());
        assert_eq!(tracker.state(res(1)), ResourceState::UnorderedAccess);
    }

    #[test]
    fn test_transition_emits_single_barrier() {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(res(1), ResourceState::Common);

        let barrier = tracker
            .transition(res(1), ResourceState::CopyDst)
            .expect("state change must produce a barrier");
        assert_eq!(barrier.from, ResourceState::Common);
        assert_eq!(barrier.to, ResourceState::CopyDst);
        assert_eq!(tracker.state(res(1)), ResourceState::CopyDst);
    }

    #[test]
    fn test_round_trip_restores_state() {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(res(1), ResourceState::UnorderedAccess);

        // Same-state request before the round trip: no barrier.
        assert!(tracker
            .transition(res(1), ResourceState::UnorderedAccess)
            .is_none());

        // A -> B -> A.
        assert!(tracker.transition(res(1), ResourceState::CopySrc).is_some());
        assert!(tracker
            .transition(res(1), ResourceState::UnorderedAccess)
            .is_some());
        assert_eq!(tracker.state(res(1)), ResourceState::UnorderedAccess);

        // Same-state request after the round trip: still no barrier.
        assert!(tracker
            .transition(res(1), ResourceState::UnorderedAccess)
            .is_none());
    }

    #[test]
    fn test_batch_collects_multiple_resources() {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(res(1), ResourceState::UnorderedAccess);
        tracker.track(res(2), ResourceState::Present);

        let mut batch = BarrierBatch::new();
        batch.transition(&mut tracker, res(1), ResourceState::CopySrc);
        batch.transition(&mut tracker, res(2), ResourceState::CopyDst);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_batch_skips_same_state() {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(res(1), ResourceState::UnorderedAccess);

        let mut batch = BarrierBatch::new();
        batch.transition(&mut tracker, res(1), ResourceState::UnorderedAccess);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_batch_replaces_duplicate_resource() {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(res(1), ResourceState::Common);

        let mut batch = BarrierBatch::new();
        batch.transition(&mut tracker, res(1), ResourceState::CopyDst);
        batch.transition(&mut tracker, res(1), ResourceState::Present);

        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_batch_flush_records_one_command() {
        let mut tracker = ResourceStateTracker::new();
        tracker.track(res(1), ResourceState::Common);
        tracker.track(res(2), ResourceState::Common);

        let mut batch = BarrierBatch::new();
        batch.transition(&mut tracker, res(1), ResourceState::CopySrc);
        batch.transition(&mut tracker, res(2), ResourceState::CopyDst);

        let mut commands = CommandList::new();
        batch.flush(&mut commands);
        assert_eq!(commands.len(), 1);
        assert!(batch.is_empty());

        // Flushing an empty batch records nothing.
        batch.flush(&mut commands);
        assert_eq!(commands.len(), 1);
    }
}
