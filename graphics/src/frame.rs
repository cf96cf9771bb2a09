//! Frame scheduling across multiple frames in flight.
//!
//! The scheduler owns N rotating frame slots, each with its own command
//! list and completion marker, and decides when the CPU may safely reuse a
//! slot's resources. With N slots the CPU can record frame k+1 while the
//! device still executes frame k; the only cross-frame hazard, resetting a
//! slot's command list before the device finished consuming it, is exactly
//! what the fence wait in [`begin_frame`](FrameScheduler::begin_frame) and
//! [`advance`](FrameScheduler::advance) prevents.
//!
//! # Slot lifecycle
//!
//! ```text
//! Idle ──begin_frame──► Recording ──end_frame──► Submitted
//!  ▲                                                │
//!  └────────── wait until marker reached ◄──────────┘
//!              (inside begin_frame / advance)
//! ```
//!
//! Markers are strictly increasing across ticks. A slot is never moved to
//! `Recording` while its previously stamped marker exceeds the device's
//! completed value.
//!
//! # Shutdown
//!
//! [`wait_idle`](FrameScheduler::wait_idle) drains every slot before
//! resources are released. Skipping it means destroying memory the device
//! may still touch, which is undefined behavior upstream, so this is the
//! one unconditionally mandatory wait.

use std::sync::Arc;
use std::time::Duration;

use crate::command::CommandList;
use crate::device::{GpuQueue, DEFAULT_WAIT_TIMEOUT};
use crate::error::GraphicsError;

/// Bound for the scheduler's blocking waits.
///
/// The default matches the device wait timeout; an infinite policy is
/// acceptable for a reference setup but hangs forever on a lost device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Maximum time a single wait may block, or `None` for no bound.
    pub timeout: Option<Duration>,
}

impl WaitPolicy {
    /// Wait without bound.
    pub fn infinite() -> Self {
        Self { timeout: None }
    }

    /// Wait at most `timeout` per blocking point.
    pub fn bounded(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_WAIT_TIMEOUT)
    }
}

/// Lifecycle state of a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Safe to record into.
    Idle,
    /// Currently being recorded.
    Recording,
    /// Submitted; the device has not necessarily finished it.
    Submitted,
}

/// One of the N rotating per-frame recording slots.
#[derive(Debug)]
struct FrameSlot {
    state: SlotState,
    /// Marker value stamped at the last submission; 0 = never submitted.
    pending: u64,
    commands: CommandList,
}

impl FrameSlot {
    fn new() -> Self {
        Self {
            state: SlotState::Idle,
            pending: 0,
            commands: CommandList::new(),
        }
    }
}

/// Fence-driven scheduler for N frames in flight.
///
/// The scheduler exclusively owns the slot array and their command lists.
/// It is single-threaded by design: one CPU thread records and submits, the
/// device consumes asynchronously, and the completion counter is the only
/// coordination point between them.
pub struct FrameScheduler {
    queue: Arc<dyn GpuQueue>,
    slots: Vec<FrameSlot>,
    current: usize,
    /// Next marker value to stamp; strictly increasing.
    next_marker: u64,
    frame_count: u64,
    policy: WaitPolicy,
}

impl FrameScheduler {
    /// Create a scheduler with `slot_count` frames in flight.
    ///
    /// Marker values start just above whatever the device has already
    /// completed, so setup submissions (asset uploads) that signaled the
    /// counter earlier stay below every frame marker.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is 0.
    pub fn new(queue: Arc<dyn GpuQueue>, slot_count: usize) -> Self {
        Self::with_policy(queue, slot_count, WaitPolicy::default())
    }

    /// Create a scheduler with an explicit wait policy.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is 0.
    pub fn with_policy(queue: Arc<dyn GpuQueue>, slot_count: usize, policy: WaitPolicy) -> Self {
        assert!(slot_count > 0, "slot_count must be at least 1");

        let next_marker = queue.completed_value() + 1;
        Self {
            queue,
            slots: (0..slot_count).map(|_| FrameSlot::new()).collect(),
            current: 0,
            next_marker,
            frame_count: 0,
            policy,
        }
    }

    /// Number of frame slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot the next frame will record into.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Lifecycle state of a slot.
    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot].state
    }

    /// Marker the slot was last stamped with (0 if never submitted).
    pub fn slot_marker(&self, slot: usize) -> u64 {
        self.slots[slot].pending
    }

    /// Total frames begun.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The device's completed marker value.
    pub fn completed_value(&self) -> u64 {
        self.queue.completed_value()
    }

    /// Begin recording into the current slot.
    ///
    /// Blocks until the device has reached the marker this slot was last
    /// stamped with, then resets the slot's command list and returns it for
    /// recording.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::DeviceTimeout`] if the wait policy expires before
    /// the slot's prior work completes.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already recording: `begin_frame` twice without
    /// an intervening `end_frame` is a logic defect.
    pub fn begin_frame(&mut self) -> Result<&mut CommandList, GraphicsError> {
        let slot = &mut self.slots[self.current];
        assert!(
            slot.state != SlotState::Recording,
            "slot {} is already recording",
            self.current
        );

        // Transient device-busy is handled here and never surfaced: block
        // until the slot's prior recording has been fully consumed.
        if slot.pending > 0 {
            self.queue.wait_until(slot.pending, self.policy.timeout)?;
        }

        slot.state = SlotState::Recording;
        slot.commands.reset();
        self.frame_count += 1;

        log::trace!(
            "begin frame {} (slot {}, prior marker {})",
            self.frame_count,
            self.current,
            slot.pending
        );

        Ok(&mut slot.commands)
    }

    /// Access the current slot's command list while recording.
    ///
    /// # Panics
    ///
    /// Panics if the current slot is not in the `Recording` state.
    pub fn recording(&mut self) -> &mut CommandList {
        let slot = &mut self.slots[self.current];
        assert!(
            slot.state == SlotState::Recording,
            "slot {} is not recording",
            self.current
        );
        &mut slot.commands
    }

    /// Submit the current slot's recording.
    ///
    /// Stamps the slot with the next strictly-increasing marker value and
    /// submits its command list; the device signals the marker when the
    /// work completes. Returns the stamped marker.
    ///
    /// # Panics
    ///
    /// Panics if the current slot is not in the `Recording` state.
    pub fn end_frame(&mut self) -> Result<u64, GraphicsError> {
        let slot = &mut self.slots[self.current];
        assert!(
            slot.state == SlotState::Recording,
            "end_frame on slot {} which is not recording",
            self.current
        );

        let marker = self.next_marker;
        self.queue.submit(&slot.commands, marker)?;
        self.next_marker += 1;
        slot.pending = marker;
        slot.state = SlotState::Submitted;

        log::trace!("end frame (slot {}, marker {})", self.current, marker);

        Ok(marker)
    }

    /// Advance to the slot the surface reports for the next frame.
    ///
    /// Called once per tick after present. If the target slot's prior marker
    /// has not been reached yet, this performs the blocking wait before
    /// returning control. This is the steady-state backpressure point when
    /// the CPU runs more than N-1 frames ahead.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::DeviceTimeout`] if the wait policy expires.
    ///
    /// # Panics
    ///
    /// Panics if `next_slot` is out of range or the current slot is still
    /// recording.
    pub fn advance(&mut self, next_slot: usize) -> Result<(), GraphicsError> {
        assert!(next_slot < self.slots.len(), "invalid slot index");
        assert!(
            self.slots[self.current].state != SlotState::Recording,
            "advance while slot {} is still recording",
            self.current
        );

        self.current = next_slot;

        let slot = &mut self.slots[self.current];
        if slot.pending > 0 && self.queue.completed_value() < slot.pending {
            log::trace!(
                "slot {} not ready (marker {}, completed {}), waiting",
                self.current,
                slot.pending,
                self.queue.completed_value()
            );
            self.queue.wait_until(slot.pending, self.policy.timeout)?;
        }
        slot.state = SlotState::Idle;

        Ok(())
    }

    /// Wait until every slot's stamped marker has been reached.
    ///
    /// Must be called before releasing any resource an in-flight frame may
    /// reference. All slots are back to `Idle` afterwards.
    ///
    /// # Errors
    ///
    /// [`GraphicsError::DeviceTimeout`] if the wait policy expires.
    pub fn wait_idle(&mut self) -> Result<(), GraphicsError> {
        // Markers are monotonic, so waiting for the highest stamped value
        // drains every slot at once.
        let highest = self.slots.iter().map(|s| s.pending).max().unwrap_or(0);
        if highest > 0 {
            log::trace!("draining in-flight frames up to marker {}", highest);
            self.queue.wait_until(highest, self.policy.timeout)?;
        }
        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
        }
        log::trace!("device idle");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::SimGpu;

    fn manual_queue() -> Arc<SimGpu> {
        Arc::new(SimGpu::manual(3))
    }

    #[test]
    fn test_new() {
        let queue = manual_queue();
        let scheduler = FrameScheduler::new(queue, 3);
        assert_eq!(scheduler.slot_count(), 3);
        assert_eq!(scheduler.current_slot(), 0);
        assert_eq!(scheduler.frame_count(), 0);
        assert_eq!(scheduler.slot_state(0), SlotState::Idle);
    }

    #[test]
    #[should_panic(expected = "slot_count must be at least 1")]
    fn test_zero_slots_panics() {
        FrameScheduler::new(manual_queue(), 0);
    }

    #[test]
    fn test_markers_strictly_increase() {
        let queue = manual_queue();
        let mut scheduler = FrameScheduler::new(queue.clone(), 3);

        let mut previous = 0;
        for tick in 0..6 {
            scheduler.begin_frame().unwrap();
            let marker = scheduler.end_frame().unwrap();
            assert!(marker > previous, "marker must increase every tick");
            previous = marker;
            queue.complete_to(marker);
            scheduler.advance((tick + 1) % 3).unwrap();
        }
    }

    #[test]
    fn test_never_records_ahead_of_completion() {
        let queue = manual_queue();
        let mut scheduler = FrameScheduler::new(queue.clone(), 3);

        // Complete everything as soon as it is submitted; then across many
        // ticks the slot's stamped marker may never exceed the completed
        // value at the moment recording begins.
        for tick in 0..16 {
            scheduler.begin_frame().unwrap();
            let slot = scheduler.current_slot();
            assert!(
                scheduler.slot_marker(slot) <= queue.completed_value(),
                "slot {} entered Recording with unreached marker",
                slot
            );
            let marker = scheduler.end_frame().unwrap();
            queue.complete_to(marker);
            scheduler.advance((tick + 1) % 3).unwrap();
        }
    }

    #[test]
    #[should_panic(expected = "already recording")]
    fn test_double_begin_panics() {
        let mut scheduler = FrameScheduler::new(manual_queue(), 3);
        scheduler.begin_frame().unwrap();
        let _ = scheduler.begin_frame();
    }

    #[test]
    #[should_panic(expected = "not recording")]
    fn test_end_without_begin_panics() {
        let mut scheduler = FrameScheduler::new(manual_queue(), 3);
        let _ = scheduler.end_frame();
    }

    #[test]
    #[should_panic(expected = "invalid slot index")]
    fn test_advance_out_of_range_panics() {
        let mut scheduler = FrameScheduler::new(manual_queue(), 3);
        let _ = scheduler.advance(3);
    }

    #[test]
    fn test_backpressure_blocks_on_slot_reuse() {
        let queue = manual_queue();
        let mut scheduler = FrameScheduler::with_policy(
            queue.clone(),
            3,
            WaitPolicy::bounded(Duration::from_millis(20)),
        );

        // Three frames submitted, none completed: every slot is stamped.
        for tick in 0..2 {
            scheduler.begin_frame().unwrap();
            scheduler.end_frame().unwrap();
            scheduler.advance(tick + 1).unwrap();
        }
        scheduler.begin_frame().unwrap();
        scheduler.end_frame().unwrap();

        // Wrapping back to slot 0 (marker 1, unreached) must block; with a
        // short bounded policy the block surfaces as a timeout.
        let err = scheduler.advance(0).unwrap_err();
        assert!(matches!(err, GraphicsError::DeviceTimeout { value: 1, .. }));

        // Once the device reaches marker 1, the same advance goes through.
        queue.complete_to(1);
        scheduler.advance(0).unwrap();
        assert_eq!(scheduler.slot_state(0), SlotState::Idle);
    }

    #[test]
    fn test_blocked_advance_resumes_when_marker_reached() {
        let queue = manual_queue();
        let mut scheduler = FrameScheduler::new(queue.clone(), 3);

        for tick in 0..2 {
            scheduler.begin_frame().unwrap();
            scheduler.end_frame().unwrap();
            scheduler.advance(tick + 1).unwrap();
        }
        scheduler.begin_frame().unwrap();
        scheduler.end_frame().unwrap();

        // Complete marker 1 from another thread while advance blocks on it.
        let completer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                queue.complete_to(1);
            })
        };

        scheduler.advance(0).unwrap();
        completer.join().unwrap();
        assert!(queue.completed_value() >= 1);
    }

    #[test]
    fn test_wait_idle_drains_all_slots() {
        let queue = manual_queue();
        let mut scheduler = FrameScheduler::new(queue.clone(), 3);

        for tick in 0..2 {
            scheduler.begin_frame().unwrap();
            let marker = scheduler.end_frame().unwrap();
            queue.complete_to(marker);
            scheduler.advance(tick + 1).unwrap();
        }
        scheduler.begin_frame().unwrap();
        let last = scheduler.end_frame().unwrap();

        let completer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                queue.complete_to(last);
            })
        };

        scheduler.wait_idle().unwrap();
        completer.join().unwrap();
        assert!(queue.completed_value() >= last);
        for slot in 0..3 {
            assert_eq!(scheduler.slot_state(slot), SlotState::Idle);
        }
    }

    #[test]
    fn test_wait_idle_with_nothing_pending() {
        let mut scheduler = FrameScheduler::new(manual_queue(), 3);
        // No frame was ever submitted; returns immediately.
        scheduler.wait_idle().unwrap();
    }

    #[test]
    fn test_timeout_surfaces_from_begin_frame() {
        let queue = manual_queue();
        let mut scheduler = FrameScheduler::with_policy(
            queue.clone(),
            1,
            WaitPolicy::bounded(Duration::from_millis(10)),
        );

        scheduler.begin_frame().unwrap();
        scheduler.end_frame().unwrap();
        scheduler.advance(0).unwrap_err();

        // The single slot's marker is never completed; with one slot the
        // next begin_frame also has to wait and times out.
        let err = scheduler.begin_frame().unwrap_err();
        assert!(matches!(err, GraphicsError::DeviceTimeout { .. }));
    }

    #[test]
    fn test_markers_start_above_setup_submissions() {
        let queue = manual_queue();
        // Simulate a setup upload that signaled value 1 before the
        // scheduler exists.
        queue.complete_to(1);

        let mut scheduler = FrameScheduler::new(queue.clone(), 3);
        scheduler.begin_frame().unwrap();
        let marker = scheduler.end_frame().unwrap();
        assert_eq!(marker, 2);
    }
}
