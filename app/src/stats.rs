//! Frame statistics.

use std::time::Instant;

/// Frames-per-second accumulator with a one-second averaging window.
pub struct FrameStats {
    window_start: Instant,
    frames_in_window: u32,
    last_fps: Option<f32>,
}

impl FrameStats {
    /// Start counting.
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames_in_window: 0,
            last_fps: None,
        }
    }

    /// Record one presented frame.
    ///
    /// Returns a freshly averaged FPS value once per window.
    pub fn tick(&mut self) -> Option<f32> {
        self.frames_in_window += 1;

        let elapsed = self.window_start.elapsed().as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }

        let fps = self.frames_in_window as f32 / elapsed;
        self.window_start = Instant::now();
        self.frames_in_window = 0;
        self.last_fps = Some(fps);
        Some(fps)
    }

    /// The most recent average, if a full window has elapsed.
    pub fn fps(&self) -> Option<f32> {
        self.last_fps
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_average_before_window_elapses() {
        let mut stats = FrameStats::new();
        assert!(stats.tick().is_none());
        assert!(stats.fps().is_none());
    }
}
