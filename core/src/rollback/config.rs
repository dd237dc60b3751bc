//! Rollback window configuration

/// Default rollback window in frames (how far the session can rewind)
pub const DEFAULT_MAX_ROLLBACK_FRAMES: u32 = 30;

/// Settings for a [`RollbackSession`](super::RollbackSession)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackConfig {
    /// Frames of state and input history retained behind the current frame
    pub max_rollback_frames: u32,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_rollback_frames: DEFAULT_MAX_ROLLBACK_FRAMES,
        }
    }
}

impl RollbackConfig {
    /// Config with the given window. A zero window is raised to one frame.
    pub fn with_window(max_rollback_frames: u32) -> Self {
        Self {
            max_rollback_frames: max_rollback_frames.max(1),
        }
    }

    /// Oldest frame retained once `frame` has been recorded.
    pub fn floor(&self, frame: u32) -> u32 {
        frame.saturating_sub(self.max_rollback_frames)
    }
}
