use std::time::Duration;

/// Timing and retry policy of the send loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Consecutive refused opens before the controller terminates.
    pub max_open_attempts: u32,
    /// Sleep after a refused open.
    pub refusal_backoff: Duration,
    /// Sleep after a transient error, once the connection is closed.
    pub error_backoff: Duration,
    /// Status polls allowed for one frame before giving up.
    pub confirm_attempts: u32,
    /// Interval between polls while waiting for the board to accept packets.
    pub accept_poll_interval: Duration,
    /// Interval between polls while waiting for the board to drain.
    pub finish_poll_interval: Duration,
    /// Consecutive no-reply polls tolerated while draining.
    pub drain_no_reply_limit: u32,
    /// Sleep while paused with nothing realtime to send.
    pub paused_poll_interval: Duration,
    /// Idle backoff step; the n-th consecutive idle pass sleeps `n * idle_step`.
    pub idle_step: Duration,
    /// Cap on the idle multiplier.
    pub idle_max_steps: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_open_attempts: 5,
            refusal_backoff: Duration::from_secs(3),
            error_backoff: Duration::from_millis(500),
            confirm_attempts: 300,
            accept_poll_interval: Duration::from_millis(50),
            finish_poll_interval: Duration::from_millis(100),
            drain_no_reply_limit: 10,
            paused_poll_interval: Duration::from_millis(250),
            idle_step: Duration::from_millis(20),
            idle_max_steps: 50,
        }
    }
}

impl ControllerConfig {
    /// Idle sleep for the given consecutive idle count.
    pub fn idle_backoff(&self, idle_count: u32) -> Duration {
        self.idle_step * idle_count.min(self.idle_max_steps)
    }
}
