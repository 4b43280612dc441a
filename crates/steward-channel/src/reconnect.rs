use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicyConfig {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicyConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    Idle,
    Connecting,
    Connected,
    Disconnected { attempt: u32 },
    Exhausted,
}

/// Backoff bookkeeping for one driver task. The counter lives here rather
/// than on a connection, so a closing socket can only report "I'm gone".
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectPolicyConfig,
    phase: ReconnectPhase,
    attempts: u32,
    backoff: Duration,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectPolicyConfig) -> Self {
        Self {
            config,
            phase: ReconnectPhase::Idle,
            attempts: 0,
            backoff: config.initial,
        }
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_connecting(&mut self) {
        self.phase = ReconnectPhase::Connecting;
    }

    pub fn on_connected(&mut self) {
        self.phase = ReconnectPhase::Connected;
        self.attempts = 0;
        self.backoff = self.config.initial;
    }

    /// Called after a failed connect or an unexpected close. Returns the delay
    /// before the next attempt, or `None` once the attempt budget is spent.
    pub fn on_disconnected(&mut self) -> Option<Duration> {
        if self.phase == ReconnectPhase::Exhausted || self.attempts >= self.config.max_attempts {
            self.phase = ReconnectPhase::Exhausted;
            return None;
        }
        self.attempts += 1;
        self.phase = ReconnectPhase::Disconnected {
            attempt: self.attempts,
        };
        let delay = self.backoff;
        self.backoff = next_backoff(self.backoff, self.config.max);
        Some(delay)
    }

    pub fn on_closed(&mut self) {
        self.phase = ReconnectPhase::Idle;
        self.attempts = 0;
        self.backoff = self.config.initial;
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next = current + current;
    if next > max {
        max
    } else {
        next
    }
}
