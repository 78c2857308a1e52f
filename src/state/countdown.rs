//! Pre-start countdown.
//!
//! The countdown is a repeating timer driven by host ticks. It walks a fixed
//! descending sequence of seconds and reports each step to its instance, which
//! broadcasts announcements and starts itself on the terminal step.

use serde::{Deserialize, Serialize};

use super::host::SoundCue;

/// Host ticks per second.
pub const TICKS_PER_SECOND: u32 = 20;

/// Countdown configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownSetting {
    /// First value of the sequence; counts down to zero.
    pub from: u32,

    /// Ticks before the first step.
    pub initial_delay_ticks: u32,

    /// Ticks between steps.
    pub period_ticks: u32,

    /// Steps at or below this value are announced, as is the first one.
    pub announce_threshold: u32,

    /// Announcement text; `{seconds}` is replaced with the remaining value.
    pub message: String,

    pub sound: SoundCue,
}

impl Default for CountdownSetting {
    fn default() -> Self {
        Self {
            from: 15,
            initial_delay_ticks: TICKS_PER_SECOND,
            period_ticks: TICKS_PER_SECOND,
            announce_threshold: 5,
            message: "Game starts in {seconds} seconds".to_string(),
            sound: SoundCue::default(),
        }
    }
}

impl CountdownSetting {
    pub fn render(&self, seconds: u32) -> String {
        self.message.replace("{seconds}", &seconds.to_string())
    }
}

/// Outcome of advancing a countdown by one host tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// Nothing due this tick
    Idle,
    /// A step that should be broadcast
    Announce(u32),
    /// A step that passes quietly
    Silent(u32),
    /// The terminal step; the task has cancelled itself
    Finished,
}

/// A running countdown.
#[derive(Debug, Clone)]
pub struct CountdownTask {
    from: u32,
    next: u32,
    threshold: u32,
    period: u32,
    ticks_until_step: u32,
    cancelled: bool,
}

impl CountdownTask {
    pub fn new(setting: &CountdownSetting) -> Self {
        Self {
            from: setting.from,
            next: setting.from,
            threshold: setting.announce_threshold,
            period: setting.period_ticks.max(1),
            ticks_until_step: setting.initial_delay_ticks.max(1),
            cancelled: false,
        }
    }

    /// Advance one host tick.
    pub fn advance(&mut self) -> CountdownStep {
        if self.cancelled {
            return CountdownStep::Idle;
        }

        self.ticks_until_step -= 1;
        if self.ticks_until_step > 0 {
            return CountdownStep::Idle;
        }
        self.ticks_until_step = self.period;

        let value = self.next;
        if value == 0 {
            self.cancelled = true;
            return CountdownStep::Finished;
        }
        self.next -= 1;

        if value == self.from || value <= self.threshold {
            CountdownStep::Announce(value)
        } else {
            CountdownStep::Silent(value)
        }
    }

    /// Cancel the countdown. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Value the next step will report.
    pub fn seconds_left(&self) -> u32 {
        self.next
    }
}
