use crate::config::PacingConfig;

/// The adaptive rate of pulse mode.
///
/// Starts at the configured start rate and climbs by `ramp_step` after
/// every `ramp_every` uninterrupted words, up to the ceiling. A miss drops
/// it by `miss_penalty`, never below the standard rate.
#[derive(Debug, Clone)]
pub struct PulseRate {
    floor: u32,
    ceiling: u32,
    current: u32,
    streak: u32,
    ramp_every: u32,
    ramp_step: u32,
    miss_penalty: u32,
}

impl PulseRate {
    pub fn new(config: &PacingConfig) -> Self {
        let floor = config.standard_rate();
        let ceiling = config.pulse.ceiling_wpm.max(floor);
        let start = config.pulse.start_wpm.unwrap_or(floor).clamp(floor, ceiling);
        Self {
            floor,
            ceiling,
            current: start,
            streak: 0,
            ramp_every: config.pulse.ramp_every.max(1),
            ramp_step: config.pulse.ramp_step,
            miss_penalty: config.pulse.miss_penalty,
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Count one word shown without interruption.
    pub fn on_word(&mut self) {
        self.streak += 1;
        if self.streak >= self.ramp_every {
            self.streak = 0;
            self.current = self.current.saturating_add(self.ramp_step).min(self.ceiling);
        }
    }

    pub fn on_miss(&mut self) {
        self.streak = 0;
        self.current = self.current.saturating_sub(self.miss_penalty).max(self.floor);
    }

    pub fn on_pause(&mut self) {
        self.streak = 0;
    }
}
