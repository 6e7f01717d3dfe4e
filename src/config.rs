//! Runtime configuration, loaded from JSON. Every field has a default, so a
//! partial file (or none at all) is fine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pacing: PacingConfig,
    pub library: LibraryConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.pacing.validate()?;
        if self.library.cache_capacity == 0 {
            return Err(Error::Config("library.cache_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Target rate in standard mode; clamped to `[min_wpm, max_wpm]`.
    pub standard_wpm: u32,
    pub min_wpm: u32,
    pub max_wpm: u32,
    pub sentence_multiplier: f64,
    pub clause_multiplier: f64,
    /// Words longer than this many chars get `long_word_multiplier`.
    pub long_word_chars: usize,
    pub long_word_multiplier: f64,
    /// Display time of an image placeholder.
    pub placeholder_dwell_ms: u64,
    /// No word is shown for less than this.
    pub min_word_ms: u64,
    /// Progress updates while running are at least this far apart.
    pub progress_interval_ms: u64,
    pub pulse: PulseConfig,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            standard_wpm: 300,
            min_wpm: 100,
            max_wpm: 1500,
            sentence_multiplier: 1.75,
            clause_multiplier: 1.3,
            long_word_chars: 8,
            long_word_multiplier: 1.1,
            placeholder_dwell_ms: 1500,
            min_word_ms: 60,
            progress_interval_ms: 5000,
            pulse: PulseConfig::default(),
        }
    }
}

impl PacingConfig {
    pub fn standard_rate(&self) -> u32 {
        self.standard_wpm.clamp(self.min_wpm, self.max_wpm)
    }

    pub fn with_standard_wpm(mut self, wpm: u32) -> Self {
        self.standard_wpm = wpm;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(format!("pacing.{msg}")));
        if self.min_wpm == 0 {
            return fail("min_wpm must be positive");
        }
        if self.min_wpm > self.max_wpm {
            return fail("min_wpm exceeds max_wpm");
        }
        for (name, value) in [
            ("sentence_multiplier", self.sentence_multiplier),
            ("clause_multiplier", self.clause_multiplier),
            ("long_word_multiplier", self.long_word_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return fail(&format!("{name} must be a positive number"));
            }
        }
        if self.pulse.ramp_every == 0 {
            return fail("pulse.ramp_every must be at least 1");
        }
        Ok(())
    }
}

/// Adaptive rate for pulse mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Rate a pulse session starts at; the standard rate when unset.
    pub start_wpm: Option<u32>,
    pub ceiling_wpm: u32,
    /// Consecutive words needed for one step up.
    pub ramp_every: u32,
    pub ramp_step: u32,
    pub miss_penalty: u32,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            start_wpm: None,
            ceiling_wpm: 600,
            ramp_every: 25,
            ramp_step: 10,
            miss_penalty: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Parsed models kept in memory.
    pub cache_capacity: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self { cache_capacity: 4 }
    }
}
