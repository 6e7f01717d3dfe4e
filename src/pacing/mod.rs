//! RSVP pacing: turns the word stream of a [`DocumentModel`] into timed
//! words.
//!
//! [`PacingEngine`] is a deterministic state machine driven by `tick(now_ms)`.
//! It never sleeps; callers decide how time passes. [`PacingSession`] runs an
//! engine on its own thread with a real clock and accepts controls from any
//! thread.

mod pulse;
mod session;
mod timing;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::PacingConfig;
use crate::error::{Error, Result};
use crate::model::DocumentModel;
use crate::text::pivot_index;

pub use pulse::PulseRate;
pub use session::{PacerEvent, PacingSession, ProgressSink};
pub use timing::word_duration;

/// Lifecycle of a pacing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Finished,
    Cancelled,
}

/// Something a caller asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Pause,
    Resume,
    Cancel,
    Seek,
}

impl Action {
    fn name(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Cancel => "cancel",
            Action::Seek => "seek",
        }
    }
}

impl EngineState {
    /// The state reached by applying `action`, or an [`Error::EngineState`]
    /// if the transition is not allowed.
    pub fn apply(self, action: Action) -> Result<EngineState> {
        use EngineState::*;
        let next = match (self, action) {
            (_, Action::Cancel) => Cancelled,
            (Idle | Finished, Action::Start) => Running,
            (Running, Action::Pause) => Paused,
            (Paused, Action::Resume) => Running,
            (Cancelled, Action::Seek) => {
                return Err(Error::EngineState {
                    action: action.name(),
                    state: self,
                });
            }
            (state, Action::Seek) => state,
            (state, _) => {
                return Err(Error::EngineState {
                    action: action.name(),
                    state,
                });
            }
        };
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PacingMode {
    #[default]
    Standard,
    Pulse,
}

/// A word ready to be flashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacedWord {
    pub index: usize,
    /// Empty for image placeholders.
    pub text: String,
    pub duration: Duration,
    pub address: Address,
    /// Character the display should centre on.
    pub pivot: usize,
    /// Rate in force when the word was emitted.
    pub wpm: u32,
    pub placeholder: bool,
    pub ends_sentence: bool,
}

/// Result of [`PacingEngine::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Show this word now.
    Word(PacedWord),
    /// The current word is still on screen until `until_ms`.
    Wait { until_ms: u64 },
    Paused,
    /// The stream was exhausted. Reported once per run, and again on every
    /// later tick.
    Finished,
    Idle,
    Cancelled,
}

/// Counters for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacingStats {
    pub words: u64,
    /// Running time, excluding pauses.
    pub active_ms: u64,
    pub paused_ms: u64,
    /// Time the same words would have taken at the standard rate, minus
    /// `active_ms`. Zero outside pulse mode.
    pub time_saved_ms: i64,
}

impl PacingStats {
    pub fn average_wpm(&self) -> u32 {
        if self.active_ms == 0 {
            return 0;
        }
        (self.words as f64 * 60_000.0 / self.active_ms as f64).round() as u32
    }
}

pub struct PacingEngine {
    model: Arc<DocumentModel>,
    config: PacingConfig,
    state: EngineState,
    mode: PacingMode,
    pulse: PulseRate,
    /// Next word to emit.
    next: usize,
    /// Word currently on screen.
    shown: Option<usize>,
    due_ms: u64,
    /// Time left on the current word when paused.
    remaining_ms: u64,
    running_since: u64,
    paused_since: u64,
    words: u64,
    active_ms: u64,
    paused_ms: u64,
    reference_ms: u64,
    rewinds: u64,
}

impl PacingEngine {
    pub fn new(model: Arc<DocumentModel>, config: PacingConfig) -> Self {
        let pulse = PulseRate::new(&config);
        Self {
            model,
            config,
            state: EngineState::Idle,
            mode: PacingMode::Standard,
            pulse,
            next: 0,
            shown: None,
            due_ms: 0,
            remaining_ms: 0,
            running_since: 0,
            paused_since: 0,
            words: 0,
            active_ms: 0,
            paused_ms: 0,
            reference_ms: 0,
            rewinds: 0,
        }
    }

    pub fn model(&self) -> &Arc<DocumentModel> {
        &self.model
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn mode(&self) -> PacingMode {
        self.mode
    }

    pub fn total(&self) -> usize {
        self.model.total_word_count()
    }

    /// Index of the word on screen, or of the next word if none has been
    /// shown since the last start or seek.
    pub fn position(&self) -> usize {
        self.shown.unwrap_or(self.next)
    }

    /// Count of backward seeks since construction.
    pub fn rewinds(&self) -> u64 {
        self.rewinds
    }

    /// Rate the next word will be shown at.
    pub fn current_wpm(&self) -> u32 {
        match self.mode {
            PacingMode::Standard => self.config.standard_rate(),
            PacingMode::Pulse => self.pulse.current(),
        }
    }

    /// Begin a run at word `from` (clamped to the end of the book).
    pub fn start(&mut self, from: usize, mode: PacingMode, now_ms: u64) -> Result<()> {
        let total = self.total();
        if total == 0 {
            return Err(Error::EmptyBook);
        }
        self.state = self.state.apply(Action::Start)?;
        self.mode = mode;
        self.pulse = PulseRate::new(&self.config);
        self.next = from.min(total);
        self.shown = None;
        self.due_ms = now_ms;
        self.running_since = now_ms;
        self.words = 0;
        self.active_ms = 0;
        self.paused_ms = 0;
        self.reference_ms = 0;
        log::debug!("pacing started at word {} of {total} in {mode:?} mode", self.next);
        Ok(())
    }

    pub fn pause(&mut self, now_ms: u64) -> Result<()> {
        self.state = self.state.apply(Action::Pause)?;
        self.active_ms += now_ms.saturating_sub(self.running_since);
        self.remaining_ms = self.due_ms.saturating_sub(now_ms);
        self.paused_since = now_ms;
        self.pulse.on_pause();
        Ok(())
    }

    pub fn resume(&mut self, now_ms: u64) -> Result<()> {
        self.state = self.state.apply(Action::Resume)?;
        self.paused_ms += now_ms.saturating_sub(self.paused_since);
        self.running_since = now_ms;
        self.due_ms = now_ms + self.remaining_ms;
        Ok(())
    }

    /// Stop for good. Allowed from every state.
    pub fn cancel(&mut self, now_ms: u64) {
        match self.state {
            EngineState::Running => self.active_ms += now_ms.saturating_sub(self.running_since),
            EngineState::Paused => self.paused_ms += now_ms.saturating_sub(self.paused_since),
            _ => {}
        }
        self.state = EngineState::Cancelled;
    }

    /// Jump to word `index`, clamped to the last word. Returns the index
    /// actually used. A backward jump counts as a miss in pulse mode.
    pub fn seek(&mut self, index: usize, now_ms: u64) -> Result<usize> {
        self.state.apply(Action::Seek)?;
        let target = index.min(self.total().saturating_sub(1));
        if target < self.position() {
            self.rewinds += 1;
            self.record_miss();
        }
        self.next = target;
        self.shown = None;
        match self.state {
            EngineState::Running => self.due_ms = now_ms,
            EngineState::Paused => self.remaining_ms = 0,
            _ => {}
        }
        Ok(target)
    }

    /// The reader lost the thread; slow pulse mode down.
    pub fn record_miss(&mut self) {
        if self.mode == PacingMode::Pulse {
            self.pulse.on_miss();
        }
    }

    /// Advance the clock to `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> Tick {
        match self.state {
            EngineState::Idle => return Tick::Idle,
            EngineState::Paused => return Tick::Paused,
            EngineState::Finished => return Tick::Finished,
            EngineState::Cancelled => return Tick::Cancelled,
            EngineState::Running => {}
        }

        if now_ms < self.due_ms {
            return Tick::Wait {
                until_ms: self.due_ms,
            };
        }

        let Some(word) = self.model.word(self.next) else {
            self.active_ms += self.due_ms.max(self.running_since) - self.running_since;
            self.state = EngineState::Finished;
            log::debug!("pacing finished after {} words", self.words);
            return Tick::Finished;
        };

        let wpm = self.current_wpm();
        let duration = word_duration(&word, wpm, &self.config);
        let reference = word_duration(&word, self.config.standard_rate(), &self.config);
        let paced = PacedWord {
            index: word.index,
            text: word.text.to_string(),
            duration,
            address: word.address,
            pivot: pivot_index(word.text),
            wpm,
            placeholder: word.placeholder,
            ends_sentence: word.ends_sentence,
        };

        self.shown = Some(self.next);
        self.next += 1;
        self.due_ms = now_ms + duration.as_millis() as u64;
        self.words += 1;
        self.reference_ms += reference.as_millis() as u64;
        if self.mode == PacingMode::Pulse {
            self.pulse.on_word();
        }
        Tick::Word(paced)
    }

    /// Counters as of `now_ms`.
    pub fn stats(&self, now_ms: u64) -> PacingStats {
        let mut active_ms = self.active_ms;
        let mut paused_ms = self.paused_ms;
        match self.state {
            EngineState::Running => active_ms += now_ms.saturating_sub(self.running_since),
            EngineState::Paused => paused_ms += now_ms.saturating_sub(self.paused_since),
            _ => {}
        }
        let time_saved_ms = match self.mode {
            PacingMode::Pulse => self.reference_ms as i64 - active_ms as i64,
            PacingMode::Standard => 0,
        };
        PacingStats {
            words: self.words,
            active_ms,
            paused_ms,
            time_saved_ms,
        }
    }
}
