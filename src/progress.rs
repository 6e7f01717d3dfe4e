//! Reading progress derived from a pacing engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::AddressResolver;
use crate::error::{Error, Result};
use crate::model::DocumentModel;
use crate::pacing::{EngineState, PacingEngine, PacingMode};
use crate::util::time_now_millis;

/// Why a progress update was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressReason {
    Interval,
    Pause,
    Cancel,
    Finish,
}

/// Position and reading-time deltas to fold into a book record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub book_id: String,
    pub reason: ProgressReason,
    pub chapter: usize,
    /// Element index within the chapter.
    pub page: usize,
    pub word_index: usize,
    /// Fraction of the book read, `0.0..=1.0`.
    pub progress: f32,
    /// Wall-clock milliseconds since the Unix epoch.
    pub last_read: i64,
    pub reading_time_minutes_delta: f64,
    pub words_delta: u64,
    pub time_saved_minutes_delta: f64,
    pub mode: PacingMode,
    pub average_wpm: u32,
}

impl ProgressUpdate {
    pub fn is_finish(&self) -> bool {
        self.reason == ProgressReason::Finish
    }
}

pub struct ProgressTracker {
    book_id: String,
    resolver: AddressResolver,
    total: usize,
    interval_ms: u64,
    last_emit_ms: u64,
    last_progress: f32,
    last_rewinds: u64,
    last_active_ms: u64,
    last_words: u64,
    last_saved_ms: i64,
}

impl ProgressTracker {
    /// Fails with [`Error::EmptyBook`] when the model has no words.
    pub fn new(book_id: impl Into<String>, model: Arc<DocumentModel>, interval_ms: u64) -> Result<Self> {
        let total = model.total_word_count();
        if total == 0 {
            return Err(Error::EmptyBook);
        }
        Ok(Self {
            book_id: book_id.into(),
            resolver: AddressResolver::new(model),
            total,
            interval_ms,
            last_emit_ms: 0,
            last_progress: 0.0,
            last_rewinds: 0,
            last_active_ms: 0,
            last_words: 0,
            last_saved_ms: 0,
        })
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    /// Build an update from the engine's state at `now_ms`.
    ///
    /// Interval updates are throttled to one per `interval_ms`; the other
    /// reasons always produce one. Progress only moves backwards after the
    /// engine noted a backward seek.
    pub fn observe(
        &mut self,
        engine: &PacingEngine,
        now_ms: u64,
        reason: ProgressReason,
    ) -> Option<ProgressUpdate> {
        if reason == ProgressReason::Interval
            && now_ms.saturating_sub(self.last_emit_ms) < self.interval_ms
        {
            return None;
        }

        let index = engine.position().min(self.total - 1);
        let mut progress = if engine.state() == EngineState::Finished {
            1.0
        } else {
            index as f32 / self.total as f32
        };
        if engine.rewinds() == self.last_rewinds {
            progress = progress.max(self.last_progress);
        }
        self.last_rewinds = engine.rewinds();

        let address = self.resolver.locate(index).ok()?;
        let stats = engine.stats(now_ms);

        // Stats restart with every run, so a drop means a new run began.
        if stats.words < self.last_words || stats.active_ms < self.last_active_ms {
            self.last_words = 0;
            self.last_active_ms = 0;
            self.last_saved_ms = 0;
        }

        let update = ProgressUpdate {
            book_id: self.book_id.clone(),
            reason,
            chapter: address.chapter,
            page: address.element,
            word_index: index,
            progress,
            last_read: time_now_millis(),
            reading_time_minutes_delta: (stats.active_ms - self.last_active_ms) as f64 / 60_000.0,
            words_delta: stats.words - self.last_words,
            time_saved_minutes_delta: (stats.time_saved_ms - self.last_saved_ms) as f64 / 60_000.0,
            mode: engine.mode(),
            average_wpm: stats.average_wpm(),
        };

        self.last_emit_ms = now_ms;
        self.last_progress = progress;
        self.last_active_ms = stats.active_ms;
        self.last_words = stats.words;
        self.last_saved_ms = stats.time_saved_ms;
        Some(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacingConfig;
    use crate::pacing::Tick;
    use crate::test_helpers::{model_from, model_with_words};

    fn setup(words: usize) -> (PacingEngine, ProgressTracker) {
        let model = Arc::new(model_with_words(words));
        let engine = PacingEngine::new(model.clone(), PacingConfig::default());
        let tracker = ProgressTracker::new("book", model, 5000).unwrap();
        (engine, tracker)
    }

    fn run_until(engine: &mut PacingEngine, index: usize) -> u64 {
        let mut now = 0;
        loop {
            match engine.tick(now) {
                Tick::Word(w) if w.index == index => return now,
                Tick::Wait { until_ms } => now = until_ms,
                Tick::Word(_) => {}
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_empty_book_is_rejected() {
        let model = Arc::new(model_from(&[&["[img]"]]));
        assert!(ProgressTracker::new("book", model, 5000).is_ok());
        let empty = Arc::new(model_from(&[]));
        assert!(matches!(
            ProgressTracker::new("book", empty, 5000),
            Err(Error::EmptyBook)
        ));
    }

    #[test]
    fn test_pause_update() {
        let (mut engine, mut tracker) = setup(100);
        engine.start(0, PacingMode::Standard, 0).unwrap();
        let now = run_until(&mut engine, 50);
        engine.pause(now).unwrap();

        let update = tracker.observe(&engine, now, ProgressReason::Pause).unwrap();
        assert_eq!(update.word_index, 50);
        assert_eq!(update.progress, 0.5);
        assert_eq!(update.chapter, 0);
        assert_eq!(update.page, 50);
        assert_eq!(update.words_delta, 51);
        assert!((update.reading_time_minutes_delta - 10_000.0 / 60_000.0).abs() < 1e-9);
        assert_eq!(update.average_wpm, 306);
    }

    #[test]
    fn test_interval_is_throttled() {
        let (mut engine, mut tracker) = setup(100);
        engine.start(0, PacingMode::Standard, 0).unwrap();
        let now = run_until(&mut engine, 10);
        assert!(tracker.observe(&engine, now, ProgressReason::Interval).is_none());

        let now = run_until(&mut engine, 30);
        let first = tracker.observe(&engine, now, ProgressReason::Interval).unwrap();
        assert_eq!(first.words_delta, 31);
        assert!(tracker.observe(&engine, now + 1000, ProgressReason::Interval).is_none());
        // Pause ignores the throttle and reports only the new words.
        let second = tracker.observe(&engine, now, ProgressReason::Pause).unwrap();
        assert_eq!(second.words_delta, 0);
    }

    #[test]
    fn test_progress_does_not_regress_without_rewind() {
        let (mut engine, mut tracker) = setup(10);
        engine.start(8, PacingMode::Standard, 0).unwrap();
        engine.tick(0);
        let ahead = tracker.observe(&engine, 0, ProgressReason::Pause).unwrap();
        assert_eq!(ahead.progress, 0.8);

        // A new run from an earlier word keeps the high-water mark.
        engine.cancel(0);
        let mut engine = PacingEngine::new(engine.model().clone(), PacingConfig::default());
        engine.start(2, PacingMode::Standard, 0).unwrap();
        engine.tick(0);
        let kept = tracker.observe(&engine, 0, ProgressReason::Pause).unwrap();
        assert_eq!(kept.progress, 0.8);

        // An explicit rewind lets it drop.
        engine.seek(1, 0).unwrap();
        let rewound = tracker.observe(&engine, 0, ProgressReason::Pause).unwrap();
        assert_eq!(rewound.progress, 0.1);
    }

    #[test]
    fn test_finish_reports_whole_book() {
        let (mut engine, mut tracker) = setup(4);
        engine.start(0, PacingMode::Standard, 0).unwrap();
        let mut now = 0;
        while engine.state() == EngineState::Running {
            if let Tick::Wait { until_ms } = engine.tick(now) {
                now = until_ms;
            }
        }
        let update = tracker.observe(&engine, now, ProgressReason::Finish).unwrap();
        assert!(update.is_finish());
        assert_eq!(update.progress, 1.0);
        assert_eq!(update.word_index, 3);
        assert_eq!(update.words_delta, 4);
    }
}
