//! Pacing a parsed book, with a simulated clock and on a real thread.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{long_book, sample_book};
use lura::{
    ArchiveReader, CancelToken, DocumentModel, EngineState, Error, PacedWord, PacerEvent,
    PacingConfig, PacingEngine, PacingMode, PacingSession, ProgressReason, ProgressTracker, Tick,
    ingest,
};

fn model(bytes: Vec<u8>) -> Arc<DocumentModel> {
    let archive = ArchiveReader::from_bytes(bytes).unwrap();
    Arc::new(ingest(&archive, &CancelToken::new()).unwrap())
}

/// Run the engine to the end, jumping the clock to each due time.
fn run(engine: &mut PacingEngine, mut now: u64) -> (Vec<PacedWord>, u64) {
    let mut words = Vec::new();
    loop {
        match engine.tick(now) {
            Tick::Word(word) => words.push(word),
            Tick::Wait { until_ms } => now = until_ms,
            Tick::Finished => return (words, now),
            other => panic!("unexpected tick {other:?}"),
        }
    }
}

#[test]
fn test_sample_stream_timings() {
    let mut engine = PacingEngine::new(model(sample_book()), PacingConfig::default());
    engine.start(0, PacingMode::Standard, 0).unwrap();
    let (words, _) = run(&mut engine, 0);

    let texts: Vec<&str> = words.iter().take(4).map(|w| w.text.as_str()).collect();
    assert_eq!(texts, ["Hello", "world.", "Second", "line"]);
    let millis: Vec<u128> = words.iter().take(4).map(|w| w.duration.as_millis()).collect();
    assert_eq!(millis, [200, 350, 200, 200]);
    assert!(words[1].ends_sentence);
}

#[test]
fn test_standard_run_reaches_finished() {
    let model = model(long_book(2, 5, 10));
    let total = model.total_word_count();
    let mut engine = PacingEngine::new(model, PacingConfig::default());
    engine.start(0, PacingMode::Standard, 0).unwrap();
    let (words, elapsed) = run(&mut engine, 0);

    assert_eq!(engine.state(), EngineState::Finished);
    assert_eq!(words.len(), total);
    assert!(words.iter().enumerate().all(|(i, w)| w.index == i));
    assert!(elapsed >= total as u64 * 200);
}

#[test]
fn test_seek_past_end_clamps() {
    let model = model(long_book(5, 10, 10));
    assert_eq!(model.total_word_count(), 510);
    let mut engine = PacingEngine::new(model, PacingConfig::default());
    assert_eq!(engine.seek(1000, 0).unwrap(), 509);
}

#[test]
fn test_cancel_from_paused() {
    let mut engine = PacingEngine::new(model(sample_book()), PacingConfig::default());
    engine.start(0, PacingMode::Standard, 0).unwrap();
    engine.tick(0);
    engine.pause(100).unwrap();
    engine.cancel(200);

    assert_eq!(engine.state(), EngineState::Cancelled);
    assert!(matches!(
        engine.resume(300),
        Err(Error::EngineState { state: EngineState::Cancelled, .. })
    ));
}

#[test]
fn test_restart_after_finish() {
    let mut engine = PacingEngine::new(model(sample_book()), PacingConfig::default());
    engine.start(0, PacingMode::Standard, 0).unwrap();
    run(&mut engine, 0);
    engine.start(2, PacingMode::Standard, 0).unwrap();
    let (words, _) = run(&mut engine, 0);
    assert_eq!(words[0].text, "Second");
}

#[test]
fn test_progress_over_a_run() {
    let model = model(sample_book());
    let total = model.total_word_count();
    let mut engine = PacingEngine::new(model.clone(), PacingConfig::default());
    let mut tracker = ProgressTracker::new("sample", model, 5000).unwrap();

    engine.start(0, PacingMode::Standard, 0).unwrap();
    engine.tick(0);
    engine.tick(200);
    engine.tick(550);
    engine.pause(600).unwrap();
    let paused = tracker.observe(&engine, 600, ProgressReason::Pause).unwrap();
    assert_eq!(paused.word_index, 2);
    assert_eq!(paused.chapter, 0);
    assert_eq!(paused.page, 1);
    assert_eq!(paused.progress, 2.0 / total as f32);
    assert_eq!(paused.words_delta, 3);

    engine.resume(10_000).unwrap();
    let (_, end) = run(&mut engine, 10_000);
    let done = tracker.observe(&engine, end, ProgressReason::Finish).unwrap();
    assert_eq!(done.progress, 1.0);
    assert_eq!(done.words_delta as usize, total - 3);
    let json = serde_json::to_value(&done).unwrap();
    assert_eq!(json["bookId"], "sample");
    assert_eq!(json["reason"], "finish");
}

#[test]
fn test_session_streams_words_in_real_time() {
    let config = PacingConfig {
        max_wpm: 6000,
        ..PacingConfig::default()
    }
    .with_standard_wpm(6000);
    let engine = PacingEngine::new(model(sample_book()), config);
    let total = engine.total();

    let started = Instant::now();
    let (session, events) =
        PacingSession::spawn(engine, "sample", 0, PacingMode::Standard, None).unwrap();
    let events: Vec<PacerEvent> = events.iter().collect();
    session.join();

    let words = events
        .iter()
        .filter(|e| matches!(e, PacerEvent::Word(_)))
        .count();
    assert_eq!(words, total);
    assert!(matches!(events.last(), Some(PacerEvent::Finished(_))));
    // 10ms per word at 6000 WPM, longer for punctuation.
    assert!(started.elapsed() >= Duration::from_millis(10 * total as u64));
}

#[test]
fn test_session_pause_resume_and_seek() {
    let config = PacingConfig {
        max_wpm: 6000,
        ..PacingConfig::default()
    }
    .with_standard_wpm(6000);
    let engine = PacingEngine::new(model(long_book(1, 10, 10)), config);
    let (session, events) =
        PacingSession::spawn(engine, "long", 0, PacingMode::Standard, None).unwrap();

    assert!(matches!(events.recv().unwrap(), PacerEvent::Word(w) if w.index == 0));
    session.pause().unwrap();
    assert_eq!(session.state(), EngineState::Paused);
    assert_eq!(session.seek(50).unwrap(), 50);
    session.resume().unwrap();

    // Words already in flight before the pause may still arrive; after the
    // seek the stream continues from word 50.
    let next = events
        .iter()
        .filter_map(|e| match e {
            PacerEvent::Word(w) => Some(w.index),
            _ => None,
        })
        .find(|&i| i >= 50);
    assert_eq!(next, Some(50));

    session.cancel();
    assert!(events.iter().any(|e| matches!(e, PacerEvent::Cancelled(_))));
}
