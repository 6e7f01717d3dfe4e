use std::time::Duration;

use crate::config::PacingConfig;
use crate::model::WordRef;
use crate::text::Pause;

/// How long `word` stays on screen at `wpm`.
///
/// The base is `60000 / wpm` ms, stretched for sentence or clause
/// punctuation and for long words. Placeholders get a fixed dwell. Nothing
/// goes below the configured floor.
pub fn word_duration(word: &WordRef<'_>, wpm: u32, config: &PacingConfig) -> Duration {
    if word.placeholder {
        return Duration::from_millis(config.placeholder_dwell_ms.max(config.min_word_ms));
    }

    let mut ms = 60_000.0 / f64::from(wpm.max(1));
    ms *= match word.pause {
        Pause::Sentence => config.sentence_multiplier,
        Pause::Clause => config.clause_multiplier,
        Pause::None => 1.0,
    };
    if word.text.chars().count() > config.long_word_chars {
        ms *= config.long_word_multiplier;
    }

    Duration::from_millis((ms.round() as u64).max(config.min_word_ms))
}
