//! Tokenizing plain element text: word boundaries, punctuation classes,
//! sentence ends and the recognition pivot.
//!
//! All offsets are counted in `char`s, never bytes.

/// Half-open `[start, end)` char range of one word inside an element's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordSpan {
    pub start: usize,
    pub end: usize,
}

impl WordSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Split `text` into maximal runs of non-whitespace characters.
pub fn word_spans(text: &str) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    let mut start = None;
    let mut count = 0;

    for (i, c) in text.chars().enumerate() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push(WordSpan { start: s, end: i });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
        count = i + 1;
    }
    if let Some(s) = start {
        spans.push(WordSpan { start: s, end: count });
    }
    spans
}

/// Substring of `text` between two char offsets.
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let byte_at = |n: usize| {
        text.char_indices()
            .nth(n)
            .map(|(b, _)| b)
            .unwrap_or(text.len())
    };
    let start_byte = byte_at(start);
    let end_byte = byte_at(end).max(start_byte);
    &text[start_byte..end_byte]
}

/// Punctuation pause class of a word, judged by its final character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    None,
    Clause,
    Sentence,
}

const CLOSERS: &[char] = &['"', '\'', '\u{201d}', '\u{2019}', '\u{bb}', '\u{203a}', ')', ']', '}'];
const SENTENCE_MARKS: &[char] = &['.', '!', '?', '\u{2026}'];
const CLAUSE_MARKS: &[char] = &[',', ';', ':', '\u{2013}', '\u{2014}'];

/// Words that end in a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Mr", "Mrs", "Ms", "Dr", "Prof", "Sr", "Jr", "vs", "etc", "e.g", "i.e", "Inc", "Ltd", "Co",
];

/// Classify the trailing punctuation of `word`, ignoring closing quotes and
/// brackets (`"Stop!"` is a sentence end).
pub fn classify_pause(word: &str) -> Pause {
    let bare = word.trim_end_matches(CLOSERS);
    match bare.chars().last() {
        Some(c) if SENTENCE_MARKS.contains(&c) => Pause::Sentence,
        Some(c) if CLAUSE_MARKS.contains(&c) => Pause::Clause,
        _ => Pause::None,
    }
}

/// Whether `word` closes a sentence. Known abbreviations and single
/// letters followed by a period (initials) do not.
pub fn ends_sentence(word: &str) -> bool {
    if classify_pause(word) != Pause::Sentence {
        return false;
    }
    let bare = word.trim_end_matches(CLOSERS);
    let base = bare
        .trim_end_matches(SENTENCE_MARKS)
        .trim_start_matches(|c: char| !c.is_alphanumeric());

    if ABBREVIATIONS.contains(&base) {
        return false;
    }
    !(base.chars().count() == 1 && bare.ends_with('.') && !bare.ends_with(".."))
}

/// Index of the character a reader's eye should fixate on.
pub fn pivot_index(word: &str) -> usize {
    let len = word.trim().chars().count();
    let pivot = match len {
        0 | 1 => 0,
        2..=5 => 1,
        6..=9 => 2,
        10..=13 => 3,
        _ => 4,
    };
    pivot.min(len.saturating_sub(1))
}
