//! The immutable document model: chapters of typed elements with word
//! tables, plus the flattened word stream the pacing engine reads.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::flatten::FlatElement;
use crate::package::{Metadata, TocEntry};
use crate::text::{Pause, WordSpan, classify_pause, ends_sentence, word_spans};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    Paragraph,
    Heading(u8),
    ListItem,
    BlockQuote,
    /// Placeholder for an image: no text, counts as one word.
    Image,
    Other,
}

impl ElementKind {
    fn tag(&self) -> String {
        match self {
            ElementKind::Paragraph => "p".into(),
            ElementKind::Heading(level) => format!("h{level}"),
            ElementKind::ListItem => "li".into(),
            ElementKind::BlockQuote => "blockquote".into(),
            ElementKind::Image => "img".into(),
            ElementKind::Other => "other".into(),
        }
    }
}

/// One content element of a chapter.
#[derive(Debug, Clone)]
pub struct Element {
    pub index: usize,
    pub kind: ElementKind,
    pub text: String,
    /// Word boundaries in chars. Empty for image placeholders.
    pub words: Vec<WordSpan>,
    /// Length of `text` in chars.
    pub char_len: usize,
    pub source: Option<String>,
    pub alt: Option<String>,
    byte_ranges: Vec<(usize, usize)>,
}

impl Element {
    pub fn new(index: usize, flat: FlatElement) -> Self {
        let (words, byte_ranges, char_len) = if flat.kind == ElementKind::Image {
            (Vec::new(), Vec::new(), 0)
        } else {
            let words = word_spans(&flat.text);
            let offsets: Vec<usize> = flat
                .text
                .char_indices()
                .map(|(b, _)| b)
                .chain(std::iter::once(flat.text.len()))
                .collect();
            let byte_ranges = words
                .iter()
                .map(|w| (offsets[w.start], offsets[w.end]))
                .collect();
            (words, byte_ranges, offsets.len() - 1)
        };
        Self {
            index,
            kind: flat.kind,
            text: flat.text,
            words,
            char_len,
            source: flat.source,
            alt: flat.alt,
            byte_ranges,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == ElementKind::Image
    }

    /// Words this element contributes to the stream (1 for a placeholder).
    pub fn word_count(&self) -> usize {
        if self.is_placeholder() {
            1
        } else {
            self.words.len()
        }
    }

    /// Text of word `i` within this element.
    pub fn word_text(&self, i: usize) -> Option<&str> {
        self.byte_ranges.get(i).map(|&(s, e)| &self.text[s..e])
    }

    /// Index of the word containing `offset`, or the word whose trailing
    /// whitespace holds it. Offsets before the first word map to it.
    pub fn word_at_offset(&self, offset: usize) -> usize {
        self.words
            .partition_point(|w| w.start <= offset)
            .saturating_sub(1)
    }
}

#[derive(Debug, Clone)]
pub struct Chapter {
    pub index: usize,
    pub title: String,
    pub source_path: String,
    pub elements: Vec<Element>,
}

impl Chapter {
    pub fn word_count(&self) -> usize {
        self.elements.iter().map(Element::word_count).sum()
    }
}

/// Where one element's words sit in the flattened stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementSpan {
    pub chapter: usize,
    pub element: usize,
    pub first_word: usize,
    pub word_count: usize,
}

/// One word of the flattened stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordRef<'a> {
    pub index: usize,
    pub address: Address,
    /// Empty for image placeholders.
    pub text: &'a str,
    pub placeholder: bool,
    pub pause: Pause,
    pub ends_sentence: bool,
}

/// A parsed book. Never mutated after construction.
#[derive(Debug)]
pub struct DocumentModel {
    title: String,
    author: String,
    metadata: Metadata,
    toc: Vec<TocEntry>,
    chapters: Vec<Chapter>,
    spans: Vec<ElementSpan>,
    /// Index into `spans` of each chapter's first element.
    chapter_span_start: Vec<usize>,
    chapter_first_word: Vec<usize>,
    total_words: usize,
    content_hash: String,
}

impl DocumentModel {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        metadata: Metadata,
        toc: Vec<TocEntry>,
        chapters: Vec<Chapter>,
    ) -> Self {
        let mut spans = Vec::new();
        let mut chapter_span_start = Vec::with_capacity(chapters.len());
        let mut chapter_first_word = Vec::with_capacity(chapters.len());
        let mut hasher = sha1_smol::Sha1::new();
        let mut next_word = 0;

        for chapter in &chapters {
            chapter_span_start.push(spans.len());
            chapter_first_word.push(next_word);
            hasher.update(b"\x1echapter");
            for element in &chapter.elements {
                let word_count = element.word_count();
                spans.push(ElementSpan {
                    chapter: chapter.index,
                    element: element.index,
                    first_word: next_word,
                    word_count,
                });
                next_word += word_count;

                hasher.update(b"\x1f");
                hasher.update(element.kind.tag().as_bytes());
                hasher.update(b"\0");
                hasher.update(element.text.as_bytes());
                hasher.update(b"\0");
                hasher.update(element.source.as_deref().unwrap_or("").as_bytes());
            }
        }

        Self {
            title: title.into(),
            author: author.into(),
            metadata,
            toc,
            chapters,
            spans,
            chapter_span_start,
            chapter_first_word,
            total_words: next_word,
            content_hash: hasher.digest().to_string(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn total_word_count(&self) -> usize {
        self.total_words
    }

    pub fn element_at(&self, chapter: usize, element: usize) -> Option<&Element> {
        self.chapters.get(chapter)?.elements.get(element)
    }

    /// SHA-1 over every element's kind and text; changes whenever the
    /// flattened content would.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn element_spans(&self) -> &[ElementSpan] {
        &self.spans
    }

    pub fn span_of(&self, chapter: usize, element: usize) -> Option<&ElementSpan> {
        let start = *self.chapter_span_start.get(chapter)?;
        let len = self.chapters[chapter].elements.len();
        if element >= len {
            return None;
        }
        self.spans.get(start + element)
    }

    /// The span holding word `index`.
    pub fn span_for_word(&self, index: usize) -> Option<&ElementSpan> {
        if index >= self.total_words {
            return None;
        }
        let pos = self
            .spans
            .partition_point(|s| s.first_word + s.word_count <= index);
        self.spans.get(pos)
    }

    /// Index of the first word of `chapter`, if it exists.
    pub fn chapter_first_word(&self, chapter: usize) -> Option<usize> {
        self.chapter_first_word.get(chapter).copied()
    }

    pub fn word(&self, index: usize) -> Option<WordRef<'_>> {
        let span = self.span_for_word(index)?;
        self.word_in(span, index - span.first_word)
    }

    fn word_in(&self, span: &ElementSpan, nth: usize) -> Option<WordRef<'_>> {
        let element = self.element_at(span.chapter, span.element)?;
        let index = span.first_word + nth;
        if element.is_placeholder() {
            return Some(WordRef {
                index,
                address: Address::new(span.chapter, span.element, 0),
                text: "",
                placeholder: true,
                pause: Pause::None,
                ends_sentence: false,
            });
        }
        let text = element.word_text(nth)?;
        Some(WordRef {
            index,
            address: Address::new(span.chapter, span.element, element.words[nth].start),
            text,
            placeholder: false,
            pause: classify_pause(text),
            ends_sentence: ends_sentence(text),
        })
    }

    /// Every word in reading order.
    pub fn words(&self) -> Words<'_> {
        Words {
            model: self,
            span: 0,
            nth: 0,
        }
    }
}

pub struct Words<'a> {
    model: &'a DocumentModel,
    span: usize,
    nth: usize,
}

impl<'a> Iterator for Words<'a> {
    type Item = WordRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let span = self.model.spans.get(self.span)?;
            if self.nth < span.word_count {
                let word = self.model.word_in(span, self.nth);
                self.nth += 1;
                return word;
            }
            self.span += 1;
            self.nth = 0;
        }
    }
}
