//! Stable structural addresses and highlight anchoring.
//!
//! An [`Address`] names a position by (chapter, element, char offset). It
//! survives re-parsing the same archive because chapter and element
//! ordinals are assigned deterministically.

use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::DocumentModel;
use crate::records::{HIGHLIGHT_PALETTE, Highlight, HighlightRequest, NewHighlight};
use crate::text::char_slice;
use crate::util::sha1_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address {
    pub chapter: usize,
    pub element: usize,
    /// Char offset within the element's text.
    pub offset: usize,
}

impl Address {
    pub const fn new(chapter: usize, element: usize, offset: usize) -> Self {
        Self {
            chapter,
            element,
            offset,
        }
    }
}

/// Why a stored highlight no longer fits the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanReason {
    ChapterMissing,
    ElementMissing,
    /// The range does not fit in an element of `len` chars.
    OutOfRange { len: usize },
    /// The text under the range differs from when it was created.
    TextChanged,
}

/// Warning value for a highlight that can no longer be anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedHighlight {
    pub highlight_id: i64,
    pub reason: OrphanReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HighlightStatus {
    Valid,
    Orphaned(OrphanReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightReport {
    pub highlight_id: i64,
    pub status: HighlightStatus,
}

/// Maps between addresses and word indices of one document model.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    model: Arc<DocumentModel>,
}

impl AddressResolver {
    pub fn new(model: Arc<DocumentModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<DocumentModel> {
        &self.model
    }

    /// Word index for a position. An offset inside a word, or in the
    /// whitespace after it, resolves to that word. Placeholders only accept
    /// offset 0.
    pub fn resolve(&self, chapter: usize, element: usize, offset: usize) -> Result<usize> {
        let invalid = || Error::InvalidAddress(format!("({chapter}, {element}, {offset})"));

        let found = self.model.element_at(chapter, element).ok_or_else(invalid)?;
        let span = self.model.span_of(chapter, element).ok_or_else(invalid)?;

        if found.is_placeholder() {
            return if offset == 0 {
                Ok(span.first_word)
            } else {
                Err(invalid())
            };
        }
        if offset >= found.char_len || found.words.is_empty() {
            return Err(invalid());
        }
        Ok(span.first_word + found.word_at_offset(offset))
    }

    pub fn resolve_address(&self, address: Address) -> Result<usize> {
        self.resolve(address.chapter, address.element, address.offset)
    }

    /// Address of the start of word `index`.
    pub fn locate(&self, index: usize) -> Result<Address> {
        self.model.word(index).map(|w| w.address).ok_or_else(|| {
            Error::InvalidAddress(format!(
                "word {index} of {}",
                self.model.total_word_count()
            ))
        })
    }

    /// Clamp a word index into `[0, total - 1]`.
    pub fn clamp(&self, index: usize) -> usize {
        index.min(self.model.total_word_count().saturating_sub(1))
    }

    /// Validate a highlight request against the model and fingerprint its text.
    pub fn anchor(&self, request: &HighlightRequest, created_at: i64) -> Result<NewHighlight> {
        if request.start >= request.end {
            return Err(Error::InvalidHighlight(format!(
                "empty range {}..{}",
                request.start, request.end
            )));
        }
        if !HIGHLIGHT_PALETTE.contains(&request.color) {
            return Err(Error::InvalidHighlight(format!(
                "color {:#010X} is not in the palette",
                request.color
            )));
        }

        let element = self
            .model
            .element_at(request.chapter, request.element)
            .ok_or_else(|| {
                Error::InvalidAddress(format!("({}, {})", request.chapter, request.element))
            })?;
        if element.is_placeholder() {
            return Err(Error::InvalidHighlight("images cannot be highlighted".into()));
        }
        if request.end > element.char_len {
            return Err(Error::InvalidHighlight(format!(
                "range {}..{} exceeds element length {}",
                request.start, request.end, element.char_len
            )));
        }

        let text = char_slice(&element.text, request.start, request.end);
        Ok(NewHighlight {
            book_id: request.book_id.clone(),
            chapter_index: request.chapter,
            element_index: request.element,
            start_index: request.start,
            end_index: request.end,
            color: request.color,
            created_at,
            fingerprint: Some(sha1_hex(text.as_bytes())),
        })
    }

    /// Text currently under a highlight, if its range still fits.
    pub fn highlighted_text(&self, highlight: &Highlight) -> Option<&str> {
        let element = self
            .model
            .element_at(highlight.chapter_index, highlight.element_index)?;
        (highlight.start_index < highlight.end_index && highlight.end_index <= element.char_len)
            .then(|| char_slice(&element.text, highlight.start_index, highlight.end_index))
    }

    pub fn validate(&self, highlight: &Highlight) -> bool {
        self.inspect(highlight).is_none()
    }

    /// Check one highlight; `Some` explains why it is orphaned.
    pub fn inspect(&self, highlight: &Highlight) -> Option<OrphanedHighlight> {
        let orphan = |reason| {
            Some(OrphanedHighlight {
                highlight_id: highlight.id,
                reason,
            })
        };

        let Some(chapter) = self.model.chapter(highlight.chapter_index) else {
            return orphan(OrphanReason::ChapterMissing);
        };
        let Some(element) = chapter.elements.get(highlight.element_index) else {
            return orphan(OrphanReason::ElementMissing);
        };
        if element.is_placeholder()
            || highlight.start_index >= highlight.end_index
            || highlight.end_index > element.char_len
        {
            return orphan(OrphanReason::OutOfRange {
                len: element.char_len,
            });
        }
        if let Some(expected) = &highlight.fingerprint {
            let text = char_slice(&element.text, highlight.start_index, highlight.end_index);
            if sha1_hex(text.as_bytes()) != *expected {
                return orphan(OrphanReason::TextChanged);
            }
        }
        None
    }

    /// Check every highlight, logging each orphan.
    pub fn reconcile(&self, highlights: &[Highlight]) -> Vec<HighlightReport> {
        highlights
            .iter()
            .map(|highlight| {
                let status = match self.inspect(highlight) {
                    Some(orphan) => {
                        warn!(
                            "highlight {} of book {} is orphaned: {:?}",
                            highlight.id, highlight.book_id, orphan.reason
                        );
                        HighlightStatus::Orphaned(orphan.reason)
                    }
                    None => HighlightStatus::Valid,
                };
                HighlightReport {
                    highlight_id: highlight.id,
                    status,
                }
            })
            .collect()
    }
}
