//! Persisted record shapes. Field names serialize in camelCase, matching
//! the app's database columns.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Id of the folder every book lands in on import.
pub const DEFAULT_FOLDER_ID: &str = "all_books";
pub const DEFAULT_FOLDER_NAME: &str = "All Books";

/// Highlight colors offered by the reader, as ARGB.
pub const HIGHLIGHT_PALETTE: &[u32] = &[
    0xFFFF_EB3B, // yellow
    0xFF8B_C34A, // green
    0xFF64_B5F6, // blue
    0xFFF0_6292, // pink
    0xFFFF_B74D, // orange
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    #[default]
    Unread,
    Reading,
    Finished,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Hex SHA-1 of the archive bytes.
    pub id: String,
    pub title: String,
    pub author: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub reading_status: ReadingStatus,
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub total_words: usize,
    #[serde(default)]
    pub total_chapters: usize,
    #[serde(default)]
    pub current_chapter: usize,
    /// Element index within the current chapter.
    #[serde(default)]
    pub current_page: usize,
    /// Word index in the flattened stream.
    #[serde(default)]
    pub current_word: usize,
    pub import_date: i64,
    #[serde(default)]
    pub last_read_timestamp: i64,
    #[serde(default)]
    pub reading_time_minutes: f64,
    #[serde(default)]
    pub average_wpm_standard: u32,
    #[serde(default)]
    pub average_wpm_pulse: u32,
    #[serde(default)]
    pub time_saved_with_pulse_minutes: f64,
}

impl Book {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        file_path: impl Into<String>,
        import_date: i64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: author.into(),
            file_path: file_path.into(),
            folder_id: None,
            tags: BTreeSet::new(),
            is_favorite: false,
            reading_status: ReadingStatus::Unread,
            progress: 0.0,
            total_words: 0,
            total_chapters: 0,
            current_chapter: 0,
            current_page: 0,
            current_word: 0,
            import_date,
            last_read_timestamp: 0,
            reading_time_minutes: 0.0,
            average_wpm_standard: 0,
            average_wpm_pulse: 0,
            time_saved_with_pulse_minutes: 0.0,
        }
    }
}

/// A highlight as the caller asks for it, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightRequest {
    pub book_id: String,
    pub chapter: usize,
    pub element: usize,
    pub start: usize,
    pub end: usize,
    pub color: u32,
}

/// A validated highlight that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHighlight {
    pub book_id: String,
    pub chapter_index: usize,
    pub element_index: usize,
    pub start_index: usize,
    pub end_index: usize,
    pub color: u32,
    pub created_at: i64,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: i64,
    pub book_id: String,
    pub chapter_index: usize,
    pub element_index: usize,
    /// Char offset, inclusive.
    pub start_index: usize,
    /// Char offset, exclusive.
    pub end_index: usize,
    pub color: u32,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub orphaned: bool,
}

impl Highlight {
    pub fn from_new(id: i64, new: NewHighlight) -> Self {
        Self {
            id,
            book_id: new.book_id,
            chapter_index: new.chapter_index,
            element_index: new.element_index,
            start_index: new.start_index,
            end_index: new.end_index,
            color: new.color,
            created_at: new.created_at,
            fingerprint: new.fingerprint,
            orphaned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: i64,
}

impl Folder {
    pub fn default_folder(created_at: i64) -> Self {
        Self {
            id: DEFAULT_FOLDER_ID.to_string(),
            name: DEFAULT_FOLDER_NAME.to_string(),
            is_default: true,
            created_at,
        }
    }
}
