//! # lura
//!
//! EPUB ingestion, stable word addressing and RSVP pacing for reading apps.
//!
//! ## Features
//!
//! - Reads EPUB 2/3 archives into an immutable [`DocumentModel`]: chapters of
//!   block elements with their words
//! - Maps between `(chapter, element, offset)` addresses and word indices,
//!   anchors highlights and finds the ones a new edition orphaned
//! - Paces the word stream at a fixed rate or in adaptive pulse mode, on a
//!   thread of its own
//! - Tracks reading progress and keeps book, folder and highlight records
//!
//! ## Quick Start
//!
//! ```no_run
//! use lura::{ArchiveReader, CancelToken, PacingConfig, PacingEngine, PacingMode, Tick, ingest};
//! use std::sync::Arc;
//!
//! let archive = ArchiveReader::open("book.epub").unwrap();
//! let model = Arc::new(ingest(&archive, &CancelToken::new()).unwrap());
//! println!("{} by {}: {} words", model.title(), model.author(), model.total_word_count());
//!
//! let mut engine = PacingEngine::new(model, PacingConfig::default());
//! engine.start(0, PacingMode::Standard, 0).unwrap();
//! if let Tick::Word(word) = engine.tick(0) {
//!     println!("{} for {:?}", word.text, word.duration);
//! }
//! ```
//!
//! ## Working with a Library
//!
//! [`Library`] is the one handle an app keeps: it imports books, parses them
//! on worker threads, stores highlights and runs at most one pacing session.
//!
//! ```no_run
//! use lura::{Config, Library, PacerEvent, PacingMode};
//!
//! let library = Library::in_memory(Config::default()).unwrap();
//! let book = library.import_path("book.epub").unwrap();
//!
//! let (session, events) = library.start_session(&book.id, PacingMode::Pulse, None).unwrap();
//! for event in events {
//!     match event {
//!         PacerEvent::Word(word) => println!("{}", word.text),
//!         PacerEvent::Finished(_) | PacerEvent::Cancelled(_) => break,
//!     }
//! }
//! session.cancel();
//! library.shutdown();
//! ```

pub mod address;
pub mod archive;
pub mod config;
pub mod error;
pub mod flatten;
pub mod ingest;
pub mod io;
pub mod library;
pub mod model;
pub mod pacing;
pub mod package;
pub mod progress;
pub mod records;
pub mod store;
pub mod text;
pub(crate) mod util;

#[cfg(test)]
mod test_helpers;

pub use address::{Address, AddressResolver, HighlightReport, HighlightStatus, OrphanReason};
pub use archive::ArchiveReader;
pub use config::{Config, LibraryConfig, PacingConfig, PulseConfig};
pub use error::{Error, Result};
pub use ingest::{CancelToken, ModelKey, ParseCache, ParseHandle, ingest};
pub use library::Library;
pub use model::{Chapter, DocumentModel, Element, ElementKind, WordRef};
pub use pacing::{
    EngineState, PacedWord, PacerEvent, PacingEngine, PacingMode, PacingSession, PacingStats, Tick,
};
pub use package::{Metadata, TocEntry};
pub use progress::{ProgressReason, ProgressTracker, ProgressUpdate};
pub use records::{Book, Folder, Highlight, HighlightRequest, ReadingStatus};
pub use store::{MemoryStore, RecordStore, Subscription, Topic, Watch, Watcher};
