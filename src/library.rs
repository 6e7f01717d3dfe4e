//! The process-wide handle tying ingestion, records and pacing together.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::address::{AddressResolver, HighlightReport, HighlightStatus};
use crate::archive::ArchiveReader;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ingest::{ModelKey, ParseCache, ParseHandle};
use crate::model::DocumentModel;
use crate::pacing::{PacerEvent, PacingEngine, PacingMode, PacingSession, ProgressSink};
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::records::{
    Book, DEFAULT_FOLDER_ID, Folder, Highlight, HighlightRequest, ReadingStatus,
};
use crate::store::{MemoryStore, RecordStore, Subscription, Topic};
use crate::util::{sha1_hex, time_now_millis};

/// Owns the record store, the parse cache and the one active pacing
/// session. Create one per process and call [`shutdown`](Self::shutdown)
/// before exit.
pub struct Library {
    store: Arc<dyn RecordStore>,
    config: Config,
    cache: ParseCache,
    session: Mutex<Option<Arc<PacingSession>>>,
    folder_seq: AtomicU64,
}

impl Library {
    /// Open a library over `store`, creating the default folder if needed.
    pub fn new(store: Arc<dyn RecordStore>, config: Config) -> Result<Self> {
        config.validate()?;
        if store.folder(DEFAULT_FOLDER_ID).is_none() {
            store.put_folder(Folder::default_folder(time_now_millis()));
        }
        let cache = ParseCache::new(config.library.cache_capacity);
        Ok(Self {
            store,
            config,
            cache,
            session: Mutex::new(None),
            folder_seq: AtomicU64::new(0),
        })
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // --- books ---

    /// Parse `bytes` and register the book in the default folder.
    ///
    /// A book that fails to parse is rejected and nothing is stored.
    /// Importing the same bytes again refreshes the record's path and keeps
    /// its reading state.
    pub fn import_bytes(&self, bytes: impl Into<Arc<[u8]>>, file_path: &str) -> Result<Book> {
        let bytes: Arc<[u8]> = bytes.into();
        let hash = sha1_hex(&bytes);
        let model = self
            .cache
            .request(ModelKey::new(hash.clone(), hash.clone()), bytes)
            .wait()?;

        if self.store.book(&hash).is_some() {
            info!("{file_path} is already in the library");
            return self
                .store
                .update_book(&hash, &mut |book| book.file_path = file_path.to_string());
        }

        let mut book = Book::new(
            hash,
            model.title(),
            model.author(),
            file_path,
            time_now_millis(),
        );
        book.folder_id = Some(DEFAULT_FOLDER_ID.to_string());
        book.total_words = model.total_word_count();
        book.total_chapters = model.chapter_count();
        info!(
            "imported \"{}\" ({} words, {} chapters)",
            book.title, book.total_words, book.total_chapters
        );
        self.store.put_book(book.clone());
        Ok(book)
    }

    pub fn import_path(&self, path: impl AsRef<Path>) -> Result<Book> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        self.import_bytes(bytes, &path.to_string_lossy())
    }

    pub fn books(&self) -> Vec<Book> {
        self.store.books()
    }

    pub fn book(&self, id: &str) -> Result<Book> {
        self.store
            .book(id)
            .ok_or_else(|| Error::NotFound(format!("book {id}")))
    }

    /// Live list of all books, most recently imported first.
    pub fn watch_books(&self) -> Subscription<Vec<Book>> {
        Subscription::new(self.store.clone(), Topic::Books, |store| store.books())
    }

    /// Remove a book and its highlights. Cancels its session if one is
    /// running.
    pub fn delete_book(&self, id: &str) -> Result<Book> {
        {
            let mut session = self.session.lock();
            if session.as_ref().is_some_and(|s| s.book_id() == id)
                && let Some(active) = session.take()
            {
                active.cancel();
                active.join();
            }
        }
        let book = self
            .store
            .delete_book(id)
            .ok_or_else(|| Error::NotFound(format!("book {id}")))?;
        debug!("deleted book {id}");
        Ok(book)
    }

    pub fn set_favorite(&self, id: &str, favorite: bool) -> Result<Book> {
        self.store.update_book(id, &mut |book| book.is_favorite = favorite)
    }

    pub fn add_tag(&self, id: &str, tag: &str) -> Result<Book> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(Error::InvalidName("tag is empty".into()));
        }
        self.store.update_book(id, &mut |book| {
            book.tags.insert(tag.to_string());
        })
    }

    pub fn remove_tag(&self, id: &str, tag: &str) -> Result<Book> {
        self.store.update_book(id, &mut |book| {
            book.tags.remove(tag.trim());
        })
    }

    pub fn set_status(&self, id: &str, status: ReadingStatus) -> Result<Book> {
        self.store.update_book(id, &mut |book| book.reading_status = status)
    }

    /// Fold a progress update into its book record.
    pub fn apply_progress(&self, update: &ProgressUpdate) -> Result<Book> {
        apply_progress(self.store.as_ref(), update)
    }

    /// Raw bytes of a resource inside a book's archive, such as an image
    /// referenced by a placeholder.
    pub fn book_resource(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let book = self.book(id)?;
        let archive = ArchiveReader::open(&book.file_path)?;
        archive.read(&path.replace('\\', "/"))
    }

    // --- models ---

    /// Start (or join) the parse of a book on a worker thread.
    pub fn open_async(&self, id: &str) -> Result<ParseHandle> {
        let book = self.book(id)?;
        let bytes: Arc<[u8]> = std::fs::read(&book.file_path)?.into();
        let key = ModelKey::new(id, sha1_hex(&bytes));
        Ok(self.cache.request(key, bytes))
    }

    /// The parsed model of a book, from the cache when possible.
    pub fn open(&self, id: &str) -> Result<Arc<DocumentModel>> {
        self.open_async(id)?.wait()
    }

    /// The parsed model of a book whose archive bytes are already in hand.
    pub fn open_bytes(&self, id: &str, bytes: impl Into<Arc<[u8]>>) -> Result<Arc<DocumentModel>> {
        self.book(id)?;
        let bytes: Arc<[u8]> = bytes.into();
        let key = ModelKey::new(id, sha1_hex(&bytes));
        self.cache.request(key, bytes).wait()
    }

    // --- highlights ---

    /// Validate a highlight against the book's model and store it.
    pub fn add_highlight(&self, request: &HighlightRequest) -> Result<Highlight> {
        let model = self.open(&request.book_id)?;
        let new = AddressResolver::new(model).anchor(request, time_now_millis())?;
        let highlight = self.store.insert_highlight(new);
        debug!(
            "added highlight {} to book {}",
            highlight.id, highlight.book_id
        );
        Ok(highlight)
    }

    pub fn delete_highlight(&self, id: i64) -> Result<Highlight> {
        self.store
            .delete_highlight(id)
            .ok_or_else(|| Error::NotFound(format!("highlight {id}")))
    }

    pub fn highlights(&self, book_id: &str) -> Vec<Highlight> {
        self.store.highlights(book_id)
    }

    /// Highlights of one chapter.
    pub fn chapter_highlights(&self, book_id: &str, chapter: usize) -> Vec<Highlight> {
        self.store
            .highlights(book_id)
            .into_iter()
            .filter(|h| h.chapter_index == chapter)
            .collect()
    }

    pub fn watch_highlights(&self, book_id: &str) -> Subscription<Vec<Highlight>> {
        let id = book_id.to_string();
        Subscription::new(
            self.store.clone(),
            Topic::Highlights(id.clone()),
            move |store| store.highlights(&id),
        )
    }

    /// Check every highlight of a book against its current model and store
    /// the orphaned flag of each.
    pub fn reconcile_highlights(&self, book_id: &str) -> Result<Vec<HighlightReport>> {
        let model = self.open(book_id)?;
        let highlights = self.store.highlights(book_id);
        let reports = AddressResolver::new(model).reconcile(&highlights);

        for (highlight, report) in highlights.iter().zip(&reports) {
            let orphaned = matches!(report.status, HighlightStatus::Orphaned(_));
            if highlight.orphaned != orphaned {
                self.store
                    .update_highlight(highlight.id, &mut |h| h.orphaned = orphaned)?;
            }
        }
        Ok(reports)
    }

    // --- folders ---

    pub fn folders(&self) -> Vec<Folder> {
        self.store.folders()
    }

    pub fn watch_folders(&self) -> Subscription<Vec<Folder>> {
        Subscription::new(self.store.clone(), Topic::Folders, |store| store.folders())
    }

    pub fn create_folder(&self, name: &str) -> Result<Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidName("folder name is empty".into()));
        }
        let created_at = time_now_millis();
        let seq = self.folder_seq.fetch_add(1, Ordering::Relaxed);
        let digest = sha1_hex(format!("{name}\0{created_at}\0{seq}").as_bytes());
        let folder = Folder {
            id: format!("folder_{}", &digest[..12]),
            name: name.to_string(),
            is_default: false,
            created_at,
        };
        self.store.put_folder(folder.clone());
        Ok(folder)
    }

    pub fn rename_folder(&self, id: &str, name: &str) -> Result<Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidName("folder name is empty".into()));
        }
        self.store
            .update_folder(id, &mut |folder| folder.name = name.to_string())
    }

    /// Delete a folder, moving its books back to the default folder.
    pub fn delete_folder(&self, id: &str) -> Result<()> {
        let folder = self
            .store
            .folder(id)
            .ok_or_else(|| Error::NotFound(format!("folder {id}")))?;
        if folder.is_default || folder.id == DEFAULT_FOLDER_ID {
            return Err(Error::DefaultFolder);
        }

        for book in self.store.books() {
            if book.folder_id.as_deref() == Some(id) {
                self.store.update_book(&book.id, &mut |b| {
                    b.folder_id = Some(DEFAULT_FOLDER_ID.to_string());
                })?;
            }
        }
        self.store.delete_folder(id);
        Ok(())
    }

    pub fn move_to_folder(&self, book_id: &str, folder_id: &str) -> Result<Book> {
        if self.store.folder(folder_id).is_none() {
            return Err(Error::NotFound(format!("folder {folder_id}")));
        }
        self.store.update_book(book_id, &mut |book| {
            book.folder_id = Some(folder_id.to_string());
        })
    }

    /// Books filed in `folder_id`. Books without a folder count as being in
    /// the default one.
    pub fn books_in_folder(&self, folder_id: &str) -> Vec<Book> {
        self.store
            .books()
            .into_iter()
            .filter(|book| book.folder_id.as_deref().unwrap_or(DEFAULT_FOLDER_ID) == folder_id)
            .collect()
    }

    // --- pacing ---

    /// Start pacing a book, cancelling any session already running.
    ///
    /// `from` defaults to the book's saved position. Progress is written
    /// back to the book record as the session runs.
    pub fn start_session(
        &self,
        book_id: &str,
        mode: PacingMode,
        from: Option<usize>,
    ) -> Result<(Arc<PacingSession>, Receiver<PacerEvent>)> {
        let book = self.book(book_id)?;
        let model = self.open(book_id)?;

        let mut active = self.session.lock();
        if let Some(previous) = active.take() {
            debug!("cancelling session of {}", previous.book_id());
            previous.cancel();
            // Its last progress write lands before the new session's first.
            previous.join();
        }

        let tracker = ProgressTracker::new(
            book_id,
            model.clone(),
            self.config.pacing.progress_interval_ms,
        )?;
        let store = self.store.clone();
        let sink: ProgressSink = Box::new(move |update| {
            if let Err(e) = apply_progress(store.as_ref(), &update) {
                warn!("dropping progress for {}: {e}", update.book_id);
            }
        });

        let engine = PacingEngine::new(model, self.config.pacing.clone());
        let start = from.unwrap_or(book.current_word);
        let (session, events) =
            PacingSession::spawn(engine, book_id, start, mode, Some((tracker, sink)))?;
        let session = Arc::new(session);
        *active = Some(session.clone());
        info!("pacing \"{}\" from word {start} in {mode:?} mode", book.title);
        Ok((session, events))
    }

    /// The session started last, unless it has finished or been cancelled.
    pub fn active_session(&self) -> Option<Arc<PacingSession>> {
        self.session
            .lock()
            .as_ref()
            .filter(|session| !session.is_ended())
            .cloned()
    }

    /// Cancel the active session and wait for its final progress write.
    pub fn stop_session(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.cancel();
            session.join();
        }
    }

    /// Cancel the active session and drop cached models.
    pub fn shutdown(&self) {
        self.stop_session();
        self.cache.clear();
        debug!("library shut down");
    }
}

/// Fold `update` into its book: position, reading time and per-mode
/// averages. Finishing marks the book finished; any other update moves an
/// unread book to reading.
pub fn apply_progress(store: &dyn RecordStore, update: &ProgressUpdate) -> Result<Book> {
    store.update_book(&update.book_id, &mut |book| {
        book.progress = update.progress.clamp(0.0, 1.0);
        book.current_chapter = update.chapter;
        book.current_page = update.page;
        book.current_word = update.word_index;
        book.last_read_timestamp = update.last_read;
        book.reading_time_minutes += update.reading_time_minutes_delta;

        match update.mode {
            PacingMode::Standard if update.average_wpm > 0 => {
                book.average_wpm_standard = update.average_wpm;
            }
            PacingMode::Pulse => {
                if update.average_wpm > 0 {
                    book.average_wpm_pulse = update.average_wpm;
                }
                book.time_saved_with_pulse_minutes += update.time_saved_minutes_delta;
            }
            PacingMode::Standard => {}
        }

        if update.is_finish() {
            book.reading_status = ReadingStatus::Finished;
        } else if book.reading_status == ReadingStatus::Unread {
            book.reading_status = ReadingStatus::Reading;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressReason;
    use crate::records::HIGHLIGHT_PALETTE;
    use crate::test_helpers::epub_bytes;

    fn library() -> Library {
        Library::in_memory(Config::default()).unwrap()
    }

    fn import(library: &Library) -> Book {
        let bytes = epub_bytes("Sample", &["<p>Hello world.</p><p>Second line</p>"]);
        library.import_bytes(bytes, "sample.epub").unwrap()
    }

    fn update(book_id: &str, reason: ProgressReason, mode: PacingMode) -> ProgressUpdate {
        ProgressUpdate {
            book_id: book_id.to_string(),
            reason,
            chapter: 0,
            page: 1,
            word_index: 2,
            progress: 0.5,
            last_read: 1234,
            reading_time_minutes_delta: 1.5,
            words_delta: 2,
            time_saved_minutes_delta: 0.25,
            mode,
            average_wpm: 320,
        }
    }

    #[test]
    fn test_default_folder_exists() {
        let library = library();
        let folders = library.folders();
        assert_eq!(folders.len(), 1);
        assert!(folders[0].is_default);
        assert_eq!(folders[0].name, "All Books");
        assert!(matches!(
            library.delete_folder(DEFAULT_FOLDER_ID),
            Err(Error::DefaultFolder)
        ));
    }

    #[test]
    fn test_import_registers_book() {
        let library = library();
        let book = import(&library);
        assert_eq!(book.title, "Sample");
        assert_eq!(book.author, "Test Author");
        assert_eq!(book.total_words, 4);
        assert_eq!(book.total_chapters, 1);
        assert_eq!(book.folder_id.as_deref(), Some(DEFAULT_FOLDER_ID));
        assert_eq!(library.books_in_folder(DEFAULT_FOLDER_ID).len(), 1);

        // Same bytes, same record.
        let again = import(&library);
        assert_eq!(again.id, book.id);
        assert_eq!(library.books().len(), 1);
    }

    #[test]
    fn test_import_rejects_invalid_archive() {
        let library = library();
        let err = library.import_bytes(b"not a zip".to_vec(), "junk.epub").unwrap_err();
        assert!(err.is_ingestion_failure());
        assert!(library.books().is_empty());
    }

    #[test]
    fn test_progress_updates_record() {
        let library = library();
        let book = import(&library);

        let after = library
            .apply_progress(&update(&book.id, ProgressReason::Pause, PacingMode::Pulse))
            .unwrap();
        assert_eq!(after.reading_status, ReadingStatus::Reading);
        assert_eq!(after.current_word, 2);
        assert_eq!(after.current_page, 1);
        assert_eq!(after.average_wpm_pulse, 320);
        assert_eq!(after.average_wpm_standard, 0);
        assert_eq!(after.time_saved_with_pulse_minutes, 0.25);

        let done = library
            .apply_progress(&update(&book.id, ProgressReason::Finish, PacingMode::Standard))
            .unwrap();
        assert_eq!(done.reading_status, ReadingStatus::Finished);
        assert_eq!(done.reading_time_minutes, 3.0);
        assert_eq!(done.average_wpm_standard, 320);
        assert_eq!(done.time_saved_with_pulse_minutes, 0.25);
    }

    #[test]
    fn test_folders_and_flags() {
        let library = library();
        let book = import(&library);
        let folder = library.create_folder("  Classics ").unwrap();
        assert_eq!(folder.name, "Classics");

        library.move_to_folder(&book.id, &folder.id).unwrap();
        assert_eq!(library.books_in_folder(&folder.id).len(), 1);
        assert!(matches!(
            library.move_to_folder(&book.id, "nope"),
            Err(Error::NotFound(_))
        ));

        library.rename_folder(&folder.id, "Old").unwrap();
        library.delete_folder(&folder.id).unwrap();
        assert_eq!(
            library.book(&book.id).unwrap().folder_id.as_deref(),
            Some(DEFAULT_FOLDER_ID)
        );

        let book = library.set_favorite(&book.id, true).unwrap();
        assert!(book.is_favorite);
        let book = library.add_tag(&book.id, "sci-fi").unwrap();
        assert!(book.tags.contains("sci-fi"));
        let book = library.remove_tag(&book.id, "sci-fi").unwrap();
        assert!(book.tags.is_empty());
        let book = library.set_status(&book.id, ReadingStatus::Archived).unwrap();
        assert_eq!(book.reading_status, ReadingStatus::Archived);
    }

    #[test]
    fn test_open_bytes_without_file() {
        let library = library();
        let bytes = epub_bytes("Sample", &["<p>Hello world.</p>"]);
        let book = library.import_bytes(bytes.clone(), "missing-on-disk.epub").unwrap();
        let model = library.open_bytes(&book.id, bytes).unwrap();
        assert_eq!(model.total_word_count(), 2);
        assert!(matches!(library.open(&book.id), Err(Error::Io(_))));
        assert!(matches!(
            library.open_bytes("unknown", b"x".to_vec()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_highlights_on_imported_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.epub");
        std::fs::write(&path, epub_bytes("Sample", &["<p>Hello world.</p>"])).unwrap();
        let library = library();
        let book = library.import_path(&path).unwrap();
        assert_eq!(library.open(&book.id).unwrap().total_word_count(), 2);

        let mut request = HighlightRequest {
            book_id: book.id.clone(),
            chapter: 0,
            element: 0,
            start: 0,
            end: 5,
            color: HIGHLIGHT_PALETTE[1],
        };
        let highlight = library.add_highlight(&request).unwrap();
        assert_eq!(highlight.id, 1);
        assert!(highlight.fingerprint.is_some());
        request.end = 0;
        assert!(matches!(
            library.add_highlight(&request),
            Err(Error::InvalidHighlight(_))
        ));

        // A range past the end of the text is orphaned on reconcile.
        library
            .store()
            .update_highlight(highlight.id, &mut |h| h.end_index = 99)
            .unwrap();
        let reports = library.reconcile_highlights(&book.id).unwrap();
        assert!(matches!(reports[0].status, HighlightStatus::Orphaned(_)));
        assert!(library.highlights(&book.id)[0].orphaned);

        let doc = library.book_resource(&book.id, "OEBPS/text/c0.xhtml").unwrap();
        assert!(!doc.is_empty());

        library.delete_highlight(highlight.id).unwrap();
        assert!(library.highlights(&book.id).is_empty());
        assert!(matches!(
            library.delete_highlight(highlight.id),
            Err(Error::NotFound(_))
        ));
    }
}
