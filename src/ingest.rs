//! The ingestion pipeline (archive → package → flattened chapters → model)
//! and the request-coalescing parse cache that runs it on worker threads.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};

use crate::archive::ArchiveReader;
use crate::error::{Error, Result};
use crate::flatten::flatten;
use crate::model::{Chapter, DocumentModel, Element};
use crate::package::parse_package;
use crate::util::sha1_hex;

/// Longest chapter title taken from a heading.
pub const HEADING_TITLE_CHARS: usize = 50;

/// Cooperative cancellation flag, checked between spine items.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Build the document model of an opened archive.
///
/// Spine documents missing from the archive are skipped with a warning;
/// any other failure aborts the whole parse.
pub fn ingest(archive: &ArchiveReader, cancel: &CancelToken) -> Result<DocumentModel> {
    cancel.check()?;
    let package = parse_package(archive)?;
    debug!(
        "spine has {} documents ({} skipped)",
        package.spine.len(),
        package.skipped.len()
    );

    let mut chapters = Vec::with_capacity(package.spine.len());
    for item in &package.spine {
        cancel.check()?;

        let bytes = match archive.read(&item.path) {
            Ok(bytes) => bytes,
            Err(Error::EntryNotFound(name)) => {
                warn!("spine document {name} is missing from the archive; skipping");
                continue;
            }
            Err(e) => return Err(e),
        };
        let doc = flatten(&bytes, &item.path)?;

        let title = package
            .toc_label(&item.path)
            .map(str::to_string)
            .or_else(|| doc.first_heading(HEADING_TITLE_CHARS))
            .or_else(|| doc.head_title.clone())
            .unwrap_or_default();

        let elements = doc
            .elements
            .into_iter()
            .enumerate()
            .map(|(i, flat)| Element::new(i, flat))
            .collect();

        chapters.push(Chapter {
            index: chapters.len(),
            title,
            source_path: item.path.clone(),
            elements,
        });
    }
    cancel.check()?;

    let title = package.metadata.title_or_default().to_string();
    let author = package.metadata.author_or_default();
    let model = DocumentModel::new(title, author, package.metadata, package.toc, chapters);

    if model.total_word_count() == 0 {
        return Err(Error::EmptyBook);
    }
    info!(
        "parsed {:?}: {} chapters, {} words",
        model.title(),
        model.chapter_count(),
        model.total_word_count()
    );
    Ok(model)
}

/// Identifies one parse: the book and the exact archive bytes it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub book_id: String,
    pub archive_hash: String,
}

impl ModelKey {
    pub fn new(book_id: impl Into<String>, archive_hash: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            archive_hash: archive_hash.into(),
        }
    }

    /// Key for archive bytes whose book id is their own hash.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let hash = sha1_hex(bytes);
        Self::new(hash.clone(), hash)
    }
}

type SharedResult = std::result::Result<Arc<DocumentModel>, Arc<Error>>;

struct Slot {
    result: Mutex<Option<SharedResult>>,
    ready: Condvar,
    cancel: CancelToken,
    /// Handles that have not given up on this parse.
    interest: AtomicUsize,
}

impl Slot {
    fn finish(&self, result: SharedResult) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }
}

struct CacheState {
    slots: HashMap<ModelKey, Arc<Slot>>,
    /// Completed keys, least recently requested first.
    completed: VecDeque<ModelKey>,
}

/// Coalesces concurrent parse requests and keeps a few finished models.
///
/// At most one parse per [`ModelKey`] is in flight; later requests attach to
/// it. Failed and cancelled parses are dropped so a retry starts fresh.
#[derive(Clone)]
pub struct ParseCache {
    state: Arc<Mutex<CacheState>>,
    capacity: usize,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                slots: HashMap::new(),
                completed: VecDeque::new(),
            })),
            capacity: capacity.max(1),
        }
    }

    /// Request the model for `key`, starting a worker if none is running.
    pub fn request(&self, key: ModelKey, bytes: Arc<[u8]>) -> ParseHandle {
        let mut state = self.state.lock();

        // A slot whose every requester withdrew is dead unless it finished anyway.
        if let Some(slot) = state.slots.get(&key)
            && slot.cancel.is_cancelled()
            && !matches!(*slot.result.lock(), Some(Ok(_)))
        {
            debug!("replacing withdrawn parse of {}", key.book_id);
            state.slots.remove(&key);
        }

        if let Some(slot) = state.slots.get(&key).cloned() {
            slot.interest.fetch_add(1, Ordering::SeqCst);
            if let Some(pos) = state.completed.iter().position(|k| *k == key) {
                let k = state.completed.remove(pos);
                state.completed.extend(k);
            }
            debug!("attaching to parse of {}", key.book_id);
            return ParseHandle::new(key, slot);
        }

        let slot = Arc::new(Slot {
            result: Mutex::new(None),
            ready: Condvar::new(),
            cancel: CancelToken::new(),
            interest: AtomicUsize::new(1),
        });
        state.slots.insert(key.clone(), slot.clone());
        drop(state);

        let worker_slot = slot.clone();
        let worker_key = key.clone();
        let cache = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("lura-parse-{}", short(&key.book_id)))
            .spawn(move || {
                let result = ArchiveReader::from_bytes(bytes)
                    .and_then(|archive| ingest(&archive, &worker_slot.cancel));
                cache.complete(&worker_key, &worker_slot, result);
            });

        if let Err(e) = spawned {
            self.complete(&key, &slot, Err(Error::Io(e)));
        }
        ParseHandle::new(key, slot)
    }

    fn complete(&self, key: &ModelKey, slot: &Arc<Slot>, result: Result<DocumentModel>) {
        let shared = match result {
            Ok(model) => Ok(Arc::new(model)),
            Err(e) => {
                warn!("parse of {} failed: {e}", key.book_id);
                Err(Arc::new(e))
            }
        };

        {
            let mut state = self.state.lock();
            let owned = state.slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot));
            if owned {
                if shared.is_ok() {
                    state.completed.push_back(key.clone());
                    while state.completed.len() > self.capacity {
                        if let Some(old) = state.completed.pop_front() {
                            debug!("evicting cached model of {}", old.book_id);
                            state.slots.remove(&old);
                        }
                    }
                } else {
                    state.slots.remove(key);
                }
            }
        }
        slot.finish(shared);
    }

    /// A finished model, if cached.
    pub fn get(&self, key: &ModelKey) -> Option<Arc<DocumentModel>> {
        let slot = self.state.lock().slots.get(key).cloned()?;
        let result = slot.result.lock();
        match result.as_ref() {
            Some(Ok(model)) => Some(model.clone()),
            _ => None,
        }
    }

    /// Number of slots, pending or finished.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget a cached model. A parse still running is left alone.
    pub fn evict(&self, key: &ModelKey) {
        let mut state = self.state.lock();
        if let Some(pos) = state.completed.iter().position(|k| k == key) {
            state.completed.remove(pos);
            state.slots.remove(key);
        }
    }

    /// Forget every cached model.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let CacheState { slots, completed } = &mut *state;
        for key in completed.drain(..) {
            slots.remove(&key);
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// One caller's view of a (possibly shared) parse.
pub struct ParseHandle {
    key: ModelKey,
    slot: Arc<Slot>,
    withdrawn: AtomicBool,
}

impl ParseHandle {
    fn new(key: ModelKey, slot: Arc<Slot>) -> Self {
        Self {
            key,
            slot,
            withdrawn: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    /// Block until the parse finishes.
    pub fn wait(&self) -> Result<Arc<DocumentModel>> {
        let mut result = self.slot.result.lock();
        while result.is_none() {
            self.slot.ready.wait(&mut result);
        }
        match result.as_ref() {
            Some(Ok(model)) => Ok(model.clone()),
            Some(Err(e)) => Err(Error::Shared(e.clone())),
            None => Err(Error::Cancelled),
        }
    }

    /// The result, if the parse has finished.
    pub fn try_get(&self) -> Option<Result<Arc<DocumentModel>>> {
        self.slot.result.lock().as_ref().map(|result| match result {
            Ok(model) => Ok(model.clone()),
            Err(e) => Err(Error::Shared(e.clone())),
        })
    }

    /// Withdraw this handle's interest. The parse is cancelled once every
    /// handle attached to it has withdrawn.
    pub fn cancel(&self) {
        if self.withdrawn.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.slot.interest.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("cancelling parse of {}", self.key.book_id);
            self.slot.cancel.cancel();
        }
    }
}

impl Drop for ParseHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
