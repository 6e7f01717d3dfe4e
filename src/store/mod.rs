//! Record storage behind a narrow trait, with change notification.
//!
//! Persistence is up to the implementor. [`MemoryStore`] keeps everything
//! in process and is what the library and tests use by default.

mod memory;

use std::ops::Deref;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::Result;
use crate::records::{Book, Folder, Highlight, NewHighlight};

pub use memory::MemoryStore;

/// A set of records a watcher can be told about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Books,
    Folders,
    /// Highlights of one book.
    Highlights(String),
}

/// A registration handed out by [`RecordStore::watch`]. Receives one `()`
/// per write touching its topic; dropping it unsubscribes.
pub struct Watch {
    changes: Receiver<()>,
    _alive: Arc<()>,
}

impl Watch {
    /// A fresh registration and the store's end of it.
    pub fn channel() -> (Watch, Watcher) {
        let (tx, changes) = mpsc::channel();
        let alive = Arc::new(());
        let watcher = Watcher {
            tx,
            alive: Arc::downgrade(&alive),
        };
        (
            Watch {
                changes,
                _alive: alive,
            },
            watcher,
        )
    }
}

impl Deref for Watch {
    type Target = Receiver<()>;

    fn deref(&self) -> &Receiver<()> {
        &self.changes
    }
}

/// The store's end of a [`Watch`].
pub struct Watcher {
    tx: Sender<()>,
    alive: Weak<()>,
}

impl Watcher {
    /// Whether the [`Watch`] has been dropped. Needs no send, so quiet
    /// topics can be pruned too.
    pub fn is_dropped(&self) -> bool {
        self.alive.strong_count() == 0
    }

    /// Signal a change; false once the watch is gone.
    pub fn notify(&self) -> bool {
        !self.is_dropped() && self.tx.send(()).is_ok()
    }
}

/// Storage for books, folders and highlights.
///
/// Every `update_*` runs its closure while holding the record exclusively,
/// so concurrent read-modify-writes of one record never interleave. Writes
/// signal the receivers handed out by [`watch`](RecordStore::watch) for
/// every topic they touch.
pub trait RecordStore: Send + Sync {
    /// All books, most recently imported first.
    fn books(&self) -> Vec<Book>;
    fn book(&self, id: &str) -> Option<Book>;
    /// Insert or replace.
    fn put_book(&self, book: Book);
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) for an unknown id.
    fn update_book(&self, id: &str, f: &mut dyn FnMut(&mut Book)) -> Result<Book>;
    /// Remove a book together with its highlights.
    fn delete_book(&self, id: &str) -> Option<Book>;

    /// All folders, the default one first, then by name.
    fn folders(&self) -> Vec<Folder>;
    fn folder(&self, id: &str) -> Option<Folder>;
    fn put_folder(&self, folder: Folder);
    fn update_folder(&self, id: &str, f: &mut dyn FnMut(&mut Folder)) -> Result<Folder>;
    fn delete_folder(&self, id: &str) -> Option<Folder>;

    /// Highlights of `book_id` in document order.
    fn highlights(&self, book_id: &str) -> Vec<Highlight>;
    fn highlight(&self, id: i64) -> Option<Highlight>;
    /// Store a new highlight under a fresh id.
    fn insert_highlight(&self, new: NewHighlight) -> Highlight;
    fn update_highlight(&self, id: i64, f: &mut dyn FnMut(&mut Highlight)) -> Result<Highlight>;
    fn delete_highlight(&self, id: i64) -> Option<Highlight>;

    /// A registration signalled after each write touching `topic`.
    fn watch(&self, topic: Topic) -> Watch;
}

type Query<T> = Box<dyn Fn(&dyn RecordStore) -> T + Send>;

/// A live query: a sequence of snapshots of one topic.
///
/// Nothing is registered until the first [`next`](Iterator::next), which
/// yields the current snapshot right away. Each later call blocks until a
/// write touches the topic and yields a fresh snapshot; several writes in
/// between collapse into one. Dropping the subscription unsubscribes.
pub struct Subscription<T> {
    store: Arc<dyn RecordStore>,
    topic: Topic,
    query: Query<T>,
    changes: Option<Watch>,
}

impl<T> Subscription<T> {
    pub fn new(
        store: Arc<dyn RecordStore>,
        topic: Topic,
        query: impl Fn(&dyn RecordStore) -> T + Send + 'static,
    ) -> Self {
        Self {
            store,
            topic,
            query: Box::new(query),
            changes: None,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Drop the registration; the next call yields the current snapshot
    /// again.
    pub fn restart(&mut self) {
        self.changes = None;
    }

    /// Like `next`, without blocking. `None` means nothing changed.
    pub fn try_next(&mut self) -> Option<T> {
        let Some(changes) = &self.changes else {
            return Some(self.subscribe());
        };
        match changes.try_recv() {
            Ok(()) => Some(self.refresh()),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Like `next`, giving up after `timeout`.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<T> {
        let Some(changes) = &self.changes else {
            return Some(self.subscribe());
        };
        match changes.recv_timeout(timeout) {
            Ok(()) => Some(self.refresh()),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    fn subscribe(&mut self) -> T {
        self.changes = Some(self.store.watch(self.topic.clone()));
        (self.query)(self.store.as_ref())
    }

    fn refresh(&mut self) -> T {
        if let Some(changes) = &self.changes {
            while changes.try_recv().is_ok() {}
        }
        (self.query)(self.store.as_ref())
    }
}

impl<T> Iterator for Subscription<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let Some(changes) = &self.changes else {
            return Some(self.subscribe());
        };
        changes.recv().ok()?;
        Some(self.refresh())
    }
}
