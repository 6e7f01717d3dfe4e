use std::collections::{BTreeMap, HashMap};
use parking_lot::{Mutex, RwLock};

use super::{RecordStore, Topic, Watch, Watcher};
use crate::error::{Error, Result};
use crate::records::{Book, Folder, Highlight, NewHighlight};

#[derive(Default)]
struct Tables {
    books: HashMap<String, Book>,
    folders: HashMap<String, Folder>,
    highlights: BTreeMap<i64, Highlight>,
    last_highlight_id: i64,
}

/// An in-process [`RecordStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    watchers: Mutex<Vec<(Topic, Watcher)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered watchers. Dropped ones are pruned on the next write or
    /// `watch` call.
    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    fn notify(&self, topics: &[Topic]) {
        self.watchers.lock().retain(|(topic, watcher)| {
            if topics.contains(topic) {
                watcher.notify()
            } else {
                !watcher.is_dropped()
            }
        });
    }
}

fn highlight_topic(book_id: &str) -> Topic {
    Topic::Highlights(book_id.to_string())
}

impl RecordStore for MemoryStore {
    fn books(&self) -> Vec<Book> {
        let mut books: Vec<Book> = self.tables.read().books.values().cloned().collect();
        books.sort_by(|a, b| b.import_date.cmp(&a.import_date).then_with(|| a.id.cmp(&b.id)));
        books
    }

    fn book(&self, id: &str) -> Option<Book> {
        self.tables.read().books.get(id).cloned()
    }

    fn put_book(&self, book: Book) {
        self.tables.write().books.insert(book.id.clone(), book);
        self.notify(&[Topic::Books]);
    }

    fn update_book(&self, id: &str, f: &mut dyn FnMut(&mut Book)) -> Result<Book> {
        let updated = {
            let mut tables = self.tables.write();
            let book = tables
                .books
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("book {id}")))?;
            f(book);
            book.id = id.to_string();
            book.clone()
        };
        self.notify(&[Topic::Books]);
        Ok(updated)
    }

    fn delete_book(&self, id: &str) -> Option<Book> {
        let removed = {
            let mut tables = self.tables.write();
            let removed = tables.books.remove(id)?;
            tables.highlights.retain(|_, h| h.book_id != id);
            removed
        };
        self.notify(&[Topic::Books, highlight_topic(id)]);
        Some(removed)
    }

    fn folders(&self) -> Vec<Folder> {
        let mut folders: Vec<Folder> = self.tables.read().folders.values().cloned().collect();
        folders.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        folders
    }

    fn folder(&self, id: &str) -> Option<Folder> {
        self.tables.read().folders.get(id).cloned()
    }

    fn put_folder(&self, folder: Folder) {
        self.tables.write().folders.insert(folder.id.clone(), folder);
        self.notify(&[Topic::Folders]);
    }

    fn update_folder(&self, id: &str, f: &mut dyn FnMut(&mut Folder)) -> Result<Folder> {
        let updated = {
            let mut tables = self.tables.write();
            let folder = tables
                .folders
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("folder {id}")))?;
            f(folder);
            folder.id = id.to_string();
            folder.clone()
        };
        self.notify(&[Topic::Folders]);
        Ok(updated)
    }

    fn delete_folder(&self, id: &str) -> Option<Folder> {
        let removed = self.tables.write().folders.remove(id)?;
        self.notify(&[Topic::Folders]);
        Some(removed)
    }

    fn highlights(&self, book_id: &str) -> Vec<Highlight> {
        let mut highlights: Vec<Highlight> = self
            .tables
            .read()
            .highlights
            .values()
            .filter(|h| h.book_id == book_id)
            .cloned()
            .collect();
        highlights.sort_by_key(|h| (h.chapter_index, h.element_index, h.start_index, h.id));
        highlights
    }

    fn highlight(&self, id: i64) -> Option<Highlight> {
        self.tables.read().highlights.get(&id).cloned()
    }

    fn insert_highlight(&self, new: NewHighlight) -> Highlight {
        let highlight = {
            let mut tables = self.tables.write();
            tables.last_highlight_id += 1;
            let highlight = Highlight::from_new(tables.last_highlight_id, new);
            tables.highlights.insert(highlight.id, highlight.clone());
            highlight
        };
        self.notify(&[highlight_topic(&highlight.book_id)]);
        highlight
    }

    fn update_highlight(&self, id: i64, f: &mut dyn FnMut(&mut Highlight)) -> Result<Highlight> {
        let updated = {
            let mut tables = self.tables.write();
            let highlight = tables
                .highlights
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("highlight {id}")))?;
            let book_id = highlight.book_id.clone();
            f(highlight);
            highlight.id = id;
            highlight.book_id = book_id;
            highlight.clone()
        };
        self.notify(&[highlight_topic(&updated.book_id)]);
        Ok(updated)
    }

    fn delete_highlight(&self, id: i64) -> Option<Highlight> {
        let removed = self.tables.write().highlights.remove(&id)?;
        self.notify(&[highlight_topic(&removed.book_id)]);
        Some(removed)
    }

    fn watch(&self, topic: Topic) -> Watch {
        let (watch, watcher) = Watch::channel();
        let mut watchers = self.watchers.lock();
        watchers.retain(|(_, w)| !w.is_dropped());
        watchers.push((topic, watcher));
        watch
    }
}
