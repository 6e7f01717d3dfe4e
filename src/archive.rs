//! Random-access ZIP reading: the entry catalog is built once from the
//! central directory and individual entries are inflated on demand.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::io::{ByteSource, ByteSourceCursor, FileSource, MemorySource};

/// How an entry's bytes are stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflated,
    /// Any other method (bzip2, zstd, ...). Reading such an entry fails.
    Unsupported,
}

/// One file in the archive catalog.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression: Compression,
    data_offset: u64,
    crc32: u32,
}

/// A ZIP container opened over a [`ByteSource`].
pub struct ArchiveReader {
    source: Arc<dyn ByteSource>,
    entries: Vec<ArchiveEntry>,
    by_name: HashMap<String, usize>,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("len", &self.source.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ArchiveReader {
    /// Open an archive held in memory.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Result<Self> {
        Self::from_source(Arc::new(MemorySource::new(bytes)))
    }

    /// Open an archive file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_source(Arc::new(FileSource::new(file)?))
    }

    /// Scan the central directory of `source`. No entry is decompressed.
    pub fn from_source(source: Arc<dyn ByteSource>) -> Result<Self> {
        let cursor = ByteSourceCursor::new(source.clone());
        let mut archive = ZipArchive::new(cursor)?;

        let mut entries = Vec::with_capacity(archive.len());
        let mut by_name = HashMap::with_capacity(archive.len());

        for i in 0..archive.len() {
            let file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let data_offset = file.data_start().ok_or_else(|| {
                Error::CorruptArchive(format!("no local header data offset for {name}"))
            })?;
            by_name.insert(name.clone(), entries.len());
            entries.push(ArchiveEntry {
                name,
                compressed_size: file.compressed_size(),
                uncompressed_size: file.size(),
                compression: compression_of(file.compression()),
                data_offset,
                crc32: file.crc32(),
            });
        }

        debug!("archive catalog: {} entries", entries.len());
        Ok(Self {
            source,
            entries,
            by_name,
        })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by name.
    ///
    /// Falls back to the percent-decoded name, then a case-insensitive match,
    /// then a case-insensitive suffix match (for packages that reference
    /// `text/ch1.xhtml` when the entry is `OEBPS/text/ch1.xhtml`).
    pub fn find(&self, name: &str) -> Option<&ArchiveEntry> {
        let name = name.trim_start_matches('/');
        if let Some(&i) = self.by_name.get(name) {
            return Some(&self.entries[i]);
        }

        let decoded = percent_encoding::percent_decode_str(name).decode_utf8_lossy();
        if let Some(&i) = self.by_name.get(&*decoded) {
            return Some(&self.entries[i]);
        }

        let lower = decoded.to_lowercase();
        if let Some(entry) = self.entries.iter().find(|e| e.name.to_lowercase() == lower) {
            return Some(entry);
        }

        let suffix = format!("/{lower}");
        self.entries
            .iter()
            .find(|e| e.name.to_lowercase().ends_with(&suffix))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Read and decompress an entry by name.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .find(name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))?;
        self.read_entry(entry)
    }

    /// Read a text entry, dropping a leading UTF-8 BOM.
    pub fn read_text(&self, name: &str) -> Result<Vec<u8>> {
        let mut bytes = self.read(name)?;
        let bom = bytes.len() - crate::util::strip_bom(&bytes).len();
        bytes.drain(..bom);
        Ok(bytes)
    }

    /// Decompress one catalog entry, checking its size and CRC-32.
    pub fn read_entry(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let compressed = self
            .source
            .read_at(entry.data_offset, entry.compressed_size as usize)
            .map_err(|e| Error::CorruptArchive(format!("{}: {e}", entry.name)))?;

        let data = match entry.compression {
            Compression::Stored => compressed,
            Compression::Deflated => {
                let decoder = flate2::read::DeflateDecoder::new(&compressed[..]);
                // One byte past the declared size is enough to detect a lie.
                let mut limited = decoder.take(entry.uncompressed_size + 1);
                let mut out = Vec::with_capacity(entry.uncompressed_size.min(1 << 24) as usize);
                limited
                    .read_to_end(&mut out)
                    .map_err(|e| Error::CorruptArchive(format!("{}: {e}", entry.name)))?;
                out
            }
            Compression::Unsupported => {
                return Err(Error::CorruptArchive(format!(
                    "{}: unsupported compression method",
                    entry.name
                )));
            }
        };

        if data.len() as u64 != entry.uncompressed_size {
            return Err(Error::CorruptArchive(format!(
                "{}: expected {} bytes, got {}",
                entry.name,
                entry.uncompressed_size,
                data.len()
            )));
        }

        let mut crc = flate2::Crc::new();
        crc.update(&data);
        if crc.sum() != entry.crc32 {
            return Err(Error::CorruptArchive(format!(
                "{}: CRC-32 mismatch",
                entry.name
            )));
        }

        Ok(data)
    }
}

fn compression_of(method: zip::CompressionMethod) -> Compression {
    match method {
        zip::CompressionMethod::Stored => Compression::Stored,
        zip::CompressionMethod::Deflated => Compression::Deflated,
        _ => Compression::Unsupported,
    }
}
