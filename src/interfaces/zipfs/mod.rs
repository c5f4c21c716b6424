mod keys;
mod pattern;
mod records;

pub use keys::{extracted_key, has_wildcards, EXTRACTED_PREFIX, ORIGINAL_KEY};
pub use pattern::NamePattern;

use crate::scratch::{ScratchError, ScratchSpace};
use log::{debug, warn};
use records::Record;
use rustc_hash::FxHashSet;
use std::{
    fmt,
    fs::File,
    io::{self, Read, Write},
    path::PathBuf,
};
use thiserror::Error;
use zip::{
    result::ZipError,
    write::SimpleFileOptions,
    CompressionMethod, ZipArchive, ZipWriter,
};

// ---------------------------------------------------------------------------
// Custom error type (thiserror)
// ---------------------------------------------------------------------------

/// Error type for archive interface operations.
///
/// A missing archive and a name that matches nothing are not errors; they are
/// reported as empty listings and `None` reads.
#[derive(Error, Debug)]
pub enum ZipFsError {
    /// An entry's content could not be streamed out of the archive.
    #[error("failed to extract `{name}`: {source}")]
    Extraction {
        name: String,
        #[source]
        source: ZipError,
    },

    /// The archive could not be opened or rewritten to store an entry.
    #[error("failed to write `{name}` into archive: {source}")]
    ArchiveWrite {
        name: String,
        #[source]
        source: ZipError,
    },

    /// The entry is larger than the configured extraction limit.
    #[error("entry `{name}` is {size} bytes, exceeds limit {limit}")]
    EntryTooLarge { name: String, size: u64, limit: u64 },

    /// An archive was supplied for an interface that already holds one.
    #[error("archive already exists")]
    ArchiveExists,

    /// A wildcard pattern could not be compiled.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// The scratch store failed.
    #[error(transparent)]
    Scratch(#[from] ScratchError),

    /// An error originating from the `zip` crate while listing or looking up.
    #[error("ZIP error: {0}")]
    Zip(#[from] ZipError),

    /// An I/O error while opening the archive.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Entries, write sources and options
// ---------------------------------------------------------------------------

/// One file record inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Full name as stored in the archive.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.name, self.size)
    }
}

/// Content handed to [`ZipFileInterface::add_file`].
pub enum WriteSource<'a> {
    /// An in-memory buffer.
    Bytes(&'a [u8]),
    /// A stream copied into the archive until EOF.
    Stream(&'a mut dyn Read),
}

impl fmt::Debug for WriteSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl<'a> From<&'a [u8]> for WriteSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for WriteSource<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for WriteSource<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for WriteSource<'a> {
    fn from(text: &'a str) -> Self {
        Self::Bytes(text.as_bytes())
    }
}

/// Construction options for [`ZipFileInterface`].
#[derive(Debug, Clone)]
pub struct ZipOptions {
    /// File extension reported for the archive.
    pub extension: String,
    /// Largest uncompressed entry that may be extracted into the cache.
    pub max_entry_size: Option<u64>,
    /// Compression used for entries written by `add_file`.
    pub compression: CompressionMethod,
}

impl Default for ZipOptions {
    fn default() -> Self {
        Self {
            extension: "zip".to_owned(),
            max_entry_size: None,
            compression: CompressionMethod::Deflated,
        }
    }
}

impl ZipOptions {
    pub fn new() -> Self { Self::default() }

    /// Set the reported archive extension.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set the largest entry size extraction will accept.
    pub fn max_entry_size(mut self, limit: u64) -> Self {
        self.max_entry_size = Some(limit);
        self
    }

    /// Set the compression method for written entries.
    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }
}

// ---------------------------------------------------------------------------
// ZipFileInterface – zip archive exposed as lazily extracted files
// ---------------------------------------------------------------------------

/// A zip archive held in a scratch store, exposed as named files.
///
/// The archive lives under the [`ORIGINAL_KEY`] scratch key. Reading a file
/// extracts it into the scratch store under [`extracted_key`] the first time
/// and serves every later read from there. Writing a file rewrites the
/// archive and drops that file's cached copy first.
///
/// Operations are blocking and do no locking of their own: callers must not
/// run `add_file` concurrently with other operations on the same archive.
///
/// # Example
/// ```no_run
/// # use parcel_zipfs::{DirScratch, ZipFileInterface, ZipOptions, ZipFsError};
/// # fn main() -> Result<(), ZipFsError> {
/// let scratch = DirScratch::new("/tmp/parcel-scratch")?;
/// let mut zip = ZipFileInterface::new(scratch, ZipOptions::default());
///
/// zip.add_file("hello.txt", "hi".into())?;
/// assert_eq!(zip.read_file("HELLO.*")?.as_deref(), Some(&b"hi"[..]));
/// for entry in zip.contents()? {
///     println!("{entry}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ZipFileInterface<S> {
    scratch: S,
    options: ZipOptions,
    modified: bool,
}

impl<S: ScratchSpace> ZipFileInterface<S> {
    /// Wraps the archive stored in `scratch`. The archive need not exist yet.
    pub fn new(scratch: S, options: ZipOptions) -> Self {
        Self { scratch, options, modified: false }
    }

    // -------------------------------------------------------------------------
    // Public API
    // -------------------------------------------------------------------------

    /// Returns every entry in archive order.
    ///
    /// Every record is listed, including repeated names. An interface without
    /// an archive has no entries.
    ///
    /// # Errors
    /// Returns `ZipFsError::Zip` if the archive exists but cannot be opened
    /// or parsed.
    pub fn contents(&self) -> Result<Vec<Entry>, ZipFsError> {
        let Some(opened) = self.open_archive()? else {
            return Ok(Vec::new());
        };
        Ok(opened
            .records
            .into_iter()
            .map(|r| Entry { name: r.name, size: r.size })
            .collect())
    }

    /// Resolves a literal name or wildcard pattern to an entry name.
    ///
    /// Literal names are looked up exactly (case-sensitive). Patterns
    /// containing `*` or `?` are matched case-insensitively. Either way the
    /// first matching record in archive order wins.
    ///
    /// # Errors
    /// Fails only if the archive exists but cannot be read.
    pub fn resolve(&self, name: &str) -> Result<Option<String>, ZipFsError> {
        let Some(opened) = self.open_archive()? else {
            return Ok(None);
        };
        Ok(Self::resolve_in(&opened.records, name)?.map(|r| r.name.clone()))
    }

    /// Returns the content of a file, extracting it on first access.
    ///
    /// `name` may be a wildcard pattern, in which case the first matching
    /// entry is read. Returns `Ok(None)` when there is no archive or nothing
    /// matches.
    ///
    /// # Errors
    /// * `ZipFsError::Extraction` – the entry could not be decompressed; no
    ///   cached copy is kept.
    /// * `ZipFsError::EntryTooLarge` – the entry exceeds `max_entry_size`.
    /// * `ZipFsError::Zip` – the archive cannot be opened.
    pub fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>, ZipFsError> {
        if !self.scratch.exists(ORIGINAL_KEY) {
            return Ok(None);
        }

        // A cached literal name needs no trip through the archive.
        if !has_wildcards(name) {
            let key = extracted_key(name);
            if self.scratch.exists(&key) {
                debug!("cache hit for `{name}`");
                return Ok(Some(self.scratch.read(&key)?));
            }
        }

        let Some(mut opened) = self.open_archive()? else {
            return Ok(None);
        };
        let Some(record) = Self::resolve_in(&opened.records, name)?.cloned() else {
            debug!("no entry matches `{name}`");
            return Ok(None);
        };

        let limit = self.options.max_entry_size;
        let bytes = self.scratch.fetch(&extracted_key(&record.name), |dest| {
            Self::extract(&mut opened, &record, limit, dest)
        })?;
        Ok(Some(bytes))
    }

    /// Adds a file to the archive, or replaces its content if it exists.
    ///
    /// The archive is created on first write. The cached copy of `name` is
    /// removed before anything else happens, so even a failed write leaves
    /// that name uncached. On success the interface is marked modified.
    ///
    /// # Errors
    /// * `ZipFsError::ArchiveWrite` – the archive could not be rewritten; the
    ///   previous archive is left intact.
    /// * `ZipFsError::Scratch` – the cached copy could not be removed.
    pub fn add_file(&mut self, name: &str, source: WriteSource<'_>) -> Result<(), ZipFsError> {
        self.scratch.delete(&extracted_key(name))?;

        if let Err(source) = self.rewrite_archive(name, source) {
            warn!("writing `{name}` into archive failed: {source}");
            return Err(ZipFsError::ArchiveWrite { name: name.to_owned(), source });
        }

        self.modified = true;
        Ok(())
    }

    /// Supplies the archive from an external source.
    ///
    /// # Errors
    /// * `ZipFsError::ArchiveExists` – the interface already holds an archive.
    /// * `ZipFsError::Scratch` – the archive could not be stored.
    pub fn load_archive(&mut self, src: &mut dyn Read) -> Result<u64, ZipFsError> {
        if self.scratch.exists(ORIGINAL_KEY) {
            return Err(ZipFsError::ArchiveExists);
        }
        let size = self.scratch.write(ORIGINAL_KEY, src)?;
        debug!("loaded {size} byte archive");
        Ok(size)
    }

    /// Path of the archive file, if it exists.
    pub fn archive_path(&self) -> Option<PathBuf> {
        self.scratch
            .exists(ORIGINAL_KEY)
            .then(|| self.scratch.path(ORIGINAL_KEY))
    }

    /// Whether `add_file` has succeeded since creation or the last
    /// [`clear_modified`](Self::clear_modified).
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Acknowledges the current modifications.
    pub fn clear_modified(&mut self) {
        self.modified = false;
    }

    pub fn options(&self) -> &ZipOptions {
        &self.options
    }

    pub fn scratch(&self) -> &S {
        &self.scratch
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Opens the archive for reading, or `None` if it does not exist yet.
    fn open_archive(&self) -> Result<Option<OpenArchive>, ZipFsError> {
        if !self.scratch.exists(ORIGINAL_KEY) {
            return Ok(None);
        }
        Ok(Some(OpenArchive::open(self.scratch.path(ORIGINAL_KEY))?))
    }

    fn resolve_in<'r>(
        records: &'r [Record],
        name: &str,
    ) -> Result<Option<&'r Record>, ZipFsError> {
        if !has_wildcards(name) {
            return Ok(records.iter().find(|r| r.name == name));
        }

        let pattern = NamePattern::new(name)?;
        Ok(records.iter().find(|r| pattern.matches(&r.name)))
    }

    /// Streams the decompressed content of `record` into `dest`.
    fn extract(
        opened: &mut OpenArchive,
        record: &Record,
        limit: Option<u64>,
        dest: &mut dyn Write,
    ) -> Result<(), ZipFsError> {
        let name = record.name.as_str();
        if let Some(limit) = limit {
            if record.size > limit {
                return Err(ZipFsError::EntryTooLarge {
                    name: name.to_owned(),
                    size: record.size,
                    limit,
                });
            }
        }

        let copied = opened.copy_record(record, dest).map_err(|source| {
            ZipFsError::Extraction { name: name.to_owned(), source }
        })?;
        debug!("extracted `{name}` ({copied} bytes)");
        Ok(())
    }

    /// Writes a new archive with `name` added or replaced, then swaps it in.
    ///
    /// Existing entries are copied raw in their original order; a replaced
    /// entry keeps its position. Repeated names collapse to their first
    /// record. The new archive is built in a temporary file next to the old
    /// one, so the old archive survives any failure.
    fn rewrite_archive(&self, name: &str, source: WriteSource<'_>) -> Result<(), ZipError> {
        let path = self.scratch.path(ORIGINAL_KEY);
        let dir = path
            .parent()
            .ok_or_else(|| ZipError::Io(io::Error::other("archive path has no parent")))?;

        let tmp = tempfile::Builder::new().prefix(".partial").tempfile_in(dir)?;
        let mut writer = ZipWriter::new(tmp);
        let options = self
            .entry_options()
            .large_file(source_len(&source).is_none_or(|len| len >= u32::MAX as u64));

        let mut source = Some(source);
        if self.scratch.exists(ORIGINAL_KEY) {
            let mut opened = OpenArchive::open(path.clone())?;
            let mut seen = FxHashSet::default();
            for record in &opened.records {
                if !seen.insert(record.name.as_str()) {
                    debug!("dropping repeated `{}`", record.name);
                    continue;
                }
                if record.name == name {
                    if let Some(source) = source.take() {
                        debug!("replacing `{name}`");
                        write_entry(&mut writer, name, source, options)?;
                    }
                    continue;
                }
                match record.index {
                    Some(index) => writer.raw_copy_file(opened.archive.by_index_raw(index)?)?,
                    None => {
                        // Shadowed in the archive index: recompress from the
                        // local header.
                        let options = self
                            .entry_options()
                            .large_file(record.size >= u32::MAX as u64);
                        writer.start_file(record.name.as_str(), options)?;
                        records::copy_from_local_header(
                            &opened.path,
                            record.header_start,
                            &mut writer,
                        )?;
                    }
                }
            }
        }
        if let Some(source) = source {
            debug!("adding `{name}`");
            write_entry(&mut writer, name, source, options)?;
        }

        let tmp = writer.finish()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|err| ZipError::Io(err.error))?;
        Ok(())
    }

    fn entry_options(&self) -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(self.options.compression)
    }
}

/// An archive opened for reading together with all of its records.
struct OpenArchive {
    path: PathBuf,
    archive: ZipArchive<File>,
    records: Vec<Record>,
}

impl OpenArchive {
    fn open(path: PathBuf) -> Result<Self, ZipError> {
        let mut archive = ZipArchive::new(File::open(&path)?)?;
        let records = records::scan(&mut File::open(&path)?, &mut archive)?;
        Ok(Self { path, archive, records })
    }

    /// Copies the decompressed content of `record` into `dest`.
    fn copy_record(&mut self, record: &Record, dest: &mut dyn Write) -> Result<u64, ZipError> {
        match record.index {
            Some(index) => {
                let mut file = self.archive.by_index(index)?;
                Ok(io::copy(&mut file, dest)?)
            }
            None => records::copy_from_local_header(&self.path, record.header_start, dest),
        }
    }
}

fn source_len(source: &WriteSource<'_>) -> Option<u64> {
    match source {
        WriteSource::Bytes(bytes) => Some(bytes.len() as u64),
        WriteSource::Stream(_) => None,
    }
}

fn write_entry<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    source: WriteSource<'_>,
    options: SimpleFileOptions,
) -> Result<(), ZipError> {
    writer.start_file(name, options)?;
    match source {
        WriteSource::Bytes(bytes) => writer.write_all(bytes)?,
        WriteSource::Stream(reader) => {
            io::copy(reader, writer)?;
        }
    }
    Ok(())
}
