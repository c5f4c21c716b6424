pub mod zipfs;

use crate::scratch::ScratchSpace;
use std::{fmt, io::Read, path::PathBuf, str::FromStr};
use thiserror::Error;
use zipfs::{Entry, WriteSource, ZipFileInterface, ZipFsError, ZipOptions};

/// Error type shared by all content interfaces.
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error(transparent)]
    Zip(#[from] ZipFsError),

    /// No interface is registered under the requested tag.
    #[error("unknown content interface: {0}")]
    UnknownKind(String),
}

/// Tag selecting a content interface implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Zip,
}

impl ContentKind {
    pub const ALL: &'static [ContentKind] = &[ContentKind::Zip];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Zip => "zip",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = InterfaceError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        ContentKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| InterfaceError::UnknownKind(tag.to_owned()))
    }
}

/// A pluggable source of named files.
pub trait ContentInterface {
    fn kind(&self) -> ContentKind;

    /// File extension for exporting the underlying content.
    fn extension(&self) -> &str;

    /// All files, in source order.
    fn contents(&self) -> Result<Vec<Entry>, InterfaceError>;

    /// Content of one file; `name` may be a wildcard pattern.
    fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>, InterfaceError>;

    /// Adds or replaces a file.
    fn add_file(&mut self, name: &str, source: WriteSource<'_>) -> Result<(), InterfaceError>;

    /// Supplies the initial content from a stream.
    fn load(&mut self, src: &mut dyn Read) -> Result<u64, InterfaceError>;

    /// Filesystem path of the underlying content, if any.
    fn path(&self) -> Option<PathBuf>;

    fn is_modified(&self) -> bool;

    fn clear_modified(&mut self);
}

impl<S: ScratchSpace> ContentInterface for ZipFileInterface<S> {
    fn kind(&self) -> ContentKind {
        ContentKind::Zip
    }

    fn extension(&self) -> &str {
        &self.options().extension
    }

    fn contents(&self) -> Result<Vec<Entry>, InterfaceError> {
        Ok(ZipFileInterface::contents(self)?)
    }

    fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>, InterfaceError> {
        Ok(ZipFileInterface::read_file(self, name)?)
    }

    fn add_file(&mut self, name: &str, source: WriteSource<'_>) -> Result<(), InterfaceError> {
        Ok(ZipFileInterface::add_file(self, name, source)?)
    }

    fn load(&mut self, src: &mut dyn Read) -> Result<u64, InterfaceError> {
        Ok(self.load_archive(src)?)
    }

    fn path(&self) -> Option<PathBuf> {
        self.archive_path()
    }

    fn is_modified(&self) -> bool {
        ZipFileInterface::is_modified(self)
    }

    fn clear_modified(&mut self) {
        ZipFileInterface::clear_modified(self)
    }
}

/// Builds the interface registered for `kind` over `scratch`.
pub fn open_interface<S>(kind: ContentKind, scratch: S) -> Box<dyn ContentInterface>
where
    S: ScratchSpace + 'static,
{
    match kind {
        ContentKind::Zip => Box::new(ZipFileInterface::new(scratch, ZipOptions::default())),
    }
}

/// Like [`open_interface`], selecting the implementation by tag.
///
/// # Errors
/// Returns `InterfaceError::UnknownKind` for an unregistered tag.
pub fn open_interface_by_tag<S>(
    tag: &str,
    scratch: S,
) -> Result<Box<dyn ContentInterface>, InterfaceError>
where
    S: ScratchSpace + 'static,
{
    Ok(open_interface(tag.parse()?, scratch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registered_tags() {
        assert_eq!("zip".parse::<ContentKind>().unwrap(), ContentKind::Zip);
        assert_eq!("ZIP".parse::<ContentKind>().unwrap(), ContentKind::Zip);
        assert_eq!(ContentKind::Zip.to_string(), "zip");
    }

    #[test]
    fn rejects_unknown_tags() {
        let err = "tar".parse::<ContentKind>().unwrap_err();
        assert!(matches!(err, InterfaceError::UnknownKind(tag) if tag == "tar"));
    }

    #[test]
    fn scratch_failures_arrive_through_the_interface_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("scratch");
        let scratch = crate::scratch::DirScratch::new(&root).unwrap();
        let mut zip = open_interface(ContentKind::Zip, scratch);
        std::fs::remove_dir(&root).unwrap();

        let err = zip.load(&mut &b"PK"[..]).unwrap_err();
        assert!(matches!(err, InterfaceError::Zip(ZipFsError::Scratch(_))));
    }
}
