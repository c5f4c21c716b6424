//! Zip archives exposed as lazily extracted, cached files.
//!
//! A [`ZipFileInterface`] keeps its archive and every extracted file in a
//! [`ScratchSpace`]. Files are extracted on first read and served from the
//! scratch store afterwards; writes rewrite the archive and invalidate the
//! cached copy of the written file.

pub mod interfaces;
pub mod scratch;

pub use interfaces::{
    open_interface, open_interface_by_tag, ContentInterface, ContentKind, InterfaceError,
};
pub use interfaces::zipfs::{
    Entry, NamePattern, WriteSource, ZipFileInterface, ZipFsError, ZipOptions,
};
pub use scratch::{DirScratch, ScratchError, ScratchSpace};
