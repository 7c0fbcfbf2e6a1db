//! Incremental, parallel, consistency-aware copy engine for PostgreSQL
//! data directories.
//!
//! The engine copies a live data directory (plus tablespaces and loose
//! configuration files) between a database server and a backup repository,
//! in either direction, while the cluster keeps writing. It drives the
//! system `rsync` binary through the companion [`rsync`] crate; its own job
//! is deciding *what* to transfer *how*:
//!
//! - [`flist`] models one file observation parsed from a recursive listing.
//! - [`item`] is the catalog of top-level transfer objects, each tagged
//!   with a scheduling class.
//! - [`analyze`] classifies every source file as safe to copy on metadata
//!   alone or in need of byte-for-byte verification.
//! - [`bucket`] splits the classified lists into size-balanced units of
//!   parallel work.
//! - [`schedule`] flattens the catalog into two ordered job phases, with
//!   the control file strictly last.
//! - [`executor`] is the fixed-width worker pool draining each phase.
//! - [`stats`] aggregates analysis and copy timings (wall-clock versus
//!   serialized) for the caller to log.
//!
//! The entry point is [`CopyController`]: build a catalog with
//! [`CopyController::add_directory`] / [`CopyController::add_file`], then
//! run [`CopyController::copy`].
//!
//! # Consistency model
//!
//! The source cannot be locked, so the copy is made trustworthy by three
//! rules: files provably untouched since before the backup window started
//! are copied without verification; files whose size or mtime differ from
//! the reference copy will be re-transferred by rsync anyway; everything
//! else — identical metadata on a moving target — is transferred under
//! `--checksum`, because equal size and mtime prove nothing while the
//! database keeps writing. Finally, the control file is copied only after
//! every other byte has landed, so no reader can mistake a half-written
//! backup for a complete one.

pub mod analyze;
pub mod bucket;
pub mod controller;
pub mod executor;
pub mod flist;
pub mod item;
pub mod schedule;
pub mod stats;

pub use controller::{Config, CopyController};
pub use flist::FileEntry;
pub use item::{CopyItem, DirectoryOptions, FileOptions, ItemClass};
pub use stats::CopyStats;

/// Error taxonomy of a copy run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A listing line did not match the expected shape. This means the
    /// rsync on the other end speaks a different listing dialect, and
    /// silently misclassifying files would be unsafe. Aborts the run.
    #[error("unable to parse line from file listing: {line:?}")]
    ListingParse { line: String },

    /// A source-tree listing could not be obtained at all.
    #[error("failed to list {path:?}")]
    Listing {
        path: String,
        #[source]
        source: rsync::Error,
    },

    /// A transfer invocation failed for good, retries included.
    #[error("transfer failed for item {item:?}")]
    Transfer {
        item: String,
        #[source]
        source: rsync::Error,
    },

    /// The catalog rejected an item.
    #[error("{message}")]
    Catalog { message: String },

    /// A scratch artifact could not be created or written.
    #[error("scratch file error at {path:?}")]
    Scratch {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run was interrupted. Workers were terminated and the scratch
    /// directory removed before this surfaced.
    #[error("copy interrupted")]
    Interrupted,
}
