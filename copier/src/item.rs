//! The catalog of top-level transfer objects.

use std::path::PathBuf;
use std::time::Instant;

use crate::flist::FileEntry;

/// Scheduling class of a catalog item. Controls relative ordering only;
/// the copy mechanics are identical across classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemClass {
    /// The main data directory.
    Pgdata,
    /// One tablespace tree.
    Tablespace,
    /// The control file. A data directory with a control file in place
    /// looks complete, so this class is copied strictly after everything
    /// else succeeded.
    Pgcontrol,
    /// Configuration files living outside the data directory.
    Config,
}

impl std::fmt::Display for ItemClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ItemClass::Pgdata => "pgdata",
            ItemClass::Tablespace => "tablespace",
            ItemClass::Pgcontrol => "pgcontrol",
            ItemClass::Config => "config",
        };
        f.write_str(name)
    }
}

/// Options accepted by directory items only. Single-file items have no
/// trees to filter, no baselines to reuse and no bulk data worth a
/// bandwidth cap, so the type system keeps these off them entirely.
#[derive(Debug, Clone, Default)]
pub struct DirectoryOptions {
    /// Patterns excluded from the transfer.
    pub exclude: Vec<String>,
    /// Patterns excluded from the transfer and protected from the
    /// destination-side purge.
    pub exclude_and_protect: Vec<String>,
    /// Patterns re-included ahead of the excludes.
    pub include: Vec<String>,
    /// Bandwidth cap in KiB/s for this item's transfers.
    pub bwlimit: Option<u64>,
    /// Prior backup used for hard-link based incremental reuse.
    pub reuse: Option<String>,
}

/// Options accepted by file items only.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOptions {
    /// A vanished optional file is a warning, not an error. Configuration
    /// files like `pg_ident.conf` may legitimately not exist.
    pub optional: bool,
}

/// One top-level object to transfer: a tablespace tree, the main data
/// directory, or a single control/configuration file.
///
/// A leading `:` on `source`/`destination` marks the endpoint remote; the
/// configured remote shell completes it at the transfer layer.
#[derive(Debug)]
pub struct CopyItem {
    pub label: String,
    pub source: String,
    pub destination: String,
    pub item_class: ItemClass,
    pub is_directory: bool,
    pub optional: bool,
    pub exclude: Vec<String>,
    pub exclude_and_protect: Vec<String>,
    pub include: Vec<String>,
    pub bwlimit: Option<u64>,
    pub reuse: Option<String>,

    // Analysis artifacts, populated for directory items only.
    pub(crate) safe_list: Vec<FileEntry>,
    pub(crate) check_list: Vec<FileEntry>,
    pub(crate) dir_list: Option<PathBuf>,
    pub(crate) protect_filter: Option<PathBuf>,
    pub(crate) analysis_started_at: Option<Instant>,
    pub(crate) analysis_finished_at: Option<Instant>,
}

impl CopyItem {
    pub(crate) fn directory(
        label: &str,
        source: &str,
        destination: &str,
        item_class: ItemClass,
        options: DirectoryOptions,
    ) -> Self {
        Self {
            label: label.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            item_class,
            is_directory: true,
            optional: false,
            exclude: options.exclude,
            exclude_and_protect: options.exclude_and_protect,
            include: options.include,
            bwlimit: options.bwlimit,
            reuse: options.reuse,
            safe_list: Vec::new(),
            check_list: Vec::new(),
            dir_list: None,
            protect_filter: None,
            analysis_started_at: None,
            analysis_finished_at: None,
        }
    }

    pub(crate) fn file(
        label: &str,
        source: &str,
        destination: &str,
        item_class: ItemClass,
        options: FileOptions,
    ) -> Self {
        Self {
            label: label.to_string(),
            source: source.to_string(),
            destination: destination.to_string(),
            item_class,
            is_directory: false,
            optional: options.optional,
            exclude: Vec::new(),
            exclude_and_protect: Vec::new(),
            include: Vec::new(),
            bwlimit: None,
            reuse: None,
            safe_list: Vec::new(),
            check_list: Vec::new(),
            dir_list: None,
            protect_filter: None,
            analysis_started_at: None,
            analysis_finished_at: None,
        }
    }

    /// Files the analyzer proved safe to copy on metadata alone.
    pub fn safe_list(&self) -> &[FileEntry] {
        &self.safe_list
    }

    /// Files the analyzer could not prove safe; copied under `--checksum`.
    pub fn check_list(&self) -> &[FileEntry] {
        &self.check_list
    }
}

impl std::fmt::Display for CopyItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} ({} -> {})",
            self.item_class, self.label, self.source, self.destination
        )
    }
}
