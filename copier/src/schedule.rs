//! Transfer jobs and their two-phase generation order.

use std::time::Instant;

use crate::bucket;
use crate::flist::FileEntry;
use crate::item::{CopyItem, ItemClass};

/// Execution phases. A data directory with a control file in place reads
/// as usable, so control-file items run strictly after everything else —
/// the copied control file can never be newer than the payload around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Every item that is not the control file.
    Main,
    /// Control-file items only. Must not start while any Main job is
    /// outstanding.
    Control,
}

impl Phase {
    fn admits(self, class: ItemClass) -> bool {
        match self {
            Phase::Main => class != ItemClass::Pgcontrol,
            Phase::Control => class == ItemClass::Pgcontrol,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Main => "main",
            Phase::Control => "control",
        })
    }
}

/// One unit of transfer work handed to a worker.
///
/// Two shapes exist: directory-bucket jobs (`files` and `checksum` set)
/// and whole-file jobs (both `None`). Jobs are created fresh per run and
/// only their timing survives collection.
#[derive(Debug, Clone)]
pub struct CopyJob {
    pub item_index: usize,
    pub bucket_id: Option<usize>,
    pub files: Option<Vec<FileEntry>>,
    pub checksum: Option<bool>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl CopyJob {
    fn bucket(item_index: usize, bucket_id: usize, files: Vec<FileEntry>, checksum: bool) -> Self {
        Self {
            item_index,
            bucket_id: Some(bucket_id),
            files: Some(files),
            checksum: Some(checksum),
            started_at: None,
            finished_at: None,
        }
    }

    fn whole_file(item_index: usize) -> Self {
        Self {
            item_index,
            bucket_id: None,
            files: None,
            checksum: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Flatten the catalog into the job stream for one phase.
///
/// Directory items contribute their safe buckets first and their checksum
/// buckets after, skipping empty lists; file items contribute one
/// whole-file job. Generation order favors safe-then-checksum, but the
/// pool completes jobs in whatever order the workers finish them — only
/// the phase boundary is ordered.
pub fn jobs_for_phase(items: &[CopyItem], phase: Phase, workers: usize) -> Vec<CopyJob> {
    let mut jobs = Vec::new();
    for (item_index, item) in items.iter().enumerate() {
        if !phase.admits(item.item_class) {
            continue;
        }
        if item.is_directory {
            let mut bucket_id = 0;
            for (list, checksum) in [(&item.safe_list, false), (&item.check_list, true)] {
                if list.is_empty() {
                    continue;
                }
                for files in bucket::pack(list, workers) {
                    jobs.push(CopyJob::bucket(item_index, bucket_id, files, checksum));
                    bucket_id += 1;
                }
            }
        } else {
            jobs.push(CopyJob::whole_file(item_index));
        }
    }
    jobs
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::item::{DirectoryOptions, FileOptions};

    fn file_entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            mode: "-rw-------".to_string(),
            size,
            modified_at: NaiveDate::from_ymd_opt(2026, 5, 2)
                .unwrap()
                .and_hms_opt(11, 0, 0)
                .unwrap()
                .and_utc(),
            path: path.to_string(),
        }
    }

    fn catalog() -> Vec<CopyItem> {
        let mut pgdata = CopyItem::directory(
            "pgdata",
            "/var/lib/pgsql/data",
            ":/backup/base/pgdata",
            ItemClass::Pgdata,
            DirectoryOptions::default(),
        );
        pgdata.safe_list = vec![file_entry("base/1/1249", 400), file_entry("base/1/1259", 300)];
        pgdata.check_list = vec![file_entry("global/1213", 100)];
        let ident = CopyItem::file(
            "pg_ident.conf",
            "/etc/pg_ident.conf",
            ":/backup/base/pg_ident.conf",
            ItemClass::Config,
            FileOptions { optional: true },
        );
        let control = CopyItem::file(
            "pg_control",
            "/var/lib/pgsql/data/global/pg_control",
            ":/backup/base/pgdata/global/pg_control",
            ItemClass::Pgcontrol,
            FileOptions::default(),
        );
        vec![pgdata, ident, control]
    }

    #[test]
    fn main_phase_excludes_control_items() {
        let items = catalog();
        let jobs = jobs_for_phase(&items, Phase::Main, 1);
        assert!(jobs.iter().all(|job| items[job.item_index].item_class != ItemClass::Pgcontrol));
        // one safe bucket, one checksum bucket, one whole-file job
        assert_eq!(jobs.len(), 3);
    }

    #[test]
    fn control_phase_is_only_control_items() {
        let items = catalog();
        let jobs = jobs_for_phase(&items, Phase::Control, 1);
        assert_eq!(jobs.len(), 1);
        assert_eq!(items[jobs[0].item_index].item_class, ItemClass::Pgcontrol);
        assert!(jobs[0].files.is_none());
        assert!(jobs[0].checksum.is_none());
    }

    #[test]
    fn safe_buckets_are_generated_before_checksum_buckets() {
        let items = catalog();
        let jobs = jobs_for_phase(&items, Phase::Main, 1);
        let flags: Vec<bool> = jobs
            .iter()
            .filter_map(|job| job.checksum)
            .collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn empty_lists_emit_no_jobs() {
        let mut items = catalog();
        items[0].safe_list.clear();
        let jobs = jobs_for_phase(&items, Phase::Main, 1);
        assert_eq!(jobs.iter().filter(|job| job.files.is_some()).count(), 1);
        assert_eq!(jobs[0].checksum, Some(true));
    }

    #[test]
    fn bucket_ids_are_unique_per_item() {
        let items = catalog();
        let jobs = jobs_for_phase(&items, Phase::Main, 1);
        let ids: Vec<usize> = jobs.iter().filter_map(|job| job.bucket_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
