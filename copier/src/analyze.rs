//! Per-item source-tree analysis.
//!
//! For every directory item the analyzer decides, file by file, whether
//! the transfer can trust metadata alone (safe) or must verify content
//! (checksum), and materializes the two scratch artifacts the transfer
//! needs: the directory list that pre-creates the destination tree and
//! the filter file that shields live files from the purge pass.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use rsync::Rsync;

use crate::executor::trailing_slash;
use crate::flist::{self, FileEntry};
use crate::item::CopyItem;
use crate::Error;

/// Classification verdict for one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Copy on metadata alone.
    Safe,
    /// Copy under `--checksum`.
    Checksum,
}

/// Classify one source entry against the reference tree.
///
/// The decision ladder, in order:
///
/// 1. Modified strictly before the safe horizon: nothing running during
///    this backup window can have touched the file. Safe.
/// 2. No reference map: without a baseline there is no way to prove
///    anything, content is the only evidence. Checksum.
/// 3. Absent from the reference, or size/mtime differ: rsync will copy it
///    on metadata alone anyway; a checksum would add cost, not safety.
///    Safe.
/// 4. Present with identical size and mtime: equality proves nothing
///    while the database keeps writing — mtime resolution is coarser than
///    the mutation rate of a busy relation file. Checksum.
pub fn classify(
    entry: &FileEntry,
    reference: Option<&HashMap<String, FileEntry>>,
    safe_horizon: Option<DateTime<Utc>>,
) -> Verdict {
    if let Some(horizon) = safe_horizon {
        if entry.modified_at < horizon {
            return Verdict::Safe;
        }
    }
    let Some(reference) = reference else {
        return Verdict::Checksum;
    };
    match reference.get(&entry.path) {
        None => Verdict::Safe,
        Some(reference_entry)
            if reference_entry.size != entry.size
                || reference_entry.modified_at != entry.modified_at =>
        {
            Verdict::Safe
        }
        Some(_) => Verdict::Checksum,
    }
}

/// Analyze one directory item in isolation.
///
/// Lists the reference tree (destination, or the reuse baseline when one
/// is configured) and the source tree, classifies every source file, and
/// writes the item's scratch artifacts. The reference listing may fail —
/// a first backup has no destination tree yet — in which case every file
/// not saved by the horizon falls back to checksum. A source listing
/// failure aborts: no listing, no copy.
#[instrument(level = "debug", skip_all, fields(item = %item.label))]
pub(crate) async fn analyze_directory(
    item: &mut CopyItem,
    rsync: &Rsync,
    scratch: &Path,
    safe_horizon: Option<DateTime<Utc>>,
) -> Result<(), Error> {
    item.analysis_started_at = Some(Instant::now());
    tracing::info!("[{}] analyzing {}", item.label, item.source);

    let reference = item
        .reuse
        .clone()
        .unwrap_or_else(|| item.destination.clone());
    let reference_map: Option<HashMap<String, FileEntry>> =
        match list_entries(rsync, &trailing_slash(&reference)).await {
            Ok(entries) => Some(
                entries
                    .into_iter()
                    .map(|entry| (entry.path.clone(), entry))
                    .collect(),
            ),
            Err(error) => {
                tracing::info!(
                    "[{}] reference tree {} not listable, unchanged files will be checksummed: {}",
                    item.label,
                    reference,
                    error
                );
                None
            }
        };

    let dir_list_path = scratch.join(format!("{}_dir.list", item.label));
    let protect_path = scratch.join(format!("{}_protect.filter", item.label));
    let mut dir_list = create_scratch_file(&dir_list_path).await?;
    let mut protect = create_scratch_file(&protect_path).await?;

    let entries = list_entries(rsync, &trailing_slash(&item.source)).await?;
    for entry in entries {
        if entry.is_directory() {
            write_line(&mut dir_list, &dir_list_path, &entry.path).await?;
            continue;
        }
        // protect before exclude, so the rule shielding the file from
        // deletion is in force from the first pass over the filter file
        write_line(&mut protect, &protect_path, &format!("P /{}", entry.path)).await?;
        write_line(&mut protect, &protect_path, &format!("- /{}", entry.path)).await?;
        match classify(&entry, reference_map.as_ref(), safe_horizon) {
            Verdict::Safe => item.safe_list.push(entry),
            Verdict::Checksum => item.check_list.push(entry),
        }
    }
    flush(dir_list, &dir_list_path).await?;
    flush(protect, &protect_path).await?;

    item.dir_list = Some(dir_list_path);
    item.protect_filter = Some(protect_path);
    item.analysis_finished_at = Some(Instant::now());
    tracing::info!(
        "[{}] analysis done: {} safe, {} to checksum",
        item.label,
        item.safe_list.len(),
        item.check_list.len()
    );
    Ok(())
}

async fn list_entries(rsync: &Rsync, path: &str) -> Result<Vec<FileEntry>, Error> {
    let lines = rsync
        .list_files(path)
        .await
        .map_err(|source| Error::Listing {
            path: path.to_string(),
            source,
        })?;
    flist::parse_listing(lines.iter().map(String::as_str))
}

type ScratchWriter = tokio::io::BufWriter<tokio::fs::File>;

async fn create_scratch_file(path: &Path) -> Result<ScratchWriter, Error> {
    let file = tokio::fs::File::create(path)
        .await
        .map_err(|source| Error::Scratch {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(tokio::io::BufWriter::new(file))
}

async fn write_line(writer: &mut ScratchWriter, path: &Path, line: &str) -> Result<(), Error> {
    let scratch_error = |source| Error::Scratch {
        path: path.to_path_buf(),
        source,
    };
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(scratch_error)?;
    writer.write_all(b"\n").await.map_err(scratch_error)
}

async fn flush(mut writer: ScratchWriter, path: &Path) -> Result<(), Error> {
    writer.flush().await.map_err(|source| Error::Scratch {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2026, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn entry(path: &str, size: u64, modified_at: DateTime<Utc>) -> FileEntry {
        FileEntry {
            mode: "-rw-------".to_string(),
            size,
            modified_at,
            path: path.to_string(),
        }
    }

    fn reference(entries: &[FileEntry]) -> HashMap<String, FileEntry> {
        entries
            .iter()
            .map(|entry| (entry.path.clone(), entry.clone()))
            .collect()
    }

    #[test]
    fn older_than_horizon_is_safe_without_any_reference() {
        let verdict = classify(&entry("base/1/1249", 100, at(1, 12)), None, Some(at(2, 0)));
        assert_eq!(verdict, Verdict::Safe);
    }

    #[test]
    fn horizon_is_strict() {
        // modified exactly at the horizon: the window may already have
        // been open, checksum it
        let horizon = at(2, 0);
        let verdict = classify(&entry("base/1/1249", 100, horizon), None, Some(horizon));
        assert_eq!(verdict, Verdict::Checksum);
    }

    #[test]
    fn unavailable_reference_forces_checksum() {
        let verdict = classify(&entry("base/1/1249", 100, at(2, 12)), None, None);
        assert_eq!(verdict, Verdict::Checksum);
    }

    #[test]
    fn absent_from_reference_is_safe() {
        let map = reference(&[]);
        let verdict = classify(&entry("base/1/1249", 100, at(2, 12)), Some(&map), None);
        assert_eq!(verdict, Verdict::Safe);
    }

    #[test]
    fn size_mismatch_is_safe() {
        let map = reference(&[entry("base/1/1249", 10, at(2, 12))]);
        let verdict = classify(&entry("base/1/1249", 20, at(2, 12)), Some(&map), None);
        assert_eq!(verdict, Verdict::Safe);
    }

    #[test]
    fn mtime_mismatch_is_safe() {
        let map = reference(&[entry("base/1/1249", 10, at(2, 11))]);
        let verdict = classify(&entry("base/1/1249", 10, at(2, 12)), Some(&map), None);
        assert_eq!(verdict, Verdict::Safe);
    }

    #[test]
    fn identical_metadata_needs_checksum() {
        let map = reference(&[entry("base/1/1249", 10, at(2, 12))]);
        let verdict = classify(&entry("base/1/1249", 10, at(2, 12)), Some(&map), None);
        assert_eq!(verdict, Verdict::Checksum);
    }

    #[test]
    fn classification_example_from_the_field() {
        // A untouched since before the horizon, B differs in size at the
        // destination, C matches the destination exactly
        let horizon = at(2, 0);
        let map = reference(&[
            entry("B", 10, at(2, 12)),
            entry("C", 10, at(2, 12)),
        ]);
        let a = classify(&entry("A", 5, at(1, 23)), Some(&map), Some(horizon));
        let b = classify(&entry("B", 20, at(2, 12)), Some(&map), Some(horizon));
        let c = classify(&entry("C", 10, at(2, 12)), Some(&map), Some(horizon));
        assert_eq!(a, Verdict::Safe);
        assert_eq!(b, Verdict::Safe);
        assert_eq!(c, Verdict::Checksum);
    }
}
