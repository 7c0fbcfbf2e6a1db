//! Size-balanced work buckets.

use crate::flist::FileEntry;

/// Upper bound for one bucket. Keeps a single worker's unit of work
/// bounded even when the tree mixes a handful of gigabyte segment files
/// with tens of thousands of tiny ones.
pub const BUCKET_CAP: u64 = 10 * 1024 * 1024 * 1024;

/// Split `entries` into size-balanced buckets for `workers` parallel
/// transfers.
///
/// With fewer than two workers there is nothing to balance and the whole
/// input is one bucket. Otherwise entries are walked in ascending size
/// order and placed round-robin, resuming just after the slot used last,
/// into the first bucket that stays under [`BUCKET_CAP`]. When no open
/// bucket can take the entry, every non-empty bucket is sealed, totals
/// reset, and the entry starts over at slot 0 — so an entry larger than
/// the cap ends up alone in its bucket.
///
/// Buckets balance aggregate bytes, not file counts.
pub fn pack(entries: &[FileEntry], workers: usize) -> Vec<Vec<FileEntry>> {
    if workers < 2 {
        return vec![entries.to_vec()];
    }
    let mut sorted: Vec<&FileEntry> = entries.iter().collect();
    sorted.sort_by_key(|entry| entry.size);

    let mut sealed: Vec<Vec<FileEntry>> = Vec::new();
    let mut open: Vec<Vec<FileEntry>> = vec![Vec::new(); workers];
    let mut totals: Vec<u64> = vec![0; workers];
    // first probe lands on slot 0
    let mut last = workers - 1;

    for entry in sorted {
        let mut placed = false;
        for probe in 0..workers {
            let slot = (last + 1 + probe) % workers;
            let new_total = totals[slot] + entry.size;
            if new_total < BUCKET_CAP {
                open[slot].push(entry.clone());
                totals[slot] = new_total;
                last = slot;
                placed = true;
                break;
            }
        }
        if !placed {
            // every slot is full: seal the current row and start over
            for (bucket, total) in open.iter_mut().zip(totals.iter_mut()) {
                if !bucket.is_empty() {
                    sealed.push(std::mem::take(bucket));
                }
                *total = 0;
            }
            open[0].push(entry.clone());
            totals[0] = entry.size;
            last = 0;
        }
    }
    for bucket in open {
        if !bucket.is_empty() {
            sealed.push(bucket);
        }
    }
    sealed
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;

    fn entry(path: &str, size: u64) -> FileEntry {
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

    fn entries(sizes: &[u64]) -> Vec<FileEntry> {
        sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| entry(&format!("base/16384/{index}"), size))
            .collect()
    }

    #[test]
    fn single_worker_gets_one_bucket() {
        let input = entries(&[5, 1, 3]);
        let buckets = pack(&input, 1);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0], input);
    }

    #[test]
    fn small_files_spread_round_robin() {
        let input = entries(&[10, 20, 30, 40]);
        let buckets = pack(&input, 2);
        // nothing comes near the cap, so one bucket per slot
        assert_eq!(buckets.len(), 2);
        let sizes: Vec<u64> = buckets
            .iter()
            .map(|bucket| bucket.iter().map(|e| e.size).sum())
            .collect();
        assert_eq!(sizes, vec![10 + 30, 20 + 40]);
    }

    #[test]
    fn overflow_seals_the_row_and_restarts() {
        let near_cap = BUCKET_CAP - 1;
        let input = entries(&[1, 2, near_cap, near_cap, near_cap]);
        let buckets = pack(&input, 2);
        // the two small entries open the first row; no slot can absorb a
        // near-cap entry on top of them, so the row is sealed each time
        let total: usize = buckets.iter().map(Vec::len).sum();
        assert_eq!(total, input.len());
        for bucket in &buckets {
            let size: u64 = bucket.iter().map(|e| e.size).sum();
            assert!(size < BUCKET_CAP || bucket.len() == 1);
        }
        // each near-cap entry must ride alone
        let singles = buckets
            .iter()
            .filter(|bucket| bucket.len() == 1 && bucket[0].size == near_cap)
            .count();
        assert_eq!(singles, 3);
    }

    #[test]
    fn oversized_entry_rides_alone() {
        let input = entries(&[100, BUCKET_CAP + 5]);
        let buckets = pack(&input, 4);
        let oversized: Vec<_> = buckets
            .iter()
            .filter(|bucket| bucket.iter().any(|e| e.size > BUCKET_CAP))
            .collect();
        assert_eq!(oversized.len(), 1);
        assert_eq!(oversized[0].len(), 1);
    }

    #[test]
    fn empty_input_packs_to_nothing_with_parallelism() {
        assert!(pack(&[], 4).is_empty());
        // without parallelism the contract is exactly one bucket
        assert_eq!(pack(&[], 1).len(), 1);
    }

    proptest! {
        #[test]
        fn multiset_is_preserved(
            sizes in proptest::collection::vec(0u64..BUCKET_CAP * 2, 0..200),
            workers in 2usize..8,
        ) {
            let input = entries(&sizes);
            let buckets = pack(&input, workers);

            let mut seen: Vec<&str> = buckets
                .iter()
                .flatten()
                .map(|e| e.path.as_str())
                .collect();
            seen.sort_unstable();
            let mut expected: Vec<&str> = input.iter().map(|e| e.path.as_str()).collect();
            expected.sort_unstable();
            prop_assert_eq!(seen, expected);
        }

        #[test]
        fn caps_hold_except_for_lone_oversized_entries(
            sizes in proptest::collection::vec(0u64..BUCKET_CAP * 2, 0..200),
            workers in 2usize..8,
        ) {
            let input = entries(&sizes);
            for bucket in pack(&input, workers) {
                let total: u64 = bucket.iter().map(|e| e.size).sum();
                prop_assert!(total < BUCKET_CAP || bucket.len() == 1);
            }
        }
    }
}
