//! Timing aggregation: wall-clock versus serialized copy time.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::item::CopyItem;
use crate::schedule::CopyJob;

/// Timings for one catalog item.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ItemTimes {
    /// Duration of the analysis pass. Directory items only.
    pub analysis: Option<Duration>,
    /// First job start to last job end.
    pub copy_wall: Option<Duration>,
    /// Sum of the individual job durations. The ratio to `copy_wall` is
    /// how much the worker pool actually bought.
    pub copy_serialized: Option<Duration>,
}

/// Aggregated timings for a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct CopyStats {
    pub number_of_workers: usize,
    /// Wall clock of the whole run, analysis included.
    pub total_time: Duration,
    /// Earliest analysis start to latest analysis end across items.
    pub analysis_time: Option<Duration>,
    /// Earliest job start to latest job end across all items.
    pub copy_time: Option<Duration>,
    /// Sum of every job duration across all items.
    pub serialized_copy_time: Option<Duration>,
    pub per_item: BTreeMap<String, ItemTimes>,
}

impl CopyStats {
    /// Serialized over wall copy time; 1.0 means the pool bought nothing.
    pub fn parallel_efficiency(&self) -> Option<f64> {
        match (self.copy_time, self.serialized_copy_time) {
            (Some(wall), Some(serialized)) if wall > Duration::ZERO => {
                Some(serialized.as_secs_f64() / wall.as_secs_f64())
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for CopyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "workers: {}", self.number_of_workers)?;
        writeln!(f, "total time: {}", human(self.total_time))?;
        if let Some(analysis) = self.analysis_time {
            writeln!(f, "analysis time: {}", human(analysis))?;
        }
        if let (Some(wall), Some(serialized)) = (self.copy_time, self.serialized_copy_time) {
            writeln!(f, "copy time: {}", human(wall))?;
            writeln!(f, "serialized copy time: {}", human(serialized))?;
            if let Some(efficiency) = self.parallel_efficiency() {
                writeln!(f, "parallel efficiency: {efficiency:.2}x")?;
            }
        }
        for (label, times) in &self.per_item {
            write!(f, "  {label}:")?;
            if let Some(analysis) = times.analysis {
                write!(f, " analysis {}", human(analysis))?;
            }
            if let (Some(wall), Some(serialized)) = (times.copy_wall, times.copy_serialized) {
                write!(f, " copy {} (serialized {})", human(wall), human(serialized))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// sub-millisecond noise only clutters operator logs
fn human(duration: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
    ))
}

/// Aggregate the timing data of one finished run.
pub(crate) fn compute(
    items: &[CopyItem],
    jobs: &[CopyJob],
    number_of_workers: usize,
    run_started_at: Instant,
) -> CopyStats {
    let mut per_item = BTreeMap::new();
    let mut analysis_window: Option<(Instant, Instant)> = None;
    let mut copy_window: Option<(Instant, Instant)> = None;
    let mut serialized_total = Duration::ZERO;
    let mut any_job = false;

    for (index, item) in items.iter().enumerate() {
        let mut times = ItemTimes::default();
        if let (Some(started), Some(finished)) =
            (item.analysis_started_at, item.analysis_finished_at)
        {
            times.analysis = Some(finished - started);
            analysis_window = widen(analysis_window, started, finished);
        }

        let mut item_window: Option<(Instant, Instant)> = None;
        let mut item_serialized = Duration::ZERO;
        for job in jobs.iter().filter(|job| job.item_index == index) {
            let (Some(started), Some(finished)) = (job.started_at, job.finished_at) else {
                continue;
            };
            item_window = widen(item_window, started, finished);
            item_serialized += finished - started;
            any_job = true;
        }
        if let Some((started, finished)) = item_window {
            times.copy_wall = Some(finished - started);
            times.copy_serialized = Some(item_serialized);
            copy_window = widen(copy_window, started, finished);
            serialized_total += item_serialized;
        }
        per_item.insert(item.label.clone(), times);
    }

    CopyStats {
        number_of_workers,
        total_time: run_started_at.elapsed(),
        analysis_time: analysis_window.map(|(started, finished)| finished - started),
        copy_time: copy_window.map(|(started, finished)| finished - started),
        serialized_copy_time: any_job.then_some(serialized_total),
        per_item,
    }
}

fn widen(
    window: Option<(Instant, Instant)>,
    started: Instant,
    finished: Instant,
) -> Option<(Instant, Instant)> {
    Some(match window {
        None => (started, finished),
        Some((earliest, latest)) => (earliest.min(started), latest.max(finished)),
    })
}
