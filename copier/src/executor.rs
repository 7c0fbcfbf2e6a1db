//! The fixed-width worker pool that drains job streams.
//!
//! Workers are long-lived tokio tasks; the data movement itself happens in
//! the rsync child processes they wait on, so the pool's width is the
//! number of concurrent OS processes. Jobs travel over a bounded channel,
//! results come back over another — workers share nothing mutable.
//!
//! Workers never look at process signals. The controller owns the only
//! interrupt listener and turns it into a cancellation token; a cancelled
//! pool is aborted outright, which kills any rsync child still running.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use rsync::{with_retries, RetryHook, RetryPolicy, Rsync, TransferOutcome};

use crate::flist::FileEntry;
use crate::schedule::CopyJob;
use crate::Error;

/// Immutable per-item execution view.
///
/// Built once, before the first phase, one per catalog item; workers share
/// the table read-only. The `rsync` handle carries the item's filters,
/// bandwidth cap and reuse baseline, so repeated jobs against the same
/// item reuse one configuration.
#[derive(Clone)]
pub struct ItemHandle {
    pub label: String,
    pub source: String,
    pub destination: String,
    pub is_directory: bool,
    pub optional: bool,
    pub rsync: Arc<Rsync>,
}

pub(crate) struct Executor {
    pub workers: usize,
    pub retry: RetryPolicy,
    pub retry_hook: Option<Arc<RetryHook>>,
    pub cancel: CancellationToken,
}

impl Executor {
    /// Run every job of one phase to completion and hand the timed jobs
    /// back. Returning *is* the phase barrier: the caller does not reach
    /// the next phase while any job here is outstanding.
    pub(crate) async fn run_phase(
        &self,
        jobs: Vec<CopyJob>,
        handles: Arc<Vec<ItemHandle>>,
        scratch: &std::path::Path,
    ) -> Result<Vec<CopyJob>, Error> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let expected = jobs.len();
        let (job_tx, job_rx) = async_channel::bounded::<CopyJob>(self.workers);
        let (result_tx, result_rx) = async_channel::bounded::<Result<CopyJob, Error>>(self.workers);

        let mut pool = tokio::task::JoinSet::new();
        for worker_id in 0..self.workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let handles = handles.clone();
            let scratch = scratch.to_path_buf();
            let retry = self.retry;
            let hook = self.retry_hook.clone();
            let cancel = self.cancel.clone();
            pool.spawn(async move {
                while let Ok(job) = job_rx.recv().await {
                    let done = tokio::select! {
                        () = cancel.cancelled() => break,
                        done = execute_job(job, &handles, &scratch, retry, hook.as_deref(), worker_id) => done,
                    };
                    if result_tx.send(done).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        // the feeder stops handing out work the moment cancellation hits
        let feeder_cancel = self.cancel.clone();
        pool.spawn(async move {
            for job in jobs {
                tokio::select! {
                    () = feeder_cancel.cancelled() => break,
                    sent = job_tx.send(job) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut completed = Vec::with_capacity(expected);
        let outcome = loop {
            if completed.len() == expected {
                break Ok(());
            }
            tokio::select! {
                () = self.cancel.cancelled() => break Err(Error::Interrupted),
                received = result_rx.recv() => match received {
                    Ok(Ok(job)) => completed.push(job),
                    Ok(Err(error)) => break Err(error),
                    // every worker gone with jobs unaccounted for
                    Err(_) => break Err(Error::Interrupted),
                },
            }
        };
        // tear the pool down before returning; on the error path this
        // terminates workers mid-transfer, rsync children included
        pool.abort_all();
        while pool.join_next().await.is_some() {}
        outcome.map(|()| completed)
    }
}

#[instrument(level = "debug", skip_all, fields(item = job.item_index, worker = worker_id))]
async fn execute_job(
    mut job: CopyJob,
    handles: &[ItemHandle],
    scratch: &std::path::Path,
    retry: RetryPolicy,
    hook: Option<&RetryHook>,
    worker_id: usize,
) -> Result<CopyJob, Error> {
    let handle = &handles[job.item_index];
    job.started_at = Some(Instant::now());
    match (&job.files, job.checksum) {
        (Some(files), Some(checksum)) => {
            let kind = if checksum { "check" } else { "safe" };
            let bucket_id = job.bucket_id.unwrap_or(0);
            let total: u64 = files.iter().map(|entry| entry.size).sum();
            tracing::info!(
                "[{}] {} copy, bucket {} ({} files, {})",
                handle.label,
                kind,
                bucket_id,
                files.len(),
                bytesize::ByteSize(total)
            );
            let list_path = scratch.join(format!(
                "{}_{}_{}_{}.list",
                handle.label, kind, bucket_id, worker_id
            ));
            write_file_list(&list_path, files).await?;
            let mut extra = vec![format!("--files-from={}", list_path.display())];
            if checksum {
                extra.push("--checksum".to_string());
            }
            extra.push(trailing_slash(&handle.source));
            extra.push(handle.destination.clone());
            run_transfer(handle, &extra, retry, hook).await?;
        }
        _ => {
            tracing::info!("[{}] copying {}", handle.label, handle.source);
            let extra = vec![handle.source.clone(), handle.destination.clone()];
            run_transfer(handle, &extra, retry, hook).await?;
        }
    }
    job.finished_at = Some(Instant::now());
    Ok(job)
}

async fn run_transfer(
    handle: &ItemHandle,
    extra: &[String],
    retry: RetryPolicy,
    hook: Option<&RetryHook>,
) -> Result<(), Error> {
    let outcome = with_retries(retry, hook, || handle.rsync.transfer(extra))
        .await
        .map_err(|source| Error::Transfer {
            item: handle.label.clone(),
            source,
        })?;
    if outcome == TransferOutcome::VanishedSources {
        if !handle.is_directory && handle.optional {
            tracing::warn!("[{}] optional file vanished, skipping it", handle.label);
        } else {
            tracing::debug!("[{}] some source files vanished mid-copy", handle.label);
        }
    }
    Ok(())
}

async fn write_file_list(path: &std::path::Path, files: &[FileEntry]) -> Result<(), Error> {
    let scratch_error = |source| Error::Scratch {
        path: path.to_path_buf(),
        source,
    };
    let file = tokio::fs::File::create(path).await.map_err(scratch_error)?;
    let mut writer = tokio::io::BufWriter::new(file);
    for entry in files {
        writer
            .write_all(entry.path.as_bytes())
            .await
            .map_err(scratch_error)?;
        writer.write_all(b"\n").await.map_err(scratch_error)?;
    }
    writer.flush().await.map_err(scratch_error)
}

/// rsync treats `src/` and `src` differently; every bulk operation here
/// wants the contents-of semantics.
pub(crate) fn trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_idempotent() {
        assert_eq!(trailing_slash("/var/lib/pgsql/data"), "/var/lib/pgsql/data/");
        assert_eq!(trailing_slash("/var/lib/pgsql/data/"), "/var/lib/pgsql/data/");
        assert_eq!(trailing_slash(":/backup/base"), ":/backup/base/");
    }
}
