//! The copy controller: catalog, orchestration, cleanup.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use rsync::{
    CommandRunner, RetryHook, RetryPolicy, Rsync, RsyncOptions, SystemRunner, TransferOutcome,
};

use crate::analyze;
use crate::executor::{trailing_slash, Executor, ItemHandle};
use crate::item::{CopyItem, DirectoryOptions, FileOptions, ItemClass};
use crate::schedule::{self, Phase};
use crate::stats::{self, CopyStats};
use crate::Error;

/// Controller configuration. The default is a serial, local, no-retry run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Width of the worker pool.
    pub workers: usize,
    /// Files modified strictly before this instant cannot have been
    /// touched during the current backup window and are copied without
    /// checksum verification. Listing timestamps are pinned to UTC on
    /// parse; the horizon must use the same convention.
    pub safe_horizon: Option<DateTime<Utc>>,
    /// rsync binary to drive.
    pub rsync_program: String,
    /// Remote shell for `:`-prefixed endpoints.
    pub ssh_command: Option<String>,
    pub ssh_options: Vec<String>,
    /// Compress data over the wire.
    pub network_compression: bool,
    /// Retry budget applied to every transfer invocation.
    pub retry: RetryPolicy,
    /// Where the per-run scratch directory is created (system temp dir if
    /// unset).
    pub scratch_root: Option<std::path::PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 1,
            safe_horizon: None,
            rsync_program: "rsync".to_string(),
            ssh_command: None,
            ssh_options: Vec::new(),
            network_compression: false,
            retry: RetryPolicy::default(),
            scratch_root: None,
        }
    }
}

/// Drives a whole copy run: analysis, destination preparation, two
/// executor phases, statistics, scratch cleanup.
pub struct CopyController {
    config: Config,
    items: Vec<CopyItem>,
    runner: Arc<dyn CommandRunner>,
    retry_hook: Option<Arc<RetryHook>>,
    cancel: CancellationToken,
}

impl CopyController {
    pub fn new(config: Config) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    /// Use a custom command runner. Production wants [`SystemRunner`];
    /// tests script one.
    pub fn with_runner(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            items: Vec::new(),
            runner,
            retry_hook: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Notification hook run before every transfer retry.
    pub fn set_retry_hook<F>(&mut self, hook: F)
    where
        F: Fn(u32, &rsync::Error) + Send + Sync + 'static,
    {
        self.retry_hook = Some(Arc::new(hook));
    }

    /// Handle for interrupting a run in flight. Cancelling stops job
    /// dispatch, terminates the workers, removes the scratch directory
    /// and surfaces [`Error::Interrupted`] from [`CopyController::copy`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue a directory tree for transfer.
    pub fn add_directory(
        &mut self,
        label: &str,
        source: &str,
        destination: &str,
        item_class: ItemClass,
        options: DirectoryOptions,
    ) -> Result<(), Error> {
        if item_class == ItemClass::Pgcontrol {
            return Err(Error::Catalog {
                message: format!("control item {label:?} must be a single file, not a directory"),
            });
        }
        self.items.push(CopyItem::directory(
            label,
            source,
            destination,
            item_class,
            options,
        ));
        Ok(())
    }

    /// Queue a single file for transfer.
    pub fn add_file(
        &mut self,
        label: &str,
        source: &str,
        destination: &str,
        item_class: ItemClass,
        options: FileOptions,
    ) -> Result<(), Error> {
        if item_class == ItemClass::Pgcontrol
            && self
                .items
                .iter()
                .any(|item| item.item_class == ItemClass::Pgcontrol)
        {
            return Err(Error::Catalog {
                message: format!(
                    "control item {label:?} rejected: only one control file may be queued"
                ),
            });
        }
        self.items.push(CopyItem::file(
            label,
            source,
            destination,
            item_class,
            options,
        ));
        Ok(())
    }

    /// The queued items, in catalog order.
    pub fn items(&self) -> &[CopyItem] {
        &self.items
    }

    /// Run the whole transfer.
    ///
    /// The scratch directory is removed on every exit path — success,
    /// failure or interrupt — and a removal failure is logged, never
    /// allowed to mask what the run produced.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn copy(&mut self) -> Result<CopyStats, Error> {
        let started_at = Instant::now();
        let scratch_base = self
            .config
            .scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let scratch = tempfile::Builder::new()
            .prefix("pgmirror-")
            .tempdir_in(&scratch_base)
            .map_err(|source| Error::Scratch {
                path: scratch_base,
                source,
            })?;
        tracing::info!("scratch directory {}", scratch.path().display());

        // the interrupt signal belongs to the coordinator alone; workers
        // only ever observe the token
        let interrupt = tokio::spawn({
            let cancel = self.cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, stopping the copy");
                    cancel.cancel();
                }
            }
        });

        let result = self.copy_with_scratch(scratch.path(), started_at).await;
        interrupt.abort();

        if let Err(error) = scratch.close() {
            tracing::error!("failed to remove scratch directory: {}", error);
        }
        result
    }

    async fn copy_with_scratch(
        &mut self,
        scratch: &Path,
        started_at: Instant,
    ) -> Result<CopyStats, Error> {
        // one transfer-primitive handle per item, built before any worker
        // exists so nothing ever races on the cache
        let handles = Arc::new(self.build_handles());

        // analysis is cheap next to the transfers; it runs serially in the
        // coordinator, where a failure aborts before any worker spawns
        for index in 0..self.items.len() {
            if self.cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            if self.items[index].is_directory {
                let rsync = handles[index].rsync.clone();
                analyze::analyze_directory(
                    &mut self.items[index],
                    &rsync,
                    scratch,
                    self.config.safe_horizon,
                )
                .await?;
            }
        }

        // seed destination trees and purge stale files before going wide
        for (index, item) in self.items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            if item.is_directory {
                self.prepare_directory(item, &handles[index]).await?;
            }
        }

        let executor = Executor {
            workers: self.config.workers.max(1),
            retry: self.config.retry,
            retry_hook: self.retry_hook.clone(),
            cancel: self.cancel.clone(),
        };
        let mut completed = Vec::new();
        for phase in [Phase::Main, Phase::Control] {
            let jobs = schedule::jobs_for_phase(&self.items, phase, executor.workers);
            tracing::info!("{} phase: {} jobs", phase, jobs.len());
            completed.extend(executor.run_phase(jobs, handles.clone(), scratch).await?);
        }

        Ok(stats::compute(
            &self.items,
            &completed,
            executor.workers,
            started_at,
        ))
    }

    fn build_handles(&self) -> Vec<ItemHandle> {
        self.items
            .iter()
            .map(|item| {
                let options = RsyncOptions {
                    program: self.config.rsync_program.clone(),
                    ssh_command: self.config.ssh_command.clone(),
                    ssh_options: self.config.ssh_options.clone(),
                    compression: self.config.network_compression,
                    exclude: item.exclude.clone(),
                    exclude_and_protect: item.exclude_and_protect.clone(),
                    include: item.include.clone(),
                    bwlimit: item.bwlimit,
                    link_dest: item.reuse.clone(),
                    ..RsyncOptions::default()
                };
                ItemHandle {
                    label: item.label.clone(),
                    source: item.source.clone(),
                    destination: item.destination.clone(),
                    is_directory: item.is_directory,
                    optional: item.optional,
                    rsync: Arc::new(Rsync::new(options, self.runner.clone())),
                }
            })
            .collect()
    }

    /// Create the destination tree and delete whatever the analyzer did
    /// not mark as live, in a single vanished-tolerant pass.
    async fn prepare_directory(&self, item: &CopyItem, handle: &ItemHandle) -> Result<(), Error> {
        let dir_list = item
            .dir_list
            .as_ref()
            .expect("directory items are analyzed before preparation");
        let protect = item
            .protect_filter
            .as_ref()
            .expect("directory items are analyzed before preparation");
        tracing::info!("[{}] preparing destination tree", item.label);
        let extra = vec![
            "--recursive".to_string(),
            "--delete".to_string(),
            format!("--files-from={}", dir_list.display()),
            format!("--filter=merge {}", protect.display()),
            trailing_slash(&item.source),
            item.destination.clone(),
        ];
        let outcome = rsync::with_retries(self.config.retry, self.retry_hook.as_deref(), || {
            handle.rsync.transfer(&extra)
        })
        .await
        .map_err(|source| Error::Transfer {
            item: item.label.clone(),
            source,
        })?;
        if outcome == TransferOutcome::VanishedSources {
            tracing::debug!(
                "[{}] some source files vanished while seeding directories",
                item.label
            );
        }
        Ok(())
    }
}
