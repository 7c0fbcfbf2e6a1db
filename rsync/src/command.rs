use std::sync::Arc;

use crate::outcome::{self, TransferOutcome};
use crate::runner::{CommandOutput, CommandRunner};
use crate::Error;

/// Switches present on every invocation: recursive, copy symlinked
/// files/dirs as such, preserve perms/times/sparseness. Sizes must come out
/// as plain integers for the listing parser.
const BASE_ARGS: [&str; 2] = ["-rLKpts", "--no-human-readable"];

/// Invocation profile for one transfer target.
///
/// An options set captures everything that stays fixed across the many
/// calls made for a single catalog item: filters, bandwidth cap, reuse
/// baseline, transport. Per-call variation (file lists, `--checksum`,
/// source and destination operands) is appended as extra arguments.
#[derive(Debug, Clone)]
pub struct RsyncOptions {
    /// Binary to execute.
    pub program: String,
    /// Base switches, replaced wholesale by callers that need to.
    pub args: Vec<String>,
    /// Remote shell for `:`-prefixed endpoints, rendered as `--rsh`.
    pub ssh_command: Option<String>,
    pub ssh_options: Vec<String>,
    /// Compress data over the wire (`-z`).
    pub compression: bool,
    /// Patterns excluded from the transfer.
    pub exclude: Vec<String>,
    /// Patterns excluded from the transfer and additionally protected from
    /// deletion on the receiving side.
    pub exclude_and_protect: Vec<String>,
    /// Patterns re-included ahead of the excludes.
    pub include: Vec<String>,
    /// Per-item bandwidth cap in KiB/s.
    pub bwlimit: Option<u64>,
    /// Prior backup to hard-link unchanged files against.
    pub link_dest: Option<String>,
}

impl Default for RsyncOptions {
    fn default() -> Self {
        Self {
            program: "rsync".to_string(),
            args: BASE_ARGS.iter().map(ToString::to_string).collect(),
            ssh_command: None,
            ssh_options: Vec::new(),
            compression: false,
            exclude: Vec::new(),
            exclude_and_protect: Vec::new(),
            include: Vec::new(),
            bwlimit: None,
            link_dest: None,
        }
    }
}

/// An options set bound to a runner. This is the reusable transfer
/// primitive handle the engine caches per catalog item.
pub struct Rsync {
    options: RsyncOptions,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for Rsync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rsync")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Rsync {
    pub fn new(options: RsyncOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self { options, runner }
    }

    pub fn options(&self) -> &RsyncOptions {
        &self.options
    }

    /// Full argument vector for one invocation.
    ///
    /// Includes are emitted before excludes: rsync filter rules apply
    /// first-match, so an include listed after a matching exclude would
    /// never fire.
    pub fn argv(&self, extra: &[String]) -> Vec<String> {
        let mut args = self.options.args.clone();
        if self.options.compression {
            args.push("-z".to_string());
        }
        if let Some(ssh) = &self.options.ssh_command {
            let mut rsh = ssh.clone();
            for option in &self.options.ssh_options {
                rsh.push(' ');
                rsh.push_str(option);
            }
            args.push(format!("--rsh={rsh}"));
        }
        if let Some(limit) = self.options.bwlimit {
            args.push(format!("--bwlimit={limit}"));
        }
        if let Some(baseline) = &self.options.link_dest {
            args.push(format!("--link-dest={baseline}"));
        }
        for pattern in &self.options.include {
            args.push(format!("--include={pattern}"));
        }
        for pattern in &self.options.exclude {
            args.push(format!("--exclude={pattern}"));
        }
        for pattern in &self.options.exclude_and_protect {
            args.push(format!("--exclude={pattern}"));
            args.push(format!("--filter=P {pattern}"));
        }
        args.extend(extra.iter().cloned());
        args
    }

    /// One invocation, no outcome policy applied.
    pub async fn run(&self, extra: &[String]) -> Result<CommandOutput, Error> {
        let args = self.argv(extra);
        self.runner
            .run(&self.options.program, &args)
            .await
            .map_err(|source| Error::Spawn {
                program: self.options.program.clone(),
                source,
            })
    }

    /// One transfer invocation with the exit-code/stderr policy applied.
    pub async fn transfer(&self, extra: &[String]) -> Result<TransferOutcome, Error> {
        let output = self.run(extra).await?;
        outcome::classify(&output)
    }

    /// Recursively list `path`, returning the raw listing lines for the
    /// caller to parse. Listing tolerates no partial results: any non-zero
    /// exit is a failure.
    pub async fn list_files(&self, path: &str) -> Result<Vec<String>, Error> {
        let extra = [
            "--list-only".to_string(),
            "-r".to_string(),
            path.to_string(),
        ];
        let output = self.run(&extra).await?;
        if output.code != 0 {
            return Err(Error::Failed {
                code: output.code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout.lines().map(ToString::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::testing::{Response, ScriptedRunner};

    fn bound(options: RsyncOptions) -> Rsync {
        Rsync::new(options, Arc::new(ScriptedRunner::new()))
    }

    #[test]
    fn default_argv_keeps_base_switches_first() {
        let rsync = bound(RsyncOptions::default());
        let args = rsync.argv(&["/src/".to_string(), "/dst".to_string()]);
        assert_eq!(
            args,
            vec!["-rLKpts", "--no-human-readable", "/src/", "/dst"]
        );
    }

    #[test]
    fn includes_come_before_excludes() {
        let rsync = bound(RsyncOptions {
            include: vec!["/pg_tblspc".to_string()],
            exclude: vec!["/pg_wal/*".to_string()],
            ..RsyncOptions::default()
        });
        let args = rsync.argv(&[]);
        let include_at = args
            .iter()
            .position(|a| a == "--include=/pg_tblspc")
            .unwrap();
        let exclude_at = args
            .iter()
            .position(|a| a == "--exclude=/pg_wal/*")
            .unwrap();
        assert!(include_at < exclude_at);
    }

    #[test]
    fn exclude_and_protect_emits_both_rules() {
        let rsync = bound(RsyncOptions {
            exclude_and_protect: vec!["/postmaster.pid".to_string()],
            ..RsyncOptions::default()
        });
        let args = rsync.argv(&[]);
        assert!(args.contains(&"--exclude=/postmaster.pid".to_string()));
        assert!(args.contains(&"--filter=P /postmaster.pid".to_string()));
    }

    #[test]
    fn transport_and_reuse_options_render() {
        let rsync = bound(RsyncOptions {
            ssh_command: Some("ssh".to_string()),
            ssh_options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            compression: true,
            bwlimit: Some(8192),
            link_dest: Some("/backups/20260801".to_string()),
            ..RsyncOptions::default()
        });
        let args = rsync.argv(&[]);
        assert!(args.contains(&"-z".to_string()));
        assert!(args.contains(&"--rsh=ssh -o BatchMode=yes".to_string()));
        assert!(args.contains(&"--bwlimit=8192".to_string()));
        assert!(args.contains(&"--link-dest=/backups/20260801".to_string()));
    }

    #[test(tokio::test)]
    async fn list_files_rejects_nonzero_exit() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            |args: &[String]| args.iter().any(|a| a == "--list-only"),
            Response::exit(12).with_stderr("error in socket IO"),
        );
        let rsync = Rsync::new(RsyncOptions::default(), runner);
        let error = rsync.list_files("/var/lib/pgsql/data/").await.unwrap_err();
        assert!(matches!(error, Error::Failed { code: 12, .. }));
    }

    #[test(tokio::test)]
    async fn list_files_returns_raw_lines() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            |args: &[String]| args.iter().any(|a| a == "--list-only"),
            Response::exit(0).with_stdout("line one\nline two\n"),
        );
        let rsync = Rsync::new(RsyncOptions::default(), runner);
        let lines = rsync.list_files("/var/lib/pgsql/data/").await.unwrap();
        assert_eq!(lines, vec!["line one", "line two"]);
    }
}
