//! Driver for the system `rsync` binary.
//!
//! pgmirror never implements the rsync wire protocol; it treats the binary
//! as an opaque, retryable external tool. This crate owns everything about
//! that boundary:
//!
//! - building deterministic argument vectors for the invocation profiles
//!   the copy engine needs (recursive listing, filtered bulk sync,
//!   files-from-list copy),
//! - running the process through an injectable [`CommandRunner`] so the
//!   engine is testable on hosts without rsync,
//! - classifying exit codes and stderr into a result sum type instead of
//!   pattern-matching on exceptions ([`TransferOutcome`]),
//! - the bounded retry loop with its notification hook.
//!
//! Backing up a live PostgreSQL cluster means source files legitimately
//! disappear between directory traversal and copy (WAL recycling, temp
//! file churn). rsync reports that with dedicated exit codes; [`outcome`]
//! decides when such an exit is benign and when it hides a real failure.

pub mod command;
pub mod outcome;
pub mod retry;
pub mod runner;
pub mod testing;

pub use command::{Rsync, RsyncOptions};
pub use outcome::TransferOutcome;
pub use retry::{with_retries, RetryHook, RetryPolicy};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};

/// Everything that can go wrong while driving rsync.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The process could not be spawned or awaited at all.
    #[error("failed to execute {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// rsync exited with a code that is never acceptable.
    #[error("rsync exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// rsync exited with a partial-transfer code, but stderr contains a
    /// line that is not one of the known vanished-file messages. Treating
    /// this as benign could silently hand back an incomplete copy.
    #[error("rsync exit code {code} not proven benign, offending stderr line: {line:?}")]
    SuspiciousStderr { code: i32, line: String },

    /// The retry budget ran out. Wraps the failure of the last attempt.
    #[error("maximum number of retries exceeded ({attempts} attempts)")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}
