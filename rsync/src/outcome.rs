//! Exit-code and stderr classification.
//!
//! rsync reports "some source files disappeared while I worked" with
//! dedicated exit codes. During a backup of a live cluster that is routine
//! churn, not an error. But the same codes also cover real failures, so an
//! exit is only accepted as benign when every stderr line matches one of
//! the known vanished-file messages. Codes 23 and 24 go through the same
//! verification; neither is trusted on the exit code alone.

use std::sync::LazyLock;

use regex::Regex;

use crate::runner::CommandOutput;
use crate::Error;

/// "Partial transfer due to error".
pub const PARTIAL_TRANSFER: i32 = 23;
/// "Partial transfer due to vanished source files".
pub const VANISHED_SOURCE: i32 = 24;

/// What a finished transfer invocation amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Everything made it across.
    Completed,
    /// Some source files disappeared between traversal and copy. Expected
    /// on a live system; the files are gone from the source, so their
    /// absence from the copy is correct.
    VanishedSources,
}

// One alternative per message shape, each anchored to a whole line. The
// `[sender]`-style tag and the `link_stat` prefix are optional to cover
// both pre- and post-3.2 stderr formats.
static BENIGN_STDERR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        ^
        (
        # file went away before rsync could stat it
        rsync:\s(\[\w+\]\s)?(link_stat\s)?".+"\sfailed:\sNo\ssuch\sfile\sor\sdirectory\s\(2\)
        |
        # file went away while rsync was reading it
        file\shas\svanished:\s".+"
        |
        # file was truncated under rsync
        rsync:\s(\[\w+\]\s)?read\serrors\smapping\s".+":\sNo\sdata\savailable\s\(61\)
        |
        # per-run summary line for code 23
        rsync\serror:\s.*\(code\s23\)\sat\smain\.c\(\d+\)\s\[(generator|receiver|sender)=[\d.]+\]
        |
        # per-run summary line for code 24
        rsync\swarning:\ssome\sfiles\svanished\sbefore\sthey\scould\sbe\stransferred\s\(code\s24\)\sat\smain\.c\(\d+\)\s\[(generator|receiver|sender)=[\d.]+\]
        )
        $
        "#,
    )
    .expect("benign stderr pattern must compile")
});

/// First stderr line that is NOT known benign churn, if any. `None` means
/// every non-empty line matched.
pub fn first_non_benign_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .find(|line| !BENIGN_STDERR.is_match(line))
}

/// Map a finished invocation to an outcome.
pub fn classify(output: &CommandOutput) -> Result<TransferOutcome, Error> {
    match output.code {
        0 => Ok(TransferOutcome::Completed),
        PARTIAL_TRANSFER | VANISHED_SOURCE => match first_non_benign_line(&output.stderr) {
            None => {
                tracing::debug!(
                    "rsync exit code {} accepted: stderr only reports vanished sources",
                    output.code
                );
                Ok(TransferOutcome::VanishedSources)
            }
            Some(line) => Err(Error::SuspiciousStderr {
                code: output.code,
                line: line.to_string(),
            }),
        },
        code => Err(Error::Failed {
            code,
            stderr: output.stderr.clone(),
        }),
    }
}
