//! File entries parsed from a recursive rsync listing.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::Error;

/// One file observation from a `--list-only -r` run.
///
/// Immutable; lives for the duration of a single analysis pass. The
/// listing prints wall-clock times with no offset; they are pinned to UTC
/// on parse, and the safe horizon must be supplied in the same convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub mode: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub path: String,
}

impl FileEntry {
    /// Directory entries are never classified safe/check; they only seed
    /// the destination tree.
    pub fn is_directory(&self) -> bool {
        self.mode.starts_with('d')
    }
}

impl std::fmt::Display for FileEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.mode, self.size, self.modified_at, self.path
        )
    }
}

// Example lines:
//   drwxr-xr-x          4,096 2026/05/02 11:42:16 base/16384
//   -rw------- 1,073,741,824 Thu May  2 11:42:16 2026 base/16384/16397
static LIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?P<mode>[-\w]+)
        \s+
        (?P<size>\d[\d,]*)
        \s+
        (?P<date>
            # rsync built with strftime support
            [\d/]+ \s [\d:]+
            |
            # ctime-style fallback
            \w+ \s+ \w+ \s+ \d+ \s+ [\d:]+ \s+ \d+
        )
        \s+
        (?P<path>.+)
        $
        ",
    )
    .expect("listing pattern must compile")
});

const DATE_FORMATS: [&str; 2] = ["%Y/%m/%d %H:%M:%S", "%a %b %e %H:%M:%S %Y"];

/// Parse one listing line.
///
/// A line that does not match the expected shape aborts the whole run:
/// it means the remote rsync produces a listing dialect this engine does
/// not understand, and guessing would risk misclassifying files.
pub fn parse_list_line(line: &str) -> Result<FileEntry, Error> {
    let parse_failure = || Error::ListingParse {
        line: line.to_string(),
    };
    let caps = LIST_LINE.captures(line).ok_or_else(parse_failure)?;
    let size = caps["size"]
        .replace(',', "")
        .parse::<u64>()
        .map_err(|_| parse_failure())?;
    let date = &caps["date"];
    let modified_at = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(date, format).ok())
        .ok_or_else(parse_failure)?
        .and_utc();
    Ok(FileEntry {
        mode: caps["mode"].to_string(),
        size,
        modified_at,
        path: caps["path"].to_string(),
    })
}

/// Parse a whole listing, skipping empty lines, preserving order.
pub fn parse_listing<'a, I>(lines: I) -> Result<Vec<FileEntry>, Error>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(parse_list_line)
        .collect()
}
