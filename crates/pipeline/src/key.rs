//! Destination key derivation.
//!
//! Keys are a pure function of the layout, the run date and the source
//! identifiers, so the same unit always lands at the same key within a run.

use std::fmt::{Display, Formatter, Result as FmtResult};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
/// Placeholder replaced by the run date in a source prefix template.
pub const DATE_PLACEHOLDER: &str = "{date}";
/// Container suffix removed from archive identifiers.
const ARCHIVE_SUFFIX: &str = ".zip";

/// The calendar date a run started on.
///
/// Captured once and passed by value, so a run crossing midnight keeps
/// writing under the date it started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunDate(Date);
impl RunDate {
    pub fn new(date: Date) -> Self {
        Self(date)
    }

    /// Today's date in UTC.
    pub fn today() -> Self {
        Self(OffsetDateTime::now_utc().date())
    }

    pub fn date(&self) -> Date {
        self.0
    }
}
impl Display for RunDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let formatted = self.0.format(DATE_FORMAT).map_err(|_| std::fmt::Error)?;
        f.write_str(&formatted)
    }
}

/// Key layout for units expanded from archives.
///
/// `{root}/{date}/{identifier without source prefix and ".zip"}/{unit}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveKeys {
    source_prefix: String,
    root: String,
    date: String,
}
impl ArchiveKeys {
    /// `prefix_template` may contain `{date}`, which is replaced by `date`.
    pub fn new(prefix_template: &str, root: impl Into<String>, date: RunDate) -> Self {
        let date = date.to_string();
        Self { source_prefix: prefix_template.replace(DATE_PLACEHOLDER, &date), root: root.into(), date }
    }

    /// Prefix the archives are listed under.
    pub fn source_prefix(&self) -> &str {
        &self.source_prefix
    }

    /// Destination key for entry `unit` of the archive stored at `identifier`.
    ///
    /// ```
    /// use ferry_pipeline::{ArchiveKeys, RunDate};
    /// use time::macros::date;
    ///
    /// let keys = ArchiveKeys::new("in/{date}/path/", "out/unzipped", RunDate::new(date!(2024 - 01 - 02)));
    /// assert_eq!(keys.derive("in/2024-01-02/path/archive.zip", "b/c.txt"), "out/unzipped/2024-01-02/archive/b/c.txt");
    /// ```
    pub fn derive(&self, identifier: &str, unit: &str) -> String {
        let stripped = identifier.replacen(&self.source_prefix, "", 1);
        let stripped = stripped.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(&stripped);
        format!("{}/{}/{}/{}", self.root, self.date, stripped, unit)
    }
}

/// Key layout for files mirrored from a remote tree.
///
/// `{root}/{date}{path}`, where the absolute path supplies its own separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorKeys {
    root: String,
    date: String,
}
impl MirrorKeys {
    pub fn new(root: impl Into<String>, date: RunDate) -> Self {
        Self { root: root.into(), date: date.to_string() }
    }

    pub fn derive(&self, path: &str) -> String {
        format!("{}/{}{}", self.root, self.date, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::date;

    fn run_date() -> RunDate {
        RunDate::new(date!(2024 - 01 - 01))
    }

    #[rstest]
    #[case(date!(2024 - 01 - 01), "2024-01-01")]
    #[case(date!(1999 - 12 - 31), "1999-12-31")]
    #[case(date!(0042 - 03 - 04), "0042-03-04")]
    fn test_run_date_format(#[case] date: Date, #[case] expected: &str) {
        assert_eq!(RunDate::new(date).to_string(), expected);
    }

    #[test]
    fn test_archive_prefix_template() {
        let keys = ArchiveKeys::new("new-bucket/{date}/path/", "new-bucket/unzipped", run_date());
        assert_eq!(keys.source_prefix(), "new-bucket/2024-01-01/path/");
    }

    #[rstest]
    #[case::top_level("root/2024-01-01/path/archive.zip", "a.txt", "root/unzipped/2024-01-01/archive/a.txt")]
    #[case::nested_entry("root/2024-01-01/path/archive.zip", "b/c.txt", "root/unzipped/2024-01-01/archive/b/c.txt")]
    #[case::nested_archive("root/2024-01-01/path/x/y.zip", "a.txt", "root/unzipped/2024-01-01/x/y/a.txt")]
    #[case::not_a_zip("root/2024-01-01/path/notes.tar", "a.txt", "root/unzipped/2024-01-01/notes.tar/a.txt")]
    #[case::inner_zip_kept("root/2024-01-01/path/a.zip.d/b.zip", "e", "root/unzipped/2024-01-01/a.zip.d/b/e")]
    fn test_archive_keys(#[case] identifier: &str, #[case] unit: &str, #[case] expected: &str) {
        let keys = ArchiveKeys::new("root/{date}/path/", "root/unzipped", run_date());
        assert_eq!(keys.derive(identifier, unit), expected);
    }

    #[test]
    fn test_prefix_stripped_exactly_once() {
        let keys = ArchiveKeys::new("p/", "out", run_date());
        assert_eq!(keys.derive("p/p/archive.zip", "a"), "out/2024-01-01/p/archive/a");
    }

    #[test]
    fn test_keys_are_deterministic_and_dated() {
        let today = ArchiveKeys::new("in/", "out", run_date());
        let again = ArchiveKeys::new("in/", "out", run_date());
        let tomorrow = ArchiveKeys::new("in/", "out", RunDate::new(date!(2024 - 01 - 02)));
        assert_eq!(today.derive("in/a.zip", "x"), again.derive("in/a.zip", "x"));
        assert_ne!(today.derive("in/a.zip", "x"), tomorrow.derive("in/a.zip", "x"));
    }

    #[rstest]
    #[case("/path/a.txt", "new-bucket/2024-01-01/path/a.txt")]
    #[case("/path/dir/b.txt", "new-bucket/2024-01-01/path/dir/b.txt")]
    fn test_mirror_keys(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(MirrorKeys::new("new-bucket", run_date()).derive(path), expected);
    }
}
