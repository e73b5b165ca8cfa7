//! In-memory zip container expansion.
//!
//! An [`Archive`] is decoded once from a fully buffered object, reading the
//! central directory up front. Its [`Entry`] values are cheap handles that
//! share the underlying buffer, so each one can be moved into its own task and
//! decompressed independently, on demand.
//!
//! ```
//! use ferry_archive::Archive;
//! # use std::io::Write;
//! # let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
//! # writer.start_file("a.txt", zip::write::SimpleFileOptions::default()).unwrap();
//! # writer.write_all(b"alpha").unwrap();
//! # let bytes = writer.finish().unwrap().into_inner();
//!
//! let archive = Archive::from_bytes(bytes).unwrap();
//! for entry in archive.entries() {
//!     let mut contents = Vec::new();
//!     let written = entry.copy_to(&mut contents).unwrap();
//!     assert_eq!(written, contents.len() as u64);
//! }
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::io::{self, Cursor, Write};
use zip::ZipArchive;
use zip::read::read_zipfile_from_stream;
use zip::result::{ZipError, ZipResult};

type Reader = ZipArchive<Cursor<Bytes>>;

/// End of central directory record: fixed part length and signature.
const EOCD_LENGTH: usize = 22;
const EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";
/// Entry count that defers to the zip64 record.
const ZIP64_ENTRY_COUNT: u16 = u16::MAX;

/// A decoded zip container.
#[derive(Clone)]
pub struct Archive {
    entries: Vec<Entry>,
}

impl Archive {
    /// Parse `bytes` as a zip container.
    ///
    /// Entries are listed from their local headers so that entries sharing a
    /// name all survive. Containers whose local headers cannot be walked
    /// (entries written with trailing data descriptors) are listed from the
    /// central directory instead, which fails with
    /// [`Unsupported`](ErrorKind::Unsupported) if it merged duplicate names.
    /// Entry data is not touched until an [`Entry`] is copied. An archive
    /// with no entries is valid.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        let reader = ZipArchive::new(Cursor::new(bytes.clone())).map_err(|err| match err {
            ZipError::UnsupportedArchive(reason) => ErrorKind::Unsupported(reason.to_string()),
            other => ErrorKind::InvalidArchive(other.to_string()),
        })?;
        if reader.is_empty() {
            return Ok(Self { entries: Vec::new() });
        }
        let entries = match local_headers(&bytes, &reader) {
            Ok(headers) if headers.len() >= reader.len() => headers
                .into_iter()
                .map(|(name, offset)| Entry { name, source: EntrySource::Local { data: bytes.clone(), offset } })
                .collect(),
            walked => {
                tracing::debug!(walked = ?walked.map(|headers| headers.len()), "Listing entries from the central directory");
                central_directory(&bytes, reader)?
            },
        };
        tracing::trace!(entries = entries.len(), "Decoded zip container");
        Ok(Self { entries })
    }

    /// Number of entries, directories and duplicate names included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry in the order it is stored in the container.
    ///
    /// Names are passed through as stored, and
    /// directory entries (names ending in `/`) are returned like any other.
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.clone()
    }
}

impl Debug for Archive {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Archive").field("entries", &self.entries.len()).finish()
    }
}

/// Walk the local file headers from the first entry up to the central directory.
fn local_headers(bytes: &Bytes, reader: &Reader) -> ZipResult<Vec<(String, u64)>> {
    let mut cursor = Cursor::new(bytes.as_ref());
    cursor.set_position(reader.offset());
    let mut headers = Vec::with_capacity(reader.len());
    while cursor.position() < reader.central_directory_start() {
        let offset = cursor.position();
        // Dropping the file skips the rest of its data without decompressing it.
        match read_zipfile_from_stream(&mut cursor)? {
            Some(file) => headers.push((file.name().to_string(), offset)),
            None => break,
        }
    }
    Ok(headers)
}

fn central_directory(bytes: &Bytes, reader: Reader) -> Result<Vec<Entry>> {
    if let Some(declared) = declared_entries(bytes, reader.comment().len()) {
        if declared > reader.len() {
            exn::bail!(ErrorKind::Unsupported(format!(
                "{declared} entries share {} names and cannot be read separately",
                reader.len()
            )));
        }
    }
    Ok((0..reader.len())
        .map(|index| Entry {
            name: reader.name_for_index(index).unwrap_or_default().to_string(),
            source: EntrySource::Central { archive: reader.clone(), index },
        })
        .collect())
}

/// Total entry count recorded in the end of central directory record.
///
/// `None` for zip64 containers, which record the count elsewhere.
fn declared_entries(bytes: &[u8], comment_length: usize) -> Option<usize> {
    let start = bytes.len().checked_sub(EOCD_LENGTH + comment_length)?;
    let record = bytes.get(start..start + EOCD_LENGTH)?;
    if !record.starts_with(EOCD_SIGNATURE) {
        return None;
    }
    match u16::from_le_bytes([record[10], record[11]]) {
        ZIP64_ENTRY_COUNT => None,
        count => Some(usize::from(count)),
    }
}

/// One entry of an [`Archive`], opened lazily.
#[derive(Clone)]
pub struct Entry {
    name: String,
    source: EntrySource,
}

#[derive(Clone)]
enum EntrySource {
    /// Local file header at `offset`.
    Local { data: Bytes, offset: u64 },
    /// Central directory record `index`.
    Central { archive: Reader, index: usize },
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Decompress the entry into `writer`, returning the number of bytes written.
    ///
    /// This is blocking work. Failures opening the entry are reported as
    /// [`InvalidData`](io::ErrorKind::InvalidData), and a checksum mismatch
    /// surfaces as a read error once the data has been consumed, so a corrupt
    /// entry never copies successfully.
    pub fn copy_to(self, writer: &mut dyn Write) -> io::Result<u64> {
        let Entry { name, source } = self;
        let invalid = |reason: String| io::Error::new(io::ErrorKind::InvalidData, ErrorKind::Entry(format!("{name}: {reason}")));
        match source {
            EntrySource::Local { data, offset } => {
                let mut cursor = Cursor::new(data.as_ref());
                cursor.set_position(offset);
                let mut file = read_zipfile_from_stream(&mut cursor)
                    .map_err(|err| invalid(err.to_string()))?
                    .ok_or_else(|| invalid("no local header".to_string()))?;
                io::copy(&mut file, writer)
            },
            EntrySource::Central { mut archive, index } => {
                let mut file = archive.by_index(index).map_err(|err| invalid(err.to_string()))?;
                io::copy(&mut file, writer)
            },
        }
    }

    /// Decompress the whole entry into memory.
    pub fn read_all(self) -> Result<Vec<u8>> {
        let name = self.name.clone();
        let mut buffer = Vec::new();
        self.copy_to(&mut buffer).map_err(|err| ErrorKind::Entry(format!("{name}: {err}")))?;
        Ok(buffer)
    }
}

impl Debug for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Entry").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn build(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[rstest]
    #[case::stored(CompressionMethod::Stored)]
    #[case::deflated(CompressionMethod::Deflated)]
    fn test_entries_in_stored_order(#[case] method: CompressionMethod) {
        let bytes = build(&[("b/c.txt", b"charlie"), ("a.txt", b"alpha")], method);
        let archive = Archive::from_bytes(bytes).unwrap();
        let entries = archive.entries();
        assert_eq!(entries.iter().map(Entry::name).collect::<Vec<_>>(), ["b/c.txt", "a.txt"]);
        assert_eq!(entries[0].clone().read_all().unwrap(), b"charlie");
        assert_eq!(entries[1].clone().read_all().unwrap(), b"alpha");
    }

    #[test]
    fn test_empty_archive_has_no_entries() {
        let archive = Archive::from_bytes(build(&[], CompressionMethod::Stored)).unwrap();
        assert!(archive.is_empty());
        assert!(archive.entries().is_empty());
    }

    #[test]
    fn test_directory_entries_are_returned() {
        let bytes = build(&[("b/", b""), ("b/c.txt", b"charlie")], CompressionMethod::Stored);
        let archive = Archive::from_bytes(bytes).unwrap();
        let entries = archive.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir());
        assert!(entries[0].clone().read_all().unwrap().is_empty());
        assert!(!entries[1].is_dir());
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::text(b"definitely not a zip file")]
    #[case::truncated_magic(b"PK\x03\x04\x14\x00")]
    fn test_malformed_bytes(#[case] bytes: &'static [u8]) {
        let err = Archive::from_bytes(bytes).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidArchive(_)));
    }

    #[test]
    fn test_corrupt_entry_data_fails_copy() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        let bytes = build(&[("fox.txt", payload)], CompressionMethod::Stored);
        // Flip a byte of the stored data; the CRC check catches it on read.
        let corrupt = replace_all(&bytes, b"quick", b"QUICK");
        let archive = Archive::from_bytes(corrupt).unwrap();
        let entry = archive.entries().remove(0);
        let mut sink = Vec::new();
        assert!(entry.copy_to(&mut sink).is_err());
    }

    #[test]
    fn test_entries_are_independent() {
        let bytes = build(&[("a.txt", b"alpha"), ("b.txt", b"bravo")], CompressionMethod::Deflated);
        let archive = Archive::from_bytes(bytes).unwrap();
        let mut entries = archive.entries();
        let second = entries.pop().unwrap();
        drop(archive);
        let handle = std::thread::spawn(move || second.read_all().unwrap());
        assert_eq!(entries.pop().unwrap().read_all().unwrap(), b"alpha");
        assert_eq!(handle.join().unwrap(), b"bravo");
    }

    #[test]
    fn test_duplicate_names_are_kept() {
        let bytes = build(&[("a.txt", b"alpha"), ("b.txt", b"bravo")], CompressionMethod::Deflated);
        // Rename the second entry in its local header and central record alike.
        let archive = Archive::from_bytes(replace_all(&bytes, b"b.txt", b"a.txt")).unwrap();
        assert_eq!(archive.len(), 2);
        let entries = archive.entries();
        assert_eq!(entries.iter().map(Entry::name).collect::<Vec<_>>(), ["a.txt", "a.txt"]);
        assert_eq!(entries[0].clone().read_all().unwrap(), b"alpha");
        assert_eq!(entries[1].clone().read_all().unwrap(), b"bravo");
    }

    #[test]
    fn test_data_descriptor_entries_use_central_directory() {
        let bytes = build(&[("a.txt", b"alpha"), ("b.txt", b"bravo")], CompressionMethod::Deflated);
        let archive = Archive::from_bytes(with_data_descriptor_flag(&bytes)).unwrap();
        let entries = archive.entries();
        assert_eq!(entries.iter().map(Entry::name).collect::<Vec<_>>(), ["a.txt", "b.txt"]);
        assert_eq!(entries[1].clone().read_all().unwrap(), b"bravo");
    }

    #[test]
    fn test_merged_duplicates_are_rejected() {
        let bytes = build(&[("a.txt", b"alpha"), ("b.txt", b"bravo")], CompressionMethod::Stored);
        let renamed = replace_all(&bytes, b"b.txt", b"a.txt");
        let err = Archive::from_bytes(with_data_descriptor_flag(&renamed)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unsupported(_)));
    }

    #[rstest]
    #[case::no_comment(&[], Some(3))]
    #[case::comment(b"hi", Some(3))]
    fn test_declared_entries(#[case] comment: &[u8], #[case] expected: Option<usize>) {
        let mut record = b"PK\x05\x06\0\0\0\0\x03\0\x03\0".to_vec();
        record.extend_from_slice(&[0; 8]);
        record.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        record.extend_from_slice(comment);
        assert_eq!(declared_entries(&record, comment.len()), expected);
        assert_eq!(declared_entries(b"short", 0), None);
    }

    /// Mark every local header as followed by a data descriptor.
    fn with_data_descriptor_flag(bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        let mut i = 0;
        while i + 8 <= out.len() {
            if &out[i..i + 4] == b"PK\x03\x04" {
                out[i + 6] |= 1 << 3;
                i += 4;
            } else {
                i += 1;
            }
        }
        out
    }

    fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
        assert_eq!(from.len(), to.len());
        let mut out = haystack.to_vec();
        let mut i = 0;
        while i + from.len() <= out.len() {
            if &out[i..i + from.len()] == from {
                out[i..i + from.len()].copy_from_slice(to);
                i += from.len();
            } else {
                i += 1;
            }
        }
        out
    }
}
