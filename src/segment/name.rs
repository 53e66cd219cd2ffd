//! Canonical segment file names and pure selection logic over them.
//!
//! A segment is named `<seq>-<first-index>.wal` where both fields are 16
//! lowercase hex digits. Ordered lexicographically the names have strictly
//! increasing sequence numbers and non-decreasing first indexes.

use std::fs;
use std::io;
use std::path::Path;

use log::debug;

use crate::errors::InvalidSegmentFileName;

/// Formats the canonical file name of the segment with the given sequence
/// number and first entry index.
pub(crate) fn segment_file_name(seq: u64, first_index: u64) -> String {
    format!("{:016x}-{:016x}.wal", seq, first_index)
}

/// Parses a segment file name into `(seq, first_index)`.
pub(crate) fn parse_segment_file_name(
    name: &str,
) -> Result<(u64, u64), InvalidSegmentFileName> {
    let base = name.strip_suffix(".wal").ok_or_else(|| {
        InvalidSegmentFileName::new(name, "has no '.wal' suffix")
    })?;

    let (seq_part, index_part) = base.split_once('-').ok_or_else(|| {
        InvalidSegmentFileName::new(name, "has no '-' separator")
    })?;

    if seq_part.len() != 16 || index_part.len() != 16 {
        return Err(InvalidSegmentFileName::new(
            name,
            "fields are not 16 digits each",
        ));
    }

    let is_lower_hex =
        |s: &str| s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !is_lower_hex(seq_part) || !is_lower_hex(index_part) {
        return Err(InvalidSegmentFileName::new(
            name,
            "fields are not lowercase hex",
        ));
    }

    let seq = u64::from_str_radix(seq_part, 16).map_err(|e| {
        InvalidSegmentFileName::new(name, format!("cannot parse seq: {}", e))
    })?;
    let first_index = u64::from_str_radix(index_part, 16).map_err(|e| {
        InvalidSegmentFileName::new(name, format!("cannot parse index: {}", e))
    })?;

    Ok((seq, first_index))
}

/// Lists the well-formed segment file names in `dir`, sorted. Files with
/// other names, such as in-flight `.tmp` segments, are ignored.
pub(crate) fn read_segment_names(dir: &Path) -> Result<Vec<String>, io::Error> {
    let mut names = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if parse_segment_file_name(&name).is_ok() {
            names.push(name);
        } else {
            debug!("ignoring non-segment file in WAL directory: {}", name);
        }
    }

    names.sort();
    Ok(names)
}

/// Returns the largest `i` such that `first_index(names[i]) <= index`, the
/// segment replay must start from to cover a snapshot at `index`.
pub(crate) fn search_index(names: &[String], index: u64) -> Option<usize> {
    for i in (0..names.len()).rev() {
        let (_seq, first_index) = parse_segment_file_name(&names[i]).ok()?;
        if first_index <= index {
            return Some(i);
        }
    }
    None
}

/// Verifies that the sequence numbers of `names` increase by exactly one.
pub(crate) fn is_valid_seq(names: &[String]) -> bool {
    let mut last_seq: Option<u64> = None;

    for name in names {
        let Ok((seq, _first_index)) = parse_segment_file_name(name) else {
            return false;
        };

        if let Some(last) = last_seq {
            if seq != last + 1 {
                return false;
            }
        }
        last_seq = Some(seq);
    }

    true
}
