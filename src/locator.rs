// Discovery of an existing hibernation swap file
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::helpers::unescape_octal;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("Could not read {0} (is /proc mounted?): {1}")]
    Io(String, io::Error),
    #[error("Could not skip header line from {0}")]
    MissingHeader(String),
    #[error("Malformed line in {0}: {1}")]
    Malformed(String, String),
}

pub type Result<T> = std::result::Result<T, LocatorError>;

/// A candidate or confirmed swap backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapFile {
    pub path: PathBuf,
    pub capacity: u64,
}

impl SwapFile {
    pub fn new<P: Into<PathBuf>>(path: P, capacity: u64) -> Self {
        Self {
            path: path.into(),
            capacity,
        }
    }

    pub fn is_adequate(&self, needed: u64) -> bool {
        self.capacity >= needed
    }
}

/// One record of the live swap table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEntry {
    pub path: PathBuf,
    pub is_file: bool,
    /// Size in bytes (the table reports KiB)
    pub size: u64,
}

/// Parse the contents of /proc/swaps, skipping the header line.
pub fn parse_swaps(content: &str, source: &str) -> Result<Vec<SwapEntry>> {
    let mut lines = content.lines();
    if lines.next().is_none() {
        return Err(LocatorError::MissingHeader(source.to_string()));
    }

    let mut entries = Vec::new();
    for line in lines.filter(|l| !l.trim().is_empty()) {
        let mut fields = line.split_whitespace();
        let (path, kind, size) = match (fields.next(), fields.next(), fields.next()) {
            (Some(p), Some(t), Some(s)) => (p, t, s),
            _ => return Err(LocatorError::Malformed(source.to_string(), line.to_string())),
        };
        let size_kib: u64 = size
            .parse()
            .map_err(|_| LocatorError::Malformed(source.to_string(), line.to_string()))?;

        entries.push(SwapEntry {
            path: PathBuf::from(unescape_octal(path)),
            is_file: kind == "file",
            size: size_kib.saturating_mul(1024),
        });
    }

    Ok(entries)
}

/// Look for a usable swap file.
///
/// The first active file-backed swap area of at least `needed` bytes wins.
/// Failing that, a regular file at `well_known` is reported whatever its
/// size; deciding whether it is big enough is left to the caller.
pub fn find_swap_file(proc_swaps: &Path, well_known: &Path, needed: u64) -> Result<Option<SwapFile>> {
    let source = proc_swaps.display().to_string();
    let content = fs::read_to_string(proc_swaps).map_err(|e| LocatorError::Io(source.clone(), e))?;

    let active = parse_swaps(&content, &source)?
        .into_iter()
        .find(|entry| entry.is_file && entry.size >= needed);
    if let Some(entry) = active {
        return Ok(Some(SwapFile::new(entry.path, entry.size)));
    }

    match fs::metadata(well_known) {
        Ok(meta) if meta.is_file() => Ok(Some(SwapFile::new(well_known, meta.len()))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Filename\t\t\t\tType\t\tSize\t\tUsed\t\tPriority\n";

    fn write_swaps(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("swaps");
        fs::write(&path, format!("{}{}", HEADER, body)).unwrap();
        path
    }

    #[test]
    fn test_parse_swaps() {
        let body = "/dev/sda2 partition 2097148 0 -2\n\
                    /swap\\040dir/file file 1048576 128 -3\n";
        let entries = parse_swaps(&format!("{}{}", HEADER, body), "swaps").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].is_file);
        assert_eq!(entries[1].path, PathBuf::from("/swap dir/file"));
        assert_eq!(entries[1].size, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_swaps_errors() {
        assert!(matches!(parse_swaps("", "swaps"), Err(LocatorError::MissingHeader(_))));
        assert!(matches!(
            parse_swaps(&format!("{}/swapfile file\n", HEADER), "swaps"),
            Err(LocatorError::Malformed(_, _))
        ));
    }

    #[test]
    fn test_prefers_big_enough_active_file() {
        let dir = tempfile::tempdir().unwrap();
        let swaps = write_swaps(
            dir.path(),
            "/dev/sdb1 partition 33554432 0 -2\n\
             /small file 1024 0 -3\n\
             /big file 16777216 0 -4\n",
        );
        let found = find_swap_file(&swaps, &dir.path().join("hibfile.sys"), 8 << 30).unwrap();
        assert_eq!(found, Some(SwapFile::new("/big", 16 << 30)));
    }

    #[test]
    fn test_falls_back_to_well_known_path_even_if_small() {
        let dir = tempfile::tempdir().unwrap();
        let swaps = write_swaps(dir.path(), "/small file 1024 0 -3\n");
        let well_known = dir.path().join("hibfile.sys");
        fs::write(&well_known, vec![0u8; 8192]).unwrap();

        let found = find_swap_file(&swaps, &well_known, 8 << 30).unwrap().unwrap();
        assert_eq!(found.path, well_known);
        assert_eq!(found.capacity, 8192);
        assert!(!found.is_adequate(8 << 30));
    }

    #[test]
    fn test_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let swaps = write_swaps(dir.path(), "");
        let well_known = dir.path().join("hibfile.sys");
        assert_eq!(find_swap_file(&swaps, &well_known, 1).unwrap(), None);

        // A directory at the well-known path is not a swap file
        fs::create_dir(&well_known).unwrap();
        assert_eq!(find_swap_file(&swaps, &well_known, 1).unwrap(), None);
    }

    #[test]
    fn test_missing_proc_swaps_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = find_swap_file(&dir.path().join("swaps"), &dir.path().join("x"), 1);
        assert!(matches!(result, Err(LocatorError::Io(_, _))));
    }
}
