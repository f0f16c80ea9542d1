// Memory information parser for /proc/meminfo
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemInfoError {
    #[error("Could not read memory information (is /proc mounted?): {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Unknown unit for {0}: {1}")]
    UnknownUnit(String, String),
}

pub type Result<T> = std::result::Result<T, MemInfoError>;

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;

/// Convert a "<value> <unit>" pair from /proc/meminfo into bytes.
fn to_bytes(key: &str, value_part: &str) -> Result<u64> {
    let mut parts = value_part.split_whitespace();
    let number = parts
        .next()
        .ok_or_else(|| MemInfoError::ParseError(format!("{} has no value", key)))?;
    let value: u64 = number
        .parse()
        .map_err(|e| MemInfoError::ParseError(format!("{}: {}", key, e)))?;

    let multiplier = match parts.next() {
        Some("kB") => KIB,
        Some("MB") => MIB,
        Some("GB") => GIB,
        Some("TB") => TIB,
        Some(unit) => return Err(MemInfoError::UnknownUnit(key.to_string(), unit.to_string())),
        None => return Err(MemInfoError::UnknownUnit(key.to_string(), String::new())),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| MemInfoError::ParseError(format!("{} overflows", key)))
}

/// Read a single "Key:   value unit" record as bytes.
/// Stops reading as soon as the field is found.
pub fn get_mem_field<R: BufRead>(reader: R, field: &str) -> Result<u64> {
    for line in reader.lines() {
        let line = line?;

        if let Some((key, value_part)) = line.split_once(':') {
            if key == field {
                return to_bytes(key, value_part);
            }
        }
    }

    Err(MemInfoError::MissingField(field.to_string()))
}

/// Get total RAM in bytes
pub fn get_ram_size<P: AsRef<Path>>(meminfo: P) -> Result<u64> {
    let file = File::open(meminfo)?;
    let total = get_mem_field(BufReader::new(file), "MemTotal")?;
    if total == 0 {
        return Err(MemInfoError::ParseError("MemTotal is zero".to_string()));
    }
    Ok(total)
}

/// Get system page size in bytes
pub fn get_page_size() -> u64 {
    nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .map(|v| v as u64)
        .unwrap_or(4096)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MemTotal:        8039600 kB\n\
                          MemFree:          912340 kB\n\
                          MemAvailable:    5120000 kB\n";

    #[test]
    fn test_get_mem_total_kb() {
        let total = get_mem_field(SAMPLE.as_bytes(), "MemTotal").unwrap();
        assert_eq!(total, 8039600 * 1024);
    }

    #[test]
    fn test_other_units() {
        assert_eq!(get_mem_field("MemTotal: 4 GB\n".as_bytes(), "MemTotal").unwrap(), 4 * GIB);
        assert_eq!(get_mem_field("MemTotal: 512 MB\n".as_bytes(), "MemTotal").unwrap(), 512 * MIB);
        assert_eq!(get_mem_field("MemTotal: 1 TB\n".as_bytes(), "MemTotal").unwrap(), TIB);
    }

    #[test]
    fn test_unknown_unit_is_rejected() {
        assert!(matches!(
            get_mem_field("MemTotal: 4 PB\n".as_bytes(), "MemTotal"),
            Err(MemInfoError::UnknownUnit(_, _))
        ));
        assert!(matches!(
            get_mem_field("MemTotal: 4\n".as_bytes(), "MemTotal"),
            Err(MemInfoError::UnknownUnit(_, _))
        ));
    }

    #[test]
    fn test_garbled_and_missing() {
        assert!(matches!(
            get_mem_field("MemTotal: lots kB\n".as_bytes(), "MemTotal"),
            Err(MemInfoError::ParseError(_))
        ));
        assert!(matches!(
            get_mem_field("MemFree: 1 kB\n".as_bytes(), "MemTotal"),
            Err(MemInfoError::MissingField(_))
        ));
    }

    #[test]
    fn test_get_ram_size_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(get_ram_size(&path).unwrap(), 8039600 * 1024);
        assert!(matches!(
            get_ram_size(dir.path().join("absent")),
            Err(MemInfoError::Io(_))
        ));
    }

    #[test]
    fn test_page_size() {
        assert!(get_page_size().is_power_of_two());
    }
}
