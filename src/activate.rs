// Swap activation and /etc/fstab entry
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::errno::Errno;
use thiserror::Error;

use crate::helpers::{replace_file, HelperError};
use crate::info;
use crate::locator::SwapFile;
use crate::log::Logger;
use crate::swapfile::swapon;

#[derive(Error, Debug)]
pub enum ActivateError {
    #[error("Couldn't set correct permissions on {0}: {1}")]
    Chmod(String, io::Error),
    #[error("{0} exists but kernel isn't accepting it as a swap file. Try removing it and re-running the agent.")]
    Rejected(String),
    #[error("Could not enable swap file {0}: {1}")]
    Swapon(String, Errno),
    #[error("Could not read {0}: {1}")]
    ReadFstab(String, io::Error),
    #[error("Could not write {0}: {1}")]
    WriteFstab(String, HelperError),
}

pub type Result<T> = std::result::Result<T, ActivateError>;

/// The fstab line registering `swap_path`.
pub fn fstab_line(swap_path: &Path) -> String {
    format!("{}\tnone\tswap\tswap\t0\t0\n", swap_path.display())
}

/// Drop every line mentioning `swap_path` and append our own entry.
pub fn rewrite_fstab(content: &str, swap_path: &Path) -> String {
    let needle = swap_path.display().to_string();
    let mut out: String = content
        .split_inclusive('\n')
        .filter(|line| !line.contains(&needle))
        .collect();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&fstab_line(swap_path));
    out
}

/// Enable `swap` as swap space and register it in fstab.
///
/// `created` tells whether the file was made in this run; a pre-existing file
/// the kernel refuses is reported rather than silently ignored.
pub fn activate(swap: &SwapFile, created: bool, fstab: &Path, log: Logger) -> Result<()> {
    let name = swap.path.display().to_string();
    info!(log, "Ensuring swap file {} is enabled", name);

    fs::set_permissions(&swap.path, fs::Permissions::from_mode(0o600))
        .map_err(|e| ActivateError::Chmod(name.clone(), e))?;

    match swapon(&swap.path) {
        Ok(()) => info!(log, "Enabled {} as swap", name),
        Err(Errno::EBUSY) => info!(log, "{} is already in use as swap", name),
        Err(Errno::EINVAL) if !created => return Err(ActivateError::Rejected(name)),
        Err(e) => return Err(ActivateError::Swapon(name, e)),
    }

    ensure_fstab_entry(fstab, &swap.path, log)
}

pub fn ensure_fstab_entry(fstab: &Path, swap_path: &Path, log: Logger) -> Result<()> {
    let fstab_name = fstab.display().to_string();
    info!(log, "Updating {}", fstab_name);

    let old = fs::read_to_string(fstab).map_err(|e| ActivateError::ReadFstab(fstab_name.clone(), e))?;
    let changed = replace_file(fstab, &rewrite_fstab(&old, swap_path), 0o644)
        .map_err(|e| ActivateError::WriteFstab(fstab_name.clone(), e))?;
    if !changed {
        info!(log, "{} already up to date", fstab_name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSTAB: &str = "UUID=abcd / ext4 defaults 0 1\n\
                         /dev/sdb1 /mnt ext4 defaults 0 2\n";

    #[test]
    fn test_rewrite_appends_single_line() {
        let rewritten = rewrite_fstab(FSTAB, Path::new("/hibfile.sys"));
        assert_eq!(rewritten, format!("{}/hibfile.sys\tnone\tswap\tswap\t0\t0\n", FSTAB));
        assert_eq!(rewritten.matches("/hibfile.sys").count(), 1);
    }

    #[test]
    fn test_rewrite_replaces_old_entries() {
        let old = format!("{}/hibfile.sys swap swap defaults 0 0\n# /hibfile.sys comment\n", FSTAB);
        let rewritten = rewrite_fstab(&old, Path::new("/hibfile.sys"));
        assert_eq!(rewritten, rewrite_fstab(FSTAB, Path::new("/hibfile.sys")));
        assert_eq!(rewrite_fstab(&rewritten, Path::new("/hibfile.sys")), rewritten);
    }

    #[test]
    fn test_rewrite_handles_missing_trailing_newline() {
        let rewritten = rewrite_fstab("UUID=abcd / ext4 defaults 0 1", Path::new("/hibfile.sys"));
        assert_eq!(
            rewritten,
            "UUID=abcd / ext4 defaults 0 1\n/hibfile.sys\tnone\tswap\tswap\t0\t0\n"
        );
        assert_eq!(rewrite_fstab("", Path::new("/s")), "/s\tnone\tswap\tswap\t0\t0\n");
    }

    #[test]
    fn test_ensure_fstab_entry_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let fstab = dir.path().join("fstab");
        fs::write(&fstab, FSTAB).unwrap();
        let log = Logger::console();

        ensure_fstab_entry(&fstab, Path::new("/hibfile.sys"), log).unwrap();
        let first = fs::read_to_string(&fstab).unwrap();
        ensure_fstab_entry(&fstab, Path::new("/hibfile.sys"), log).unwrap();
        assert_eq!(fs::read_to_string(&fstab).unwrap(), first);
        assert_eq!(first.lines().count(), 3);
    }

    #[test]
    fn test_missing_fstab_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ensure_fstab_entry(&dir.path().join("fstab"), Path::new("/s"), Logger::console());
        assert!(matches!(result, Err(ActivateError::ReadFstab(_, _))));
    }
}
