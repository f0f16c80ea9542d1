// Mount table lookups and block device identification
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use libc::c_int;
use thiserror::Error;

use crate::helpers::unescape_octal;
use crate::log::Logger;
use crate::{debug, info};

nix::ioctl_read_bad!(blksszget, nix::request_code_none!(0x12, 104), c_int);

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Could not read {0}: {1}")]
    Io(String, io::Error),
    #[error("Could not determine device for file in path {0}")]
    NoMount(String),
    #[error("Mount source {0} is not a block device")]
    NotBlockDevice(String),
    #[error("Could not find {0} in {1}")]
    NoUuid(String, String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// One line of /proc/mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: PathBuf,
    pub target: PathBuf,
    pub fstype: String,
}

pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next()?;
            Some(MountEntry {
                source: PathBuf::from(unescape_octal(source)),
                target: PathBuf::from(unescape_octal(target)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

pub fn read_mounts(proc_mounts: &Path) -> Result<Vec<MountEntry>> {
    fs::read_to_string(proc_mounts)
        .map(|content| parse_mounts(&content))
        .map_err(|e| DeviceError::Io(proc_mounts.display().to_string(), e))
}

/// Find the mount holding `path` by comparing the device of each mount
/// point with the device of the file. The last match wins, so stacked
/// mounts resolve to the one actually visible.
pub fn mount_for_path(proc_mounts: &Path, path: &Path) -> Result<MountEntry> {
    let dev = fs::metadata(path)
        .map_err(|e| DeviceError::Io(path.display().to_string(), e))?
        .dev();

    read_mounts(proc_mounts)?
        .into_iter()
        .filter(|m| fs::metadata(&m.target).map(|meta| meta.dev() == dev).unwrap_or(false))
        .last()
        .ok_or_else(|| DeviceError::NoMount(path.display().to_string()))
}

/// Device number of the block device a mount comes from.
pub fn block_device_number(mount: &MountEntry) -> Result<u64> {
    let meta = fs::metadata(&mount.source)
        .map_err(|e| DeviceError::Io(mount.source.display().to_string(), e))?;
    if !meta.file_type().is_block_device() {
        return Err(DeviceError::NotBlockDevice(mount.source.display().to_string()));
    }
    Ok(meta.rdev())
}

/// Scan a UUID-indexed symlink directory for the entry whose target has
/// device number `rdev`.
pub fn uuid_for_device(by_uuid: &Path, rdev: u64) -> Result<String> {
    let entries = fs::read_dir(by_uuid).map_err(|e| DeviceError::Io(by_uuid.display().to_string(), e))?;

    for entry in entries.flatten() {
        // metadata() follows the symlink to the device node
        let Ok(meta) = fs::metadata(entry.path()) else {
            continue;
        };
        if !meta.file_type().is_block_device() {
            continue;
        }
        if meta.rdev() == rdev {
            return Ok(entry.file_name().to_string_lossy().into_owned());
        }
    }

    Err(DeviceError::NoUuid(
        format!("device {}:{}", nix::sys::stat::major(rdev), nix::sys::stat::minor(rdev)),
        by_uuid.display().to_string(),
    ))
}

/// The block device and UUID backing `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingDevice {
    pub source: PathBuf,
    pub rdev: u64,
    pub uuid: String,
}

pub fn backing_device(proc_mounts: &Path, by_uuid: &Path, path: &Path, log: Logger) -> Result<BackingDevice> {
    let mount = mount_for_path(proc_mounts, path)?;
    debug!(log, "{} lives on {} mounted at {}", path.display(), mount.source.display(), mount.target.display());
    let rdev = block_device_number(&mount)?;
    let uuid = uuid_for_device(by_uuid, rdev)?;
    info!(log, "UUID for device {} is {}", mount.source.display(), uuid);
    Ok(BackingDevice {
        source: mount.source,
        rdev,
        uuid,
    })
}

/// Logical sector size of the device `path` is on, if it can be queried.
pub fn sector_size(proc_mounts: &Path, path: &Path) -> Option<u64> {
    let mount = mount_for_path(proc_mounts, path).ok()?;
    let dev = fs::File::open(&mount.source).ok()?;
    let mut size: c_int = 0;
    // The fd is valid for the lifetime of `dev`.
    unsafe { blksszget(dev.as_raw_fd(), &mut size) }.ok()?;
    (size > 0).then_some(size as u64)
}
