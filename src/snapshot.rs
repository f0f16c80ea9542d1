// Kernel hibernation device (/dev/snapshot)
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use thiserror::Error;

/// Wire value the kernel reads as "no offset".
pub const INVALID_OFFSET: u64 = u64::MAX;

/// `struct resume_swap_area` from linux/suspend_ioctls.h.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct KernelSwapArea {
    pub offset: u64,
    pub dev: u32,
}

nix::ioctl_write_ptr!(snapshot_set_swap_area, b'3', 13, KernelSwapArea);

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Could not open {0}: {1}")]
    Open(String, io::Error),
    #[error("Could not set resume_swap_area parameters in {0}: {1}")]
    Ioctl(String, io::Error),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Where the kernel should look for the hibernation image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeSwapArea {
    /// Device number of the block device holding the swap file
    pub device: u64,
    /// First physical block of the swap file, `None` if unresolvable
    pub offset: Option<u64>,
}

impl ResumeSwapArea {
    /// Serialize for the kernel: the device goes in the kernel's 32-bit
    /// `new_encode_dev` layout and a missing offset becomes all-ones.
    pub fn to_kernel(&self) -> KernelSwapArea {
        let major = nix::sys::stat::major(self.device) as u32;
        let minor = nix::sys::stat::minor(self.device) as u32;
        KernelSwapArea {
            offset: self.offset.unwrap_or(INVALID_OFFSET),
            dev: (minor & 0xff) | (major << 8) | ((minor & !0xff) << 12),
        }
    }
}

/// Handle on the kernel's hibernation control device.
pub struct SnapshotDevice {
    file: File,
    name: String,
}

impl SnapshotDevice {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| SnapshotError::Open(path.display().to_string(), e))?;
        Ok(Self {
            file,
            name: path.display().to_string(),
        })
    }

    /// Tell the kernel which device and offset to write the image to.
    pub fn set_swap_area(&self, area: &ResumeSwapArea) -> Result<()> {
        let kernel_area = area.to_kernel();
        // `kernel_area` outlives the call and matches the kernel's layout.
        unsafe { snapshot_set_swap_area(self.file.as_raw_fd(), &kernel_area) }
            .map_err(|e| SnapshotError::Ioctl(self.name.clone(), e.into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_layout_is_packed() {
        assert_eq!(std::mem::size_of::<KernelSwapArea>(), 12);
    }

    #[test]
    fn test_to_kernel_encoding() {
        let area = ResumeSwapArea {
            device: nix::sys::stat::makedev(8, 1),
            offset: Some(34816),
        };
        let kernel_area = area.to_kernel();
        let (offset, dev) = (kernel_area.offset, kernel_area.dev);
        assert_eq!(offset, 34816);
        assert_eq!(dev, 0x801);

        let nvme = ResumeSwapArea {
            device: nix::sys::stat::makedev(259, 300),
            offset: None,
        };
        let kernel_area = nvme.to_kernel();
        let (offset, dev) = (kernel_area.offset, kernel_area.dev);
        assert_eq!(offset, INVALID_OFFSET);
        assert_eq!(dev, (300 & 0xff) | (259 << 8) | ((300 & !0xff) << 12));
    }

    #[test]
    fn test_open_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SnapshotDevice::open(&dir.path().join("snapshot")),
            Err(SnapshotError::Open(_, _))
        ));
    }
}
