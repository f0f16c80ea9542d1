// Hibernation swap file allocation
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::{CString, OsStr};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use libc::{c_int, c_long};
use nix::errno::Errno;
use thiserror::Error;

use crate::device;
use crate::helpers::{is_exec_in_path, spawn_and_wait, try_spawn_and_wait};
use crate::locator::SwapFile;
use crate::log::Logger;
use crate::sizing::MB;
use crate::{info, warn};

nix::ioctl_read_bad!(
    fs_ioc_getflags,
    nix::request_code_read!(b'f', 1, std::mem::size_of::<c_long>()),
    c_int
);
nix::ioctl_write_ptr_bad!(
    fs_ioc_setflags,
    nix::request_code_write!(b'f', 2, std::mem::size_of::<c_long>()),
    c_int
);

const FS_COMPR_FL: c_int = 0x0000_0004;
const FS_NOCOMP_FL: c_int = 0x0000_0400;
const FS_NOCOW_FL: c_int = 0x0080_0000;

const EXT4_SUPER_MAGIC: u64 = 0xEF53;
const BTRFS_SUPER_MAGIC: u64 = 0x9123_683E;
const XFS_SUPER_MAGIC: u64 = 0x5846_5342;

const IOPRIO_WHO_PROCESS: c_int = 1;
const IOPRIO_CLASS_IDLE: c_int = 3;
const IOPRIO_CLASS_SHIFT: c_int = 13;

/// Written at the start of every block by the slow allocation path.
const FILL_PATTERN: u32 = (b'T' as u32) << 24 | (b'F' as u32) << 16 | (b'S' as u32) << 8 | b'M' as u32;

#[derive(Error, Debug)]
pub enum SwapFileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Helper error: {0}")]
    Helper(#[from] crate::helpers::HelperError),
    #[error("Not enough disk space to create {0} with {1} MB")]
    NoSpace(String, u64),
    #[error("Could not allocate {0}: {1}")]
    Allocate(String, io::Error),
    #[error("Swap files are not supported on Btrfs running on kernel {0}")]
    UnsupportedKernel(String),
    #[error("Could not determine Linux kernel version: {0}")]
    KernelVersion(String),
    #[error("Could not disable swap file {0}: {1}")]
    Swapoff(String, Errno),
    #[error("Could not remove swap file {0}: {1}")]
    Remove(String, io::Error),
}

pub type Result<T> = std::result::Result<T, SwapFileError>;

/// Filesystem families that need special handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filesystem {
    Ext4,
    Btrfs,
    Xfs,
    Other(u64),
}

impl Filesystem {
    pub fn from_magic(magic: u64) -> Self {
        match magic & 0xffff_ffff {
            EXT4_SUPER_MAGIC => Filesystem::Ext4,
            BTRFS_SUPER_MAGIC => Filesystem::Btrfs,
            XFS_SUPER_MAGIC => Filesystem::Xfs,
            other => Filesystem::Other(other),
        }
    }

    pub fn detect(path: &Path) -> Option<Self> {
        let stat = nix::sys::statfs::statfs(path).ok()?;
        Some(Self::from_magic(stat.filesystem_type().0 as u64))
    }

    /// XFS can't be trusted to back a truncated file with real blocks, so
    /// it is grown by writing instead.
    fn needs_explicit_commit(self) -> bool {
        self == Filesystem::Xfs
    }
}

/// Major number of a kernel release string such as "5.15.0-1034-azure".
pub fn kernel_major(release: &str) -> Option<u32> {
    release.split('.').next()?.parse().ok()
}

/// Write `FILL_PATTERN` at every `stride` bytes of `[0, size)` and at the
/// very end, forcing the filesystem to allocate every block.
pub fn write_stride_pattern(file: &File, size: u64, stride: u64) -> io::Result<()> {
    let pattern = FILL_PATTERN.to_ne_bytes();
    let len = pattern.len() as u64;

    let mut offset = 0u64;
    while offset < size {
        file.write_all_at(&pattern, offset)?;
        offset += stride;
    }
    if size >= len {
        file.write_all_at(&pattern, size - len)?;
    }
    file.sync_data()
}

/// Set and clear inode attribute flags.
fn update_inode_flags(file: &File, set: c_int, clear: c_int) -> nix::Result<()> {
    let mut flags: c_int = 0;
    // The fd is valid for the lifetime of `file`; the kernel reads and writes an int.
    unsafe { fs_ioc_getflags(file.as_raw_fd(), &mut flags) }?;
    flags |= set;
    flags &= !clear;
    unsafe { fs_ioc_setflags(file.as_raw_fd(), &flags) }?;
    Ok(())
}

/// Drop our I/O priority to idle so block allocation does not starve the workload.
fn lower_io_priority(log: Logger) {
    let ioprio = IOPRIO_CLASS_IDLE << IOPRIO_CLASS_SHIFT | 7;
    // ioprio_set only touches scheduler state of this process.
    let rc = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, 0, ioprio) };
    if rc < 0 {
        info!(log, "Could not lower I/O priority: {}", Errno::last());
    }
}

fn path_cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))
}

pub fn swapon(path: &Path) -> nix::Result<()> {
    let c_path = path_cstring(path).map_err(|_| Errno::EINVAL)?;
    // `c_path` is a valid NUL-terminated string for the duration of the call.
    Errno::result(unsafe { libc::swapon(c_path.as_ptr(), 0) }).map(drop)
}

pub fn swapoff(path: &Path) -> nix::Result<()> {
    let c_path = path_cstring(path).map_err(|_| Errno::EINVAL)?;
    // `c_path` is a valid NUL-terminated string for the duration of the call.
    Errno::result(unsafe { libc::swapoff(c_path.as_ptr()) }).map(drop)
}

/// Creates and removes the swap file backing hibernation.
#[derive(Debug, Clone)]
pub struct Allocator {
    path: PathBuf,
    proc_mounts: PathBuf,
    defragment: bool,
    log: Logger,
}

impl Allocator {
    pub fn new(path: &Path, proc_mounts: &Path, defragment: bool, log: Logger) -> Self {
        Self {
            path: path.to_path_buf(),
            proc_mounts: proc_mounts.to_path_buf(),
            defragment,
            log,
        }
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    /// Create a swap file of `size` bytes, fully backed by disk blocks and
    /// formatted with mkswap.
    pub fn create(&self, size: u64) -> Result<SwapFile> {
        let fs = self.allocate(size)?;
        self.filesystem_specific_checks(fs)?;

        spawn_and_wait("mkswap", &[self.path.as_os_str()], self.log)?;

        Ok(SwapFile::new(&self.path, size))
    }

    /// Swap out an undersized file for a new one of `size` bytes. The old
    /// file is gone before any block of the new one is allocated.
    pub fn replace(&self, old: &SwapFile, size: u64) -> Result<SwapFile> {
        self.remove(old)?;
        self.create(size)
    }

    /// Create the file and back all of its `size` bytes with disk blocks.
    fn allocate(&self, size: u64) -> Result<Filesystem> {
        info!(self.log, "Creating hibernation file at {} with {} MB.", self.name(), size / MB);

        let fs = self.prepare(size)?;

        lower_io_priority(self.log);

        info!(self.log, "Ensuring {} has no holes in it.", self.name());
        self.commit_blocks(fs, size)?;
        Ok(fs)
    }

    /// Open (creating with mode 0600) the file, turn off CoW and compression
    /// and set its length where the filesystem allows it.
    fn prepare(&self, size: u64) -> Result<Filesystem> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&self.path)?;

        // Btrfs needs NOCOW for swap files; other filesystems may reject the
        // flag, which is fine.
        if let Err(e) = update_inode_flags(&file, FS_NOCOW_FL, 0) {
            if e != Errno::EOPNOTSUPP && e != Errno::ENOTTY {
                info!(self.log, "Could not disable CoW for {}: {}. Will try setting up swap anyway.", self.name(), e);
            }
        }
        if let Err(e) = update_inode_flags(&file, FS_NOCOMP_FL, FS_COMPR_FL) {
            if e != Errno::EOPNOTSUPP && e != Errno::ENOTTY {
                info!(self.log, "Could not disable compression for {}: {}. Will try setting up swap anyway.", self.name(), e);
            }
        }

        let fs = Filesystem::detect(&self.path).unwrap_or(Filesystem::Other(0));
        if fs.needs_explicit_commit() {
            return Ok(fs);
        }

        if let Err(e) = file.set_len(size) {
            return Err(match e.raw_os_error().map(Errno::from_raw) {
                Some(Errno::ENOSPC) | Some(Errno::EFBIG) => SwapFileError::NoSpace(self.name(), size / MB),
                _ => SwapFileError::Allocate(self.name(), e),
            });
        }
        Ok(fs)
    }

    /// Make the filesystem commit real blocks for the whole file.
    fn commit_blocks(&self, fs: Filesystem, size: u64) -> Result<()> {
        if fs.needs_explicit_commit() {
            info!(self.log, "{} is on XFS; need to use slower method to allocate swap file", self.name());
        } else if self.try_fallocate(size)? {
            return Ok(());
        } else {
            info!(self.log, "Fast method failed; trying a slower method.");
        }

        self.fill_with_pattern(size)
            .map_err(|e| SwapFileError::Allocate(self.name(), e))
    }

    /// Reserve blocks with fallocate(2). `Ok(false)` means the call is not
    /// available here and the slow path should be used.
    fn try_fallocate(&self, size: u64) -> Result<bool> {
        let file = match OpenOptions::new().write(true).open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                info!(self.log, "Could not open {} for writing: {}", self.name(), e);
                return Ok(false);
            }
        };
        let len = libc::off_t::try_from(size)
            .map_err(|_| SwapFileError::NoSpace(self.name(), size / MB))?;

        // The fd is valid for the lifetime of `file`.
        let rc = unsafe { libc::fallocate(file.as_raw_fd(), 0, 0, len) };
        match Errno::result(rc) {
            Ok(_) => Ok(true),
            Err(Errno::EOPNOTSUPP) | Err(Errno::ENOSYS) => Ok(false),
            Err(Errno::ENOSPC) => Err(SwapFileError::NoSpace(self.name(), size / MB)),
            Err(e) => Err(SwapFileError::Allocate(self.name(), e.into())),
        }
    }

    fn fill_with_pattern(&self, size: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;

        let dir = self.path.parent().unwrap_or(Path::new("/"));
        let fs_block = nix::sys::statfs::statfs(dir)
            .map(|s| s.block_size() as u64)
            .map_err(io::Error::from)?;
        let sector = device::sector_size(&self.proc_mounts, dir).unwrap_or(0);
        let stride = fs_block.max(sector).max(512);

        write_stride_pattern(&file, size, stride)
    }

    /// Per-filesystem checks and defragmentation. Only the Btrfs kernel
    /// version check can fail; the tools are optional.
    fn filesystem_specific_checks(&self, fs: Filesystem) -> Result<()> {
        let path = self.path.as_os_str();
        match fs {
            Filesystem::Ext4 => {
                if self.defragment && is_exec_in_path("e4defrag") {
                    try_spawn_and_wait("e4defrag", &[path], self.log);
                }
            }
            Filesystem::Btrfs => {
                let uts = nix::sys::utsname::uname()
                    .map_err(|e| SwapFileError::KernelVersion(e.to_string()))?;
                let release = uts.release().to_string_lossy().into_owned();
                match kernel_major(&release) {
                    None => return Err(SwapFileError::KernelVersion(release)),
                    Some(major) if major < 5 => return Err(SwapFileError::UnsupportedKernel(release)),
                    Some(_) => {}
                }
                if self.defragment && is_exec_in_path("btrfs") {
                    try_spawn_and_wait("btrfs", &[OsStr::new("filesystem"), OsStr::new("defragment"), path], self.log);
                }
            }
            Filesystem::Xfs => {
                if self.defragment && is_exec_in_path("xfs_fsr") {
                    try_spawn_and_wait("xfs_fsr", &[OsStr::new("-v"), path], self.log);
                }
            }
            Filesystem::Other(_) => {}
        }
        Ok(())
    }

    /// Disable and delete an existing swap file.
    pub fn remove(&self, swap: &SwapFile) -> Result<()> {
        let name = swap.path.display().to_string();

        match swapoff(&swap.path) {
            Ok(()) => {}
            Err(Errno::EINVAL) => {
                info!(self.log, "{} is not currently being used as a swap partition. That's OK.", name);
            }
            Err(e) => return Err(SwapFileError::Swapoff(name, e)),
        }

        match fs::remove_file(&swap.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(self.log, "{} was already gone.", name);
                Ok(())
            }
            Err(e) => Err(SwapFileError::Remove(name, e)),
        }
    }
}
