// Kernel resume parameter reconciliation
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::bootloader::{Bootloader, BootloaderError, PatchOutcome, Toolset};
use crate::config::Paths;
use crate::device::{self, DeviceError};
use crate::helpers::read_first_line;
use crate::locator::SwapFile;
use crate::log::Logger;
use crate::meminfo::get_page_size;
use crate::offset::resolve_offset;
use crate::snapshot::{ResumeSwapArea, SnapshotDevice};
use crate::{info, warn};

#[derive(Error, Debug)]
pub enum ResumeError {
    #[error("Could not open {0}: {1}")]
    Open(String, io::Error),
    #[error("Swap file {0} is not a regular file")]
    NotRegularFile(String),
    #[error("Could not query block map of {0}: {1}")]
    BlockMap(String, io::Error),
    #[error("Could not determine file system block number for {0}, or file isn't contiguous")]
    NoContiguousOffset(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Bootloader(#[from] BootloaderError),
}

pub type Result<T> = std::result::Result<T, ResumeError>;

/// The `resume`, `resume_offset` and `no_console_suspend` kernel parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeParams {
    pub uuid: String,
    pub offset: u64,
}

impl ResumeParams {
    pub fn new(uuid: &str, offset: u64) -> Self {
        Self {
            uuid: uuid.to_string(),
            offset,
        }
    }

    pub fn device_path(&self) -> String {
        format!("/dev/disk/by-uuid/{}", self.uuid)
    }

    /// True if `cmdline` carries all three parameters with exactly our values.
    pub fn matches(&self, cmdline: &CmdlineParams) -> bool {
        cmdline.resume.as_deref() == Some(self.device_path().as_str())
            && cmdline.resume_offset.as_deref() == Some(self.offset.to_string().as_str())
            && cmdline.no_console_suspend.as_deref() == Some("1")
    }
}

impl fmt::Display for ResumeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resume={} resume_offset={} no_console_suspend=1",
            self.device_path(),
            self.offset
        )
    }
}

/// Resume-related parameters found on a kernel command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdlineParams {
    pub resume: Option<String>,
    pub resume_offset: Option<String>,
    pub no_console_suspend: Option<String>,
}

impl CmdlineParams {
    /// Later occurrences override earlier ones, as in the kernel.
    pub fn parse(cmdline: &str) -> Self {
        let mut params = Self::default();
        for token in cmdline.split_whitespace() {
            if let Some(v) = token.strip_prefix("resume=") {
                params.resume = Some(v.to_string());
            } else if let Some(v) = token.strip_prefix("resume_offset=") {
                params.resume_offset = Some(v.to_string());
            } else if let Some(v) = token.strip_prefix("no_console_suspend=") {
                params.no_console_suspend = Some(v.to_string());
            }
        }
        params
    }

    pub fn read(proc_cmdline: &Path) -> Option<Self> {
        read_first_line(proc_cmdline).map(|line| Self::parse(&line))
    }
}

/// State of the persistent boot configuration after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootConfig {
    AlreadyCorrect,
    Patched,
    Incomplete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub params: ResumeParams,
    pub swap_area_registered: bool,
    pub boot_config: BootConfig,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.swap_area_registered && !matches!(self.boot_config, BootConfig::Incomplete(_))
    }
}

/// Points the kernel and the boot configuration at a swap file.
pub struct Reconciler<'a> {
    paths: &'a Paths,
    log: Logger,
}

impl<'a> Reconciler<'a> {
    pub fn new(paths: &'a Paths, log: Logger) -> Self {
        Self { paths, log }
    }

    /// First physical block of `swap`, checked to be usable for resume.
    fn swap_file_offset(&self, swap: &SwapFile) -> Result<u64> {
        let name = swap.path.display().to_string();
        let file = File::open(&swap.path).map_err(|e| ResumeError::Open(name.clone(), e))?;
        let meta = file.metadata().map_err(|e| ResumeError::Open(name.clone(), e))?;
        if !meta.is_file() {
            return Err(ResumeError::NotRegularFile(name));
        }

        resolve_offset(&file, get_page_size(), self.log)
            .map_err(|e| ResumeError::BlockMap(name.clone(), e))?
            .ok_or(ResumeError::NoContiguousOffset(name))
    }

    pub fn reconcile(&self, swap: &SwapFile) -> Result<ReconcileReport> {
        info!(self.log, "Updating swap offset");

        let offset = self.swap_file_offset(swap)?;
        let mount = device::mount_for_path(&self.paths.proc_mounts, &swap.path)?;
        let rdev = device::block_device_number(&mount)?;
        info!(
            self.log,
            "Swap file {} is at device {} ({}:{}), offset {}",
            swap.path.display(),
            mount.source.display(),
            nix::sys::stat::major(rdev),
            nix::sys::stat::minor(rdev),
            offset
        );

        let area = ResumeSwapArea {
            device: rdev,
            offset: Some(offset),
        };
        let swap_area_registered = match SnapshotDevice::open(&self.paths.snapshot_dev)
            .and_then(|dev| dev.set_swap_area(&area))
        {
            Ok(()) => true,
            Err(e) => {
                warn!(self.log, "{}", e);
                false
            }
        };

        let uuid = device::uuid_for_device(&self.paths.disk_by_uuid, rdev)?;
        info!(self.log, "Swap file {} is in device UUID {}", swap.path.display(), uuid);

        let params = ResumeParams::new(&uuid, offset);
        let boot_config = self.reconcile_boot_config(&params, Toolset::detect())?;

        Ok(ReconcileReport {
            params,
            swap_area_registered,
            boot_config,
        })
    }

    /// Compare `params` with the running kernel's command line and patch the
    /// boot configuration if any of them differs.
    pub fn reconcile_boot_config(&self, params: &ResumeParams, tools: Toolset) -> Result<BootConfig> {
        match CmdlineParams::read(&self.paths.proc_cmdline) {
            Some(current) if params.matches(&current) => {
                info!(self.log, "Kernel command line already has the resume parameters.");
                return Ok(BootConfig::AlreadyCorrect);
            }
            Some(_) => {}
            None => info!(
                self.log,
                "Could not read {}; is /proc mounted? Assuming information is incorrect.",
                self.paths.proc_cmdline.display()
            ),
        }

        info!(self.log, "Kernel command-line parameters need updating.");
        let outcome = Bootloader::new(self.paths, tools, self.log).patch(params)?;
        Ok(match outcome {
            PatchOutcome::Patched => BootConfig::Patched,
            PatchOutcome::Incomplete(reason) => BootConfig::Incomplete(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const UUID: &str = "9c1f5e2a-1b2c-4d5e-8f90-123456789abc";

    #[test]
    fn test_params_display() {
        let params = ResumeParams::new(UUID, 34816);
        assert_eq!(
            params.to_string(),
            format!("resume=/dev/disk/by-uuid/{} resume_offset=34816 no_console_suspend=1", UUID)
        );
    }

    #[test]
    fn test_cmdline_parse_last_wins() {
        let parsed = CmdlineParams::parse(
            "BOOT_IMAGE=/vmlinuz root=UUID=x resume=/dev/sda2 ro resume=/dev/disk/by-uuid/y resume_offset=12",
        );
        assert_eq!(parsed.resume.as_deref(), Some("/dev/disk/by-uuid/y"));
        assert_eq!(parsed.resume_offset.as_deref(), Some("12"));
        assert_eq!(parsed.no_console_suspend, None);
    }

    #[test]
    fn test_matches_requires_all_three() {
        let params = ResumeParams::new(UUID, 34816);
        let full = format!(
            "root=/dev/sda1 resume=/dev/disk/by-uuid/{} resume_offset=34816 no_console_suspend=1 quiet",
            UUID
        );
        assert!(params.matches(&CmdlineParams::parse(&full)));

        for bad in [
            full.replace("no_console_suspend=1", "no_console_suspend=0"),
            full.replace("resume_offset=34816", "resume_offset=34817"),
            full.replace("resume_offset=34816", ""),
            full.replace(UUID, "other-uuid"),
            full.replace(" no_console_suspend=1", ""),
        ] {
            assert!(!params.matches(&CmdlineParams::parse(&bad)), "{}", bad);
        }
    }

    #[test]
    fn test_already_correct_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::system().rebased(dir.path());
        let params = ResumeParams::new(UUID, 34816);

        fs::create_dir_all(paths.proc_cmdline.parent().unwrap()).unwrap();
        fs::write(&paths.proc_cmdline, format!("root=/dev/sda1 {}\n", params)).unwrap();
        fs::create_dir_all(paths.grub_default.parent().unwrap()).unwrap();
        fs::write(&paths.grub_default, "GRUB_TIMEOUT=5\n").unwrap();
        let mtime = fs::metadata(&paths.grub_default).unwrap().modified().unwrap();

        let reconciler = Reconciler::new(&paths, Logger::console());
        let tools = Toolset {
            update_grub2: Some(std::path::PathBuf::from("/usr/sbin/update-grub2")),
            ..Toolset::default()
        };
        assert_eq!(
            reconciler.reconcile_boot_config(&params, tools).unwrap(),
            BootConfig::AlreadyCorrect
        );
        assert_eq!(fs::read_to_string(&paths.grub_default).unwrap(), "GRUB_TIMEOUT=5\n");
        assert_eq!(fs::metadata(&paths.grub_default).unwrap().modified().unwrap(), mtime);
    }

    #[test]
    fn test_mismatch_without_tools_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::system().rebased(dir.path());
        let params = ResumeParams::new(UUID, 34816);

        fs::create_dir_all(paths.proc_cmdline.parent().unwrap()).unwrap();
        fs::write(&paths.proc_cmdline, "root=/dev/sda1 quiet\n").unwrap();

        let reconciler = Reconciler::new(&paths, Logger::console());
        let state = reconciler
            .reconcile_boot_config(&params, Toolset::default())
            .unwrap();
        assert!(matches!(state, BootConfig::Incomplete(_)));
    }

    #[test]
    fn test_report_completeness() {
        let params = ResumeParams::new(UUID, 1);
        let report = |registered, boot_config| ReconcileReport {
            params: params.clone(),
            swap_area_registered: registered,
            boot_config,
        };
        assert!(report(true, BootConfig::AlreadyCorrect).is_complete());
        assert!(report(true, BootConfig::Patched).is_complete());
        assert!(!report(false, BootConfig::Patched).is_complete());
        assert!(!report(true, BootConfig::Incomplete("no grub".into())).is_complete());
    }

    #[test]
    fn test_reconcile_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::system().rebased(dir.path());
        let reconciler = Reconciler::new(&paths, Logger::console());
        let result = reconciler.swap_file_offset(&SwapFile::new(dir.path(), 0));
        assert!(matches!(result, Err(ResumeError::NotRegularFile(_))));
    }
}
