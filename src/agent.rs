// Orchestration of a hibernation setup run
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use thiserror::Error;

use crate::activate::{self, ActivateError};
use crate::capability;
use crate::config::{Config, ConfigError, Paths};
use crate::defaults;
use crate::device::{self, BackingDevice};
use crate::helpers::HelperError;
use crate::locator::{self, LocatorError, SwapFile};
use crate::log::Logger;
use crate::meminfo::{self, MemInfoError};
use crate::resume::{BootConfig, CmdlineParams, Reconciler, ResumeError};
use crate::sizing::{self, SizingError, MB};
use crate::swapfile::{Allocator, SwapFileError};
use crate::udev;
use crate::{info, warn};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Helper(#[from] HelperError),
    #[error("{0}")]
    MemInfo(#[from] MemInfoError),
    #[error("{0}")]
    Sizing(#[from] SizingError),
    #[error("{0}")]
    Locator(#[from] LocatorError),
    #[error("{0}")]
    SwapFile(#[from] SwapFileError),
    #[error("{0}")]
    Activate(#[from] ActivateError),
    #[error("{0}")]
    Resume(#[from] ResumeError),
    #[error("Swap file is active but resume from hibernation is not configured: {0}")]
    Incomplete(String),
}

impl AgentError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Incomplete(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Knobs read from the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentOptions {
    pub defragment: bool,
    pub install_udev_rule: bool,
}

impl AgentOptions {
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            defragment: config.get_bool_or("defragment", defaults::DEFRAGMENT)?,
            install_udev_rule: config.get_bool_or("install_udev_rule", defaults::INSTALL_UDEV_RULE)?,
        })
    }
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            defragment: defaults::DEFRAGMENT,
            install_udev_rule: defaults::INSTALL_UDEV_RULE,
        }
    }
}

/// What to do with the swap file found on the system, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Keep(SwapFile),
    Recreate(SwapFile),
    Create,
}

impl Plan {
    pub fn decide(found: Option<SwapFile>, needed: u64) -> Self {
        match found {
            None => Plan::Create,
            Some(swap) if swap.is_adequate(needed) => Plan::Keep(swap),
            Some(swap) => Plan::Recreate(swap),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NotApplicable,
    Configured,
}

/// Read-only snapshot of the hibernation setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub hibernation_enabled: bool,
    pub ram: u64,
    /// `None` when there is too much memory to hibernate at all
    pub needed: Option<u64>,
    pub swap_file: Option<SwapFile>,
    pub device: Option<BackingDevice>,
    pub cmdline: Option<CmdlineParams>,
}

pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.0} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_none = |v: &Option<String>| v.clone().unwrap_or_else(|| "none".to_string());

        writeln!(f, "Hibernation:")?;
        writeln!(f, "  Enabled:       {}", if self.hibernation_enabled { "yes" } else { "no" })?;
        writeln!(f, "  RAM:           {}", format_size(self.ram))?;
        match self.needed {
            Some(needed) => writeln!(f, "  Swap needed:   {}", format_size(needed))?,
            None => writeln!(f, "  Swap needed:   unsupported (too much RAM)")?,
        }

        writeln!(f, "\nSwap file:")?;
        match &self.swap_file {
            Some(swap) => {
                let adequate = self.needed.map(|n| swap.is_adequate(n)).unwrap_or(false);
                writeln!(f, "  Path:          {}", swap.path.display())?;
                writeln!(f, "  Size:          {}", format_size(swap.capacity))?;
                writeln!(f, "  Adequate:      {}", if adequate { "yes" } else { "no" })?;
                match &self.device {
                    Some(dev) => {
                        writeln!(
                            f,
                            "  Device:        {} ({}:{})",
                            dev.source.display(),
                            nix::sys::stat::major(dev.rdev),
                            nix::sys::stat::minor(dev.rdev)
                        )?;
                        writeln!(f, "  Device UUID:   {}", dev.uuid)?;
                    }
                    None => writeln!(f, "  Device:        unknown")?,
                }
            }
            None => writeln!(f, "  none")?,
        }

        writeln!(f, "\nKernel command line:")?;
        match &self.cmdline {
            Some(params) => {
                writeln!(f, "  resume:             {}", or_none(&params.resume))?;
                writeln!(f, "  resume_offset:      {}", or_none(&params.resume_offset))?;
                write!(f, "  no_console_suspend: {}", or_none(&params.no_console_suspend))
            }
            None => write!(f, "  unreadable"),
        }
    }
}

pub struct Agent {
    paths: Paths,
    options: AgentOptions,
    log: Logger,
}

impl Agent {
    pub fn new(paths: Paths, options: AgentOptions, log: Logger) -> Self {
        Self { paths, options, log }
    }

    fn allocator(&self) -> Allocator {
        Allocator::new(&self.paths.swapfile, &self.paths.proc_mounts, self.options.defragment, self.log)
    }

    /// Bring the swap file, fstab and boot configuration in line so the next
    /// hibernation can be resumed from.
    pub fn run(&self) -> Result<Outcome> {
        if !capability::hibernation_enabled(&self.paths, self.log) {
            info!(self.log, "Hibernation not enabled for this VM.");
            return Ok(Outcome::NotApplicable);
        }

        let ram = meminfo::get_ram_size(&self.paths.proc_meminfo)?;
        let needed = sizing::needed_swap_size(ram)?;
        info!(
            self.log,
            "Physical memory: {} MB, need swap file with at least {} MB",
            ram / MB,
            needed / MB
        );

        let found = locator::find_swap_file(&self.paths.proc_swaps, &self.paths.swapfile, needed)?;
        let (swap, created) = match Plan::decide(found, needed) {
            Plan::Keep(swap) => {
                info!(
                    self.log,
                    "Swap file {} has capacity of {} MB, which is sufficient",
                    swap.path.display(),
                    swap.capacity / MB
                );
                (swap, false)
            }
            Plan::Recreate(old) => {
                warn!(
                    self.log,
                    "Swap file {} has capacity of {} MB but needs at least {} MB. Recreating; system will run without swap while this happens.",
                    old.path.display(),
                    old.capacity / MB,
                    needed / MB
                );
                (self.allocator().replace(&old, needed)?, true)
            }
            Plan::Create => {
                info!(self.log, "Swap file not found");
                (self.allocator().create(needed)?, true)
            }
        };

        activate::activate(&swap, created, &self.paths.fstab, self.log)?;

        let report = Reconciler::new(&self.paths, self.log).reconcile(&swap)?;

        if self.options.install_udev_rule {
            udev::ensure_rule_installed(&self.paths, self.log);
        }

        if !report.is_complete() {
            let reason = match report.boot_config {
                BootConfig::Incomplete(reason) => reason,
                _ => "the kernel did not accept the resume swap area".to_string(),
            };
            return Err(AgentError::Incomplete(reason));
        }

        info!(self.log, "Swap file for VM hibernation set up successfully");
        Ok(Outcome::Configured)
    }

    /// Gather the current state without changing anything.
    pub fn status(&self) -> Result<StatusReport> {
        let hibernation_enabled = capability::hibernation_enabled(&self.paths, self.log);
        let ram = meminfo::get_ram_size(&self.paths.proc_meminfo)?;
        let needed = sizing::needed_swap_size(ram).ok();

        let swap_file = locator::find_swap_file(&self.paths.proc_swaps, &self.paths.swapfile, needed.unwrap_or(0))?;
        let device = swap_file.as_ref().and_then(|swap| {
            device::backing_device(&self.paths.proc_mounts, &self.paths.disk_by_uuid, &swap.path, self.log)
                .map_err(|e| info!(self.log, "{}", e))
                .ok()
        });

        Ok(StatusReport {
            hibernation_enabled,
            ram,
            needed,
            swap_file,
            device,
            cmdline: CmdlineParams::read(&self.paths.proc_cmdline),
        })
    }
}
