// Persistent kernel command line patching (initramfs, grubby, GRUB)
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Paths;
use crate::defaults::{GRUB_DROPIN_NAME, MANAGED_BLOCK_END, MANAGED_BLOCK_START};
use crate::helpers::{find_executable, replace_file, try_spawn_and_wait, HelperError};
use crate::log::{Logger, IDENTIFIER};
use crate::resume::ResumeParams;
use crate::{info, warn};

#[derive(Error, Debug)]
pub enum BootloaderError {
    #[error("Could not read {0}: {1}")]
    Read(String, io::Error),
    #[error("Could not write {0}: {1}")]
    Write(String, HelperError),
    #[error("Could not determine where the Grub configuration file is")]
    NoGrubDefaults,
}

pub type Result<T> = std::result::Result<T, BootloaderError>;

/// Boot configuration tools present on this system, resolved to their paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolset {
    pub update_initramfs: Option<PathBuf>,
    pub grubby: Option<PathBuf>,
    pub update_grub2: Option<PathBuf>,
    pub grub2_mkconfig: Option<PathBuf>,
}

impl Toolset {
    pub fn detect() -> Self {
        Self {
            update_initramfs: find_executable("update-initramfs"),
            grubby: find_executable("grubby"),
            update_grub2: find_executable("update-grub2"),
            grub2_mkconfig: find_executable("grub2-mkconfig"),
        }
    }

    pub fn can_patch_cmdline(&self) -> bool {
        self.grubby.is_some() || self.can_regenerate_grub()
    }

    fn can_regenerate_grub(&self) -> bool {
        self.update_grub2.is_some() || self.grub2_mkconfig.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    Incomplete(String),
}

/// Drop every managed block (start marker through end marker, inclusive).
pub fn strip_managed_block(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_block = false;

    for line in content.split_inclusive('\n') {
        if in_block {
            if line.contains(MANAGED_BLOCK_END) {
                in_block = false;
            }
            continue;
        }
        if line.contains(MANAGED_BLOCK_START) {
            in_block = true;
            continue;
        }
        out.push_str(line);
    }

    out
}

/// Replace the managed block in a GRUB defaults file with one that extends
/// `GRUB_CMDLINE_LINUX_DEFAULT` with `params`.
pub fn rewrite_grub_defaults(content: &str, params: &ResumeParams) -> String {
    let mut out = strip_managed_block(content);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(MANAGED_BLOCK_START);
    out.push('\n');
    out.push_str(&format!(
        "GRUB_CMDLINE_LINUX_DEFAULT=\"$GRUB_CMDLINE_LINUX_DEFAULT {}\"\n",
        params
    ));
    out.push_str(MANAGED_BLOCK_END);
    out.push('\n');
    out
}

pub fn initramfs_fragment(uuid: &str) -> String {
    format!(
        "# Updated automatically by {}. Do not modify.\nRESUME=UUID={}\n",
        IDENTIFIER, uuid
    )
}

fn is_directory_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}

/// GRUB defaults file to carry the managed block.
///
/// Distribution drop-ins in grub.d are sourced after the main file and may
/// override `GRUB_CMDLINE_LINUX_DEFAULT`, so when that directory is in use
/// our own late-sorting drop-in is used instead.
pub fn grub_defaults_path(paths: &Paths) -> Result<PathBuf> {
    if !is_directory_empty(&paths.grub_dropin_dir) {
        Ok(paths.grub_dropin_dir.join(GRUB_DROPIN_NAME))
    } else if paths.grub_default.exists() {
        Ok(paths.grub_default.clone())
    } else {
        Err(BootloaderError::NoGrubDefaults)
    }
}

/// Generated grub.cfg to regenerate with grub2-mkconfig.
pub fn grub_cfg_path(paths: &Paths) -> Option<PathBuf> {
    paths.grub_cfg_candidates.iter().find(|p| p.exists()).cloned()
}

pub struct Bootloader<'a> {
    paths: &'a Paths,
    tools: Toolset,
    log: Logger,
}

impl<'a> Bootloader<'a> {
    pub fn new(paths: &'a Paths, tools: Toolset, log: Logger) -> Self {
        Self { paths, tools, log }
    }

    /// Make the next boot carry `params`.
    ///
    /// A tool that fails counts as missing and the next mechanism is tried;
    /// the outcome is incomplete only when none of them worked.
    pub fn patch(&self, params: &ResumeParams) -> Result<PatchOutcome> {
        if !self.tools.can_patch_cmdline() {
            return Ok(self.incomplete(
                "Could not determine how system was booted to update kernel parameters for next boot. \
                 System won't be able to resume until you fix this.",
            ));
        }

        info!(
            self.log,
            "Kernel command line is missing parameters to resume from hibernation. Trying to patch boot configuration."
        );

        if let Some(tool) = &self.tools.update_initramfs {
            self.update_initramfs(tool, params)?;
        }

        if let Some(grubby) = &self.tools.grubby {
            info!(self.log, "Using grubby to patch GRUB configuration");
            let args = params.to_string();
            if try_spawn_and_wait(grubby, &["--update-kernel=ALL", "--args", args.as_str()], self.log) {
                return Ok(PatchOutcome::Patched);
            }
            if !self.tools.can_regenerate_grub() {
                return Ok(self.incomplete("grubby failed and no other way to update GRUB configuration was found."));
            }
            warn!(self.log, "grubby failed; falling back to editing the GRUB defaults file");
        }

        self.patch_grub_defaults(params)
    }

    fn incomplete(&self, reason: &str) -> PatchOutcome {
        warn!(self.log, "{}", reason);
        PatchOutcome::Incomplete(reason.to_string())
    }

    /// Write the initramfs resume fragment and regenerate. Only a failure to
    /// write the fragment is an error.
    fn update_initramfs(&self, tool: &Path, params: &ResumeParams) -> Result<()> {
        info!(self.log, "Updating initramfs to include resume stuff");
        let conf = &self.paths.initramfs_resume_conf;
        if let Some(dir) = conf.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| BootloaderError::Write(conf.display().to_string(), e.into()))?;
        }
        replace_file(conf, &initramfs_fragment(&params.uuid), 0o644)
            .map_err(|e| BootloaderError::Write(conf.display().to_string(), e))?;
        if !try_spawn_and_wait(tool, &["-u"], self.log) {
            warn!(self.log, "Could not regenerate initramfs; continuing with boot loader configuration");
        }
        Ok(())
    }

    /// Rewrite the GRUB defaults file, then regenerate grub.cfg.
    fn patch_grub_defaults(&self, params: &ResumeParams) -> Result<PatchOutcome> {
        let defaults_path = grub_defaults_path(self.paths)?;
        let name = defaults_path.display().to_string();

        let old = match fs::read_to_string(&defaults_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(BootloaderError::Read(name, e)),
        };
        let new = rewrite_grub_defaults(&old, params);
        if replace_file(&defaults_path, &new, 0o644).map_err(|e| BootloaderError::Write(name.clone(), e))? {
            info!(self.log, "Updated resume parameters in {}", name);
        }

        if let Some(update_grub2) = &self.tools.update_grub2 {
            info!(self.log, "Using update-grub2 to patch GRUB configuration in {}", name);
            if try_spawn_and_wait(update_grub2, &[] as &[&str], self.log) {
                return Ok(PatchOutcome::Patched);
            }
        }

        if let Some(mkconfig) = &self.tools.grub2_mkconfig {
            let Some(cfg) = grub_cfg_path(self.paths) else {
                return Ok(self.incomplete("Could not find GRUB configuration file. Is /boot mounted?"));
            };
            info!(self.log, "Using grub2-mkconfig to patch GRUB configuration in {}", cfg.display());
            if try_spawn_and_wait(mkconfig, &[OsStr::new("-o"), cfg.as_os_str()], self.log) {
                return Ok(PatchOutcome::Patched);
            }
        }

        Ok(self.incomplete(&format!(
            "Updated {} but could not regenerate GRUB configuration. System won't be able to resume until you fix this.",
            name
        )))
    }
}
