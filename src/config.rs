// Configuration parsing for az-hibernate-agent
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;
use thiserror::Error;

use crate::defaults;
use crate::log::Logger;
use crate::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error for {0}: {1}")]
    ParseError(String, String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration holder
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Load configuration from the main file (or `main_override`) and its drop-ins.
    /// Missing files are not an error; every key has a default.
    pub fn load(main_override: Option<&Path>, log: Logger) -> Result<Self> {
        let mut values = HashMap::new();

        let main = main_override.unwrap_or(Path::new(defaults::CONFIG_FILE));
        if main.exists() {
            match Self::parse_config(main) {
                Ok(cfg) => values.extend(cfg),
                Err(e) => warn!(log, "Could not load {}: {}", main.display(), e),
            }
        } else if main_override.is_some() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", main.display()),
            )));
        }

        // Fragments are applied in basename order so "99-foo.conf" wins.
        let dropins = dropin_dir(main);
        let pattern = format!("{}/*.conf", glob::Pattern::escape(&dropins.to_string_lossy()));
        let mut fragments: Vec<PathBuf> = glob(&pattern)
            .map(|entries| entries.flatten().filter(|p| p.is_file()).collect())
            .unwrap_or_default();
        fragments.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        for path in fragments {
            info!(log, "Load: {}", path.display());
            match Self::parse_config(&path) {
                Ok(cfg) => values.extend(cfg),
                Err(e) => warn!(log, "Could not load {}: {}", path.display(), e),
            }
        }

        debug!(log, "Configuration: {:?}", values);
        Ok(Self { values })
    }

    /// Build a configuration directly from key/value pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Parse a single config file
    fn parse_config<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_str(&content))
    }

    fn parse_str(content: &str) -> HashMap<String, String> {
        let mut config = HashMap::new();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.starts_with('#') || !line.contains('=') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"');
                config.insert(key.trim().to_string(), value.to_string());
            }
        }

        config
    }

    /// Get optional value
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Get boolean value, falling back to `default` when the key is absent.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.get_opt(key) {
            None => Ok(default),
            Some(v) => match v.to_lowercase().as_str() {
                "yes" | "y" | "1" | "true" => Ok(true),
                "no" | "n" | "0" | "false" => Ok(false),
                other => Err(ConfigError::ParseError(key.to_string(), other.to_string())),
            },
        }
    }
}

/// Drop-in directory belonging to a main config file: `<main>.d`.
pub fn dropin_dir(main: &Path) -> PathBuf {
    let mut dir = main.as_os_str().to_owned();
    dir.push(".d");
    PathBuf::from(dir)
}

/// Every file and directory the agent reads or rewrites.
///
/// `Paths::system()` points at the live system; `rebased` moves everything
/// under another root so the file-rewriting logic can run against a scratch
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub swapfile: PathBuf,
    pub proc_swaps: PathBuf,
    pub proc_meminfo: PathBuf,
    pub proc_cmdline: PathBuf,
    pub proc_mounts: PathBuf,
    pub snapshot_dev: PathBuf,
    pub disk_by_uuid: PathBuf,
    pub sys_power_disk: PathBuf,
    pub sys_vmbus: PathBuf,
    pub sys_vmbus_hibernation: PathBuf,
    pub fstab: PathBuf,
    pub grub_default: PathBuf,
    pub grub_dropin_dir: PathBuf,
    pub grub_cfg_candidates: Vec<PathBuf>,
    pub initramfs_resume_conf: PathBuf,
    pub udev_rule_dirs: Vec<PathBuf>,
}

impl Paths {
    pub fn system() -> Self {
        Self {
            swapfile: PathBuf::from(defaults::SWAPFILE_PATH),
            proc_swaps: PathBuf::from(defaults::PROC_SWAPS),
            proc_meminfo: PathBuf::from(defaults::PROC_MEMINFO),
            proc_cmdline: PathBuf::from(defaults::PROC_CMDLINE),
            proc_mounts: PathBuf::from(defaults::PROC_MOUNTS),
            snapshot_dev: PathBuf::from(defaults::SNAPSHOT_DEV),
            disk_by_uuid: PathBuf::from(defaults::DISK_BY_UUID),
            sys_power_disk: PathBuf::from(defaults::SYS_POWER_DISK),
            sys_vmbus: PathBuf::from(defaults::SYS_VMBUS),
            sys_vmbus_hibernation: PathBuf::from(defaults::SYS_VMBUS_HIBERNATION),
            fstab: PathBuf::from(defaults::FSTAB),
            grub_default: PathBuf::from(defaults::GRUB_DEFAULT),
            grub_dropin_dir: PathBuf::from(defaults::GRUB_DROPIN_DIR),
            grub_cfg_candidates: defaults::GRUB_CFG_CANDIDATES.iter().map(PathBuf::from).collect(),
            initramfs_resume_conf: PathBuf::from(defaults::INITRAMFS_RESUME_CONF),
            udev_rule_dirs: defaults::UDEV_RULE_DIRS.iter().map(PathBuf::from).collect(),
        }
    }

    /// System paths with the swap file location taken from the configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut paths = Self::system();
        if let Some(p) = config.get_opt("swapfile_path") {
            paths.swapfile = PathBuf::from(p.trim_end_matches('/'));
        }
        paths
    }

    /// Same layout, relocated under `root`.
    pub fn rebased(&self, root: &Path) -> Self {
        let r = |p: &PathBuf| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            swapfile: r(&self.swapfile),
            proc_swaps: r(&self.proc_swaps),
            proc_meminfo: r(&self.proc_meminfo),
            proc_cmdline: r(&self.proc_cmdline),
            proc_mounts: r(&self.proc_mounts),
            snapshot_dev: r(&self.snapshot_dev),
            disk_by_uuid: r(&self.disk_by_uuid),
            sys_power_disk: r(&self.sys_power_disk),
            sys_vmbus: r(&self.sys_vmbus),
            sys_vmbus_hibernation: r(&self.sys_vmbus_hibernation),
            fstab: r(&self.fstab),
            grub_default: r(&self.grub_default),
            grub_dropin_dir: r(&self.grub_dropin_dir),
            grub_cfg_candidates: self.grub_cfg_candidates.iter().map(r).collect(),
            initramfs_resume_conf: r(&self.initramfs_resume_conf),
            udev_rule_dirs: self.udev_rule_dirs.iter().map(r).collect(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::system()
    }
}
