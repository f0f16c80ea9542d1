// Centralised default values and well-known locations.
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Every option is read via `config.get_bool_or("key", DEFAULT)` or similar.
// Keeping the defaults here prevents drift between the CLI, the config file
// and the code paths that consume them.

// ── Configuration files ──────────────────────────────────────────────────────

pub const CONFIG_FILE: &str = "/etc/az-hibernate-agent.conf";

// ── Options ──────────────────────────────────────────────────────────────────

pub const SWAPFILE_PATH: &str = "/hibfile.sys";
pub const LOG_PREFIX: bool = false;
pub const LOG_JOURNAL: bool = false;
pub const DEFRAGMENT: bool = true;
pub const INSTALL_UDEV_RULE: bool = true;

// ── Kernel interfaces ────────────────────────────────────────────────────────

pub const PROC_SWAPS: &str = "/proc/swaps";
pub const PROC_MEMINFO: &str = "/proc/meminfo";
pub const PROC_CMDLINE: &str = "/proc/cmdline";
pub const PROC_MOUNTS: &str = "/proc/mounts";
pub const SNAPSHOT_DEV: &str = "/dev/snapshot";
pub const DISK_BY_UUID: &str = "/dev/disk/by-uuid";
pub const SYS_POWER_DISK: &str = "/sys/power/disk";
pub const SYS_VMBUS: &str = "/sys/bus/vmbus";
pub const SYS_VMBUS_HIBERNATION: &str = "/sys/bus/vmbus/hibernation";

// ── Boot configuration ───────────────────────────────────────────────────────

pub const FSTAB: &str = "/etc/fstab";
pub const GRUB_DEFAULT: &str = "/etc/default/grub";
pub const GRUB_DROPIN_DIR: &str = "/etc/default/grub.d";
pub const GRUB_DROPIN_NAME: &str = "99-hibernate-settings.cfg";
pub const GRUB_CFG_CANDIDATES: &[&str] = &["/boot/grub2/grub.cfg", "/boot/grub/grub.cfg"];
pub const INITRAMFS_RESUME_CONF: &str = "/etc/initramfs-tools/conf.d/resume";

pub const MANAGED_BLOCK_START: &str = "# az-hibernate-agent:start";
pub const MANAGED_BLOCK_END: &str = "# az-hibernate-agent:end";

// ── udev ─────────────────────────────────────────────────────────────────────

pub const UDEV_RULE_DIRS: &[&str] = &["/usr/lib/udev/rules.d", "/etc/udev/rules.d", "/lib/udev/rules.d"];
pub const UDEV_RULE_NAME: &str = "99-vm-hibernation.rules";

// ── Process execution ────────────────────────────────────────────────────────

pub const DEFAULT_PATH: &str = "/bin:/sbin:/usr/bin:/usr/sbin";
