// udev rule turning Hyper-V hibernate requests into systemd hibernation
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::capability::is_hyperv;
use crate::config::Paths;
use crate::defaults::UDEV_RULE_NAME;
use crate::helpers::{find_executable_in, is_exec_in_path, replace_file, try_spawn_and_wait};
use crate::log::Logger;
use crate::{defaults, info, warn};

pub fn rule_text(systemctl: &Path) -> String {
    format!(
        "SUBSYSTEM==\"vmbus\", ACTION==\"change\", DRIVER==\"hv_utils\", ENV{{EVENT}}==\"hibernate\", RUN+=\"{} hibernate\"\n",
        systemctl.display()
    )
}

/// First existing rules directory, in order of preference.
pub fn rule_path(paths: &Paths) -> Option<PathBuf> {
    paths
        .udev_rule_dirs
        .iter()
        .find(|dir| dir.is_dir())
        .map(|dir| dir.join(UDEV_RULE_NAME))
}

/// Install the rule if this is a systemd-managed Hyper-V guest.
/// Everything here is best-effort.
pub fn ensure_rule_installed(paths: &Paths, log: Logger) {
    // udev runs RUN+= programs with a minimal environment, so the rule needs
    // an absolute path resolved from the standard directories.
    let Some(systemctl) = find_executable_in("systemctl", OsStr::new(defaults::DEFAULT_PATH)) else {
        info!(log, "systemctl not found or not executable, udev rule won't work");
        return;
    };
    if !is_exec_in_path("udevadm") {
        info!(log, "udevadm has not been found in $PATH; maybe system doesn't use systemd?");
        return;
    }
    if !is_hyperv(paths) {
        info!(log, "VM isn't running on Hyper-V, so udev rule is not necessary.");
        return;
    }
    let Some(rule) = rule_path(paths) else {
        warn!(log, "Couldn't find where udev stores the rules. VM may not hibernate.");
        return;
    };

    if let Err(e) = replace_file(&rule, &rule_text(&systemctl), 0o644) {
        warn!(log, "Could not write {}: {}", rule.display(), e);
        return;
    }
    info!(log, "udev rule to hibernate with systemd set up in {}. Telling udev about it.", rule.display());

    try_spawn_and_wait("udevadm", &["control", "--reload-rules"], log);
    try_spawn_and_wait("udevadm", &["trigger"], log);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_rule_text() {
        assert_eq!(
            rule_text(Path::new("/usr/bin/systemctl")),
            "SUBSYSTEM==\"vmbus\", ACTION==\"change\", DRIVER==\"hv_utils\", ENV{EVENT}==\"hibernate\", RUN+=\"/usr/bin/systemctl hibernate\"\n"
        );
    }

    #[test]
    fn test_rule_path_preference() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::system().rebased(dir.path());
        assert_eq!(rule_path(&paths), None);

        fs::create_dir_all(&paths.udev_rule_dirs[2]).unwrap();
        assert_eq!(rule_path(&paths), Some(paths.udev_rule_dirs[2].join(UDEV_RULE_NAME)));

        fs::create_dir_all(&paths.udev_rule_dirs[1]).unwrap();
        assert_eq!(rule_path(&paths), Some(paths.udev_rule_dirs[1].join(UDEV_RULE_NAME)));
    }

    #[test]
    fn test_not_hyperv_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::system().rebased(dir.path());
        fs::create_dir_all(&paths.udev_rule_dirs[0]).unwrap();

        ensure_rule_installed(&paths, Logger::console());
        assert!(!paths.udev_rule_dirs[0].join(UDEV_RULE_NAME).exists());
    }
}
