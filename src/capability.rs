// Hibernation capability detection
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::Paths;
use crate::helpers::read_first_line;
use crate::info;
use crate::log::Logger;

pub fn is_hyperv(paths: &Paths) -> bool {
    paths.sys_vmbus.exists()
}

/// Whether this VM can and is allowed to hibernate.
pub fn hibernation_enabled(paths: &Paths, log: Logger) -> bool {
    if !paths.snapshot_dev.exists() {
        info!(log, "Kernel does not support hibernation or {} has not been found.", paths.snapshot_dev.display());
        return false;
    }

    let Some(modes) = read_first_line(&paths.sys_power_disk) else {
        info!(
            log,
            "Kernel does not support hibernation ({} does not exist or can't be read).",
            paths.sys_power_disk.display()
        );
        return false;
    };

    if modes.contains("platform") {
        info!(log, "VM supports hibernation with platform-supported events.");
        return true;
    }
    if modes.contains("shutdown") {
        info!(log, "VM supports hibernation only with the shutdown method. This is not ideal.");
    } else if modes.contains("suspend") {
        info!(log, "VM supports hibernation only with the suspend method. This is not ideal.");
    } else {
        info!(log, "Unknown VM hibernation support mode found: {}", modes);
    }

    if is_hyperv(paths) {
        info!(log, "This is a Hyper-V VM, checking if hibernation is enabled through VMBus events.");
        // Only a present file can switch hibernation on.
        if let Some(state) = read_first_line(&paths.sys_vmbus_hibernation) {
            if state == "1" {
                info!(log, "Hibernation is enabled according to VMBus. This is ideal.");
                return true;
            }
            info!(log, "Hibernation is disabled according to VMBus.");
        }
    }

    info!(log, "Even though VM is capable of hibernation, it seems to be disabled.");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn setup(power_disk: Option<&str>) -> (tempfile::TempDir, Paths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::system().rebased(dir.path());
        fs::create_dir_all(paths.snapshot_dev.parent().unwrap()).unwrap();
        fs::write(&paths.snapshot_dev, "").unwrap();
        if let Some(content) = power_disk {
            fs::create_dir_all(paths.sys_power_disk.parent().unwrap()).unwrap();
            fs::write(&paths.sys_power_disk, content).unwrap();
        }
        (dir, paths)
    }

    #[test]
    fn test_platform_mode_enables() {
        let (_dir, paths) = setup(Some("[platform] shutdown reboot suspend test_resume\n"));
        assert!(hibernation_enabled(&paths, Logger::console()));
    }

    #[test]
    fn test_missing_snapshot_device() {
        let (_dir, paths) = setup(Some("[platform] shutdown\n"));
        fs::remove_file(&paths.snapshot_dev).unwrap();
        assert!(!hibernation_enabled(&paths, Logger::console()));
    }

    #[test]
    fn test_missing_power_disk() {
        let (_dir, paths) = setup(None);
        assert!(!hibernation_enabled(&paths, Logger::console()));
    }

    #[test]
    fn test_hyperv_vmbus_switch() {
        let (_dir, paths) = setup(Some("[shutdown] reboot suspend\n"));
        let log = Logger::console();
        assert!(!hibernation_enabled(&paths, log));

        fs::create_dir_all(&paths.sys_vmbus).unwrap();
        assert!(!hibernation_enabled(&paths, log));

        fs::write(&paths.sys_vmbus_hibernation, "0\n").unwrap();
        assert!(!hibernation_enabled(&paths, log));

        fs::write(&paths.sys_vmbus_hibernation, "1\n").unwrap();
        assert!(hibernation_enabled(&paths, log));
    }
}
