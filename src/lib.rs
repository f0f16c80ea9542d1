// az-hibernate-agent - Swap file and resume setup for VM hibernation
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod log;

pub mod activate;
pub mod agent;
pub mod bootloader;
pub mod capability;
pub mod config;
pub mod defaults;
pub mod device;
pub mod helpers;
pub mod locator;
pub mod meminfo;
pub mod offset;
pub mod resume;
pub mod sizing;
pub mod snapshot;
pub mod swapfile;
pub mod udev;
