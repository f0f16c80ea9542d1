// Swap capacity policy for hibernation
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

pub const MB: u64 = 1 << 20;
pub const GB: u64 = 1 << 30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SizingError {
    #[error("Hibernation not recommended for a machine with more than 256GB of RAM ({} MB found)", .0 / MB)]
    TooMuchMemory(u64),
}

/// Swap capacity needed to hibernate a machine with `phys_mem` bytes of RAM.
///
/// Follows the Fedora recommendation up to 64 GiB and extends it with a
/// 1.25x tier up to 256 GiB.
pub fn needed_swap_size(phys_mem: u64) -> Result<u64, SizingError> {
    if phys_mem <= 2 * GB {
        Ok(3 * phys_mem)
    } else if phys_mem <= 8 * GB {
        Ok(2 * phys_mem)
    } else if phys_mem <= 64 * GB {
        Ok(3 * phys_mem / 2)
    } else if phys_mem <= 256 * GB {
        Ok(5 * phys_mem / 4)
    } else {
        Err(SizingError::TooMuchMemory(phys_mem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers() {
        assert_eq!(needed_swap_size(GB).unwrap(), 3 * GB);
        assert_eq!(needed_swap_size(4 * GB).unwrap(), 8 * GB);
        assert_eq!(needed_swap_size(16 * GB).unwrap(), 24 * GB);
        assert_eq!(needed_swap_size(128 * GB).unwrap(), 160 * GB);
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(needed_swap_size(2 * GB).unwrap(), 6 * GB);
        assert_eq!(needed_swap_size(2 * GB + 1).unwrap(), 2 * (2 * GB + 1));
        assert_eq!(needed_swap_size(8 * GB).unwrap(), 16 * GB);
        assert_eq!(needed_swap_size(8 * GB + 2).unwrap(), 3 * (8 * GB + 2) / 2);
        assert_eq!(needed_swap_size(64 * GB).unwrap(), 96 * GB);
        assert_eq!(needed_swap_size(256 * GB).unwrap(), 320 * GB);
    }

    #[test]
    fn test_monotonic_within_tiers() {
        let tiers = [(1, 2 * GB), (2 * GB + 1, 8 * GB), (8 * GB + 1, 64 * GB), (64 * GB + 1, 256 * GB)];
        for (low, high) in tiers {
            let step = (high - low) / 64;
            let mut prev = needed_swap_size(low).unwrap();
            let mut ram = low;
            while ram <= high {
                let size = needed_swap_size(ram).unwrap();
                assert!(size >= prev, "sizing decreased at {}", ram);
                prev = size;
                ram += step.max(1);
            }
        }
    }

    #[test]
    fn test_too_much_memory() {
        assert_eq!(
            needed_swap_size(300 * GB),
            Err(SizingError::TooMuchMemory(300 * GB))
        );
        assert!(needed_swap_size(256 * GB + 1).is_err());
    }
}
