// Physical block offset of a swap file's first page
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use libc::c_int;

use crate::debug;
use crate::log::Logger;

// FIBMAP and FIGETBSZ pass a plain int in both directions.
nix::ioctl_readwrite_bad!(fibmap, 1, c_int);
nix::ioctl_read_bad!(figetbsz, 2, c_int);

/// Logical to physical block translation for a file.
pub trait BlockMap {
    /// Filesystem block size in bytes.
    fn block_size(&self) -> io::Result<u64>;

    /// Physical block backing logical block `logical`; 0 denotes a hole.
    fn physical_block(&self, logical: u64) -> io::Result<u64>;
}

/// Block map backed by the FIGETBSZ/FIBMAP ioctls. Needs CAP_SYS_RAWIO.
pub struct FibmapFile<'a> {
    file: &'a File,
}

impl<'a> FibmapFile<'a> {
    pub fn new(file: &'a File) -> Self {
        Self { file }
    }
}

impl BlockMap for FibmapFile<'_> {
    fn block_size(&self) -> io::Result<u64> {
        let mut blksize: c_int = 0;
        // The fd is valid for the lifetime of `self.file`.
        unsafe { figetbsz(self.file.as_raw_fd(), &mut blksize) }.map_err(io::Error::from)?;
        if blksize <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("filesystem reported block size {}", blksize),
            ));
        }
        Ok(blksize as u64)
    }

    fn physical_block(&self, logical: u64) -> io::Result<u64> {
        let mut block = c_int::try_from(logical)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "logical block out of range"))?;
        unsafe { fibmap(self.file.as_raw_fd(), &mut block) }.map_err(io::Error::from)?;
        // FIBMAP reports block numbers as an unsigned 32-bit quantity.
        Ok(block as u32 as u64)
    }
}

/// Outcome of scanning the first page of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageScan {
    pub block_size: u64,
    pub contiguous_blocks: u64,
    /// First physical block, set only when the contiguous run covers a page
    pub offset: Option<u64>,
}

/// Find the physical block holding the first page of a file.
///
/// Walks the logical blocks making up one memory page and stops at the first
/// discontinuity or hole. The first block is returned only if the run covers
/// the whole page; a partial run yields `None`.
pub fn scan_first_page<M: BlockMap>(map: &M, page_size: u64) -> io::Result<PageScan> {
    let block_size = map.block_size()?;
    let blocks_per_page = (page_size / block_size).max(1);

    let mut first: Option<u64> = None;
    let mut last: Option<u64> = None;
    let mut contiguous_blocks = 0u64;

    for logical in 0..blocks_per_page {
        let physical = map.physical_block(logical)?;
        if physical == 0 {
            break;
        }
        if let Some(prev) = last {
            if prev.checked_add(1) != Some(physical) {
                break;
            }
        }
        first.get_or_insert(physical);
        last = Some(physical);
        contiguous_blocks += 1;
    }

    let offset = first.filter(|_| contiguous_blocks * block_size >= page_size);
    Ok(PageScan {
        block_size,
        contiguous_blocks,
        offset,
    })
}

/// Resolve the resume offset of `file`, in filesystem blocks.
pub fn resolve_offset(file: &File, page_size: u64, log: Logger) -> io::Result<Option<u64>> {
    let scan = scan_first_page(&FibmapFile::new(file), page_size)?;
    debug!(
        log,
        "First {} blocks of {} bytes are contiguous",
        scan.contiguous_blocks,
        scan.block_size
    );
    Ok(scan.offset)
}
