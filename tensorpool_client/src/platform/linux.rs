//! Linux-specific shared memory operations

use crate::error::{TpError, TpResult};
use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, clock_gettime};
use nix::unistd::getpid;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tp::consts::HUGE_PAGE_SIZE;
use tracing::{debug, error};

/// Create (or truncate) a region file of at least `len` bytes and map it.
///
/// Huge-page backed files are rounded up to a whole number of huge pages.
/// A fresh file reads as zeros.
pub fn create_region_mmap(path: &Path, len: usize, huge_pages: bool) -> TpResult<MmapMut> {
    let file_len = if huge_pages {
        len.div_ceil(HUGE_PAGE_SIZE) * HUGE_PAGE_SIZE
    } else {
        len
    };

    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)?;
    file.set_len(file_len as u64)?;

    let mut mmap = unsafe { MmapOptions::new().len(file_len).map_mut(&file)? };
    if huge_pages {
        enable_huge_pages(mmap.as_mut_ptr(), mmap.len());
    }
    Ok(mmap)
}

/// Map an existing region file read/write (producer side).
///
/// # Errors
/// `Shm` if the file cannot be opened or mapped, is empty, or is huge-page
/// backed with a size that is not a multiple of 2 MiB.
pub fn attach_region_mmap(path: &Path, huge_pages: bool) -> TpResult<MmapMut> {
    let file = open_region_file(path, true, huge_pages)?;
    let mut mmap = unsafe { MmapOptions::new().map_mut(&file) }
        .map_err(|e| TpError::shm(format!("mmap {}: {e}", path.display())))?;
    if huge_pages {
        enable_huge_pages(mmap.as_mut_ptr(), mmap.len());
    }
    Ok(mmap)
}

/// Map an existing region file read-only (consumer side).
///
/// Only read permission on the file is needed.
///
/// # Errors
/// Same as [`attach_region_mmap`].
pub fn attach_region_mmap_readonly(path: &Path, huge_pages: bool) -> TpResult<Mmap> {
    let file = open_region_file(path, false, huge_pages)?;
    let mmap = unsafe { MmapOptions::new().map(&file) }
        .map_err(|e| TpError::shm(format!("mmap {}: {e}", path.display())))?;
    if huge_pages {
        enable_huge_pages(mmap.as_ptr() as *mut u8, mmap.len());
    }
    Ok(mmap)
}

fn open_region_file(path: &Path, write: bool, huge_pages: bool) -> TpResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(write)
        .open(path)
        .map_err(|e| TpError::shm(format!("open {}: {e}", path.display())))?;

    let len = file.metadata()?.len() as usize;
    if len == 0 {
        return Err(TpError::shm(format!("{} is empty", path.display())));
    }
    if huge_pages && len % HUGE_PAGE_SIZE != 0 {
        return Err(TpError::shm(format!(
            "{} size {len} is not a multiple of the huge page size",
            path.display()
        )));
    }
    Ok(file)
}

/// `CLOCK_MONOTONIC` in nanoseconds.
pub fn monotonic_ns() -> u64 {
    nanos_or_zero(clock_gettime(ClockId::CLOCK_MONOTONIC))
}

fn nanos_or_zero(reading: nix::Result<TimeSpec>) -> u64 {
    match reading {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(e) => {
            error!("clock_gettime(CLOCK_MONOTONIC) failed, reporting 0: {e}");
            0
        }
    }
}

/// Get current process ID
pub fn current_pid() -> u32 {
    getpid().as_raw() as u32
}

// Advisory only: hugetlbfs mappings are huge-page backed regardless.
fn enable_huge_pages(addr: *mut u8, len: usize) {
    let result = unsafe { libc::madvise(addr as *mut libc::c_void, len, libc::MADV_HUGEPAGE) };
    if result != 0 {
        debug!(
            "madvise(MADV_HUGEPAGE) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}
