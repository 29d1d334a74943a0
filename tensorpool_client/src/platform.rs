//! Platform services: file-backed mappings, the monotonic clock and process ids.

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::{
    attach_region_mmap, attach_region_mmap_readonly, create_region_mmap, current_pid, monotonic_ns,
};
