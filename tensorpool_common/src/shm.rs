//! Shared memory layouts.
//!
//! This module contains:
//! - `superblock`: the 64-byte block identifying every mapped region.
//! - `slot`: header-ring slot layout, tensor header and seqlock encoding.
//! - `uri`: the `shm:file?path=...` grammar naming a region's backing file.

pub mod slot;
pub mod superblock;
pub mod uri;

use thiserror::Error;

/// Errors decoding fixed shared-memory layouts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Input shorter than the fixed layout.
    #[error("Truncated layout: need {needed} bytes, got {actual}")]
    Truncated {
        /// Required length in bytes.
        needed: usize,
        /// Available length in bytes.
        actual: usize,
    },

    /// Tensor rank above the supported maximum.
    #[error("Tensor rank {ndims} exceeds maximum {max}")]
    TooManyDims {
        /// Declared rank.
        ndims: u8,
        /// Supported maximum.
        max: usize,
    },

    /// Unknown element type discriminant.
    #[error("Unknown dtype: {0}")]
    UnknownDtype(u16),

    /// Unknown major-order discriminant.
    #[error("Unknown major order: {0}")]
    UnknownMajorOrder(u16),

    /// Negative dimension in a tensor shape.
    #[error("Negative dimension {value} at index {index}")]
    NegativeDim {
        /// Axis index.
        index: usize,
        /// Offending value.
        value: i32,
    },
}

/// Little-endian accessors over fixed offsets. Callers guarantee bounds.
pub(crate) mod le {
    #[inline]
    pub fn put_u16(buf: &mut [u8], off: usize, v: u16) {
        buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_u32(buf: &mut [u8], off: usize, v: u32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_i32(buf: &mut [u8], off: usize, v: i32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_u64(buf: &mut [u8], off: usize, v: u64) {
        buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn get_u16(buf: &[u8], off: usize) -> u16 {
        let mut b = [0u8; 2];
        b.copy_from_slice(&buf[off..off + 2]);
        u16::from_le_bytes(b)
    }

    #[inline]
    pub fn get_u32(buf: &[u8], off: usize) -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&buf[off..off + 4]);
        u32::from_le_bytes(b)
    }

    #[inline]
    pub fn get_i32(buf: &[u8], off: usize) -> i32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&buf[off..off + 4]);
        i32::from_le_bytes(b)
    }

    #[inline]
    pub fn get_u64(buf: &[u8], off: usize) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&buf[off..off + 8]);
        u64::from_le_bytes(b)
    }
}
