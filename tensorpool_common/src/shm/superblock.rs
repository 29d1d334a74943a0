//! Region superblock — the 64-byte block at offset 0 of every mapped region.
//!
//! Written once by the side that creates the region (driver or producer),
//! read-validated by every attacher before any slot is touched.
//!
//! ```text
//! Offset  Size  Field
//! 0       8     magic            "TPOOLSB\0"
//! 8       4     layout_version
//! 12      8     epoch
//! 20      4     stream_id
//! 24      2     region_type      1 = header ring, 2 = payload pool
//! 26      2     pool_id
//! 28      4     nslots
//! 32      4     slot_bytes
//! 36      4     stride_bytes
//! 40      8     pid
//! 48      8     start_ts
//! 56      8     activity_ts      refreshed atomically by the producer
//! ```
//!
//! All fields are little-endian. The block is decoded from bytes rather than
//! cast in place because `epoch` is not naturally aligned.

use super::le;
use crate::consts::{SUPERBLOCK_MAGIC, SUPERBLOCK_SIZE};
use crate::shm::LayoutError;
use static_assertions::const_assert_eq;

/// Byte offset of `activity_ts`; 8-byte aligned so it can be stored atomically.
pub const ACTIVITY_TS_OFFSET: usize = 56;

const_assert_eq!(ACTIVITY_TS_OFFSET % 8, 0);
const_assert_eq!(ACTIVITY_TS_OFFSET + 8, SUPERBLOCK_SIZE);

/// Kind of backing region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RegionType {
    /// Ring of fixed-size slot headers.
    HeaderRing = 1,
    /// Pool of fixed-stride payload slots.
    PayloadPool = 2,
}

impl RegionType {
    /// Convert from the raw wire value. Returns `None` for unknown values.
    #[inline]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::HeaderRing),
            2 => Some(Self::PayloadPool),
            _ => None,
        }
    }
}

/// Decoded region superblock.
///
/// `region_type` is kept raw so that a region of an unknown type still
/// decodes and is rejected by validation with a precise reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// Magic bytes: must be [`SUPERBLOCK_MAGIC`].
    pub magic: [u8; 8],
    /// Layout version of everything following the superblock.
    pub layout_version: u32,
    /// Producer generation that owns the region contents.
    pub epoch: u64,
    /// Stream the region belongs to.
    pub stream_id: u32,
    /// Raw [`RegionType`] discriminant.
    pub region_type: u16,
    /// Pool id (0 for header rings).
    pub pool_id: u16,
    /// Number of slots following the superblock.
    pub nslots: u32,
    /// Bytes per slot (header rings) or usable payload bytes (pools).
    pub slot_bytes: u32,
    /// Distance between consecutive slots in bytes.
    pub stride_bytes: u32,
    /// Process id of the creator.
    pub pid: u64,
    /// Creation timestamp, monotonic nanoseconds.
    pub start_ts: u64,
    /// Last producer activity, monotonic nanoseconds.
    pub activity_ts: u64,
}

impl Superblock {
    /// Build a superblock for a header ring.
    pub const fn header_ring(
        layout_version: u32,
        epoch: u64,
        stream_id: u32,
        nslots: u32,
        slot_bytes: u32,
    ) -> Self {
        Self {
            magic: SUPERBLOCK_MAGIC,
            layout_version,
            epoch,
            stream_id,
            region_type: RegionType::HeaderRing as u16,
            pool_id: 0,
            nslots,
            slot_bytes,
            stride_bytes: slot_bytes,
            pid: 0,
            start_ts: 0,
            activity_ts: 0,
        }
    }

    /// Build a superblock for a payload pool.
    pub const fn payload_pool(
        layout_version: u32,
        epoch: u64,
        stream_id: u32,
        pool_id: u16,
        nslots: u32,
        stride_bytes: u32,
    ) -> Self {
        Self {
            magic: SUPERBLOCK_MAGIC,
            layout_version,
            epoch,
            stream_id,
            region_type: RegionType::PayloadPool as u16,
            pool_id,
            nslots,
            slot_bytes: stride_bytes,
            stride_bytes,
            pid: 0,
            start_ts: 0,
            activity_ts: 0,
        }
    }

    /// Validate the magic bytes.
    #[inline]
    pub fn is_magic_valid(&self) -> bool {
        self.magic == SUPERBLOCK_MAGIC
    }

    /// Typed region kind, if the raw value is known.
    #[inline]
    pub const fn kind(&self) -> Option<RegionType> {
        RegionType::from_u16(self.region_type)
    }

    /// Bytes covered by the superblock plus all slots.
    pub fn region_len(&self) -> usize {
        SUPERBLOCK_SIZE + self.nslots as usize * self.stride_bytes as usize
    }

    /// Encode into the fixed 64-byte representation.
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        le::put_u32(&mut buf, 8, self.layout_version);
        le::put_u64(&mut buf, 12, self.epoch);
        le::put_u32(&mut buf, 20, self.stream_id);
        le::put_u16(&mut buf, 24, self.region_type);
        le::put_u16(&mut buf, 26, self.pool_id);
        le::put_u32(&mut buf, 28, self.nslots);
        le::put_u32(&mut buf, 32, self.slot_bytes);
        le::put_u32(&mut buf, 36, self.stride_bytes);
        le::put_u64(&mut buf, 40, self.pid);
        le::put_u64(&mut buf, 48, self.start_ts);
        le::put_u64(&mut buf, ACTIVITY_TS_OFFSET, self.activity_ts);
        buf
    }

    /// Decode from the first 64 bytes of `bytes`.
    ///
    /// # Errors
    /// `LayoutError::Truncated` if fewer than 64 bytes are available.
    pub fn decode(bytes: &[u8]) -> Result<Self, LayoutError> {
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(LayoutError::Truncated {
                needed: SUPERBLOCK_SIZE,
                actual: bytes.len(),
            });
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        Ok(Self {
            magic,
            layout_version: le::get_u32(bytes, 8),
            epoch: le::get_u64(bytes, 12),
            stream_id: le::get_u32(bytes, 20),
            region_type: le::get_u16(bytes, 24),
            pool_id: le::get_u16(bytes, 26),
            nslots: le::get_u32(bytes, 28),
            slot_bytes: le::get_u32(bytes, 32),
            stride_bytes: le::get_u32(bytes, 36),
            pid: le::get_u64(bytes, 40),
            start_ts: le::get_u64(bytes, 48),
            activity_ts: le::get_u64(bytes, ACTIVITY_TS_OFFSET),
        })
    }
}
