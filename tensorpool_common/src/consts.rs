//! System-wide constants for the tensorpool workspace.
//!
//! Single source of truth for layout sizes, protocol identifiers and
//! NULL sentinels. Imported by all crates — no duplication permitted.

/// Magic bytes at the start of every region superblock: `"TPOOLSB\0"`.
pub const SUPERBLOCK_MAGIC: [u8; 8] = *b"TPOOLSB\0";

/// Shared-memory layout version understood by this runtime.
pub const LAYOUT_VERSION: u32 = 1;

/// Superblock size in bytes (one cache line).
pub const SUPERBLOCK_SIZE: usize = 64;

/// Header-ring slot size in bytes.
pub const HEADER_SLOT_BYTES: u32 = 256;

/// Maximum tensor rank carried in a tensor header.
pub const MAX_DIMS: usize = 8;

/// CPU cache line size in bytes. Payload strides must be a multiple of it.
pub const CACHE_LINE_SIZE: usize = 64;

/// Huge page size assumed for hugetlbfs-backed regions (2 MiB).
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Control-plane schema identifier.
pub const SCHEMA_ID: u16 = 9_000;

/// Highest control-plane schema version this runtime decodes.
pub const SCHEMA_VERSION: u16 = 1;

/// NULL sentinel for `u8` wire fields.
pub const NULL_U8: u8 = u8::MAX;
/// NULL sentinel for `u16` wire fields.
pub const NULL_U16: u16 = u16::MAX;
/// NULL sentinel for `u32` wire fields.
pub const NULL_U32: u32 = u32::MAX;
/// NULL sentinel for `u64` wire fields.
pub const NULL_U64: u64 = u64::MAX;

/// Maximum tracked QoS entries per monitor.
pub const QOS_CAPACITY: usize = 64;

/// Maximum tracked streams in a metadata cache.
pub const METADATA_CAPACITY: usize = 32;

/// Maximum attributes held per data source.
pub const MAX_ATTRIBUTES: usize = 16;

/// Maximum entries retained from one discovery response.
pub const DISCOVERY_CAPACITY: usize = 32;
