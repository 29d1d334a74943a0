//! Mapped shared-memory regions and the superblock validator.
//!
//! Every region file starts with a 64-byte superblock followed by `nslots`
//! slots of `stride_bytes` each. Attaching validates the superblock against
//! what the control plane promised before any slot is touched; afterwards
//! slots are addressed only through bounds-checked ranges.

use crate::error::{TpError, TpResult};
use crate::platform::{
    attach_region_mmap, attach_region_mmap_readonly, create_region_mmap, current_pid, monotonic_ns,
};
use memmap2::{Mmap, MmapMut};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use tp::consts::{CACHE_LINE_SIZE, HEADER_SLOT_BYTES, SUPERBLOCK_SIZE};
use tp::control::{AttachResponse, PoolDescriptor};
use tp::shm::superblock::{ACTIVITY_TS_OFFSET, RegionType, Superblock};
use tp::shm::uri::ShmUri;
use tracing::debug;

/// What the control plane declared about a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionExpectations {
    /// Layout version.
    pub layout_version: u32,
    /// Producer epoch.
    pub epoch: u64,
    /// Owning stream.
    pub stream_id: u32,
    /// Header ring or payload pool.
    pub region_type: RegionType,
    /// Slot count.
    pub nslots: u32,
    /// Slot size (header rings).
    pub slot_bytes: u32,
    /// Distance between slots.
    pub stride_bytes: u32,
    /// Pool id (payload pools).
    pub pool_id: u16,
}

impl RegionExpectations {
    /// Expectations for a header ring.
    pub fn header_ring(
        layout_version: u32,
        epoch: u64,
        stream_id: u32,
        nslots: u32,
        slot_bytes: u32,
    ) -> Self {
        Self {
            layout_version,
            epoch,
            stream_id,
            region_type: RegionType::HeaderRing,
            nslots,
            slot_bytes,
            stride_bytes: slot_bytes,
            pool_id: 0,
        }
    }

    /// Expectations for a payload pool.
    pub fn payload_pool(
        layout_version: u32,
        epoch: u64,
        stream_id: u32,
        pool_id: u16,
        nslots: u32,
        stride_bytes: u32,
    ) -> Self {
        Self {
            layout_version,
            epoch,
            stream_id,
            region_type: RegionType::PayloadPool,
            nslots,
            slot_bytes: stride_bytes,
            stride_bytes,
            pool_id,
        }
    }
}

/// Check a decoded superblock against expectations.
///
/// # Errors
/// `Protocol` naming the first mismatched field.
pub fn validate_superblock(sb: &Superblock, exp: &RegionExpectations) -> TpResult<()> {
    if !sb.is_magic_valid() {
        return Err(TpError::protocol("superblock magic mismatch"));
    }
    if sb.nslots == 0 {
        return Err(TpError::protocol("superblock declares zero slots"));
    }
    if sb.layout_version != exp.layout_version {
        return Err(TpError::protocol(format!(
            "layout_version {} != expected {}",
            sb.layout_version, exp.layout_version
        )));
    }
    if sb.epoch != exp.epoch {
        return Err(TpError::protocol(format!(
            "epoch {} != expected {}",
            sb.epoch, exp.epoch
        )));
    }
    if sb.stream_id != exp.stream_id {
        return Err(TpError::protocol(format!(
            "stream_id {} != expected {}",
            sb.stream_id, exp.stream_id
        )));
    }
    if sb.region_type != exp.region_type as u16 {
        return Err(TpError::protocol(format!(
            "region_type {} != expected {:?}",
            sb.region_type, exp.region_type
        )));
    }
    if sb.nslots != exp.nslots {
        return Err(TpError::protocol(format!(
            "nslots {} != expected {}",
            sb.nslots, exp.nslots
        )));
    }
    match exp.region_type {
        RegionType::HeaderRing => {
            if sb.slot_bytes != exp.slot_bytes || sb.stride_bytes != exp.slot_bytes {
                return Err(TpError::protocol(format!(
                    "slot_bytes {} != expected {}",
                    sb.slot_bytes, exp.slot_bytes
                )));
            }
        }
        RegionType::PayloadPool => {
            if sb.stride_bytes != exp.stride_bytes {
                return Err(TpError::protocol(format!(
                    "stride_bytes {} != expected {}",
                    sb.stride_bytes, exp.stride_bytes
                )));
            }
            if sb.pool_id != exp.pool_id {
                return Err(TpError::protocol(format!(
                    "pool_id {} != expected {}",
                    sb.pool_id, exp.pool_id
                )));
            }
        }
    }
    Ok(())
}

/// Strides must be a non-zero multiple of the cache line.
pub fn validate_stride(stride_bytes: u32) -> TpResult<()> {
    if stride_bytes == 0 || stride_bytes as usize % CACHE_LINE_SIZE != 0 {
        return Err(TpError::arg(format!(
            "stride {stride_bytes} is not a non-zero multiple of {CACHE_LINE_SIZE}"
        )));
    }
    Ok(())
}

/// How a region is mapped. Only the stream's producer maps read/write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionAccess {
    /// Consumer side; the file needs read permission only.
    ReadOnly,
    /// Producer side.
    ReadWrite,
}

enum RegionMap {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl RegionMap {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::ReadOnly(m) => &m[..],
            Self::ReadWrite(m) => &m[..],
        }
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::ReadOnly(_) => None,
            Self::ReadWrite(m) => Some(&mut m[..]),
        }
    }
}

/// A mapped, validated region.
pub struct Region {
    map: RegionMap,
    uri: ShmUri,
    superblock: Superblock,
}

impl Region {
    /// Create a region file, write its superblock and zero its slots.
    ///
    /// `pid`, `start_ts` and `activity_ts` are filled in here.
    pub fn create(uri: &ShmUri, superblock: Superblock) -> TpResult<Self> {
        validate_stride(superblock.stride_bytes)?;
        if superblock.nslots == 0 {
            return Err(TpError::arg("region needs at least one slot"));
        }

        let len = superblock.region_len();
        let mut map = create_region_mmap(uri.path(), len, uri.is_hugepage_backed())?;

        let now = monotonic_ns();
        let superblock = Superblock {
            pid: current_pid() as u64,
            start_ts: now,
            activity_ts: now,
            ..superblock
        };
        map[..SUPERBLOCK_SIZE].copy_from_slice(&superblock.encode());

        debug!("Created region {} ({} bytes)", uri, len);
        Ok(Self {
            map: RegionMap::ReadWrite(map),
            uri: uri.clone(),
            superblock,
        })
    }

    /// Map an existing region and validate it.
    ///
    /// # Errors
    /// - `Arg` for an invalid expected stride
    /// - `Shm` if mapping fails or the file is shorter than its slots
    /// - `Protocol` for any superblock mismatch
    pub fn attach(uri: &ShmUri, exp: &RegionExpectations, access: RegionAccess) -> TpResult<Self> {
        validate_stride(exp.stride_bytes)?;

        let huge_pages = uri.is_hugepage_backed();
        let map = match access {
            RegionAccess::ReadOnly => {
                RegionMap::ReadOnly(attach_region_mmap_readonly(uri.path(), huge_pages)?)
            }
            RegionAccess::ReadWrite => {
                RegionMap::ReadWrite(attach_region_mmap(uri.path(), huge_pages)?)
            }
        };
        let bytes = map.bytes();
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(TpError::shm(format!(
                "{} shorter than its superblock",
                uri
            )));
        }
        let superblock = Superblock::decode(bytes)?;
        validate_superblock(&superblock, exp)?;
        if bytes.len() < superblock.region_len() {
            return Err(TpError::shm(format!(
                "{} maps {} bytes, slots need {}",
                uri,
                bytes.len(),
                superblock.region_len()
            )));
        }

        debug!(
            "Mapped region {} {:?} (epoch {}, {} slots)",
            uri, access, superblock.epoch, superblock.nslots
        );
        Ok(Self {
            map,
            uri: uri.clone(),
            superblock,
        })
    }

    /// Superblock as observed when the region was mapped.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Region URI.
    pub fn uri(&self) -> &ShmUri {
        &self.uri
    }

    /// Whether this mapping may be written.
    pub fn access(&self) -> RegionAccess {
        match self.map {
            RegionMap::ReadOnly(_) => RegionAccess::ReadOnly,
            RegionMap::ReadWrite(_) => RegionAccess::ReadWrite,
        }
    }

    /// Slot count.
    pub fn nslots(&self) -> u32 {
        self.superblock.nslots
    }

    /// Slot stride in bytes.
    pub fn stride(&self) -> usize {
        self.superblock.stride_bytes as usize
    }

    /// Byte range of slot `index`, or `None` if out of range.
    pub fn slot_range(&self, index: u32) -> Option<Range<usize>> {
        if index >= self.superblock.nslots {
            return None;
        }
        let start = SUPERBLOCK_SIZE + index as usize * self.stride();
        Some(start..start + self.stride())
    }

    /// Slot `index` bytes.
    pub fn slot(&self, index: u32) -> Option<&[u8]> {
        self.slot_range(index).map(|r| &self.map.bytes()[r])
    }

    /// Slot `index` bytes, mutable. `None` on a read-only mapping.
    pub fn slot_mut(&mut self, index: u32) -> Option<&mut [u8]> {
        let range = self.slot_range(index)?;
        self.map.bytes_mut().map(|bytes| &mut bytes[range])
    }

    /// Seqlock word at the start of slot `index`.
    ///
    /// On a read-only mapping the word may only be loaded.
    pub(crate) fn seq_word(&self, index: u32) -> Option<&AtomicU64> {
        let range = self.slot_range(index)?;
        // Slot starts are 64 + k * stride from a page-aligned base: 8-byte aligned.
        Some(unsafe { &*(self.map.bytes().as_ptr().add(range.start) as *const AtomicU64) })
    }

    /// Copy the first `dst.len()` bytes of slot `index` without assuming
    /// the writer is quiescent. Callers validate the copy with the seqlock.
    pub(crate) fn copy_slot_prefix(&self, index: u32, dst: &mut [u8]) -> bool {
        match self.slot_range(index) {
            Some(range) if dst.len() <= range.len() => {
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        self.map.bytes().as_ptr().add(range.start),
                        dst.as_mut_ptr(),
                        dst.len(),
                    );
                }
                true
            }
            _ => false,
        }
    }

    fn activity_word(&self) -> &AtomicU64 {
        unsafe { &*(self.map.bytes().as_ptr().add(ACTIVITY_TS_OFFSET) as *const AtomicU64) }
    }

    /// Last producer activity, monotonic nanoseconds.
    pub fn activity_ts(&self) -> u64 {
        self.activity_word().load(Ordering::Acquire)
    }

    /// Record producer activity. Ignored on a read-only mapping.
    pub fn touch_activity(&self, now_ns: u64) {
        if self.access() == RegionAccess::ReadWrite {
            self.activity_word().store(now_ns, Ordering::Release);
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        debug!("Unmapped region {}", self.uri);
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("uri", &self.uri.to_string())
            .field("access", &self.access())
            .field("len", &self.map.bytes().len())
            .field("superblock", &self.superblock)
            .finish()
    }
}

/// Header ring plus payload pools of one attached stream.
#[derive(Debug)]
pub struct StreamRegions {
    /// Header ring.
    pub header: Region,
    /// Payload pools, in the order the driver declared them.
    pub pools: Vec<Region>,
}

impl StreamRegions {
    /// Map and validate every region named by a validated attach response.
    pub fn map(resp: &AttachResponse, access: RegionAccess) -> TpResult<Self> {
        let header_uri = ShmUri::parse(&resp.header_region_uri)?;
        let header = Region::attach(
            &header_uri,
            &RegionExpectations::header_ring(
                resp.layout_version,
                resp.epoch,
                resp.stream_id,
                resp.header_nslots,
                HEADER_SLOT_BYTES,
            ),
            access,
        )?;

        let mut pools = Vec::with_capacity(resp.pools.len());
        for pool in &resp.pools {
            let uri = ShmUri::parse(&pool.region_uri)?;
            pools.push(Region::attach(
                &uri,
                &RegionExpectations::payload_pool(
                    resp.layout_version,
                    resp.epoch,
                    resp.stream_id,
                    pool.pool_id,
                    pool.nslots,
                    pool.stride_bytes,
                ),
                access,
            )?);
        }
        Ok(Self { header, pools })
    }

    /// Pool with `pool_id`.
    pub fn pool(&self, pool_id: u16) -> Option<&Region> {
        self.pools.iter().find(|p| p.superblock().pool_id == pool_id)
    }

    /// Pool with `pool_id`, mutable.
    pub fn pool_mut(&mut self, pool_id: u16) -> Option<&mut Region> {
        self.pools
            .iter_mut()
            .find(|p| p.superblock().pool_id == pool_id)
    }

    /// Pool descriptors as announced on the control plane.
    pub fn descriptors(&self) -> Vec<PoolDescriptor> {
        self.pools
            .iter()
            .map(|p| PoolDescriptor {
                pool_id: p.superblock().pool_id,
                nslots: p.nslots(),
                stride_bytes: p.superblock().stride_bytes,
                region_uri: p.uri().to_string(),
            })
            .collect()
    }
}
