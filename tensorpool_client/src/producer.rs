//! Producer handle: claim a ring slot, fill its payload, commit it.
//!
//! The producer is the sole writer of its header ring and payload pools.
//! Frame `seq` lives in header slot `seq % nslots` and, for every pool, in
//! payload slot `seq % nslots` (pools share the ring's slot count). A frame
//! is published by the final release store of `seq_commit`; nothing a
//! consumer can observe changes between `begin_write` and that store other
//! than the slot being claimed.

use crate::driver::{AttachExpectations, AttachGrant, DriverClient, HandleState, Lease};
use crate::error::{TpError, TpResult};
use crate::platform::monotonic_ns;
use crate::region::{RegionAccess, StreamRegions};
use crate::seqlock::SlotSeqLock;
use crate::transport::{Channel, ControlTransport};
use bitflags::bitflags;
use heapless::Vec as FixedVec;
use std::sync::Arc;
use tp::config::ClientConfig;
use tp::consts::{HEADER_SLOT_BYTES, LAYOUT_VERSION, MAX_ATTRIBUTES, MAX_DIMS};
use tp::control::{
    Attribute, DataSourceMeta, FrameProgress, ProgressState, QosProducer, Role, ShmPoolAnnounce,
};
use tp::shm::slot::{SlotHeader, TensorHeader};
use tracing::{debug, info, warn};

bitflags! {
    /// Control-plane records waiting for the next `do_work`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dirty: u8 {
        /// Data-source metadata changed.
        const META = 0b01;
        /// Announce should go out before its interval elapses.
        const ANNOUNCE = 0b10;
    }
}

/// A claimed, not yet committed frame.
///
/// Only the most recent claim can be filled or committed; claiming again
/// without committing reuses the same sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClaim {
    /// Frame sequence number.
    pub seq: u64,
    /// Header ring slot.
    pub header_index: u32,
    /// Payload pool.
    pub pool_id: u16,
    /// Payload slot within the pool.
    pub payload_slot: u32,
    /// Usable payload bytes.
    pub capacity: usize,
}

/// Data-source description published on the metadata channel.
#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    /// Human-readable name.
    pub name: String,
    /// Free-form summary.
    pub summary: String,
    /// Bumped on every mutation.
    pub meta_version: u32,
    /// Typed attributes.
    pub attributes: FixedVec<Attribute, MAX_ATTRIBUTES>,
}

/// Producer side of one stream.
pub struct Producer {
    driver: DriverClient,
    lease: Lease,
    state: HandleState,
    regions: StreamRegions,
    next_seq: u64,
    metadata: SourceMetadata,
    dirty: Dirty,
    last_announce_ns: u64,
    last_qos_ns: u64,
}

impl Producer {
    /// Attach to `stream_id` as its producer and map the granted regions.
    pub fn attach(
        transport: Arc<dyn ControlTransport>,
        config: ClientConfig,
        stream_id: u32,
        exp: &AttachExpectations,
    ) -> TpResult<Self> {
        let mut driver = DriverClient::new(transport, config)?;
        let grant = driver.attach(stream_id, Role::Producer, exp)?;
        Self::from_grant(driver, grant)
    }

    /// Build a producer from an already granted lease.
    ///
    /// The lease is released again if any region fails to map.
    pub fn from_grant(mut driver: DriverClient, grant: AttachGrant) -> TpResult<Self> {
        if grant.lease.role != Role::Producer {
            return Err(TpError::arg("producer needs a producer lease"));
        }
        let regions = match StreamRegions::map(&grant.response, RegionAccess::ReadWrite) {
            Ok(regions) => regions,
            Err(e) => {
                warn!(
                    "Mapping stream {} failed, releasing lease {}: {}",
                    grant.lease.stream_id, grant.lease.lease_id, e
                );
                if let Err(detach_err) = driver.detach(&grant.lease) {
                    debug!("Detach after failed mapping: {}", detach_err);
                }
                return Err(e);
            }
        };

        // A new epoch starts from an empty ring.
        for index in 0..regions.header.nslots() {
            if let Some(word) = regions.header.seq_word(index) {
                SlotSeqLock::new(word).clear();
            }
        }

        Ok(Self {
            driver,
            lease: grant.lease,
            state: HandleState::Attached,
            regions,
            next_seq: 1,
            metadata: SourceMetadata::default(),
            dirty: Dirty::ANNOUNCE,
            last_announce_ns: 0,
            last_qos_ns: 0,
        })
    }

    /// Lease held by this producer.
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Current handle state.
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Producer epoch.
    pub fn epoch(&self) -> u64 {
        self.lease.epoch
    }

    /// Header ring slot count.
    pub fn nslots(&self) -> u32 {
        self.regions.header.nslots()
    }

    /// Sequence number the next claim will use.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Current metadata.
    pub fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    /// Records waiting to be flushed.
    pub fn dirty(&self) -> Dirty {
        self.dirty
    }

    fn ensure_attached(&mut self) -> TpResult<()> {
        if self.state == HandleState::Revoked {
            return Err(TpError::Revoked {
                lease_id: self.lease.lease_id,
            });
        }
        if let Err(e) = self.driver.check_lease(&self.lease) {
            warn!("Producer lease {} is no longer valid: {}", self.lease.lease_id, e);
            self.state = HandleState::Revoked;
            return Err(e);
        }
        Ok(())
    }

    /// Claim the next frame in pool `pool_id`.
    ///
    /// # Errors
    /// - `Protocol` if the lease was revoked
    /// - `Arg` for an unknown pool
    pub fn try_claim_slot(&mut self, pool_id: u16) -> TpResult<SlotClaim> {
        self.ensure_attached()?;
        let pool = self
            .regions
            .pool(pool_id)
            .ok_or_else(|| TpError::arg(format!("unknown pool {pool_id}")))?;
        let capacity = pool.stride();

        let seq = self.next_seq;
        let header_index = (seq % self.regions.header.nslots() as u64) as u32;
        let word = self
            .regions
            .header
            .seq_word(header_index)
            .ok_or_else(|| TpError::shm("header slot out of range"))?;
        SlotSeqLock::new(word).begin_write(seq);

        Ok(SlotClaim {
            seq,
            header_index,
            pool_id,
            payload_slot: header_index,
            capacity,
        })
    }

    /// Claim the next frame in the smallest pool that holds `size` bytes.
    ///
    /// # Errors
    /// `Arg` if no pool is large enough.
    pub fn try_claim_slot_by_size(&mut self, size: usize) -> TpResult<SlotClaim> {
        let pool_id = self
            .regions
            .pools
            .iter()
            .filter(|p| p.stride() >= size)
            .min_by_key(|p| p.stride())
            .map(|p| p.superblock().pool_id)
            .ok_or_else(|| TpError::arg(format!("no pool holds {size} bytes")))?;
        self.try_claim_slot(pool_id)
    }

    fn check_claim(&self, claim: &SlotClaim) -> TpResult<()> {
        if claim.seq != self.next_seq {
            return Err(TpError::arg(format!(
                "claim for seq {} is stale (next is {})",
                claim.seq, self.next_seq
            )));
        }
        Ok(())
    }

    /// Payload bytes of `claim`, writable until it is committed.
    pub fn payload_mut(&mut self, claim: &SlotClaim) -> TpResult<&mut [u8]> {
        self.check_claim(claim)?;
        self.regions
            .pool_mut(claim.pool_id)
            .and_then(|p| p.slot_mut(claim.payload_slot))
            .ok_or_else(|| TpError::arg(format!("unknown pool {}", claim.pool_id)))
    }

    /// Publish `claim` with `values_len` payload bytes described by `tensor`.
    ///
    /// Payload bytes must already be written through [`Self::payload_mut`].
    ///
    /// # Errors
    /// - `Protocol` if the lease was revoked
    /// - `Arg` for a stale claim, `values_len` beyond the pool stride, or an
    ///   invalid tensor header
    pub fn commit_slot(
        &mut self,
        claim: SlotClaim,
        values_len: u32,
        tensor: &TensorHeader,
        meta_version: u32,
    ) -> TpResult<u64> {
        self.ensure_attached()?;
        self.check_claim(&claim)?;
        if values_len as usize > claim.capacity {
            return Err(TpError::arg(format!(
                "values_len {values_len} exceeds pool stride {}",
                claim.capacity
            )));
        }
        if tensor.ndims as usize > MAX_DIMS {
            return Err(TpError::arg(format!(
                "tensor rank {} exceeds {MAX_DIMS}",
                tensor.ndims
            )));
        }
        tensor
            .validate()
            .map_err(|e| TpError::arg(format!("invalid tensor header: {e}")))?;

        let now = monotonic_ns();
        let header = SlotHeader {
            seq_commit: 0,
            timestamp_ns: now,
            meta_version,
            values_len_bytes: values_len,
            payload_slot: claim.payload_slot,
            payload_offset: 0,
            pool_id: claim.pool_id,
            tensor: *tensor,
        };

        let slot = self
            .regions
            .header
            .slot_mut(claim.header_index)
            .ok_or_else(|| TpError::shm("header slot out of range"))?;
        header.encode_body(slot);

        let word = self
            .regions
            .header
            .seq_word(claim.header_index)
            .ok_or_else(|| TpError::shm("header slot out of range"))?;
        SlotSeqLock::new(word).end_write(claim.seq);
        self.regions.header.touch_activity(now);

        self.next_seq += 1;
        Ok(claim.seq)
    }

    /// Claim, copy `payload` and commit in one call.
    pub fn offer_frame(&mut self, payload: &[u8], tensor: &TensorHeader) -> TpResult<u64> {
        let values_len = u32::try_from(payload.len())
            .map_err(|_| TpError::arg("payload longer than u32::MAX"))?;
        let claim = self.try_claim_slot_by_size(payload.len())?;
        self.payload_mut(&claim)?[..payload.len()].copy_from_slice(payload);
        let meta_version = self.metadata.meta_version;
        self.commit_slot(claim, values_len, tensor, meta_version)
    }

    /// Publish fill progress for an in-flight claim.
    pub fn report_progress(
        &mut self,
        claim: &SlotClaim,
        bytes_filled: u64,
        state: ProgressState,
    ) -> TpResult<()> {
        self.ensure_attached()?;
        self.check_claim(claim)?;
        self.driver.publish(
            Channel::Announce,
            &FrameProgress {
                stream_id: self.lease.stream_id,
                epoch: self.lease.epoch,
                frame_id: claim.seq,
                header_index: claim.header_index,
                payload_bytes_filled: bytes_filled,
                state,
            },
        )
    }

    fn touch_metadata(&mut self) {
        self.metadata.meta_version = self.metadata.meta_version.wrapping_add(1);
        self.dirty |= Dirty::META;
    }

    /// Set the data-source name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.metadata.name = name.into();
        self.touch_metadata();
    }

    /// Set the data-source summary.
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.metadata.summary = summary.into();
        self.touch_metadata();
    }

    /// Insert or replace attribute `key`.
    ///
    /// # Errors
    /// `NoMem` when the attribute table is full.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        mime_type: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> TpResult<()> {
        let attribute = Attribute {
            key: key.into(),
            mime_type: mime_type.into(),
            value: value.into(),
        };
        match self
            .metadata
            .attributes
            .iter_mut()
            .find(|a| a.key == attribute.key)
        {
            Some(existing) => *existing = attribute,
            None => self
                .metadata
                .attributes
                .push(attribute)
                .map_err(|_| TpError::CapacityExhausted { what: "attributes" })?,
        }
        self.touch_metadata();
        Ok(())
    }

    /// Remove attribute `key`.
    ///
    /// # Errors
    /// `NotFound` if no such attribute exists.
    pub fn delete_attribute(&mut self, key: &str) -> TpResult<()> {
        let index = self
            .metadata
            .attributes
            .iter()
            .position(|a| a.key == key)
            .ok_or_else(|| TpError::NotFound {
                what: format!("attribute {key}"),
            })?;
        self.metadata.attributes.remove(index);
        self.touch_metadata();
        Ok(())
    }

    fn announce(&self, now_ns: u64) -> ShmPoolAnnounce {
        ShmPoolAnnounce {
            stream_id: self.lease.stream_id,
            producer_id: self.lease.client_id,
            epoch: self.lease.epoch,
            announce_timestamp_ns: now_ns,
            layout_version: LAYOUT_VERSION,
            header_nslots: self.regions.header.nslots(),
            header_slot_bytes: HEADER_SLOT_BYTES as u16,
            max_dims: MAX_DIMS as u8,
            header_region_uri: self.regions.header.uri().to_string(),
            pools: self.regions.descriptors(),
        }
    }

    fn meta_record(&self, now_ns: u64) -> DataSourceMeta {
        DataSourceMeta {
            stream_id: self.lease.stream_id,
            producer_id: self.lease.client_id,
            meta_version: self.metadata.meta_version,
            timestamp_ns: now_ns,
            name: self.metadata.name.clone(),
            summary: self.metadata.summary.clone(),
            attributes: self.metadata.attributes.iter().cloned().collect(),
        }
    }

    /// Drive control-plane duties: revocation, keepalive, announce, QoS and
    /// metadata flush. Returns the number of actions taken.
    pub fn do_work(&mut self) -> TpResult<usize> {
        let mut work = self.driver.poll_control()?;
        self.ensure_attached()?;

        let now = monotonic_ns();
        let interval = |last: u64, every: u64| now.saturating_sub(last) >= every;

        if self.driver.keepalive_due(now) {
            self.driver.send_keepalive(&mut self.lease, now)?;
            work += 1;
        }
        if self.dirty.contains(Dirty::ANNOUNCE)
            || interval(self.last_announce_ns, self.driver.config().announce_interval_ns)
        {
            self.driver.publish(Channel::Announce, &self.announce(now))?;
            self.dirty.remove(Dirty::ANNOUNCE);
            self.last_announce_ns = now;
            work += 1;
        }
        if interval(self.last_qos_ns, self.driver.config().qos_interval_ns) {
            self.driver.publish(
                Channel::Qos,
                &QosProducer {
                    stream_id: self.lease.stream_id,
                    producer_id: self.lease.client_id,
                    epoch: self.lease.epoch,
                    current_seq: self.next_seq.saturating_sub(1),
                    timestamp_ns: now,
                },
            )?;
            self.last_qos_ns = now;
            work += 1;
        }
        if self.dirty.contains(Dirty::META) {
            self.driver
                .publish(Channel::Metadata, &self.meta_record(now))?;
            self.dirty.remove(Dirty::META);
            work += 1;
        }
        Ok(work)
    }

    /// Detach and unmap.
    ///
    /// Regions are unmapped even when the driver does not answer.
    pub fn close(mut self) -> TpResult<()> {
        info!(
            "Closing producer on stream {} (lease {}, {} frames)",
            self.lease.stream_id,
            self.lease.lease_id,
            self.next_seq - 1
        );
        self.driver.detach(&self.lease)
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("lease", &self.lease)
            .field("state", &self.state)
            .field("next_seq", &self.next_seq)
            .field("meta_version", &self.metadata.meta_version)
            .finish()
    }
}
