//! Consumer handle: seqlock reads from the header ring with drop accounting.
//!
//! # Read protocol
//!
//! 1. Pick the target slot (`last_seq + 1` in stream mode, the newest
//!    committed frame in latest mode).
//! 2. Acquire-load `seq_commit`; odd or not newer than `last_seq` is "no data".
//! 3. A slot already holding a frame `nslots` or more past the target was
//!    overwritten before it could be read: those frames count as late drops.
//! 4. Copy the slot header, re-load `seq_commit`; a change means the copy is
//!    torn and is discarded without advancing.
//! 5. Frames skipped between `last_seq` and the delivered frame count as gap
//!    drops.
//!
//! "No data" is reported as `TpError::Timeout`. Anything the producer could
//! only have produced by violating the layout (undecodable header, payload
//! outside its pool) revokes the handle.

use crate::driver::{AttachExpectations, AttachGrant, DriverClient, HandleState, Lease};
use crate::error::{TpError, TpResult};
use crate::platform::monotonic_ns;
use crate::region::{RegionAccess, StreamRegions};
use crate::seqlock::SlotSeqLock;
use crate::transport::{Channel, ControlTransport};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tp::config::ClientConfig;
use tp::control::{
    ConsumerMode, ControlMessage, FrameProgress, QosConsumer, Role, ShmPoolAnnounce,
};
use tp::shm::slot::{SLOT_HEADER_LEN, SlotHeader, TensorHeader, frame_seq, is_stable};
use tracing::{debug, info, warn};

const NO_DATA: TpError = TpError::Timeout {
    operation: "read_frame",
};

/// One frame, borrowed from the mapped payload pool.
///
/// Valid until the next call on the consumer. The producer may overwrite the
/// slot at any time; [`FrameView::is_current`] tells whether it has not yet
/// done so.
#[derive(Debug)]
pub struct FrameView<'a> {
    header: SlotHeader,
    header_index: u32,
    payload: &'a [u8],
    seq_word: &'a AtomicU64,
}

impl FrameView<'_> {
    /// Frame sequence number.
    pub fn seq(&self) -> u64 {
        self.header.seq()
    }

    /// Producer timestamp, monotonic nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        self.header.timestamp_ns
    }

    /// Metadata version the frame was committed under.
    pub fn meta_version(&self) -> u32 {
        self.header.meta_version
    }

    /// Header ring slot the frame was read from.
    pub fn header_index(&self) -> u32 {
        self.header_index
    }

    /// Pool holding the payload.
    pub fn pool_id(&self) -> u16 {
        self.header.pool_id
    }

    /// Tensor shape.
    pub fn tensor(&self) -> &TensorHeader {
        &self.header.tensor
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        self.payload
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the producer has not yet started overwriting this frame.
    ///
    /// Check after consuming the payload; `false` means the bytes may be torn.
    pub fn is_current(&self) -> bool {
        SlotSeqLock::new(self.seq_word).recheck() == self.header.seq_commit
    }
}

/// Consumer side of one stream.
pub struct Consumer {
    driver: DriverClient,
    lease: Lease,
    state: HandleState,
    regions: StreamRegions,
    mode: ConsumerMode,
    producer_epoch: u64,
    join_time_ns: u64,
    last_seq: u64,
    last_header_index: Option<u32>,
    drops_gap: u64,
    drops_late: u64,
    progress: Option<FrameProgress>,
    last_qos_ns: u64,
    scratch: [u8; SLOT_HEADER_LEN],
}

impl Consumer {
    /// Attach to `stream_id` as a consumer and map the granted regions.
    pub fn attach(
        transport: Arc<dyn ControlTransport>,
        config: ClientConfig,
        stream_id: u32,
        mode: ConsumerMode,
        exp: &AttachExpectations,
    ) -> TpResult<Self> {
        let mut driver = DriverClient::new(transport, config)?;
        let grant = driver.attach(stream_id, Role::Consumer, exp)?;
        Self::from_grant(driver, grant, mode)
    }

    /// Build a consumer from an already granted lease.
    ///
    /// Reading starts at the oldest frame still resident in the ring.
    pub fn from_grant(
        mut driver: DriverClient,
        grant: AttachGrant,
        mode: ConsumerMode,
    ) -> TpResult<Self> {
        if grant.lease.role != Role::Consumer {
            return Err(TpError::arg("consumer needs a consumer lease"));
        }
        let regions = match StreamRegions::map(&grant.response, RegionAccess::ReadOnly) {
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

        let mut consumer = Self {
            driver,
            producer_epoch: grant.lease.epoch,
            lease: grant.lease,
            state: HandleState::Attached,
            regions,
            mode,
            join_time_ns: monotonic_ns(),
            last_seq: 0,
            last_header_index: None,
            drops_gap: 0,
            drops_late: 0,
            progress: None,
            last_qos_ns: 0,
            scratch: [0; SLOT_HEADER_LEN],
        };
        let newest = consumer.newest_committed().map_or(0, |(_, seq)| seq);
        consumer.last_seq = newest.saturating_sub(consumer.nslots() as u64);
        info!(
            "Consumer joined stream {} at seq {} ({:?} mode)",
            consumer.lease.stream_id, consumer.last_seq, mode
        );
        Ok(consumer)
    }

    /// Lease held by this consumer.
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Current handle state.
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Read mode.
    pub fn mode(&self) -> ConsumerMode {
        self.mode
    }

    /// Header ring slot count.
    pub fn nslots(&self) -> u32 {
        self.regions.header.nslots()
    }

    /// Last delivered (or skipped) frame sequence.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Header slot of the last delivered frame.
    pub fn last_header_index(&self) -> Option<u32> {
        self.last_header_index
    }

    /// Frames skipped over.
    pub fn drops_gap(&self) -> u64 {
        self.drops_gap
    }

    /// Frames overwritten before they could be read.
    pub fn drops_late(&self) -> u64 {
        self.drops_late
    }

    /// Producer activity timestamp from the header ring superblock.
    pub fn producer_activity_ns(&self) -> u64 {
        self.regions.header.activity_ts()
    }

    fn revoke(&mut self, reason: String) -> TpError {
        warn!(
            "Consumer on stream {} revoked: {}",
            self.lease.stream_id, reason
        );
        self.state = HandleState::Revoked;
        TpError::Protocol { reason }
    }

    fn ensure_attached(&mut self) -> TpResult<()> {
        if self.state == HandleState::Revoked {
            return Err(TpError::Revoked {
                lease_id: self.lease.lease_id,
            });
        }
        if let Err(e) = self.driver.check_lease(&self.lease) {
            warn!("Consumer lease {} is no longer valid: {}", self.lease.lease_id, e);
            self.state = HandleState::Revoked;
            return Err(e);
        }
        if self.producer_epoch != self.lease.epoch {
            return Err(self.revoke(format!(
                "producer epoch {} replaced attached epoch {}",
                self.producer_epoch, self.lease.epoch
            )));
        }
        Ok(())
    }

    /// Slot index and sequence of the newest committed frame in the ring.
    fn newest_committed(&self) -> Option<(u32, u64)> {
        (0..self.regions.header.nslots())
            .filter_map(|index| {
                let word = SlotSeqLock::new(self.regions.header.seq_word(index)?).load();
                (is_stable(word) && word != 0).then(|| (index, frame_seq(word)))
            })
            .max_by_key(|&(_, seq)| seq)
    }

    fn seq_commit_at(&self, index: u32) -> u64 {
        self.regions
            .header
            .seq_word(index)
            .map_or(0, |w| SlotSeqLock::new(w).load())
    }

    /// Poll for the next frame.
    ///
    /// # Errors
    /// - `Timeout` when no new frame is ready (including torn reads and late
    ///   skips); retry on the next poll
    /// - `Protocol` once the handle is revoked
    pub fn try_read_frame(&mut self) -> TpResult<FrameView<'_>> {
        self.ensure_attached()?;
        let nslots = self.nslots() as u64;

        let (index, observed) = match self.mode {
            ConsumerMode::Stream => {
                let target = self.last_seq + 1;
                let index = (target % nslots) as u32;
                let observed = self.seq_commit_at(index);
                if !is_stable(observed) || frame_seq(observed) <= self.last_seq {
                    return Err(NO_DATA);
                }
                let seq = frame_seq(observed);
                if seq >= target + nslots {
                    let overwritten = seq - nslots - self.last_seq;
                    self.drops_late += overwritten;
                    self.last_seq = seq - nslots;
                    debug!(
                        "Stream {}: {} frame(s) overwritten before read, resuming after {}",
                        self.lease.stream_id, overwritten, self.last_seq
                    );
                    return Err(NO_DATA);
                }
                (index, observed)
            }
            ConsumerMode::Latest => match self.newest_committed() {
                Some((index, seq)) if seq > self.last_seq => {
                    let observed = self.seq_commit_at(index);
                    if !is_stable(observed) || frame_seq(observed) != seq {
                        return Err(NO_DATA);
                    }
                    (index, observed)
                }
                _ => return Err(NO_DATA),
            },
        };

        if !self.regions.header.copy_slot_prefix(index, &mut self.scratch) {
            return Err(self.revoke(format!("header slot {index} shorter than its layout")));
        }
        let rechecked = self
            .regions
            .header
            .seq_word(index)
            .map(|w| SlotSeqLock::new(w).recheck());
        if rechecked != Some(observed) {
            return Err(NO_DATA);
        }

        let mut header = match SlotHeader::decode(&self.scratch) {
            Ok(header) => header,
            Err(e) => return Err(self.revoke(format!("undecodable header slot {index}: {e}"))),
        };
        header.seq_commit = observed;
        let seq = header.seq();

        // Stream mode only ever accepts `last_seq + 1`; skips there were counted as late.
        if matches!(self.mode, ConsumerMode::Latest) && seq > self.last_seq + 1 {
            self.drops_gap += seq - self.last_seq - 1;
        }

        let Some(slot_len) = self
            .regions
            .pool(header.pool_id)
            .map(|pool| pool.slot_range(header.payload_slot).map(|r| r.len()))
        else {
            let pool_id = header.pool_id;
            return Err(self.revoke(format!("frame {seq} names unknown pool {pool_id}")));
        };
        let start = header.payload_offset as usize;
        let end = start + header.values_len_bytes as usize;
        if slot_len.is_none_or(|len| end > len) {
            return Err(self.revoke(format!(
                "frame {seq} payload slot {} [{start}, {end}) outside pool {}",
                header.payload_slot, header.pool_id
            )));
        }

        self.last_seq = seq;
        self.last_header_index = Some(index);

        let payload = self
            .regions
            .pool(header.pool_id)
            .and_then(|pool| pool.slot(header.payload_slot))
            .map(|slot| &slot[start..end])
            .ok_or(NO_DATA)?;
        let seq_word = self.regions.header.seq_word(index).ok_or(NO_DATA)?;
        Ok(FrameView {
            header,
            header_index: index,
            payload,
            seq_word,
        })
    }

    /// Latest fill progress for the frame expected next, if any.
    pub fn get_progress(&self) -> Option<&FrameProgress> {
        let expected_index = ((self.last_seq + 1) % self.nslots() as u64) as u32;
        self.progress.as_ref().filter(|p| {
            p.epoch == self.lease.epoch
                && p.header_index == expected_index
                && p.frame_id > self.last_seq
        })
    }

    fn apply_announce(&mut self, announce: &ShmPoolAnnounce, now_ns: u64) {
        let freshness = self.driver.config().announce_freshness_ns;
        let ts = announce.announce_timestamp_ns;
        if now_ns.saturating_sub(ts) > freshness || ts < self.join_time_ns {
            debug!(
                "Ignoring stale announce for stream {} (ts {}, now {})",
                announce.stream_id, ts, now_ns
            );
            return;
        }
        if announce.epoch != self.producer_epoch {
            info!(
                "Stream {} producer epoch {} -> {}",
                announce.stream_id, self.producer_epoch, announce.epoch
            );
            self.producer_epoch = announce.epoch;
        }
    }

    /// Publish consumer QoS.
    pub fn send_qos(&mut self, now_ns: u64) -> TpResult<()> {
        self.driver.publish(
            Channel::Qos,
            &QosConsumer {
                stream_id: self.lease.stream_id,
                consumer_id: self.lease.client_id,
                epoch: self.lease.epoch,
                mode: self.mode,
                last_seq_seen: self.last_seq,
                drops_gap: self.drops_gap,
                drops_late: self.drops_late,
                timestamp_ns: now_ns,
            },
        )?;
        self.last_qos_ns = now_ns;
        Ok(())
    }

    /// Drive control-plane duties: revocation, announces, progress,
    /// keepalive and QoS. Returns the number of items handled.
    pub fn do_work(&mut self) -> TpResult<usize> {
        let mut work = self.driver.poll_control()?;
        self.ensure_attached()?;

        let mut inbound = Vec::new();
        work += self.driver.poll_channel(Channel::Announce, &mut |fragment| {
            match ControlMessage::decode(fragment) {
                Ok(Some(msg)) => inbound.push(msg),
                Ok(None) => {}
                Err(e) => debug!("Dropping malformed announce fragment: {}", e),
            }
        })?;

        let now = monotonic_ns();
        let stream_id = self.lease.stream_id;
        for msg in inbound {
            match msg {
                ControlMessage::ShmPoolAnnounce(a) if a.stream_id == stream_id => {
                    self.apply_announce(&a, now);
                }
                ControlMessage::FrameProgress(p) if p.stream_id == stream_id => {
                    self.progress = Some(p);
                }
                _ => {}
            }
        }

        if self.driver.keepalive_due(now) {
            self.driver.send_keepalive(&mut self.lease, now)?;
            work += 1;
        }
        if now.saturating_sub(self.last_qos_ns) >= self.driver.config().qos_interval_ns {
            self.send_qos(now)?;
            work += 1;
        }

        self.ensure_attached()?;
        Ok(work)
    }

    /// Detach and unmap.
    pub fn close(mut self) -> TpResult<()> {
        info!(
            "Closing consumer on stream {} (lease {}, gap {}, late {})",
            self.lease.stream_id, self.lease.lease_id, self.drops_gap, self.drops_late
        );
        self.driver.detach(&self.lease)
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("lease", &self.lease)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("last_seq", &self.last_seq)
            .field("drops_gap", &self.drops_gap)
            .field("drops_late", &self.drops_late)
            .finish()
    }
}
