//! QoS monitor: latest producer and consumer reports per stream.

use crate::cache::LatestTable;
use crate::error::TpResult;
use crate::platform::monotonic_ns;
use crate::transport::{Channel, ControlTransport};
use std::sync::Arc;
use tp::consts::QOS_CAPACITY;
use tp::control::{ControlMessage, QosConsumer, QosProducer};
use tracing::debug;

/// Collects `QosProducer` / `QosConsumer` reports from the QoS channel.
pub struct QosMonitor {
    transport: Arc<dyn ControlTransport>,
    poll_limit: usize,
    producers: LatestTable<(u32, u32), QosProducer, QOS_CAPACITY>,
    consumers: LatestTable<(u32, u32), QosConsumer, QOS_CAPACITY>,
}

impl QosMonitor {
    /// Monitor draining at most `poll_limit` fragments per poll.
    pub fn new(transport: Arc<dyn ControlTransport>, poll_limit: usize) -> Self {
        Self {
            transport,
            poll_limit: poll_limit.max(1),
            producers: LatestTable::new(),
            consumers: LatestTable::new(),
        }
    }

    /// Apply pending reports; returns the number of fragments drained.
    pub fn poll(&mut self) -> TpResult<usize> {
        let now = monotonic_ns();
        let producers = &mut self.producers;
        let consumers = &mut self.consumers;
        self.transport
            .poll(Channel::Qos, self.poll_limit, &mut |fragment| {
                match ControlMessage::decode(fragment) {
                    Ok(Some(ControlMessage::QosProducer(q))) => {
                        if let Some((stream, id)) =
                            producers.upsert((q.stream_id, q.producer_id), q, now)
                        {
                            debug!("QoS table full, evicted producer {} on stream {}", id, stream);
                        }
                    }
                    Ok(Some(ControlMessage::QosConsumer(q))) => {
                        if let Some((stream, id)) =
                            consumers.upsert((q.stream_id, q.consumer_id), q, now)
                        {
                            debug!("QoS table full, evicted consumer {} on stream {}", id, stream);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Dropping malformed QoS fragment: {}", e),
                }
            })
    }

    /// Latest report from `producer_id` on `stream_id`.
    ///
    /// # Errors
    /// `NotFound` if no report was seen.
    pub fn producer(&self, stream_id: u32, producer_id: u32) -> TpResult<&QosProducer> {
        self.producers.get((stream_id, producer_id))
    }

    /// Latest report from `consumer_id` on `stream_id`.
    ///
    /// # Errors
    /// `NotFound` if no report was seen.
    pub fn consumer(&self, stream_id: u32, consumer_id: u32) -> TpResult<&QosConsumer> {
        self.consumers.get((stream_id, consumer_id))
    }

    /// Every consumer report for `stream_id`.
    pub fn consumers_of(&self, stream_id: u32) -> impl Iterator<Item = &QosConsumer> {
        self.consumers
            .iter()
            .filter(move |((stream, _), _)| *stream == stream_id)
            .map(|(_, q)| q)
    }

    /// Total drops (gap + late) reported by consumers of `stream_id`.
    pub fn total_drops(&self, stream_id: u32) -> u64 {
        self.consumers_of(stream_id)
            .map(|q| q.drops_gap + q.drops_late)
            .sum()
    }
}

impl std::fmt::Debug for QosMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosMonitor")
            .field("producers", &self.producers.len())
            .field("consumers", &self.consumers.len())
            .finish()
    }
}
