//! Control-plane transport boundary.
//!
//! The runtime only needs two verbs from the pub/sub bus: publish a
//! fragment on a channel, and drain up to `limit` fragments from a channel.
//! [`LoopbackBus`] implements them in-process so producers, consumers and a
//! driver in one process (tests, demos) can talk without an external bus.

use crate::error::{TpError, TpResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Logical control-plane channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Attach / detach / keepalive / revocation / shutdown
    Control,
    /// Producer announces and frame progress
    Announce,
    /// QoS reports
    Qos,
    /// Data-source metadata
    Metadata,
    /// Discovery requests and responses
    Discovery,
}

impl Channel {
    /// Every channel, in index order.
    pub const ALL: [Channel; 5] = [
        Channel::Control,
        Channel::Announce,
        Channel::Qos,
        Channel::Metadata,
        Channel::Discovery,
    ];

    const fn index(self) -> usize {
        match self {
            Channel::Control => 0,
            Channel::Announce => 1,
            Channel::Qos => 2,
            Channel::Metadata => 3,
            Channel::Discovery => 4,
        }
    }
}

/// Publish / poll interface to the control-plane bus.
pub trait ControlTransport: Send + Sync {
    /// Publish one fragment.
    fn offer(&self, channel: Channel, fragment: &[u8]) -> TpResult<()>;

    /// Deliver up to `limit` pending fragments to `handler`; returns how many.
    fn poll(
        &self,
        channel: Channel,
        limit: usize,
        handler: &mut dyn FnMut(&[u8]),
    ) -> TpResult<usize>;
}

/// Pending fragments kept per endpoint and channel before the oldest is dropped.
pub const LOOPBACK_QUEUE_DEPTH: usize = 4096;

struct Endpoint {
    id: u64,
    queues: [VecDeque<Vec<u8>>; 5],
}

#[derive(Default)]
struct Hub {
    next_id: u64,
    endpoints: Vec<Endpoint>,
}

/// In-process fan-out bus.
///
/// Every fragment offered by one endpoint is queued for every *other*
/// connected endpoint.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new endpoint.
    pub fn connect(&self) -> LoopbackTransport {
        let mut hub = self.hub.lock();
        let id = hub.next_id;
        hub.next_id += 1;
        hub.endpoints.push(Endpoint {
            id,
            queues: Default::default(),
        });
        LoopbackTransport {
            hub: Arc::clone(&self.hub),
            id,
        }
    }

    /// Number of connected endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.hub.lock().endpoints.len()
    }
}

/// One endpoint of a [`LoopbackBus`]; disconnects on drop.
pub struct LoopbackTransport {
    hub: Arc<Mutex<Hub>>,
    id: u64,
}

impl ControlTransport for LoopbackTransport {
    fn offer(&self, channel: Channel, fragment: &[u8]) -> TpResult<()> {
        let mut hub = self.hub.lock();
        if !hub.endpoints.iter().any(|e| e.id == self.id) {
            return Err(TpError::Transport {
                reason: "endpoint disconnected".to_string(),
            });
        }
        for endpoint in hub.endpoints.iter_mut().filter(|e| e.id != self.id) {
            let queue = &mut endpoint.queues[channel.index()];
            if queue.len() == LOOPBACK_QUEUE_DEPTH {
                queue.pop_front();
                warn!(
                    "Loopback endpoint {} overflowed on {:?}; dropped oldest fragment",
                    endpoint.id, channel
                );
            }
            queue.push_back(fragment.to_vec());
        }
        Ok(())
    }

    fn poll(
        &self,
        channel: Channel,
        limit: usize,
        handler: &mut dyn FnMut(&[u8]),
    ) -> TpResult<usize> {
        // Drain under the lock, deliver outside it: handlers may offer.
        let batch: Vec<Vec<u8>> = {
            let mut hub = self.hub.lock();
            let Some(endpoint) = hub.endpoints.iter_mut().find(|e| e.id == self.id) else {
                return Err(TpError::Transport {
                    reason: "endpoint disconnected".to_string(),
                });
            };
            let queue = &mut endpoint.queues[channel.index()];
            let n = limit.min(queue.len());
            queue.drain(..n).collect()
        };
        for fragment in &batch {
            handler(fragment);
        }
        Ok(batch.len())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.hub.lock().endpoints.retain(|e| e.id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(t: &LoopbackTransport, channel: Channel) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        t.poll(channel, usize::MAX, &mut |f| out.push(f.to_vec()))
            .unwrap();
        out
    }

    #[test]
    fn fans_out_to_other_endpoints_only() {
        let bus = LoopbackBus::new();
        let a = bus.connect();
        let b = bus.connect();
        let c = bus.connect();

        a.offer(Channel::Control, b"hello").unwrap();
        assert!(drain(&a, Channel::Control).is_empty());
        assert_eq!(drain(&b, Channel::Control), vec![b"hello".to_vec()]);
        assert_eq!(drain(&c, Channel::Control), vec![b"hello".to_vec()]);
    }

    #[test]
    fn channels_are_independent() {
        let bus = LoopbackBus::new();
        let a = bus.connect();
        let b = bus.connect();
        a.offer(Channel::Qos, b"q").unwrap();
        assert!(drain(&b, Channel::Control).is_empty());
        assert_eq!(drain(&b, Channel::Qos).len(), 1);
    }

    #[test]
    fn poll_respects_limit() {
        let bus = LoopbackBus::new();
        let a = bus.connect();
        let b = bus.connect();
        for i in 0..5u8 {
            a.offer(Channel::Announce, &[i]).unwrap();
        }
        let mut seen = Vec::new();
        let n = b
            .poll(Channel::Announce, 2, &mut |f| seen.push(f[0]))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(drain(&b, Channel::Announce), vec![vec![2u8], vec![3], vec![4]]);
    }

    #[test]
    fn handler_may_offer_while_polling() {
        let bus = LoopbackBus::new();
        let a = bus.connect();
        let b = bus.connect();
        a.offer(Channel::Control, b"ping").unwrap();
        b.poll(Channel::Control, 10, &mut |_| {
            b.offer(Channel::Control, b"pong").unwrap();
        })
        .unwrap();
        assert_eq!(drain(&a, Channel::Control), vec![b"pong".to_vec()]);
    }

    #[test]
    fn dropped_endpoint_disconnects() {
        let bus = LoopbackBus::new();
        let a = bus.connect();
        {
            let _b = bus.connect();
            assert_eq!(bus.endpoint_count(), 2);
        }
        assert_eq!(bus.endpoint_count(), 1);
        a.offer(Channel::Control, b"x").unwrap();
    }
}
