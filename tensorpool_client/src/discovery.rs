//! Discovery client: ask the driver which streams exist.
//!
//! Requests carry a client-scoped request id; only a response echoing the
//! most recent id is retained, so late answers to superseded requests are
//! ignored.

use crate::error::{TpError, TpResult};
use crate::platform::monotonic_ns;
use crate::transport::{Channel, ControlTransport};
use heapless::Vec as FixedVec;
use std::sync::Arc;
use tp::consts::{DISCOVERY_CAPACITY, NULL_U32};
use tp::control::{
    ControlMessage, DiscoveryEntry, DiscoveryRequest, ResponseCode, WireMessage,
};
use tracing::{debug, warn};

/// Most recent matching discovery response.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    /// Request the response answered.
    pub request_id: u64,
    /// Driver outcome.
    pub code: ResponseCode,
    /// Listed streams, at most [`DISCOVERY_CAPACITY`].
    pub entries: FixedVec<DiscoveryEntry, DISCOVERY_CAPACITY>,
}

/// Correlated discovery over the discovery channel.
pub struct DiscoveryClient {
    transport: Arc<dyn ControlTransport>,
    client_id: u32,
    poll_limit: usize,
    next_request: u32,
    pending: Option<u64>,
    result: Option<DiscoveryResult>,
}

impl DiscoveryClient {
    /// Client identified as `client_id`.
    pub fn new(transport: Arc<dyn ControlTransport>, client_id: u32, poll_limit: usize) -> Self {
        Self {
            transport,
            client_id,
            poll_limit: poll_limit.max(1),
            next_request: 0,
            pending: None,
            result: None,
        }
    }

    /// Publish a request; `None` / empty filters match everything.
    pub fn request(&mut self, stream_id: Option<u32>, data_source_name: &str) -> TpResult<u64> {
        self.next_request = self.next_request.wrapping_add(1);
        let request_id = ((self.client_id as u64) << 32) | self.next_request as u64;
        let request = DiscoveryRequest {
            request_id,
            client_id: self.client_id,
            stream_id: stream_id.unwrap_or(NULL_U32),
            data_source_name: data_source_name.to_string(),
        };
        self.transport
            .offer(Channel::Discovery, &request.to_fragment())?;
        self.pending = Some(request_id);
        Ok(request_id)
    }

    /// Apply pending responses; returns the number of fragments drained.
    pub fn poll(&mut self) -> TpResult<usize> {
        let pending = self.pending;
        let mut matched = None;
        let drained = self
            .transport
            .poll(Channel::Discovery, self.poll_limit, &mut |fragment| {
                match ControlMessage::decode(fragment) {
                    Ok(Some(ControlMessage::DiscoveryResponse(resp)))
                        if Some(resp.request_id) == pending =>
                    {
                        matched = Some(resp);
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Dropping malformed discovery fragment: {}", e),
                }
            })?;

        if let Some(resp) = matched {
            if resp.entries.len() > DISCOVERY_CAPACITY {
                warn!(
                    "Discovery returned {} streams, keeping {}",
                    resp.entries.len(),
                    DISCOVERY_CAPACITY
                );
            }
            self.result = Some(DiscoveryResult {
                request_id: resp.request_id,
                code: resp.code,
                entries: resp.entries.into_iter().take(DISCOVERY_CAPACITY).collect(),
            });
            self.pending = None;
        }
        Ok(drained)
    }

    /// Request and poll until the answer arrives or `timeout_ns` passes.
    ///
    /// # Errors
    /// - `Timeout` if no matching response arrived
    /// - `Rejected` / `NotFound` / `Unsupported` for a non-OK answer
    pub fn discover(
        &mut self,
        stream_id: Option<u32>,
        data_source_name: &str,
        timeout_ns: u64,
    ) -> TpResult<&[DiscoveryEntry]> {
        let request_id = self.request(stream_id, data_source_name)?;
        let deadline = monotonic_ns().saturating_add(timeout_ns);
        while self.pending == Some(request_id) {
            self.poll()?;
            if self.pending.is_some() {
                if monotonic_ns() >= deadline {
                    return Err(TpError::Timeout {
                        operation: "discover",
                    });
                }
                std::thread::yield_now();
            }
        }
        self.entries()
    }

    /// Whether a request is awaiting its response.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Most recent matching response.
    pub fn result(&self) -> Option<&DiscoveryResult> {
        self.result.as_ref()
    }

    /// Entries of the most recent response.
    ///
    /// # Errors
    /// `NotFound` before any response, or the driver's refusal.
    pub fn entries(&self) -> TpResult<&[DiscoveryEntry]> {
        let result = self.result.as_ref().ok_or_else(|| TpError::NotFound {
            what: "discovery response".to_string(),
        })?;
        match result.code {
            ResponseCode::Ok => Ok(&result.entries),
            ResponseCode::Rejected => Err(TpError::Rejected {
                message: format!("discovery request {} refused", result.request_id),
            }),
            ResponseCode::NotFound => Err(TpError::NotFound {
                what: "matching streams".to_string(),
            }),
            ResponseCode::Unsupported => Err(TpError::Unsupported {
                reason: "discovery".to_string(),
            }),
        }
    }

    /// Entry for `stream_id` in the most recent response.
    pub fn find(&self, stream_id: u32) -> TpResult<&DiscoveryEntry> {
        self.entries()?
            .iter()
            .find(|e| e.stream_id == stream_id)
            .ok_or_else(|| TpError::NotFound {
                what: format!("stream {stream_id}"),
            })
    }
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("client_id", &self.client_id)
            .field("pending", &self.pending)
            .field("result", &self.result)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::transport::LoopbackBus;
    use tp::consts::{HEADER_SLOT_BYTES, LAYOUT_VERSION};
    use tp::control::DiscoveryResponse;

    fn entry(stream_id: u32) -> DiscoveryEntry {
        DiscoveryEntry {
            stream_id,
            producer_id: 1,
            epoch: 1,
            layout_version: LAYOUT_VERSION,
            header_nslots: 8,
            header_slot_bytes: HEADER_SLOT_BYTES as u16,
            max_dims: 8,
            data_source_name: format!("source{stream_id}"),
            header_region_uri: format!("shm:file?path=/dev/shm/tp_{stream_id}_header"),
        }
    }

    fn respond(driver: &crate::transport::LoopbackTransport, request_id: u64, entries: Vec<DiscoveryEntry>) {
        driver
            .offer(
                Channel::Discovery,
                &DiscoveryResponse {
                    request_id,
                    code: ResponseCode::Ok,
                    entries,
                }
                .to_fragment(),
            )
            .unwrap();
    }

    #[test]
    fn request_ids_are_client_scoped() {
        let bus = LoopbackBus::new();
        let _driver = bus.connect();
        let mut client = DiscoveryClient::new(Arc::new(bus.connect()), 5, 10);
        assert_eq!(client.request(None, "").unwrap(), (5 << 32) | 1);
        assert_eq!(client.request(Some(2), "cam").unwrap(), (5 << 32) | 2);
    }

    #[test]
    fn keeps_only_response_to_latest_request() {
        let bus = LoopbackBus::new();
        let driver = bus.connect();
        let mut client = DiscoveryClient::new(Arc::new(bus.connect()), 5, 10);

        let first = client.request(None, "").unwrap();
        let second = client.request(None, "").unwrap();
        respond(&driver, first, vec![entry(1)]);
        client.poll().unwrap();
        assert!(client.is_pending());
        assert_eq!(client.entries().unwrap_err().code(), ErrorCode::NotFound);

        respond(&driver, second, vec![entry(2), entry(3)]);
        client.poll().unwrap();
        assert!(!client.is_pending());
        assert_eq!(client.entries().unwrap().len(), 2);
        assert_eq!(client.find(3).unwrap().data_source_name, "source3");
        assert_eq!(client.find(1).unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn discover_times_out_without_driver() {
        let bus = LoopbackBus::new();
        let mut client = DiscoveryClient::new(Arc::new(bus.connect()), 5, 10);
        let err = client.discover(None, "", 1_000_000).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[test]
    fn oversized_response_is_capped() {
        let bus = LoopbackBus::new();
        let driver = bus.connect();
        let mut client = DiscoveryClient::new(Arc::new(bus.connect()), 5, 10);
        let id = client.request(None, "").unwrap();
        respond(
            &driver,
            id,
            (0..DISCOVERY_CAPACITY as u32 + 3).map(entry).collect(),
        );
        client.poll().unwrap();
        assert_eq!(client.entries().unwrap().len(), DISCOVERY_CAPACITY);
    }
}
