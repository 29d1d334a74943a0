//! Metadata cache: latest data-source description per stream.

use crate::cache::LatestTable;
use crate::error::{TpError, TpResult};
use crate::platform::monotonic_ns;
use crate::transport::{Channel, ControlTransport};
use std::sync::Arc;
use tp::consts::{MAX_ATTRIBUTES, METADATA_CAPACITY};
use tp::control::{Attribute, ControlMessage, DataSourceMeta};
use tracing::debug;

/// Collects `DataSourceMeta` records from the metadata channel.
pub struct MetadataCache {
    transport: Arc<dyn ControlTransport>,
    poll_limit: usize,
    streams: LatestTable<u32, DataSourceMeta, METADATA_CAPACITY>,
}

impl MetadataCache {
    /// Cache draining at most `poll_limit` fragments per poll.
    pub fn new(transport: Arc<dyn ControlTransport>, poll_limit: usize) -> Self {
        Self {
            transport,
            poll_limit: poll_limit.max(1),
            streams: LatestTable::new(),
        }
    }

    /// Apply pending records; returns the number of fragments drained.
    pub fn poll(&mut self) -> TpResult<usize> {
        let now = monotonic_ns();
        let streams = &mut self.streams;
        self.transport
            .poll(Channel::Metadata, self.poll_limit, &mut |fragment| {
                match ControlMessage::decode(fragment) {
                    Ok(Some(ControlMessage::DataSourceMeta(mut meta))) => {
                        if meta.attributes.len() > MAX_ATTRIBUTES {
                            debug!(
                                "Stream {} metadata carries {} attributes, keeping {}",
                                meta.stream_id,
                                meta.attributes.len(),
                                MAX_ATTRIBUTES
                            );
                            meta.attributes.truncate(MAX_ATTRIBUTES);
                        }
                        if let Some(evicted) = streams.upsert(meta.stream_id, meta, now) {
                            debug!("Metadata cache full, evicted stream {}", evicted);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Dropping malformed metadata fragment: {}", e),
                }
            })
    }

    /// Latest metadata for `stream_id`.
    ///
    /// # Errors
    /// `NotFound` if none was seen.
    pub fn get(&self, stream_id: u32) -> TpResult<&DataSourceMeta> {
        self.streams.get(stream_id)
    }

    /// Attribute `key` of `stream_id`.
    ///
    /// # Errors
    /// `NotFound` for an unknown stream or attribute.
    pub fn attribute(&self, stream_id: u32, key: &str) -> TpResult<&Attribute> {
        self.get(stream_id)?
            .attributes
            .iter()
            .find(|a| a.key == key)
            .ok_or_else(|| TpError::NotFound {
                what: format!("attribute {key} of stream {stream_id}"),
            })
    }

    /// Number of streams cached.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("streams", &self.streams.len())
            .finish()
    }
}
