//! Control-plane message bodies.
//!
//! NULL sentinels are the unsigned maximum of each field type
//! (see [`crate::consts`]); decoders keep them as-is and leave the
//! interpretation to the receiver.

use super::codec::{WireError, WireMessage, WireReader, WireWriter};

// ─── Enumerations ───────────────────────────────────────────────────

/// Role a client attaches with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    /// Writes frames.
    Producer = 1,
    /// Reads frames.
    Consumer = 2,
}

impl Role {
    /// Convert from the raw wire value.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Producer),
            2 => Some(Self::Consumer),
            _ => None,
        }
    }

    fn decode(value: u8) -> Result<Self, WireError> {
        Self::from_u8(value).ok_or(WireError::InvalidEnum {
            field: "role",
            value: value as u64,
        })
    }
}

/// Driver response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    /// Request granted.
    Ok = 0,
    /// Request refused by the driver.
    Rejected = 1,
    /// Requested stream or lease unknown to the driver.
    NotFound = 2,
    /// Request not supported by this driver.
    Unsupported = 3,
}

impl ResponseCode {
    fn decode(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Rejected),
            2 => Ok(Self::NotFound),
            3 => Ok(Self::Unsupported),
            _ => Err(WireError::InvalidEnum {
                field: "code",
                value: value as u64,
            }),
        }
    }
}

/// Consumer delivery mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConsumerMode {
    /// Every frame, in sequence order.
    #[default]
    Stream = 1,
    /// Only the newest committed frame; skipped frames count as gaps.
    Latest = 2,
}

impl ConsumerMode {
    fn decode(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(Self::Stream),
            2 => Ok(Self::Latest),
            _ => Err(WireError::InvalidEnum {
                field: "mode",
                value: value as u64,
            }),
        }
    }
}

/// In-flight fill state of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProgressState {
    /// Claimed, nothing written yet.
    Started = 1,
    /// Partially filled.
    Progress = 2,
    /// Fully written, commit imminent.
    Complete = 3,
}

impl ProgressState {
    fn decode(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(Self::Started),
            2 => Ok(Self::Progress),
            3 => Ok(Self::Complete),
            _ => Err(WireError::InvalidEnum {
                field: "state",
                value: value as u64,
            }),
        }
    }
}

// ─── Shared var-data groups ─────────────────────────────────────────

/// One payload pool declared by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDescriptor {
    /// Pool identifier.
    pub pool_id: u16,
    /// Number of payload slots.
    pub nslots: u32,
    /// Bytes between consecutive payload slots.
    pub stride_bytes: u32,
    /// Region URI of the pool.
    pub region_uri: String,
}

fn put_pools(var: &mut WireWriter, pools: &[PoolDescriptor]) {
    var.put_u32(pools.len() as u32);
    for pool in pools {
        var.put_u16(pool.pool_id);
        var.put_u32(pool.nslots);
        var.put_u32(pool.stride_bytes);
        var.put_str(&pool.region_uri);
    }
}

fn get_pools(var: &mut WireReader<'_>) -> Result<Vec<PoolDescriptor>, WireError> {
    let count = var.get_count()?;
    let mut pools = Vec::with_capacity(count);
    for _ in 0..count {
        pools.push(PoolDescriptor {
            pool_id: var.get_u16()?,
            nslots: var.get_u32()?,
            stride_bytes: var.get_u32()?,
            region_uri: var.get_str()?,
        });
    }
    Ok(pools)
}

// ─── Lease lifecycle ────────────────────────────────────────────────

/// Client → driver: request a lease on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    /// Client-assigned correlation id.
    pub correlation_id: u64,
    /// Stream to attach to.
    pub stream_id: u32,
    /// Requesting client.
    pub client_id: u32,
    /// Requested role.
    pub role: Role,
    /// Layout version the client understands.
    pub expected_layout_version: u32,
    /// Ask for huge-page backed regions.
    pub require_hugepages: bool,
}

impl WireMessage for AttachRequest {
    const TEMPLATE_ID: u16 = 1;
    const BLOCK_LENGTH: u16 = 22;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.correlation_id);
        w.put_u32(self.stream_id);
        w.put_u32(self.client_id);
        w.put_u8(self.role as u8);
        w.put_u32(self.expected_layout_version);
        w.put_bool(self.require_hugepages);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            correlation_id: b.get_u64()?,
            stream_id: b.get_u32()?,
            client_id: b.get_u32()?,
            role: Role::decode(b.get_u8()?)?,
            expected_layout_version: b.get_u32()?,
            require_hugepages: b.get_bool()?,
        })
    }
}

/// Driver → client: lease grant (or refusal) with region descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachResponse {
    /// Correlation id echoed from the request.
    pub correlation_id: u64,
    /// Outcome.
    pub code: ResponseCode,
    /// Granted lease.
    pub lease_id: u64,
    /// Lease expiry, monotonic nanoseconds.
    pub lease_expiry_ns: u64,
    /// Stream the lease covers.
    pub stream_id: u32,
    /// Producer epoch of the regions.
    pub epoch: u64,
    /// Layout version of the regions.
    pub layout_version: u32,
    /// Header ring slot count.
    pub header_nslots: u32,
    /// Header ring slot size.
    pub header_slot_bytes: u16,
    /// Maximum tensor rank.
    pub max_dims: u8,
    /// Header ring URI.
    pub header_region_uri: String,
    /// Payload pools.
    pub pools: Vec<PoolDescriptor>,
    /// Driver-provided reason on refusal.
    pub error_message: String,
}

impl WireMessage for AttachResponse {
    const TEMPLATE_ID: u16 = 2;
    const BLOCK_LENGTH: u16 = 48;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.correlation_id);
        w.put_u8(self.code as u8);
        w.put_u64(self.lease_id);
        w.put_u64(self.lease_expiry_ns);
        w.put_u32(self.stream_id);
        w.put_u64(self.epoch);
        w.put_u32(self.layout_version);
        w.put_u32(self.header_nslots);
        w.put_u16(self.header_slot_bytes);
        w.put_u8(self.max_dims);
    }

    fn encode_var(&self, var: &mut WireWriter) {
        var.put_str(&self.header_region_uri);
        put_pools(var, &self.pools);
        var.put_str(&self.error_message);
    }

    fn decode(b: &mut WireReader<'_>, var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            correlation_id: b.get_u64()?,
            code: ResponseCode::decode(b.get_u8()?)?,
            lease_id: b.get_u64()?,
            lease_expiry_ns: b.get_u64()?,
            stream_id: b.get_u32()?,
            epoch: b.get_u64()?,
            layout_version: b.get_u32()?,
            header_nslots: b.get_u32()?,
            header_slot_bytes: b.get_u16()?,
            max_dims: b.get_u8()?,
            header_region_uri: var.get_str()?,
            pools: get_pools(var)?,
            error_message: var.get_str()?,
        })
    }
}

/// Client → driver: release a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachRequest {
    /// Client-assigned correlation id.
    pub correlation_id: u64,
    /// Lease being released.
    pub lease_id: u64,
    /// Stream of the lease.
    pub stream_id: u32,
    /// Owning client.
    pub client_id: u32,
    /// Role of the lease.
    pub role: Role,
}

impl WireMessage for DetachRequest {
    const TEMPLATE_ID: u16 = 3;
    const BLOCK_LENGTH: u16 = 25;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.correlation_id);
        w.put_u64(self.lease_id);
        w.put_u32(self.stream_id);
        w.put_u32(self.client_id);
        w.put_u8(self.role as u8);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            correlation_id: b.get_u64()?,
            lease_id: b.get_u64()?,
            stream_id: b.get_u32()?,
            client_id: b.get_u32()?,
            role: Role::decode(b.get_u8()?)?,
        })
    }
}

/// Driver → client: detach acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachResponse {
    /// Correlation id echoed from the request.
    pub correlation_id: u64,
    /// Outcome.
    pub code: ResponseCode,
}

impl WireMessage for DetachResponse {
    const TEMPLATE_ID: u16 = 4;
    const BLOCK_LENGTH: u16 = 9;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.correlation_id);
        w.put_u8(self.code as u8);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            correlation_id: b.get_u64()?,
            code: ResponseCode::decode(b.get_u8()?)?,
        })
    }
}

/// Client → driver: periodic lease refresh (fire-and-forget).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseKeepalive {
    /// Lease being refreshed.
    pub lease_id: u64,
    /// Stream of the lease.
    pub stream_id: u32,
    /// Owning client.
    pub client_id: u32,
    /// Role of the lease.
    pub role: Role,
    /// Send time, monotonic nanoseconds.
    pub timestamp_ns: u64,
}

impl WireMessage for LeaseKeepalive {
    const TEMPLATE_ID: u16 = 5;
    const BLOCK_LENGTH: u16 = 25;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.lease_id);
        w.put_u32(self.stream_id);
        w.put_u32(self.client_id);
        w.put_u8(self.role as u8);
        w.put_u64(self.timestamp_ns);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            lease_id: b.get_u64()?,
            stream_id: b.get_u32()?,
            client_id: b.get_u32()?,
            role: Role::decode(b.get_u8()?)?,
            timestamp_ns: b.get_u64()?,
        })
    }
}

/// Driver → clients: a lease was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRevoked {
    /// Revoked lease.
    pub lease_id: u64,
    /// Stream of the lease.
    pub stream_id: u32,
    /// Role of the lease.
    pub role: Role,
    /// Driver-specific reason code.
    pub reason: u8,
    /// Revocation time, monotonic nanoseconds.
    pub timestamp_ns: u64,
}

impl WireMessage for LeaseRevoked {
    const TEMPLATE_ID: u16 = 6;
    const BLOCK_LENGTH: u16 = 22;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.lease_id);
        w.put_u32(self.stream_id);
        w.put_u8(self.role as u8);
        w.put_u8(self.reason);
        w.put_u64(self.timestamp_ns);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            lease_id: b.get_u64()?,
            stream_id: b.get_u32()?,
            role: Role::decode(b.get_u8()?)?,
            reason: b.get_u8()?,
            timestamp_ns: b.get_u64()?,
        })
    }
}

/// Driver → clients: the driver is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverShutdown {
    /// Shutdown time, monotonic nanoseconds.
    pub timestamp_ns: u64,
    /// Driver-specific reason code.
    pub reason: u8,
}

impl WireMessage for DriverShutdown {
    const TEMPLATE_ID: u16 = 7;
    const BLOCK_LENGTH: u16 = 9;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.timestamp_ns);
        w.put_u8(self.reason);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            timestamp_ns: b.get_u64()?,
            reason: b.get_u8()?,
        })
    }
}

// ─── Announce / progress ────────────────────────────────────────────

/// Producer → consumers: current epoch and region layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmPoolAnnounce {
    /// Announced stream.
    pub stream_id: u32,
    /// Announcing producer.
    pub producer_id: u32,
    /// Current producer epoch.
    pub epoch: u64,
    /// Announce time, monotonic nanoseconds.
    pub announce_timestamp_ns: u64,
    /// Layout version of the regions.
    pub layout_version: u32,
    /// Header ring slot count.
    pub header_nslots: u32,
    /// Header ring slot size.
    pub header_slot_bytes: u16,
    /// Maximum tensor rank.
    pub max_dims: u8,
    /// Header ring URI.
    pub header_region_uri: String,
    /// Payload pools.
    pub pools: Vec<PoolDescriptor>,
}

impl WireMessage for ShmPoolAnnounce {
    const TEMPLATE_ID: u16 = 8;
    const BLOCK_LENGTH: u16 = 35;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u32(self.stream_id);
        w.put_u32(self.producer_id);
        w.put_u64(self.epoch);
        w.put_u64(self.announce_timestamp_ns);
        w.put_u32(self.layout_version);
        w.put_u32(self.header_nslots);
        w.put_u16(self.header_slot_bytes);
        w.put_u8(self.max_dims);
    }

    fn encode_var(&self, var: &mut WireWriter) {
        var.put_str(&self.header_region_uri);
        put_pools(var, &self.pools);
    }

    fn decode(b: &mut WireReader<'_>, var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            stream_id: b.get_u32()?,
            producer_id: b.get_u32()?,
            epoch: b.get_u64()?,
            announce_timestamp_ns: b.get_u64()?,
            layout_version: b.get_u32()?,
            header_nslots: b.get_u32()?,
            header_slot_bytes: b.get_u16()?,
            max_dims: b.get_u8()?,
            header_region_uri: var.get_str()?,
            pools: get_pools(var)?,
        })
    }
}

/// Producer → consumers: fill progress of the frame being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProgress {
    /// Stream of the frame.
    pub stream_id: u32,
    /// Producer epoch.
    pub epoch: u64,
    /// Frame sequence number.
    pub frame_id: u64,
    /// Header ring index of the frame.
    pub header_index: u32,
    /// Payload bytes written so far.
    pub payload_bytes_filled: u64,
    /// Fill state.
    pub state: ProgressState,
}

impl WireMessage for FrameProgress {
    const TEMPLATE_ID: u16 = 12;
    const BLOCK_LENGTH: u16 = 33;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u32(self.stream_id);
        w.put_u64(self.epoch);
        w.put_u64(self.frame_id);
        w.put_u32(self.header_index);
        w.put_u64(self.payload_bytes_filled);
        w.put_u8(self.state as u8);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            stream_id: b.get_u32()?,
            epoch: b.get_u64()?,
            frame_id: b.get_u64()?,
            header_index: b.get_u32()?,
            payload_bytes_filled: b.get_u64()?,
            state: ProgressState::decode(b.get_u8()?)?,
        })
    }
}

// ─── QoS ────────────────────────────────────────────────────────────

/// Producer QoS report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosProducer {
    /// Stream.
    pub stream_id: u32,
    /// Reporting producer.
    pub producer_id: u32,
    /// Producer epoch.
    pub epoch: u64,
    /// Last committed sequence.
    pub current_seq: u64,
    /// Report time, monotonic nanoseconds.
    pub timestamp_ns: u64,
}

impl WireMessage for QosProducer {
    const TEMPLATE_ID: u16 = 9;
    const BLOCK_LENGTH: u16 = 32;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u32(self.stream_id);
        w.put_u32(self.producer_id);
        w.put_u64(self.epoch);
        w.put_u64(self.current_seq);
        w.put_u64(self.timestamp_ns);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            stream_id: b.get_u32()?,
            producer_id: b.get_u32()?,
            epoch: b.get_u64()?,
            current_seq: b.get_u64()?,
            timestamp_ns: b.get_u64()?,
        })
    }
}

/// Consumer QoS report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosConsumer {
    /// Stream.
    pub stream_id: u32,
    /// Reporting consumer.
    pub consumer_id: u32,
    /// Epoch the consumer tracks.
    pub epoch: u64,
    /// Delivery mode.
    pub mode: ConsumerMode,
    /// Last sequence consumed.
    pub last_seq_seen: u64,
    /// Frames skipped.
    pub drops_gap: u64,
    /// Frames overwritten before being read.
    pub drops_late: u64,
    /// Report time, monotonic nanoseconds.
    pub timestamp_ns: u64,
}

impl WireMessage for QosConsumer {
    const TEMPLATE_ID: u16 = 10;
    const BLOCK_LENGTH: u16 = 49;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u32(self.stream_id);
        w.put_u32(self.consumer_id);
        w.put_u64(self.epoch);
        w.put_u8(self.mode as u8);
        w.put_u64(self.last_seq_seen);
        w.put_u64(self.drops_gap);
        w.put_u64(self.drops_late);
        w.put_u64(self.timestamp_ns);
    }

    fn decode(b: &mut WireReader<'_>, _var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            stream_id: b.get_u32()?,
            consumer_id: b.get_u32()?,
            epoch: b.get_u64()?,
            mode: ConsumerMode::decode(b.get_u8()?)?,
            last_seq_seen: b.get_u64()?,
            drops_gap: b.get_u64()?,
            drops_late: b.get_u64()?,
            timestamp_ns: b.get_u64()?,
        })
    }
}

// ─── Metadata ───────────────────────────────────────────────────────

/// One data-source attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute key.
    pub key: String,
    /// MIME type of `value`.
    pub mime_type: String,
    /// Raw value.
    pub value: Vec<u8>,
}

/// Producer → subscribers: data-source description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceMeta {
    /// Stream.
    pub stream_id: u32,
    /// Describing producer.
    pub producer_id: u32,
    /// Metadata version.
    pub meta_version: u32,
    /// Publish time, monotonic nanoseconds.
    pub timestamp_ns: u64,
    /// Human-readable name.
    pub name: String,
    /// Free-form summary.
    pub summary: String,
    /// Attributes.
    pub attributes: Vec<Attribute>,
}

impl WireMessage for DataSourceMeta {
    const TEMPLATE_ID: u16 = 11;
    const BLOCK_LENGTH: u16 = 20;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u32(self.stream_id);
        w.put_u32(self.producer_id);
        w.put_u32(self.meta_version);
        w.put_u64(self.timestamp_ns);
    }

    fn encode_var(&self, var: &mut WireWriter) {
        var.put_str(&self.name);
        var.put_str(&self.summary);
        var.put_u32(self.attributes.len() as u32);
        for attr in &self.attributes {
            var.put_str(&attr.key);
            var.put_str(&attr.mime_type);
            var.put_bytes(&attr.value);
        }
    }

    fn decode(b: &mut WireReader<'_>, var: &mut WireReader<'_>) -> Result<Self, WireError> {
        let stream_id = b.get_u32()?;
        let producer_id = b.get_u32()?;
        let meta_version = b.get_u32()?;
        let timestamp_ns = b.get_u64()?;
        let name = var.get_str()?;
        let summary = var.get_str()?;
        let count = var.get_count()?;
        let mut attributes = Vec::with_capacity(count);
        for _ in 0..count {
            attributes.push(Attribute {
                key: var.get_str()?,
                mime_type: var.get_str()?,
                value: var.get_bytes()?.to_vec(),
            });
        }
        Ok(Self {
            stream_id,
            producer_id,
            meta_version,
            timestamp_ns,
            name,
            summary,
            attributes,
        })
    }
}

// ─── Discovery ──────────────────────────────────────────────────────

/// Client → driver: list streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Client-assigned request id.
    pub request_id: u64,
    /// Requesting client.
    pub client_id: u32,
    /// Stream filter; `NULL_U32` matches any.
    pub stream_id: u32,
    /// Data-source name filter; empty matches any.
    pub data_source_name: String,
}

impl WireMessage for DiscoveryRequest {
    const TEMPLATE_ID: u16 = 13;
    const BLOCK_LENGTH: u16 = 16;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.request_id);
        w.put_u32(self.client_id);
        w.put_u32(self.stream_id);
    }

    fn encode_var(&self, var: &mut WireWriter) {
        var.put_str(&self.data_source_name);
    }

    fn decode(b: &mut WireReader<'_>, var: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            request_id: b.get_u64()?,
            client_id: b.get_u32()?,
            stream_id: b.get_u32()?,
            data_source_name: var.get_str()?,
        })
    }
}

/// One stream listed by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEntry {
    /// Stream.
    pub stream_id: u32,
    /// Producer currently publishing.
    pub producer_id: u32,
    /// Producer epoch.
    pub epoch: u64,
    /// Layout version.
    pub layout_version: u32,
    /// Header ring slot count.
    pub header_nslots: u32,
    /// Header ring slot size.
    pub header_slot_bytes: u16,
    /// Maximum tensor rank.
    pub max_dims: u8,
    /// Data-source name.
    pub data_source_name: String,
    /// Header ring URI.
    pub header_region_uri: String,
}

/// Driver → client: discovery results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    /// Request id echoed from the request.
    pub request_id: u64,
    /// Outcome.
    pub code: ResponseCode,
    /// Matching streams.
    pub entries: Vec<DiscoveryEntry>,
}

impl WireMessage for DiscoveryResponse {
    const TEMPLATE_ID: u16 = 14;
    const BLOCK_LENGTH: u16 = 9;

    fn encode_block(&self, w: &mut WireWriter) {
        w.put_u64(self.request_id);
        w.put_u8(self.code as u8);
    }

    fn encode_var(&self, var: &mut WireWriter) {
        var.put_u32(self.entries.len() as u32);
        for e in &self.entries {
            var.put_u32(e.stream_id);
            var.put_u32(e.producer_id);
            var.put_u64(e.epoch);
            var.put_u32(e.layout_version);
            var.put_u32(e.header_nslots);
            var.put_u16(e.header_slot_bytes);
            var.put_u8(e.max_dims);
            var.put_str(&e.data_source_name);
            var.put_str(&e.header_region_uri);
        }
    }

    fn decode(b: &mut WireReader<'_>, var: &mut WireReader<'_>) -> Result<Self, WireError> {
        let request_id = b.get_u64()?;
        let code = ResponseCode::decode(b.get_u8()?)?;
        let count = var.get_count()?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(DiscoveryEntry {
                stream_id: var.get_u32()?,
                producer_id: var.get_u32()?,
                epoch: var.get_u64()?,
                layout_version: var.get_u32()?,
                header_nslots: var.get_u32()?,
                header_slot_bytes: var.get_u16()?,
                max_dims: var.get_u8()?,
                data_source_name: var.get_str()?,
                header_region_uri: var.get_str()?,
            });
        }
        Ok(Self {
            request_id,
            code,
            entries,
        })
    }
}
