//! Control-plane wire format.
//!
//! Fragments carry one message each: an 8-byte header, a fixed block and
//! optional variable data. [`ControlMessage::decode`] applies the inbound
//! filter and dispatches on `template_id`.

pub mod codec;
pub mod messages;

pub use codec::{HEADER_LEN, MessageHeader, WireError, WireMessage, WireReader, WireWriter};
pub use messages::{
    AttachRequest, AttachResponse, Attribute, ConsumerMode, DataSourceMeta, DetachRequest,
    DetachResponse, DiscoveryEntry, DiscoveryRequest, DiscoveryResponse, DriverShutdown,
    FrameProgress, LeaseKeepalive, LeaseRevoked, PoolDescriptor, ProgressState, QosConsumer,
    QosProducer, ResponseCode, Role, ShmPoolAnnounce,
};

use crate::consts::{SCHEMA_ID, SCHEMA_VERSION};
use codec::decode_body;

/// Any decoded control-plane message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    AttachRequest(AttachRequest),
    AttachResponse(AttachResponse),
    DetachRequest(DetachRequest),
    DetachResponse(DetachResponse),
    LeaseKeepalive(LeaseKeepalive),
    LeaseRevoked(LeaseRevoked),
    DriverShutdown(DriverShutdown),
    ShmPoolAnnounce(ShmPoolAnnounce),
    QosProducer(QosProducer),
    QosConsumer(QosConsumer),
    DataSourceMeta(DataSourceMeta),
    FrameProgress(FrameProgress),
    DiscoveryRequest(DiscoveryRequest),
    DiscoveryResponse(DiscoveryResponse),
}

impl ControlMessage {
    /// Decode any known template.
    ///
    /// Returns `Ok(None)` for foreign schemas, newer versions, unknown
    /// templates and runt fragments.
    pub fn decode(fragment: &[u8]) -> Result<Option<Self>, WireError> {
        let Some(h) = MessageHeader::peek(fragment) else {
            return Ok(None);
        };
        if h.schema_id != SCHEMA_ID || h.version > SCHEMA_VERSION {
            return Ok(None);
        }
        let msg = match h.template_id {
            AttachRequest::TEMPLATE_ID => Self::AttachRequest(decode_body(h, fragment)?),
            AttachResponse::TEMPLATE_ID => Self::AttachResponse(decode_body(h, fragment)?),
            DetachRequest::TEMPLATE_ID => Self::DetachRequest(decode_body(h, fragment)?),
            DetachResponse::TEMPLATE_ID => Self::DetachResponse(decode_body(h, fragment)?),
            LeaseKeepalive::TEMPLATE_ID => Self::LeaseKeepalive(decode_body(h, fragment)?),
            LeaseRevoked::TEMPLATE_ID => Self::LeaseRevoked(decode_body(h, fragment)?),
            DriverShutdown::TEMPLATE_ID => Self::DriverShutdown(decode_body(h, fragment)?),
            ShmPoolAnnounce::TEMPLATE_ID => Self::ShmPoolAnnounce(decode_body(h, fragment)?),
            QosProducer::TEMPLATE_ID => Self::QosProducer(decode_body(h, fragment)?),
            QosConsumer::TEMPLATE_ID => Self::QosConsumer(decode_body(h, fragment)?),
            DataSourceMeta::TEMPLATE_ID => Self::DataSourceMeta(decode_body(h, fragment)?),
            FrameProgress::TEMPLATE_ID => Self::FrameProgress(decode_body(h, fragment)?),
            DiscoveryRequest::TEMPLATE_ID => Self::DiscoveryRequest(decode_body(h, fragment)?),
            DiscoveryResponse::TEMPLATE_ID => Self::DiscoveryResponse(decode_body(h, fragment)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }

    /// Encode as a fragment.
    pub fn to_fragment(&self) -> Vec<u8> {
        match self {
            Self::AttachRequest(m) => m.to_fragment(),
            Self::AttachResponse(m) => m.to_fragment(),
            Self::DetachRequest(m) => m.to_fragment(),
            Self::DetachResponse(m) => m.to_fragment(),
            Self::LeaseKeepalive(m) => m.to_fragment(),
            Self::LeaseRevoked(m) => m.to_fragment(),
            Self::DriverShutdown(m) => m.to_fragment(),
            Self::ShmPoolAnnounce(m) => m.to_fragment(),
            Self::QosProducer(m) => m.to_fragment(),
            Self::QosConsumer(m) => m.to_fragment(),
            Self::DataSourceMeta(m) => m.to_fragment(),
            Self::FrameProgress(m) => m.to_fragment(),
            Self::DiscoveryRequest(m) => m.to_fragment(),
            Self::DiscoveryResponse(m) => m.to_fragment(),
        }
    }
}
