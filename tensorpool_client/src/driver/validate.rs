//! Attach-response validation.
//!
//! Nothing from an attach response is mapped until every field has been
//! checked here; a failure is fatal to that attach only.

use crate::error::{TpError, TpResult};
use tp::consts::{
    CACHE_LINE_SIZE, HEADER_SLOT_BYTES, LAYOUT_VERSION, MAX_DIMS, NULL_U8, NULL_U16, NULL_U32,
    NULL_U64,
};
use tp::control::{AttachResponse, ResponseCode};

/// Pool geometry the caller is prepared to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedPool {
    /// Pool id.
    pub pool_id: u16,
    /// Required stride.
    pub stride_bytes: u32,
}

/// Caller-side expectations checked against an attach response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachExpectations {
    /// Required header ring size; `None` accepts any.
    pub header_nslots: Option<u32>,
    /// Required pools; empty accepts any valid geometry.
    pub pools: Vec<ExpectedPool>,
    /// Ask the driver for huge-page backed regions.
    pub require_hugepages: bool,
}

impl AttachExpectations {
    /// Accept whatever valid geometry the driver grants.
    pub fn any() -> Self {
        Self::default()
    }

    /// Require a header ring of `nslots`.
    pub fn with_header_nslots(mut self, nslots: u32) -> Self {
        self.header_nslots = Some(nslots);
        self
    }

    /// Require pool `pool_id` with `stride_bytes`.
    pub fn with_pool(mut self, pool_id: u16, stride_bytes: u32) -> Self {
        self.pools.push(ExpectedPool {
            pool_id,
            stride_bytes,
        });
        self
    }
}

fn missing(field: &str) -> TpError {
    TpError::protocol(format!("attach response missing {field}"))
}

/// Validate an attach response for `stream_id`.
///
/// # Errors
/// - `Rejected` / `NotFound` / `Unsupported` for a non-OK response code
/// - `Protocol` for a NULL required field, empty header URI, no pools,
///   an expected pool left out, or any geometry inconsistent with this
///   layout or with `exp`
pub fn validate_attach_response(
    resp: &AttachResponse,
    stream_id: u32,
    exp: &AttachExpectations,
) -> TpResult<()> {
    match resp.code {
        ResponseCode::Ok => {}
        ResponseCode::Rejected => {
            return Err(TpError::Rejected {
                message: resp.error_message.clone(),
            });
        }
        ResponseCode::NotFound => {
            return Err(TpError::NotFound {
                what: format!("stream {stream_id}: {}", resp.error_message),
            });
        }
        ResponseCode::Unsupported => {
            return Err(TpError::Unsupported {
                reason: resp.error_message.clone(),
            });
        }
    }

    if resp.lease_id == NULL_U64 {
        return Err(missing("lease_id"));
    }
    if resp.stream_id == NULL_U32 {
        return Err(missing("stream_id"));
    }
    if resp.epoch == NULL_U64 {
        return Err(missing("epoch"));
    }
    if resp.layout_version == NULL_U32 {
        return Err(missing("layout_version"));
    }
    if resp.header_nslots == NULL_U32 {
        return Err(missing("header_nslots"));
    }
    if resp.header_slot_bytes == NULL_U16 {
        return Err(missing("header_slot_bytes"));
    }
    if resp.max_dims == NULL_U8 {
        return Err(missing("max_dims"));
    }
    if resp.header_region_uri.is_empty() {
        return Err(missing("header_region_uri"));
    }
    if resp.pools.is_empty() {
        return Err(missing("pools"));
    }

    if resp.stream_id != stream_id {
        return Err(TpError::protocol(format!(
            "attach response for stream {} (requested {stream_id})",
            resp.stream_id
        )));
    }
    if resp.layout_version != LAYOUT_VERSION {
        return Err(TpError::protocol(format!(
            "unsupported layout_version {}",
            resp.layout_version
        )));
    }
    if resp.max_dims as usize > MAX_DIMS {
        return Err(TpError::protocol(format!(
            "max_dims {} exceeds {MAX_DIMS}",
            resp.max_dims
        )));
    }
    if resp.header_slot_bytes as u32 != HEADER_SLOT_BYTES {
        return Err(TpError::protocol(format!(
            "header_slot_bytes {} != {HEADER_SLOT_BYTES}",
            resp.header_slot_bytes
        )));
    }
    if resp.header_nslots == 0 {
        return Err(TpError::protocol("header_nslots is zero"));
    }
    if let Some(nslots) = exp.header_nslots {
        if resp.header_nslots != nslots {
            return Err(TpError::protocol(format!(
                "header_nslots {} != expected {nslots}",
                resp.header_nslots
            )));
        }
    }

    for (i, pool) in resp.pools.iter().enumerate() {
        if pool.region_uri.is_empty() {
            return Err(TpError::protocol(format!(
                "pool {} has no region URI",
                pool.pool_id
            )));
        }
        if pool.nslots != resp.header_nslots {
            return Err(TpError::protocol(format!(
                "pool {} nslots {} != header_nslots {}",
                pool.pool_id, pool.nslots, resp.header_nslots
            )));
        }
        if pool.stride_bytes == 0 || pool.stride_bytes as usize % CACHE_LINE_SIZE != 0 {
            return Err(TpError::protocol(format!(
                "pool {} stride {} is not a non-zero multiple of {CACHE_LINE_SIZE}",
                pool.pool_id, pool.stride_bytes
            )));
        }
        if resp.pools[..i].iter().any(|p| p.pool_id == pool.pool_id) {
            return Err(TpError::protocol(format!(
                "duplicate pool id {}",
                pool.pool_id
            )));
        }
        if !exp.pools.is_empty()
            && !exp
                .pools
                .iter()
                .any(|e| e.pool_id == pool.pool_id && e.stride_bytes == pool.stride_bytes)
        {
            return Err(TpError::protocol(format!(
                "pool {} stride {} not among expected pools",
                pool.pool_id, pool.stride_bytes
            )));
        }
    }
    if let Some(absent) = exp.pools.iter().find(|e| {
        !resp
            .pools
            .iter()
            .any(|p| p.pool_id == e.pool_id && p.stride_bytes == e.stride_bytes)
    }) {
        return Err(TpError::protocol(format!(
            "expected pool {} stride {} not granted",
            absent.pool_id, absent.stride_bytes
        )));
    }
    Ok(())
}
