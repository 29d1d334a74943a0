//! Per-connection driver state.

use super::lease::Lease;
use crate::error::{TpError, TpResult};
use heapless::Vec as HVec;
use tp::control::{ControlMessage, Role};
use tracing::warn;

/// Revocation records kept per session; the oldest is forgotten first.
pub const REVOCATION_CAPACITY: usize = 32;

/// Driver state owned by one client handle.
///
/// Correlation ids carry the client id in their upper half so responses on a
/// shared control channel cannot be mistaken for another client's.
#[derive(Debug)]
pub struct DriverSession {
    client_id: u32,
    next_correlation: u32,
    revoked: HVec<(u64, Role), REVOCATION_CAPACITY>,
    shutdown: bool,
    last_keepalive_ns: u64,
}

impl DriverSession {
    /// Fresh session for `client_id`.
    pub fn new(client_id: u32) -> Self {
        Self {
            client_id,
            next_correlation: 1,
            revoked: HVec::new(),
            shutdown: false,
            last_keepalive_ns: 0,
        }
    }

    /// Allocate the next correlation id.
    pub fn next_correlation_id(&mut self) -> u64 {
        let id = ((self.client_id as u64) << 32) | self.next_correlation as u64;
        self.next_correlation = self.next_correlation.wrapping_add(1).max(1);
        id
    }

    /// Apply revocation / shutdown notifications. Returns `true` if consumed.
    pub fn observe(&mut self, msg: &ControlMessage) -> bool {
        match msg {
            ControlMessage::LeaseRevoked(r) => {
                warn!(
                    "Lease {} ({:?}) on stream {} revoked, reason {}",
                    r.lease_id, r.role, r.stream_id, r.reason
                );
                self.record_revocation(r.lease_id, r.role);
                true
            }
            ControlMessage::DriverShutdown(s) => {
                if !self.shutdown {
                    warn!("Driver shutdown observed, reason {}", s.reason);
                }
                self.shutdown = true;
                true
            }
            _ => false,
        }
    }

    /// Remember that `(lease_id, role)` was revoked.
    pub fn record_revocation(&mut self, lease_id: u64, role: Role) {
        if self.is_revoked(lease_id, role) {
            return;
        }
        if self.revoked.is_full() {
            self.revoked.remove(0);
        }
        let _ = self.revoked.push((lease_id, role));
    }

    /// Whether `(lease_id, role)` was revoked.
    pub fn is_revoked(&self, lease_id: u64, role: Role) -> bool {
        self.revoked.iter().any(|&(id, r)| id == lease_id && r == role)
    }

    /// Whether the driver announced shutdown.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Fail if `lease` was revoked or the driver is gone.
    pub fn check(&self, lease: &Lease) -> TpResult<()> {
        if self.is_revoked(lease.lease_id, lease.role) {
            return Err(TpError::Revoked {
                lease_id: lease.lease_id,
            });
        }
        if self.shutdown {
            return Err(TpError::DriverShutdown);
        }
        Ok(())
    }

    /// Last keepalive (or grant) time.
    pub fn last_keepalive_ns(&self) -> u64 {
        self.last_keepalive_ns
    }

    pub(crate) fn set_last_keepalive_ns(&mut self, now_ns: u64) {
        self.last_keepalive_ns = now_ns;
    }
}
