//! Leases and handle state.

use tp::control::Role;

/// Time-bounded authorization for one client/role on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    /// Driver-assigned lease id.
    pub lease_id: u64,
    /// Stream the lease covers.
    pub stream_id: u32,
    /// Owning client.
    pub client_id: u32,
    /// Producer or consumer.
    pub role: Role,
    /// Producer epoch at grant time.
    pub epoch: u64,
    /// Local estimate of the expiry, monotonic nanoseconds.
    pub expiry_ns: u64,
    /// Lease duration granted by the driver.
    pub ttl_ns: u64,
}

impl Lease {
    /// Whether the local expiry estimate has passed.
    pub fn is_expired(&self, now_ns: u64) -> bool {
        now_ns >= self.expiry_ns
    }

    /// Extend the local expiry estimate by one TTL from `now_ns`.
    pub fn refresh(&mut self, now_ns: u64) {
        self.expiry_ns = now_ns.saturating_add(self.ttl_ns);
    }
}

/// Lifecycle state of a producer or consumer handle.
///
/// `Revoked` is terminal: the handle must be closed and re-attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Lease held, regions mapped.
    Attached,
    /// Lease revoked, driver shut down or protocol violated.
    Revoked,
}
