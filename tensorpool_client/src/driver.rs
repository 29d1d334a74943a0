//! Driver control protocol.
//!
//! Correlated request/response exchanges with the driver process over the
//! `Control` channel: attach, detach, fire-and-forget keepalives, and the
//! asynchronous revocation / shutdown notifications that can arrive at any
//! time. All state lives in a [`DriverSession`] owned by the handle.
//!
//! Waiting is cooperative: the calling thread polls the transport until the
//! matching response arrives or the configured deadline passes.

pub mod lease;
pub mod session;
pub mod validate;

pub use lease::{HandleState, Lease};
pub use session::DriverSession;
pub use validate::{AttachExpectations, ExpectedPool, validate_attach_response};

use crate::error::{TpError, TpResult};
use crate::platform::monotonic_ns;
use crate::transport::{Channel, ControlTransport};
use std::sync::Arc;
use tp::config::ClientConfig;
use tp::control::{
    AttachRequest, AttachResponse, ControlMessage, DetachRequest, LeaseKeepalive, ResponseCode,
    Role, WireMessage,
};
use tracing::{debug, info, warn};

/// Lease plus the region layout granted by a successful attach.
#[derive(Debug, Clone)]
pub struct AttachGrant {
    /// Granted lease.
    pub lease: Lease,
    /// Validated response carrying region URIs and geometry.
    pub response: AttachResponse,
}

/// Client side of the driver control protocol for one handle.
pub struct DriverClient {
    transport: Arc<dyn ControlTransport>,
    config: ClientConfig,
    session: DriverSession,
}

impl DriverClient {
    /// New client over `transport`.
    ///
    /// # Errors
    /// `Arg` if `config` fails validation.
    pub fn new(transport: Arc<dyn ControlTransport>, config: ClientConfig) -> TpResult<Self> {
        config.validate()?;
        let session = DriverSession::new(config.client_id);
        Ok(Self {
            transport,
            config,
            session,
        })
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session state.
    pub fn session(&self) -> &DriverSession {
        &self.session
    }

    /// Publish a message on `channel`.
    pub fn publish<M: WireMessage>(&self, channel: Channel, msg: &M) -> TpResult<()> {
        self.transport.offer(channel, &msg.to_fragment())
    }

    /// Drain up to `control_poll_limit` fragments from `channel`.
    pub fn poll_channel(
        &self,
        channel: Channel,
        handler: &mut dyn FnMut(&[u8]),
    ) -> TpResult<usize> {
        self.transport
            .poll(channel, self.config.control_poll_limit, handler)
    }

    /// Attach to `stream_id` as `role`.
    ///
    /// Retransmits the request every `attach_retry_interval_ns` until a
    /// matching response arrives or `attach_timeout_ns` elapses.
    ///
    /// # Errors
    /// - `DriverShutdown` if the driver is gone
    /// - `Timeout` if no response arrived in time
    /// - `Rejected` / `Protocol` if the response is refused or invalid
    pub fn attach(
        &mut self,
        stream_id: u32,
        role: Role,
        exp: &AttachExpectations,
    ) -> TpResult<AttachGrant> {
        if self.session.is_shutdown() {
            return Err(TpError::DriverShutdown);
        }

        let correlation_id = self.session.next_correlation_id();
        let request = AttachRequest {
            correlation_id,
            stream_id,
            client_id: self.config.client_id,
            role,
            expected_layout_version: tp::consts::LAYOUT_VERSION,
            require_hugepages: exp.require_hugepages,
        }
        .to_fragment();

        info!(
            "Attaching client {} to stream {} as {:?}",
            self.config.client_id, stream_id, role
        );
        let response = self.await_reply(
            "attach",
            &request,
            self.config.attach_timeout_ns,
            Some(self.config.attach_retry_interval_ns),
            |msg| match msg {
                ControlMessage::AttachResponse(r) if r.correlation_id == correlation_id => Some(r),
                _ => None,
            },
        )?;

        if let Err(e) = validate_attach_response(&response, stream_id, exp) {
            warn!("Attach to stream {} failed: {}", stream_id, e);
            return Err(e);
        }

        let now = monotonic_ns();
        let lease = Lease {
            lease_id: response.lease_id,
            stream_id,
            client_id: self.config.client_id,
            role,
            epoch: response.epoch,
            expiry_ns: response.lease_expiry_ns,
            ttl_ns: response.lease_expiry_ns.saturating_sub(now),
        };
        self.session.set_last_keepalive_ns(now);
        info!(
            "Lease {} granted on stream {} (epoch {}, {} header slots, {} pools)",
            lease.lease_id,
            stream_id,
            lease.epoch,
            response.header_nslots,
            response.pools.len()
        );
        Ok(AttachGrant { lease, response })
    }

    /// Release `lease` and wait up to `detach_timeout_ns` for the driver.
    ///
    /// Safe to call on a revoked lease.
    pub fn detach(&mut self, lease: &Lease) -> TpResult<()> {
        if self.session.is_shutdown() {
            return Err(TpError::DriverShutdown);
        }

        let correlation_id = self.session.next_correlation_id();
        let request = DetachRequest {
            correlation_id,
            lease_id: lease.lease_id,
            stream_id: lease.stream_id,
            client_id: lease.client_id,
            role: lease.role,
        }
        .to_fragment();

        let response = self.await_reply(
            "detach",
            &request,
            self.config.detach_timeout_ns,
            None,
            |msg| match msg {
                ControlMessage::DetachResponse(r) if r.correlation_id == correlation_id => Some(r),
                _ => None,
            },
        )?;

        match response.code {
            ResponseCode::Ok => {
                info!("Lease {} detached", lease.lease_id);
                Ok(())
            }
            ResponseCode::Rejected => Err(TpError::Rejected {
                message: format!("detach of lease {} refused", lease.lease_id),
            }),
            ResponseCode::NotFound => Err(TpError::NotFound {
                what: format!("lease {}", lease.lease_id),
            }),
            ResponseCode::Unsupported => Err(TpError::Unsupported {
                reason: "detach".to_string(),
            }),
        }
    }

    /// Whether a keepalive is due at `now_ns`.
    pub fn keepalive_due(&self, now_ns: u64) -> bool {
        now_ns.saturating_sub(self.session.last_keepalive_ns())
            >= self.config.lease_keepalive_interval_ns
    }

    /// Publish a keepalive for `lease` and extend its local expiry.
    pub fn send_keepalive(&mut self, lease: &mut Lease, now_ns: u64) -> TpResult<()> {
        self.publish(
            Channel::Control,
            &LeaseKeepalive {
                lease_id: lease.lease_id,
                stream_id: lease.stream_id,
                client_id: lease.client_id,
                role: lease.role,
                timestamp_ns: now_ns,
            },
        )?;
        lease.refresh(now_ns);
        self.session.set_last_keepalive_ns(now_ns);
        Ok(())
    }

    /// Apply pending revocation / shutdown notifications.
    pub fn poll_control(&mut self) -> TpResult<usize> {
        let session = &mut self.session;
        self.transport.poll(
            Channel::Control,
            self.config.control_poll_limit,
            &mut |fragment| match ControlMessage::decode(fragment) {
                Ok(Some(msg)) => {
                    session.observe(&msg);
                }
                Ok(None) => {}
                Err(e) => debug!("Dropping malformed control fragment: {}", e),
            },
        )
    }

    /// Fail if `lease` was revoked or the driver shut down.
    pub fn check_lease(&self, lease: &Lease) -> TpResult<()> {
        self.session.check(lease)
    }

    fn await_reply<T>(
        &mut self,
        operation: &'static str,
        request: &[u8],
        timeout_ns: u64,
        retry_ns: Option<u64>,
        mut matcher: impl FnMut(ControlMessage) -> Option<T>,
    ) -> TpResult<T> {
        self.transport.offer(Channel::Control, request)?;
        let start = monotonic_ns();
        let deadline = start.saturating_add(timeout_ns);
        let mut next_retry = retry_ns.map(|r| start.saturating_add(r));

        loop {
            let mut reply = None;
            let session = &mut self.session;
            self.transport.poll(
                Channel::Control,
                self.config.control_poll_limit,
                &mut |fragment| match ControlMessage::decode(fragment) {
                    Ok(Some(msg)) => {
                        if !session.observe(&msg) && reply.is_none() {
                            reply = matcher(msg);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Dropping malformed control fragment: {}", e),
                },
            )?;

            if let Some(reply) = reply {
                return Ok(reply);
            }
            if self.session.is_shutdown() {
                return Err(TpError::DriverShutdown);
            }

            let now = monotonic_ns();
            if now >= deadline {
                warn!("{} timed out after {} ns", operation, timeout_ns);
                return Err(TpError::Timeout { operation });
            }
            if let (Some(at), Some(interval)) = (next_retry, retry_ns) {
                if now >= at {
                    debug!("Retransmitting {} request", operation);
                    self.transport.offer(Channel::Control, request)?;
                    next_retry = Some(now.saturating_add(interval));
                }
            }
            std::thread::yield_now();
        }
    }
}

impl std::fmt::Debug for DriverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverClient")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish()
    }
}
