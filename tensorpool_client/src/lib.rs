//! # Tensorpool Client Runtime
//!
//! Producer and consumer handles for shared-memory tensor streams. Frames
//! travel through memory-mapped header rings and payload pools guarded by a
//! per-slot seqlock; a small pub/sub control plane carries everything else
//! (attach, lease keepalive, detach, revocation, QoS, metadata, discovery).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐   attach / keepalive / detach   ┌─────────────┐
//! │  Producer   │◄──────── control plane ────────►│   Driver    │
//! └──────┬──────┘                                 └──────┬──────┘
//!        │ claim / commit                                │ creates
//!        ▼                                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ header ring  [superblock | slot 0 | slot 1 | ... | slot N-1] │
//! │ payload pool [superblock | slot 0 | slot 1 | ... | slot N-1] │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲ seqlock read
//! ┌──────┴──────┐
//! │  Consumer   │  drops_gap / drops_late, epoch tracking
//! └─────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. A handle attaches through [`driver::DriverClient`] and receives a
//!    [`driver::Lease`] plus the URIs of its regions.
//! 2. Every region is mapped and its superblock validated
//!    ([`region::validate_superblock`]) before a slot is touched.
//! 3. The producer publishes frames with [`Producer::offer_frame`] (or
//!    claim / fill / commit); consumers poll [`Consumer::try_read_frame`].
//! 4. Both sides call `do_work` periodically for keepalives, announces,
//!    QoS and revocation handling.
//! 5. A revoked lease, a driver shutdown or a producer epoch change makes the
//!    handle terminally revoked; close it and attach again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tensorpool_client::{AttachExpectations, Consumer, LoopbackBus, TpError};
//! use tp::config::ClientConfig;
//! use tp::control::ConsumerMode;
//!
//! # fn main() -> Result<(), TpError> {
//! let bus = LoopbackBus::new();
//! let mut consumer = Consumer::attach(
//!     Arc::new(bus.connect()),
//!     ClientConfig::default(),
//!     1,
//!     ConsumerMode::Stream,
//!     &AttachExpectations::any(),
//! )?;
//! loop {
//!     consumer.do_work()?;
//!     match consumer.try_read_frame() {
//!         Ok(frame) => println!("frame {} ({} bytes)", frame.seq(), frame.payload_len()),
//!         Err(e) if e.is_retryable() => std::thread::yield_now(),
//!         Err(e) => return Err(e),
//!     }
//! }
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - Handles are `Send` and owned by one thread; there are no background threads
//! - Producer and consumers synchronize only through the seqlock
//! - [`LoopbackBus`] endpoints may live on different threads

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod consumer;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod metadata;
pub mod platform;
pub mod producer;
pub mod qos;
pub mod region;
pub mod seqlock;
pub mod transport;

pub use cache::LatestTable;
pub use consumer::{Consumer, FrameView};
pub use discovery::{DiscoveryClient, DiscoveryResult};
pub use driver::{
    AttachExpectations, AttachGrant, DriverClient, DriverSession, HandleState, Lease,
};
pub use error::{ErrorCode, TpError, TpResult};
pub use metadata::MetadataCache;
pub use producer::{Dirty, Producer, SlotClaim, SourceMetadata};
pub use qos::QosMonitor;
pub use region::{Region, RegionAccess, RegionExpectations, StreamRegions};
pub use transport::{Channel, ControlTransport, LoopbackBus, LoopbackTransport};

use tp::config::LogLevel;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides `level` when set. Calling twice is harmless.
pub fn init_tracing(level: LogLevel) {
    use tracing_subscriber::{EnvFilter, fmt};

    let fallback = match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
