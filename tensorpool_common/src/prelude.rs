//! Prelude module for common re-exports.
//!
//! `use tensorpool_common::prelude::*;` brings in the layout types, the
//! message codec and the configuration types most callers need.

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ClientConfig, ConfigError, ConfigLoader, SharedConfig, TensorPoolConfig};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{HEADER_SLOT_BYTES, LAYOUT_VERSION, MAX_DIMS, SUPERBLOCK_SIZE};

// ─── Shared Memory Layouts ──────────────────────────────────────────
pub use crate::shm::LayoutError;
pub use crate::shm::slot::{Dtype, MajorOrder, ProgressUnit, SlotHeader, TensorHeader};
pub use crate::shm::superblock::{RegionType, Superblock};
pub use crate::shm::uri::{ShmUri, UriError};

// ─── Control Plane ──────────────────────────────────────────────────
pub use crate::control::{ConsumerMode, ControlMessage, ProgressState, Role, WireError, WireMessage};
