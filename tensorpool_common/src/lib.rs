//! Tensorpool Common Library
//!
//! This crate provides the layouts, wire codec and configuration shared by
//! every tensorpool workspace crate.
//!
//! # Module Structure
//!
//! - [`consts`] - Layout sizes, protocol identifiers and NULL sentinels
//! - [`shm`] - Superblock, header-ring slot and region URI layouts
//! - [`control`] - Control-plane message header, codec and message bodies
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! tp = { package = "tensorpool_common", path = "../tensorpool_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use tensorpool_common::shm::slot::{Dtype, TensorHeader};
//! use tensorpool_common::control::{ControlMessage, WireMessage};
//! ```

pub mod config;
pub mod consts;
pub mod control;
pub mod prelude;
pub mod shm;
