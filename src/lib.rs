//! IR remote daemon library - decode, encode, and serve infrared remotes.
//!
//! This library exposes the core functionality of the `ird` daemon and
//! client for use in tests and potentially other applications.
//!
//! # Modules
//!
//! - `remote`: Remote profile data model (timing, flags, button codes)
//! - `config`: Remote-description configuration parser
//! - `codec`: Pulse/space signal decoding and encoding
//! - `hw`: Hardware adapter trait with mock and text backends
//! - `server`: Unix-socket protocol server and event loop
//! - `client`: Synchronous protocol client
//! - `error`: Error types with user-recoverable hints
#![forbid(unsafe_code)]

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod hw;
pub mod logging;
pub mod remote;
pub mod server;

/// Crate version, served by the protocol `VERSION` command.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
