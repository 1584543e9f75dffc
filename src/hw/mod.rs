//! Hardware abstraction layer for IR transceivers.
//!
//! This module provides a trait-based abstraction over real capture
//! hardware, text-format captures, and mock implementations, enabling
//! testability without a transceiver attached.

pub mod mock;
pub mod text;

pub use mock::MockHardware;
pub use text::TextHardware;

use std::time::Duration;

use crate::codec::{RawSample, Waveform};
use crate::error::Result;

/// What a transceiver can do.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub can_send: bool,
    pub can_receive: bool,
}

/// Core transceiver operations trait.
///
/// Methods take `&self`; implementations use interior mutability so one
/// adapter can be shared between the receive poller and the transmit
/// path of the single-threaded server.
pub trait HardwareAdapter {
    /// Describe the adapter.
    fn capabilities(&self) -> Capabilities;

    /// Read the next pulse/space sample, waiting at most `timeout`.
    ///
    /// `Ok(None)` means nothing arrived within the timeout. Adapters
    /// that cannot receive return [`crate::error::IrdError::CannotReceive`].
    fn read_next_sample(&self, timeout: Duration) -> Result<Option<RawSample>>;

    /// Transmit a complete waveform, honoring its carrier hints.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter cannot transmit or the hardware
    /// rejects the signal.
    fn send(&self, waveform: &Waveform) -> Result<()>;
}
