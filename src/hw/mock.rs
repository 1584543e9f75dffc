//! Mock transceiver for unit testing.
//!
//! Records every transmitted waveform for later assertion and feeds
//! queued samples to the receive path, with optional error injection.
//!
//! # Example
//!
//! ```rust,ignore
//! use rust_ir_daemon::hw::{HardwareAdapter, MockHardware};
//!
//! let hw = MockHardware::new();
//! hw.queue_samples(&captured);
//! // ... run the decoder against hw.read_next_sample(...)
//! hw.assert_sent_count(0);
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, trace};

use super::{Capabilities, HardwareAdapter};
use crate::codec::{RawSample, Waveform};
use crate::error::{IrdError, Result};

/// Mock transceiver for testing without hardware.
#[derive(Debug, Default)]
pub struct MockHardware {
    caps: Capabilities,
    rx_queue: Mutex<VecDeque<RawSample>>,
    sent: Mutex<Vec<Waveform>>,
    read_errors: Mutex<VecDeque<IrdError>>,
    send_errors: Mutex<VecDeque<IrdError>>,
}

impl MockHardware {
    /// A mock that can both send and receive.
    pub fn new() -> Self {
        debug!("creating mock transceiver");
        Self {
            caps: Capabilities {
                can_send: true,
                can_receive: true,
            },
            ..Default::default()
        }
    }

    /// A receive-only mock; `send` fails with `CannotSend`.
    pub fn receive_only() -> Self {
        Self {
            caps: Capabilities {
                can_send: false,
                can_receive: true,
            },
            ..Default::default()
        }
    }

    /// A send-only mock; reads fail with `CannotReceive`.
    pub fn send_only() -> Self {
        Self {
            caps: Capabilities {
                can_send: true,
                can_receive: false,
            },
            ..Default::default()
        }
    }

    /// Queue samples for the receive path.
    pub fn queue_samples(&self, samples: &[RawSample]) {
        self.rx_queue.lock().unwrap().extend(samples.iter().copied());
    }

    /// Queue a single gap-sized space, the usual signal terminator.
    pub fn queue_gap(&self, duration: u32) {
        self.queue_samples(&[RawSample::space(duration)]);
    }

    /// Pending (not yet read) sample count.
    pub fn pending(&self) -> usize {
        self.rx_queue.lock().unwrap().len()
    }

    /// All transmitted waveforms, in order.
    pub fn sent(&self) -> Vec<Waveform> {
        self.sent.lock().unwrap().clone()
    }

    /// Assert how many waveforms went out.
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_sent_count(&self, expected: usize) {
        let actual = self.sent.lock().unwrap().len();
        assert_eq!(actual, expected, "expected {expected} transmissions, saw {actual}");
    }

    /// Fail the next read with this error.
    pub fn inject_read_error(&self, error: IrdError) {
        self.read_errors.lock().unwrap().push_back(error);
    }

    /// Fail the next send with this error.
    pub fn inject_send_error(&self, error: IrdError) {
        self.send_errors.lock().unwrap().push_back(error);
    }

    /// Drop queued samples and the transmission log.
    pub fn clear(&self) {
        self.rx_queue.lock().unwrap().clear();
        self.sent.lock().unwrap().clear();
    }
}

impl HardwareAdapter for MockHardware {
    fn capabilities(&self) -> Capabilities {
        self.caps.clone()
    }

    fn read_next_sample(&self, _timeout: Duration) -> Result<Option<RawSample>> {
        if !self.caps.can_receive {
            return Err(IrdError::CannotReceive);
        }
        if let Some(err) = self.read_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let sample = self.rx_queue.lock().unwrap().pop_front();
        if let Some(s) = sample {
            trace!(?s, "mock sample read");
        }
        Ok(sample)
    }

    fn send(&self, waveform: &Waveform) -> Result<()> {
        if !self.caps.can_send {
            return Err(IrdError::CannotSend);
        }
        if let Some(err) = self.send_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        trace!(samples = waveform.samples.len(), gap = waveform.gap, "mock send");
        self.sent.lock().unwrap().push(waveform.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_receive_queue() {
        let hw = MockHardware::new();
        hw.queue_samples(&[RawSample::pulse(560), RawSample::space(1690)]);
        assert_eq!(hw.pending(), 2);

        let s = hw.read_next_sample(Duration::ZERO).unwrap();
        assert_eq!(s, Some(RawSample::pulse(560)));
        hw.read_next_sample(Duration::ZERO).unwrap();
        assert_eq!(hw.read_next_sample(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_mock_records_sends() {
        let hw = MockHardware::new();
        let wf = Waveform {
            samples: vec![RawSample::pulse(9000)],
            gap: 50_000,
            frequency: 38_000,
            duty_cycle: 50,
        };
        hw.send(&wf).unwrap();
        hw.assert_sent_count(1);
        assert_eq!(hw.sent()[0].gap, 50_000);
    }

    #[test]
    fn test_mock_capability_errors() {
        let rx = MockHardware::receive_only();
        let wf = Waveform {
            samples: vec![],
            gap: 0,
            frequency: 0,
            duty_cycle: 0,
        };
        assert!(matches!(rx.send(&wf), Err(IrdError::CannotSend)));

        let tx = MockHardware::send_only();
        assert!(matches!(
            tx.read_next_sample(Duration::ZERO),
            Err(IrdError::CannotReceive)
        ));
    }

    #[test]
    fn test_mock_error_injection() {
        let hw = MockHardware::new();
        hw.inject_read_error(IrdError::Hardware("device unplugged".to_string()));
        hw.queue_gap(50_000);
        assert!(hw.read_next_sample(Duration::ZERO).is_err());
        // The queue is intact after the injected failure.
        assert_eq!(hw.read_next_sample(Duration::ZERO).unwrap(), Some(RawSample::space(50_000)));
    }
}
