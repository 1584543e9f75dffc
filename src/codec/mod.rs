//! IR signal codec: raw samples, tolerance matching, and the cursor /
//! builder plumbing shared by [`decode`] and [`encode`].
//!
//! A signal on the wire is a sequence of alternating pulse and space
//! durations in microseconds. Hardware merges adjacent durations of the
//! same level into one sample, so the decoder has to be able to consume a
//! sample partially (splitting off a remainder), and the encoder has to
//! merge what it emits.

pub mod decode;
pub mod encode;

pub use decode::{decode, Event};
pub use encode::{encode, Waveform};

use crate::remote::RemoteProfile;

/// Carrier level of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Pulse,
    Space,
}

/// One timed sample: carrier on (pulse) or off (space) for `duration`
/// microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub level: Level,
    pub duration: u32,
}

impl RawSample {
    pub const fn pulse(duration: u32) -> Self {
        Self {
            level: Level::Pulse,
            duration,
        }
    }

    pub const fn space(duration: u32) -> Self {
        Self {
            level: Level::Space,
            duration,
        }
    }

    pub const fn is_pulse(&self) -> bool {
        matches!(self.level, Level::Pulse)
    }
}

/// Symmetric tolerance check: `observed` matches `expected` when the two
/// are equal, or differ by less than `expected * eps%`, or differ by less
/// than `aeps` microseconds.
pub fn within(observed: u32, expected: u32, eps: u32, aeps: u32) -> bool {
    if observed == expected {
        return true;
    }
    let delta = observed.abs_diff(expected) as u64;
    delta * 100 < expected as u64 * eps as u64 || delta < aeps as u64
}

/// [`within`] using a profile's declared tolerances.
pub fn expect(profile: &RemoteProfile, observed: u32, expected: u32) -> bool {
    within(observed, expected, profile.eps, profile.aeps)
}

/// One-sided tolerance check for gaps: `observed` is at least `expected`,
/// give or take the profile's tolerance. A longer-than-expected gap is
/// always fine.
pub fn gap_reached(profile: &RemoteProfile, observed: u64, expected: u64) -> bool {
    let slack = (expected * profile.eps as u64 / 100).max(profile.aeps as u64);
    observed + slack >= expected
}

/// Saved position of a [`SampleCursor`], restored by
/// [`SampleCursor::rewind`].
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pos: usize,
    partial: Option<RawSample>,
}

/// Read cursor over a captured sample buffer with backtracking.
///
/// `unread` pushes a sample back in front of the cursor; the decoder uses
/// it to return the unconsumed remainder after splitting a merged sample.
#[derive(Debug)]
pub struct SampleCursor<'a> {
    samples: &'a [RawSample],
    pos: usize,
    partial: Option<RawSample>,
}

impl<'a> SampleCursor<'a> {
    pub fn new(samples: &'a [RawSample]) -> Self {
        Self {
            samples,
            pos: 0,
            partial: None,
        }
    }

    /// Consume and return the next sample.
    pub fn next(&mut self) -> Option<RawSample> {
        if let Some(sample) = self.partial.take() {
            return Some(sample);
        }
        let sample = self.samples.get(self.pos).copied()?;
        self.pos += 1;
        Some(sample)
    }

    /// Look at the next sample without consuming it.
    pub fn peek(&self) -> Option<RawSample> {
        self.partial.or_else(|| self.samples.get(self.pos).copied())
    }

    /// Push a sample back in front of the cursor. Only one pushed-back
    /// sample is held at a time; the decoder never needs more.
    pub fn unread(&mut self, sample: RawSample) {
        debug_assert!(self.partial.is_none());
        self.partial = Some(sample);
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            partial: self.partial,
        }
    }

    pub fn rewind(&mut self, cp: Checkpoint) {
        self.pos = cp.pos;
        self.partial = cp.partial;
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_none() && self.pos >= self.samples.len()
    }
}

/// Accumulates an outgoing waveform, merging adjacent durations of the
/// same level the way real hardware would observe them.
#[derive(Debug, Default)]
pub struct WaveformBuilder {
    samples: Vec<RawSample>,
}

impl WaveformBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: Level, duration: u32) {
        if duration == 0 {
            return;
        }
        if let Some(last) = self.samples.last_mut() {
            if last.level == level {
                last.duration = last.duration.saturating_add(duration);
                return;
            }
        }
        self.samples.push(RawSample { level, duration });
    }

    pub fn pulse(&mut self, duration: u32) {
        self.push(Level::Pulse, duration);
    }

    pub fn space(&mut self, duration: u32) {
        self.push(Level::Space, duration);
    }

    /// Sum of all durations pushed so far, in microseconds.
    pub fn total(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    pub fn finish(self) -> Vec<RawSample> {
        self.samples
    }
}
