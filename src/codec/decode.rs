//! Match a captured sample buffer against the loaded profiles.
//!
//! Decoding walks the profile list in configuration order and runs one
//! backtracking state machine per profile: sync on the inter-signal gap,
//! try the repeat fast path, then lead / header / data bits / trailer /
//! foot, and finally validate the closing gap without consuming it (it
//! doubles as the next signal's sync gap). A failed attempt leaves the
//! attempted profile's decode state untouched; only a full success
//! updates bookkeeping (last entry, repeat count, toggle state, alternate
//! chains, remaining gap).

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::codec::{expect, gap_reached, Checkpoint, Level, RawSample, SampleCursor};
use crate::remote::{bit_reverse, low_bits, CodeSignal, ProfileSet, RemoteProfile};

/// Presses of the same button further apart than this start a new press
/// sequence instead of growing the repeat count.
pub const REPEAT_WINDOW: Duration = Duration::from_secs(1);

/// Pulse/space pairs skipped while hunting for the sync gap before a
/// profile attempt is abandoned.
const MAX_RESYNC_PAIRS: u32 = 4;

/// One decoded button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub remote: String,
    pub button: String,
    /// Reported code value; bit-reversed over the full composite width
    /// for `REVERSE` profiles, the entry index for raw profiles.
    pub code: u64,
    /// 0 for a fresh press, incremented for each repeat.
    pub repeat: u32,
}

/// Decode one captured signal. `last_remote` names the profile that
/// produced the previous successful decode, if any; it gets the repeat
/// fast path and the repeat-related leniencies.
pub fn decode(set: &mut ProfileSet, samples: &[RawSample], last_remote: Option<&str>) -> Option<Event> {
    for idx in 0..set.remotes.len() {
        let was_last = last_remote == Some(set.remotes[idx].name.as_str());
        let mut cur = SampleCursor::new(samples);
        if let Some(event) = try_profile(&mut set.remotes[idx], &mut cur, was_last) {
            debug!(
                remote = %event.remote,
                button = %event.button,
                code = %format_args!("{:016x}", event.code),
                repeat = event.repeat,
                "decoded signal"
            );
            return Some(event);
        }
    }
    trace!(samples = samples.len(), "no profile matched");
    for profile in &mut set.remotes {
        profile.state.reset_toggle_sequence();
    }
    None
}

fn try_profile(profile: &mut RemoteProfile, cur: &mut SampleCursor, was_last: bool) -> Option<Event> {
    sync(profile, cur, was_last)?;
    if was_last {
        if let Some(event) = try_repeat_frame(profile, cur) {
            return Some(event);
        }
    }
    if profile.flags.raw_codes {
        decode_raw(profile, cur, was_last)
    } else {
        decode_bits(profile, cur, was_last)
    }
}

/// Consume samples until a space at least as long as the expected
/// inter-signal gap goes by. A constant-length profile's leftover gap
/// shortens the expectation; so does the repeat gap when this profile
/// decoded the previous signal.
fn sync(profile: &RemoteProfile, cur: &mut SampleCursor, was_last: bool) -> Option<()> {
    let mut expected = profile.expected_gap();
    if was_last && profile.repeat_gap != 0 {
        expected = expected.min(profile.repeat_gap);
    }
    let mut skipped = 0u32;
    loop {
        let sample = cur.next()?;
        if !sample.is_pulse() && gap_reached(profile, sample.duration as u64, expected) {
            return Some(());
        }
        if sample.is_pulse() {
            skipped += 1;
            if skipped > MAX_RESYNC_PAIRS {
                return None;
            }
        }
    }
}

/// The repeat fast path: a profile with a dedicated repeat waveform and a
/// recent decode gets its repeat frame matched before any bit decoding.
fn try_repeat_frame(profile: &mut RemoteProfile, cur: &mut SampleCursor) -> Option<Event> {
    if !profile.repeat.is_defined() {
        return None;
    }
    let entry = profile.state.last_entry?;
    let button = profile.codes.get(entry)?.name.clone();
    let now = Instant::now();
    let recent = profile
        .state
        .last_event
        .is_some_and(|t| now.duration_since(t) < REPEAT_WINDOW);
    if !recent {
        return None;
    }

    let cp = cur.checkpoint();
    let consumed = {
        let mut d = Decoder::new(profile, cur);
        if d.match_repeat_body() && d.close() {
            Some(d.consumed)
        } else {
            None
        }
    };
    let Some(consumed) = consumed else {
        cur.rewind(cp);
        return None;
    };

    let state = &mut profile.state;
    state.repeat_count = state.repeat_count.saturating_add(1);
    state.last_event = Some(now);
    if profile.flags.const_length {
        state.remaining_gap = profile.gap.saturating_sub(consumed);
    }
    Some(Event {
        remote: profile.name.clone(),
        button,
        code: profile.state.last_code.unwrap_or(entry as u64),
        repeat: profile.state.repeat_count,
    })
}

fn decode_raw(profile: &mut RemoteProfile, cur: &mut SampleCursor, was_last: bool) -> Option<Event> {
    let start = cur.checkpoint();
    let mut matched: Option<(usize, u64)> = None;
    for idx in 0..profile.codes.len() {
        cur.rewind(start);
        let CodeSignal::Raw(ref durations) = profile.codes[idx].signal else {
            continue;
        };
        let mut d = Decoder::new(profile, cur);
        if d.match_durations(durations) && d.close() {
            matched = Some((idx, d.consumed));
            break;
        }
    }
    let (idx, consumed) = matched?;

    let now = Instant::now();
    finish_decode(profile, idx, consumed, was_last, now, idx as u64);
    Some(Event {
        remote: profile.name.clone(),
        button: profile.codes[idx].name.clone(),
        code: idx as u64,
        repeat: profile.state.repeat_count,
    })
}

fn decode_bits(profile: &mut RemoteProfile, cur: &mut SampleCursor, was_last: bool) -> Option<Event> {
    let total_bits = profile.total_bits();
    if total_bits == 0 || total_bits > 64 {
        return None;
    }
    let now = Instant::now();
    let recent = was_last
        && profile
            .state
            .last_event
            .is_some_and(|t| now.duration_since(t) < REPEAT_WINDOW);

    let (composite, consumed) = {
        let mut d = Decoder::new(profile, cur);
        d.match_signal(total_bits, recent)?
    };

    // Split the composite into its three declared spans and hold the
    // constant ones against the profile, ignoring toggle positions.
    let post = composite & low_bits(profile.post_data_bits);
    let main = (composite >> profile.post_data_bits) & low_bits(profile.bits);
    let pre = (composite >> (profile.post_data_bits + profile.bits)) & low_bits(profile.pre_data_bits);

    let keep_pre = !profile.pre_exclusion_mask() & low_bits(profile.pre_data_bits);
    if pre & keep_pre != profile.pre_data & keep_pre {
        trace!(remote = %profile.name, observed = %format_args!("{pre:x}"), "pre-data mismatch");
        return None;
    }
    let keep_post = !profile.post_exclusion_mask() & low_bits(profile.post_data_bits);
    if post & keep_post != profile.post_data & keep_post {
        trace!(remote = %profile.name, observed = %format_args!("{post:x}"), "post-data mismatch");
        return None;
    }

    // Toggle-mask remotes alternate between a value and the same value
    // XORed with the mask; each reception must echo the one two back.
    if profile.toggle_mask != 0 {
        if let Some(two_ago) = profile.state.toggle_history[1] {
            if composite != two_ago {
                trace!(remote = %profile.name, "toggle-mask sequence broken");
                return None;
            }
        }
    }

    let idx = profile.match_numeric(main, profile.main_exclusion_mask())?;

    // The toggle bit is excluded from matching and from the repeat
    // decision alike; transmitters flip it per press, so a held button
    // keeps incrementing the count regardless of its value. The observed
    // value is remembered only for encode-side substitution.
    let observed_toggle = composite & profile.toggle_bit_mask() != 0;

    let mut code = composite;
    if profile.flags.reverse {
        code = bit_reverse(code, total_bits);
    }

    finish_decode(profile, idx, consumed, was_last, now, code);
    let state = &mut profile.state;
    state.toggle_bit_state = observed_toggle;
    if profile.toggle_mask != 0 {
        state.toggle_history[1] = state.toggle_history[0];
        state.toggle_history[0] = Some(composite);
        state.toggle_mask_phase += 1;
        state.mid_toggle_sequence = state.toggle_mask_phase % 2 == 1;
    }

    Some(Event {
        remote: profile.name.clone(),
        button: profile.codes[idx].name.clone(),
        code,
        repeat: profile.state.repeat_count,
    })
}

/// Shared success bookkeeping: repeat counting, last-press fields and the
/// leftover gap of constant-length profiles.
fn finish_decode(
    profile: &mut RemoteProfile,
    entry: usize,
    consumed: u64,
    may_repeat: bool,
    now: Instant,
    code: u64,
) {
    let state = &mut profile.state;
    let is_repeat = may_repeat
        && state.last_entry == Some(entry)
        && state
            .last_event
            .is_some_and(|t| now.duration_since(t) < REPEAT_WINDOW);
    if is_repeat {
        state.repeat_count = state.repeat_count.saturating_add(1);
    } else {
        state.repeat_count = 0;
    }
    state.last_entry = Some(entry);
    state.last_event = Some(now);
    state.last_code = Some(code);
    state.remaining_gap = if profile.flags.const_length {
        profile.gap.saturating_sub(consumed)
    } else {
        0
    };
}

/// Saved decoder position: cursor plus the consumed-duration tally.
struct Mark {
    cp: Checkpoint,
    consumed: u64,
}

/// Per-attempt matcher over one profile's timing parameters. Tracks the
/// total duration consumed since the sync gap, which constant-length
/// profiles need for the closing-gap arithmetic.
struct Decoder<'p, 'c, 's> {
    p: &'p RemoteProfile,
    cur: &'c mut SampleCursor<'s>,
    consumed: u64,
}

impl<'p, 'c, 's> Decoder<'p, 'c, 's> {
    fn new(p: &'p RemoteProfile, cur: &'c mut SampleCursor<'s>) -> Self {
        Self {
            p,
            cur,
            consumed: 0,
        }
    }

    fn mark(&self) -> Mark {
        Mark {
            cp: self.cur.checkpoint(),
            consumed: self.consumed,
        }
    }

    fn rewind(&mut self, mark: Mark) {
        self.cur.rewind(mark.cp);
        self.consumed = mark.consumed;
    }

    /// Consume one sample of the given level matching `expected` exactly
    /// (within tolerance).
    fn take(&mut self, level: Level, expected: u32) -> bool {
        if expected == 0 {
            return true;
        }
        match self.cur.peek() {
            Some(s) if s.level == level && expect(self.p, s.duration, expected) => {
                self.cur.next();
                self.consumed += s.duration as u64;
                true
            }
            _ => false,
        }
    }

    /// Like [`Decoder::take`], but an over-long sample is split: the
    /// expected duration is consumed and the remainder pushed back. This
    /// is how merged samples (lead+header, biphase half-bits, a final
    /// space swallowed by the gap) come apart again.
    fn take_split(&mut self, level: Level, expected: u32) -> bool {
        if expected == 0 {
            return true;
        }
        match self.cur.peek() {
            Some(s) if s.level == level => {
                if expect(self.p, s.duration, expected) {
                    self.cur.next();
                    self.consumed += s.duration as u64;
                    true
                } else if s.duration > expected {
                    self.cur.next();
                    self.cur.unread(RawSample {
                        level,
                        duration: s.duration - expected,
                    });
                    self.consumed += expected as u64;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Leading pulse; splits off whatever it merged into (header or first
    /// data pulse).
    fn lead(&mut self) -> bool {
        if self.p.plead == 0 {
            return true;
        }
        self.take_split(Level::Pulse, self.p.plead)
    }

    /// Header, lead, repeat pair, trail.
    fn match_repeat_body(&mut self) -> bool {
        let p = self.p;
        if p.flags.repeat_header && p.header.is_defined() {
            if !(self.take(Level::Pulse, p.header.pulse) && self.take(Level::Space, p.header.space))
            {
                return false;
            }
        }
        // Lead and repeat pulse arrive merged.
        self.take(Level::Pulse, p.plead + p.repeat.pulse)
            && self.take(Level::Space, p.repeat.space)
            && self.take(Level::Pulse, p.ptrail)
    }

    /// Literal duration list of a raw entry, alternating starting with a
    /// pulse. A final space may have merged into the gap.
    fn match_durations(&mut self, durations: &[u32]) -> bool {
        for (i, &expected) in durations.iter().enumerate() {
            let level = if i % 2 == 0 { Level::Pulse } else { Level::Space };
            let last = i + 1 == durations.len();
            let ok = if last && level == Level::Space {
                self.take_split(level, expected)
            } else {
                self.take(level, expected)
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Lead, header, data bits, trailer and foot of a bit-coded signal.
    /// Returns the composite value and the consumed duration.
    fn match_signal(&mut self, total_bits: u32, header_may_be_suppressed: bool) -> Option<(u64, u64)> {
        let p = self.p;
        if !self.lead() {
            return None;
        }
        if p.header.is_defined() {
            let mark = self.mark();
            // The header space may carry a merged first biphase half.
            let ok = self.take(Level::Pulse, p.header.pulse)
                && self.take_split(Level::Space, p.header.space);
            if !ok {
                // NO_HEAD_REP repeats arrive without the header.
                if p.flags.no_head_rep && header_may_be_suppressed {
                    self.rewind(mark);
                } else {
                    return None;
                }
            }
        }

        // Only with nothing between the sync gap and the data can a
        // leading biphase space have vanished into the gap.
        let bare_start = p.plead == 0 && !p.header.is_defined();
        let has_trailing_pulse = p.ptrail != 0;
        let mut composite = 0u64;
        for i in 0..total_bits {
            let bit = if p.flags.shift_enc {
                self.bit_shift(i == 0 && bare_start)?
            } else if i + 1 == total_bits && !has_trailing_pulse {
                self.last_bit_space_enc()?
            } else {
                self.bit_space_enc()?
            };
            composite = composite << 1 | bit as u64;
        }

        if !self.take(Level::Pulse, p.ptrail) {
            return None;
        }
        if p.foot.is_defined()
            && !(self.take(Level::Space, p.foot.space) && self.take(Level::Pulse, p.foot.pulse))
        {
            return None;
        }
        if !self.close() {
            return None;
        }
        Some((composite, self.consumed))
    }

    fn bit_space_enc(&mut self) -> Option<u8> {
        let p = self.p;
        let mark = self.mark();
        if self.take(Level::Pulse, p.one.pulse) && self.take(Level::Space, p.one.space) {
            return Some(1);
        }
        self.rewind(mark);
        if self.take(Level::Pulse, p.zero.pulse) && self.take(Level::Space, p.zero.space) {
            return Some(0);
        }
        None
    }

    /// Final bit of a signal without a trailing pulse: its space has
    /// merged with whatever follows (the foot space or the gap). Both bit
    /// values are tried and the one whose remainder best matches the
    /// expected continuation wins.
    fn last_bit_space_enc(&mut self) -> Option<u8> {
        let p = self.p;
        let pulse = self.cur.next()?;
        if !pulse.is_pulse() {
            return None;
        }
        let space = self.cur.next()?;
        if space.is_pulse() {
            return None;
        }

        let mut best: Option<(u8, u32, u64)> = None;
        for (bit, pair) in [(1u8, p.one), (0u8, p.zero)] {
            if !expect(p, pulse.duration, pair.pulse) {
                continue;
            }
            let score = if p.foot.is_defined() {
                // Remainder must look like the foot space.
                if space.duration <= pair.space {
                    continue;
                }
                let rest = space.duration - pair.space;
                if !expect(p, rest, p.foot.space) {
                    continue;
                }
                rest.abs_diff(p.foot.space) as u64
            } else if expect(p, space.duration, pair.space) {
                // Unmerged: the capture ended right at the bit boundary.
                (space.duration.abs_diff(pair.space)) as u64
            } else if space.duration > pair.space {
                let rest = (space.duration - pair.space) as u64;
                let after = self.consumed + pulse.duration as u64 + pair.space as u64;
                let expected = self.expected_closing_gap(after)?;
                if !gap_reached(p, rest, expected) {
                    continue;
                }
                rest.abs_diff(expected)
            } else {
                continue;
            };
            if best.is_none_or(|(_, _, s)| score < s) {
                best = Some((bit, pair.space, score));
            }
        }

        let (bit, bit_space, _) = best?;
        self.consumed += pulse.duration as u64 + bit_space as u64;
        if space.duration > bit_space {
            self.cur.unread(RawSample::space(space.duration - bit_space));
        }
        Some(bit)
    }

    /// One biphase bit. A one is space-then-pulse, a zero pulse-then-
    /// space; either half may be merged with its neighbor. The leading
    /// space of a one-bit at the start of the data is invisible, absorbed
    /// by the sync gap.
    fn bit_shift(&mut self, first: bool) -> Option<u8> {
        let p = self.p;
        let mark = self.mark();
        if self.take_half(Level::Space, p.one.space, first)
            && self.take_half(Level::Pulse, p.one.pulse, false)
        {
            return Some(1);
        }
        self.rewind(mark);
        if self.take_half(Level::Pulse, p.zero.pulse, false)
            && self.take_half(Level::Space, p.zero.space, false)
        {
            return Some(0);
        }
        None
    }

    /// Closing-gap check. The gap is peeked, never consumed: it doubles
    /// as the sync gap of the next signal. An exhausted capture counts as
    /// an arbitrarily long gap.
    fn close(&mut self) -> bool {
        let Some(expected) = self.expected_closing_gap(self.consumed) else {
            return false;
        };
        match self.cur.peek() {
            None => true,
            Some(s) if !s.is_pulse() => gap_reached(self.p, s.duration as u64, expected),
            Some(_) => false,
        }
    }

    /// Gap expected after `consumed` microseconds of signal; `None` when
    /// a constant-length signal already overran its declared total.
    fn expected_closing_gap(&self, consumed: u64) -> Option<u64> {
        let p = self.p;
        if p.flags.const_length {
            p.gap.checked_sub(consumed)
        } else if p.repeat_gap != 0 {
            Some(p.gap.min(p.repeat_gap))
        } else {
            Some(p.gap)
        }
    }

    /// Consume one biphase half-bit, splitting merged double-width
    /// samples. With `allow_phantom`, a missing space (swallowed by the
    /// sync gap) in front of a pulse counts as present.
    fn take_half(&mut self, level: Level, expected: u32, allow_phantom: bool) -> bool {
        match self.cur.peek() {
            Some(s) if s.level == level => {
                if expect(self.p, s.duration, expected) {
                    self.cur.next();
                    self.consumed += s.duration as u64;
                    true
                } else if s.duration > expected {
                    self.cur.next();
                    self.cur.unread(RawSample {
                        level,
                        duration: s.duration - expected,
                    });
                    self.consumed += expected as u64;
                    true
                } else {
                    false
                }
            }
            Some(_) => allow_phantom,
            None => false,
        }
    }
}
