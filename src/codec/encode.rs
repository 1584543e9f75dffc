//! Turn a button entry into a transmit waveform.

use std::time::Instant;

use crate::codec::{RawSample, WaveformBuilder};
use crate::error::{IrdError, Result};
use crate::remote::{low_bits, CodeSignal, RemoteProfile};

/// A ready-to-transmit signal: samples, the gap to honor before the next
/// transmission, and carrier hints for the transmitter.
#[derive(Debug, Clone)]
pub struct Waveform {
    pub samples: Vec<RawSample>,
    /// Quiet time in microseconds after the last sample.
    pub gap: u64,
    /// Carrier frequency in Hz, 0 for the hardware default.
    pub frequency: u32,
    /// Carrier duty cycle in percent, 0 for the hardware default.
    pub duty_cycle: u32,
}

/// Encode one transmission of `entry`.
///
/// A fresh press (`repeat_frame == false`) flips the toggle bit, uses the
/// entry's current alternate and advances the chain. A repeat frame emits
/// the dedicated repeat waveform when the profile has one, otherwise a
/// full signal with header/foot suppressed per the profile flags, reusing
/// the alternate of the press being repeated.
pub fn encode(profile: &mut RemoteProfile, entry: usize, repeat_frame: bool) -> Result<Waveform> {
    let signal = profile
        .codes
        .get(entry)
        .map(|e| e.signal.clone())
        .ok_or_else(|| IrdError::UnknownButton {
            remote: profile.name.clone(),
            button: format!("#{entry}"),
        })?;

    let samples = match signal {
        CodeSignal::Raw(durations) => raw_waveform(&durations),
        CodeSignal::Numeric {
            alternates,
            current,
        } => {
            let pos = if repeat_frame {
                (current + alternates.len() - 1) % alternates.len()
            } else {
                current
            };
            let code = alternates.get(pos).copied().unwrap_or(0);
            bit_waveform(profile, code, repeat_frame)
        }
    };

    let total: u64 = samples.iter().map(|s| s.duration as u64).sum();
    let gap = closing_gap(profile, total, repeat_frame)?;

    let state = &mut profile.state;
    state.remaining_gap = gap;
    state.last_event = Some(Instant::now());
    state.last_entry = Some(entry);
    if repeat_frame {
        state.repeat_count = state.repeat_count.saturating_add(1);
    } else {
        state.repeat_count = 0;
        profile.advance_alternate(entry);
    }

    Ok(Waveform {
        samples,
        gap,
        frequency: profile.frequency,
        duty_cycle: profile.duty_cycle,
    })
}

fn raw_waveform(durations: &[u32]) -> Vec<RawSample> {
    let mut b = WaveformBuilder::new();
    for (i, &d) in durations.iter().enumerate() {
        if i % 2 == 0 {
            b.pulse(d);
        } else {
            b.space(d);
        }
    }
    b.finish()
}

/// Build the composite pre+main+post value, apply toggle substitutions,
/// and emit it bit by bit.
fn bit_waveform(profile: &mut RemoteProfile, code: u64, repeat_frame: bool) -> Vec<RawSample> {
    let flags = profile.flags;
    let total_bits = profile.total_bits();

    if repeat_frame && profile.repeat.is_defined() {
        // Dedicated repeat waveform: header (when configured to repeat),
        // lead, repeat pair, trail. No data bits are transmitted, so no
        // toggle state is consumed.
        let mut b = WaveformBuilder::new();
        if flags.repeat_header && profile.header.is_defined() {
            b.pulse(profile.header.pulse);
            b.space(profile.header.space);
        }
        b.pulse(profile.plead);
        b.pulse(profile.repeat.pulse);
        b.space(profile.repeat.space);
        b.pulse(profile.ptrail);
        return b.finish();
    }

    let mut composite = (profile.pre_data & low_bits(profile.pre_data_bits))
        << (profile.bits + profile.post_data_bits);
    composite |= (code & low_bits(profile.bits)) << profile.post_data_bits;
    composite |= profile.post_data & low_bits(profile.post_data_bits);

    if !repeat_frame {
        profile.state.toggle_bit_state = !profile.state.toggle_bit_state;
    }
    let tbm = profile.toggle_bit_mask();
    if tbm != 0 {
        if profile.state.toggle_bit_state {
            composite |= tbm;
        } else {
            composite &= !tbm;
        }
    }
    if profile.toggle_mask != 0 {
        if profile.state.toggle_mask_phase % 2 == 1 {
            composite ^= profile.toggle_mask;
        }
        profile.state.toggle_mask_phase += 1;
        profile.state.mid_toggle_sequence = profile.state.toggle_mask_phase % 2 == 1;
    }

    let mut b = WaveformBuilder::new();
    b.pulse(profile.plead);
    if profile.header.is_defined() && !(repeat_frame && flags.no_head_rep) {
        b.pulse(profile.header.pulse);
        b.space(profile.header.space);
    }
    for i in (0..total_bits).rev() {
        let one = composite >> i & 1 != 0;
        match (flags.shift_enc, one) {
            // Pulse-width encoding: pulse then space for either bit value.
            (false, true) => {
                b.pulse(profile.one.pulse);
                b.space(profile.one.space);
            }
            (false, false) => {
                b.pulse(profile.zero.pulse);
                b.space(profile.zero.space);
            }
            // Biphase: one-bits swap the order.
            (true, true) => {
                b.space(profile.one.space);
                b.pulse(profile.one.pulse);
            }
            (true, false) => {
                b.pulse(profile.zero.pulse);
                b.space(profile.zero.space);
            }
        }
    }
    b.pulse(profile.ptrail);
    if profile.foot.is_defined() && !(repeat_frame && flags.no_foot_rep) {
        b.space(profile.foot.space);
        b.pulse(profile.foot.pulse);
    }
    b.finish()
}

/// Gap after the emitted samples. Constant-length profiles pad the signal
/// out to the declared total; everything else uses the declared gap, or
/// the repeat gap between repeat frames.
fn closing_gap(profile: &RemoteProfile, total: u64, repeat_frame: bool) -> Result<u64> {
    if profile.flags.const_length {
        profile
            .gap
            .checked_sub(total)
            .ok_or_else(|| IrdError::SignalTooLong {
                remote: profile.name.clone(),
                excess: total - profile.gap,
            })
    } else if repeat_frame && profile.repeat_gap != 0 {
        Ok(profile.repeat_gap)
    } else {
        Ok(profile.gap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Level;
    use crate::remote::{CodeEntry, Flags, PulsePair};

    fn nec_like() -> RemoteProfile {
        let mut p = RemoteProfile {
            name: "tv".to_string(),
            bits: 8,
            pre_data_bits: 8,
            pre_data: 0xe0,
            header: PulsePair::new(9000, 4500),
            one: PulsePair::new(560, 1690),
            zero: PulsePair::new(560, 560),
            ptrail: 560,
            gap: 50_000,
            ..Default::default()
        };
        p.codes.push(CodeEntry::numeric("POWER", 0x45));
        p
    }

    #[test]
    fn test_encode_nec_like_structure() {
        let mut p = nec_like();
        let wf = encode(&mut p, 0, false).unwrap();

        // header + 16 bit pairs + trail. Zero-bit spaces never merge here
        // because every bit starts with a pulse.
        assert_eq!(wf.samples.len(), 2 + 16 * 2 + 1);
        assert_eq!(wf.samples[0], RawSample::pulse(9000));
        assert_eq!(wf.samples[1], RawSample::space(4500));
        // 0xe0 starts with three ones.
        assert_eq!(wf.samples[3], RawSample::space(1690));
        assert_eq!(wf.samples[5], RawSample::space(1690));
        assert_eq!(wf.samples[7], RawSample::space(1690));
        assert_eq!(wf.samples[9], RawSample::space(560));
        // Final sample is the trailing pulse.
        assert_eq!(*wf.samples.last().unwrap(), RawSample::pulse(560));
        assert_eq!(wf.gap, 50_000);
    }

    #[test]
    fn test_encode_const_length_gap() {
        let mut p = nec_like();
        p.flags.const_length = true;
        p.gap = 108_000;
        let wf = encode(&mut p, 0, false).unwrap();
        let total: u64 = wf.samples.iter().map(|s| s.duration as u64).sum();
        assert_eq!(wf.gap, 108_000 - total);
        assert_eq!(p.state.remaining_gap, wf.gap);
    }

    #[test]
    fn test_encode_signal_too_long() {
        let mut p = nec_like();
        p.flags.const_length = true;
        p.gap = 10_000;
        let err = encode(&mut p, 0, false).unwrap_err();
        assert!(matches!(err, IrdError::SignalTooLong { .. }));
    }

    #[test]
    fn test_encode_repeat_waveform() {
        let mut p = nec_like();
        p.repeat = PulsePair::new(9000, 2250);
        encode(&mut p, 0, false).unwrap();
        let wf = encode(&mut p, 0, true).unwrap();
        assert_eq!(
            wf.samples,
            vec![
                RawSample::pulse(9000),
                RawSample::space(2250),
                RawSample::pulse(560),
            ]
        );
        assert_eq!(p.state.repeat_count, 1);
    }

    #[test]
    fn test_encode_repeat_suppresses_header() {
        let mut p = nec_like();
        p.flags.no_head_rep = true;
        encode(&mut p, 0, false).unwrap();
        let wf = encode(&mut p, 0, true).unwrap();
        // No dedicated repeat waveform: full signal minus the header.
        assert_eq!(wf.samples[0].duration, 560);
        assert_eq!(wf.samples.len(), 16 * 2 + 1);
    }

    #[test]
    fn test_encode_repeat_gap() {
        let mut p = nec_like();
        p.repeat = PulsePair::new(9000, 2250);
        p.repeat_gap = 96_000;
        encode(&mut p, 0, false).unwrap();
        let wf = encode(&mut p, 0, true).unwrap();
        assert_eq!(wf.gap, 96_000);
    }

    #[test]
    fn test_encode_toggle_bit_flips_per_press() {
        let mut p = nec_like();
        p.toggle_bit = 1; // MSB of the 16-bit composite
        let first = encode(&mut p, 0, false).unwrap();
        let second = encode(&mut p, 0, false).unwrap();
        // pre_data 0xe0 has the MSB set; one of the two presses clears it,
        // so the first bit of the signal differs between them.
        assert_ne!(first.samples[3], second.samples[3]);
        // A repeat frame keeps the toggle state of the press.
        let third = encode(&mut p, 0, true).unwrap();
        assert_eq!(second.samples[3], third.samples[3]);
    }

    #[test]
    fn test_encode_toggle_mask_alternates() {
        let mut p = nec_like();
        p.toggle_mask = 0xff; // low byte, the code span
        let first = encode(&mut p, 0, false).unwrap();
        let second = encode(&mut p, 0, false).unwrap();
        let third = encode(&mut p, 0, false).unwrap();
        assert_ne!(first.samples, second.samples);
        assert_eq!(first.samples, third.samples);
        // Three transmissions leave a pair half-open.
        assert!(p.state.mid_toggle_sequence);
    }

    #[test]
    fn test_encode_repeat_frame_keeps_toggle_mask_phase() {
        let mut p = nec_like();
        p.repeat = PulsePair::new(9000, 2250);
        p.toggle_mask = 0xff;
        let first = encode(&mut p, 0, false).unwrap();
        // Dedicated repeat frames carry no data, so they must not
        // advance the mask phase.
        encode(&mut p, 0, true).unwrap();
        let second = encode(&mut p, 0, false).unwrap();
        assert_ne!(first.samples, second.samples);
        assert_eq!(p.state.toggle_mask_phase, 2);
    }

    #[test]
    fn test_encode_shift_merges_halves() {
        let mut p = RemoteProfile {
            name: "rc5".to_string(),
            bits: 4,
            flags: Flags {
                shift_enc: true,
                ..Default::default()
            },
            one: PulsePair::new(889, 889),
            zero: PulsePair::new(889, 889),
            plead: 889,
            gap: 113_000,
            ..Default::default()
        };
        p.codes.push(CodeEntry::numeric("UP", 0b1010));

        let wf = encode(&mut p, 0, false).unwrap();
        // 1010: lead, [s p] [p s] [s p] [p s]. Adjacent equal levels merge:
        // lead|nothing, s889, p889+p889, s889+s889, p889, p889... walk it.
        assert_eq!(
            wf.samples,
            vec![
                RawSample::pulse(889),  // lead (bit 1 starts with a space)
                RawSample::space(889),  // first half of bit 1
                RawSample::pulse(1778), // second half of 1 + first half of 0
                RawSample::space(1778), // second half of 0 + first half of 1
                RawSample::pulse(1778), // second half of 1 + first half of 0
                RawSample::space(889),  // second half of the final 0
            ]
        );
    }

    #[test]
    fn test_encode_alternates_advance_on_fresh_press_only() {
        let mut p = nec_like();
        p.codes[0].signal = CodeSignal::Numeric {
            alternates: vec![0x45, 0x46],
            current: 0,
        };
        encode(&mut p, 0, false).unwrap();
        assert_eq!(p.codes[0].current_code(), Some(0x46));
        // The repeat frame reuses 0x45, the alternate of the press.
        let repeat = encode(&mut p, 0, true).unwrap();
        assert_eq!(p.codes[0].current_code(), Some(0x46));
        // Bit 7 of the low byte differs between 0x45 and 0x46; cheap check:
        // re-encoding fresh uses 0x46 and differs from the repeat frame.
        let fresh = encode(&mut p, 0, false).unwrap();
        assert_ne!(repeat.samples, fresh.samples);
    }

    #[test]
    fn test_encode_raw_entry() {
        let mut p = RemoteProfile {
            name: "fan".to_string(),
            flags: Flags {
                raw_codes: true,
                ..Default::default()
            },
            gap: 30_000,
            ..Default::default()
        };
        p.codes.push(CodeEntry::raw("OFF", vec![1200, 600, 1200, 600, 1200]));

        let wf = encode(&mut p, 0, false).unwrap();
        assert_eq!(wf.samples.len(), 5);
        assert_eq!(wf.samples[0].level, Level::Pulse);
        assert_eq!(wf.samples[4].level, Level::Pulse);
        assert_eq!(wf.gap, 30_000);
    }
}
