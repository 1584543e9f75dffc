//! Remote-control profile data model.
//!
//! A [`RemoteProfile`] describes one remote: its bit layout, timing
//! parameters, tolerances, and the buttons it carries. Profiles are built
//! in bulk by the config parser and mutated at runtime by the signal codec
//! (last-press bookkeeping, toggle state, alternate-chain pointers).

use std::time::Instant;

use crate::error::{IrdError, Result};

/// Default relative tolerance in percent.
pub const DEFAULT_EPS: u32 = 30;
/// Default absolute tolerance in microseconds.
pub const DEFAULT_AEPS: u32 = 100;

/// Encoding and repeat-behavior flags, parsed from `flags FLAG|FLAG|...`.
///
/// Pulse-width encoding (`SPACE_ENC`) is the default; `SHIFT_ENC` selects
/// biphase (shift) encoding. The two are mutually exclusive, as are
/// `RAW_CODES` and any bit-coded layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// Buttons are matched by literal pulse/space lists, not by bit layout.
    pub raw_codes: bool,
    /// Shift (biphase) encoding instead of pulse-width encoding.
    pub shift_enc: bool,
    /// Declared pre/post/code values are bit-reversed after parsing, and
    /// the reported event code is reversed over its full width.
    pub reverse: bool,
    /// Pulses, spaces and gap always sum to the same total duration.
    pub const_length: bool,
    /// Header is not transmitted on repeated signals.
    pub no_head_rep: bool,
    /// Foot is not transmitted on repeated signals.
    pub no_foot_rep: bool,
    /// The header is sent before the repeat waveform as well.
    pub repeat_header: bool,
}

impl Flags {
    /// Parse a `|`-separated flag list. Unknown flag names are an error.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut flags = Self::default();
        for name in text.split('|') {
            match name.trim() {
                "SPACE_ENC" => flags.shift_enc = false,
                "SHIFT_ENC" => flags.shift_enc = true,
                "RAW_CODES" => flags.raw_codes = true,
                "REVERSE" => flags.reverse = true,
                "CONST_LENGTH" => flags.const_length = true,
                "NO_HEAD_REP" => flags.no_head_rep = true,
                "NO_FOOT_REP" => flags.no_foot_rep = true,
                "REPEAT_HEADER" => flags.repeat_header = true,
                other => return Err(format!("unknown flag `{other}`")),
            }
        }
        Ok(flags)
    }
}

/// A pulse/space duration pair in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulsePair {
    pub pulse: u32,
    pub space: u32,
}

impl PulsePair {
    pub const fn new(pulse: u32, space: u32) -> Self {
        Self { pulse, space }
    }

    /// A pair is "defined" when either half is non-zero.
    pub const fn is_defined(&self) -> bool {
        self.pulse != 0 || self.space != 0
    }
}

/// The signal attached to one button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeSignal {
    /// Numeric code with an ordered alternates chain. Most buttons have a
    /// single alternate; chains longer than one model remotes that emit
    /// different codes on successive presses of the same button.
    Numeric { alternates: Vec<u64>, current: usize },
    /// Literal pulse/space durations, starting with a pulse.
    Raw(Vec<u32>),
}

/// One button of a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEntry {
    pub name: String,
    pub signal: CodeSignal,
}

impl CodeEntry {
    pub fn numeric(name: impl Into<String>, code: u64) -> Self {
        Self {
            name: name.into(),
            signal: CodeSignal::Numeric {
                alternates: vec![code],
                current: 0,
            },
        }
    }

    pub fn raw(name: impl Into<String>, durations: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            signal: CodeSignal::Raw(durations),
        }
    }

    /// The code value the next transmission of this button uses.
    pub fn current_code(&self) -> Option<u64> {
        match &self.signal {
            CodeSignal::Numeric {
                alternates,
                current,
            } => alternates.get(*current).copied(),
            CodeSignal::Raw(_) => None,
        }
    }
}

/// Mutable per-profile decode/transmit bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    /// Index of the last matched entry in `codes`.
    pub last_entry: Option<usize>,
    /// Composite value of the last decoded signal, reused by the repeat
    /// fast path.
    pub last_code: Option<u64>,
    /// Repeat count of the current press sequence.
    pub repeat_count: u32,
    /// Timestamp of the last transmission or reception.
    pub last_event: Option<Instant>,
    /// Gap still to honor before the next transmission (const-length).
    pub remaining_gap: u64,
    /// Remembered toggle-bit value, flipped on each fresh transmission.
    pub toggle_bit_state: bool,
    /// Toggle-mask phase counter; even phases carry the unmasked value.
    pub toggle_mask_phase: u32,
    /// True between the first and second half of a toggle-mask pair.
    pub mid_toggle_sequence: bool,
    /// Raw composite values of the last two receptions (toggle-mask check).
    pub toggle_history: [Option<u64>; 2],
}

impl RemoteState {
    /// Forget toggle-mask progress after a decode attempt that failed
    /// across the whole profile list.
    pub fn reset_toggle_sequence(&mut self) {
        self.toggle_mask_phase = 0;
        self.mid_toggle_sequence = false;
        self.toggle_history = [None, None];
    }
}

/// One remote control: bit layout, timing, tolerances, buttons.
#[derive(Debug, Clone)]
pub struct RemoteProfile {
    pub name: String,
    pub flags: Flags,

    /// Main code width in bits.
    pub bits: u32,
    pub pre_data_bits: u32,
    pub pre_data: u64,
    pub post_data_bits: u32,
    pub post_data: u64,

    /// Relative tolerance, percent.
    pub eps: u32,
    /// Absolute tolerance, microseconds.
    pub aeps: u32,

    pub header: PulsePair,
    pub one: PulsePair,
    pub zero: PulsePair,
    /// Leading pulse before the header.
    pub plead: u32,
    /// Trailing pulse after the data bits.
    pub ptrail: u32,
    pub foot: PulsePair,
    pub repeat: PulsePair,

    /// Inter-signal gap in microseconds. For const-length profiles this is
    /// the declared total signal duration.
    pub gap: u64,
    /// Distinct gap used between repeated transmissions, 0 if unset.
    pub repeat_gap: u64,

    /// Toggle-bit index, 1-based from the MSB of the composite
    /// pre+main+post value; 0 = unused.
    pub toggle_bit: u32,
    /// Bitmask XORed into the composite value every other transmission.
    pub toggle_mask: u64,

    /// Carrier frequency in Hz (transmitter hint).
    pub frequency: u32,
    /// Carrier duty cycle in percent (transmitter hint).
    pub duty_cycle: u32,

    pub codes: Vec<CodeEntry>,

    /// Runtime bookkeeping, owned by the profile.
    pub state: RemoteState,
}

impl Default for RemoteProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            flags: Flags::default(),
            bits: 0,
            pre_data_bits: 0,
            pre_data: 0,
            post_data_bits: 0,
            post_data: 0,
            eps: DEFAULT_EPS,
            aeps: DEFAULT_AEPS,
            header: PulsePair::default(),
            one: PulsePair::default(),
            zero: PulsePair::default(),
            plead: 0,
            ptrail: 0,
            foot: PulsePair::default(),
            repeat: PulsePair::default(),
            gap: 0,
            repeat_gap: 0,
            toggle_bit: 0,
            toggle_mask: 0,
            frequency: 0,
            duty_cycle: 0,
            codes: Vec::new(),
            state: RemoteState::default(),
        }
    }
}

impl RemoteProfile {
    /// Total width of the composite pre+main+post value.
    pub const fn total_bits(&self) -> u32 {
        self.pre_data_bits + self.bits + self.post_data_bits
    }

    /// Bitmask of the toggle bit within the composite value, 0 if unused.
    pub fn toggle_bit_mask(&self) -> u64 {
        if self.toggle_bit == 0 || self.toggle_bit > self.total_bits() {
            0
        } else {
            1u64 << (self.total_bits() - self.toggle_bit)
        }
    }

    /// All composite bits excluded from code matching: the toggle mask
    /// plus the single toggle bit.
    pub fn matching_exclusion_mask(&self) -> u64 {
        self.toggle_mask | self.toggle_bit_mask()
    }

    /// Slice of the exclusion mask covering the post-data span.
    pub fn post_exclusion_mask(&self) -> u64 {
        self.matching_exclusion_mask() & low_bits(self.post_data_bits)
    }

    /// Slice of the exclusion mask covering the main code span.
    pub fn main_exclusion_mask(&self) -> u64 {
        (self.matching_exclusion_mask() >> self.post_data_bits) & low_bits(self.bits)
    }

    /// Slice of the exclusion mask covering the pre-data span.
    pub fn pre_exclusion_mask(&self) -> u64 {
        (self.matching_exclusion_mask() >> (self.post_data_bits + self.bits))
            & low_bits(self.pre_data_bits)
    }

    /// Find a button by name.
    pub fn find_entry(&self, button: &str) -> Option<usize> {
        self.codes.iter().position(|c| c.name == button)
    }

    /// Find a button by name or return a lookup error.
    pub fn entry_index(&self, button: &str) -> Result<usize> {
        self.find_entry(button)
            .ok_or_else(|| IrdError::UnknownButton {
                remote: self.name.clone(),
                button: button.to_string(),
            })
    }

    /// Match an observed main-code value against the entry list, honoring
    /// alternates chains: every alternate of an entry identifies the same
    /// logical button, and a hit advances the chain pointer (wrapping).
    ///
    /// Bits set in `exclude` are ignored in the comparison.
    pub fn match_numeric(&mut self, observed: u64, exclude: u64) -> Option<usize> {
        let keep = !exclude & low_bits(self.bits);
        for (idx, entry) in self.codes.iter_mut().enumerate() {
            if let CodeSignal::Numeric {
                alternates,
                current,
            } = &mut entry.signal
            {
                if let Some(pos) = alternates
                    .iter()
                    .position(|&code| code & keep == observed & keep)
                {
                    *current = (pos + 1) % alternates.len();
                    return Some(idx);
                }
            }
        }
        None
    }

    /// Advance the alternates chain of a button after a transmission.
    pub fn advance_alternate(&mut self, entry: usize) {
        if let Some(CodeEntry {
            signal:
                CodeSignal::Numeric {
                    alternates,
                    current,
                },
            ..
        }) = self.codes.get_mut(entry)
        {
            *current = (*current + 1) % alternates.len();
        }
    }

    /// Gap to expect before the next signal of this profile.
    pub fn expected_gap(&self) -> u64 {
        if self.flags.const_length && self.state.remaining_gap != 0 {
            self.state.remaining_gap
        } else {
            self.gap
        }
    }

    /// Apply the `REVERSE` flag: bit-reverse the declared pre-data,
    /// post-data and every code over their declared widths. This runs once
    /// after parsing and is kept even under `CONST_LENGTH` (legacy
    /// behavior the original warns about but never changed).
    pub fn apply_reverse(&mut self) {
        if !self.flags.reverse {
            return;
        }
        self.pre_data = bit_reverse(self.pre_data, self.pre_data_bits);
        self.post_data = bit_reverse(self.post_data, self.post_data_bits);
        let bits = self.bits;
        for entry in &mut self.codes {
            if let CodeSignal::Numeric { alternates, .. } = &mut entry.signal {
                for code in alternates.iter_mut() {
                    *code = bit_reverse(*code, bits);
                }
            }
        }
    }
}

/// A list of profiles produced by one configuration load.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    /// Monotonic reload counter; bumped on every successful reload.
    pub generation: u64,
    pub remotes: Vec<RemoteProfile>,
}

impl ProfileSet {
    pub fn new(remotes: Vec<RemoteProfile>) -> Self {
        Self {
            generation: 0,
            remotes,
        }
    }

    pub fn find(&self, name: &str) -> Option<&RemoteProfile> {
        self.remotes.iter().find(|r| r.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut RemoteProfile> {
        self.remotes.iter_mut().find(|r| r.name == name)
    }

    pub fn find_or_err(&self, name: &str) -> Result<&RemoteProfile> {
        self.find(name).ok_or_else(|| IrdError::UnknownRemote {
            name: name.to_string(),
        })
    }
}

/// Mask with the low `bits` bits set.
pub const fn low_bits(bits: u32) -> u64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Reverse the low `bits` bits of `value`.
pub const fn bit_reverse(value: u64, bits: u32) -> u64 {
    let mut out = 0u64;
    let mut i = 0;
    while i < bits {
        out = (out << 1) | ((value >> i) & 1);
        i += 1;
    }
    out
}
