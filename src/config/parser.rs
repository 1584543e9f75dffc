//! Parser for the remote-description configuration language.
//!
//! Line-oriented, whitespace-separated tokens, `#` starts a comment.
//! Errors carry the offending line number. The parser keeps going after an
//! error to collect a best-effort partial structure internally, but any
//! error makes the overall parse fail; no partially valid profile list is
//! ever handed to the caller.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{IrdError, Result};
use crate::remote::{CodeEntry, CodeSignal, Flags, RemoteProfile};

/// Parse a configuration file from disk.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<RemoteProfile>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            IrdError::ConfigNotFound {
                path: path.display().to_string(),
            }
        } else {
            IrdError::Io(e)
        }
    })?;
    debug!(path = %path.display(), bytes = content.len(), "Read config file");
    parse(content.lines())
}

/// Parse configuration lines into remote profiles.
pub fn parse<'a, I>(lines: I) -> Result<Vec<RemoteProfile>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut parser = Parser::default();
    for line in lines {
        parser.line(line);
    }
    parser.finish()
}

/// Parse a C-style integer literal: `0x`/`0X` prefix selects hex, a
/// leading `0` selects octal, everything else is decimal.
pub fn parse_c_int(token: &str) -> std::result::Result<u64, String> {
    let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if token.len() > 1 && token.starts_with('0') {
        u64::from_str_radix(&token[1..], 8)
    } else {
        token.parse::<u64>()
    };
    parsed.map_err(|e| format!("invalid integer `{token}`: {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Block {
    #[default]
    TopLevel,
    Remote,
    Codes,
    RawCodes,
}

/// Keys valid inside a `begin remote` block, used to flag misplaced keys
/// inside `codes` blocks.
const REMOTE_KEYS: &[&str] = &[
    "name",
    "bits",
    "flags",
    "eps",
    "aeps",
    "header",
    "one",
    "zero",
    "plead",
    "ptrail",
    "foot",
    "repeat",
    "pre_data_bits",
    "pre_data",
    "post_data_bits",
    "post_data",
    "gap",
    "repeat_gap",
    "repeat_bit",
    "toggle_bit",
    "toggle_bit_mask",
    "toggle_mask",
    "frequency",
    "duty_cycle",
];

#[derive(Default)]
struct Parser {
    profiles: Vec<RemoteProfile>,
    current: Option<RemoteProfile>,
    block: Block,
    /// Raw entry currently accumulating durations.
    raw_entry: Option<CodeEntry>,
    /// Whether the current profile already completed a codes block.
    codes_done: bool,
    errors: Vec<IrdError>,
    line_no: usize,
}

impl Parser {
    fn error(&mut self, message: impl Into<String>) {
        let err = IrdError::ConfigParse {
            line: self.line_no,
            message: message.into(),
        };
        debug!(%err, "Config parse error");
        self.errors.push(err);
    }

    fn warn_trailing(&self, key: &str, extra: &[&str]) {
        if !extra.is_empty() {
            warn!(
                line = self.line_no,
                key, ?extra,
                "Ignoring trailing tokens after expected arguments"
            );
        }
    }

    fn line(&mut self, raw: &str) {
        self.line_no += 1;
        let uncommented = raw.split('#').next().unwrap_or("");
        let tokens: Vec<&str> = uncommented.split_whitespace().collect();
        if tokens.is_empty() {
            return;
        }
        match self.block {
            Block::TopLevel => self.top_level(&tokens),
            Block::Remote => self.remote_key(&tokens),
            Block::Codes => self.codes_line(&tokens),
            Block::RawCodes => self.raw_codes_line(&tokens),
        }
    }

    fn top_level(&mut self, tokens: &[&str]) {
        match tokens {
            ["begin", "remote", extra @ ..] => {
                self.warn_trailing("begin remote", extra);
                self.current = Some(RemoteProfile::default());
                self.codes_done = false;
                self.block = Block::Remote;
            }
            ["begin", section, ..] => {
                self.error(format!("unknown section `{section}`"));
            }
            _ => {
                self.error(format!("expected `begin remote`, got `{}`", tokens[0]));
            }
        }
    }

    fn remote_key(&mut self, tokens: &[&str]) {
        match tokens {
            ["begin", "codes", extra @ ..] => {
                self.warn_trailing("begin codes", extra);
                if self.codes_done {
                    self.error("duplicate codes block for this remote");
                } else {
                    self.block = Block::Codes;
                }
            }
            ["begin", "raw_codes", extra @ ..] => {
                self.warn_trailing("begin raw_codes", extra);
                if self.codes_done {
                    self.error("duplicate codes block for this remote");
                } else {
                    if let Some(profile) = self.current.as_mut() {
                        profile.flags.raw_codes = true;
                    }
                    self.block = Block::RawCodes;
                }
            }
            ["begin", section, ..] => {
                self.error(format!("unknown block `{section}` inside remote"));
            }
            ["end", "remote", extra @ ..] => {
                self.warn_trailing("end remote", extra);
                self.finish_remote();
                self.block = Block::TopLevel;
            }
            ["end", other, ..] => {
                self.error(format!("mismatched `end {other}` inside remote"));
            }
            [key, args @ ..] => self.field(key, args),
            [] => unreachable!("empty lines are filtered"),
        }
    }

    fn field(&mut self, key: &str, args: &[&str]) {
        let mut parse_err: Option<String> = None;
        let mut trailing: &[&str] = &[];
        {
            let Some(profile) = self.current.as_mut() else {
                return;
            };

            match key {
                "name" => {
                    if let Some(n) = args.first() {
                        profile.name = (*n).to_string();
                    } else {
                        parse_err = Some("missing remote name".to_string());
                    }
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "bits" => {
                    profile.bits = clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "flags" => {
                    // Flag lists may carry spaces around `|`.
                    let joined = args.concat();
                    match Flags::parse(&joined) {
                        Ok(flags) => profile.flags = flags,
                        Err(e) => parse_err = Some(e),
                    }
                }
                "eps" => {
                    profile.eps = clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "aeps" => {
                    profile.aeps = clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "header" => {
                    let (p, s) = pair_arg(key, args, &mut parse_err);
                    profile.header = crate::remote::PulsePair::new(p, s);
                    trailing = args.get(2..).unwrap_or(&[]);
                }
                "one" => {
                    let (p, s) = pair_arg(key, args, &mut parse_err);
                    profile.one = crate::remote::PulsePair::new(p, s);
                    trailing = args.get(2..).unwrap_or(&[]);
                }
                "zero" => {
                    let (p, s) = pair_arg(key, args, &mut parse_err);
                    profile.zero = crate::remote::PulsePair::new(p, s);
                    trailing = args.get(2..).unwrap_or(&[]);
                }
                "plead" => {
                    profile.plead = clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "ptrail" => {
                    profile.ptrail = clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "foot" => {
                    let (p, s) = pair_arg(key, args, &mut parse_err);
                    profile.foot = crate::remote::PulsePair::new(p, s);
                    trailing = args.get(2..).unwrap_or(&[]);
                }
                "repeat" => {
                    let (p, s) = pair_arg(key, args, &mut parse_err);
                    profile.repeat = crate::remote::PulsePair::new(p, s);
                    trailing = args.get(2..).unwrap_or(&[]);
                }
                "pre_data_bits" => {
                    profile.pre_data_bits =
                        clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "pre_data" => {
                    profile.pre_data = int_arg(key, args, &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "post_data_bits" => {
                    profile.post_data_bits =
                        clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "post_data" => {
                    profile.post_data = int_arg(key, args, &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "gap" => {
                    profile.gap = int_arg(key, args, &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "repeat_gap" => {
                    profile.repeat_gap = int_arg(key, args, &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                // `repeat_bit` is the historical spelling of `toggle_bit`.
                "repeat_bit" | "toggle_bit" => {
                    profile.toggle_bit = clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "toggle_bit_mask" | "toggle_mask" => {
                    profile.toggle_mask = int_arg(key, args, &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "frequency" => {
                    profile.frequency = clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                "duty_cycle" => {
                    profile.duty_cycle = clamp_u32(int_arg(key, args, &mut parse_err), &mut parse_err);
                    trailing = args.get(1..).unwrap_or(&[]);
                }
                other => {
                    parse_err = Some(format!("unknown key `{other}`"));
                }
            }
        }
        if let Some(message) = parse_err {
            self.error(message);
        } else {
            self.warn_trailing(key, trailing);
        }
    }

    fn codes_line(&mut self, tokens: &[&str]) {
        match tokens {
            ["end", "codes", extra @ ..] => {
                self.warn_trailing("end codes", extra);
                self.codes_done = true;
                self.block = Block::Remote;
            }
            ["end", "remote", ..] => {
                self.error("`end remote` before `end codes`");
                self.finish_remote();
                self.block = Block::TopLevel;
            }
            [name, codes @ ..] => {
                if REMOTE_KEYS.contains(name) {
                    self.error(format!("key `{name}` not allowed inside codes block"));
                    return;
                }
                let [code, extra @ ..] = codes else {
                    self.error(format!("button `{name}` has no code"));
                    return;
                };
                // One code per line; anything after it is ignored noise.
                self.warn_trailing(name, extra);
                let value = match parse_c_int(code) {
                    Ok(v) => v,
                    Err(e) => {
                        self.error(e);
                        return;
                    }
                };
                let Some(profile) = self.current.as_mut() else {
                    return;
                };
                // A repeated button name extends the alternates chain of
                // the logical button.
                if let Some(CodeEntry {
                    signal: CodeSignal::Numeric { alternates, .. },
                    ..
                }) = profile.codes.iter_mut().find(|c| c.name == *name)
                {
                    alternates.push(value);
                } else {
                    profile.codes.push(CodeEntry {
                        name: (*name).to_string(),
                        signal: CodeSignal::Numeric {
                            alternates: vec![value],
                            current: 0,
                        },
                    });
                }
            }
            [] => unreachable!("empty lines are filtered"),
        }
    }

    fn raw_codes_line(&mut self, tokens: &[&str]) {
        match tokens {
            ["end", "raw_codes", extra @ ..] => {
                self.warn_trailing("end raw_codes", extra);
                self.finish_raw_entry();
                self.codes_done = true;
                self.block = Block::Remote;
            }
            ["end", "remote", ..] => {
                self.error("`end remote` before `end raw_codes`");
                self.finish_raw_entry();
                self.finish_remote();
                self.block = Block::TopLevel;
            }
            ["name", name, extra @ ..] => {
                self.warn_trailing("name", extra);
                self.finish_raw_entry();
                self.raw_entry = Some(CodeEntry::raw((*name).to_string(), Vec::new()));
            }
            durations => {
                let Some(entry) = self.raw_entry.as_mut() else {
                    self.error("raw durations before any `name` line");
                    return;
                };
                let CodeSignal::Raw(list) = &mut entry.signal else {
                    unreachable!("raw entries always carry raw signals");
                };
                let mut err = None;
                for tok in durations {
                    match parse_c_int(tok) {
                        Ok(v) if v <= u64::from(u32::MAX) => list.push(v as u32),
                        Ok(v) => {
                            err = Some(format!("duration {v} out of range"));
                            break;
                        }
                        Err(e) => {
                            err = Some(e);
                            break;
                        }
                    }
                }
                if let Some(e) = err {
                    self.error(e);
                }
            }
        }
    }

    fn finish_raw_entry(&mut self) {
        if let Some(entry) = self.raw_entry.take() {
            if let CodeSignal::Raw(list) = &entry.signal {
                if list.is_empty() {
                    self.error(format!("raw button `{}` has no durations", entry.name));
                    return;
                }
                if list.len() % 2 == 0 {
                    // A raw signal should end with a pulse.
                    warn!(
                        line = self.line_no,
                        button = %entry.name,
                        "Raw signal has an even number of durations"
                    );
                }
            }
            if let Some(profile) = self.current.as_mut() {
                if profile.codes.iter().any(|c| c.name == entry.name) {
                    self.error(format!("duplicate raw button `{}`", entry.name));
                } else {
                    profile.codes.push(entry);
                }
            }
        }
    }

    fn finish_remote(&mut self) {
        let Some(profile) = self.current.take() else {
            return;
        };
        if profile.name.is_empty() {
            self.error("remote has no name");
            return;
        }
        if profile.total_bits() > 64 {
            self.error(format!(
                "remote `{}` declares {} total bits, at most 64 supported",
                profile.name,
                profile.total_bits()
            ));
            return;
        }
        if profile.flags.raw_codes
            && profile
                .codes
                .iter()
                .any(|c| matches!(c.signal, CodeSignal::Numeric { .. }))
        {
            self.error(format!(
                "remote `{}` mixes raw_codes with numeric codes",
                profile.name
            ));
            return;
        }
        if self.profiles.iter().any(|p| p.name == profile.name) {
            warn!(line = self.line_no, name = %profile.name, "Duplicate remote name");
        }
        if profile.flags.const_length && profile.repeat_gap != 0 {
            // Informational only; both legacy behaviors are preserved.
            warn!(
                name = %profile.name,
                "repeat_gap is ignored for const-length remotes"
            );
        }
        self.profiles.push(profile);
    }

    fn finish(mut self) -> Result<Vec<RemoteProfile>> {
        if self.block != Block::TopLevel {
            self.line_no += 1;
            self.error("unexpected end of file inside open block");
        }
        if let Some(first) = self.errors.into_iter().next() {
            return Err(first);
        }
        for profile in &mut self.profiles {
            profile.apply_reverse();
        }
        debug!(remotes = self.profiles.len(), "Configuration parsed");
        Ok(self.profiles)
    }
}

fn int_arg(key: &str, args: &[&str], err: &mut Option<String>) -> u64 {
    match args.first() {
        Some(tok) => match parse_c_int(tok) {
            Ok(v) => v,
            Err(e) => {
                if err.is_none() {
                    *err = Some(e);
                }
                0
            }
        },
        None => {
            if err.is_none() {
                *err = Some(format!("missing argument for `{key}`"));
            }
            0
        }
    }
}

fn pair_arg(key: &str, args: &[&str], err: &mut Option<String>) -> (u32, u32) {
    if args.len() < 2 {
        if err.is_none() {
            *err = Some(format!("`{key}` expects <pulse> <space>"));
        }
        return (0, 0);
    }
    let p = int_arg(key, &args[..1], err);
    let s = int_arg(key, &args[1..2], err);
    (clamp_u32(p, err), clamp_u32(s, err))
}

fn clamp_u32(value: u64, err: &mut Option<String>) -> u32 {
    u32::try_from(value).unwrap_or_else(|_| {
        if err.is_none() {
            *err = Some(format!("value {value} out of range"));
        }
        0
    })
}
