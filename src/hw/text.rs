//! Text-format transceiver: `pulse N` / `space N` lines.
//!
//! Reads captures in the classic mode2 line format from a file or FIFO
//! and writes transmissions in the same format, which makes the daemon
//! runnable end to end without any IR hardware and keeps captures
//! diffable in tests.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Capabilities, HardwareAdapter};
use crate::codec::{RawSample, Waveform};
use crate::error::{IrdError, Result};

/// File-backed adapter speaking the mode2 text format.
#[derive(Debug, Default)]
pub struct TextHardware {
    reader: Mutex<Option<BufReader<File>>>,
    writer: Mutex<Option<File>>,
}

impl TextHardware {
    /// Open a capture file (or FIFO) for receiving, an output file for
    /// sending, or both. At least one side must be given.
    pub fn open(input: Option<&Path>, output: Option<&Path>) -> Result<Self> {
        if input.is_none() && output.is_none() {
            return Err(IrdError::Hardware(
                "text adapter needs an input or output path".to_string(),
            ));
        }
        let reader = match input {
            Some(path) => {
                debug!(path = %path.display(), "opening text capture");
                Some(BufReader::new(File::open(path)?))
            }
            None => None,
        };
        let writer = match output {
            Some(path) => {
                debug!(path = %path.display(), "opening text transmit log");
                Some(OpenOptions::new().create(true).append(true).open(path)?)
            }
            None => None,
        };
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }
}

/// Parse one mode2 line. Blank lines and `#` comments yield `None`.
fn parse_line(line: &str) -> Option<std::result::Result<RawSample, String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut parts = line.split_whitespace();
    let kind = parts.next()?;
    let Some(value) = parts.next().and_then(|v| v.parse::<u32>().ok()) else {
        return Some(Err(format!("bad duration in line `{line}`")));
    };
    match kind {
        "pulse" => Some(Ok(RawSample::pulse(value))),
        // A receiver timeout is just a very long space.
        "space" | "timeout" => Some(Ok(RawSample::space(value))),
        _ => Some(Err(format!("unknown line kind `{kind}`"))),
    }
}

impl HardwareAdapter for TextHardware {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_send: self.writer.lock().map(|w| w.is_some()).unwrap_or(false),
            can_receive: self.reader.lock().map(|r| r.is_some()).unwrap_or(false),
        }
    }

    fn read_next_sample(&self, _timeout: Duration) -> Result<Option<RawSample>> {
        let mut guard = self
            .reader
            .lock()
            .map_err(|_| IrdError::Hardware("text adapter poisoned".to_string()))?;
        let Some(reader) = guard.as_mut() else {
            return Err(IrdError::CannotReceive);
        };
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            match parse_line(&line) {
                Some(Ok(sample)) => return Ok(Some(sample)),
                Some(Err(msg)) => warn!(%msg, "skipping malformed capture line"),
                None => {}
            }
        }
    }

    fn send(&self, waveform: &Waveform) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| IrdError::Hardware("text adapter poisoned".to_string()))?;
        let Some(writer) = guard.as_mut() else {
            return Err(IrdError::CannotSend);
        };
        if waveform.frequency != 0 {
            writeln!(writer, "# carrier {} duty {}", waveform.frequency, waveform.duty_cycle)?;
        }
        for sample in &waveform.samples {
            let kind = if sample.is_pulse() { "pulse" } else { "space" };
            writeln!(writer, "{kind} {}", sample.duration)?;
        }
        writeln!(writer, "space {}", waveform.gap)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("pulse 560"), Some(Ok(RawSample::pulse(560))));
        assert_eq!(parse_line("space 1690"), Some(Ok(RawSample::space(1690))));
        assert_eq!(parse_line("timeout 50000"), Some(Ok(RawSample::space(50_000))));
        assert_eq!(parse_line("# comment"), None);
        assert_eq!(parse_line("   "), None);
        assert!(matches!(parse_line("pulse abc"), Some(Err(_))));
        assert!(matches!(parse_line("carrier 38000"), Some(Err(_))));
    }

    #[test]
    fn test_read_capture_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# captured with mode2").unwrap();
        writeln!(file, "pulse 9000").unwrap();
        writeln!(file, "space 4500").unwrap();
        file.flush().unwrap();

        let hw = TextHardware::open(Some(file.path()), None).unwrap();
        assert!(hw.capabilities().can_receive);
        assert!(!hw.capabilities().can_send);

        assert_eq!(
            hw.read_next_sample(Duration::ZERO).unwrap(),
            Some(RawSample::pulse(9000))
        );
        assert_eq!(
            hw.read_next_sample(Duration::ZERO).unwrap(),
            Some(RawSample::space(4500))
        );
        assert_eq!(hw.read_next_sample(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn test_write_transmission() {
        let file = NamedTempFile::new().unwrap();
        let hw = TextHardware::open(None, Some(file.path())).unwrap();
        let wf = Waveform {
            samples: vec![RawSample::pulse(560), RawSample::space(1690)],
            gap: 50_000,
            frequency: 38_000,
            duty_cycle: 50,
        };
        hw.send(&wf).unwrap();

        let mut text = String::new();
        File::open(file.path()).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(
            text,
            "# carrier 38000 duty 50\npulse 560\nspace 1690\nspace 50000\n"
        );
    }

    #[test]
    fn test_open_needs_a_side() {
        assert!(TextHardware::open(None, None).is_err());
    }
}
