//! Shared fixtures for the integration tests.
//!
//! Each test binary links this module, but not every binary uses every
//! helper.
#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;

/// Two pulse-width remotes, the second with a dedicated repeat waveform.
pub const TV_CONF: &str = "\
# living-room test fixture
begin remote
  name tv
  bits 8
  flags SPACE_ENC
  eps 30
  aeps 100
  header 4500 4500
  one 560 1600
  zero 560 560
  ptrail 560
  gap 50000
  begin codes
    POWER 0x01
    MUTE  0x02
  end codes
end remote

begin remote
  name amp
  bits 16
  header 9000 4500
  one 560 1690
  zero 560 560
  ptrail 560
  repeat 9000 2250
  gap 108000
  begin codes
    VOLUME_UP   0x40bf
    VOLUME_DOWN 0xc03f
  end codes
end remote
";

/// Write `TV_CONF` into a fresh temp dir; keep the `TempDir` alive for
/// the duration of the test.
pub fn write_config(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("ird.conf");
    std::fs::write(&path, TV_CONF).expect("config fixture written");
    path
}
