//! Configuration file handling.
//!
//! The configuration language is the line-oriented remote-description
//! grammar: `begin remote` blocks carrying timing keys and either a
//! `codes` block (numeric codes) or a `raw_codes` block (literal timing
//! per button).

mod parser;

pub use parser::{parse, parse_c_int, parse_file};
