//! Wire protocol: request parsing and the response envelope.
//!
//! One command per line. Every reply is wrapped in an envelope that
//! echoes the request:
//!
//! ```text
//! BEGIN
//! LIST tv POWER
//! SUCCESS
//! DATA
//! 1
//! 000000000000e045 POWER
//! END
//! ```
//!
//! Errors use `ERROR` instead of `SUCCESS`, with the message as data
//! lines. Decoded button presses go out unsolicited, outside any
//! envelope, one line per event.

use crate::codec::Event;
use crate::error::{IrdError, Result};

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    List {
        remote: Option<String>,
        button: Option<String>,
    },
    SendOnce {
        remote: String,
        button: String,
    },
    SendStart {
        remote: String,
        button: String,
    },
    SendStop {
        remote: String,
        button: String,
    },
    Version,
}

impl Request {
    /// Parse one request line. Unknown commands and wrong argument
    /// counts are protocol errors; the connection stays open.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let cmd = parts
            .next()
            .ok_or_else(|| IrdError::Protocol("empty command".to_string()))?;
        let args: Vec<&str> = parts.collect();
        match cmd {
            "LIST" => match args.as_slice() {
                [] => Ok(Self::List {
                    remote: None,
                    button: None,
                }),
                [remote] => Ok(Self::List {
                    remote: Some((*remote).to_string()),
                    button: None,
                }),
                [remote, button] => Ok(Self::List {
                    remote: Some((*remote).to_string()),
                    button: Some((*button).to_string()),
                }),
                _ => Err(IrdError::Protocol(
                    "LIST takes at most a remote and a button".to_string(),
                )),
            },
            "SEND_ONCE" | "SEND_START" | "SEND_STOP" => {
                let [remote, button] = args.as_slice() else {
                    return Err(IrdError::Protocol(format!(
                        "{cmd} needs exactly <remote> <button>"
                    )));
                };
                let remote = (*remote).to_string();
                let button = (*button).to_string();
                Ok(match cmd {
                    "SEND_ONCE" => Self::SendOnce { remote, button },
                    "SEND_START" => Self::SendStart { remote, button },
                    _ => Self::SendStop { remote, button },
                })
            }
            "VERSION" => {
                if args.is_empty() {
                    Ok(Self::Version)
                } else {
                    Err(IrdError::Protocol("VERSION takes no arguments".to_string()))
                }
            }
            other => Err(IrdError::Protocol(format!("unknown command `{other}`"))),
        }
    }
}

/// Success envelope; `data` lines are optional.
pub fn success(echo: &str, data: &[String]) -> String {
    let mut out = format!("BEGIN\n{echo}\nSUCCESS\n");
    append_data(&mut out, data);
    out.push_str("END\n");
    out
}

/// Error envelope; the message always travels as data lines.
pub fn error(echo: &str, message: &str) -> String {
    let lines: Vec<String> = message.lines().map(str::to_string).collect();
    let mut out = format!("BEGIN\n{echo}\nERROR\n");
    append_data(&mut out, &lines);
    out.push_str("END\n");
    out
}

fn append_data(out: &mut String, data: &[String]) {
    if data.is_empty() {
        return;
    }
    out.push_str("DATA\n");
    out.push_str(&format!("{}\n", data.len()));
    for line in data {
        out.push_str(line);
        out.push('\n');
    }
}

/// Unsolicited reload notification sent to every connected client.
pub fn sighup_notice() -> String {
    "BEGIN\nSIGHUP\nEND\n".to_string()
}

/// Broadcast line for one decoded press:
/// `<code> <repeat> <button> <remote>`.
pub fn event_line(event: &Event) -> String {
    format!(
        "{:016x} {:02x} {} {}\n",
        event.code, event.repeat, event.button, event.remote
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_variants() {
        assert_eq!(
            Request::parse("LIST").unwrap(),
            Request::List {
                remote: None,
                button: None
            }
        );
        assert_eq!(
            Request::parse("LIST tv POWER").unwrap(),
            Request::List {
                remote: Some("tv".to_string()),
                button: Some("POWER".to_string())
            }
        );
        assert!(Request::parse("LIST tv POWER extra").is_err());
    }

    #[test]
    fn test_parse_send_commands() {
        assert_eq!(
            Request::parse("SEND_ONCE tv POWER").unwrap(),
            Request::SendOnce {
                remote: "tv".to_string(),
                button: "POWER".to_string()
            }
        );
        assert!(Request::parse("SEND_ONCE tv").is_err());
        assert!(Request::parse("SEND_START").is_err());
        assert!(matches!(
            Request::parse("SEND_STOP a b").unwrap(),
            Request::SendStop { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(Request::parse("FLASH tv").is_err());
        assert!(Request::parse("").is_err());
        assert!(Request::parse("VERSION please").is_err());
    }

    #[test]
    fn test_success_envelope_exact() {
        let reply = success("LIST tv POWER", &["000000000000e045 POWER".to_string()]);
        assert_eq!(
            reply,
            "BEGIN\nLIST tv POWER\nSUCCESS\nDATA\n1\n000000000000e045 POWER\nEND\n"
        );
    }

    #[test]
    fn test_success_without_data() {
        assert_eq!(
            success("SEND_ONCE tv POWER", &[]),
            "BEGIN\nSEND_ONCE tv POWER\nSUCCESS\nEND\n"
        );
    }

    #[test]
    fn test_error_envelope() {
        assert_eq!(
            error("SEND_ONCE tv NOPE", "Unknown button 'NOPE' on remote 'tv'"),
            "BEGIN\nSEND_ONCE tv NOPE\nERROR\nDATA\n1\nUnknown button 'NOPE' on remote 'tv'\nEND\n"
        );
    }

    #[test]
    fn test_event_line_format() {
        let event = Event {
            remote: "tv".to_string(),
            button: "POWER".to_string(),
            code: 0xe045,
            repeat: 3,
        };
        assert_eq!(event_line(&event), "000000000000e045 03 POWER tv\n");
    }
}
