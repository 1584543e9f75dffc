//! Synchronous client for the daemon's unix-socket protocol.
//!
//! Used by the `send`, `list`, and `version` subcommands. One request per
//! call: write the command line, read the `BEGIN`/`END` envelope back,
//! surfacing unsolicited lines (broadcast events, SIGHUP notices) to an
//! optional callback along the way.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{IrdError, Result};

/// Parsed reply envelope for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    /// The echoed command line.
    pub command: String,
    pub success: bool,
    /// DATA payload lines, if any. For a failed request this is the
    /// error message.
    pub data: Vec<String>,
}

impl Reply {
    /// Collapse a failed reply into an error, passing successes through.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(IrdError::Protocol(if self.data.is_empty() {
                format!("request `{}` failed", self.command)
            } else {
                self.data.join("\n")
            }))
        }
    }
}

pub struct Client {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Client {
    pub fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket).map_err(|e| {
            IrdError::Other(format!(
                "cannot connect to daemon at {}: {e}",
                socket.display()
            ))
        })?;
        let writer = stream.try_clone()?;
        debug!(socket = %socket.display(), "connected");
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Send one command line and read its reply envelope. Lines arriving
    /// outside an envelope are handed to `unsolicited`.
    pub fn request(
        &mut self,
        command: &str,
        mut unsolicited: impl FnMut(&str),
    ) -> Result<Reply> {
        trace!(command, "sending request");
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        loop {
            let line = self.read_line()?;
            if line == "BEGIN" {
                let reply = self.read_envelope()?;
                // Reload notices share the envelope shape but answer
                // nobody; keep waiting for the real reply.
                if reply.command == "SIGHUP" {
                    unsolicited("SIGHUP");
                    continue;
                }
                return Ok(reply);
            }
            unsolicited(&line);
        }
    }

    /// Read envelope contents after its `BEGIN` line.
    fn read_envelope(&mut self) -> Result<Reply> {
        let command = self.read_line()?;
        let status = self.read_line()?;
        if command == "SIGHUP" && status == "END" {
            return Ok(Reply {
                command,
                success: true,
                data: Vec::new(),
            });
        }
        let success = match status.as_str() {
            "SUCCESS" => true,
            "ERROR" => false,
            other => {
                return Err(IrdError::Protocol(format!(
                    "expected SUCCESS or ERROR, got `{other}`"
                )));
            }
        };

        let mut data = Vec::new();
        let mut line = self.read_line()?;
        if line == "DATA" {
            let count: usize = self.read_line()?.parse().map_err(|_| {
                IrdError::Protocol("malformed DATA count".to_string())
            })?;
            for _ in 0..count {
                data.push(self.read_line()?);
            }
            line = self.read_line()?;
        }
        if line != "END" {
            return Err(IrdError::Protocol(format!(
                "expected END, got `{line}`"
            )));
        }
        Ok(Reply {
            command,
            success,
            data,
        })
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(IrdError::Protocol(
                "daemon closed the connection".to_string(),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    fn pair() -> (Client, UnixStream) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ird.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let client = Client::connect(&path).unwrap();
        let (server, _) = listener.accept().unwrap();
        // The tempdir may go away; the sockets stay usable.
        (client, server)
    }

    #[test]
    fn test_request_parses_success_with_data() {
        let (mut client, mut server) = pair();
        server
            .write_all(b"BEGIN\nLIST\nSUCCESS\nDATA\n2\ntv\nvcr\nEND\n")
            .unwrap();
        let reply = client.request("LIST", |_| {}).unwrap();
        assert!(reply.success);
        assert_eq!(reply.command, "LIST");
        assert_eq!(reply.data, vec!["tv".to_string(), "vcr".to_string()]);
    }

    #[test]
    fn test_request_parses_error_reply() {
        let (mut client, mut server) = pair();
        server
            .write_all(b"BEGIN\nSEND_ONCE tv NOPE\nERROR\nDATA\n1\nUnknown button\nEND\n")
            .unwrap();
        let reply = client.request("SEND_ONCE tv NOPE", |_| {}).unwrap();
        assert!(!reply.success);
        let err = reply.into_result().unwrap_err();
        assert!(err.to_string().contains("Unknown button"));
    }

    #[test]
    fn test_unsolicited_lines_are_surfaced() {
        let (mut client, mut server) = pair();
        server
            .write_all(
                b"0000000000000001 00 POWER tv\nBEGIN\nSIGHUP\nEND\nBEGIN\nVERSION\nSUCCESS\nDATA\n1\n0.1.0\nEND\n",
            )
            .unwrap();
        let mut seen = Vec::new();
        let reply = client.request("VERSION", |l| seen.push(l.to_string())).unwrap();
        assert_eq!(reply.data, vec!["0.1.0".to_string()]);
        assert_eq!(
            seen,
            vec!["0000000000000001 00 POWER tv".to_string(), "SIGHUP".to_string()]
        );
    }

    #[test]
    fn test_closed_connection_is_protocol_error() {
        let (mut client, server) = pair();
        drop(server);
        let err = client.request("VERSION", |_| {}).unwrap_err();
        assert!(matches!(err, IrdError::Protocol(_)));
    }
}
