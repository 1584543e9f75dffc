//! CLI argument definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// IR remote daemon and control client.
///
/// `ird serve` runs the daemon; `send`, `list`, and `version` talk to a
/// running daemon over its unix socket.
#[derive(Parser, Debug)]
#[command(name = "ird", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the daemon socket
    #[arg(long, short = 's', global = true, env = "IRD_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Output format (text for humans, json for scripts)
    #[arg(long, short = 'f', default_value = "text", global = true, env = "IRD_FORMAT")]
    pub format: OutputFormat,

    /// Verbose output (repeat for trace level)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output for scripts
    Json,
}

impl Cli {
    pub const fn use_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon
    Serve(ServeArgs),

    /// Parse a configuration file and report its remotes
    Check(CheckArgs),

    /// Transmit a button press through a running daemon
    Send(SendArgs),

    /// List remotes and buttons known to a running daemon
    List(ListArgs),

    /// Show version and build information
    Version,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Remote-description configuration file
    #[arg(long, short = 'c', env = "IRD_CONFIG")]
    pub config: PathBuf,

    /// Hardware driver backend
    #[arg(long, default_value = "text")]
    pub driver: Driver,

    /// Receive path for the text driver (`pulse N`/`space N` lines,
    /// typically a FIFO)
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Transmit path for the text driver (transmitted waveforms are
    /// appended in the same line format)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Hardware backend selection for `serve`.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum Driver {
    /// Text pulse/space files or FIFOs
    #[default]
    Text,
    /// In-memory mock (accepts everything, records transmissions)
    Mock,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Remote-description configuration file
    #[arg(long, short = 'c', env = "IRD_CONFIG")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct SendArgs {
    /// Transmission mode
    #[arg(value_enum)]
    pub mode: SendMode,

    /// Remote name from the configuration
    pub remote: String,

    /// Button name on that remote
    pub button: String,
}

/// The three transmit directives of the wire protocol.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SendMode {
    /// Transmit the signal once
    Once,
    /// Start repeating until stopped
    Start,
    /// Stop an active repeat
    Stop,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Remote to list buttons for (omit to list remotes)
    pub remote: Option<String>,

    /// Single button to show
    pub button: Option<String>,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_modes_parse() {
        let cli = Cli::parse_from(["ird", "send", "once", "tv", "POWER"]);
        match cli.command {
            Commands::Send(args) => {
                assert!(matches!(args.mode, SendMode::Once));
                assert_eq!(args.remote, "tv");
                assert_eq!(args.button, "POWER");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_socket_flag() {
        let cli = Cli::parse_from(["ird", "list", "--socket", "/tmp/x.sock"]);
        assert_eq!(cli.socket.as_deref(), Some(std::path::Path::new("/tmp/x.sock")));
    }

    #[test]
    fn test_serve_requires_config() {
        // IRD_CONFIG may leak in from the environment; the flag form
        // must always work.
        let cli = Cli::parse_from(["ird", "serve", "--config", "/etc/ird.conf", "--driver", "mock"]);
        match cli.command {
            Commands::Serve(args) => {
                assert!(matches!(args.driver, Driver::Mock));
                assert_eq!(args.config, PathBuf::from("/etc/ird.conf"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
