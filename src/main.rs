//! IR remote daemon and control client.
//!
//! `ird serve` runs the daemon; the other subcommands either talk to a
//! running daemon over its socket or work on configuration files locally.
#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use serde::Serialize;

use ird::cli::{self, Cli, Commands, SendMode};
use ird::client::Client;
use ird::error::{IrdError, Result};
use ird::hw::{HardwareAdapter, MockHardware, TextHardware};
use ird::server::{self, ServerConfig};
use ird::{config, logging, remote};

/// Build information embedded at compile time.
mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    pub fn git_sha() -> &'static str {
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    }

    pub fn git_dirty() -> &'static str {
        option_env!("VERGEN_GIT_DIRTY").unwrap_or("false")
    }

    pub fn build_timestamp() -> &'static str {
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    }

    pub fn rustc_semver() -> &'static str {
        option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown")
    }

    pub fn target() -> &'static str {
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown")
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        output_error(&cli, &e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Serve(args) => cmd_serve(cli, args),
        Commands::Check(args) => cmd_check(cli, args),
        Commands::Send(args) => cmd_send(cli, args),
        Commands::List(args) => cmd_list(cli, args),
        Commands::Version => cmd_version(cli),
        Commands::Completions(args) => cmd_completions(args),
    }
}

/// Default socket location: the user runtime directory, falling back to
/// the system temp directory.
fn socket_path(cli: &Cli) -> PathBuf {
    cli.socket.clone().unwrap_or_else(|| {
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("ird.sock")
    })
}

fn cmd_serve(cli: &Cli, args: &cli::ServeArgs) -> Result<()> {
    let hw: Rc<dyn HardwareAdapter> = match args.driver {
        cli::Driver::Text => Rc::new(TextHardware::open(
            args.input.as_deref(),
            args.output.as_deref(),
        )?),
        cli::Driver::Mock => Rc::new(MockHardware::new()),
    };
    let server_cfg = ServerConfig {
        socket: socket_path(cli),
        config: args.config.clone(),
    };
    server::run(&server_cfg, hw)
}

fn cmd_check(cli: &Cli, args: &cli::CheckArgs) -> Result<()> {
    let profiles = config::parse_file(&args.config)?;

    if cli.use_json() {
        let report: Vec<CheckedRemote> = profiles.iter().map(CheckedRemote::from).collect();
        output_json(&report);
    } else {
        for p in &profiles {
            println!("{} ({} buttons)", p.name, p.codes.len());
            if cli.verbose > 0 {
                for c in &p.codes {
                    println!("  {}", c.name);
                }
            }
        }
        if !cli.quiet {
            println!("OK: {} remote(s)", profiles.len());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckedRemote {
    name: String,
    bits: u32,
    buttons: Vec<String>,
}

impl From<&remote::RemoteProfile> for CheckedRemote {
    fn from(p: &remote::RemoteProfile) -> Self {
        Self {
            name: p.name.clone(),
            bits: p.total_bits(),
            buttons: p.codes.iter().map(|c| c.name.clone()).collect(),
        }
    }
}

fn cmd_send(cli: &Cli, args: &cli::SendArgs) -> Result<()> {
    let directive = match args.mode {
        SendMode::Once => "SEND_ONCE",
        SendMode::Start => "SEND_START",
        SendMode::Stop => "SEND_STOP",
    };
    let command = format!("{directive} {} {}", args.remote, args.button);

    let mut client = Client::connect(&socket_path(cli))?;
    let reply = client.request(&command, |_| {})?.into_result()?;

    if cli.use_json() {
        output_json(&serde_json::json!({
            "command": reply.command,
            "ok": true,
        }));
    } else if !cli.quiet {
        println!("{directive} {} {}: ok", args.remote, args.button);
    }
    Ok(())
}

fn cmd_list(cli: &Cli, args: &cli::ListArgs) -> Result<()> {
    let mut command = "LIST".to_string();
    if let Some(remote) = &args.remote {
        command.push(' ');
        command.push_str(remote);
    }
    if let Some(button) = &args.button {
        command.push(' ');
        command.push_str(button);
    }

    let mut client = Client::connect(&socket_path(cli))?;
    let reply = client.request(&command, |_| {})?.into_result()?;

    if cli.use_json() {
        if args.remote.is_some() {
            // Button lines carry `<code> <name>`.
            let entries: Vec<serde_json::Value> = reply
                .data
                .iter()
                .map(|line| match line.split_once(' ') {
                    Some((code, name)) => serde_json::json!({ "code": code, "button": name }),
                    None => serde_json::json!({ "button": line }),
                })
                .collect();
            output_json(&entries);
        } else {
            output_json(&reply.data);
        }
    } else {
        for line in &reply.data {
            println!("{line}");
        }
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_version(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        output_json(&serde_json::json!({
            "version": build_info::VERSION,
            "git_sha": build_info::git_sha(),
            "git_dirty": build_info::git_dirty() == "true",
            "build_timestamp": build_info::build_timestamp(),
            "rustc_version": build_info::rustc_semver(),
            "target": build_info::target(),
        }));
    } else {
        println!("ird {}", build_info::VERSION);
        println!(
            "git: {}{}",
            build_info::git_sha(),
            if build_info::git_dirty() == "true" {
                " (dirty)"
            } else {
                ""
            }
        );
        println!("built: {}", build_info::build_timestamp());
        println!("rustc: {}", build_info::rustc_semver());
        println!("target: {}", build_info::target());
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_completions(args: &cli::CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    clap_complete::generate(args.shell, &mut Cli::command(), "ird", &mut io::stdout());
    Ok(())
}

fn output_json<T: Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("JSON serialization failed: {e}"),
    }
}

fn output_error(cli: &Cli, error: &IrdError) {
    if cli.use_json() {
        let json = serde_json::json!({
            "error": true,
            "message": error.to_string(),
            "suggestion": error.suggestion(),
            "recoverable": error.is_user_recoverable(),
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => eprintln!("{text}"),
            Err(_) => eprintln!("Error: {error}"),
        }
    } else {
        eprintln!("Error: {error}");
        if let Some(suggestion) = error.suggestion() {
            eprintln!("Hint: {suggestion}");
        }
    }
}
