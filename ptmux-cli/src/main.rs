//! `ptmux`: a thin reference front-end over the `ptmuxd` client library and
//! daemon entry point.

use std::{fs, io, path::PathBuf, sync::Mutex};

use anyhow::Context;
use clap::{Parser, Subcommand};
use ptmuxd::{client::Client, config, consts, transport};
use tracing::error;
use tracing_subscriber::fmt::format::FmtSpan;

mod attach;
mod create;
mod detach;
mod history;
mod kill;
mod list;
mod resize;
mod tty;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[clap(author, about, version = VERSION)]
struct Args {
    #[clap(short, long, help = "The file to write logs to; defaults to stderr for `daemon`, discarded otherwise")]
    log_file: Option<String>,

    #[clap(short, long, action = clap::ArgAction::Count, help = "Show more in logs, may be provided multiple times")]
    verbose: u8,

    #[clap(
        short,
        long,
        long_help = "The path to the control socket.

Defaults to $XDG_RUNTIME_DIR/ptmux/mux.sock, or ~/.ptmux/mux.sock if
XDG_RUNTIME_DIR is unset."
    )]
    socket: Option<String>,

    #[clap(short, long, help = "A TOML file containing daemon tuning configuration")]
    config_file: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[clap(about = "Runs the ptmux daemon in the foreground")]
    Daemon,

    #[clap(about = "Creates a new PTY-backed session and prints its id")]
    Create {
        #[clap(help = "A human-readable name for the session")]
        name: String,
        #[clap(long, help = "Initial terminal columns; defaults to the local terminal's")]
        cols: Option<u16>,
        #[clap(long, help = "Initial terminal rows; defaults to the local terminal's")]
        rows: Option<u16>,
        #[clap(long, help = "Working directory for the spawned child; defaults to the daemon's")]
        cwd: Option<String>,
        #[clap(long = "env", value_parser = parse_env_pair, help = "Extra KEY=VALUE environment entries, may be repeated")]
        env: Vec<(String, String)>,
        #[clap(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            help = "Command to run instead of the default shell, e.g. `-- htop`"
        )]
        argv: Vec<String>,
    },

    #[clap(about = "Attaches interactively to an existing session")]
    Attach {
        #[clap(help = "The session id to attach to")]
        id: String,
    },

    #[clap(about = "Lists known sessions")]
    List {
        #[clap(long, help = "Print sessions as a JSON array")]
        json: bool,
    },

    #[clap(about = "Stops following a session's output without killing it")]
    Detach {
        #[clap(help = "The session id to detach")]
        id: String,
    },

    #[clap(about = "Resizes a session's pseudo-terminal")]
    Resize {
        #[clap(help = "The session id to resize")]
        id: String,
        #[clap(help = "New column count")]
        cols: u16,
        #[clap(help = "New row count")]
        rows: u16,
    },

    #[clap(about = "Sends a signal to a session's child process")]
    Kill {
        #[clap(help = "The session id to kill")]
        id: String,
        #[clap(long, help = "Signal name to send (default SIGHUP, then SIGKILL after a grace period)")]
        signal: Option<String>,
    },

    #[clap(about = "Prints a session's scrollback history")]
    History {
        #[clap(help = "The session id to read history from")]
        id: String,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let trace_level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    if let Some(log_file) = args.log_file.clone() {
        let file = fs::File::create(log_file).context("creating log file")?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(Mutex::new(file))
            .init();
    } else if let Commands::Daemon = args.command {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .init();
    }

    let socket_path = transport::resolve_socket_path(args.socket.as_deref())?;

    let result = match args.command {
        Commands::Daemon => {
            let cfg = config::read_config(args.config_file.as_deref().map(PathBuf::from).as_deref())?;
            ptmuxd::daemon::run(config::Manager::new(cfg), socket_path)
        }
        Commands::Create { name, cols, rows, cwd, env, argv } => {
            connect(&socket_path).and_then(|client| create::run(&client, name, cols, rows, cwd, argv, env))
        }
        Commands::Attach { id } => connect(&socket_path).and_then(|client| attach::run(client, id)),
        Commands::List { json } => connect(&socket_path).and_then(|client| list::run(&client, json)),
        Commands::Detach { id } => connect(&socket_path).and_then(|client| detach::run(&client, id)),
        Commands::Resize { id, cols, rows } => {
            connect(&socket_path).and_then(|client| resize::run(&client, id, cols, rows))
        }
        Commands::Kill { id, signal } => connect(&socket_path).and_then(|client| kill::run(&client, id, signal)),
        Commands::History { id } => connect(&socket_path).and_then(|client| history::run(&client, id)),
    };

    if let Err(err) = result {
        error!("{:?}", err);
        eprintln!("ptmux: {:?}", err);
        std::process::exit(1);
    }

    Ok(())
}

fn connect(socket_path: &std::path::Path) -> anyhow::Result<Client> {
    let current_exe = std::env::current_exe().context("resolving own executable path")?;
    Client::connect(current_exe, socket_path, consts::AUTOSPAWN_TIMEOUT)
}
