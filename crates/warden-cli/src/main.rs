//! `warden` -- parental-controls fleet control plane.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use warden_control::{ControlCommand, ControlResponse};
use warden_daemon::{warden_dir, DaemonConfig};
use warden_types::{AgentId, ChildId};

/// Warden -- central control plane for a parental-controls fleet.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Increase logging verbosity (RUST_LOG=debug)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Control socket path (defaults to ~/.warden/control.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon in the foreground
    Run {
        /// Path to warden.toml (defaults to ~/.warden/warden.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show fleet status
    Status,

    /// List registered agents
    Agents,

    /// Show recent violations
    Violations {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        last: usize,
    },

    /// Show the activity log
    Activity {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        last: usize,
    },

    /// Clear the violations ring
    ClearViolations,

    /// Bind an agent to a child
    Link { agent: String, child: String },

    /// Remove an agent's child binding (cancels any pending logout)
    Unlink { agent: String },

    /// Map a username on an agent to a child
    Map {
        agent: String,
        username: String,
        /// Child to map to; omit to clear the mapping
        #[arg(long)]
        child: Option<String>,
    },

    /// Set the parent-account usernames for an agent
    Parents {
        agent: String,
        /// Usernames that are never monitored
        usernames: Vec<String>,
    },

    /// Show or update fleet settings
    Settings {
        /// New monitor interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// New grace period in seconds
        #[arg(long)]
        grace_secs: Option<u32>,
        /// Pause computer-time accounting while idle
        #[arg(long)]
        pause_on_idle: Option<bool>,
    },

    /// Force a logout with the default grace period
    Logout { agent: String },

    /// Lock an agent's session immediately
    Lock { agent: String },

    /// Apply or clear focus mode on an agent
    Focus {
        agent: String,
        child: String,
        /// Clear focus mode instead of applying it
        #[arg(long)]
        off: bool,
    },

    /// Stream UI events from the daemon
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(|| warden_dir().join("control.sock"));

    match cli.command {
        Commands::Run { config } => run_daemon(config),
        Commands::Status => round_trip(&socket, ControlCommand::GetStatus),
        Commands::Agents => round_trip(&socket, ControlCommand::GetAgents),
        Commands::Violations { last } => round_trip(
            &socket,
            ControlCommand::GetViolations { limit: Some(last) },
        ),
        Commands::Activity { last } => round_trip(
            &socket,
            ControlCommand::GetActivityLog { limit: Some(last) },
        ),
        Commands::ClearViolations => round_trip(&socket, ControlCommand::ClearViolations),
        Commands::Link { agent, child } => round_trip(
            &socket,
            ControlCommand::LinkAgent {
                agent: AgentId::new(agent),
                child: ChildId::new(child),
            },
        ),
        Commands::Unlink { agent } => round_trip(
            &socket,
            ControlCommand::UnlinkAgent {
                agent: AgentId::new(agent),
            },
        ),
        Commands::Map {
            agent,
            username,
            child,
        } => round_trip(
            &socket,
            ControlCommand::SetUserMapping {
                agent: AgentId::new(agent),
                username,
                child: child.map(ChildId::new),
            },
        ),
        Commands::Parents { agent, usernames } => round_trip(
            &socket,
            ControlCommand::SetParentAccounts {
                agent: AgentId::new(agent),
                usernames,
            },
        ),
        Commands::Settings {
            interval_ms,
            grace_secs,
            pause_on_idle,
        } => {
            if interval_ms.is_none() && grace_secs.is_none() && pause_on_idle.is_none() {
                round_trip(&socket, ControlCommand::GetSettings)
            } else {
                let patch = warden_types::SettingsPatch {
                    monitor_interval_ms: interval_ms,
                    grace_period_secs: grace_secs,
                    pause_on_idle,
                    ..Default::default()
                };
                round_trip(&socket, ControlCommand::UpdateSettings { patch })
            }
        }
        Commands::Logout { agent } => round_trip(
            &socket,
            ControlCommand::ForceLogout {
                agent: AgentId::new(agent),
            },
        ),
        Commands::Lock { agent } => round_trip(
            &socket,
            ControlCommand::LockSession {
                agent: AgentId::new(agent),
            },
        ),
        Commands::Focus { agent, child, off } => round_trip(
            &socket,
            ControlCommand::TriggerFocusMode {
                agent: AgentId::new(agent),
                enabled: !off,
                child: ChildId::new(child),
            },
        ),
        Commands::Watch => watch(&socket),
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

/// Run the daemon on a dedicated runtime.
fn run_daemon(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(|| warden_dir().join("warden.toml"));
    let config = DaemonConfig::load(&path)
        .with_context(|| format!("loading daemon config from {}", path.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("tokio runtime creation failed")?;
    runtime.block_on(warden_daemon::run(config))
}

/// Send one command over the control socket, print the response.
fn round_trip(socket: &std::path::Path, command: ControlCommand) -> Result<()> {
    let response = send_command(socket, &command)?;
    if !response.ok {
        bail!("{}", response.message);
    }
    match response.data {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => println!("{}", response.message),
    }
    Ok(())
}

fn send_command(socket: &std::path::Path, command: &ControlCommand) -> Result<ControlResponse> {
    let mut stream = UnixStream::connect(socket).with_context(|| {
        format!(
            "connecting to daemon at {} (is `warden run` running?)",
            socket.display()
        )
    })?;

    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    stream.write_all(line.as_bytes())?;

    let mut reader = BufReader::new(stream);
    let mut reply = String::new();
    reader.read_line(&mut reply)?;
    serde_json::from_str(&reply).context("unparseable daemon response")
}

/// Stream UI events until interrupted.
fn watch(socket: &std::path::Path) -> Result<()> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("connecting to daemon at {}", socket.display()))?;
    stream.write_all(b"{\"type\": \"watch\"}\n")?;

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // First line is the ack; events follow.
        if let Ok(ack) = serde_json::from_str::<ControlResponse>(&line) {
            if !ack.ok {
                bail!("{}", ack.message);
            }
            continue;
        }
        println!("{line}");
    }
    Ok(())
}
