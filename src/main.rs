//! cad-bridge-mcp: MCP server bridging AI assistants to a CAD host plugin.
//!
//! Serves MCP over stdio and forwards modelling tools to the host plugin's
//! local socket. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use cad_bridge_mcp::bridge::{Dispatcher, HealthMonitor, Session};
use cad_bridge_mcp::config::{self, Config};
use cad_bridge_mcp::mcp::McpServer;

/// MCP server bridging AI assistants to a CAD host plugin.
///
/// Tools are forwarded to the plugin over a local TCP socket. Without a
/// reachable host the bridge simulates results or refuses work, depending on
/// configuration.
#[derive(Parser, Debug)]
#[command(name = "cad-bridge-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,

    /// CAD host plugin address (overrides config and CAD_BRIDGE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// CAD host plugin port (overrides config and CAD_BRIDGE_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Never contact the host; answer every command from the simulator
    #[arg(long)]
    simulate: bool,

    /// Session file for design intent (defaults to ~/.cad-bridge-mcp/session.json)
    #[arg(long, value_name = "PATH")]
    session_file: Option<PathBuf>,

    /// Keep design intent in memory only
    #[arg(long, conflicts_with = "session_file")]
    no_session_file: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.bridge.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.bridge.port = port;
        }
        if self.simulate {
            config.bridge.force_simulation = true;
        }
        if self.no_session_file {
            config.session.persistence_path = None;
        } else if let Some(path) = &self.session_file {
            config.session.persistence_path = Some(path.clone());
        } else if config.session.persistence_path.is_none() {
            config.session.persistence_path = config::default_session_path();
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber. stdout belongs to MCP.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(config: Config) -> std::io::Result<()> {
    let session = Arc::new(Session::new(&config));
    let mode = session.start().await;
    info!(%mode, "Bridge ready, waiting for MCP client");

    let monitor = HealthMonitor::spawn(Arc::clone(&session));
    let mut server = McpServer::stdio(Dispatcher::new(Arc::clone(&session)));
    let result = server.run().await;

    monitor.stop().await;
    session.shutdown().await;
    result
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig is read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut cfg);

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %cfg.bridge.host,
        port = cfg.bridge.port,
        simulate = cfg.bridge.force_simulation,
        "Starting cad-bridge-mcp server"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(cfg)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from([
            "cad-bridge-mcp",
            "--host",
            "10.0.0.5",
            "--port",
            "9000",
            "--simulate",
            "--no-session-file",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.bridge.host, "10.0.0.5");
        assert_eq!(config.bridge.port, 9000);
        assert!(config.bridge.force_simulation);
        assert!(config.session.persistence_path.is_none());
    }

    #[test]
    fn quiet_wins_over_config_level() {
        assert_eq!(get_log_level(0, true, "debug"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
    }
}
