use crate::echo;
use crate::logging;
use crate::protocol::function_id;
use crate::runtime_config::ServerConfig;
use crate::server::RpcServer;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Command-line interface for the mayrpc server
#[derive(Parser)]
#[command(name = "mayrpc-server")]
#[command(about = "Coroutine-powered binary RPC server", long_about = None, version)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve the built-in demo handlers
    Serve {
        /// YAML configuration file; replaces the MAYRPC_* environment
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Scheduler worker threads
        #[arg(long)]
        workers: Option<usize>,

        /// Heartbeat timeout in milliseconds (0 disables it)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print the function id derived from each handler name
    Ids {
        /// Handler names
        #[arg(required = true)]
        names: Vec<String>,
    },
}

impl Commands {
    /// Resolve the server configuration for `serve`: environment or YAML, then flags.
    pub fn server_config(&self) -> Result<Option<ServerConfig>> {
        let Commands::Serve {
            config,
            host,
            port,
            workers,
            timeout_ms,
        } = self
        else {
            return Ok(None);
        };

        let mut resolved = match config {
            Some(path) => ServerConfig::from_yaml_file(path)?,
            None => ServerConfig::from_env(),
        };
        if let Some(host) = host {
            resolved = resolved.with_host(host.clone());
        }
        if let Some(port) = port {
            resolved = resolved.with_port(*port);
        }
        if let Some(workers) = workers {
            resolved = resolved.with_worker_threads(*workers);
        }
        if let Some(ms) = timeout_ms {
            resolved = resolved.with_connection_timeout(Some(Duration::from_millis(*ms)));
        }
        Ok(Some(resolved))
    }
}

/// Execute the CLI command provided by the user
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, logging cannot be
/// installed, or the server fails to start.
pub fn run_cli(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Ids { names } => {
            for name in names {
                println!("{}\t{name}", function_id(name));
            }
            Ok(())
        }
        Commands::Serve { .. } => {
            let config = cli
                .command
                .server_config()?
                .context("serve command produced no configuration")?;
            let _log_guard = logging::init_logging()?;
            serve(config)
        }
    }
}

fn serve(config: ServerConfig) -> Result<()> {
    let server = Arc::new(RpcServer::new(config));
    for id in echo::register_builtin(&server) {
        if let Some(desc) = server.registry().lookup(id) {
            info!(function_id = %id, handler_name = desc.name(), "Serving handler");
        }
    }

    install_signal_handler(Arc::clone(&server))?;
    server
        .start()
        .with_context(|| format!("failed to start server on {}:{}", server.config().host, server.config().port))?;
    Ok(())
}

#[cfg(unix)]
fn install_signal_handler(server: Arc<RpcServer>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to install signal handler")?;
    std::thread::Builder::new()
        .name("mayrpc-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "Shutdown signal received");
                server.stop();
            }
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handler(_server: Arc<RpcServer>) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_flags_override_base_config() {
        let cli = Cli::try_parse_from([
            "mayrpc-server",
            "serve",
            "--host",
            "127.0.0.1",
            "--port",
            "9123",
            "--workers",
            "2",
            "--timeout-ms",
            "250",
        ])
        .unwrap();
        let config = cli.command.server_config().unwrap().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9123);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.connection_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_serve_reads_yaml_config() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port: 7001\nconnection_timeout_ms: 0").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let cli = Cli::try_parse_from(["mayrpc-server", "serve", "--config", &path]).unwrap();
        let config = cli.command.server_config().unwrap().unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.connection_timeout(), None);
    }

    #[test]
    fn test_ids_requires_a_name() {
        assert!(Cli::try_parse_from(["mayrpc-server", "ids"]).is_err());
        let cli = Cli::try_parse_from(["mayrpc-server", "ids", "echo"]).unwrap();
        assert!(cli.command.server_config().unwrap().is_none());
    }
}
