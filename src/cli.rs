//! Command-line interface
//!
//! Daemonization itself (forking, session leader setup) is left to the
//! host process; this binary accepts the flags below and always runs
//! in the foreground.

use std::path::PathBuf;

use clap::Parser;

/// Local OIDC credential broker daemon
#[derive(Parser, Debug)]
#[command(name = "oidc-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OIDC_BROKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory to create the control socket in
    #[arg(long, env = "OIDC_BROKER_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "OIDC_BROKER_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OIDC_BROKER_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Raise log verbosity to debug
    #[arg(long)]
    pub debug: bool,

    /// Do not daemonize; run attached to the controlling terminal
    #[arg(long)]
    pub console: bool,

    /// Terminate the running daemon (reads pid from OIDC_BROKER_PID,
    /// removes the socket and its parent directory, prints `unset`
    /// statements for the exported environment variables)
    #[arg(short, long)]
    pub kill: bool,
}
