//! Entry point: CLI parsing, `--kill` handling, and the accept loop.
//!
//! Daemonization (process forking, session leader setup) is left to
//! the host process; this binary always runs in the foreground and
//! expects a supervisor to background it if needed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{error, info};

use oidc_broker::cli::Cli;
use oidc_broker::config::Config;
use oidc_broker::context::AgentContext;
use oidc_broker::{PID_ENV_VAR, SOCKET_ENV_VAR, dispatcher, housekeeping, setup_tracing};

fn socket_dir(cli: &Cli, config: &Config) -> PathBuf {
    if let Some(dir) = &cli.socket_dir {
        return dir.clone();
    }
    if let Some(dir) = &config.socket.dir {
        return PathBuf::from(dir);
    }
    let base = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(base).join(format!("oidc-broker-{}", std::process::id()))
}

fn handle_kill() -> ExitCode {
    let Ok(pid_str) = std::env::var(PID_ENV_VAR) else {
        eprintln!("{PID_ENV_VAR} is not set; is the daemon running?");
        return ExitCode::FAILURE;
    };
    let Ok(pid) = pid_str.parse::<i32>() else {
        eprintln!("{PID_ENV_VAR} does not contain a valid pid: {pid_str}");
        return ExitCode::FAILURE;
    };

    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        eprintln!("failed to signal daemon (pid {pid}): {e}");
        return ExitCode::FAILURE;
    }

    if let Ok(sock_path) = std::env::var(SOCKET_ENV_VAR) {
        let path = PathBuf::from(&sock_path);
        let _ = std::fs::remove_file(&path);
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir(parent);
        }
    }

    println!("unset {SOCKET_ENV_VAR};");
    println!("unset {PID_ENV_VAR};");
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.kill {
        return handle_kill();
    }

    let log_level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    if let Err(e) = setup_tracing(log_level, cli.log_format.as_deref()) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    config.log.level = log_level.to_string();
    if cli.log_format.is_some() {
        config.log.format = cli.log_format.clone();
    }

    let dir = socket_dir(&cli, &config);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        error!(error = %e, dir = %dir.display(), "failed to create socket directory");
        return ExitCode::FAILURE;
    }
    let socket_path = dir.join("broker.sock");

    // SAFETY: single-threaded at this point in startup, before the
    // accept loop or any spawned task reads the environment.
    #[allow(unsafe_code)]
    unsafe {
        std::env::set_var(SOCKET_ENV_VAR, &socket_path);
        std::env::set_var(PID_ENV_VAR, std::process::id().to_string());
    }
    println!(
        "{SOCKET_ENV_VAR}={}; export {SOCKET_ENV_VAR};",
        socket_path.display()
    );
    println!("{PID_ENV_VAR}={}; export {PID_ENV_VAR};", std::process::id());

    let ctx = match AgentContext::new(config) {
        Ok(ctx) => std::sync::Arc::new(ctx),
        Err(e) => {
            error!(error = %e, "failed to build agent context");
            return ExitCode::FAILURE;
        }
    };

    let housekeeping_interval = ctx.config.session.housekeeping_interval;
    tokio::spawn(housekeeping::run(ctx.clone(), housekeeping_interval));

    info!(socket = %socket_path.display(), pid = std::process::id(), "oidc-broker starting");
    match dispatcher::run(ctx, &socket_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "dispatcher exited with error");
            ExitCode::FAILURE
        }
    }
}
