//! Mount a Stud.IP course file area as a filesystem, without ever syncing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use studip_fuse::app_config::Config;
use studip_fuse::{daemon, fuse_check};

#[derive(Parser)]
#[command(version, about = "Mount Stud.IP course files as a read-only filesystem.")]
struct Args {
    #[arg(short, long, value_parser, help = "Optional path to a config TOML.")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Mount the filesystem.
    Run {
        /// Run in the background.
        #[arg(short, long, help = "Detach and run as a daemon.")]
        daemonize: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Load config first — errors use eprintln since tracing isn't
    // initialized yet.
    let config = Config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        std::process::exit(1);
    }

    let Command::Run { daemonize } = args.command.unwrap_or(Command::Run { daemonize: false });

    if let Err(e) = fuse_check::ensure_fuse() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    if daemonize {
        run_daemonized(config);
    } else {
        init_tracing();
        if let Err(e) = daemon::spawn(config) {
            error!("Daemon failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Run the daemon in the background. Tracing is initialized *after* the
/// fork so its worker threads are created in the child process and survive
/// daemonization.
fn run_daemonized(config: Config) {
    // Pre-fork: no tracing yet. Use eprintln! for error reporting.
    let pid_file_parent = config
        .daemon
        .pid_file
        .parent()
        .unwrap_or_else(|| unreachable!("Config::validate() ensures pid_file has a parent"));
    if let Err(e) = std::fs::create_dir_all(pid_file_parent) {
        eprintln!("Failed to create PID file directory: {e}");
        std::process::exit(1);
    }

    let log_file = match config.daemon.log.target.open_log_file() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            std::process::exit(1);
        }
    };

    let mut daemonize = daemonize::Daemonize::new()
        .pid_file(&*config.daemon.pid_file)
        .chown_pid_file(true)
        .user(config.uid)
        .group(config.gid);

    if let Some(file) = log_file {
        match file.try_clone() {
            Ok(clone) => {
                daemonize = daemonize.stdout(file).stderr(clone);
            }
            Err(e) => {
                eprintln!("Failed to clone log file handle: {e}");
                std::process::exit(1);
            }
        }
    }

    match daemonize.start() {
        Ok(()) => {
            init_tracing();
            if let Err(e) = daemon::spawn(config) {
                error!("Daemon failed: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Failed to spawn the daemon: {e}");
            std::process::exit(1);
        }
    }
}
