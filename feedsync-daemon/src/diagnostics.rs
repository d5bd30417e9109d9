//! Command Line and Logging
//!
//! CLI definition, logging setup and build information for the feedsync
//! daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Feedsync daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "feedsync-daemon")]
#[command(about = "Live chat feed with desktop notifications", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, default_value = "true")]
    pub timestamps: bool,

    /// Use this config file instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Command to run (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Daemon commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Follow the feed and notify about new messages
    Run {
        /// Print the feed to stdout and count as actively viewing it
        /// (notifications are suppressed while attached)
        #[arg(long)]
        attach: bool,
    },

    /// Send a message as the configured identity
    Send {
        /// Message text
        text: String,
    },

    /// Register a profile and save its user id
    Register {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        phone: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        confirm_password: String,

        /// Profile picture location
        #[arg(long)]
        avatar_url: Option<String>,

        /// Use this user id instead of a generated one
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Sign in with a registered email and password and save the user id
    Login {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Forget the saved user id
    Logout,

    /// Show current configuration
    DumpConfig,

    /// Show daemon version and build information
    Version {
        /// Show detailed build information
        #[arg(long)]
        verbose: bool,
    },
}

impl Cli {
    /// The command to run, `run` when none was given
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Run { attach: false })
    }
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true)
        // Keep stdout for the attached feed view
        .with_writer(std::io::stderr);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

/// Build information for diagnostics
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: Option<&'static str>,
    pub core_version: &'static str,
}

impl BuildInfo {
    /// Get build information
    pub fn get() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_hash: option_env!("GIT_HASH"),
            core_version: feedsync_core::VERSION,
        }
    }

    /// Display build information
    pub fn display(&self, verbose: bool) {
        println!("Feedsync Daemon v{}", self.version);

        if verbose {
            if let Some(hash) = self.git_hash {
                println!("Git commit: {}", hash);
            }
            println!("Core library: {}", self.core_version);
            println!("Platform: {}", std::env::consts::OS);
            println!("Architecture: {}", std::env::consts::ARCH);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::parse_from(["feedsync-daemon"]);
        assert_eq!(cli.command(), Command::Run { attach: false });
        assert_eq!(cli.log_level, "info");
        assert!(cli.timestamps);
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::parse_from(["feedsync-daemon", "--json-logs", "send", "hello there"]);
        assert!(cli.json_logs);
        assert_eq!(
            cli.command(),
            Command::Send {
                text: "hello there".to_string()
            }
        );
    }

    #[test]
    fn test_parse_register() {
        let cli = Cli::parse_from([
            "feedsync-daemon",
            "register",
            "--name",
            "Ana",
            "--email",
            "ana@example.com",
            "--phone",
            "555",
            "--password",
            "secret1",
            "--confirm-password",
            "secret1",
        ]);
        match cli.command() {
            Command::Register {
                name,
                avatar_url,
                user_id,
                ..
            } => {
                assert_eq!(name, "Ana");
                assert!(avatar_url.is_none());
                assert!(user_id.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_login_and_logout() {
        let cli = Cli::parse_from([
            "feedsync-daemon",
            "login",
            "--email",
            "ana@example.com",
            "--password",
            "secret1",
        ]);
        assert_eq!(
            cli.command(),
            Command::Login {
                email: "ana@example.com".to_string(),
                password: "secret1".to_string(),
            }
        );

        let cli = Cli::parse_from(["feedsync-daemon", "logout"]);
        assert_eq!(cli.command(), Command::Logout);
    }

    #[test]
    fn test_build_info() {
        let build_info = BuildInfo::get();
        assert!(!build_info.version.is_empty());
        assert!(!build_info.core_version.is_empty());
    }
}
