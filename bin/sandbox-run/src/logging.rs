//! Tracing setup for `sandbox-run`.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{Error, Result};

/// Where sandbox logs go and how much of them.
#[derive(Debug, Clone, Default, Parser)]
pub struct LogArgs {
    /// Log verbosity, one level per flag from error (-v) to trace (-vvvvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long = "log.file", visible_aliases = ["log-file"], global = true)]
    pub log_file: Option<PathBuf>,

    /// Plain stderr output without ANSI colors
    #[arg(long = "log.no-color", visible_aliases = ["log-no-color"], global = true)]
    pub log_no_color: bool,
}

impl LogArgs {
    /// Installs the global subscriber. `RUST_LOG`, when set, overrides the `-v` count and the
    /// sandbox and runner targets are silent by default.
    pub fn init(&self) -> Result<()> {
        let filter = match (std::env::var_os("RUST_LOG"), self.level()) {
            (Some(_), _) => EnvFilter::from_default_env(),
            (None, None) => EnvFilter::new("off"),
            (None, Some(level)) => {
                EnvFilter::new(format!("sandbox_run={level},contract_sandbox={level}"))
            }
        };

        // Targets only help once sandbox internals are in the log.
        let show_target = self.verbose >= 4;

        let installed = if let Some(ref log_file) = self.log_file {
            // Files never get ANSI colors.
            let file = std::fs::File::create(log_file)?;
            fmt()
                .with_env_filter(filter)
                .with_target(show_target)
                .with_writer(file)
                .with_ansi(false)
                .try_init()
        } else {
            fmt()
                .with_env_filter(filter)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .with_ansi(!self.log_no_color)
                .try_init()
        };
        installed.map_err(|err| Error::Logging(err.to_string()))
    }

    const fn level(&self) -> Option<Level> {
        Some(match self.verbose {
            0 => return None,
            1 => Level::ERROR,
            2 => Level::WARN,
            3 => Level::INFO,
            4 => Level::DEBUG,
            _ => Level::TRACE,
        })
    }
}
