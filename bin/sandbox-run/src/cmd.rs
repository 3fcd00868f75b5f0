use clap::Parser;

pub use crate::error::{Error, Result};

/// Main command enumeration for the sandbox-run CLI tool
#[derive(Parser, Debug)]
#[command(infer_subcommands = true, version = "0.1")]
pub enum MainCmd {
    /// Run a wasm contract against a prestate
    Run(crate::run::Cmd),
}

impl MainCmd {
    /// Execute the main command
    pub fn run(&self) -> Result<()> {
        match self {
            Self::Run(cmd) => cmd.run(),
        }
    }
}
