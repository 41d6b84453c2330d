#![forbid(unsafe_code)]

mod cli;
mod shutdown;
mod startup;

use std::path::Path;

use anyhow::Result;

use cli::Command;
use infrastructure::config::AgentConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("ovsentinel-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        Some(Command::ValidateConfig) => {
            AgentConfig::load(Path::new(&cli.config))?;
            println!("{}: OK", cli.config);
            Ok(())
        }

        // No subcommand = run the agent daemon
        None => startup::run(&cli).await,
    }
}
