// az-hibernate-agent - Swap file and resume setup for VM hibernation
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use az_hibernate_agent::agent::{Agent, AgentError, AgentOptions};
use az_hibernate_agent::config::{Config, Paths};
use az_hibernate_agent::defaults;
use az_hibernate_agent::helpers::am_i_root;
use az_hibernate_agent::log::Logger;
use az_hibernate_agent::error;

#[derive(Parser)]
#[command(name = "az-hibernate-agent")]
#[command(about = "Prepare a swap file and kernel resume parameters for VM hibernation")]
#[command(version)]
struct Cli {
    /// Prefix every log line with the program name
    #[arg(long, global = true)]
    log_prefix: bool,

    /// Mirror log messages to the systemd journal
    #[arg(long, global = true)]
    journal: bool,

    /// Read configuration from this file instead of the default one
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or verify the swap file and configure resume (default)
    Setup,
    /// Show the current hibernation setup without changing anything
    Status,
}

fn main() {
    let cli = Cli::parse();

    // Flags only turn logging features on; the file decides the rest.
    let mut log = Logger::new(cli.log_prefix, cli.journal);

    let result = Config::load(cli.config.as_deref(), log)
        .map_err(AgentError::from)
        .and_then(|config| {
            log.prefix |= config.get_bool_or("log_prefix", defaults::LOG_PREFIX)?;
            log.journal |= config.get_bool_or("log_journal", defaults::LOG_JOURNAL)?;

            let agent = Agent::new(Paths::from_config(&config), AgentOptions::from_config(&config)?, log);
            match cli.command.unwrap_or(Commands::Setup) {
                Commands::Setup => setup(&agent),
                Commands::Status => status(&agent),
            }
        });

    if let Err(e) = result {
        error!(log, "{}", e);
        std::process::exit(e.exit_code());
    }
}

fn setup(agent: &Agent) -> Result<(), AgentError> {
    am_i_root()?;
    agent.run()?;
    Ok(())
}

fn status(agent: &Agent) -> Result<(), AgentError> {
    let report = agent.status()?;
    println!("{}", report);
    Ok(())
}
