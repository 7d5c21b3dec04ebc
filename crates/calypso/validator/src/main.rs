use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use validator_app::ValidatorConfig;

mod commands;

use commands::*;

#[derive(Parser)]
#[command(version, about = "Contactless Calypso ticket validator")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the readers of the configured back-end
    List,

    /// Run the validator, reading operator commands from stdin
    Run,

    /// Play the reference scenarios on the virtual back-end
    Simulate,

    /// Print the effective configuration
    Config,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = ValidatorConfig::load(cli.config.as_deref())?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::List => list_command(&config)?,
        Commands::Run => run_command(&config)?,
        Commands::Simulate => simulate_command(&config)?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();
}
