use std::process::ExitCode;

use clap::{Parser, Subcommand};
use conkat::command;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase output verbosity
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process demultiplexed reads into a domain clustering table
    Cluster(command::ClusterCMD),
    /// Parse and filter a domain clustering table
    Filter(command::FilterCMD),
    /// Build, flag and compress the domain co-occurrence network
    Network(command::NetworkCMD),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match cli.command {
        Commands::Cluster(mut cmd) => cmd.try_execute(),
        Commands::Filter(mut cmd) => cmd.try_execute(),
        Commands::Network(mut cmd) => cmd.try_execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
