mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, render::RenderArgs, run::RunArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "winupdate",
    about = "Drive a Windows machine through update and restart cycles until nothing is left to install",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "WINUPDATE_CONFIG",
        default_value = "winupdate.yaml"
    )]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the update scripts and loop until the target reports no pending updates
    Run(RunArgs),

    /// Print a script or command exactly as it would be sent to the target
    Render(RenderArgs),

    /// Create, validate, or inspect the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(&cli.config, args, cli.json),
        Commands::Render(args) => cmd::render::run(&cli.config, args),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
