//! Graft command-line tool
//!
//! Runs the bootstrap sequence against a game directory and inspects module
//! images.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "graft")]
#[command(about = "Patch and bootstrap a module loader in-process", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Colored output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preload, patch and start the loader
    Run {
        /// Config file (defaults to ./graft.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory of modules to preload
        #[arg(long)]
        modules_dir: Option<PathBuf>,
        /// Wrapper module to load first
        #[arg(long)]
        wrapper: Option<PathBuf>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Disassemble a module image
    Disasm {
        /// Module file
        file: PathBuf,
        /// Only show methods with this name
        #[arg(short, long)]
        method: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let color = output::resolve_color_choice(cli.color.as_deref());

    match cli.command {
        Commands::Run {
            config,
            modules_dir,
            wrapper,
            json,
        } => commands::run::execute(commands::run::RunArgs {
            config,
            modules_dir,
            wrapper,
            json,
            color,
        }),

        Commands::Disasm { file, method } => commands::disasm::execute(&file, method.as_deref()),
    }
}
