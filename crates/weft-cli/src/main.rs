#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use commands::ConfigArgs;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(author, version, about = "Build-graph orchestrator for web assets", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the project once
    Build {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Rebuild whenever a source file changes
    Watch {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Build, serve the output and reload connected browsers on change
    Dev {
        #[command(flatten)]
        config: ConfigArgs,

        /// Port to listen on (overrides `dev.port`)
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Host to bind to (overrides `dev.host`)
        #[arg(long)]
        host: Option<String>,
    },

    /// Resolve and transform every module, then print the module graph
    Graph {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);

    logging::init(cli.verbose, cli.json);

    if let Some(Commands::Build { config }) = &cli.command {
        let action = commands::build::BuildAction {
            cwd,
            config: config.clone(),
        };
        return commands::build::run(action, cli.json);
    }

    if let Some(Commands::Watch { config }) = &cli.command {
        let action = commands::watch::WatchAction {
            cwd,
            config: config.clone(),
        };
        return commands::watch::run(action, cli.json);
    }

    if let Some(Commands::Dev { config, port, host }) = &cli.command {
        let action = commands::dev::DevAction {
            cwd,
            config: config.clone(),
            port: *port,
            host: host.clone(),
        };
        return commands::dev::run(action, cli.json);
    }

    if let Some(Commands::Graph { config }) = &cli.command {
        let action = commands::graph::GraphAction {
            cwd,
            config: config.clone(),
        };
        return commands::graph::run(action, cli.json);
    }

    commands::version::run(cli.json)
}
