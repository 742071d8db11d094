//! Conveyor CLI - operator surface for the feature pipeline
//!
//! Inspect features, ask for the next action, and repair stuck state.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use conveyor_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{
    BranchArgs, Context, FeatureArgs, LocksArgs, NextArgs, PhaseArgs, ReconcileArgs, RollbackArgs,
};

/// Conveyor: feature pipeline control plane
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the record store (overrides config and env)
    #[arg(long, global = true, env = "CONVEYOR_STATE_ROOT")]
    state_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new feature record
    Init(FeatureArgs),

    /// Show a feature's phase, tasks, sessions and locks
    #[command(visible_alias = "st")]
    Status(FeatureArgs),

    /// Print the next action for a feature as JSON
    Next(NextArgs),

    /// Set a feature's phase
    Phase(PhaseArgs),

    /// Interrupt stale sessions and remove stale locks
    Reconcile(ReconcileArgs),

    /// Manage issue locks
    Locks(LocksArgs),

    /// Show files and symbols produced by completed issues
    Registry(FeatureArgs),

    /// Create the working branch for an issue
    Branch(BranchArgs),

    /// Revert the commits recorded by a session or an issue
    Rollback(RollbackArgs),

    /// Show current configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    // Load configuration with overrides
    let config = Config::load_with_overrides(cli.state_root.clone())?;

    if cli.verbose {
        tracing::debug!(
            state_root = %config.state.root.display(),
            session_ttl = ?config.session.ttl,
            lock_timeout = ?config.locks.stale_timeout,
            "Configuration loaded"
        );
    }

    let Some(command) = cli.command else {
        println!("Conveyor - feature pipeline control plane");
        println!();
        println!("Use --help for usage information");
        return Ok(());
    };

    let ctx = || Context::open(config.clone());
    match command {
        Commands::Init(args) => args.init(&ctx()?),
        Commands::Status(args) => args.status(&ctx()?),
        Commands::Next(args) => args.execute(&ctx()?),
        Commands::Phase(args) => args.execute(&ctx()?),
        Commands::Reconcile(args) => args.execute(&ctx()?),
        Commands::Locks(args) => args.execute(&ctx()?),
        Commands::Registry(args) => args.registry(&ctx()?),
        Commands::Branch(args) => args.execute(&ctx()?),
        Commands::Rollback(args) => args.execute(&ctx()?),
        Commands::Config => {
            print_config(&config);
            Ok(())
        }
    }
}

fn print_config(config: &Config) {
    println!("Conveyor Configuration");
    println!("======================");
    println!();
    println!("State:");
    println!("  root: {}", config.state.root.display());
    println!();
    println!("Sessions:");
    println!("  ttl: {}", humanize(config.session.ttl));
    println!();
    println!("Locks:");
    println!("  stale_timeout: {}", humanize(config.locks.stale_timeout));
    println!();
    println!("Git:");
    println!("  base_branch: {}", config.git.base_branch);
    println!("  branch_prefix: {}", config.git.branch_prefix);
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}

fn humanize(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs % 3600 == 0 && secs > 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 && secs > 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
