//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: execute a task end to end
//! - resume: continue a run from its journal
//! - steps: show a run's committed steps
//! - outcomes: list persisted outcome records

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vibe-runner - sandboxed code-generation worker
#[derive(Parser, Debug)]
#[command(name = "vibe-runner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a task: create a sandbox, iterate the agent, persist the outcome
    Run {
        /// Natural-language task for the agent
        task: String,

        /// Use an in-memory sandbox and a scripted model instead of real ones
        #[arg(long)]
        dry_run: bool,

        /// Override the iteration budget
        #[arg(short, long)]
        max_iterations: Option<u32>,
    },

    /// Resume a run from its step journal
    Resume {
        /// Run ID to resume
        run_id: String,
    },

    /// Show the committed steps of a run
    Steps {
        /// Run ID to inspect
        run_id: String,
    },

    /// List persisted outcome records
    Outcomes {
        /// Only show the record of this run
        #[arg(short, long)]
        run_id: Option<String>,
    },
}
