//! CLI module for gatekeeper
//!
//! Provides the command-line interface using clap.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::schemas::{EntityType, Wave};

/// Gatekeeper - validation orchestration and workflow state machine for task-driven development
#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(version)]
#[command(about = "Validation orchestration and workflow state machine for task-driven development")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress info-level output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override the working directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,
}

impl Cli {
    /// Default log filter for the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show tasks grouped by state
    Status,

    /// Show one entity with its allowed transitions
    Show {
        /// Entity type (task, qa, session)
        entity_type: EntityType,

        id: String,
    },

    /// Move an entity to another state
    Transition {
        /// Entity type (task, qa, session)
        entity_type: EntityType,

        id: String,

        /// Target state
        state: String,

        /// Session requesting the transition
        #[arg(long)]
        session: Option<String>,
    },

    /// Claim a task for a session
    Claim {
        /// Task ID
        task: String,

        #[arg(long)]
        session: String,
    },

    /// Record the implementation report for the current round
    Report {
        /// Task ID
        task: String,

        /// File holding the report body (reads stdin if omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(long)]
        session: Option<String>,
    },

    /// Run validators against a task bundle
    Validate {
        /// Task ID
        task: String,

        #[arg(long)]
        session: Option<String>,

        /// Run only this wave (global, critical, comprehensive)
        #[arg(long)]
        wave: Option<Wave>,

        /// Plan and check evidence without running validators
        #[arg(long)]
        check_only: bool,

        /// Run validators one at a time
        #[arg(long)]
        sequential: bool,

        /// Validation preset
        #[arg(long)]
        preset: Option<String>,

        /// Changed file, used to match validator triggers (repeatable)
        #[arg(long = "changed")]
        changed: Vec<String>,
    },

    /// Show evidence for a task round
    Evidence {
        /// Task ID
        task: String,

        /// Round number (defaults to the latest)
        #[arg(long)]
        round: Option<u32>,

        /// Check that the round's implementation report matches the worktree
        #[arg(long)]
        preflight: bool,
    },

    /// Release a stale task lock
    Unlock {
        /// Task ID
        task: String,

        /// Remove the lock even if its holder looks alive
        #[arg(long)]
        force: bool,
    },
}
