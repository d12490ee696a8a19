//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - simulate: run the configured worklists on the simulated lab
//! - plan: plan a robot path between two locations
//! - check: report disconnected places and unserved device types

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Platesched - plate scheduling and robot path planning
#[derive(Parser, Debug)]
#[command(name = "platesched")]
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
    /// Run every configured worklist on the simulated lab
    Simulate {
        /// Answer operator errors automatically instead of prompting
        #[arg(short, long)]
        auto: bool,

        /// Make the first N robot transfers fail
        #[arg(long, default_value_t = 0)]
        fail_transfers: u32,
    },

    /// Plan a robot path between two locations
    Plan {
        /// Source location as device.location
        from: String,

        /// Destination location as device.location
        to: String,
    },

    /// Check the lab topology and worklist device coverage
    Check {
        /// Print the findings as JSON
        #[arg(long)]
        json: bool,
    },
}
