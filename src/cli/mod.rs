//! CLI module for platesched - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands that drive the simulated
//! lab: run its worklists, plan a single path, or check its topology.

pub mod commands;

pub use commands::Cli;
