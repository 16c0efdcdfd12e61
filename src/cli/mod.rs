//! Command-line interface for landmark-qc.
//!
//! Provides commands for running calculations, validating manifests and
//! listing registered metrics.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RunArgs, ValidateArgs};
