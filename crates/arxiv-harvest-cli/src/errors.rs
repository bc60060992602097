//! Error types for the arxiv-harvest command line tool.
//!
//! Every failure is wrapped transparently so the user sees the underlying message, whether it
//! comes from the harvest itself, from writing the output, or from encoding records.

use thiserror::Error;

/// Errors that can occur while running a CLI command.
#[derive(Error, Debug)]
pub enum CliError {
  /// Errors from the underlying harvest library
  #[error(transparent)]
  Harvest(#[from] arxiv_harvest::errors::HarvestError),

  /// File system and IO operation errors
  #[error(transparent)]
  IO(#[from] std::io::Error),

  /// Record encoding errors
  #[error(transparent)]
  Json(#[from] serde_json::Error),
}
