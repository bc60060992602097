//! Error types for the arxiv-harvest library.
//!
//! This module provides the error type returned by every fallible operation in the crate. The
//! variants fall into three groups:
//! - Request validation (category, dates, filters), raised before any network activity
//! - Fetch failures that the retry policy could not (or must not) recover from
//! - Protocol and payload errors coming back from the OAI-PMH endpoint
//!
//! Transient failures such as rate limiting never show up here unless the retry policy gave up
//! on them, in which case they surface as [`HarvestError::RetriesExhausted`].
//!
//! # Examples
//!
//! ```no_run
//! use arxiv_harvest::{errors::HarvestError, HarvestRequest, Harvester};
//!
//! # async fn example() -> Result<(), HarvestError> {
//! let request = HarvestRequest::new("cs.NOPE");
//! match Harvester::new().harvest(&request).await {
//!   Err(HarvestError::InvalidCategory { category, .. }) => println!("unknown: {category}"),
//!   Err(HarvestError::RetriesExhausted { attempts, .. }) => println!("gave up after {attempts}"),
//!   Err(e) => println!("Other error: {}", e),
//!   Ok(harvest) => println!("{} records", harvest.len()),
//! }
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

use crate::fetch::TransportError;

/// Errors that can occur while preparing or running a harvest.
#[derive(Error, Debug)]
pub enum HarvestError {
  /// The category is not part of the arXiv taxonomy.
  ///
  /// `valid` lists the base categories the resolver knows about so the message can point the
  /// caller in the right direction.
  #[error("Invalid category '{category}'. Valid base categories: {valid}")]
  InvalidCategory {
    /// The category string as supplied by the caller
    category: String,
    /// Comma separated list of known base categories
    valid:    String,
  },

  /// A date could not be parsed as `YYYY-MM-DD`.
  #[error("Invalid date '{0}', expected YYYY-MM-DD")]
  InvalidDate(String),

  /// The start of the date range lies after its end.
  #[error("Invalid date range: {from} is after {until}")]
  InvalidDateRange {
    /// Requested start date
    from:  String,
    /// Requested end date
    until: String,
  },

  /// A filter names a field that records do not have.
  #[error("Unknown record field '{0}'")]
  UnknownField(String),

  /// A filter expression is not of the form `field=term[,term...]`.
  #[error("Invalid filter '{0}', expected field=term[,term...]")]
  InvalidFilter(String),

  /// The server answered with a status that retrying will not fix.
  #[error("HTTP {status} from {url}")]
  Http {
    /// The URL that was requested
    url:    String,
    /// The HTTP status code returned
    status: u16,
  },

  /// The request could not be issued at all.
  #[error("Request to {url} failed: {source}")]
  Transport {
    /// The URL that was requested
    url:    String,
    /// The underlying transport failure
    source: TransportError,
  },

  /// A transient failure persisted through every allowed attempt.
  #[error("Giving up on {url} after {attempts} attempts: {last}")]
  RetriesExhausted {
    /// The URL that was requested
    url:      String,
    /// How many attempts were made in total
    attempts: u32,
    /// Description of the last failure seen
    last:     String,
  },

  /// The OAI-PMH endpoint reported a protocol error.
  ///
  /// `noRecordsMatch` is not reported this way; an empty listing is a valid (empty) harvest.
  #[error("OAI-PMH error: {code} - {message}")]
  Oai {
    /// Standard OAI-PMH error code, e.g. `badResumptionToken`
    code:    String,
    /// Human-readable message from the server
    message: String,
  },

  /// The response body is not a well-formed OAI-PMH document.
  #[error("Malformed response: {0}")]
  MalformedResponse(String),
}

impl HarvestError {
  /// Whether this error was raised while validating the request, before anything was fetched.
  pub fn is_request_error(&self) -> bool {
    matches!(
      self,
      HarvestError::InvalidCategory { .. }
        | HarvestError::InvalidDate(_)
        | HarvestError::InvalidDateRange { .. }
        | HarvestError::UnknownField(_)
        | HarvestError::InvalidFilter(_)
    )
  }
}
