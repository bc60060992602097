//! A library for harvesting arXiv metadata over the OAI-PMH protocol.
//!
//! A harvest walks arXiv's `ListRecords` pages for one category and date range, following the
//! resumption tokens the server hands out until the listing is exhausted or the configured time
//! budget runs out. Every `<arXiv>` metadata block is flattened into a [`MetadataRecord`], and
//! records can optionally be narrowed down with case-insensitive substring [`Filters`].
//!
//! # Example
//! ```rust,no_run
//! use arxiv_harvest::{Field, HarvestRequest, Harvester};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!   let request = HarvestRequest::new("cs.SE")
//!     .with_dates("2025-01-01", "2025-01-05")?
//!     .filter(Field::Abstract, ["learning"]);
//!
//!   let harvest = Harvester::new().harvest(&request).await?;
//!   for record in harvest.iter() {
//!     println!("{}: {}", record.id, record.title);
//!   }
//!
//!   Ok(())
//! }
//! ```

#![warn(missing_docs, clippy::missing_docs_in_private_items)]
use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use chrono::{Datelike, Local, NaiveDate};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
#[cfg(test)] use tracing_test::traced_test;
use url::Url;

pub mod category;
pub mod errors;
pub mod fetch;
pub mod filter;
pub mod format;
pub mod harvest;
pub mod oai;
pub mod record;

pub use category::{CategoryResolver, RemoteCategories, StaticCategories};
use errors::HarvestError;
pub use fetch::{HttpResponse, PageFetcher, ReqwestTransport, RetryPolicy, Transport};
pub use filter::Filters;
pub use harvest::{Harvest, HarvestRequest, HarvestStatus, Harvester};
pub use oai::ResumptionCursor;
pub use record::{Field, FieldValue, MetadataRecord};

/// The public arXiv OAI-PMH endpoint.
pub const ARXIV_OAI_URL: &str = "http://export.arxiv.org/oai2";

lazy_static! {
    /// [`ARXIV_OAI_URL`], parsed.
    pub static ref ARXIV_OAI: Url = Url::parse(ARXIV_OAI_URL).unwrap();
}
