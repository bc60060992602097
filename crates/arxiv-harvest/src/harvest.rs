//! The harvest loop.
//!
//! A harvest is one complete run of the `ListRecords` paging protocol for a category and date
//! range:
//!
//! 1. the category is resolved into a set spec and the date range is checked, before any request
//! 2. the first page is requested with `from`, `until`, `metadataPrefix` and `set`
//! 3. every page is parsed, its records filtered and appended in arrival order
//! 4. while the server hands out a resumption token and the time budget is not spent, the next
//!    page is requested with that token alone
//!
//! The time budget is checked between pages only, so a harvest can overrun it by at most one
//! page. A harvest stopped by the budget is still a success; its [`HarvestStatus`] tells it
//! apart from one that reached the end of the listing. Fetch and parse failures, on the other
//! hand, abort the whole harvest and discard what was collected so far.
//!
//! # Examples
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use arxiv_harvest::{HarvestRequest, HarvestStatus, Harvester, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = HarvestRequest::new("physics:cond-mat")
//!   .with_dates("2017-05-27", "2017-05-30")?
//!   .retry(RetryPolicy::default().with_retry_delay(Duration::from_secs(10)))
//!   .timeout(Duration::from_secs(600));
//!
//! let harvest = Harvester::new().harvest(&request).await?;
//! if harvest.status == HarvestStatus::TimedOut {
//!   println!("partial result after {} pages", harvest.pages);
//! }
//! # Ok(())
//! # }
//! ```

use std::ops::Deref;

use tokio::time::Instant;

use super::*;

/// Default wall-clock budget for a harvest.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(date: &str) -> Result<NaiveDate, HarvestError> {
  NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
    .map_err(|_| HarvestError::InvalidDate(date.to_owned()))
}

/// Everything that defines one harvest.
///
/// # Examples
///
/// ```
/// use arxiv_harvest::{Field, HarvestRequest};
///
/// let request = HarvestRequest::new("stat")
///   .with_dates("2017-12-23", "2017-12-25")?
///   .filter(Field::Affiliation, ["facebook"])
///   .filter(Field::Abstract, ["learning"]);
/// assert!(!request.filters.is_empty());
/// # Ok::<(), arxiv_harvest::errors::HarvestError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestRequest {
  /// Category to harvest, in any form the resolver accepts
  pub category: String,
  /// First day of the range (inclusive)
  pub from:     NaiveDate,
  /// Last day of the range (inclusive)
  pub until:    NaiveDate,
  /// Retry behaviour for every page request
  pub retry:    RetryPolicy,
  /// Wall-clock budget for the whole harvest
  pub timeout:  Duration,
  /// Record filters; empty keeps everything
  pub filters:  Filters,
}

impl HarvestRequest {
  /// Creates a request for `category` covering the current month up to today.
  pub fn new(category: impl Into<String>) -> Self {
    let today = Local::now().date_naive();
    Self {
      category: category.into(),
      from:     today.with_day(1).unwrap_or(today),
      until:    today,
      retry:    RetryPolicy::default(),
      timeout:  DEFAULT_TIMEOUT,
      filters:  Filters::default(),
    }
  }

  /// Sets the date range from `YYYY-MM-DD` strings.
  pub fn with_dates(self, from: &str, until: &str) -> Result<Self, HarvestError> {
    Ok(self.from(parse_date(from)?).until(parse_date(until)?))
  }

  /// Sets the first day of the range.
  pub fn from(mut self, from: NaiveDate) -> Self {
    self.from = from;
    self
  }

  /// Sets the last day of the range.
  pub fn until(mut self, until: NaiveDate) -> Self {
    self.until = until;
    self
  }

  /// Sets the retry policy.
  pub fn retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Sets the wall-clock budget.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Adds filter terms for `field`.
  pub fn filter<I, S>(mut self, field: Field, terms: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>, {
    self.filters.insert(field, terms);
    self
  }

  /// Replaces all filters.
  pub fn filters(mut self, filters: Filters) -> Self {
    self.filters = filters;
    self
  }

  /// Checks the parts of the request that need no resolver.
  pub fn validate(&self) -> Result<(), HarvestError> {
    if self.from > self.until {
      return Err(HarvestError::InvalidDateRange {
        from:  self.from.to_string(),
        until: self.until.to_string(),
      });
    }
    Ok(())
  }
}

/// How a harvest ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestStatus {
  /// The server signalled the end of the listing.
  Complete,
  /// The time budget ran out while more pages were available.
  TimedOut,
}

/// The result of a harvest.
///
/// Dereferences to the collected records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Harvest {
  /// Records that passed the filters, in arrival order
  pub records:            Vec<MetadataRecord>,
  /// Whether the listing was exhausted
  pub status:             HarvestStatus,
  /// Number of pages fetched
  pub pages:              usize,
  /// Size of the full listing, as last advertised by the server
  pub complete_list_size: Option<u64>,
  /// Deleted or unreadable records that were left out
  pub skipped:            usize,
}

impl Harvest {
  /// Whether every page of the listing was fetched.
  pub fn is_complete(&self) -> bool { self.status == HarvestStatus::Complete }
}

impl Deref for Harvest {
  type Target = [MetadataRecord];

  fn deref(&self) -> &Self::Target { &self.records }
}

/// Runs harvests against an OAI-PMH endpoint.
///
/// A harvester holds no per-harvest state, so one instance can run any number of harvests,
/// including concurrently.
#[derive(Debug, Clone)]
pub struct Harvester<T = ReqwestTransport, R = StaticCategories> {
  /// Where page requests go
  transport: T,
  /// Validates categories and maps them to set specs
  resolver:  R,
  /// OAI-PMH endpoint
  base_url:  Url,
}

impl Harvester {
  /// Creates a harvester for the public arXiv endpoint using the built-in taxonomy.
  pub fn new() -> Self {
    Self::with_parts(ReqwestTransport::new(), StaticCategories, ARXIV_OAI.clone())
  }
}

impl Default for Harvester {
  fn default() -> Self { Self::new() }
}

impl<T: Transport, R: CategoryResolver> Harvester<T, R> {
  /// Creates a harvester from its collaborators.
  pub fn with_parts(transport: T, resolver: R, base_url: Url) -> Self {
    Self { transport, resolver, base_url }
  }

  /// Runs one harvest.
  ///
  /// # Errors
  ///
  /// - [`HarvestError::InvalidDateRange`] or [`HarvestError::InvalidCategory`] before anything
  ///   is fetched
  /// - any fetch error from [`PageFetcher::fetch`]
  /// - [`HarvestError::MalformedResponse`] or [`HarvestError::Oai`] for unusable pages
  pub async fn harvest(&self, request: &HarvestRequest) -> Result<Harvest, HarvestError> {
    request.validate()?;
    let set = self.resolver.resolve(&request.category).await?;
    let fetcher = PageFetcher::new(&self.transport, &request.retry);

    info!("Harvesting set {set} from {} until {}", request.from, request.until);
    let start = Instant::now();
    let mut url = oai::list_records_url(&self.base_url, &set, request.from, request.until);
    let mut harvest = Harvest {
      records:            Vec::new(),
      status:             HarvestStatus::Complete,
      pages:              0,
      complete_list_size: None,
      skipped:            0,
    };

    loop {
      debug!("Fetching page {} via: {url}", harvest.pages + 1);
      let body = fetcher.fetch(&url).await?;
      trace!("OAI-PMH response: {body}");

      let page = oai::parse_list_records(&body)?;
      harvest.pages += 1;
      harvest.skipped += page.skipped;
      if page.complete_list_size.is_some() {
        harvest.complete_list_size = page.complete_list_size;
      }

      let received = page.records.len();
      let before = harvest.records.len();
      harvest.records.extend(page.records.into_iter().filter(|r| request.filters.matches(r)));
      info!(
        "Page {}: kept {} of {received} records ({} skipped), {} so far (listing size {})",
        harvest.pages,
        harvest.records.len() - before,
        page.skipped,
        harvest.records.len(),
        harvest.complete_list_size.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
      );

      let Some(cursor) = page.cursor else {
        break;
      };

      let elapsed = start.elapsed();
      if elapsed >= request.timeout {
        warn!(
          "Stopping after {:.1} seconds with pages left, timeout is {:.1} seconds",
          elapsed.as_secs_f64(),
          request.timeout.as_secs_f64()
        );
        harvest.status = HarvestStatus::TimedOut;
        break;
      }
      if let Some(position) = cursor.cursor() {
        debug!("Listing cursor at {position}");
      }
      url = oai::resume_url(&self.base_url, "ListRecords", &cursor);
    }

    info!(
      "Fetching completed in {:.1} seconds, {} records total",
      start.elapsed().as_secs_f64(),
      harvest.records.len()
    );
    Ok(harvest)
  }
}
