//! Page fetching with retry and backoff.
//!
//! The network is reached through the [`Transport`] trait so that harvests can be replayed
//! against scripted responses; [`ReqwestTransport`] is the production implementation. On top of
//! it, [`PageFetcher`] applies a [`RetryPolicy`]:
//!
//! | Outcome                                       | Handling                              |
//! |-----------------------------------------------|---------------------------------------|
//! | 2xx                                           | body returned                         |
//! | 503, 429                                      | rate limited, sleep for `Retry-After` |
//! | 408, other 5xx, timeouts, dropped connections | transient, exponential backoff        |
//! | anything else                                 | fatal, surfaced immediately           |
//!
//! Both retry paths count towards the attempt cap; once it is hit the last failure is surfaced
//! as [`HarvestError::RetriesExhausted`].
//!
//! # Examples
//!
//! ```no_run
//! use arxiv_harvest::{PageFetcher, ReqwestTransport, RetryPolicy};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = ReqwestTransport::new();
//! let policy = RetryPolicy::default().with_max_attempts(Some(3));
//! let fetcher = PageFetcher::new(&transport, &policy);
//!
//! let body = fetcher.fetch(&Url::parse("http://export.arxiv.org/oai2?verb=Identify")?).await?;
//! println!("{body}");
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

use super::*;

/// Delay used for rate-limited responses that carry no usable `Retry-After` header.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Default cap on the total number of attempts per page.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Upper bound applied to server-advised delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-request timeout used by [`ReqwestTransport::new`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// User agent sent to the OAI-PMH endpoint.
const USER_AGENT: &str = concat!("arxiv-harvest/", env!("CARGO_PKG_VERSION"));

/// A raw HTTP response as seen by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  /// HTTP status code
  pub status:      u16,
  /// Value of the `Retry-After` header, if present
  pub retry_after: Option<String>,
  /// Response body
  pub body:        String,
}

impl HttpResponse {
  /// A `200 OK` response with `body`.
  pub fn ok(body: impl Into<String>) -> Self {
    Self { status: 200, retry_after: None, body: body.into() }
  }

  /// An empty response with the given status.
  pub fn status(status: u16) -> Self { Self { status, retry_after: None, body: String::new() } }

  /// Sets the `Retry-After` header value.
  pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
    self.retry_after = Some(value.into());
    self
  }

  /// Whether the status is in the 2xx range.
  pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }
}

/// Failure to obtain any response at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  /// The request did not complete in time.
  #[error("request timed out: {0}")]
  Timeout(String),

  /// No connection could be established.
  #[error("connection failed: {0}")]
  Connect(String),

  /// The connection dropped while sending the request or reading the body.
  #[error("connection interrupted: {0}")]
  Interrupted(String),

  /// The request itself is unusable (bad URL, redirect loop, TLS setup, ...).
  #[error("request failed: {0}")]
  Request(String),
}

impl TransportError {
  /// Whether retrying the same request may succeed.
  pub fn is_transient(&self) -> bool { !matches!(self, TransportError::Request(_)) }
}

impl From<reqwest::Error> for TransportError {
  fn from(error: reqwest::Error) -> Self {
    let message = error.to_string();
    if error.is_timeout() {
      TransportError::Timeout(message)
    } else if error.is_connect() {
      TransportError::Connect(message)
    } else if error.is_request() || error.is_body() {
      TransportError::Interrupted(message)
    } else {
      TransportError::Request(message)
    }
  }
}

/// Issues HTTP GET requests.
///
/// Implemented by [`ReqwestTransport`] for real traffic; tests substitute scripted transports.
#[allow(async_fn_in_trait)]
pub trait Transport {
  /// Performs a GET request for `url` and returns the response, whatever its status.
  async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
  async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
    (**self).get(url).await
  }
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
  /// Internal web client used to connect to the endpoint.
  client: reqwest::Client,
}

impl ReqwestTransport {
  /// Creates a transport with the default per-request timeout.
  pub fn new() -> Self { Self::with_timeout(DEFAULT_REQUEST_TIMEOUT) }

  /// Creates a transport whose requests time out after `timeout`.
  pub fn with_timeout(timeout: Duration) -> Self {
    let client = reqwest::Client::builder()
      .user_agent(USER_AGENT)
      .timeout(timeout)
      .build()
      .unwrap_or_else(|e| {
        warn!("Falling back to a default HTTP client: {e}");
        reqwest::Client::new()
      });
    Self { client }
  }
}

impl Default for ReqwestTransport {
  fn default() -> Self { Self::new() }
}

impl Transport for ReqwestTransport {
  async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
    let response = self.client.get(url.clone()).send().await?;
    let status = response.status().as_u16();
    let retry_after = response
      .headers()
      .get(reqwest::header::RETRY_AFTER)
      .and_then(|value| value.to_str().ok())
      .map(str::to_owned);
    let body = response.text().await?;
    Ok(HttpResponse { status, retry_after, body })
  }
}

/// Reads a `Retry-After` header value as a delay.
///
/// Only the delay-seconds form is understood. An absent, non-numeric or negative value (and the
/// HTTP-date form) yields `default`. Advised delays are capped at [`MAX_RETRY_AFTER`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use arxiv_harvest::fetch::parse_retry_after;
///
/// let default = Duration::from_secs(30);
/// assert_eq!(parse_retry_after(Some("5"), default), Duration::from_secs(5));
/// assert_eq!(parse_retry_after(Some("soon"), default), default);
/// assert_eq!(parse_retry_after(None, default), default);
/// ```
pub fn parse_retry_after(value: Option<&str>, default: Duration) -> Duration {
  match value.map(str::trim).and_then(|v| v.parse::<u64>().ok()) {
    Some(seconds) => Duration::from_secs(seconds).min(MAX_RETRY_AFTER),
    None => {
      if let Some(value) = value {
        debug!("Ignoring unusable Retry-After value {value:?}");
      }
      default
    },
  }
}

/// How failed requests are retried.
///
/// # Default Values
///
/// - `retry_delay`: 30 seconds
/// - `max_attempts`: 10 (including the first attempt)
/// - `backoff_base`: 1 second
/// - `backoff_max`: 60 seconds
/// - `backoff_multiplier`: 2.0
///
/// Rate-limited responses wait for the server's `Retry-After` advice, falling back to
/// `retry_delay`. Other transient failures wait `min(base * multiplier^(n-1), max)` before the
/// n-th retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Wait used when a rate-limited response carries no `Retry-After` advice
  pub retry_delay:        Duration,
  /// Maximum attempts per request including the first, `None` for no limit
  pub max_attempts:       Option<u32>,
  /// First backoff delay for transient failures
  pub backoff_base:       Duration,
  /// Ceiling for backoff delays
  pub backoff_max:        Duration,
  /// Growth factor between consecutive backoff delays
  pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retry_delay:        DEFAULT_RETRY_DELAY,
      max_attempts:       Some(DEFAULT_MAX_ATTEMPTS),
      backoff_base:       Duration::from_secs(1),
      backoff_max:        Duration::from_secs(60),
      backoff_multiplier: 2.0,
    }
  }
}

impl RetryPolicy {
  /// A policy that never gives up on transient failures.
  pub fn unbounded() -> Self { Self { max_attempts: None, ..Self::default() } }

  /// Sets the fallback delay for rate-limited responses.
  pub fn with_retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  /// Sets the attempt cap; a cap of zero is treated as one.
  pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
    self.max_attempts = max_attempts.map(|max| max.max(1));
    self
  }

  /// Sets the exponential backoff parameters; multipliers below 1.0 are raised to 1.0.
  pub fn with_backoff(mut self, base: Duration, max: Duration, multiplier: f64) -> Self {
    self.backoff_base = base;
    self.backoff_max = max;
    self.backoff_multiplier = multiplier.max(1.0);
    self
  }

  /// Whether `attempts` attempts use up the cap.
  pub fn is_exhausted(&self, attempts: u32) -> bool {
    matches!(self.max_attempts, Some(max) if attempts >= max)
  }

  /// Delay before retrying after the `failures`-th consecutive transient failure (1-indexed).
  pub fn backoff_delay(&self, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(64) as i32;
    let seconds = self.backoff_base.as_secs_f64() * self.backoff_multiplier.powi(exponent);
    let capped = seconds.min(self.backoff_max.as_secs_f64());
    Duration::try_from_secs_f64(capped).unwrap_or(self.backoff_max)
  }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Failure {
  /// The server asked us to slow down.
  RateLimited {
    /// Status code of the response
    status:      u16,
    /// Raw `Retry-After` value
    retry_after: Option<String>,
  },
  /// A failure that may go away on its own.
  Transient(String),
  /// A status that retrying will not change.
  Status(u16),
  /// A request that cannot succeed.
  Transport(TransportError),
}

impl Failure {
  /// Classifies a non-2xx response.
  fn from_response(response: HttpResponse) -> Self {
    match response.status {
      429 | 503 =>
        Failure::RateLimited { status: response.status, retry_after: response.retry_after },
      408 | 500..=599 => Failure::Transient(format!("HTTP {}", response.status)),
      status => Failure::Status(status),
    }
  }

  /// Classifies a transport error.
  fn from_transport(error: TransportError) -> Self {
    if error.is_transient() {
      Failure::Transient(error.to_string())
    } else {
      Failure::Transport(error)
    }
  }
}

impl fmt::Display for Failure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Failure::RateLimited { status, .. } => write!(f, "HTTP {status} (rate limited)"),
      Failure::Transient(reason) => f.write_str(reason),
      Failure::Status(status) => write!(f, "HTTP {status}"),
      Failure::Transport(error) => write!(f, "{error}"),
    }
  }
}

/// Fetches single pages, absorbing transient failures according to a [`RetryPolicy`].
#[derive(Debug)]
pub struct PageFetcher<'a, T> {
  /// Where requests go
  transport: &'a T,
  /// How failures are retried
  policy:    &'a RetryPolicy,
}

impl<'a, T: Transport> PageFetcher<'a, T> {
  /// Creates a fetcher over `transport` using `policy`.
  pub fn new(transport: &'a T, policy: &'a RetryPolicy) -> Self { Self { transport, policy } }

  /// Fetches `url` and returns the body of the first successful response.
  ///
  /// # Errors
  ///
  /// - [`HarvestError::Http`] for non-retryable statuses
  /// - [`HarvestError::Transport`] for requests that cannot be sent
  /// - [`HarvestError::RetriesExhausted`] when the attempt cap is reached
  pub async fn fetch(&self, url: &Url) -> Result<String, HarvestError> {
    let mut attempts = 0;
    let mut transient_failures = 0;

    loop {
      attempts += 1;
      debug!("GET {url} (attempt {attempts})");

      let failure = match self.transport.get(url).await {
        Ok(response) if response.is_success() => return Ok(response.body),
        Ok(response) => Failure::from_response(response),
        Err(error) => Failure::from_transport(error),
      };

      let delay = match &failure {
        Failure::RateLimited { retry_after, .. } =>
          parse_retry_after(retry_after.as_deref(), self.policy.retry_delay),
        Failure::Transient(_) => {
          transient_failures += 1;
          self.policy.backoff_delay(transient_failures)
        },
        Failure::Status(status) =>
          return Err(HarvestError::Http { url: url.to_string(), status: *status }),
        Failure::Transport(error) =>
          return Err(HarvestError::Transport { url: url.to_string(), source: error.clone() }),
      };

      if self.policy.is_exhausted(attempts) {
        return Err(HarvestError::RetriesExhausted {
          url: url.to_string(),
          attempts,
          last: failure.to_string(),
        });
      }

      warn!(
        "Got {failure}, retrying after {:.1} seconds (attempt {attempts})",
        delay.as_secs_f64()
      );
      tokio::time::sleep(delay).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tests::ScriptedTransport;

  fn url() -> Url { Url::parse("http://oai.test/oai2?verb=ListRecords").unwrap() }

  #[test]
  fn test_parse_retry_after() {
    let default = Duration::from_secs(30);
    assert_eq!(parse_retry_after(Some("120"), default), Duration::from_secs(120));
    assert_eq!(parse_retry_after(Some(" 7 "), default), Duration::from_secs(7));
    assert_eq!(parse_retry_after(Some("0"), default), Duration::ZERO);
    assert_eq!(parse_retry_after(Some("-5"), default), default);
    assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT"), default), default);
    assert_eq!(parse_retry_after(Some(""), default), default);
    assert_eq!(parse_retry_after(None, default), default);
    assert_eq!(parse_retry_after(Some("999999"), default), MAX_RETRY_AFTER);
  }

  #[test]
  fn test_backoff_delays() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
    assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
    assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
    assert_eq!(policy.backoff_delay(7), Duration::from_secs(60));
    assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(60));
  }

  #[test]
  fn test_attempt_cap() {
    let policy = RetryPolicy::default().with_max_attempts(Some(3));
    assert!(!policy.is_exhausted(2));
    assert!(policy.is_exhausted(3));
    assert_eq!(RetryPolicy::default().with_max_attempts(Some(0)).max_attempts, Some(1));
    assert!(!RetryPolicy::unbounded().is_exhausted(u32::MAX));
  }

  #[tokio::test(start_paused = true)]
  async fn test_rate_limit_honors_retry_after() {
    let transport = ScriptedTransport::new([
      Ok(HttpResponse::status(503).with_retry_after("5")),
      Ok(HttpResponse::status(503).with_retry_after("7")),
      Ok(HttpResponse::ok("<done/>")),
    ]);
    let policy = RetryPolicy::default().with_max_attempts(Some(3));
    let start = tokio::time::Instant::now();

    let body = PageFetcher::new(&transport, &policy).fetch(&url()).await.unwrap();

    assert_eq!(body, "<done/>");
    assert_eq!(start.elapsed(), Duration::from_secs(12));
    assert_eq!(transport.requests().len(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_rate_limit_without_advice_uses_retry_delay() {
    let transport = ScriptedTransport::new([
      Ok(HttpResponse::status(503)),
      Ok(HttpResponse::status(429).with_retry_after("later")),
      Ok(HttpResponse::ok("ok")),
    ]);
    let policy = RetryPolicy::default().with_retry_delay(Duration::from_secs(10));
    let start = tokio::time::Instant::now();

    PageFetcher::new(&transport, &policy).fetch(&url()).await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(20));
  }

  #[tokio::test(start_paused = true)]
  async fn test_transient_failures_back_off_exponentially() {
    let transport = ScriptedTransport::new([
      Err(TransportError::Connect("refused".into())),
      Ok(HttpResponse::status(502)),
      Err(TransportError::Timeout("slow".into())),
      Ok(HttpResponse::ok("ok")),
    ]);
    let policy = RetryPolicy::default();
    let start = tokio::time::Instant::now();

    PageFetcher::new(&transport, &policy).fetch(&url()).await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(1 + 2 + 4));
  }

  #[traced_test]
  #[tokio::test(start_paused = true)]
  async fn test_retries_exhausted() {
    let transport = ScriptedTransport::new([
      Ok(HttpResponse::status(503).with_retry_after("1")),
      Ok(HttpResponse::status(503).with_retry_after("1")),
      Ok(HttpResponse::status(503).with_retry_after("1")),
      Ok(HttpResponse::ok("never reached")),
    ]);
    let policy = RetryPolicy::default().with_max_attempts(Some(3));

    let err = PageFetcher::new(&transport, &policy).fetch(&url()).await.unwrap_err();

    match err {
      HarvestError::RetriesExhausted { attempts, last, .. } => {
        assert_eq!(attempts, 3);
        assert!(last.contains("503"));
      },
      other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(transport.requests().len(), 3);
    assert!(logs_contain("retrying after 1.0 seconds"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_unbounded_policy_keeps_retrying() {
    let mut script: Vec<Result<HttpResponse, TransportError>> =
      (0..25).map(|_| Ok(HttpResponse::status(503).with_retry_after("2"))).collect();
    script.push(Ok(HttpResponse::ok("finally")));
    let transport = ScriptedTransport::new(script);
    let policy = RetryPolicy::unbounded();

    let body = PageFetcher::new(&transport, &policy).fetch(&url()).await.unwrap();

    assert_eq!(body, "finally");
    assert_eq!(transport.requests().len(), 26);
  }

  #[tokio::test]
  async fn test_client_errors_are_not_retried() {
    let transport =
      ScriptedTransport::new([Ok(HttpResponse::status(400)), Ok(HttpResponse::ok(""))]);
    let policy = RetryPolicy::default();

    let err = PageFetcher::new(&transport, &policy).fetch(&url()).await.unwrap_err();

    assert!(matches!(err, HarvestError::Http { status: 400, .. }));
    assert_eq!(transport.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_request_errors_are_not_retried() {
    let transport = ScriptedTransport::new([Err(TransportError::Request("bad scheme".into()))]);
    let policy = RetryPolicy::default();

    let err = PageFetcher::new(&transport, &policy).fetch(&url()).await.unwrap_err();

    assert!(matches!(err, HarvestError::Transport { .. }));
    assert_eq!(transport.requests().len(), 1);
  }
}
