//! OAI-PMH wire format: request URLs and response pages.
//!
//! arXiv exposes its metadata through the Open Archives Initiative Protocol for Metadata
//! Harvesting (OAI-PMH 2.0). Two verbs are used here:
//! - `ListRecords`, which pages through the records of one set and date range
//! - `ListSets`, which enumerates the sets (categories) that can be harvested
//!
//! Both are paged with resumption tokens: every response may end in a `<resumptionToken>`
//! element, and the next page is requested with *only* that token. An empty or missing token
//! ends the listing.
//!
//! # Examples
//!
//! ```
//! use arxiv_harvest::oai;
//! use chrono::NaiveDate;
//! use url::Url;
//!
//! let base = Url::parse(arxiv_harvest::ARXIV_OAI_URL)?;
//! let from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
//! let until = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
//! let url = oai::list_records_url(&base, "cs:cs:SE", from, until);
//! assert_eq!(
//!   url.as_str(),
//!   "http://export.arxiv.org/oai2?verb=ListRecords&from=2025-01-01&until=2025-01-05\
//!    &metadataPrefix=arXiv&set=cs%3Acs%3ASE"
//! );
//! # Ok::<(), url::ParseError>(())
//! ```

use quick_xml::{de::from_str, events::Event, Reader};

use super::*;

/// The metadata format requested from arXiv.
pub const METADATA_PREFIX: &str = "arXiv";

/// OAI-PMH error code for a request that matched nothing.
pub const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// Date format used by OAI-PMH `from` / `until` arguments.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Builds the first `ListRecords` request of a harvest.
pub fn list_records_url(base: &Url, set: &str, from: NaiveDate, until: NaiveDate) -> Url {
  let mut url = base.clone();
  url
    .query_pairs_mut()
    .clear()
    .append_pair("verb", "ListRecords")
    .append_pair("from", &from.format(DATE_FORMAT).to_string())
    .append_pair("until", &until.format(DATE_FORMAT).to_string())
    .append_pair("metadataPrefix", METADATA_PREFIX)
    .append_pair("set", set);
  url
}

/// Builds a follow-up request for `verb` that carries nothing but the resumption token.
pub fn resume_url(base: &Url, verb: &str, cursor: &ResumptionCursor) -> Url {
  let mut url = base.clone();
  url
    .query_pairs_mut()
    .clear()
    .append_pair("verb", verb)
    .append_pair("resumptionToken", cursor.as_str());
  url
}

/// Builds the first `ListSets` request.
pub fn list_sets_url(base: &Url) -> Url {
  let mut url = base.clone();
  url.query_pairs_mut().clear().append_pair("verb", "ListSets");
  url
}

/// Opaque continuation token handed out by the server.
///
/// The token itself is never interpreted. The `cursor` attribute is kept for progress logging
/// only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionCursor {
  /// The token text
  token:  String,
  /// Number of records delivered before the page that carried this token, when advertised
  cursor: Option<u64>,
}

impl ResumptionCursor {
  /// Wraps a raw token value.
  pub fn new(token: impl Into<String>) -> Self { Self { token: token.into(), cursor: None } }

  /// The token text to send back to the server.
  pub fn as_str(&self) -> &str { &self.token }

  /// Position of the page that carried this token within the listing, when advertised.
  pub fn cursor(&self) -> Option<u64> { self.cursor }
}

/// One parsed `ListRecords` page.
#[derive(Debug, Clone, Default)]
pub struct Page {
  /// Records in the order the server listed them
  pub records:            Vec<MetadataRecord>,
  /// Token for the next page, `None` on the last page
  pub cursor:             Option<ResumptionCursor>,
  /// Total size of the listing, when advertised (also on the last page)
  pub complete_list_size: Option<u64>,
  /// Deleted, metadata-less or unreadable records that were left out
  pub skipped:            usize,
}

/// A harvestable set as reported by `ListSets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetInfo {
  /// Wire identifier, e.g. `physics:cond-mat`
  pub spec: String,
  /// Human-readable name
  pub name: String,
}

/// Root of every OAI-PMH response.
#[derive(Debug, Deserialize)]
#[serde(rename = "OAI-PMH")]
struct OaiResponse {
  /// Protocol errors, if the request failed
  #[serde(default)]
  error:        Vec<OaiError>,
  /// Payload of a `ListRecords` request
  #[serde(rename = "ListRecords")]
  list_records: Option<ListRecords>,
  /// Payload of a `ListSets` request
  #[serde(rename = "ListSets")]
  list_sets:    Option<ListSets>,
}

/// Error information from the OAI-PMH response.
#[derive(Debug, Deserialize)]
struct OaiError {
  /// Standard OAI-PMH error code
  #[serde(rename = "@code")]
  code:    String,
  /// Human-readable error message
  #[serde(rename = "$text", default)]
  message: String,
}

/// The `<ListRecords>` container.
///
/// Its `<record>` children are left to [`parse_record`], one at a time.
#[derive(Debug, Deserialize)]
struct ListRecords {
  /// Continuation token, if any
  #[serde(rename = "resumptionToken")]
  resumption_token: Option<TokenXml>,
}

/// The `<ListSets>` container.
#[derive(Debug, Deserialize)]
struct ListSets {
  /// Sets on this page
  #[serde(rename = "set", default)]
  sets:             Vec<SetXml>,
  /// Continuation token, if any
  #[serde(rename = "resumptionToken")]
  resumption_token: Option<TokenXml>,
}

/// The `<header>` of a record.
#[derive(Debug, Default, Deserialize)]
struct HeaderXml {
  /// `deleted` for withdrawn records
  #[serde(rename = "@status")]
  status:     Option<String>,
  /// OAI identifier, e.g. `oai:arXiv.org:2501.00042`
  identifier: Option<String>,
}

/// The `<resumptionToken>` element.
#[derive(Debug, Deserialize)]
struct TokenXml {
  /// Token text, empty on the final page
  #[serde(rename = "$text", default)]
  value:              Option<String>,
  /// Records delivered so far
  #[serde(rename = "@cursor")]
  cursor:             Option<u64>,
  /// Total size of the listing
  #[serde(rename = "@completeListSize")]
  complete_list_size: Option<u64>,
}

impl TokenXml {
  /// Turns the element into a cursor unless its text is empty.
  fn into_cursor(self) -> Option<ResumptionCursor> {
    let token = self.value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())?;
    Some(ResumptionCursor { token, cursor: self.cursor })
  }
}

/// Deserializes an OAI-PMH document and surfaces protocol errors.
///
/// Returns `Ok(None)` when the only errors are `noRecordsMatch`.
fn parse_response(xml: &str) -> Result<Option<OaiResponse>, HarvestError> {
  let response: OaiResponse = from_str(xml)
    .map_err(|e| HarvestError::MalformedResponse(format!("Failed to parse XML: {e}")))?;

  if let Some(error) = response.error.iter().find(|e| e.code != NO_RECORDS_MATCH) {
    return Err(HarvestError::Oai {
      code:    error.code.clone(),
      message: error.message.trim().to_owned(),
    });
  }
  if !response.error.is_empty() {
    debug!("OAI-PMH reported {NO_RECORDS_MATCH}");
    return Ok(None);
  }
  Ok(Some(response))
}

/// Parses one `ListRecords` response page.
///
/// - `noRecordsMatch` yields an empty final page
/// - records marked deleted, without metadata, or whose metadata is not well-formed are skipped
///   and counted in [`Page::skipped`]
///
/// # Errors
///
/// - [`HarvestError::MalformedResponse`] if the body is not OAI-PMH XML or lacks `ListRecords`
/// - [`HarvestError::Oai`] for any protocol error other than `noRecordsMatch`
pub fn parse_list_records(xml: &str) -> Result<Page, HarvestError> {
  let Some(response) = parse_response(xml)? else {
    return Ok(Page::default());
  };
  let list = response.list_records.ok_or_else(|| {
    HarvestError::MalformedResponse("Response has no ListRecords element".to_string())
  })?;

  let mut page = Page::default();
  for raw in elements(xml, "record")? {
    match parse_record(raw) {
      Ok(Some(record)) => page.records.push(record),
      Ok(None) => page.skipped += 1,
      Err(e) => {
        warn!("Skipping unreadable record: {e}");
        page.skipped += 1;
      },
    }
  }

  if let Some(token) = list.resumption_token {
    page.complete_list_size = token.complete_list_size;
    page.cursor = token.into_cursor();
  }
  Ok(page)
}

/// Parses one raw `<record>` element.
///
/// Returns `Ok(None)` for deleted records and records without an `<arXiv>` block.
fn parse_record(raw: &str) -> Result<Option<MetadataRecord>, HarvestError> {
  let header = match elements(raw, "header")?.first() {
    Some(header) => from_str::<HeaderXml>(header)
      .map_err(|e| HarvestError::MalformedResponse(format!("Failed to parse header: {e}")))?,
    None => HeaderXml::default(),
  };
  let identifier = header.identifier.as_deref().unwrap_or_default().trim();

  if header.status.as_deref() == Some("deleted") {
    warn!("Skipping deleted record: {identifier}");
    return Ok(None);
  }
  match elements(raw, "arXiv")?.first() {
    Some(metadata) => MetadataRecord::from_xml(metadata).map(Some),
    None => {
      warn!("Skipping record without metadata: {identifier}");
      Ok(None)
    },
  }
}

/// Raw source of every outermost element named `name` (local name), in document order.
fn elements<'a>(xml: &'a str, name: &str) -> Result<Vec<&'a str>, HarvestError> {
  let malformed = |e: quick_xml::Error| {
    HarvestError::MalformedResponse(format!("Failed to parse XML: {e}"))
  };
  let mut reader = Reader::from_str(xml);
  let mut found = Vec::new();

  loop {
    let start = reader.buffer_position() as usize;
    match reader.read_event().map_err(malformed)? {
      Event::Start(e) if e.local_name().as_ref() == name.as_bytes() => {
        reader.read_to_end(e.name()).map_err(malformed)?;
        found.push(&xml[start..reader.buffer_position() as usize]);
      },
      Event::Empty(e) if e.local_name().as_ref() == name.as_bytes() => {
        found.push(&xml[start..reader.buffer_position() as usize]);
      },
      Event::Eof => break,
      _ => {},
    }
  }
  Ok(found)
}

/// Parses one `ListSets` response page into its sets and continuation token.
pub fn parse_list_sets(
  xml: &str,
) -> Result<(Vec<SetInfo>, Option<ResumptionCursor>), HarvestError> {
  let Some(response) = parse_response(xml)? else {
    return Ok((Vec::new(), None));
  };
  let list = response.list_sets.ok_or_else(|| {
    HarvestError::MalformedResponse("Response has no ListSets element".to_string())
  })?;

  let sets = list
    .sets
    .into_iter()
    .map(|set| SetInfo { spec: set.spec.trim().to_owned(), name: set.name.trim().to_owned() })
    .collect();
  Ok((sets, list.resumption_token.and_then(TokenXml::into_cursor)))
}

/// A single `<set>` entry.
#[derive(Debug, Deserialize)]
struct SetXml {
  /// Wire identifier
  #[serde(rename = "setSpec")]
  spec: String,
  /// Human-readable name
  #[serde(rename = "setName", default)]
  name: String,
}
