//! Flat metadata records and their construction from arXiv XML.
//!
//! arXiv serves its native `arXiv` metadata format as a small XML tree per paper:
//!
//! ```xml
//! <arXiv xmlns="http://arxiv.org/OAI/arXiv/">
//!   <id>2501.01234</id>
//!   <created>2025-01-02</created>
//!   <authors>
//!     <author><keyname>Lovelace</keyname><forenames>Ada</forenames></author>
//!   </authors>
//!   <title>On Engines</title>
//!   <categories>cs.SE cs.LG</categories>
//!   <abstract>...</abstract>
//! </arXiv>
//! ```
//!
//! Upstream metadata is frequently sparse, so extraction is best-effort per field: a missing
//! element never fails the record, it degrades to a sentinel instead. A repeated element keeps
//! its first occurrence and markup inside a text element is flattened to its text. Two
//! degradation policies coexist and are deliberately kept distinct:
//! - author names degrade per slot, a missing name part becomes [`MISSING_NAME`]
//! - affiliations degrade as a whole, one author without affiliation empties the list
//!
//! # Examples
//!
//! ```
//! use arxiv_harvest::MetadataRecord;
//!
//! let record = MetadataRecord::from_xml(
//!   "<arXiv><id>2501.01234</id><title>On\n Engines</title>\
//!    <authors><author><keyname>Lovelace</keyname></author></authors></arXiv>",
//! )?;
//! assert_eq!(record.title, "on  engines");
//! assert_eq!(record.url, "https://arxiv.org/abs/2501.01234");
//! assert_eq!(record.authors, vec!["n/a lovelace"]);
//! assert_eq!(record.doi, "");
//! # Ok::<(), arxiv_harvest::errors::HarvestError>(())
//! ```

use quick_xml::{events::Event, Reader};

use super::*;
use crate::format::{normalize_name, normalize_text};

/// Placeholder for a missing forename or keyname.
pub const MISSING_NAME: &str = "n/a";

/// Prefix of the human-readable abstract page for an arXiv identifier.
pub const ABS_URL_PREFIX: &str = "https://arxiv.org/abs/";

/// Tolerant intermediate for one `<arXiv>` metadata block.
///
/// Filled from XML events rather than by serde, so an irregular element only affects its own
/// field: a repeated scalar keeps its first occurrence and inline markup inside a text element
/// contributes its text.
#[derive(Debug, Default)]
pub(crate) struct ArxivMetadata {
  /// arXiv identifier, e.g. `2501.01234` or `math/0601001`
  id:            Option<String>,
  /// Creation date of the first version
  created:       Option<String>,
  /// Date of the latest version
  updated:       Option<String>,
  /// Authors in listing order
  authors:       Vec<Author>,
  /// Paper title
  title:         Option<String>,
  /// Space separated category tags
  categories:    Option<String>,
  /// DOI of the published version
  doi:           Option<String>,
  /// Abstract text
  abstract_text: Option<String>,
}

/// A single `<author>` element.
#[derive(Debug, Default)]
struct Author {
  /// Family name
  keyname:     Option<String>,
  /// Given names
  forenames:   Option<String>,
  /// Affiliations, of which only the first is used
  affiliation: Vec<String>,
}

/// Text-bearing elements of the metadata block, by their path below the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
  /// `id`
  Id,
  /// `created`
  Created,
  /// `updated`
  Updated,
  /// `title`
  Title,
  /// `categories`
  Categories,
  /// `doi`
  Doi,
  /// `abstract`
  Abstract,
  /// `authors/author/keyname`
  Keyname,
  /// `authors/author/forenames`
  Forenames,
  /// `authors/author/affiliation`
  Affiliation,
}

impl Slot {
  /// The slot for an element path, `path[0]` being the root element.
  fn at(path: &[String]) -> Option<Self> {
    let below_root: Vec<&str> = path.iter().skip(1).map(String::as_str).collect();
    match below_root.as_slice() {
      ["id"] => Some(Slot::Id),
      ["created"] => Some(Slot::Created),
      ["updated"] => Some(Slot::Updated),
      ["title"] => Some(Slot::Title),
      ["categories"] => Some(Slot::Categories),
      ["doi"] => Some(Slot::Doi),
      ["abstract"] => Some(Slot::Abstract),
      ["authors", "author", "keyname"] => Some(Slot::Keyname),
      ["authors", "author", "forenames"] => Some(Slot::Forenames),
      ["authors", "author", "affiliation"] => Some(Slot::Affiliation),
      _ => None,
    }
  }
}

/// Whether `path` points at an `<author>` element.
fn is_author(path: &[String]) -> bool {
  path.len() == 3 && path[1] == "authors" && path[2] == "author"
}

impl ArxivMetadata {
  /// Walks a metadata fragment and collects every field it can find.
  ///
  /// Only XML that is not well-formed is an error.
  pub(crate) fn parse(xml: &str) -> Result<Self, HarvestError> {
    let mut reader = Reader::from_str(xml);
    let mut metadata = ArxivMetadata::default();
    let mut path: Vec<String> = Vec::new();
    // Slot being captured and the depth it was opened at
    let mut capture: Option<(Slot, usize, String)> = None;

    loop {
      match reader.read_event().map_err(malformed)? {
        Event::Start(e) => {
          path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
          if is_author(&path) {
            metadata.authors.push(Author::default());
          }
          if capture.is_none() {
            capture = Slot::at(&path).map(|slot| (slot, path.len(), String::new()));
          }
        },
        Event::Empty(e) => {
          path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
          if is_author(&path) {
            metadata.authors.push(Author::default());
          }
          path.pop();
        },
        Event::Text(e) => {
          if let Some((_, _, text)) = capture.as_mut() {
            match e.unescape() {
              Ok(unescaped) => text.push_str(&unescaped),
              Err(_) => text.push_str(&String::from_utf8_lossy(&e)),
            }
          }
        },
        Event::CData(e) => {
          if let Some((_, _, text)) = capture.as_mut() {
            text.push_str(&String::from_utf8_lossy(&e));
          }
        },
        Event::End(_) => {
          if capture.as_ref().is_some_and(|(_, depth, _)| *depth == path.len()) {
            if let Some((slot, _, text)) = capture.take() {
              metadata.store(slot, text);
            }
          }
          if path.pop().is_none() {
            return Err(malformed("unexpected closing tag"));
          }
        },
        Event::Eof => break,
        _ => {},
      }
    }

    match path.last() {
      Some(open) => Err(malformed(format!("unclosed element <{open}>"))),
      None => Ok(metadata),
    }
  }

  /// Stores captured text; the first occurrence of a scalar wins.
  fn store(&mut self, slot: Slot, text: String) {
    let scalar = match slot {
      Slot::Id => &mut self.id,
      Slot::Created => &mut self.created,
      Slot::Updated => &mut self.updated,
      Slot::Title => &mut self.title,
      Slot::Categories => &mut self.categories,
      Slot::Doi => &mut self.doi,
      Slot::Abstract => &mut self.abstract_text,
      Slot::Keyname | Slot::Forenames | Slot::Affiliation => {
        let Some(author) = self.authors.last_mut() else { return };
        match slot {
          Slot::Keyname => &mut author.keyname,
          Slot::Forenames => &mut author.forenames,
          _ => {
            author.affiliation.push(text);
            return;
          },
        }
      },
    };
    if scalar.is_none() {
      *scalar = Some(text);
    }
  }
}

/// Wraps a reader error for a record fragment.
fn malformed(e: impl fmt::Display) -> HarvestError {
  HarvestError::MalformedResponse(format!("Failed to parse record: {e}"))
}

/// One harvested paper, flattened and normalized.
///
/// Serializes to a mapping with the keys `title`, `id`, `url`, `abstract`, `categories`, `doi`,
/// `created`, `updated`, `authors` and `affiliation`. Every key is always present; fields that
/// could not be extracted hold their sentinel (`""`, or an empty list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
  /// The paper's title
  pub title:         String,
  /// The arXiv identifier
  pub id:            String,
  /// Abstract page URL derived from the identifier
  pub url:           String,
  /// The paper's abstract
  #[serde(rename = "abstract")]
  pub abstract_text: String,
  /// Raw space separated category tags, e.g. `cs.se cs.lg`
  pub categories:    String,
  /// DOI, empty when the paper has none
  pub doi:           String,
  /// Creation date (`YYYY-MM-DD`)
  pub created:       String,
  /// Date of last update (`YYYY-MM-DD`), empty for single-version papers
  pub updated:       String,
  /// Author full names as `"<forenames> <keyname>"`
  pub authors:       Vec<String>,
  /// Author affiliations in author order
  pub affiliation:   Vec<String>,
}

impl MetadataRecord {
  /// Parses a standalone `<arXiv>` metadata fragment.
  ///
  /// # Errors
  ///
  /// Returns [`HarvestError::MalformedResponse`] only when the fragment is not well-formed XML.
  /// Missing, repeated or irregular elements never cause an error.
  pub fn from_xml(xml: &str) -> Result<Self, HarvestError> {
    Ok(ArxivMetadata::parse(xml)?.into())
  }

  /// The abstract page URL for an arXiv identifier.
  pub fn url_for(id: &str) -> String { format!("{ABS_URL_PREFIX}{id}") }

  /// Returns the value stored under `field`.
  pub fn value(&self, field: Field) -> FieldValue<'_> {
    match field {
      Field::Title => FieldValue::Text(&self.title),
      Field::Id => FieldValue::Text(&self.id),
      Field::Url => FieldValue::Text(&self.url),
      Field::Abstract => FieldValue::Text(&self.abstract_text),
      Field::Categories => FieldValue::Text(&self.categories),
      Field::Doi => FieldValue::Text(&self.doi),
      Field::Created => FieldValue::Text(&self.created),
      Field::Updated => FieldValue::Text(&self.updated),
      Field::Authors => FieldValue::List(&self.authors),
      Field::Affiliation => FieldValue::List(&self.affiliation),
    }
  }
}

impl From<ArxivMetadata> for MetadataRecord {
  fn from(metadata: ArxivMetadata) -> Self {
    let text = |value: &Option<String>| value.as_deref().map(normalize_text).unwrap_or_default();
    let authors = metadata.authors;
    let id = text(&metadata.id);

    MetadataRecord {
      title: text(&metadata.title),
      url: MetadataRecord::url_for(&id),
      abstract_text: text(&metadata.abstract_text),
      categories: text(&metadata.categories),
      doi: text(&metadata.doi),
      created: text(&metadata.created),
      updated: text(&metadata.updated),
      authors: author_names(&authors),
      affiliation: affiliations(&authors),
      id,
    }
  }
}

/// Per-slot policy: each author yields a name, missing parts become [`MISSING_NAME`].
fn author_names(authors: &[Author]) -> Vec<String> {
  let part = |value: &Option<String>| match value.as_deref().map(normalize_name) {
    Some(name) if !name.is_empty() => name,
    _ => MISSING_NAME.to_string(),
  };

  authors
    .iter()
    .map(|author| format!("{} {}", part(&author.forenames), part(&author.keyname)))
    .collect()
}

/// Whole-list policy: if any author has no affiliation the result is empty.
fn affiliations(authors: &[Author]) -> Vec<String> {
  authors
    .iter()
    .map(|author| {
      author.affiliation.first().map(|a| normalize_name(a)).filter(|a| !a.is_empty())
    })
    .collect::<Option<Vec<_>>>()
    .unwrap_or_default()
}

/// The fields of a [`MetadataRecord`], named by their serialized keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
  /// `title`
  Title,
  /// `id`
  Id,
  /// `url`
  Url,
  /// `abstract`
  Abstract,
  /// `categories`
  Categories,
  /// `doi`
  Doi,
  /// `created`
  Created,
  /// `updated`
  Updated,
  /// `authors`
  Authors,
  /// `affiliation`
  Affiliation,
}

impl Field {
  /// Every field in serialization order.
  pub const ALL: [Field; 10] = [
    Field::Title,
    Field::Id,
    Field::Url,
    Field::Abstract,
    Field::Categories,
    Field::Doi,
    Field::Created,
    Field::Updated,
    Field::Authors,
    Field::Affiliation,
  ];

  /// The serialized key of this field.
  pub fn as_str(&self) -> &'static str {
    match self {
      Field::Title => "title",
      Field::Id => "id",
      Field::Url => "url",
      Field::Abstract => "abstract",
      Field::Categories => "categories",
      Field::Doi => "doi",
      Field::Created => "created",
      Field::Updated => "updated",
      Field::Authors => "authors",
      Field::Affiliation => "affiliation",
    }
  }
}

impl fmt::Display for Field {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Field {
  type Err = HarvestError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let key = s.trim().to_lowercase();
    Field::ALL
      .into_iter()
      .find(|field| field.as_str() == key)
      .ok_or_else(|| HarvestError::UnknownField(s.to_owned()))
  }
}

/// A borrowed view of one field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
  /// A scalar text field
  Text(&'a str),
  /// A list field (`authors`, `affiliation`)
  List(&'a [String]),
}

impl FieldValue<'_> {
  /// Whether `needle` occurs in the value; list fields match if any element contains it.
  pub fn contains(&self, needle: &str) -> bool {
    match self {
      FieldValue::Text(text) => text.contains(needle),
      FieldValue::List(items) => items.iter().any(|item| item.contains(needle)),
    }
  }
}
