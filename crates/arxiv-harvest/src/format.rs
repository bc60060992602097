//! Text normalization for harvested metadata.
//!
//! arXiv metadata is hand-entered and arrives with inconsistent casing, stray indentation and
//! hard line breaks inside titles and abstracts. Everything stored in a
//! [`MetadataRecord`](crate::MetadataRecord) passes through these helpers so that records can be
//! compared and filtered without further cleanup.
//!
//! # Examples
//!
//! ```
//! use arxiv_harvest::format;
//!
//! let title = "  Deep Learning for\nCode Review  ";
//! assert_eq!(format::normalize_text(title), "deep learning for code review");
//!
//! assert_eq!(format::normalize_name("Ada"), "ada");
//! ```

use crate::oai::SetInfo;

/// Normalizes a metadata text field into a single trimmed, lowercased line.
///
/// - Leading and trailing whitespace is removed
/// - The text is lowercased
/// - Line breaks are replaced by single spaces
///
/// Whitespace runs inside a line are kept as they are, so indentation following a line break in
/// the source shows up as extra spaces.
///
/// # Examples
///
/// ```
/// use arxiv_harvest::format;
///
/// assert_eq!(format::normalize_text("Hello World"), "hello world");
/// assert_eq!(format::normalize_text("Two\nLines"), "two lines");
/// assert_eq!(format::normalize_text("\n  Padded\n"), "padded");
/// ```
pub fn normalize_text(text: &str) -> String {
  text.trim().to_lowercase().replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Normalizes one part of an author name.
///
/// Name parts are only lowercased, matching how arXiv's own listings compare them.
pub fn normalize_name(part: &str) -> String { part.trim().to_lowercase() }

/// Renders set listings as a markdown table with one row per set.
///
/// # Examples
///
/// ```
/// use arxiv_harvest::{format, oai::SetInfo};
///
/// let sets = [SetInfo { spec: "cs".into(), name: "Computer Science".into() }];
/// assert_eq!(
///   format::sets_table(&sets),
///   "| Code | Category |\n|------|----------|\n| `cs` | Computer Science |\n"
/// );
/// ```
pub fn sets_table(sets: &[SetInfo]) -> String {
  let mut table = String::from("| Code | Category |\n|------|----------|\n");
  for set in sets {
    table.push_str(&format!("| `{}` | {} |\n", set.spec, set.name.replace('|', "\\|")));
  }
  table
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalize_text() {
    assert_eq!(normalize_text("Hello World"), "hello world");
    assert_eq!(normalize_text("UPPERCASE TEXT"), "uppercase text");
    assert_eq!(normalize_text("  padded  "), "padded");
    assert_eq!(normalize_text("line one\nline two"), "line one line two");
    assert_eq!(normalize_text("windows\r\nbreak"), "windows break");
    assert_eq!(normalize_text("indented\n  continuation"), "indented   continuation");
    assert_eq!(normalize_text(""), "");
    assert_eq!(normalize_text("\n\n"), "");
  }

  #[test]
  fn test_sets_table() {
    let sets = vec![
      SetInfo { spec: "physics:cond-mat".into(), name: "Condensed Matter".into() },
      SetInfo { spec: "cs:cs:SE".into(), name: "Software Engineering | SE".into() },
    ];
    let table = sets_table(&sets);
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "| Code | Category |");
    assert_eq!(lines[2], "| `physics:cond-mat` | Condensed Matter |");
    assert_eq!(lines[3], r"| `cs:cs:SE` | Software Engineering \| SE |");
    assert_eq!(sets_table(&[]).lines().count(), 2);
  }

  #[test]
  fn test_normalize_name() {
    assert_eq!(normalize_name("Grace"), "grace");
    assert_eq!(normalize_name(" Van Rossum "), "van rossum");
  }
}
