//! Field filters applied to harvested records.
//!
//! A [`Filters`] value maps record fields to lists of search terms. An empty filter set keeps
//! every record. Otherwise a record is kept when *any* term of *any* filtered field occurs in
//! that field's value, compared case-insensitively. Terms only ever match the field they are
//! listed under.

use super::*;

/// Case-insensitive substring filters over record fields.
///
/// # Examples
///
/// ```
/// use arxiv_harvest::{Field, Filters, MetadataRecord};
///
/// let filters = Filters::default().with(Field::Abstract, ["Learning"]);
/// let record = MetadataRecord::from_xml("<arXiv><abstract>Deep learning</abstract></arXiv>")?;
/// assert!(filters.matches(&record));
/// # Ok::<(), arxiv_harvest::errors::HarvestError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
  /// Lowercased terms per field
  terms: BTreeMap<Field, Vec<String>>,
}

impl Filters {
  /// Adds `terms` for `field`, extending any terms already present.
  pub fn with<I, S>(mut self, field: Field, terms: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>, {
    self.insert(field, terms);
    self
  }

  /// Adds `terms` for `field` in place.
  ///
  /// Terms are lowercased; blank terms are dropped since they would match everything.
  pub fn insert<I, S>(&mut self, field: Field, terms: I)
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>, {
    let entry = self.terms.entry(field).or_default();
    entry.extend(
      terms.into_iter().map(|t| t.as_ref().trim().to_lowercase()).filter(|t| !t.is_empty()),
    );
  }

  /// Parses a single `field=term[,term...]` expression and adds it to the set.
  ///
  /// # Errors
  ///
  /// - [`HarvestError::InvalidFilter`] if the expression has no `=` or no terms
  /// - [`HarvestError::UnknownField`] if the field is not a record field
  pub fn parse_into(&mut self, expression: &str) -> Result<(), HarvestError> {
    let (field, terms) = expression
      .split_once('=')
      .ok_or_else(|| HarvestError::InvalidFilter(expression.to_owned()))?;
    let field: Field = field.parse()?;
    let terms: Vec<&str> = terms.split(',').filter(|t| !t.trim().is_empty()).collect();
    if terms.is_empty() {
      return Err(HarvestError::InvalidFilter(expression.to_owned()));
    }
    self.insert(field, terms);
    Ok(())
  }

  /// Parses a list of `field=term[,term...]` expressions into a filter set.
  pub fn parse<I, S>(expressions: I) -> Result<Self, HarvestError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>, {
    let mut filters = Filters::default();
    for expression in expressions {
      filters.parse_into(expression.as_ref())?;
    }
    Ok(filters)
  }

  /// Whether no filter is set, i.e. every record is kept.
  pub fn is_empty(&self) -> bool { self.terms.values().all(Vec::is_empty) }

  /// The terms configured for each field.
  pub fn iter(&self) -> impl Iterator<Item = (Field, &[String])> {
    self.terms.iter().map(|(field, terms)| (*field, terms.as_slice()))
  }

  /// Whether `record` passes the filters.
  pub fn matches(&self, record: &MetadataRecord) -> bool {
    if self.is_empty() {
      return true;
    }
    self.iter().any(|(field, terms)| {
      let value = record.value(field);
      terms.iter().any(|term| value.contains(term))
    })
  }
}
