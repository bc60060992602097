//! Category validation and translation into OAI-PMH set identifiers.
//!
//! Users name categories the way arXiv prints them (`cs.SE`, `cond-mat.soft`, `math`), while
//! the OAI-PMH endpoint expects set specs (`cs:cs:SE`, `physics:cond-mat:soft`, `math`). A
//! [`CategoryResolver`] validates the former and produces the latter. Two resolvers exist:
//! - [`StaticCategories`] checks against a compiled copy of the arXiv taxonomy
//! - [`RemoteCategories`] checks against the sets the endpoint itself advertises via `ListSets`
//!
//! # Accepted forms
//!
//! | Input                 | Example            | Set spec                |
//! |-----------------------|--------------------|-------------------------|
//! | group                 | `cs`               | `cs`                    |
//! | physics archive       | `cond-mat`         | `physics:cond-mat`      |
//! | group:archive         | `physics:cond-mat` | `physics:cond-mat`      |
//! | archive.SUB / :SUB    | `cs.SE`, `cs:SE`   | `cs:cs:SE`              |
//! | group:archive:SUB     | `cs:cs:SE`         | `cs:cs:SE`              |

use lazy_static::lazy_static;
use regex::Regex;

use super::*;
use crate::oai::SetInfo;

/// Validates a category and returns the set spec to harvest.
#[allow(async_fn_in_trait)]
pub trait CategoryResolver {
  /// Resolves `category` into an OAI-PMH set spec.
  ///
  /// # Errors
  ///
  /// Returns [`HarvestError::InvalidCategory`] for anything outside the taxonomy.
  async fn resolve(&self, category: &str) -> Result<String, HarvestError>;
}

impl<R: CategoryResolver + ?Sized> CategoryResolver for &R {
  async fn resolve(&self, category: &str) -> Result<String, HarvestError> {
    (**self).resolve(category).await
  }
}

/// One arXiv archive and its subject classes.
#[derive(Debug)]
struct Archive {
  /// Top-level group the archive belongs to
  group:    &'static str,
  /// Archive identifier
  name:     &'static str,
  /// Human-readable archive name
  title:    &'static str,
  /// Subject class suffixes, e.g. `SE` for `cs.SE`
  subjects: &'static [&'static str],
}

/// Top-level groups, which are also harvestable sets.
const GROUPS: &[(&str, &str)] = &[
  ("cs", "Computer Science"),
  ("econ", "Economics"),
  ("eess", "Electrical Engineering and Systems Science"),
  ("math", "Mathematics"),
  ("physics", "Physics"),
  ("q-bio", "Quantitative Biology"),
  ("q-fin", "Quantitative Finance"),
  ("stat", "Statistics"),
];

/// Archives by group.
const ARCHIVES: &[Archive] = &[
  Archive {
    group:    "cs",
    name:     "cs",
    title:    "Computer Science",
    subjects: &[
      "AI", "AR", "CC", "CE", "CG", "CL", "CR", "CV", "CY", "DB", "DC", "DL", "DM", "DS", "ET",
      "FL", "GL", "GR", "GT", "HC", "IR", "IT", "LG", "LO", "MA", "MM", "MS", "NA", "NE", "NI",
      "OH", "OS", "PF", "PL", "RO", "SC", "SD", "SE", "SI", "SY",
    ],
  },
  Archive { group: "econ", name: "econ", title: "Economics", subjects: &["EM", "GN", "TH"] },
  Archive {
    group:    "eess",
    name:     "eess",
    title:    "Electrical Engineering and Systems Science",
    subjects: &["AS", "IV", "SP", "SY"],
  },
  Archive {
    group:    "math",
    name:     "math",
    title:    "Mathematics",
    subjects: &[
      "AC", "AG", "AP", "AT", "CA", "CO", "CT", "CV", "DG", "DS", "FA", "GM", "GN", "GR", "GT",
      "HO", "IT", "KT", "LO", "MG", "MP", "NA", "NT", "OA", "OC", "PR", "QA", "RA", "RT", "SG",
      "SP", "ST",
    ],
  },
  Archive {
    group:    "physics",
    name:     "astro-ph",
    title:    "Astrophysics",
    subjects: &["CO", "EP", "GA", "HE", "IM", "SR"],
  },
  Archive {
    group:    "physics",
    name:     "cond-mat",
    title:    "Condensed Matter",
    subjects: &[
      "dis-nn",
      "mes-hall",
      "mtrl-sci",
      "other",
      "quant-gas",
      "soft",
      "stat-mech",
      "str-el",
      "supr-con",
    ],
  },
  Archive { group: "physics", name: "gr-qc", title: "General Relativity", subjects: &[] },
  Archive { group: "physics", name: "hep-ex", title: "HEP - Experiment", subjects: &[] },
  Archive { group: "physics", name: "hep-lat", title: "HEP - Lattice", subjects: &[] },
  Archive { group: "physics", name: "hep-ph", title: "HEP - Phenomenology", subjects: &[] },
  Archive { group: "physics", name: "hep-th", title: "HEP - Theory", subjects: &[] },
  Archive { group: "physics", name: "math-ph", title: "Mathematical Physics", subjects: &[] },
  Archive {
    group:    "physics",
    name:     "nlin",
    title:    "Nonlinear Sciences",
    subjects: &["AO", "CD", "CG", "PS", "SI"],
  },
  Archive { group: "physics", name: "nucl-ex", title: "Nuclear Experiment", subjects: &[] },
  Archive { group: "physics", name: "nucl-th", title: "Nuclear Theory", subjects: &[] },
  Archive {
    group:    "physics",
    name:     "physics",
    title:    "Physics",
    subjects: &[
      "acc-ph", "ao-ph", "app-ph", "atm-clus", "atom-ph", "bio-ph", "chem-ph", "class-ph",
      "comp-ph", "data-an", "ed-ph", "flu-dyn", "gen-ph", "geo-ph", "hist-ph", "ins-det",
      "med-ph", "optics", "plasm-ph", "pop-ph", "soc-ph", "space-ph",
    ],
  },
  Archive { group: "physics", name: "quant-ph", title: "Quantum Physics", subjects: &[] },
  Archive {
    group:    "q-bio",
    name:     "q-bio",
    title:    "Quantitative Biology",
    subjects: &["BM", "CB", "GN", "MN", "NC", "OT", "PE", "QM", "SC", "TO"],
  },
  Archive {
    group:    "q-fin",
    name:     "q-fin",
    title:    "Quantitative Finance",
    subjects: &["CP", "EC", "GN", "MF", "PM", "PR", "RM", "ST", "TR"],
  },
  Archive {
    group:    "stat",
    name:     "stat",
    title:    "Statistics",
    subjects: &["AP", "CO", "ME", "ML", "OT", "TH"],
  },
];

lazy_static! {
    // At most three `:`/`.` separated parts made of letters and dashes
    static ref CATEGORY_SHAPE: Regex = Regex::new(r"^[A-Za-z-]+(?:[.:][A-Za-z-]+){0,2}$").unwrap();
}

/// Resolver backed by a compiled copy of the arXiv taxonomy.
///
/// # Examples
///
/// ```
/// use arxiv_harvest::StaticCategories;
///
/// assert_eq!(StaticCategories.normalize("cs.SE")?, "cs:cs:SE");
/// assert_eq!(StaticCategories.normalize("cond-mat")?, "physics:cond-mat");
/// assert!(StaticCategories.normalize("cs.NOPE").is_err());
/// # Ok::<(), arxiv_harvest::errors::HarvestError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCategories;

impl StaticCategories {
  /// Validates `category` and returns its set spec.
  pub fn normalize(&self, category: &str) -> Result<String, HarvestError> {
    let input = category.trim();
    if !CATEGORY_SHAPE.is_match(input) {
      return Err(invalid_category(category, base_categories()));
    }

    let parts: Vec<&str> = input.split(':').collect();
    let spec = match parts.as_slice() {
      [single] => match single.split_once('.') {
        Some((archive, subject)) => subject_spec(archive, subject),
        None => group_or_archive_spec(single),
      },
      [group, archive] if group == archive && is_group(group) => Some(group.to_string()),
      [group, archive] if is_group(group) && find_archive(archive, Some(group)).is_some() =>
        Some(format!("{group}:{archive}")),
      [archive, subject] => subject_spec(archive, subject),
      [group, archive, subject] => subject_spec(archive, subject)
        .filter(|_| find_archive(archive, None).is_some_and(|a| a.group == *group)),
      _ => None,
    };

    spec.ok_or_else(|| invalid_category(category, base_categories()))
  }

  /// Every group, archive and subject class as a set listing.
  pub fn sets(&self) -> Vec<SetInfo> {
    let mut sets: Vec<SetInfo> = GROUPS
      .iter()
      .map(|(spec, name)| SetInfo { spec: spec.to_string(), name: name.to_string() })
      .collect();
    for archive in ARCHIVES {
      if archive.group != archive.name {
        sets.push(SetInfo {
          spec: format!("{}:{}", archive.group, archive.name),
          name: archive.title.to_string(),
        });
      }
      sets.extend(archive.subjects.iter().map(|subject| SetInfo {
        spec: format!("{}:{}:{subject}", archive.group, archive.name),
        name: format!("{} ({}.{subject})", archive.title, archive.name),
      }));
    }
    sets
  }
}

impl CategoryResolver for StaticCategories {
  async fn resolve(&self, category: &str) -> Result<String, HarvestError> {
    let spec = self.normalize(category)?;
    debug!("Resolved category {category} to set {spec}");
    Ok(spec)
  }
}

/// Builds the error for an unknown category.
fn invalid_category(category: &str, valid: String) -> HarvestError {
  HarvestError::InvalidCategory { category: category.to_owned(), valid }
}

/// Comma separated list of the top-level groups.
fn base_categories() -> String {
  GROUPS.iter().map(|(spec, _)| *spec).collect::<Vec<_>>().join(", ")
}

/// Whether `name` is a top-level group.
fn is_group(name: &str) -> bool { GROUPS.iter().any(|(spec, _)| *spec == name) }

/// Looks up an archive, optionally restricted to one group.
fn find_archive(name: &str, group: Option<&str>) -> Option<&'static Archive> {
  ARCHIVES.iter().find(|a| a.name == name && group.map_or(true, |g| a.group == g))
}

/// Set spec for a bare group or archive name.
fn group_or_archive_spec(name: &str) -> Option<String> {
  if is_group(name) {
    return Some(name.to_owned());
  }
  find_archive(name, None).map(|a| format!("{}:{}", a.group, a.name))
}

/// Set spec for a subject class within an archive.
fn subject_spec(archive: &str, subject: &str) -> Option<String> {
  let archive = find_archive(archive, None)?;
  archive
    .subjects
    .contains(&subject)
    .then(|| format!("{}:{}:{subject}", archive.group, archive.name))
}

/// Resolver that validates against the sets advertised by the OAI-PMH endpoint.
///
/// The set listing is requested on every resolution; `ListSets` is small and harvests are long,
/// so nothing is cached.
#[derive(Debug, Clone)]
pub struct RemoteCategories<T> {
  /// Where `ListSets` requests go
  transport: T,
  /// OAI-PMH endpoint
  base_url:  Url,
  /// Retry behaviour for the listing requests
  policy:    RetryPolicy,
}

impl RemoteCategories<ReqwestTransport> {
  /// Creates a resolver for the public arXiv endpoint.
  pub fn new() -> Self {
    Self::with_parts(ReqwestTransport::new(), ARXIV_OAI.clone(), RetryPolicy::default())
  }
}

impl Default for RemoteCategories<ReqwestTransport> {
  fn default() -> Self { Self::new() }
}

impl<T: Transport> RemoteCategories<T> {
  /// Creates a resolver from its collaborators.
  pub fn with_parts(transport: T, base_url: Url, policy: RetryPolicy) -> Self {
    Self { transport, base_url, policy }
  }

  /// Fetches every set the endpoint advertises, following resumption tokens.
  pub async fn list_sets(&self) -> Result<Vec<SetInfo>, HarvestError> {
    let fetcher = PageFetcher::new(&self.transport, &self.policy);
    let mut url = oai::list_sets_url(&self.base_url);
    let mut sets = Vec::new();

    loop {
      let body = fetcher.fetch(&url).await?;
      trace!("ListSets response: {body}");
      let (page, cursor) = oai::parse_list_sets(&body)?;
      sets.extend(page);
      match cursor {
        Some(cursor) => url = oai::resume_url(&self.base_url, "ListSets", &cursor),
        None => break,
      }
    }

    debug!("Endpoint advertises {} sets", sets.len());
    Ok(sets)
  }
}

impl<T: Transport> CategoryResolver for RemoteCategories<T> {
  async fn resolve(&self, category: &str) -> Result<String, HarvestError> {
    let sets = self.list_sets().await?;
    let input = category.trim();
    let candidates = [Some(input.to_owned()), StaticCategories.normalize(input).ok()];

    candidates
      .into_iter()
      .flatten()
      .find(|candidate| sets.iter().any(|set| &set.spec == candidate))
      .ok_or_else(|| {
        let valid = sets
          .iter()
          .filter(|set| !set.spec.contains(':'))
          .map(|set| set.spec.as_str())
          .collect::<Vec<_>>()
          .join(", ");
        invalid_category(category, valid)
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{fetch::HttpResponse, tests::ScriptedTransport};

  #[test]
  fn test_valid_base_categories() {
    for category in ["cs", "physics", "math", "stat", "econ", "eess", "q-bio", "q-fin"] {
      assert_eq!(StaticCategories.normalize(category).unwrap(), category);
    }
  }

  #[test]
  fn test_physics_archives() {
    assert_eq!(StaticCategories.normalize("cond-mat").unwrap(), "physics:cond-mat");
    assert_eq!(StaticCategories.normalize("hep-th").unwrap(), "physics:hep-th");
    assert_eq!(StaticCategories.normalize("physics:cond-mat").unwrap(), "physics:cond-mat");
    assert_eq!(StaticCategories.normalize("physics:physics").unwrap(), "physics");
  }

  #[test]
  fn test_valid_subcategories() {
    let cases = [
      ("cs:SE", "cs:cs:SE"),
      ("cs.SE", "cs:cs:SE"),
      ("cond-mat:soft", "physics:cond-mat:soft"),
      ("cond-mat.soft", "physics:cond-mat:soft"),
      ("stat.ML", "stat:stat:ML"),
      ("econ.EM", "econ:econ:EM"),
      ("eess.SY", "eess:eess:SY"),
      ("physics.optics", "physics:physics:optics"),
      ("astro-ph.CO", "physics:astro-ph:CO"),
      ("cs:cs:SE", "cs:cs:SE"),
      ("math:math", "math"),
      (" cs.LG ", "cs:cs:LG"),
    ];
    for (input, spec) in cases {
      assert_eq!(StaticCategories.normalize(input).unwrap(), spec, "input {input}");
    }
  }

  #[test]
  fn test_invalid_categories() {
    for category in
      ["cs:INVALID", "foo", "cs.INVALID", "invalid:cat", "invalid_cat", "", "math:cs:SE", "cs.se"]
    {
      match StaticCategories.normalize(category) {
        Err(HarvestError::InvalidCategory { category: c, .. }) => assert_eq!(c, category),
        other => panic!("{category} resolved to {other:?}"),
      }
    }
  }

  #[test]
  fn test_error_message_lists_base_categories() {
    let message = StaticCategories.normalize("invalid_cat").unwrap_err().to_string();
    assert!(message.contains("Invalid category"));
    assert!(message.contains("Valid base categories"));
    assert!(message.contains("cs"));
    assert!(message.contains("math"));
  }

  #[test]
  fn test_static_sets_listing() {
    let sets = StaticCategories.sets();
    assert_eq!(sets[0].spec, "cs");
    assert!(sets.iter().any(|s| s.spec == "physics:cond-mat"));
    assert!(sets.iter().any(|s| s.spec == "cs:cs:SE"));
    for set in &sets {
      assert_eq!(StaticCategories.normalize(&set.spec).unwrap(), set.spec);
    }
  }

  const SETS_PAGE_ONE: &str = r#"<OAI-PMH><ListSets>
    <set><setSpec>cs</setSpec><setName>Computer Science</setName></set>
    <set><setSpec>cs:cs:SE</setSpec><setName>Software Engineering</setName></set>
    <resumptionToken>sets|1</resumptionToken>
  </ListSets></OAI-PMH>"#;

  const SETS_PAGE_TWO: &str = r#"<OAI-PMH><ListSets>
    <set><setSpec>math</setSpec><setName>Mathematics</setName></set>
    <set><setSpec>physics:cond-mat</setSpec><setName>Condensed Matter</setName></set>
    <resumptionToken/>
  </ListSets></OAI-PMH>"#;

  fn remote(transport: &ScriptedTransport) -> RemoteCategories<&ScriptedTransport> {
    RemoteCategories::with_parts(
      transport,
      Url::parse("http://oai.test/oai2").unwrap(),
      RetryPolicy::default(),
    )
  }

  #[tokio::test]
  async fn test_remote_list_sets_follows_tokens() {
    let transport = ScriptedTransport::new([
      Ok(HttpResponse::ok(SETS_PAGE_ONE)),
      Ok(HttpResponse::ok(SETS_PAGE_TWO)),
    ]);

    let sets = remote(&transport).list_sets().await.unwrap();

    assert_eq!(sets.len(), 4);
    let requests = transport.requests();
    assert_eq!(requests[0].query(), Some("verb=ListSets"));
    assert_eq!(requests[1].query(), Some("verb=ListSets&resumptionToken=sets%7C1"));
  }

  #[tokio::test]
  async fn test_remote_resolves_user_and_wire_forms() {
    let cases = [("cs.SE", "cs:cs:SE"), ("cs:cs:SE", "cs:cs:SE"), ("cond-mat", "physics:cond-mat")];
    for (input, spec) in cases {
      let transport = ScriptedTransport::new([
        Ok(HttpResponse::ok(SETS_PAGE_ONE)),
        Ok(HttpResponse::ok(SETS_PAGE_TWO)),
      ]);
      assert_eq!(remote(&transport).resolve(input).await.unwrap(), spec);
    }
  }

  #[tokio::test]
  async fn test_remote_rejects_unlisted_sets() {
    let transport = ScriptedTransport::new([
      Ok(HttpResponse::ok(SETS_PAGE_ONE)),
      Ok(HttpResponse::ok(SETS_PAGE_TWO)),
    ]);

    let err = remote(&transport).resolve("stat.ML").await.unwrap_err();

    match err {
      HarvestError::InvalidCategory { category, valid } => {
        assert_eq!(category, "stat.ML");
        assert_eq!(valid, "cs, math");
      },
      other => panic!("unexpected error: {other:?}"),
    }
  }
}
