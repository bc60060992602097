//! Integration tests for the arxiv-harvest CLI commands.
//!
//! Commands that would reach the network point `--endpoint` at a local mock server, or at an
//! address nothing listens on when the command must fail before any request is made.

use assert_cmd::{assert::OutputAssertExt, Command};
use predicates::prelude::*;
use tempfile::tempdir;
use wiremock::{
  matchers::{method, query_param},
  Mock, MockServer, ResponseTemplate,
};

const PAGE_ONE: &str = include_str!("../../arxiv-harvest/tests/fixtures/cs_se_page1.xml");
const PAGE_TWO: &str = include_str!("../../arxiv-harvest/tests/fixtures/cs_se_page2.xml");

/// An endpoint that refuses every connection.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9/oai2";

// Helper function to create a clean command instance
fn harvester() -> Command { Command::cargo_bin("arxiv-harvest").unwrap() }

async fn mock_endpoint() -> MockServer {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(query_param("set", "cs:cs:SE"))
    .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_ONE))
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(query_param("resumptionToken", "6960524|1001"))
    .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_TWO))
    .mount(&server)
    .await;
  server
}

#[test]
fn test_help() {
  harvester()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("harvest"))
    .stdout(predicate::str::contains("categories"));
}

#[test]
fn test_categories_table() {
  harvester()
    .arg("categories")
    .assert()
    .success()
    .stdout(predicate::str::starts_with("| Code | Category |"))
    .stdout(predicate::str::contains("| `cs:cs:SE` |"))
    .stdout(predicate::str::contains("| `physics:cond-mat` |"));
}

#[test]
fn test_invalid_category() {
  harvester()
    .args(["harvest", "--category", "cs.INVALID", "--endpoint", DEAD_ENDPOINT])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid category 'cs.INVALID'"))
    .stderr(predicate::str::contains("Valid base categories"));
}

#[test]
fn test_invalid_filter() {
  harvester()
    .args(["harvest", "-c", "cs", "--filter", "journal=nature", "--endpoint", DEAD_ENDPOINT])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Unknown record field 'journal'"));

  harvester()
    .args(["harvest", "-c", "cs", "--filter", "abstract", "--endpoint", DEAD_ENDPOINT])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid filter 'abstract'"));
}

#[test]
fn test_reversed_date_range() {
  harvester()
    .args(["harvest", "-c", "cs", "--from", "2025-02-01", "--until", "2025-01-01"])
    .args(["--endpoint", DEAD_ENDPOINT])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Invalid date range"));
}

#[test]
fn test_conflicting_retry_flags() {
  harvester()
    .args(["harvest", "-c", "cs", "--max-attempts", "3", "--unbounded-retries"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot be used with"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_harvest_to_json_lines_file() -> anyhow::Result<()> {
  let server = mock_endpoint().await;
  let dir = tempdir()?;
  let output = dir.path().join("records.jsonl");

  let args = vec![
    "harvest".to_string(),
    "--category".into(),
    "cs.SE".into(),
    "--from".into(),
    "2025-01-01".into(),
    "--until".into(),
    "2025-01-05".into(),
    "--json-lines".into(),
    "--output".into(),
    output.display().to_string(),
    "--endpoint".into(),
    format!("{}/oai2", server.uri()),
  ];
  let result = tokio::task::spawn_blocking(move || harvester().args(args).output()).await??;
  result.assert().success().stderr(predicate::str::contains("Harvested 22 records from 2 pages"));

  let contents = std::fs::read_to_string(&output)?;
  let records: Vec<serde_json::Value> =
    contents.lines().map(serde_json::from_str).collect::<Result<_, _>>()?;
  assert_eq!(records.len(), 22);
  assert_eq!(records[0]["id"], "2501.00123");
  assert!(records.iter().all(|r| r["title"].as_str().is_some_and(|t| !t.is_empty())));

  dir.close()?;
  Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filtered_harvest_to_stdout() -> anyhow::Result<()> {
  let server = mock_endpoint().await;

  let args = vec![
    "harvest".to_string(),
    "-c".into(),
    "cs.SE".into(),
    "--from".into(),
    "2025-01-01".into(),
    "--until".into(),
    "2025-01-05".into(),
    "--filter".into(),
    "abstract=learning".into(),
    "--endpoint".into(),
    format!("{}/oai2", server.uri()),
  ];
  let output = tokio::task::spawn_blocking(move || harvester().args(args).output()).await??;
  assert!(output.status.success());

  let records: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout)?;
  assert_eq!(records.len(), 7);
  assert!(records.iter().all(|r| r["abstract"].as_str().is_some_and(|a| a.contains("learning"))));
  Ok(())
}
