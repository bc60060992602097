use std::{
  fs::File,
  io::{self, BufWriter, Write},
  path::PathBuf,
  time::Duration,
};

use arxiv_harvest::{
  fetch::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY},
  format,
  harvest::DEFAULT_TIMEOUT,
  Filters, Harvest, HarvestRequest, Harvester, MetadataRecord, RemoteCategories,
  ReqwestTransport, RetryPolicy, StaticCategories, ARXIV_OAI_URL,
};
use chrono::NaiveDate;
use clap::{builder::ArgAction, Parser, Subcommand};
use console::{style, Emoji};
use errors::CliError;
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;
use url::Url;

pub mod errors;

static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
static BOOKS: Emoji<'_, '_> = Emoji("📚 ", "");
static SAVE: Emoji<'_, '_> = Emoji("💾 ", "");
static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✨ ", "");

#[derive(Parser)]
#[command(author, version, about = "Harvest arXiv metadata over OAI-PMH")]
struct Cli {
  /// Verbose mode (-v, -vv, -vvv)
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  verbose: u8,

  /// OAI-PMH endpoint to talk to
  #[arg(long, global = true, default_value = ARXIV_OAI_URL)]
  endpoint: Url,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Harvest the records of one category and date range
  Harvest {
    /// Category to harvest, e.g. cs, cs.SE, physics:cond-mat
    #[arg(long, short)]
    category:          String,
    /// First day of the range (YYYY-MM-DD), defaults to the first of the month
    #[arg(long)]
    from:              Option<NaiveDate>,
    /// Last day of the range (YYYY-MM-DD), defaults to today
    #[arg(long)]
    until:             Option<NaiveDate>,
    /// Seconds to wait after a rate-limited response without Retry-After
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY.as_secs())]
    delay:             u64,
    /// Maximum attempts per page, including the first
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, conflicts_with = "unbounded_retries")]
    max_attempts:      u32,
    /// Retry transient failures forever
    #[arg(long)]
    unbounded_retries: bool,
    /// Wall-clock budget for the harvest in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout:           u64,
    /// Keep records matching field=term[,term...]; may be repeated
    #[arg(long, short)]
    filter:            Vec<String>,
    /// Write records here instead of stdout
    #[arg(long, short)]
    output:            Option<PathBuf>,
    /// Write one JSON object per line instead of a JSON array
    #[arg(long)]
    json_lines:        bool,
    /// Validate the category against the endpoint's set listing
    #[arg(long)]
    remote_categories: bool,
  },
  /// List the categories that can be harvested
  Categories {
    /// Ask the endpoint instead of using the built-in taxonomy
    #[arg(long)]
    remote: bool,
  },
}

/// Setup logging with the specified verbosity level
fn setup_logging(verbosity: u8) {
  let filter = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .with_file(true)
    .with_line_number(true)
    .with_thread_ids(true)
    .with_target(true)
    .init();
}

/// Writes records as a pretty JSON array or as JSON lines.
fn write_records<W: Write>(
  mut writer: W,
  records: &[MetadataRecord],
  json_lines: bool,
) -> Result<(), CliError> {
  if json_lines {
    for record in records {
      serde_json::to_writer(&mut writer, record)?;
      writeln!(writer)?;
    }
  } else {
    serde_json::to_writer_pretty(&mut writer, records)?;
    writeln!(writer)?;
  }
  writer.flush()?;
  Ok(())
}

/// Prints a short account of the harvest to stderr.
fn print_summary(harvest: &Harvest) {
  let size = harvest.complete_list_size.map_or_else(|| "unknown".to_string(), |n| n.to_string());
  eprintln!(
    "{} Harvested {} records from {} pages (listing size {})",
    style(SUCCESS).green().for_stderr(),
    style(harvest.len()).yellow().for_stderr(),
    style(harvest.pages).yellow().for_stderr(),
    style(size).yellow().for_stderr()
  );
  if harvest.skipped > 0 {
    eprintln!(
      "{} Skipped {} deleted or unreadable records",
      style(WARNING).yellow().for_stderr(),
      style(harvest.skipped).yellow().for_stderr()
    );
  }
  if !harvest.is_complete() {
    eprintln!(
      "{} Timed out before the listing was exhausted, results are partial",
      style(WARNING).yellow().for_stderr()
    );
  }
}

async fn run(cli: Cli) -> Result<(), CliError> {
  match cli.command {
    Commands::Harvest {
      category,
      from,
      until,
      delay,
      max_attempts,
      unbounded_retries,
      timeout,
      filter,
      output,
      json_lines,
      remote_categories,
    } => {
      let mut retry = RetryPolicy::default().with_retry_delay(Duration::from_secs(delay));
      retry = if unbounded_retries {
        retry.with_max_attempts(None)
      } else {
        retry.with_max_attempts(Some(max_attempts))
      };

      let mut request = HarvestRequest::new(&category)
        .retry(retry)
        .timeout(Duration::from_secs(timeout))
        .filters(Filters::parse(&filter)?);
      if let Some(from) = from {
        request = request.from(from);
      }
      if let Some(until) = until {
        request = request.until(until);
      }
      debug!("Harvest request: {request:?}");

      eprintln!(
        "{} Harvesting {} from {} until {}",
        style(LOOKING_GLASS).cyan().for_stderr(),
        style(&category).yellow().for_stderr(),
        style(request.from).yellow().for_stderr(),
        style(request.until).yellow().for_stderr()
      );

      let harvest = if remote_categories {
        let resolver = RemoteCategories::with_parts(
          ReqwestTransport::new(),
          cli.endpoint.clone(),
          RetryPolicy::default(),
        );
        Harvester::with_parts(ReqwestTransport::new(), resolver, cli.endpoint)
          .harvest(&request)
          .await?
      } else {
        Harvester::with_parts(ReqwestTransport::new(), StaticCategories, cli.endpoint)
          .harvest(&request)
          .await?
      };
      print_summary(&harvest);

      match output {
        Some(path) => {
          trace!("Writing records to: {}", path.display());
          write_records(BufWriter::new(File::create(&path)?), &harvest, json_lines)?;
          eprintln!(
            "{} Saved records to: {}",
            style(SAVE).cyan().for_stderr(),
            style(path.display()).yellow().for_stderr()
          );
        },
        None => write_records(io::stdout().lock(), &harvest, json_lines)?,
      }
      Ok(())
    },

    Commands::Categories { remote } => {
      let sets = if remote {
        eprintln!(
          "{} Fetching set listing from: {}",
          style(BOOKS).cyan().for_stderr(),
          style(&cli.endpoint).yellow().for_stderr()
        );
        RemoteCategories::with_parts(ReqwestTransport::new(), cli.endpoint, RetryPolicy::default())
          .list_sets()
          .await?
      } else {
        StaticCategories.sets()
      };
      print!("{}", format::sets_table(&sets));
      Ok(())
    },
  }
}

#[tokio::main]
async fn main() {
  let cli = Cli::parse();
  setup_logging(cli.verbose);

  if let Err(e) = run(cli).await {
    eprintln!("{} {}", style(WARNING).red().for_stderr(), style(&e).red().for_stderr());
    std::process::exit(1);
  }
}
