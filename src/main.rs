mod adapter;
mod config;
mod crawler;
mod database;
mod dedup;
mod error;
mod fetcher;
mod filter;
mod http_client;
mod models;
mod normalizer;
mod output;
mod query;
mod report;
mod robots;
mod sites;
mod stats;

use adapter::SiteAdapter;
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use config::Config;
use crawler::CrawlOptions;
use database::{Database, RunCounts};
use fetcher::{PageFetcher, PoliteFetcher};
use models::{OutputFormat, SurveyQuery};
use output::ListingRow;
use query::SurveyParams;
use report::SurveySummary;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "rent-survey")]
#[command(about = "Collects comparable rental listings around a station and summarises their rents", long_about = None)]
struct Args {
    /// Station to survey around (e.g. 恵比寿)
    #[arg(long, required_unless_present_any = ["list_sites", "init_config"])]
    station: Option<String>,

    /// Maximum walk from the station in minutes
    #[arg(long, allow_negative_numbers = true)]
    minutes: Option<i64>,

    /// Target floor area in m²
    #[arg(long, allow_negative_numbers = true)]
    area: Option<f64>,

    /// Accepted deviation from --area in m²
    #[arg(long, default_value_t = 10.0, allow_negative_numbers = true)]
    area_tolerance: f64,

    /// Floor plan (1R, 1K, 1DK, 1LDK, 2K ... 4LDK)
    #[arg(long)]
    madori: Option<String>,

    /// Completion month of the subject property (YYYY-MM)
    #[arg(long)]
    subject_built: Option<String>,

    /// Maximum building age in years
    #[arg(long, allow_negative_numbers = true)]
    age_max: Option<i64>,

    /// Age difference in years that counts as comparable to the subject
    #[arg(long, allow_negative_numbers = true)]
    age_diff: Option<i64>,

    /// Building type keyword (e.g. マンション, アパート)
    #[arg(long)]
    building_type: Option<String>,

    /// yes | no | any
    #[arg(long, default_value = "any")]
    auto_lock: String,

    /// Separate bath and toilet: yes | no | any (also required | forbidden)
    #[arg(long, default_value = "any")]
    bath_toilet: String,

    /// Main window direction (south, 南, SE ...)
    #[arg(long)]
    aspect: Option<String>,

    /// Records collected per site
    #[arg(long, default_value_t = 50, allow_negative_numbers = true)]
    max_listings: i64,

    /// Comma-separated sites, in priority order
    #[arg(long, value_delimiter = ',', default_value = "homes,suumo")]
    sites: Vec<String>,

    /// csv | jsonl | sqlite
    #[arg(long, default_value = "csv")]
    output_format: String,

    /// Output file (default: <output_dir>/rent-survey-YYYYMMDD-HHMMSS.<ext>)
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Overrides user_agent from data/config.yaml
    #[arg(long)]
    user_agent: Option<String>,

    /// Seconds between requests to the same site
    #[arg(long)]
    request_interval: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Also report statistics without buildings under one year old
    #[arg(long)]
    brand_new_separate_stats: bool,

    /// Abort the whole survey after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the supported sites and exit
    #[arg(long)]
    list_sites: bool,

    /// Write a default data/config.yaml and exit
    #[arg(long)]
    init_config: bool,
}

impl Args {
    fn survey_params(&self) -> SurveyParams {
        SurveyParams {
            station: self.station.clone().unwrap_or_default(),
            minutes: self.minutes,
            area: self.area,
            area_tolerance: self.area_tolerance,
            madori: self.madori.clone(),
            subject_built: self.subject_built.clone(),
            age_max: self.age_max,
            age_diff: self.age_diff,
            building_type: self.building_type.clone(),
            auto_lock: self.auto_lock.clone(),
            bath_toilet: self.bath_toilet.clone(),
            aspect: self.aspect.clone(),
            max_listings: self.max_listings,
            sites: self.sites.clone(),
            output_format: self.output_format.clone(),
            brand_new_separate_stats: self.brand_new_separate_stats,
        }
    }

    /// Command-line values take precedence over the config file
    fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        if let Some(secs) = self.request_interval {
            let interval = Duration::try_from_secs_f64(secs)
                .map_err(|_| error::ConfigError::invalid("request-interval", format!("must be a non-negative number of seconds, got {}", secs)))?;
            config.request_interval_ms = interval.as_millis() as u64;
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout_secs = secs;
        }
        Ok(())
    }
}

fn init_logging(config: &Config) {
    // Initialize logging - use RUST_LOG env var if set, otherwise use config
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
        tracing::debug!("Logging level set from RUST_LOG environment variable");
    } else {
        let level = config.tracing_level.to_lowercase();
        let max_level = match level.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => {
                eprintln!("Invalid tracing level '{}', using 'info'", level);
                tracing::Level::INFO
            }
        };

        tracing_subscriber::fmt()
            .with_max_level(max_level)
            .with_writer(std::io::stderr)
            .init();

        tracing::debug!("Logging level set to: {} (from data/config.yaml)", level);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init_config {
        Config::create_default()?;
        eprintln!("Wrote default configuration to {}", config::CONFIG_PATH);
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    init_logging(&config);

    let registry = sites::default_registry();
    if args.list_sites {
        for site in registry.list_sites() {
            println!("{}", site);
        }
        return Ok(());
    }

    // Everything below is validated before the first request goes out
    args.apply_to(&mut config)?;
    let query = args.survey_params().into_query(&registry, Local::now().date_naive())?;
    let adapters = registry.resolve(&query.sites)?;

    tracing::info!("Starting rent survey around {} on {:?}", query.station, query.sites);

    let survey = run_survey(&query, &adapters, &config, args.output_path.as_deref());
    let summary = match args.timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), survey)
            .await
            .map_err(|_| anyhow::anyhow!("Survey did not finish within {} seconds", secs))??,
        None => survey.await?,
    };

    summary.print();
    Ok(())
}

/// crawl → normalize → filter → dedup → stats → output
async fn run_survey(
    query: &SurveyQuery,
    adapters: &[Arc<dyn SiteAdapter>],
    config: &Config,
    output_path: Option<&Path>,
) -> Result<SurveySummary> {
    let started_at = Utc::now();

    let client = http_client::create_http_client(&config.user_agent, config.request_timeout())?;
    let fetcher: Arc<dyn PageFetcher> = Arc::new(
        PoliteFetcher::new(client, &config.user_agent, config.request_interval())
            .respect_robots(config.respect_robots_txt),
    );
    let options = CrawlOptions {
        max_listings: query.max_listings,
        max_pages: config.max_pages_per_site,
        retry_transient: config.retry_transient,
    };

    let outcome = crawler::crawl_all(adapters, fetcher, query, options).await;

    let (listings, parse_failures) = normalizer::normalize_all(&outcome.records(), query);
    let normalized = listings.len();
    tracing::info!("Normalized {} of {} records", normalized, outcome.total_records());

    let (kept, filtered_out) = filter::apply(listings, query);
    let kept_after_filter = kept.len();

    let groups = dedup::deduplicate(kept, query);
    let representatives = dedup::representatives(&groups);
    let reports = stats::aggregate(&representatives, query);

    let mut failures = outcome.failures();
    failures.extend(parse_failures);

    let (merged_groups, merged_listings) = SurveySummary::merge_counts(&groups);
    let rows: Vec<ListingRow> = groups.iter().map(ListingRow::from).collect();
    let path = output::ensure_output_path(output_path, Path::new(&config.output_dir), query.output_format, started_at)?;
    match query.output_format {
        OutputFormat::Csv => output::write_csv(&path, &rows)?,
        OutputFormat::Jsonl => output::write_jsonl(&path, &rows)?,
        OutputFormat::Sqlite => {
            let path_str = path.to_str().context("Output path is not valid UTF-8")?;
            let mut db = Database::new(path_str)?;
            let counts = RunCounts {
                raw: outcome.total_records(),
                normalized,
                filtered: kept_after_filter,
                deduplicated: groups.len(),
                failures: failures.len(),
            };
            db.insert_run(query, started_at, &counts, &rows)?;
        }
    }
    tracing::info!("Wrote {} listings to {}", rows.len(), path.display());

    Ok(SurveySummary {
        station: query.station.clone(),
        sites: SurveySummary::site_lines(&outcome),
        normalized,
        kept_after_filter,
        filtered_out,
        deduplicated: groups.len(),
        merged_groups,
        merged_listings,
        reports,
        failures,
        output_path: Some(path),
    })
}
