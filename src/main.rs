use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use qan_profile::{
    Config, MemoryStore, ProfileBuilder, ProfileError, ProfileRequest, RankBy, Reporter,
    SeriesTarget, StandardResolver, StatName, TimeWindow, requested_statistics, series,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

mod cli_logger;

use cli_logger::CliLogger;

#[derive(Debug, Parser)]
#[command(name = "qan-profile", version, about = "Ranked query-class profiles over metric buckets")]
struct Cli {
    #[arg(long, global = true, default_value = "qan-profile.toml")]
    config: PathBuf,
    /// Overrides the configured reporter.
    #[arg(long, global = true)]
    format: Option<Reporter>,
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rank query classes in a window by a metric statistic.
    Profile {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value = "query_time")]
        metric: String,
        #[arg(long, default_value = "sum", value_parser = parse_stat)]
        stat: StatName,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
        /// Checksum, abstract prefix or fingerprint substring.
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Print the 60-point sparkline for one class or the whole instance.
    Series {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        class: Option<u64>,
    },
    /// List the statistics every profile entry carries.
    Stats,
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// JSON dataset of query classes and metric buckets.
    #[arg(long)]
    data: PathBuf,
    #[arg(long)]
    instance: u64,
    /// RFC 3339 timestamp or unix seconds.
    #[arg(long, value_parser = parse_timestamp)]
    begin: OffsetDateTime,
    #[arg(long, value_parser = parse_timestamp)]
    end: OffsetDateTime,
}

impl SourceArgs {
    fn open(&self) -> Result<(MemoryStore, TimeWindow)> {
        let store = MemoryStore::load(&self.data)
            .with_context(|| format!("loading dataset {}", self.data.display()))?;
        let window = TimeWindow::new(self.begin, self.end)?;
        Ok((store, window))
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<OffsetDateTime, String> {
    if let Ok(secs) = s.parse::<i64>() {
        return OffsetDateTime::from_unix_timestamp(secs).map_err(|e| e.to_string());
    }
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| format!("expected RFC 3339 or unix seconds: {e}"))
}

fn parse_stat(s: &str) -> std::result::Result<StatName, String> {
    s.parse::<StatName>().map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_optional(&cli.config);
    let reporter = cli.format.unwrap_or(config.reporter);
    let logger = CliLogger::new(reporter == Reporter::Json, cli.no_color);

    match run(&cli, &config, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(e) = err.downcast_ref::<ProfileError>()
                && e.is_user_facing()
            {
                logger.print_warning(&e.to_string());
                return ExitCode::SUCCESS;
            }
            logger.print_error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: &Config, logger: &CliLogger) -> Result<()> {
    match &cli.command {
        Command::Profile {
            source,
            metric,
            stat,
            limit,
            offset,
            search,
        } => {
            let (store, window) = source.open()?;
            let req = ProfileRequest::new(
                source.instance,
                window,
                RankBy::new(metric.clone(), *stat),
                limit.unwrap_or(config.default_limit),
            )
            .offset(*offset)
            .search(search.clone());
            let profile = ProfileBuilder::new(&store)
                .concurrent_series(config.concurrent_series)
                .profile(&req, &config.request_scope())?;
            logger.print_profile(source.instance, &profile)
        }

        Command::Series { source, class } => {
            let (store, window) = source.open()?;
            let target = class.map_or(SeriesTarget::AllClasses, SeriesTarget::Class);
            let points = series(&store, source.instance, &window, target)?;
            logger.print_serialized(&points)
        }

        Command::Stats => logger.print_serialized(&requested_statistics(&StandardResolver)),
    }
}
