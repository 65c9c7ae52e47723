//! `hds-export` command line front end.
//!
//! # Commands
//!
//! - `sources` - List registered data sources and their aggregations
//! - `data` - Export raw data points of some or all sources
//! - `aggr` - Export aggregated points of shared aggregations
//!
//! Ctrl-C aborts a running export; nothing is written in that case.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hds_export::{
    AggregationChoice, AggregationSelection, ApiClient, ArtifactSink, DataSelection,
    DirectorySink, ExportConfig, ExportJob, Exporter, OutputMode, Progress, RegistryClient,
    ReqwestHttpClient, StaticSession, TimeFormat, build_aggregation_job, build_data_job,
    default_aggregation_attributes, group_aggregations,
};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "hds-export", version, about = "Bulk export from a historical datastore")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the datastore API (overrides the configuration file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Session ticket sent with every request
    #[arg(long, global = true, env = "HDS_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered data sources
    Sources,
    /// Export raw data points
    Data(DataArgs),
    /// Export aggregated data
    Aggr(AggrArgs),
}

#[derive(Args, Debug)]
struct WindowArgs {
    /// Start of the time window (YYYY-MM-DDTHH:MM:SS)
    #[arg(long, default_value = "")]
    start: String,

    /// End of the time window (YYYY-MM-DDTHH:MM:SS)
    #[arg(long, default_value = "")]
    end: String,

    /// Write timestamps as ISO 8601 instead of epoch seconds
    #[arg(long)]
    iso: bool,

    /// Output directory
    #[arg(long, default_value = ".")]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Comma separated attributes (name, time, value, unit)
    #[arg(long, default_value = "name,time,value,unit")]
    attributes: String,

    /// Source to export; repeat for several. All sources when omitted.
    #[arg(long = "source")]
    sources: Vec<String>,

    /// One CSV per source, zipped
    #[arg(long)]
    zip: bool,

    #[command(flatten)]
    window: WindowArgs,
}

#[derive(Args, Debug)]
struct AggrArgs {
    /// `<id>=<attributes>`; repeat for several. All aggregations when omitted.
    #[arg(long = "aggregation", value_parser = parse_choice)]
    aggregations: Vec<AggregationChoice>,

    /// One CSV per aggregation and source, zipped
    #[arg(long, conflicts_with = "per_aggregation")]
    zip: bool,

    /// One CSV per aggregation, zipped
    #[arg(long)]
    per_aggregation: bool,

    #[command(flatten)]
    window: WindowArgs,
}

fn parse_choice(raw: &str) -> Result<AggregationChoice, String> {
    let (id, attributes) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <id>=<attributes>, got '{raw}'"))?;
    Ok(AggregationChoice {
        aggregation_id: id.trim().to_string(),
        attributes: attributes.to_string(),
    })
}

fn time_format(iso: bool) -> TimeFormat {
    if iso {
        TimeFormat::Iso8601
    } else {
        TimeFormat::EpochSeconds
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ExportConfig> {
    let mut config = match &cli.config {
        Some(path) => ExportConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ExportConfig::default(),
    };
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Log each whole percent of overall progress once.
fn progress_logger() -> hds_export::ProgressFn {
    let last = Arc::new(AtomicU64::new(u64::MAX));
    Arc::new(move |progress: Progress| {
        let percent = (progress.main * 100.0).floor() as u64;
        if last.swap(percent, Ordering::Relaxed) != percent {
            tracing::info!(percent, sub = progress.sub, "Export progress");
        }
    })
}

async fn run_job(
    client: ApiClient<ReqwestHttpClient>,
    job: ExportJob,
    out: PathBuf,
) -> anyhow::Result<()> {
    let exporter = Exporter::with_client(client).with_progress(progress_logger());

    let abort = exporter.abort_handle();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Received Ctrl-C, aborting export");
                abort.abort();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to install Ctrl-C handler"),
        }
    });

    match exporter.run_export(&job).await {
        Ok(artifact) => {
            let path = DirectorySink::new(out).save(&artifact).await?;
            println!("{}", path.display());
            Ok(())
        }
        Err(e) if e.is_abort() => {
            tracing::warn!("Export aborted, nothing written");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let session = Arc::new(StaticSession::new(cli.token.clone()));
    let client = ApiClient::new(Arc::new(ReqwestHttpClient::new()), session, config);
    let registry = RegistryClient::new(client.clone());

    match cli.command {
        Command::Sources => {
            for source in registry.list_sources().await? {
                let aggregations: Vec<_> =
                    source.aggregation.iter().map(|a| a.id.as_str()).collect();
                println!("{}\t{}", source.id, aggregations.join(","));
            }
            Ok(())
        }
        Command::Data(args) => {
            let sources = if args.sources.is_empty() {
                registry
                    .list_sources()
                    .await?
                    .into_iter()
                    .map(|s| s.id)
                    .collect()
            } else {
                args.sources
            };
            let job = build_data_job(DataSelection {
                attributes: args.attributes,
                start: args.window.start,
                end: args.window.end,
                output: if args.zip {
                    OutputMode::PerEntityZip
                } else {
                    OutputMode::SingleFile
                },
                time_format: time_format(args.window.iso),
                sources,
            })?;
            run_job(client, job, args.window.out).await
        }
        Command::Aggr(args) => {
            let sources = registry.list_sources().await?;
            let groups = group_aggregations(&sources)?;
            for group in groups.iter() {
                tracing::debug!(aggregation = %group.id, summary = %group.summary(), "Available aggregation");
            }

            let choices = if args.aggregations.is_empty() {
                groups
                    .iter()
                    .map(|group| AggregationChoice {
                        aggregation_id: group.id.clone(),
                        attributes: default_aggregation_attributes(group),
                    })
                    .collect()
            } else {
                args.aggregations
            };
            let output = match (args.zip, args.per_aggregation) {
                (_, true) => OutputMode::PerAggregationZip,
                (true, false) => OutputMode::PerEntityZip,
                (false, false) => OutputMode::SingleFile,
            };
            let job = build_aggregation_job(
                AggregationSelection {
                    choices,
                    start: args.window.start,
                    end: args.window.end,
                    output,
                    time_format: time_format(args.window.iso),
                },
                &groups,
            )?;
            run_job(client, job, args.window.out).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice() {
        let choice = parse_choice("agg1=name,starttime,max").unwrap();
        assert_eq!(choice.aggregation_id, "agg1");
        assert_eq!(choice.attributes, "name,starttime,max");
        assert!(parse_choice("agg1").is_err());
    }

    #[test]
    fn test_cli_parses_aggr_flags() {
        let cli = Cli::try_parse_from([
            "hds-export",
            "aggr",
            "--aggregation",
            "a=name",
            "--per-aggregation",
            "--iso",
        ])
        .unwrap();
        let Command::Aggr(args) = cli.command else {
            panic!("expected aggr command");
        };
        assert!(args.per_aggregation);
        assert!(args.window.iso);
        assert_eq!(args.aggregations.len(), 1);
    }

    #[test]
    fn test_zip_conflicts_with_per_aggregation() {
        assert!(
            Cli::try_parse_from(["hds-export", "aggr", "--zip", "--per-aggregation"]).is_err()
        );
    }
}
