//! Command-line front end over the snapshot service.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use redwarp_archive::{
    ArchiveError, CachedArchive, DumpArchive, DumpRecordSource, Record, SnapshotQuery, SnapshotService, SortMode,
};
use redwarp_store::{ContentCache, DirectoryMirror};
use serde::Serialize;
use tracing::info;

use crate::config::WarpConfig;

/// Service stack assembled from a [`WarpConfig`].
pub type WarpService = SnapshotService<CachedArchive<DumpArchive>>;

/// Parsed command line.
#[derive(Parser, Debug)]
#[command(name = "redwarp")]
#[command(about = "Point-in-time views of archived forum collections", long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json); defaults apply when it does not exist.
    #[arg(short, long, env = "REDWARP_CONFIG", default_value = "redwarp.toml")]
    pub config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    /// What to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List collections that can be queried.
    Collections,
    /// Records of a collection as of a cutoff, filtered and sorted.
    Submissions {
        /// Collection name.
        collection: String,
        /// Snapshot cutoff (epoch seconds).
        cutoff: i64,
        /// Earliest creation time to include (epoch seconds).
        #[arg(long)]
        start: Option<i64>,
        /// Latest creation time to include (epoch seconds).
        #[arg(long)]
        end: Option<i64>,
        /// new, old or top.
        #[arg(long, default_value = "top")]
        sort: SortMode,
        /// Records to return (1-1000).
        #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u64).range(1..=1000))]
        limit: u64,
        /// Records to skip.
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },
    /// Records of a collection as of a cutoff, ranked by hot score.
    Hot {
        /// Collection name.
        collection: String,
        /// Snapshot cutoff (epoch seconds).
        cutoff: i64,
        /// Records to return (1-1000).
        #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u64).range(1..=1000))]
        limit: u64,
        /// Records to skip.
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },
}

/// Filters echoed back with a submissions listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionFilters {
    /// Lower creation bound, RFC 3339.
    pub start_time: Option<String>,
    /// Upper creation bound, RFC 3339.
    pub end_time: Option<String>,
    /// Sort mode applied.
    pub sort_by: SortMode,
}

/// Output of `submissions`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionsResponse {
    /// Collection name.
    pub collection: String,
    /// Snapshot cutoff, RFC 3339.
    pub snapshot_datetime: String,
    /// Filters applied.
    pub filters: SubmissionFilters,
    /// Matching records.
    pub submissions: Vec<Record>,
    /// Number of records returned.
    pub count: usize,
    /// Requested limit.
    pub limit: u64,
    /// Requested skip.
    pub skip: usize,
}

/// Output of `hot`.
#[derive(Debug, Clone, Serialize)]
pub struct HotSubmissionsResponse {
    /// Collection name.
    pub collection: String,
    /// Snapshot cutoff, RFC 3339.
    pub snapshot_datetime: String,
    /// Ranked records.
    pub submissions: Vec<Record>,
    /// Number of records returned.
    pub count: usize,
    /// Requested limit.
    pub limit: u64,
    /// Requested skip.
    pub skip: usize,
}

/// Assembles mirror, content cache, dump archive and snapshot cache.
pub async fn build_service(config: &WarpConfig) -> Result<WarpService> {
    let remote = Arc::new(DirectoryMirror::new(&config.mirror_root));
    let content = Arc::new(ContentCache::open(config.store.clone()).await?);
    let source = DumpRecordSource::new(remote, content, &config.archive);
    let dump = DumpArchive::new(
        source,
        config.archive.dump_suffix.clone(),
        config.archive.max_collection_size_bytes,
    );
    let cached = CachedArchive::open(dump, &config.snapshot_cache).await?;
    Ok(SnapshotService::new(cached))
}

fn instant(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| anyhow!("timestamp {} is out of range", secs))
}

/// Runs `command` against `service` and returns its JSON output.
pub async fn execute(service: &WarpService, command: &Command) -> Result<serde_json::Value> {
    match command {
        Command::Collections => {
            let collections = service.available_collections().await?;
            Ok(serde_json::to_value(collections)?)
        }
        Command::Submissions {
            collection,
            cutoff,
            start,
            end,
            sort,
            limit,
            skip,
        } => {
            let snapshot_datetime = instant(*cutoff)?;
            let start = start.map(instant).transpose()?;
            let end = end.map(instant).transpose()?;
            info!(
                collection = %collection,
                cutoff = %snapshot_datetime,
                ?start,
                ?end,
                sort = %sort,
                limit,
                skip,
                "submissions request"
            );

            let snapshot = service.snapshot(collection, snapshot_datetime).await?;
            let submissions: Vec<Record> = snapshot
                .query(&SnapshotQuery {
                    start,
                    end,
                    sort: *sort,
                    limit: Some(*limit as usize),
                    skip: *skip,
                })
                .into_iter()
                .cloned()
                .collect();
            info!(count = submissions.len(), "submissions found");

            let response = SubmissionsResponse {
                collection: collection.clone(),
                snapshot_datetime: snapshot_datetime.to_rfc3339(),
                filters: SubmissionFilters {
                    start_time: start.map(|t| t.to_rfc3339()),
                    end_time: end.map(|t| t.to_rfc3339()),
                    sort_by: *sort,
                },
                count: submissions.len(),
                submissions,
                limit: *limit,
                skip: *skip,
            };
            Ok(serde_json::to_value(response)?)
        }
        Command::Hot {
            collection,
            cutoff,
            limit,
            skip,
        } => {
            let snapshot_datetime = instant(*cutoff)?;
            info!(collection = %collection, cutoff = %snapshot_datetime, limit, skip, "hot request");

            let snapshot = service.snapshot(collection, snapshot_datetime).await?;
            let submissions: Vec<Record> = snapshot
                .hot(Some(*limit as usize), *skip)
                .into_iter()
                .cloned()
                .collect();

            let response = HotSubmissionsResponse {
                collection: collection.clone(),
                snapshot_datetime: snapshot_datetime.to_rfc3339(),
                count: submissions.len(),
                submissions,
                limit: *limit,
                skip: *skip,
            };
            Ok(serde_json::to_value(response)?)
        }
    }
}

impl Cli {
    /// Loads configuration, runs the command and prints its JSON output.
    pub async fn run(self) -> Result<()> {
        let config = WarpConfig::load(&self.config)?;
        let service = build_service(&config).await?;
        match execute(&service, &self.command).await {
            Ok(output) => {
                println!("{}", serde_json::to_string_pretty(&output)?);
                Ok(())
            }
            Err(e) => match e.downcast_ref::<ArchiveError>() {
                Some(ArchiveError::NotFound { collection }) => {
                    anyhow::bail!("Collection {} not found", collection)
                }
                _ => Err(e.context("Error fetching collection data")),
            },
        }
    }
}
