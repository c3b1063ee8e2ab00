//! Typed records from remote per-collection dump files.
//!
//! Each collection is one zstd-compressed, line-delimited JSON file in the
//! swarm. Bytes come through the [`ContentCache`], decoding runs on a
//! blocking thread, and records arrive over a bounded channel.

use std::fs::File;
use std::sync::Arc;

use redwarp_store::{ContentCache, RemoteFetcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ArchiveConfig;
use crate::decoder::{zstd_lines, DecoderConfig};
use crate::error::{ArchiveError, ArchiveResult};
use crate::record::{parse_collection_line, Record};

const RECORD_CHANNEL_CAPACITY: usize = 1024;

/// A collection dump known to the swarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Collection name (file name without the dump suffix).
    pub name: String,
    /// Compressed dump size in bytes.
    pub size_bytes: u64,
}

/// Lazy sequence of records decoded from one dump.
///
/// Yields records in dump order. The first error ends the stream.
pub struct RecordStream {
    rx: mpsc::Receiver<ArchiveResult<Record>>,
    task: Option<JoinHandle<()>>,
}

impl RecordStream {
    /// Next record, or `None` once the dump is exhausted.
    pub async fn next(&mut self) -> Option<ArchiveResult<Record>> {
        if let Some(item) = self.rx.recv().await {
            return Some(item);
        }
        let task = self.task.take()?;
        match task.await {
            Ok(()) => None,
            Err(e) => Some(Err(ArchiveError::DecoderTask {
                reason: e.to_string(),
            })),
        }
    }

    /// Drains the stream, failing on the first error.
    pub async fn try_collect(mut self) -> ArchiveResult<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(item) = self.next().await {
            records.push(item?);
        }
        Ok(records)
    }
}

/// Reads collections out of remote dump files.
pub struct DumpRecordSource {
    remote: Arc<dyn RemoteFetcher>,
    cache: Arc<ContentCache>,
    collections_path: String,
    dump_suffix: String,
    decoder: DecoderConfig,
}

impl DumpRecordSource {
    /// Creates a source reading dumps from `remote` through `cache`.
    pub fn new(remote: Arc<dyn RemoteFetcher>, cache: Arc<ContentCache>, config: &ArchiveConfig) -> Self {
        Self {
            remote,
            cache,
            collections_path: config.collections_path.trim_end_matches('/').to_string(),
            dump_suffix: config.dump_suffix.clone(),
            decoder: config.decoder,
        }
    }

    /// Swarm path of the dump for `collection`.
    pub fn dump_path(&self, collection: &str) -> String {
        if self.collections_path.is_empty() {
            format!("{}{}", collection, self.dump_suffix)
        } else {
            format!("{}/{}{}", self.collections_path, collection, self.dump_suffix)
        }
    }

    /// Lists dumps whose file name ends with `suffix`, named by stripping it.
    pub async fn enumerate(&self, suffix: &str) -> ArchiveResult<Vec<CollectionDescriptor>> {
        let files = self.remote.list_files().await?;
        let collections: Vec<CollectionDescriptor> = files
            .into_iter()
            .filter_map(|entry| {
                let file_name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
                let name = file_name.strip_suffix(suffix)?;
                if name.is_empty() {
                    return None;
                }
                Some(CollectionDescriptor {
                    name: name.to_string(),
                    size_bytes: entry.size_bytes,
                })
            })
            .collect();
        debug!(count = collections.len(), suffix, "enumerated collection dumps");
        Ok(collections)
    }

    /// Streams the records of `collection`, fetching its dump if needed.
    ///
    /// Lines belonging to other collections are skipped without further
    /// validation. A malformed line of `collection` ends the stream with
    /// [`ArchiveError::RecordParse`]. The dump is opened before this returns,
    /// so a concurrent eviction of the cached file does not affect the stream.
    pub async fn stream(&self, collection: &str) -> ArchiveResult<RecordStream> {
        let path = self.dump_path(collection);
        let cached = self.cache.fetch_open(self.remote.as_ref(), &path).await?;
        info!(collection, local = %cached.path.display(), "reading collection dump");

        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let name = collection.to_string();
        let decoder = self.decoder;
        let task = tokio::task::spawn_blocking(move || decode_dump(cached.file, name, decoder, tx));
        Ok(RecordStream {
            rx,
            task: Some(task),
        })
    }
}

fn decode_dump(
    file: File,
    collection: String,
    config: DecoderConfig,
    tx: mpsc::Sender<ArchiveResult<Record>>,
) {
    let lines = match zstd_lines(file, config) {
        Ok(lines) => lines,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return;
        }
    };

    let mut emitted: u64 = 0;
    let mut foreign: u64 = 0;
    for (idx, line) in lines.enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        if line.text.trim().is_empty() {
            continue;
        }
        match parse_collection_line(&line.text, &collection) {
            Ok(Some(record)) => {
                if tx.blocking_send(Ok(record)).is_err() {
                    debug!(collection = %collection, "record consumer went away");
                    return;
                }
                emitted += 1;
            }
            Ok(None) => foreign += 1,
            Err(reason) => {
                let _ = tx.blocking_send(Err(ArchiveError::RecordParse {
                    line_number: idx as u64 + 1,
                    reason,
                }));
                return;
            }
        }
    }
    debug!(collection = %collection, emitted, foreign, "finished decoding dump");
}
