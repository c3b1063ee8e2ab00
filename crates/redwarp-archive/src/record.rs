//! Archived post and comment model, and parsing of dump lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One archived post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier.
    pub id: String,
    /// Post title.
    pub title: String,
    /// Author name.
    pub author: String,
    /// Self-text body, if any.
    pub selftext: Option<String>,
    /// Creation instant.
    pub created_utc: DateTime<Utc>,
    /// Net score.
    pub score: i64,
    /// Upvote count, when the dump carries it.
    pub ups: Option<i64>,
    /// Downvote count, when the dump carries it.
    pub downs: Option<i64>,
    /// Comment count.
    pub num_comments: Option<i64>,
    /// External media or link URL.
    pub media_url: Option<String>,
}

impl Record {
    /// Creation time as epoch seconds.
    pub fn created_epoch(&self) -> i64 {
        self.created_utc.timestamp()
    }

    /// `ups - downs` when both are known, otherwise the plain score.
    ///
    /// Saturates at the `i64` bounds for out-of-range vote counts.
    pub fn effective_score(&self) -> i64 {
        match (self.ups, self.downs) {
            (Some(ups), Some(downs)) => ups.saturating_sub(downs),
            _ => self.score,
        }
    }
}

/// A comment attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Unique identifier.
    pub id: String,
    /// Author name, absent for deleted accounts.
    pub author: Option<String>,
    /// Comment text.
    pub body: String,
    /// Creation instant.
    pub created_utc: DateTime<Utc>,
}

/// A record parsed from a dump line together with its collection field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    /// Collection the dump line claims to belong to.
    pub collection: Option<String>,
    /// The parsed record.
    pub record: Record,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireEpoch {
    Int(i64),
    Float(f64),
    Text(String),
}

impl WireEpoch {
    fn seconds(&self) -> Result<i64, String> {
        match self {
            WireEpoch::Int(s) => Ok(*s),
            WireEpoch::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
            WireEpoch::Float(f) => Err(format!("non-finite created_utc {}", f)),
            WireEpoch::Text(t) => {
                let t = t.trim();
                t.parse::<i64>()
                    .or_else(|_| t.parse::<f64>().map(|f| f.trunc() as i64))
                    .map_err(|_| format!("created_utc {:?} is not numeric", t))
            }
        }
    }
}

#[derive(Deserialize)]
struct WireRecord {
    id: String,
    title: String,
    author: String,
    #[serde(default)]
    selftext: Option<String>,
    created_utc: WireEpoch,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    ups: Option<i64>,
    #[serde(default)]
    downs: Option<i64>,
    #[serde(default)]
    num_comments: Option<i64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    subreddit: Option<String>,
}

/// Parses one JSON dump line.
///
/// Unknown fields are ignored; a missing score counts as zero.
pub fn parse_dump_line(line: &str) -> Result<DumpRecord, String> {
    let wire: WireRecord = serde_json::from_str(line).map_err(|e| e.to_string())?;
    wire.into_dump_record()
}

/// Parses one dump line on behalf of `collection`.
///
/// Returns `Ok(None)` for a line naming another collection (or none) without
/// validating its record fields. Invalid JSON, a non-object line, or a
/// malformed record of `collection` itself is an error.
pub fn parse_collection_line(line: &str, collection: &str) -> Result<Option<Record>, String> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let Some(fields) = value.as_object() else {
        return Err("expected a JSON object".to_string());
    };
    if fields.get("subreddit").and_then(|v| v.as_str()) != Some(collection) {
        return Ok(None);
    }
    let wire: WireRecord = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok(Some(wire.into_dump_record()?.record))
}

impl WireRecord {
    fn into_dump_record(self) -> Result<DumpRecord, String> {
        let secs = self.created_utc.seconds()?;
        let created_utc = DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| format!("created_utc {} out of range", secs))?;
        Ok(DumpRecord {
            collection: self.subreddit,
            record: Record {
                id: self.id,
                title: self.title,
                author: self.author,
                selftext: self.selftext,
                created_utc,
                score: self.score.unwrap_or(0),
                ups: self.ups,
                downs: self.downs,
                num_comments: self.num_comments,
                media_url: self.url,
            },
        })
    }
}
