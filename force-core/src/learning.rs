//! Learning Recorder (spec.md §4.9): a durable append-only JSONL execution
//! log, rotated by size with gzipped history, plus aggregate and filtered
//! queries used by the Registry's `stats()` and MCP's `force_get_insights`.

use chrono::{DateTime, Utc};
use flate2::{Compression, write::GzEncoder};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Tool,
    Pattern,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// One JSONL execution-log line (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub kind: RecordKind,
    pub ref_id: String,
    pub params_digest: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,
}

/// Fields supplied by the Execution Runtime / Pattern Engine when an
/// execution completes; the Recorder fills in `id` and `duration_ms`.
pub struct NewRecord {
    pub kind: RecordKind,
    pub ref_id: String,
    pub params_digest: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: String,
    pub error: Option<(String, String)>,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Experimental,
    Stable,
    Deprecated,
}

/// Aggregate derived from the execution log for one tool/pattern id
/// (spec.md §4.5 `stats`, §4.9 `aggregate`).
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub usage_count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub last_seen: Option<DateTime<Utc>>,
    /// §9 Open Question resolution: computed, read-only; never enforced
    /// unconditionally by the core (see DESIGN.md).
    pub lifecycle: Lifecycle,
}

const STABLE_SUCCESS_RATE_THRESHOLD: f64 = 0.8;
const MIN_SAMPLES_FOR_LIFECYCLE: u64 = 10;

impl Aggregate {
    fn from_records(records: &[&ExecutionRecord]) -> Self {
        let usage_count = records.len() as u64;
        if usage_count == 0 {
            return Self {
                usage_count: 0,
                success_rate: 0.0,
                avg_duration_ms: 0.0,
                last_seen: None,
                lifecycle: Lifecycle::Experimental,
            };
        }

        let success_count = records.iter().filter(|r| r.outcome == "success").count() as u64;
        let success_rate = f64::from(u32::try_from(success_count).unwrap_or(u32::MAX))
            / f64::from(u32::try_from(usage_count).unwrap_or(u32::MAX));
        let avg_duration_ms =
            records.iter().map(|r| r.duration_ms as f64).sum::<f64>() / usage_count as f64;
        let last_seen = records.iter().map(|r| r.completed_at).max();

        let lifecycle = if usage_count < MIN_SAMPLES_FOR_LIFECYCLE {
            Lifecycle::Experimental
        } else if success_rate >= STABLE_SUCCESS_RATE_THRESHOLD {
            Lifecycle::Stable
        } else {
            Lifecycle::Deprecated
        };

        Self {
            usage_count,
            success_rate,
            avg_duration_ms,
            last_seen,
            lifecycle,
        }
    }
}

/// Filters accepted by `query` (spec.md §4.9, used by `force_get_insights`).
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub ref_id: Option<String>,
    pub outcome: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl QueryFilter {
    fn matches(&self, record: &ExecutionRecord) -> bool {
        if let Some(ref_id) = &self.ref_id
            && &record.ref_id != ref_id
        {
            return false;
        }
        if let Some(outcome) = &self.outcome
            && &record.outcome != outcome
        {
            return false;
        }
        if let Some(since) = self.since
            && record.started_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && record.started_at > until
        {
            return false;
        }
        true
    }
}

struct RecorderState {
    path: Option<PathBuf>,
    rotation_bytes: u64,
    current_size: u64,
    records: Vec<ExecutionRecord>,
}

/// Owns the append-only execution log exclusively (spec.md §3 Ownership).
#[derive(Clone)]
pub struct LearningRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl LearningRecorder {
    /// Construct a recorder with no backing file, for unit tests and
    /// dry-run executions that never need durable history.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(Mutex::new(RecorderState {
                path: None,
                rotation_bytes: u64::MAX,
                current_size: 0,
                records: Vec::new(),
            })),
        }
    }

    /// Open (creating if absent) the JSONL log at `path`, replaying any
    /// existing records into the in-memory aggregate cache.
    pub async fn open(path: PathBuf, rotation_bytes: u64) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut records = Vec::new();
        let mut current_size = 0u64;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let contents = tokio::fs::read_to_string(&path).await?;
            current_size = contents.len() as u64;
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(record) = serde_json::from_str::<ExecutionRecord>(line) {
                    records.push(record);
                }
            }
        }

        Ok(Self {
            state: Arc::new(Mutex::new(RecorderState {
                path: Some(path),
                rotation_bytes,
                current_size,
                records,
            })),
        })
    }

    /// `append(record)` (spec.md §4.9): fsync on every write, rotate when
    /// the current file crosses `rotation_bytes`. Never rewrites a prior
    /// record (Testable Property 5, append-only invariant).
    pub async fn append(&self, new_record: NewRecord) {
        let duration_ms = (new_record.completed_at - new_record.started_at).num_milliseconds();
        let record = ExecutionRecord {
            id: format!("exec_{}", Uuid::new_v4()),
            kind: new_record.kind,
            ref_id: new_record.ref_id,
            params_digest: new_record.params_digest,
            started_at: new_record.started_at,
            completed_at: new_record.completed_at,
            duration_ms,
            outcome: new_record.outcome,
            error: new_record
                .error
                .map(|(error_type, message)| ErrorInfo { error_type, message }),
            insights: new_record.insights,
        };

        let mut state = self.state.lock().await;
        if let Some(path) = state.path.clone() {
            let mut line = serde_json::to_string(&record).unwrap_or_default();
            line.push('\n');
            match append_to_file(&path, &line).await {
                Ok(()) => state.current_size += line.len() as u64,
                Err(err) => tracing::warn!(%err, "failed to append execution record to learning log"),
            }
            if state.current_size >= state.rotation_bytes {
                match rotate(&path).await {
                    Ok(()) => state.current_size = 0,
                    Err(err) => tracing::warn!(%err, "failed to rotate learning log"),
                }
            }
        }
        state.records.push(record);
    }

    pub async fn aggregate(&self, ref_id: &str) -> Aggregate {
        let state = self.state.lock().await;
        let matching: Vec<&ExecutionRecord> =
            state.records.iter().filter(|r| r.ref_id == ref_id).collect();
        Aggregate::from_records(&matching)
    }

    pub async fn query(&self, filter: &QueryFilter) -> Vec<ExecutionRecord> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }
}

async fn append_to_file(path: &Path, line: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.sync_data().await?;
    Ok(())
}

/// Rotate `path` to a timestamped, gzip-compressed history file and leave
/// the original path ready for a fresh, empty log (spec.md §4.9).
async fn rotate(path: &Path) -> anyhow::Result<()> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.fZ").to_string();
    let rotated = sibling_with_suffix(path, &timestamp);
    tokio::fs::rename(path, &rotated).await?;

    let contents = tokio::fs::read(&rotated).await?;
    let gz_path = sibling_with_suffix(path, &format!("{timestamp}.gz"));
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&contents)?;
        encoder.finish()?;
        Ok(())
    })
    .await??;

    tokio::fs::remove_file(&rotated).await.ok();
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("execution_log.jsonl");
    let renamed = format!("{file_name}.{suffix}");
    path.with_file_name(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_record(outcome: &str, duration_ms: i64) -> NewRecord {
        let started_at = Utc::now();
        NewRecord {
            kind: RecordKind::Tool,
            ref_id: "demo_tool".to_string(),
            params_digest: "deadbeef".to_string(),
            started_at,
            completed_at: started_at + chrono::Duration::milliseconds(duration_ms),
            outcome: outcome.to_string(),
            error: None,
            insights: vec![],
        }
    }

    #[tokio::test]
    async fn append_and_aggregate_round_trips() {
        let recorder = LearningRecorder::in_memory();
        recorder.append(new_record("success", 10)).await;
        recorder.append(new_record("failure", 20)).await;

        let aggregate = recorder.aggregate("demo_tool").await;
        assert_eq!(aggregate.usage_count, 2);
        assert!((aggregate.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn query_filters_by_outcome() {
        let recorder = LearningRecorder::in_memory();
        recorder.append(new_record("success", 10)).await;
        recorder.append(new_record("failure", 20)).await;

        let filter = QueryFilter {
            outcome: Some("failure".to_string()),
            ..Default::default()
        };
        let results = recorder.query(&filter).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, "failure");
    }

    #[tokio::test]
    async fn persists_and_reloads_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("learning").join("execution_log.jsonl");

        let recorder = LearningRecorder::open(path.clone(), 64 * 1024 * 1024).await.unwrap();
        recorder.append(new_record("success", 5)).await;
        drop(recorder);

        let reopened = LearningRecorder::open(path, 64 * 1024 * 1024).await.unwrap();
        let aggregate = reopened.aggregate("demo_tool").await;
        assert_eq!(aggregate.usage_count, 1);
    }

    #[tokio::test]
    async fn rotates_when_size_threshold_crossed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("execution_log.jsonl");
        let recorder = LearningRecorder::open(path.clone(), 10).await.unwrap();

        recorder.append(new_record("success", 1)).await;
        recorder.append(new_record("success", 1)).await;

        // The live log was rotated away once it crossed 10 bytes; a fresh
        // file exists (or none yet, if the second append happened right
        // after rotation) and a gzipped history file is present.
        let mut entries = tokio::fs::read_dir(temp.path()).await.unwrap();
        let mut saw_gz = false;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().ends_with(".gz") {
                saw_gz = true;
            }
        }
        assert!(saw_gz, "expected a rotated, gzipped history file");
    }
}
