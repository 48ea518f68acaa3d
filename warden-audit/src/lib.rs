//! Append-only audit trail: one record per completed session.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use warden_types::{ArtifactKind, CostRecord};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("chain error at record {index}: {reason}")]
    Chain { index: usize, reason: String },
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Accepted,
    Rejected,
    InputError,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Accepted => "accepted",
            AuditOutcome::Rejected => "rejected",
            AuditOutcome::InputError => "input_error",
        }
    }
}

/// What a session hands to the logger.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub kind: ArtifactKind,
    pub input_text: String,
    /// JSON summary of the artifact or the terminal error.
    pub output_summary: String,
    pub outcome: AuditOutcome,
    pub cost: CostRecord,
    pub model: String,
}

/// An entry once it has an id and a timestamp. Never modified after write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub kind: ArtifactKind,
    pub input_text: String,
    pub output_summary: String,
    pub outcome: AuditOutcome,
    pub cost: CostRecord,
    pub model: String,
    pub timestamp: String,
}

impl AuditRecord {
    pub fn stamp(entry: AuditEntry) -> Self {
        let prefix = match entry.kind {
            ArtifactKind::Clause => "nlq",
            ArtifactKind::Code => "scf",
        };
        Self {
            id: format!("{prefix}-{}", Uuid::new_v4()),
            kind: entry.kind,
            input_text: entry.input_text,
            output_summary: entry.output_summary,
            outcome: entry.outcome,
            cost: entry.cost,
            model: entry.model,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Durable, append-only destination for session records.
///
/// Implementations serialize concurrent appends themselves.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError>;
}

/// Keeps records in memory; used by tests and dry runs.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        let record = AuditRecord::stamp(entry);
        self.records
            .lock()
            .map_err(|_| AuditError::Io("lock".into()))?
            .push(record.clone());
        Ok(record)
    }
}

/// One JSONL line: the record plus its link in the hash chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainedRecord {
    #[serde(flatten)]
    pub record: AuditRecord,
    pub prev_hash: Option<String>,
    pub chain_hash: String,
}

/// Hash-chained JSON-lines log. A single mutex orders appends.
pub struct JsonlAuditLog {
    path: PathBuf,
    last_hash: Mutex<Option<String>>,
}

impl JsonlAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::Io(e.to_string()))?;
        }
        let last_hash = read_last_hash(&path)?;
        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        let mut last = self
            .last_hash
            .lock()
            .map_err(|_| AuditError::Io("lock".into()))?;
        let record = AuditRecord::stamp(entry);
        let chain_hash = hash_record(&record, last.as_deref())?;
        let line = ChainedRecord {
            record: record.clone(),
            prev_hash: last.clone(),
            chain_hash: chain_hash.clone(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::Io(e.to_string()))?;
        let json = serde_json::to_string(&line).map_err(|e| AuditError::Parse(e.to_string()))?;
        writeln!(file, "{json}").map_err(|e| AuditError::Io(e.to_string()))?;
        *last = Some(chain_hash);
        Ok(record)
    }
}

/// Walk the chain; returns the number of records on success.
pub fn verify_log(path: impl AsRef<Path>) -> Result<usize, AuditError> {
    let mut prev: Option<String> = None;
    let mut count = 0;
    for (index, line) in read_lines(path.as_ref())?.into_iter().enumerate() {
        let chained: ChainedRecord =
            serde_json::from_str(&line).map_err(|e| AuditError::Parse(e.to_string()))?;
        if chained.prev_hash != prev {
            return Err(AuditError::Chain {
                index,
                reason: "hash chain mismatch".into(),
            });
        }
        let expected = hash_record(&chained.record, prev.as_deref())?;
        if chained.chain_hash != expected {
            return Err(AuditError::Chain {
                index,
                reason: "chain hash invalid".into(),
            });
        }
        prev = Some(chained.chain_hash);
        count += 1;
    }
    Ok(count)
}

/// Last `n` raw lines of the log.
pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<String>, AuditError> {
    let lines = read_lines(path.as_ref())?;
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].to_vec())
}

fn hash_record(record: &AuditRecord, prev: Option<&str>) -> Result<String, AuditError> {
    let body = serde_json::to_string(record).map_err(|e| AuditError::Parse(e.to_string()))?;
    let mut h = Sha256::new();
    h.update(body.as_bytes());
    if let Some(prev) = prev {
        h.update(prev.as_bytes());
    }
    Ok(hex::encode(h.finalize()))
}

fn read_lines(path: &Path) -> Result<Vec<String>, AuditError> {
    let file = File::open(path).map_err(|e| AuditError::Io(e.to_string()))?;
    BufReader::new(file)
        .lines()
        .filter(|l| !matches!(l, Ok(s) if s.trim().is_empty()))
        .map(|l| l.map_err(|e| AuditError::Io(e.to_string())))
        .collect()
}

fn read_last_hash(path: &Path) -> Result<Option<String>, AuditError> {
    if !path.exists() {
        return Ok(None);
    }
    let mut last = None;
    for line in read_lines(path)? {
        let chained: ChainedRecord =
            serde_json::from_str(&line).map_err(|e| AuditError::Parse(e.to_string()))?;
        last = Some(chained.chain_hash);
    }
    Ok(last)
}
