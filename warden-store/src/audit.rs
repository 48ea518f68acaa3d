use rusqlite::{params, TransactionBehavior};
use serde::{Deserialize, Serialize};
use warden_audit::{AuditEntry, AuditError, AuditOutcome, AuditRecord, AuditSink};
use warden_types::ArtifactKind;

use crate::{LogStore, StoreError};

/// One row of the `audit_logs` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: String,
    pub event_type: String,
    pub module: String,
    pub level: String,
    pub input: String,
    pub output: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_usd: f64,
    pub model: String,
    pub timestamp: String,
}

impl From<&AuditRecord> for LogEvent {
    fn from(r: &AuditRecord) -> Self {
        let event_type = match r.kind {
            ArtifactKind::Clause => "nl_log_query",
            ArtifactKind::Code => "scaffold",
        };
        let level = match r.outcome {
            AuditOutcome::Accepted => "INFO",
            AuditOutcome::Rejected | AuditOutcome::InputError => "WARN",
        };
        Self {
            id: r.id.clone(),
            event_type: event_type.to_string(),
            module: "core".to_string(),
            level: level.to_string(),
            input: r.input_text.clone(),
            output: r.output_summary.clone(),
            tokens_in: r.cost.tokens_in as i64,
            tokens_out: r.cost.tokens_out as i64,
            cost_usd: r.cost.cost_usd,
            model: r.model.clone(),
            timestamp: r.timestamp.clone(),
        }
    }
}

const EVENT_COLUMNS: [&str; 11] = [
    "id",
    "event_type",
    "module",
    "level",
    "input",
    "output",
    "tokens_in",
    "tokens_out",
    "cost_usd",
    "model",
    "timestamp",
];

impl LogStore {
    /// True when the table has every `LogEvent` column, i.e. the store can
    /// double as an audit sink.
    pub fn accepts_events(&self) -> bool {
        let table = self.table();
        EVENT_COLUMNS
            .iter()
            .all(|c| table.field_names().any(|f| f.eq_ignore_ascii_case(c)))
    }

    /// Append one event. Only valid for stores opened on the `audit_logs`
    /// layout.
    pub fn insert_event(&self, event: &LogEvent) -> Result<(), StoreError> {
        self.insert_events(std::slice::from_ref(event))
    }

    pub fn insert_events(&self, events: &[LogEvent]) -> Result<(), StoreError> {
        if !self.accepts_events() {
            return Err(StoreError::Schema(format!(
                "table '{}' does not have the audit event layout",
                self.table().name
            )));
        }
        let table = self.table().name.clone();
        self.with_writer(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT INTO {table} (id, event_type, module, level, input, output, \
                     tokens_in, tokens_out, cost_usd, model, timestamp) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ))?;
                for e in events {
                    stmt.execute(params![
                        e.id,
                        e.event_type,
                        e.module,
                        e.level,
                        e.input,
                        e.output,
                        e.tokens_in,
                        e.tokens_out,
                        e.cost_usd,
                        e.model,
                        e.timestamp,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

impl AuditSink for LogStore {
    fn record(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        let record = AuditRecord::stamp(entry);
        self.insert_event(&LogEvent::from(&record))
            .map_err(|e| AuditError::Store(e.to_string()))?;
        Ok(record)
    }
}
