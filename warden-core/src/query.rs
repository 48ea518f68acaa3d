//! Natural-language log queries: request -> clause -> rows.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use warden_policy::{ClauseValidator, PolicySpec, ValidatedClause};
use warden_schema::TableSchema;
use warden_store::{ClauseStore, QueryResultRow};

use crate::config::GatewayConfig;
use crate::gateway::{Gateway, SessionReport};
use crate::prompts::{clause_context, PromptContext};

pub struct QueryResponse {
    pub report: SessionReport<ValidatedClause>,
    /// Empty unless the clause was accepted.
    pub rows: Vec<QueryResultRow>,
}

pub struct QueryPipeline {
    gateway: Gateway,
    validator: ClauseValidator,
    store: Arc<dyn ClauseStore>,
    context: PromptContext,
}

impl QueryPipeline {
    pub fn new(
        gateway: Gateway,
        table: &TableSchema,
        store: Arc<dyn ClauseStore>,
        cfg: &GatewayConfig,
    ) -> anyhow::Result<Self> {
        let policy = PolicySpec::from_table(table, cfg.max_clause_length)
            .with_context(|| format!("building field policy for table '{}'", table.name))?;
        let context = clause_context(table, &policy, cfg.clause_max_tokens);
        Ok(Self {
            gateway,
            validator: ClauseValidator::new(Arc::new(policy)),
            store,
            context,
        })
    }

    pub fn policy(&self) -> &PolicySpec {
        self.validator.policy()
    }

    pub async fn run(&self, request: &str) -> anyhow::Result<QueryResponse> {
        let report = self
            .gateway
            .generate_and_validate(request, &self.validator, &self.context)
            .await;
        let rows = match report.artifact() {
            Some(clause) => self
                .store
                .execute(clause)
                .context("query execution failed")?,
            None => Vec::new(),
        };
        Ok(QueryResponse { report, rows })
    }
}

/// Terminal rendering of result rows; null columns are skipped.
pub fn format_results(rows: &[QueryResultRow]) -> String {
    if rows.is_empty() {
        return "No matching log entries found.".to_string();
    }

    let mut lines = vec![format!("Found {} matching log entries:\n", rows.len())];
    for (i, row) in rows.iter().enumerate() {
        lines.push(format!("--- Entry {} ---", i + 1));
        for (key, value) in row.iter() {
            match value {
                Value::Null => {}
                Value::String(s) => lines.push(format!("  {key}: {s}")),
                other => lines.push(format!("  {key}: {other}")),
            }
        }
        lines.push(String::new());
    }
    lines.join("\n")
}
