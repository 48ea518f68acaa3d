//! Generate, validate, retry, record.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use warden_audit::{AuditEntry, AuditOutcome, AuditSink};
use warden_infer::Generator;
use warden_types::{
    ArtifactKind, ArtifactValidator, AttemptOutcome, CostRecord, FailureClass, GenerationAttempt,
    Rejection, Tariff,
};

use crate::config::GatewayConfig;
use crate::fences::strip_code_fences;
use crate::prompts::PromptContext;

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub max_retries: u32,
    pub max_request_chars: usize,
    pub timeout: Duration,
    pub tariff: Tariff,
    pub temperature: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for SessionSettings {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            max_request_chars: cfg.max_request_chars,
            timeout: cfg.timeout(),
            tariff: cfg.tariff,
            temperature: cfg.llm.temperature,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome<A> {
    Accepted(A),
    Rejected {
        /// Cleaned text of the last attempt that produced output; empty when
        /// no call returned text.
        last_candidate: String,
        reason: Rejection,
        message: String,
    },
    InputError(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditStatus {
    Recorded(String),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct SessionReport<A> {
    pub outcome: SessionOutcome<A>,
    pub cost: CostRecord,
    pub retries: u32,
    pub attempts: Vec<GenerationAttempt>,
    pub audit: AuditStatus,
}

impl<A> SessionReport<A> {
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, SessionOutcome::Accepted(_))
    }

    pub fn artifact(&self) -> Option<&A> {
        match &self.outcome {
            SessionOutcome::Accepted(a) => Some(a),
            _ => None,
        }
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match &self.outcome {
            SessionOutcome::Accepted(_) => None,
            SessionOutcome::Rejected { .. } => Some(FailureClass::ExhaustionFailure),
            SessionOutcome::InputError(_) => Some(FailureClass::InputError),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            SessionOutcome::Accepted(_) => None,
            SessionOutcome::Rejected { message, .. } => Some(message),
            SessionOutcome::InputError(msg) => Some(msg),
        }
    }
}

/// Drives one session per call. Holds no per-session state, so a single
/// gateway can serve concurrent requests.
pub struct Gateway {
    generator: Arc<dyn Generator>,
    audit: Arc<dyn AuditSink>,
    settings: SessionSettings,
}

impl Gateway {
    pub fn new(
        generator: Arc<dyn Generator>,
        audit: Arc<dyn AuditSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            generator,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub async fn generate_and_validate<V>(
        &self,
        request: &str,
        validator: &V,
        context: &PromptContext,
    ) -> SessionReport<V::Artifact>
    where
        V: ArtifactValidator,
    {
        let kind = validator.kind();
        let mut cost = CostRecord::default();

        if let Some(message) = self.input_error(kind, request) {
            info!(event = "session.input_error", kind = %kind, error = %message);
            let summary = json!({ "valid": false, "error": message });
            let audit = self
                .audit(kind, request, summary, AuditOutcome::InputError, &cost)
                .await;
            return SessionReport {
                outcome: SessionOutcome::InputError(message),
                cost,
                retries: 0,
                attempts: Vec::new(),
                audit,
            };
        }

        info!(
            event = "session.start",
            kind = %kind,
            max_retries = self.settings.max_retries
        );

        let mut attempts = Vec::new();
        let mut feedback: Option<String> = None;
        let mut last_candidate = String::new();
        let mut last_reason = Rejection::Generation("no attempt made".to_string());

        for attempt in 0..=self.settings.max_retries {
            let req = context.request(request, feedback.as_deref(), self.settings.temperature);
            let prompt = req.messages.clone();
            let call = tokio::time::timeout(self.settings.timeout, self.generator.generate(req)).await;

            let (raw_output, tokens_in, tokens_out, verdict) = match call {
                Err(_) => (
                    String::new(),
                    0,
                    0,
                    Err(Rejection::Timeout {
                        millis: self.settings.timeout.as_millis() as u64,
                    }),
                ),
                Ok(Err(e)) => (String::new(), 0, 0, Err(Rejection::Generation(e.message))),
                Ok(Ok(gen)) => {
                    cost.add_call(&self.settings.tariff, gen.tokens_in, gen.tokens_out);
                    let candidate = strip_code_fences(gen.text.trim());
                    let verdict = validator.validate(&candidate);
                    last_candidate = candidate;
                    (gen.text, gen.tokens_in, gen.tokens_out, verdict)
                }
            };

            match verdict {
                Ok(artifact) => {
                    attempts.push(GenerationAttempt {
                        kind,
                        attempt_index: attempt,
                        prompt,
                        feedback: feedback.take(),
                        raw_output,
                        tokens_in,
                        tokens_out,
                        outcome: AttemptOutcome::Accepted,
                    });
                    info!(
                        event = "session.accepted",
                        kind = %kind,
                        retries = attempt,
                        tokens_in = cost.tokens_in,
                        tokens_out = cost.tokens_out,
                        cost_usd = cost.cost_usd
                    );
                    let summary = accepted_summary(kind, artifact.as_ref(), attempt);
                    let audit = self
                        .audit(kind, request, summary, AuditOutcome::Accepted, &cost)
                        .await;
                    return SessionReport {
                        outcome: SessionOutcome::Accepted(artifact),
                        cost,
                        retries: attempt,
                        attempts,
                        audit,
                    };
                }
                Err(reason) => {
                    warn!(
                        event = "attempt.rejected",
                        kind = %kind,
                        attempt,
                        class = ?reason.class(),
                        reason = %reason
                    );
                    attempts.push(GenerationAttempt {
                        kind,
                        attempt_index: attempt,
                        prompt,
                        feedback: feedback.take(),
                        raw_output,
                        tokens_in,
                        tokens_out,
                        outcome: AttemptOutcome::Rejected(reason.clone()),
                    });
                    feedback = Some(context.feedback(&reason));
                    last_reason = reason;
                }
            }
        }

        let total = self.settings.max_retries + 1;
        let message = format!(
            "{} failed validation after {total} attempts: {last_reason}",
            kind_label(kind)
        );
        warn!(
            event = "session.exhausted",
            kind = %kind,
            attempts = total,
            cost_usd = cost.cost_usd
        );
        let summary = rejected_summary(kind, &last_candidate, &message);
        let audit = self
            .audit(kind, request, summary, AuditOutcome::Rejected, &cost)
            .await;
        SessionReport {
            outcome: SessionOutcome::Rejected {
                last_candidate,
                reason: last_reason,
                message,
            },
            cost,
            retries: self.settings.max_retries,
            attempts,
            audit,
        }
    }

    /// Requests that fail before any generator call.
    fn input_error(&self, kind: ArtifactKind, request: &str) -> Option<String> {
        if request.trim().is_empty() {
            return Some(empty_request_message(kind).to_string());
        }
        let chars = request.chars().count();
        if chars > self.settings.max_request_chars {
            return Some(format!(
                "{} exceeds maximum length ({chars} > {} characters)",
                request_label(kind),
                self.settings.max_request_chars
            ));
        }
        None
    }

    /// Sinks do blocking IO (SQLite transaction, file append), so the write
    /// runs on the blocking pool.
    async fn audit(
        &self,
        kind: ArtifactKind,
        request: &str,
        summary: serde_json::Value,
        outcome: AuditOutcome,
        cost: &CostRecord,
    ) -> AuditStatus {
        let entry = AuditEntry {
            kind,
            input_text: request.to_string(),
            output_summary: summary.to_string(),
            outcome,
            cost: cost.clone(),
            model: self.generator.model().to_string(),
        };
        let sink = Arc::clone(&self.audit);
        let error = match tokio::task::spawn_blocking(move || sink.record(entry)).await {
            Ok(Ok(record)) => return AuditStatus::Recorded(record.id),
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("audit task failed: {e}"),
        };
        warn!(event = "audit.failed", kind = %kind, error = %error);
        AuditStatus::Failed(error)
    }
}

fn kind_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Clause => "Clause",
        ArtifactKind::Code => "Code",
    }
}

fn request_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Clause => "Query",
        ArtifactKind::Code => "Description",
    }
}

fn empty_request_message(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Clause => "Empty query provided",
        ArtifactKind::Code => "Empty description provided",
    }
}

fn accepted_summary(kind: ArtifactKind, artifact: &str, retries: u32) -> serde_json::Value {
    match kind {
        ArtifactKind::Clause => json!({ "sql": artifact, "valid": true }),
        ArtifactKind::Code => json!({
            "valid": true,
            "retries": retries,
            "lines": artifact.lines().count(),
        }),
    }
}

fn rejected_summary(kind: ArtifactKind, candidate: &str, message: &str) -> serde_json::Value {
    match kind {
        ArtifactKind::Clause => json!({ "sql": candidate, "valid": false, "error": message }),
        ArtifactKind::Code => json!({
            "valid": false,
            "lines": candidate.lines().count(),
            "error": message,
        }),
    }
}
