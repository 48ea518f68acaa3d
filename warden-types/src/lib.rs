use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of artifact the model is asked to produce.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Boolean filter expression (WHERE-clause body).
    Clause,
    /// Complete source module.
    Code,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Clause => "clause",
            ArtifactKind::Code => "code",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a candidate artifact (or a generation call) was refused.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    #[error("empty clause")]
    EmptyClause,
    #[error("clause exceeds maximum length ({length} > {max}, {excess} over)")]
    LengthExceeded {
        length: usize,
        max: usize,
        excess: usize,
    },
    #[error("blocked keyword detected: '{token}'")]
    BlockedToken { token: String },
    #[error("unknown field referenced: '{token}'. Allowed fields: {allowed:?}")]
    UnknownField { token: String, allowed: Vec<String> },
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedLiteral { offset: usize },
    #[error("empty code")]
    EmptyCode,
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("generation timed out after {millis} ms")]
    Timeout { millis: u64 },
}

impl Rejection {
    pub fn class(&self) -> FailureClass {
        match self {
            Rejection::EmptyClause
            | Rejection::LengthExceeded { .. }
            | Rejection::BlockedToken { .. }
            | Rejection::UnknownField { .. }
            | Rejection::UnterminatedLiteral { .. } => FailureClass::PolicyViolation,
            Rejection::EmptyCode | Rejection::Syntax { .. } => FailureClass::StructuralError,
            Rejection::Generation(_) | Rejection::Timeout { .. } => FailureClass::GenerationFailure,
        }
    }
}

/// Error taxonomy for a session.
///
/// The retry loop absorbs `PolicyViolation`, `StructuralError` and
/// `GenerationFailure`; `InputError` and `ExhaustionFailure` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    InputError,
    PolicyViolation,
    StructuralError,
    GenerationFailure,
    ExhaustionFailure,
}

/// A validator sitting on the trust boundary for one artifact kind.
///
/// The returned artifact type is the only proof that validation passed;
/// downstream consumers take it by type instead of a raw string.
pub trait ArtifactValidator: Send + Sync {
    type Artifact: AsRef<str> + Send;

    fn kind(&self) -> ArtifactKind;

    fn validate(&self, candidate: &str) -> Result<Self::Artifact, Rejection>;
}

/// Fixed linear per-token tariff, expressed in USD per million tokens.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Tariff {
    pub fn cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        (tokens_in as f64 * self.input_per_million / 1_000_000.0)
            + (tokens_out as f64 * self.output_per_million / 1_000_000.0)
    }
}

impl Default for Tariff {
    /// gpt-4o-mini list pricing.
    fn default() -> Self {
        Self {
            input_per_million: 0.15,
            output_per_million: 0.60,
        }
    }
}

/// Running token and cost totals for one session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

impl CostRecord {
    /// Add one generator call. The dollar amount is the sum of per-call
    /// charges, never recomputed from the token totals.
    pub fn add_call(&mut self, tariff: &Tariff, tokens_in: u64, tokens_out: u64) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.cost_usd += tariff.cost(tokens_in, tokens_out);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Single request handed to the generator.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub kind: ArtifactKind,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Accepted,
    Rejected(Rejection),
}

/// One call to the generator and what the validator made of it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub kind: ArtifactKind,
    pub attempt_index: u32,
    /// Messages sent for this attempt, system prompt first.
    pub prompt: Vec<ChatMessage>,
    /// Corrective feedback folded into `prompt`, if any.
    pub feedback: Option<String>,
    pub raw_output: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub outcome: AttemptOutcome,
}
