//! Validating gateway between a generative model and the systems that
//! consume its output.
//!
//! The model's text is never used directly: it passes through an
//! [`ArtifactValidator`](warden_types::ArtifactValidator) inside a bounded
//! retry loop, and only the validator's typed artifact reaches storage or
//! disk. Every session leaves exactly one audit record.

pub mod config;
pub mod fences;
pub mod gateway;
pub mod prompts;
pub mod query;
pub mod scaffold;
pub mod telemetry;

pub use config::{ConfigError, GatewayConfig, LlmConfig};
pub use gateway::{AuditStatus, Gateway, SessionOutcome, SessionReport, SessionSettings};
pub use prompts::PromptContext;
pub use query::{format_results, QueryPipeline, QueryResponse};
pub use scaffold::{scaffold_file_name, ScaffoldPipeline};
