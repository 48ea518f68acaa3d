use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use warden_types::GenerationRequest;

pub mod http_chat;
pub use http_chat::HttpChatGenerator;

/// Text produced by one generator call plus its token usage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl Generation {
    pub fn new(text: impl Into<String>, tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            text: text.into(),
            tokens_in,
            tokens_out,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Black-box model: one unary call per attempt, no session state.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, req: GenerationRequest) -> Result<Generation, GenerationError>;

    /// Model identifier recorded in audit entries.
    fn model(&self) -> &str;
}

/// Deterministic stand-in that replays a fixed script.
///
/// Once the script runs out the last entry repeats. Every request is kept so
/// callers can inspect the prompts that were sent.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<Generation, GenerationError>>>,
    last: Mutex<Option<Result<Generation, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<Generation, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Same text and usage on every call.
    pub fn always(text: impl Into<String>, tokens_in: u64, tokens_out: u64) -> Self {
        Self::new(vec![Ok(Generation::new(text, tokens_in, tokens_out))])
    }

    /// Sleep before answering; used to exercise call timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn next_entry(&self) -> Result<Generation, GenerationError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| GenerationError::new("script lock poisoned"))?;
        let mut last = self
            .last
            .lock()
            .map_err(|_| GenerationError::new("script lock poisoned"))?;
        if let Some(entry) = script.pop_front() {
            *last = Some(entry.clone());
            return entry;
        }
        last.clone()
            .unwrap_or_else(|| Err(GenerationError::new("empty script")))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, req: GenerationRequest) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_entry()
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
