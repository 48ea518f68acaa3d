use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use warden_audit::{AuditEntry, AuditError, AuditOutcome, AuditRecord, AuditSink, MemoryAuditSink};
use warden_core::prompts::{clause_context, code_context};
use warden_core::{AuditStatus, Gateway, SessionOutcome, SessionSettings};
use warden_infer::{Generation, GenerationError, ScriptedGenerator};
use warden_policy::{ClauseValidator, PolicySpec};
use warden_schema::audit_logs;
use warden_syntax::{SourceGrammar, SyntaxValidator};
use warden_types::{AttemptOutcome, FailureClass, Rejection, Tariff};

const VALID_PY: &str = "def hello(name: str) -> str:\n    return name\n";
const BROKEN_PY: &str = "def broken(\n    # no closing paren\n";

struct FailingSink;

impl AuditSink for FailingSink {
    fn record(&self, _entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        Err(AuditError::Io("disk full".into()))
    }
}

/// Holds the worker thread the way a busy SQLite writer would.
struct SlowSink {
    finished: Mutex<Option<Instant>>,
}

impl AuditSink for SlowSink {
    fn record(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        std::thread::sleep(Duration::from_millis(200));
        *self.finished.lock().unwrap() = Some(Instant::now());
        Ok(AuditRecord::stamp(entry))
    }
}

fn settings(max_retries: u32) -> SessionSettings {
    SessionSettings {
        max_retries,
        max_request_chars: 4000,
        timeout: Duration::from_secs(5),
        tariff: Tariff::default(),
        temperature: 0.0,
    }
}

fn code_gateway(gen: Arc<ScriptedGenerator>, sink: Arc<dyn AuditSink>, retries: u32) -> Gateway {
    Gateway::new(gen, sink, settings(retries))
}

fn clause_validator() -> ClauseValidator {
    ClauseValidator::new(Arc::new(PolicySpec::from_table(&audit_logs(), 500).unwrap()))
}

#[tokio::test]
async fn invalid_then_valid_code_is_accepted_on_second_call() {
    let gen = Arc::new(ScriptedGenerator::new(vec![
        Ok(Generation::new(BROKEN_PY, 100, 50)),
        Ok(Generation::new(VALID_PY, 100, 50)),
    ]));
    let sink = Arc::new(MemoryAuditSink::new());
    let gateway = code_gateway(gen.clone(), sink.clone(), 2);
    let ctx = code_context(SourceGrammar::Python, None, 4000);

    let report = gateway
        .generate_and_validate("an intake pipeline", &SyntaxValidator::default(), &ctx)
        .await;

    assert!(report.is_accepted());
    assert_eq!(report.retries, 1);
    assert_eq!(gen.calls(), 2);
    assert_eq!(report.artifact().unwrap().as_str(), VALID_PY.trim());
    assert_eq!(report.attempts.len(), 2);
    assert!(matches!(
        report.attempts[0].outcome,
        AttemptOutcome::Rejected(Rejection::Syntax { .. })
    ));
    assert_eq!(report.attempts[1].outcome, AttemptOutcome::Accepted);

    let requests = gen.requests();
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[1].messages.len(), 3);
    assert!(requests[1].messages[2].content.contains("syntax error at line"));
    assert_eq!(report.attempts[1].feedback.as_deref(), Some(requests[1].messages[2].content.as_str()));
    assert_eq!(report.attempts[0].prompt, requests[0].messages);
    assert_eq!(report.attempts[1].prompt, requests[1].messages);
}

#[tokio::test]
async fn persistent_failure_exhausts_budget() {
    let gen = Arc::new(ScriptedGenerator::always(BROKEN_PY, 10, 10));
    let sink = Arc::new(MemoryAuditSink::new());
    let gateway = code_gateway(gen.clone(), sink.clone(), 2);
    let ctx = code_context(SourceGrammar::Python, None, 4000);

    let report = gateway
        .generate_and_validate("anything", &SyntaxValidator::default(), &ctx)
        .await;

    assert_eq!(gen.calls(), 3);
    assert_eq!(report.retries, 2);
    assert_eq!(report.failure_class(), Some(FailureClass::ExhaustionFailure));
    match &report.outcome {
        SessionOutcome::Rejected {
            last_candidate,
            reason,
            message,
        } => {
            assert_eq!(last_candidate, BROKEN_PY.trim());
            assert!(matches!(reason, Rejection::Syntax { .. }));
            assert!(message.starts_with("Code failed validation after 3 attempts: syntax error"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(report.cost.tokens_in, 30);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(sink.records()[0].outcome, AuditOutcome::Rejected);
}

#[tokio::test]
async fn cost_is_summed_per_call() {
    let gen = Arc::new(ScriptedGenerator::new(vec![
        Ok(Generation::new("password = 'x'", 100, 50)),
        Ok(Generation::new("level = 'ERROR'", 100, 50)),
    ]));
    let sink = Arc::new(MemoryAuditSink::new());
    let gateway = Gateway::new(gen.clone(), sink.clone(), settings(2));
    let table = audit_logs();
    let validator = clause_validator();
    let ctx = clause_context(&table, validator.policy(), 200);

    let report = gateway.generate_and_validate("errors", &validator, &ctx).await;

    assert!(report.is_accepted());
    assert_eq!(report.cost.tokens_in, 200);
    assert_eq!(report.cost.tokens_out, 100);
    let tariff = Tariff::default();
    assert_eq!(report.cost.cost_usd, tariff.cost(100, 50) + tariff.cost(100, 50));
    assert_eq!(sink.records()[0].cost, report.cost);
}

#[tokio::test]
async fn blocked_clause_feedback_names_token() {
    let gen = Arc::new(ScriptedGenerator::new(vec![
        Ok(Generation::new("level = 'ERROR'; DROP TABLE audit_logs", 1, 1)),
        Ok(Generation::new("level = 'ERROR'", 1, 1)),
    ]));
    let gateway = Gateway::new(gen.clone(), Arc::new(MemoryAuditSink::new()), settings(2));
    let table = audit_logs();
    let validator = clause_validator();
    let ctx = clause_context(&table, validator.policy(), 200);

    let report = gateway.generate_and_validate("errors", &validator, &ctx).await;
    assert_eq!(report.artifact().unwrap().as_str(), "level = 'ERROR'");
    let retry = &gen.requests()[1];
    assert!(retry.messages[2].content.contains("blocked keyword detected: 'DROP'"));
}

#[tokio::test]
async fn every_session_is_audited_once_with_matching_outcome() {
    let sink = Arc::new(MemoryAuditSink::new());
    let ctx = code_context(SourceGrammar::Python, None, 4000);
    let validator = SyntaxValidator::default();

    let ok = code_gateway(Arc::new(ScriptedGenerator::always(VALID_PY, 1, 1)), sink.clone(), 2);
    ok.generate_and_validate("a", &validator, &ctx).await;
    let bad = code_gateway(Arc::new(ScriptedGenerator::always(BROKEN_PY, 1, 1)), sink.clone(), 0);
    bad.generate_and_validate("b", &validator, &ctx).await;
    ok.generate_and_validate("  ", &validator, &ctx).await;

    let outcomes: Vec<_> = sink.records().iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![AuditOutcome::Accepted, AuditOutcome::Rejected, AuditOutcome::InputError]
    );
    assert_eq!(sink.records()[0].input_text, "a");
    assert_eq!(sink.records()[0].model, "scripted");
}

#[tokio::test]
async fn empty_request_never_reaches_generator() {
    let gen = Arc::new(ScriptedGenerator::always("level = 'INFO'", 1, 1));
    let sink = Arc::new(MemoryAuditSink::new());
    let gateway = Gateway::new(gen.clone(), sink.clone(), settings(2));
    let table = audit_logs();
    let validator = clause_validator();
    let ctx = clause_context(&table, validator.policy(), 200);

    for request in ["", "   \n\t"] {
        let report = gateway.generate_and_validate(request, &validator, &ctx).await;
        assert_eq!(
            report.outcome,
            SessionOutcome::InputError("Empty query provided".into())
        );
        assert_eq!(report.retries, 0);
        assert_eq!(report.cost.cost_usd, 0.0);
        assert!(report.attempts.is_empty());
    }
    assert_eq!(gen.calls(), 0);
    assert_eq!(sink.records().len(), 2);
}

#[tokio::test]
async fn oversized_request_never_reaches_generator() {
    let gen = Arc::new(ScriptedGenerator::always("level = 'INFO'", 1, 1));
    let sink = Arc::new(MemoryAuditSink::new());
    let gateway = Gateway::new(gen.clone(), sink.clone(), settings(2));
    let table = audit_logs();
    let validator = clause_validator();
    let ctx = clause_context(&table, validator.policy(), 200);

    let at_limit = "é".repeat(4000);
    assert!(gateway
        .generate_and_validate(&at_limit, &validator, &ctx)
        .await
        .is_accepted());
    assert_eq!(gen.calls(), 1);

    let huge = "show errors ".repeat(200_000);
    let report = gateway.generate_and_validate(&huge, &validator, &ctx).await;
    assert_eq!(gen.calls(), 1);
    assert_eq!(report.failure_class(), Some(FailureClass::InputError));
    assert_eq!(
        report.error_message(),
        Some("Query exceeds maximum length (2400000 > 4000 characters)")
    );
    assert!(report.attempts.is_empty());
    assert_eq!(report.cost.tokens_in, 0);
    assert_eq!(sink.records().len(), 2);
    assert_eq!(sink.records()[1].outcome, AuditOutcome::InputError);
}

#[tokio::test]
async fn failed_final_call_keeps_earlier_candidate() {
    let gen = Arc::new(ScriptedGenerator::new(vec![
        Ok(Generation::new(BROKEN_PY, 5, 5)),
        Err(GenerationError::new("HTTP status: 503")),
    ]));
    let gateway = code_gateway(gen.clone(), Arc::new(MemoryAuditSink::new()), 1);
    let ctx = code_context(SourceGrammar::Python, None, 4000);

    let report = gateway
        .generate_and_validate("tiny", &SyntaxValidator::default(), &ctx)
        .await;
    match &report.outcome {
        SessionOutcome::Rejected {
            last_candidate,
            reason,
            ..
        } => {
            assert_eq!(last_candidate, BROKEN_PY.trim());
            assert!(matches!(reason, Rejection::Generation(_)));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_consumes_a_retry_slot() {
    let gen = Arc::new(
        ScriptedGenerator::always("level = 'INFO'", 1, 1).with_delay(Duration::from_millis(500)),
    );
    let gateway = Gateway::new(
        gen.clone(),
        Arc::new(MemoryAuditSink::new()),
        SessionSettings {
            timeout: Duration::from_millis(10),
            ..settings(1)
        },
    );
    let table = audit_logs();
    let validator = clause_validator();
    let ctx = clause_context(&table, validator.policy(), 200);

    let report = gateway.generate_and_validate("info", &validator, &ctx).await;
    assert_eq!(gen.calls(), 2);
    assert_eq!(report.retries, 1);
    assert!(matches!(
        report.outcome,
        SessionOutcome::Rejected {
            reason: Rejection::Timeout { millis: 10 },
            ..
        }
    ));
    assert_eq!(report.cost.tokens_in, 0);
}

#[tokio::test]
async fn generator_error_is_retried() {
    let gen = Arc::new(ScriptedGenerator::new(vec![
        Err(GenerationError::new("HTTP status: 503")),
        Ok(Generation::new("```python\nx = 1\n```", 5, 5)),
    ]));
    let gateway = code_gateway(gen.clone(), Arc::new(MemoryAuditSink::new()), 2);
    let ctx = code_context(SourceGrammar::Python, None, 4000);

    let report = gateway
        .generate_and_validate("tiny", &SyntaxValidator::default(), &ctx)
        .await;
    assert_eq!(report.artifact().unwrap().as_str(), "x = 1");
    assert_eq!(report.retries, 1);
    assert!(matches!(
        report.attempts[0].outcome,
        AttemptOutcome::Rejected(Rejection::Generation(_))
    ));
}

#[tokio::test]
async fn audit_failure_does_not_reverse_acceptance() {
    let gen = Arc::new(ScriptedGenerator::always(VALID_PY, 1, 1));
    let gateway = code_gateway(gen, Arc::new(FailingSink), 2);
    let ctx = code_context(SourceGrammar::Python, None, 4000);

    let report = gateway
        .generate_and_validate("a", &SyntaxValidator::default(), &ctx)
        .await;
    assert!(report.is_accepted());
    assert_eq!(report.audit, AuditStatus::Failed("io error: disk full".into()));
}

#[tokio::test]
async fn slow_audit_sink_does_not_stall_the_runtime() {
    let sink = Arc::new(SlowSink {
        finished: Mutex::new(None),
    });
    let gateway = code_gateway(
        Arc::new(ScriptedGenerator::always(VALID_PY, 1, 1)),
        sink.clone(),
        0,
    );
    let ctx = code_context(SourceGrammar::Python, None, 4000);
    let validator = SyntaxValidator::default();

    let (report, ticked) = tokio::join!(
        gateway.generate_and_validate("a", &validator, &ctx),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Instant::now()
        }
    );
    assert!(matches!(report.audit, AuditStatus::Recorded(_)));
    let finished = sink.finished.lock().unwrap().unwrap();
    assert!(ticked < finished);
}
