//! Integration tests for the Escalation Orchestrator
//!
//! Drives the full generate → validate → repair → escalate flow with
//! scripted generators and validators, plus the synthetic sandbox for
//! self-correction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use scan_coordination::command::Command;
use scan_coordination::error::{CollaboratorError, CollaboratorResult, PipelineError};
use scan_coordination::escalation::{
    EscalationOrchestrator, EscalationTier, GenerationRequest, Generator, SimulatingValidator,
    Validator, ValidatorVerdict,
};
use scan_coordination::events::{EventBus, MemoryEventSink};
use scan_coordination::execution::{ExecutionSimulator, SyntheticRunner};
use scan_coordination::feedback::SelfCorrectionAgent;
use scan_coordination::history::{InMemorySessionHistory, SessionRepository};
use scan_coordination::validator::StructuralValidator;

const QUERY: &str = "scan scanme.nmap.org for open web ports";

/// Returns a fixed answer per tier and records every request.
struct ScriptedGenerator {
    answers: HashMap<EscalationTier, Result<String, CollaboratorError>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn new(answers: &[(EscalationTier, Result<&str, &str>)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|&(tier, answer)| {
                    let answer = answer
                        .map(str::to_string)
                        .map_err(|e| CollaboratorError::unavailable("scripted", e));
                    (tier, answer)
                })
                .collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> CollaboratorResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.answers
            .get(&request.tier)
            .cloned()
            .unwrap_or_else(|| Err(CollaboratorError::unavailable("scripted", "no answer")))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Verdict per exact command text; anything else is Invalid.
struct ScriptedValidator {
    verdicts: HashMap<String, ValidatorVerdict>,
}

impl ScriptedValidator {
    fn new(verdicts: &[(&str, ValidatorVerdict)]) -> Self {
        Self {
            verdicts: verdicts
                .iter()
                .map(|(cmd, v)| (cmd.to_string(), v.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(&self, command: &Command) -> CollaboratorResult<ValidatorVerdict> {
        Ok(self
            .verdicts
            .get(&command.raw)
            .cloned()
            .unwrap_or_else(|| ValidatorVerdict::invalid(vec!["not scripted".to_string()])))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct HangingValidator;

#[async_trait]
impl Validator for HangingValidator {
    async fn validate(&self, _command: &Command) -> CollaboratorResult<ValidatorVerdict> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ValidatorVerdict::valid(1.0))
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

fn simulator() -> ExecutionSimulator {
    ExecutionSimulator::new(Arc::new(SyntheticRunner::new()))
}

fn agent(history: Arc<InMemorySessionHistory>) -> Arc<SelfCorrectionAgent> {
    Arc::new(SelfCorrectionAgent::new(simulator(), history))
}

fn orchestrator(
    generator: Arc<ScriptedGenerator>,
    validator: Arc<dyn Validator>,
) -> (EscalationOrchestrator, Arc<MemoryEventSink>, Arc<InMemorySessionHistory>) {
    let sink = Arc::new(MemoryEventSink::new());
    let history = Arc::new(InMemorySessionHistory::new());
    let orchestrator = EscalationOrchestrator::new(generator, validator, agent(history.clone()))
        .with_events(EventBus::new().with_sink(sink.clone()).shared());
    (orchestrator, sink, history)
}

/// Test: Invalid at tier1 and tier2, Valid at tier3 returns tier3's command
#[tokio::test]
async fn test_escalates_to_first_valid_tier() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        (EscalationTier::Tier1, Ok("nmap -sn scanme.nmap.org")),
        (EscalationTier::Tier2, Ok("nmap -p 80 scanme.nmap.org")),
        (EscalationTier::Tier3, Ok("nmap -p 80,443 scanme.nmap.org")),
    ]));
    let validator = Arc::new(ScriptedValidator::new(&[(
        "nmap -p 80,443 scanme.nmap.org",
        ValidatorVerdict::valid(0.92),
    )]));
    let (orchestrator, sink, _) = orchestrator(generator.clone(), validator);

    let decision = orchestrator
        .run(QUERY, Some(EscalationTier::Tier1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(decision.command, "nmap -p 80,443 scanme.nmap.org");
    assert_eq!(decision.tier, EscalationTier::Tier3);
    assert_eq!(decision.attempts_used, 1);
    assert!((decision.confidence - 0.92).abs() < f64::EPSILON);
    assert_eq!(decision.escalations.len(), 2);
    assert_eq!(generator.requests().len(), 3);

    let stages = sink.stages();
    assert_eq!(stages.first(), Some(&"comprehension"));
    assert_eq!(stages.last(), Some(&"pipeline_success"));
    assert_eq!(stages.iter().filter(|s| **s == "validation_failure").count(), 2);
}

/// Test: A generator failure advances the tier without retrying
#[tokio::test]
async fn test_generator_failure_advances_tier() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        (EscalationTier::Tier1, Err("connection refused")),
        (EscalationTier::Tier2, Ok("nmap -p 22 scanme.nmap.org")),
    ]));
    let validator = Arc::new(ScriptedValidator::new(&[(
        "nmap -p 22 scanme.nmap.org",
        ValidatorVerdict::valid(0.8),
    )]));
    let (orchestrator, sink, _) = orchestrator(generator.clone(), validator);

    let decision = orchestrator
        .run(QUERY, Some(EscalationTier::Tier1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(decision.tier, EscalationTier::Tier2);
    assert_eq!(generator.requests().len(), 2);
    assert!(sink.stages().contains(&"generation_failure"));
}

/// Test: A generator failure at the last tier is terminal
#[tokio::test]
async fn test_generator_failure_at_last_tier() {
    let generator = Arc::new(ScriptedGenerator::new(&[(
        EscalationTier::Tier3,
        Err("model offline"),
    )]));
    let validator = Arc::new(ScriptedValidator::new(&[]));
    let (orchestrator, sink, _) = orchestrator(generator, validator);

    let err = orchestrator
        .run(QUERY, Some(EscalationTier::Tier3), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::GenerationUnavailable {
            tier,
            escalations,
            feedback,
            ..
        } => {
            assert_eq!(tier, EscalationTier::Tier3);
            assert_eq!(escalations.len(), 1);
            assert_eq!(escalations[0].to_tier, None);
            assert!(feedback.is_empty());
        }
        other => panic!("expected GenerationUnavailable, got {other:?}"),
    }
    assert_eq!(sink.stages().last(), Some(&"pipeline_failure"));
}

/// Test: Feedback from a failed correction survives a later generator outage
#[tokio::test]
async fn test_generator_outage_after_failed_correction_keeps_feedback() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        (EscalationTier::Tier2, Ok("nmap -sT 203.0.113.5")),
        (EscalationTier::Tier3, Err("model offline")),
    ]));
    let validator = Arc::new(ScriptedValidator::new(&[(
        "nmap -sT 203.0.113.5",
        ValidatorVerdict::repairable(vec!["Network is unreachable".to_string()]),
    )]));
    let (orchestrator, _, history) = orchestrator(generator.clone(), validator);

    let err = orchestrator
        .run(QUERY, Some(EscalationTier::Tier2), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(history.len(), 1);
    let handed_to_tier3 = generator.requests()[1].feedback.clone();
    assert!(!handed_to_tier3.is_empty());

    assert_eq!(err.code(), "generation_unavailable");
    assert_eq!(err.feedback(), handed_to_tier3.as_slice());
    let escalations = err.escalations();
    assert_eq!(escalations.len(), 2);
    assert_eq!(escalations[0].from_tier, EscalationTier::Tier2);
    assert_eq!(escalations[0].to_tier, Some(EscalationTier::Tier3));
    assert_eq!(escalations[1].to_tier, None);
}

/// Test: Unparsable generator output counts as a generator failure
#[tokio::test]
async fn test_unparsable_candidate_advances_tier() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        (EscalationTier::Tier2, Ok("nmap 'unterminated")),
        (EscalationTier::Tier3, Ok("nmap -p 443 scanme.nmap.org")),
    ]));
    let validator = Arc::new(ScriptedValidator::new(&[(
        "nmap -p 443 scanme.nmap.org",
        ValidatorVerdict::valid(0.7),
    )]));
    let (orchestrator, _, _) = orchestrator(generator, validator);

    let decision = orchestrator
        .run(QUERY, Some(EscalationTier::Tier2), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(decision.tier, EscalationTier::Tier3);
}

/// Test: Every tier invalid exhausts the chain
#[tokio::test]
async fn test_all_tiers_invalid_is_exhausted() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        (EscalationTier::Tier1, Ok("nmap -sn scanme.nmap.org")),
        (EscalationTier::Tier2, Ok("nmap -sn scanme.nmap.org")),
        (EscalationTier::Tier3, Ok("nmap -sn scanme.nmap.org")),
    ]));
    let validator = Arc::new(ScriptedValidator::new(&[]));
    let (orchestrator, _, _) = orchestrator(generator, validator);

    let err = orchestrator
        .run(QUERY, Some(EscalationTier::Tier1), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::Exhausted { escalations, .. } => {
            assert_eq!(escalations.len(), 3);
            assert_eq!(escalations.last().unwrap().to_tier, None);
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

/// Test: A repairable candidate is fixed by self-correction and re-validated
#[tokio::test]
async fn test_repairable_candidate_is_corrected() {
    let generator = Arc::new(ScriptedGenerator::new(&[(
        EscalationTier::Tier1,
        Ok("nmap -sS -p 80 scanme.nmap.org"),
    )]));
    let validator = Arc::new(SimulatingValidator::new(StructuralValidator::new(), simulator()));
    let (orchestrator, sink, history) = orchestrator(generator, validator);

    let decision = orchestrator
        .run(QUERY, Some(EscalationTier::Tier1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(decision.command, "nmap -sT -p 80 scanme.nmap.org");
    assert_eq!(decision.tier, EscalationTier::Tier1);
    assert_eq!(decision.attempts_used, 2);
    assert_eq!(decision.correction_sessions.len(), 1);
    assert!(decision.escalations.is_empty());
    assert_eq!(history.len(), 1);
    assert!(history.snapshot()[0].is_autonomous);
    assert!(sink.stages().contains(&"self_correction_success"));
}

/// Test: Failed self-correction escalates and hands its feedback upward
#[tokio::test]
async fn test_failed_correction_feedback_reaches_next_tier() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        (EscalationTier::Tier1, Ok("nmap -sT 203.0.113.5")),
        (EscalationTier::Tier2, Ok("nmap -sT scanme.nmap.org")),
    ]));
    let validator = Arc::new(ScriptedValidator::new(&[
        (
            "nmap -sT 203.0.113.5",
            ValidatorVerdict::repairable(vec!["Network is unreachable".to_string()]),
        ),
        ("nmap -sT scanme.nmap.org", ValidatorVerdict::valid(0.9)),
    ]));
    let (orchestrator, sink, history) = orchestrator(generator.clone(), validator);

    let decision = orchestrator
        .run(QUERY, Some(EscalationTier::Tier1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(decision.tier, EscalationTier::Tier2);
    assert!(sink.stages().contains(&"self_correction_failure"));
    assert!(!history.snapshot()[0].succeeded);

    let requests = generator.requests();
    assert!(requests[0].feedback.is_empty());
    assert!(!requests[1].feedback.is_empty());
    assert_eq!(
        requests[1].previous_command.as_deref(),
        Some("nmap -sT 203.0.113.5")
    );
}

/// Test: Validator timeouts count as Invalid
#[tokio::test(start_paused = true)]
async fn test_validator_timeout_is_invalid() {
    let generator = Arc::new(ScriptedGenerator::new(&[(
        EscalationTier::Tier3,
        Ok("nmap -p 80 scanme.nmap.org"),
    )]));
    let (orchestrator, sink, _) = orchestrator(generator, Arc::new(HangingValidator));

    let err = orchestrator
        .run(QUERY, Some(EscalationTier::Tier3), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Exhausted { .. }));
    let attempts: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.stage() == "validation_attempt")
        .collect();
    assert_eq!(attempts.len(), 1);
}

/// Test: Off-topic queries never reach a generator
#[tokio::test]
async fn test_off_topic_query_rejected() {
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let (orchestrator, sink, _) = orchestrator(generator.clone(), Arc::new(ScriptedValidator::new(&[])));

    let err = orchestrator
        .run("what's the weather in Lyon", None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::OffTopic { .. }));
    assert!(generator.requests().is_empty());
    assert_eq!(sink.stages(), vec!["comprehension", "pipeline_failure"]);
}

/// Test: Cancellation stops the run before any generator call completes
#[tokio::test]
async fn test_cancellation() {
    let generator = Arc::new(ScriptedGenerator::new(&[(
        EscalationTier::Tier1,
        Ok("nmap -p 80 scanme.nmap.org"),
    )]));
    let (orchestrator, _, _) = orchestrator(generator, Arc::new(ScriptedValidator::new(&[])));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator.run(QUERY, None, &cancel).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled(_)));
    assert_eq!(err.code(), "cancelled");
}

/// Test: Repairable verdicts repeated past the budget escalate
#[tokio::test]
async fn test_attempt_budget_per_tier() {
    let generator = Arc::new(ScriptedGenerator::new(&[(
        EscalationTier::Tier3,
        Ok("nmap -p 80 scanme.nmap.org"),
    )]));
    // The command already runs cleanly, so self-correction "succeeds" without
    // changing it and the validator keeps answering Repairable.
    let validator = Arc::new(ScriptedValidator::new(&[(
        "nmap -p 80 scanme.nmap.org",
        ValidatorVerdict::repairable(vec!["style".to_string()]),
    )]));
    let (orchestrator, sink, history) = orchestrator(generator, validator);

    let err = orchestrator
        .run(QUERY, Some(EscalationTier::Tier3), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Exhausted { .. }));
    let validations = sink
        .stages()
        .into_iter()
        .filter(|s| *s == "validation_attempt")
        .count();
    assert_eq!(validations, 4);
    assert_eq!(history.len(), 4);
    assert!(history
        .snapshot()
        .iter()
        .all(|s| s.succeeded && s.final_command == "nmap -p 80 scanme.nmap.org"));
}
