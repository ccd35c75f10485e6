//! Escalation orchestrator: the tier loop over generate, validate, repair
//!
//! ```text
//! query ─▶ comprehension ─▶ starting tier
//!                               │
//!            ┌──────────────────▼──────────────────┐
//!            │ generate (timeout) ── fail ─▶ next tier / GenerationUnavailable
//!            │     │
//!            │     ▼  up to max_corrections + 1 times
//!            │ validate (timeout, failure = Invalid)
//!            │     ├─ Valid ──────▶ FinalDecision
//!            │     ├─ Repairable ─▶ self-correction ─ ok ─▶ validate again
//!            │     │                        └─ fail ─▶ next tier
//!            │     └─ Invalid ────▶ next tier
//!            └──────────────────────────────────────┘
//!                  all tiers used ─▶ PipelineError::Exhausted
//! ```
//!
//! The loop is bounded by the tier count and the attempt budget. All
//! decisions are deterministic given the collaborators' answers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::{classify_initial_tier, is_scan_related};
use super::state::{
    EscalationReason, EscalationState, EscalationTier, FinalDecision, ValidationStatus,
    ValidatorVerdict,
};
use crate::command::Command;
use crate::error::{CollaboratorError, CollaboratorResult, PipelineError, PipelineResult};
use crate::events::{EventBus, PipelineEvent, SharedEventBus};
use crate::feedback::correction_loop::SelfCorrectionAgent;
use crate::feedback::session::FeedbackRecord;

/// What a generator is asked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub tier: EscalationTier,
    pub query: String,
    /// Advice from earlier failed correction sessions, newest last
    pub feedback: Vec<FeedbackRecord>,
    /// Last candidate a lower tier produced, if any
    pub previous_command: Option<String>,
}

/// Produces a candidate command line for a tier.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> CollaboratorResult<String>;

    fn name(&self) -> &str;
}

/// Judges a candidate command line.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, command: &Command) -> CollaboratorResult<ValidatorVerdict>;

    fn name(&self) -> &str;
}

/// Configuration for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Repairs per tier; each tier gets this many plus one validations
    pub max_corrections: u32,
    pub generator_timeout_secs: u64,
    pub validator_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_corrections: 3,
            generator_timeout_secs: 45,
            validator_timeout_secs: 30,
        }
    }
}

/// How a tier ended without a decision.
enum TierOutcome {
    Decided(FinalDecision),
    Escalate(EscalationReason),
}

/// Runs one request per call to [`run`](Self::run)
pub struct EscalationOrchestrator {
    generator: Arc<dyn Generator>,
    validator: Arc<dyn Validator>,
    agent: Arc<SelfCorrectionAgent>,
    events: SharedEventBus,
    config: OrchestratorConfig,
}

impl EscalationOrchestrator {
    pub fn new(
        generator: Arc<dyn Generator>,
        validator: Arc<dyn Validator>,
        agent: Arc<SelfCorrectionAgent>,
    ) -> Self {
        Self {
            generator,
            validator,
            agent,
            events: EventBus::new().shared(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Turn a natural-language request into an accepted command.
    ///
    /// `start` overrides the keyword classifier's starting tier.
    pub async fn run(
        &self,
        query: &str,
        start: Option<EscalationTier>,
        cancel: &CancellationToken,
    ) -> PipelineResult<FinalDecision> {
        let comprehension = is_scan_related(query);
        self.events.publish(PipelineEvent::Comprehension {
            query: query.to_string(),
            is_scan_related: comprehension.is_scan_related,
            reason: comprehension.reason.clone(),
            timestamp: Utc::now(),
        });
        if !comprehension.is_scan_related {
            return Err(self.fail(
                query,
                PipelineError::OffTopic {
                    query: query.to_string(),
                },
            ));
        }

        let (tier, confidence) = match start {
            Some(tier) => (tier, 1.0),
            None => {
                let rec = classify_initial_tier(query);
                (rec.tier, rec.confidence)
            }
        };
        self.events.publish(PipelineEvent::ComplexityClassification {
            tier,
            confidence,
            timestamp: Utc::now(),
        });
        info!(query, tier = %tier, confidence, "Pipeline started");

        match self.escalate_from(query, tier, cancel).await {
            Ok(decision) => {
                self.events.publish(PipelineEvent::PipelineSuccess {
                    command: decision.command.clone(),
                    confidence: decision.confidence,
                    tier: decision.tier,
                    attempts: decision.attempts_used,
                    timestamp: Utc::now(),
                });
                info!(
                    command = %decision.command,
                    tier = %decision.tier,
                    confidence = decision.confidence,
                    escalations = decision.escalations.len(),
                    "Pipeline succeeded"
                );
                Ok(decision)
            }
            Err(e) => Err(self.fail(query, e)),
        }
    }

    fn fail(&self, query: &str, error: PipelineError) -> PipelineError {
        warn!(query, code = error.code(), error = %error, "Pipeline failed");
        self.events.publish(PipelineEvent::PipelineFailure {
            query: query.to_string(),
            code: error.code().to_string(),
            reason: error.to_string(),
            timestamp: Utc::now(),
        });
        error
    }

    async fn escalate_from(
        &self,
        query: &str,
        start: EscalationTier,
        cancel: &CancellationToken,
    ) -> PipelineResult<FinalDecision> {
        let mut state = EscalationState::new(query, start);
        let mut feedback: Vec<FeedbackRecord> = Vec::new();
        let mut previous_command: Option<String> = None;

        loop {
            let tier = state.current_tier;
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled(format!("before {}", tier)));
            }

            self.events.publish(PipelineEvent::GenerationStart {
                tier,
                is_initial_tier: tier == start,
                timestamp: Utc::now(),
            });

            let request = GenerationRequest {
                tier,
                query: query.to_string(),
                feedback: feedback.clone(),
                previous_command: previous_command.clone(),
            };

            let reason = match self.generate(&request, cancel).await? {
                Ok(candidate) => {
                    self.events.publish(PipelineEvent::GenerationSuccess {
                        tier,
                        command: candidate.raw.clone(),
                        timestamp: Utc::now(),
                    });
                    previous_command = Some(candidate.raw.clone());
                    match self
                        .run_tier(&mut state, candidate, &mut feedback, cancel)
                        .await?
                    {
                        TierOutcome::Decided(decision) => return Ok(decision),
                        TierOutcome::Escalate(reason) => reason,
                    }
                }
                Err(e) => {
                    warn!(tier = %tier, generator = self.generator.name(), error = %e, "Generation failed");
                    self.events.publish(PipelineEvent::GenerationFailure {
                        tier,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    if tier.next().is_none() {
                        state.escalate(EscalationReason::GenerationFailed {
                            reason: e.to_string(),
                        });
                        return Err(PipelineError::GenerationUnavailable {
                            tier,
                            reason: e.to_string(),
                            escalations: state.escalation_history,
                            feedback,
                        });
                    }
                    EscalationReason::GenerationFailed {
                        reason: e.to_string(),
                    }
                }
            };

            info!(from = %tier, reason = %reason, "Escalating");
            if state.escalate(reason).is_none() {
                debug!(state = %state.summary(), "All tiers exhausted");
                return Err(PipelineError::Exhausted {
                    escalations: state.escalation_history,
                    feedback,
                });
            }
        }
    }

    /// Validate and repair one tier's candidate until it is accepted or the
    /// tier gives up.
    async fn run_tier(
        &self,
        state: &mut EscalationState,
        mut candidate: Command,
        feedback: &mut Vec<FeedbackRecord>,
        cancel: &CancellationToken,
    ) -> PipelineResult<TierOutcome> {
        let tier = state.current_tier;
        let max_attempts = self.config.max_corrections + 1;

        for attempt in 1..=max_attempts {
            state.record_attempt();
            let verdict = self.validate(&candidate, cancel).await?;

            self.events.publish(PipelineEvent::ValidationAttempt {
                tier,
                attempt,
                status: verdict.status,
                score: verdict.score,
                issues: verdict.issues.clone(),
                command: candidate.raw.clone(),
                timestamp: Utc::now(),
            });
            debug!(tier = %tier, attempt, status = %verdict.status, score = verdict.score, "Validated");

            match verdict.status {
                ValidationStatus::Valid => {
                    return Ok(TierOutcome::Decided(
                        state.finalize(candidate.raw, verdict.score),
                    ));
                }
                ValidationStatus::Invalid => {
                    self.events.publish(PipelineEvent::ValidationFailure {
                        tier,
                        attempt,
                        issues: verdict.issues.clone(),
                        timestamp: Utc::now(),
                    });
                    return Ok(TierOutcome::Escalate(EscalationReason::ValidationInvalid {
                        issues: verdict.issues,
                    }));
                }
                ValidationStatus::Repairable => {
                    let session = self
                        .agent
                        .correct(&candidate, &state.query, ValidationStatus::Repairable, cancel)
                        .await;
                    let session_id = session.id.to_string();
                    state.record_session(session_id.clone());

                    if session.cancelled {
                        return Err(PipelineError::Cancelled(format!(
                            "during self-correction at {}",
                            tier
                        )));
                    }
                    if !session.succeeded {
                        self.events.publish(PipelineEvent::SelfCorrectionFailure {
                            tier,
                            attempt,
                            session_id: session_id.clone(),
                            reason: session
                                .feedback
                                .last()
                                .map(|f| f.reason.clone())
                                .unwrap_or_else(|| "correction_failed".to_string()),
                            timestamp: Utc::now(),
                        });
                        *feedback = session.feedback;
                        return Ok(TierOutcome::Escalate(EscalationReason::CorrectionFailed {
                            session_id,
                        }));
                    }

                    match Command::parse(&session.final_command) {
                        Ok(repaired) => {
                            self.events.publish(PipelineEvent::SelfCorrectionSuccess {
                                tier,
                                attempt,
                                session_id,
                                new_command: repaired.raw.clone(),
                                timestamp: Utc::now(),
                            });
                            candidate = repaired;
                        }
                        Err(e) => {
                            warn!(command = %session.final_command, error = %e, "Repaired command does not parse");
                            return Ok(TierOutcome::Escalate(EscalationReason::CorrectionFailed {
                                session_id,
                            }));
                        }
                    }
                }
            }
        }

        Ok(TierOutcome::Escalate(EscalationReason::AttemptsExhausted {
            attempts: max_attempts,
        }))
    }

    /// Outer `Err` is cancellation; inner `Err` is a generator failure.
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> PipelineResult<CollaboratorResult<Command>> {
        let limit = Duration::from_secs(self.config.generator_timeout_secs);
        let call = tokio::time::timeout(limit, self.generator.generate(request));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled(format!("generation at {}", request.tier)));
            }
            result = call => result,
        };

        Ok(match result {
            Ok(Ok(text)) => Command::parse(&text)
                .map_err(|e| CollaboratorError::invalid_response(self.generator.name(), e)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CollaboratorError::Timeout {
                service: self.generator.name().to_string(),
                secs: limit.as_secs(),
            }),
        })
    }

    /// Failures and timeouts become an `Invalid` verdict with score 0.
    async fn validate(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> PipelineResult<ValidatorVerdict> {
        let limit = Duration::from_secs(self.config.validator_timeout_secs);
        let call = tokio::time::timeout(limit, self.validator.validate(command));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled("validation".to_string()));
            }
            result = call => result,
        };

        Ok(match result {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!(validator = self.validator.name(), error = %e, "Validator failed");
                ValidatorVerdict::invalid(vec![format!("Validator error: {}", e)])
            }
            Err(_) => {
                warn!(
                    validator = self.validator.name(),
                    timeout_secs = limit.as_secs(),
                    "Validator timed out"
                );
                ValidatorVerdict::invalid(vec![format!(
                    "Validator timed out after {}s",
                    limit.as_secs()
                )])
            }
        })
    }
}

impl std::fmt::Debug for EscalationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationOrchestrator")
            .field("generator", &self.generator.name())
            .field("validator", &self.validator.name())
            .field("config", &self.config)
            .finish()
    }
}
