//! HTTP collaborators
//!
//! [`HttpGenerator`] routes each tier to its own generation service;
//! [`HttpValidator`] calls a remote validation service. Transport errors,
//! HTTP error statuses and malformed bodies all surface as
//! [`CollaboratorError`]s so the orchestrator can escalate.

use std::time::Duration;

use async_trait::async_trait;
use scan_coordination::feedback::FeedbackRecord;
use scan_coordination::{
    CollaboratorError, CollaboratorResult, Command, EscalationTier, GenerationRequest, Generator,
    ValidationStatus, Validator, ValidatorVerdict,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::TierEndpoints;

/// Keys a generation service may put the command under, in lookup order.
const COMMAND_KEYS: &[&str] = &["command", "cmd", "nmap_command"];

/// Score reported when a validator gives neither a score nor a risk score.
const DEFAULT_VALIDATOR_SCORE: f64 = 0.85;

/// A response body that does not carry what the caller needs.
#[derive(Debug, Error, PartialEq)]
pub enum ResponseError {
    #[error("response has no command (looked for {})", COMMAND_KEYS.join(", "))]
    MissingCommand,

    #[error("response has no status")]
    MissingStatus,

    #[error("unknown validation status '{0}'")]
    UnknownStatus(String),
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    query: &'a str,
    tier: EscalationTier,
    complexity: &'static str,
    context: GenerateContext<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateContext<'a> {
    feedback: &'a [FeedbackRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_command: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ValidateBody<'a> {
    command: &'a str,
    user_id: &'a str,
    source_agent: &'a str,
}

/// Pull the generated command out of a generation response.
pub fn extract_command(body: &Value) -> Result<String, ResponseError> {
    COMMAND_KEYS
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|command| !command.is_empty())
        .map(str::to_string)
        .ok_or(ResponseError::MissingCommand)
}

/// Interpret a validation response.
///
/// `score` is used as-is when present. Otherwise a `risk_score` is inverted,
/// read as a fraction when at most 1 and as a percentage above that.
/// Issues may be plain strings or objects with a `message`; `warnings` are
/// appended after them.
pub fn parse_verdict(body: &Value) -> Result<ValidatorVerdict, ResponseError> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or(ResponseError::MissingStatus)?;
    let status = match status.trim().to_ascii_lowercase().as_str() {
        "valid" => ValidationStatus::Valid,
        "repairable" => ValidationStatus::Repairable,
        "invalid" => ValidationStatus::Invalid,
        other => return Err(ResponseError::UnknownStatus(other.to_string())),
    };

    let score = match (
        body.get("score").and_then(Value::as_f64),
        body.get("risk_score").and_then(Value::as_f64),
    ) {
        (Some(score), _) => score,
        (None, Some(risk)) if risk > 1.0 => 1.0 - risk / 100.0,
        (None, Some(risk)) => 1.0 - risk,
        (None, None) => DEFAULT_VALIDATOR_SCORE,
    };

    let mut issues: Vec<String> = body
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(issue_text).collect())
        .unwrap_or_default();
    if let Some(warnings) = body.get("warnings").and_then(Value::as_array) {
        issues.extend(warnings.iter().filter_map(issue_text));
    }

    Ok(ValidatorVerdict {
        status,
        score: score.clamp(0.0, 1.0),
        issues,
    })
}

fn issue_text(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => Some(
            obj.get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified issue")
                .to_string(),
        ),
        _ => None,
    }
}

fn transport_error(service: &str, timeout: Duration, e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Timeout {
            service: service.to_string(),
            secs: timeout.as_secs(),
        }
    } else {
        CollaboratorError::unavailable(service, e)
    }
}

async fn post_json<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    body: &B,
    timeout: Duration,
) -> CollaboratorResult<Value> {
    let response = client
        .post(url)
        .json(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| transport_error(service, timeout, e))?;
    let status = response.status();
    debug!(service, url, status = %status, "Response received");
    let response = response
        .error_for_status()
        .map_err(|e| CollaboratorError::unavailable(service, e))?;
    response
        .json()
        .await
        .map_err(|e| CollaboratorError::invalid_response(service, e))
}

/// One generation service per tier.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoints: TierEndpoints,
    timeout: Duration,
}

impl HttpGenerator {
    pub fn new(endpoints: TierEndpoints, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            timeout,
        }
    }

    pub fn endpoints(&self) -> &TierEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, request: &GenerationRequest) -> CollaboratorResult<String> {
        let url = self.endpoints.get(request.tier).ok_or_else(|| {
            CollaboratorError::unavailable(
                self.name(),
                format!("no endpoint configured for {}", request.tier),
            )
        })?;
        let body = GenerateBody {
            query: &request.query,
            tier: request.tier,
            complexity: request.tier.complexity_label(),
            context: GenerateContext {
                feedback: &request.feedback,
                previous_command: request.previous_command.as_deref(),
            },
        };

        info!(tier = %request.tier, url, feedback = request.feedback.len(), "Requesting generation");
        let response = post_json(&self.client, self.name(), url, &body, self.timeout).await?;
        extract_command(&response).map_err(|e| CollaboratorError::invalid_response(self.name(), e))
    }

    fn name(&self) -> &str {
        "http-generator"
    }
}

/// Remote validation service.
#[derive(Debug, Clone)]
pub struct HttpValidator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpValidator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn validate(&self, command: &Command) -> CollaboratorResult<ValidatorVerdict> {
        let body = ValidateBody {
            command: &command.raw,
            user_id: "scan-agents",
            source_agent: "orchestrator",
        };
        let response = post_json(&self.client, self.name(), &self.url, &body, self.timeout).await?;
        let verdict =
            parse_verdict(&response).map_err(|e| CollaboratorError::invalid_response(self.name(), e))?;
        debug!(
            command = %command,
            status = %verdict.status,
            score = verdict.score,
            issues = verdict.issues.len(),
            "Remote verdict"
        );
        Ok(verdict)
    }

    fn name(&self) -> &str {
        "http-validator"
    }
}
