//! Session history
//!
//! Append-only record of finished correction sessions. Writers are
//! serialized; readers take snapshots without blocking each other.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::feedback::session::{CorrectionSession, SessionOutcome};

/// Error type for history operations
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    #[error("History storage error: {0}")]
    Storage(String),
}

/// Result type for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Storage for finished correction sessions.
pub trait SessionRepository: Send + Sync {
    fn append(&self, session: CorrectionSession) -> HistoryResult<()>;

    fn get(&self, id: Uuid) -> HistoryResult<CorrectionSession>;

    /// All sessions, oldest first.
    fn snapshot(&self) -> Vec<CorrectionSession>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> HistoryStats {
        HistoryStats::from_sessions(&self.snapshot())
    }
}

/// Aggregate counts over the history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub sessions: usize,
    pub autonomous_repairs: usize,
    pub iterative_repairs: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_attempts: usize,
    /// Fraction of sessions that ended in a working command.
    pub success_rate: f64,
}

impl HistoryStats {
    pub fn from_sessions(sessions: &[CorrectionSession]) -> Self {
        let mut stats = Self {
            sessions: sessions.len(),
            ..Self::default()
        };
        for session in sessions {
            stats.total_attempts += session.attempts.len();
            match session.outcome() {
                SessionOutcome::AutonomousRepair => stats.autonomous_repairs += 1,
                SessionOutcome::IterativeRepair => stats.iterative_repairs += 1,
                SessionOutcome::Failed => stats.failed += 1,
                SessionOutcome::Cancelled => stats.cancelled += 1,
            }
        }
        if stats.sessions > 0 {
            stats.success_rate =
                (stats.autonomous_repairs + stats.iterative_repairs) as f64 / stats.sessions as f64;
        }
        stats
    }
}

/// Process-local history.
#[derive(Debug, Default)]
pub struct InMemorySessionHistory {
    sessions: RwLock<Vec<CorrectionSession>>,
}

impl InMemorySessionHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRepository for InMemorySessionHistory {
    fn append(&self, session: CorrectionSession) -> HistoryResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        debug!(session_id = %session.id, total = sessions.len() + 1, "Session recorded");
        sessions.push(session);
        Ok(())
    }

    fn get(&self, id: Uuid) -> HistoryResult<CorrectionSession> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        sessions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(HistoryError::NotFound(id))
    }

    fn snapshot(&self) -> Vec<CorrectionSession> {
        self.sessions.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}
