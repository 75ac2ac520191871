use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{StudioError, StudioResult};
use crate::workflows::WorkflowKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One run of a studio workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioSession {
    pub id: Uuid,
    pub workflow: WorkflowKind,
    pub input: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The result is the workflow fallback rather than a model response
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory session storage keyed by session id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<Uuid, StudioSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, workflow: WorkflowKind, input: &str) -> StudioSession {
        let now = Utc::now();
        let session = StudioSession {
            id: Uuid::new_v4(),
            workflow,
            input: input.to_string(),
            status: SessionStatus::Pending,
            result: None,
            degraded: false,
            error_message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(session.id, session.clone());
        debug!("Created {} session {}", workflow.slug(), session.id);
        session
    }

    pub fn get(&self, id: &Uuid) -> Option<StudioSession> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Sessions ordered by creation time, optionally for one workflow
    pub fn list(&self, workflow: Option<WorkflowKind>) -> Vec<StudioSession> {
        let mut sessions: Vec<StudioSession> = self
            .sessions
            .iter()
            .filter(|entry| workflow.is_none_or(|kind| entry.workflow == kind))
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }

    pub fn mark_processing(&self, id: &Uuid) -> StudioResult<()> {
        self.transition(id, SessionStatus::Pending, |session| {
            session.status = SessionStatus::Processing;
        })
    }

    /// Store the result and mark the session completed in one step
    pub fn complete(&self, id: &Uuid, result: Value, degraded: bool, attempts: u32) -> StudioResult<()> {
        self.transition(id, SessionStatus::Processing, |session| {
            session.status = SessionStatus::Completed;
            session.result = Some(result);
            session.degraded = degraded;
            session.attempts = attempts;
        })?;
        info!("Session {} completed after {} attempt(s)", id, attempts);
        Ok(())
    }

    /// Mark the session failed with a readable message. Failed sessions never
    /// carry a result.
    pub fn fail(&self, id: &Uuid, message: impl Into<String>, attempts: u32) -> StudioResult<()> {
        let message = message.into();
        self.transition(id, SessionStatus::Processing, |session| {
            session.status = SessionStatus::Failed;
            session.result = None;
            session.error_message = Some(message.clone());
            session.attempts = attempts;
        })?;
        warn!("Session {} failed: {}", id, message);
        Ok(())
    }

    fn transition<F>(&self, id: &Uuid, expected: SessionStatus, apply: F) -> StudioResult<()>
    where
        F: FnOnce(&mut StudioSession),
    {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StudioError::NotFound(format!("session {}", id)))?;

        if entry.status != expected {
            return Err(StudioError::InvalidState(format!(
                "session {} is {:?}, expected {:?}",
                id, entry.status, expected
            )));
        }

        apply(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(())
    }
}
