use std::sync::Arc;
use tracing::{error, info};

use crate::config::RetryConfig;
use crate::errors::{StudioError, StudioResult};
use crate::llm_json::LlmJsonRequester;
use crate::sessions::{SessionStore, StudioSession};
use crate::workflows::{WorkflowKind, validate_and_fill_defaults};

/// Runs studio workflows end to end and records the outcome on the session
pub struct WorkflowRunner {
    requester: LlmJsonRequester,
    sessions: Arc<SessionStore>,
    retry: RetryConfig,
    max_tokens: u32,
}

impl WorkflowRunner {
    pub fn new(
        requester: LlmJsonRequester,
        sessions: Arc<SessionStore>,
        retry: RetryConfig,
        max_tokens: u32,
    ) -> Self {
        Self {
            requester,
            sessions,
            retry,
            max_tokens,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run `kind` on `input`.
    ///
    /// Returns the final session: `completed` with its result, or `failed`
    /// with a stored error message. Only invalid input or store errors are
    /// returned as `Err`.
    pub async fn run(&self, kind: WorkflowKind, input: &str) -> StudioResult<StudioSession> {
        let input = input.trim();
        if input.is_empty() {
            return Err(StudioError::InvalidRequest(format!(
                "{} input cannot be empty",
                kind.display_name()
            )));
        }

        let session = self.sessions.create(kind, input);
        self.sessions.mark_processing(&session.id)?;
        info!("Running {} for session {}", kind.slug(), session.id);

        let messages = kind.prompt(input).build_messages();
        let options = kind.request_options(&self.retry, self.max_tokens);

        match self.requester.request_json(messages, &options).await {
            Ok(outcome) => {
                let attempts = outcome.attempts();
                let degraded = outcome.is_degraded();
                match validate_and_fill_defaults(kind, outcome.into_value()) {
                    Ok(value) => self.sessions.complete(&session.id, value, degraded, attempts)?,
                    Err(e) => {
                        error!("{} result rejected for session {}: {}", kind.slug(), session.id, e);
                        self.sessions.fail(&session.id, e.to_string(), attempts)?;
                    }
                }
            }
            Err(e) => {
                self.sessions.fail(&session.id, e.to_string(), e.attempts)?;
            }
        }

        self.sessions
            .get(&session.id)
            .ok_or_else(|| StudioError::Internal(format!("session {} disappeared", session.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LlmError;
    use crate::llm_client::{CompletionRequest, LlmClient};
    use crate::llm_json::Delay;
    use crate::sessions::SessionStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedClient {
        response: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            Ok(self.response.clone())
        }
    }

    struct NoDelay;

    #[async_trait]
    impl Delay for NoDelay {
        async fn wait(&self, _duration: Duration) {}
    }

    fn runner(response: &str) -> (WorkflowRunner, Arc<FixedClient>) {
        let client = Arc::new(FixedClient {
            response: response.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let requester = LlmJsonRequester::with_delay(client.clone(), Arc::new(NoDelay));
        let runner = WorkflowRunner::new(
            requester,
            Arc::new(SessionStore::new()),
            RetryConfig { max_retries: 2, backoff_base_secs: 0 },
            1024,
        );
        (runner, client)
    }

    #[tokio::test]
    async fn test_successful_run_persists_filled_result() {
        let (runner, client) = runner(
            "Here is your PRD:\n```json\n{\"title\": \"Exports\", \"problem_statement\": \"Users copy data by hand\", \"requirements\": [{\"id\": \"REQ-1\"},],}\n```",
        );

        let session = runner.run(WorkflowKind::PrdGeneration, "  CSV export  ").await.unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.input, "CSV export");
        assert!(!session.degraded);
        let result = session.result.unwrap();
        assert_eq!(result["title"], "Exports");
        assert_eq!(result["goals"], json!([]));
        assert!(client.prompts.lock().unwrap()[0].contains("INPUT:\nCSV export"));
    }

    #[tokio::test]
    async fn test_terminal_failure_marks_session_failed() {
        let (runner, client) = runner("I cannot produce that document.");

        let session = runner.run(WorkflowKind::Feasibility, "teleporter").await.unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.result.is_none());
        assert_eq!(session.attempts, 2);
        assert!(session.error_message.unwrap().contains("No JSON object or array found"));
        assert_eq!(client.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_workflow_completes_degraded() {
        let (runner, _client) = runner("");

        let session = runner.run(WorkflowKind::ScopeMonitoring, "scope notes").await.unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.degraded);
        assert_eq!(session.result, Some(json!({"alerts": [], "scope_health": "unknown"})));
    }

    #[tokio::test]
    async fn test_schema_violation_fails_session() {
        let (runner, _client) = runner("{\"overall_score\": 99, \"recommendation\": \"go\"}");

        let session = runner.run(WorkflowKind::Feasibility, "idea").await.unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error_message.unwrap().contains("does not match its schema"));
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected_without_session() {
        let (runner, client) = runner("{}");

        let result = runner.run(WorkflowKind::Ideation, "   ").await;

        assert!(matches!(result, Err(StudioError::InvalidRequest(_))));
        assert!(runner.sessions().list(None).is_empty());
        assert!(client.prompts.lock().unwrap().is_empty());
    }
}
