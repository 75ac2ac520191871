use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{ErrorBody, StudioError, StudioResult};
use crate::json_parser::parse_with_required_keys;
use crate::json_scanner::JsonShape;
use crate::sessions::{SessionStatus, SessionStore, StudioSession};
use crate::workflow_runner::WorkflowRunner;
use crate::workflows::{WorkflowInfo, WorkflowKind};

// Shared state for the HTTP handlers
pub struct AppState {
    pub runner: Arc<WorkflowRunner>,
    pub sessions: Arc<SessionStore>,
}

#[derive(Deserialize)]
pub struct RunWorkflowRequest {
    pub input: String,
}

#[derive(Serialize)]
pub struct WorkflowFailedResponse {
    #[serde(flatten)]
    pub error: ErrorBody,
    pub session: StudioSession,
}

#[derive(Deserialize)]
pub struct ListSessionsQuery {
    pub workflow: Option<String>,
}

#[derive(Deserialize)]
pub struct ParseRequest {
    pub text: Option<String>,
    #[serde(default)]
    pub shape: JsonShape,
    #[serde(default)]
    pub required_keys: Vec<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum ParseResponse {
    Parsed { ok: bool, value: Value },
    Rejected { ok: bool, kind: String, message: String },
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health_handler))
            .route("/workflows", web::get().to(list_workflows_handler))
            .route("/workflows/{slug}/sessions", web::post().to(run_workflow_handler))
            .route("/sessions", web::get().to(list_sessions_handler))
            .route("/sessions/{id}", web::get().to(get_session_handler))
            .route("/json/parse", web::post().to(parse_json_handler)),
    );
}

fn workflow_from_slug(slug: &str) -> StudioResult<WorkflowKind> {
    WorkflowKind::from_slug(slug).ok_or_else(|| StudioError::NotFound(format!("workflow '{}'", slug)))
}

pub async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// API endpoint to list available workflows
pub async fn list_workflows_handler() -> impl Responder {
    let workflows: Vec<WorkflowInfo> = WorkflowKind::all().iter().map(WorkflowKind::info).collect();
    HttpResponse::Ok().json(workflows)
}

// API endpoint to run a workflow on user input
pub async fn run_workflow_handler(
    path: web::Path<String>,
    request: web::Json<RunWorkflowRequest>,
    data: web::Data<AppState>,
) -> StudioResult<HttpResponse> {
    let kind = workflow_from_slug(&path.into_inner())?;
    let session = data.runner.run(kind, &request.input).await?;

    if session.status == SessionStatus::Failed {
        let message = session
            .error_message
            .clone()
            .unwrap_or_else(|| "workflow failed".to_string());
        return Ok(HttpResponse::BadGateway().json(WorkflowFailedResponse {
            error: ErrorBody {
                error: "workflow_failed".to_string(),
                message,
            },
            session,
        }));
    }

    Ok(HttpResponse::Created().json(session))
}

// API endpoint to list sessions
pub async fn list_sessions_handler(
    query: web::Query<ListSessionsQuery>,
    data: web::Data<AppState>,
) -> StudioResult<HttpResponse> {
    let workflow = query.workflow.as_deref().map(workflow_from_slug).transpose()?;
    Ok(HttpResponse::Ok().json(data.sessions.list(workflow)))
}

// API endpoint to fetch one session
pub async fn get_session_handler(
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> StudioResult<HttpResponse> {
    let raw_id = path.into_inner();
    let id = Uuid::parse_str(&raw_id)
        .map_err(|_| StudioError::InvalidRequest(format!("invalid session id '{}'", raw_id)))?;

    data.sessions
        .get(&id)
        .map(|session| HttpResponse::Ok().json(session))
        .ok_or_else(|| StudioError::NotFound(format!("session {}", id)))
}

// Diagnostic endpoint: run the strict parser on text without calling the LLM
pub async fn parse_json_handler(request: web::Json<ParseRequest>) -> impl Responder {
    let request = request.into_inner();
    let response = match parse_with_required_keys(request.text.as_deref(), request.shape, &request.required_keys) {
        Ok(value) => ParseResponse::Parsed { ok: true, value },
        Err(e) => ParseResponse::Rejected {
            ok: false,
            kind: e.kind().to_string(),
            message: e.to_string(),
        },
    };
    HttpResponse::Ok().json(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::errors::LlmError;
    use crate::llm_client::{CompletionRequest, LlmClient};
    use crate::llm_json::{Delay, LlmJsonRequester};
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use async_trait::async_trait;
    use std::time::Duration;

    struct CannedClient(&'static str);

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }
    }

    struct NoDelay;

    #[async_trait]
    impl Delay for NoDelay {
        async fn wait(&self, _duration: Duration) {}
    }

    fn app_state(response: &'static str) -> web::Data<AppState> {
        let sessions = Arc::new(SessionStore::new());
        let requester = LlmJsonRequester::with_delay(Arc::new(CannedClient(response)), Arc::new(NoDelay));
        let runner = WorkflowRunner::new(
            requester,
            sessions.clone(),
            RetryConfig { max_retries: 1, backoff_base_secs: 0 },
            512,
        );
        web::Data::new(AppState {
            runner: Arc::new(runner),
            sessions,
        })
    }

    #[actix_web::test]
    async fn test_run_workflow_and_fetch_session() {
        let state = app_state(r#"{"objectives": [{"objective": "Grow", "key_results": [{"description": "MAU", "target": "10k"}]}]}"#);
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows/okr/sessions")
            .set_json(json!({ "input": "grow the business" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["workflow"], "okr_generation");

        let id = body["id"].as_str().unwrap();
        let req = test::TestRequest::get().uri(&format!("/api/sessions/{}", id)).to_request();
        let fetched: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched["result"]["objectives"][0]["objective"], "Grow");
    }

    #[actix_web::test]
    async fn test_failed_workflow_returns_bad_gateway_with_session() {
        let state = app_state("sorry, no json");
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows/ideation/sessions")
            .set_json(json!({ "input": "pet food delivery" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "workflow_failed");
        assert_eq!(body["session"]["status"], "failed");
        assert!(body["session"].get("result").is_none());
    }

    #[actix_web::test]
    async fn test_unknown_workflow_and_session() {
        let app = test::init_service(App::new().app_data(app_state("{}")).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows/dashboards/sessions")
            .set_json(json!({ "input": "x" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get()
            .uri(&format!("/api/sessions/{}", Uuid::new_v4()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/sessions/not-a-uuid").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_parse_endpoint() {
        let app = test::init_service(App::new().configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/json/parse")
            .set_json(json!({ "text": "Sure:\n```json\n{\"a\": 1,}\n```", "required_keys": ["a"] }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "ok": true, "value": { "a": 1 } }));

        let req = test::TestRequest::post()
            .uri("/api/json/parse")
            .set_json(json!({ "text": "[1, 2]", "shape": "object" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["kind"], "type_mismatch");
    }

    #[actix_web::test]
    async fn test_list_workflows() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get().uri("/api/workflows").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let slugs: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|w| w["slug"].as_str().unwrap())
            .collect();
        assert_eq!(slugs.len(), WorkflowKind::all().len());
        assert!(slugs.contains(&"journey-mapping"));
    }
}
