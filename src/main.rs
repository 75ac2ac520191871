use actix_web::{App, HttpServer, web};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pm_studio::config::StudioConfig;
use pm_studio::handlers::{AppState, configure};
use pm_studio::llm_client::HttpLlmClient;
use pm_studio::llm_json::LlmJsonRequester;
use pm_studio::sessions::SessionStore;
use pm_studio::workflow_runner::WorkflowRunner;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    // Built once and shared read-only
    let config = StudioConfig::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    if config.llm.api_key.is_none() {
        error!(
            "No API key configured for {}; set LLM_API_KEY or {}",
            config.llm.provider,
            config.llm.provider.api_key_env()
        );
    }

    let client = HttpLlmClient::new(config.llm.clone()).map_err(|e| {
        error!("Failed to create LLM client: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    let sessions = Arc::new(SessionStore::new());
    let runner = WorkflowRunner::new(
        LlmJsonRequester::new(Arc::new(client)),
        sessions.clone(),
        config.retry.clone(),
        config.llm.max_tokens,
    );

    let app_state = web::Data::new(AppState {
        runner: Arc::new(runner),
        sessions,
    });

    let (host, port) = config.bind_address();
    info!(
        provider = %config.llm.provider,
        model = config.llm.resolved_model(),
        max_retries = config.retry.max_retries,
        "Starting server at http://{}:{}",
        host,
        port
    );

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(configure)
    })
    .bind((host, port))?
    .run()
    .await
}
