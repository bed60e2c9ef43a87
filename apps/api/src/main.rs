use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resume_coach_api::agent::{
    AgentRunner, HttpToolExecutor, LlmAgentRunner, NoTools, ScriptedAgent, ToolExecutor,
};
use resume_coach_api::config::Config;
use resume_coach_api::db::connect_thread_store;
use resume_coach_api::llm_client::{self, LlmClient};
use resume_coach_api::routes::build_router;
use resume_coach_api::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resume Coach API v{}", env!("CARGO_PKG_VERSION"));

    let threads = connect_thread_store(&config).await?;

    let agent: Arc<dyn AgentRunner> = match &config.anthropic_api_key {
        Some(key) => {
            let llm = LlmClient::new(key.clone())?;
            info!("LLM client initialized (model: {})", llm_client::MODEL);

            let tools: Arc<dyn ToolExecutor> = match &config.resume_tools_url {
                Some(url) => {
                    info!("Coach tools served by {url}");
                    Arc::new(HttpToolExecutor::new(url)?)
                }
                None => {
                    warn!("RESUME_TOOLS_URL not set; the coach can only talk, not edit");
                    Arc::new(NoTools)
                }
            };
            Arc::new(LlmAgentRunner::new(llm, tools))
        }
        None => {
            warn!("ANTHROPIC_API_KEY not set; chat turns will end with an error frame");
            Arc::new(ScriptedAgent::unconfigured())
        }
    };

    let state = AppState {
        threads,
        agent,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the web client's host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
