use rootcause::Report;
use std::sync::Arc;
use std::time::Duration;
use taskloom_ai::OpenAiCompatibleBackend;
use taskloom_engine::FsStore;
use taskloom_server::collaborators::{RemoteToolInvoker, RemoteWorkflowExecutor};
use taskloom_server::config::ServerConfig;
use taskloom_server::error::ServerError;
use taskloom_server::state::{AppState, Collaborators};
use taskloom_trigger::TelegramClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn bootstrap(component: &'static str, reason: impl ToString) -> ServerError {
    ServerError::Bootstrap {
        component,
        reason: reason.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Report<ServerError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| ServerError::Config {
        reason: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let llm = OpenAiCompatibleBackend::new(config.llm.backend_config())
        .map_err(|report| bootstrap("language model", report.current_context()))?;
    let collaborator_timeout = Duration::from_secs(config.orchestrator.workflow_timeout_seconds);
    let workflows = RemoteWorkflowExecutor::new(
        config.collaborators.workflow_evaluator_url.clone(),
        collaborator_timeout,
    )
    .map_err(|report| bootstrap("workflow evaluator", report.current_context()))?;
    let tools = RemoteToolInvoker::new(
        config.collaborators.tool_bridge_url.clone(),
        collaborator_timeout,
    )
    .map_err(|report| bootstrap("tool bridge", report.current_context()))?;
    let telegram = TelegramClient::new(
        config.telegram.api_base_url.clone(),
        Duration::from_secs(config.telegram.timeout_seconds),
    )
    .map_err(|report| bootstrap("telegram client", report.current_context()))?;
    tracing::info!(data_dir = %config.data_dir.display(), "Using filesystem store");

    let state = Arc::new(AppState::new(
        &config,
        Collaborators {
            llm: Arc::new(llm),
            workflows: Arc::new(workflows),
            tools: Arc::new(tools),
            store: Arc::new(FsStore::new(config.data_dir.clone())),
            telegram,
        },
    ));
    let app = taskloom_server::app::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: config.bind_addr.clone(),
            reason: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "could not listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await
        .map_err(|e| ServerError::Serve {
            reason: e.to_string(),
        })?;
    Ok(())
}
