//! Parley server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use parley_agent::AgentServices;
use parley_config::{load_settings, Settings};
use parley_llm::EchoLlm;
use parley_pipeline::SilenceTts;
use parley_server::{create_router, init_metrics, AppState};
use parley_tools::{StaticSearchProvider, ToolRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("PARLEY_ENV").ok();
    let settings = load_settings(env.as_deref())?;

    init_tracing(&settings);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), env = ?env, "Starting parley server");

    let services = Arc::new(build_services(&settings));
    let mut state = AppState::new(settings.clone(), services.clone());

    if settings.observability.metrics_enabled {
        state = state.with_metrics(init_metrics()?);
        tracing::info!("Prometheus metrics available at /metrics");
    }

    let sweeper = state.registry.start_sweeper();
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = sweeper.send(true);
    services.limiter.close();

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn build_services(settings: &Settings) -> AgentServices {
    let llm = Arc::new(EchoLlm::default());
    let tts = Arc::new(SilenceTts::new(settings.synthesis.sample_rate));
    let tools = Arc::new(ToolRegistry::with_defaults(
        &settings.tools,
        Arc::new(StaticSearchProvider::default()),
    ));
    let store = parley_persistence::init(&settings.persistence);

    tracing::info!(
        tools = ?tools.names(),
        max_concurrent_synthesis = settings.synthesis.max_concurrent,
        "Agent services ready"
    );

    AgentServices::new(settings, llm, tts, tools, store)
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("parley={level},parley_server={level},parley_agent={level},tower_http=info").into()
    });

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
