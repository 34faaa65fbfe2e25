//! Local Runtime - supervises local inference engines and exposes a control API.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use runtime_manager::api;
use runtime_manager::config::Config;
use runtime_manager::engine::{EngineRegistry, LlamaCppEngine, OllamaEngine};
use runtime_manager::planner::{HardwareProbe, SystemProbe};
use runtime_manager::state::AppState;
use runtime_manager::tools::{HttpToolTransport, ToolCoordinator};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("local-runtime {}", VERSION);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().map_err(|e| {
        format!(
            "Failed to load configuration: {}. \
             Check config.toml or the RUNTIME__SECTION__KEY environment variables.",
            e
        )
    })?;
    tracing::info!("Starting local-runtime {}", VERSION);

    // Create engine registry
    let registry = Arc::new(EngineRegistry::new());

    // Register enabled engines
    if let Some(ref ollama_config) = config.engines.ollama {
        if ollama_config.enabled {
            let engine = Arc::new(OllamaEngine::from_config(ollama_config));
            registry.register(engine).await;
            tracing::info!("Registered Ollama engine at {}", ollama_config.base_url);
        }
    }

    if let Some(ref llama_config) = config.engines.llama_cpp {
        if llama_config.enabled {
            let probe: Arc<dyn HardwareProbe> = Arc::new(SystemProbe::new(config.hardware.clone()));
            let engine = Arc::new(LlamaCppEngine::new(llama_config.clone(), probe));
            registry.register(engine).await;
            tracing::info!(
                "Registered llama.cpp engine: model_dir={}, binary_dir={}",
                llama_config.model_dir,
                llama_config.binary_dir
            );
        }
    }

    // Connect the tool server if configured
    let tools = match config.tools.endpoint {
        Some(ref endpoint) => {
            tracing::info!("Forwarding tool calls to {}", endpoint);
            ToolCoordinator::with_transport(Arc::new(HttpToolTransport::new(endpoint)))
        }
        None => {
            tracing::info!("No tool server configured, tool calls will report unavailable");
            ToolCoordinator::new()
        }
    };

    // Create shared state
    let state = Arc::new(AppState::new(config.clone(), registry.clone(), Arc::new(tools)));
    let app = api::app(state);

    // Start server
    let addr = format!("{}:{}", config.api.host, config.api.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Engine processes must not outlive the manager, even if serving failed.
    registry.shutdown_all().await;
    tracing::info!("Shutdown complete");

    served?;
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
