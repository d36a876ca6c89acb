use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;

use enrollment_orchestrator::config::EnrollmentConfig;
use enrollment_orchestrator::orchestrator::EnrollmentDeps;
use enrollment_orchestrator::routes::{SessionRegistry, enrollment_routes};
use enrollment_orchestrator::submission::{LibSqlStore, LoggingLinker};
use enrollment_orchestrator::supervisor::{FaultChannel, FaultSupervisor, supervise};
use enrollment_orchestrator::verification::HttpSmsGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EnrollmentConfig::from_env().context("Invalid configuration")?;

    eprintln!("Enrollment orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API backend: {}", config.api_base_url);
    eprintln!("   REST: http://0.0.0.0:{}/api/enrollments", config.port);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Hand-off store ───────────────────────────────────────────────────
    let store = LibSqlStore::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;

    let registry = SessionRegistry::new(EnrollmentDeps {
        gateway: Arc::new(HttpSmsGateway::new(&config.api_base_url)),
        store: Arc::new(store),
        linker: Arc::new(LoggingLinker),
        verification: config.verification(),
    });

    // ── Fault supervisor ─────────────────────────────────────────────────
    let faults = FaultChannel::global();
    let mut supervisor =
        FaultSupervisor::mount(faults, registry.clone(), config.fault_reload_delay);

    // ── REST server ──────────────────────────────────────────────────────
    let app = enrollment_routes(registry.clone()).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Enrollment server started");

    let served = supervise(faults, async {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await
    })
    .await;

    supervisor.dispose();
    let dropped = registry.reset().await;
    tracing::info!(sessions = dropped, "Shutting down");

    served.map_err(|fault| anyhow::anyhow!("Server stopped: {fault}"))
}
