//! execbox HTTP gateway
//!
//! Serves the execution API over HTTP. Sandboxes left by a previous process
//! are reaped at startup; live ones are torn down on Ctrl-C.

use clap::Parser;
use execbox::config::{validate_config, Config};
use execbox::gateway::{build_router, GatewayState};
use execbox::sandbox::DockerRuntime;
use execbox::telemetry::init_tracing;
use execbox::tools::ToolDispatcher;
use execbox::ExecutionOrchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "execbox-gateway", version = execbox::VERSION, about = "execbox HTTP gateway")]
struct Args {
    /// Bind address (overrides configuration)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides configuration)
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_env()?;
    init_tracing(&config.logging);

    let validation = validate_config(&config);
    for issue in &validation.warnings {
        warn!("Config: {}", issue);
    }
    if !validation.valid {
        for issue in &validation.errors {
            error!("Config: {}", issue);
        }
        anyhow::bail!("Invalid configuration");
    }

    let runtime = DockerRuntime::connect(&config.sandbox).await?;
    let orchestrator = Arc::new(ExecutionOrchestrator::from_config(
        &config,
        Arc::new(runtime),
        Arc::new(ToolDispatcher::new()),
    )?);

    match orchestrator.manager().reap_orphans().await {
        Ok(0) => {}
        Ok(n) => info!("Reaped {} orphaned sandbox(es)", n),
        Err(e) => warn!("Failed to reap orphaned sandboxes: {}", e),
    }

    let state = GatewayState::new(orchestrator.clone(), config.gateway.admin_token.clone());
    let app = build_router(state);

    let bind = args.bind.unwrap_or(config.gateway.bind);
    let port = args.port.unwrap_or(config.gateway.port);
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Gateway listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    if let Err(e) = orchestrator.manager().cleanup_all().await {
        error!(target: "execbox::alert", "Failed to clean up sandboxes on shutdown: {}", e);
    }

    Ok(())
}
