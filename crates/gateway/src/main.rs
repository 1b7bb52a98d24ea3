use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use es_gateway::api;
use es_gateway::bootstrap;
use es_gateway::cli::{Cli, Command, ConfigCommand};
use es_pipeline::cancel::CancelToken;
use es_pipeline::worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = es_gateway::cli::load_config(cli.config.as_ref())?;
            let issues = config.validate();
            for issue in &issues {
                tracing::warn!("config: {issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == es_domain::config::ConfigSeverity::Error)
            {
                anyhow::bail!("configuration has errors; see log output");
            }
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = es_gateway::cli::load_config(cli.config.as_ref())?;
            if !es_gateway::cli::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = es_gateway::cli::load_config(cli.config.as_ref())?;
            es_gateway::cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("echoscribe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server(config: Arc<es_domain::config::Config>) -> anyhow::Result<()> {
    let state = bootstrap::build_state(config.clone())
        .await
        .context("startup failed")?;

    // Worker tier: shares the API tier's state through PipelineContext.
    let shutdown = CancelToken::new();
    let workers = worker::spawn_workers(state.pipeline_context(), shutdown.clone());
    let _probes = bootstrap::spawn_health_probes(&state);

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, workers = config.pipeline.workers, "echoscribe listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    // Let workers finish their current job, then stop.
    shutdown.cancel();
    for handle in workers {
        let _ = handle.await;
    }
    Ok(())
}
