use anyhow::Context;
use axum::Router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sim_common::Config;
use sim_core::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::load();
    sim_core::rng::init(config.seed);
    tracing::info!(
        target: "cli",
        model = %config.display_model(),
        max_num_seqs = config.max_num_seqs,
        mode = ?config.mode,
        "starting synthetic inference server"
    );

    let port = config.port;
    let engine = Engine::start(config);
    let app: Router = sim_api::app(engine.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind 0.0.0.0:{port}"))?;
    tracing::info!(target: "cli", "listening on http://0.0.0.0:{port}");

    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(target: "cli", "shutdown signal received");
        engine.shutdown();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server loop exited with an error")?;
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
