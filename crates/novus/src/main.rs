//! The assistant server.

#[macro_use]
extern crate tracing;

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use novus::config::Config;
use novus::session::{SessionFactory, SessionSettings, Sessions};
use novus::tools::{build_registry, http_client};
use novus_openai_model::OpenAIProvider;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "novus=info,tower_http=info";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    debug!("configuration: {config:?}");

    let registry = build_registry(&config.tools, http_client()?)?;
    info!("{} tools registered", registry.len());

    let provider = OpenAIProvider::new(config.openai.clone());
    let settings = SessionSettings {
        system_prompt: novus::SYSTEM_PROMPT.to_owned(),
        retry_policy: config.retry_policy,
        deferred_timeout: config.deferred_timeout,
    };
    let sessions = Arc::new(Sessions::new(SessionFactory::new(
        provider,
        Arc::new(registry),
        settings,
    )));

    let sweeper = sessions.spawn_sweeper(config.session_idle_timeout);

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");

    axum::serve(listener, novus::api::router(sessions))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    sweeper.abort();
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
