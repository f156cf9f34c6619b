use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use linkedin_agent::{AgentConfig, BIND_ENV, LinkedInAgent, api};

const DEFAULT_BIND: &str = "0.0.0.0:8000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = AgentConfig::from_env()?;
    let presence = config.credential_presence();
    if !(presence.username_set && presence.password_set) {
        log::warn!(
            "LinkedIn credentials not provided (username set: {}, password set: {}); profile requests will fail",
            presence.username_set,
            presence.password_set
        );
    }

    let agent = Arc::new(LinkedInAgent::new(config)?);
    if let Err(error) = agent.initialize().await {
        log::warn!("serving without an upstream session, see /api/startup-info: {error}");
    }

    let bind = std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let addr: SocketAddr = bind.parse()?;
    let listener = TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");

    axum::serve(listener, api::create_router(agent).into_make_service()).await?;
    Ok(())
}
