use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use atoll_auth::{AllowAllAuthenticator, AuthRegistry};
use atoll_server::broker::{self, BrokerState};
use atoll_server::config::ServerConfig;
use atoll_server::coordination;
use atoll_server::report::MetricsReporter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(coordinator = %config.coordinator_url, "atoll comm-server starting");

    // Deployments wire real credential validators here; out of the box the
    // configured method maps to the permissive authenticator.
    let mut auth = AuthRegistry::new();
    auth.add_or_update(
        config.auth_method.clone(),
        Arc::new(AllowAllAuthenticator::new(config.auth_method.clone())),
    );
    let auth = Arc::new(auth);

    let (cmd_tx, cmd_rx) = mpsc::channel(1024);
    // An unreachable coordinator at boot is a startup failure (exit 1).
    let coordinator_tx = coordination::connect(&config, &auth, cmd_tx.clone()).await?;

    let state = BrokerState::new(
        config,
        auth,
        Box::new(MetricsReporter),
        coordinator_tx,
        cmd_tx,
    );
    broker::run(state, cmd_rx).await;
    Ok(())
}
