use std::sync::Arc;

use tracing::info;

use atoll_auth::{AllowAllAuthenticator, AuthRegistry};
use atoll_coordinator::config::CoordinatorConfig;
use atoll_coordinator::selector::RegistrationOrderSelector;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = CoordinatorConfig::from_env()?;
    info!(bind = %config.bind, "atoll coordinator starting");

    // Deployments wire real credential validators here; out of the box every
    // configured method name maps to the permissive authenticator.
    let mut auth = AuthRegistry::new();
    for method in &config.auth_methods {
        auth.add_or_update(method, Arc::new(AllowAllAuthenticator::new(method.clone())));
    }

    let handle = atoll_coordinator::start(
        config,
        Arc::new(auth),
        Box::new(RegistrationOrderSelector::new()),
    )
    .await?;

    handle.serve_task.await??;
    Ok(())
}
