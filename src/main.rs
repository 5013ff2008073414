use deploy_hook::command::SystemCommandRunner;
use deploy_hook::config::DeployConfig;
use deploy_hook::error::{DeployError, Result};
use deploy_hook::logging::{FileLogger, setup_logging};
use deploy_hook::{AppState, api};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if let Err(e) = run().await {
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let file_logger = FileLogger::from_env()?;
    let _log_guard = setup_logging(file_logger.as_ref())?;

    // Refuse to start without a usable secret
    let config = DeployConfig::from_env()?;
    info!("Loaded configuration: {:?}", config);

    let runner = Arc::new(SystemCommandRunner::new(config.command_timeout));
    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config, runner));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|source| DeployError::BindFailed {
            address: bind_address.clone(),
            source,
        })?;
    info!("Listening on {}", bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}
