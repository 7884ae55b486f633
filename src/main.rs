use std::process::ExitCode;
use std::sync::Arc;

use bizseed::api::start_api_server;
use bizseed::api::types::generate_token;
use bizseed::config::{self, SeedConfig, ENV_PREFIX};
use bizseed::core_state::CoreState;

#[tokio::main]
async fn main() -> ExitCode {
    bizseed::init_tracing();
    let config = SeedConfig::from_env();

    tracing::info!(
        version = config::APP_VERSION,
        db = %config.db_path.display(),
        sink = config.sink.kind(),
        geocoder = config.geocoder_enabled,
        "bizseed starting"
    );

    if config.admin_token.is_none() {
        tracing::warn!(
            suggestion = %generate_token(),
            "{ENV_PREFIX}ADMIN_TOKEN is not set; admin routes will refuse every request"
        );
    }

    let core = Arc::new(CoreState::new(config));

    // Create and migrate the database before accepting requests.
    let migrate = {
        let core = core.clone();
        tokio::task::spawn_blocking(move || core.open_db().map(drop)).await
    };
    match migrate {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("Cannot open database: {e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::error!("Database startup task failed: {e}");
            return ExitCode::FAILURE;
        }
    }

    let mut server = match start_api_server(core).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(addr = %server.info.server_addr, "Listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {e}");
    }
    server.shutdown();
    server.stopped().await;
    ExitCode::SUCCESS
}
