mod config;
mod importer;

use common::postgres::{MigrationRunner, PostgresClient};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use config::{ServiceConfig, StorageBackend};
use fleet_engine::{FleetEngine, FleetStorage};
use importer::import_readings;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&config.telemetry())
    {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        storage_backend = ?config.storage_backend,
        "Starting fleet-all-in-one"
    );
    debug!("Configuration: {:?}", config);

    let exit_code = match run(&config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("fleet-all-in-one failed: {:#}", e);
            1
        }
    };

    shutdown_telemetry(telemetry_providers);
    std::process::exit(exit_code);
}

async fn run(config: &ServiceConfig) -> anyhow::Result<()> {
    let storage = initialize_storage(config).await?;
    let engine = FleetEngine::new(config.engine(), storage)?;

    let Some(path) = config.import_file.as_deref() else {
        info!("no import file configured, storage is ready");
        return Ok(());
    };

    let cancellation = CancellationToken::new();
    spawn_signal_handlers(cancellation.clone());

    info!(path, batch_size = config.import_batch_size, "importing readings");
    let file = File::open(path).await?;
    let summary = import_readings(
        &engine,
        BufReader::new(file),
        config.import_batch_size,
        cancellation,
    )
    .await?;

    if summary.cancelled {
        info!(ingested = summary.ingested, "import interrupted by shutdown signal");
    }
    Ok(())
}

async fn initialize_storage(config: &ServiceConfig) -> anyhow::Result<FleetStorage> {
    match config.storage_backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Ok(FleetStorage::in_memory())
        }
        StorageBackend::Postgres => {
            info!("Initializing PostgreSQL...");
            let postgres_config = config.postgres();
            MigrationRunner::from_config(&postgres_config)
                .run_migrations()
                .await?;
            let client = PostgresClient::new(&postgres_config)?;
            client.ping().await?;
            Ok(FleetStorage::postgres(client))
        }
    }
}

/// Cancels the token on Ctrl-C or SIGTERM so the in-flight batch rolls back
fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                error!("Error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal");
                token.cancel();
            }
            Err(err) => {
                error!("Error setting up SIGTERM handler: {}", err);
            }
        }
    });
}
