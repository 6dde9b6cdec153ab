use cdc_api::{ApiServer, AppState};
use cdc_config::{AppConfig, StorageBackend};
use cdc_config_store::UnifiedProfileStore;
use cdc_core::{
    connector_name_for, data_topic, schema_topic, ConnectorLifecycleManager, ProfileStore,
    Registry, StreamRelay,
};
use cdc_kafka_connect_gateway::KafkaConnectGateway;
use cdc_kafka_connector::{KafkaConfig, KafkaSubscriber};
use cdc_mysql_source::MySqlHandler;
use cdc_postgres_source::PostgresHandler;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cdc-cli")]
#[command(about = "CDC source onboarding and change streaming", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and change event relay
    Start {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },

    /// Load the configuration and list stored connection profiles
    Check {
        /// Path to configuration directory
        #[arg(short, long, default_value = "config")]
        config_dir: String,
    },
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let level = match config.logging.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder().with_max_level(level);
    if config.logging.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn open_store(config: &AppConfig, config_dir: &str) -> anyhow::Result<UnifiedProfileStore> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let url = config.storage.database_url.as_deref().ok_or_else(|| {
                anyhow::anyhow!("storage.database_url is required for the postgres backend")
            })?;
            info!("Using PostgreSQL profile storage");
            UnifiedProfileStore::from_postgres(url).await
        }
        StorageBackend::File => {
            let dir = config.storage_dir(config_dir);
            info!("Using file-based profile storage in {}", dir.display());
            Ok(UnifiedProfileStore::from_files(dir))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_dir } => {
            let app_config = AppConfig::load(&config_dir)?;
            init_tracing(&app_config)?;

            info!("Starting CDC system with config directory: {}", config_dir);

            let settings = app_config.capture_settings();
            let mut registry = Registry::new();
            registry.register(Arc::new(PostgresHandler::new(settings.clone())));
            registry.register(Arc::new(MySqlHandler::new(settings)));
            info!("Available engines: {:?}", registry.list_engines());

            let store = open_store(&app_config, &config_dir).await?;
            info!("Loaded {} profile(s)", store.list().await?.len());

            let gateway = KafkaConnectGateway::new(
                &app_config.capture.connect_url,
                app_config.call_timeout(),
            )?;
            info!("Capture service at {}", app_config.capture.connect_url);

            let lifecycle = Arc::new(ConnectorLifecycleManager::new(
                Arc::new(registry),
                Arc::new(gateway),
                Arc::new(store),
                app_config.call_timeout(),
            ));

            let subscriber = KafkaSubscriber::new(KafkaConfig {
                brokers: app_config.kafka.brokers.clone(),
                auto_offset_reset: app_config.kafka.auto_offset_reset.clone(),
                session_timeout_ms: app_config.kafka.session_timeout_ms,
            });
            let relay = Arc::new(StreamRelay::new(
                Arc::new(subscriber),
                app_config.relay_config(),
            ));

            let api = app_config.api.clone();
            let server = ApiServer::new(
                api.host.clone(),
                api.port,
                api.cors_enabled,
                AppState::new(lifecycle, relay),
            );

            info!("API server available at http://{}:{}", api.host, api.port);

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutting down CDC system...");
            };

            if let Err(e) = server.run(shutdown).await {
                error!("API server error: {}", e);
                return Err(e);
            }
        }

        Commands::Check { config_dir } => {
            let app_config = AppConfig::load(&config_dir)?;
            let store = open_store(&app_config, &config_dir).await?;
            let profiles = store.list().await?;

            println!("✓ Configuration is valid");
            println!("  Capture service: {}", app_config.capture.connect_url);
            println!("  Brokers: {}", app_config.kafka.brokers.join(","));
            println!("  Storage: {}", store.backend_name());

            println!("\n📦 Profiles: {}", profiles.len());
            for profile in &profiles {
                let prefix = profile.topic_prefix();
                println!(
                    "  • {} ({}, {}@{}:{}/{})",
                    profile.name,
                    profile.engine_type,
                    profile.username,
                    profile.host,
                    profile.port,
                    profile.database
                );
                println!("    capture job: {}", connector_name_for(&profile.id));
                println!(
                    "    topics: {}, {}",
                    data_topic(prefix),
                    schema_topic(prefix)
                );
            }
        }
    }

    Ok(())
}
