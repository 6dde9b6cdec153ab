use crate::checks::MySqlChecks;
use crate::session::MySqlSessionOpener;
use async_trait::async_trait;
use cdc_core::{
    base_capture_config, CapabilityHandler, CaptureJobConfig, CaptureSettings, ConnectionProfile,
    EngineType, ReadinessEngine, Result, SessionOpener, ValidationReport,
};
use std::sync::Arc;
use tracing::info;

pub const CONNECTOR_CLASS: &str = "io.debezium.connector.mysql.MySqlConnector";

/// Lowest server id handed out; keeps clear of ids usually given to real replicas
const SERVER_ID_BASE: u32 = 5400;

/// Replication client id of the capture job of profile `id`.
///
/// FNV-1a over the id, so re-registering a profile keeps its id.
pub fn server_id(id: &str) -> u32 {
    let hash = id.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    });
    SERVER_ID_BASE + hash % (i32::MAX as u32 - SERVER_ID_BASE)
}

pub struct MySqlHandler {
    engine: ReadinessEngine<MySqlChecks>,
    settings: CaptureSettings,
}

impl MySqlHandler {
    pub fn new(settings: CaptureSettings) -> Self {
        Self::with_opener(Arc::new(MySqlSessionOpener), settings)
    }

    pub fn with_opener(opener: Arc<dyn SessionOpener>, settings: CaptureSettings) -> Self {
        Self {
            engine: ReadinessEngine::new(MySqlChecks, opener, settings.call_timeout),
            settings,
        }
    }
}

#[async_trait]
impl CapabilityHandler for MySqlHandler {
    fn engine(&self) -> EngineType {
        EngineType::Mysql
    }

    async fn validate(&self, profile: &ConnectionProfile) -> ValidationReport {
        info!("[{}] Validating MySQL source", profile.id);
        self.engine.validate(profile).await
    }

    async fn fix(&self, profile: &ConnectionProfile) -> ValidationReport {
        info!("[{}] Fixing MySQL source", profile.id);
        self.engine.fix(profile).await
    }

    async fn prepare_for_connector(&self, profile: &ConnectionProfile) -> Result<()> {
        // Row images are server-wide and already covered by binlog_row_image.
        info!("[{}] No per-table preparation needed for MySQL", profile.id);
        Ok(())
    }

    fn capture_config(&self, profile: &ConnectionProfile) -> CaptureJobConfig {
        let mut config = base_capture_config(CONNECTOR_CLASS, profile, &self.settings);
        config
            .set("database.server.id", server_id(&profile.id).to_string())
            .set("database.include.list", profile.database.clone())
            .set("include.schema.changes", "true")
            .set(
                "schema.history.internal.kafka.bootstrap.servers",
                self.settings.history_bootstrap_servers.clone(),
            )
            .set(
                "schema.history.internal.kafka.topic",
                format!("{}.schema-history", profile.id),
            );
        config
    }
}
