use crate::checks::{set_full_identity_sql, tables_without_full_identity, PostgresChecks};
use crate::session::PgSessionOpener;
use async_trait::async_trait;
use cdc_core::{
    base_capture_config, CapabilityHandler, CaptureJobConfig, CaptureSettings, ConnectionProfile,
    EngineType, ReadinessEngine, Result, SessionOpener, ValidationReport,
};
use std::sync::Arc;
use tracing::{info, warn};

pub const CONNECTOR_CLASS: &str = "io.debezium.connector.postgresql.PostgresConnector";

/// Identifier limit of PostgreSQL (NAMEDATALEN - 1)
const MAX_IDENT_LEN: usize = 63;

const VERBATIM_PREFIX: &str = "cdc_";
const HASHED_PREFIX: &str = "cdch_";

/// Replication slot owned by the capture job of profile `id`.
///
/// Ids that already are short lowercase identifiers map to `cdc_<id>`. Every other
/// id is sanitized, cut down and suffixed with a hash of the original id under
/// `cdch_`, so the two forms never meet and rewritten ids stay apart.
pub fn slot_name(id: &str) -> String {
    let verbatim = id
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_'));
    if verbatim && VERBATIM_PREFIX.len() + id.len() <= MAX_IDENT_LEN {
        return format!("{}{}", VERBATIM_PREFIX, id);
    }

    let hash = format!("{:016x}", fnv1a_64(id));
    let room = MAX_IDENT_LEN - HASHED_PREFIX.len() - 1 - hash.len();
    let readable: String = id
        .chars()
        .take(room)
        .map(|c| match c.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9' | '_') => c,
            _ => '_',
        })
        .collect();
    format!("{}{}_{}", HASHED_PREFIX, readable, hash)
}

fn fnv1a_64(id: &str) -> u64 {
    id.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Publication created by the capture job of profile `id`
pub fn publication_name(id: &str) -> String {
    slot_name(id)
}

pub struct PostgresHandler {
    engine: ReadinessEngine<PostgresChecks>,
    settings: CaptureSettings,
}

impl PostgresHandler {
    pub fn new(settings: CaptureSettings) -> Self {
        let opener = Arc::new(PgSessionOpener::new(settings.call_timeout));
        Self::with_opener(opener, settings)
    }

    pub fn with_opener(opener: Arc<dyn SessionOpener>, settings: CaptureSettings) -> Self {
        Self {
            engine: ReadinessEngine::new(PostgresChecks, opener, settings.call_timeout),
            settings,
        }
    }
}

#[async_trait]
impl CapabilityHandler for PostgresHandler {
    fn engine(&self) -> EngineType {
        EngineType::Postgres
    }

    async fn validate(&self, profile: &ConnectionProfile) -> ValidationReport {
        info!("[{}] Validating PostgreSQL source", profile.id);
        self.engine.validate(profile).await
    }

    async fn fix(&self, profile: &ConnectionProfile) -> ValidationReport {
        info!("[{}] Fixing PostgreSQL source", profile.id);
        self.engine.fix(profile).await
    }

    async fn prepare_for_connector(&self, profile: &ConnectionProfile) -> Result<()> {
        let mut session = self.engine.open(profile).await?;
        let tables = tables_without_full_identity(session.as_mut(), profile).await?;

        let mut prepared = 0;
        for (schema, table) in &tables {
            match session.execute(&set_full_identity_sql(schema, table)).await {
                Ok(()) => prepared += 1,
                Err(e) => warn!(
                    "[{}] Could not set REPLICA IDENTITY FULL on {}.{}: {}",
                    profile.id, schema, table, e
                ),
            }
        }

        info!(
            "[{}] REPLICA IDENTITY FULL set on {} of {} table(s)",
            profile.id,
            prepared,
            tables.len()
        );
        Ok(())
    }

    fn capture_config(&self, profile: &ConnectionProfile) -> CaptureJobConfig {
        let mut config = base_capture_config(CONNECTOR_CLASS, profile, &self.settings);
        config
            .set("database.dbname", profile.database.clone())
            .set("plugin.name", "pgoutput")
            .set("slot.name", slot_name(&profile.id))
            .set("publication.name", publication_name(&profile.id))
            .set(
                "publication.autocreate.mode",
                if profile.tables.is_empty() {
                    "all_tables"
                } else {
                    "filtered"
                },
            );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{
        slots_usage, DATABASE_CREATE_PRIVILEGE, ROLE_ATTRIBUTES, SHOW_WAL_LEVEL,
        TABLES_WITHOUT_FULL_IDENTITY, WAL_SENDERS_USAGE,
    };
    use cdc_core::readiness::testing::{ScriptedOpener, ScriptedSession};
    use cdc_core::StepStatus;
    use std::collections::HashSet;

    fn profile() -> ConnectionProfile {
        let mut profile = ConnectionProfile::new(
            "orders",
            EngineType::Postgres,
            "localhost",
            5432,
            "postgres",
            "secret",
            "shop",
        );
        profile.id = "src1".to_string();
        profile
    }

    fn row(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    /// A source that passes every check
    fn healthy() -> ScriptedSession {
        let session = ScriptedSession::new();
        session
            .respond_scalar(SHOW_WAL_LEVEL, "logical")
            .respond(WAL_SENDERS_USAGE, vec![row(&["10", "1"])])
            .respond(&slots_usage("cdc_src1"), vec![row(&["10", "2", "0"])])
            .respond(ROLE_ATTRIBUTES, vec![row(&["t", "f"])])
            .respond_scalar(DATABASE_CREATE_PRIVILEGE, "t")
            .respond(TABLES_WITHOUT_FULL_IDENTITY, vec![]);
        session
    }

    fn handler(session: &ScriptedSession) -> PostgresHandler {
        PostgresHandler::with_opener(
            Arc::new(ScriptedOpener::new(session.clone())),
            CaptureSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_healthy_source_is_ready() {
        let session = healthy();
        let report = handler(&session).validate(&profile()).await;

        assert!(report.ready());
        let names: Vec<&str> = report.steps().iter().map(|s| s.step.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "connectivity",
                "wal_level",
                "max_wal_senders",
                "max_replication_slots",
                "replication_privilege",
                "database_privilege",
                "replica_identity"
            ]
        );
    }

    #[tokio::test]
    async fn test_wal_level_fix_makes_source_ready() {
        let session = healthy();
        session.respond_scalar(SHOW_WAL_LEVEL, "replica");
        session.on_execute(
            "ALTER SYSTEM SET wal_level = 'logical'",
            SHOW_WAL_LEVEL,
            vec![row(&["logical"])],
        );
        let handler = handler(&session);

        let report = handler.validate(&profile()).await;
        assert!(!report.ready());
        let step = report.step("wal_level").unwrap();
        assert_eq!(step.status, StepStatus::Error);
        assert!(step.remediation.is_some());

        let report = handler.fix(&profile()).await;
        assert!(report.ready());
        assert_eq!(
            session.executed(),
            vec!["ALTER SYSTEM SET wal_level = 'logical'".to_string()]
        );
    }

    #[tokio::test]
    async fn test_wal_level_pending_restart_is_warning() {
        let session = healthy();
        session.respond_scalar(SHOW_WAL_LEVEL, "replica");

        let report = handler(&session).fix(&profile()).await;
        assert!(report.ready());
        assert_eq!(
            report.step("wal_level").map(|s| s.status),
            Some(StepStatus::Warning)
        );
    }

    #[tokio::test]
    async fn test_fix_on_ready_source_changes_nothing() {
        let session = healthy();
        let report = handler(&session).fix(&profile()).await;

        assert!(report.ready());
        assert!(report.failed_step_names().is_empty());
        assert!(session.executed().is_empty());
    }

    #[tokio::test]
    async fn test_missing_privileges_are_granted() {
        let session = healthy();
        session
            .respond(ROLE_ATTRIBUTES, vec![row(&["f", "f"])])
            .respond_scalar(DATABASE_CREATE_PRIVILEGE, "f");
        session
            .on_execute(
                "ALTER ROLE \"postgres\" WITH REPLICATION",
                ROLE_ATTRIBUTES,
                vec![row(&["t", "f"])],
            )
            .on_execute(
                "GRANT CREATE ON DATABASE \"shop\" TO \"postgres\"",
                DATABASE_CREATE_PRIVILEGE,
                vec![row(&["t"])],
            );

        let handler = handler(&session);
        let report = handler.validate(&profile()).await;
        assert_eq!(
            report.failed_step_names(),
            vec![
                "replication_privilege".to_string(),
                "database_privilege".to_string()
            ]
        );

        let report = handler.fix(&profile()).await;
        assert!(report.ready());
        assert_eq!(session.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_fix_leaves_step_failing() {
        let session = healthy();
        session.respond(ROLE_ATTRIBUTES, vec![row(&["f", "f"])]);
        session.fail_on("ALTER ROLE \"postgres\" WITH REPLICATION");

        let report = handler(&session).fix(&profile()).await;
        assert!(!report.ready());
        assert_eq!(
            report.failed_step_names(),
            vec!["replication_privilege".to_string()]
        );
    }

    #[tokio::test]
    async fn test_exhausted_slots_fix_needs_restart() {
        let session = healthy();
        session.respond(&slots_usage("cdc_src1"), vec![row(&["2", "2", "0"])]);

        let handler = handler(&session);
        let report = handler.validate(&profile()).await;
        assert_eq!(
            report.failed_step_names(),
            vec!["max_replication_slots".to_string()]
        );

        let report = handler.fix(&profile()).await;
        assert!(report.ready());
        assert_eq!(
            session.executed(),
            vec!["ALTER SYSTEM SET max_replication_slots = 10".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_source_skips_every_check() {
        let handler = PostgresHandler::with_opener(
            Arc::new(ScriptedOpener::unreachable("connection refused")),
            CaptureSettings::default(),
        );
        let report = handler.validate(&profile()).await;

        assert!(!report.ready());
        assert_eq!(report.steps().len(), 7);
        assert!(report.steps()[0].message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_replica_identity_is_a_warning() {
        let session = healthy();
        session.respond(
            TABLES_WITHOUT_FULL_IDENTITY,
            vec![row(&["public", "orders"]), row(&["public", "items"])],
        );

        let report = handler(&session).validate(&profile()).await;
        assert!(report.ready());
        let step = report.step("replica_identity").unwrap();
        assert_eq!(step.status, StepStatus::Warning);
        assert!(step.message.contains("public.orders"));
    }

    #[tokio::test]
    async fn test_prepare_marks_tables_one_at_a_time() {
        let session = healthy();
        session.respond(
            TABLES_WITHOUT_FULL_IDENTITY,
            vec![row(&["public", "orders"]), row(&["public", "items"])],
        );
        session.fail_on("ALTER TABLE \"public\".\"orders\" REPLICA IDENTITY FULL");

        handler(&session)
            .prepare_for_connector(&profile())
            .await
            .unwrap();
        assert_eq!(
            session.executed(),
            vec!["ALTER TABLE \"public\".\"items\" REPLICA IDENTITY FULL".to_string()]
        );
    }

    #[tokio::test]
    async fn test_prepare_respects_table_filter() {
        let session = healthy();
        session.respond(
            TABLES_WITHOUT_FULL_IDENTITY,
            vec![row(&["public", "orders"]), row(&["public", "items"])],
        );
        let mut profile = profile();
        profile.tables = vec!["public.items".to_string()];

        handler(&session)
            .prepare_for_connector(&profile)
            .await
            .unwrap();
        assert_eq!(
            session.executed(),
            vec!["ALTER TABLE \"public\".\"items\" REPLICA IDENTITY FULL".to_string()]
        );
    }

    #[test]
    fn test_capture_config() {
        let handler = handler(&healthy());
        let config = handler.capture_config(&profile());

        assert_eq!(config.get("connector.class"), Some(CONNECTOR_CLASS));
        assert_eq!(config.get("database.hostname"), Some("host.docker.internal"));
        assert_eq!(config.get("database.dbname"), Some("shop"));
        assert_eq!(config.get("plugin.name"), Some("pgoutput"));
        assert_eq!(config.get("slot.name"), Some("cdc_src1"));
        assert_eq!(config.get("publication.autocreate.mode"), Some("all_tables"));
        assert_eq!(
            config.get("transforms.route.replacement"),
            Some("src1.all-changes")
        );
    }

    #[test]
    fn test_slot_name_is_valid_identifier() {
        assert_eq!(slot_name("src1"), "cdc_src1");
        for id in ["Ab-1", "ab-1", &"X".repeat(64)] {
            let name = slot_name(id);
            assert!(name.len() <= 63, "{} too long", name);
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }
    }

    #[test]
    fn test_distinct_ids_get_distinct_slots() {
        let long = "a".repeat(63);
        let ids = [
            "ab_1".to_string(),
            "Ab-1".to_string(),
            "ab-1".to_string(),
            "AB_1".to_string(),
            format!("{}1", long),
            format!("{}2", long),
            "a".repeat(59),
            "a".repeat(60),
            // Looks like the hashed form of another id
            format!("h_ab_1_{:016x}", fnv1a_64("Ab-1")),
        ];

        let names: HashSet<String> = ids.iter().map(|id| slot_name(id)).collect();
        assert_eq!(names.len(), ids.len());
        assert_eq!(publication_name("Ab-1"), slot_name("Ab-1"));
    }
}
