use anyhow::anyhow;
use async_trait::async_trait;
use cdc_core::{
    scalar, ConnectionProfile, Error, FixOutcome, ReadinessChecks, Result, SqlSession, TextRows,
    ValidationStep,
};

use crate::postgres_handler::slot_name;

pub const WAL_LEVEL: &str = "wal_level";
pub const MAX_WAL_SENDERS: &str = "max_wal_senders";
pub const MAX_REPLICATION_SLOTS: &str = "max_replication_slots";
pub const REPLICATION_PRIVILEGE: &str = "replication_privilege";
pub const DATABASE_PRIVILEGE: &str = "database_privilege";
pub const REPLICA_IDENTITY: &str = "replica_identity";

const CHECKS: &[&str] = &[
    WAL_LEVEL,
    MAX_WAL_SENDERS,
    MAX_REPLICATION_SLOTS,
    REPLICATION_PRIVILEGE,
    DATABASE_PRIVILEGE,
    REPLICA_IDENTITY,
];

pub(crate) const SHOW_WAL_LEVEL: &str = "SHOW wal_level";
pub(crate) const WAL_SENDERS_USAGE: &str =
    "SELECT current_setting('max_wal_senders'), (SELECT count(*) FROM pg_stat_replication)";
pub(crate) const ROLE_ATTRIBUTES: &str =
    "SELECT rolreplication, rolsuper FROM pg_roles WHERE rolname = current_user";
pub(crate) const DATABASE_CREATE_PRIVILEGE: &str =
    "SELECT has_database_privilege(current_user, current_database(), 'CREATE')";
pub(crate) const TABLES_WITHOUT_FULL_IDENTITY: &str = "SELECT n.nspname, c.relname \
     FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
     WHERE c.relkind IN ('r', 'p') AND c.relreplident <> 'f' \
     AND n.nspname NOT IN ('pg_catalog', 'information_schema') \
     AND n.nspname NOT LIKE 'pg_toast%' \
     ORDER BY 1, 2";

/// Minimum sender/slot capacity written by the fixes
const MIN_CAPACITY: i64 = 10;

pub(crate) fn slots_usage(slot: &str) -> String {
    format!(
        "SELECT current_setting('max_replication_slots'), \
         (SELECT count(*) FROM pg_replication_slots), \
         (SELECT count(*) FROM pg_replication_slots WHERE slot_name = '{}')",
        slot.replace('\'', "''")
    )
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn set_full_identity_sql(schema: &str, table: &str) -> String {
    format!(
        "ALTER TABLE {}.{} REPLICA IDENTITY FULL",
        quote_ident(schema),
        quote_ident(table)
    )
}

/// User tables in capture scope whose replica identity is not FULL
pub(crate) async fn tables_without_full_identity(
    session: &mut dyn SqlSession,
    profile: &ConnectionProfile,
) -> Result<Vec<(String, String)>> {
    let rows = session.query(TABLES_WITHOUT_FULL_IDENTITY).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match (row.first(), row.get(1)) {
            (Some(Some(schema)), Some(Some(table))) => Some((schema.clone(), table.clone())),
            _ => None,
        })
        .filter(|(schema, table)| {
            profile.tables.is_empty() || profile.tables.contains(&format!("{}.{}", schema, table))
        })
        .collect())
}

fn is_true(value: Option<&str>) -> bool {
    matches!(value, Some("t") | Some("true") | Some("on"))
}

fn integers(rows: &TextRows, what: &str) -> Result<Vec<i64>> {
    let row = rows
        .first()
        .ok_or_else(|| Error::Generic(anyhow!("no result for {}", what)))?;
    row.iter()
        .map(|v| {
            v.as_deref()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .ok_or_else(|| Error::Generic(anyhow!("unexpected value {:?} for {}", v, what)))
        })
        .collect()
}

fn column(values: &[i64], i: usize) -> i64 {
    values.get(i).copied().unwrap_or_default()
}

/// Logical-replication readiness checks for PostgreSQL
#[derive(Debug, Default, Clone)]
pub struct PostgresChecks;

impl PostgresChecks {
    async fn wal_level(&self, session: &mut dyn SqlSession) -> Result<ValidationStep> {
        let rows = session.query(SHOW_WAL_LEVEL).await?;
        let level = scalar(&rows).unwrap_or_default();
        if level == "logical" {
            Ok(ValidationStep::success(WAL_LEVEL, "wal_level is 'logical'"))
        } else {
            Ok(ValidationStep::error(
                WAL_LEVEL,
                format!("wal_level is '{}', must be 'logical'", level),
            )
            .with_remediation("ALTER SYSTEM SET wal_level = 'logical'; then restart PostgreSQL"))
        }
    }

    async fn wal_senders(&self, session: &mut dyn SqlSession) -> Result<ValidationStep> {
        let values = integers(&session.query(WAL_SENDERS_USAGE).await?, MAX_WAL_SENDERS)?;
        let (max, used) = (column(&values, 0), column(&values, 1));
        let remediation = format!(
            "ALTER SYSTEM SET max_wal_senders = {}; then restart PostgreSQL",
            MIN_CAPACITY.max(used + 4)
        );
        if max == 0 {
            Ok(ValidationStep::error(MAX_WAL_SENDERS, "max_wal_senders is 0")
                .with_remediation(remediation))
        } else if used >= max {
            Ok(ValidationStep::error(
                MAX_WAL_SENDERS,
                format!("All {} WAL senders are in use", max),
            )
            .with_remediation(remediation))
        } else {
            Ok(ValidationStep::success(
                MAX_WAL_SENDERS,
                format!("{} of {} WAL senders in use", used, max),
            ))
        }
    }

    async fn replication_slots(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
    ) -> Result<ValidationStep> {
        let values = integers(
            &session.query(&slots_usage(&slot_name(&profile.id))).await?,
            MAX_REPLICATION_SLOTS,
        )?;
        let (max, used, own) = (column(&values, 0), column(&values, 1), column(&values, 2));
        let remediation = format!(
            "ALTER SYSTEM SET max_replication_slots = {}; then restart PostgreSQL",
            MIN_CAPACITY.max(used + 4)
        );
        if max == 0 {
            Ok(
                ValidationStep::error(MAX_REPLICATION_SLOTS, "max_replication_slots is 0")
                    .with_remediation(remediation),
            )
        } else if own > 0 {
            Ok(ValidationStep::success(
                MAX_REPLICATION_SLOTS,
                "Replication slot for this source already exists",
            ))
        } else if used >= max {
            Ok(ValidationStep::error(
                MAX_REPLICATION_SLOTS,
                format!("All {} replication slots are taken", max),
            )
            .with_remediation(remediation))
        } else {
            Ok(ValidationStep::success(
                MAX_REPLICATION_SLOTS,
                format!("{} of {} replication slots in use", used, max),
            ))
        }
    }

    async fn replication_privilege(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
    ) -> Result<ValidationStep> {
        let rows = session.query(ROLE_ATTRIBUTES).await?;
        let row = rows.first();
        let attribute = |i: usize| row.and_then(|r| r.get(i)).and_then(|v| v.as_deref());
        if is_true(attribute(1)) {
            Ok(ValidationStep::success(
                REPLICATION_PRIVILEGE,
                format!("'{}' is a superuser", profile.username),
            ))
        } else if is_true(attribute(0)) {
            Ok(ValidationStep::success(
                REPLICATION_PRIVILEGE,
                format!("'{}' has the REPLICATION attribute", profile.username),
            ))
        } else {
            Ok(ValidationStep::error(
                REPLICATION_PRIVILEGE,
                format!("'{}' lacks the REPLICATION attribute", profile.username),
            )
            .with_remediation(format!(
                "ALTER ROLE {} WITH REPLICATION",
                quote_ident(&profile.username)
            )))
        }
    }

    async fn database_privilege(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
    ) -> Result<ValidationStep> {
        let rows = session.query(DATABASE_CREATE_PRIVILEGE).await?;
        if is_true(scalar(&rows)) {
            Ok(ValidationStep::success(
                DATABASE_PRIVILEGE,
                format!("'{}' may create publications", profile.username),
            ))
        } else {
            Ok(ValidationStep::error(
                DATABASE_PRIVILEGE,
                format!(
                    "'{}' lacks CREATE on database '{}'",
                    profile.username, profile.database
                ),
            )
            .with_remediation(grant_create_sql(profile)))
        }
    }

    async fn replica_identity(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
    ) -> Result<ValidationStep> {
        let tables = tables_without_full_identity(session, profile).await?;
        if tables.is_empty() {
            return Ok(ValidationStep::success(
                REPLICA_IDENTITY,
                "Every captured table uses REPLICA IDENTITY FULL",
            ));
        }
        let names: Vec<String> = tables
            .iter()
            .take(5)
            .map(|(schema, table)| format!("{}.{}", schema, table))
            .collect();
        let more = if tables.len() > names.len() { ", ..." } else { "" };
        Ok(ValidationStep::warning(
            REPLICA_IDENTITY,
            format!(
                "{} table(s) without REPLICA IDENTITY FULL: {}{}; updates will lack old values",
                tables.len(),
                names.join(", "),
                more
            ),
        )
        .with_remediation("Applied automatically when the capture job is registered"))
    }
}

fn grant_create_sql(profile: &ConnectionProfile) -> String {
    format!(
        "GRANT CREATE ON DATABASE {} TO {}",
        quote_ident(&profile.database),
        quote_ident(&profile.username)
    )
}

#[async_trait]
impl ReadinessChecks for PostgresChecks {
    fn check_names(&self) -> &'static [&'static str] {
        CHECKS
    }

    async fn run_check(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
        name: &str,
    ) -> Result<ValidationStep> {
        match name {
            WAL_LEVEL => self.wal_level(session).await,
            MAX_WAL_SENDERS => self.wal_senders(session).await,
            MAX_REPLICATION_SLOTS => self.replication_slots(session, profile).await,
            REPLICATION_PRIVILEGE => self.replication_privilege(session, profile).await,
            DATABASE_PRIVILEGE => self.database_privilege(session, profile).await,
            REPLICA_IDENTITY => self.replica_identity(session, profile).await,
            other => Err(Error::Configuration(format!("Unknown check '{}'", other))),
        }
    }

    async fn apply_fix(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
        name: &str,
    ) -> Result<FixOutcome> {
        match name {
            WAL_LEVEL => {
                session
                    .execute("ALTER SYSTEM SET wal_level = 'logical'")
                    .await?;
                Ok(FixOutcome::RestartRequired)
            }
            MAX_WAL_SENDERS => {
                let values = integers(&session.query(WAL_SENDERS_USAGE).await?, name)?;
                let target = MIN_CAPACITY.max(column(&values, 1) + 4);
                session
                    .execute(&format!("ALTER SYSTEM SET max_wal_senders = {}", target))
                    .await?;
                Ok(FixOutcome::RestartRequired)
            }
            MAX_REPLICATION_SLOTS => {
                let values = integers(
                    &session.query(&slots_usage(&slot_name(&profile.id))).await?,
                    name,
                )?;
                let target = MIN_CAPACITY.max(column(&values, 1) + 4);
                session
                    .execute(&format!(
                        "ALTER SYSTEM SET max_replication_slots = {}",
                        target
                    ))
                    .await?;
                Ok(FixOutcome::RestartRequired)
            }
            REPLICATION_PRIVILEGE => {
                session
                    .execute(&format!(
                        "ALTER ROLE {} WITH REPLICATION",
                        quote_ident(&profile.username)
                    ))
                    .await?;
                Ok(FixOutcome::Applied)
            }
            DATABASE_PRIVILEGE => {
                session.execute(&grant_create_sql(profile)).await?;
                Ok(FixOutcome::Applied)
            }
            REPLICA_IDENTITY => {
                for (schema, table) in tables_without_full_identity(session, profile).await? {
                    session.execute(&set_full_identity_sql(&schema, &table)).await?;
                }
                Ok(FixOutcome::Applied)
            }
            other => Ok(FixOutcome::NotFixable(format!("Unknown check '{}'", other))),
        }
    }
}
