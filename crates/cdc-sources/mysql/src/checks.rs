use async_trait::async_trait;
use cdc_core::{
    ConnectionProfile, Error, FixOutcome, ReadinessChecks, Result, SqlSession, TextRows,
    ValidationStep,
};
use std::collections::BTreeSet;

pub const LOG_BIN: &str = "log_bin";
pub const BINLOG_FORMAT: &str = "binlog_format";
pub const BINLOG_ROW_IMAGE: &str = "binlog_row_image";
pub const REPLICATION_PRIVILEGES: &str = "replication_privileges";

const CHECKS: &[&str] = &[
    LOG_BIN,
    BINLOG_FORMAT,
    BINLOG_ROW_IMAGE,
    REPLICATION_PRIVILEGES,
];

pub(crate) const SHOW_GRANTS: &str = "SHOW GRANTS FOR CURRENT_USER()";

/// Global privileges the binlog reader needs
const REQUIRED_GLOBAL: &[&str] = &["RELOAD", "REPLICATION SLAVE", "REPLICATION CLIENT"];

pub(crate) fn show_variable(name: &str) -> String {
    format!("SHOW GLOBAL VARIABLES LIKE '{}'", name)
}

/// `Value` column of a `SHOW VARIABLES` result
fn variable_value(rows: &TextRows) -> Option<&str> {
    rows.first()
        .and_then(|row| row.get(1))
        .and_then(|v| v.as_deref())
}

/// Privileges held by the current user, per scope (`*.*`, `` `db`.* ``)
#[derive(Debug, Default)]
pub(crate) struct Grants {
    global: BTreeSet<String>,
    on_database: BTreeSet<String>,
}

impl Grants {
    pub(crate) fn parse(rows: &TextRows, database: &str) -> Self {
        let mut grants = Self::default();
        let db_scopes = [
            format!("`{}`.*", database),
            format!("{}.*", database),
        ];
        for line in rows.iter().filter_map(|r| r.first()).flatten() {
            let upper = line.to_uppercase();
            let Some(rest) = upper.strip_prefix("GRANT ") else {
                continue;
            };
            let Some((privileges, target)) = rest.split_once(" ON ") else {
                continue;
            };
            let scope = target.split(" TO ").next().unwrap_or_default().trim();
            let set = if scope == "*.*" {
                &mut grants.global
            } else if db_scopes.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
                &mut grants.on_database
            } else {
                continue;
            };
            set.extend(privileges.split(',').map(|p| p.trim().to_string()));
        }
        grants
    }

    fn has_all(&self) -> bool {
        self.global.contains("ALL PRIVILEGES") || self.global.contains("ALL")
    }

    /// Privileges still missing, in grant order
    pub(crate) fn missing(&self) -> Vec<&'static str> {
        if self.has_all() {
            return Vec::new();
        }
        let mut missing = Vec::new();
        let can_select = self.global.contains("SELECT")
            || self.on_database.contains("SELECT")
            || self.on_database.contains("ALL PRIVILEGES");
        if !can_select {
            missing.push("SELECT");
        }
        missing.extend(
            REQUIRED_GLOBAL
                .iter()
                .copied()
                .filter(|p| !self.global.contains(*p)),
        );
        missing
    }
}

/// Binlog readiness checks for MySQL
#[derive(Debug, Default, Clone)]
pub struct MySqlChecks;

impl MySqlChecks {
    async fn variable(
        &self,
        session: &mut dyn SqlSession,
        name: &str,
        expected: &str,
        remediation: &str,
    ) -> Result<ValidationStep> {
        let rows = session.query(&show_variable(name)).await?;
        let value = variable_value(&rows).unwrap_or_default();
        if value.eq_ignore_ascii_case(expected) {
            Ok(ValidationStep::success(
                name,
                format!("{} is '{}'", name, expected),
            ))
        } else {
            Ok(ValidationStep::error(
                name,
                format!("{} is '{}', must be '{}'", name, value, expected),
            )
            .with_remediation(remediation))
        }
    }

    async fn privileges(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
    ) -> Result<ValidationStep> {
        let rows = session.query(SHOW_GRANTS).await?;
        let missing = Grants::parse(&rows, &profile.database).missing();
        if missing.is_empty() {
            Ok(ValidationStep::success(
                REPLICATION_PRIVILEGES,
                format!("'{}' may read the binary log", profile.username),
            ))
        } else {
            Ok(ValidationStep::error(
                REPLICATION_PRIVILEGES,
                format!("'{}' lacks {}", profile.username, missing.join(", ")),
            )
            .with_remediation(grant_sql(&missing)))
        }
    }
}

fn grant_sql(privileges: &[&str]) -> String {
    format!("GRANT {} ON *.* TO CURRENT_USER()", privileges.join(", "))
}

#[async_trait]
impl ReadinessChecks for MySqlChecks {
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
            LOG_BIN => {
                self.variable(
                    session,
                    LOG_BIN,
                    "ON",
                    "Start mysqld with --log-bin (set log_bin in my.cnf) and restart the server",
                )
                .await
            }
            BINLOG_FORMAT => {
                self.variable(
                    session,
                    BINLOG_FORMAT,
                    "ROW",
                    "SET PERSIST binlog_format = 'ROW'",
                )
                .await
            }
            BINLOG_ROW_IMAGE => {
                self.variable(
                    session,
                    BINLOG_ROW_IMAGE,
                    "FULL",
                    "SET PERSIST binlog_row_image = 'FULL'",
                )
                .await
            }
            REPLICATION_PRIVILEGES => self.privileges(session, profile).await,
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
            LOG_BIN => Ok(FixOutcome::NotFixable(
                "the binary log can only be enabled at server start".to_string(),
            )),
            BINLOG_FORMAT => {
                session.execute("SET PERSIST binlog_format = 'ROW'").await?;
                Ok(FixOutcome::Applied)
            }
            BINLOG_ROW_IMAGE => {
                session.execute("SET PERSIST binlog_row_image = 'FULL'").await?;
                Ok(FixOutcome::Applied)
            }
            REPLICATION_PRIVILEGES => {
                let rows = session.query(SHOW_GRANTS).await?;
                let missing = Grants::parse(&rows, &profile.database).missing();
                if !missing.is_empty() {
                    session.execute(&grant_sql(&missing)).await?;
                }
                Ok(FixOutcome::Applied)
            }
            other => Ok(FixOutcome::NotFixable(format!("Unknown check '{}'", other))),
        }
    }
}
