//! Readiness engine shared by the capability handlers.
//!
//! A handler supplies its ordered list of checks and the corrective action for
//! each; the engine owns the session handling, the "every check always runs"
//! rule, connectivity short-circuiting and the two-pass fix procedure.

use crate::validation::CONNECTIVITY_STEP;
use crate::{ConnectionProfile, Error, Result, ValidationReport, ValidationStep};
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Rows of a text-mode query result
pub type TextRows = Vec<Vec<Option<String>>>;

/// Short-lived administrative session against a source database
#[async_trait]
pub trait SqlSession: Send {
    /// Run a query, returning every column as text
    async fn query(&mut self, sql: &str) -> Result<TextRows>;

    /// Run a statement that returns no rows
    async fn execute(&mut self, sql: &str) -> Result<()>;
}

/// Opens sessions for a profile
#[async_trait]
pub trait SessionOpener: Send + Sync {
    async fn open(&self, profile: &ConnectionProfile) -> Result<Box<dyn SqlSession>>;
}

/// Result of a corrective action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    Applied,
    /// Setting written, effective after the database server restarts
    RestartRequired,
    /// No online correction exists; the operator must act
    NotFixable(String),
}

/// Engine-specific readiness checks
#[async_trait]
pub trait ReadinessChecks: Send + Sync {
    /// Checks run after connectivity, in report order
    fn check_names(&self) -> &'static [&'static str];

    async fn run_check(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
        name: &str,
    ) -> Result<ValidationStep>;

    async fn apply_fix(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
        name: &str,
    ) -> Result<FixOutcome>;
}

pub struct ReadinessEngine<C> {
    checks: C,
    opener: Arc<dyn SessionOpener>,
    call_timeout: Duration,
}

impl<C: ReadinessChecks> ReadinessEngine<C> {
    pub fn new(checks: C, opener: Arc<dyn SessionOpener>, call_timeout: Duration) -> Self {
        Self {
            checks,
            opener,
            call_timeout,
        }
    }

    /// Open a session, bounded by the call timeout
    pub async fn open(&self, profile: &ConnectionProfile) -> Result<Box<dyn SqlSession>> {
        bounded(
            self.call_timeout,
            "opening database session",
            self.opener.open(profile),
        )
        .await
    }

    pub async fn validate(&self, profile: &ConnectionProfile) -> ValidationReport {
        match self.open(profile).await {
            Ok(mut session) => self.run_all(session.as_mut(), profile).await,
            Err(e) => {
                warn!("[{}] Source unreachable: {}", profile.id, e);
                ValidationReport::unreachable(e.to_string(), self.checks.check_names())
            }
        }
    }

    pub async fn fix(&self, profile: &ConnectionProfile) -> ValidationReport {
        let mut session = match self.open(profile).await {
            Ok(session) => session,
            Err(e) => {
                warn!("[{}] Cannot fix unreachable source: {}", profile.id, e);
                return ValidationReport::unreachable(e.to_string(), self.checks.check_names());
            }
        };

        let first_pass = self.run_all(session.as_mut(), profile).await;
        let mut pending_restart = HashSet::new();

        for step in first_pass.failed_steps() {
            if step.step == CONNECTIVITY_STEP {
                continue;
            }
            let outcome = bounded(
                self.call_timeout,
                "applying fix",
                self.checks.apply_fix(session.as_mut(), profile, &step.step),
            )
            .await;
            match outcome {
                Ok(FixOutcome::Applied) => {
                    info!("[{}] Applied fix for '{}'", profile.id, step.step);
                }
                Ok(FixOutcome::RestartRequired) => {
                    info!(
                        "[{}] Applied fix for '{}', database restart required",
                        profile.id, step.step
                    );
                    pending_restart.insert(step.step.clone());
                }
                Ok(FixOutcome::NotFixable(reason)) => {
                    warn!("[{}] '{}' cannot be fixed online: {}", profile.id, step.step, reason);
                }
                Err(e) => {
                    warn!("[{}] Fix for '{}' failed: {}", profile.id, step.step, e);
                }
            }
        }
        drop(session);

        self.validate(profile)
            .await
            .with_pending_restarts(&pending_restart)
    }

    async fn run_all(
        &self,
        session: &mut dyn SqlSession,
        profile: &ConnectionProfile,
    ) -> ValidationReport {
        let mut steps = vec![ValidationStep::success(
            CONNECTIVITY_STEP,
            format!(
                "Connected to {}:{}/{}",
                profile.host, profile.port, profile.database
            ),
        )];

        for name in self.checks.check_names() {
            let step = bounded(
                self.call_timeout,
                "running check",
                self.checks.run_check(&mut *session, profile, name),
            )
            .await
            .unwrap_or_else(|e| ValidationStep::error(*name, format!("Check failed: {}", e)));
            steps.push(step);
        }

        ValidationReport::from_steps(steps)
    }
}

/// Bound an external call; running out of time is a connection error.
pub async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Connection(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}

/// First column of the first row, if any
pub fn scalar(rows: &TextRows) -> Option<&str> {
    rows.first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_deref())
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    //! Scripted sessions for exercising handlers without a database.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        responses: HashMap<String, TextRows>,
        effects: HashMap<String, Vec<(String, TextRows)>>,
        failing: HashSet<String>,
        executed: Vec<String>,
    }

    /// Session answering queries from a script; statements can rewrite answers.
    #[derive(Clone, Default)]
    pub struct ScriptedSession {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedSession {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, sql: &str, rows: TextRows) -> &Self {
            self.lock().responses.insert(sql.to_string(), rows);
            self
        }

        pub fn respond_scalar(&self, sql: &str, value: &str) -> &Self {
            self.respond(sql, vec![vec![Some(value.to_string())]])
        }

        /// After `statement` executes, `sql` answers with `rows`
        pub fn on_execute(&self, statement: &str, sql: &str, rows: TextRows) -> &Self {
            self.lock()
                .effects
                .entry(statement.to_string())
                .or_default()
                .push((sql.to_string(), rows));
            self
        }

        pub fn fail_on(&self, statement: &str) -> &Self {
            self.lock().failing.insert(statement.to_string());
            self
        }

        pub fn executed(&self) -> Vec<String> {
            self.lock().executed.clone()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
            self.script.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    #[async_trait]
    impl SqlSession for ScriptedSession {
        async fn query(&mut self, sql: &str) -> Result<TextRows> {
            self.lock()
                .responses
                .get(sql)
                .cloned()
                .ok_or_else(|| Error::Connection(format!("unscripted query: {}", sql)))
        }

        async fn execute(&mut self, sql: &str) -> Result<()> {
            let mut script = self.lock();
            if script.failing.contains(sql) {
                return Err(Error::Connection(format!("permission denied: {}", sql)));
            }
            script.executed.push(sql.to_string());
            if let Some(effects) = script.effects.get(sql).cloned() {
                for (query, rows) in effects {
                    script.responses.insert(query, rows);
                }
            }
            Ok(())
        }
    }

    /// Opener handing out clones of one scripted session
    #[derive(Clone, Default)]
    pub struct ScriptedOpener {
        pub session: ScriptedSession,
        pub unreachable: Option<String>,
    }

    impl ScriptedOpener {
        pub fn new(session: ScriptedSession) -> Self {
            Self {
                session,
                unreachable: None,
            }
        }

        pub fn unreachable(reason: &str) -> Self {
            Self {
                session: ScriptedSession::new(),
                unreachable: Some(reason.to_string()),
            }
        }
    }

    #[async_trait]
    impl SessionOpener for ScriptedOpener {
        async fn open(&self, _profile: &ConnectionProfile) -> Result<Box<dyn SqlSession>> {
            match &self.unreachable {
                Some(reason) => Err(Error::Connection(reason.clone())),
                None => Ok(Box::new(self.session.clone())),
            }
        }
    }
}
