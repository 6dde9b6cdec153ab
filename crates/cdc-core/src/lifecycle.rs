//! Connector lifecycle: validate, prepare, register and persist a profile, or
//! delete it and unregister its capture job.

use crate::profile::connector_name_for;
use crate::readiness::bounded;
use crate::{
    CaptureGateway, CaptureJobConfig, ConnectionProfile, EngineType, Error, ProfileStore,
    ReadinessState, Registry, RegistrationFailure, Result, ValidationReport,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{error, info, warn};

/// Result of deleting a profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub id: String,
    pub connector_name: String,
    /// A live capture job was found and removed
    pub unregistered: bool,
    /// Set when unregistration failed; the deletion still stands
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveMode {
    Create,
    Update,
}

type LockMap = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Holds one keyed lock. Dropping it also clears entries nobody holds any more,
/// including those left by cancelled waiters.
struct KeyedGuard<'a> {
    locks: &'a LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

fn profile_key(id: &str) -> String {
    format!("profile:{}", id)
}

/// Fixes act on the database server, so they are keyed by source, not by id.
fn source_key(profile: &ConnectionProfile) -> String {
    format!(
        "source:{}://{}:{}/{}",
        profile.engine_type,
        profile.host.to_ascii_lowercase(),
        profile.port,
        profile.database
    )
}

pub struct ConnectorLifecycleManager {
    registry: Arc<Registry>,
    gateway: Arc<dyn CaptureGateway>,
    store: Arc<dyn ProfileStore>,
    call_timeout: Duration,
    locks: LockMap,
    /// Only persisted profiles have an entry
    readiness: RwLock<HashMap<String, ReadinessState>>,
}

impl ConnectorLifecycleManager {
    pub fn new(
        registry: Arc<Registry>,
        gateway: Arc<dyn CaptureGateway>,
        store: Arc<dyn ProfileStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            store,
            call_timeout,
            locks: StdMutex::new(HashMap::new()),
            readiness: RwLock::new(HashMap::new()),
        }
    }

    pub fn engines(&self) -> Vec<EngineType> {
        self.registry.list_engines()
    }

    pub async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<ConnectionProfile>> {
        self.store.list().await
    }

    pub async fn readiness(&self, id: &str) -> ReadinessState {
        self.readiness
            .read()
            .await
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    /// Run the readiness checks for a profile
    pub async fn validate(&self, profile: &ConnectionProfile) -> Result<ValidationReport> {
        let handler = self.registry.resolve(profile.engine_type)?;
        let report = handler.validate(profile).await;
        self.record_if_persisted(&profile.id, &report).await?;
        Ok(report)
    }

    /// Repair failing checks. Concurrent fixes against the same source database
    /// are serialized, whatever profile id they carry.
    pub async fn fix(&self, profile: &ConnectionProfile) -> Result<ValidationReport> {
        let handler = self.registry.resolve(profile.engine_type)?;
        let _guard = self.lock(source_key(profile)).await;

        info!("[{}] Applying fixes", profile.id);
        let report = handler.fix(profile).await;
        self.record_if_persisted(&profile.id, &report).await?;
        Ok(report)
    }

    /// Register and persist a new profile; fails if the id is taken
    pub async fn create(&self, profile: ConnectionProfile) -> Result<ConnectionProfile> {
        self.save(profile, SaveMode::Create).await
    }

    /// Fully replace an existing profile and re-register its capture job
    pub async fn update(&self, profile: ConnectionProfile) -> Result<ConnectionProfile> {
        self.save(profile, SaveMode::Update).await
    }

    /// The profile is persisted only after it validated as ready and its capture
    /// job was registered.
    async fn save(&self, mut profile: ConnectionProfile, mode: SaveMode) -> Result<ConnectionProfile> {
        profile.check_id()?;
        let handler = self.registry.resolve(profile.engine_type)?;
        let _guard = self.lock(profile_key(&profile.id)).await;

        let existing = self.store.get(&profile.id).await?;
        match (mode, &existing) {
            (SaveMode::Create, Some(_)) => {
                return Err(Error::AlreadyExists(format!("Profile '{}'", profile.id)))
            }
            (SaveMode::Update, None) => {
                return Err(Error::NotFound(format!("Profile '{}'", profile.id)))
            }
            _ => {}
        }

        info!("[{}] Validating source", profile.id);
        let report = handler.validate(&profile).await;
        if existing.is_some() {
            self.record(&profile.id, &report).await;
        }
        if !report.ready() {
            warn!(
                "[{}] Source not ready: {}",
                profile.id,
                report.failed_step_names().join(", ")
            );
            return Err(Error::Validation(report));
        }

        if let Err(e) = handler.prepare_for_connector(&profile).await {
            warn!("[{}] Preparation incomplete: {}", profile.id, e);
        }

        let name = profile.connector_name();
        let config = handler.capture_config(&profile);
        let created = self.register(&name, &config).await?;

        let now = Utc::now();
        profile.created_at = existing.map(|p| p.created_at).unwrap_or(now);
        profile.updated_at = now;

        if let Err(e) = self.store.save(&profile).await {
            error!("[{}] Failed to persist profile: {}", profile.id, e);
            if created {
                if let Err(rollback) = self.unregister(&name).await {
                    warn!(
                        "[{}] Could not roll back capture job '{}': {}",
                        profile.id, name, rollback
                    );
                }
            }
            return Err(e);
        }
        self.record(&profile.id, &report).await;

        info!("[{}] Profile saved, capture job '{}' live", profile.id, name);
        Ok(profile)
    }

    /// Delete a profile, then best-effort remove its capture job
    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        let _guard = self.lock(profile_key(id)).await;

        if !self.store.delete(id).await? {
            return Err(Error::NotFound(format!("Profile '{}'", id)));
        }
        self.readiness.write().await.remove(id);
        info!("[{}] Profile deleted", id);

        let connector_name = connector_name_for(id);
        let mut outcome = DeleteOutcome {
            id: id.to_string(),
            connector_name: connector_name.clone(),
            unregistered: false,
            warning: None,
        };

        match self.unregister(&connector_name).await {
            Ok(true) => {
                info!("[{}] Capture job '{}' removed", id, connector_name);
                outcome.unregistered = true;
            }
            Ok(false) => {
                info!(
                    "[{}] Capture job '{}' not registered, nothing to remove",
                    id, connector_name
                );
            }
            Err(e) => {
                warn!(
                    "[{}] Failed to remove capture job '{}': {}",
                    id, connector_name, e
                );
                outcome.warning = Some(e.to_string());
            }
        }

        Ok(outcome)
    }

    /// Create the job, or update it when it already exists. Returns whether it was created.
    async fn register(&self, name: &str, config: &CaptureJobConfig) -> Result<bool> {
        let existing = bounded(
            self.call_timeout,
            "looking up capture job",
            self.gateway.get_job(name),
        )
        .await
        .map_err(into_registration)?;

        if existing.is_some() {
            info!("Updating capture job '{}'", name);
            bounded(
                self.call_timeout,
                "updating capture job",
                self.gateway.update_job(name, config),
            )
            .await
            .map_err(into_registration)?;
            Ok(false)
        } else {
            info!("Creating capture job '{}'", name);
            bounded(
                self.call_timeout,
                "creating capture job",
                self.gateway.create_job(name, config),
            )
            .await
            .map_err(into_registration)?;
            Ok(true)
        }
    }

    async fn unregister(&self, name: &str) -> Result<bool> {
        let existing = bounded(
            self.call_timeout,
            "looking up capture job",
            self.gateway.get_job(name),
        )
        .await?;
        if existing.is_none() {
            return Ok(false);
        }
        bounded(
            self.call_timeout,
            "deleting capture job",
            self.gateway.delete_job(name),
        )
        .await
    }

    async fn lock(&self, key: String) -> KeyedGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone();
        KeyedGuard {
            locks: &self.locks,
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn record(&self, id: &str, report: &ValidationReport) {
        self.readiness
            .write()
            .await
            .insert(id.to_string(), ReadinessState::from(report));
    }

    /// Reports for profiles that were never saved are returned, not tracked
    async fn record_if_persisted(&self, id: &str, report: &ValidationReport) -> Result<()> {
        if self.store.get(id).await?.is_some() {
            self.record(id, report).await;
        }
        Ok(())
    }
}

fn into_registration(e: Error) -> Error {
    match e {
        Error::Registration { .. } => e,
        Error::Connection(message) => Error::registration(
            RegistrationFailure::Connectivity,
            format!("Capture service unreachable: {}", message),
        ),
        other => Error::registration(RegistrationFailure::Rejected, other.to_string()),
    }
}
