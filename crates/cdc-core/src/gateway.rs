use crate::{CaptureJobConfig, Result};
use async_trait::async_trait;
use serde_json::Value;

/// REST interface of the capture service that runs capture jobs
#[async_trait]
pub trait CaptureGateway: Send + Sync {
    /// Fetch a job by name, `None` when it does not exist
    async fn get_job(&self, name: &str) -> Result<Option<Value>>;

    async fn create_job(&self, name: &str, config: &CaptureJobConfig) -> Result<()>;

    async fn update_job(&self, name: &str, config: &CaptureJobConfig) -> Result<()>;

    /// Remove a job; returns false when there was nothing to remove
    async fn delete_job(&self, name: &str) -> Result<bool>;
}
