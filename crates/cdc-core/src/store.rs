use crate::{ConnectionProfile, Result};
use async_trait::async_trait;

/// Persistence of connection profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>>;

    async fn list(&self) -> Result<Vec<ConnectionProfile>>;

    /// Insert or fully replace a profile
    async fn save(&self, profile: &ConnectionProfile) -> Result<()>;

    /// Returns false when no profile with this id existed
    async fn delete(&self, id: &str) -> Result<bool>;
}
