use crate::{FileProfileStore, PgProfileStore};
use async_trait::async_trait;
use cdc_core::{ConnectionProfile, ProfileStore, Result};
use std::path::Path;

/// Profile storage in YAML files or PostgreSQL
pub enum UnifiedProfileStore {
    File(FileProfileStore),
    Postgres(PgProfileStore),
}

impl UnifiedProfileStore {
    pub fn from_files(storage_dir: impl AsRef<Path>) -> Self {
        Self::File(FileProfileStore::new(storage_dir.as_ref()))
    }

    pub async fn from_postgres(database_url: &str) -> anyhow::Result<Self> {
        Ok(Self::Postgres(PgProfileStore::new(database_url).await?))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Postgres(_) => "postgres",
        }
    }
}

#[async_trait]
impl ProfileStore for UnifiedProfileStore {
    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>> {
        match self {
            Self::File(store) => store.get(id).await,
            Self::Postgres(store) => store.get(id).await,
        }
    }

    async fn list(&self) -> Result<Vec<ConnectionProfile>> {
        match self {
            Self::File(store) => store.list().await,
            Self::Postgres(store) => store.list().await,
        }
    }

    async fn save(&self, profile: &ConnectionProfile) -> Result<()> {
        match self {
            Self::File(store) => store.save(profile).await,
            Self::Postgres(store) => store.save(profile).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        match self {
            Self::File(store) => store.delete(id).await,
            Self::Postgres(store) => store.delete(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::EngineType;

    #[tokio::test]
    async fn test_file_backend_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = UnifiedProfileStore::from_files(dir.path());
        assert_eq!(store.backend_name(), "file");

        let mut profile =
            ConnectionProfile::new("n", EngineType::Mysql, "db", 3306, "root", "pw", "shop");
        profile.id = "m1".to_string();
        store.save(&profile).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.delete("m1").await.unwrap());
    }
}
