use anyhow::Context;
use async_trait::async_trait;
use cdc_core::{check_profile_id, ConnectionProfile, ProfileStore, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One YAML document per profile: `<dir>/<id>.yaml`
#[derive(Debug, Clone)]
pub struct FileProfileStore {
    storage_dir: PathBuf,
}

impl FileProfileStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    fn path(&self, id: &str) -> Result<PathBuf> {
        check_profile_id(id)?;
        Ok(self.storage_dir.join(format!("{}.yaml", id)))
    }
}

async fn read_profile(path: &Path) -> anyhow::Result<ConnectionProfile> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>> {
        let path = self.path(id)?;
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(Some(read_profile(&path).await?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ConnectionProfile>> {
        let mut entries = match tokio::fs::read_dir(&self.storage_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_profile = path.extension().is_some_and(|ext| ext == "yaml")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_profile {
                continue;
            }
            match read_profile(&path).await {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!("Skipping unreadable profile: {:#}", e),
            }
        }

        profiles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(profiles)
    }

    async fn save(&self, profile: &ConnectionProfile) -> Result<()> {
        let path = self.path(&profile.id)?;
        tokio::fs::create_dir_all(&self.storage_dir)
            .await
            .context("Failed to create storage directory")?;

        let content = serde_yaml::to_string(profile).context("Failed to serialize profile")?;
        let tmp = self.storage_dir.join(format!(".{}.yaml.tmp", profile.id));
        if let Err(e) = tokio::fs::write(&tmp, content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &path).await?;

        debug!("[{}] Profile written to {}", profile.id, path.display());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path(id)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::EngineType;

    fn profile(id: &str) -> ConnectionProfile {
        let mut profile = ConnectionProfile::new(
            "orders",
            EngineType::Postgres,
            "localhost",
            5432,
            "postgres",
            "secret",
            "shop",
        );
        profile.id = id.to_string();
        profile
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path().join("profiles"));

        assert!(store.get("src1").await.unwrap().is_none());

        let mut saved = profile("src1");
        saved.tables = vec!["public.orders".to_string()];
        store.save(&saved).await.unwrap();
        assert!(dir.path().join("profiles/src1.yaml").exists());
        assert_eq!(store.get("src1").await.unwrap(), Some(saved));

        assert!(store.delete("src1").await.unwrap());
        assert!(!store.delete("src1").await.unwrap());
        assert!(store.get("src1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_whole_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path());

        let mut p = profile("src1");
        p.tables = vec!["public.orders".to_string()];
        store.save(&p).await.unwrap();

        p.tables.clear();
        p.host = "db.internal".to_string();
        store.save(&p).await.unwrap();

        let loaded = store.get("src1").await.unwrap().unwrap();
        assert!(loaded.tables.is_empty());
        assert_eq!(loaded.host, "db.internal");
    }

    #[tokio::test]
    async fn test_list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path());
        store.save(&profile("a")).await.unwrap();
        store.save(&profile("b")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("broken.yaml"), ":: not a profile").unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a".to_string()) && ids.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn test_list_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_cannot_escape_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::new(dir.path());
        assert!(store.get("../secrets").await.is_err());
        assert!(store.save(&profile("../x")).await.is_err());
    }
}
