use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Suffix of the topic every row-level change of a profile is routed to
pub const ALL_CHANGES_SUFFIX: &str = "all-changes";

/// Supported source database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Postgres,
    Mysql,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mysql => 3306,
        }
    }
}

impl FromStr for EngineType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            other => Err(crate::Error::Configuration(format!(
                "Unsupported engine '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A database source registered for change capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Opaque, immutable identifier; also the topic prefix
    pub id: String,

    /// Human readable name
    pub name: String,

    pub engine_type: EngineType,

    pub host: String,

    pub port: u16,

    pub username: String,

    pub password: String,

    pub database: String,

    /// Tables to capture (`schema.table`); empty means all tables
    #[serde(default)]
    pub tables: Vec<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ConnectionProfile {
    /// Build a profile with a fresh id
    pub fn new(
        name: impl Into<String>,
        engine_type: EngineType,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.into(),
            engine_type,
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            database: database.into(),
            tables: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Name of the capture job registered for this profile
    pub fn connector_name(&self) -> String {
        connector_name_for(&self.id)
    }

    /// Topic prefix shared by the data-change and schema-change topics
    pub fn topic_prefix(&self) -> &str {
        &self.id
    }

    pub fn check_id(&self) -> crate::Result<()> {
        check_profile_id(&self.id)
    }
}

pub fn connector_name_for(id: &str) -> String {
    format!("cdc-{}", id)
}

/// Topic carrying row-level changes for a prefix
pub fn data_topic(topic_prefix: &str) -> String {
    format!("{}.{}", topic_prefix, ALL_CHANGES_SUFFIX)
}

/// Topic carrying schema-change events for a prefix
pub fn schema_topic(topic_prefix: &str) -> String {
    topic_prefix.to_string()
}

/// Ids end up in topic names, connector names and file names.
pub fn check_profile_id(id: &str) -> crate::Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(crate::Error::Configuration(format!(
            "Invalid profile id '{}': use 1-64 characters from [A-Za-z0-9_-]",
            id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_is_derived_from_id() {
        let mut profile = ConnectionProfile::new(
            "orders",
            EngineType::Postgres,
            "localhost",
            5432,
            "postgres",
            "secret",
            "shop",
        );
        profile.id = "src42".to_string();

        assert_eq!(profile.connector_name(), "cdc-src42");
        assert_eq!(profile.topic_prefix(), "src42");
        assert_eq!(data_topic(profile.topic_prefix()), "src42.all-changes");
        assert_eq!(schema_topic(profile.topic_prefix()), "src42");
    }

    #[test]
    fn test_fresh_ids_are_valid_and_distinct() {
        let a = ConnectionProfile::new("a", EngineType::Mysql, "h", 3306, "u", "p", "d");
        let b = ConnectionProfile::new("b", EngineType::Mysql, "h", 3306, "u", "p", "d");
        assert_ne!(a.id, b.id);
        assert!(a.check_id().is_ok());
        assert!(check_profile_id("../etc").is_err());
        assert!(check_profile_id("").is_err());
    }

    #[test]
    fn test_deserialization_defaults() {
        let profile: ConnectionProfile = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "name": "inventory",
            "engine_type": "mysql",
            "host": "db",
            "port": 3306,
            "username": "root",
            "password": "pw",
            "database": "inventory"
        }))
        .expect("Failed to deserialize");
        assert_eq!(profile.engine_type, EngineType::Mysql);
        assert!(profile.tables.is_empty());
        assert!(profile.created_at.timestamp() > 0);
    }
}
