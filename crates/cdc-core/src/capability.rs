use crate::{ConnectionProfile, EngineType, Result, ValidationReport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Engine-specific operations needed to bring a source under change capture
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Engine served by this handler
    fn engine(&self) -> EngineType;

    /// Run every readiness check against the source and report each one
    async fn validate(&self, profile: &ConnectionProfile) -> ValidationReport;

    /// Apply the corrective action of every failing check, then validate again
    async fn fix(&self, profile: &ConnectionProfile) -> ValidationReport;

    /// One-time preparation run right before the capture job is registered.
    /// Failures on individual objects are logged and skipped.
    async fn prepare_for_connector(&self, profile: &ConnectionProfile) -> Result<()>;

    /// Capture job configuration for this profile
    fn capture_config(&self, profile: &ConnectionProfile) -> CaptureJobConfig;
}

/// Flat key/value configuration of a capture job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureJobConfig(BTreeMap<String, String>);

impl CaptureJobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Settings shared by every capability handler
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Host name under which the capture service reaches the operator's machine
    pub loopback_host: String,

    /// Broker address the capture job uses for its own schema history
    pub history_bootstrap_servers: String,

    /// Upper bound for opening a session or running a single check
    pub call_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            loopback_host: "host.docker.internal".to_string(),
            history_bootstrap_servers: "kafka:9092".to_string(),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl CaptureSettings {
    /// Loopback addresses are meaningless inside the capture service, so they
    /// are replaced by the configured loopback host.
    pub fn translate_host(&self, host: &str) -> String {
        match host.trim() {
            "localhost" | "127.0.0.1" | "::1" | "[::1]" | "0.0.0.0" => self.loopback_host.clone(),
            other => other.to_string(),
        }
    }
}

/// Escape a topic prefix for use inside a Java regular expression
pub fn regex_quote(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if "\\.^$|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Settings common to both engines: naming, converters and routing of every
/// table topic onto the single all-changes topic.
pub fn base_capture_config(
    connector_class: &str,
    profile: &ConnectionProfile,
    settings: &CaptureSettings,
) -> CaptureJobConfig {
    let prefix = profile.topic_prefix();
    let mut config = CaptureJobConfig::new();
    config
        .set("connector.class", connector_class)
        .set("tasks.max", "1")
        .set("database.hostname", settings.translate_host(&profile.host))
        .set("database.port", profile.port.to_string())
        .set("database.user", profile.username.clone())
        .set("database.password", profile.password.clone())
        .set("topic.prefix", prefix)
        .set("snapshot.mode", "no_data")
        .set("decimal.handling.mode", "string")
        .set("time.precision.mode", "connect")
        .set("key.converter", "org.apache.kafka.connect.json.JsonConverter")
        .set("key.converter.schemas.enable", "false")
        .set("value.converter", "org.apache.kafka.connect.json.JsonConverter")
        .set("value.converter.schemas.enable", "false")
        .set("transforms", "route")
        .set(
            "transforms.route.type",
            "org.apache.kafka.connect.transforms.RegexRouter",
        )
        .set("transforms.route.regex", format!("{}\\..*", regex_quote(prefix)))
        .set(
            "transforms.route.replacement",
            crate::profile::data_topic(prefix),
        );
    if !profile.tables.is_empty() {
        config.set("table.include.list", profile.tables.join(","));
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_translation() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.translate_host("localhost"), "host.docker.internal");
        assert_eq!(settings.translate_host("127.0.0.1"), "host.docker.internal");
        assert_eq!(settings.translate_host("db.internal"), "db.internal");
    }

    #[test]
    fn test_route_regex_escapes_prefix() {
        assert_eq!(regex_quote("a.b-c"), "a\\.b-c");
    }

    #[test]
    fn test_base_config_routes_to_all_changes_topic() {
        let mut profile =
            ConnectionProfile::new("n", EngineType::Postgres, "localhost", 5432, "u", "p", "db");
        profile.id = "src1".to_string();
        profile.tables = vec!["public.orders".to_string()];

        let config = base_capture_config("X", &profile, &CaptureSettings::default());
        assert_eq!(config.get("topic.prefix"), Some("src1"));
        assert_eq!(config.get("database.hostname"), Some("host.docker.internal"));
        assert_eq!(config.get("transforms.route.regex"), Some("src1\\..*"));
        assert_eq!(
            config.get("transforms.route.replacement"),
            Some("src1.all-changes")
        );
        assert_eq!(config.get("table.include.list"), Some("public.orders"));
    }
}
