use async_trait::async_trait;
use cdc_core::{ConnectionProfile, Error, Result, SessionOpener, SqlSession, TextRows};
use std::time::Duration;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

/// Opens plain `tokio-postgres` sessions for readiness checks
pub struct PgSessionOpener {
    connect_timeout: Duration,
}

impl PgSessionOpener {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl SessionOpener for PgSessionOpener {
    async fn open(&self, profile: &ConnectionProfile) -> Result<Box<dyn SqlSession>> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&profile.host)
            .port(profile.port)
            .user(&profile.username)
            .password(&profile.password)
            .dbname(&profile.database)
            .application_name("cdc-readiness")
            .connect_timeout(self.connect_timeout);

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            Error::Connection(format!(
                "Failed to connect to {}:{}/{}: {}",
                profile.host, profile.port, profile.database, e
            ))
        })?;

        let id = profile.id.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("[{}] PostgreSQL connection closed: {}", id, e);
            }
        });

        Ok(Box::new(PgSession { client }))
    }
}

struct PgSession {
    client: Client,
}

#[async_trait]
impl SqlSession for PgSession {
    async fn query(&mut self, sql: &str) -> Result<TextRows> {
        debug!("query: {}", sql);
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(
                    (0..row.len())
                        .map(|i| row.get(i).map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .collect())
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("execute: {}", sql);
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| Error::Connection(e.to_string()))
    }
}
