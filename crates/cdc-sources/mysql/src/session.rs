use async_trait::async_trait;
use cdc_core::{ConnectionProfile, Error, Result, SessionOpener, SqlSession, TextRows};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{ConnectOptions, Connection, Executor, Row};
use tracing::debug;

/// Opens single `sqlx` MySQL connections for readiness checks
#[derive(Debug, Default)]
pub struct MySqlSessionOpener;

#[async_trait]
impl SessionOpener for MySqlSessionOpener {
    async fn open(&self, profile: &ConnectionProfile) -> Result<Box<dyn SqlSession>> {
        let conn = MySqlConnectOptions::new()
            .host(&profile.host)
            .port(profile.port)
            .username(&profile.username)
            .password(&profile.password)
            .database(&profile.database)
            .connect()
            .await
            .map_err(|e| {
                Error::Connection(format!(
                    "Failed to connect to {}:{}/{}: {}",
                    profile.host, profile.port, profile.database, e
                ))
            })?;
        Ok(Box::new(MySqlSession { conn: Some(conn) }))
    }
}

struct MySqlSession {
    conn: Option<MySqlConnection>,
}

impl MySqlSession {
    fn conn(&mut self) -> Result<&mut MySqlConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Connection("session closed".to_string()))
    }
}

/// Render any column as text; SHOW statements mix character and binary types
fn text(row: &MySqlRow, i: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(i) {
        return v.map(|n| n.to_string());
    }
    row.try_get::<Option<Vec<u8>>, _>(i)
        .ok()
        .flatten()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
impl SqlSession for MySqlSession {
    async fn query(&mut self, sql: &str) -> Result<TextRows> {
        debug!("query: {}", sql);
        let conn: &mut MySqlConnection = self.conn()?;
        let rows = conn
            .fetch_all(sqlx::raw_sql(sql))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(rows
            .iter()
            .map(|row| (0..row.len()).map(|i| text(row, i)).collect())
            .collect())
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("execute: {}", sql);
        let conn: &mut MySqlConnection = self.conn()?;
        conn.execute(sqlx::raw_sql(sql))
            .await
            .map(|_| ())
            .map_err(|e| Error::Connection(e.to_string()))
    }
}

impl Drop for MySqlSession {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = conn.close().await;
                });
            }
        }
    }
}
