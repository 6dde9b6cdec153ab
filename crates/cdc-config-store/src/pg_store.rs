use anyhow::Context;
use async_trait::async_trait;
use cdc_core::{ConnectionProfile, EngineType, ProfileStore, Result};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS connection_profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    engine_type TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    username TEXT NOT NULL,
    password TEXT NOT NULL,
    database_name TEXT NOT NULL,
    tables JSONB NOT NULL DEFAULT '[]',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)";

const COLUMNS: &str = "id, name, engine_type, host, port, username, password, database_name, \
                       tables, created_at, updated_at";

/// Profiles kept in the `connection_profiles` table
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    /// Connect and create the table if missing
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .context("Failed to create connection_profiles table")?;
        info!("Profile store ready in PostgreSQL");

        Ok(Self { pool })
    }
}

fn from_row(r: PgRow) -> anyhow::Result<ConnectionProfile> {
    let engine: String = r.try_get("engine_type")?;
    let port: i32 = r.try_get("port")?;
    let Json(tables): Json<Vec<String>> = r.try_get("tables")?;
    Ok(ConnectionProfile {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        engine_type: engine.parse::<EngineType>()?,
        host: r.try_get("host")?,
        port: u16::try_from(port).context("Stored port out of range")?,
        username: r.try_get("username")?,
        password: r.try_get("password")?,
        database: r.try_get("database_name")?,
        tables,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM connection_profiles WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get profile")?;

        Ok(row.map(from_row).transpose()?)
    }

    async fn list(&self) -> Result<Vec<ConnectionProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM connection_profiles ORDER BY created_at, id",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list profiles")?;

        Ok(rows
            .into_iter()
            .map(from_row)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    async fn save(&self, profile: &ConnectionProfile) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO connection_profiles ({})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                engine_type = EXCLUDED.engine_type,
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                username = EXCLUDED.username,
                password = EXCLUDED.password,
                database_name = EXCLUDED.database_name,
                tables = EXCLUDED.tables,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at",
            COLUMNS
        ))
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(profile.engine_type.as_str())
        .bind(&profile.host)
        .bind(i32::from(profile.port))
        .bind(&profile.username)
        .bind(&profile.password)
        .bind(&profile.database)
        .bind(Json(&profile.tables))
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save profile")?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM connection_profiles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete profile")?;

        Ok(result.rows_affected() > 0)
    }
}
