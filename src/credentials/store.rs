//! Connection records holding encrypted provider credentials
//!
//! The table is owned by the surrounding platform; this module only reads it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::Result;

/// One stored connection between a tenant and a provider
#[derive(Debug, Clone, FromRow)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub organization_id: String,
    pub provider: String,
    /// Sealed credential payload, see [`super::CredentialCipher`]
    pub encrypted_credentials: String,
    pub updated_at: DateTime<Utc>,
}

/// Lookup of connection records
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Most recently updated active connection for a tenant and provider
    async fn latest_active(
        &self,
        tenant_id: &str,
        provider: &str,
    ) -> Result<Option<ConnectionRecord>>;
}

/// Connection records backed by PostgreSQL
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn latest_active(
        &self,
        tenant_id: &str,
        provider: &str,
    ) -> Result<Option<ConnectionRecord>> {
        let record: Option<ConnectionRecord> = sqlx::query_as(
            r#"
            SELECT id, organization_id, provider, encrypted_credentials, updated_at
            FROM connections
            WHERE organization_id = $1 AND provider = $2 AND status = 'active'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}
