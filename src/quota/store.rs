//! Storage usage records
//!
//! Usage is only ever changed through signed deltas applied atomically by
//! the store, never read-modify-written by callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Accounting for one (tenant, agent) workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsageRecord {
    pub total_bytes: i64,
    pub file_count: i64,
    pub last_write_at: Option<DateTime<Utc>>,
}

/// Persistence for usage accounting
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Sum of bytes across every agent of a tenant
    async fn tenant_total_bytes(&self, tenant_id: &str) -> Result<u64>;

    /// Record for one workspace (zeroed when absent)
    async fn usage(&self, tenant_id: &str, agent_id: &str) -> Result<StorageUsageRecord>;

    /// Atomically add signed deltas, clamping at zero
    async fn apply_delta(
        &self,
        tenant_id: &str,
        agent_id: &str,
        bytes_delta: i64,
        file_count_delta: i64,
    ) -> Result<()>;
}

/// Process-local usage store
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    records: Mutex<HashMap<(String, String), StorageUsageRecord>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), StorageUsageRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::Internal("usage store lock poisoned".into()))
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn tenant_total_bytes(&self, tenant_id: &str) -> Result<u64> {
        let records = self.lock()?;
        let total: i64 = records
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|(_, r)| r.total_bytes)
            .sum();
        Ok(total.max(0) as u64)
    }

    async fn usage(&self, tenant_id: &str, agent_id: &str) -> Result<StorageUsageRecord> {
        let records = self.lock()?;
        Ok(records
            .get(&(tenant_id.to_string(), agent_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn apply_delta(
        &self,
        tenant_id: &str,
        agent_id: &str,
        bytes_delta: i64,
        file_count_delta: i64,
    ) -> Result<()> {
        let mut records = self.lock()?;
        let record = records
            .entry((tenant_id.to_string(), agent_id.to_string()))
            .or_default();
        record.total_bytes = (record.total_bytes + bytes_delta).max(0);
        record.file_count = (record.file_count + file_count_delta).max(0);
        record.last_write_at = Some(Utc::now());
        Ok(())
    }
}

/// Usage store backed by the `storage_usage` table
#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn tenant_total_bytes(&self, tenant_id: &str) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_bytes), 0)::BIGINT FROM storage_usage WHERE organization_id = $1",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total.max(0) as u64)
    }

    async fn usage(&self, tenant_id: &str, agent_id: &str) -> Result<StorageUsageRecord> {
        let record: Option<StorageUsageRecord> = sqlx::query_as(
            r#"
            SELECT total_bytes, file_count, last_write_at
            FROM storage_usage
            WHERE organization_id = $1 AND agent_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.unwrap_or_default())
    }

    async fn apply_delta(
        &self,
        tenant_id: &str,
        agent_id: &str,
        bytes_delta: i64,
        file_count_delta: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO storage_usage (organization_id, agent_id, total_bytes, file_count, last_write_at)
            VALUES ($1, $2, GREATEST($3::BIGINT, 0), GREATEST($4::BIGINT, 0), NOW())
            ON CONFLICT (organization_id, agent_id) DO UPDATE SET
                total_bytes = GREATEST(storage_usage.total_bytes + $3::BIGINT, 0),
                file_count = GREATEST(storage_usage.file_count + $4::BIGINT, 0),
                last_write_at = NOW()
            "#,
        )
        .bind(tenant_id)
        .bind(agent_id)
        .bind(bytes_delta)
        .bind(file_count_delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
