//! Quota module - Per-tenant storage accounting
//!
//! The pre-write check is the only hard gate. Post-write accounting runs as
//! a detached task and only logs on failure; a successful write is never
//! rolled back because its usage update failed.

mod store;

pub use store::{InMemoryUsageStore, PgUsageStore, StorageUsageRecord, UsageStore};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::QuotaConfig;
use crate::error::{Error, Result};
use crate::workspace::WorkspaceRef;

/// Enforces storage ceilings and records usage deltas
#[derive(Clone)]
pub struct QuotaAccountant {
    store: Arc<dyn UsageStore>,
    limits: QuotaConfig,
}

impl QuotaAccountant {
    pub fn new(store: Arc<dyn UsageStore>, limits: QuotaConfig) -> Self {
        QuotaAccountant { store, limits }
    }

    /// Reject a write of `incoming_bytes` that would exceed the tenant ceiling.
    ///
    /// Tenants without a configured ceiling always pass without touching the store.
    pub async fn check_and_reserve(&self, tenant_id: &str, incoming_bytes: u64) -> Result<()> {
        let Some(limit) = self.limits.limit_for(tenant_id) else {
            return Ok(());
        };

        let used = self.store.tenant_total_bytes(tenant_id).await?;
        if used.saturating_add(incoming_bytes) > limit {
            debug!(tenant = %tenant_id, used, incoming_bytes, limit, "Quota check rejected write");
            return Err(Error::QuotaExceeded {
                used,
                requested: incoming_bytes,
                limit,
            });
        }
        Ok(())
    }

    /// Record a completed write without blocking the caller
    pub fn commit(
        &self,
        workspace: &WorkspaceRef,
        bytes_delta: i64,
        file_count_delta: i64,
    ) -> JoinHandle<()> {
        let accountant = self.clone();
        let workspace = workspace.clone();
        tokio::spawn(async move {
            accountant
                .record(&workspace, bytes_delta, file_count_delta)
                .await;
        })
    }

    /// Apply a delta, logging instead of failing
    pub async fn record(&self, workspace: &WorkspaceRef, bytes_delta: i64, file_count_delta: i64) {
        if bytes_delta == 0 && file_count_delta == 0 {
            return;
        }
        if let Err(e) = self
            .store
            .apply_delta(
                &workspace.tenant_id,
                &workspace.agent_id,
                bytes_delta,
                file_count_delta,
            )
            .await
        {
            error!(
                workspace = %workspace,
                bytes_delta,
                file_count_delta,
                "Failed to record storage usage: {}",
                e
            );
        }
    }

    /// Current accounting for one workspace
    pub async fn usage(&self, workspace: &WorkspaceRef) -> Result<StorageUsageRecord> {
        self.store
            .usage(&workspace.tenant_id, &workspace.agent_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl UsageStore for BrokenStore {
        async fn tenant_total_bytes(&self, _tenant_id: &str) -> Result<u64> {
            Err(Error::Internal("offline".into()))
        }

        async fn usage(&self, _tenant_id: &str, _agent_id: &str) -> Result<StorageUsageRecord> {
            Err(Error::Internal("offline".into()))
        }

        async fn apply_delta(&self, _: &str, _: &str, _: i64, _: i64) -> Result<()> {
            Err(Error::Internal("offline".into()))
        }
    }

    fn limited(limit: u64) -> (Arc<InMemoryUsageStore>, QuotaAccountant) {
        let store = Arc::new(InMemoryUsageStore::new());
        let limits = QuotaConfig {
            default_max_bytes: Some(limit),
            ..Default::default()
        };
        (store.clone(), QuotaAccountant::new(store, limits))
    }

    #[tokio::test]
    async fn test_no_ceiling_is_a_pass() {
        let accountant = QuotaAccountant::new(Arc::new(BrokenStore), QuotaConfig::default());
        accountant.check_and_reserve("acme", u64::MAX).await.unwrap();
    }

    #[tokio::test]
    async fn test_ceiling_is_enforced_across_agents() {
        let (store, accountant) = limited(100);
        store.apply_delta("acme", "a", 60, 1).await.unwrap();
        store.apply_delta("acme", "b", 30, 1).await.unwrap();

        accountant.check_and_reserve("acme", 10).await.unwrap();
        let err = accountant.check_and_reserve("acme", 11).await.unwrap_err();
        match err {
            Error::QuotaExceeded {
                used,
                requested,
                limit,
            } => {
                assert_eq!(used, 90);
                assert_eq!(requested, 11);
                assert_eq!(limit, 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Other tenants are unaffected
        accountant.check_and_reserve("globex", 100).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_sums_deltas() {
        let (_store, accountant) = limited(u64::MAX);
        let ws = WorkspaceRef::new(Some("acme"), Some("a")).unwrap();

        let sizes = [10i64, 200, 3_000];
        let handles: Vec<_> = sizes.iter().map(|s| accountant.commit(&ws, *s, 1)).collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let usage = accountant.usage(&ws).await.unwrap();
        assert_eq!(usage.total_bytes, sizes.iter().sum::<i64>());
        assert_eq!(usage.file_count, 3);
    }

    #[tokio::test]
    async fn test_record_failure_is_swallowed() {
        let accountant = QuotaAccountant::new(Arc::new(BrokenStore), QuotaConfig::default());
        let ws = WorkspaceRef::new(None, None).unwrap();
        accountant.commit(&ws, 5, 1).await.unwrap();
    }
}
