//! Saga Coordinator: the transactional envelope for a single
//! user-initiated build's external side effects, with reverse compensation.

use orchestrator_db::saga_repo::{SagaRepo, SagaStatus};
use sqlx::{Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::action::ReverserRegistry;
use crate::error::Result;

pub struct SagaCoordinator {
    repo: SagaRepo,
    reversers: ReverserRegistry,
}

impl SagaCoordinator {
    pub fn new(repo: SagaRepo, reversers: ReverserRegistry) -> Self {
        Self { repo, reversers }
    }

    /// `BeginSaga(ownerUserID) -> sagaID`.
    pub async fn begin(&self, owner_user_id: Uuid) -> Result<Uuid> {
        Ok(self.repo.begin(owner_user_id).await?)
    }

    /// `AppendAction(txHandle, sagaID, kind, params)`. MUST be called inside
    /// the same transaction as the forward write it compensates; takes an
    /// open `&mut Transaction` for exactly that reason.
    pub async fn append_action(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        saga_id: Uuid,
        kind: &str,
        params: serde_json::Value,
    ) -> Result<Uuid> {
        Ok(self.repo.append_action(tx, saga_id, kind, params).await?)
    }

    /// Mark a saga `completed` once every forward side effect it recorded
    /// has durably landed.
    pub async fn complete(&self, saga_id: Uuid) -> Result<()> {
        self.repo.set_status(saga_id, SagaStatus::Completed).await?;
        Ok(())
    }

    /// Current status of a saga, for callers deciding whether a build
    /// outcome has already been finalized.
    pub async fn status(&self, saga_id: Uuid) -> Result<SagaStatus> {
        let row = self.repo.find(saga_id).await?;
        Ok(match row.status.as_str() {
            "completed" => SagaStatus::Completed,
            "failed" => SagaStatus::Failed,
            "compensated" => SagaStatus::Compensated,
            _ => SagaStatus::Pending,
        })
    }

    /// Reads every action for `saga_id` in reverse insertion order and
    /// invokes its reverser. Individual reverser failures are logged and do
    /// not abort the sweep — compensation is best-effort but retry-safe.
    /// Sets the saga to `compensated` only when every reverser returned
    /// success or a benign not-found (reversers are themselves idempotent,
    /// so "ran without error" is the signal).
    pub async fn compensate(&self, saga_id: Uuid) -> Result<CompensationReport> {
        self.repo.set_status(saga_id, SagaStatus::Failed).await.ok();
        let actions = self.repo.actions_reverse_order(saga_id).await?;

        let mut report = CompensationReport::default();
        for action in actions {
            match self.reversers.reverse(&action.kind, &action.params).await {
                Ok(()) => report.reversed += 1,
                Err(e) => {
                    warn!(saga_id = %saga_id, action_id = %action.id, kind = %action.kind, error = %e, "compensation step failed; continuing sweep");
                    report.failed += 1;
                }
            }
        }

        if report.failed == 0 {
            self.repo.set_status(saga_id, SagaStatus::Compensated).await?;
            info!(saga_id = %saga_id, reversed = report.reversed, "saga compensated");
        } else {
            info!(saga_id = %saga_id, reversed = report.reversed, failed = report.failed, "saga compensation incomplete; left failed for SagaCleanup to retry");
        }
        Ok(report)
    }

    /// `SagaCleanup`: periodic stage that scans sagas in `failed`/
    /// `compensated` older than a threshold and re-runs `Compensate` to
    /// converge against transient reverser outages. Re-running
    /// compensate on an already-compensated saga is a no-op by construction:
    /// reversers are idempotent "delete if exists", so reversing the same
    /// action twice does nothing the second time.
    pub async fn cleanup(&self, older_than_hours: i64, limit: i64) -> Result<usize> {
        let stale = self.repo.stale_for_cleanup(older_than_hours, limit).await?;
        let mut swept = 0;
        for saga in stale {
            self.compensate(saga.id).await?;
            swept += 1;
        }
        Ok(swept)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompensationReport {
    pub reversed: usize,
    pub failed: usize,
}

impl CompensationReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}
