//! 保持ポリシーの実行
//!
//! ポリシーごとに同時実行は1つまで。実行中のポリシーへの再要求はConflictになる。

use crate::audit::types::{AuditAction, AuditEvent};
use crate::common::error::{VaultError, VaultResult};
use crate::db::audit_log::AuditLogStorage;
use crate::db::{compliance, notifications, retention};
use crate::types::compliance::{
    NotificationKind, RetentionJob, RetentionJobStatus, RetentionPolicy, RetentionTarget,
    RetentionTrigger,
};
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

/// 実行中ポリシーの登録を解除するガード
struct RunningGuard {
    running: Arc<Mutex<HashSet<Uuid>>>,
    policy_id: Uuid,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.policy_id);
    }
}

/// 保持ジョブの実行サービス
#[derive(Clone)]
pub struct RetentionService {
    pool: SqlitePool,
    audit_storage: Arc<AuditLogStorage>,
    archive_pool: Option<SqlitePool>,
    running: Arc<Mutex<HashSet<Uuid>>>,
}

impl RetentionService {
    /// 新しいサービスを作成
    pub fn new(
        pool: SqlitePool,
        audit_storage: Arc<AuditLogStorage>,
        archive_pool: Option<SqlitePool>,
    ) -> Self {
        Self {
            pool,
            audit_storage,
            archive_pool,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn acquire(&self, policy_id: Uuid) -> VaultResult<RunningGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(policy_id) {
            return Err(VaultError::Conflict(format!(
                "A retention job for policy {} is already running",
                policy_id
            )));
        }
        Ok(RunningGuard {
            running: self.running.clone(),
            policy_id,
        })
    }

    /// ポリシーを実行し、終了したジョブを返す
    ///
    /// 対象処理の失敗はジョブの`failed`として記録され、エラーにはならない。
    pub async fn run_policy(&self, policy_id: Uuid, trigger: RetentionTrigger) -> VaultResult<RetentionJob> {
        let policy = retention::get_policy(&self.pool, policy_id).await?;
        let _guard = self.acquire(policy.id)?;

        let job = retention::start_job(&self.pool, policy.id, trigger).await?;
        info!(
            policy = %policy.name,
            target = %policy.target,
            job_id = %job.id,
            %trigger,
            "Retention job started"
        );

        let outcome = self.execute(&policy).await;
        match &outcome {
            Ok(records) => {
                crate::metrics::record_retention(policy.target.as_str(), *records);
                info!(policy = %policy.name, records, "Retention job completed");
            }
            Err(e) => error!(policy = %policy.name, error = %e, "Retention job failed"),
        }
        let job = retention::finish_job(&self.pool, job, outcome.map_err(|e| e.to_string())).await?;

        if job.status == RetentionJobStatus::Completed && job.records_processed > 0 {
            notifications::enqueue(
                &self.pool,
                NotificationKind::RetentionCompleted,
                None,
                &format!("Retention policy '{}' completed", policy.name),
                &format!(
                    "{} {} record(s) processed (older than {} days).",
                    job.records_processed, policy.target, policy.retention_days
                ),
            )
            .await?;
        }
        Ok(job)
    }

    async fn execute(&self, policy: &RetentionPolicy) -> VaultResult<i64> {
        let cutoff = Utc::now() - Duration::days(policy.retention_days);
        match policy.target {
            RetentionTarget::AuditLog => {
                let archive = self.archive_pool.as_ref().ok_or_else(|| {
                    VaultError::ServiceUnavailable(
                        "Audit archive database is not configured".to_string(),
                    )
                })?;
                match self.audit_storage.archivable_prefix_end(&cutoff).await? {
                    Some(through) => self.audit_storage.archive_through(through, archive).await,
                    None => Ok(0),
                }
            }
            RetentionTarget::Notifications => {
                let removed = notifications::delete_finished_before(&self.pool, cutoff).await?;
                Ok(removed as i64)
            }
            RetentionTarget::ResolvedViolations => {
                let removed = compliance::delete_resolved_before(&self.pool, cutoff).await?;
                Ok(removed as i64)
            }
        }
    }

    /// 有効な全ポリシーを実行する（スケジューラ用）
    pub async fn run_scheduled(&self) -> VaultResult<Vec<RetentionJob>> {
        let policies = retention::list_policies(&self.pool).await?;
        let mut jobs = Vec::new();
        for policy in policies.into_iter().filter(|p| p.enabled) {
            match self.run_policy(policy.id, RetentionTrigger::Scheduled).await {
                Ok(job) => {
                    let detail = serde_json::json!({
                        "policy_id": policy.id,
                        "target": policy.target,
                        "status": job.status,
                        "records_processed": job.records_processed,
                    });
                    let mut event =
                        AuditEvent::system(AuditAction::System, "retention_job", Some(detail.to_string()));
                    event.resource_id = Some(job.id.to_string());
                    if let Err(e) = self.audit_storage.append(event).await {
                        warn!(error = %e, "Failed to audit scheduled retention job");
                    }
                    jobs.push(job);
                }
                Err(VaultError::Conflict(_)) => {
                    info!(policy = %policy.name, "Retention job already running, skipping");
                }
                Err(e) => error!(policy = %policy.name, error = %e, "Retention run failed"),
            }
        }
        Ok(jobs)
    }

    /// バックグラウンドでスケジューラを開始
    pub fn start(self, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 起動直後の実行は避ける
            timer.tick().await;
            info!(interval_secs = interval.as_secs(), "Retention scheduler started");
            loop {
                timer.tick().await;
                if let Err(e) = self.run_scheduled().await {
                    error!("Retention scheduler error: {}", e);
                }
            }
        })
    }
}
