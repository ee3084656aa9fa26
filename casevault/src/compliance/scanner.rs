//! 違反スキャナ
//!
//! 監査チェーン・保管履歴・持ち出し期限・事件SLA・押収の法的根拠を検査し、
//! 新しい違反を登録する。未解決の違反がある対象は重複登録しない。

use crate::audit::hash_chain::{verify_chain, ChainVerificationResult};
use crate::common::error::VaultResult;
use crate::config::SlaConfig;
use crate::db::audit_log::AuditLogStorage;
use crate::db::{cases, compliance, evidence, legal, notifications};
use crate::types::compliance::{NotificationKind, Severity, Violation, ViolationKind};
use crate::types::evidence::{check_continuity, CustodyAction, CustodyStatus};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// スキャン結果
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    /// 監査チェーンの検証結果
    pub chain: ChainVerificationResult,
    /// 新たに登録した違反
    pub violations_opened: Vec<Violation>,
    /// 自動エスカレーションした事件
    pub cases_escalated: Vec<Uuid>,
    /// スキャン日時
    pub scanned_at: DateTime<Utc>,
}

/// コンプライアンススキャナ
#[derive(Clone)]
pub struct ComplianceScanner {
    pool: SqlitePool,
    audit_storage: Arc<AuditLogStorage>,
    sla: SlaConfig,
}

impl ComplianceScanner {
    /// 新しいスキャナを作成
    pub fn new(pool: SqlitePool, audit_storage: Arc<AuditLogStorage>, sla: SlaConfig) -> Self {
        Self {
            pool,
            audit_storage,
            sla,
        }
    }

    /// 全検査を実行する
    pub async fn scan(&self) -> VaultResult<ScanSummary> {
        let now = Utc::now();
        let mut opened = Vec::new();

        let chain = self.check_chain(&mut opened).await?;
        self.check_custody_continuity(&mut opened).await?;
        self.check_checkout_overdue(now, &mut opened).await?;
        let cases_escalated = self.check_case_sla(now, &mut opened).await?;
        self.check_seizure_authority(&mut opened).await?;

        for violation in &opened {
            if violation.kind != ViolationKind::AuditChainIntegrity
                && violation.kind != ViolationKind::CaseSlaBreach
                && matches!(violation.severity, Severity::High | Severity::Critical)
            {
                notifications::enqueue(
                    &self.pool,
                    NotificationKind::ViolationDetected,
                    None,
                    &format!("Compliance violation: {}", violation.kind),
                    &violation.description,
                )
                .await?;
            }
        }

        if !opened.is_empty() {
            warn!(
                violations = opened.len(),
                escalated = cases_escalated.len(),
                "Compliance scan found new violations"
            );
        } else {
            info!("Compliance scan finished without new violations");
        }

        Ok(ScanSummary {
            chain,
            violations_opened: opened,
            cases_escalated,
            scanned_at: now,
        })
    }

    /// 監査チェーンを検証し、異常があれば違反として登録する
    pub async fn check_chain(&self, opened: &mut Vec<Violation>) -> VaultResult<ChainVerificationResult> {
        let result = verify_chain(&self.audit_storage).await?;
        if !result.valid {
            let description = result
                .message
                .clone()
                .unwrap_or_else(|| "audit chain verification failed".to_string());
            if let Some(v) = compliance::open_violation(
                &self.pool,
                ViolationKind::AuditChainIntegrity,
                "audit_log",
                &description,
            )
            .await?
            {
                notifications::enqueue(
                    &self.pool,
                    NotificationKind::ChainIntegrity,
                    None,
                    "Audit log integrity check failed",
                    &description,
                )
                .await?;
                opened.push(v);
            }
        }
        Ok(result)
    }

    async fn check_custody_continuity(&self, opened: &mut Vec<Violation>) -> VaultResult<()> {
        for (id, number) in evidence::list_ids(&self.pool).await? {
            let events = evidence::list_events(&self.pool, id).await?;
            let issues = check_continuity(&events);
            let Some(first) = issues.first() else {
                continue;
            };
            let mut description = format!("{}: event {} {}", number, first.sequence, first.description);
            if issues.len() > 1 {
                description.push_str(&format!(" (+{} more)", issues.len() - 1));
            }
            if let Some(v) = compliance::open_violation(
                &self.pool,
                ViolationKind::CustodyDiscontinuity,
                &id.to_string(),
                &description,
            )
            .await?
            {
                opened.push(v);
            }
        }
        Ok(())
    }

    async fn check_checkout_overdue(&self, now: DateTime<Utc>, opened: &mut Vec<Violation>) -> VaultResult<()> {
        let limit = Duration::days(self.sla.checkout_max_days);
        for item in evidence::list_by_status(&self.pool, CustodyStatus::CheckedOut).await? {
            let Some(since) =
                evidence::last_action_at(&self.pool, item.id, CustodyAction::CheckedOut).await?
            else {
                continue;
            };
            if now - since <= limit {
                continue;
            }
            let description = format!(
                "{} checked out to {} since {} (limit {} days)",
                item.evidence_number,
                item.current_holder,
                since.format("%Y-%m-%d"),
                self.sla.checkout_max_days
            );
            if let Some(v) = compliance::open_violation(
                &self.pool,
                ViolationKind::CustodyCheckoutOverdue,
                &item.id.to_string(),
                &description,
            )
            .await?
            {
                opened.push(v);
            }
        }
        Ok(())
    }

    /// SLAを超過した事件を1段階エスカレーションする
    async fn check_case_sla(&self, now: DateTime<Utc>, opened: &mut Vec<Violation>) -> VaultResult<Vec<Uuid>> {
        let mut escalated = Vec::new();
        for case in cases::list_open(&self.pool).await? {
            let allowed = self.sla.allowed_days(case.priority);
            let deadline = case.opened_at + Duration::days(allowed);
            if now <= deadline {
                continue;
            }
            // 現在の期限を過ぎてからエスカレーション済みなら同じ超過とみなす
            if case.escalated_at.is_some_and(|at| at >= deadline) {
                continue;
            }
            let subject = case.id.to_string();
            if compliance::has_open(&self.pool, ViolationKind::CaseSlaBreach, &subject).await? {
                continue;
            }

            let description = format!(
                "{} open for {} days, {} priority allows {}",
                case.case_number,
                (now - case.opened_at).num_days(),
                case.priority,
                allowed
            );
            let Some(v) = compliance::open_violation(
                &self.pool,
                ViolationKind::CaseSlaBreach,
                &subject,
                &description,
            )
            .await?
            else {
                continue;
            };

            let raised = case.priority.escalated();
            cases::escalate(&self.pool, case.id, raised, now).await?;
            notifications::enqueue(
                &self.pool,
                NotificationKind::CaseEscalated,
                None,
                &format!("Case {} escalated to {}", case.case_number, raised),
                &description,
            )
            .await?;
            info!(
                case_id = %case.id,
                from = %case.priority,
                to = %raised,
                "Case escalated after SLA breach"
            );
            escalated.push(case.id);
            opened.push(v);
        }
        Ok(escalated)
    }

    async fn check_seizure_authority(&self, opened: &mut Vec<Violation>) -> VaultResult<()> {
        for (seizure, instrument) in legal::seizures_with_instruments(&self.pool).await? {
            if instrument.covers(seizure.seized_at) {
                continue;
            }
            let description = format!(
                "seizure at {} on {} is outside the validity of {}",
                seizure.location,
                seizure.seized_at.format("%Y-%m-%d"),
                instrument.reference_number
            );
            if let Some(v) = compliance::open_violation(
                &self.pool,
                ViolationKind::SeizureOutsideAuthority,
                &seizure.id.to_string(),
                &description,
            )
            .await?
            {
                opened.push(v);
            }
        }
        Ok(())
    }

    /// バックグラウンドで定期スキャンを開始
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.sla.scan_interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_secs = self.sla.scan_interval.as_secs(),
                "Compliance scanner started"
            );
            // 最初のtickはスキップ（起動時のチェーン検証と重ねない）
            timer.tick().await;
            loop {
                timer.tick().await;
                if let Err(e) = self.scan().await {
                    error!("Compliance scan error: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cases::test_helpers::sample_case;
    use crate::db::cases::NewCase;
    use crate::db::evidence::test_helpers::sample_evidence;
    use crate::db::evidence::NewCustodyEvent;
    use crate::db::legal::test_helpers::sample_warrant;
    use crate::types::case::CasePriority;
    use crate::types::compliance::ViolationStatus;
    use crate::types::legal::InstrumentStatus;

    async fn scanner() -> (ComplianceScanner, SqlitePool) {
        let pool = crate::db::test_utils::test_db_pool().await;
        let storage = Arc::new(AuditLogStorage::new(pool.clone()));
        (
            ComplianceScanner::new(pool.clone(), storage, SlaConfig::default()),
            pool,
        )
    }

    async fn overdue_case(pool: &SqlitePool, priority: CasePriority, days_open: i64) -> crate::types::case::Case {
        cases::create(
            pool,
            NewCase {
                title: "Old case".to_string(),
                description: None,
                priority: Some(priority),
                lead_investigator_id: None,
                opened_at: Some(Utc::now() - Duration::days(days_open)),
                due_at: None,
            },
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_clean_database_has_no_violations() {
        let (scanner, pool) = scanner().await;
        let case = sample_case(&pool, "Fresh").await;
        sample_evidence(&pool, case.id).await;

        let summary = scanner.scan().await.unwrap();
        assert!(summary.chain.valid);
        assert!(summary.violations_opened.is_empty());
        assert!(summary.cases_escalated.is_empty());
    }

    #[tokio::test]
    async fn test_sla_breach_escalates_once() {
        let (scanner, pool) = scanner().await;
        let case = overdue_case(&pool, CasePriority::Medium, 100).await;

        let first = scanner.scan().await.unwrap();
        assert_eq!(first.cases_escalated, vec![case.id]);
        let stored = cases::get(&pool, case.id).await.unwrap();
        assert_eq!(stored.priority, CasePriority::High);
        assert!(stored.escalated_at.is_some());
        assert_eq!(notifications::count_pending(&pool).await.unwrap(), 1);

        // 未解決の違反がある間は再エスカレーションしない
        let second = scanner.scan().await.unwrap();
        assert!(second.cases_escalated.is_empty());
        assert_eq!(
            cases::get(&pool, case.id).await.unwrap().priority,
            CasePriority::High
        );
    }

    #[tokio::test]
    async fn test_resolved_breach_is_not_escalated_again() {
        let (scanner, pool) = scanner().await;
        let case = overdue_case(&pool, CasePriority::Low, 200).await;

        let mut escalations = 0;
        for _ in 0..3 {
            let summary = scanner.scan().await.unwrap();
            escalations += summary.cases_escalated.len();
            for v in &summary.violations_opened {
                compliance::resolve(&pool, v.id, None).await.unwrap();
            }
        }

        assert_eq!(escalations, 1);
        assert_eq!(
            cases::get(&pool, case.id).await.unwrap().priority,
            CasePriority::Medium
        );
        assert_eq!(notifications::count_pending(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lowered_priority_starts_new_breach() {
        let (scanner, pool) = scanner().await;
        let case = overdue_case(&pool, CasePriority::Medium, 100).await;
        let first = scanner.scan().await.unwrap();
        assert_eq!(first.cases_escalated, vec![case.id]);
        for v in &first.violations_opened {
            compliance::resolve(&pool, v.id, None).await.unwrap();
        }

        // 前回のエスカレーションより後に期限が来る優先度へ下げる
        sqlx::query("UPDATE cases SET priority = 'low', opened_at = ?, escalated_at = ? WHERE id = ?")
            .bind(crate::db::ts(&(Utc::now() - Duration::days(400))))
            .bind(crate::db::ts(&(Utc::now() - Duration::days(300))))
            .bind(case.id.to_string())
            .execute(&pool)
            .await
            .unwrap();
        let later = scanner.scan().await.unwrap();
        assert_eq!(later.cases_escalated, vec![case.id]);
    }

    #[tokio::test]
    async fn test_critical_case_stays_critical() {
        let (scanner, pool) = scanner().await;
        let case = overdue_case(&pool, CasePriority::Critical, 30).await;

        scanner.scan().await.unwrap();
        assert_eq!(
            cases::get(&pool, case.id).await.unwrap().priority,
            CasePriority::Critical
        );
    }

    #[tokio::test]
    async fn test_checkout_overdue_detected() {
        let (scanner, pool) = scanner().await;
        let case = sample_case(&pool, "Checkout").await;
        let item = evidence::create(
            &pool,
            evidence::NewEvidence {
                case_id: case.id,
                description: "Phone".to_string(),
                evidence_type: "mobile_device".to_string(),
                collected_at: Some(Utc::now() - Duration::days(40)),
                collected_by: "officer-1".to_string(),
                location: None,
                sha256: None,
            },
            None,
        )
        .await
        .unwrap()
        .evidence;
        evidence::append_event(
            &pool,
            item.id,
            NewCustodyEvent {
                action: CustodyAction::CheckedOut,
                from_holder: None,
                to_holder: Some("analyst-2".to_string()),
                location: None,
                occurred_at: Some(Utc::now() - Duration::days(30)),
                notes: None,
            },
            None,
        )
        .await
        .unwrap();

        let summary = scanner.scan().await.unwrap();
        let kinds: Vec<_> = summary.violations_opened.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::CustodyCheckoutOverdue]);
        assert_eq!(summary.violations_opened[0].subject_id, item.id.to_string());
    }

    #[tokio::test]
    async fn test_custody_discontinuity_detected() {
        let (scanner, pool) = scanner().await;
        let case = sample_case(&pool, "Gap").await;
        let item = sample_evidence(&pool, case.id).await;
        // 連番2を飛ばしたイベントを直接書き込む
        sqlx::query(
            "INSERT INTO custody_events (id, evidence_id, sequence, action, from_holder, to_holder,
                location, occurred_at, notes, recorded_by, created_at)
             VALUES (?, ?, 3, 'transferred', 'officer-1', 'officer-9', NULL, ?, NULL, NULL, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(item.id.to_string())
        .bind(crate::db::ts(&Utc::now()))
        .bind(crate::db::ts(&Utc::now()))
        .execute(&pool)
        .await
        .unwrap();

        let summary = scanner.scan().await.unwrap();
        assert_eq!(summary.violations_opened.len(), 1);
        let v = &summary.violations_opened[0];
        assert_eq!(v.kind, ViolationKind::CustodyDiscontinuity);
        assert_eq!(v.status, ViolationStatus::Open);
        assert!(v.description.starts_with(&item.evidence_number));
        // 重大度highは通知される
        assert_eq!(notifications::count_pending(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_seizure_outside_instrument_window() {
        let (scanner, pool) = scanner().await;
        let case = sample_case(&pool, "Seizure").await;
        let warrant = sample_warrant(&pool, case.id, "W-77").await;
        legal::change_instrument_status(&pool, warrant.id, InstrumentStatus::Active)
            .await
            .unwrap();
        let seizure = legal::create_seizure(
            &pool,
            legal::NewSeizure {
                case_id: case.id,
                legal_instrument_id: Some(warrant.id),
                seized_at: Utc::now() - Duration::days(1),
                location: "Warehouse 4".to_string(),
                seized_by: None,
                description: None,
                item_count: 1,
            },
        )
        .await
        .unwrap();
        sqlx::query("UPDATE legal_instruments SET expires_at = ? WHERE id = ?")
            .bind(crate::db::ts(&(Utc::now() - Duration::days(5))))
            .bind(warrant.id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let summary = scanner.scan().await.unwrap();
        assert_eq!(summary.violations_opened.len(), 1);
        assert_eq!(summary.violations_opened[0].kind, ViolationKind::SeizureOutsideAuthority);
        assert_eq!(summary.violations_opened[0].subject_id, seizure.id.to_string());
    }

    #[tokio::test]
    async fn test_tampered_chain_opens_critical_violation() {
        let (scanner, pool) = scanner().await;
        scanner
            .audit_storage
            .append_batch(vec![
                crate::audit::types::AuditEvent::system(
                    crate::audit::types::AuditAction::System,
                    "test",
                    None,
                ),
                crate::audit::types::AuditEvent::system(
                    crate::audit::types::AuditAction::System,
                    "test",
                    None,
                ),
            ])
            .await
            .unwrap();
        sqlx::query("DELETE FROM audit_log_entries WHERE sequence_number = 1")
            .execute(&pool)
            .await
            .unwrap();

        let summary = scanner.scan().await.unwrap();
        assert!(!summary.chain.valid);
        let v = &summary.violations_opened[0];
        assert_eq!(v.kind, ViolationKind::AuditChainIntegrity);
        assert_eq!(v.severity, Severity::Critical);

        // 2回目は重複登録しない
        let again = scanner.scan().await.unwrap();
        assert!(again.violations_opened.is_empty());
    }
}
