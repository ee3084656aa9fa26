//! 保持ポリシーと保持ジョブのストレージ

use crate::common::error::{VaultError, VaultResult};
use crate::common::types::{Page, PageParams};
use crate::db::{is_unique_violation, parse_enum, parse_ts, parse_ts_opt, parse_uuid, ts, SqlFilter};
use crate::types::compliance::{
    RetentionJob, RetentionJobStatus, RetentionPolicy, RetentionTarget, RetentionTrigger,
};
use crate::types::required;
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

const POLICY_COLUMNS: &str = "id, name, target, retention_days, enabled, created_at, updated_at";
const JOB_COLUMNS: &str =
    "id, policy_id, status, trigger, records_processed, error, started_at, finished_at, created_at";

/// 保持ポリシーの作成内容
#[derive(Debug, Clone, Deserialize)]
pub struct NewPolicy {
    /// 名前
    pub name: String,
    /// 対象
    pub target: RetentionTarget,
    /// 保持日数
    pub retention_days: i64,
    /// 有効フラグ
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// 保持ポリシーの更新内容（Noneは変更なし）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyUpdate {
    /// 名前
    pub name: Option<String>,
    /// 保持日数
    pub retention_days: Option<i64>,
    /// 有効フラグ
    pub enabled: Option<bool>,
}

/// ジョブ一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    /// ポリシーID
    pub policy_id: Option<Uuid>,
    /// ページ番号
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> VaultError {
    move |e| {
        if is_unique_violation(&e) {
            VaultError::Conflict("A retention policy with this name already exists".to_string())
        } else {
            VaultError::Database(format!("Failed to {}: {}", context, e))
        }
    }
}

fn check_days(days: i64) -> VaultResult<()> {
    if days < 1 {
        return Err(VaultError::validation("retention_days must be at least 1"));
    }
    Ok(())
}

/// ポリシー一覧
pub async fn list_policies(pool: &SqlitePool) -> VaultResult<Vec<RetentionPolicy>> {
    let sql = format!("SELECT {} FROM retention_policies ORDER BY name", POLICY_COLUMNS);
    let rows = sqlx::query_as::<_, PolicyRow>(&sql)
        .fetch_all(pool)
        .await
        .map_err(db_err("list retention policies"))?;
    rows.into_iter().map(RetentionPolicy::try_from).collect()
}

/// ポリシーを取得
pub async fn get_policy(pool: &SqlitePool, id: Uuid) -> VaultResult<RetentionPolicy> {
    let sql = format!("SELECT {} FROM retention_policies WHERE id = ?", POLICY_COLUMNS);
    sqlx::query_as::<_, PolicyRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get retention policy"))?
        .map(RetentionPolicy::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("retention policy {}", id)))
}

/// ポリシーを作成
pub async fn create_policy(pool: &SqlitePool, input: NewPolicy) -> VaultResult<RetentionPolicy> {
    check_days(input.retention_days)?;
    let now = Utc::now();
    let policy = RetentionPolicy {
        id: Uuid::new_v4(),
        name: required("name", &input.name, 100)?,
        target: input.target,
        retention_days: input.retention_days,
        enabled: input.enabled,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO retention_policies (id, name, target, retention_days, enabled, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(policy.id.to_string())
    .bind(&policy.name)
    .bind(policy.target.as_str())
    .bind(policy.retention_days)
    .bind(policy.enabled as i64)
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(db_err("create retention policy"))?;

    Ok(policy)
}

/// ポリシーを更新
pub async fn update_policy(pool: &SqlitePool, id: Uuid, changes: PolicyUpdate) -> VaultResult<RetentionPolicy> {
    let mut policy = get_policy(pool, id).await?;
    if let Some(name) = changes.name {
        policy.name = required("name", &name, 100)?;
    }
    if let Some(days) = changes.retention_days {
        check_days(days)?;
        policy.retention_days = days;
    }
    if let Some(enabled) = changes.enabled {
        policy.enabled = enabled;
    }
    policy.updated_at = Utc::now();

    sqlx::query(
        "UPDATE retention_policies SET name = ?, retention_days = ?, enabled = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&policy.name)
    .bind(policy.retention_days)
    .bind(policy.enabled as i64)
    .bind(ts(&policy.updated_at))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("update retention policy"))?;

    Ok(policy)
}

/// ポリシーを削除（ジョブ履歴も削除される）
pub async fn delete_policy(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let mut tx = pool.begin().await.map_err(db_err("begin transaction"))?;
    sqlx::query("DELETE FROM retention_jobs WHERE policy_id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err("delete retention jobs"))?;
    let result = sqlx::query("DELETE FROM retention_policies WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err("delete retention policy"))?;
    if result.rows_affected() == 0 {
        return Err(VaultError::NotFound(format!("retention policy {}", id)));
    }
    tx.commit().await.map_err(db_err("commit transaction"))?;
    Ok(())
}

/// 実行中のジョブを記録する
pub async fn start_job(
    pool: &SqlitePool,
    policy_id: Uuid,
    trigger: RetentionTrigger,
) -> VaultResult<RetentionJob> {
    let now = Utc::now();
    let job = RetentionJob {
        id: Uuid::new_v4(),
        policy_id,
        status: RetentionJobStatus::Running,
        trigger,
        records_processed: 0,
        error: None,
        started_at: Some(now),
        finished_at: None,
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO retention_jobs (id, policy_id, status, trigger, records_processed, error,
            started_at, finished_at, created_at)
         VALUES (?, ?, ?, ?, 0, NULL, ?, NULL, ?)",
    )
    .bind(job.id.to_string())
    .bind(policy_id.to_string())
    .bind(job.status.as_str())
    .bind(job.trigger.as_str())
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(db_err("create retention job"))?;

    Ok(job)
}

/// ジョブの終了を記録する
pub async fn finish_job(
    pool: &SqlitePool,
    mut job: RetentionJob,
    outcome: Result<i64, String>,
) -> VaultResult<RetentionJob> {
    let now = Utc::now();
    match outcome {
        Ok(records) => {
            job.status = RetentionJobStatus::Completed;
            job.records_processed = records;
        }
        Err(message) => {
            job.status = RetentionJobStatus::Failed;
            job.error = Some(message);
        }
    }
    job.finished_at = Some(now);

    sqlx::query(
        "UPDATE retention_jobs SET status = ?, records_processed = ?, error = ?, finished_at = ? WHERE id = ?",
    )
    .bind(job.status.as_str())
    .bind(job.records_processed)
    .bind(&job.error)
    .bind(ts(&now))
    .bind(job.id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("finish retention job"))?;

    Ok(job)
}

/// 前回のプロセスで終わらなかったジョブを失敗扱いにする
pub async fn fail_interrupted_jobs(pool: &SqlitePool) -> VaultResult<u64> {
    let result = sqlx::query(
        "UPDATE retention_jobs SET status = 'failed', error = 'interrupted by shutdown', finished_at = ?
         WHERE status IN ('pending', 'running')",
    )
    .bind(ts(&Utc::now()))
    .execute(pool)
    .await
    .map_err(db_err("fail interrupted retention jobs"))?;
    Ok(result.rows_affected())
}

/// ジョブ一覧（新しい順）
pub async fn list_jobs(pool: &SqlitePool, filter: &JobFilter) -> VaultResult<Page<RetentionJob>> {
    let mut f = SqlFilter::default();
    f.eq("policy_id", filter.policy_id);
    let params = PageParams {
        page: filter.page,
        per_page: filter.per_page,
    };

    let count_sql = format!("SELECT COUNT(*) FROM retention_jobs {}", f.where_clause());
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for val in f.binds() {
        count_query = count_query.bind(val.as_str());
    }
    let total = count_query
        .fetch_one(pool)
        .await
        .map_err(db_err("count retention jobs"))?;

    let sql = format!(
        "SELECT {} FROM retention_jobs {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        JOB_COLUMNS,
        f.where_clause()
    );
    let mut query = sqlx::query_as::<_, JobRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(db_err("list retention jobs"))?;

    let items = rows
        .into_iter()
        .map(RetentionJob::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, &params))
}

/// ジョブを取得
pub async fn get_job(pool: &SqlitePool, id: Uuid) -> VaultResult<RetentionJob> {
    let sql = format!("SELECT {} FROM retention_jobs WHERE id = ?", JOB_COLUMNS);
    sqlx::query_as::<_, JobRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get retention job"))?
        .map(RetentionJob::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("retention job {}", id)))
}

/// 最新のジョブ
pub async fn last_job(pool: &SqlitePool) -> VaultResult<Option<RetentionJob>> {
    let sql = format!(
        "SELECT {} FROM retention_jobs ORDER BY created_at DESC LIMIT 1",
        JOB_COLUMNS
    );
    sqlx::query_as::<_, JobRow>(&sql)
        .fetch_optional(pool)
        .await
        .map_err(db_err("get last retention job"))?
        .map(RetentionJob::try_from)
        .transpose()
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: String,
    name: String,
    target: String,
    retention_days: i64,
    enabled: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PolicyRow> for RetentionPolicy {
    type Error = VaultError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        Ok(RetentionPolicy {
            id: parse_uuid(&row.id)?,
            name: row.name,
            target: parse_enum("target", &row.target)?,
            retention_days: row.retention_days,
            enabled: row.enabled != 0,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    policy_id: String,
    status: String,
    trigger: String,
    records_processed: i64,
    error: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
    created_at: String,
}

impl TryFrom<JobRow> for RetentionJob {
    type Error = VaultError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(RetentionJob {
            id: parse_uuid(&row.id)?,
            policy_id: parse_uuid(&row.policy_id)?,
            status: parse_enum("status", &row.status)?,
            trigger: parse_enum("trigger", &row.trigger)?,
            records_processed: row.records_processed,
            error: row.error,
            started_at: parse_ts_opt(row.started_at)?,
            finished_at: parse_ts_opt(row.finished_at)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}
