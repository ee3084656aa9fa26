//! 事件・関係者のCRUD

use crate::common::error::{VaultError, VaultResult};
use crate::common::types::{Page, PageParams};
use crate::db::{
    is_unique_violation, parse_enum, parse_ts, parse_ts_opt, parse_uuid, parse_uuid_opt, ts,
    SqlFilter,
};
use crate::types::case::{case_year, format_case_number, Case, CasePriority, CaseStatus, Party};
use crate::types::lookup::LookupCategory;
use crate::types::{optional, required};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

const CASE_COLUMNS: &str = "id, case_number, title, description, status, priority, \
    lead_investigator_id, opened_at, due_at, closed_at, escalated_at, created_by, created_at, updated_at";

const PARTY_COLUMNS: &str = "id, case_id, name, role, contact, notes, created_at, updated_at";

/// 件名の最大文字数
pub const TITLE_MAX_LEN: usize = 200;

/// 採番衝突時の再試行回数
const NUMBERING_ATTEMPTS: usize = 5;

const PRIORITY_RANK_SQL: &str =
    "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 WHEN 'high' THEN 2 ELSE 3 END";

str_enum! {
    /// 一覧の並び順
    pub enum CaseSort {
        /// 受付日時
        OpenedAt => "opened_at",
        /// 更新日時
        UpdatedAt => "updated_at",
        /// 優先度
        Priority => "priority",
    }
}

str_enum! {
    /// 並び方向
    pub enum SortOrder {
        /// 昇順
        Asc => "asc",
        /// 降順
        Desc => "desc",
    }
}

/// 事件一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseFilter {
    /// ステータス
    pub status: Option<CaseStatus>,
    /// 優先度
    pub priority: Option<CasePriority>,
    /// 主任捜査員
    pub lead_investigator_id: Option<Uuid>,
    /// 件名・事件番号の部分一致
    pub q: Option<String>,
    /// 並び順（既定: opened_at）
    pub sort: Option<CaseSort>,
    /// 並び方向（既定: desc）
    pub order: Option<SortOrder>,
    /// ページ番号
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

impl CaseFilter {
    /// ページング指定
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// 事件の作成内容
#[derive(Debug, Clone, Deserialize)]
pub struct NewCase {
    /// 件名
    pub title: String,
    /// 概要
    pub description: Option<String>,
    /// 優先度（既定: medium）
    pub priority: Option<CasePriority>,
    /// 主任捜査員
    pub lead_investigator_id: Option<Uuid>,
    /// 受付日時（既定: 現在）
    pub opened_at: Option<DateTime<Utc>>,
    /// 期限
    pub due_at: Option<DateTime<Utc>>,
}

/// 事件の更新内容（Noneは変更なし）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseUpdate {
    /// 件名
    pub title: Option<String>,
    /// 概要
    pub description: Option<String>,
    /// 優先度
    pub priority: Option<CasePriority>,
    /// 主任捜査員
    pub lead_investigator_id: Option<Uuid>,
    /// 期限
    pub due_at: Option<DateTime<Utc>>,
}

/// 関係者の作成・更新内容
#[derive(Debug, Clone, Deserialize)]
pub struct PartyInput {
    /// 氏名
    pub name: String,
    /// 役割（ルックアップ party_role）
    pub role: String,
    /// 連絡先
    pub contact: Option<String>,
    /// 備考
    pub notes: Option<String>,
}

/// 件数の集計行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CountRow {
    /// 集計キー
    pub key: String,
    /// 件数
    pub count: i64,
}

/// 事件一覧を取得
pub async fn list(pool: &SqlitePool, filter: &CaseFilter) -> VaultResult<Page<Case>> {
    let mut f = SqlFilter::default();
    f.eq("status", filter.status.map(|s| s.as_str()))
        .eq("priority", filter.priority.map(|p| p.as_str()))
        .eq("lead_investigator_id", filter.lead_investigator_id)
        .search(&["title", "case_number"], filter.q.as_deref());

    let sort_column = match filter.sort.unwrap_or(CaseSort::OpenedAt) {
        CaseSort::OpenedAt => "opened_at",
        CaseSort::UpdatedAt => "updated_at",
        CaseSort::Priority => PRIORITY_RANK_SQL,
    };
    let direction = match filter.order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    let params = filter.page_params();

    let count_sql = format!("SELECT COUNT(*) FROM cases {}", f.where_clause());
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for val in f.binds() {
        count_query = count_query.bind(val.as_str());
    }
    let total = count_query
        .fetch_one(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to count cases: {}", e)))?;

    let sql = format!(
        "SELECT {} FROM cases {} ORDER BY {} {}, case_number {} LIMIT ? OFFSET ?",
        CASE_COLUMNS,
        f.where_clause(),
        sort_column,
        direction,
        direction
    );
    let mut query = sqlx::query_as::<_, CaseRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to list cases: {}", e)))?;

    let items = rows
        .into_iter()
        .map(Case::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, &params))
}

/// 未終結の事件をすべて取得（SLA検査用）
pub async fn list_open(pool: &SqlitePool) -> VaultResult<Vec<Case>> {
    let sql = format!(
        "SELECT {} FROM cases WHERE status NOT IN ('closed', 'archived') ORDER BY opened_at",
        CASE_COLUMNS
    );
    let rows = sqlx::query_as::<_, CaseRow>(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to list open cases: {}", e)))?;
    rows.into_iter().map(Case::try_from).collect()
}

/// IDで取得
pub async fn get(pool: &SqlitePool, id: Uuid) -> VaultResult<Case> {
    let sql = format!("SELECT {} FROM cases WHERE id = ?", CASE_COLUMNS);
    sqlx::query_as::<_, CaseRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to get case: {}", e)))?
        .map(Case::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("case {}", id)))
}

async fn ensure_user_exists(pool: &SqlitePool, user_id: Option<Uuid>) -> VaultResult<()> {
    if let Some(id) = user_id {
        if crate::db::users::find_by_id(pool, id).await?.is_none() {
            return Err(VaultError::validation(format!(
                "lead investigator {} does not exist",
                id
            )));
        }
    }
    Ok(())
}

/// 事件を作成（事件番号は受付年ごとの連番）
pub async fn create(pool: &SqlitePool, input: NewCase, created_by: Option<Uuid>) -> VaultResult<Case> {
    let title = required("title", &input.title, TITLE_MAX_LEN)?;
    ensure_user_exists(pool, input.lead_investigator_id).await?;

    let now = Utc::now();
    let opened_at = input.opened_at.unwrap_or(now);
    let year = case_year(&opened_at);

    let mut case = Case {
        id: Uuid::new_v4(),
        case_number: String::new(),
        title,
        description: optional(input.description),
        status: CaseStatus::Open,
        priority: input.priority.unwrap_or(CasePriority::Medium),
        lead_investigator_id: input.lead_investigator_id,
        opened_at,
        due_at: input.due_at,
        closed_at: None,
        escalated_at: None,
        created_by,
        created_at: now,
        updated_at: now,
    };

    for _ in 0..NUMBERING_ATTEMPTS {
        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(case_seq), 0) + 1 FROM cases WHERE case_year = ?",
        )
        .bind(year)
        .fetch_one(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to allocate case number: {}", e)))?;
        case.case_number = format_case_number(year, seq);

        let inserted = sqlx::query(
            "INSERT INTO cases (id, case_number, case_year, case_seq, title, description, status, priority,
                lead_investigator_id, opened_at, due_at, closed_at, escalated_at, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?)",
        )
        .bind(case.id.to_string())
        .bind(&case.case_number)
        .bind(year)
        .bind(seq)
        .bind(&case.title)
        .bind(&case.description)
        .bind(case.status.as_str())
        .bind(case.priority.as_str())
        .bind(case.lead_investigator_id.map(|id| id.to_string()))
        .bind(ts(&case.opened_at))
        .bind(case.due_at.as_ref().map(ts))
        .bind(case.created_by.map(|id| id.to_string()))
        .bind(ts(&now))
        .bind(ts(&now))
        .execute(pool)
        .await;

        match inserted {
            Ok(_) => {
                tracing::info!(case_id = %case.id, case_number = %case.case_number, "Case created");
                return Ok(case);
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(case_number = %case.case_number, "Case number taken, retrying");
                continue;
            }
            Err(e) => return Err(VaultError::Database(format!("Failed to create case: {}", e))),
        }
    }

    Err(VaultError::Conflict(
        "Could not allocate a case number, try again".to_string(),
    ))
}

/// 事件を部分更新（アーカイブ済みは不可）
pub async fn update(pool: &SqlitePool, id: Uuid, changes: CaseUpdate) -> VaultResult<Case> {
    let mut case = get(pool, id).await?;
    if case.status == CaseStatus::Archived {
        return Err(VaultError::Conflict(format!(
            "case {} is archived and cannot be modified",
            case.case_number
        )));
    }

    if let Some(title) = changes.title {
        case.title = required("title", &title, TITLE_MAX_LEN)?;
    }
    if changes.description.is_some() {
        case.description = optional(changes.description);
    }
    if let Some(priority) = changes.priority {
        case.priority = priority;
    }
    if changes.lead_investigator_id.is_some() {
        ensure_user_exists(pool, changes.lead_investigator_id).await?;
        case.lead_investigator_id = changes.lead_investigator_id;
    }
    if changes.due_at.is_some() {
        case.due_at = changes.due_at;
    }
    case.updated_at = Utc::now();

    sqlx::query(
        "UPDATE cases SET title = ?, description = ?, priority = ?, lead_investigator_id = ?,
            due_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&case.title)
    .bind(&case.description)
    .bind(case.priority.as_str())
    .bind(case.lead_investigator_id.map(|id| id.to_string()))
    .bind(case.due_at.as_ref().map(ts))
    .bind(ts(&case.updated_at))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| VaultError::Database(format!("Failed to update case: {}", e)))?;

    Ok(case)
}

/// ステータスを変更する
///
/// 終結で`closed_at`を設定し、再開（closed → active）で消去する。
pub async fn change_status(pool: &SqlitePool, id: Uuid, next: CaseStatus) -> VaultResult<Case> {
    let mut case = get(pool, id).await?;
    if !case.status.can_transition_to(next) {
        return Err(VaultError::InvalidTransition(format!(
            "case cannot move from '{}' to '{}'",
            case.status, next
        )));
    }

    let now = Utc::now();
    match next {
        CaseStatus::Closed => case.closed_at = Some(now),
        CaseStatus::Archived => {}
        _ => case.closed_at = None,
    }
    let previous = case.status;
    case.status = next;
    case.updated_at = now;

    // 読み取り後に別リクエストが遷移させていれば更新しない
    let result = sqlx::query(
        "UPDATE cases SET status = ?, closed_at = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(case.status.as_str())
    .bind(case.closed_at.as_ref().map(ts))
    .bind(ts(&now))
    .bind(id.to_string())
    .bind(previous.as_str())
    .execute(pool)
    .await
    .map_err(|e| VaultError::Database(format!("Failed to change case status: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(VaultError::Conflict(format!(
            "case {} was modified concurrently",
            case.case_number
        )));
    }

    tracing::info!(case_id = %id, from = %previous, to = %next, "Case status changed");
    Ok(case)
}

/// SLA超過で優先度を引き上げる
pub async fn escalate(
    pool: &SqlitePool,
    id: Uuid,
    priority: CasePriority,
    at: DateTime<Utc>,
) -> VaultResult<()> {
    sqlx::query("UPDATE cases SET priority = ?, escalated_at = ?, updated_at = ? WHERE id = ?")
        .bind(priority.as_str())
        .bind(ts(&at))
        .bind(ts(&at))
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to escalate case: {}", e)))?;
    Ok(())
}

/// 事件を削除（証拠が紐づく場合は不可）
pub async fn delete(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let case = get(pool, id).await?;
    let evidence_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evidence WHERE case_id = ?")
        .bind(id.to_string())
        .fetch_one(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to count evidence: {}", e)))?;

    if evidence_count > 0 {
        return Err(VaultError::Conflict(format!(
            "case {} has {} evidence item(s) and cannot be deleted",
            case.case_number, evidence_count
        )));
    }

    sqlx::query("DELETE FROM cases WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to delete case: {}", e)))?;
    Ok(())
}

/// ステータス別件数
pub async fn count_by_status(pool: &SqlitePool) -> VaultResult<Vec<CountRow>> {
    group_count(pool, "status").await
}

/// 優先度別件数
pub async fn count_by_priority(pool: &SqlitePool) -> VaultResult<Vec<CountRow>> {
    group_count(pool, "priority").await
}

async fn group_count(pool: &SqlitePool, column: &str) -> VaultResult<Vec<CountRow>> {
    let sql = format!(
        "SELECT {col} AS key, COUNT(*) AS count FROM cases GROUP BY {col} ORDER BY {col}",
        col = column
    );
    sqlx::query_as::<_, CountRow>(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to count cases: {}", e)))
}

/// 期間内に受付・終結した件数と平均終結日数
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaseWindowStats {
    /// 期間内に受付した件数
    pub opened: i64,
    /// 期間内に終結した件数
    pub closed: i64,
    /// 期間内に終結した事件の平均日数
    pub mean_days_to_close: Option<f64>,
}

/// 期間 [from, to) の受付・終結状況
pub async fn window_stats(
    pool: &SqlitePool,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> VaultResult<CaseWindowStats> {
    let db_err = |e: sqlx::Error| VaultError::Database(format!("Failed to compute case stats: {}", e));

    let opened: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM cases WHERE opened_at >= ? AND opened_at < ?")
            .bind(ts(from))
            .bind(ts(to))
            .fetch_one(pool)
            .await
            .map_err(db_err)?;

    let (closed, mean_days_to_close): (i64, Option<f64>) = sqlx::query_as(
        "SELECT COUNT(*), AVG(julianday(closed_at) - julianday(opened_at))
         FROM cases WHERE closed_at IS NOT NULL AND closed_at >= ? AND closed_at < ?",
    )
    .bind(ts(from))
    .bind(ts(to))
    .fetch_one(pool)
    .await
    .map_err(db_err)?;

    Ok(CaseWindowStats {
        opened,
        closed,
        mean_days_to_close,
    })
}

/// 事件の関係者一覧
pub async fn list_parties(pool: &SqlitePool, case_id: Uuid) -> VaultResult<Vec<Party>> {
    get(pool, case_id).await?;
    let sql = format!(
        "SELECT {} FROM parties WHERE case_id = ? ORDER BY created_at",
        PARTY_COLUMNS
    );
    let rows = sqlx::query_as::<_, PartyRow>(&sql)
        .bind(case_id.to_string())
        .fetch_all(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to list parties: {}", e)))?;
    rows.into_iter().map(Party::try_from).collect()
}

/// 関係者を取得
pub async fn get_party(pool: &SqlitePool, id: Uuid) -> VaultResult<Party> {
    let sql = format!("SELECT {} FROM parties WHERE id = ?", PARTY_COLUMNS);
    sqlx::query_as::<_, PartyRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to get party: {}", e)))?
        .map(Party::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("party {}", id)))
}

async fn validated_party(pool: &SqlitePool, input: PartyInput) -> VaultResult<PartyInput> {
    let name = required("name", &input.name, 200)?;
    let role = input.role.trim().to_string();
    crate::db::lookups::validate_code(pool, LookupCategory::PartyRole, &role).await?;
    Ok(PartyInput {
        name,
        role,
        contact: optional(input.contact),
        notes: optional(input.notes),
    })
}

/// 関係者を追加
pub async fn create_party(pool: &SqlitePool, case_id: Uuid, input: PartyInput) -> VaultResult<Party> {
    let case = get(pool, case_id).await?;
    if case.status == CaseStatus::Archived {
        return Err(VaultError::Conflict(format!(
            "case {} is archived and cannot be modified",
            case.case_number
        )));
    }
    let input = validated_party(pool, input).await?;
    let now = Utc::now();
    let party = Party {
        id: Uuid::new_v4(),
        case_id,
        name: input.name,
        role: input.role,
        contact: input.contact,
        notes: input.notes,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO parties (id, case_id, name, role, contact, notes, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(party.id.to_string())
    .bind(case_id.to_string())
    .bind(&party.name)
    .bind(&party.role)
    .bind(&party.contact)
    .bind(&party.notes)
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(|e| VaultError::Database(format!("Failed to create party: {}", e)))?;

    Ok(party)
}

/// 関係者を更新
pub async fn update_party(pool: &SqlitePool, id: Uuid, input: PartyInput) -> VaultResult<Party> {
    let mut party = get_party(pool, id).await?;
    let input = validated_party(pool, input).await?;
    party.name = input.name;
    party.role = input.role;
    party.contact = input.contact;
    party.notes = input.notes;
    party.updated_at = Utc::now();

    sqlx::query("UPDATE parties SET name = ?, role = ?, contact = ?, notes = ?, updated_at = ? WHERE id = ?")
        .bind(&party.name)
        .bind(&party.role)
        .bind(&party.contact)
        .bind(&party.notes)
        .bind(ts(&party.updated_at))
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to update party: {}", e)))?;

    Ok(party)
}

/// 関係者を削除
pub async fn delete_party(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let result = sqlx::query("DELETE FROM parties WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to delete party: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(VaultError::NotFound(format!("party {}", id)));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct CaseRow {
    id: String,
    case_number: String,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    lead_investigator_id: Option<String>,
    opened_at: String,
    due_at: Option<String>,
    closed_at: Option<String>,
    escalated_at: Option<String>,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<CaseRow> for Case {
    type Error = VaultError;

    fn try_from(row: CaseRow) -> Result<Self, Self::Error> {
        Ok(Case {
            id: parse_uuid(&row.id)?,
            case_number: row.case_number,
            title: row.title,
            description: row.description,
            status: parse_enum("status", &row.status)?,
            priority: parse_enum("priority", &row.priority)?,
            lead_investigator_id: parse_uuid_opt(row.lead_investigator_id)?,
            opened_at: parse_ts(&row.opened_at)?,
            due_at: parse_ts_opt(row.due_at)?,
            closed_at: parse_ts_opt(row.closed_at)?,
            escalated_at: parse_ts_opt(row.escalated_at)?,
            created_by: parse_uuid_opt(row.created_by)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PartyRow {
    id: String,
    case_id: String,
    name: String,
    role: String,
    contact: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PartyRow> for Party {
    type Error = VaultError;

    fn try_from(row: PartyRow) -> Result<Self, Self::Error> {
        Ok(Party {
            id: parse_uuid(&row.id)?,
            case_id: parse_uuid(&row.case_id)?,
            name: row.name,
            role: row.role,
            contact: row.contact,
            notes: row.notes,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;

    /// テスト用の事件を作成する
    pub async fn sample_case(pool: &SqlitePool, title: &str) -> Case {
        create(
            pool,
            NewCase {
                title: title.to_string(),
                description: None,
                priority: None,
                lead_investigator_id: None,
                opened_at: None,
                due_at: None,
            },
            None,
        )
        .await
        .expect("create case")
    }
}
