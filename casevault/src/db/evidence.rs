//! 証拠と保管履歴のストレージ
//!
//! 保管イベントは追記のみ。追記時に状態遷移・保管者の連続性・時刻順を検証し、
//! 証拠の現在の保管者と状態を同一トランザクションで更新する。

use crate::common::error::{VaultError, VaultResult};
use crate::common::types::{Page, PageParams};
use crate::db::cases::CountRow;
use crate::db::{parse_enum, parse_ts, parse_uuid, parse_uuid_opt, ts, SqlFilter};
use crate::types::case::{format_evidence_number, CaseStatus};
use crate::types::evidence::{
    holder_after, normalize_sha256, CustodyAction, CustodyEvent, CustodyStatus, Evidence,
};
use crate::types::lookup::LookupCategory;
use crate::types::{optional, required};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

const EVIDENCE_COLUMNS: &str = "id, case_id, evidence_number, description, evidence_type, collected_at, \
    collected_by, location, current_holder, custody_status, sha256, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, evidence_id, sequence, action, from_holder, to_holder, location, \
    occurred_at, notes, recorded_by, created_at";

/// 証拠一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvidenceFilter {
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// 種別
    pub evidence_type: Option<String>,
    /// 保管状態
    pub custody_status: Option<CustodyStatus>,
    /// ページ番号
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

/// 証拠の登録内容
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvidence {
    /// 事件ID
    pub case_id: Uuid,
    /// 説明
    pub description: String,
    /// 種別（ルックアップ evidence_type）
    pub evidence_type: String,
    /// 収集日時（既定: 現在）
    pub collected_at: Option<DateTime<Utc>>,
    /// 収集者
    pub collected_by: String,
    /// 保管場所
    pub location: Option<String>,
    /// SHA-256
    pub sha256: Option<String>,
}

/// 証拠の更新内容（記述的な項目のみ）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvidenceUpdate {
    /// 説明
    pub description: Option<String>,
    /// 種別
    pub evidence_type: Option<String>,
    /// 保管場所
    pub location: Option<String>,
    /// SHA-256
    pub sha256: Option<String>,
}

/// 保管イベントの追記内容
#[derive(Debug, Clone, Deserialize)]
pub struct NewCustodyEvent {
    /// アクション
    pub action: CustodyAction,
    /// 引き渡し元（省略時は現在の保管者）
    pub from_holder: Option<String>,
    /// 引き渡し先
    pub to_holder: Option<String>,
    /// 場所
    pub location: Option<String>,
    /// 発生日時（既定: 現在）
    pub occurred_at: Option<DateTime<Utc>>,
    /// 備考
    pub notes: Option<String>,
}

/// 保管履歴付きの証拠
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceWithCustody {
    /// 証拠
    #[serde(flatten)]
    pub evidence: Evidence,
    /// 保管履歴（連番順）
    pub custody: Vec<CustodyEvent>,
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> VaultError {
    move |e| VaultError::Database(format!("Failed to {}: {}", context, e))
}

fn parse_sha256(value: Option<String>) -> VaultResult<Option<String>> {
    match optional(value) {
        None => Ok(None),
        Some(v) => normalize_sha256(&v)
            .map(Some)
            .ok_or_else(|| VaultError::validation("sha256 must be 64 hexadecimal characters")),
    }
}

/// 証拠を登録し、収集イベント（連番1）を同時に記録する
pub async fn create(
    pool: &SqlitePool,
    input: NewEvidence,
    recorded_by: Option<Uuid>,
) -> VaultResult<EvidenceWithCustody> {
    let description = required("description", &input.description, 2000)?;
    let collected_by = required("collected_by", &input.collected_by, 200)?;
    let evidence_type = input.evidence_type.trim().to_string();
    let sha256 = parse_sha256(input.sha256)?;
    crate::db::lookups::validate_code(pool, LookupCategory::EvidenceType, &evidence_type).await?;

    let case = crate::db::cases::get(pool, input.case_id).await?;
    if case.status == CaseStatus::Archived {
        return Err(VaultError::Conflict(format!(
            "case {} is archived and cannot receive evidence",
            case.case_number
        )));
    }

    let now = Utc::now();
    let collected_at = input.collected_at.unwrap_or(now);
    let location = optional(input.location);

    let mut tx = pool.begin().await.map_err(db_err("begin transaction"))?;

    // 先に書き込みロックを取得し、採番の競合を防ぐ
    sqlx::query("UPDATE cases SET updated_at = updated_at WHERE id = ?")
        .bind(case.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err("lock case"))?;

    let item_seq: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(item_seq), 0) + 1 FROM evidence WHERE case_id = ?")
            .bind(case.id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("allocate evidence number"))?;

    let evidence = Evidence {
        id: Uuid::new_v4(),
        case_id: case.id,
        evidence_number: format_evidence_number(&case.case_number, item_seq),
        description,
        evidence_type,
        collected_at,
        collected_by: collected_by.clone(),
        location: location.clone(),
        current_holder: collected_by.clone(),
        custody_status: CustodyStatus::InStorage,
        sha256,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO evidence (id, case_id, evidence_number, item_seq, description, evidence_type,
            collected_at, collected_by, location, current_holder, custody_status, sha256, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(evidence.id.to_string())
    .bind(evidence.case_id.to_string())
    .bind(&evidence.evidence_number)
    .bind(item_seq)
    .bind(&evidence.description)
    .bind(&evidence.evidence_type)
    .bind(ts(&evidence.collected_at))
    .bind(&evidence.collected_by)
    .bind(&evidence.location)
    .bind(&evidence.current_holder)
    .bind(evidence.custody_status.as_str())
    .bind(&evidence.sha256)
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(&mut *tx)
    .await
    .map_err(db_err("create evidence"))?;

    let collected = CustodyEvent {
        id: Uuid::new_v4(),
        evidence_id: evidence.id,
        sequence: 1,
        action: CustodyAction::Collected,
        from_holder: None,
        to_holder: Some(collected_by),
        location,
        occurred_at: collected_at,
        notes: None,
        recorded_by,
        created_at: now,
    };
    insert_event(&mut tx, &collected).await?;

    tx.commit().await.map_err(db_err("commit transaction"))?;

    tracing::info!(
        evidence_id = %evidence.id,
        evidence_number = %evidence.evidence_number,
        case_id = %evidence.case_id,
        "Evidence registered"
    );
    Ok(EvidenceWithCustody {
        evidence,
        custody: vec![collected],
    })
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    event: &CustodyEvent,
) -> VaultResult<()> {
    sqlx::query(
        "INSERT INTO custody_events (id, evidence_id, sequence, action, from_holder, to_holder,
            location, occurred_at, notes, recorded_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.id.to_string())
    .bind(event.evidence_id.to_string())
    .bind(event.sequence)
    .bind(event.action.as_str())
    .bind(&event.from_holder)
    .bind(&event.to_holder)
    .bind(&event.location)
    .bind(ts(&event.occurred_at))
    .bind(&event.notes)
    .bind(event.recorded_by.map(|id| id.to_string()))
    .bind(ts(&event.created_at))
    .execute(&mut **tx)
    .await
    .map_err(db_err("record custody event"))?;
    Ok(())
}

/// 証拠一覧
pub async fn list(pool: &SqlitePool, filter: &EvidenceFilter) -> VaultResult<Page<Evidence>> {
    let mut f = SqlFilter::default();
    f.eq("case_id", filter.case_id)
        .eq("evidence_type", filter.evidence_type.as_deref())
        .eq("custody_status", filter.custody_status.map(|s| s.as_str()));
    let params = PageParams {
        page: filter.page,
        per_page: filter.per_page,
    };

    let count_sql = format!("SELECT COUNT(*) FROM evidence {}", f.where_clause());
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for val in f.binds() {
        count_query = count_query.bind(val.as_str());
    }
    let total = count_query
        .fetch_one(pool)
        .await
        .map_err(db_err("count evidence"))?;

    let sql = format!(
        "SELECT {} FROM evidence {} ORDER BY created_at DESC, evidence_number DESC LIMIT ? OFFSET ?",
        EVIDENCE_COLUMNS,
        f.where_clause()
    );
    let mut query = sqlx::query_as::<_, EvidenceRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(db_err("list evidence"))?;

    let items = rows
        .into_iter()
        .map(Evidence::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, &params))
}

/// 指定の保管状態にある証拠をすべて取得
pub async fn list_by_status(pool: &SqlitePool, status: CustodyStatus) -> VaultResult<Vec<Evidence>> {
    let sql = format!(
        "SELECT {} FROM evidence WHERE custody_status = ? ORDER BY evidence_number",
        EVIDENCE_COLUMNS
    );
    let rows = sqlx::query_as::<_, EvidenceRow>(&sql)
        .bind(status.as_str())
        .fetch_all(pool)
        .await
        .map_err(db_err("list evidence"))?;
    rows.into_iter().map(Evidence::try_from).collect()
}

/// 全証拠のIDと番号
pub async fn list_ids(pool: &SqlitePool) -> VaultResult<Vec<(Uuid, String)>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT id, evidence_number FROM evidence ORDER BY evidence_number")
            .fetch_all(pool)
            .await
            .map_err(db_err("list evidence"))?;
    rows.into_iter()
        .map(|(id, number)| Ok((parse_uuid(&id)?, number)))
        .collect()
}

/// IDで取得
pub async fn get(pool: &SqlitePool, id: Uuid) -> VaultResult<Evidence> {
    let sql = format!("SELECT {} FROM evidence WHERE id = ?", EVIDENCE_COLUMNS);
    sqlx::query_as::<_, EvidenceRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get evidence"))?
        .map(Evidence::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("evidence {}", id)))
}

/// 保管履歴付きで取得
pub async fn get_with_custody(pool: &SqlitePool, id: Uuid) -> VaultResult<EvidenceWithCustody> {
    let evidence = get(pool, id).await?;
    let custody = list_events(pool, id).await?;
    Ok(EvidenceWithCustody { evidence, custody })
}

/// 記述的な項目を更新
pub async fn update(pool: &SqlitePool, id: Uuid, changes: EvidenceUpdate) -> VaultResult<Evidence> {
    let mut evidence = get(pool, id).await?;
    if let Some(description) = changes.description {
        evidence.description = required("description", &description, 2000)?;
    }
    if let Some(evidence_type) = changes.evidence_type {
        let code = evidence_type.trim().to_string();
        crate::db::lookups::validate_code(pool, LookupCategory::EvidenceType, &code).await?;
        evidence.evidence_type = code;
    }
    if changes.location.is_some() {
        evidence.location = optional(changes.location);
    }
    if changes.sha256.is_some() {
        evidence.sha256 = parse_sha256(changes.sha256)?;
    }
    evidence.updated_at = Utc::now();

    sqlx::query(
        "UPDATE evidence SET description = ?, evidence_type = ?, location = ?, sha256 = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&evidence.description)
    .bind(&evidence.evidence_type)
    .bind(&evidence.location)
    .bind(&evidence.sha256)
    .bind(ts(&evidence.updated_at))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("update evidence"))?;

    Ok(evidence)
}

/// 証拠を削除（保管庫内で収集イベントのみの場合に限る）
pub async fn delete(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let evidence = get(pool, id).await?;
    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM custody_events WHERE evidence_id = ?")
        .bind(id.to_string())
        .fetch_one(pool)
        .await
        .map_err(db_err("count custody events"))?;

    if evidence.custody_status != CustodyStatus::InStorage || events > 1 {
        return Err(VaultError::Conflict(format!(
            "evidence {} has custody history and cannot be deleted",
            evidence.evidence_number
        )));
    }

    let mut tx = pool.begin().await.map_err(db_err("begin transaction"))?;
    sqlx::query("DELETE FROM custody_events WHERE evidence_id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err("delete custody events"))?;
    sqlx::query("DELETE FROM evidence WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err("delete evidence"))?;
    tx.commit().await.map_err(db_err("commit transaction"))?;
    Ok(())
}

/// 保管履歴（連番順）
pub async fn list_events(pool: &SqlitePool, evidence_id: Uuid) -> VaultResult<Vec<CustodyEvent>> {
    let sql = format!(
        "SELECT {} FROM custody_events WHERE evidence_id = ? ORDER BY sequence",
        EVENT_COLUMNS
    );
    let rows = sqlx::query_as::<_, EventRow>(&sql)
        .bind(evidence_id.to_string())
        .fetch_all(pool)
        .await
        .map_err(db_err("list custody events"))?;
    rows.into_iter().map(CustodyEvent::try_from).collect()
}

/// 最後の指定アクションの発生日時
pub async fn last_action_at(
    pool: &SqlitePool,
    evidence_id: Uuid,
    action: CustodyAction,
) -> VaultResult<Option<DateTime<Utc>>> {
    let at: Option<String> = sqlx::query_scalar(
        "SELECT MAX(occurred_at) FROM custody_events WHERE evidence_id = ? AND action = ?",
    )
    .bind(evidence_id.to_string())
    .bind(action.as_str())
    .fetch_one(pool)
    .await
    .map_err(db_err("read custody events"))?;
    at.as_deref().map(parse_ts).transpose()
}

/// 保管イベントを追記する
///
/// 引き渡し元は現在の保管者と一致し、発生日時は直前のイベント以降でなければならない。
pub async fn append_event(
    pool: &SqlitePool,
    evidence_id: Uuid,
    input: NewCustodyEvent,
    recorded_by: Option<Uuid>,
) -> VaultResult<CustodyEvent> {
    if input.action == CustodyAction::Collected {
        return Err(VaultError::InvalidTransition(
            "'collected' is only valid as the first custody event".to_string(),
        ));
    }
    let to_holder = optional(input.to_holder);
    if input.action.requires_to_holder() && to_holder.is_none() {
        return Err(VaultError::validation(format!(
            "to_holder is required for '{}'",
            input.action
        )));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await.map_err(db_err("begin transaction"))?;

    // 先に書き込みロックを取得し、読み取りから追記までを直列化する
    let locked = sqlx::query("UPDATE evidence SET updated_at = updated_at WHERE id = ?")
        .bind(evidence_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(db_err("lock evidence"))?;
    if locked.rows_affected() == 0 {
        return Err(VaultError::NotFound(format!("evidence {}", evidence_id)));
    }

    let sql = format!("SELECT {} FROM evidence WHERE id = ?", EVIDENCE_COLUMNS);
    let evidence: Evidence = sqlx::query_as::<_, EvidenceRow>(&sql)
        .bind(evidence_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("get evidence"))?
        .try_into()?;

    let next_status = evidence
        .custody_status
        .apply(input.action)
        .ok_or_else(|| {
            VaultError::InvalidTransition(format!(
                "'{}' is not allowed while evidence is '{}'",
                input.action, evidence.custody_status
            ))
        })?;

    let from_holder = optional(input.from_holder).unwrap_or_else(|| evidence.current_holder.clone());
    if from_holder != evidence.current_holder {
        return Err(VaultError::validation(format!(
            "from_holder '{}' does not match current holder '{}'",
            from_holder, evidence.current_holder
        )));
    }

    let (last_sequence, last_occurred): (i64, String) = sqlx::query_as(
        "SELECT sequence, occurred_at FROM custody_events WHERE evidence_id = ?
         ORDER BY sequence DESC LIMIT 1",
    )
    .bind(evidence_id.to_string())
    .fetch_one(&mut *tx)
    .await
    .map_err(db_err("read last custody event"))?;
    let last_occurred = parse_ts(&last_occurred)?;

    let occurred_at = input.occurred_at.unwrap_or(now);
    if occurred_at < last_occurred {
        return Err(VaultError::validation(format!(
            "occurred_at {} precedes the previous custody event ({})",
            ts(&occurred_at),
            ts(&last_occurred)
        )));
    }

    let event = CustodyEvent {
        id: Uuid::new_v4(),
        evidence_id,
        sequence: last_sequence + 1,
        action: input.action,
        from_holder: Some(from_holder),
        to_holder,
        location: optional(input.location),
        occurred_at,
        notes: optional(input.notes),
        recorded_by,
        created_at: now,
    };
    insert_event(&mut tx, &event).await?;

    let holder = holder_after(&evidence.current_holder, event.to_holder.as_deref());
    sqlx::query(
        "UPDATE evidence SET current_holder = ?, custody_status = ?, location = COALESCE(?, location),
            updated_at = ? WHERE id = ?",
    )
    .bind(&holder)
    .bind(next_status.as_str())
    .bind(&event.location)
    .bind(ts(&now))
    .bind(evidence_id.to_string())
    .execute(&mut *tx)
    .await
    .map_err(db_err("update custody state"))?;

    tx.commit().await.map_err(db_err("commit transaction"))?;

    tracing::info!(
        evidence_id = %evidence_id,
        sequence = event.sequence,
        action = %event.action,
        holder = %holder,
        status = %next_status,
        "Custody event recorded"
    );
    Ok(event)
}

/// 種別別件数
pub async fn count_by_type(pool: &SqlitePool) -> VaultResult<Vec<CountRow>> {
    sqlx::query_as::<_, CountRow>(
        "SELECT evidence_type AS key, COUNT(*) AS count FROM evidence
         GROUP BY evidence_type ORDER BY evidence_type",
    )
    .fetch_all(pool)
    .await
    .map_err(db_err("count evidence"))
}

/// 期間 [from, to) に発生した保管イベント数（アクション別）
pub async fn count_events_between(
    pool: &SqlitePool,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> VaultResult<Vec<CountRow>> {
    sqlx::query_as::<_, CountRow>(
        "SELECT action AS key, COUNT(*) AS count FROM custody_events
         WHERE occurred_at >= ? AND occurred_at < ? GROUP BY action ORDER BY action",
    )
    .bind(ts(from))
    .bind(ts(to))
    .fetch_all(pool)
    .await
    .map_err(db_err("count custody events"))
}

#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: String,
    case_id: String,
    evidence_number: String,
    description: String,
    evidence_type: String,
    collected_at: String,
    collected_by: String,
    location: Option<String>,
    current_holder: String,
    custody_status: String,
    sha256: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<EvidenceRow> for Evidence {
    type Error = VaultError;

    fn try_from(row: EvidenceRow) -> Result<Self, Self::Error> {
        Ok(Evidence {
            id: parse_uuid(&row.id)?,
            case_id: parse_uuid(&row.case_id)?,
            evidence_number: row.evidence_number,
            description: row.description,
            evidence_type: row.evidence_type,
            collected_at: parse_ts(&row.collected_at)?,
            collected_by: row.collected_by,
            location: row.location,
            current_holder: row.current_holder,
            custody_status: parse_enum("custody_status", &row.custody_status)?,
            sha256: row.sha256,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    evidence_id: String,
    sequence: i64,
    action: String,
    from_holder: Option<String>,
    to_holder: Option<String>,
    location: Option<String>,
    occurred_at: String,
    notes: Option<String>,
    recorded_by: Option<String>,
    created_at: String,
}

impl TryFrom<EventRow> for CustodyEvent {
    type Error = VaultError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(CustodyEvent {
            id: parse_uuid(&row.id)?,
            evidence_id: parse_uuid(&row.evidence_id)?,
            sequence: row.sequence,
            action: parse_enum("action", &row.action)?,
            from_holder: row.from_holder,
            to_holder: row.to_holder,
            location: row.location,
            occurred_at: parse_ts(&row.occurred_at)?,
            notes: row.notes,
            recorded_by: parse_uuid_opt(row.recorded_by)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}
