//! カレンダー予定のCRUD

use crate::common::error::{VaultError, VaultResult};
use crate::db::{parse_ts, parse_uuid, parse_uuid_opt, ts, SqlFilter};
use crate::types::lookup::{CalendarEvent, LookupCategory};
use crate::types::{optional, required};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

const EVENT_COLUMNS: &str =
    "id, case_id, title, event_type, starts_at, ends_at, location, notes, created_by, created_at, updated_at";

/// 予定一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarFilter {
    /// 期間の開始（含む）
    pub from: Option<DateTime<Utc>>,
    /// 期間の終了（含まない）
    pub to: Option<DateTime<Utc>>,
    /// 事件ID
    pub case_id: Option<Uuid>,
}

/// 予定の作成・更新内容
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarInput {
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// 件名
    pub title: String,
    /// 種別（ルックアップ calendar_event_type）
    pub event_type: String,
    /// 開始日時
    pub starts_at: DateTime<Utc>,
    /// 終了日時
    pub ends_at: DateTime<Utc>,
    /// 場所
    pub location: Option<String>,
    /// 備考
    pub notes: Option<String>,
}

async fn validated(pool: &SqlitePool, input: CalendarInput) -> VaultResult<CalendarInput> {
    let title = required("title", &input.title, 200)?;
    let event_type = input.event_type.trim().to_string();
    crate::db::lookups::validate_code(pool, LookupCategory::CalendarEventType, &event_type).await?;
    if input.ends_at < input.starts_at {
        return Err(VaultError::validation("ends_at must not precede starts_at"));
    }
    if let Some(case_id) = input.case_id {
        crate::db::cases::get(pool, case_id).await?;
    }
    Ok(CalendarInput {
        title,
        event_type,
        location: optional(input.location),
        notes: optional(input.notes),
        ..input
    })
}

/// 期間 [from, to) と重なる予定を開始順に取得
pub async fn list(pool: &SqlitePool, filter: &CalendarFilter) -> VaultResult<Vec<CalendarEvent>> {
    let mut f = SqlFilter::default();
    f.eq("case_id", filter.case_id);
    if let Some(to) = filter.to {
        f.cond("starts_at < ?", vec![ts(&to)]);
    }
    if let Some(from) = filter.from {
        // `from`ちょうどに終わる予定は含めない。長さ0の予定は開始時刻で判定する
        f.cond("(ends_at > ? OR starts_at >= ?)", vec![ts(&from), ts(&from)]);
    }

    let sql = format!(
        "SELECT {} FROM calendar_events {} ORDER BY starts_at, title",
        EVENT_COLUMNS,
        f.where_clause()
    );
    let mut query = sqlx::query_as::<_, CalendarRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .fetch_all(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to list calendar events: {}", e)))?;
    rows.into_iter().map(CalendarEvent::try_from).collect()
}

/// IDで取得
pub async fn get(pool: &SqlitePool, id: Uuid) -> VaultResult<CalendarEvent> {
    let sql = format!("SELECT {} FROM calendar_events WHERE id = ?", EVENT_COLUMNS);
    sqlx::query_as::<_, CalendarRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to get calendar event: {}", e)))?
        .map(CalendarEvent::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("calendar event {}", id)))
}

/// 作成
pub async fn create(
    pool: &SqlitePool,
    input: CalendarInput,
    created_by: Option<Uuid>,
) -> VaultResult<CalendarEvent> {
    let input = validated(pool, input).await?;
    let now = Utc::now();
    let event = CalendarEvent {
        id: Uuid::new_v4(),
        case_id: input.case_id,
        title: input.title,
        event_type: input.event_type,
        starts_at: input.starts_at,
        ends_at: input.ends_at,
        location: input.location,
        notes: input.notes,
        created_by,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO calendar_events (id, case_id, title, event_type, starts_at, ends_at, location, notes,
            created_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.id.to_string())
    .bind(event.case_id.map(|id| id.to_string()))
    .bind(&event.title)
    .bind(&event.event_type)
    .bind(ts(&event.starts_at))
    .bind(ts(&event.ends_at))
    .bind(&event.location)
    .bind(&event.notes)
    .bind(event.created_by.map(|id| id.to_string()))
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(|e| VaultError::Database(format!("Failed to create calendar event: {}", e)))?;

    Ok(event)
}

/// 更新（全項目を置き換える）
pub async fn update(pool: &SqlitePool, id: Uuid, input: CalendarInput) -> VaultResult<CalendarEvent> {
    let current = get(pool, id).await?;
    let input = validated(pool, input).await?;
    let event = CalendarEvent {
        case_id: input.case_id,
        title: input.title,
        event_type: input.event_type,
        starts_at: input.starts_at,
        ends_at: input.ends_at,
        location: input.location,
        notes: input.notes,
        updated_at: Utc::now(),
        ..current
    };

    sqlx::query(
        "UPDATE calendar_events SET case_id = ?, title = ?, event_type = ?, starts_at = ?, ends_at = ?,
            location = ?, notes = ?, updated_at = ? WHERE id = ?",
    )
    .bind(event.case_id.map(|id| id.to_string()))
    .bind(&event.title)
    .bind(&event.event_type)
    .bind(ts(&event.starts_at))
    .bind(ts(&event.ends_at))
    .bind(&event.location)
    .bind(&event.notes)
    .bind(ts(&event.updated_at))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(|e| VaultError::Database(format!("Failed to update calendar event: {}", e)))?;

    Ok(event)
}

/// 削除
pub async fn delete(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let result = sqlx::query("DELETE FROM calendar_events WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to delete calendar event: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(VaultError::NotFound(format!("calendar event {}", id)));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct CalendarRow {
    id: String,
    case_id: Option<String>,
    title: String,
    event_type: String,
    starts_at: String,
    ends_at: String,
    location: Option<String>,
    notes: Option<String>,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<CalendarRow> for CalendarEvent {
    type Error = VaultError;

    fn try_from(row: CalendarRow) -> Result<Self, Self::Error> {
        Ok(CalendarEvent {
            id: parse_uuid(&row.id)?,
            case_id: parse_uuid_opt(row.case_id)?,
            title: row.title,
            event_type: row.event_type,
            starts_at: parse_ts(&row.starts_at)?,
            ends_at: parse_ts(&row.ends_at)?,
            location: row.location,
            notes: row.notes,
            created_by: parse_uuid_opt(row.created_by)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}
