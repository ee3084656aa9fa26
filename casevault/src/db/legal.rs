//! 法的文書（令状等）と押収記録のCRUD

use crate::common::error::{VaultError, VaultResult};
use crate::common::types::{Page, PageParams};
use crate::db::{is_unique_violation, parse_enum, parse_ts, parse_ts_opt, parse_uuid, parse_uuid_opt, ts, SqlFilter};
use crate::types::legal::{InstrumentStatus, LegalInstrument, Seizure};
use crate::types::lookup::LookupCategory;
use crate::types::{optional, required};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

const INSTRUMENT_COLUMNS: &str = "id, case_id, instrument_type, reference_number, issuing_authority, \
    issued_at, expires_at, status, notes, created_at, updated_at";

const SEIZURE_COLUMNS: &str = "id, case_id, legal_instrument_id, seized_at, location, seized_by, \
    description, item_count, created_at, updated_at";

/// 法的文書一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentFilter {
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// ステータス
    pub status: Option<InstrumentStatus>,
    /// ページ番号
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

/// 法的文書の登録内容
#[derive(Debug, Clone, Deserialize)]
pub struct NewInstrument {
    /// 事件ID
    pub case_id: Uuid,
    /// 種別（ルックアップ legal_instrument_type）
    pub instrument_type: String,
    /// 文書番号
    pub reference_number: String,
    /// 発行機関
    pub issuing_authority: Option<String>,
    /// 発行日時
    pub issued_at: DateTime<Utc>,
    /// 失効日時
    pub expires_at: Option<DateTime<Utc>>,
    /// 備考
    pub notes: Option<String>,
}

/// 法的文書の更新内容（Noneは変更なし）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentUpdate {
    /// 種別
    pub instrument_type: Option<String>,
    /// 文書番号
    pub reference_number: Option<String>,
    /// 発行機関
    pub issuing_authority: Option<String>,
    /// 発行日時
    pub issued_at: Option<DateTime<Utc>>,
    /// 失効日時
    pub expires_at: Option<DateTime<Utc>>,
    /// 備考
    pub notes: Option<String>,
}

/// 押収記録一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeizureFilter {
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// 法的文書ID
    pub legal_instrument_id: Option<Uuid>,
    /// ページ番号
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

/// 押収記録の登録内容
#[derive(Debug, Clone, Deserialize)]
pub struct NewSeizure {
    /// 事件ID
    pub case_id: Uuid,
    /// 根拠となる法的文書
    pub legal_instrument_id: Option<Uuid>,
    /// 押収日時
    pub seized_at: DateTime<Utc>,
    /// 押収場所
    pub location: String,
    /// 押収者
    pub seized_by: Option<String>,
    /// 説明
    pub description: Option<String>,
    /// 押収点数
    #[serde(default)]
    pub item_count: i64,
}

/// 押収記録の更新内容（Noneは変更なし）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeizureUpdate {
    /// 根拠となる法的文書
    pub legal_instrument_id: Option<Uuid>,
    /// 押収日時
    pub seized_at: Option<DateTime<Utc>>,
    /// 押収場所
    pub location: Option<String>,
    /// 押収者
    pub seized_by: Option<String>,
    /// 説明
    pub description: Option<String>,
    /// 押収点数
    pub item_count: Option<i64>,
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> VaultError {
    move |e| {
        if is_unique_violation(&e) {
            VaultError::Conflict("reference_number already exists".to_string())
        } else {
            VaultError::Database(format!("Failed to {}: {}", context, e))
        }
    }
}

fn page_params(page: Option<u32>, per_page: Option<u32>) -> PageParams {
    PageParams { page, per_page }
}

async fn validate_instrument(pool: &SqlitePool, instrument: &LegalInstrument) -> VaultResult<()> {
    crate::db::lookups::validate_code(
        pool,
        LookupCategory::LegalInstrumentType,
        &instrument.instrument_type,
    )
    .await?;
    if let Some(expires_at) = instrument.expires_at {
        if expires_at <= instrument.issued_at {
            return Err(VaultError::validation("expires_at must be after issued_at"));
        }
    }
    Ok(())
}

/// 法的文書一覧
pub async fn list_instruments(
    pool: &SqlitePool,
    filter: &InstrumentFilter,
) -> VaultResult<Page<LegalInstrument>> {
    let mut f = SqlFilter::default();
    f.eq("case_id", filter.case_id)
        .eq("status", filter.status.map(|s| s.as_str()));
    let params = page_params(filter.page, filter.per_page);

    let count_sql = format!("SELECT COUNT(*) FROM legal_instruments {}", f.where_clause());
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for val in f.binds() {
        count_query = count_query.bind(val.as_str());
    }
    let total = count_query
        .fetch_one(pool)
        .await
        .map_err(db_err("count legal instruments"))?;

    let sql = format!(
        "SELECT {} FROM legal_instruments {} ORDER BY issued_at DESC LIMIT ? OFFSET ?",
        INSTRUMENT_COLUMNS,
        f.where_clause()
    );
    let mut query = sqlx::query_as::<_, InstrumentRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(db_err("list legal instruments"))?;

    let items = rows
        .into_iter()
        .map(LegalInstrument::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, &params))
}

/// 法的文書を取得
pub async fn get_instrument(pool: &SqlitePool, id: Uuid) -> VaultResult<LegalInstrument> {
    let sql = format!("SELECT {} FROM legal_instruments WHERE id = ?", INSTRUMENT_COLUMNS);
    sqlx::query_as::<_, InstrumentRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get legal instrument"))?
        .map(LegalInstrument::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("legal instrument {}", id)))
}

/// 法的文書を登録（ステータスは draft から始まる）
pub async fn create_instrument(pool: &SqlitePool, input: NewInstrument) -> VaultResult<LegalInstrument> {
    crate::db::cases::get(pool, input.case_id).await?;
    let now = Utc::now();
    let instrument = LegalInstrument {
        id: Uuid::new_v4(),
        case_id: input.case_id,
        instrument_type: input.instrument_type.trim().to_string(),
        reference_number: required("reference_number", &input.reference_number, 100)?,
        issuing_authority: optional(input.issuing_authority),
        issued_at: input.issued_at,
        expires_at: input.expires_at,
        status: InstrumentStatus::Draft,
        notes: optional(input.notes),
        created_at: now,
        updated_at: now,
    };
    validate_instrument(pool, &instrument).await?;

    sqlx::query(
        "INSERT INTO legal_instruments (id, case_id, instrument_type, reference_number, issuing_authority,
            issued_at, expires_at, status, notes, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(instrument.id.to_string())
    .bind(instrument.case_id.to_string())
    .bind(&instrument.instrument_type)
    .bind(&instrument.reference_number)
    .bind(&instrument.issuing_authority)
    .bind(ts(&instrument.issued_at))
    .bind(instrument.expires_at.as_ref().map(ts))
    .bind(instrument.status.as_str())
    .bind(&instrument.notes)
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(db_err("create legal instrument"))?;

    Ok(instrument)
}

/// 法的文書を更新
pub async fn update_instrument(
    pool: &SqlitePool,
    id: Uuid,
    changes: InstrumentUpdate,
) -> VaultResult<LegalInstrument> {
    let mut instrument = get_instrument(pool, id).await?;
    if let Some(t) = changes.instrument_type {
        instrument.instrument_type = t.trim().to_string();
    }
    if let Some(reference) = changes.reference_number {
        instrument.reference_number = required("reference_number", &reference, 100)?;
    }
    if changes.issuing_authority.is_some() {
        instrument.issuing_authority = optional(changes.issuing_authority);
    }
    if let Some(issued_at) = changes.issued_at {
        instrument.issued_at = issued_at;
    }
    if changes.expires_at.is_some() {
        instrument.expires_at = changes.expires_at;
    }
    if changes.notes.is_some() {
        instrument.notes = optional(changes.notes);
    }
    validate_instrument(pool, &instrument).await?;
    instrument.updated_at = Utc::now();

    sqlx::query(
        "UPDATE legal_instruments SET instrument_type = ?, reference_number = ?, issuing_authority = ?,
            issued_at = ?, expires_at = ?, notes = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&instrument.instrument_type)
    .bind(&instrument.reference_number)
    .bind(&instrument.issuing_authority)
    .bind(ts(&instrument.issued_at))
    .bind(instrument.expires_at.as_ref().map(ts))
    .bind(&instrument.notes)
    .bind(ts(&instrument.updated_at))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("update legal instrument"))?;

    Ok(instrument)
}

/// 法的文書のステータスを変更
pub async fn change_instrument_status(
    pool: &SqlitePool,
    id: Uuid,
    next: InstrumentStatus,
) -> VaultResult<LegalInstrument> {
    let mut instrument = get_instrument(pool, id).await?;
    if !instrument.status.can_transition_to(next) {
        return Err(VaultError::InvalidTransition(format!(
            "legal instrument cannot move from '{}' to '{}'",
            instrument.status, next
        )));
    }
    let previous = instrument.status;
    instrument.status = next;
    instrument.updated_at = Utc::now();

    let result = sqlx::query(
        "UPDATE legal_instruments SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(next.as_str())
    .bind(ts(&instrument.updated_at))
    .bind(id.to_string())
    .bind(previous.as_str())
    .execute(pool)
    .await
    .map_err(db_err("change legal instrument status"))?;
    if result.rows_affected() == 0 {
        return Err(VaultError::Conflict(format!(
            "legal instrument {} was modified concurrently",
            instrument.reference_number
        )));
    }

    tracing::info!(instrument_id = %id, from = %previous, to = %next, "Legal instrument status changed");
    Ok(instrument)
}

/// 法的文書を削除（押収記録から参照されている場合は不可）
pub async fn delete_instrument(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let instrument = get_instrument(pool, id).await?;
    let referenced: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM seizures WHERE legal_instrument_id = ?")
            .bind(id.to_string())
            .fetch_one(pool)
            .await
            .map_err(db_err("count seizures"))?;
    if referenced > 0 {
        return Err(VaultError::Conflict(format!(
            "legal instrument {} is referenced by {} seizure(s)",
            instrument.reference_number, referenced
        )));
    }

    sqlx::query("DELETE FROM legal_instruments WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(db_err("delete legal instrument"))?;
    Ok(())
}

/// 押収の根拠となる法的文書を検証する
///
/// 同じ事件に属し、draft・revoked 以外であること。
async fn check_authority(pool: &SqlitePool, case_id: Uuid, instrument_id: Option<Uuid>) -> VaultResult<()> {
    let Some(instrument_id) = instrument_id else {
        return Ok(());
    };
    let instrument = get_instrument(pool, instrument_id).await?;
    if instrument.case_id != case_id {
        return Err(VaultError::validation(
            "legal instrument belongs to a different case",
        ));
    }
    if !instrument.status.authorizes_seizure() {
        return Err(VaultError::validation(format!(
            "legal instrument {} is '{}' and does not authorize a seizure",
            instrument.reference_number, instrument.status
        )));
    }
    Ok(())
}

/// 押収記録一覧
pub async fn list_seizures(pool: &SqlitePool, filter: &SeizureFilter) -> VaultResult<Page<Seizure>> {
    let mut f = SqlFilter::default();
    f.eq("case_id", filter.case_id)
        .eq("legal_instrument_id", filter.legal_instrument_id);
    let params = page_params(filter.page, filter.per_page);

    let count_sql = format!("SELECT COUNT(*) FROM seizures {}", f.where_clause());
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for val in f.binds() {
        count_query = count_query.bind(val.as_str());
    }
    let total = count_query
        .fetch_one(pool)
        .await
        .map_err(db_err("count seizures"))?;

    let sql = format!(
        "SELECT {} FROM seizures {} ORDER BY seized_at DESC LIMIT ? OFFSET ?",
        SEIZURE_COLUMNS,
        f.where_clause()
    );
    let mut query = sqlx::query_as::<_, SeizureRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(db_err("list seizures"))?;

    let items = rows
        .into_iter()
        .map(Seizure::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, &params))
}

/// 法的文書を参照する押収記録と、その文書の組
pub async fn seizures_with_instruments(
    pool: &SqlitePool,
) -> VaultResult<Vec<(Seizure, LegalInstrument)>> {
    let sql = format!(
        "SELECT {} FROM seizures WHERE legal_instrument_id IS NOT NULL ORDER BY seized_at",
        SEIZURE_COLUMNS
    );
    let rows = sqlx::query_as::<_, SeizureRow>(&sql)
        .fetch_all(pool)
        .await
        .map_err(db_err("list seizures"))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let seizure = Seizure::try_from(row)?;
        if let Some(instrument_id) = seizure.legal_instrument_id {
            let instrument = get_instrument(pool, instrument_id).await?;
            out.push((seizure, instrument));
        }
    }
    Ok(out)
}

/// 押収記録を取得
pub async fn get_seizure(pool: &SqlitePool, id: Uuid) -> VaultResult<Seizure> {
    let sql = format!("SELECT {} FROM seizures WHERE id = ?", SEIZURE_COLUMNS);
    sqlx::query_as::<_, SeizureRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get seizure"))?
        .map(Seizure::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("seizure {}", id)))
}

/// 押収記録を登録
pub async fn create_seizure(pool: &SqlitePool, input: NewSeizure) -> VaultResult<Seizure> {
    crate::db::cases::get(pool, input.case_id).await?;
    if input.item_count < 0 {
        return Err(VaultError::validation("item_count must not be negative"));
    }
    let location = required("location", &input.location, 500)?;
    check_authority(pool, input.case_id, input.legal_instrument_id).await?;

    let now = Utc::now();
    let seizure = Seizure {
        id: Uuid::new_v4(),
        case_id: input.case_id,
        legal_instrument_id: input.legal_instrument_id,
        seized_at: input.seized_at,
        location,
        seized_by: optional(input.seized_by),
        description: optional(input.description),
        item_count: input.item_count,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO seizures (id, case_id, legal_instrument_id, seized_at, location, seized_by,
            description, item_count, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(seizure.id.to_string())
    .bind(seizure.case_id.to_string())
    .bind(seizure.legal_instrument_id.map(|id| id.to_string()))
    .bind(ts(&seizure.seized_at))
    .bind(&seizure.location)
    .bind(&seizure.seized_by)
    .bind(&seizure.description)
    .bind(seizure.item_count)
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(db_err("create seizure"))?;

    Ok(seizure)
}

/// 押収記録を更新
pub async fn update_seizure(pool: &SqlitePool, id: Uuid, changes: SeizureUpdate) -> VaultResult<Seizure> {
    let mut seizure = get_seizure(pool, id).await?;
    if changes.legal_instrument_id.is_some() {
        check_authority(pool, seizure.case_id, changes.legal_instrument_id).await?;
        seizure.legal_instrument_id = changes.legal_instrument_id;
    }
    if let Some(seized_at) = changes.seized_at {
        seizure.seized_at = seized_at;
    }
    if let Some(location) = changes.location {
        seizure.location = required("location", &location, 500)?;
    }
    if changes.seized_by.is_some() {
        seizure.seized_by = optional(changes.seized_by);
    }
    if changes.description.is_some() {
        seizure.description = optional(changes.description);
    }
    if let Some(count) = changes.item_count {
        if count < 0 {
            return Err(VaultError::validation("item_count must not be negative"));
        }
        seizure.item_count = count;
    }
    seizure.updated_at = Utc::now();

    sqlx::query(
        "UPDATE seizures SET legal_instrument_id = ?, seized_at = ?, location = ?, seized_by = ?,
            description = ?, item_count = ?, updated_at = ? WHERE id = ?",
    )
    .bind(seizure.legal_instrument_id.map(|id| id.to_string()))
    .bind(ts(&seizure.seized_at))
    .bind(&seizure.location)
    .bind(&seizure.seized_by)
    .bind(&seizure.description)
    .bind(seizure.item_count)
    .bind(ts(&seizure.updated_at))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("update seizure"))?;

    Ok(seizure)
}

/// 押収記録を削除
pub async fn delete_seizure(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let result = sqlx::query("DELETE FROM seizures WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(db_err("delete seizure"))?;

    if result.rows_affected() == 0 {
        return Err(VaultError::NotFound(format!("seizure {}", id)));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct InstrumentRow {
    id: String,
    case_id: String,
    instrument_type: String,
    reference_number: String,
    issuing_authority: Option<String>,
    issued_at: String,
    expires_at: Option<String>,
    status: String,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<InstrumentRow> for LegalInstrument {
    type Error = VaultError;

    fn try_from(row: InstrumentRow) -> Result<Self, Self::Error> {
        Ok(LegalInstrument {
            id: parse_uuid(&row.id)?,
            case_id: parse_uuid(&row.case_id)?,
            instrument_type: row.instrument_type,
            reference_number: row.reference_number,
            issuing_authority: row.issuing_authority,
            issued_at: parse_ts(&row.issued_at)?,
            expires_at: parse_ts_opt(row.expires_at)?,
            status: parse_enum("status", &row.status)?,
            notes: row.notes,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SeizureRow {
    id: String,
    case_id: String,
    legal_instrument_id: Option<String>,
    seized_at: String,
    location: String,
    seized_by: Option<String>,
    description: Option<String>,
    item_count: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SeizureRow> for Seizure {
    type Error = VaultError;

    fn try_from(row: SeizureRow) -> Result<Self, Self::Error> {
        Ok(Seizure {
            id: parse_uuid(&row.id)?,
            case_id: parse_uuid(&row.case_id)?,
            legal_instrument_id: parse_uuid_opt(row.legal_instrument_id)?,
            seized_at: parse_ts(&row.seized_at)?,
            location: row.location,
            seized_by: row.seized_by,
            description: row.description,
            item_count: row.item_count,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;

    /// テスト用の令状（発行から30日有効）を登録する
    pub async fn sample_warrant(pool: &SqlitePool, case_id: Uuid, reference: &str) -> LegalInstrument {
        let issued_at = Utc::now() - chrono::Duration::days(10);
        create_instrument(
            pool,
            NewInstrument {
                case_id,
                instrument_type: "warrant".to_string(),
                reference_number: reference.to_string(),
                issuing_authority: Some("District Court".to_string()),
                issued_at,
                expires_at: Some(issued_at + chrono::Duration::days(30)),
                notes: None,
            },
        )
        .await
        .expect("create warrant")
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::sample_warrant;
    use super::*;
    use crate::db::cases::test_helpers::sample_case;

    fn seizure(case_id: Uuid, instrument: Option<Uuid>) -> NewSeizure {
        NewSeizure {
            case_id,
            legal_instrument_id: instrument,
            seized_at: Utc::now() - chrono::Duration::days(1),
            location: "12 Main Street".to_string(),
            seized_by: Some("Team B".to_string()),
            description: None,
            item_count: 3,
        }
    }

    #[tokio::test]
    async fn test_instrument_lifecycle() {
        let pool = crate::db::test_utils::test_db_pool().await;
        let case = sample_case(&pool, "Warrants").await;
        let warrant = sample_warrant(&pool, case.id, "W-2026-001").await;
        assert_eq!(warrant.status, InstrumentStatus::Draft);

        change_instrument_status(&pool, warrant.id, InstrumentStatus::Active)
            .await
            .unwrap();
        change_instrument_status(&pool, warrant.id, InstrumentStatus::Executed)
            .await
            .unwrap();
        let err = change_instrument_status(&pool, warrant.id, InstrumentStatus::Revoked)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_instrument_validation() {
        let pool = crate::db::test_utils::test_db_pool().await;
        let case = sample_case(&pool, "Validation").await;
        sample_warrant(&pool, case.id, "W-1").await;

        let issued_at = Utc::now();
        let mut input = NewInstrument {
            case_id: case.id,
            instrument_type: "warrant".into(),
            reference_number: "W-1".into(),
            issuing_authority: None,
            issued_at,
            expires_at: None,
            notes: None,
        };
        assert!(matches!(
            create_instrument(&pool, input.clone()).await,
            Err(VaultError::Conflict(_))
        ));

        input.reference_number = "W-2".into();
        input.expires_at = Some(issued_at - chrono::Duration::hours(1));
        assert!(matches!(
            create_instrument(&pool, input.clone()).await,
            Err(VaultError::Common(_))
        ));

        input.expires_at = None;
        input.instrument_type = "pinky_promise".into();
        assert!(create_instrument(&pool, input).await.is_err());
    }

    #[tokio::test]
    async fn test_seizure_requires_authorizing_instrument() {
        let pool = crate::db::test_utils::test_db_pool().await;
        let case = sample_case(&pool, "Seizures").await;
        let other = sample_case(&pool, "Other").await;
        let warrant = sample_warrant(&pool, case.id, "W-10").await;

        // draftは根拠にならない
        let err = create_seizure(&pool, seizure(case.id, Some(warrant.id)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not authorize"));

        change_instrument_status(&pool, warrant.id, InstrumentStatus::Active)
            .await
            .unwrap();
        let created = create_seizure(&pool, seizure(case.id, Some(warrant.id)))
            .await
            .unwrap();
        assert_eq!(created.item_count, 3);

        let err = create_seizure(&pool, seizure(other.id, Some(warrant.id)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("different case"));

        let mut negative = seizure(case.id, None);
        negative.item_count = -1;
        assert!(create_seizure(&pool, negative).await.is_err());

        let page = list_seizures(
            &pool,
            &SeizureFilter {
                case_id: Some(case.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);

        let err = delete_instrument(&pool, warrant.id).await.unwrap_err();
        assert!(matches!(err, VaultError::Conflict(_)));
        delete_seizure(&pool, created.id).await.unwrap();
        delete_instrument(&pool, warrant.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_seizures_with_instruments() {
        let pool = crate::db::test_utils::test_db_pool().await;
        let case = sample_case(&pool, "Join").await;
        let warrant = sample_warrant(&pool, case.id, "W-20").await;
        change_instrument_status(&pool, warrant.id, InstrumentStatus::Active)
            .await
            .unwrap();
        create_seizure(&pool, seizure(case.id, Some(warrant.id))).await.unwrap();
        create_seizure(&pool, seizure(case.id, None)).await.unwrap();

        let pairs = seizures_with_instruments(&pool).await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1.id, warrant.id);
    }
}
