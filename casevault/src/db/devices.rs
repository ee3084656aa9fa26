//! 押収デバイスのCRUD

use crate::common::error::{VaultError, VaultResult};
use crate::common::types::{Page, PageParams};
use crate::db::cases::CountRow;
use crate::db::{is_unique_violation, parse_enum, parse_ts, parse_uuid_opt, parse_uuid, ts, SqlFilter};
use crate::types::device::{is_valid_imei, Device, DeviceStatus};
use crate::types::lookup::LookupCategory;
use crate::types::optional;
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

const DEVICE_COLUMNS: &str = "id, case_id, evidence_id, device_type, make, model, serial_number, imei, \
    storage_capacity_gb, status, notes, created_at, updated_at";

/// デバイス一覧の検索条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceFilter {
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// 種別
    pub device_type: Option<String>,
    /// ステータス
    pub status: Option<DeviceStatus>,
    /// メーカー・型番・シリアル・IMEIの部分一致
    pub q: Option<String>,
    /// ページ番号
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

/// デバイスの登録内容
#[derive(Debug, Clone, Deserialize)]
pub struct NewDevice {
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// 証拠ID
    pub evidence_id: Option<Uuid>,
    /// 種別（ルックアップ device_type）
    pub device_type: String,
    /// メーカー
    pub make: Option<String>,
    /// 型番
    pub model: Option<String>,
    /// シリアル番号
    pub serial_number: Option<String>,
    /// IMEI
    pub imei: Option<String>,
    /// 容量（GB）
    pub storage_capacity_gb: Option<i64>,
    /// 備考
    pub notes: Option<String>,
}

/// デバイスの更新内容（Noneは変更なし）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceUpdate {
    /// 事件ID
    pub case_id: Option<Uuid>,
    /// 証拠ID
    pub evidence_id: Option<Uuid>,
    /// 種別
    pub device_type: Option<String>,
    /// メーカー
    pub make: Option<String>,
    /// 型番
    pub model: Option<String>,
    /// シリアル番号
    pub serial_number: Option<String>,
    /// IMEI
    pub imei: Option<String>,
    /// 容量（GB）
    pub storage_capacity_gb: Option<i64>,
    /// ステータス（前進のみ）
    pub status: Option<DeviceStatus>,
    /// 備考
    pub notes: Option<String>,
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> VaultError {
    move |e| {
        if is_unique_violation(&e) {
            VaultError::Conflict("A device with this make and serial number already exists".to_string())
        } else {
            VaultError::Database(format!("Failed to {}: {}", context, e))
        }
    }
}

async fn validate(pool: &SqlitePool, device: &Device) -> VaultResult<()> {
    crate::db::lookups::validate_code(pool, LookupCategory::DeviceType, &device.device_type).await?;
    if let Some(imei) = device.imei.as_deref() {
        if !is_valid_imei(imei) {
            return Err(VaultError::validation("imei must be exactly 15 digits"));
        }
    }
    if device.storage_capacity_gb.is_some_and(|gb| gb < 0) {
        return Err(VaultError::validation("storage_capacity_gb must not be negative"));
    }
    if let Some(case_id) = device.case_id {
        crate::db::cases::get(pool, case_id).await?;
    }
    if let Some(evidence_id) = device.evidence_id {
        let evidence = crate::db::evidence::get(pool, evidence_id).await?;
        if device.case_id.is_some_and(|c| c != evidence.case_id) {
            return Err(VaultError::validation(
                "evidence item belongs to a different case",
            ));
        }
    }
    Ok(())
}

/// デバイス一覧
pub async fn list(pool: &SqlitePool, filter: &DeviceFilter) -> VaultResult<Page<Device>> {
    let mut f = SqlFilter::default();
    f.eq("case_id", filter.case_id)
        .eq("device_type", filter.device_type.as_deref())
        .eq("status", filter.status.map(|s| s.as_str()))
        .search(&["make", "model", "serial_number", "imei"], filter.q.as_deref());
    let params = PageParams {
        page: filter.page,
        per_page: filter.per_page,
    };

    let count_sql = format!("SELECT COUNT(*) FROM devices {}", f.where_clause());
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for val in f.binds() {
        count_query = count_query.bind(val.as_str());
    }
    let total = count_query
        .fetch_one(pool)
        .await
        .map_err(db_err("count devices"))?;

    let sql = format!(
        "SELECT {} FROM devices {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        DEVICE_COLUMNS,
        f.where_clause()
    );
    let mut query = sqlx::query_as::<_, DeviceRow>(&sql);
    for val in f.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .map_err(db_err("list devices"))?;

    let items = rows
        .into_iter()
        .map(Device::try_from)
        .collect::<VaultResult<Vec<_>>>()?;
    Ok(Page::new(items, total, &params))
}

/// IDで取得
pub async fn get(pool: &SqlitePool, id: Uuid) -> VaultResult<Device> {
    let sql = format!("SELECT {} FROM devices WHERE id = ?", DEVICE_COLUMNS);
    sqlx::query_as::<_, DeviceRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(db_err("get device"))?
        .map(Device::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("device {}", id)))
}

/// 登録（ステータスは received から始まる）
pub async fn create(pool: &SqlitePool, input: NewDevice) -> VaultResult<Device> {
    let now = Utc::now();
    let device = Device {
        id: Uuid::new_v4(),
        case_id: input.case_id,
        evidence_id: input.evidence_id,
        device_type: input.device_type.trim().to_string(),
        make: optional(input.make),
        model: optional(input.model),
        serial_number: optional(input.serial_number),
        imei: optional(input.imei),
        storage_capacity_gb: input.storage_capacity_gb,
        status: DeviceStatus::Received,
        notes: optional(input.notes),
        created_at: now,
        updated_at: now,
    };
    validate(pool, &device).await?;

    sqlx::query(
        "INSERT INTO devices (id, case_id, evidence_id, device_type, make, model, serial_number, imei,
            storage_capacity_gb, status, notes, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(device.id.to_string())
    .bind(device.case_id.map(|id| id.to_string()))
    .bind(device.evidence_id.map(|id| id.to_string()))
    .bind(&device.device_type)
    .bind(&device.make)
    .bind(&device.model)
    .bind(&device.serial_number)
    .bind(&device.imei)
    .bind(device.storage_capacity_gb)
    .bind(device.status.as_str())
    .bind(&device.notes)
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(db_err("create device"))?;

    Ok(device)
}

/// 更新（ステータスは前進のみ）
pub async fn update(pool: &SqlitePool, id: Uuid, changes: DeviceUpdate) -> VaultResult<Device> {
    let mut device = get(pool, id).await?;

    if let Some(next) = changes.status {
        if next != device.status {
            if !device.status.can_transition_to(next) {
                return Err(VaultError::InvalidTransition(format!(
                    "device cannot move from '{}' to '{}'",
                    device.status, next
                )));
            }
            device.status = next;
        }
    }
    if changes.case_id.is_some() {
        device.case_id = changes.case_id;
    }
    if changes.evidence_id.is_some() {
        device.evidence_id = changes.evidence_id;
    }
    if let Some(device_type) = changes.device_type {
        device.device_type = device_type.trim().to_string();
    }
    if changes.make.is_some() {
        device.make = optional(changes.make);
    }
    if changes.model.is_some() {
        device.model = optional(changes.model);
    }
    if changes.serial_number.is_some() {
        device.serial_number = optional(changes.serial_number);
    }
    if changes.imei.is_some() {
        device.imei = optional(changes.imei);
    }
    if changes.storage_capacity_gb.is_some() {
        device.storage_capacity_gb = changes.storage_capacity_gb;
    }
    if changes.notes.is_some() {
        device.notes = optional(changes.notes);
    }
    validate(pool, &device).await?;
    device.updated_at = Utc::now();

    sqlx::query(
        "UPDATE devices SET case_id = ?, evidence_id = ?, device_type = ?, make = ?, model = ?,
            serial_number = ?, imei = ?, storage_capacity_gb = ?, status = ?, notes = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(device.case_id.map(|id| id.to_string()))
    .bind(device.evidence_id.map(|id| id.to_string()))
    .bind(&device.device_type)
    .bind(&device.make)
    .bind(&device.model)
    .bind(&device.serial_number)
    .bind(&device.imei)
    .bind(device.storage_capacity_gb)
    .bind(device.status.as_str())
    .bind(&device.notes)
    .bind(ts(&device.updated_at))
    .bind(id.to_string())
    .execute(pool)
    .await
    .map_err(db_err("update device"))?;

    Ok(device)
}

/// 削除
pub async fn delete(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let result = sqlx::query("DELETE FROM devices WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(db_err("delete device"))?;

    if result.rows_affected() == 0 {
        return Err(VaultError::NotFound(format!("device {}", id)));
    }
    Ok(())
}

/// ステータス別件数
pub async fn count_by_status(pool: &SqlitePool) -> VaultResult<Vec<CountRow>> {
    sqlx::query_as::<_, CountRow>(
        "SELECT status AS key, COUNT(*) AS count FROM devices GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await
    .map_err(db_err("count devices"))
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: String,
    case_id: Option<String>,
    evidence_id: Option<String>,
    device_type: String,
    make: Option<String>,
    model: Option<String>,
    serial_number: Option<String>,
    imei: Option<String>,
    storage_capacity_gb: Option<i64>,
    status: String,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DeviceRow> for Device {
    type Error = VaultError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        Ok(Device {
            id: parse_uuid(&row.id)?,
            case_id: parse_uuid_opt(row.case_id)?,
            evidence_id: parse_uuid_opt(row.evidence_id)?,
            device_type: row.device_type,
            make: row.make,
            model: row.model,
            serial_number: row.serial_number,
            imei: row.imei,
            storage_capacity_gb: row.storage_capacity_gb,
            status: parse_enum("status", &row.status)?,
            notes: row.notes,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}
