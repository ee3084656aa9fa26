//! ルックアップ値のCRUD
//!
//! 証拠種別・令状種別などの選択肢をカテゴリ単位で管理する

use crate::common::error::{VaultError, VaultResult};
use crate::db::{is_unique_violation, parse_enum, parse_ts, parse_uuid, ts};
use crate::types::lookup::{is_valid_code, LookupCategory, LookupValue};
use crate::types::required;
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

const LOOKUP_COLUMNS: &str = "id, category, code, label, sort_order, active, created_at, updated_at";

/// ルックアップ値の作成内容
#[derive(Debug, Clone, Deserialize)]
pub struct NewLookup {
    /// カテゴリ
    pub category: LookupCategory,
    /// コード（英小文字・数字・アンダースコア）
    pub code: String,
    /// 表示名
    pub label: String,
    /// 並び順
    #[serde(default)]
    pub sort_order: i64,
    /// 有効フラグ
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// ルックアップ値の更新内容（Noneは変更なし）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupUpdate {
    /// 表示名
    pub label: Option<String>,
    /// 並び順
    pub sort_order: Option<i64>,
    /// 有効フラグ
    pub active: Option<bool>,
}

/// カテゴリ内の値を並び順で取得
pub async fn list(
    pool: &SqlitePool,
    category: Option<LookupCategory>,
    active_only: bool,
) -> VaultResult<Vec<LookupValue>> {
    let mut filter = crate::db::SqlFilter::default();
    filter.eq("category", category.map(|c| c.as_str()));
    if active_only {
        filter.cond("active = 1", vec![]);
    }
    let sql = format!(
        "SELECT {} FROM lookup_values {} ORDER BY category, sort_order, code",
        LOOKUP_COLUMNS,
        filter.where_clause()
    );
    let mut query = sqlx::query_as::<_, LookupRow>(&sql);
    for val in filter.binds() {
        query = query.bind(val.as_str());
    }
    let rows = query
        .fetch_all(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to list lookup values: {}", e)))?;

    rows.into_iter().map(LookupValue::try_from).collect()
}

/// IDで取得
pub async fn get(pool: &SqlitePool, id: Uuid) -> VaultResult<LookupValue> {
    let sql = format!("SELECT {} FROM lookup_values WHERE id = ?", LOOKUP_COLUMNS);
    sqlx::query_as::<_, LookupRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to get lookup value: {}", e)))?
        .map(LookupValue::try_from)
        .transpose()?
        .ok_or_else(|| VaultError::NotFound(format!("lookup value {}", id)))
}

/// 作成
pub async fn create(pool: &SqlitePool, input: NewLookup) -> VaultResult<LookupValue> {
    let code = input.code.trim().to_string();
    if !is_valid_code(&code) {
        return Err(VaultError::validation(
            "code must be 1-64 characters of lowercase letters, digits or '_'",
        ));
    }
    let label = required("label", &input.label, 100)?;
    let now = Utc::now();
    let value = LookupValue {
        id: Uuid::new_v4(),
        category: input.category,
        code,
        label,
        sort_order: input.sort_order,
        active: input.active,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO lookup_values (id, category, code, label, sort_order, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(value.id.to_string())
    .bind(value.category.as_str())
    .bind(&value.code)
    .bind(&value.label)
    .bind(value.sort_order)
    .bind(value.active as i64)
    .bind(ts(&now))
    .bind(ts(&now))
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            VaultError::Conflict(format!(
                "Lookup value '{}' already exists in '{}'",
                value.code, value.category
            ))
        } else {
            VaultError::Database(format!("Failed to create lookup value: {}", e))
        }
    })?;

    Ok(value)
}

/// 更新
pub async fn update(pool: &SqlitePool, id: Uuid, changes: LookupUpdate) -> VaultResult<LookupValue> {
    let mut value = get(pool, id).await?;
    if let Some(label) = changes.label {
        value.label = required("label", &label, 100)?;
    }
    if let Some(order) = changes.sort_order {
        value.sort_order = order;
    }
    if let Some(active) = changes.active {
        value.active = active;
    }
    value.updated_at = Utc::now();

    sqlx::query("UPDATE lookup_values SET label = ?, sort_order = ?, active = ?, updated_at = ? WHERE id = ?")
        .bind(&value.label)
        .bind(value.sort_order)
        .bind(value.active as i64)
        .bind(ts(&value.updated_at))
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to update lookup value: {}", e)))?;

    Ok(value)
}

/// 削除
pub async fn delete(pool: &SqlitePool, id: Uuid) -> VaultResult<()> {
    let result = sqlx::query("DELETE FROM lookup_values WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to delete lookup value: {}", e)))?;

    if result.rows_affected() == 0 {
        return Err(VaultError::NotFound(format!("lookup value {}", id)));
    }
    Ok(())
}

/// コードがカテゴリ内に存在し有効であることを確認する
pub async fn validate_code(pool: &SqlitePool, category: LookupCategory, code: &str) -> VaultResult<()> {
    let active: Option<i64> =
        sqlx::query_scalar("SELECT active FROM lookup_values WHERE category = ? AND code = ?")
            .bind(category.as_str())
            .bind(code)
            .fetch_optional(pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to check lookup value: {}", e)))?;

    match active {
        Some(1) => Ok(()),
        Some(_) => Err(VaultError::validation(format!(
            "{} '{}' is inactive",
            category, code
        ))),
        None => Err(VaultError::validation(format!(
            "unknown {} '{}'",
            category, code
        ))),
    }
}

#[derive(sqlx::FromRow)]
struct LookupRow {
    id: String,
    category: String,
    code: String,
    label: String,
    sort_order: i64,
    active: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<LookupRow> for LookupValue {
    type Error = VaultError;

    fn try_from(row: LookupRow) -> Result<Self, Self::Error> {
        Ok(LookupValue {
            id: parse_uuid(&row.id)?,
            category: parse_enum("category", &row.category)?,
            code: row.code,
            label: row.label,
            sort_order: row.sort_order,
            active: row.active != 0,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}
