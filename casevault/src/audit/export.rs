//! 監査ログのエクスポート（CSV / JSON）

use crate::audit::types::{AuditLogEntry, AuditLogFilter};
use crate::common::error::{VaultError, VaultResult};
use crate::common::types::MAX_PER_PAGE;
use crate::db::audit_log::AuditLogStorage;
use sqlx::SqlitePool;

/// 1回のエクスポートで出力する最大件数
pub const EXPORT_MAX_ENTRIES: usize = 100_000;

str_enum! {
    /// エクスポート形式
    pub enum ExportFormat {
        /// CSV
        Csv => "csv",
        /// JSON配列
        Json => "json",
    }
}

impl ExportFormat {
    /// Content-Type
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    /// ダウンロードファイル名
    pub fn file_name(&self) -> String {
        format!(
            "audit-log-{}.{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%SZ"),
            self.as_str()
        )
    }
}

const CSV_HEADER: [&str; 17] = [
    "id",
    "sequence_number",
    "timestamp",
    "http_method",
    "request_path",
    "status_code",
    "actor_type",
    "actor_id",
    "actor_username",
    "client_ip",
    "duration_ms",
    "action",
    "resource_type",
    "resource_id",
    "detail",
    "previous_hash",
    "checksum",
];

/// エクスポート対象のエントリ
#[derive(Debug, Default)]
pub struct ExportBatch {
    /// 連番の降順
    pub entries: Vec<AuditLogEntry>,
    /// 上限件数で打ち切ったか
    pub truncated: bool,
}

/// フィルタに一致するエントリを連番の降順で取得する（最大`EXPORT_MAX_ENTRIES`件）
///
/// 開始時点のヘッドまでを対象にする。アーカイブプールが渡され`include_archive`が立っていれば
/// アーカイブ分も後ろに続ける。
pub async fn collect_entries(
    storage: &AuditLogStorage,
    archive_pool: Option<&SqlitePool>,
    filter: &AuditLogFilter,
) -> VaultResult<ExportBatch> {
    collect_limited(storage, archive_pool, filter, EXPORT_MAX_ENTRIES).await
}

async fn collect_limited(
    storage: &AuditLogStorage,
    archive_pool: Option<&SqlitePool>,
    filter: &AuditLogFilter,
    limit: usize,
) -> VaultResult<ExportBatch> {
    let head = storage.chain_state().await?.head.sequence;
    let mut batch = ExportBatch::default();
    let cursor = collect_from(storage.pool(), filter, head + 1, limit, &mut batch).await?;
    if filter.include_archive.unwrap_or(false) {
        if let Some(archive) = archive_pool {
            // 読み取り中にアーカイブへ移った分も`cursor`未満として拾う
            collect_from(archive, filter, cursor, limit, &mut batch).await?;
        }
    }
    Ok(batch)
}

/// 連番`before`未満を降順に読み進め、最後に読んだ連番を返す
async fn collect_from(
    pool: &SqlitePool,
    filter: &AuditLogFilter,
    mut before: i64,
    limit: usize,
    batch: &mut ExportBatch,
) -> VaultResult<i64> {
    let page_size = MAX_PER_PAGE as i64;
    while !batch.truncated {
        let page = AuditLogStorage::entries_before(pool, filter, before, page_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        before = last.sequence_number;
        let full = page.len() as i64 == page_size;
        for entry in page {
            if batch.entries.len() >= limit {
                batch.truncated = true;
                break;
            }
            batch.entries.push(entry);
        }
        if !full {
            break;
        }
    }
    Ok(before)
}

/// エントリをCSVにする
pub fn to_csv(entries: &[AuditLogEntry]) -> VaultResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_err = |e: csv::Error| VaultError::Internal(format!("Failed to write CSV: {}", e));

    writer.write_record(CSV_HEADER).map_err(csv_err)?;
    for entry in entries {
        let e = &entry.event;
        writer
            .write_record([
                entry.id.to_string(),
                entry.sequence_number.to_string(),
                crate::audit::hash_chain::canonical_timestamp(&e.timestamp),
                e.http_method.clone(),
                e.request_path.clone(),
                e.status_code.to_string(),
                e.actor_type.to_string(),
                e.actor_id.clone().unwrap_or_default(),
                e.actor_username.clone().unwrap_or_default(),
                e.client_ip.clone().unwrap_or_default(),
                e.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
                e.action.to_string(),
                e.resource_type.clone().unwrap_or_default(),
                e.resource_id.clone().unwrap_or_default(),
                e.detail.clone().unwrap_or_default(),
                entry.previous_hash.clone(),
                entry.checksum.clone(),
            ])
            .map_err(csv_err)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| VaultError::Internal(format!("Failed to finish CSV: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| VaultError::Internal(format!("CSV is not UTF-8: {}", e)))
}

/// エントリを指定形式で書き出す
pub fn render(format: ExportFormat, entries: &[AuditLogEntry]) -> VaultResult<String> {
    match format {
        ExportFormat::Csv => to_csv(entries),
        ExportFormat::Json => serde_json::to_string_pretty(entries)
            .map_err(|e| VaultError::Common(e.into())),
    }
}
