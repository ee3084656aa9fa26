//! 監査ログストレージ
//!
//! エントリの追加はプロセス内ロックと単一トランザクションで直列化し、
//! チェーンのヘッドを`audit_chain_state`に記録する。

use crate::audit::hash_chain::{self, ChainVerifier};
use crate::audit::types::{
    ActorType, AuditAction, AuditEvent, AuditLogEntry, AuditLogFilter, ChainPoint, ChainState,
};
use crate::common::error::{VaultError, VaultResult};
use crate::common::types::{Page, PageParams};
use crate::db::{parse_enum, parse_ts, parse_ts_opt, ts, SqlFilter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

const ENTRY_COLUMNS: &str = "id, sequence_number, timestamp, http_method, request_path, \
     status_code, actor_type, actor_id, actor_username, client_ip, duration_ms, action, \
     resource_type, resource_id, detail, previous_hash, checksum";

/// アーカイブDBプールを作成
///
/// ファイルが存在しない場合は作成し、メインDBと同じマイグレーションを適用する。
pub async fn create_archive_pool(path: &str) -> VaultResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
        .map_err(|e| VaultError::Database(format!("Invalid archive path: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to create archive pool: {}", e)))?;

    crate::db::migrations::run_migrations(&pool).await?;
    Ok(pool)
}

/// 監査ログのDB操作
#[derive(Clone)]
pub struct AuditLogStorage {
    pool: SqlitePool,
    append_lock: Arc<Mutex<()>>,
}

/// sqlx::FromRow用の行構造体
#[derive(Debug, sqlx::FromRow)]
struct AuditLogRow {
    id: i64,
    sequence_number: i64,
    timestamp: String,
    http_method: String,
    request_path: String,
    status_code: i64,
    actor_type: String,
    actor_id: Option<String>,
    actor_username: Option<String>,
    client_ip: Option<String>,
    duration_ms: Option<i64>,
    action: String,
    resource_type: Option<String>,
    resource_id: Option<String>,
    detail: Option<String>,
    previous_hash: String,
    checksum: String,
}

impl TryFrom<AuditLogRow> for AuditLogEntry {
    type Error = VaultError;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        let status_code = u16::try_from(row.status_code)
            .map_err(|e| VaultError::Database(format!("Invalid status_code: {}", e)))?;

        Ok(AuditLogEntry {
            id: row.id,
            sequence_number: row.sequence_number,
            event: AuditEvent {
                timestamp: parse_ts(&row.timestamp)?,
                http_method: row.http_method,
                request_path: row.request_path,
                status_code,
                actor_type: parse_enum::<ActorType>("actor_type", &row.actor_type)?,
                actor_id: row.actor_id,
                actor_username: row.actor_username,
                client_ip: row.client_ip,
                duration_ms: row.duration_ms,
                action: parse_enum::<AuditAction>("action", &row.action)?,
                resource_type: row.resource_type,
                resource_id: row.resource_id,
                detail: row.detail,
            },
            previous_hash: row.previous_hash,
            checksum: row.checksum,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChainStateRow {
    anchor_sequence: i64,
    anchor_hash: String,
    head_sequence: i64,
    head_hash: String,
    last_verified_at: Option<String>,
    last_verification_valid: Option<i64>,
}

/// 監査ログの集計
#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    /// 総件数（メインDB）
    pub total: i64,
    /// アクション別件数
    pub by_action: BTreeMap<String, i64>,
    /// アクター種別件数
    pub by_actor_type: BTreeMap<String, i64>,
    /// 直近24時間の件数
    pub last_24h: i64,
}

fn build_where_clause(filter: &AuditLogFilter) -> SqlFilter {
    let mut f = SqlFilter::default();
    f.eq("actor_type", filter.actor_type.as_deref())
        .eq("actor_id", filter.actor_id.as_deref())
        .eq("action", filter.action.as_deref())
        .eq("resource_type", filter.resource_type.as_deref())
        .eq("resource_id", filter.resource_id.as_deref())
        .eq("http_method", filter.http_method.as_deref())
        .eq("status_code", filter.status_code);
    if let Some(ref from) = filter.time_from {
        f.cond("timestamp >= ?", vec![ts(from)]);
    }
    if let Some(ref to) = filter.time_to {
        f.cond("timestamp <= ?", vec![ts(to)]);
    }
    f.search(
        &["request_path", "actor_username", "resource_id", "detail"],
        filter.search_text.as_deref(),
    );
    f
}

impl AuditLogStorage {
    /// 新しいAuditLogStorageを作成
    ///
    /// 追加処理のロックはクローン間で共有されるため、プロセス内では1つを作ってクローンする。
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 接続プール
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 追加とアーカイブを止めるロックを取得する
    pub(crate) async fn lock_appends(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.append_lock.lock().await
    }

    /// チェーンの状態を取得
    pub async fn chain_state(&self) -> VaultResult<ChainState> {
        Self::chain_state_in(&self.pool).await
    }

    async fn chain_state_in<'e, E>(executor: E) -> VaultResult<ChainState>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, ChainStateRow>(
            "SELECT anchor_sequence, anchor_hash, head_sequence, head_hash, \
             last_verified_at, last_verification_valid FROM audit_chain_state WHERE id = 1",
        )
        .fetch_one(executor)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to read chain state: {}", e)))?;

        Ok(ChainState {
            anchor: ChainPoint {
                sequence: row.anchor_sequence,
                hash: row.anchor_hash,
            },
            head: ChainPoint {
                sequence: row.head_sequence,
                hash: row.head_hash,
            },
            last_verified_at: parse_ts_opt(row.last_verified_at)?,
            last_verification_valid: row.last_verification_valid.map(|v| v != 0),
        })
    }

    /// イベントをチェーンに追加する
    pub async fn append(&self, event: AuditEvent) -> VaultResult<AuditLogEntry> {
        let mut entries = self.append_batch(vec![event]).await?;
        entries
            .pop()
            .ok_or_else(|| VaultError::Internal("append produced no entry".to_string()))
    }

    /// イベント群を順にチェーンへ追加する（単一トランザクション）
    pub async fn append_batch(&self, events: Vec<AuditEvent>) -> VaultResult<Vec<AuditLogEntry>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.append_lock.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VaultError::Database(format!("Failed to begin transaction: {}", e)))?;

        let state = Self::chain_state_in(&mut *tx).await?;
        let mut head = state.head;
        let mut sealed = Vec::with_capacity(events.len());

        for event in events {
            let mut entry = hash_chain::seal(head.sequence + 1, &head.hash, event);
            let e = &entry.event;
            let id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO audit_log_entries (
                    sequence_number, timestamp, http_method, request_path, status_code,
                    actor_type, actor_id, actor_username, client_ip, duration_ms, action,
                    resource_type, resource_id, detail, previous_hash, checksum
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(entry.sequence_number)
            .bind(hash_chain::canonical_timestamp(&e.timestamp))
            .bind(&e.http_method)
            .bind(&e.request_path)
            .bind(e.status_code as i64)
            .bind(e.actor_type.as_str())
            .bind(&e.actor_id)
            .bind(&e.actor_username)
            .bind(&e.client_ip)
            .bind(e.duration_ms)
            .bind(e.action.as_str())
            .bind(&e.resource_type)
            .bind(&e.resource_id)
            .bind(&e.detail)
            .bind(&entry.previous_hash)
            .bind(&entry.checksum)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to insert audit log: {}", e)))?;

            entry.id = id;
            head = ChainPoint {
                sequence: entry.sequence_number,
                hash: entry.checksum.clone(),
            };
            sealed.push(entry);
        }

        sqlx::query("UPDATE audit_chain_state SET head_sequence = ?, head_hash = ? WHERE id = 1")
            .bind(head.sequence)
            .bind(&head.hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to advance chain head: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(format!("Failed to commit transaction: {}", e)))?;

        crate::metrics::record_audit_written(sealed.len());
        Ok(sealed)
    }

    /// 連番が`after`より大きいエントリを連番順に取得する（`through`以下、最大`limit`件）
    pub async fn entries_after(
        pool: &SqlitePool,
        after: i64,
        through: Option<i64>,
        limit: i64,
    ) -> VaultResult<Vec<AuditLogEntry>> {
        let sql = format!(
            "SELECT {} FROM audit_log_entries WHERE sequence_number > ? AND sequence_number <= ? \
             ORDER BY sequence_number ASC LIMIT ?",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query_as::<_, AuditLogRow>(&sql)
            .bind(after)
            .bind(through.unwrap_or(i64::MAX))
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to read audit entries: {}", e)))?;

        rows.into_iter()
            .map(AuditLogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()
    }

    /// フィルタ条件に基づいて監査ログを検索
    pub async fn query(&self, filter: &AuditLogFilter) -> VaultResult<Vec<AuditLogEntry>> {
        Self::query_in(&self.pool, filter).await
    }

    /// フィルタ条件に基づいてレコード数を取得
    pub async fn count(&self, filter: &AuditLogFilter) -> VaultResult<i64> {
        Self::count_in(&self.pool, filter).await
    }

    /// フィルタに一致し連番が`before`未満のエントリを降順に最大`limit`件取得する
    ///
    /// 直前ページ末尾の連番を`before`に渡して読み進める。途中で追加があっても行がずれない。
    pub async fn entries_before(
        pool: &SqlitePool,
        filter: &AuditLogFilter,
        before: i64,
        limit: i64,
    ) -> VaultResult<Vec<AuditLogEntry>> {
        let mut f = build_where_clause(filter);
        f.cond("sequence_number < ?", vec![before.to_string()]);
        let sql = format!(
            "SELECT {} FROM audit_log_entries {} ORDER BY sequence_number DESC LIMIT ?",
            ENTRY_COLUMNS,
            f.where_clause()
        );

        let mut query = sqlx::query_as::<_, AuditLogRow>(&sql);
        for val in f.binds() {
            query = query.bind(val.as_str());
        }
        let rows = query
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to query audit logs: {}", e)))?;

        rows.into_iter()
            .map(AuditLogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()
    }

    /// アーカイブDBのエントリ数を取得
    pub async fn count_archive(
        &self,
        filter: &AuditLogFilter,
        archive_pool: &SqlitePool,
    ) -> VaultResult<i64> {
        Self::count_in(archive_pool, filter).await
    }

    /// メインDBとアーカイブDBを連番の降順で連結したページを返す
    ///
    /// アーカイブはチェーンの先頭部分なので、メインDBの全エントリの後ろに続く。
    pub async fn query_with_archive(
        &self,
        filter: &AuditLogFilter,
        archive_pool: &SqlitePool,
    ) -> VaultResult<Page<AuditLogEntry>> {
        let params = PageParams {
            page: filter.page,
            per_page: filter.per_page,
        };
        let main_total = self.count(filter).await?;
        let archive_total = self.count_archive(filter, archive_pool).await?;

        let offset = params.offset();
        let mut items = if offset < main_total {
            Self::query_window(&self.pool, filter, params.limit(), offset).await?
        } else {
            Vec::new()
        };
        let remaining = params.limit() - items.len() as i64;
        if remaining > 0 {
            let archive_offset = (offset - main_total).max(0);
            items.extend(
                Self::query_window(archive_pool, filter, remaining, archive_offset).await?,
            );
        }
        Ok(Page::new(items, main_total + archive_total, &params))
    }

    async fn query_in(pool: &SqlitePool, filter: &AuditLogFilter) -> VaultResult<Vec<AuditLogEntry>> {
        let params = PageParams {
            page: filter.page,
            per_page: filter.per_page,
        };
        Self::query_window(pool, filter, params.limit(), params.offset()).await
    }

    async fn query_window(
        pool: &SqlitePool,
        filter: &AuditLogFilter,
        limit: i64,
        offset: i64,
    ) -> VaultResult<Vec<AuditLogEntry>> {
        let f = build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM audit_log_entries {} ORDER BY sequence_number DESC LIMIT ? OFFSET ?",
            ENTRY_COLUMNS,
            f.where_clause()
        );

        let mut query = sqlx::query_as::<_, AuditLogRow>(&sql);
        for val in f.binds() {
            query = query.bind(val.as_str());
        }
        query = query.bind(limit).bind(offset);

        let rows = query
            .fetch_all(pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to query audit logs: {}", e)))?;

        rows.into_iter()
            .map(AuditLogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()
    }

    async fn count_in(pool: &SqlitePool, filter: &AuditLogFilter) -> VaultResult<i64> {
        let f = build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_log_entries {}", f.where_clause());

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for val in f.binds() {
            query = query.bind(val.as_str());
        }

        query
            .fetch_one(pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to count audit logs: {}", e)))
    }

    /// IDで監査ログを取得
    pub async fn get_by_id(&self, id: i64) -> VaultResult<Option<AuditLogEntry>> {
        let sql = format!("SELECT {} FROM audit_log_entries WHERE id = ?", ENTRY_COLUMNS);
        let row = sqlx::query_as::<_, AuditLogRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to get audit log by id: {}", e)))?;

        row.map(AuditLogEntry::try_from).transpose()
    }

    /// 集計を取得
    pub async fn stats(&self) -> VaultResult<AuditStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to count audit logs: {}", e)))?;

        let by_action: Vec<(String, i64)> = sqlx::query_as(
            "SELECT action, COUNT(*) FROM audit_log_entries GROUP BY action",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to count by action: {}", e)))?;

        let by_actor_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT actor_type, COUNT(*) FROM audit_log_entries GROUP BY actor_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to count by actor type: {}", e)))?;

        let since = ts(&(Utc::now() - chrono::Duration::hours(24)));
        let last_24h: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM audit_log_entries WHERE timestamp >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| VaultError::Database(format!("Failed to count recent logs: {}", e)))?;

        Ok(AuditStats {
            total,
            by_action: by_action.into_iter().collect(),
            by_actor_type: by_actor_type.into_iter().collect(),
            last_24h,
        })
    }

    /// 期間内のアクション別件数（レポート用）
    pub async fn count_by_action_between(
        &self,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
    ) -> VaultResult<Vec<(String, i64)>> {
        sqlx::query_as(
            "SELECT action, COUNT(*) as cnt FROM audit_log_entries \
             WHERE timestamp >= ? AND timestamp < ? GROUP BY action ORDER BY cnt DESC",
        )
        .bind(ts(from))
        .bind(ts(to))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to count by action: {}", e)))
    }

    /// 検証結果を記録
    pub async fn record_verification(&self, at: DateTime<Utc>, valid: bool) -> VaultResult<()> {
        sqlx::query(
            "UPDATE audit_chain_state SET last_verified_at = ?, last_verification_valid = ? WHERE id = 1",
        )
        .bind(ts(&at))
        .bind(valid as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to record verification: {}", e)))?;
        Ok(())
    }

    /// `cutoff`より古いエントリだけから成る最長の先頭区間の末尾連番
    ///
    /// アーカイブ対象がなければNone。
    pub async fn archivable_prefix_end(&self, cutoff: &DateTime<Utc>) -> VaultResult<Option<i64>> {
        let state = self.chain_state().await?;
        let first_recent: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(sequence_number) FROM audit_log_entries WHERE timestamp >= ?",
        )
        .bind(ts(cutoff))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| VaultError::Database(format!("Failed to find archive boundary: {}", e)))?;

        let through = match first_recent {
            Some(seq) => seq - 1,
            None => state.head.sequence,
        };
        Ok((through > state.anchor.sequence).then_some(through))
    }

    /// アンカーから`through`までのエントリをアーカイブDBへ移動し、アンカーを進める
    ///
    /// 移動対象区間のチェーンが壊れている場合は`Integrity`エラーで中止する。
    pub async fn archive_through(&self, through: i64, archive_pool: &SqlitePool) -> VaultResult<i64> {
        let _guard = self.append_lock.lock().await;

        let state = self.chain_state().await?;
        let through = through.min(state.head.sequence);
        if through <= state.anchor.sequence {
            return Ok(0);
        }

        let mut verifier = ChainVerifier::new(state.anchor.clone());
        hash_chain::feed_range(&self.pool, &mut verifier, state.anchor.sequence, Some(through))
            .await?;
        // 区間末尾のエントリが欠けていれば空ハッシュとなりTruncatedとして検出される
        let segment_end = ChainPoint {
            sequence: through,
            hash: self.checksum_at(through).await?.unwrap_or_default(),
        };
        let result = verifier.finish(Some(&segment_end));
        if !result.valid {
            return Err(VaultError::Integrity(format!(
                "Refusing to archive entries {}..={}: {}",
                state.anchor.sequence + 1,
                through,
                result.message.unwrap_or_default()
            )));
        }

        // アーカイブDBへコピー（再実行時の重複は無視）
        let mut archived = 0i64;
        let mut cursor = state.anchor.sequence;
        loop {
            let page = Self::entries_after(
                &self.pool,
                cursor,
                Some(through),
                hash_chain::VERIFY_PAGE_SIZE,
            )
            .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.sequence_number;

            let mut archive_tx = archive_pool.begin().await.map_err(|e| {
                VaultError::Database(format!("Failed to begin archive transaction: {}", e))
            })?;
            for entry in &page {
                insert_archived(&mut archive_tx, entry).await?;
            }
            archive_tx.commit().await.map_err(|e| {
                VaultError::Database(format!("Failed to commit archive transaction: {}", e))
            })?;
            archived += page.len() as i64;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VaultError::Database(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query("DELETE FROM audit_log_entries WHERE sequence_number > ? AND sequence_number <= ?")
            .bind(state.anchor.sequence)
            .bind(through)
            .execute(&mut *tx)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to delete archived entries: {}", e)))?;

        sqlx::query("UPDATE audit_chain_state SET anchor_sequence = ?, anchor_hash = ? WHERE id = 1")
            .bind(through)
            .bind(&segment_end.hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to move chain anchor: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| VaultError::Database(format!("Failed to commit transaction: {}", e)))?;

        info!(
            archived,
            anchor_sequence = through,
            "Archived audit log entries"
        );
        Ok(archived)
    }

    async fn checksum_at(&self, sequence: i64) -> VaultResult<Option<String>> {
        sqlx::query_scalar("SELECT checksum FROM audit_log_entries WHERE sequence_number = ?")
            .bind(sequence)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("Failed to read checksum: {}", e)))
    }
}

async fn insert_archived(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entry: &AuditLogEntry,
) -> VaultResult<()> {
    let e = &entry.event;
    sqlx::query(
        "INSERT OR IGNORE INTO audit_log_entries (
            id, sequence_number, timestamp, http_method, request_path, status_code,
            actor_type, actor_id, actor_username, client_ip, duration_ms, action,
            resource_type, resource_id, detail, previous_hash, checksum
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.id)
    .bind(entry.sequence_number)
    .bind(hash_chain::canonical_timestamp(&e.timestamp))
    .bind(&e.http_method)
    .bind(&e.request_path)
    .bind(e.status_code as i64)
    .bind(e.actor_type.as_str())
    .bind(&e.actor_id)
    .bind(&e.actor_username)
    .bind(&e.client_ip)
    .bind(e.duration_ms)
    .bind(e.action.as_str())
    .bind(&e.resource_type)
    .bind(&e.resource_id)
    .bind(&e.detail)
    .bind(&entry.previous_hash)
    .bind(&entry.checksum)
    .execute(&mut **tx)
    .await
    .map_err(|e| VaultError::Database(format!("Failed to archive entry: {}", e)))?;
    Ok(())
}
