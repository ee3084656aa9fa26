//! verify-audit / export-audit サブコマンド
//!
//! サーバーを起動せずにデータベースへ直接接続して監査ログを扱う。

use super::serve::DEFAULT_DATABASE_URL;
use crate::audit::export::{self, ExportFormat};
use crate::audit::hash_chain::{self, ChainVerificationResult};
use crate::audit::types::{AuditAction, AuditEvent, AuditLogFilter};
use crate::db::audit_log::{create_archive_pool, AuditLogStorage};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;

/// verify-audit の引数
#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Database URL
    #[arg(long, default_value = DEFAULT_DATABASE_URL, env = "CASEVAULT_DATABASE_URL")]
    pub database_url: String,

    /// Audit archive database file
    #[arg(long, env = "CASEVAULT_AUDIT_ARCHIVE_PATH")]
    pub archive_path: Option<PathBuf>,

    /// Also verify the archive chain
    #[arg(long, default_value_t = false)]
    pub include_archive: bool,
}

/// export-audit の引数
#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Database URL
    #[arg(long, default_value = DEFAULT_DATABASE_URL, env = "CASEVAULT_DATABASE_URL")]
    pub database_url: String,

    /// Audit archive database file
    #[arg(long, env = "CASEVAULT_AUDIT_ARCHIVE_PATH")]
    pub archive_path: Option<PathBuf>,

    /// Output format (csv or json)
    #[arg(short, long, default_value = "csv")]
    pub format: ExportFormat,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only entries at or after this RFC 3339 timestamp
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Only entries at or before this RFC 3339 timestamp
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,

    /// Include archived entries
    #[arg(long, default_value_t = false)]
    pub include_archive: bool,
}

/// verify-audit の出力
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    /// 全体の検証結果
    pub valid: bool,
    /// メインDB
    pub chain: ChainVerificationResult,
    /// アーカイブDB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ChainVerificationResult>,
}

async fn open_archive(path: Option<&PathBuf>) -> anyhow::Result<Option<SqlitePool>> {
    match path {
        Some(path) => {
            let pool = create_archive_pool(&path.to_string_lossy())
                .await
                .with_context(|| format!("failed to open archive database {}", path.display()))?;
            Ok(Some(pool))
        }
        None => Ok(None),
    }
}

async fn open_main(database_url: &str) -> anyhow::Result<SqlitePool> {
    crate::db::migrations::initialize_database(database_url)
        .await
        .with_context(|| format!("failed to open database {}", database_url))
}

/// チェーンを検証してレポートを返す
pub async fn verify(args: &VerifyArgs) -> anyhow::Result<VerifyReport> {
    let pool = open_main(&args.database_url).await?;
    let storage = AuditLogStorage::new(pool);
    let chain = hash_chain::verify_chain(&storage).await?;

    let archive = if args.include_archive {
        let archive_pool = open_archive(args.archive_path.as_ref())
            .await?
            .context("--include-archive requires --archive-path or CASEVAULT_AUDIT_ARCHIVE_PATH")?;
        Some(hash_chain::verify_archive_chain(&archive_pool).await?)
    } else {
        None
    };

    let valid = chain.valid && archive.as_ref().map_or(true, |a| a.valid);
    Ok(VerifyReport {
        valid,
        chain,
        archive,
    })
}

/// verify-audit を実行する
///
/// 結果をJSONで標準出力に書き、チェーンが壊れていれば`Ok(false)`を返す。
pub async fn execute_verify(args: &VerifyArgs) -> anyhow::Result<bool> {
    let report = verify(args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.valid)
}

/// export-audit を実行する
///
/// エクスポート自体もシステム操作として監査ログに残す。戻り値は出力件数。
pub async fn execute_export(args: &ExportArgs) -> anyhow::Result<usize> {
    if let (Some(from), Some(to)) = (args.from, args.to) {
        anyhow::ensure!(from <= to, "--from must not be after --to");
    }

    let pool = open_main(&args.database_url).await?;
    let archive_pool = open_archive(args.archive_path.as_ref()).await?;
    let storage = AuditLogStorage::new(pool);

    let filter = AuditLogFilter {
        time_from: args.from,
        time_to: args.to,
        include_archive: Some(args.include_archive),
        ..Default::default()
    };
    let batch = export::collect_entries(&storage, archive_pool.as_ref(), &filter).await?;
    let body = export::render(args.format, &batch.entries)?;

    match &args.output {
        Some(path) => std::fs::write(path, body)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{}", body),
    }

    let detail = serde_json::json!({
        "format": args.format,
        "count": batch.entries.len(),
        "truncated": batch.truncated,
        "filter": filter,
        "source": "cli",
    });
    storage
        .append(AuditEvent::system(
            AuditAction::Export,
            "audit_log",
            Some(detail.to_string()),
        ))
        .await?;

    if batch.truncated {
        tracing::warn!(
            count = batch.entries.len(),
            limit = export::EXPORT_MAX_ENTRIES,
            "Audit log export truncated at the entry limit; narrow the time range"
        );
    }
    tracing::info!(format = %args.format, count = batch.entries.len(), "Audit log exported");
    Ok(batch.entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite:{}", dir.path().join("vault.db").display())
    }

    async fn seed(url: &str, n: usize) {
        let pool = open_main(url).await.unwrap();
        let storage = AuditLogStorage::new(pool.clone());
        for _ in 0..n {
            storage
                .append(AuditEvent::system(AuditAction::Verify, "audit_log", None))
                .await
                .unwrap();
        }
        pool.close().await;
    }

    #[tokio::test]
    async fn test_verify_reports_valid_chain() {
        let dir = tempfile::tempdir().unwrap();
        let url = db_url(&dir);
        seed(&url, 3).await;

        let report = verify(&VerifyArgs {
            database_url: url,
            archive_path: None,
            include_archive: false,
        })
        .await
        .unwrap();
        assert!(report.valid);
        assert_eq!(report.chain.entries_checked, 3);
        assert!(report.archive.is_none());
    }

    #[tokio::test]
    async fn test_verify_archive_requires_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = verify(&VerifyArgs {
            database_url: db_url(&dir),
            archive_path: None,
            include_archive: true,
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_export_writes_csv_and_audits_itself() {
        let dir = tempfile::tempdir().unwrap();
        let url = db_url(&dir);
        seed(&url, 2).await;
        let out = dir.path().join("audit.csv");

        let count = execute_export(&ExportArgs {
            database_url: url.clone(),
            archive_path: None,
            format: ExportFormat::Csv,
            output: Some(out.clone()),
            from: None,
            to: None,
            include_archive: false,
        })
        .await
        .unwrap();
        assert_eq!(count, 2);

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.lines().count(), 3);
        assert!(written.starts_with("id,sequence_number"));

        let pool = open_main(&url).await.unwrap();
        let storage = AuditLogStorage::new(pool);
        let filter = AuditLogFilter {
            action: Some("export".to_string()),
            ..Default::default()
        };
        assert_eq!(storage.count(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_export_rejects_inverted_range() {
        let dir = tempfile::tempdir().unwrap();
        let from: DateTime<Utc> = "2026-02-01T00:00:00Z".parse().unwrap();
        let to: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let result = execute_export(&ExportArgs {
            database_url: db_url(&dir),
            archive_path: None,
            format: ExportFormat::Json,
            output: None,
            from: Some(from),
            to: Some(to),
            include_archive: false,
        })
        .await;
        assert!(result.is_err());
    }
}
