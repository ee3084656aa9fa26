//! SHA-256エントリ単位ハッシュチェーン
//!
//! 各エントリのチェックサムは直前エントリのチェックサムを含む正規化バイト列から計算する。
//! 検証は連番順に1件ずつ進める純粋な検証器（`ChainVerifier`）で行い、
//! チェックサム不一致・リンク切れ・連番欠落・末尾の切り詰め・アンカー不一致を検出する。

use crate::audit::types::{AuditEvent, AuditLogEntry, ChainPoint};
use crate::common::error::VaultResult;
use crate::db::audit_log::AuditLogStorage;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{error, info};

/// ジェネシスのprevious_hash（ゼロハッシュ）
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// チェックサムのドメイン区切り
const DOMAIN_TAG: &[u8] = b"casevault-audit-v1";
/// フィールド区切り（ASCII Unit Separator）
const UNIT_SEPARATOR: u8 = 0x1F;
/// 値なしを表すバイト
const NONE_MARKER: u8 = 0x00;

/// 検証時に1回で読み込むエントリ数
pub const VERIFY_PAGE_SIZE: i64 = 500;
/// 結果に含める問題の上限
pub const MAX_REPORTED_ISSUES: usize = 100;

/// チェーンに記録するタイムスタンプの正規形（RFC3339、マイクロ秒、Z）
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// タイムスタンプをマイクロ秒に丸める
///
/// DBへ保存した文字列から復元した値とチェックサム計算時の値を一致させる。
pub fn truncate_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

fn push_opt(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(v) => buf.extend_from_slice(v.as_bytes()),
        None => buf.push(NONE_MARKER),
    }
}

/// チェックサム計算用の正規化バイト列
pub fn canonical_bytes(sequence_number: i64, previous_hash: &str, event: &AuditEvent) -> Vec<u8> {
    let sequence = sequence_number.to_string();
    let timestamp = canonical_timestamp(&event.timestamp);
    let status = event.status_code.to_string();
    let duration = event.duration_ms.map(|d| d.to_string());

    let fields: [Option<&str>; 15] = [
        Some(sequence.as_str()),
        Some(previous_hash),
        Some(timestamp.as_str()),
        Some(event.http_method.as_str()),
        Some(event.request_path.as_str()),
        Some(status.as_str()),
        Some(event.actor_type.as_str()),
        event.actor_id.as_deref(),
        event.actor_username.as_deref(),
        event.client_ip.as_deref(),
        duration.as_deref(),
        Some(event.action.as_str()),
        event.resource_type.as_deref(),
        event.resource_id.as_deref(),
        event.detail.as_deref(),
    ];

    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(DOMAIN_TAG);
    for field in fields {
        buf.push(UNIT_SEPARATOR);
        push_opt(&mut buf, field);
    }
    buf
}

/// エントリのチェックサムを計算
pub fn compute_checksum(sequence_number: i64, previous_hash: &str, event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(sequence_number, previous_hash, event));
    format!("{:x}", hasher.finalize())
}

/// イベントをチェーンに繋いだエントリ（ID未確定）を作る
pub fn seal(sequence_number: i64, previous_hash: &str, mut event: AuditEvent) -> AuditLogEntry {
    event.timestamp = truncate_timestamp(event.timestamp);
    let checksum = compute_checksum(sequence_number, previous_hash, &event);
    AuditLogEntry {
        id: 0,
        sequence_number,
        event,
        previous_hash: previous_hash.to_string(),
        checksum,
    }
}

/// ジェネシス位置
pub fn genesis() -> ChainPoint {
    ChainPoint {
        sequence: 0,
        hash: GENESIS_HASH.to_string(),
    }
}

/// 検出された問題
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainIssue {
    /// 再計算したチェックサムが保存値と一致しない
    ChecksumMismatch {
        /// 連番
        sequence: i64,
        /// 保存されていたチェックサム
        stored: String,
        /// 再計算したチェックサム
        computed: String,
    },
    /// previous_hashが直前エントリのチェックサムと一致しない
    BrokenLink {
        /// 連番
        sequence: i64,
        /// 期待したprevious_hash
        expected_previous: String,
        /// 保存されていたprevious_hash
        actual_previous: String,
    },
    /// 連番の欠落
    SequenceGap {
        /// 欠落の先頭
        missing_from: i64,
        /// 欠落の末尾
        missing_to: i64,
    },
    /// 末尾が記録済みヘッドと一致しない
    Truncated {
        /// 記録済みヘッドの連番
        expected_head: i64,
        /// 実際の末尾の連番
        last_sequence: Option<i64>,
    },
    /// 最初のエントリがアンカーに繋がらない
    AnchorMismatch {
        /// 連番
        sequence: i64,
        /// アンカーの連番
        anchor_sequence: i64,
    },
}

impl ChainIssue {
    fn summary(&self) -> String {
        match self {
            Self::ChecksumMismatch { sequence, .. } => {
                format!("checksum mismatch at sequence {}", sequence)
            }
            Self::BrokenLink { sequence, .. } => format!("broken link at sequence {}", sequence),
            Self::SequenceGap {
                missing_from,
                missing_to,
            } => format!("sequence gap {}..={}", missing_from, missing_to),
            Self::Truncated {
                expected_head,
                last_sequence,
            } => format!(
                "chain ends at {:?}, recorded head is {}",
                last_sequence, expected_head
            ),
            Self::AnchorMismatch { sequence, .. } => {
                format!("entry {} does not link to the archive anchor", sequence)
            }
        }
    }
}

/// チェーン検証結果
#[derive(Debug, Clone, Serialize)]
pub struct ChainVerificationResult {
    /// 検証が成功したか
    pub valid: bool,
    /// 検証したエントリ数
    pub entries_checked: i64,
    /// 最初に検証した連番
    pub first_sequence: Option<i64>,
    /// 最後に検証した連番
    pub last_sequence: Option<i64>,
    /// 検出された問題（最大100件）
    pub issues: Vec<ChainIssue>,
    /// 検証日時
    pub verified_at: DateTime<Utc>,
    /// 要約メッセージ
    pub message: Option<String>,
}

/// 逐次チェーン検証器
///
/// エントリを連番順に`push`し、最後に`finish`で結果を得る。I/Oを持たない。
#[derive(Debug)]
pub struct ChainVerifier {
    anchor: ChainPoint,
    last: Option<ChainPoint>,
    first_sequence: Option<i64>,
    entries_checked: i64,
    issues: Vec<ChainIssue>,
    issue_count: usize,
}

impl ChainVerifier {
    /// アンカー位置から検証を始める
    pub fn new(anchor: ChainPoint) -> Self {
        Self {
            anchor,
            last: None,
            first_sequence: None,
            entries_checked: 0,
            issues: Vec::new(),
            issue_count: 0,
        }
    }

    /// ジェネシスから検証を始める
    pub fn from_genesis() -> Self {
        Self::new(genesis())
    }

    fn report(&mut self, issue: ChainIssue) {
        self.issue_count += 1;
        if self.issues.len() < MAX_REPORTED_ISSUES {
            self.issues.push(issue);
        }
    }

    /// 次のエントリを検証する
    pub fn push(&mut self, entry: &AuditLogEntry) {
        let computed = compute_checksum(entry.sequence_number, &entry.previous_hash, &entry.event);
        if computed != entry.checksum {
            self.report(ChainIssue::ChecksumMismatch {
                sequence: entry.sequence_number,
                stored: entry.checksum.clone(),
                computed,
            });
        }

        match self.last.take() {
            None => {
                let expected = self.anchor.sequence + 1;
                if entry.sequence_number > expected {
                    self.report(ChainIssue::SequenceGap {
                        missing_from: expected,
                        missing_to: entry.sequence_number - 1,
                    });
                } else if entry.sequence_number < expected
                    || entry.previous_hash != self.anchor.hash
                {
                    self.report(ChainIssue::AnchorMismatch {
                        sequence: entry.sequence_number,
                        anchor_sequence: self.anchor.sequence,
                    });
                }
                self.first_sequence = Some(entry.sequence_number);
            }
            Some(prev) => {
                let expected = prev.sequence + 1;
                if entry.sequence_number > expected {
                    // 欠落直後のリンクは検査しない
                    self.report(ChainIssue::SequenceGap {
                        missing_from: expected,
                        missing_to: entry.sequence_number - 1,
                    });
                } else if entry.previous_hash != prev.hash {
                    self.report(ChainIssue::BrokenLink {
                        sequence: entry.sequence_number,
                        expected_previous: prev.hash,
                        actual_previous: entry.previous_hash.clone(),
                    });
                }
            }
        }

        self.entries_checked += 1;
        self.last = Some(ChainPoint {
            sequence: entry.sequence_number,
            hash: entry.checksum.clone(),
        });
    }

    /// 検証を終える
    ///
    /// `head`を渡すと末尾が記録済みヘッドと一致するかも確認する。
    pub fn finish(mut self, head: Option<&ChainPoint>) -> ChainVerificationResult {
        if let Some(head) = head {
            let truncated = match &self.last {
                None => head.sequence > self.anchor.sequence,
                Some(last) => {
                    last.sequence < head.sequence
                        || (last.sequence == head.sequence && last.hash != head.hash)
                }
            };
            if truncated {
                let last_sequence = self.last.as_ref().map(|l| l.sequence);
                self.report(ChainIssue::Truncated {
                    expected_head: head.sequence,
                    last_sequence,
                });
            }
        }

        let valid = self.issue_count == 0;
        let message = if valid {
            if self.entries_checked == 0 {
                Some("No entries to verify".to_string())
            } else {
                None
            }
        } else {
            let first = self
                .issues
                .first()
                .map(|i| i.summary())
                .unwrap_or_default();
            Some(format!("{} issue(s) found; first: {}", self.issue_count, first))
        };

        ChainVerificationResult {
            valid,
            entries_checked: self.entries_checked,
            first_sequence: self.first_sequence,
            last_sequence: self.last.map(|l| l.sequence),
            issues: self.issues,
            verified_at: Utc::now(),
            message,
        }
    }
}

/// 指定区間 (after, through] のエントリを検証器に流す
pub(crate) async fn feed_range(
    pool: &SqlitePool,
    verifier: &mut ChainVerifier,
    after: i64,
    through: Option<i64>,
) -> VaultResult<()> {
    let mut cursor = after;
    loop {
        let page =
            AuditLogStorage::entries_after(pool, cursor, through, VERIFY_PAGE_SIZE).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = last.sequence_number;
        for entry in &page {
            verifier.push(entry);
        }
        if (page.len() as i64) < VERIFY_PAGE_SIZE {
            break;
        }
    }
    Ok(())
}

/// メインDBのチェーンをアンカーからヘッドまで検証し、結果を記録する
///
/// 走査中は追加とアーカイブを止め、読み取ったヘッドまでを対象にする。
pub async fn verify_chain(storage: &AuditLogStorage) -> VaultResult<ChainVerificationResult> {
    let result = {
        let _guard = storage.lock_appends().await;
        let state = storage.chain_state().await?;
        let mut verifier = ChainVerifier::new(state.anchor.clone());
        feed_range(
            storage.pool(),
            &mut verifier,
            state.anchor.sequence,
            Some(state.head.sequence),
        )
        .await?;
        verifier.finish(Some(&state.head))
    };

    storage
        .record_verification(result.verified_at, result.valid)
        .await?;
    crate::metrics::record_chain_verification(result.valid);

    if result.valid {
        info!(
            entries_checked = result.entries_checked,
            "Audit log hash chain verified"
        );
    } else {
        error!(
            entries_checked = result.entries_checked,
            message = result.message.as_deref().unwrap_or(""),
            "Audit log hash chain verification FAILED"
        );
    }
    Ok(result)
}

/// アーカイブDBのチェーンをジェネシスから検証する
pub async fn verify_archive_chain(archive_pool: &SqlitePool) -> VaultResult<ChainVerificationResult> {
    let mut verifier = ChainVerifier::from_genesis();
    feed_range(archive_pool, &mut verifier, 0, None).await?;
    Ok(verifier.finish(None))
}
