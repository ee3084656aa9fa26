//! コンプライアンス監視
//!
//! 違反の検出（スキャナ）と期間レポート・ダッシュボードの集計

/// 違反スキャナとSLA自動エスカレーション
pub mod scanner;

/// 期間レポートとダッシュボード
pub mod report;

pub use report::{dashboard, generate_report, ComplianceDashboard, ReportRequest};
pub use scanner::{ComplianceScanner, ScanSummary};
