//! 監査ログシステム
//!
//! 全HTTP操作のメタデータを自動記録し、エントリ単位のハッシュチェーンで保護する

/// 監査ログの型定義
pub mod types;

/// 非同期バッファライター
pub mod writer;

/// 監査ログミドルウェア
pub mod middleware;

/// SHA-256エントリ単位ハッシュチェーン（改ざん検知）
pub mod hash_chain;

/// CSV / JSONエクスポート
pub mod export;
