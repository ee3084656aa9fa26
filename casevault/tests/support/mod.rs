//! 契約テスト共通ユーティリティ

pub mod app;
