//! 共通型定義
//!
//! 一覧APIで共有するページング型

use serde::{Deserialize, Serialize};

/// 1ページあたりの件数の既定値
pub const DEFAULT_PER_PAGE: u32 = 50;
/// 1ページあたりの件数の上限
pub const MAX_PER_PAGE: u32 = 500;

/// ページング指定（クエリパラメータ）
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    /// ページ番号（1始まり）
    pub page: Option<u32>,
    /// 1ページあたりの件数
    pub per_page: Option<u32>,
}

impl PageParams {
    /// 正規化したページ番号
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// 正規化した件数（1..=500）
    pub fn per_page(&self) -> u32 {
        self.per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE)
    }

    /// SQLの OFFSET
    pub fn offset(&self) -> i64 {
        (self.page() as i64 - 1) * self.per_page() as i64
    }

    /// SQLの LIMIT
    pub fn limit(&self) -> i64 {
        self.per_page() as i64
    }
}

/// 一覧レスポンス
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// 要素
    pub items: Vec<T>,
    /// フィルタ後の総件数
    pub total: i64,
    /// ページ番号
    pub page: u32,
    /// 1ページあたりの件数
    pub per_page: u32,
}

impl<T> Page<T> {
    /// ページング指定と結果から組み立てる
    pub fn new(items: Vec<T>, total: i64, params: &PageParams) -> Self {
        Self {
            items,
            total,
            page: params.page(),
            per_page: params.per_page(),
        }
    }

    /// 要素を変換する
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}
