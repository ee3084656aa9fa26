//! APIエラーレスポンス型
//!
//! axum用の共通エラーハンドリング

use crate::common::error::VaultError;
use axum::{response::IntoResponse, Json};

/// Axum用のエラーレスポンス型
#[derive(Debug)]
pub struct AppError(pub VaultError);

impl<E> From<E> for AppError
where
    E: Into<VaultError>,
{
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.0.status_code();
        // 内部エラーの詳細はログにのみ出す
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }

        (status, Json(self.0.to_error_response())).into_response()
    }
}
