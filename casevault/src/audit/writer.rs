//! 監査ログの非同期バッファライター
//!
//! mpscチャネルでイベントを受信し、定期的にチェーンへ一括追加する。
//! 送信側はブロックしない。

use crate::audit::types::AuditEvent;
use crate::config::AuditConfig;
use crate::db::audit_log::AuditLogStorage;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

enum WriterCommand {
    Entry(AuditEvent),
    Flush(oneshot::Sender<()>),
}

/// 監査ログの非同期ライター
///
/// mpscチャネル経由でAuditEventを受信し、
/// 定期的にDBへ一括書き込みする。
/// Clone可能（senderのクローン）。
#[derive(Clone)]
pub struct AuditLogWriter {
    sender: mpsc::UnboundedSender<WriterCommand>,
}

impl AuditLogWriter {
    /// 新しいAuditLogWriterを作成し、バックグラウンドタスクを起動
    pub fn new(storage: AuditLogStorage, config: AuditConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::background_task(rx, storage, config));

        Self { sender: tx }
    }

    /// イベントをバッファに送信（ブロックしない）
    pub fn send(&self, event: AuditEvent) {
        if self.sender.send(WriterCommand::Entry(event)).is_err() {
            warn!("Audit log writer is closed, dropping entry");
            crate::metrics::record_audit_dropped(1);
        }
    }

    /// バッファ内のイベントを直ちに書き込み、完了を待つ
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.send(WriterCommand::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// バックグラウンドフラッシュタスク
    async fn background_task(
        mut rx: mpsc::UnboundedReceiver<WriterCommand>,
        storage: AuditLogStorage,
        config: AuditConfig,
    ) {
        let capacity = config.buffer_capacity.max(1);
        let mut buffer: VecDeque<AuditEvent> = VecDeque::new();
        let mut interval = tokio::time::interval(config.flush_interval);
        // 最初のtickはすぐに発火するのでスキップ
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        Self::flush_buffer(&mut buffer, &storage).await;
                    }
                }
                command = rx.recv() => {
                    match command {
                        Some(WriterCommand::Entry(event)) => {
                            if buffer.len() >= capacity {
                                let discarded = buffer.pop_front();
                                warn!(
                                    capacity,
                                    path = discarded.as_ref().map(|e| e.request_path.as_str()).unwrap_or(""),
                                    "Audit log buffer overflow, discarding oldest entry"
                                );
                                crate::metrics::record_audit_dropped(1);
                            }
                            buffer.push_back(event);
                        }
                        Some(WriterCommand::Flush(done)) => {
                            if !buffer.is_empty() {
                                Self::flush_buffer(&mut buffer, &storage).await;
                            }
                            let _ = done.send(());
                        }
                        None => {
                            // チャネルが閉じられた → 残りをフラッシュして終了
                            if !buffer.is_empty() {
                                info!(remaining = buffer.len(), "Audit log writer shutting down, flushing");
                                Self::flush_buffer(&mut buffer, &storage).await;
                            }
                            info!("Audit log writer background task stopped");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// バッファ内イベントをチェーンに一括追加
    async fn flush_buffer(buffer: &mut VecDeque<AuditEvent>, storage: &AuditLogStorage) {
        let events: Vec<AuditEvent> = buffer.drain(..).collect();
        let count = events.len();

        match storage.append_batch(events).await {
            Ok(_) => debug!(count, "Flushed audit log entries"),
            Err(e) => {
                warn!(count, error = %e, "Failed to flush audit log entries, entries lost");
                crate::metrics::record_audit_dropped(count);
            }
        }
    }
}
