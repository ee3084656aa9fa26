//! casevault Server Entry Point

use anyhow::Context;
use casevault::cli::serve::ServeArgs;
use casevault::cli::{audit, Cli, Commands};
use casevault::config::{AuditConfig, NotificationConfig, RetentionConfig, SlaConfig};
use casevault::notify::NotificationDispatcher;
use casevault::{api, auth, db, logging, AppState};
use clap::Parser;
use std::net::SocketAddr;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 監査ツールは標準出力にデータを書くため、ログはサーバー起動時のみ初期化する
    if matches!(cli.command, Some(Commands::Serve(_)) | None) {
        if let Err(e) = logging::init() {
            eprintln!("Error: failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    }

    let result = match cli.command {
        Some(Commands::VerifyAudit(args)) => match audit::execute_verify(&args).await {
            Ok(true) => Ok(()),
            Ok(false) => std::process::exit(2),
            Err(e) => Err(e),
        },
        Some(Commands::ExportAudit(args)) => audit::execute_export(&args).await.map(|_| ()),
        Some(Commands::Serve(args)) => run_server(args).await,
        // No subcommand - default to serve
        None => run_server(ServeArgs::from_env()).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    info!("casevault v{}", env!("CARGO_PKG_VERSION"));

    // データベース接続プールを最初に作成（他コンポーネントが依存）
    let db_pool = db::migrations::initialize_database(&args.database_url)
        .await
        .context("failed to initialize database")?;
    info!(database_url = %args.database_url, "Database initialized");

    // 管理者が存在しない場合は作成
    auth::bootstrap::ensure_admin_exists(&db_pool)
        .await
        .context("failed to ensure admin exists")?;
    let jwt_secret = args.resolve_jwt_secret();
    info!("Authentication system initialized");

    let audit_config = AuditConfig::from_env();
    let audit_archive_pool = match &audit_config.archive_path {
        Some(path) => {
            let path = path.to_string_lossy();
            let pool = db::audit_log::create_archive_pool(&path)
                .await
                .context("failed to initialize audit archive database")?;
            info!(path = %path, "Audit archive DB initialized");
            Some(pool)
        }
        None => {
            info!("CASEVAULT_AUDIT_ARCHIVE_PATH not set, audit archiving disabled");
            None
        }
    };

    // 前回プロセスで中断したジョブを失敗として閉じる
    let interrupted = db::retention::fail_interrupted_jobs(&db_pool).await?;
    if interrupted > 0 {
        warn!(count = interrupted, "Marked interrupted retention jobs as failed");
    }

    let verify_interval = audit_config.verify_interval;
    let state = AppState::new(
        db_pool.clone(),
        jwt_secret,
        audit_archive_pool,
        audit_config,
        SlaConfig::from_env(),
    );
    info!("Audit log system initialized");

    // 起動時ハッシュチェーン検証（改ざんがあれば違反を登録）
    match state.scanner.check_chain(&mut Vec::new()).await {
        Ok(result) if result.valid => {
            info!(
                entries_checked = result.entries_checked,
                "Startup audit log hash chain verification passed"
            );
        }
        Ok(result) => {
            error!(
                entries_checked = result.entries_checked,
                message = result.message.as_deref().unwrap_or(""),
                "Startup audit log hash chain verification FAILED - tampering detected"
            );
        }
        Err(e) => warn!("Startup audit log hash chain verification error: {}", e),
    }

    spawn_periodic_verification(state.clone(), verify_interval);
    state.retention.clone().start(RetentionConfig::from_env().interval);
    state.scanner.clone().start();
    NotificationDispatcher::new(db_pool, NotificationConfig::from_env())?.start();

    let app = api::create_app(state.clone());
    let bind_addr = args.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", bind_addr))?;
    info!("casevault server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    // バッファに残った監査ログを書き出す
    state.audit_log_writer.flush().await;
    info!("Server shutdown complete");
    Ok(())
}

/// 定期ハッシュチェーン検証タスク
fn spawn_periodic_verification(state: AppState, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 最初のtickはスキップ（起動時検証は実施済み）
        timer.tick().await;
        loop {
            timer.tick().await;
            state.audit_log_writer.flush().await;
            let mut opened = Vec::new();
            match state.scanner.check_chain(&mut opened).await {
                Ok(result) if result.valid => info!(
                    entries_checked = result.entries_checked,
                    "Periodic audit log hash chain verification passed"
                ),
                Ok(result) => error!(
                    message = result.message.as_deref().unwrap_or(""),
                    violations_opened = opened.len(),
                    "Periodic audit log hash chain verification FAILED"
                ),
                Err(e) => warn!("Periodic audit log hash chain verification error: {}", e),
            }
        }
    });
}

/// シャットダウンシグナルを待機
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
