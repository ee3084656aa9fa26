//! CLI module for casevault
//!
//! Provides the command-line interface for the server and offline audit tools.

pub mod audit;
pub mod serve;

use clap::{Parser, Subcommand};

/// casevault - Digital forensics case management with a tamper-evident audit log
#[derive(Parser, Debug)]
#[command(name = "casevault")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    CASEVAULT_HOST                  Bind address (default: 0.0.0.0)
    CASEVAULT_PORT                  Listen port (default: 8080)
    CASEVAULT_DATABASE_URL          Database URL (default: sqlite:data/casevault.db)
    CASEVAULT_JWT_SECRET            JWT signing key (random per process if not set)
    CASEVAULT_LOG_LEVEL             Log level (default: info)
    CASEVAULT_LOG_DIR               Directory for daily rotated log files
    CASEVAULT_ADMIN_USERNAME        Initial admin username (default: admin)
    CASEVAULT_ADMIN_PASSWORD        Initial admin password (prompted on first run if unset)
    CASEVAULT_AUDIT_ARCHIVE_PATH    Audit archive database file (archiving disabled if unset)
    CASEVAULT_AUDIT_FLUSH_INTERVAL_SECS   Audit buffer flush interval (default: 30)
    CASEVAULT_AUDIT_VERIFY_INTERVAL_SECS  Periodic chain verification (default: 86400)
    CASEVAULT_RETENTION_INTERVAL_SECS     Retention scheduler interval (default: 86400)
    CASEVAULT_COMPLIANCE_SCAN_INTERVAL_SECS  Compliance scan interval (default: 3600)
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the API server
    Serve(serve::ServeArgs),
    /// Verify the audit log hash chain and exit
    VerifyAudit(audit::VerifyArgs),
    /// Export audit log entries to a file or stdout
    ExportAudit(audit::ExportArgs),
}
