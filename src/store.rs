// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed configuration and mapping store.
//!
//! One database holds everything the engine persists:
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `channel_connections` | source/destination pairs, flags, watermark, scan cursor |
//! | `word_replacements` | substitution rules, applied in insertion (`id`) order |
//! | `transferred_posts` | (connection, source post) → destination post mapping |
//! | `activity_logs` | append-only audit trail for the operator |
//!
//! Every child table cascades on connection delete.
//!
//! # Mapping Semantics
//!
//! `transferred_posts` carries `UNIQUE(connection_id, source_message_id)`.
//! [`MirrorStore::put_mapping`] is a single `INSERT`; the constraint makes it
//! an atomic check-and-insert, and a violation surfaces as
//! [`MirrorError::DuplicateKey`]. The scan cursor is only a resume hint.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. Writes are retried with exponential backoff (max 5 attempts).

use crate::config::StoreConfig;
use crate::error::{MirrorError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for SQLite busy retry behavior
const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::store_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        "SQLite busy, max retries exceeded"
                    );
                }
                return Err(e);
            }
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// A configured source → destination link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: i64,
    /// Source channel reference as entered by the operator.
    pub source: String,
    /// Destination channel reference as entered by the operator.
    pub destination: String,
    pub watermark_text: Option<String>,
    pub active: bool,
    /// Source cannot be observed via live events and must be polled.
    pub restricted: bool,
    /// Highest source post id known to be scanned.
    pub last_scanned: i64,
    /// Creation time (unix millis).
    pub created_at: i64,
}

/// A literal substitution applied to captions and text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionRule {
    pub id: i64,
    pub connection_id: i64,
    pub original: String,
    pub replacement: String,
}

/// One replicated post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub connection_id: i64,
    pub source_post_id: i64,
    pub destination_post_id: i64,
    pub transferred_at: i64,
}

/// Audit action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Transfer,
    AddConnection,
    DeleteConnection,
    Toggle,
    AddRule,
    RemoveRule,
    ClearRules,
    SetWatermark,
    Error,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Transfer => "transfer",
            AuditAction::AddConnection => "add_connection",
            AuditAction::DeleteConnection => "delete_connection",
            AuditAction::Toggle => "toggle_connection",
            AuditAction::AddRule => "add_replacement",
            AuditAction::RemoveRule => "remove_replacement",
            AuditAction::ClearRules => "clear_replacements",
            AuditAction::SetWatermark => "set_watermark",
            AuditAction::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "transfer" => AuditAction::Transfer,
            "add_connection" => AuditAction::AddConnection,
            "delete_connection" => AuditAction::DeleteConnection,
            "toggle_connection" => AuditAction::Toggle,
            "add_replacement" => AuditAction::AddRule,
            "remove_replacement" => AuditAction::RemoveRule,
            "clear_replacements" => AuditAction::ClearRules,
            "set_watermark" => AuditAction::SetWatermark,
            "error" => AuditAction::Error,
            _ => return None,
        })
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub id: i64,
    pub connection_id: i64,
    /// Raw action string; unknown kinds from older databases are kept as-is.
    pub action: String,
    pub details: String,
    pub created_at: i64,
}

impl AuditEntry {
    pub fn action_kind(&self) -> Option<AuditAction> {
        AuditAction::parse(&self.action)
    }
}

/// Audit row joined with its connection's endpoints, for the status view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditView {
    pub entry: AuditEntry,
    pub source: String,
    pub destination: String,
}

type ConnectionRow = (i64, String, String, Option<String>, i64, i64, i64, i64);

const CONNECTION_COLUMNS: &str = "id, source_channel, destination_channel, watermark_text, \
     is_active, is_restricted, last_scanned_message_id, created_at";

fn connection_from_row(row: ConnectionRow) -> Connection {
    let (id, source, destination, watermark_text, active, restricted, last_scanned, created_at) = row;
    Connection {
        id,
        source,
        destination,
        watermark_text: watermark_text.filter(|w| !w.is_empty()),
        active: active != 0,
        restricted: restricted != 0,
        last_scanned,
        created_at,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistent connection, rule, mapping and audit storage backed by SQLite.
pub struct MirrorStore {
    /// SQLite connection pool
    pool: SqlitePool,
    /// Path to database file
    path: String,
}

impl MirrorStore {
    /// Open (or create) the store and bootstrap the schema.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let path_str = config.sqlite_path.clone();
        info!(path = %path_str, "Initializing mirror store");

        let journal = if config.wal_mode {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| MirrorError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(journal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: path_str,
        };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Create tables and bring databases from older releases up to date.
    async fn bootstrap(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channel_connections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_channel TEXT NOT NULL,
                destination_channel TEXT NOT NULL,
                watermark_text TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_scanned_message_id INTEGER NOT NULL DEFAULT 0,
                is_restricted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS word_replacements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                connection_id INTEGER NOT NULL,
                original_word TEXT NOT NULL,
                replacement_word TEXT NOT NULL,
                FOREIGN KEY (connection_id) REFERENCES channel_connections (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transferred_posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                connection_id INTEGER NOT NULL,
                source_message_id INTEGER NOT NULL,
                destination_message_id INTEGER NOT NULL,
                transferred_at INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (connection_id) REFERENCES channel_connections (id) ON DELETE CASCADE,
                UNIQUE (connection_id, source_message_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activity_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                connection_id INTEGER NOT NULL,
                action_type TEXT NOT NULL,
                details TEXT,
                created_at INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (connection_id) REFERENCES channel_connections (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Older databases predate these columns.
        let columns: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('channel_connections')")
                .fetch_all(&self.pool)
                .await?;
        let has = |name: &str| columns.iter().any(|c| c.0 == name);
        for (column, ddl) in [
            ("is_active", "ALTER TABLE channel_connections ADD COLUMN is_active INTEGER NOT NULL DEFAULT 1"),
            (
                "last_scanned_message_id",
                "ALTER TABLE channel_connections ADD COLUMN last_scanned_message_id INTEGER NOT NULL DEFAULT 0",
            ),
            ("is_restricted", "ALTER TABLE channel_connections ADD COLUMN is_restricted INTEGER NOT NULL DEFAULT 0"),
            ("watermark_text", "ALTER TABLE channel_connections ADD COLUMN watermark_text TEXT"),
        ] {
            if !has(column) {
                info!(column, "Migrating channel_connections");
                sqlx::query(ddl).execute(&self.pool).await?;
            }
        }

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_transferred_unique \
             ON transferred_posts(connection_id, source_message_id)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Schema bootstrap complete");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a connection and return its id.
    ///
    /// Duplicate (source, destination) pairs are allowed.
    pub async fn create_connection(&self, source: &str, destination: &str, restricted: bool) -> Result<i64> {
        let pool = &self.pool;
        let now = now_millis();
        let result = execute_with_retry("connection_create", || async {
            sqlx::query(
                "INSERT INTO channel_connections \
                 (source_channel, destination_channel, is_restricted, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(source)
            .bind(destination)
            .bind(restricted as i64)
            .bind(now)
            .execute(pool)
            .await
        })
        .await?;

        let id = result.last_insert_rowid();
        info!(connection_id = id, source, destination, restricted, "Connection created");
        Ok(id)
    }

    pub async fn get_connection(&self, id: i64) -> Result<Option<Connection>> {
        let sql = format!("SELECT {} FROM channel_connections WHERE id = ?", CONNECTION_COLUMNS);
        let row: Option<ConnectionRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(connection_from_row))
    }

    /// Like [`get_connection`](Self::get_connection) but `NotFound` when absent.
    pub async fn require_connection(&self, id: i64) -> Result<Connection> {
        self.get_connection(id)
            .await?
            .ok_or_else(|| MirrorError::connection_not_found(id))
    }

    pub async fn list_connections(&self) -> Result<Vec<Connection>> {
        self.query_connections("1 = 1").await
    }

    /// Connections the realtime listener serves.
    pub async fn active_connections(&self) -> Result<Vec<Connection>> {
        self.query_connections("is_active = 1").await
    }

    /// Active connections flagged restricted (the poller's work list).
    pub async fn restricted_connections(&self) -> Result<Vec<Connection>> {
        self.query_connections("is_active = 1 AND is_restricted = 1").await
    }

    async fn query_connections(&self, filter: &str) -> Result<Vec<Connection>> {
        let sql = format!(
            "SELECT {} FROM channel_connections WHERE {} ORDER BY id",
            CONNECTION_COLUMNS, filter
        );
        let rows: Vec<ConnectionRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(connection_from_row).collect())
    }

    /// Delete a connection together with its rules, mappings and audit entries.
    pub async fn delete_connection(&self, id: i64) -> Result<()> {
        let pool = &self.pool;
        let result = execute_with_retry("connection_delete", || async {
            sqlx::query("DELETE FROM channel_connections WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(MirrorError::connection_not_found(id));
        }
        info!(connection_id = id, "Connection deleted");
        Ok(())
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<()> {
        self.update_connection("connection_set_active", "UPDATE channel_connections SET is_active = ? WHERE id = ?", id, active as i64)
            .await
    }

    pub async fn set_restricted(&self, id: i64, restricted: bool) -> Result<()> {
        self.update_connection(
            "connection_set_restricted",
            "UPDATE channel_connections SET is_restricted = ? WHERE id = ?",
            id,
            restricted as i64,
        )
        .await
    }

    async fn update_connection(&self, operation: &str, sql: &str, id: i64, value: i64) -> Result<()> {
        let pool = &self.pool;
        let result = execute_with_retry(operation, || async {
            sqlx::query(sql).bind(value).bind(id).execute(pool).await
        })
        .await?;
        if result.rows_affected() == 0 {
            return Err(MirrorError::connection_not_found(id));
        }
        Ok(())
    }

    /// Set or clear (`None`) the watermark text.
    pub async fn set_watermark(&self, id: i64, text: Option<&str>) -> Result<()> {
        let pool = &self.pool;
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        let result = execute_with_retry("connection_set_watermark", || async {
            sqlx::query("UPDATE channel_connections SET watermark_text = ? WHERE id = ?")
                .bind(text)
                .bind(id)
                .execute(pool)
                .await
        })
        .await?;
        if result.rows_affected() == 0 {
            return Err(MirrorError::connection_not_found(id));
        }
        Ok(())
    }

    pub async fn watermark(&self, id: i64) -> Result<Option<String>> {
        Ok(self.require_connection(id).await?.watermark_text)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scan cursor
    // ─────────────────────────────────────────────────────────────────────────

    /// Current scan cursor, 0 when the connection is unknown or never scanned.
    pub async fn cursor(&self, id: i64) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_scanned_message_id FROM channel_connections WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0).unwrap_or(0))
    }

    /// Move the cursor forward to `post_id` (never backwards).
    ///
    /// Best-effort: a missing connection is not an error here.
    pub async fn advance_cursor(&self, id: i64, post_id: i64) -> Result<()> {
        let pool = &self.pool;
        execute_with_retry("cursor_advance", || async {
            sqlx::query(
                "UPDATE channel_connections \
                 SET last_scanned_message_id = MAX(last_scanned_message_id, ?) WHERE id = ?",
            )
            .bind(post_id)
            .bind(id)
            .execute(pool)
            .await
        })
        .await?;
        debug!(connection_id = id, post_id, "Cursor advanced");
        Ok(())
    }

    /// Overwrite the cursor, including moving it backwards.
    pub async fn reset_cursor(&self, id: i64, post_id: i64) -> Result<()> {
        self.update_connection(
            "cursor_reset",
            "UPDATE channel_connections SET last_scanned_message_id = ? WHERE id = ?",
            id,
            post_id,
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Substitution rules
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn add_rule(&self, connection_id: i64, original: &str, replacement: &str) -> Result<i64> {
        self.require_connection(connection_id).await?;
        let pool = &self.pool;
        let result = execute_with_retry("rule_add", || async {
            sqlx::query(
                "INSERT INTO word_replacements (connection_id, original_word, replacement_word) VALUES (?, ?, ?)",
            )
            .bind(connection_id)
            .bind(original)
            .bind(replacement)
            .execute(pool)
            .await
        })
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Rules of a connection in insertion order.
    pub async fn list_rules(&self, connection_id: i64) -> Result<Vec<SubstitutionRule>> {
        let rows: Vec<(i64, i64, String, String)> = sqlx::query_as(
            "SELECT id, connection_id, original_word, replacement_word \
             FROM word_replacements WHERE connection_id = ? ORDER BY id",
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, connection_id, original, replacement)| SubstitutionRule {
                id,
                connection_id,
                original,
                replacement,
            })
            .collect())
    }

    /// Remove a single rule; returns the removed rule.
    pub async fn remove_rule(&self, rule_id: i64) -> Result<SubstitutionRule> {
        let row: Option<(i64, i64, String, String)> = sqlx::query_as(
            "SELECT id, connection_id, original_word, replacement_word FROM word_replacements WHERE id = ?",
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        let (id, connection_id, original, replacement) = row.ok_or(MirrorError::NotFound {
            entity: "rule",
            id: rule_id,
        })?;

        let pool = &self.pool;
        execute_with_retry("rule_remove", || async {
            sqlx::query("DELETE FROM word_replacements WHERE id = ?")
                .bind(rule_id)
                .execute(pool)
                .await
        })
        .await?;

        Ok(SubstitutionRule {
            id,
            connection_id,
            original,
            replacement,
        })
    }

    /// Remove all rules of a connection; returns how many were removed.
    pub async fn clear_rules(&self, connection_id: i64) -> Result<u64> {
        let pool = &self.pool;
        let result = execute_with_retry("rule_clear", || async {
            sqlx::query("DELETE FROM word_replacements WHERE connection_id = ?")
                .bind(connection_id)
                .execute(pool)
                .await
        })
        .await?;
        Ok(result.rows_affected())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mappings
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn mapping_exists(&self, connection_id: i64, source_post_id: i64) -> Result<bool> {
        Ok(self.get_mapping(connection_id, source_post_id).await?.is_some())
    }

    /// Destination post id for a source post, if it was replicated.
    pub async fn get_mapping(&self, connection_id: i64, source_post_id: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT destination_message_id FROM transferred_posts \
             WHERE connection_id = ? AND source_message_id = ?",
        )
        .bind(connection_id)
        .bind(source_post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Record a mapping.
    ///
    /// Fails with [`MirrorError::DuplicateKey`] when the pair already exists.
    pub async fn put_mapping(&self, connection_id: i64, source_post_id: i64, destination_post_id: i64) -> Result<()> {
        let pool = &self.pool;
        let now = now_millis();
        let result = execute_with_retry("mapping_put", || async {
            sqlx::query(
                "INSERT INTO transferred_posts \
                 (connection_id, source_message_id, destination_message_id, transferred_at) VALUES (?, ?, ?, ?)",
            )
            .bind(connection_id)
            .bind(source_post_id)
            .bind(destination_post_id)
            .bind(now)
            .execute(pool)
            .await
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(MirrorError::DuplicateKey {
                connection_id,
                source_post_id,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_mappings(&self, connection_id: i64) -> Result<Vec<TransferRecord>> {
        let rows: Vec<(i64, i64, i64, i64)> = sqlx::query_as(
            "SELECT connection_id, source_message_id, destination_message_id, transferred_at \
             FROM transferred_posts WHERE connection_id = ? ORDER BY source_message_id",
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(connection_id, source_post_id, destination_post_id, transferred_at)| TransferRecord {
                connection_id,
                source_post_id,
                destination_post_id,
                transferred_at,
            })
            .collect())
    }

    /// (mapping count, scan cursor) for reporting.
    pub async fn count_and_latest(&self, connection_id: i64) -> Result<(i64, i64)> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM transferred_posts WHERE connection_id = ?")
                .bind(connection_id)
                .fetch_one(&self.pool)
                .await?;
        Ok((count, self.cursor(connection_id).await?))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit log
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn append_audit(&self, connection_id: i64, action: AuditAction, details: &str) -> Result<()> {
        let pool = &self.pool;
        let now = now_millis();
        execute_with_retry("audit_append", || async {
            sqlx::query(
                "INSERT INTO activity_logs (connection_id, action_type, details, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(connection_id)
            .bind(action.as_str())
            .bind(details)
            .bind(now)
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }

    /// Audit entries of one connection, newest first.
    pub async fn list_audit(&self, connection_id: i64, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows: Vec<(i64, i64, String, Option<String>, i64)> = sqlx::query_as(
            "SELECT id, connection_id, action_type, details, created_at FROM activity_logs \
             WHERE connection_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(connection_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, connection_id, action, details, created_at)| AuditEntry {
                id,
                connection_id,
                action,
                details: details.unwrap_or_default(),
                created_at,
            })
            .collect())
    }

    /// Most recent audit entries across all connections.
    pub async fn recent_audit(&self, limit: i64) -> Result<Vec<AuditView>> {
        let rows: Vec<(i64, i64, String, Option<String>, i64, String, String)> = sqlx::query_as(
            "SELECT a.id, a.connection_id, a.action_type, a.details, a.created_at, \
                    c.source_channel, c.destination_channel \
             FROM activity_logs a JOIN channel_connections c ON a.connection_id = c.id \
             ORDER BY a.id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, connection_id, action, details, created_at, source, destination)| AuditView {
                entry: AuditEntry {
                    id,
                    connection_id,
                    action,
                    details: details.unwrap_or_default(),
                    created_at,
                },
                source,
                destination,
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to main database (for clean shutdown).
    pub async fn checkpoint(&self) -> Result<()> {
        let pool = &self.pool;
        execute_with_retry("store_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
        })
        .await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint WAL and close the pool.
    pub async fn close(&self) {
        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Mirror store closed");
    }
}
