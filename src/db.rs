//! Local SQLite database layer.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings helpers,
//! timestamp encoding, and the shared connection state used by every module.
//!
//! Amount columns are integer cents (`*_cents`); timestamps are RFC 3339 UTC
//! strings with millisecond precision so that text comparison orders them.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info};

use crate::error::{PosError, PosResult};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection. A poisoned lock is a storage error.
    pub fn lock(&self) -> PosResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PosError::Storage(format!("database lock poisoned: {e}")))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 4;

/// Initialize the database at `{data_dir}/cashcut.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. An open failure is returned as
/// `Storage`; the existing files are left in place.
pub fn init(data_dir: &Path) -> PosResult<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| PosError::Storage(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join("cashcut.db");
    info!("Opening database at {}", db_path.display());

    let conn = open_and_configure(&db_path).map_err(|e| {
        error!(path = %db_path.display(), error = %e, "Database open failed");
        PosError::Storage(format!("Database open failed: {e}"))
    })?;

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open a migrated in-memory database (tooling and tests).
pub fn open_in_memory() -> PosResult<DbState> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> PosResult<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| PosError::Storage(format!("pragma setup: {e}")))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| PosError::Storage(format!("create schema_version: {e}")))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }
    if current < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

fn migration_error(version: i32, e: rusqlite::Error) -> PosError {
    error!("Migration v{version} failed: {e}");
    PosError::Storage(format!("migration v{version}: {e}"))
}

/// Migration v1: settings and shifts.
fn migrate_v1(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- shifts (cash drawer shifts)
        CREATE TABLE IF NOT EXISTS shifts (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            cashier_id TEXT NOT NULL,
            cashier_name TEXT,
            station TEXT NOT NULL DEFAULT '',
            opening_cash_cents INTEGER NOT NULL DEFAULT 0 CHECK (opening_cash_cents >= 0),
            opening_notes TEXT,
            opened_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open' CHECK (status IN ('open', 'closed')),
            closing_cash_cents INTEGER CHECK (closing_cash_cents IS NULL OR closing_cash_cents >= 0),
            closing_notes TEXT,
            closed_by TEXT,
            closed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_shifts_store_status ON shifts(store_id, status);
        CREATE INDEX IF NOT EXISTS idx_shifts_opened_at ON shifts(opened_at);
        -- Holds under both scope policies; the per-store rule is checked in the open transaction.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_shifts_one_open_per_cashier
            ON shifts(store_id, cashier_id) WHERE status = 'open';
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key
            ON local_settings(setting_category, setting_key);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| migration_error(1, e))?;

    info!("Applied migration v1 (settings + shifts)");
    Ok(())
}

/// Migration v2: sales and their payment lines.
fn migrate_v2(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            shift_id TEXT,
            cashier_id TEXT,
            items TEXT NOT NULL DEFAULT '[]',
            subtotal_cents INTEGER NOT NULL DEFAULT 0,
            discount_cents INTEGER NOT NULL DEFAULT 0,
            tip_cents INTEGER NOT NULL DEFAULT 0,
            total_cents INTEGER NOT NULL,
            service_type TEXT NOT NULL DEFAULT 'counter'
                CHECK (service_type IN ('counter', 'pickup', 'delivery')),
            status TEXT NOT NULL DEFAULT 'completed'
                CHECK (status IN ('preparing', 'ready', 'out_for_delivery', 'completed', 'cancelled')),
            settlement_kind TEXT NOT NULL DEFAULT 'single'
                CHECK (settlement_kind IN ('single', 'mixed')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(shift_id) REFERENCES shifts(id) ON DELETE SET NULL
        );

        -- sale_payments (one row per settlement line, in entry order)
        CREATE TABLE IF NOT EXISTS sale_payments (
            id TEXT PRIMARY KEY,
            sale_id TEXT NOT NULL,
            line_index INTEGER NOT NULL,
            method TEXT NOT NULL CHECK (method IN ('cash', 'transfer', 'card')),
            amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
            received_cents INTEGER,
            reference TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(sale_id, line_index),
            FOREIGN KEY(sale_id) REFERENCES sales(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_sales_store_created ON sales(store_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_sales_shift_id ON sales(shift_id);
        CREATE INDEX IF NOT EXISTS idx_sales_status ON sales(status);
        CREATE INDEX IF NOT EXISTS idx_sale_payments_sale_id ON sale_payments(sale_id);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| migration_error(2, e))?;

    info!("Applied migration v2 (sales + sale_payments)");
    Ok(())
}

/// Migration v3: expenses and returns.
fn migrate_v3(conn: &Connection) -> PosResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            shift_id TEXT,
            method TEXT NOT NULL CHECK (method IN ('cash', 'transfer', 'card')),
            amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
            description TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(shift_id) REFERENCES shifts(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS sale_returns (
            id TEXT PRIMARY KEY,
            store_id TEXT NOT NULL,
            shift_id TEXT,
            sale_id TEXT,
            method TEXT NOT NULL CHECK (method IN ('cash', 'transfer', 'card')),
            amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
            reason TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            FOREIGN KEY(shift_id) REFERENCES shifts(id) ON DELETE SET NULL,
            FOREIGN KEY(sale_id) REFERENCES sales(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_expenses_store_created ON expenses(store_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_sale_returns_store_created ON sale_returns(store_id, created_at);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| migration_error(3, e))?;

    info!("Applied migration v3 (expenses + sale_returns)");
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> PosResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migration v4: close-time reconciliation and order carry-over.
///
/// Adds:
/// - `shifts.expected_cash_cents` / `shifts.cash_variance_cents`
/// - `sales.carried_from_shift_id` for unfinished orders moved to a new shift
fn migrate_v4(conn: &Connection) -> PosResult<()> {
    if !column_exists(conn, "shifts", "expected_cash_cents")? {
        conn.execute_batch("ALTER TABLE shifts ADD COLUMN expected_cash_cents INTEGER;")
            .map_err(|e| migration_error(4, e))?;
    }
    if !column_exists(conn, "shifts", "cash_variance_cents")? {
        conn.execute_batch("ALTER TABLE shifts ADD COLUMN cash_variance_cents INTEGER;")
            .map_err(|e| migration_error(4, e))?;
    }
    if !column_exists(conn, "sales", "carried_from_shift_id")? {
        conn.execute_batch("ALTER TABLE sales ADD COLUMN carried_from_shift_id TEXT;")
            .map_err(|e| migration_error(4, e))?;
    }

    conn.execute_batch(
        "
        INSERT INTO schema_version (version) VALUES (4);
        ",
    )
    .map_err(|e| migration_error(4, e))?;

    info!("Applied migration v4 (close reconciliation + carry-over)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Run `f` inside `BEGIN IMMEDIATE … COMMIT`, rolling back on any error.
///
/// `IMMEDIATE` takes the write lock up front, so a check-then-write inside
/// `f` cannot interleave with another writer.
pub fn with_immediate_tx<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> PosResult<T>,
) -> PosResult<T> {
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| PosError::Storage(format!("begin transaction: {e}")))?;

    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| PosError::Storage(format!("commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Encode a timestamp for storage (fixed width, so text order is time order).
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The current time at storage precision.
pub fn now_ts() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn parse_ts(raw: &str) -> PosResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PosError::Storage(format!("invalid timestamp '{raw}': {e}")))
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> PosResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rusqlite::Connection;

    /// Open an in-memory database and apply pragmas (mirrors open_and_configure).
    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        conn
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_v1_to_latest() {
        let conn = test_db();
        run_migrations(&conn).expect("run_migrations should succeed");

        let tables = table_names(&conn);
        for expected in [
            "local_settings",
            "shifts",
            "sales",
            "sale_payments",
            "expenses",
            "sale_returns",
        ] {
            assert!(
                tables.contains(&expected.to_string()),
                "missing {expected}"
            );
        }
        assert!(column_exists(&conn, "shifts", "expected_cash_cents").unwrap());
        assert!(column_exists(&conn, "sales", "carried_from_shift_id").unwrap());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run should succeed");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("read schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_one_open_shift_per_cashier_index() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let insert = "INSERT INTO shifts (id, store_id, cashier_id, opened_at, status, created_at, updated_at)
                      VALUES (?1, 'store-1', 'cashier-1', '2026-03-01T09:00:00.000Z', ?2,
                              '2026-03-01T09:00:00.000Z', '2026-03-01T09:00:00.000Z')";
        conn.execute(insert, params!["s-1", "open"]).expect("first open");
        assert!(
            conn.execute(insert, params!["s-2", "open"]).is_err(),
            "second open shift for the same cashier should be rejected"
        );
        conn.execute(insert, params!["s-3", "closed"])
            .expect("closed shifts are not constrained");
    }

    #[test]
    fn test_negative_opening_cash_rejected_by_schema() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");
        let result = conn.execute(
            "INSERT INTO shifts (id, store_id, cashier_id, opening_cash_cents, opened_at, created_at, updated_at)
             VALUES ('s-neg', 'store-1', 'c', -100, 'x', 'x', 'x')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamp_text_order_matches_time_order() {
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        let (a, b) = (format_ts(early), format_ts(late));
        assert_eq!(a, "2026-03-01T09:00:00.000Z");
        assert!(a < b);
        assert_eq!(parse_ts(&b).unwrap(), late);
        assert!(parse_ts("yesterday").is_err());
    }

    #[test]
    fn test_immediate_tx_rolls_back_on_error() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let result: PosResult<()> = with_immediate_tx(&conn, |tx| {
            set_setting(tx, "settlement", "currency", "EUR")?;
            Err(PosError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(get_setting(&conn, "settlement", "currency"), None);

        with_immediate_tx(&conn, |tx| set_setting(tx, "settlement", "currency", "EUR"))
            .expect("commit");
        assert_eq!(
            get_setting(&conn, "settlement", "currency").as_deref(),
            Some("EUR")
        );
    }

    #[test]
    fn test_settings_crud() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        assert_eq!(get_setting(&conn, "settlement", "shift_scope"), None);
        set_setting(&conn, "settlement", "shift_scope", "store").unwrap();
        set_setting(&conn, "settlement", "shift_scope", "store_cashier").unwrap();
        assert_eq!(
            get_setting(&conn, "settlement", "shift_scope").as_deref(),
            Some("store_cashier")
        );
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pos-cashcut-{name}-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_init_reopens_existing_ledger() {
        let dir = scratch_dir("db-reopen");
        {
            let state = init(&dir).expect("first open");
            let conn = state.lock().unwrap();
            set_setting(&conn, "settlement", "currency", "MXN").unwrap();
        }
        let state = init(&dir).expect("second open");
        assert_eq!(
            get_setting(&state.lock().unwrap(), "settlement", "currency").as_deref(),
            Some("MXN")
        );
        drop(state);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_init_failure_keeps_database_file() {
        let dir = scratch_dir("db-unreadable");
        fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("cashcut.db");
        let garbage = b"not a sqlite database ".repeat(200);
        fs::write(&db_path, &garbage).unwrap();

        match init(&dir) {
            Err(PosError::Storage(msg)) => assert!(msg.contains("Database open failed"), "{msg}"),
            other => panic!("expected Storage error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(fs::read(&db_path).unwrap(), garbage);
        fs::remove_dir_all(&dir).ok();
    }
}
