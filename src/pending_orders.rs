//! Orders still in fulfilment, shown as a warning when a shift is opened or
//! closed. The lookup never blocks the shift transition: any failure is
//! logged and reported as `None` ("no information"), which callers must not
//! read as "no pending orders".

use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::warn;

use crate::db::DbState;
use crate::error::PosResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrders {
    pub in_preparation: u32,
    pub ready_for_delivery: u32,
    pub dispatched: u32,
    pub total: u32,
}

impl PendingOrders {
    pub fn is_clear(&self) -> bool {
        self.total == 0
    }
}

/// Count the store's orders that are preparing, ready, or out for delivery.
pub fn get_pending_orders(db: &DbState, store_id: &str) -> Option<PendingOrders> {
    let result = db
        .lock()
        .and_then(|conn| count_pending(&conn, store_id));
    match result {
        Ok(pending) => Some(pending),
        Err(e) => {
            warn!(store_id = %store_id, error = %e, "Pending orders lookup failed");
            None
        }
    }
}

pub(crate) fn count_pending(conn: &Connection, store_id: &str) -> PosResult<PendingOrders> {
    let (in_preparation, ready_for_delivery, dispatched): (u32, u32, u32) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'preparing' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'ready' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'out_for_delivery' THEN 1 ELSE 0 END), 0)
         FROM sales
         WHERE store_id = ?1",
        params![store_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(PendingOrders {
        in_preparation,
        ready_for_delivery,
        dispatched,
        total: in_preparation + ready_for_delivery + dispatched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn seed(db: &DbState, id: &str, store: &str, status: &str) {
        db.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO sales (id, store_id, total_cents, status, created_at, updated_at)
                 VALUES (?1, ?2, 100, ?3, 'x', 'x')",
                params![id, store, status],
            )
            .unwrap();
    }

    #[test]
    fn test_counts_by_fulfilment_state() {
        let db = test_db();
        seed(&db, "a", "store-1", "preparing");
        seed(&db, "b", "store-1", "preparing");
        seed(&db, "c", "store-1", "ready");
        seed(&db, "d", "store-1", "out_for_delivery");
        seed(&db, "e", "store-1", "completed");
        seed(&db, "f", "store-1", "cancelled");
        seed(&db, "g", "store-2", "preparing");

        let pending = get_pending_orders(&db, "store-1").expect("lookup succeeds");
        assert_eq!(
            pending,
            PendingOrders {
                in_preparation: 2,
                ready_for_delivery: 1,
                dispatched: 1,
                total: 4,
            }
        );
        assert!(!pending.is_clear());
    }

    #[test]
    fn test_empty_store_is_clear_not_unavailable() {
        let db = test_db();
        let pending = get_pending_orders(&db, "store-1");
        assert_eq!(pending, Some(PendingOrders::default()));
        assert!(pending.unwrap().is_clear());
    }

    #[test]
    fn test_lookup_failure_degrades_to_none() {
        let db = test_db();
        db.conn
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE sale_payments; DROP TABLE sales;")
            .unwrap();
        assert_eq!(get_pending_orders(&db, "store-1"), None);
    }
}
