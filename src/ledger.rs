//! Cash-flow records outside of sales: expenses paid from the drawer and
//! refunds on returned sales.

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{Expense, PaymentMethod, SaleReturn, TimeWindow};
use crate::money;
use crate::shifts;

#[derive(Debug, Clone)]
pub struct RecordExpense {
    pub store_id: String,
    pub shift_id: Option<String>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct RecordReturn {
    pub store_id: String,
    pub shift_id: Option<String>,
    pub sale_id: Option<String>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub reason: String,
}

pub fn record_expense(db: &DbState, req: &RecordExpense) -> PosResult<Expense> {
    let amount = positive_amount(req.amount, "expense")?;
    let description = req.description.trim();
    if description.is_empty() {
        return Err(PosError::InvalidInput("Missing expense description".into()));
    }
    let store_id = required_store(&req.store_id)?;

    let conn = db.lock()?;
    check_shift(&conn, req.shift_id.as_deref(), store_id)?;

    let expense = Expense {
        id: Uuid::new_v4().to_string(),
        store_id: store_id.to_string(),
        shift_id: req.shift_id.clone(),
        method: req.method,
        amount,
        description: description.to_string(),
        created_at: db::now_ts(),
    };
    conn.execute(
        "INSERT INTO expenses (id, store_id, shift_id, method, amount_cents, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            expense.id,
            expense.store_id,
            expense.shift_id,
            expense.method.as_str(),
            money::to_minor_units(expense.amount)?,
            expense.description,
            db::format_ts(expense.created_at),
        ],
    )?;

    info!(
        expense_id = %expense.id,
        method = expense.method.as_str(),
        amount = %expense.amount,
        "Expense recorded"
    );
    Ok(expense)
}

pub fn record_return(db: &DbState, req: &RecordReturn) -> PosResult<SaleReturn> {
    let amount = positive_amount(req.amount, "refund")?;
    let store_id = required_store(&req.store_id)?;

    let conn = db.lock()?;
    check_shift(&conn, req.shift_id.as_deref(), store_id)?;

    if let Some(sale_id) = req.sale_id.as_deref() {
        let sale_total: Option<i64> = conn
            .query_row(
                "SELECT total_cents FROM sales WHERE id = ?1",
                params![sale_id],
                |row| row.get(0),
            )
            .optional()?;
        let sale_total = sale_total
            .map(money::from_minor_units)
            .ok_or_else(|| PosError::SaleNotFound(sale_id.to_string()))?;
        let refunded: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM sale_returns WHERE sale_id = ?1",
            params![sale_id],
            |row| row.get(0),
        )?;
        let refundable = sale_total - money::from_minor_units(refunded);
        if amount > refundable {
            return Err(PosError::InvalidInput(format!(
                "refund {amount} exceeds the refundable balance {refundable} of sale {sale_id}"
            )));
        }
    }

    let sale_return = SaleReturn {
        id: Uuid::new_v4().to_string(),
        store_id: store_id.to_string(),
        shift_id: req.shift_id.clone(),
        sale_id: req.sale_id.clone(),
        method: req.method,
        amount,
        reason: req.reason.trim().to_string(),
        created_at: db::now_ts(),
    };
    conn.execute(
        "INSERT INTO sale_returns (id, store_id, shift_id, sale_id, method, amount_cents, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            sale_return.id,
            sale_return.store_id,
            sale_return.shift_id,
            sale_return.sale_id,
            sale_return.method.as_str(),
            money::to_minor_units(sale_return.amount)?,
            sale_return.reason,
            db::format_ts(sale_return.created_at),
        ],
    )?;

    info!(
        return_id = %sale_return.id,
        sale_id = ?sale_return.sale_id,
        amount = %sale_return.amount,
        "Return recorded"
    );
    Ok(sale_return)
}

fn positive_amount(amount: Decimal, what: &str) -> PosResult<Decimal> {
    let amount = money::round(amount);
    if amount <= Decimal::ZERO {
        return Err(PosError::InvalidInput(format!(
            "{what} amount must be positive"
        )));
    }
    Ok(amount)
}

fn required_store(store_id: &str) -> PosResult<&str> {
    let store_id = store_id.trim();
    if store_id.is_empty() {
        return Err(PosError::InvalidInput("Missing storeId".into()));
    }
    Ok(store_id)
}

/// Cash movements may only be booked against an open shift of the same store.
fn check_shift(conn: &Connection, shift_id: Option<&str>, store_id: &str) -> PosResult<()> {
    let Some(shift_id) = shift_id else {
        return Ok(());
    };
    let shift = shifts::load_shift(conn, shift_id)?
        .ok_or_else(|| PosError::ShiftNotFound(shift_id.to_string()))?;
    if !shift.is_open() {
        return Err(PosError::ShiftAlreadyClosed(shift.id));
    }
    if shift.store_id != store_id {
        return Err(PosError::InvalidInput(format!(
            "shift {} belongs to store {}",
            shift.id, shift.store_id
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Aggregation input
// ---------------------------------------------------------------------------

pub(crate) fn load_expenses_in_window(
    conn: &Connection,
    window: &TimeWindow,
    store_id: Option<&str>,
    shift_id: Option<&str>,
) -> PosResult<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_id, shift_id, method, amount_cents, description, created_at
         FROM expenses
         WHERE created_at >= ?1 AND created_at <= ?2 AND (?3 IS NULL OR store_id = ?3)
           AND (?4 IS NULL OR shift_id = ?4 OR shift_id IS NULL)
         ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(
        params![
            db::format_ts(window.start),
            db::format_ts(window.end),
            store_id,
            shift_id
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        },
    )?;

    let mut expenses = Vec::new();
    for row in rows {
        let (id, store_id, shift_id, method, amount, description, created_at) = row?;
        let decoded = method
            .parse::<PaymentMethod>()
            .and_then(|method| Ok((method, db::parse_ts(&created_at)?)));
        match decoded {
            Ok((method, created_at)) => expenses.push(Expense {
                id,
                store_id,
                shift_id,
                method,
                amount: money::from_minor_units(amount),
                description,
                created_at,
            }),
            Err(e) => warn!(expense_id = %id, error = %e, "Skipping unreadable expense"),
        }
    }
    Ok(expenses)
}

pub(crate) fn load_returns_in_window(
    conn: &Connection,
    window: &TimeWindow,
    store_id: Option<&str>,
    shift_id: Option<&str>,
) -> PosResult<Vec<SaleReturn>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_id, shift_id, sale_id, method, amount_cents, reason, created_at
         FROM sale_returns
         WHERE created_at >= ?1 AND created_at <= ?2 AND (?3 IS NULL OR store_id = ?3)
           AND (?4 IS NULL OR shift_id = ?4 OR shift_id IS NULL)
         ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(
        params![
            db::format_ts(window.start),
            db::format_ts(window.end),
            store_id,
            shift_id
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        },
    )?;

    let mut returns = Vec::new();
    for row in rows {
        let (id, store_id, shift_id, sale_id, method, amount, reason, created_at) = row?;
        let decoded = method
            .parse::<PaymentMethod>()
            .and_then(|method| Ok((method, db::parse_ts(&created_at)?)));
        match decoded {
            Ok((method, created_at)) => returns.push(SaleReturn {
                id,
                store_id,
                shift_id,
                sale_id,
                method,
                amount: money::from_minor_units(amount),
                reason,
                created_at,
            }),
            Err(e) => warn!(return_id = %id, error = %e, "Skipping unreadable return"),
        }
    }
    Ok(returns)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentLine, ServiceType, Settlement};
    use crate::sales::{submit_sale, SubmitSale};
    use chrono::Duration;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn d(s: &str) -> Decimal {
        s.parse().expect("valid decimal literal")
    }

    fn around_now() -> TimeWindow {
        let now = db::now_ts();
        TimeWindow::new(now - Duration::minutes(5), now + Duration::minutes(5)).unwrap()
    }

    fn expense(amount: &str, description: &str) -> RecordExpense {
        RecordExpense {
            store_id: "store-1".into(),
            shift_id: None,
            method: PaymentMethod::Cash,
            amount: d(amount),
            description: description.into(),
        }
    }

    fn refund(sale_id: Option<&str>, amount: &str) -> RecordReturn {
        RecordReturn {
            store_id: "store-1".into(),
            shift_id: None,
            sale_id: sale_id.map(String::from),
            method: PaymentMethod::Cash,
            amount: d(amount),
            reason: "cold food".into(),
        }
    }

    #[test]
    fn test_record_expense_and_load() {
        let db = test_db();
        let recorded = record_expense(&db, &expense("150", " Gas ")).unwrap();
        assert_eq!(recorded.description, "Gas");

        let conn = db.conn.lock().unwrap();
        let loaded = load_expenses_in_window(&conn, &around_now(), Some("store-1"), None).unwrap();
        assert_eq!(loaded, vec![recorded]);
        assert!(load_expenses_in_window(&conn, &around_now(), Some("store-2"), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_expense_validation() {
        let db = test_db();
        assert!(matches!(
            record_expense(&db, &expense("0", "Gas")),
            Err(PosError::InvalidInput(_))
        ));
        assert!(matches!(
            record_expense(&db, &expense("10", "  ")),
            Err(PosError::InvalidInput(_))
        ));
        let mut on_missing_shift = expense("10", "Gas");
        on_missing_shift.shift_id = Some("ghost".into());
        assert!(matches!(
            record_expense(&db, &on_missing_shift),
            Err(PosError::ShiftNotFound(_))
        ));
    }

    #[test]
    fn test_refunds_cannot_exceed_sale_total() {
        let db = test_db();
        let sale = submit_sale(
            &db,
            &SubmitSale {
                store_id: "store-1".into(),
                shift_id: None,
                cashier_id: None,
                items: Vec::new(),
                total: d("100"),
                discount: None,
                tip: Decimal::ZERO,
                settlement: Settlement::Mixed {
                    lines: vec![
                        PaymentLine::new(PaymentMethod::Cash, d("40")),
                        PaymentLine::new(PaymentMethod::Transfer, d("60")),
                    ],
                },
                service_type: ServiceType::Pickup,
                status: None,
            },
        )
        .unwrap();

        record_return(&db, &refund(Some(&sale.sale_id), "60")).unwrap();
        assert!(matches!(
            record_return(&db, &refund(Some(&sale.sale_id), "40.01")),
            Err(PosError::InvalidInput(_))
        ));
        record_return(&db, &refund(Some(&sale.sale_id), "40")).unwrap();
        assert!(matches!(
            record_return(&db, &refund(Some("missing"), "1")),
            Err(PosError::SaleNotFound(_))
        ));

        let conn = db.conn.lock().unwrap();
        let returns = load_returns_in_window(&conn, &around_now(), None, None).unwrap();
        assert_eq!(returns.len(), 2);
        assert_eq!(returns[0].reason, "cold food");
    }
}
