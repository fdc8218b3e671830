//! Sale entry and fulfilment status.
//!
//! `submit_sale` validates the settlement before anything is written, then
//! stores the sale and its payment lines in one transaction. A single
//! settlement is stored as one `sale_payments` row; a mixed settlement keeps
//! one row per line in entry order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{
    OrderStatus, PaymentLine, PaymentMethod, Sale, SaleItem, ServiceType, Settlement, TimeWindow,
};
use crate::money::{self, Discount, MONEY_TOLERANCE};
use crate::payments;
use crate::shifts;

#[derive(Debug, Clone)]
pub struct SubmitSale {
    pub store_id: String,
    pub shift_id: Option<String>,
    pub cashier_id: Option<String>,
    pub items: Vec<SaleItem>,
    pub total: Decimal,
    pub discount: Option<Discount>,
    pub tip: Decimal,
    pub settlement: Settlement,
    pub service_type: ServiceType,
    /// Initial fulfilment status; counter sales default to completed.
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedSale {
    pub sale_id: String,
    pub change: Decimal,
    pub status: OrderStatus,
}

/// Validate and record a sale.
///
/// Settlement errors (`AmountMismatch`, `InsufficientCashLine`,
/// `NoPaymentLines`, ...) are raised before the database is touched.
pub fn submit_sale(db: &DbState, req: &SubmitSale) -> PosResult<SubmittedSale> {
    let store_id = req.store_id.trim();
    if store_id.is_empty() {
        return Err(PosError::InvalidInput("Missing storeId".into()));
    }
    if req.total < Decimal::ZERO {
        return Err(PosError::InvalidInput("total cannot be negative".into()));
    }
    if req.tip < Decimal::ZERO {
        return Err(PosError::InvalidInput("tip cannot be negative".into()));
    }
    let status = req.status.unwrap_or(OrderStatus::Completed);
    if status == OrderStatus::Cancelled {
        return Err(PosError::InvalidInput(
            "a sale cannot be submitted as cancelled".into(),
        ));
    }

    let total = money::round(req.total);
    let tip = money::round(req.tip);
    let (subtotal, discount_amount) = price_items(&req.items, req.discount.as_ref(), tip, total)?;
    let summary = payments::settle(total, &req.settlement)?;
    let total_cents = money::to_minor_units(total)?;
    let subtotal_cents = money::to_minor_units(subtotal)?;
    let discount_cents = money::to_minor_units(discount_amount)?;
    let tip_cents = money::to_minor_units(tip)?;

    let conn = db.lock()?;
    let now = db::now_ts();
    let sale_id = Uuid::new_v4().to_string();
    let items_json = serde_json::to_string(&req.items)
        .map_err(|e| PosError::InvalidInput(format!("items: {e}")))?;

    db::with_immediate_tx(&conn, |tx| {
        if let Some(shift_id) = req.shift_id.as_deref() {
            let shift = shifts::load_shift(tx, shift_id)?
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
        }

        let ts = db::format_ts(now);
        let kind = match summary.settlement {
            Settlement::Single { .. } => "single",
            Settlement::Mixed { .. } => "mixed",
        };
        tx.execute(
            "INSERT INTO sales (
                id, store_id, shift_id, cashier_id, items,
                subtotal_cents, discount_cents, tip_cents, total_cents,
                service_type, status, settlement_kind, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                sale_id,
                store_id,
                req.shift_id,
                req.cashier_id,
                items_json,
                subtotal_cents,
                discount_cents,
                tip_cents,
                total_cents,
                req.service_type.as_str(),
                status.as_str(),
                kind,
                ts,
            ],
        )?;

        for (index, line) in summary.settlement.lines().iter().enumerate() {
            tx.execute(
                "INSERT INTO sale_payments (
                    id, sale_id, line_index, method, amount_cents,
                    received_cents, reference, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    Uuid::new_v4().to_string(),
                    sale_id,
                    index as i64,
                    line.method.as_str(),
                    money::to_minor_units(line.amount)?,
                    line.received_amount.map(money::to_minor_units).transpose()?,
                    line.reference,
                    ts,
                ],
            )?;
        }
        Ok(())
    })?;

    info!(
        sale_id = %sale_id,
        store_id = %store_id,
        total = %total,
        lines = summary.settlement.line_count(),
        "Sale recorded"
    );

    Ok(SubmittedSale {
        sale_id,
        change: summary.change,
        status,
    })
}

/// Subtotal and discount for the sale, checked against the declared total.
///
/// Without items the declared total stands on its own and cannot carry a
/// discount.
fn price_items(
    items: &[SaleItem],
    discount: Option<&Discount>,
    tip: Decimal,
    total: Decimal,
) -> PosResult<(Decimal, Decimal)> {
    if items.is_empty() {
        if discount.is_some() {
            return Err(PosError::InvalidInput(
                "a discount needs the sale items".into(),
            ));
        }
        return Ok((money::non_negative(total - tip), Decimal::ZERO));
    }
    if let Some(bad) = items.iter().find(|i| i.quantity == 0 || i.unit_price < Decimal::ZERO) {
        return Err(PosError::InvalidInput(format!(
            "item '{}' needs a positive quantity and a non-negative price",
            bad.name
        )));
    }

    let subtotal = money::round(items.iter().map(SaleItem::line_total).sum());
    let discount_amount = discount
        .map(|d| d.amount_for(subtotal))
        .unwrap_or(Decimal::ZERO);
    let expected = subtotal - discount_amount + tip;
    if (expected - total).abs() > MONEY_TOLERANCE {
        return Err(PosError::InvalidInput(format!(
            "total {total} does not match items ({expected})"
        )));
    }
    Ok((subtotal, discount_amount))
}

/// Move an order through fulfilment.
///
/// Cancelled and completed orders are final.
pub fn update_order_status(db: &DbState, sale_id: &str, status: OrderStatus) -> PosResult<()> {
    let conn = db.lock()?;
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM sales WHERE id = ?1",
            params![sale_id],
            |row| row.get(0),
        )
        .optional()?;
    let current: OrderStatus = current
        .ok_or_else(|| PosError::SaleNotFound(sale_id.to_string()))?
        .parse()?;

    if current == status {
        return Ok(());
    }
    if !current.is_in_fulfillment() {
        return Err(PosError::InvalidInput(format!(
            "order {sale_id} is already {}",
            current.as_str()
        )));
    }

    conn.execute(
        "UPDATE sales SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), db::format_ts(db::now_ts()), sale_id],
    )?;
    info!(sale_id = %sale_id, from = current.as_str(), to = status.as_str(), "Order status updated");
    Ok(())
}

pub fn get_sale(db: &DbState, sale_id: &str) -> PosResult<Sale> {
    let conn = db.lock()?;
    let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![sale_id], SaleRow::read)
        .optional()?
        .ok_or_else(|| PosError::SaleNotFound(sale_id.to_string()))?;
    let mut lines = load_payment_lines(&conn, &[row.id.clone()])?;
    row.into_sale(lines.remove(sale_id).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Aggregation input
// ---------------------------------------------------------------------------

const SALE_COLUMNS: &str = "id, store_id, shift_id, cashier_id, items,
    subtotal_cents, discount_cents, tip_cents, total_cents,
    service_type, status, settlement_kind, created_at";

/// Non-cancelled sales created inside `window`, optionally for one store.
///
/// With `shift_id`, only sales settled in that shift's drawer are kept, plus
/// sales without a shift link. A carried-over sale belongs to the drawer it
/// was first paid into. Rows that cannot be decoded are skipped with a warning.
pub(crate) fn load_sales_in_window(
    conn: &Connection,
    window: &TimeWindow,
    store_id: Option<&str>,
    shift_id: Option<&str>,
) -> PosResult<Vec<Sale>> {
    let sql = format!(
        "SELECT {SALE_COLUMNS} FROM sales
         WHERE created_at >= ?1 AND created_at <= ?2
           AND status != 'cancelled'
           AND (?3 IS NULL OR store_id = ?3)
           AND (?4 IS NULL
                OR COALESCE(carried_from_shift_id, shift_id) = ?4
                OR shift_id IS NULL)
         ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![
                db::format_ts(window.start),
                db::format_ts(window.end),
                store_id,
                shift_id
            ],
            SaleRow::read,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut lines = load_payment_lines(conn, &ids)?;

    let mut sales = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id.clone();
        match row.into_sale(lines.remove(&id).unwrap_or_default()) {
            Ok(sale) => sales.push(sale),
            Err(e) => warn!(sale_id = %id, error = %e, "Skipping unreadable sale"),
        }
    }
    Ok(sales)
}

fn load_payment_lines(
    conn: &Connection,
    sale_ids: &[String],
) -> PosResult<HashMap<String, Vec<PaymentLine>>> {
    let mut out: HashMap<String, Vec<PaymentLine>> = HashMap::new();
    if sale_ids.is_empty() {
        return Ok(out);
    }

    let mut stmt = conn.prepare(
        "SELECT method, amount_cents, received_cents, reference
         FROM sale_payments WHERE sale_id = ?1 ORDER BY line_index ASC",
    )?;
    for sale_id in sale_ids {
        let rows = stmt.query_map(params![sale_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        let mut lines = Vec::new();
        for row in rows {
            let (method, amount, received, reference) = row?;
            let method: PaymentMethod = match method.parse() {
                Ok(m) => m,
                Err(_) => {
                    warn!(sale_id = %sale_id, method = %method, "Unknown payment method on sale");
                    continue;
                }
            };
            lines.push(PaymentLine {
                method,
                amount: money::from_minor_units(amount),
                received_amount: received.map(money::from_minor_units),
                reference,
            });
        }
        out.insert(sale_id.clone(), lines);
    }
    Ok(out)
}

struct SaleRow {
    id: String,
    store_id: String,
    shift_id: Option<String>,
    cashier_id: Option<String>,
    items: String,
    subtotal_cents: i64,
    discount_cents: i64,
    tip_cents: i64,
    total_cents: i64,
    service_type: String,
    status: String,
    settlement_kind: String,
    created_at: String,
}

impl SaleRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            store_id: row.get(1)?,
            shift_id: row.get(2)?,
            cashier_id: row.get(3)?,
            items: row.get(4)?,
            subtotal_cents: row.get(5)?,
            discount_cents: row.get(6)?,
            tip_cents: row.get(7)?,
            total_cents: row.get(8)?,
            service_type: row.get(9)?,
            status: row.get(10)?,
            settlement_kind: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_sale(self, lines: Vec<PaymentLine>) -> PosResult<Sale> {
        let settlement = match (self.settlement_kind.as_str(), lines.len()) {
            (_, 0) => {
                return Err(PosError::Storage(format!(
                    "sale {} has no payment lines",
                    self.id
                )))
            }
            ("single", 1) => {
                let line = &lines[0];
                Settlement::Single {
                    method: line.method,
                    amount: line.amount,
                    received_amount: line.received_amount,
                }
            }
            _ => Settlement::Mixed { lines },
        };

        let items: Vec<SaleItem> = serde_json::from_str(&self.items).unwrap_or_else(|e| {
            warn!(sale_id = %self.id, error = %e, "Unreadable sale items");
            Vec::new()
        });
        let created_at: DateTime<Utc> = db::parse_ts(&self.created_at)?;

        Ok(Sale {
            id: self.id,
            store_id: self.store_id,
            shift_id: self.shift_id,
            cashier_id: self.cashier_id,
            items,
            subtotal: money::from_minor_units(self.subtotal_cents),
            discount_amount: money::from_minor_units(self.discount_cents),
            tip_amount: money::from_minor_units(self.tip_cents),
            total: money::from_minor_units(self.total_cents),
            service_type: self.service_type.parse()?,
            status: self.status.parse()?,
            settlement,
            created_at,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
