//! Cash shift lifecycle.
//!
//! A shift moves `NotStarted → Open → Closed`; `Closed` is terminal and a new
//! shift must be opened to resume operations. At most one shift may be open
//! per scope, where the scope is the store or the (store, cashier) pair
//! depending on [`ShiftScope`]. The check and the insert run inside one
//! `BEGIN IMMEDIATE` transaction; closing is a compare-and-set on
//! `status = 'open'`.
//!
//! Opening a shift claims unfinished orders (preparing / ready / out for
//! delivery) left on the store's closed shifts, so their fulfilment is
//! tracked on the new shift. Their payment stays on the drawer that took it:
//! `carried_from_shift_id` keeps the first shift and cash cuts use it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::cashcut;
use crate::config::{SettlementConfig, ShiftScope};
use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{Shift, ShiftStatus, TimeWindow};
use crate::money;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle phase of a shift slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftPhase {
    NotStarted,
    Open,
    Closed,
}

impl ShiftPhase {
    pub fn of(shift: Option<&Shift>) -> Self {
        match shift.map(|s| s.status) {
            None => ShiftPhase::NotStarted,
            Some(ShiftStatus::Open) => ShiftPhase::Open,
            Some(ShiftStatus::Closed) => ShiftPhase::Closed,
        }
    }

    pub fn can_transition_to(self, next: ShiftPhase) -> bool {
        matches!(
            (self, next),
            (ShiftPhase::NotStarted, ShiftPhase::Open) | (ShiftPhase::Open, ShiftPhase::Closed)
        )
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenShift {
    pub store_id: String,
    pub cashier_id: String,
    pub cashier_name: Option<String>,
    pub station: String,
    pub opening_cash: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloseShift {
    pub shift_id: String,
    pub closing_cash: Decimal,
    pub notes: Option<String>,
    pub closed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedShift {
    pub shift: Shift,
    /// Unfinished orders moved onto this shift from earlier closed shifts.
    pub carried_over_orders: usize,
}

// ---------------------------------------------------------------------------
// Open shift
// ---------------------------------------------------------------------------

/// Open a new shift.
///
/// Fails with `OpeningCashNegative` before touching the database, and with
/// `ShiftAlreadyOpen` if the scope already has an open shift.
pub fn open_shift(
    db: &DbState,
    config: &SettlementConfig,
    req: &OpenShift,
) -> PosResult<OpenedShift> {
    if req.opening_cash < Decimal::ZERO {
        return Err(PosError::OpeningCashNegative);
    }
    let store_id = req.store_id.trim();
    let cashier_id = req.cashier_id.trim();
    if store_id.is_empty() {
        return Err(PosError::InvalidInput("Missing storeId".into()));
    }
    if cashier_id.is_empty() {
        return Err(PosError::InvalidInput("Missing cashierId".into()));
    }

    let opening_cents = money::to_minor_units(req.opening_cash)?;

    let conn = db.lock()?;
    let now = db::now_ts();
    let shift = Shift {
        id: Uuid::new_v4().to_string(),
        store_id: store_id.to_string(),
        cashier_id: cashier_id.to_string(),
        cashier_name: clean_opt(req.cashier_name.as_deref()),
        station: req.station.trim().to_string(),
        opening_cash: money::round(req.opening_cash),
        opening_notes: clean_opt(req.notes.as_deref()),
        opened_at: now,
        status: ShiftStatus::Open,
        closing_cash: None,
        closing_notes: None,
        closed_by: None,
        closed_at: None,
        expected_cash: None,
        cash_variance: None,
    };

    let carried_over_orders = db::with_immediate_tx(&conn, |tx| {
        let scope_cashier = match config.shift_scope {
            ShiftScope::Store => None,
            ShiftScope::StoreCashier => Some(cashier_id),
        };
        if let Some(existing) = find_active(tx, store_id, scope_cashier)? {
            return Err(PosError::ShiftAlreadyOpen {
                shift_id: existing.id,
            });
        }

        let ts = db::format_ts(now);
        tx.execute(
            "INSERT INTO shifts (
                id, store_id, cashier_id, cashier_name, station,
                opening_cash_cents, opening_notes, opened_at, status,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'open', ?8, ?8)",
            params![
                shift.id,
                shift.store_id,
                shift.cashier_id,
                shift.cashier_name,
                shift.station,
                opening_cents,
                shift.opening_notes,
                ts,
            ],
        )?;

        claim_unfinished_orders(tx, &shift, scope_cashier, &ts)
    })?;

    if carried_over_orders > 0 {
        info!(
            shift_id = %shift.id,
            carried_over = carried_over_orders,
            "Carried unfinished orders onto new shift"
        );
    }
    info!(
        shift_id = %shift.id,
        store_id = %shift.store_id,
        cashier_id = %shift.cashier_id,
        opening_cash = %shift.opening_cash,
        "Shift opened"
    );

    Ok(OpenedShift {
        shift,
        carried_over_orders,
    })
}

/// Re-attach unfinished orders of the store's closed shifts to `shift`.
fn claim_unfinished_orders(
    conn: &Connection,
    shift: &Shift,
    scope_cashier: Option<&str>,
    now: &str,
) -> PosResult<usize> {
    let moved = conn.execute(
        "UPDATE sales SET
            carried_from_shift_id = COALESCE(carried_from_shift_id, shift_id),
            shift_id = ?1,
            updated_at = ?2
         WHERE store_id = ?3
           AND status IN ('preparing', 'ready', 'out_for_delivery')
           AND shift_id IN (
               SELECT id FROM shifts
               WHERE store_id = ?3
                 AND status = 'closed'
                 AND (?4 IS NULL OR cashier_id = ?4)
           )",
        params![shift.id, now, shift.store_id, scope_cashier],
    )?;
    Ok(moved)
}

// ---------------------------------------------------------------------------
// Close shift
// ---------------------------------------------------------------------------

/// Close an open shift with the counted drawer cash.
///
/// Expected cash is derived from the shift's own ledger at close time and
/// stored alongside the counted figure:
///   expected = opening + cash sales − cash expenses
///   variance = counted − expected
pub fn close_shift(db: &DbState, req: &CloseShift) -> PosResult<Shift> {
    if req.closing_cash < Decimal::ZERO {
        return Err(PosError::ClosingCashNegative);
    }
    let closing_cents = money::to_minor_units(req.closing_cash)?;

    let conn = db.lock()?;
    let now = db::now_ts();

    let closed = db::with_immediate_tx(&conn, |tx| {
        let shift = load_shift(tx, &req.shift_id)?
            .ok_or_else(|| PosError::ShiftNotFound(req.shift_id.clone()))?;
        if !ShiftPhase::of(Some(&shift)).can_transition_to(ShiftPhase::Closed) {
            return Err(PosError::ShiftAlreadyClosed(shift.id));
        }

        let closing_cash = money::round(req.closing_cash);
        let expected = cashcut::expected_cash_for_shift(tx, &shift, now)?;
        let variance = closing_cash - expected;
        let ts = db::format_ts(now);

        let updated = tx.execute(
            "UPDATE shifts SET
                status = 'closed',
                closing_cash_cents = ?1,
                closing_notes = ?2,
                closed_by = ?3,
                closed_at = ?4,
                expected_cash_cents = ?5,
                cash_variance_cents = ?6,
                updated_at = ?4
             WHERE id = ?7 AND status = 'open'",
            params![
                closing_cents,
                clean_opt(req.notes.as_deref()),
                clean_opt(req.closed_by.as_deref()),
                ts,
                money::to_minor_units(expected)?,
                money::to_minor_units(variance)?,
                shift.id,
            ],
        )?;
        if updated == 0 {
            return Err(PosError::ShiftAlreadyClosed(shift.id));
        }

        load_shift(tx, &shift.id)?.ok_or(PosError::ShiftNotFound(shift.id))
    })?;

    info!(
        shift_id = %closed.id,
        closing_cash = %closed.closing_cash.unwrap_or_default(),
        variance = %closed.cash_variance.unwrap_or_default(),
        "Shift closed"
    );

    Ok(closed)
}

// ---------------------------------------------------------------------------
// Shift queries
// ---------------------------------------------------------------------------

/// The open shift for a store, optionally narrowed to one cashier.
pub fn get_active_shift(
    db: &DbState,
    store_id: &str,
    cashier_id: Option<&str>,
) -> PosResult<Option<Shift>> {
    let conn = db.lock()?;
    find_active(&conn, store_id, cashier_id)
}

pub fn get_shift(db: &DbState, shift_id: &str) -> PosResult<Option<Shift>> {
    let conn = db.lock()?;
    load_shift(&conn, shift_id)
}

/// Shifts that opened inside `window`, oldest first.
pub fn list_shifts_opened_between(
    db: &DbState,
    window: &TimeWindow,
    store_id: Option<&str>,
) -> PosResult<Vec<Shift>> {
    let conn = db.lock()?;
    shifts_opened_between(&conn, window, store_id)
}

const SHIFT_COLUMNS: &str = "id, store_id, cashier_id, cashier_name, station,
    opening_cash_cents, opening_notes, opened_at, status, closing_cash_cents,
    closing_notes, closed_by, closed_at, expected_cash_cents, cash_variance_cents";

pub(crate) fn find_active(
    conn: &Connection,
    store_id: &str,
    cashier_id: Option<&str>,
) -> PosResult<Option<Shift>> {
    let sql = format!(
        "SELECT {SHIFT_COLUMNS} FROM shifts
         WHERE store_id = ?1 AND status = 'open' AND (?2 IS NULL OR cashier_id = ?2)
         ORDER BY opened_at DESC LIMIT 1"
    );
    conn.query_row(&sql, params![store_id, cashier_id], ShiftRow::read)
        .optional()?
        .map(Shift::try_from)
        .transpose()
}

pub(crate) fn load_shift(conn: &Connection, shift_id: &str) -> PosResult<Option<Shift>> {
    let sql = format!("SELECT {SHIFT_COLUMNS} FROM shifts WHERE id = ?1");
    conn.query_row(&sql, params![shift_id], ShiftRow::read)
        .optional()?
        .map(Shift::try_from)
        .transpose()
}

pub(crate) fn shifts_opened_between(
    conn: &Connection,
    window: &TimeWindow,
    store_id: Option<&str>,
) -> PosResult<Vec<Shift>> {
    let sql = format!(
        "SELECT {SHIFT_COLUMNS} FROM shifts
         WHERE opened_at >= ?1 AND opened_at <= ?2 AND (?3 IS NULL OR store_id = ?3)
         ORDER BY opened_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            db::format_ts(window.start),
            db::format_ts(window.end),
            store_id
        ],
        ShiftRow::read,
    )?;

    let mut shifts = Vec::new();
    for row in rows {
        shifts.push(Shift::try_from(row?)?);
    }
    Ok(shifts)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct ShiftRow {
    id: String,
    store_id: String,
    cashier_id: String,
    cashier_name: Option<String>,
    station: String,
    opening_cash_cents: i64,
    opening_notes: Option<String>,
    opened_at: String,
    status: String,
    closing_cash_cents: Option<i64>,
    closing_notes: Option<String>,
    closed_by: Option<String>,
    closed_at: Option<String>,
    expected_cash_cents: Option<i64>,
    cash_variance_cents: Option<i64>,
}

impl ShiftRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            store_id: row.get(1)?,
            cashier_id: row.get(2)?,
            cashier_name: row.get(3)?,
            station: row.get(4)?,
            opening_cash_cents: row.get(5)?,
            opening_notes: row.get(6)?,
            opened_at: row.get(7)?,
            status: row.get(8)?,
            closing_cash_cents: row.get(9)?,
            closing_notes: row.get(10)?,
            closed_by: row.get(11)?,
            closed_at: row.get(12)?,
            expected_cash_cents: row.get(13)?,
            cash_variance_cents: row.get(14)?,
        })
    }
}

impl TryFrom<ShiftRow> for Shift {
    type Error = PosError;

    fn try_from(row: ShiftRow) -> PosResult<Self> {
        let closed_at: Option<DateTime<Utc>> =
            row.closed_at.as_deref().map(db::parse_ts).transpose()?;
        Ok(Shift {
            id: row.id,
            store_id: row.store_id,
            cashier_id: row.cashier_id,
            cashier_name: row.cashier_name,
            station: row.station,
            opening_cash: money::from_minor_units(row.opening_cash_cents),
            opening_notes: row.opening_notes,
            opened_at: db::parse_ts(&row.opened_at)?,
            status: row.status.parse()?,
            closing_cash: row.closing_cash_cents.map(money::from_minor_units),
            closing_notes: row.closing_notes,
            closed_by: row.closed_by,
            closed_at,
            expected_cash: row.expected_cash_cents.map(money::from_minor_units),
            cash_variance: row.cash_variance_cents.map(money::from_minor_units),
        })
    }
}

fn clean_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ===========================================================================
// Tests
// ===========================================================================
