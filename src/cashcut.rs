//! Cash-cut report aggregation.
//!
//! [`aggregate`] is a pure fold over already-fetched sales, expenses and
//! returns; [`compute_cash_cut`] resolves the scope, fetches the records
//! and hands them over. Reports are computed on demand and never stored.
//!
//! Per-method totals: each payment line of a mixed settlement lands in its
//! own method bucket, so the method buckets add up to the sales total. A
//! mixed sale still counts once in the mixed-payment statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::ledger;
use crate::models::{
    Expense, PaymentMethod, Sale, SaleReturn, ServiceType, Shift, ShiftStatus, TimeWindow,
};
use crate::money;
use crate::sales;
use crate::shifts;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CashCutScope {
    /// Everything in a time window; both bounds are required.
    Period {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// One shift, over its own open/close timestamps.
    Shift { shift_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashCutRequest {
    pub scope: CashCutScope,
    /// Ignored for shift scope, which always uses the shift's store.
    pub store_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashCutReport {
    pub period: TimeWindow,
    pub store_id: Option<String>,
    pub shift: Option<ShiftSnapshot>,
    pub sales: SalesSummary,
    pub expenses: ExpenseSummary,
    pub returns: CountedAmount,
    pub discounts: CountedAmount,
    pub tips: CountedAmount,
    pub by_service_type: Vec<ServiceTypeTotal>,
    pub mixed_payments: MixedPaymentStats,
    pub reconciliation: Reconciliation,
    pub net: NetBalance,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftSnapshot {
    pub id: String,
    pub cashier_id: String,
    pub cashier_name: Option<String>,
    pub station: String,
    pub status: ShiftStatus,
    pub opening_cash: Decimal,
    pub closing_cash: Option<Decimal>,
    pub opening_notes: Option<String>,
    pub closing_notes: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<&Shift> for ShiftSnapshot {
    fn from(shift: &Shift) -> Self {
        Self {
            id: shift.id.clone(),
            cashier_id: shift.cashier_id.clone(),
            cashier_name: shift.cashier_name.clone(),
            station: shift.station.clone(),
            status: shift.status,
            opening_cash: shift.opening_cash,
            closing_cash: shift.closing_cash,
            opening_notes: shift.opening_notes.clone(),
            closing_notes: shift.closing_notes.clone(),
            opened_at: shift.opened_at,
            closed_at: shift.closed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountedAmount {
    pub total: Decimal,
    pub count: usize,
}

impl CountedAmount {
    fn add(&mut self, amount: Decimal) {
        self.total += amount;
        self.count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodTotal {
    pub method: PaymentMethod,
    pub total: Decimal,
    /// Sales (or expenses) that used the method at least once.
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub total: Decimal,
    pub count: usize,
    pub by_method: Vec<MethodTotal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseSummary {
    pub total: Decimal,
    pub count: usize,
    pub by_method: Vec<MethodTotal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTypeTotal {
    pub service_type: ServiceType,
    pub total: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MixedPaymentStats {
    pub count: usize,
    pub total: Decimal,
    /// Payment lines per mixed sale.
    pub average_methods: Decimal,
    /// Share of the sales total settled with mixed payments, 0..=100.
    pub percentage_of_sales: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    /// Only present for shift-scoped reports.
    pub opening_cash: Option<Decimal>,
    pub cash_sales: Decimal,
    pub cash_expenses: Decimal,
    pub expected_cash: Decimal,
    /// Counted drawer cash; unknown until the shift is closed.
    pub counted_cash: Option<Decimal>,
    /// `counted - expected`; `None` when nothing was counted.
    pub overage_shortage: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetBalance {
    pub before_returns: Decimal,
    #[serde(rename = "final")]
    pub final_balance: Decimal,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Already-fetched records for one report.
#[derive(Debug, Clone, Copy)]
pub struct CashCutInput<'a> {
    pub window: TimeWindow,
    pub store_id: Option<&'a str>,
    pub shift: Option<&'a Shift>,
    pub sales: &'a [Sale],
    pub expenses: &'a [Expense],
    pub returns: &'a [SaleReturn],
    pub generated_at: DateTime<Utc>,
}

pub fn aggregate(input: CashCutInput<'_>) -> CashCutReport {
    let mut sales_total = CountedAmount::default();
    let mut sales_by_method: BTreeMap<PaymentMethod, CountedAmount> = BTreeMap::new();
    let mut service: BTreeMap<ServiceType, CountedAmount> = BTreeMap::new();
    let mut discounts = CountedAmount::default();
    let mut tips = CountedAmount::default();
    let mut mixed = CountedAmount::default();
    let mut mixed_lines = 0usize;

    for sale in input.sales {
        sales_total.add(sale.total);
        service.entry(sale.service_type).or_default().add(sale.total);

        let lines = sale.settlement.lines();
        for method in PaymentMethod::ALL {
            let mut used = false;
            let mut amount = Decimal::ZERO;
            for line in lines.iter().filter(|l| l.method == method) {
                used = true;
                amount += line.amount;
            }
            if used {
                sales_by_method.entry(method).or_default().add(amount);
            }
        }

        if sale.settlement.is_mixed() {
            mixed.add(sale.total);
            mixed_lines += lines.len();
        }
        if sale.discount_amount > Decimal::ZERO {
            discounts.add(sale.discount_amount);
        }
        if sale.tip_amount > Decimal::ZERO {
            tips.add(sale.tip_amount);
        }
    }

    let mut expense_total = CountedAmount::default();
    let mut expenses_by_method: BTreeMap<PaymentMethod, CountedAmount> = BTreeMap::new();
    for expense in input.expenses {
        expense_total.add(expense.amount);
        expenses_by_method
            .entry(expense.method)
            .or_default()
            .add(expense.amount);
    }

    let mut returns = CountedAmount::default();
    for sale_return in input.returns {
        returns.add(sale_return.amount);
    }

    let cash_sales = bucket_total(&sales_by_method, PaymentMethod::Cash);
    let cash_expenses = bucket_total(&expenses_by_method, PaymentMethod::Cash);
    let opening_cash = input.shift.map(|s| s.opening_cash);
    let expected_cash =
        money::round(opening_cash.unwrap_or(Decimal::ZERO) + cash_sales - cash_expenses);
    let counted_cash = input
        .shift
        .filter(|s| s.status == ShiftStatus::Closed)
        .and_then(|s| s.closing_cash);

    let mixed_payments = MixedPaymentStats {
        count: mixed.count,
        total: money::round(mixed.total),
        average_methods: if mixed.count == 0 {
            Decimal::ZERO
        } else {
            money::round(Decimal::from(mixed_lines) / Decimal::from(mixed.count))
        },
        percentage_of_sales: if sales_total.total.is_zero() {
            Decimal::ZERO
        } else {
            money::round(mixed.total * Decimal::ONE_HUNDRED / sales_total.total)
        },
    };

    let report = CashCutReport {
        period: input.window,
        store_id: input.store_id.map(String::from),
        shift: input.shift.map(ShiftSnapshot::from),
        sales: SalesSummary {
            total: money::round(sales_total.total),
            count: sales_total.count,
            by_method: method_totals(&sales_by_method),
        },
        expenses: ExpenseSummary {
            total: money::round(expense_total.total),
            count: expense_total.count,
            by_method: method_totals(&expenses_by_method),
        },
        returns: rounded(returns),
        discounts: rounded(discounts),
        tips: rounded(tips),
        by_service_type: ServiceType::ALL
            .iter()
            .map(|st| {
                let bucket = service.get(st).copied().unwrap_or_default();
                ServiceTypeTotal {
                    service_type: *st,
                    total: money::round(bucket.total),
                    count: bucket.count,
                }
            })
            .collect(),
        mixed_payments,
        reconciliation: Reconciliation {
            opening_cash,
            cash_sales,
            cash_expenses,
            expected_cash,
            counted_cash,
            overage_shortage: counted_cash.map(|counted| money::round(counted - expected_cash)),
        },
        net: NetBalance {
            before_returns: money::round(sales_total.total),
            final_balance: money::round(sales_total.total - returns.total),
        },
        generated_at: input.generated_at,
    };

    debug!(
        sales = report.sales.count,
        expenses = report.expenses.count,
        returns = report.returns.count,
        expected_cash = %report.reconciliation.expected_cash,
        "Cash cut aggregated"
    );
    report
}

fn bucket_total(buckets: &BTreeMap<PaymentMethod, CountedAmount>, method: PaymentMethod) -> Decimal {
    money::round(buckets.get(&method).map(|b| b.total).unwrap_or_default())
}

/// Every method is listed, zero buckets included.
fn method_totals(buckets: &BTreeMap<PaymentMethod, CountedAmount>) -> Vec<MethodTotal> {
    PaymentMethod::ALL
        .iter()
        .map(|method| {
            let bucket = buckets.get(method).copied().unwrap_or_default();
            MethodTotal {
                method: *method,
                total: money::round(bucket.total),
                count: bucket.count,
            }
        })
        .collect()
}

fn rounded(amount: CountedAmount) -> CountedAmount {
    CountedAmount {
        total: money::round(amount.total),
        count: amount.count,
    }
}

// ---------------------------------------------------------------------------
// Fetch + aggregate
// ---------------------------------------------------------------------------

/// Resolve the scope, fetch the records and aggregate them.
///
/// Fails with `InvalidWindow` when a period bound is missing or inverted and
/// with `ShiftNotFound` for an unknown shift.
pub fn compute_cash_cut(
    db: &DbState,
    request: &CashCutRequest,
    now: DateTime<Utc>,
) -> PosResult<CashCutReport> {
    let conn = db.lock()?;
    compute_with_conn(&conn, request, now)
}

pub(crate) fn compute_with_conn(
    conn: &Connection,
    request: &CashCutRequest,
    now: DateTime<Utc>,
) -> PosResult<CashCutReport> {
    match &request.scope {
        CashCutScope::Period { start, end } => {
            let window = TimeWindow::from_bounds(*start, *end)?;
            let store_id = request.store_id.as_deref();
            fetch_and_aggregate(conn, window, store_id, None, now)
        }
        CashCutScope::Shift { shift_id } => {
            let shift = shifts::load_shift(conn, shift_id)?
                .ok_or_else(|| PosError::ShiftNotFound(shift_id.clone()))?;
            let window = shift.window(now);
            fetch_and_aggregate(conn, window, Some(&shift.store_id), Some(&shift), now)
        }
    }
}

/// Expected drawer cash for a shift as of `now`, used when closing it.
pub(crate) fn expected_cash_for_shift(
    conn: &Connection,
    shift: &Shift,
    now: DateTime<Utc>,
) -> PosResult<Decimal> {
    let report = fetch_and_aggregate(conn, shift.window(now), Some(&shift.store_id), Some(shift), now)?;
    Ok(report.reconciliation.expected_cash)
}

fn fetch_and_aggregate(
    conn: &Connection,
    window: TimeWindow,
    store_id: Option<&str>,
    shift: Option<&Shift>,
    now: DateTime<Utc>,
) -> PosResult<CashCutReport> {
    let shift_id = shift.map(|s| s.id.as_str());
    let sales = sales::load_sales_in_window(conn, &window, store_id, shift_id)?;
    let expenses = ledger::load_expenses_in_window(conn, &window, store_id, shift_id)?;
    let returns = ledger::load_returns_in_window(conn, &window, store_id, shift_id)?;
    Ok(aggregate(CashCutInput {
        window,
        store_id,
        shift,
        sales: &sales,
        expenses: &expenses,
        returns: &returns,
        generated_at: now,
    }))
}

// ===========================================================================
// Tests
// ===========================================================================
