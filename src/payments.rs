//! Payment allocation for a single order.
//!
//! Validates a proposed settlement (one method, or several mixed lines)
//! against the order total before the sale is submitted, and computes the
//! change owed. Pure computation: nothing here touches the database.
//!
//! **Rules:**
//! - Line amounts must add up to the total within 0.01
//! - A cash line with a declared received amount must cover its own amount
//! - Change is only ever owed on cash

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{PosError, PosResult};
use crate::models::{PaymentLine, PaymentMethod, Settlement};
use crate::money::{self, MONEY_TOLERANCE};

/// Result of validating a settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSummary {
    /// The settlement after normalisation (rounded amounts, method-specific
    /// fields dropped where they do not apply).
    pub settlement: Settlement,
    pub change: Decimal,
}

/// A validated mixed settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MixedSettlement {
    pub lines: Vec<PaymentLine>,
    pub total_change: Decimal,
}

// ---------------------------------------------------------------------------
// Single method
// ---------------------------------------------------------------------------

/// Validate a single-method payment and return the change owed.
///
/// For cash, `received` defaults to the exact total. Non-cash methods never
/// owe change.
pub fn validate_single(
    total: Decimal,
    method: PaymentMethod,
    received: Option<Decimal>,
) -> PosResult<Decimal> {
    let total = money::non_negative(money::round(total));
    if method != PaymentMethod::Cash {
        return Ok(Decimal::ZERO);
    }
    let received = money::non_negative(money::round(received.unwrap_or(total)));
    if received < total {
        return Err(PosError::InsufficientCash { total, received });
    }
    Ok(received - total)
}

// ---------------------------------------------------------------------------
// Mixed methods
// ---------------------------------------------------------------------------

/// Validate a mixed settlement.
///
/// Checks, in order: at least one line; line sum equals `total` within
/// 0.01 (`AmountMismatch` carries `sum - total`); every line amount positive;
/// every cash line covered by its received amount.
pub fn validate_mixed(total: Decimal, lines: &[PaymentLine]) -> PosResult<MixedSettlement> {
    if lines.is_empty() {
        return Err(PosError::NoPaymentLines);
    }

    let total = money::non_negative(money::round(total));
    let lines: Vec<PaymentLine> = lines.iter().map(normalize_line).collect();

    let sum: Decimal = lines.iter().map(|l| l.amount).sum();
    let difference = sum - total;
    if difference.abs() > MONEY_TOLERANCE {
        return Err(PosError::AmountMismatch { difference });
    }

    if let Some(index) = lines.iter().position(|l| l.amount <= Decimal::ZERO) {
        return Err(PosError::InvalidLineAmount { index });
    }

    let mut total_change = Decimal::ZERO;
    for (index, line) in lines.iter().enumerate() {
        if line.method != PaymentMethod::Cash {
            continue;
        }
        let received = line.received_amount.unwrap_or(line.amount);
        if received < line.amount {
            return Err(PosError::InsufficientCashLine {
                index,
                amount: line.amount,
                received,
            });
        }
        total_change += money::non_negative(received - line.amount);
    }

    Ok(MixedSettlement {
        lines,
        total_change,
    })
}

/// Amount still to be allocated: `max(0, total - sum)`.
///
/// A shortfall within the 0.01 tolerance counts as fully allocated, so this
/// reaches exactly zero when the lines would validate.
pub fn remaining_amount(total: Decimal, lines: &[PaymentLine]) -> Decimal {
    let sum: Decimal = lines.iter().map(|l| money::round(l.amount)).sum();
    let remaining = money::round(total) - sum;
    if remaining <= MONEY_TOLERANCE {
        Decimal::ZERO
    } else {
        remaining
    }
}

/// Amount pre-filled on a newly added line: `min(remaining, cap)`.
pub fn default_line_amount(remaining: Decimal, cap: Decimal) -> Decimal {
    money::non_negative(remaining.min(cap))
}

/// Validate any settlement against the order total.
pub fn settle(total: Decimal, settlement: &Settlement) -> PosResult<SettlementSummary> {
    match settlement {
        Settlement::Single {
            method,
            amount,
            received_amount,
        } => {
            let total = money::non_negative(money::round(total));
            let amount = money::round(*amount);
            let difference = amount - total;
            if difference.abs() > MONEY_TOLERANCE {
                return Err(PosError::AmountMismatch { difference });
            }
            let change = validate_single(total, *method, *received_amount)?;
            let received_amount = match method {
                PaymentMethod::Cash => Some(received_amount.map(money::round).unwrap_or(total)),
                _ => None,
            };
            Ok(SettlementSummary {
                settlement: Settlement::Single {
                    method: *method,
                    amount: total,
                    received_amount,
                },
                change,
            })
        }
        Settlement::Mixed { lines } => {
            let mixed = validate_mixed(total, lines)?;
            Ok(SettlementSummary {
                change: mixed.total_change,
                settlement: Settlement::Mixed { lines: mixed.lines },
            })
        }
    }
}

fn normalize_line(line: &PaymentLine) -> PaymentLine {
    let is_cash = line.method == PaymentMethod::Cash;
    PaymentLine {
        method: line.method,
        amount: money::round(line.amount),
        received_amount: if is_cash {
            line.received_amount.map(money::round)
        } else {
            None
        },
        reference: if is_cash {
            None
        } else {
            line.reference
                .as_ref()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
        },
    }
}

// ---------------------------------------------------------------------------
// Interactive entry
// ---------------------------------------------------------------------------

/// Mixed payment being entered line by line at the till.
#[derive(Debug, Clone)]
pub struct MixedDraft {
    total: Decimal,
    line_cap: Decimal,
    lines: Vec<PaymentLine>,
}

impl MixedDraft {
    pub fn new(total: Decimal, line_cap: Decimal) -> Self {
        Self {
            total,
            line_cap,
            lines: Vec::new(),
        }
    }

    pub fn lines(&self) -> &[PaymentLine] {
        &self.lines
    }

    pub fn remaining(&self) -> Decimal {
        remaining_amount(self.total, &self.lines)
    }

    /// Amount to pre-fill for the next line.
    pub fn next_line_amount(&self) -> Decimal {
        default_line_amount(self.remaining(), self.line_cap)
    }

    /// Add a line using the pre-filled amount.
    pub fn add_default_line(&mut self, method: PaymentMethod) -> &PaymentLine {
        let amount = self.next_line_amount();
        self.lines.push(PaymentLine::new(method, amount));
        &self.lines[self.lines.len() - 1]
    }

    pub fn push(&mut self, line: PaymentLine) {
        self.lines.push(line);
    }

    pub fn remove(&mut self, index: usize) -> Option<PaymentLine> {
        (index < self.lines.len()).then(|| self.lines.remove(index))
    }

    /// True exactly when [`finish`](Self::finish) would accept the draft,
    /// so an overpaid draft stays blocked even though `remaining` shows 0.
    pub fn can_submit(&self) -> bool {
        self.finish().is_ok()
    }

    pub fn finish(&self) -> PosResult<MixedSettlement> {
        validate_mixed(self.total, &self.lines)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
