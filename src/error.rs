//! Error taxonomy for the settlement core.
//!
//! Three classes matter to callers:
//! - validation errors are raised before any write and can be re-prompted;
//! - lookup errors point at a stale or invalid reference and are never retried;
//! - storage errors wrap SQLite and lock failures.
//!
//! Advisory lookups (pending orders) never produce a `PosError`; they degrade
//! to `None` instead.

use rust_decimal::Decimal;
use thiserror::Error;

pub type PosResult<T> = Result<T, PosError>;

#[derive(Debug, Error)]
pub enum PosError {
    #[error("payment lines differ from the order total by {difference}")]
    AmountMismatch { difference: Decimal },

    #[error("cash received ({received}) does not cover the total ({total})")]
    InsufficientCash { total: Decimal, received: Decimal },

    #[error("cash line {index}: received {received} is less than the line amount {amount}")]
    InsufficientCashLine {
        index: usize,
        amount: Decimal,
        received: Decimal,
    },

    #[error("mixed settlement has no payment lines")]
    NoPaymentLines,

    #[error("payment line {index} must have a positive amount")]
    InvalidLineAmount { index: usize },

    #[error("opening cash cannot be negative")]
    OpeningCashNegative,

    #[error("closing cash cannot be negative")]
    ClosingCashNegative,

    #[error("report window needs a start and an end, with start not after end")]
    InvalidWindow,

    #[error("shift not found: {0}")]
    ShiftNotFound(String),

    #[error("shift is already closed: {0}")]
    ShiftAlreadyClosed(String),

    #[error("an open shift already exists for this scope ({shift_id})")]
    ShiftAlreadyOpen { shift_id: String },

    #[error("no active shift for this store")]
    NoActiveShift,

    #[error("sale not found: {0}")]
    SaleNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PosError {
    /// Stable machine-readable code, used by the command layer.
    pub fn code(&self) -> &'static str {
        match self {
            PosError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            PosError::InsufficientCash { .. } => "INSUFFICIENT_CASH",
            PosError::InsufficientCashLine { .. } => "INSUFFICIENT_CASH_LINE",
            PosError::NoPaymentLines => "NO_PAYMENT_LINES",
            PosError::InvalidLineAmount { .. } => "INVALID_LINE_AMOUNT",
            PosError::OpeningCashNegative => "OPENING_CASH_NEGATIVE",
            PosError::ClosingCashNegative => "CLOSING_CASH_NEGATIVE",
            PosError::InvalidWindow => "INVALID_WINDOW",
            PosError::ShiftNotFound(_) => "SHIFT_NOT_FOUND",
            PosError::ShiftAlreadyClosed(_) => "SHIFT_ALREADY_CLOSED",
            PosError::ShiftAlreadyOpen { .. } => "SHIFT_ALREADY_OPEN",
            PosError::NoActiveShift => "NO_ACTIVE_SHIFT",
            PosError::SaleNotFound(_) => "SALE_NOT_FOUND",
            PosError::InvalidInput(_) => "INVALID_INPUT",
            PosError::Database(_) => "DATABASE_ERROR",
            PosError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Rejected before any state mutation; the caller re-prompts the user.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PosError::AmountMismatch { .. }
                | PosError::InsufficientCash { .. }
                | PosError::InsufficientCashLine { .. }
                | PosError::NoPaymentLines
                | PosError::InvalidLineAmount { .. }
                | PosError::OpeningCashNegative
                | PosError::ClosingCashNegative
                | PosError::InvalidWindow
                | PosError::InvalidInput(_)
        )
    }

    /// Stale or invalid reference.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            PosError::ShiftNotFound(_)
                | PosError::ShiftAlreadyClosed(_)
                | PosError::ShiftAlreadyOpen { .. }
                | PosError::NoActiveShift
                | PosError::SaleNotFound(_)
        )
    }
}

impl From<PosError> for String {
    fn from(err: PosError) -> Self {
        format!("{}: {err}", err.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_string_carries_code_prefix() {
        let msg: String = PosError::ShiftNotFound("shift-9".into()).into();
        assert_eq!(msg, "SHIFT_NOT_FOUND: shift not found: shift-9");
    }

    #[test]
    fn test_taxonomy_classes_are_disjoint() {
        let all = [
            PosError::NoPaymentLines,
            PosError::OpeningCashNegative,
            PosError::InvalidWindow,
            PosError::ShiftAlreadyClosed("s".into()),
            PosError::NoActiveShift,
            PosError::Storage("lock".into()),
        ];
        for err in &all {
            assert!(!(err.is_validation() && err.is_lookup()), "{err:?}");
        }
        assert!(PosError::NoPaymentLines.is_validation());
        assert!(PosError::NoActiveShift.is_lookup());
        assert!(!PosError::Storage("x".into()).is_validation());
    }
}
