//! Domain records shared by the settlement modules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [
        PaymentMethod::Cash,
        PaymentMethod::Transfer,
        PaymentMethod::Card,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::Card => "card",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = PosError;

    fn from_str(s: &str) -> PosResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" | "efectivo" => Ok(PaymentMethod::Cash),
            "transfer" | "transferencia" => Ok(PaymentMethod::Transfer),
            "card" | "tarjeta" => Ok(PaymentMethod::Card),
            other => Err(PosError::InvalidInput(format!(
                "unknown payment method: {other}. Must be cash, transfer, or card"
            ))),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Counter,
    Pickup,
    Delivery,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [
        ServiceType::Counter,
        ServiceType::Pickup,
        ServiceType::Delivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Counter => "counter",
            ServiceType::Pickup => "pickup",
            ServiceType::Delivery => "delivery",
        }
    }
}

impl FromStr for ServiceType {
    type Err = PosError;

    fn from_str(s: &str) -> PosResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "counter" | "dine-in" | "dine_in" | "mostrador" => Ok(ServiceType::Counter),
            "pickup" | "takeaway" | "recoger" => Ok(ServiceType::Pickup),
            "delivery" | "domicilio" => Ok(ServiceType::Delivery),
            other => Err(PosError::InvalidInput(format!(
                "unknown service type: {other}"
            ))),
        }
    }
}

/// Fulfilment status of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Preparing,
    Ready,
    OutForDelivery,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Still being prepared, waiting, or on the road.
    pub fn is_in_fulfillment(&self) -> bool {
        matches!(
            self,
            OrderStatus::Preparing | OrderStatus::Ready | OrderStatus::OutForDelivery
        )
    }
}

impl FromStr for OrderStatus {
    type Err = PosError;

    fn from_str(s: &str) -> PosResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preparing" | "in_preparation" => Ok(OrderStatus::Preparing),
            "ready" | "ready_for_delivery" => Ok(OrderStatus::Ready),
            "out_for_delivery" | "dispatched" => Ok(OrderStatus::OutForDelivery),
            "completed" | "delivered" => Ok(OrderStatus::Completed),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(PosError::InvalidInput(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStatus {
    Open,
    Closed,
}

impl ShiftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::Open => "open",
            ShiftStatus::Closed => "closed",
        }
    }
}

impl FromStr for ShiftStatus {
    type Err = PosError;

    fn from_str(s: &str) -> PosResult<Self> {
        match s {
            "open" => Ok(ShiftStatus::Open),
            "closed" => Ok(ShiftStatus::Closed),
            other => Err(PosError::Storage(format!("unknown shift status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Shift
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: String,
    pub store_id: String,
    pub cashier_id: String,
    pub cashier_name: Option<String>,
    pub station: String,
    pub opening_cash: Decimal,
    pub opening_notes: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub status: ShiftStatus,
    pub closing_cash: Option<Decimal>,
    pub closing_notes: Option<String>,
    pub closed_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Expected drawer cash, recorded at close.
    pub expected_cash: Option<Decimal>,
    /// Counted minus expected, recorded at close.
    pub cash_variance: Option<Decimal>,
}

impl Shift {
    pub fn is_open(&self) -> bool {
        self.status == ShiftStatus::Open
    }

    /// The period covered by the shift; open-ended shifts run until `now`.
    pub fn window(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: self.opened_at,
            end: self.closed_at.unwrap_or(now).max(self.opened_at),
        }
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLine {
    pub method: PaymentMethod,
    pub amount: Decimal,
    /// Cash handed over by the customer (cash lines only).
    #[serde(default)]
    pub received_amount: Option<Decimal>,
    /// Transfer or card authorisation reference.
    #[serde(default)]
    pub reference: Option<String>,
}

impl PaymentLine {
    pub fn new(method: PaymentMethod, amount: Decimal) -> Self {
        Self {
            method,
            amount,
            received_amount: None,
            reference: None,
        }
    }

    pub fn with_received(mut self, received: Decimal) -> Self {
        self.received_amount = Some(received);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Settlement {
    Single {
        method: PaymentMethod,
        amount: Decimal,
        #[serde(default, rename = "receivedAmount")]
        received_amount: Option<Decimal>,
    },
    Mixed {
        lines: Vec<PaymentLine>,
    },
}

impl Settlement {
    /// The settlement as payment lines; a single settlement yields one line.
    pub fn lines(&self) -> Vec<PaymentLine> {
        match self {
            Settlement::Single {
                method,
                amount,
                received_amount,
            } => vec![PaymentLine {
                method: *method,
                amount: *amount,
                received_amount: *received_amount,
                reference: None,
            }],
            Settlement::Mixed { lines } => lines.clone(),
        }
    }

    pub fn line_count(&self) -> usize {
        match self {
            Settlement::Single { .. } => 1,
            Settlement::Mixed { lines } => lines.len(),
        }
    }

    /// Counted as a mixed payment only when more than one line was used.
    pub fn is_mixed(&self) -> bool {
        self.line_count() > 1
    }
}

// ---------------------------------------------------------------------------
// Sales, expenses, returns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl SaleItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub store_id: String,
    pub shift_id: Option<String>,
    pub cashier_id: Option<String>,
    pub items: Vec<SaleItem>,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tip_amount: Decimal,
    pub total: Decimal,
    pub service_type: ServiceType,
    pub status: OrderStatus,
    pub settlement: Settlement,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub store_id: String,
    pub shift_id: Option<String>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleReturn {
    pub id: String,
    pub store_id: String,
    pub shift_id: Option<String>,
    pub sale_id: Option<String>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Time window
// ---------------------------------------------------------------------------

/// Inclusive `[start, end]` reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> PosResult<Self> {
        if start > end {
            return Err(PosError::InvalidWindow);
        }
        Ok(Self { start, end })
    }

    /// Build from possibly-missing bounds; either bound missing is `InvalidWindow`.
    pub fn from_bounds(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> PosResult<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end),
            _ => Err(PosError::InvalidWindow),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_payment_method_parses_aliases() {
        assert_eq!("Cash".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cash);
        assert_eq!(
            "transferencia".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::Transfer
        );
        assert!("voucher".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn test_single_settlement_is_not_mixed() {
        let single = Settlement::Single {
            method: PaymentMethod::Card,
            amount: Decimal::from(20),
            received_amount: None,
        };
        assert!(!single.is_mixed());
        assert_eq!(single.lines().len(), 1);

        let one_line = Settlement::Mixed {
            lines: vec![PaymentLine::new(PaymentMethod::Cash, Decimal::from(20))],
        };
        assert!(!one_line.is_mixed());
    }

    #[test]
    fn test_window_rejects_missing_or_inverted_bounds() {
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        assert!(TimeWindow::from_bounds(Some(a), Some(b)).is_ok());
        assert!(matches!(
            TimeWindow::from_bounds(Some(a), None),
            Err(PosError::InvalidWindow)
        ));
        assert!(matches!(TimeWindow::new(b, a), Err(PosError::InvalidWindow)));
    }

    #[test]
    fn test_open_shift_window_ends_now() {
        let opened = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 13, 30, 0).unwrap();
        let shift = Shift {
            id: "s-1".into(),
            store_id: "store-1".into(),
            cashier_id: "cashier-1".into(),
            cashier_name: None,
            station: "Caja 1".into(),
            opening_cash: Decimal::from(500),
            opening_notes: None,
            opened_at: opened,
            status: ShiftStatus::Open,
            closing_cash: None,
            closing_notes: None,
            closed_by: None,
            closed_at: None,
            expected_cash: None,
            cash_variance: None,
        };
        let window = shift.window(now);
        assert_eq!(window.start, opened);
        assert_eq!(window.end, now);
    }
}
