//! Cash shift & cash-cut settlement core
//!
//! Shift lifecycle (open → closed, with carry-over of unfinished orders),
//! mixed-payment settlement, and cash-cut reconciliation for a point-of-sale
//! back office. State lives in a local SQLite database owned by [`db`].
//!
//! Data flow: [`report_mode`] resolves what the operator asked for into a
//! [`cashcut::CashCutRequest`], which [`cashcut`] aggregates into a report.
//! [`payments`] validates settlements when a sale is entered, and [`shifts`]
//! together with [`pending_orders`] runs at shift open and close.
//!
//! The [`commands`] module exposes the same operations as JSON handlers.

pub mod cashcut;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod money;
pub mod payments;
pub mod pending_orders;
pub mod report_mode;
pub mod sales;
pub mod shifts;

pub use cashcut::{compute_cash_cut, CashCutReport, CashCutRequest, CashCutScope};
pub use config::{SettlementConfig, ShiftScope};
pub use db::DbState;
pub use error::{PosError, PosResult};
pub use models::{
    OrderStatus, PaymentLine, PaymentMethod, Sale, ServiceType, Settlement, Shift, ShiftStatus,
    TimeWindow,
};
pub use pending_orders::PendingOrders;
pub use report_mode::{PeriodPreset, ReportMode};
