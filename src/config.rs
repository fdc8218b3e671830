//! Settlement settings, stored in `local_settings` under the `settlement`
//! category. Missing or unparsable values fall back to defaults.

use chrono::{FixedOffset, Offset, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db;
use crate::error::PosResult;

const CATEGORY: &str = "settlement";

/// Who "the one open shift" belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftScope {
    /// One open shift per store, whoever opened it.
    #[default]
    Store,
    /// One open shift per cashier within a store.
    StoreCashier,
}

impl ShiftScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftScope::Store => "store",
            ShiftScope::StoreCashier => "store_cashier",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "store" => Some(ShiftScope::Store),
            "store_cashier" | "cashier" => Some(ShiftScope::StoreCashier),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementConfig {
    pub shift_scope: ShiftScope,
    /// Upper bound for the amount pre-filled on a new mixed payment line.
    pub default_line_cap: Decimal,
    /// Offset of the store's local time from UTC, for day/month/year presets.
    pub utc_offset_minutes: i32,
    pub currency: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            shift_scope: ShiftScope::Store,
            default_line_cap: Decimal::ONE_HUNDRED,
            utc_offset_minutes: 0,
            currency: "MXN".to_string(),
        }
    }
}

impl SettlementConfig {
    pub fn load(conn: &Connection) -> Self {
        let defaults = Self::default();

        let shift_scope = match db::get_setting(conn, CATEGORY, "shift_scope") {
            Some(raw) => ShiftScope::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Unknown shift_scope setting, using store");
                defaults.shift_scope
            }),
            None => defaults.shift_scope,
        };

        let default_line_cap = match db::get_setting(conn, CATEGORY, "default_line_cap") {
            Some(raw) => match raw.trim().parse::<Decimal>() {
                Ok(cap) if cap > Decimal::ZERO => cap,
                _ => {
                    warn!(value = %raw, "Invalid default_line_cap setting, using default");
                    defaults.default_line_cap
                }
            },
            None => defaults.default_line_cap,
        };

        let utc_offset_minutes = match db::get_setting(conn, CATEGORY, "utc_offset_minutes") {
            Some(raw) => match raw.trim().parse::<i32>() {
                Ok(minutes) if minutes.abs() < 24 * 60 => minutes,
                _ => {
                    warn!(value = %raw, "Invalid utc_offset_minutes setting, using UTC");
                    defaults.utc_offset_minutes
                }
            },
            None => defaults.utc_offset_minutes,
        };

        let currency = db::get_setting(conn, CATEGORY, "currency")
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or(defaults.currency);

        Self {
            shift_scope,
            default_line_cap,
            utc_offset_minutes,
            currency,
        }
    }

    pub fn save(&self, conn: &Connection) -> PosResult<()> {
        db::set_setting(conn, CATEGORY, "shift_scope", self.shift_scope.as_str())?;
        db::set_setting(
            conn,
            CATEGORY,
            "default_line_cap",
            &self.default_line_cap.to_string(),
        )?;
        db::set_setting(
            conn,
            CATEGORY,
            "utc_offset_minutes",
            &self.utc_offset_minutes.to_string(),
        )?;
        db::set_setting(conn, CATEGORY, "currency", &self.currency)?;
        Ok(())
    }

    /// The store's local offset. Out-of-range values were rejected by `load`.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}
