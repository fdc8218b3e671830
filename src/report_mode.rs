//! Turns the report mode picked by the operator into the concrete cash-cut
//! request (a window or a single shift) plus the shifts to offer for
//! selection.
//!
//! Calendar boundaries (today, this month, a historical day) are taken in
//! the store's configured UTC offset.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cashcut::{CashCutRequest, CashCutScope};
use crate::config::{SettlementConfig, ShiftScope};
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Shift, TimeWindow};
use crate::shifts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodPreset {
    Today,
    ThisMonth,
    ThisYear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportMode {
    /// Custom range; both bounds must be present.
    Period {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    Preset(PeriodPreset),
    /// A shift picked from [`shift_range_candidates`].
    ShiftRange { shift_id: String },
    HistoricalDay { date: NaiveDate },
    /// The shift currently open, computed up to now.
    LivePreCut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReport {
    pub request: CashCutRequest,
    /// Shifts that opened in the window (historical day), or the shift being
    /// reported (shift range, live pre-cut).
    pub candidate_shifts: Vec<Shift>,
}

pub fn resolve(
    db: &DbState,
    config: &SettlementConfig,
    mode: &ReportMode,
    store_id: Option<&str>,
    cashier_id: Option<&str>,
    now: DateTime<Utc>,
) -> PosResult<ResolvedReport> {
    let store = store_id.map(String::from);
    let resolved = match mode {
        ReportMode::Period { start, end } => ResolvedReport {
            request: CashCutRequest {
                scope: CashCutScope::Period {
                    start: *start,
                    end: *end,
                },
                store_id: store,
            },
            candidate_shifts: Vec::new(),
        },
        ReportMode::Preset(preset) => {
            let window = preset_window(config, *preset, now)?;
            ResolvedReport {
                request: period_request(window, store),
                candidate_shifts: Vec::new(),
            }
        }
        ReportMode::ShiftRange { shift_id } => {
            let shift = shifts::get_shift(db, shift_id)?
                .ok_or_else(|| PosError::ShiftNotFound(shift_id.clone()))?;
            if let Some(store_id) = store_id {
                if shift.store_id != store_id {
                    return Err(PosError::InvalidInput(format!(
                        "shift {} belongs to store {}, not {store_id}",
                        shift.id, shift.store_id
                    )));
                }
            }
            ResolvedReport {
                request: CashCutRequest {
                    scope: CashCutScope::Shift {
                        shift_id: shift.id.clone(),
                    },
                    store_id: Some(shift.store_id.clone()),
                },
                candidate_shifts: vec![shift],
            }
        }
        ReportMode::HistoricalDay { date } => {
            let window = local_day(config, *date)?;
            let candidate_shifts = shifts::list_shifts_opened_between(db, &window, store_id)?;
            ResolvedReport {
                request: period_request(window, store),
                candidate_shifts,
            }
        }
        ReportMode::LivePreCut => {
            let store_id = store_id.ok_or_else(|| {
                PosError::InvalidInput("live pre-cut needs a storeId".into())
            })?;
            let cashier = match config.shift_scope {
                ShiftScope::Store => None,
                ShiftScope::StoreCashier => cashier_id,
            };
            let shift = shifts::get_active_shift(db, store_id, cashier)?
                .ok_or(PosError::NoActiveShift)?;
            ResolvedReport {
                request: CashCutRequest {
                    scope: CashCutScope::Shift {
                        shift_id: shift.id.clone(),
                    },
                    store_id: Some(store_id.to_string()),
                },
                candidate_shifts: vec![shift],
            }
        }
    };

    debug!(mode = ?mode, scope = ?resolved.request.scope, "Report mode resolved");
    Ok(resolved)
}

/// Shifts that opened inside a date range, for picking one in shift-range mode.
pub fn shift_range_candidates(
    db: &DbState,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    store_id: Option<&str>,
) -> PosResult<Vec<Shift>> {
    let window = TimeWindow::from_bounds(start, end)?;
    shifts::list_shifts_opened_between(db, &window, store_id)
}

fn period_request(window: TimeWindow, store_id: Option<String>) -> CashCutRequest {
    CashCutRequest {
        scope: CashCutScope::Period {
            start: Some(window.start),
            end: Some(window.end),
        },
        store_id,
    }
}

/// `[00:00:00.000, 23:59:59.999]` of `date` in store-local time.
pub fn local_day(config: &SettlementConfig, date: NaiveDate) -> PosResult<TimeWindow> {
    let next = date.succ_opt().ok_or(PosError::InvalidWindow)?;
    local_range(config, date, next)
}

pub fn preset_window(
    config: &SettlementConfig,
    preset: PeriodPreset,
    now: DateTime<Utc>,
) -> PosResult<TimeWindow> {
    let today = now.with_timezone(&config.local_offset()).date_naive();
    let (first, next) = match preset {
        PeriodPreset::Today => (today, today.succ_opt()),
        PeriodPreset::ThisMonth => {
            let first = today.with_day(1);
            let next = if today.month() == 12 {
                NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
            };
            (first.ok_or(PosError::InvalidWindow)?, next)
        }
        PeriodPreset::ThisYear => (
            NaiveDate::from_ymd_opt(today.year(), 1, 1).ok_or(PosError::InvalidWindow)?,
            NaiveDate::from_ymd_opt(today.year() + 1, 1, 1),
        ),
    };
    local_range(config, first, next.ok_or(PosError::InvalidWindow)?)
}

/// From local midnight of `first` up to the last millisecond before `next`.
fn local_range(config: &SettlementConfig, first: NaiveDate, next: NaiveDate) -> PosResult<TimeWindow> {
    let offset = config.local_offset();
    let midnight = |date: NaiveDate| {
        date.and_hms_opt(0, 0, 0)
            .and_then(|naive| offset.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc))
            .ok_or(PosError::InvalidWindow)
    };
    TimeWindow::new(midnight(first)?, midnight(next)? - Duration::milliseconds(1))
}

// ===========================================================================
// Tests
// ===========================================================================
