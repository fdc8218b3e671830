use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::{non_empty, parse_payload, require, to_json};
use crate::cashcut;
use crate::config::SettlementConfig;
use crate::db::{self, DbState};
use crate::error::PosError;
use crate::report_mode::{self, PeriodPreset, ReportMode};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CashCutPayload {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default, alias = "fechaInicio", alias = "from", alias = "date_from")]
    start: Option<DateTime<Utc>>,
    #[serde(default, alias = "fechaFin", alias = "to", alias = "date_to")]
    end: Option<DateTime<Utc>>,
    #[serde(default, alias = "shift_id")]
    shift_id: Option<String>,
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default, alias = "store_id", alias = "branchId", alias = "branch_id")]
    store_id: Option<String>,
    #[serde(default, alias = "cashier_id", alias = "staffId", alias = "staff_id")]
    cashier_id: Option<String>,
}

#[derive(Debug)]
struct CashCutCommand {
    mode: ReportMode,
    store_id: Option<String>,
    cashier_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftCandidatesPayload {
    #[serde(default, alias = "fechaInicio", alias = "from", alias = "date_from")]
    start: Option<DateTime<Utc>>,
    #[serde(default, alias = "fechaFin", alias = "to", alias = "date_to")]
    end: Option<DateTime<Utc>>,
    #[serde(default, alias = "store_id", alias = "branchId", alias = "branch_id")]
    store_id: Option<String>,
}

fn invalid(msg: String) -> String {
    String::from(PosError::InvalidInput(msg))
}

fn parse_cashcut_payload(arg0: Option<serde_json::Value>) -> Result<CashCutCommand, String> {
    let parsed: CashCutPayload =
        parse_payload(arg0.unwrap_or_else(|| serde_json::json!({})), "cash cut")?;
    let shift_id = non_empty(parsed.shift_id);

    let mode_name = non_empty(parsed.mode)
        .map(|m| m.to_ascii_lowercase().replace(['-', ' '], "_"))
        .unwrap_or_else(|| {
            if shift_id.is_some() {
                "shift_range".into()
            } else {
                "period".into()
            }
        });

    let mode = match mode_name.as_str() {
        "period" | "custom" => ReportMode::Period {
            start: parsed.start,
            end: parsed.end,
        },
        "today" => ReportMode::Preset(PeriodPreset::Today),
        "this_month" | "thismonth" | "month" => ReportMode::Preset(PeriodPreset::ThisMonth),
        "this_year" | "thisyear" | "year" => ReportMode::Preset(PeriodPreset::ThisYear),
        "shift" | "shift_range" | "shiftrange" => ReportMode::ShiftRange {
            shift_id: require(shift_id, "shiftId")?,
        },
        "historical_day" | "historicalday" | "day" => ReportMode::HistoricalDay {
            date: parsed
                .date
                .ok_or_else(|| invalid("Missing date".into()))?,
        },
        "live_pre_cut" | "liveprecut" | "pre_cut" | "precut" => ReportMode::LivePreCut,
        other => return Err(invalid(format!("unknown report mode: {other}"))),
    };

    Ok(CashCutCommand {
        mode,
        store_id: non_empty(parsed.store_id),
        cashier_id: non_empty(parsed.cashier_id),
    })
}

/// Resolve the report mode and compute the cash cut.
///
/// `candidateShifts` lists the shifts opened in a historical day (possibly
/// none), or the selected or live shift for the shift scopes.
pub fn cashcut_compute(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let cmd = parse_cashcut_payload(arg0)?;
    let config = SettlementConfig::load(&*db.lock()?);
    let now = db::now_ts();

    let resolved = report_mode::resolve(
        db,
        &config,
        &cmd.mode,
        cmd.store_id.as_deref(),
        cmd.cashier_id.as_deref(),
        now,
    )?;
    let report = cashcut::compute_cash_cut(db, &resolved.request, now)?;

    Ok(serde_json::json!({
        "report": to_json(&report)?,
        "candidateShifts": to_json(&resolved.candidate_shifts)?,
        "currency": config.currency,
    }))
}

/// Shifts opened in a date range, for the shift-range picker.
pub fn cashcut_shift_candidates(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let parsed: ShiftCandidatesPayload = parse_payload(
        arg0.unwrap_or_else(|| serde_json::json!({})),
        "shift candidates",
    )?;
    let store_id = non_empty(parsed.store_id);
    let shifts =
        report_mode::shift_range_candidates(db, parsed.start, parsed.end, store_id.as_deref())?;
    Ok(serde_json::json!({ "shifts": to_json(&shifts)? }))
}
