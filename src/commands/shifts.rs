use chrono::NaiveDate;
use serde::Deserialize;

use super::{money_field, non_empty, object_payload, parse_payload, require, to_json};
use crate::config::SettlementConfig;
use crate::db::DbState;
use crate::pending_orders;
use crate::report_mode;
use crate::shifts::{self as shift_service, CloseShift, OpenShift};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftOpenPayload {
    #[serde(default, alias = "store_id", alias = "branchId", alias = "branch_id")]
    store_id: Option<String>,
    #[serde(default, alias = "cashier_id", alias = "staffId", alias = "staff_id")]
    cashier_id: Option<String>,
    #[serde(default, alias = "cashier_name", alias = "staffName", alias = "staff_name")]
    cashier_name: Option<String>,
    #[serde(default, alias = "terminalName", alias = "terminal_name")]
    station: Option<String>,
    #[serde(alias = "opening_cash", alias = "openingCashAmount", alias = "opening_cash_amount")]
    opening_cash: f64,
    #[serde(default, alias = "opening_notes")]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftClosePayload {
    #[serde(default, alias = "shift_id", alias = "id")]
    shift_id: Option<String>,
    #[serde(alias = "closing_cash", alias = "closingCashAmount", alias = "closing_cash_amount")]
    closing_cash: f64,
    #[serde(default, alias = "closing_notes")]
    notes: Option<String>,
    #[serde(default, alias = "closed_by")]
    closed_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftScopePayload {
    #[serde(default, alias = "store_id", alias = "branchId", alias = "branch_id")]
    store_id: Option<String>,
    #[serde(default, alias = "cashier_id", alias = "staffId", alias = "staff_id")]
    cashier_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShiftDayPayload {
    date: NaiveDate,
    #[serde(default, alias = "store_id", alias = "branchId", alias = "branch_id")]
    store_id: Option<String>,
}

fn parse_shift_open_payload(arg0: Option<serde_json::Value>) -> Result<OpenShift, String> {
    let parsed: ShiftOpenPayload = parse_payload(object_payload(arg0, "storeId"), "shift open")?;
    Ok(OpenShift {
        store_id: require(parsed.store_id, "storeId")?,
        cashier_id: require(parsed.cashier_id, "cashierId")?,
        cashier_name: non_empty(parsed.cashier_name),
        station: non_empty(parsed.station).unwrap_or_default(),
        opening_cash: money_field(parsed.opening_cash, "openingCash")?,
        notes: non_empty(parsed.notes),
    })
}

fn parse_shift_close_payload(arg0: Option<serde_json::Value>) -> Result<CloseShift, String> {
    let parsed: ShiftClosePayload = parse_payload(object_payload(arg0, "shiftId"), "shift close")?;
    Ok(CloseShift {
        shift_id: require(parsed.shift_id, "shiftId")?,
        closing_cash: money_field(parsed.closing_cash, "closingCash")?,
        notes: non_empty(parsed.notes),
        closed_by: non_empty(parsed.closed_by),
    })
}

fn parse_shift_scope_payload(
    arg0: Option<serde_json::Value>,
) -> Result<(String, Option<String>), String> {
    let parsed: ShiftScopePayload = parse_payload(object_payload(arg0, "storeId"), "shift scope")?;
    Ok((require(parsed.store_id, "storeId")?, non_empty(parsed.cashier_id)))
}

fn parse_shift_day_payload(
    arg0: Option<serde_json::Value>,
) -> Result<(NaiveDate, Option<String>), String> {
    let parsed: ShiftDayPayload = parse_payload(object_payload(arg0, "date"), "shift day")?;
    Ok((parsed.date, non_empty(parsed.store_id)))
}

/// Open a shift. The pending-orders advisory is attached as `pendingOrders`
/// (`null` when it could not be fetched).
pub fn shift_open(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let req = parse_shift_open_payload(arg0)?;
    let config = SettlementConfig::load(&*db.lock()?);
    let pending = pending_orders::get_pending_orders(db, &req.store_id);
    let opened = shift_service::open_shift(db, &config, &req)?;

    Ok(serde_json::json!({
        "success": true,
        "shift": to_json(&opened.shift)?,
        "carriedOverOrders": opened.carried_over_orders,
        "pendingOrders": to_json(&pending)?,
    }))
}

/// Close a shift. The advisory never blocks the close.
pub fn shift_close(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let req = parse_shift_close_payload(arg0)?;
    let pending = shift_service::get_shift(db, &req.shift_id)
        .ok()
        .flatten()
        .and_then(|shift| pending_orders::get_pending_orders(db, &shift.store_id));
    let closed = shift_service::close_shift(db, &req)?;

    Ok(serde_json::json!({
        "success": true,
        "shift": to_json(&closed)?,
        "pendingOrders": to_json(&pending)?,
    }))
}

pub fn shift_get_active(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let (store_id, cashier_id) = parse_shift_scope_payload(arg0)?;
    let shift = shift_service::get_active_shift(db, &store_id, cashier_id.as_deref())?;
    Ok(serde_json::json!({ "shift": to_json(&shift)? }))
}

/// Shifts that opened on a store-local calendar day.
pub fn shift_list_for_day(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let (date, store_id) = parse_shift_day_payload(arg0)?;
    let config = SettlementConfig::load(&*db.lock()?);
    let window = report_mode::local_day(&config, date)?;
    let shifts = shift_service::list_shifts_opened_between(db, &window, store_id.as_deref())?;
    Ok(serde_json::json!({
        "period": to_json(&window)?,
        "shifts": to_json(&shifts)?,
    }))
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn parse_shift_open_payload_accepts_aliases() {
        let req = parse_shift_open_payload(Some(serde_json::json!({
            "branch_id": " store-1 ",
            "staff_id": "cashier-1",
            "openingCashAmount": 500.0,
            "notes": "  "
        })))
        .expect("open payload should parse");
        assert_eq!(req.store_id, "store-1");
        assert_eq!(req.cashier_id, "cashier-1");
        assert_eq!(req.opening_cash, rust_decimal::Decimal::from(500));
        assert_eq!(req.notes, None);
        assert_eq!(req.station, "");
    }

    #[test]
    fn parse_shift_open_payload_requires_cashier() {
        let err = parse_shift_open_payload(Some(serde_json::json!({
            "storeId": "store-1",
            "openingCash": 10
        })))
        .expect_err("missing cashier should fail");
        assert!(err.contains("Missing cashierId"));
    }

    #[test]
    fn parse_shift_close_payload_supports_snake_case() {
        let req = parse_shift_close_payload(Some(serde_json::json!({
            "shift_id": "shift-1",
            "closing_cash": 1545.0,
            "closed_by": "admin-1"
        })))
        .expect("close payload should parse");
        assert_eq!(req.shift_id, "shift-1");
        assert_eq!(req.closed_by.as_deref(), Some("admin-1"));
    }

    #[test]
    fn parse_shift_scope_payload_supports_string() {
        let (store, cashier) =
            parse_shift_scope_payload(Some(serde_json::json!("store-9"))).expect("string store");
        assert_eq!(store, "store-9");
        assert_eq!(cashier, None);
    }

    #[test]
    fn parse_shift_day_payload_rejects_bad_date() {
        assert!(parse_shift_day_payload(Some(serde_json::json!("2026-02-30"))).is_err());
        let (date, _) = parse_shift_day_payload(Some(serde_json::json!({
            "date": "2026-03-01",
            "storeId": "store-1"
        })))
        .unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn open_then_close_round_trip_with_advisory() {
        let db = db::open_in_memory().unwrap();
        let opened = shift_open(
            Some(serde_json::json!({
                "storeId": "store-1",
                "cashierId": "cashier-1",
                "openingCash": 500
            })),
            &db,
        )
        .unwrap();
        assert_eq!(opened["success"], true);
        assert_eq!(opened["pendingOrders"]["total"], 0);
        let shift_id = opened["shift"]["id"].as_str().unwrap().to_string();

        let again = shift_open(
            Some(serde_json::json!({
                "storeId": "store-1",
                "cashierId": "cashier-2",
                "openingCash": 0
            })),
            &db,
        )
        .unwrap_err();
        assert!(again.starts_with("SHIFT_ALREADY_OPEN"), "{again}");

        let active = shift_get_active(Some(serde_json::json!("store-1")), &db).unwrap();
        assert_eq!(active["shift"]["id"], shift_id.as_str());

        let closed = shift_close(
            Some(serde_json::json!({ "shiftId": shift_id, "closingCash": 495 })),
            &db,
        )
        .unwrap();
        assert_eq!(closed["shift"]["status"], "closed");
        assert_eq!(closed["shift"]["cashVariance"], -5.0);

        let active = shift_get_active(Some(serde_json::json!("store-1")), &db).unwrap();
        assert!(active["shift"].is_null());
    }

    #[test]
    fn negative_opening_cash_reports_code() {
        let db = db::open_in_memory().unwrap();
        let err = shift_open(
            Some(serde_json::json!({
                "storeId": "store-1",
                "cashierId": "cashier-1",
                "openingCash": -1
            })),
            &db,
        )
        .unwrap_err();
        assert!(err.starts_with("OPENING_CASH_NEGATIVE"), "{err}");
    }
}
