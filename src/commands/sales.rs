use serde::Deserialize;

use super::{money_field, non_empty, object_payload, parse_payload, require, to_json};
use crate::config::SettlementConfig;
use crate::db::DbState;
use crate::error::PosError;
use crate::ledger::{self, RecordExpense, RecordReturn};
use crate::models::{OrderStatus, PaymentLine, PaymentMethod, SaleItem, ServiceType, Settlement};
use crate::money::Discount;
use crate::payments;
use crate::pending_orders;
use crate::sales::{self as sale_service, SubmitSale};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentLinePayload {
    method: String,
    amount: f64,
    #[serde(default, alias = "received_amount")]
    received_amount: Option<f64>,
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SettlementPayload {
    Single {
        method: String,
        amount: f64,
        #[serde(default, rename = "receivedAmount", alias = "received_amount")]
        received_amount: Option<f64>,
    },
    Mixed {
        #[serde(default, alias = "payments")]
        lines: Vec<PaymentLinePayload>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaleItemPayload {
    name: String,
    #[serde(default = "one")]
    quantity: u32,
    #[serde(alias = "unit_price", alias = "price")]
    unit_price: f64,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DiscountKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Deserialize)]
struct DiscountPayload {
    kind: DiscountKind,
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaleSubmitPayload {
    #[serde(default, alias = "store_id", alias = "branchId", alias = "branch_id")]
    store_id: Option<String>,
    #[serde(default, alias = "shift_id")]
    shift_id: Option<String>,
    #[serde(default, alias = "cashier_id", alias = "staffId", alias = "staff_id")]
    cashier_id: Option<String>,
    #[serde(default)]
    items: Vec<SaleItemPayload>,
    total: f64,
    #[serde(default)]
    discount: Option<DiscountPayload>,
    #[serde(default, alias = "tip_amount", alias = "tipAmount")]
    tip: Option<f64>,
    settlement: SettlementPayload,
    #[serde(default, alias = "service_type", alias = "orderType", alias = "order_type")]
    service_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaleStatusPayload {
    #[serde(default, alias = "sale_id", alias = "orderId", alias = "order_id", alias = "id")]
    sale_id: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpensePayload {
    #[serde(default, alias = "store_id", alias = "branchId", alias = "branch_id")]
    store_id: Option<String>,
    #[serde(default, alias = "shift_id")]
    shift_id: Option<String>,
    #[serde(default, alias = "payment_method", alias = "paymentMethod")]
    method: Option<String>,
    amount: f64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReturnPayload {
    #[serde(default, alias = "store_id", alias = "branchId", alias = "branch_id")]
    store_id: Option<String>,
    #[serde(default, alias = "shift_id")]
    shift_id: Option<String>,
    #[serde(default, alias = "sale_id", alias = "orderId", alias = "order_id")]
    sale_id: Option<String>,
    #[serde(default, alias = "payment_method", alias = "paymentMethod")]
    method: Option<String>,
    #[serde(alias = "refundAmount", alias = "refund_amount")]
    amount: f64,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentPreviewPayload {
    total: f64,
    #[serde(default, alias = "payments")]
    lines: Vec<PaymentLinePayload>,
}

fn parse_method(raw: &str) -> Result<PaymentMethod, String> {
    raw.parse::<PaymentMethod>().map_err(String::from)
}

fn parse_lines(lines: Vec<PaymentLinePayload>) -> Result<Vec<PaymentLine>, String> {
    lines
        .into_iter()
        .map(|line| {
            Ok(PaymentLine {
                method: parse_method(&line.method)?,
                amount: money_field(line.amount, "amount")?,
                received_amount: line
                    .received_amount
                    .map(|r| money_field(r, "receivedAmount"))
                    .transpose()?,
                reference: non_empty(line.reference),
            })
        })
        .collect()
}

fn parse_settlement(payload: SettlementPayload) -> Result<Settlement, String> {
    match payload {
        SettlementPayload::Single {
            method,
            amount,
            received_amount,
        } => Ok(Settlement::Single {
            method: parse_method(&method)?,
            amount: money_field(amount, "amount")?,
            received_amount: received_amount
                .map(|r| money_field(r, "receivedAmount"))
                .transpose()?,
        }),
        SettlementPayload::Mixed { lines } => Ok(Settlement::Mixed {
            lines: parse_lines(lines)?,
        }),
    }
}

fn parse_sale_submit_payload(arg0: Option<serde_json::Value>) -> Result<SubmitSale, String> {
    let parsed: SaleSubmitPayload =
        parse_payload(arg0.unwrap_or_else(|| serde_json::json!({})), "sale")?;

    let items = parsed
        .items
        .into_iter()
        .map(|item| {
            Ok(SaleItem {
                name: item.name.trim().to_string(),
                quantity: item.quantity,
                unit_price: money_field(item.unit_price, "unitPrice")?,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    let discount = parsed
        .discount
        .map(|d| {
            let value = money_field(d.value, "discount")?;
            Ok::<_, String>(match d.kind {
                DiscountKind::Percentage => Discount::Percentage(value),
                DiscountKind::Fixed => Discount::Fixed(value),
            })
        })
        .transpose()?;

    let service_type = match non_empty(parsed.service_type) {
        Some(raw) => raw.parse::<ServiceType>()?,
        None => ServiceType::Counter,
    };
    let status = non_empty(parsed.status)
        .map(|raw| raw.parse::<OrderStatus>())
        .transpose()?;

    Ok(SubmitSale {
        store_id: require(parsed.store_id, "storeId")?,
        shift_id: non_empty(parsed.shift_id),
        cashier_id: non_empty(parsed.cashier_id),
        items,
        total: money_field(parsed.total, "total")?,
        discount,
        tip: money_field(parsed.tip.unwrap_or(0.0), "tip")?,
        settlement: parse_settlement(parsed.settlement)?,
        service_type,
        status,
    })
}

fn parse_sale_status_payload(
    arg0: Option<serde_json::Value>,
) -> Result<(String, OrderStatus), String> {
    let parsed: SaleStatusPayload = parse_payload(object_payload(arg0, "saleId"), "sale status")?;
    let status = parsed.status.parse::<OrderStatus>()?;
    Ok((require(parsed.sale_id, "saleId")?, status))
}

fn parse_expense_payload(arg0: Option<serde_json::Value>) -> Result<RecordExpense, String> {
    let parsed: ExpensePayload =
        parse_payload(arg0.unwrap_or_else(|| serde_json::json!({})), "expense")?;
    Ok(RecordExpense {
        store_id: require(parsed.store_id, "storeId")?,
        shift_id: non_empty(parsed.shift_id),
        method: parse_method(non_empty(parsed.method).as_deref().unwrap_or("cash"))?,
        amount: money_field(parsed.amount, "amount")?,
        description: require(parsed.description, "description")?,
    })
}

fn parse_return_payload(arg0: Option<serde_json::Value>) -> Result<RecordReturn, String> {
    let parsed: ReturnPayload =
        parse_payload(arg0.unwrap_or_else(|| serde_json::json!({})), "return")?;
    Ok(RecordReturn {
        store_id: require(parsed.store_id, "storeId")?,
        shift_id: non_empty(parsed.shift_id),
        sale_id: non_empty(parsed.sale_id),
        method: parse_method(non_empty(parsed.method).as_deref().unwrap_or("cash"))?,
        amount: money_field(parsed.amount, "amount")?,
        reason: non_empty(parsed.reason).unwrap_or_default(),
    })
}

pub fn sale_submit(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let req = parse_sale_submit_payload(arg0)?;
    let submitted = sale_service::submit_sale(db, &req)?;
    Ok(serde_json::json!({
        "success": true,
        "saleId": submitted.sale_id,
        "change": to_json(&submitted.change)?,
        "status": submitted.status,
    }))
}

/// Running state of a mixed payment being entered: what is left, the amount
/// to pre-fill on the next line, and whether the sale may be submitted.
pub fn payment_preview(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let parsed: PaymentPreviewPayload = parse_payload(
        arg0.unwrap_or_else(|| serde_json::json!({})),
        "payment preview",
    )?;
    let config = SettlementConfig::load(&*db.lock()?);
    let mut draft = payments::MixedDraft::new(
        money_field(parsed.total, "total")?,
        config.default_line_cap,
    );
    for line in parse_lines(parsed.lines)? {
        draft.push(line);
    }

    let validation = match draft.finish() {
        Ok(mixed) => serde_json::json!({
            "valid": true,
            "totalChange": to_json(&mixed.total_change)?,
        }),
        Err(e) => serde_json::json!({
            "valid": false,
            "errorCode": e.code(),
            "error": e.to_string(),
        }),
    };
    Ok(serde_json::json!({
        "remaining": to_json(&draft.remaining())?,
        "nextLineAmount": to_json(&draft.next_line_amount())?,
        "canSubmit": draft.can_submit(),
        "validation": validation,
    }))
}

pub fn sale_update_status(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let (sale_id, status) = parse_sale_status_payload(arg0)?;
    sale_service::update_order_status(db, &sale_id, status)?;
    Ok(serde_json::json!({ "success": true, "saleId": sale_id, "status": status }))
}

pub fn expense_record(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let req = parse_expense_payload(arg0)?;
    let expense = ledger::record_expense(db, &req)?;
    Ok(serde_json::json!({ "success": true, "expense": to_json(&expense)? }))
}

pub fn return_record(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let req = parse_return_payload(arg0)?;
    let sale_return = ledger::record_return(db, &req)?;
    Ok(serde_json::json!({ "success": true, "return": to_json(&sale_return)? }))
}

/// Advisory count of orders in fulfilment; `available: false` when the
/// lookup failed.
pub fn orders_get_pending(
    arg0: Option<serde_json::Value>,
    db: &DbState,
) -> Result<serde_json::Value, String> {
    let payload = object_payload(arg0, "storeId");
    let store_id = non_empty(
        ["storeId", "store_id", "branchId", "branch_id"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(|v| v.as_str()).map(String::from)),
    )
    .ok_or_else(|| String::from(PosError::InvalidInput("Missing storeId".into())))?;

    let pending = pending_orders::get_pending_orders(db, &store_id);
    Ok(serde_json::json!({
        "available": pending.is_some(),
        "pendingOrders": to_json(&pending)?,
    }))
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn parse_sale_submit_payload_builds_mixed_settlement() {
        let req = parse_sale_submit_payload(Some(serde_json::json!({
            "storeId": "store-1",
            "total": 250.0,
            "order_type": "delivery",
            "settlement": {
                "type": "mixed",
                "lines": [
                    { "method": "efectivo", "amount": 100, "receivedAmount": 150 },
                    { "method": "card", "amount": 150, "reference": "  " }
                ]
            }
        })))
        .expect("sale payload should parse");
        assert_eq!(req.service_type, ServiceType::Delivery);
        assert_eq!(req.tip, Decimal::ZERO);
        match req.settlement {
            Settlement::Mixed { lines } => {
                assert_eq!(lines[0].method, PaymentMethod::Cash);
                assert_eq!(lines[0].received_amount, Some(Decimal::from(150)));
                assert_eq!(lines[1].reference, None);
            }
            other => panic!("expected mixed settlement, got {other:?}"),
        }
    }

    #[test]
    fn parse_sale_submit_payload_single_with_discount() {
        let req = parse_sale_submit_payload(Some(serde_json::json!({
            "store_id": "store-1",
            "total": 90,
            "items": [{ "name": "Torta", "price": 100 }],
            "discount": { "kind": "percentage", "value": 10 },
            "settlement": { "type": "single", "method": "cash", "amount": 90, "received_amount": 100 }
        })))
        .expect("single payload should parse");
        assert_eq!(req.items[0].quantity, 1);
        assert_eq!(req.discount, Some(Discount::Percentage(Decimal::from(10))));
        assert!(matches!(
            req.settlement,
            Settlement::Single { received_amount: Some(_), .. }
        ));
    }

    #[test]
    fn parse_sale_submit_payload_rejects_unknown_method() {
        let err = parse_sale_submit_payload(Some(serde_json::json!({
            "storeId": "store-1",
            "total": 10,
            "settlement": { "type": "single", "method": "voucher", "amount": 10 }
        })))
        .expect_err("unknown method should fail");
        assert!(err.starts_with("INVALID_INPUT"), "{err}");
    }

    #[test]
    fn parse_sale_status_payload_accepts_aliases() {
        let (id, status) = parse_sale_status_payload(Some(serde_json::json!({
            "order_id": "sale-1",
            "status": "dispatched"
        })))
        .unwrap();
        assert_eq!(id, "sale-1");
        assert_eq!(status, OrderStatus::OutForDelivery);
    }

    #[test]
    fn parse_expense_payload_defaults_to_cash() {
        let req = parse_expense_payload(Some(serde_json::json!({
            "storeId": "store-1",
            "amount": 150,
            "description": "Gas"
        })))
        .unwrap();
        assert_eq!(req.method, PaymentMethod::Cash);
        assert!(parse_expense_payload(Some(serde_json::json!({
            "storeId": "store-1",
            "amount": 150
        })))
        .is_err());
    }

    #[test]
    fn parse_return_payload_reads_refund_amount() {
        let req = parse_return_payload(Some(serde_json::json!({
            "storeId": "store-1",
            "orderId": "sale-1",
            "refundAmount": 30.5,
            "method": "transfer"
        })))
        .unwrap();
        assert_eq!(req.sale_id.as_deref(), Some("sale-1"));
        assert_eq!(req.amount, "30.5".parse::<Decimal>().unwrap());
        assert_eq!(req.method, PaymentMethod::Transfer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn submit_reports_mismatch_code_and_pending_counts() {
        let db = db::open_in_memory().unwrap();
        let err = sale_submit(
            Some(serde_json::json!({
                "storeId": "store-1",
                "total": 250,
                "settlement": { "type": "mixed", "lines": [
                    { "method": "cash", "amount": 100 },
                    { "method": "card", "amount": 100 }
                ]}
            })),
            &db,
        )
        .unwrap_err();
        assert!(err.starts_with("AMOUNT_MISMATCH"), "{err}");

        let ok = sale_submit(
            Some(serde_json::json!({
                "storeId": "store-1",
                "total": 250,
                "status": "ready",
                "settlement": { "type": "mixed", "lines": [
                    { "method": "cash", "amount": 100, "receivedAmount": 150 },
                    { "method": "card", "amount": 150 }
                ]}
            })),
            &db,
        )
        .unwrap();
        assert_eq!(ok["change"], 50.0);

        let pending = orders_get_pending(Some(serde_json::json!("store-1")), &db).unwrap();
        assert_eq!(pending["available"], true);
        assert_eq!(pending["pendingOrders"]["readyForDelivery"], 1);
    }

    #[test]
    fn payment_preview_prefills_up_to_the_line_cap() {
        let db = db::open_in_memory().unwrap();
        let empty = payment_preview(Some(serde_json::json!({ "total": 250 })), &db).unwrap();
        assert_eq!(empty["remaining"], 250.0);
        assert_eq!(empty["nextLineAmount"], 100.0);
        assert_eq!(empty["canSubmit"], false);
        assert_eq!(empty["validation"]["errorCode"], "NO_PAYMENT_LINES");

        let done = payment_preview(
            Some(serde_json::json!({
                "total": 250,
                "lines": [
                    { "method": "cash", "amount": 100, "receivedAmount": 150 },
                    { "method": "card", "amount": 150 }
                ]
            })),
            &db,
        )
        .unwrap();
        assert_eq!(done["remaining"], 0.0);
        assert_eq!(done["canSubmit"], true);
        assert_eq!(done["validation"]["totalChange"], 50.0);
    }
}
