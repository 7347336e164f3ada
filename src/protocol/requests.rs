//! Request payload builders
//!
//! `req_id` is added by the connector and `subscribe: 1` by
//! [`Connector::subscribe`](crate::ws::Connector::subscribe).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};

fn amount(value: Decimal) -> Value {
    json!(value.round_dp(2).to_f64().unwrap_or_default())
}

pub fn authorize(token: &str) -> Value {
    json!({ "authorize": token })
}

pub fn ping() -> Value {
    json!({ "ping": 1 })
}

pub fn balance() -> Value {
    json!({ "balance": 1 })
}

pub fn ticks(symbol: &str) -> Value {
    json!({ "ticks": symbol })
}

/// Last `count` ticks up to now
pub fn ticks_history(symbol: &str, count: usize) -> Value {
    json!({
        "ticks_history": symbol,
        "count": count,
        "end": "latest",
        "style": "ticks",
    })
}

pub fn active_symbols() -> Value {
    json!({ "active_symbols": "brief" })
}

pub fn contracts_for(symbol: &str) -> Value {
    json!({ "contracts_for": symbol })
}

/// Price a tick-duration digit contract staked at `stake`
pub fn proposal(
    symbol: &str,
    contract_type: &str,
    barrier: Option<u8>,
    stake: Decimal,
    currency: &str,
    duration_ticks: u32,
) -> Value {
    let mut payload = json!({
        "proposal": 1,
        "amount": amount(stake),
        "basis": "stake",
        "contract_type": contract_type,
        "currency": currency,
        "duration": duration_ticks,
        "duration_unit": "t",
        "symbol": symbol,
    });
    if let (Some(barrier), Some(body)) = (barrier, payload.as_object_mut()) {
        body.insert("barrier".to_string(), Value::from(barrier.to_string()));
    }
    payload
}

/// Buy a quoted contract for at most `price`
pub fn buy(proposal_id: &str, price: Decimal) -> Value {
    json!({ "buy": proposal_id, "price": amount(price) })
}

pub fn proposal_open_contract(contract_id: u64) -> Value {
    json!({ "proposal_open_contract": 1, "contract_id": contract_id })
}

pub fn forget(subscription_id: &str) -> Value {
    json!({ "forget": subscription_id })
}

pub fn forget_all(kinds: &[&str]) -> Value {
    json!({ "forget_all": kinds })
}
