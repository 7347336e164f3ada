//! Tick samples

use crate::protocol::{body, HistoryBody, TickBody};
use crate::ws::ConnectorError;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

/// Pip size assumed when the venue omits it
pub const DEFAULT_PIP_SIZE: u32 = 2;

/// One price update, with its last digit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickSample {
    pub symbol: String,
    pub quote: Decimal,
    pub epoch: i64,
    pub pip_size: u32,
    pub digit: u8,
}

impl TickSample {
    pub fn new(symbol: impl Into<String>, quote: Decimal, epoch: i64, pip_size: u32) -> Self {
        Self {
            symbol: symbol.into(),
            quote,
            epoch,
            pip_size,
            digit: last_digit(quote, pip_size),
        }
    }

    /// Parse a `tick` push or opening response
    pub fn from_message(message: &Value) -> Result<Self, ConnectorError> {
        let tick: TickBody = body(message, "tick")?;
        Ok(Self::new(
            tick.symbol,
            tick.quote,
            tick.epoch,
            tick.pip_size.unwrap_or(DEFAULT_PIP_SIZE),
        ))
    }

    /// Parse a `ticks_history` response, oldest first
    pub fn from_history(message: &Value, symbol: &str) -> Result<Vec<Self>, ConnectorError> {
        let history: HistoryBody = body(message, "history")?;
        if history.prices.len() != history.times.len() {
            return Err(ConnectorError::Validation(format!(
                "history has {} prices but {} times",
                history.prices.len(),
                history.times.len()
            )));
        }
        let pip_size = message
            .get("pip_size")
            .and_then(Value::as_u64)
            .map(|p| p as u32)
            .unwrap_or(DEFAULT_PIP_SIZE);

        Ok(history
            .prices
            .into_iter()
            .zip(history.times)
            .map(|(quote, epoch)| Self::new(symbol, quote, epoch, pip_size))
            .collect())
    }
}

/// Final digit of `quote` written with `pip_size` decimals
pub fn last_digit(quote: Decimal, pip_size: u32) -> u8 {
    let mut fixed = quote.round_dp(pip_size);
    fixed.rescale(pip_size);
    (fixed.mantissa().unsigned_abs() % 10) as u8
}
