//! Canonical per-trade view of a normalized row, and its content fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::normalize::{
    parse_timestamp, BUY_AVERAGE, BUY_VALUE, EXCHANGE, QUANTITY, REALIZED_PNL, SELL_AVERAGE,
    SELL_VALUE, SYMBOL, TRADE_TYPE,
};
use crate::table::{Cell, Table, TIMESTAMP_FORMAT};

/// Columns checked, in order, for the execution time of a trade.
pub const TRADE_TIME_COLUMNS: [&str; 6] = [
    "Time",
    "Trade Time",
    "Trade_Time",
    "Trade Date",
    "Order Execution Time",
    "Date",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub quantity: Option<f64>,
    pub buy_value: Option<f64>,
    pub sell_value: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub buy_average: Option<f64>,
    pub sell_average: Option<f64>,
    pub trade_type: Option<String>,
    pub exchange: Option<String>,
    pub trade_time: Option<String>,
}

fn number_at(table: &Table, row: usize, column: &str) -> Option<f64> {
    table
        .cell(row, column)
        .and_then(Cell::to_f64_lenient)
}

fn text_at(table: &Table, row: usize, column: &str) -> Option<String> {
    match table.cell(row, column)? {
        Cell::Null => None,
        Cell::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
        other => {
            let s = other.to_string();
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
    }
}

/// Execution time in `TIMESTAMP_FORMAT` whenever the cell parses, so a row hashes the
/// same whether or not the rest of its file let the column become timestamps.
fn time_at(table: &Table, row: usize, column: &str) -> Option<String> {
    match table.cell(row, column)? {
        Cell::Text(s) => match parse_timestamp(s) {
            Some(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
            None => text_at(table, row, column),
        },
        _ => text_at(table, row, column),
    }
}

impl TradeRecord {
    /// Reads row `row` by column name; column order does not matter.
    pub fn from_row(table: &Table, row: usize) -> Self {
        let trade_time = TRADE_TIME_COLUMNS
            .iter()
            .find(|c| table.has_column(c))
            .and_then(|c| time_at(table, row, c));
        Self {
            symbol: text_at(table, row, SYMBOL).unwrap_or_default(),
            quantity: number_at(table, row, QUANTITY),
            buy_value: number_at(table, row, BUY_VALUE),
            sell_value: number_at(table, row, SELL_VALUE),
            realized_pnl: number_at(table, row, REALIZED_PNL),
            buy_average: number_at(table, row, BUY_AVERAGE),
            sell_average: number_at(table, row, SELL_AVERAGE),
            trade_type: text_at(table, row, TRADE_TYPE),
            exchange: text_at(table, row, EXCHANGE),
            trade_time,
        }
    }

    pub fn from_table(table: &Table) -> Vec<Self> {
        (0..table.len()).map(|i| Self::from_row(table, i)).collect()
    }

    /// Sorted `key=value` pairs over the non-null economic fields.
    pub fn canonical_fields(&self) -> BTreeMap<&'static str, String> {
        let mut fields = BTreeMap::new();
        let mut num = |k: &'static str, v: Option<f64>| {
            if let Some(v) = v {
                fields.insert(k, fmt_number(v));
            }
        };
        num("quantity", self.quantity);
        num("buy_value", self.buy_value);
        num("sell_value", self.sell_value);
        num("realized_pnl", self.realized_pnl);
        num("buy_average", self.buy_average);
        num("sell_average", self.sell_average);

        let mut text = |k: &'static str, v: Option<&str>| {
            if let Some(v) = v.map(str::trim).filter(|v| !v.is_empty()) {
                fields.insert(k, v.to_string());
            }
        };
        text("symbol", Some(self.symbol.as_str()));
        text("trade_type", self.trade_type.as_deref());
        text("exchange", self.exchange.as_deref());
        text("trade_time", self.trade_time.as_deref());
        fields
    }

    /// SHA-256 over the canonical fields. Source tag and insert time never take part.
    pub fn fingerprint(&self) -> String {
        let canonical = self
            .canonical_fields()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("|");
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Fixed six-decimal rendering; negative zero folds to zero.
fn fmt_number(v: f64) -> String {
    let v = if v == 0.0 { 0.0 } else { v };
    format!("{:.6}", v)
}
