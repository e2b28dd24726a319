//! Anonymized view of a journal, handed to an external coaching service.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::logging::{obj, v_int, Domain, Logger};
use crate::metrics::MetricsSnapshot;
use crate::normalize::{SENSITIVE_COLUMNS, SYMBOL};
use crate::table::{Cell, Table};

/// Raw spellings that may survive in tables that never went through normalization.
const RAW_IDENTITY_COLUMNS: [&str; 3] = ["PAN", "PAN Number", "Phone Number"];

pub const DEFAULT_RECENT_TRADES: usize = 10;

/// `STOCK_nnn`, stable across runs for the same symbol.
pub fn pseudonym(symbol: &str) -> String {
    let digest = Sha256::digest(symbol.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    format!("STOCK_{:03}", u64::from_be_bytes(head) % 1000)
}

/// Copy of `table` without identity columns and with symbols pseudonymized.
pub fn anonymize(table: &Table) -> Table {
    let mut anon = table.clone();
    anon.drop_columns(&SENSITIVE_COLUMNS);
    anon.drop_columns(&RAW_IDENTITY_COLUMNS);
    anon.map_columns(&[SYMBOL], |cell| {
        let replacement = match &*cell {
            Cell::Null => None,
            other => Some(Cell::text(pseudonym(&other.to_string()))),
        };
        if let Some(r) = replacement {
            *cell = r;
        }
    });
    anon
}

#[derive(Debug, Clone, Serialize)]
pub struct CoachingPayload {
    pub metrics: MetricsSnapshot,
    pub trade_count: usize,
    pub recent_trades: Vec<Value>,
}

impl CoachingPayload {
    /// Keeps the last `recent` rows, anonymized.
    pub fn new(metrics: MetricsSnapshot, table: &Table, recent: usize) -> Self {
        let anon = anonymize(table);
        Self {
            metrics,
            trade_count: table.len(),
            recent_trades: anon.tail(recent).to_records(),
        }
    }

    pub fn log_prepared(&self, logger: &Logger) {
        logger.info(
            Domain::Coach,
            "coaching_payload_prepared",
            obj(&[
                ("trades", v_int(self.trade_count as u64)),
                ("recent", v_int(self.recent_trades.len() as u64)),
            ]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsEngine;

    fn journal() -> Table {
        let mut t = Table::with_columns(&["Symbol", "Client Id", "PAN", "Realized P&L"]);
        t.push_row(vec!["RELIANCE".into(), "AB12".into(), "ABCDE1234F".into(), 10.0.into()]);
        t.push_row(vec![Cell::Null, "AB12".into(), Cell::Null, (-4.0).into()]);
        t.push_row(vec!["TCS".into(), "AB12".into(), Cell::Null, 2.0.into()]);
        t
    }

    #[test]
    fn pseudonyms_are_stable_and_shaped() {
        let p = pseudonym("RELIANCE");
        assert_eq!(p, pseudonym("RELIANCE"));
        assert!(p.starts_with("STOCK_"));
        assert_eq!(p.len(), "STOCK_000".len());
    }

    #[test]
    fn identity_columns_removed_and_symbols_masked() {
        let anon = anonymize(&journal());
        assert_eq!(anon.columns(), &["Symbol".to_string(), "Realized P&L".to_string()]);
        assert_eq!(anon.cell(0, SYMBOL), Some(&Cell::text(pseudonym("RELIANCE"))));
        assert_eq!(anon.cell(1, SYMBOL), Some(&Cell::Null));
    }

    #[test]
    fn payload_keeps_recent_rows() {
        let t = journal();
        let snapshot = MetricsEngine::new(Logger::null()).compute(&t).unwrap();
        let payload = CoachingPayload::new(snapshot, &t, 2);
        assert_eq!(payload.trade_count, 3);
        assert_eq!(payload.recent_trades.len(), 2);
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("RELIANCE"));
        assert!(!json.contains("AB12"));
        assert!(json.contains("Total_P&L"));
    }
}
