//! Turns a raw broker export into the canonical trade table.

mod derive;
mod header;

pub use derive::{
    derive_fields, parse_timestamp, AVG_ENTRY_PRICE, BREAK_EVEN, DAY_OF_WEEK, HOUR, LOSS, MONTH,
    POSITION_SIZE, RETURN_PERCENTAGE, WIN,
};
pub use header::{detect_header_row, HeaderChoice, HeaderMethod, HEADER_TOKENS};

use serde_json::json;

use crate::data::RawTable;
use crate::error::{Result, ValidationError};
use crate::logging::{obj, v_int, v_str, Domain, Logger};
use crate::table::{Cell, Table};

pub const SYMBOL: &str = "Symbol";
pub const QUANTITY: &str = "Quantity";
pub const BUY_VALUE: &str = "Buy Value";
pub const SELL_VALUE: &str = "Sell Value";
pub const REALIZED_PNL: &str = "Realized P&L";
pub const BUY_AVERAGE: &str = "Buy Average";
pub const SELL_AVERAGE: &str = "Sell Average";
pub const TRADE_TYPE: &str = "Trade Type";
pub const EXCHANGE: &str = "Exchange";

pub const REQUIRED_COLUMNS: [&str; 5] = [SYMBOL, QUANTITY, BUY_VALUE, SELL_VALUE, REALIZED_PNL];
pub const NUMERIC_COLUMNS: [&str; 4] = [QUANTITY, BUY_VALUE, SELL_VALUE, REALIZED_PNL];

/// Title-cased broker spellings and their canonical names.
pub const COLUMN_ALIASES: [(&str, &str); 7] = [
    ("Tradingsymbol", SYMBOL),
    ("Instrument", SYMBOL),
    ("Qty", QUANTITY),
    ("Buy Amount", BUY_VALUE),
    ("Sell Amount", SELL_VALUE),
    ("P&L", REALIZED_PNL),
    ("Profit And Loss", REALIZED_PNL),
];

/// Identity columns removed for good. Names are compared after title-casing,
/// so `PAN` arrives here as `Pan`.
pub const SENSITIVE_COLUMNS: [&str; 8] = [
    "Client Id",
    "Order Id",
    "Trade Id",
    "Pan",
    "Pan Number",
    "Phone",
    "Mobile",
    "Email",
];

const NULL_SPELLINGS: [&str; 4] = ["nan", "None", "null", ""];

/// Uppercases the first letter of every alphabetic run and lowercases the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

pub fn canonical_column_name(raw: &str) -> String {
    let titled = title_case(raw.trim());
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == titled)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(titled)
}

/// Tolerant amount parsing: `1,234.5` → 1234.5, `(100)` → -100, junk → `None`.
pub fn parse_amount(s: &str) -> Option<f64> {
    let cleaned = s.replace(',', "").replace('(', "-").replace(')', "");
    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

pub struct SchemaNormalizer {
    logger: Logger,
    numeric_threshold: f64,
    null_warn_fraction: f64,
}

impl SchemaNormalizer {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            numeric_threshold: 0.7,
            null_warn_fraction: 0.5,
        }
    }

    pub fn with_thresholds(mut self, numeric_threshold: f64, null_warn_fraction: f64) -> Self {
        self.numeric_threshold = numeric_threshold;
        self.null_warn_fraction = null_warn_fraction;
        self
    }

    pub fn normalize(&self, raw: RawTable) -> Result<Table> {
        let file = raw.manifest.name.clone();
        let mut table = self.apply_header(raw)?;
        self.sanitize(&mut table, &file);
        coerce_numeric(&mut table);
        self.validate(&table, &file)?;
        derive_fields(&mut table, &self.logger);

        self.logger.info(
            Domain::Normalize,
            "normalized",
            obj(&[
                ("file", v_str(&file)),
                ("rows", v_int(table.len() as u64)),
                ("columns", json!(table.columns())),
            ]),
        );
        Ok(table)
    }

    fn apply_header(&self, raw: RawTable) -> Result<Table> {
        let file = raw.manifest.name;
        let mut rows = raw.rows;
        if rows.is_empty() {
            return Err(ValidationError::NoData.into());
        }

        let choice = detect_header_row(&rows, self.numeric_threshold);
        let fields = obj(&[
            ("file", v_str(&file)),
            ("row", v_int(choice.index as u64)),
            ("method", json!(choice.method)),
        ]);
        match choice.method {
            HeaderMethod::Token => self.logger.info(Domain::Normalize, "header_detected", fields),
            HeaderMethod::NumericDensity | HeaderMethod::Default => {
                self.logger.warn(Domain::Normalize, "header_fallback", fields)
            }
        }

        let data = rows.split_off(choice.index + 1);
        let header = rows.pop().unwrap_or_default();
        let columns = header
            .iter()
            .enumerate()
            .map(|(i, c)| match c {
                Cell::Null => format!("Unnamed: {}", i),
                other => other.to_string(),
            })
            .map(|name| canonical_column_name(&name))
            .collect::<Vec<_>>();

        let mut seen = std::collections::HashSet::new();
        let dupes: Vec<&String> = columns.iter().filter(|c| !seen.insert(*c)).collect();
        if !dupes.is_empty() {
            self.logger.warn(
                Domain::Normalize,
                "duplicate_columns",
                obj(&[("file", v_str(&file)), ("columns", json!(dupes))]),
            );
        }

        let mut table = Table::new(columns);
        for row in data {
            table.push_row(row);
        }
        Ok(table)
    }

    fn sanitize(&self, table: &mut Table, file: &str) {
        let dropped = table.drop_columns(&SENSITIVE_COLUMNS);
        if !dropped.is_empty() {
            self.logger.info(
                Domain::Normalize,
                "sensitive_columns_dropped",
                obj(&[("file", v_str(file)), ("columns", json!(dropped))]),
            );
        }

        for cell in table.cells_mut() {
            let replacement = match &*cell {
                Cell::Text(s) if NULL_SPELLINGS.contains(&s.trim()) => Some(Cell::Null),
                Cell::Text(s) if s.trim().len() != s.len() => Some(Cell::text(s.trim())),
                _ => None,
            };
            if let Some(r) = replacement {
                *cell = r;
            }
        }
    }

    fn validate(&self, table: &Table, file: &str) -> Result<()> {
        if table.is_empty() {
            return Err(ValidationError::NoData.into());
        }

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !table.has_column(c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingColumns(missing).into());
        }

        let rows = table.len() as f64;
        let sparse: Vec<&String> = table
            .columns()
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let nulls = table.rows().iter().filter(|r| r[*i].is_null()).count();
                nulls as f64 / rows > self.null_warn_fraction
            })
            .map(|(_, c)| c)
            .collect();
        if !sparse.is_empty() {
            self.logger.warn(
                Domain::Normalize,
                "sparse_columns",
                obj(&[("file", v_str(file)), ("columns", json!(sparse))]),
            );
        }

        let negative_qty = table
            .numbers(QUANTITY)
            .map(|q| q.iter().filter(|v| matches!(v, Some(x) if *x < 0.0)).count())
            .unwrap_or(0);
        if negative_qty > 0 {
            self.logger.warn(
                Domain::Normalize,
                "negative_quantities",
                obj(&[("file", v_str(file)), ("rows", v_int(negative_qty as u64))]),
            );
        }
        Ok(())
    }
}

fn coerce_numeric(table: &mut Table) {
    table.map_columns(&NUMERIC_COLUMNS, |cell| {
        let coerced = match cell {
            Cell::Number(n) if n.is_finite() => Cell::Number(*n),
            Cell::Text(s) => Cell::from(parse_amount(s)),
            _ => Cell::Null,
        };
        *cell = coerced;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FileKind, FileManifest};

    fn raw(rows: Vec<Vec<&str>>) -> RawTable {
        RawTable {
            manifest: FileManifest {
                name: "test.csv".to_string(),
                kind: FileKind::Csv,
                size_bytes: 0,
                hash_sha256: String::new(),
            },
            rows: rows
                .into_iter()
                .map(|r| {
                    r.into_iter()
                        .map(|v| if v.is_empty() { Cell::Null } else { Cell::text(v) })
                        .collect()
                })
                .collect(),
        }
    }

    fn normalizer() -> SchemaNormalizer {
        SchemaNormalizer::new(Logger::null())
    }

    #[test]
    fn title_case_matches_broker_headers() {
        assert_eq!(title_case("realized p&l"), "Realized P&L");
        assert_eq!(title_case("BUY VALUE"), "Buy Value");
        assert_eq!(title_case("trade_time"), "Trade_Time");
        assert_eq!(title_case("PAN"), "Pan");
    }

    #[test]
    fn aliases_resolve_to_canonical_names() {
        assert_eq!(canonical_column_name(" tradingsymbol "), SYMBOL);
        assert_eq!(canonical_column_name("QTY"), QUANTITY);
        assert_eq!(canonical_column_name("p&l"), REALIZED_PNL);
        assert_eq!(canonical_column_name("Profit and Loss"), REALIZED_PNL);
        assert_eq!(canonical_column_name("Exchange"), EXCHANGE);
    }

    #[test]
    fn amounts_tolerate_broker_formatting() {
        assert_eq!(parse_amount("1,23,456.50"), Some(123456.5));
        assert_eq!(parse_amount("(100)"), Some(-100.0));
        assert_eq!(parse_amount(" -7 "), Some(-7.0));
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn normalizes_aliased_export() {
        let t = normalizer()
            .normalize(raw(vec![
                vec!["Tradingsymbol", "Qty", "Buy Amount", "Sell Amount", "P&L", "Client ID"],
                vec!["RELIANCE", "10", "2,500", "2,600", "100", "AB1234"],
                vec!["TCS", "5", "1500", "1400", "(100)", "AB1234"],
            ]))
            .unwrap();
        assert!(!t.has_column("Client Id"));
        assert_eq!(t.cell(0, BUY_VALUE), Some(&Cell::Number(2500.0)));
        assert_eq!(t.cell(1, REALIZED_PNL), Some(&Cell::Number(-100.0)));
        assert_eq!(t.cell(1, LOSS), Some(&Cell::Bool(true)));
    }

    #[test]
    fn null_spellings_become_null() {
        let t = normalizer()
            .normalize(raw(vec![
                vec!["Symbol", "Quantity", "Buy Value", "Sell Value", "Realized P&L", "Exchange"],
                vec!["INFY", "8", "2000", "2100", "nan", "  None "],
                vec![" HDFC ", "null", "1", "1", "0", "NSE"],
            ]))
            .unwrap();
        assert_eq!(t.cell(0, REALIZED_PNL), Some(&Cell::Null));
        assert_eq!(t.cell(0, EXCHANGE), Some(&Cell::Null));
        assert_eq!(t.cell(1, SYMBOL), Some(&Cell::text("HDFC")));
        assert_eq!(t.cell(1, QUANTITY), Some(&Cell::Null));
    }

    #[test]
    fn missing_required_columns_listed() {
        let err = normalizer()
            .normalize(raw(vec![vec!["Symbol", "Quantity"], vec!["TCS", "5"]]))
            .unwrap_err();
        match err {
            crate::error::JournalError::Validation(ValidationError::MissingColumns(cols)) => {
                assert_eq!(cols, vec![BUY_VALUE, SELL_VALUE, REALIZED_PNL]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn header_only_file_has_no_data() {
        let err = normalizer()
            .normalize(raw(vec![vec!["Symbol", "Quantity", "Buy Value", "Sell Value", "Realized P&L"]]))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::JournalError::Validation(ValidationError::NoData)
        ));
    }

    #[test]
    fn negative_quantity_kept_and_logged() {
        let log = Logger::memory();
        let t = SchemaNormalizer::new(log.clone())
            .normalize(raw(vec![
                vec!["Symbol", "Quantity", "Buy Value", "Sell Value", "Realized P&L"],
                vec!["NIFTY FUT", "-50", "0", "1000", "1000"],
            ]))
            .unwrap();
        assert_eq!(t.cell(0, QUANTITY), Some(&Cell::Number(-50.0)));
        assert_eq!(t.cell(0, POSITION_SIZE), Some(&Cell::Number(50.0)));
        assert_eq!(log.events("negative_quantities").len(), 1);
    }
}
