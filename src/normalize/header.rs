use serde::Serialize;

use crate::table::Cell;

/// Exact, case-sensitive cell values that mark a header row.
pub const HEADER_TOKENS: [&str; 6] = [
    "Symbol",
    "Instrument",
    "Tradingsymbol",
    "Quantity",
    "Buy Value",
    "Realized P&L",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMethod {
    /// A header token was found in this row.
    Token,
    /// No token anywhere; first row dense enough in numbers.
    NumericDensity,
    /// Nothing matched; row 0 assumed.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderChoice {
    pub index: usize,
    pub method: HeaderMethod,
}

fn has_token(row: &[Cell]) -> bool {
    row.iter()
        .filter(|c| !c.is_null())
        .map(|c| c.to_string())
        .any(|v| HEADER_TOKENS.contains(&v.trim()))
}

fn numeric_fraction(row: &[Cell]) -> f64 {
    if row.is_empty() {
        return 0.0;
    }
    let numeric = row.iter().filter(|c| c.to_f64_lenient().is_some()).count();
    numeric as f64 / row.len() as f64
}

/// Picks the header row: tokens in row 0, then tokens in later rows, then the
/// first later row with `numeric_fraction >= threshold`, then row 0.
pub fn detect_header_row(rows: &[Vec<Cell>], threshold: f64) -> HeaderChoice {
    if rows.first().map(|r| has_token(r)).unwrap_or(false) {
        return HeaderChoice {
            index: 0,
            method: HeaderMethod::Token,
        };
    }

    if let Some(index) = rows.iter().skip(1).position(|r| has_token(r)) {
        return HeaderChoice {
            index: index + 1,
            method: HeaderMethod::Token,
        };
    }

    if let Some(index) = rows
        .iter()
        .skip(1)
        .position(|r| numeric_fraction(r) >= threshold)
    {
        return HeaderChoice {
            index: index + 1,
            method: HeaderMethod::NumericDensity,
        };
    }

    HeaderChoice {
        index: 0,
        method: HeaderMethod::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Vec<Cell> {
        values
            .iter()
            .map(|v| if v.is_empty() { Cell::Null } else { Cell::text(*v) })
            .collect()
    }

    #[test]
    fn first_row_header() {
        let rows = vec![row(&["Symbol", "Qty"]), row(&["TCS", "5"])];
        assert_eq!(
            detect_header_row(&rows, 0.7),
            HeaderChoice {
                index: 0,
                method: HeaderMethod::Token
            }
        );
    }

    #[test]
    fn header_below_preamble() {
        let rows = vec![
            row(&["Client ID: XY1234", "", ""]),
            row(&["P&L Statement", "", ""]),
            row(&["Symbol", "Quantity", "Realized P&L"]),
            row(&["TCS", "5", "-100"]),
        ];
        assert_eq!(detect_header_row(&rows, 0.7).index, 2);
    }

    #[test]
    fn tokens_match_after_trim_but_case_sensitive() {
        let rows = vec![row(&["x"]), row(&[" Buy Value "])];
        assert_eq!(detect_header_row(&rows, 0.7).index, 1);
        let rows = vec![row(&["x"]), row(&["symbol"])];
        assert_eq!(detect_header_row(&rows, 0.7).method, HeaderMethod::Default);
    }

    #[test]
    fn numeric_density_fallback_skips_row_zero() {
        let rows = vec![
            row(&["1", "2", "3"]),
            row(&["a", "b", "c"]),
            row(&["7", "8", "x"]),
            row(&["7", "8", "9"]),
        ];
        assert_eq!(
            detect_header_row(&rows, 0.7),
            HeaderChoice {
                index: 3,
                method: HeaderMethod::NumericDensity
            }
        );
    }

    #[test]
    fn nothing_matches_defaults_to_zero() {
        let rows = vec![row(&["a", "b"]), row(&["c", "d"])];
        assert_eq!(
            detect_header_row(&rows, 0.7),
            HeaderChoice {
                index: 0,
                method: HeaderMethod::Default
            }
        );
        assert_eq!(detect_header_row(&[], 0.7).index, 0);
    }
}
