use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::logging::{obj, v_str, Domain, Logger};
use crate::table::{Cell, Table};

use super::{BUY_VALUE, QUANTITY, REALIZED_PNL};

pub const WIN: &str = "Win";
pub const LOSS: &str = "Loss";
pub const BREAK_EVEN: &str = "Break_Even";
pub const RETURN_PERCENTAGE: &str = "Return_Percentage";
pub const POSITION_SIZE: &str = "Position_Size";
pub const AVG_ENTRY_PRICE: &str = "Avg_Entry_Price";
pub const DAY_OF_WEEK: &str = "Day_of_Week";
pub const MONTH: &str = "Month";
pub const HOUR: &str = "Hour";

const DATETIME_FORMATS: [&str; 11] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M",
    "%d-%b-%Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%d-%b-%Y", "%d %b %Y", "%Y%m%d",
];

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Adds every derived column whose inputs are present; missing inputs skip silently.
pub fn derive_fields(table: &mut Table, logger: &Logger) {
    let pnl = table.numbers(REALIZED_PNL);
    let buy = table.numbers(BUY_VALUE);
    let qty = table.numbers(QUANTITY);

    if let Some(pnl) = &pnl {
        let flag = |pred: fn(f64) -> bool| -> Vec<Cell> {
            pnl.iter()
                .map(|v| Cell::Bool(v.map(pred).unwrap_or(false)))
                .collect()
        };
        table.set_column(WIN, flag(|v| v > 0.0));
        table.set_column(LOSS, flag(|v| v < 0.0));
        table.set_column(BREAK_EVEN, flag(|v| v == 0.0));

        if let Some(buy) = &buy {
            let returns = pnl
                .iter()
                .zip(buy)
                .map(|(p, b)| match (p, b) {
                    (_, Some(b)) if *b == 0.0 => Cell::Number(0.0),
                    (Some(p), Some(b)) => Cell::Number(p / b * 100.0),
                    _ => Cell::Null,
                })
                .collect();
            table.set_column(RETURN_PERCENTAGE, returns);
        }
    }

    if let Some(qty) = &qty {
        table.set_column(
            POSITION_SIZE,
            qty.iter().map(|q| Cell::from(q.map(f64::abs))).collect(),
        );
        if let Some(buy) = &buy {
            let entry = qty
                .iter()
                .zip(buy)
                .map(|(q, b)| match (q, b) {
                    (Some(q), _) if *q == 0.0 => Cell::Number(0.0),
                    (Some(q), Some(b)) => Cell::Number(b / q),
                    _ => Cell::Null,
                })
                .collect();
            table.set_column(AVG_ENTRY_PRICE, entry);
        }
    }

    derive_time_fields(table, logger);
}

fn derive_time_fields(table: &mut Table, logger: &Logger) {
    let Some(col) = table
        .columns()
        .iter()
        .find(|c| {
            let lc = c.to_lowercase();
            lc.contains("date") || lc.contains("time")
        })
        .cloned()
    else {
        return;
    };

    let mut parsed = Vec::with_capacity(table.len());
    if let Some(cells) = table.column(&col) {
        for (row, cell) in cells.enumerate() {
            let ts = match cell {
                Cell::Null => None,
                Cell::Timestamp(ts) => Some(*ts),
                Cell::Text(s) => match parse_timestamp(s) {
                    Some(ts) => Some(ts),
                    None => {
                        logger.warn(
                            Domain::Normalize,
                            "time_parse_failed",
                            obj(&[
                                ("column", v_str(&col)),
                                ("row", serde_json::json!(row)),
                                ("msg", v_str("could not parse date/time column")),
                            ]),
                        );
                        return;
                    }
                },
                Cell::Number(_) | Cell::Bool(_) => {
                    logger.warn(
                        Domain::Normalize,
                        "time_parse_failed",
                        obj(&[
                            ("column", v_str(&col)),
                            ("row", serde_json::json!(row)),
                            ("msg", v_str("non-text value in date/time column")),
                        ]),
                    );
                    return;
                }
            };
            parsed.push(ts);
        }
    }

    table.set_column(&col, parsed.iter().map(|t| t.map(Cell::Timestamp).unwrap_or(Cell::Null)).collect());
    table.set_column(
        DAY_OF_WEEK,
        parsed
            .iter()
            .map(|t| match t {
                Some(t) => Cell::text(WEEKDAYS[t.weekday().num_days_from_monday() as usize]),
                None => Cell::Null,
            })
            .collect(),
    );
    table.set_column(
        MONTH,
        parsed
            .iter()
            .map(|t| match t {
                Some(t) => Cell::text(MONTHS[t.month0() as usize]),
                None => Cell::Null,
            })
            .collect(),
    );
    table.set_column(
        HOUR,
        parsed
            .iter()
            .map(|t| Cell::from(t.map(|t| t.hour() as f64)))
            .collect(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trades() -> Table {
        let mut t = Table::with_columns(&["Symbol", "Quantity", "Buy Value", "Realized P&L", "Time"]);
        t.push_row(vec![
            "RELIANCE".into(),
            10.0.into(),
            2500.0.into(),
            100.0.into(),
            "2024-01-15 10:30:00".into(),
        ]);
        t.push_row(vec![
            "TCS".into(),
            0.0.into(),
            0.0.into(),
            (-50.0).into(),
            "2024-02-03 14:05:00".into(),
        ]);
        t.push_row(vec!["INFY".into(), Cell::Null, 800.0.into(), Cell::Null, Cell::Null]);
        t
    }

    #[test]
    fn flags_and_ratios() {
        let mut t = trades();
        derive_fields(&mut t, &Logger::null());
        assert_eq!(t.cell(0, WIN), Some(&Cell::Bool(true)));
        assert_eq!(t.cell(1, LOSS), Some(&Cell::Bool(true)));
        // null P&L sets no flag
        assert_eq!(t.cell(2, WIN), Some(&Cell::Bool(false)));
        assert_eq!(t.cell(2, LOSS), Some(&Cell::Bool(false)));
        assert_eq!(t.cell(2, BREAK_EVEN), Some(&Cell::Bool(false)));

        assert_eq!(t.cell(0, RETURN_PERCENTAGE), Some(&Cell::Number(4.0)));
        assert_eq!(t.cell(1, RETURN_PERCENTAGE), Some(&Cell::Number(0.0)));
        assert_eq!(t.cell(2, RETURN_PERCENTAGE), Some(&Cell::Null));

        assert_eq!(t.cell(0, AVG_ENTRY_PRICE), Some(&Cell::Number(250.0)));
        assert_eq!(t.cell(1, AVG_ENTRY_PRICE), Some(&Cell::Number(0.0)));
        assert_eq!(t.cell(2, POSITION_SIZE), Some(&Cell::Null));
    }

    #[test]
    fn time_fields_from_first_time_column() {
        let mut t = trades();
        derive_fields(&mut t, &Logger::null());
        assert_eq!(t.cell(0, DAY_OF_WEEK), Some(&Cell::text("Monday")));
        assert_eq!(t.cell(1, MONTH), Some(&Cell::text("February")));
        assert_eq!(t.cell(1, HOUR), Some(&Cell::Number(14.0)));
        assert_eq!(t.cell(2, HOUR), Some(&Cell::Null));
        assert!(matches!(t.cell(0, "Time"), Some(Cell::Timestamp(_))));
    }

    #[test]
    fn unparseable_time_skips_fields() {
        let log = Logger::memory();
        let mut t = Table::with_columns(&["Trade Date", "Realized P&L"]);
        t.push_row(vec!["yesterday-ish".into(), 1.0.into()]);
        derive_fields(&mut t, &log);
        assert!(!t.has_column(DAY_OF_WEEK));
        assert_eq!(t.cell(0, "Trade Date"), Some(&Cell::text("yesterday-ish")));
        assert_eq!(log.events("time_parse_failed").len(), 1);
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2024-01-15T10:30:00+05:30").is_some());
        assert!(parse_timestamp("15-01-2024").is_some());
        assert!(parse_timestamp("15-Jan-2024 09:15:00").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }
}
