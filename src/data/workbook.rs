use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::io::Cursor;

use crate::table::Cell;

/// Reads the first worksheet of an XLSX/XLS workbook.
pub(super) fn read_first_sheet(bytes: Vec<u8>) -> Result<Vec<Vec<Cell>>, String> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "workbook has no worksheets".to_string())?
        .map_err(|e| e.to_string())?;

    let rows = range
        .rows()
        .map(|row| row.iter().map(to_cell).collect::<Vec<_>>())
        .filter(|row: &Vec<Cell>| row.iter().any(|c| !c.is_null()))
        .collect();
    Ok(rows)
}

fn to_cell(value: &Data) -> Cell {
    match value {
        Data::Empty | Data::Error(_) => Cell::Null,
        Data::String(s) if s.is_empty() => Cell::Null,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(Cell::Timestamp)
            .unwrap_or(Cell::Null),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

/// Excel day serial (1900 date system, epoch 1899-12-30) to a naive timestamp.
pub(super) fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_dates_convert() {
        let ts = excel_serial_to_datetime(45306.4375).unwrap();
        assert_eq!(ts.to_string(), "2024-01-15 10:30:00");
    }

    #[test]
    fn garbage_bytes_fail_to_open() {
        assert!(read_first_sheet(b"not a workbook".to_vec()).is_err());
    }
}
