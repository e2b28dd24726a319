use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use trademirror::config::Config;
use trademirror::data::{FileIngestor, FileKind, FileSource};
use trademirror::logging::Logger;
use trademirror::metrics::MetricsEngine;
use trademirror::normalize::{SchemaNormalizer, DAY_OF_WEEK, HOUR, QUANTITY, REALIZED_PNL, SYMBOL};
use trademirror::table::Cell;
use trademirror::Journal;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("tradebook.xlsx")
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

#[test]
fn workbook_cells_keep_their_types() {
    let raw = FileIngestor::new(Logger::null())
        .load(&FileSource::path(fixture()))
        .unwrap();
    assert_eq!(raw.manifest.kind, FileKind::Xlsx);
    assert_eq!(raw.rows.len(), 4);
    assert_eq!(raw.rows[0][4], Cell::text("Realized P&L"));
    assert_eq!(raw.rows[1][0], Cell::text("RELIANCE"));
    assert_eq!(raw.rows[1][1], Cell::Number(10.0));
    assert_eq!(raw.rows[2][4], Cell::Number(-100.0));
    assert_eq!(raw.rows[1][5], Cell::Timestamp(at(2024, 1, 15, 10, 30)));
}

#[test]
fn workbook_normalizes_and_measures() {
    let raw = FileIngestor::new(Logger::null())
        .load(&FileSource::path(fixture()))
        .unwrap();
    let table = SchemaNormalizer::new(Logger::null()).normalize(raw).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.cell(2, SYMBOL), Some(&Cell::text("INFY")));
    assert_eq!(table.cell(1, QUANTITY), Some(&Cell::Number(5.0)));
    assert_eq!(table.cell(0, DAY_OF_WEEK), Some(&Cell::text("Monday")));
    assert_eq!(table.cell(2, HOUR), Some(&Cell::Number(9.0)));

    let m = MetricsEngine::new(Logger::null()).compute(&table).unwrap();
    assert_eq!(m.total_trades, 3);
    assert_eq!(m.total_pnl, 50.0);
    assert_eq!(m.win_rate, 66.67);
    assert_eq!(m.max_drawdown, -100.0);
    assert_eq!(m.best_single_trade, 100.0);
    assert_eq!(m.worst_single_trade, -100.0);
}

#[test]
fn workbook_upload_stores_formatted_trade_times() {
    let dir = TempDir::new().unwrap();
    let cfg = Config {
        db_path: dir.path().join("journal.db"),
        ..Config::default()
    };
    let bytes = fs::read(fixture()).unwrap();
    let mut journal = Journal::open(&cfg, Logger::null()).unwrap();
    let summary = journal
        .import(&FileSource::bytes(Some("Tradebook.XLSX"), bytes), "xlsx_upload")
        .unwrap();
    assert_eq!((summary.rows, summary.inserted), (3, 3));

    let trades = journal.store().retrieve_trades(Some(1), None).unwrap();
    assert_eq!(trades[0].record.symbol, "INFY");
    assert_eq!(trades[0].record.trade_time.as_deref(), Some("2024-01-17 09:45:00"));

    let stored = journal.stored_table(None).unwrap();
    assert_eq!(stored.cell(0, REALIZED_PNL), Some(&Cell::Number(100.0)));
}
