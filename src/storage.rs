//! Local SQLite trade store, deduplicated by content fingerprint.
//!
//! Inserts are check-then-insert inside one transaction per `store` call.
//! Two processes writing the same file at once can still race on the check;
//! the UNIQUE index turns the loser's insert into a storage error.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

use crate::error::Result;
use crate::logging::{obj, v_int, v_num, v_str, Domain, Logger};
use crate::normalize::{
    BUY_AVERAGE, BUY_VALUE, EXCHANGE, QUANTITY, REALIZED_PNL, SELL_AVERAGE, SELL_VALUE, SYMBOL,
    TRADE_TYPE,
};
use crate::table::{Cell, Table};
use crate::trade::TradeRecord;

pub const TRADE_TIME: &str = "Trade Time";
pub const DATA_SOURCE: &str = "Data Source";
pub const FINGERPRINT: &str = "Fingerprint";
pub const CREATED_AT: &str = "Created At";

const SCHEMA: &str = "BEGIN;
    CREATE TABLE IF NOT EXISTS trades (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol TEXT NOT NULL,
        quantity REAL,
        buy_value REAL,
        sell_value REAL,
        realized_pnl REAL,
        buy_average REAL,
        sell_average REAL,
        trade_type TEXT,
        exchange TEXT,
        trade_time TEXT,
        data_source TEXT NOT NULL,
        data_hash TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_trades_time ON trades(trade_time);
    CREATE INDEX IF NOT EXISTS idx_trades_source ON trades(data_source);
    CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        target TEXT,
        record_id INTEGER,
        ts TEXT NOT NULL,
        details TEXT
    );
    COMMIT;";

const TRADE_COLUMNS: &str = "id, symbol, quantity, buy_value, sell_value, realized_pnl, \
     buy_average, sell_average, trade_type, exchange, trade_time, data_source, data_hash, created_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrade {
    pub id: i64,
    #[serde(flatten)]
    pub record: TradeRecord,
    pub fingerprint: String,
    pub data_source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBreakdown {
    pub source: String,
    pub count: u64,
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub total_trades: u64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate: f64,
    pub sources: Vec<SourceBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub ok: bool,
    pub duplicate_fingerprints: u64,
    /// Rows where `buy_value - sell_value - realized_pnl` is off by more than 0.01.
    pub inconsistent_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub action: String,
    pub target: Option<String>,
    pub record_id: Option<i64>,
    pub ts: String,
    pub details: Option<String>,
}

pub struct IntegrityStore {
    conn: Connection,
    logger: Logger,
}

impl IntegrityStore {
    /// Opens (creating directories and schema as needed) the store at `path`.
    pub fn open(path: &Path, logger: Logger) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut store = Self {
            conn: Connection::open(path)?,
            logger,
        };
        store.init()?;
        store.logger.info(
            Domain::Store,
            "store_opened",
            obj(&[("path", v_str(&path.display().to_string()))]),
        );
        Ok(store)
    }

    pub fn open_in_memory(logger: Logger) -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
            logger,
        };
        store.init()?;
        Ok(store)
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Inserts every row whose fingerprint is new; returns how many were inserted.
    pub fn store(&mut self, table: &Table, source: &str) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;
        for record in TradeRecord::from_table(table) {
            let hash = record.fingerprint();
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM trades WHERE data_hash = ?1",
                    params![hash],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                continue;
            }
            tx.execute(
                "INSERT INTO trades (symbol, quantity, buy_value, sell_value, realized_pnl,
                     buy_average, sell_average, trade_type, exchange, trade_time,
                     data_source, data_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.symbol,
                    record.quantity,
                    record.buy_value,
                    record.sell_value,
                    record.realized_pnl,
                    record.buy_average,
                    record.sell_average,
                    record.trade_type,
                    record.exchange,
                    record.trade_time,
                    source,
                    hash,
                    now,
                ],
            )?;
            inserted += 1;
        }
        let details = format!(
            "inserted {} of {} rows from {}",
            inserted,
            table.len(),
            source
        );
        tx.execute(
            "INSERT INTO audit_log (action, target, record_id, ts, details) VALUES (?1, ?2, NULL, ?3, ?4)",
            params!["STORE", "trades", now, details],
        )?;
        tx.commit()?;

        self.logger.info(
            Domain::Store,
            "trades_stored",
            obj(&[
                ("source", v_str(source)),
                ("rows", v_int(table.len() as u64)),
                ("inserted", v_int(inserted as u64)),
                ("duplicates", v_int((table.len() - inserted) as u64)),
            ]),
        );
        Ok(inserted)
    }

    /// Stored trades, newest `trade_time` first. A limit of 0 means no limit.
    pub fn retrieve_trades(&self, limit: Option<usize>, source: Option<&str>) -> Result<Vec<StoredTrade>> {
        let mut sql = format!("SELECT {} FROM trades WHERE 1=1", TRADE_COLUMNS);
        let mut args: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(source) = source {
            sql.push_str(" AND data_source = ?");
            args.push(source.to_string().into());
        }
        sql.push_str(" ORDER BY trade_time DESC, id DESC");
        if let Some(limit) = limit.filter(|n| *n > 0) {
            sql.push_str(" LIMIT ?");
            args.push((limit as i64).into());
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), |row| {
            Ok(StoredTrade {
                id: row.get(0)?,
                record: TradeRecord {
                    symbol: row.get(1)?,
                    quantity: row.get(2)?,
                    buy_value: row.get(3)?,
                    sell_value: row.get(4)?,
                    realized_pnl: row.get(5)?,
                    buy_average: row.get(6)?,
                    sell_average: row.get(7)?,
                    trade_type: row.get(8)?,
                    exchange: row.get(9)?,
                    trade_time: row.get(10)?,
                },
                data_source: row.get(11)?,
                fingerprint: row.get(12)?,
                created_at: row.get(13)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Same as [`retrieve_trades`](Self::retrieve_trades), laid out in canonical column names.
    pub fn retrieve(&self, limit: Option<usize>, source: Option<&str>) -> Result<Table> {
        Ok(trades_to_table(&self.retrieve_trades(limit, source)?))
    }

    pub fn statistics(&self) -> Result<AggregateReport> {
        let (total, total_pnl, avg_win, avg_loss, wins, losses): (
            i64,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            i64,
            i64,
        ) = self.conn.query_row(
            "SELECT
                COUNT(*),
                SUM(realized_pnl),
                AVG(CASE WHEN realized_pnl > 0 THEN realized_pnl END),
                AVG(CASE WHEN realized_pnl < 0 THEN realized_pnl END),
                COUNT(CASE WHEN realized_pnl > 0 THEN 1 END),
                COUNT(CASE WHEN realized_pnl < 0 THEN 1 END)
             FROM trades",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT data_source, COUNT(*) AS n, SUM(realized_pnl)
             FROM trades GROUP BY data_source ORDER BY n DESC, data_source ASC",
        )?;
        let sources = stmt
            .query_map([], |r| {
                Ok(SourceBreakdown {
                    source: r.get(0)?,
                    count: r.get::<_, i64>(1)? as u64,
                    pnl: r.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(AggregateReport {
            total_trades: total as u64,
            total_pnl: total_pnl.unwrap_or(0.0),
            avg_win: avg_win.unwrap_or(0.0),
            avg_loss: avg_loss.unwrap_or(0.0),
            winning_trades: wins as u64,
            losing_trades: losses as u64,
            win_rate: if total > 0 {
                wins as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            sources,
        })
    }

    /// Writes a consistent copy of the database to `dest`.
    pub fn backup(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let dest_str = dest.display().to_string();
        self.conn.execute("VACUUM INTO ?1", params![dest_str])?;
        self.audit("BACKUP", "database", None, &format!("database backed up to {}", dest_str))?;
        self.logger.info(
            Domain::Store,
            "backup_written",
            obj(&[("path", v_str(&dest_str))]),
        );
        Ok(())
    }

    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let duplicate_fingerprints: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT data_hash FROM trades GROUP BY data_hash HAVING COUNT(*) > 1
             )",
            [],
            |r| r.get(0),
        )?;
        let inconsistent_rows: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trades
             WHERE ABS(buy_value - sell_value - realized_pnl) > 0.01",
            [],
            |r| r.get(0),
        )?;

        if duplicate_fingerprints > 0 {
            self.logger.warn(
                Domain::Store,
                "duplicate_fingerprints",
                obj(&[("groups", v_int(duplicate_fingerprints as u64))]),
            );
        }
        if inconsistent_rows > 0 {
            self.logger.warn(
                Domain::Store,
                "inconsistent_rows",
                obj(&[("rows", v_int(inconsistent_rows as u64))]),
            );
        }
        Ok(IntegrityReport {
            ok: duplicate_fingerprints == 0,
            duplicate_fingerprints: duplicate_fingerprints as u64,
            inconsistent_rows: inconsistent_rows as u64,
        })
    }

    /// Audit log, newest first.
    pub fn audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, action, target, record_id, ts, details
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit as i64], |r| {
                Ok(AuditEvent {
                    id: r.get(0)?,
                    action: r.get(1)?,
                    target: r.get(2)?,
                    record_id: r.get(3)?,
                    ts: r.get(4)?,
                    details: r.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn audit(&self, action: &str, target: &str, record_id: Option<i64>, details: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_log (action, target, record_id, ts, details) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![action, target, record_id, Utc::now().to_rfc3339(), details],
        )?;
        self.logger.info(
            Domain::Audit,
            action,
            obj(&[("target", v_str(target)), ("details", v_str(details))]),
        );
        Ok(())
    }

    pub fn trade_count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))?;
        Ok(n as u64)
    }
}

pub fn trades_to_table(trades: &[StoredTrade]) -> Table {
    let mut table = Table::with_columns(&[
        SYMBOL,
        QUANTITY,
        BUY_VALUE,
        SELL_VALUE,
        REALIZED_PNL,
        BUY_AVERAGE,
        SELL_AVERAGE,
        TRADE_TYPE,
        EXCHANGE,
        TRADE_TIME,
        DATA_SOURCE,
        FINGERPRINT,
        CREATED_AT,
    ]);
    for t in trades {
        let r = &t.record;
        table.push_row(vec![
            Cell::text(r.symbol.clone()),
            r.quantity.into(),
            r.buy_value.into(),
            r.sell_value.into(),
            r.realized_pnl.into(),
            r.buy_average.into(),
            r.sell_average.into(),
            r.trade_type.clone().into(),
            r.exchange.clone().into(),
            r.trade_time.clone().into(),
            Cell::text(t.data_source.clone()),
            Cell::text(t.fingerprint.clone()),
            Cell::text(t.created_at.clone()),
        ]);
    }
    table
}

/// Log-friendly summary of a report, used by the CLI.
pub fn report_fields(report: &AggregateReport) -> serde_json::Map<String, serde_json::Value> {
    obj(&[
        ("total_trades", v_int(report.total_trades)),
        ("total_pnl", v_num(report.total_pnl)),
        ("win_rate", v_num(report.win_rate)),
        ("sources", json!(report.sources.len())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_trade(symbol: &str, pnl: f64, time: &str) -> Table {
        let mut t = Table::with_columns(&[
            "Symbol",
            "Quantity",
            "Buy Value",
            "Sell Value",
            "Realized P&L",
            "Time",
        ]);
        t.push_row(vec![
            symbol.into(),
            1.0.into(),
            100.0.into(),
            (100.0 + pnl).into(),
            pnl.into(),
            time.into(),
        ]);
        t
    }

    #[test]
    fn duplicate_rows_in_one_call_insert_once() {
        let mut store = IntegrityStore::open_in_memory(Logger::null()).unwrap();
        let mut t = one_trade("TCS", 5.0, "2024-01-01 09:15:00");
        let row = t.rows()[0].clone();
        t.push_row(row);
        assert_eq!(store.store(&t, "upload").unwrap(), 1);
        assert_eq!(store.trade_count().unwrap(), 1);
    }

    #[test]
    fn retrieve_orders_newest_first_and_filters() {
        let mut store = IntegrityStore::open_in_memory(Logger::null()).unwrap();
        store.store(&one_trade("A", 1.0, "2024-01-01 09:15:00"), "csv").unwrap();
        store.store(&one_trade("B", 2.0, "2024-03-01 09:15:00"), "gmail").unwrap();
        store.store(&one_trade("C", 3.0, "2024-02-01 09:15:00"), "csv").unwrap();

        let all = store.retrieve_trades(None, None).unwrap();
        let symbols: Vec<&str> = all.iter().map(|t| t.record.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["B", "C", "A"]);

        let csv = store.retrieve(Some(1), Some("csv")).unwrap();
        assert_eq!(csv.len(), 1);
        assert_eq!(csv.cell(0, SYMBOL), Some(&Cell::text("C")));
        assert_eq!(csv.cell(0, DATA_SOURCE), Some(&Cell::text("csv")));
    }

    #[test]
    fn zero_limit_returns_everything() {
        let mut store = IntegrityStore::open_in_memory(Logger::null()).unwrap();
        store.store(&one_trade("A", 1.0, "t1"), "csv").unwrap();
        store.store(&one_trade("B", 2.0, "t2"), "csv").unwrap();
        assert_eq!(store.retrieve_trades(Some(0), None).unwrap().len(), 2);
    }

    #[test]
    fn unparsed_quantity_round_trips_without_reinsert() {
        let mut store = IntegrityStore::open_in_memory(Logger::null()).unwrap();
        let mut t = one_trade("INFY", 5.0, "2024-01-02 09:15:00");
        t.set_column(QUANTITY, vec![Cell::Null]);
        assert_eq!(store.store(&t, "csv").unwrap(), 1);

        let stored = store.retrieve_trades(None, None).unwrap();
        assert_eq!(stored[0].record.quantity, None);
        assert_eq!(stored[0].record.fingerprint(), stored[0].fingerprint);

        let back = store.retrieve(None, None).unwrap();
        assert_eq!(store.store(&back, "replay").unwrap(), 0);
        assert_eq!(store.trade_count().unwrap(), 1);
    }

    #[test]
    fn statistics_break_down_by_source() {
        let mut store = IntegrityStore::open_in_memory(Logger::null()).unwrap();
        store.store(&one_trade("A", 10.0, "t1"), "csv").unwrap();
        store.store(&one_trade("B", -4.0, "t2"), "csv").unwrap();
        store.store(&one_trade("C", 6.0, "t3"), "broker").unwrap();

        let s = store.statistics().unwrap();
        assert_eq!(s.total_trades, 3);
        assert_eq!(s.total_pnl, 12.0);
        assert_eq!(s.winning_trades, 2);
        assert_eq!(s.losing_trades, 1);
        assert_eq!(s.avg_win, 8.0);
        assert_eq!(s.avg_loss, -4.0);
        assert_eq!(s.sources[0].source, "csv");
        assert_eq!(s.sources[0].count, 2);
        assert_eq!(s.sources[0].pnl, 6.0);
    }

    #[test]
    fn empty_store_statistics_are_zero() {
        let store = IntegrityStore::open_in_memory(Logger::null()).unwrap();
        let s = store.statistics().unwrap();
        assert_eq!(s.total_trades, 0);
        assert_eq!(s.total_pnl, 0.0);
        assert_eq!(s.win_rate, 0.0);
        assert!(s.sources.is_empty());
    }

    #[test]
    fn integrity_flags_inconsistent_rows() {
        let mut store = IntegrityStore::open_in_memory(Logger::null()).unwrap();
        // buy - sell - pnl = 100 - 110 - 10 = -20
        store.store(&one_trade("A", 10.0, "t1"), "csv").unwrap();
        let r = store.verify_integrity().unwrap();
        assert!(r.ok);
        assert_eq!(r.duplicate_fingerprints, 0);
        assert_eq!(r.inconsistent_rows, 1);
    }

    #[test]
    fn store_calls_are_audited() {
        let mut store = IntegrityStore::open_in_memory(Logger::null()).unwrap();
        store.store(&one_trade("A", 1.0, "t1"), "csv").unwrap();
        store.store(&one_trade("A", 1.0, "t1"), "gmail").unwrap();
        let events = store.audit_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "STORE");
        assert_eq!(events[0].details.as_deref(), Some("inserted 0 of 1 rows from gmail"));
    }
}
