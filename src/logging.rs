//! Structured logging for the journal pipeline.
//!
//! Every record is one JSON line:
//! `{"ts", "run_id", "seq", "lvl", "component", "event", "msg", ..., "data"}`.
//!
//! A [`Logger`] is a cheap cloneable handle that is passed into each component
//! instead of living in a global. Sinks:
//! 1. stderr (CLI default, keeps stdout free for command output)
//! 2. an append-only JSONL file
//! 3. an in-memory buffer (tests)
//! 4. null

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
        }
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Level::parse(&v))
            .unwrap_or(Level::Info)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Ingest,    // File validation, hashing, raw reads
    Normalize, // Header detection, cleaning, coercion
    Store,     // Dedup decisions, retrieval, backups
    Metrics,   // Aggregate statistics
    Coach,     // Anonymized payloads for the coaching collaborator
    System,    // Startup, configuration
    Audit,     // Store events mirrored from the audit log
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Ingest => "ingest",
            Domain::Normalize => "normalize",
            Domain::Store => "store",
            Domain::Metrics => "metrics",
            Domain::Coach => "coach",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }
}

/// Which domains a logger emits. Parsed from `LOG_DOMAINS` ("all" or a comma list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainFilter {
    All,
    Only(Vec<String>),
}

impl DomainFilter {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s == "all" {
            return DomainFilter::All;
        }
        DomainFilter::Only(s.split(',').map(|d| d.trim().to_string()).collect())
    }

    fn allows(&self, domain: Domain) -> bool {
        match self {
            DomainFilter::All => true,
            DomainFilter::Only(list) => list.iter().any(|d| d == domain.as_str()),
        }
    }
}

// =============================================================================
// Logger handle
// =============================================================================

enum Sink {
    Stderr,
    File(Mutex<BufWriter<File>>),
    Memory(Mutex<Vec<Value>>),
    Null,
}

struct Inner {
    run_id: String,
    min_level: Level,
    seq: AtomicU64,
    sink: Sink,
}

/// Clones share the sink and sequence counter; the domain filter is per handle.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
    domains: DomainFilter,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("run_id", &self.inner.run_id)
            .field("min_level", &self.inner.min_level)
            .finish()
    }
}

impl Logger {
    fn with_sink(sink: Sink, min_level: Level, domains: DomainFilter) -> Self {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        Self {
            inner: Arc::new(Inner {
                run_id,
                min_level,
                seq: AtomicU64::new(0),
                sink,
            }),
            domains,
        }
    }

    pub fn stderr(min_level: Level) -> Self {
        Self::with_sink(Sink::Stderr, min_level, DomainFilter::All)
    }

    /// Appends JSON lines to `path`, creating parent directories.
    pub fn file(path: &Path, min_level: Level) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::with_sink(
            Sink::File(Mutex::new(BufWriter::new(file))),
            min_level,
            DomainFilter::All,
        ))
    }

    /// Captures every record; read back with [`Logger::records`].
    pub fn memory() -> Self {
        Self::with_sink(
            Sink::Memory(Mutex::new(Vec::new())),
            Level::Trace,
            DomainFilter::All,
        )
    }

    pub fn null() -> Self {
        Self::with_sink(Sink::Null, Level::Fatal, DomainFilter::All)
    }

    pub fn with_domains(mut self, domains: DomainFilter) -> Self {
        self.domains = domains;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn enabled(&self, level: Level, domain: Domain) -> bool {
        !matches!(self.inner.sink, Sink::Null)
            && level >= self.inner.min_level
            && self.domains.allows(domain)
    }

    /// Emit a structured log entry
    pub fn log(&self, level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
        if !self.enabled(level, domain) {
            return;
        }
        let record = self.build_record(level, domain.as_str(), event, fields);
        match &self.inner.sink {
            Sink::Stderr => eprintln!("{}", record),
            Sink::File(writer) => {
                if let Ok(mut w) = writer.lock() {
                    let _ = writeln!(w, "{}", record);
                    let _ = w.flush();
                }
            }
            Sink::Memory(buf) => {
                if let Ok(mut b) = buf.lock() {
                    b.push(record);
                }
            }
            Sink::Null => {}
        }
    }

    pub fn debug(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Debug, domain, event, fields);
    }

    pub fn info(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Info, domain, event, fields);
    }

    pub fn warn(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Warn, domain, event, fields);
    }

    pub fn error(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Error, domain, event, fields);
    }

    /// Records captured by a memory logger; empty for other sinks.
    pub fn records(&self) -> Vec<Value> {
        match &self.inner.sink {
            Sink::Memory(buf) => buf.lock().map(|b| b.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Memory records whose `event` equals `event`.
    pub fn events(&self, event: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|r| r.get("event").and_then(Value::as_str) == Some(event))
            .collect()
    }

    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn build_record(
        &self,
        level: Level,
        component: &str,
        event: &str,
        fields: Map<String, Value>,
    ) -> Value {
        let fields = sanitize_fields(fields);
        let (mut top, data) = split_fields(fields);

        let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
        let mut entry = Map::new();
        entry.insert("ts".to_string(), json!(ts_now()));
        entry.insert("run_id".to_string(), json!(self.inner.run_id.clone()));
        entry.insert("seq".to_string(), json!(self.next_seq()));
        entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
        entry.insert("component".to_string(), json!(component));
        entry.insert("event".to_string(), json!(event));
        entry.insert("msg".to_string(), msg);
        for (k, v) in top {
            entry.insert(k, v);
        }
        entry.insert("data".to_string(), Value::Object(data));
        Value::Object(entry)
    }
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["client_id", "order_id", "trade_id", "pan", "phone", "email"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["file", "source", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Helpers
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

pub fn v_int(n: u64) -> Value {
    json!(n)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("verbose"), None);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_memory_records_shape() {
        let log = Logger::memory();
        log.info(
            Domain::Ingest,
            "file_accepted",
            obj(&[("file", v_str("a.csv")), ("rows", v_int(3))]),
        );
        let recs = log.records();
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r["lvl"], "INFO");
        assert_eq!(r["component"], "ingest");
        assert_eq!(r["event"], "file_accepted");
        assert_eq!(r["file"], "a.csv");
        assert_eq!(r["data"]["rows"], 3);
        assert_eq!(r["seq"], 0);
    }

    #[test]
    fn test_sensitive_keys_redacted() {
        let log = Logger::memory();
        log.warn(
            Domain::Normalize,
            "row",
            obj(&[("client_id", v_str("AB1234")), ("pan", v_str("ABCDE1234F"))]),
        );
        let r = &log.records()[0];
        assert_eq!(r["data"]["client_id"], "[REDACTED]");
        assert_eq!(r["data"]["pan"], "[REDACTED]");
    }

    #[test]
    fn test_domain_filter() {
        let log = Logger::memory().with_domains(DomainFilter::parse("store,metrics"));
        log.info(Domain::Ingest, "skipped", Map::new());
        log.info(Domain::Store, "kept", Map::new());
        let recs = log.records();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0]["event"], "kept");
    }

    #[test]
    fn test_domain_filter_on_shared_logger() {
        let base = Logger::memory();
        let _held = base.clone();
        let store_only = base.clone().with_domains(DomainFilter::parse("store"));
        store_only.info(Domain::Ingest, "skipped", Map::new());
        store_only.info(Domain::Store, "kept", Map::new());
        base.info(Domain::Ingest, "unfiltered", Map::new());
        let events: Vec<_> = base.records().iter().map(|r| r["event"].clone()).collect();
        assert_eq!(events, vec!["kept", "unfiltered"]);
    }

    #[test]
    fn test_null_logger_is_silent() {
        let log = Logger::null();
        assert!(!log.enabled(Level::Fatal, Domain::System));
        log.error(Domain::System, "boom", Map::new());
        assert!(log.records().is_empty());
    }
}
