//! Wires intake, normalization, storage and metrics behind one handle.

use serde::Serialize;

use crate::coach::CoachingPayload;
use crate::config::Config;
use crate::data::{FileIngestor, FileManifest, FileSource};
use crate::error::Result;
use crate::logging::{obj, v_int, v_str, Domain, Logger};
use crate::metrics::{MetricsEngine, MetricsSnapshot};
use crate::normalize::{derive_fields, SchemaNormalizer};
use crate::storage::IntegrityStore;
use crate::table::Table;

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub file: String,
    pub sha256_prefix: String,
    pub source: String,
    pub rows: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

pub struct Journal {
    ingestor: FileIngestor,
    normalizer: SchemaNormalizer,
    store: IntegrityStore,
    metrics: MetricsEngine,
    logger: Logger,
}

impl Journal {
    pub fn open(config: &Config, logger: Logger) -> Result<Self> {
        let store = IntegrityStore::open(&config.db_path, logger.clone())?;
        Ok(Self::assemble(config, store, logger))
    }

    pub fn in_memory(config: &Config, logger: Logger) -> Result<Self> {
        let store = IntegrityStore::open_in_memory(logger.clone())?;
        Ok(Self::assemble(config, store, logger))
    }

    fn assemble(config: &Config, store: IntegrityStore, logger: Logger) -> Self {
        Self {
            ingestor: FileIngestor::new(logger.clone()).with_max_bytes(config.max_file_bytes),
            normalizer: SchemaNormalizer::new(logger.clone())
                .with_thresholds(config.header_numeric_threshold, config.null_warn_fraction),
            store,
            metrics: MetricsEngine::new(logger.clone()),
            logger,
        }
    }

    pub fn store(&self) -> &IntegrityStore {
        &self.store
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn manifest(&self, source: &FileSource) -> Result<FileManifest> {
        self.ingestor.manifest(source)
    }

    /// Loads and normalizes a file without touching the store.
    pub fn load(&self, source: &FileSource) -> Result<(FileManifest, Table)> {
        let raw = self.ingestor.load(source)?;
        let manifest = raw.manifest.clone();
        let table = self.normalizer.normalize(raw)?;
        Ok((manifest, table))
    }

    pub fn import(&mut self, source: &FileSource, tag: &str) -> Result<ImportSummary> {
        let (manifest, table) = self.load(source)?;
        let inserted = self.store.store(&table, tag)?;
        let summary = ImportSummary {
            file: manifest.name.clone(),
            sha256_prefix: manifest.hash_prefix().to_string(),
            source: tag.to_string(),
            rows: table.len(),
            inserted,
            duplicates: table.len() - inserted,
        };
        self.logger.info(
            Domain::System,
            "import_complete",
            obj(&[
                ("file", v_str(&summary.file)),
                ("source", v_str(tag)),
                ("rows", v_int(summary.rows as u64)),
                ("inserted", v_int(summary.inserted as u64)),
            ]),
        );
        Ok(summary)
    }

    /// Metrics over a file as uploaded; nothing is stored.
    pub fn analyze(&self, source: &FileSource) -> Result<(Table, MetricsSnapshot)> {
        let (_, table) = self.load(source)?;
        let snapshot = self.metrics.compute(&table)?;
        Ok((table, snapshot))
    }

    /// Stored trades, oldest first, with derived fields recomputed.
    pub fn stored_table(&self, source: Option<&str>) -> Result<Table> {
        let mut table = self.store.retrieve(None, source)?;
        table.reverse_rows();
        derive_fields(&mut table, &self.logger);
        Ok(table)
    }

    pub fn stored_metrics(&self, source: Option<&str>) -> Result<MetricsSnapshot> {
        let table = self.stored_table(source)?;
        self.metrics.compute(&table)
    }

    pub fn coaching_payload(&self, source: Option<&str>, recent: usize) -> Result<CoachingPayload> {
        let table = self.stored_table(source)?;
        let snapshot = self.metrics.compute(&table)?;
        let payload = CoachingPayload::new(snapshot, &table, recent);
        payload.log_prepared(&self.logger);
        Ok(payload)
    }
}
