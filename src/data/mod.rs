//! File intake: validation, integrity hashing and raw tabular reads.

mod delimited;
mod workbook;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_MAX_FILE_MB;
use crate::error::{JournalError, Result, SecurityError};
use crate::logging::{obj, v_int, v_str, Domain, Logger};
use crate::table::Cell;

pub const SUPPORTED_EXTENSIONS: [&str; 3] = [".csv", ".xlsx", ".xls"];

/// Where an upload comes from. Both variants reduce to (name, extension, bytes).
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Bytes { name: Option<String>, data: Vec<u8> },
}

impl FileSource {
    pub fn path(p: impl Into<PathBuf>) -> Self {
        FileSource::Path(p.into())
    }

    pub fn bytes(name: Option<&str>, data: impl Into<Vec<u8>>) -> Self {
        FileSource::Bytes {
            name: name.map(str::to_string),
            data: data.into(),
        }
    }

    /// Drains a reader (an upload stream, stdin, ...) into a byte source.
    pub fn from_reader<R: Read>(name: Option<&str>, mut reader: R) -> std::io::Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Self::bytes(name, data))
    }

    pub fn display_name(&self) -> String {
        match self {
            FileSource::Path(p) => p
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("uploaded_file")
                .to_string(),
            FileSource::Bytes { name: Some(n), .. } => Path::new(n)
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or(n)
                .to_string(),
            FileSource::Bytes { name: None, .. } => "uploaded_file".to_string(),
        }
    }

    /// Lowercased extension with its dot; `.bin` for a nameless stream.
    pub fn extension(&self) -> String {
        let name = match self {
            FileSource::Path(p) => p.to_string_lossy().to_string(),
            FileSource::Bytes { name: Some(n), .. } => n.clone(),
            FileSource::Bytes { name: None, .. } => return ".bin".to_string(),
        };
        Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Xlsx,
    Xls,
}

impl FileKind {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".csv" => Some(FileKind::Csv),
            ".xlsx" => Some(FileKind::Xlsx),
            ".xls" => Some(FileKind::Xls),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManifest {
    pub name: String,
    pub kind: FileKind,
    pub size_bytes: u64,
    pub hash_sha256: String,
}

impl FileManifest {
    pub fn hash_prefix(&self) -> &str {
        &self.hash_sha256[..16.min(self.hash_sha256.len())]
    }
}

/// Raw rows exactly as read, no header interpretation.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub manifest: FileManifest,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

pub struct FileIngestor {
    max_bytes: u64,
    logger: Logger,
}

impl FileIngestor {
    pub fn new(logger: Logger) -> Self {
        Self {
            max_bytes: DEFAULT_MAX_FILE_MB * 1024 * 1024,
            logger,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Validates and hashes the source without parsing it.
    pub fn manifest(&self, source: &FileSource) -> Result<FileManifest> {
        let (manifest, _) = self.accept(source)?;
        Ok(manifest)
    }

    pub fn load(&self, source: &FileSource) -> Result<RawTable> {
        let (manifest, bytes) = self.accept(source)?;
        let rows = match manifest.kind {
            FileKind::Csv => delimited::read_rows(&bytes),
            FileKind::Xlsx | FileKind::Xls => workbook::read_first_sheet(bytes),
        }
        .map_err(|reason| {
            self.logger.error(
                Domain::Ingest,
                "parse_failed",
                obj(&[("file", v_str(&manifest.name)), ("reason", v_str(&reason))]),
            );
            JournalError::parse(&manifest.name, reason)
        })?;

        let raw = RawTable { manifest, rows };
        self.logger.info(
            Domain::Ingest,
            "file_loaded",
            obj(&[
                ("file", v_str(&raw.manifest.name)),
                ("rows", v_int(raw.rows.len() as u64)),
                ("cols", v_int(raw.width() as u64)),
            ]),
        );
        Ok(raw)
    }

    fn accept(&self, source: &FileSource) -> Result<(FileManifest, Vec<u8>)> {
        let result = self.check(source);
        if let Err(err) = &result {
            self.logger.error(
                Domain::Ingest,
                "security_check_failed",
                obj(&[
                    ("file", v_str(&source.display_name())),
                    ("reason", v_str(&err.to_string())),
                ]),
            );
        }
        let (name, kind, bytes) = result?;
        let hash = bytes_sha256(&bytes);
        let manifest = FileManifest {
            name,
            kind,
            size_bytes: bytes.len() as u64,
            hash_sha256: hash,
        };
        self.logger.info(
            Domain::Ingest,
            "security_check_passed",
            obj(&[
                ("file", v_str(&manifest.name)),
                ("hash_prefix", v_str(manifest.hash_prefix())),
                ("size_bytes", v_int(manifest.size_bytes)),
            ]),
        );
        Ok((manifest, bytes))
    }

    fn check(&self, source: &FileSource) -> std::result::Result<(String, FileKind, Vec<u8>), SecurityError> {
        let name = source.display_name();
        let size = match source {
            FileSource::Path(p) => {
                if !p.exists() {
                    return Err(SecurityError::FileNotFound(name));
                }
                std::fs::metadata(p)
                    .map_err(|e| SecurityError::Unreadable {
                        name: name.clone(),
                        reason: e.to_string(),
                    })?
                    .len()
            }
            FileSource::Bytes { data, .. } => data.len() as u64,
        };
        if size > self.max_bytes {
            return Err(SecurityError::FileTooLarge {
                name,
                size,
                limit: self.max_bytes,
            });
        }
        let ext = source.extension();
        let kind = FileKind::from_extension(&ext).ok_or_else(|| SecurityError::UnsupportedType {
            name: name.clone(),
            ext: if ext.is_empty() { "(none)".to_string() } else { ext.clone() },
        })?;
        let bytes = match source {
            FileSource::Path(p) => read_all(p).map_err(|e| SecurityError::Unreadable {
                name: name.clone(),
                reason: e.to_string(),
            })?,
            FileSource::Bytes { data, .. } => data.clone(),
        };
        Ok((name, kind, bytes))
    }
}

fn read_all(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn bytes_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
