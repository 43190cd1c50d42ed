//! Append-only sinks for per-step performance records.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::models::PerformanceRecord;

pub trait PerformanceJournal: Send {
    fn append(&mut self, record: &PerformanceRecord) -> Result<()>;

    /// Records written so far, in append order.
    fn records(&self) -> &[PerformanceRecord];
}

/// Keeps records in memory only.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Vec<PerformanceRecord>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PerformanceJournal for MemoryJournal {
    fn append(&mut self, record: &PerformanceRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn records(&self) -> &[PerformanceRecord] {
        &self.records
    }
}

/// Keeps the whole log as one pretty-printed JSON array on disk, rewritten on
/// every append. An existing file is loaded and extended.
#[derive(Debug)]
pub struct JsonJournal {
    path: PathBuf,
    records: Vec<PerformanceRecord>,
}

impl JsonJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read journal {}", path.display()))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("Journal {} is not a record array", path.display()))?
            }
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), existing = records.len(), "Journal opened");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write journal {}", self.path.display()))
    }
}

impl PerformanceJournal for JsonJournal {
    fn append(&mut self, record: &PerformanceRecord) -> Result<()> {
        self.records.push(record.clone());
        self.flush()
    }

    fn records(&self) -> &[PerformanceRecord] {
        &self.records
    }
}
