use crate::config::PipelineConfig;
use crate::error::Result;
use crate::ingestion::{CellValue, RawTable};
use crate::reconciler::CanonicalTable;
use log::debug;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// SHA-256 digest of a load's inputs: every table's identifier, headers and
/// cells, plus the configuration they are reconciled under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputFingerprint([u8; 32]);

impl InputFingerprint {
    pub fn compute(tables: &[RawTable], config: &PipelineConfig) -> Result<Self> {
        let mut hasher = Sha256::new();

        hasher.update(serde_json::to_vec(config)?);
        hasher.update((tables.len() as u64).to_le_bytes());

        for table in tables {
            update_str(&mut hasher, &table.source_id);
            hasher.update((table.headers.len() as u64).to_le_bytes());
            for header in &table.headers {
                update_str(&mut hasher, header);
            }
            hasher.update((table.rows.len() as u64).to_le_bytes());
            for row in &table.rows {
                hasher.update((row.len() as u64).to_le_bytes());
                for cell in row {
                    update_cell(&mut hasher, cell);
                }
            }
        }

        Ok(Self(hasher.finalize().into()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for InputFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// Length-prefixed so adjacent strings cannot collide.
fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn update_cell(hasher: &mut Sha256, cell: &CellValue) {
    match cell {
        CellValue::Empty => hasher.update([0u8]),
        CellValue::Number(n) => {
            hasher.update([1u8]);
            hasher.update(n.to_bits().to_le_bytes());
        }
        CellValue::Text(s) => {
            hasher.update([2u8]);
            update_str(hasher, s);
        }
        CellValue::DateTime(ts) => {
            hasher.update([3u8]);
            hasher.update(ts.and_utc().timestamp_micros().to_le_bytes());
        }
    }
}

/// Memoizes reconciled tables per input fingerprint for the lifetime of a session.
#[derive(Debug, Default)]
pub struct LoadCache {
    entries: HashMap<InputFingerprint, Arc<CanonicalTable>>,
}

impl LoadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached table for these inputs, running `load` only on a miss.
    /// A failed load is not cached.
    pub fn get_or_load<F>(
        &mut self,
        tables: &[RawTable],
        config: &PipelineConfig,
        load: F,
    ) -> Result<Arc<CanonicalTable>>
    where
        F: FnOnce(&[RawTable], &PipelineConfig) -> Result<CanonicalTable>,
    {
        let fingerprint = InputFingerprint::compute(tables, config)?;

        if let Some(table) = self.entries.get(&fingerprint) {
            debug!("Load cache hit for {}", fingerprint);
            return Ok(Arc::clone(table));
        }

        debug!("Load cache miss for {}", fingerprint);
        let table = Arc::new(load(tables, config)?);
        self.entries.insert(fingerprint, Arc::clone(&table));
        Ok(table)
    }

    pub fn get(&self, fingerprint: &InputFingerprint) -> Option<Arc<CanonicalTable>> {
        self.entries.get(fingerprint).cloned()
    }

    pub fn invalidate(&mut self, fingerprint: &InputFingerprint) -> bool {
        self.entries.remove(fingerprint).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
