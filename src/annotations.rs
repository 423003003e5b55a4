//! Free-text notes attached to rows of the comparison tables.
//!
//! Notes are keyed by `(table_key, row_key)`, where the row key is the label of
//! the row the note belongs to (a service, a month name, or `TOTALE`). The whole
//! set is loaded once, edited in memory and written back as a single overwrite.

use crate::aggregates::{Metric, ServiceFilter};
use crate::error::{Result, RevenueError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const REVENUE_TABLE_KEY: &str = "notes_incassi";
pub const TITLES_TABLE_KEY: &str = "notes_titoli";
pub const PROFITABILITY_TABLE_KEY: &str = "notes_redditivita";

/// Key of the notes attached to a monthly comparison for a given filter and metric.
pub fn monthly_table_key(filter: ServiceFilter, metric: Metric) -> String {
    format!(
        "notes_mensile_{}_{}",
        filter.label().replace(' ', "_"),
        metric.label().replace(' ', "_")
    )
}

/// One persisted note, as stored in a notes sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRow {
    pub table_key: String,
    pub row_index: String,
    pub note_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    tables: BTreeMap<String, BTreeMap<String, String>>,
}

impl Annotations {
    pub fn get(&self, table_key: &str, row_key: &str) -> Option<&str> {
        self.tables
            .get(table_key)
            .and_then(|rows| rows.get(row_key))
            .map(String::as_str)
    }

    pub fn set(
        &mut self,
        table_key: impl Into<String>,
        row_key: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.tables
            .entry(table_key.into())
            .or_default()
            .insert(row_key.into(), text.into());
    }

    pub fn table(&self, table_key: &str) -> Option<&BTreeMap<String, String>> {
        self.tables.get(table_key)
    }

    /// Flattened rows, skipping empty texts.
    pub fn rows(&self) -> Vec<NoteRow> {
        self.tables
            .iter()
            .flat_map(|(table_key, rows)| {
                rows.iter()
                    .filter(|(_, text)| !text.trim().is_empty())
                    .map(move |(row_index, text)| NoteRow {
                        table_key: table_key.clone(),
                        row_index: row_index.clone(),
                        note_text: text.clone(),
                    })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }
}

impl FromIterator<NoteRow> for Annotations {
    fn from_iter<I: IntoIterator<Item = NoteRow>>(iter: I) -> Self {
        let mut notes = Annotations::default();
        for row in iter {
            notes.set(row.table_key, row.row_index, row.note_text);
        }
        notes
    }
}

/// Persistence backend for the notes set.
pub trait AnnotationStore {
    fn load(&self) -> Result<Annotations>;
    /// Replaces everything previously stored.
    fn save(&self, notes: &Annotations) -> Result<()>;
}

/// In-process store, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    notes: RwLock<Annotations>,
}

impl MemoryStore {
    pub fn new(notes: Annotations) -> Self {
        Self {
            notes: RwLock::new(notes),
        }
    }
}

impl AnnotationStore for MemoryStore {
    fn load(&self) -> Result<Annotations> {
        self.notes
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| RevenueError::AnnotationStore("notes lock poisoned".into()))
    }

    fn save(&self, notes: &Annotations) -> Result<()> {
        let mut guard = self
            .notes
            .write()
            .map_err(|_| RevenueError::AnnotationStore("notes lock poisoned".into()))?;
        *guard = notes.clone();
        Ok(())
    }
}

/// A notes sheet kept as a CSV file with a `table_key,row_index,note_text` header.
#[derive(Debug, Clone)]
pub struct CsvSheetStore {
    path: PathBuf,
}

impl CsvSheetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn store_error(&self, action: &str, err: impl std::fmt::Display) -> RevenueError {
        RevenueError::AnnotationStore(format!(
            "failed to {} {}: {}",
            action,
            self.path.display(),
            err
        ))
    }
}

impl AnnotationStore for CsvSheetStore {
    fn load(&self) -> Result<Annotations> {
        if !self.path.exists() {
            debug!("No notes sheet at {}, starting empty", self.path.display());
            return Ok(Annotations::default());
        }

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.store_error("open", e))?;

        let mut notes = Annotations::default();
        for record in rdr.records() {
            let record = record.map_err(|e| self.store_error("read", e))?;
            let table_key = record.get(0).unwrap_or("").trim();
            let row_index = record.get(1).unwrap_or("").trim();
            if table_key.is_empty() || row_index.is_empty() {
                continue;
            }
            notes.set(table_key, row_index, record.get(2).unwrap_or(""));
        }

        Ok(notes)
    }

    fn save(&self, notes: &Annotations) -> Result<()> {
        let temp = self.temp_path();
        {
            let mut wtr = csv::Writer::from_path(&temp).map_err(|e| self.store_error("create", e))?;
            wtr.write_record(["table_key", "row_index", "note_text"])
                .map_err(|e| self.store_error("write", e))?;
            for row in notes.rows() {
                wtr.write_record([&row.table_key, &row.row_index, &row.note_text])
                    .map_err(|e| self.store_error("write", e))?;
            }
            wtr.flush().map_err(|e| self.store_error("flush", e))?;
        }
        std::fs::rename(&temp, &self.path).map_err(|e| self.store_error("replace", e))?;
        Ok(())
    }
}

/// The notes of one working session.
///
/// Opening never fails: an unreachable store yields an empty set. A failed save
/// keeps every edit in memory so it can be retried.
pub struct AnnotationSession<S: AnnotationStore> {
    store: S,
    notes: Annotations,
    dirty: bool,
}

impl<S: AnnotationStore> AnnotationSession<S> {
    pub fn open(store: S) -> Self {
        let notes = match store.load() {
            Ok(notes) => notes,
            Err(e) => {
                warn!("Could not load notes, continuing without them: {}", e);
                Annotations::default()
            }
        };
        Self {
            store,
            notes,
            dirty: false,
        }
    }

    pub fn notes(&self) -> &Annotations {
        &self.notes
    }

    pub fn get(&self, table_key: &str, row_key: &str) -> Option<&str> {
        self.notes.get(table_key, row_key)
    }

    pub fn set(
        &mut self,
        table_key: impl Into<String>,
        row_key: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.notes.set(table_key, row_key, text);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Overwrites the store with the current set, including an empty one.
    /// Does nothing when no edit was made since the last load or save.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            debug!("No note changes to save");
            return Ok(());
        }

        let count = self.notes.rows().len();

        match self.store.save(&self.notes) {
            Ok(()) => {
                info!("Saved {} note(s)", count);
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                warn!("Saving notes failed, keeping edits in memory: {}", e);
                Err(e)
            }
        }
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AggregateCategory;

    struct FailingStore;

    impl AnnotationStore for FailingStore {
        fn load(&self) -> Result<Annotations> {
            Err(RevenueError::AnnotationStore("backend offline".into()))
        }

        fn save(&self, _notes: &Annotations) -> Result<()> {
            Err(RevenueError::AnnotationStore("backend offline".into()))
        }
    }

    #[test]
    fn test_rows_skip_empty_texts() {
        let mut notes = Annotations::default();
        notes.set(REVENUE_TABLE_KEY, "Parcometri", "nuove tariffe");
        notes.set(REVENUE_TABLE_KEY, "Abbonamenti", "   ");
        notes.set(TITLES_TABLE_KEY, "TOTALE", "");

        let rows = notes.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_index, "Parcometri");
        assert_eq!(notes.table(TITLES_TABLE_KEY).map(|t| t.len()), Some(1));
    }

    #[test]
    fn test_monthly_table_key() {
        assert_eq!(
            monthly_table_key(
                ServiceFilter::Category(AggregateCategory::OccasionalParking),
                Metric::Titles
            ),
            "notes_mensile_Sosta_Occasionale_(Aggregato)_Numero_Titoli"
        );
        assert_eq!(
            monthly_table_key(ServiceFilter::All, Metric::Amount),
            "notes_mensile_Tutti_i_Servizi_Incasso_Totale"
        );
    }

    #[test]
    fn test_csv_sheet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvSheetStore::new(dir.path().join("notes.csv"));

        assert!(store.load().unwrap().rows().is_empty());

        let mut notes = Annotations::default();
        notes.set(REVENUE_TABLE_KEY, "Hub Sosta (App)", "include rettifica, \"manuale\"");
        notes.set(PROFITABILITY_TABLE_KEY, "TOTALE", "riga\nsu due righe");
        store.save(&notes).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, notes);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_csv_sheet_ignores_rows_without_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.csv");
        std::fs::write(
            &path,
            "table_key,row_index,note_text\nnotes_incassi,Parcometri,ok\n,Abbonamenti,orphan\nnotes_titoli,,orphan\nnotes_titoli,Gennaio\n",
        )
        .unwrap();

        let notes = CsvSheetStore::new(&path).load().unwrap();
        assert_eq!(notes.get("notes_incassi", "Parcometri"), Some("ok"));
        assert_eq!(notes.get("notes_titoli", "Gennaio"), Some(""));
        assert_eq!(notes.rows().len(), 1);
    }

    #[test]
    fn test_session_tracks_dirty_state() {
        let mut session = AnnotationSession::open(MemoryStore::default());
        assert!(!session.is_dirty());

        session.set(REVENUE_TABLE_KEY, "Parcometri", "aumento");
        assert!(session.is_dirty());
        session.save().unwrap();
        assert!(!session.is_dirty());

        let store = session.into_store();
        assert_eq!(
            store.load().unwrap().get(REVENUE_TABLE_KEY, "Parcometri"),
            Some("aumento")
        );
    }

    #[test]
    fn test_session_survives_backend_failure() {
        let mut session = AnnotationSession::open(FailingStore);
        assert!(session.notes().is_empty());

        session.set(TITLES_TABLE_KEY, "Gennaio", "sciopero");
        assert!(matches!(
            session.save(),
            Err(RevenueError::AnnotationStore(_))
        ));
        assert!(session.is_dirty());
        assert_eq!(session.get(TITLES_TABLE_KEY, "Gennaio"), Some("sciopero"));
    }

    #[test]
    fn test_save_without_changes_is_noop() {
        let mut session = AnnotationSession::open(FailingStore);
        assert!(session.save().is_ok());
        assert!(!session.is_dirty());
    }

    #[test]
    fn test_clearing_last_note_overwrites_store() {
        let mut stored = Annotations::default();
        stored.set(TITLES_TABLE_KEY, "Gennaio", "sciopero");
        let mut session = AnnotationSession::open(MemoryStore::new(stored));
        assert_eq!(session.get(TITLES_TABLE_KEY, "Gennaio"), Some("sciopero"));

        session.set(TITLES_TABLE_KEY, "Gennaio", "");
        session.save().unwrap();
        assert!(!session.is_dirty());

        let reopened = AnnotationSession::open(session.into_store());
        assert!(reopened.notes().is_empty());
    }

    #[test]
    fn test_csv_sheet_cleared_to_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.csv");

        let mut session = AnnotationSession::open(CsvSheetStore::new(&path));
        session.set(REVENUE_TABLE_KEY, "Parcometri", "aumento");
        session.save().unwrap();

        let mut session = AnnotationSession::open(CsvSheetStore::new(&path));
        session.set(REVENUE_TABLE_KEY, "Parcometri", "");
        session.save().unwrap();

        assert!(CsvSheetStore::new(&path).load().unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "table_key,row_index,note_text\n"
        );
    }
}
