use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const FIXED_COLUMNS: [&str; 6] = [
    "iteration",
    "super_iteration",
    "accepted",
    "aux_error",
    "trial_error",
    "phi",
];

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("File I/O error for '{path}': {source}")]
    Io { path: String, source: io::Error },
    #[error("CSV error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to serialize history metadata: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Malformed history '{path}' at row {row}: {reason}")]
    Malformed {
        path: String,
        row: usize,
        reason: String,
    },
}

/// One iteration outcome. Immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub iteration: usize,
    pub super_iteration: usize,
    pub accepted: bool,
    /// Unbiased error of the state that is current after this iteration.
    pub aux_error: f64,
    /// Unbiased error of the trial, or the failure penalty.
    pub trial_error: f64,
    /// Phi in force during this iteration.
    pub phi: f64,
    /// Parameter values of the state that is current after this iteration.
    pub params: Vec<f64>,
}

impl HistoryRecord {
    fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.iteration.to_string(),
            self.super_iteration.to_string(),
            self.accepted.to_string(),
            self.aux_error.to_string(),
            self.trial_error.to_string(),
            self.phi.to_string(),
        ];
        row.extend(self.params.iter().map(f64::to_string));
        row
    }

    fn from_row(row: &csv::StringRecord, n_params: usize) -> Result<Self, String> {
        if row.len() != FIXED_COLUMNS.len() + n_params {
            return Err(format!(
                "expected {} fields, found {}",
                FIXED_COLUMNS.len() + n_params,
                row.len()
            ));
        }
        let field = |i: usize| row.get(i).unwrap_or_default();
        let int = |i: usize| {
            field(i)
                .parse::<usize>()
                .map_err(|_| format!("'{}' is not an integer", field(i)))
        };
        let float = |i: usize| {
            field(i)
                .parse::<f64>()
                .map_err(|_| format!("'{}' is not a number", field(i)))
        };
        let accepted = field(2)
            .parse::<bool>()
            .map_err(|_| format!("'{}' is not a boolean", field(2)))?;
        Ok(Self {
            iteration: int(0)?,
            super_iteration: int(1)?,
            accepted,
            aux_error: float(3)?,
            trial_error: float(4)?,
            phi: float(5)?,
            params: (FIXED_COLUMNS.len()..row.len())
                .map(float)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Run identity persisted next to the rows; a resumed run must match it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HistoryMeta {
    pub seed: u64,
    pub sub_iter_len: usize,
    pub iter_len: usize,
    pub columns: Vec<String>,
}

/// Append-only iteration log backed by a CSV file and a TOML metadata sidecar.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    meta: HistoryMeta,
    records: Vec<HistoryRecord>,
    flushed: usize,
    initialized: bool,
}

impl HistoryStore {
    /// Starts a fresh history. Nothing touches the filesystem until the first flush, which
    /// replaces any existing file at `path`.
    pub fn create(path: impl Into<PathBuf>, meta: HistoryMeta) -> Self {
        Self {
            path: path.into(),
            meta,
            records: Vec::new(),
            flushed: 0,
            initialized: false,
        }
    }

    /// Continues a history whose rows were loaded with [`HistoryStore::load`].
    pub fn resume(path: impl Into<PathBuf>, meta: HistoryMeta, records: Vec<HistoryRecord>) -> Self {
        let flushed = records.len();
        Self {
            path: path.into(),
            meta,
            records,
            flushed,
            initialized: true,
        }
    }

    pub fn meta_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".meta.toml");
        PathBuf::from(name)
    }

    pub fn read_meta(path: &Path) -> Result<HistoryMeta, HistoryError> {
        let meta_path = Self::meta_path(path);
        let content = fs::read_to_string(&meta_path).map_err(|e| HistoryError::Io {
            path: meta_path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| HistoryError::Toml {
            path: meta_path.display().to_string(),
            source: e,
        })
    }

    /// Reads the metadata and every persisted row.
    pub fn load(path: &Path) -> Result<(HistoryMeta, Vec<HistoryRecord>), HistoryError> {
        let meta = Self::read_meta(path)?;
        let display = path.display().to_string();
        let csv_err = |e| HistoryError::Csv {
            path: display.clone(),
            source: e,
        };

        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let header = reader.headers().map_err(csv_err)?.clone();
        let expected = header_for(&meta.columns);
        if header.iter().ne(expected.iter().map(String::as_str)) {
            return Err(HistoryError::Malformed {
                path: display.clone(),
                row: 0,
                reason: "header does not match the metadata columns".to_string(),
            });
        }

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row.map_err(csv_err)?;
            let record = HistoryRecord::from_row(&row, meta.columns.len()).map_err(|reason| {
                HistoryError::Malformed {
                    path: display.clone(),
                    row: i + 1,
                    reason,
                }
            })?;
            records.push(record);
        }
        Ok((meta, records))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &HistoryMeta {
        &self.meta
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&HistoryRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows appended since the last successful flush.
    pub fn pending(&self) -> usize {
        self.records.len() - self.flushed
    }

    pub fn append(&mut self, record: HistoryRecord) {
        self.records.push(record);
    }

    /// Writes pending rows. On failure the file is truncated back to its previous length and the
    /// rows stay pending for the next flush.
    pub fn flush(&mut self) -> Result<usize, HistoryError> {
        self.flush_with(|file, bytes| file.write_all(bytes))
    }

    fn flush_with(
        &mut self,
        write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>,
    ) -> Result<usize, HistoryError> {
        if !self.initialized {
            self.initialize()?;
        }
        let pending = &self.records[self.flushed..];
        if pending.is_empty() {
            return Ok(0);
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for record in pending {
            writer.write_record(record.to_row()).map_err(|e| self.csv_error(e))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;
        let written = pending.len();

        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let start = file.seek(SeekFrom::End(0)).map_err(|e| self.io_error(e))?;
        if let Err(e) = write(&mut file, &bytes).and_then(|()| file.flush()) {
            if let Err(rollback) = file.set_len(start) {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Could not truncate a partially written history batch."
                );
            }
            return Err(self.io_error(e));
        }

        self.flushed = self.records.len();
        debug!(rows = written, path = %self.path.display(), "History flushed.");
        Ok(written)
    }

    fn initialize(&mut self) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let meta_path = Self::meta_path(&self.path);
        fs::write(&meta_path, toml::to_string(&self.meta)?).map_err(|e| HistoryError::Io {
            path: meta_path.display().to_string(),
            source: e,
        })?;

        let mut writer = csv::Writer::from_path(&self.path).map_err(|e| self.csv_error(e))?;
        writer
            .write_record(header_for(&self.meta.columns))
            .map_err(|e| self.csv_error(e))?;
        writer.flush().map_err(|e| self.io_error(e))?;
        self.initialized = true;
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> HistoryError {
        HistoryError::Csv {
            path: self.path.display().to_string(),
            source,
        }
    }
}

fn header_for(columns: &[String]) -> Vec<String> {
    FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(columns.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> HistoryMeta {
        HistoryMeta {
            seed: 42,
            sub_iter_len: 10,
            iter_len: 100,
            columns: vec!["charge/Cd".into(), "epsilon/Cd Se".into()],
        }
    }

    fn record(iteration: usize, accepted: bool) -> HistoryRecord {
        HistoryRecord {
            iteration,
            super_iteration: iteration / 10,
            accepted,
            aux_error: 0.1 + iteration as f64 / 3.0,
            trial_error: if accepted { 0.1 } else { f64::INFINITY },
            phi: 1.0,
            params: vec![0.9 * (1.0 + iteration as f64 * 0.005), 0.0123],
        }
    }

    #[test]
    fn nothing_is_written_before_the_first_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("armc.hdf5");
        let mut store = HistoryStore::create(&path, meta());
        store.append(record(0, true));
        assert!(!path.exists());
        assert_eq!(store.pending(), 1);
        assert_eq!(store.flush().unwrap(), 1);
        assert!(path.exists());
        assert!(HistoryStore::meta_path(&path).exists());
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn flushed_rows_load_back_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let mut store = HistoryStore::create(&path, meta());
        for i in 0..3 {
            store.append(record(i, i % 2 == 0));
        }
        store.flush().unwrap();
        store.append(record(3, false));
        store.flush().unwrap();

        let (loaded_meta, records) = HistoryStore::load(&path).unwrap();
        assert_eq!(loaded_meta, meta());
        assert_eq!(records.len(), 4);
        assert_eq!(records, store.records());
        assert_eq!(records[1].trial_error, f64::INFINITY);
    }

    #[test]
    fn failed_flush_keeps_rows_pending() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let mut store = HistoryStore::create(blocker.join("armc.csv"), meta());
        store.append(record(0, true));
        assert!(store.flush().is_err());
        assert_eq!(store.pending(), 1);
    }

    #[test]
    fn interrupted_write_is_rolled_back_before_the_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("armc.csv");
        let mut store = HistoryStore::create(&path, meta());
        store.append(record(0, true));
        store.flush().unwrap();
        let flushed_len = std::fs::metadata(&path).unwrap().len();

        for i in 1..4 {
            store.append(record(i, i % 2 == 1));
        }
        let result = store.flush_with(|file, bytes| {
            file.write_all(&bytes[..bytes.len() / 2])?;
            Err(io::Error::other("disk full"))
        });
        assert!(matches!(result, Err(HistoryError::Io { .. })));
        assert_eq!(store.pending(), 3);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), flushed_len);

        assert_eq!(store.flush().unwrap(), 3);
        let (_, records) = HistoryStore::load(&path).unwrap();
        assert_eq!(records, store.records());
    }

    #[test]
    fn resumed_store_appends_after_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("armc.csv");
        let mut store = HistoryStore::create(&path, meta());
        store.append(record(0, true));
        store.flush().unwrap();

        let (m, records) = HistoryStore::load(&path).unwrap();
        let mut resumed = HistoryStore::resume(&path, m, records);
        assert_eq!(resumed.pending(), 0);
        resumed.append(record(1, false));
        resumed.flush().unwrap();

        let (_, all) = HistoryStore::load(&path).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].iteration, 1);
    }

    #[test]
    fn header_mismatch_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("armc.csv");
        let mut store = HistoryStore::create(&path, meta());
        store.append(record(0, true));
        store.flush().unwrap();

        let mut other = meta();
        other.columns.pop();
        std::fs::write(
            HistoryStore::meta_path(&path),
            toml::to_string(&other).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            HistoryStore::load(&path),
            Err(HistoryError::Malformed { row: 0, .. })
        ));
    }
}
