//! Durable snapshot storage for the checkout ledger.
//!
//! The file is only read at startup and only written as a whole snapshot;
//! it is never used as a live cursor.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use super::CheckoutRecord;

/// Fixed field order of the ledger file.
pub const HEADER: [&str; 6] = [
    "id",
    "name",
    "email",
    "exam_checked_out",
    "class_number",
    "date_checked_out",
];

/// Quarantined copies kept next to the ledger before quarantine gives up.
const MAX_QUARANTINED: u32 = 999;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ledger file does not exist")]
    Missing,

    #[error("ledger file is corrupt: {0}")]
    Corrupt(String),

    /// An unreadable file is still in place and must not be overwritten.
    #[error("refusing to overwrite unreadable ledger file that could not be moved aside")]
    Protected,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Where the ledger snapshot lives.
pub trait LedgerStore: Send + Sync {
    /// Read every record. `StoreError::Missing` when nothing was ever saved.
    fn load(&self) -> Result<Vec<CheckoutRecord>, StoreError>;

    /// Replace the stored snapshot with `records`, all or nothing.
    fn save(&self, records: &[CheckoutRecord]) -> Result<(), StoreError>;

    /// Move unreadable data out of the way. Returns where it went, if anywhere.
    fn quarantine(&self) -> Result<Option<PathBuf>, StoreError> {
        Ok(None)
    }

    /// Human-readable location for logs and error messages.
    fn location(&self) -> String;
}

// ---------------------------------------------------------------------------
// CsvLedgerStore
// ---------------------------------------------------------------------------

/// Comma-separated ledger file with a header line.
#[derive(Debug, Clone)]
pub struct CsvLedgerStore {
    path: PathBuf,
}

impl CsvLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<file>.corrupt`, or `<file>.corrupt.N` for the first free `N` when
    /// earlier quarantined copies are still around.
    fn unused_quarantine_path(&self) -> Result<PathBuf, StoreError> {
        let mut base = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger".into());
        base.push(".corrupt");

        let first = self.path.with_file_name(&base);
        if !first.exists() {
            return Ok(first);
        }
        for n in 1..=MAX_QUARANTINED {
            let mut name = base.clone();
            name.push(format!(".{n}"));
            let candidate = self.path.with_file_name(name);
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{MAX_QUARANTINED} quarantined ledger copies already exist"),
        )))
    }

    fn encode(records: &[CheckoutRecord]) -> Result<Vec<u8>, StoreError> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        wtr.write_record(HEADER)?;
        for record in records {
            wtr.serialize(record)?;
        }
        wtr.into_inner()
            .map_err(|e| StoreError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
    }
}

impl LedgerStore for CsvLedgerStore {
    fn load(&self) -> Result<Vec<CheckoutRecord>, StoreError> {
        if !self.path.exists() {
            return Err(StoreError::Missing);
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;

        let headers = rdr.headers()?.clone();
        if headers.iter().ne(HEADER.iter().copied()) {
            return Err(StoreError::Corrupt(format!(
                "unexpected header '{}'",
                headers.iter().collect::<Vec<_>>().join(",")
            )));
        }

        let mut records = Vec::new();
        for (line, row) in rdr.deserialize::<CheckoutRecord>().enumerate() {
            let record = row.map_err(|e| StoreError::Corrupt(format!("row {}: {}", line + 1, e)))?;
            records.push(record);
        }

        debug!(path = %self.path.display(), count = records.len(), "Read ledger file");
        Ok(records)
    }

    fn save(&self, records: &[CheckoutRecord]) -> Result<(), StoreError> {
        let data = Self::encode(records)?;
        atomic_write(&self.path, &data)?;
        debug!(path = %self.path.display(), count = records.len(), "Wrote ledger file");
        Ok(())
    }

    fn quarantine(&self) -> Result<Option<PathBuf>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let target = self.unused_quarantine_path()?;
        std::fs::rename(&self.path, &target)?;
        info!(from = %self.path.display(), to = %target.display(), "Moved unreadable ledger aside");
        Ok(Some(target))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Write `data` to `path` through a tempfile in the same directory, so a
/// reader never sees a half-written ledger.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn sample() -> Vec<CheckoutRecord> {
        vec![
            CheckoutRecord {
                id: "id1".into(),
                name: "Alice".into(),
                email: "a@x.com".into(),
                exam_checked_out: Some("examA".into()),
                class_number: Some("CS-101".into()),
                date_checked_out: NaiveDate::from_ymd_opt(2025, 1, 1),
            },
            CheckoutRecord {
                id: "id2".into(),
                name: "Smith, Bob".into(),
                email: "b@x.com".into(),
                exam_checked_out: None,
                class_number: None,
                date_checked_out: None,
            },
        ]
    }

    #[test]
    fn test_save_then_load_preserves_records() {
        let dir = TempDir::new().unwrap();
        let store = CsvLedgerStore::new(dir.path().join("ledger.csv"));
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), sample());
    }

    #[test]
    fn test_file_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        CsvLedgerStore::new(&path).save(&sample()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "id,name,email,exam_checked_out,class_number,date_checked_out"
        );
        assert_eq!(lines[1], "id1,Alice,a@x.com,examA,CS-101,2025-01-01");
        assert_eq!(lines[2], "id2,\"Smith, Bob\",b@x.com,,,");
    }

    #[test]
    fn test_empty_ledger_still_writes_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        let store = CsvLedgerStore::new(&path);
        store.save(&[]).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().trim_end(),
            HEADER.join(",")
        );
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = CsvLedgerStore::new(dir.path().join("nope.csv"));
        assert!(matches!(store.load(), Err(StoreError::Missing)));
    }

    #[test]
    fn test_wrong_header_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(&path, "badge,who\n1,Alice\n").unwrap();
        assert!(matches!(
            CsvLedgerStore::new(&path).load(),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_bad_date_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(
            &path,
            "id,name,email,exam_checked_out,class_number,date_checked_out\n\
             id1,Alice,a@x.com,examA,CS-101,yesterday\n",
        )
        .unwrap();
        assert!(matches!(
            CsvLedgerStore::new(&path).load(),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_quarantine_moves_file_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(&path, "garbage").unwrap();

        let moved = CsvLedgerStore::new(&path).quarantine().unwrap().unwrap();
        assert_eq!(moved, dir.path().join("ledger.csv.corrupt"));
        assert!(!path.exists());
        assert_eq!(std::fs::read_to_string(moved).unwrap(), "garbage");
    }

    #[test]
    fn test_repeated_quarantine_keeps_earlier_copies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.csv");
        let store = CsvLedgerStore::new(&path);

        for contents in ["first corrupt file\n", "second corrupt file\n", "third corrupt file\n"] {
            std::fs::write(&path, contents).unwrap();
            store.quarantine().unwrap();
        }

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("ledger.csv.corrupt"), "first corrupt file\n");
        assert_eq!(read("ledger.csv.corrupt.1"), "second corrupt file\n");
        assert_eq!(read("ledger.csv.corrupt.2"), "third corrupt file\n");
        assert!(!path.exists());
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = CsvLedgerStore::new(blocker.join("ledger.csv"));
        assert!(matches!(store.save(&sample()), Err(StoreError::Io(_))));
    }
}
