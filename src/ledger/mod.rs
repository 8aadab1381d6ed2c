//! Keyed checkout ledger: who has which exam.
//!
//! Records move between two states, `Available` and `CheckedOut`. The
//! in-memory map is authoritative; the backing store is a recovery snapshot
//! loaded once at startup and rewritten in full after every mutation. All
//! mutations run under one lock, and a failed write rolls the in-memory
//! change back so memory and disk never diverge.

pub mod store;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

pub use self::store::{CsvLedgerStore, LedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no record for id '{0}'")]
    NotFound(String),

    #[error("'{id}' already has '{exam}' checked out; check it in first")]
    Conflict { id: String, exam: String },

    #[error("'{0}' has nothing checked out")]
    AlreadyAvailable(String),

    #[error("could not save ledger to {location}: {source}")]
    PersistenceFailure {
        location: String,
        #[source]
        source: StoreError,
    },

    #[error("invalid record '{id}': {reason}")]
    InvalidRecord { id: String, reason: String },

    /// The ledger lock was poisoned by a panicking writer. Fatal: the
    /// consistency of the in-memory map can no longer be trusted.
    #[error("ledger lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::LockPoisoned)
    }
}

// ---------------------------------------------------------------------------
// CheckoutRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Available,
    CheckedOut,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Available => write!(f, "available"),
            RecordState::CheckedOut => write!(f, "checked out"),
        }
    }
}

/// One person's row in the ledger.
///
/// `exam_checked_out`, `class_number` and `date_checked_out` are either all
/// present or all absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub exam_checked_out: Option<String>,
    pub class_number: Option<String>,
    pub date_checked_out: Option<NaiveDate>,
}

impl CheckoutRecord {
    pub fn state(&self) -> RecordState {
        if self.exam_checked_out.is_some() {
            RecordState::CheckedOut
        } else {
            RecordState::Available
        }
    }

    fn validate(&self) -> Result<(), LedgerError> {
        let invalid = |reason: &str| LedgerError::InvalidRecord {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        let present = [
            self.exam_checked_out.is_some(),
            self.class_number.is_some(),
            self.date_checked_out.is_some(),
        ];
        if present.iter().any(|p| *p != present[0]) {
            return Err(invalid("exam, class number and date must be set together"));
        }
        Ok(())
    }
}

/// Input for [`CheckoutLedger::check_out`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub id: String,
    pub name: String,
    pub email: String,
    pub exam: String,
    pub class_number: String,
    pub date: NaiveDate,
}

// ---------------------------------------------------------------------------
// CheckoutLedger
// ---------------------------------------------------------------------------

pub struct CheckoutLedger {
    records: Mutex<BTreeMap<String, CheckoutRecord>>,
    store: Box<dyn LedgerStore>,
    /// Set when an unreadable snapshot could not be moved aside. Every
    /// mutation then fails with `PersistenceFailure` instead of saving.
    protected: bool,
}

impl CheckoutLedger {
    /// Load the ledger from `store`.
    ///
    /// A missing or unreadable snapshot yields an empty ledger. Unreadable
    /// data is quarantined first so the next save cannot overwrite it; if
    /// that fails the ledger opens read-only.
    pub fn open(store: impl LedgerStore + 'static) -> Self {
        let location = store.location();
        let mut protected = false;
        let records = match store.load().and_then(|rows| {
            index_records(rows).map_err(|e| StoreError::Corrupt(e.to_string()))
        }) {
            Ok(records) => {
                info!(path = %location, count = records.len(), "Loaded checkout ledger");
                records
            }
            Err(StoreError::Missing) => {
                info!(path = %location, "No ledger file yet, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(path = %location, error = %e, "Ledger file unreadable, starting empty");
                if let Err(qe) = store.quarantine() {
                    error!(
                        path = %location,
                        error = %qe,
                        "Could not move unreadable ledger aside, refusing all writes"
                    );
                    protected = true;
                }
                BTreeMap::new()
            }
        };

        Self {
            records: Mutex::new(records),
            store: Box::new(store),
            protected,
        }
    }

    pub fn lookup(&self, id: &str) -> Result<CheckoutRecord, LedgerError> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    /// All records, ordered by id.
    pub fn records(&self) -> Result<Vec<CheckoutRecord>, LedgerError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.lock()?.is_empty())
    }

    /// First-time registration without an exam. An existing record keeps its
    /// checkout state and only has its name and email refreshed.
    pub fn register(&self, id: &str, name: &str, email: &str) -> Result<CheckoutRecord, LedgerError> {
        let mut records = self.lock()?;
        let previous = records.get(id).cloned();

        let record = match &previous {
            Some(existing) => CheckoutRecord {
                name: name.to_string(),
                email: email.to_string(),
                ..existing.clone()
            },
            None => CheckoutRecord {
                id: id.to_string(),
                name: name.to_string(),
                email: email.to_string(),
                exam_checked_out: None,
                class_number: None,
                date_checked_out: None,
            },
        };
        record.validate()?;

        records.insert(id.to_string(), record.clone());
        self.persist(&mut records, id, previous)?;
        info!(id = %id, "Registered");
        Ok(record)
    }

    /// Check an exam out to `request.id`, creating the record if needed.
    ///
    /// Fails with `Conflict` if the record already has an exam out.
    pub fn check_out(&self, request: CheckoutRequest) -> Result<CheckoutRecord, LedgerError> {
        for (field, value) in [("exam", &request.exam), ("class number", &request.class_number)] {
            if value.trim().is_empty() {
                return Err(LedgerError::InvalidRecord {
                    id: request.id.clone(),
                    reason: format!("{field} is required"),
                });
            }
        }

        let mut records = self.lock()?;
        let previous = records.get(&request.id).cloned();
        if let Some(exam) = previous.as_ref().and_then(|r| r.exam_checked_out.clone()) {
            return Err(LedgerError::Conflict {
                id: request.id,
                exam,
            });
        }

        let record = CheckoutRecord {
            id: request.id.clone(),
            name: request.name,
            email: request.email,
            exam_checked_out: Some(request.exam),
            class_number: Some(request.class_number),
            date_checked_out: Some(request.date),
        };
        record.validate()?;

        records.insert(request.id.clone(), record.clone());
        self.persist(&mut records, &request.id, previous)?;
        info!(
            id = %record.id,
            exam = record.exam_checked_out.as_deref().unwrap_or_default(),
            "Checked out"
        );
        Ok(record)
    }

    /// Clear the active checkout on `id`.
    pub fn check_in(&self, id: &str) -> Result<CheckoutRecord, LedgerError> {
        let mut records = self.lock()?;
        let previous = records
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        if previous.state() == RecordState::Available {
            return Err(LedgerError::AlreadyAvailable(id.to_string()));
        }

        let record = CheckoutRecord {
            exam_checked_out: None,
            class_number: None,
            date_checked_out: None,
            ..previous.clone()
        };

        records.insert(id.to_string(), record.clone());
        self.persist(&mut records, id, Some(previous))?;
        info!(id = %id, "Checked in");
        Ok(record)
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, CheckoutRecord>>, LedgerError> {
        self.records.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Poison the record lock the way a writer panicking mid-mutation would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        std::thread::scope(|s| {
            let writer = s.spawn(|| {
                let _guard = self.records.lock();
                panic!("writer panicked while holding the ledger lock");
            });
            assert!(writer.join().is_err());
        });
        assert!(self.records.is_poisoned());
    }

    /// Write the full snapshot. On failure, restore `id` to `previous`.
    fn persist(
        &self,
        records: &mut BTreeMap<String, CheckoutRecord>,
        id: &str,
        previous: Option<CheckoutRecord>,
    ) -> Result<(), LedgerError> {
        let saved = if self.protected {
            Err(StoreError::Protected)
        } else {
            let snapshot: Vec<CheckoutRecord> = records.values().cloned().collect();
            self.store.save(&snapshot)
        };
        let Err(source) = saved else {
            return Ok(());
        };

        match previous {
            Some(p) => {
                records.insert(id.to_string(), p);
            }
            None => {
                records.remove(id);
            }
        }
        let location = self.store.location();
        warn!(id = %id, path = %location, error = %source, "Ledger write failed, change rolled back");
        Err(LedgerError::PersistenceFailure { location, source })
    }
}

fn index_records(rows: Vec<CheckoutRecord>) -> Result<BTreeMap<String, CheckoutRecord>, LedgerError> {
    let mut map = BTreeMap::new();
    for row in rows {
        row.validate()?;
        match map.entry(row.id.clone()) {
            Entry::Occupied(_) => {
                return Err(LedgerError::InvalidRecord {
                    id: row.id,
                    reason: "duplicate id".into(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
        }
    }
    Ok(map)
}
