//! One reconciliation pass: desired records in, documents brought in line and committed.

use serde::Serialize;
use snafu::ensure;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::commit::{CommitCoordinator, CommitResult, Validator};
use crate::config::Config;
use crate::document::DocumentStore;
use crate::error::{self, Error, ErrorKind, Result};
use crate::family::DocumentFamily;
use crate::mutation::Outcome;
use crate::record::{self, DesiredRecord, Ensure, Listing, RecordKind, RecordSpec};

/// A failure, in a form that can be reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorReport {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordReport {
    pub name: String,
    pub kind: RecordKind,
    pub ensure: Ensure,
    pub config_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    /// The record as stored once the pass finished; None if it doesn't exist.
    pub snapshot: Option<RecordSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommitReport {
    pub config_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommitResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl CommitReport {
    fn new(config_path: PathBuf, result: Result<CommitResult>) -> Self {
        match result {
            Ok(result) => Self {
                config_path,
                result: Some(result),
                error: None,
            },
            Err(e) => {
                error!("Failed to commit '{}': {}", config_path.display(), e);
                Self {
                    config_path,
                    result: None,
                    error: Some(ErrorReport::from(&e)),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub records: Vec<RecordReport>,
    pub commits: Vec<CommitReport>,
}

impl RunReport {
    /// Number of records and commits that failed.
    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| r.error.is_some()).count()
            + self.commits.iter().filter(|c| c.error.is_some()).count()
    }

    pub fn success(&self) -> bool {
        self.failures() == 0
    }
}

/// Drives reconciliation passes.  Parsed documents, dirty marks, staged copies, and coordinator
/// registrations all live here, so that they're shared by every record in a pass and by nothing
/// outside it.
#[derive(Debug)]
pub struct Reconciler<V> {
    config: Config,
    store: DocumentStore,
    coordinator: CommitCoordinator<V>,
    coordinator_paths: HashMap<DocumentFamily, PathBuf>,
    // Paths whose commit failed this pass; they stay dirty and aren't tried again
    failed: HashSet<PathBuf>,
    // Dry run: paths validated as they are now
    validated: HashSet<PathBuf>,
}

impl<V: Validator> Reconciler<V> {
    pub fn new(config: Config, validator: V) -> Self {
        Self {
            config,
            store: DocumentStore::new(),
            coordinator: CommitCoordinator::new(validator),
            coordinator_paths: HashMap::new(),
            failed: HashSet::new(),
            validated: HashSet::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn coordinator(&self) -> &CommitCoordinator<V> {
        &self.coordinator
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.coordinator.set_dry_run(dry_run);
    }

    /// The document a record belongs in: its own path, else its family coordinator's path in
    /// this pass, else the configured default.
    pub fn resolve_path(&self, record: &DesiredRecord) -> PathBuf {
        if let Some(path) = &record.config_path {
            return path.clone();
        }
        let kind = record.kind();
        if !kind.is_coordinator() {
            if let Some(path) = self.coordinator_paths.get(&kind.family()) {
                return path.clone();
            }
        }
        self.config.default_path(kind.family())
    }

    /// Registers the coordinating records of a pass, so that sibling records defer their commits.
    pub fn begin(&mut self, records: &[DesiredRecord]) {
        for record in records.iter().filter(|r| r.kind().is_coordinator()) {
            let path = self.resolve_path(record);
            self.coordinator.register_controller(&path);
            self.coordinator_paths
                .entry(record.kind().family())
                .or_insert(path);
        }
    }

    /// Applies one record to its document, then commits right away unless a coordinator owns
    /// the document.
    pub fn reconcile(&mut self, record: &DesiredRecord) -> Result<Outcome> {
        let kind = record.kind();
        ensure!(
            !record.name.is_empty(),
            error::InvalidRecordSnafu {
                kind,
                name: "",
                msg: "name must not be empty",
            }
        );
        let path = self.resolve_path(record);
        let document = self.store.load(&path, kind.family())?;
        let outcome = record.spec.apply(
            document,
            &record.name,
            record.ensure,
            &self.config.identity_tag_key,
        )?;
        info!(
            "{} '{}' in '{}': {:?}",
            kind,
            record.name,
            path.display(),
            outcome
        );

        if outcome.changed() {
            self.store.mark_dirty(&path);
            self.validated.remove(&path);
        }
        if !kind.is_coordinator()
            && !self.coordinator.is_controlled(&path)
            && self.store.is_dirty(&path)
            && self.pending(&path)
        {
            self.commit(&path)?;
        }
        Ok(outcome)
    }

    /// Whether `path` still needs a commit attempt in this pass.
    fn pending(&self, path: &Path) -> bool {
        !self.failed.contains(path) && !self.validated.contains(path)
    }

    /// Commits one path, remembering failures and dry-run validations so they aren't repeated.
    fn commit(&mut self, path: &Path) -> Result<CommitResult> {
        match self.coordinator.commit(&mut self.store, path) {
            Ok(CommitResult::Validated) => {
                self.validated.insert(path.to_path_buf());
                Ok(CommitResult::Validated)
            }
            Ok(result) => Ok(result),
            Err(e) => {
                self.failed.insert(path.to_path_buf());
                Err(e)
            }
        }
    }

    /// Commits every coordinated path once, then whatever else is still dirty.  A path whose
    /// commit already failed in this pass is left dirty and not reported again.
    pub fn finish(&mut self) -> Vec<CommitReport> {
        let mut reports = Vec::new();

        for path in self.coordinator.controlled_paths() {
            self.coordinator.unregister_controller(&path);
            if self.pending(&path) {
                let result = self.commit(&path);
                reports.push(CommitReport::new(path, result));
            }
        }
        self.coordinator_paths.clear();

        for path in self.store.dirty_paths() {
            if self.pending(&path) {
                let result = self.commit(&path);
                reports.push(CommitReport::new(path, result));
            }
        }
        reports
    }

    /// A whole pass, starting from what's on disk.  A failing record is reported and the pass
    /// carries on with the rest.
    pub fn run(&mut self, records: &[DesiredRecord]) -> RunReport {
        self.reset();
        self.begin(records);

        let mut reports = Vec::with_capacity(records.len());
        for record in records {
            let config_path = self.resolve_path(record);
            let result = self.reconcile(record);
            if let Err(e) = &result {
                error!("Failed to reconcile {} '{}': {}", record.kind(), record.name, e);
            }
            reports.push(RecordReport {
                name: record.name.clone(),
                kind: record.kind(),
                ensure: record.ensure,
                config_path,
                outcome: result.as_ref().ok().copied(),
                error: result.as_ref().err().map(ErrorReport::from),
                snapshot: None,
            });
        }

        let commits = self.finish();

        for (report, record) in reports.iter_mut().zip(records) {
            report.snapshot = match self.snapshot_at(record, &report.config_path) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Unable to read back {} '{}': {}", record.kind(), record.name, e);
                    None
                }
            };
        }

        RunReport {
            records: reports,
            commits,
        }
    }

    /// The record as currently stored in its document, or None if it doesn't exist.
    pub fn snapshot(&mut self, record: &DesiredRecord) -> Result<Option<RecordSpec>> {
        let path = self.resolve_path(record);
        self.snapshot_at(record, &path)
    }

    fn snapshot_at(&mut self, record: &DesiredRecord, path: &Path) -> Result<Option<RecordSpec>> {
        let document = self.store.load(path, record.kind().family())?;
        record
            .spec
            .snapshot(document, &record.name, &self.config.identity_tag_key)
    }

    /// Every record found in a document.  Without a path, the family's default document is read.
    pub fn list(&mut self, family: DocumentFamily, path: Option<&Path>) -> Result<Vec<Listing>> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => self
                .coordinator_paths
                .get(&family)
                .cloned()
                .unwrap_or_else(|| self.config.default_path(family)),
        };
        let document = self.store.load(&path, family)?;
        record::list(document, &self.config.identity_tag_key)
    }

    /// Forgets everything from the current pass, so the next one starts from disk.
    pub fn reset(&mut self) {
        self.store.reset();
        self.coordinator.reset();
        self.coordinator_paths.clear();
        self.failed.clear();
        self.validated.clear();
    }
}
