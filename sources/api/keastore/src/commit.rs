//! Staging, validation, and atomic replacement of Kea documents.
//!
//! A dirty document is first written to a staged copy in its own temporary directory, under
//! the same file name as its target.  The family's validator checks the staged copy; only if it
//! passes is the target replaced, through a temporary file next to the target that's renamed
//! over it.  Staged copies are removed on every exit path, because they're owned by
//! `StagedDocument` and the coordinator lets go of them before validating.

use serde::Serialize;
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, TempDir};

use crate::config::Config;
use crate::document::DocumentStore;
use crate::error::{self, Result};
use crate::family::DocumentFamily;

// How often a running validator is checked on
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Something that can say whether a staged document is acceptable to its server.
pub trait Validator {
    fn validate(&self, family: DocumentFamily, staged: &Path) -> Result<()>;
}

/// Runs each family's server in check mode against the staged file, e.g. `kea-dhcp4 -t <file>`.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    commands: HashMap<DocumentFamily, Vec<String>>,
    timeout: Option<Duration>,
}

impl CommandValidator {
    pub fn new(timeout: Option<Duration>) -> Self {
        let commands = DocumentFamily::ALL
            .into_iter()
            .map(|family| (family, family.default_validator()))
            .collect();
        Self { commands, timeout }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut validator = Self::new(config.validator_timeout());
        for family in DocumentFamily::ALL {
            validator = validator.with_command(family, config.validator_command(family));
        }
        validator
    }

    pub fn with_command(mut self, family: DocumentFamily, argv: Vec<String>) -> Self {
        self.commands.insert(family, argv);
        self
    }
}

impl Validator for CommandValidator {
    fn validate(&self, family: DocumentFamily, staged: &Path) -> Result<()> {
        let argv = self.commands.get(&family).map(Vec::as_slice).unwrap_or(&[]);
        let (program, args) = argv
            .split_first()
            .context(error::EmptyValidatorSnafu { family })?;
        let command = format!("{} {}", argv.join(" "), staged.display());
        info!("Validating staged {} document with '{}'", family, command);

        // Output goes to a file rather than a pipe, so a chatty validator can't block on a full
        // pipe while we wait for it
        let mut output = tempfile::tempfile().context(error::ValidatorOutputSnafu)?;
        let stdout = output.try_clone().context(error::ValidatorOutputSnafu)?;
        let stderr = output.try_clone().context(error::ValidatorOutputSnafu)?;

        let mut child = Command::new(program)
            .args(args)
            .arg(staged)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .context(error::ValidatorSpawnSnafu { command: &command })?;

        let status = match self.timeout {
            Some(timeout) => wait_timeout(&mut child, timeout),
            None => child.wait().map(Some),
        }
        .context(error::ValidatorWaitSnafu { command: &command })?;

        let status = match status {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                error!("Validator '{}' timed out and was killed", command);
                return error::ValidatorTimeoutSnafu {
                    command,
                    path: staged,
                    timeout: self.timeout.unwrap_or_default(),
                }
                .fail();
            }
        };

        if status.success() {
            debug!("Validator accepted '{}'", staged.display());
            return Ok(());
        }

        let mut text = String::new();
        output
            .seek(SeekFrom::Start(0))
            .and_then(|_| output.read_to_string(&mut text))
            .context(error::ValidatorOutputSnafu)?;
        error!("Validator '{}' rejected the staged document: {}", command, text.trim());
        error::ValidationRejectedSnafu {
            command,
            path: staged,
            status: status.to_string(),
            output: text.trim(),
        }
        .fail()
    }
}

/// Waits for the child to exit, giving up after `timeout`.  Returns None on timeout.
fn wait_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// A serialized copy of a document, written to a private temporary directory.  Dropping it
/// removes the directory.
#[derive(Debug)]
pub struct StagedDocument {
    // Held for its Drop; the directory goes away with it
    _dir: TempDir,
    path: PathBuf,
}

impl StagedDocument {
    fn write(target: &Path, contents: &str) -> Result<Self> {
        let file_name = target
            .file_name()
            .context(error::StageNameSnafu { path: target })?;
        let dir = tempfile::Builder::new()
            .prefix(constants::STAGING_PREFIX)
            .tempdir()
            .context(error::CreateTempdirSnafu { path: target })?;
        let path = dir.path().join(file_name);
        fs::write(&path, contents).context(error::StagedIoSnafu { path: &path })?;
        debug!("Staged '{}' at '{}'", target.display(), path.display());
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).context(error::StagedIoSnafu { path: &self.path })
    }
}

/// What committing one path amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitResult {
    /// Validated and written over the target.
    Committed,
    /// Validated only; the target was left alone.
    Validated,
    /// Nothing had changed.
    Clean,
}

impl fmt::Display for CommitResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommitResult::Committed => write!(f, "committed"),
            CommitResult::Validated => write!(f, "validated"),
            CommitResult::Clean => write!(f, "clean"),
        }
    }
}

/// Tracks staged copies and which paths have a coordinator, and turns dirty documents into
/// committed files.
#[derive(Debug)]
pub struct CommitCoordinator<V> {
    validator: V,
    staged: HashMap<PathBuf, StagedDocument>,
    controllers: BTreeSet<PathBuf>,
    dry_run: bool,
}

impl<V: Validator> CommitCoordinator<V> {
    pub fn new(validator: V) -> Self {
        Self {
            validator,
            staged: HashMap::new(),
            controllers: BTreeSet::new(),
            dry_run: false,
        }
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    /// In a dry run, documents are staged and validated but targets are never replaced.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn register_controller(&mut self, path: &Path) {
        debug!("Deferring commits of '{}' to its coordinator", path.display());
        self.controllers.insert(path.to_path_buf());
    }

    pub fn unregister_controller(&mut self, path: &Path) {
        self.controllers.remove(path);
    }

    pub fn is_controlled(&self, path: &Path) -> bool {
        self.controllers.contains(path)
    }

    pub fn controlled_paths(&self) -> Vec<PathBuf> {
        self.controllers.iter().cloned().collect()
    }

    pub fn staged(&self, path: &Path) -> Option<&StagedDocument> {
        self.staged.get(path)
    }

    /// Writes a fresh staged copy of the document at `path`, replacing any earlier one.
    pub fn stage(&mut self, store: &DocumentStore, path: &Path) -> Result<&StagedDocument> {
        let document = store.get(path).context(error::InternalSnafu {
            msg: format!("cannot stage '{}', it was never loaded", path.display()),
        })?;
        let staged = StagedDocument::write(path, &document.render()?)?;
        self.staged.insert(path.to_path_buf(), staged);
        self.staged.get(path).context(error::InternalSnafu {
            msg: format!("staged copy of '{}' vanished", path.display()),
        })
    }

    /// Runs the validator against the staged copy of `path`.
    pub fn validate(&self, family: DocumentFamily, path: &Path) -> Result<()> {
        let staged = self.staged.get(path).context(error::InternalSnafu {
            msg: format!("'{}' has no staged copy to validate", path.display()),
        })?;
        self.validator.validate(family, staged.path())
    }

    /// Stages, validates, and atomically replaces the document at `path`.  The staged copy is
    /// always rendered from the current document, never reused.  A clean path is a no-op.  On
    /// failure the target is untouched and the path stays dirty.
    pub fn commit(&mut self, store: &mut DocumentStore, path: &Path) -> Result<CommitResult> {
        if !store.is_dirty(path) {
            self.staged.remove(path);
            trace!("'{}' is clean, nothing to commit", path.display());
            return Ok(CommitResult::Clean);
        }
        self.stage(store, path)?;
        // Owning the staged copy here means it's cleaned up however we leave
        let staged = self.staged.remove(path).context(error::InternalSnafu {
            msg: format!("'{}' has no staged copy to commit", path.display()),
        })?;
        let family = store
            .get(path)
            .map(|document| document.family())
            .context(error::InternalSnafu {
                msg: format!("cannot commit '{}', it was never loaded", path.display()),
            })?;

        self.validator.validate(family, staged.path())?;

        if self.dry_run {
            info!("Dry run: '{}' validated, not replacing it", path.display());
            return Ok(CommitResult::Validated);
        }

        replace_file(path, &staged.contents()?)?;
        store.clear_dirty(path);
        info!("Committed '{}'", path.display());
        Ok(CommitResult::Committed)
    }

    /// Drops all staged copies and controller registrations.
    pub fn reset(&mut self) {
        self.staged.clear();
        self.controllers.clear();
    }
}

/// Atomically replaces `target` with `contents`, creating its directory if needed.  An existing
/// target's permissions carry over to the new file.
pub fn replace_file(target: &Path, contents: &[u8]) -> Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).context(error::MkdirSnafu { path: dir })?;

    // The temporary file must be on the same filesystem as the target for the rename to be
    // atomic, so it's created next to it.
    let mut temp = NamedTempFile::new_in(dir).context(error::CreateTempfileSnafu { path: dir })?;
    temp.write_all(contents)
        .and_then(|_| temp.as_file().sync_all())
        .context(error::WriteTempfileSnafu { path: target })?;

    if let Ok(metadata) = fs::metadata(target) {
        fs::set_permissions(temp.path(), metadata.permissions())
            .context(error::WriteTempfileSnafu { path: target })?;
    }

    temp.persist(target)
        .context(error::PersistDocumentSnafu { path: target })?;
    // Make sure the rename itself is durable
    if let Ok(dir) = File::open(dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// A validator that accepts everything, for callers that check documents some other way.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, family: DocumentFamily, staged: &Path) -> Result<()> {
        ensure!(
            staged.exists(),
            error::InternalSnafu {
                msg: format!("staged {} document '{}' is missing", family, staged.display()),
            }
        );
        Ok(())
    }
}
