use serde::Serialize;
use snafu::Snafu;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::family::DocumentFamily;
use crate::record::RecordKind;

/// Possible errors from keastore operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read Kea document '{}': {}", path.display(), source))]
    DocumentRead { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to parse Kea document '{}': {}", path.display(), source))]
    DocumentParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display(
        "Kea document '{}' is malformed at '{}': expected {}",
        path.display(),
        location,
        expected
    ))]
    InvalidDocument {
        path: PathBuf,
        location: String,
        expected: &'static str,
    },

    #[snafu(display(
        "Document '{}' is already loaded as {}, cannot reuse it for {}",
        path.display(),
        loaded,
        requested
    ))]
    FamilyMismatch {
        path: PathBuf,
        loaded: DocumentFamily,
        requested: DocumentFamily,
    },

    #[snafu(display("Invalid {} record '{}': {}", kind, name, msg))]
    InvalidRecord {
        kind: RecordKind,
        name: String,
        msg: String,
    },

    #[snafu(display("Stored {} entry has an unexpected shape: {}", kind, source))]
    EntryShape {
        kind: RecordKind,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to render {} field '{}': {}", kind, field, source))]
    RenderField {
        kind: RecordKind,
        field: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("Scope id {} already in use in '{}'", id, path.display()))]
    IdInUse { id: u32, path: PathBuf },

    #[snafu(display("Subnet {} is already defined by scope '{}'", subnet, existing))]
    DuplicateSubnet { subnet: String, existing: String },

    #[snafu(display(
        "Reservation with {} '{}' already exists in subnet {} ({})",
        field,
        value,
        scope_id,
        subnet
    ))]
    DuplicateReservation {
        field: String,
        value: String,
        scope_id: u64,
        subnet: String,
    },

    #[snafu(display("{} named '{}' already exists as '{}'", kind, value, existing))]
    DuplicateName {
        kind: RecordKind,
        value: String,
        existing: String,
    },

    #[snafu(display("{} {} entries carry identity tag '{}'", count, kind, tag))]
    AmbiguousIdentity {
        kind: RecordKind,
        tag: String,
        count: usize,
    },

    #[snafu(display("Cannot find subnet with id {}", id))]
    ScopeNotFound { id: u32 },

    #[snafu(display("Cannot find subnet containing IP address {}", ip))]
    NoScopeContains { ip: String },

    #[snafu(display("Failed to serialize document '{}': {}", path.display(), source))]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to create staging directory for '{}': {}", path.display(), source))]
    CreateTempdir { path: PathBuf, source: io::Error },

    #[snafu(display("I/O error on staged copy '{}': {}", path.display(), source))]
    StagedIo { path: PathBuf, source: io::Error },

    #[snafu(display("Document '{}' has no file name to stage under", path.display()))]
    StageName { path: PathBuf },

    #[snafu(display("No validator command configured for {} documents", family))]
    EmptyValidator { family: DocumentFamily },

    #[snafu(display("Failed to capture validator output: {}", source))]
    ValidatorOutput { source: io::Error },

    #[snafu(display("Failed to run validator '{}': {}", command, source))]
    ValidatorSpawn { command: String, source: io::Error },

    #[snafu(display("Failed waiting for validator '{}': {}", command, source))]
    ValidatorWait { command: String, source: io::Error },

    #[snafu(display(
        "Validator '{}' rejected '{}' ({}): {}",
        command,
        path.display(),
        status,
        output
    ))]
    ValidationRejected {
        command: String,
        path: PathBuf,
        status: String,
        output: String,
    },

    #[snafu(display(
        "Validator '{}' did not finish checking '{}' within {:?}",
        command,
        path.display(),
        timeout
    ))]
    ValidatorTimeout {
        command: String,
        path: PathBuf,
        timeout: Duration,
    },

    #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
    Mkdir { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to create temporary file in '{}': {}", path.display(), source))]
    CreateTempfile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to write temporary file for '{}': {}", path.display(), source))]
    WriteTempfile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to replace '{}': {}", path.display(), source))]
    PersistDocument {
        path: PathBuf,
        source: tempfile::PersistError,
    },

    #[snafu(display("Failed to read config file '{}': {}", path.display(), source))]
    ConfigRead { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to parse config file '{}': {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Keastore logic error: {}", msg))]
    Internal { msg: String },
}

/// Broad classes of failure, so callers can react without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Parse,
    Conflict,
    MissingParent,
    Validation,
    InvalidRecord,
    Io,
    Config,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DocumentParse { .. }
            | Error::InvalidDocument { .. }
            | Error::FamilyMismatch { .. }
            | Error::EntryShape { .. } => ErrorKind::Parse,

            Error::IdInUse { .. }
            | Error::DuplicateSubnet { .. }
            | Error::DuplicateReservation { .. }
            | Error::DuplicateName { .. }
            | Error::AmbiguousIdentity { .. } => ErrorKind::Conflict,

            Error::ScopeNotFound { .. } | Error::NoScopeContains { .. } => {
                ErrorKind::MissingParent
            }

            Error::ValidationRejected { .. } | Error::ValidatorTimeout { .. } => {
                ErrorKind::Validation
            }

            Error::InvalidRecord { .. } | Error::RenderField { .. } => ErrorKind::InvalidRecord,

            Error::DocumentRead { .. }
            | Error::Serialize { .. }
            | Error::CreateTempdir { .. }
            | Error::StagedIo { .. }
            | Error::ValidatorOutput { .. }
            | Error::ValidatorSpawn { .. }
            | Error::ValidatorWait { .. }
            | Error::Mkdir { .. }
            | Error::CreateTempfile { .. }
            | Error::WriteTempfile { .. }
            | Error::PersistDocument { .. } => ErrorKind::Io,

            Error::EmptyValidator { .. }
            | Error::ConfigRead { .. }
            | Error::ConfigParse { .. } => ErrorKind::Config,

            Error::StageName { .. } | Error::Internal { .. } => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
