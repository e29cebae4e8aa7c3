//! Desired records, one kind per managed entity, and how each maps onto a Kea document.
//!
//! Every record kind has a typed schema that's used both for input and for reading entries
//! back out of a document.  The mapping between the two is explicit per kind; nothing is
//! derived from field names at runtime.

mod ddns;
mod reservation;
mod scope;
mod server;
mod types;

pub use ddns::{DdnsDomain, DdnsServer, Direction, TsigKey};
pub use reservation::{IdentifierType, Reservation};
pub use scope::Scope;
pub(crate) use scope::display_name as scope_display_name;
pub use server::ServerSettings;
pub use types::{
    ConflictResolutionMode, DhcpDdnsConnection, DnsServer, HooksLibrary, LeaseBackend,
    LeaseDatabase, NcrFormat, NcrProtocol, OptionData, PdPool, ReplaceClientName, ScopeId,
    TsigAlgorithm, TsigKeyConfig,
};
pub(crate) use types::Stored;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::ResultExt;
use std::fmt;
use std::path::PathBuf;

use crate::document::Document;
use crate::error::{self, Result};
use crate::family::DocumentFamily;
use crate::mutation::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Dhcp4Server,
    Dhcp6Server,
    Dhcp4Scope,
    Dhcp6Scope,
    Dhcp4Reservation,
    DdnsServer,
    DdnsDomain,
    TsigKey,
}

impl RecordKind {
    pub fn family(&self) -> DocumentFamily {
        match self {
            Self::Dhcp4Server | Self::Dhcp4Scope | Self::Dhcp4Reservation => DocumentFamily::Dhcp4,
            Self::Dhcp6Server | Self::Dhcp6Scope => DocumentFamily::Dhcp6,
            Self::DdnsServer | Self::DdnsDomain | Self::TsigKey => DocumentFamily::Ddns,
        }
    }

    /// Server records coordinate commits for every other record sharing their document.
    pub fn is_coordinator(&self) -> bool {
        matches!(
            self,
            Self::Dhcp4Server | Self::Dhcp6Server | Self::DdnsServer
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dhcp4Server => "dhcp4-server",
            Self::Dhcp6Server => "dhcp6-server",
            Self::Dhcp4Scope => "dhcp4-scope",
            Self::Dhcp6Scope => "dhcp6-scope",
            Self::Dhcp4Reservation => "dhcp4-reservation",
            Self::DdnsServer => "ddns-server",
            Self::DdnsDomain => "ddns-domain",
            Self::TsigKey => "tsig-key",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// The per-kind part of a desired record, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecordSpec {
    Dhcp4Server(ServerSettings),
    Dhcp6Server(ServerSettings),
    Dhcp4Scope(Scope),
    Dhcp6Scope(Scope),
    Dhcp4Reservation(Reservation),
    DdnsServer(DdnsServer),
    DdnsDomain(DdnsDomain),
    TsigKey(TsigKey),
}

/// A record as requested by the caller.  `name` is the record's stable identity, and becomes
/// the identity tag on the entry it manages.
///
/// Keys that neither the record nor its kind's schema know about are rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DesiredRecord {
    pub name: String,
    pub ensure: Ensure,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    #[serde(flatten)]
    pub spec: RecordSpec,
}

// Flattening would hand the kind's schema only the keys it asks for, so unknown keys would
// vanish.  Split the common keys off by hand and give the kind everything else.
impl<'de> Deserialize<'de> for DesiredRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "kebab-case")]
        struct Common {
            name: String,
            #[serde(default)]
            ensure: Ensure,
            #[serde(default)]
            config_path: Option<PathBuf>,
        }

        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        let mut common = Map::new();
        for key in ["name", "ensure", "config-path"] {
            if let Some(value) = fields.shift_remove(key) {
                common.insert(key.to_string(), value);
            }
        }
        let common = Common::deserialize(Value::Object(common)).map_err(de::Error::custom)?;
        let spec = RecordSpec::deserialize(Value::Object(fields)).map_err(de::Error::custom)?;
        Ok(Self {
            name: common.name,
            ensure: common.ensure,
            config_path: common.config_path,
            spec,
        })
    }
}

impl DesiredRecord {
    pub fn new<S: Into<String>>(name: S, spec: RecordSpec) -> Self {
        Self {
            name: name.into(),
            ensure: Ensure::Present,
            config_path: None,
            spec,
        }
    }

    pub fn absent(mut self) -> Self {
        self.ensure = Ensure::Absent;
        self
    }

    pub fn at<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.spec.kind()
    }
}

/// An entity found in a document, with the name it's known by.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Listing {
    pub name: String,
    pub config_path: PathBuf,
    #[serde(flatten)]
    pub record: RecordSpec,
}

impl RecordSpec {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Dhcp4Server(_) => RecordKind::Dhcp4Server,
            Self::Dhcp6Server(_) => RecordKind::Dhcp6Server,
            Self::Dhcp4Scope(_) => RecordKind::Dhcp4Scope,
            Self::Dhcp6Scope(_) => RecordKind::Dhcp6Scope,
            Self::Dhcp4Reservation(_) => RecordKind::Dhcp4Reservation,
            Self::DdnsServer(_) => RecordKind::DdnsServer,
            Self::DdnsDomain(_) => RecordKind::DdnsDomain,
            Self::TsigKey(_) => RecordKind::TsigKey,
        }
    }

    /// Brings the document in line with this record.
    pub(crate) fn apply(
        &self,
        doc: &mut Document,
        name: &str,
        ensure: Ensure,
        tag_key: &str,
    ) -> Result<Outcome> {
        let kind = self.kind();
        match self {
            Self::Dhcp4Server(settings) | Self::Dhcp6Server(settings) => {
                settings.apply(doc, kind, name, ensure)
            }
            Self::Dhcp4Scope(scope) | Self::Dhcp6Scope(scope) => {
                scope.apply(doc, kind, name, ensure, tag_key)
            }
            Self::Dhcp4Reservation(reservation) => reservation.apply(doc, name, ensure, tag_key),
            Self::DdnsServer(server) => server.apply(doc, name, ensure),
            Self::DdnsDomain(domain) => domain.apply(doc, name, ensure, tag_key),
            Self::TsigKey(key) => key.apply(doc, name, ensure, tag_key),
        }
    }

    /// Reads back the current state of the entity this record manages, if it exists.
    pub(crate) fn snapshot(&self, doc: &Document, name: &str, tag_key: &str) -> Result<Option<Self>> {
        let kind = self.kind();
        Ok(match self {
            Self::Dhcp4Server(_) => ServerSettings::snapshot(doc, kind)?.map(Self::Dhcp4Server),
            Self::Dhcp6Server(_) => ServerSettings::snapshot(doc, kind)?.map(Self::Dhcp6Server),
            Self::Dhcp4Scope(scope) => scope
                .snapshot(doc, kind, name, tag_key)?
                .map(Self::Dhcp4Scope),
            Self::Dhcp6Scope(scope) => scope
                .snapshot(doc, kind, name, tag_key)?
                .map(Self::Dhcp6Scope),
            Self::Dhcp4Reservation(reservation) => reservation
                .snapshot(doc, name, tag_key)?
                .map(Self::Dhcp4Reservation),
            Self::DdnsServer(_) => DdnsServer::snapshot(doc)?.map(Self::DdnsServer),
            Self::DdnsDomain(domain) => domain
                .snapshot(doc, name, tag_key)?
                .map(Self::DdnsDomain),
            Self::TsigKey(key) => key.snapshot(doc, name, tag_key)?.map(Self::TsigKey),
        })
    }
}

/// Renders a typed field into its document form.
pub(crate) fn render<T: Serialize>(kind: RecordKind, field: &'static str, value: &T) -> Result<Value> {
    serde_json::to_value(value).context(error::RenderFieldSnafu { kind, field })
}

/// Reads a typed field out of a stored entry, if it's there.
pub(crate) fn read_field<T: DeserializeOwned>(
    entry: &Map<String, Value>,
    key: &str,
    kind: RecordKind,
) -> Result<Option<T>> {
    entry
        .get(key)
        .map(|value| serde_json::from_value(value.clone()).context(error::EntryShapeSnafu { kind }))
        .transpose()
}

/// Reads a whole stored entry into its Kea-shaped form.
pub(crate) fn read_entry<T: DeserializeOwned>(entry: &Value, kind: RecordKind) -> Result<T> {
    serde_json::from_value(entry.clone()).context(error::EntryShapeSnafu { kind })
}

/// Reads a stored Kea value, skipping keys its type doesn't model.
pub(crate) fn read_stored<T: Stored>(value: &Value, kind: RecordKind) -> Result<T> {
    let modeled = match value {
        Value::Object(entry) => Value::Object(
            entry
                .iter()
                .filter(|(key, _)| T::KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    };
    serde_json::from_value(modeled).context(error::EntryShapeSnafu { kind })
}

/// Reads a stored list of Kea values.
pub(crate) fn read_stored_list<T: Stored>(value: &Value, kind: RecordKind) -> Result<Vec<T>> {
    match value {
        Value::Array(entries) => entries.iter().map(|entry| read_stored(entry, kind)).collect(),
        other => serde_json::from_value(other.clone()).context(error::EntryShapeSnafu { kind }),
    }
}

/// The name a stored entry is known by: its identity tag, else its comment.
pub(crate) fn tagged_name(entry: &Value, tag_key: &str) -> Option<String> {
    crate::locator::identity_tag(entry, tag_key)
        .or_else(|| entry.get("comment").and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Every entity of a document's family that can be read back, with synthesized names for
/// entries that carry no identity tag.
pub(crate) fn list(doc: &Document, tag_key: &str) -> Result<Vec<Listing>> {
    let path = doc.path().to_path_buf();
    let mut found = Vec::new();
    let mut push = |name: String, record: RecordSpec| {
        found.push(Listing {
            name,
            config_path: path.clone(),
            record,
        })
    };

    match doc.family() {
        DocumentFamily::Dhcp4 => {
            if let Some(settings) = ServerSettings::snapshot(doc, RecordKind::Dhcp4Server)? {
                push("dhcp4".to_string(), RecordSpec::Dhcp4Server(settings));
            }
            for (name, scope) in Scope::list(doc, RecordKind::Dhcp4Scope, tag_key)? {
                push(name, RecordSpec::Dhcp4Scope(scope));
            }
            for (name, reservation) in Reservation::list(doc, tag_key)? {
                push(name, RecordSpec::Dhcp4Reservation(reservation));
            }
        }
        DocumentFamily::Dhcp6 => {
            if let Some(settings) = ServerSettings::snapshot(doc, RecordKind::Dhcp6Server)? {
                push("dhcp6".to_string(), RecordSpec::Dhcp6Server(settings));
            }
            for (name, scope) in Scope::list(doc, RecordKind::Dhcp6Scope, tag_key)? {
                push(name, RecordSpec::Dhcp6Scope(scope));
            }
        }
        DocumentFamily::Ddns => {
            if let Some(server) = DdnsServer::snapshot(doc)? {
                push("dhcp-ddns".to_string(), RecordSpec::DdnsServer(server));
            }
            for (name, domain) in DdnsDomain::list(doc, tag_key)? {
                push(name, RecordSpec::DdnsDomain(domain));
            }
            for (name, key) in TsigKey::list(doc, tag_key)? {
                push(name, RecordSpec::TsigKey(key));
            }
        }
    }
    Ok(found)
}
