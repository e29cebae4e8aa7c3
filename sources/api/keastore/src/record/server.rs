use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::ensure;

use super::types::{DhcpDdnsConnection, HooksLibrary, LeaseDatabase, OptionData};
use super::{read_stored, read_stored_list, render, Ensure, RecordKind};
use crate::document::Document;
use crate::error::{self, Result};
use crate::mutation::{remove_keys, update_section, Outcome};

const OPTION_DATA: &str = "option-data";
const HOOKS_LIBRARIES: &str = "hooks-libraries";
const LEASE_DATABASE: &str = "lease-database";
const DHCP_DDNS: &str = "dhcp-ddns";

const DHCP4_OWNED: &[&str] = &[OPTION_DATA, HOOKS_LIBRARIES, LEASE_DATABASE, DHCP_DDNS];
const DHCP6_OWNED: &[&str] = &[OPTION_DATA, HOOKS_LIBRARIES, LEASE_DATABASE];

/// Server-wide settings of a DHCPv4 or DHCPv6 server.  These live directly in the family's
/// top-level section, next to keys we don't manage.
///
/// `options` is always managed; the other fields are only touched when given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerSettings {
    #[serde(default)]
    pub options: Vec<OptionData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks_libraries: Option<Vec<HooksLibrary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_database: Option<LeaseDatabase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_ddns: Option<DhcpDdnsConnection>,
}

fn owned_keys(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Dhcp4Server => DHCP4_OWNED,
        _ => DHCP6_OWNED,
    }
}

fn is_present(section: &Map<String, Value>, kind: RecordKind) -> bool {
    owned_keys(kind).iter().any(|key| section.contains_key(*key))
}

impl ServerSettings {
    pub(crate) fn apply(
        &self,
        doc: &mut Document,
        kind: RecordKind,
        name: &str,
        ensure: Ensure,
    ) -> Result<Outcome> {
        let section = doc.section_mut()?;
        match ensure {
            Ensure::Absent => Ok(remove_keys(section, owned_keys(kind))),
            Ensure::Present => {
                ensure!(
                    kind == RecordKind::Dhcp4Server || self.dhcp_ddns.is_none(),
                    error::InvalidRecordSnafu {
                        kind,
                        name,
                        msg: "dhcp-ddns is only supported by DHCPv4 servers",
                    }
                );
                let present = is_present(section, kind);
                update_section(section, present, |section| self.write(section, kind))
            }
        }
    }

    fn write(&self, section: &mut Map<String, Value>, kind: RecordKind) -> Result<()> {
        section.insert(OPTION_DATA.to_string(), render(kind, OPTION_DATA, &self.options)?);
        if let Some(hooks) = &self.hooks_libraries {
            section.insert(HOOKS_LIBRARIES.to_string(), render(kind, HOOKS_LIBRARIES, hooks)?);
        }
        if let Some(database) = &self.lease_database {
            section.insert(LEASE_DATABASE.to_string(), render(kind, LEASE_DATABASE, database)?);
        }
        if let Some(ddns) = &self.dhcp_ddns {
            section.insert(DHCP_DDNS.to_string(), render(kind, DHCP_DDNS, ddns)?);
        }
        Ok(())
    }

    pub(crate) fn snapshot(doc: &Document, kind: RecordKind) -> Result<Option<Self>> {
        let section = match doc.section()? {
            Some(section) if is_present(section, kind) => section,
            _ => return Ok(None),
        };
        Ok(Some(Self {
            options: match section.get(OPTION_DATA) {
                Some(value) => read_stored_list(value, kind)?,
                None => Vec::new(),
            },
            hooks_libraries: section
                .get(HOOKS_LIBRARIES)
                .map(|value| read_stored_list(value, kind))
                .transpose()?,
            lease_database: read_lease_database(section, kind)?,
            dhcp_ddns: match (kind, section.get(DHCP_DDNS)) {
                (RecordKind::Dhcp4Server, Some(value)) => Some(read_stored(value, kind)?),
                _ => None,
            },
        }))
    }
}

// Only PostgreSQL databases are managed; any other backend reads back as unmanaged.
fn read_lease_database(section: &Map<String, Value>, kind: RecordKind) -> Result<Option<LeaseDatabase>> {
    let stored = match section.get(LEASE_DATABASE) {
        Some(stored) => stored,
        None => return Ok(None),
    };
    match stored.get("type").and_then(Value::as_str) {
        Some("postgresql") => Ok(Some(read_stored(stored, kind)?)),
        backend => {
            debug!("Not reading {} lease-database of backend {:?}", kind, backend);
            Ok(None)
        }
    }
}
