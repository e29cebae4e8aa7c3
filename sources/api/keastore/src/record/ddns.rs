use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use snafu::ensure;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use super::types::{DnsServer, NcrFormat, NcrProtocol, TsigAlgorithm, TsigKeyConfig};
use super::{
    read_entry, read_field, read_stored, read_stored_list, render, tagged_name, Ensure, RecordKind,
};
use crate::allocator::ensure_unique_name;
use crate::document::{array, array_mut, object, object_mut, Document};
use crate::error::{self, Result};
use crate::family::keys;
use crate::locator::{locate, locate_tagged};
use crate::mutation::{
    remove_entry, remove_keys, render_entry, set_or_remove, update_section, upsert_entry, Outcome,
};

const IP_ADDRESS: &str = "ip-address";
const PORT: &str = "port";
const DNS_SERVER_TIMEOUT: &str = "dns-server-timeout";
const NCR_PROTOCOL: &str = "ncr-protocol";
const NCR_FORMAT: &str = "ncr-format";

const SERVER_OWNED: &[&str] = &[
    IP_ADDRESS,
    PORT,
    DNS_SERVER_TIMEOUT,
    NCR_PROTOCOL,
    NCR_FORMAT,
    keys::TSIG_KEYS,
];

fn default_ip_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    53001
}

fn default_dns_server_timeout() -> u32 {
    500
}

/// Settings of the DHCP-DDNS daemon itself.
///
/// `tsig-keys`, when given, replaces the whole key list; leave it out to manage keys one at a
/// time with `tsig-key` records instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DdnsServer {
    #[serde(default = "default_ip_address")]
    pub ip_address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_dns_server_timeout")]
    pub dns_server_timeout: u32,
    #[serde(default)]
    pub ncr_protocol: NcrProtocol,
    #[serde(default)]
    pub ncr_format: NcrFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsig_keys: Option<Vec<TsigKeyConfig>>,
}

impl Default for DdnsServer {
    fn default() -> Self {
        Self {
            ip_address: default_ip_address(),
            port: default_port(),
            dns_server_timeout: default_dns_server_timeout(),
            ncr_protocol: NcrProtocol::default(),
            ncr_format: NcrFormat::default(),
            tsig_keys: None,
        }
    }
}

impl DdnsServer {
    pub(crate) fn apply(&self, doc: &mut Document, name: &str, ensure: Ensure) -> Result<Outcome> {
        let kind = RecordKind::DdnsServer;
        let section = doc.section_mut()?;
        if ensure == Ensure::Absent {
            return Ok(remove_keys(section, SERVER_OWNED));
        }

        ensure!(
            self.port != 0 && self.dns_server_timeout != 0,
            error::InvalidRecordSnafu {
                kind,
                name,
                msg: "port and dns-server-timeout must be positive",
            }
        );
        let present = SERVER_OWNED.iter().any(|key| section.contains_key(*key));
        update_section(section, present, |section| {
            section.insert(IP_ADDRESS.to_string(), Value::String(self.ip_address.to_string()));
            section.insert(PORT.to_string(), json!(self.port));
            section.insert(DNS_SERVER_TIMEOUT.to_string(), json!(self.dns_server_timeout));
            section.insert(NCR_PROTOCOL.to_string(), render(kind, NCR_PROTOCOL, &self.ncr_protocol)?);
            section.insert(NCR_FORMAT.to_string(), render(kind, NCR_FORMAT, &self.ncr_format)?);
            if let Some(tsig_keys) = &self.tsig_keys {
                section.insert(keys::TSIG_KEYS.to_string(), render(kind, keys::TSIG_KEYS, tsig_keys)?);
            }
            Ok(())
        })
    }

    /// Reads the stored settings, filling in daemon defaults for anything left out.
    pub(crate) fn snapshot(doc: &Document) -> Result<Option<Self>> {
        let kind = RecordKind::DdnsServer;
        let section = match doc.section()? {
            Some(section) if SERVER_OWNED.iter().any(|key| section.contains_key(*key)) => section,
            _ => return Ok(None),
        };
        Ok(Some(Self {
            ip_address: read_field(section, IP_ADDRESS, kind)?.unwrap_or_else(default_ip_address),
            port: read_field(section, PORT, kind)?.unwrap_or_else(default_port),
            dns_server_timeout: read_field(section, DNS_SERVER_TIMEOUT, kind)?
                .unwrap_or_else(default_dns_server_timeout),
            ncr_protocol: read_field(section, NCR_PROTOCOL, kind)?.unwrap_or_default(),
            ncr_format: read_field(section, NCR_FORMAT, kind)?.unwrap_or_default(),
            tsig_keys: section
                .get(keys::TSIG_KEYS)
                .map(|value| read_stored_list(value, kind))
                .transpose()?,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    const ALL: [Direction; 2] = [Self::Forward, Self::Reverse];

    fn key(&self) -> &'static str {
        match self {
            Self::Forward => keys::FORWARD_DDNS,
            Self::Reverse => keys::REVERSE_DDNS,
        }
    }
}

/// A forward or reverse DNS zone the DDNS daemon updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DdnsDomain {
    pub domain_name: String,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<DnsServer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoredDomain {
    name: String,
    key_name: Option<String>,
    #[serde(default)]
    dns_servers: Value,
}

fn domains<'a>(section: &'a Map<String, Value>, direction: Direction, path: &Path) -> Result<&'a [Value]> {
    match object(section, direction.key(), path)? {
        Some(list) => array(list, keys::DDNS_DOMAINS, path),
        None => Ok(&[]),
    }
}

fn domains_mut<'a>(
    section: &'a mut Map<String, Value>,
    direction: Direction,
    path: &Path,
) -> Result<&'a mut Vec<Value>> {
    array_mut(object_mut(section, direction.key(), path)?, keys::DDNS_DOMAINS, path)
}

impl DdnsDomain {
    fn matches(&self, entry: &Map<String, Value>) -> bool {
        entry.get("name").and_then(Value::as_str) == Some(self.domain_name.as_str())
    }

    fn write(&self, entry: &mut Map<String, Value>) -> Result<()> {
        entry.insert("name".to_string(), Value::String(self.domain_name.clone()));
        let key_name = self
            .key_name
            .as_ref()
            .filter(|key| !key.is_empty())
            .map(|key| Value::String(key.clone()));
        set_or_remove(entry, "key-name", key_name);
        let servers = if self.dns_servers.is_empty() {
            None
        } else {
            Some(render(RecordKind::DdnsDomain, "dns-servers", &self.dns_servers)?)
        };
        set_or_remove(entry, "dns-servers", servers);
        Ok(())
    }

    fn read(entry: &Value, direction: Direction) -> Result<Self> {
        let stored: StoredDomain = read_entry(entry, RecordKind::DdnsDomain)?;
        Ok(Self {
            domain_name: stored.name,
            direction,
            key_name: stored.key_name,
            dns_servers: match stored.dns_servers {
                Value::Null => Vec::new(),
                servers => read_stored_list(&servers, RecordKind::DdnsDomain)?,
            },
        })
    }

    // Finds the entry by tag in either direction, else by name in the desired direction.
    fn find(
        &self,
        section: &Map<String, Value>,
        path: &Path,
        name: &str,
        tag_key: &str,
    ) -> Result<Option<(Direction, usize)>> {
        let lists = [
            domains(section, Direction::Forward, path)?,
            domains(section, Direction::Reverse, path)?,
        ];
        let kind = RecordKind::DdnsDomain;
        if let Some((list, i)) = locate_tagged(lists, kind, tag_key, name)? {
            return Ok(Some((Direction::ALL[list], i)));
        }
        let wanted = match self.direction {
            Direction::Forward => lists[0],
            Direction::Reverse => lists[1],
        };
        Ok(locate(wanted, kind, tag_key, name, |entry| self.matches(entry))?
            .map(|found| (self.direction, found.index())))
    }

    pub(crate) fn apply(
        &self,
        doc: &mut Document,
        name: &str,
        ensure: Ensure,
        tag_key: &str,
    ) -> Result<Outcome> {
        let path = doc.path().to_path_buf();
        let section = doc.section_mut()?;
        let found = self.find(section, &path, name, tag_key)?;

        if ensure == Ensure::Absent {
            return Ok(match found {
                Some((direction, i)) => remove_entry(domains_mut(section, direction, &path)?, Some(i)),
                None => Outcome::AlreadyAbsent,
            });
        }

        ensure!(
            !self.domain_name.is_empty(),
            error::InvalidRecordSnafu {
                kind: RecordKind::DdnsDomain,
                name,
                msg: "domain-name must not be empty",
            }
        );
        let current = found
            .filter(|(direction, _)| *direction == self.direction)
            .map(|(_, i)| i);
        ensure_unique_name(
            domains(section, self.direction, &path)?,
            current,
            RecordKind::DdnsDomain,
            &self.domain_name,
            tag_key,
        )?;
        match found {
            Some((direction, i)) if direction != self.direction => {
                let from = domains_mut(section, direction, &path)?;
                let entry = render_entry(Some(&from[i]), tag_key, name, |entry| self.write(entry))?;
                from.remove(i);
                domains_mut(section, self.direction, &path)?.push(entry);
                debug!("Moved DDNS domain '{}' to {}", self.domain_name, self.direction.key());
                Ok(Outcome::Updated)
            }
            found => upsert_entry(
                domains_mut(section, self.direction, &path)?,
                found.map(|(_, i)| i),
                tag_key,
                name,
                |entry| self.write(entry),
            ),
        }
    }

    pub(crate) fn snapshot(&self, doc: &Document, name: &str, tag_key: &str) -> Result<Option<Self>> {
        let section = match doc.section()? {
            Some(section) => section,
            None => return Ok(None),
        };
        match self.find(section, doc.path(), name, tag_key)? {
            Some((direction, i)) => {
                let entry = &domains(section, direction, doc.path())?[i];
                Ok(Some(Self::read(entry, direction)?))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn list(doc: &Document, tag_key: &str) -> Result<Vec<(String, Self)>> {
        let mut found = Vec::new();
        if let Some(section) = doc.section()? {
            for direction in Direction::ALL {
                for entry in domains(section, direction, doc.path())? {
                    let domain = Self::read(entry, direction)?;
                    let name = tagged_name(entry, tag_key).unwrap_or_else(|| domain.domain_name.clone());
                    found.push((name, domain));
                }
            }
        }
        Ok(found)
    }
}

/// A single TSIG key, managed within `DhcpDdns.tsig-keys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TsigKey {
    pub key_name: String,
    pub algorithm: TsigAlgorithm,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_bits: Option<u32>,
}

impl From<TsigKeyConfig> for TsigKey {
    fn from(config: TsigKeyConfig) -> Self {
        Self {
            key_name: config.name,
            algorithm: config.algorithm,
            secret: config.secret,
            digest_bits: config.digest_bits,
        }
    }
}

impl TsigKey {
    fn matches(&self, entry: &Map<String, Value>) -> bool {
        entry.get("name").and_then(Value::as_str) == Some(self.key_name.as_str())
    }

    fn write(&self, entry: &mut Map<String, Value>) -> Result<()> {
        let kind = RecordKind::TsigKey;
        entry.insert("name".to_string(), Value::String(self.key_name.clone()));
        entry.insert("algorithm".to_string(), render(kind, "algorithm", &self.algorithm)?);
        entry.insert("secret".to_string(), Value::String(self.secret.clone()));
        set_or_remove(entry, "digest-bits", self.digest_bits.map(|bits| json!(bits)));
        Ok(())
    }

    fn key_entries(doc: &Document) -> Result<&[Value]> {
        match doc.section()? {
            Some(section) => array(section, keys::TSIG_KEYS, doc.path()),
            None => Ok(&[]),
        }
    }

    pub(crate) fn apply(
        &self,
        doc: &mut Document,
        name: &str,
        ensure: Ensure,
        tag_key: &str,
    ) -> Result<Outcome> {
        let kind = RecordKind::TsigKey;
        let path = doc.path().to_path_buf();
        let section = doc.section_mut()?;
        let located = locate(
            array(section, keys::TSIG_KEYS, &path)?,
            kind,
            tag_key,
            name,
            |entry| self.matches(entry),
        )?
        .map(|found| found.index());

        match ensure {
            Ensure::Absent => Ok(match located {
                Some(i) => remove_entry(array_mut(section, keys::TSIG_KEYS, &path)?, Some(i)),
                None => Outcome::AlreadyAbsent,
            }),
            Ensure::Present => {
                ensure!(
                    !self.key_name.is_empty() && !self.secret.is_empty(),
                    error::InvalidRecordSnafu {
                        kind,
                        name,
                        msg: "key-name and secret must not be empty",
                    }
                );
                ensure_unique_name(
                    array(section, keys::TSIG_KEYS, &path)?,
                    located,
                    kind,
                    &self.key_name,
                    tag_key,
                )?;
                upsert_entry(
                    array_mut(section, keys::TSIG_KEYS, &path)?,
                    located,
                    tag_key,
                    name,
                    |entry| self.write(entry),
                )
            }
        }
    }

    pub(crate) fn snapshot(&self, doc: &Document, name: &str, tag_key: &str) -> Result<Option<Self>> {
        let entries = Self::key_entries(doc)?;
        match locate(entries, RecordKind::TsigKey, tag_key, name, |entry| self.matches(entry))? {
            Some(found) => {
                let config: TsigKeyConfig = read_stored(&entries[found.index()], RecordKind::TsigKey)?;
                Ok(Some(config.into()))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn list(doc: &Document, tag_key: &str) -> Result<Vec<(String, Self)>> {
        Self::key_entries(doc)?
            .iter()
            .map(|entry| {
                let config: TsigKeyConfig = read_stored(entry, RecordKind::TsigKey)?;
                let name = tagged_name(entry, tag_key).unwrap_or_else(|| config.name.clone());
                Ok((name, config.into()))
            })
            .collect()
    }
}
