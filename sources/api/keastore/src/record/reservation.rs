use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{ensure, OptionExt};
use std::net::Ipv4Addr;
use std::path::Path;

use super::types::ScopeId;
use super::{read_entry, tagged_name, Ensure, RecordKind};
use crate::allocator::ensure_unique_reservation;
use crate::document::{array, array_mut, Document};
use crate::error::{self, Result};
use crate::family::keys;
use crate::locator::{locate, locate_tagged};
use crate::mutation::{render_entry, set_or_remove, upsert_entry, Outcome};

const KIND: RecordKind = RecordKind::Dhcp4Reservation;

/// How a client is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentifierType {
    HwAddress,
    ClientId,
}

impl IdentifierType {
    pub const ALL: [IdentifierType; 2] = [Self::HwAddress, Self::ClientId];

    /// The reservation key holding an identifier of this type.
    pub fn key(&self) -> &'static str {
        match self {
            Self::HwAddress => "hw-address",
            Self::ClientId => "client-id",
        }
    }
}

/// A DHCPv4 host reservation.  It lives inside the scope given by `scope-id`, or, when that's
/// "auto", inside the first scope whose subnet contains `ip-address`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Reservation {
    #[serde(default)]
    pub scope_id: ScopeId,
    pub identifier_type: IdentifierType,
    pub identifier: String,
    pub ip_address: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoredReservation {
    hw_address: Option<String>,
    client_id: Option<String>,
    ip_address: Ipv4Addr,
    hostname: Option<String>,
}

/// The reservations of one subnet entry.
fn scope_reservations<'a>(scope: &'a Value, path: &Path) -> Result<&'a [Value]> {
    match scope.as_object() {
        Some(scope) => array(scope, keys::RESERVATIONS, path),
        None => Ok(&[]),
    }
}

fn scope_id_of(scope: &Value) -> Option<u64> {
    scope.get("id").and_then(Value::as_u64)
}

fn subnet4_entries(doc: &Document) -> Result<&[Value]> {
    match doc.section()? {
        Some(section) => array(section, keys::SUBNET4, doc.path()),
        None => Ok(&[]),
    }
}

// Where the reservation currently is, and where it should be.
struct Placement {
    tagged: Option<(usize, usize)>,
    target: Option<usize>,
    natural: Option<(usize, usize)>,
}

impl Reservation {
    fn validate(&self, name: &str) -> Result<()> {
        ensure!(
            !self.identifier.trim().is_empty(),
            error::InvalidRecordSnafu {
                kind: KIND,
                name,
                msg: "identifier must not be empty",
            }
        );
        Ok(())
    }

    fn matches(&self, entry: &Map<String, Value>) -> bool {
        entry.get(self.identifier_type.key()).and_then(Value::as_str)
            == Some(self.identifier.as_str())
    }

    /// Finds the owning scope: by id when one is given, else by subnet containment.
    fn resolve_scope(&self, subnets: &[Value]) -> Option<usize> {
        match self.scope_id {
            ScopeId::Fixed(id) => subnets
                .iter()
                .position(|scope| scope_id_of(scope) == Some(u64::from(id))),
            ScopeId::Auto => subnets.iter().position(|scope| {
                scope
                    .get("subnet")
                    .and_then(Value::as_str)
                    .and_then(|subnet| subnet.parse::<Ipv4Net>().ok())
                    .map_or(false, |net| net.contains(&self.ip_address))
            }),
        }
    }

    fn missing_scope(&self) -> error::Error {
        match self.scope_id {
            ScopeId::Fixed(id) => error::ScopeNotFoundSnafu { id }.build(),
            ScopeId::Auto => error::NoScopeContainsSnafu {
                ip: self.ip_address.to_string(),
            }
            .build(),
        }
    }

    fn place(&self, subnets: &[Value], path: &Path, name: &str, tag_key: &str) -> Result<Placement> {
        let all = subnets
            .iter()
            .map(|scope| scope_reservations(scope, path))
            .collect::<Result<Vec<_>>>()?;
        let tagged = locate_tagged(all.iter().copied(), KIND, tag_key, name)?;
        let target = self.resolve_scope(subnets);
        let natural = match target {
            Some(si) => locate(all[si], KIND, tag_key, name, |entry| self.matches(entry))?
                .map(|found| (si, found.index())),
            None => None,
        };
        Ok(Placement {
            tagged,
            target,
            natural,
        })
    }

    fn write(&self, entry: &mut Map<String, Value>) -> Result<()> {
        for other in IdentifierType::ALL {
            if other != self.identifier_type {
                entry.shift_remove(other.key());
            }
        }
        entry.insert(
            self.identifier_type.key().to_string(),
            Value::String(self.identifier.clone()),
        );
        entry.insert(
            "ip-address".to_string(),
            Value::String(self.ip_address.to_string()),
        );
        let hostname = self
            .hostname
            .as_ref()
            .filter(|hostname| !hostname.is_empty())
            .map(|hostname| Value::String(hostname.clone()));
        set_or_remove(entry, "hostname", hostname);
        Ok(())
    }

    fn read(entry: &Value, scope_id: Option<u64>, path: &Path) -> Result<Self> {
        let stored: StoredReservation = read_entry(entry, KIND)?;
        let (identifier_type, identifier) = match (stored.hw_address, stored.client_id) {
            (Some(mac), _) => (IdentifierType::HwAddress, mac),
            (None, Some(client_id)) => (IdentifierType::ClientId, client_id),
            (None, None) => {
                return error::InvalidDocumentSnafu {
                    path,
                    location: keys::RESERVATIONS,
                    expected: "reservations with an hw-address or client-id",
                }
                .fail()
            }
        };
        Ok(Self {
            scope_id: scope_id
                .and_then(|id| u32::try_from(id).ok())
                .map(ScopeId::Fixed)
                .unwrap_or_default(),
            identifier_type,
            identifier,
            ip_address: stored.ip_address,
            hostname: stored.hostname,
        })
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
        let placement = self.place(array(section, keys::SUBNET4, &path)?, &path, name, tag_key)?;

        if ensure == Ensure::Absent {
            return match placement.tagged.or(placement.natural) {
                Some((si, ri)) => {
                    let subnets = array_mut(section, keys::SUBNET4, &path)?;
                    reservations_mut(&mut subnets[si], &path)?.remove(ri);
                    Ok(Outcome::Removed)
                }
                None => Ok(Outcome::AlreadyAbsent),
            };
        }

        self.validate(name)?;
        let si = match placement.target {
            Some(si) => si,
            None => return Err(self.missing_scope()),
        };
        let (located, moving_from) = match placement.tagged {
            Some((s, r)) if s == si => (Some(r), None),
            Some(elsewhere) => (None, Some(elsewhere)),
            None => (placement.natural.map(|(_, r)| r), None),
        };

        let subnets = array_mut(section, keys::SUBNET4, &path)?;
        let scope_id = scope_id_of(&subnets[si]).unwrap_or_default();
        let subnet = subnets[si]
            .get("subnet")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let moved = match moving_from {
            Some((s, r)) => Some(scope_reservations(&subnets[s], &path)?[r].clone()),
            None => None,
        };

        let reservations = reservations_mut(&mut subnets[si], &path)?;
        ensure_unique_reservation(reservations, located, self, scope_id, &subnet)?;
        let outcome = match moved {
            Some(base) => {
                let entry = render_entry(Some(&base), tag_key, name, |entry| self.write(entry))?;
                reservations.push(entry);
                Outcome::Updated
            }
            None => upsert_entry(reservations, located, tag_key, name, |entry| self.write(entry))?,
        };

        if let Some((s, r)) = moving_from {
            debug!(
                "Moved reservation '{}' from subnet {} to subnet {}",
                name,
                scope_id_of(&subnets[s]).unwrap_or_default(),
                scope_id
            );
            reservations_mut(&mut subnets[s], &path)?.remove(r);
        }
        Ok(outcome)
    }

    pub(crate) fn snapshot(&self, doc: &Document, name: &str, tag_key: &str) -> Result<Option<Self>> {
        let subnets = subnet4_entries(doc)?;
        let placement = self.place(subnets, doc.path(), name, tag_key)?;
        match placement.tagged.or(placement.natural) {
            Some((si, ri)) => {
                let entry = &scope_reservations(&subnets[si], doc.path())?[ri];
                Ok(Some(Self::read(entry, scope_id_of(&subnets[si]), doc.path())?))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn list(doc: &Document, tag_key: &str) -> Result<Vec<(String, Self)>> {
        let mut found = Vec::new();
        for scope in subnet4_entries(doc)? {
            let scope_id = scope_id_of(scope);
            for entry in scope_reservations(scope, doc.path())? {
                let reservation = Self::read(entry, scope_id, doc.path())?;
                let name = tagged_name(entry, tag_key).unwrap_or_else(|| {
                    let scope_id = scope_id.map(|id| id.to_string()).unwrap_or_default();
                    match reservation.hostname.as_deref().filter(|h| !h.is_empty()) {
                        Some(hostname) => format!("{}-{}", hostname, scope_id),
                        None => format!(
                            "{}-{}-{}",
                            reservation.identifier_type.key(),
                            reservation.identifier,
                            scope_id
                        ),
                    }
                });
                found.push((name, reservation));
            }
        }
        Ok(found)
    }
}

fn reservations_mut<'a>(scope: &'a mut Value, path: &Path) -> Result<&'a mut Vec<Value>> {
    let scope = scope.as_object_mut().context(error::InvalidDocumentSnafu {
        path,
        location: keys::SUBNET4,
        expected: "subnet entries that are objects",
    })?;
    array_mut(scope, keys::RESERVATIONS, path)
}
