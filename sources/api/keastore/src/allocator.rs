//! Scope id allocation and the uniqueness rules checked before an entry is written.

use ipnet::IpNet;
use serde_json::{Map, Value};
use snafu::{ensure, OptionExt};
use std::path::Path;

use crate::error::{self, Result};
use crate::record::{RecordKind, Reservation, ScopeId};

fn stored_id(entry: &Value) -> Option<u64> {
    entry.get("id").and_then(Value::as_u64)
}

/// The subnet an entry is stored with, if it parses.
pub(crate) fn stored_subnet(entry: &Map<String, Value>) -> Option<IpNet> {
    entry
        .get("subnet")
        .and_then(Value::as_str)
        .and_then(|subnet| subnet.parse().ok())
}

/// Picks the id a scope is written with.  `current` is the position of the scope's existing
/// entry, if it has one.
///
/// * An explicit id is kept, unless another entry already uses it.
/// * "auto" keeps the existing entry's id, or takes one past the highest id in use, starting
///   from 1.
pub fn resolve_id(
    entries: &[Value],
    current: Option<usize>,
    requested: ScopeId,
    path: &Path,
) -> Result<u32> {
    match requested {
        ScopeId::Fixed(id) => {
            let taken = entries
                .iter()
                .enumerate()
                .any(|(i, entry)| Some(i) != current && stored_id(entry) == Some(u64::from(id)));
            ensure!(!taken, error::IdInUseSnafu { id, path });
            Ok(id)
        }
        ScopeId::Auto => {
            if let Some(id) = current
                .and_then(|i| stored_id(&entries[i]))
                .and_then(|id| u32::try_from(id).ok())
            {
                return Ok(id);
            }
            let highest = entries.iter().filter_map(stored_id).max().unwrap_or(0);
            highest
                .checked_add(1)
                .and_then(|next| u32::try_from(next).ok())
                .context(error::InvalidDocumentSnafu {
                    path,
                    location: "id",
                    expected: "scope ids that leave room for another",
                })
        }
    }
}

/// Fails if an entry other than `current` already defines `subnet`.
pub(crate) fn ensure_unique_subnet(
    entries: &[Value],
    current: Option<usize>,
    subnet: &IpNet,
    tag_key: &str,
) -> Result<()> {
    let existing = entries.iter().enumerate().find(|(i, entry)| {
        Some(*i) != current
            && entry.as_object().and_then(stored_subnet).as_ref() == Some(subnet)
    });
    match existing {
        Some((_, entry)) => error::DuplicateSubnetSnafu {
            subnet: subnet.to_string(),
            existing: crate::record::scope_display_name(entry, tag_key),
        }
        .fail(),
        None => Ok(()),
    }
}

/// Fails if a sibling reservation, other than `current`, shares the reservation's identifier,
/// IP address, or hostname.
pub(crate) fn ensure_unique_reservation(
    siblings: &[Value],
    current: Option<usize>,
    reservation: &Reservation,
    scope_id: u64,
    subnet: &str,
) -> Result<()> {
    let ip = reservation.ip_address.to_string();
    let hostname = reservation.hostname.as_deref().filter(|h| !h.is_empty());
    let id_key = reservation.identifier_type.key();

    for (i, sibling) in siblings.iter().enumerate() {
        if Some(i) == current {
            continue;
        }
        let sibling = match sibling.as_object() {
            Some(sibling) => sibling,
            None => continue,
        };
        let stored = |key: &str| sibling.get(key).and_then(Value::as_str);

        let clash = if stored(id_key) == Some(reservation.identifier.as_str()) {
            Some((id_key, reservation.identifier.as_str()))
        } else if stored("ip-address") == Some(ip.as_str()) {
            Some(("ip-address", ip.as_str()))
        } else {
            hostname
                .filter(|h| stored("hostname") == Some(*h))
                .map(|h| ("hostname", h))
        };

        if let Some((field, value)) = clash {
            return error::DuplicateReservationSnafu {
                field,
                value,
                scope_id,
                subnet,
            }
            .fail();
        }
    }
    Ok(())
}

/// Fails if an entry other than `current` already uses `value` as its `name`.  Used for DDNS
/// domains and TSIG keys, which Kea looks up by name.
pub(crate) fn ensure_unique_name(
    entries: &[Value],
    current: Option<usize>,
    kind: RecordKind,
    value: &str,
    tag_key: &str,
) -> Result<()> {
    let existing = entries.iter().enumerate().find(|(i, entry)| {
        Some(*i) != current && entry.get("name").and_then(Value::as_str) == Some(value)
    });
    match existing {
        Some((_, entry)) => error::DuplicateNameSnafu {
            kind,
            value,
            existing: crate::record::tagged_name(entry, tag_key)
                .unwrap_or_else(|| value.to_string()),
        }
        .fail(),
        None => Ok(()),
    }
}
