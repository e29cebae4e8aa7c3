use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use snafu::{ensure, OptionExt};
use std::net::IpAddr;

use super::types::{OptionData, PdPool, ScopeId};
use super::{read_entry, read_stored, render, tagged_name, Ensure, RecordKind};
use crate::allocator::{ensure_unique_subnet, resolve_id, stored_subnet};
use crate::document::{array, array_mut, Document};
use crate::error::{self, Result};
use crate::locator::locate;
use crate::mutation::{remove_entry, upsert_entry, Outcome};

/// A DHCPv4 or DHCPv6 subnet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Scope {
    #[serde(default)]
    pub id: ScopeId,
    pub subnet: IpNet,
    /// Address ranges, either "start - end" or a CIDR.
    #[serde(default)]
    pub pools: Vec<String>,
    /// Prefix delegation pools; DHCPv6 only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pd_pools: Vec<PdPool>,
    #[serde(default)]
    pub options: Vec<OptionData>,
}

// What a subnet entry looks like in the document.  Keys we don't model are ignored.
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoredScope {
    id: Option<u32>,
    subnet: IpNet,
    #[serde(default)]
    pools: Vec<StoredPool>,
    #[serde(default)]
    pd_pools: Vec<Value>,
    #[serde(default)]
    option_data: Vec<Value>,
}

#[derive(Deserialize)]
struct StoredPool {
    pool: String,
}

/// The name a subnet entry is listed under.
pub(crate) fn display_name(entry: &Value, tag_key: &str) -> String {
    if let Some(name) = tagged_name(entry, tag_key) {
        return name;
    }
    match (entry.get("id").and_then(Value::as_u64), entry.get("subnet")) {
        (Some(id), _) => format!("subnet-{}", id),
        (None, Some(Value::String(subnet))) => format!("subnet-{}", subnet),
        _ => "subnet-unknown".to_string(),
    }
}

fn valid_pool(pool: &str, v6: bool) -> bool {
    let same_family = |addr: &IpAddr| addr.is_ipv6() == v6;
    if let Ok(net) = pool.parse::<IpNet>() {
        return same_family(&net.addr());
    }
    match pool.split_once('-') {
        Some((start, end)) => match (
            start.trim().parse::<IpAddr>(),
            end.trim().parse::<IpAddr>(),
        ) {
            (Ok(start), Ok(end)) => same_family(&start) && same_family(&end) && start <= end,
            _ => false,
        },
        None => false,
    }
}

impl Scope {
    fn validate(&self, kind: RecordKind, name: &str) -> Result<()> {
        let v6 = kind == RecordKind::Dhcp6Scope;
        ensure!(
            matches!(self.subnet, IpNet::V6(_)) == v6,
            error::InvalidRecordSnafu {
                kind,
                name,
                msg: format!("subnet {} is the wrong address family", self.subnet),
            }
        );
        if let Some(pool) = self.pools.iter().find(|pool| !valid_pool(pool, v6)) {
            return error::InvalidRecordSnafu {
                kind,
                name,
                msg: format!("pool '{}' must be a CIDR or a 'start - end' range", pool),
            }
            .fail();
        }
        ensure!(
            v6 || self.pd_pools.is_empty(),
            error::InvalidRecordSnafu {
                kind,
                name,
                msg: "pd-pools are only supported by DHCPv6 scopes",
            }
        );
        Ok(())
    }

    fn matches(&self, entry: &Map<String, Value>) -> bool {
        stored_subnet(entry) == Some(self.subnet)
    }

    fn write(&self, entry: &mut Map<String, Value>, kind: RecordKind, id: u32) -> Result<()> {
        entry.insert("id".to_string(), json!(id));
        entry.insert("subnet".to_string(), Value::String(self.subnet.to_string()));

        // Pool entries can carry more than the range; keep those that still match
        let existing = entry
            .get("pools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let pools = self
            .pools
            .iter()
            .map(|range| {
                existing
                    .iter()
                    .find(|pool| pool.get("pool").and_then(Value::as_str) == Some(range.as_str()))
                    .cloned()
                    .unwrap_or_else(|| json!({ "pool": range }))
            })
            .collect();
        entry.insert("pools".to_string(), Value::Array(pools));

        if kind == RecordKind::Dhcp6Scope {
            entry.insert("pd-pools".to_string(), render(kind, "pd-pools", &self.pd_pools)?);
        }
        entry.insert("option-data".to_string(), render(kind, "options", &self.options)?);
        Ok(())
    }

    fn read(entry: &Value, kind: RecordKind) -> Result<Self> {
        let stored: StoredScope = read_entry(entry, kind)?;
        Ok(Self {
            id: stored.id.map(ScopeId::Fixed).unwrap_or_default(),
            subnet: stored.subnet,
            pools: stored.pools.into_iter().map(|p| p.pool).collect(),
            pd_pools: stored
                .pd_pools
                .iter()
                .map(|pool| read_stored(pool, kind))
                .collect::<Result<_>>()?,
            options: stored
                .option_data
                .iter()
                .map(|option| read_stored(option, kind))
                .collect::<Result<_>>()?,
        })
    }

    pub(crate) fn apply(
        &self,
        doc: &mut Document,
        kind: RecordKind,
        name: &str,
        ensure: Ensure,
        tag_key: &str,
    ) -> Result<Outcome> {
        let path = doc.path().to_path_buf();
        let subnet_key = kind.family().subnet_key().context(error::InternalSnafu {
            msg: format!("{} has no subnet container", kind),
        })?;
        let section = doc.section_mut()?;

        match ensure {
            Ensure::Absent => {
                let located = locate(
                    array(section, subnet_key, &path)?,
                    kind,
                    tag_key,
                    name,
                    |entry| self.matches(entry),
                )?;
                Ok(match located {
                    Some(found) => {
                        remove_entry(array_mut(section, subnet_key, &path)?, Some(found.index()))
                    }
                    None => Outcome::AlreadyAbsent,
                })
            }
            Ensure::Present => {
                self.validate(kind, name)?;
                let subnets = array_mut(section, subnet_key, &path)?;
                let located = locate(subnets, kind, tag_key, name, |entry| self.matches(entry))?
                    .map(|found| found.index());
                ensure_unique_subnet(subnets, located, &self.subnet, tag_key)?;
                let id = resolve_id(subnets, located, self.id, &path)?;
                upsert_entry(subnets, located, tag_key, name, |entry| {
                    self.write(entry, kind, id)
                })
            }
        }
    }

    pub(crate) fn snapshot(
        &self,
        doc: &Document,
        kind: RecordKind,
        name: &str,
        tag_key: &str,
    ) -> Result<Option<Self>> {
        let subnets = scope_entries(doc, kind)?;
        match locate(subnets, kind, tag_key, name, |entry| self.matches(entry))? {
            Some(found) => Ok(Some(Self::read(&subnets[found.index()], kind)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn list(doc: &Document, kind: RecordKind, tag_key: &str) -> Result<Vec<(String, Self)>> {
        scope_entries(doc, kind)?
            .iter()
            .map(|entry| Ok((display_name(entry, tag_key), Self::read(entry, kind)?)))
            .collect()
    }
}

fn scope_entries(doc: &Document, kind: RecordKind) -> Result<&[Value]> {
    let subnet_key = kind.family().subnet_key().context(error::InternalSnafu {
        msg: format!("{} has no subnet container", kind),
    })?;
    match doc.section()? {
        Some(section) => array(section, subnet_key, doc.path()),
        None => Ok(&[]),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::family::DocumentFamily;

    fn dhcp4(root: Value) -> Document {
        Document::new(DocumentFamily::Dhcp4, "/etc/kea/kea-dhcp4.conf", root).unwrap()
    }

    fn scope(subnet: &str, id: ScopeId) -> Scope {
        Scope {
            id,
            subnet: subnet.parse().unwrap(),
            pools: vec!["192.0.2.10 - 192.0.2.100".to_string()],
            pd_pools: Vec::new(),
            options: vec![OptionData::new("routers", "192.0.2.1")],
        }
    }

    const KEY: &str = "managed-name";

    #[test]
    fn create_with_auto_id() {
        let mut doc = dhcp4(json!({"Dhcp4": {"subnet4": [
            {"id": 2, "subnet": "198.51.100.0/24"},
            {"id": 5, "subnet": "203.0.113.0/24"},
        ]}}));
        let outcome = scope("192.0.2.0/24", ScopeId::Auto)
            .apply(&mut doc, RecordKind::Dhcp4Scope, "office", Ensure::Present, KEY)
            .unwrap();
        assert_eq!(outcome, Outcome::Created);
        assert_eq!(
            doc.root()["Dhcp4"]["subnet4"][2],
            json!({
                "user-context": {"managed-name": "office"},
                "id": 6,
                "subnet": "192.0.2.0/24",
                "pools": [{"pool": "192.0.2.10 - 192.0.2.100"}],
                "option-data": [{"name": "routers", "data": "192.0.2.1"}],
            })
        );
    }

    #[test]
    fn explicit_id_in_use() {
        let mut doc = dhcp4(json!({"Dhcp4": {"subnet4": [
            {"id": 5, "subnet": "203.0.113.0/24"},
        ]}}));
        let before = doc.clone();
        let err = scope("192.0.2.0/24", ScopeId::Fixed(5))
            .apply(&mut doc, RecordKind::Dhcp4Scope, "office", Ensure::Present, KEY)
            .unwrap_err();
        assert!(matches!(err, error::Error::IdInUse { id: 5, .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn rename_keeps_identity() {
        let mut doc = dhcp4(json!({"Dhcp4": {"subnet4": []}}));
        scope("192.0.2.0/24", ScopeId::Auto)
            .apply(&mut doc, RecordKind::Dhcp4Scope, "office", Ensure::Present, KEY)
            .unwrap();

        let mut moved = scope("192.0.3.0/24", ScopeId::Auto);
        moved.pools = vec!["192.0.3.10 - 192.0.3.20".to_string()];
        let outcome = moved
            .apply(&mut doc, RecordKind::Dhcp4Scope, "office", Ensure::Present, KEY)
            .unwrap();
        assert_eq!(outcome, Outcome::Updated);

        let subnets = doc.root()["Dhcp4"]["subnet4"].as_array().unwrap();
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0]["subnet"], json!("192.0.3.0/24"));
        assert_eq!(subnets[0]["id"], json!(1));
    }

    #[test]
    fn adopts_untagged_entry_and_keeps_extras() {
        let mut doc = dhcp4(json!({"Dhcp4": {"subnet4": [{
            "id": 7,
            "subnet": "192.0.2.0/24",
            "valid-lifetime": 600,
            "pools": [{"pool": "192.0.2.10 - 192.0.2.100", "client-class": "lab"}],
        }]}}));
        let outcome = scope("192.0.2.0/24", ScopeId::Auto)
            .apply(&mut doc, RecordKind::Dhcp4Scope, "office", Ensure::Present, KEY)
            .unwrap();
        assert_eq!(outcome, Outcome::Updated);

        let entry = &doc.root()["Dhcp4"]["subnet4"][0];
        assert_eq!(entry["id"], json!(7));
        assert_eq!(entry["valid-lifetime"], json!(600));
        assert_eq!(entry["pools"][0]["client-class"], json!("lab"));
        assert_eq!(entry["user-context"]["managed-name"], json!("office"));
    }

    #[test]
    fn delete_by_tag() {
        let mut doc = dhcp4(json!({"Dhcp4": {"subnet4": [
            {"id": 1, "subnet": "192.0.2.0/24", "user-context": {"managed-name": "office"}},
            {"id": 2, "subnet": "198.51.100.0/24"},
        ]}}));
        let gone = scope("10.0.0.0/8", ScopeId::Auto);
        let outcome = gone
            .apply(&mut doc, RecordKind::Dhcp4Scope, "office", Ensure::Absent, KEY)
            .unwrap();
        assert_eq!(outcome, Outcome::Removed);
        let outcome = gone
            .apply(&mut doc, RecordKind::Dhcp4Scope, "office", Ensure::Absent, KEY)
            .unwrap();
        assert_eq!(outcome, Outcome::AlreadyAbsent);
        assert_eq!(
            doc.root()["Dhcp4"]["subnet4"],
            json!([{"id": 2, "subnet": "198.51.100.0/24"}])
        );
    }

    #[test]
    fn wrong_family_and_bad_pool() {
        let mut doc = dhcp4(json!({"Dhcp4": {"subnet4": []}}));
        let v6 = Scope {
            pools: Vec::new(),
            ..scope("2001:db8::/64", ScopeId::Auto)
        };
        assert!(v6
            .apply(&mut doc, RecordKind::Dhcp4Scope, "v6", Ensure::Present, KEY)
            .is_err());

        let mut bad = scope("192.0.2.0/24", ScopeId::Auto);
        bad.pools = vec!["192.0.2.100 - 192.0.2.10".to_string()];
        let err = bad
            .apply(&mut doc, RecordKind::Dhcp4Scope, "bad", Ensure::Present, KEY)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidRecord);
    }

    #[test]
    fn v6_pd_pools() {
        let mut doc = Document::new(
            DocumentFamily::Dhcp6,
            "/etc/kea/kea-dhcp6.conf",
            json!({"Dhcp6": {"subnet6": []}}),
        )
        .unwrap();
        let v6 = Scope {
            id: ScopeId::Auto,
            subnet: "2001:db8:1::/64".parse().unwrap(),
            pools: vec!["2001:db8:1::100 - 2001:db8:1::1ff".to_string()],
            pd_pools: vec![PdPool {
                prefix: "2001:db8:8::".to_string(),
                prefix_len: 56,
                delegated_len: 64,
                excluded_prefix: None,
                excluded_prefix_len: None,
            }],
            options: Vec::new(),
        };
        v6.apply(&mut doc, RecordKind::Dhcp6Scope, "lab6", Ensure::Present, KEY)
            .unwrap();
        assert_eq!(
            doc.root()["Dhcp6"]["subnet6"][0]["pd-pools"],
            json!([{"prefix": "2001:db8:8::", "prefix-len": 56, "delegated-len": 64}])
        );

        let snapshot = v6
            .snapshot(&doc, RecordKind::Dhcp6Scope, "lab6", KEY)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot, Scope { id: ScopeId::Fixed(1), ..v6 });
    }

    #[test]
    fn listing_names() {
        let doc = dhcp4(json!({"Dhcp4": {"subnet4": [
            {"id": 1, "subnet": "192.0.2.0/24", "user-context": {"managed-name": "office"}},
            {"id": 2, "subnet": "198.51.100.0/24", "comment": "lab"},
            {"id": 3, "subnet": "203.0.113.0/24"},
        ]}}));
        let names: Vec<_> = Scope::list(&doc, RecordKind::Dhcp4Scope, KEY)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["office", "lab", "subnet-3"]);
    }

    #[test]
    fn annotated_options_read_back() {
        let mut doc = dhcp4(json!({"Dhcp4": {"subnet4": [{
            "id": 1,
            "subnet": "192.0.2.0/24",
            "option-data": [{
                "name": "routers",
                "data": "192.0.2.1",
                "comment": "core switch",
                "user-context": {"owner": "netops"},
            }],
        }]}}));
        let found = Scope::list(&doc, RecordKind::Dhcp4Scope, KEY).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.options, vec![OptionData::new("routers", "192.0.2.1")]);

        let desired = Scope {
            pools: Vec::new(),
            ..scope("192.0.2.0/24", ScopeId::Auto)
        };
        desired
            .apply(&mut doc, RecordKind::Dhcp4Scope, "office", Ensure::Present, KEY)
            .unwrap();
        let snapshot = desired
            .snapshot(&doc, RecordKind::Dhcp4Scope, "office", KEY)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.options, desired.options);
    }
}
