//! Value types shared by several record kinds.  These use Kea's own key names, so they
//! serialize straight into document entries.
//!
//! As input they're strict, and unknown keys are refused.  Entries already in a document may
//! carry keys Kea accepts but we don't model, like `comment` or `user-context`, so reading them
//! back goes through [`Stored`] and only looks at the modeled keys.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

/// A scope's numeric id, or a request to have one picked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeId {
    #[default]
    Auto,
    Fixed(u32),
}

impl Serialize for ScopeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScopeId::Auto => serializer.serialize_str("auto"),
            ScopeId::Fixed(id) => serializer.serialize_u32(*id),
        }
    }
}

impl<'de> Deserialize<'de> for ScopeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(u32),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Id(0) => Err(de::Error::custom("scope id must be at least 1")),
            Raw::Id(id) => Ok(ScopeId::Fixed(id)),
            Raw::Word(word) if word == "auto" => Ok(ScopeId::Auto),
            Raw::Word(word) => Err(de::Error::custom(format!(
                "scope id must be a positive integer or 'auto', got '{}'",
                word
            ))),
        }
    }
}

/// A Kea value that can be read back out of a document.
pub(crate) trait Stored: DeserializeOwned {
    /// The keys this type models; any others in a stored entry are skipped.
    const KEYS: &'static [&'static str];
}

/// An `option-data` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OptionData {
    pub name: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv_format: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_send: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub never_send: Option<bool>,
}

impl OptionData {
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, data: S2) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            code: None,
            space: None,
            csv_format: None,
            always_send: None,
            never_send: None,
        }
    }
}

impl Stored for OptionData {
    const KEYS: &'static [&'static str] = &[
        "name",
        "data",
        "code",
        "space",
        "csv-format",
        "always-send",
        "never-send",
    ];
}

/// A `hooks-libraries` entry.  Parameters are library-specific, so they're kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HooksLibrary {
    pub library: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

impl Stored for HooksLibrary {
    const KEYS: &'static [&'static str] = &["library", "parameters"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseBackend {
    Postgresql,
}

/// The `lease-database` map.  Only the PostgreSQL backend is managed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LeaseDatabase {
    #[serde(rename = "type")]
    pub backend: LeaseBackend,
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl Stored for LeaseDatabase {
    const KEYS: &'static [&'static str] = &["type", "name", "user", "password", "host", "port"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NcrProtocol {
    #[default]
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "TCP")]
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NcrFormat {
    #[default]
    #[serde(rename = "JSON")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceClientName {
    Never,
    Always,
    WhenPresent,
    WhenNotPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolutionMode {
    CheckWithDhcid,
    NoCheckWithDhcid,
    CheckExistsWithDhcid,
    NoCheckWithoutDhcid,
}

/// The DHCPv4 server's `dhcp-ddns` map, describing how it talks to the DDNS daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DhcpDdnsConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_updates: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncr_protocol: Option<NcrProtocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncr_format: Option<NcrFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddns_replace_client_name: Option<ReplaceClientName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddns_conflict_resolution_mode: Option<ConflictResolutionMode>,
}

impl Stored for DhcpDdnsConnection {
    const KEYS: &'static [&'static str] = &[
        "enable-updates",
        "server-ip",
        "server-port",
        "sender-ip",
        "sender-port",
        "max-queue-size",
        "ncr-protocol",
        "ncr-format",
        "ddns-replace-client-name",
        "ddns-conflict-resolution-mode",
    ];
}

/// A DHCPv6 prefix delegation pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PdPool {
    pub prefix: String,
    pub prefix_len: u8,
    pub delegated_len: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_prefix_len: Option<u8>,
}

impl Stored for PdPool {
    const KEYS: &'static [&'static str] = &[
        "prefix",
        "prefix-len",
        "delegated-len",
        "excluded-prefix",
        "excluded-prefix-len",
    ];
}

/// A DNS server a DDNS domain sends updates to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DnsServer {
    pub ip_address: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
}

impl Stored for DnsServer {
    const KEYS: &'static [&'static str] = &["ip-address", "port", "key-name"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TsigAlgorithm {
    #[serde(rename = "HMAC-MD5")]
    HmacMd5,
    #[serde(rename = "HMAC-SHA1")]
    HmacSha1,
    #[serde(rename = "HMAC-SHA224")]
    HmacSha224,
    #[serde(rename = "HMAC-SHA256")]
    HmacSha256,
    #[serde(rename = "HMAC-SHA384")]
    HmacSha384,
    #[serde(rename = "HMAC-SHA512")]
    HmacSha512,
}

/// A `tsig-keys` entry, as stored under `DhcpDdns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TsigKeyConfig {
    pub name: String,
    pub algorithm: TsigAlgorithm,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_bits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<Map<String, Value>>,
}

impl Stored for TsigKeyConfig {
    const KEYS: &'static [&'static str] =
        &["name", "algorithm", "secret", "digest-bits", "user-context"];
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_id_forms() {
        assert_eq!(
            serde_json::from_value::<ScopeId>(json!("auto")).unwrap(),
            ScopeId::Auto
        );
        assert_eq!(
            serde_json::from_value::<ScopeId>(json!(7)).unwrap(),
            ScopeId::Fixed(7)
        );
        assert!(serde_json::from_value::<ScopeId>(json!("seven")).is_err());
        assert!(serde_json::from_value::<ScopeId>(json!(0)).is_err());
        assert!(serde_json::from_value::<ScopeId>(json!(-1)).is_err());
        assert_eq!(serde_json::to_value(ScopeId::Fixed(3)).unwrap(), json!(3));
    }

    #[test]
    fn option_data_is_strict() {
        let option: OptionData = serde_json::from_value(json!({
            "name": "routers",
            "data": "192.0.2.1",
        }))
        .unwrap();
        assert_eq!(option, OptionData::new("routers", "192.0.2.1"));
        assert_eq!(
            serde_json::to_value(&option).unwrap(),
            json!({"name": "routers", "data": "192.0.2.1"})
        );

        // Wrong shapes are refused rather than coerced
        assert!(serde_json::from_value::<OptionData>(json!({"name": "routers", "data": 5})).is_err());
        assert!(serde_json::from_value::<OptionData>(json!({"name": "routers"})).is_err());
    }

    #[test]
    fn lease_database_backend() {
        let db = json!({
            "type": "postgresql",
            "name": "kea",
            "user": "kea",
            "password": "secret",
            "host": "db.example.com",
            "port": 5432,
        });
        let parsed: LeaseDatabase = serde_json::from_value(db.clone()).unwrap();
        assert_eq!(parsed.backend, LeaseBackend::Postgresql);
        assert_eq!(serde_json::to_value(&parsed).unwrap(), db);

        let mut mysql = db;
        mysql["type"] = json!("mysql");
        assert!(serde_json::from_value::<LeaseDatabase>(mysql).is_err());
    }

    #[test]
    fn tsig_algorithm_names() {
        assert_eq!(
            serde_json::to_value(TsigAlgorithm::HmacSha256).unwrap(),
            json!("HMAC-SHA256")
        );
        assert!(serde_json::from_value::<TsigAlgorithm>(json!("HMAC-SHA3")).is_err());
    }
}
