//! Kea document families and the keys they're organized under.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Keys used inside Kea documents.
pub mod keys {
    pub const DHCP4: &str = "Dhcp4";
    pub const DHCP6: &str = "Dhcp6";
    pub const DHCP_DDNS: &str = "DhcpDdns";

    pub const SUBNET4: &str = "subnet4";
    pub const SUBNET6: &str = "subnet6";
    pub const RESERVATIONS: &str = "reservations";
    pub const FORWARD_DDNS: &str = "forward-ddns";
    pub const REVERSE_DDNS: &str = "reverse-ddns";
    pub const DDNS_DOMAINS: &str = "ddns-domains";
    pub const TSIG_KEYS: &str = "tsig-keys";

    pub const USER_CONTEXT: &str = "user-context";
}

/// The three kinds of Kea document we manage.  Each has its own top-level section, default
/// location, and validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFamily {
    Dhcp4,
    Dhcp6,
    Ddns,
}

impl DocumentFamily {
    pub const ALL: [DocumentFamily; 3] = [Self::Dhcp4, Self::Dhcp6, Self::Ddns];

    /// The key of the section everything in this family lives under.
    pub fn root_key(&self) -> &'static str {
        match self {
            Self::Dhcp4 => keys::DHCP4,
            Self::Dhcp6 => keys::DHCP6,
            Self::Ddns => keys::DHCP_DDNS,
        }
    }

    /// The section created when a document or its section doesn't exist yet.
    pub fn default_section(&self) -> Value {
        match self {
            Self::Dhcp4 => json!({ keys::SUBNET4: [] }),
            Self::Dhcp6 => json!({ keys::SUBNET6: [] }),
            Self::Ddns => json!({ keys::FORWARD_DDNS: {}, keys::REVERSE_DDNS: {} }),
        }
    }

    /// The document used in place of a file that doesn't exist yet.
    pub fn default_document(&self) -> Value {
        let mut root = serde_json::Map::new();
        root.insert(self.root_key().to_string(), self.default_section());
        Value::Object(root)
    }

    /// The array holding this family's scopes, if it has any.
    pub fn subnet_key(&self) -> Option<&'static str> {
        match self {
            Self::Dhcp4 => Some(keys::SUBNET4),
            Self::Dhcp6 => Some(keys::SUBNET6),
            Self::Ddns => None,
        }
    }

    pub fn default_path(&self) -> PathBuf {
        PathBuf::from(match self {
            Self::Dhcp4 => constants::DHCP4_CONFIG_PATH,
            Self::Dhcp6 => constants::DHCP6_CONFIG_PATH,
            Self::Ddns => constants::DDNS_CONFIG_PATH,
        })
    }

    /// The command, minus the staged file argument, that checks a document of this family.
    pub fn default_validator(&self) -> Vec<String> {
        let bin = match self {
            Self::Dhcp4 => constants::KEA_DHCP4_BIN,
            Self::Dhcp6 => constants::KEA_DHCP6_BIN,
            Self::Ddns => constants::KEA_DDNS_BIN,
        };
        vec![bin.to_string(), constants::KEA_TEST_FLAG.to_string()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dhcp4 => "dhcp4",
            Self::Dhcp6 => "dhcp6",
            Self::Ddns => "ddns",
        }
    }
}

impl fmt::Display for DocumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocumentFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| format!("unknown document family '{}', expected dhcp4, dhcp6, or ddns", s))
    }
}
