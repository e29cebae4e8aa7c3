/*!
  This crate contains constants shared across the Kea configuration crates
*/

// Default location of the kea-committer config file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/kea-committer.toml";

// Default Kea document locations, one per server
pub const DHCP4_CONFIG_PATH: &str = "/etc/kea/kea-dhcp4.conf";
pub const DHCP6_CONFIG_PATH: &str = "/etc/kea/kea-dhcp6.conf";
pub const DDNS_CONFIG_PATH: &str = "/etc/kea/kea-dhcp-ddns.conf";

// Kea server binaries, used to check staged documents before they're committed
pub const KEA_DHCP4_BIN: &str = "kea-dhcp4";
pub const KEA_DHCP6_BIN: &str = "kea-dhcp6";
pub const KEA_DDNS_BIN: &str = "kea-dhcp-ddns";
// Flag asking a Kea server to only check the given file
pub const KEA_TEST_FLAG: &str = "-t";

// Key inside an entry's user-context that holds our identity tag
pub const IDENTITY_TAG_KEY: &str = "managed-name";

// How long a validator gets before it's killed; 0 disables the limit
pub const VALIDATOR_TIMEOUT_SECS: u64 = 60;

// Prefix for staging directories created under the system temp dir
pub const STAGING_PREFIX: &str = "kea-stage";
