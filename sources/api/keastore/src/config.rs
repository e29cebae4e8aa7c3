use serde::Deserialize;
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{self, Result};
use crate::family::DocumentFamily;

/// Settings for one document family.  Anything left out falls back to the family default.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FamilyConfig {
    pub config_path: Option<PathBuf>,
    pub validator: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_identity_tag_key")]
    pub identity_tag_key: String,
    #[serde(default = "default_validator_timeout_secs")]
    pub validator_timeout_secs: u64,
    #[serde(default)]
    pub dhcp4: FamilyConfig,
    #[serde(default)]
    pub dhcp6: FamilyConfig,
    #[serde(default)]
    pub ddns: FamilyConfig,
}

fn default_identity_tag_key() -> String {
    constants::IDENTITY_TAG_KEY.to_string()
}

fn default_validator_timeout_secs() -> u64 {
    constants::VALIDATOR_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity_tag_key: default_identity_tag_key(),
            validator_timeout_secs: default_validator_timeout_secs(),
            dhcp4: FamilyConfig::default(),
            dhcp6: FamilyConfig::default(),
            ddns: FamilyConfig::default(),
        }
    }
}

impl Config {
    /// Parses the configuration file at the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).context(error::ConfigReadSnafu { path })?;
        toml::from_str(&contents).context(error::ConfigParseSnafu { path })
    }

    /// Like `from_file`, but a missing file means every setting takes its default.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No config at '{}', using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    fn family(&self, family: DocumentFamily) -> &FamilyConfig {
        match family {
            DocumentFamily::Dhcp4 => &self.dhcp4,
            DocumentFamily::Dhcp6 => &self.dhcp6,
            DocumentFamily::Ddns => &self.ddns,
        }
    }

    /// Where a family's document lives when a record doesn't say otherwise.
    pub fn default_path(&self, family: DocumentFamily) -> PathBuf {
        self.family(family)
            .config_path
            .clone()
            .unwrap_or_else(|| family.default_path())
    }

    /// The validator command for a family, minus the staged file argument.
    pub fn validator_command(&self, family: DocumentFamily) -> Vec<String> {
        self.family(family)
            .validator
            .clone()
            .unwrap_or_else(|| family.default_validator())
    }

    /// None when the timeout is disabled.
    pub fn validator_timeout(&self) -> Option<Duration> {
        match self.validator_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
