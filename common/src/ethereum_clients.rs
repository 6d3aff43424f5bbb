// Blockchain client version gate
//
// Integration suites drive a local geth or parity node, old releases are
// missing RPC endpoints the fixtures rely on. The check fails closed: a string
// that can't be parsed is reported as unsupported, never as an error.

use crate::config::{
    HIGHEST_SUPPORTED_GETH_VERSION, HIGHEST_SUPPORTED_PARITY_VERSION,
    LOWEST_SUPPORTED_GETH_VERSION, LOWEST_SUPPORTED_PARITY_VERSION,
};
use lazy_static::lazy_static;
use regex::Regex;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EthClient {
    Geth,
    Parity,
}

impl EthClient {
    pub fn lowest_supported_version(&self) -> &'static str {
        match self {
            Self::Geth => LOWEST_SUPPORTED_GETH_VERSION,
            Self::Parity => LOWEST_SUPPORTED_PARITY_VERSION,
        }
    }

    // Only used for reporting, versions above it are accepted
    pub fn highest_supported_version(&self) -> &'static str {
        match self {
            Self::Geth => HIGHEST_SUPPORTED_GETH_VERSION,
            Self::Parity => HIGHEST_SUPPORTED_PARITY_VERSION,
        }
    }

    // Binary and argument printing the client identification
    pub fn version_command(&self) -> (&'static str, &'static str) {
        match self {
            Self::Geth => ("geth", "version"),
            Self::Parity => ("openethereum", "--version"),
        }
    }

    fn from_identification(client_version: &str) -> Option<Self> {
        let client_version = client_version.trim_start();
        if client_version.starts_with("Geth") {
            Some(Self::Geth)
        } else if client_version.starts_with("Parity") || client_version.starts_with("OpenEthereum")
        {
            Some(Self::Parity)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSupport {
    Supported,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientVersionCheck {
    pub support: VersionSupport,
    // Only set when the version is supported
    pub client: Option<EthClient>,
    // Parsed version, if any could be found
    pub version: Option<Version>,
}

impl ClientVersionCheck {
    fn unsupported(version: Option<Version>) -> Self {
        Self {
            support: VersionSupport::Unsupported,
            client: None,
            version,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.support == VersionSupport::Supported
    }
}

// Both the RPC identification (`Geth/v1.7.3-unstable-e9295163/linux-amd64/go1.9.1`,
// `Parity//v1.7.6-stable-19535333c-20171013/x86_64-linux-gnu/rustc1.20.0`) and the
// output of `geth version` (`Version: 1.10.26-stable`) are accepted
const VERSION_PATTERN: &str = r"(?m)(?:/v|Version:\s*v?)(\d+)\.(\d+)\.(\d+)";

lazy_static! {
    // Compiled once, the pattern is a constant
    static ref VERSION_REGEX: Option<Regex> = Regex::new(VERSION_PATTERN).ok();
}

// Extract the three components version, the commit and platform suffixes are ignored
pub fn parse_client_version(client_version: &str) -> Option<Version> {
    let pattern = VERSION_REGEX.as_ref()?;
    let captures = pattern.captures(client_version)?;
    let component = |index: usize| -> Option<u64> { captures.get(index)?.as_str().parse().ok() };

    Some(Version::new(component(1)?, component(2)?, component(3)?))
}

// Check the client against its inclusive minimum version
// There is no effective upper bound, any newer release is accepted
pub fn is_supported_client(client_version: &str) -> ClientVersionCheck {
    let Some(client) = EthClient::from_identification(client_version) else {
        return ClientVersionCheck::unsupported(parse_client_version(client_version));
    };

    is_supported_version(client_version, client, client.lowest_supported_version())
}

// Same as is_supported_client with an explicit minimum
pub fn is_supported_version(
    client_version: &str,
    client: EthClient,
    minimum: &str,
) -> ClientVersionCheck {
    let Some(version) = parse_client_version(client_version) else {
        return ClientVersionCheck::unsupported(None);
    };

    let matches = VersionReq::parse(&format!(">={}", minimum))
        .map(|req| req.matches(&version))
        .unwrap_or(false);

    if matches {
        ClientVersionCheck {
            support: VersionSupport::Supported,
            client: Some(client),
            version: Some(version),
        }
    } else {
        ClientVersionCheck::unsupported(Some(version))
    }
}
