//! Static configuration: network definitions and local paths.
//!
//! The configuration names secrets by environment variable and never holds
//! key material itself. Secrets are looked up when the
//! [`NetworkRegistry`](crate::NetworkRegistry) is built.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// The default name for the configuration file.
pub const UPROXY_CONF_FILENAME: &str = "Uproxy.toml";

/// Default directory holding compiled contract artifacts.
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

/// Default directory holding per-network manifests and locks.
pub const DEFAULT_MANIFESTS_DIR: &str = ".uproxy";

/// Name of the local development network.
pub const LOCAL_NETWORK: &str = "local";

/// Definition of a network as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    /// JSON-RPC endpoint. `${VAR}` placeholders are expanded from the environment.
    pub url: String,
    /// Expected chain id. When unset, the endpoint's chain id is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Environment variables holding the signing keys, in signer order.
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Fixed gas limit per transaction. Estimated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    /// Confirmation timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Blocks to wait for, counting the inclusion block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    /// Receipt polling interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
}

impl NetworkDefinition {
    /// Create a definition with just an endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chain_id: None,
            accounts: Vec::new(),
            gas: None,
            timeout: None,
            confirmations: None,
            poll_interval: None,
        }
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn accounts<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accounts = accounts.into_iter().map(Into::into).collect();
        self
    }

    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    pub fn poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval = Some(poll_interval_ms);
        self
    }
}

/// Top-level configuration.
///
/// Serializable to and from TOML; the binary layers a config file and
/// `UPROXY_*` environment variables over [`UproxyConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UproxyConfig {
    /// Network used when a command does not name one.
    pub default_network: String,
    /// Directory searched for compiled artifacts.
    pub artifacts: PathBuf,
    /// Directory for network manifests and run locks.
    pub manifests: PathBuf,
    /// Known networks by name.
    pub networks: BTreeMap<String, NetworkDefinition>,
}

impl Default for UproxyConfig {
    fn default() -> Self {
        Self {
            default_network: LOCAL_NETWORK.to_string(),
            artifacts: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            manifests: PathBuf::from(DEFAULT_MANIFESTS_DIR),
            networks: builtin_networks(),
        }
    }
}

/// The networks available without any configuration file.
pub fn builtin_networks() -> BTreeMap<String, NetworkDefinition> {
    BTreeMap::from([
        (
            LOCAL_NETWORK.to_string(),
            NetworkDefinition::new("http://127.0.0.1:8545")
                .chain_id(31337)
                .accounts([
                    "RINKEBY_PRIVATE_KEY",
                    "RINKEBY_PRIVATE_KEY_2",
                    "RINKEBY_PRIVATE_KEY_3",
                ])
                .gas(8_000_000)
                .timeout(100_000),
        ),
        (
            "moonrabbit".to_string(),
            NetworkDefinition::new("https://evm.moonrabbit.com")
                .chain_id(1280)
                .accounts(["MOONRABBIT_PRIVATE_KEY"]),
        ),
        (
            // Shares chain id 1280 with `moonrabbit` upstream, so the id is
            // taken from the endpoint instead of being declared twice.
            "moonrabbit_test".to_string(),
            NetworkDefinition::new("https://testnetevm.moonrabbit.com")
                .accounts(["MOONRABBIT_TEST_KEY"]),
        ),
        (
            "rinkeby".to_string(),
            NetworkDefinition::new("https://rinkeby.infura.io/v3/${INFURA_API_KEY}")
                .chain_id(4)
                .accounts(["RINKEBY_PRIVATE_KEY", "RINKEBY_PRIVATE_KEY_2"]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_networks() {
        let networks = builtin_networks();
        assert_eq!(networks.len(), 4);

        let local = &networks[LOCAL_NETWORK];
        assert_eq!(local.chain_id, Some(31337));
        assert_eq!(local.accounts.len(), 3);
        assert_eq!(local.gas, Some(8_000_000));
        assert_eq!(local.timeout, Some(100_000));

        assert_eq!(networks["moonrabbit_test"].chain_id, None);
        assert_eq!(networks["moonrabbit_test"].accounts, vec!["MOONRABBIT_TEST_KEY"]);
    }

    #[test]
    fn test_definition_optional_fields_default() {
        let definition: NetworkDefinition =
            serde_json::from_str(r#"{ "url": "http://localhost:8545" }"#).unwrap();
        assert_eq!(definition, NetworkDefinition::new("http://localhost:8545"));
        assert!(definition.accounts.is_empty());
    }
}
