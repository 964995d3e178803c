//! Network registry: resolves network names to connection parameters and
//! signing credentials.
//!
//! The registry is built once from [`UproxyConfig`] and an explicit snapshot of
//! the environment, then shared read-only with every orchestrator.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    time::Duration,
};

use serde::Serialize;
use url::Url;

use crate::{
    OrchestrationError, Result,
    config::{NetworkDefinition, UproxyConfig},
};

/// Confirmation timeout used when a network does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Receipt polling interval used when a network does not set one.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// A private-key-equivalent secret.
///
/// The value never appears in `Debug` output or serialized profiles.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Environment variable the secret was read from, if any.
    source: Option<String>,
    secret: String,
}

impl Credential {
    /// A credential read from the named environment variable.
    pub fn from_env(var: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            source: Some(var.into()),
            secret: secret.into(),
        }
    }

    /// A credential given directly.
    pub fn literal(secret: impl Into<String>) -> Self {
        Self {
            source: None,
            secret: secret.into(),
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn expose(&self) -> &str {
        self.secret.trim()
    }

    /// Whether the secret is unset or an obvious placeholder.
    ///
    /// Missing variables resolve to the empty string, so this is the check
    /// that keeps an unset secret from reaching signer construction.
    pub fn is_placeholder(&self) -> bool {
        let secret = self.secret.trim();
        let digits = secret
            .strip_prefix("0x")
            .or_else(|| secret.strip_prefix("0X"))
            .unwrap_or(secret);

        digits.is_empty()
            || digits.chars().all(|c| c == '0')
            || (secret.starts_with('<') && secret.ends_with('>'))
            || (secret.starts_with("${") && secret.ends_with('}'))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Everything needed to talk to one network.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkProfile {
    /// Symbolic network name.
    pub name: String,
    /// JSON-RPC endpoint with placeholders expanded.
    pub rpc_url: String,
    /// Expected chain id, if declared.
    pub chain_id: Option<u64>,
    /// Signing credentials in signer order.
    #[serde(skip)]
    pub credentials: Vec<Credential>,
    /// Fixed gas limit per transaction.
    pub gas_limit: Option<u64>,
    /// Confirmation timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Blocks to wait for, counting the inclusion block.
    pub confirmations: u64,
    /// Receipt polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Variables referenced by the URL template that are unset.
    #[serde(skip)]
    pub unresolved: Vec<String>,
}

impl NetworkProfile {
    /// Build a profile from its definition, reading secrets from `env`.
    pub fn from_definition(
        name: &str,
        definition: &NetworkDefinition,
        env: &HashMap<String, String>,
    ) -> Self {
        let credentials = definition
            .accounts
            .iter()
            .map(|var| Credential::from_env(var, env.get(var).cloned().unwrap_or_default()))
            .collect();

        let (rpc_url, unresolved) = expand_placeholders(&definition.url, env);

        Self {
            name: name.to_string(),
            rpc_url,
            chain_id: definition.chain_id,
            credentials,
            gas_limit: definition.gas,
            timeout_ms: definition.timeout,
            confirmations: definition.confirmations.unwrap_or(1).max(1),
            poll_interval_ms: definition.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            unresolved,
        }
    }

    /// How long to wait for a submitted transaction.
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Interval between receipt polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check that the profile can be used to submit transactions.
    ///
    /// Runs before any network call.
    pub fn validate(&self) -> Result<()> {
        if !self.unresolved.is_empty() {
            return Err(OrchestrationError::Config(format!(
                "network `{}` has an RPC URL referencing unset variables: {}",
                self.name,
                self.unresolved.join(", ")
            )));
        }

        Url::parse(&self.rpc_url).map_err(|e| {
            OrchestrationError::Config(format!(
                "network `{}` has an invalid RPC URL: {}",
                self.name, e
            ))
        })?;

        if self.credentials.is_empty() {
            return Err(OrchestrationError::MissingCredentials {
                network: self.name.clone(),
                index: 0,
            });
        }

        if let Some(index) = self.credentials.iter().position(Credential::is_placeholder) {
            return Err(OrchestrationError::MissingCredentials {
                network: self.name.clone(),
                index,
            });
        }

        Ok(())
    }
}

/// Immutable mapping from network name to [`NetworkProfile`].
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    profiles: BTreeMap<String, NetworkProfile>,
}

impl NetworkRegistry {
    /// Build the registry from configuration and an environment snapshot.
    ///
    /// Fails if two networks declare the same chain id.
    pub fn from_config(config: &UproxyConfig, env: &HashMap<String, String>) -> Result<Self> {
        let mut seen: HashMap<u64, &str> = HashMap::new();
        for (name, definition) in &config.networks {
            let Some(chain_id) = definition.chain_id else {
                continue;
            };
            if let Some(first) = seen.insert(chain_id, name) {
                return Err(OrchestrationError::DuplicateChainId {
                    chain_id,
                    first: first.to_string(),
                    second: name.clone(),
                });
            }
        }

        let profiles = config
            .networks
            .iter()
            .map(|(name, definition)| {
                (
                    name.clone(),
                    NetworkProfile::from_definition(name, definition, env),
                )
            })
            .collect();

        Ok(Self { profiles })
    }

    /// Build the registry from configuration and the process environment.
    pub fn from_process_env(config: &UproxyConfig) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_config(config, &env)
    }

    /// Resolve a network for deployment or upgrade.
    ///
    /// Returns only profiles whose credentials are all usable.
    pub fn resolve(&self, name: &str) -> Result<&NetworkProfile> {
        let profile = self.get(name)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Look up a profile without validating its credentials.
    pub fn get(&self, name: &str) -> Result<&NetworkProfile> {
        self.profiles
            .get(name)
            .ok_or_else(|| OrchestrationError::UnknownNetwork(name.to_string()))
    }

    /// All profiles, ordered by name.
    pub fn profiles(&self) -> impl Iterator<Item = &NetworkProfile> {
        self.profiles.values()
    }
}

/// Expand `${VAR}` placeholders. Returns the expansion and the names of
/// unset (or empty) variables, which expand to the empty string.
fn expand_placeholders(template: &str, env: &HashMap<String, String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                match env.get(var).filter(|value| !value.is_empty()) {
                    Some(value) => out.push_str(value),
                    None => unresolved.push(var.to_string()),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    (out, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LOCAL_NETWORK;

    const KEY_1: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KEY_2: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const KEY_3: &str = "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";

    fn full_env() -> HashMap<String, String> {
        HashMap::from([
            ("RINKEBY_PRIVATE_KEY".to_string(), KEY_1.to_string()),
            ("RINKEBY_PRIVATE_KEY_2".to_string(), KEY_2.to_string()),
            ("RINKEBY_PRIVATE_KEY_3".to_string(), KEY_3.to_string()),
            ("INFURA_API_KEY".to_string(), "abc123".to_string()),
        ])
    }

    #[test]
    fn test_resolve_local() {
        let registry = NetworkRegistry::from_config(&UproxyConfig::default(), &full_env()).unwrap();
        let profile = registry.resolve(LOCAL_NETWORK).unwrap();

        assert_eq!(profile.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(profile.chain_id, Some(31337));
        assert_eq!(profile.credentials.len(), 3);
        assert_eq!(profile.gas_limit, Some(8_000_000));
        assert_eq!(profile.confirmation_timeout(), Duration::from_millis(100_000));
        assert_eq!(profile.confirmations, 1);
    }

    #[test]
    fn test_unknown_network() {
        let registry = NetworkRegistry::from_config(&UproxyConfig::default(), &full_env()).unwrap();
        assert!(matches!(
            registry.resolve("mainnet"),
            Err(OrchestrationError::UnknownNetwork(name)) if name == "mainnet"
        ));
    }

    #[test]
    fn test_unset_secret_is_missing_credentials() {
        let registry = NetworkRegistry::from_config(&UproxyConfig::default(), &full_env()).unwrap();
        let err = registry.resolve("moonrabbit_test").unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::MissingCredentials { ref network, index: 0 } if network == "moonrabbit_test"
        ));

        // Lookup without validation still works, for listing.
        assert!(registry.get("moonrabbit_test").is_ok());
    }

    #[test]
    fn test_one_unset_secret_rejects_whole_network() {
        let mut env = full_env();
        env.remove("RINKEBY_PRIVATE_KEY_3");
        let registry = NetworkRegistry::from_config(&UproxyConfig::default(), &env).unwrap();
        assert!(matches!(
            registry.resolve(LOCAL_NETWORK),
            Err(OrchestrationError::MissingCredentials { index: 2, .. })
        ));
    }

    #[test]
    fn test_empty_account_list_rejected() {
        let mut config = UproxyConfig::default();
        config.networks.insert(
            "bare".to_string(),
            NetworkDefinition::new("http://localhost:9545").chain_id(99),
        );
        let registry = NetworkRegistry::from_config(&config, &full_env()).unwrap();
        assert!(matches!(
            registry.resolve("bare"),
            Err(OrchestrationError::MissingCredentials { index: 0, .. })
        ));
    }

    #[test]
    fn test_duplicate_chain_id_rejected() {
        let mut config = UproxyConfig::default();
        config.networks.insert(
            "other-local".to_string(),
            NetworkDefinition::new("http://localhost:9545").chain_id(31337),
        );
        assert!(matches!(
            NetworkRegistry::from_config(&config, &full_env()),
            Err(OrchestrationError::DuplicateChainId { chain_id: 31337, .. })
        ));
    }

    #[test]
    fn test_url_placeholder_expansion() {
        let registry = NetworkRegistry::from_config(&UproxyConfig::default(), &full_env()).unwrap();
        assert_eq!(
            registry.get("rinkeby").unwrap().rpc_url,
            "https://rinkeby.infura.io/v3/abc123"
        );

        let env = HashMap::new();
        assert_eq!(
            expand_placeholders("https://x/${MISSING}/y", &env),
            ("https://x//y".to_string(), vec!["MISSING".to_string()])
        );
        assert_eq!(
            expand_placeholders("https://x/${UNCLOSED", &env),
            ("https://x/${UNCLOSED".to_string(), vec![])
        );
    }

    #[test]
    fn test_unset_url_variable_fails_before_connecting() {
        let mut env = full_env();
        env.remove("INFURA_API_KEY");
        let registry = NetworkRegistry::from_config(&UproxyConfig::default(), &env).unwrap();

        let err = registry.resolve("rinkeby").unwrap_err();
        assert!(matches!(err, OrchestrationError::Config(ref msg) if msg.contains("INFURA_API_KEY")));

        env.insert("INFURA_API_KEY".to_string(), String::new());
        let registry = NetworkRegistry::from_config(&UproxyConfig::default(), &env).unwrap();
        assert!(matches!(registry.resolve("rinkeby"), Err(OrchestrationError::Config(_))));
    }

    #[test]
    fn test_placeholder_credentials() {
        assert!(Credential::literal("").is_placeholder());
        assert!(Credential::literal("   ").is_placeholder());
        assert!(Credential::literal("0x").is_placeholder());
        assert!(Credential::literal("0x0000").is_placeholder());
        assert!(Credential::literal("<your-key-here>").is_placeholder());
        assert!(Credential::literal("${MOONRABBIT_TEST_KEY}").is_placeholder());
        assert!(!Credential::literal(KEY_1).is_placeholder());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::from_env("RINKEBY_PRIVATE_KEY", KEY_1);
        let debug = format!("{:?}", credential);
        assert!(debug.contains("RINKEBY_PRIVATE_KEY"));
        assert!(!debug.contains(&KEY_1[2..]));
    }
}
