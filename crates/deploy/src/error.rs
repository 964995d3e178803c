//! Error taxonomy for deployment and upgrade runs.
//!
//! Every variant is fatal to the run that produced it. Nothing in this crate
//! retries on error; the operator reruns the whole command instead.

use alloy_core::primitives::{Address, B256, U256};
use thiserror::Error;

use crate::layout::LayoutViolation;

/// Errors that end an orchestration run.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The requested network name is not in the registry.
    #[error("unknown network `{0}`")]
    UnknownNetwork(String),

    /// A credential slot is empty or holds a placeholder value.
    #[error("network `{network}` has no usable credential at index {index} (unset or placeholder secret)")]
    MissingCredentials { network: String, index: usize },

    /// A credential is set but is not a valid secp256k1 private key.
    #[error("credential {index} of network `{network}` is not a valid private key")]
    InvalidCredential { network: String, index: usize },

    /// No signer exists at the requested index.
    #[error("no signer at index {index} on network `{network}` ({available} available)")]
    NoSigners {
        network: String,
        index: usize,
        available: usize,
    },

    /// The named contract has no deployable compiled artifact.
    #[error("artifact for contract `{contract}` not found: {reason}")]
    ArtifactNotFound { contract: String, reason: String },

    /// More than one artifact carries the requested contract name.
    #[error("contract name `{contract}` is ambiguous, found {} artifacts: {}", .candidates.len(), .candidates.join(", "))]
    AmbiguousArtifact {
        contract: String,
        candidates: Vec<String>,
    },

    /// Initializer arguments do not match the declared signature.
    #[error("initializer arguments do not match: {0}")]
    InitArgsMismatch(String),

    /// The address is malformed or is not an upgradeable proxy.
    #[error("invalid proxy address `{address}`: {reason}")]
    InvalidProxyAddress { address: String, reason: String },

    /// The new implementation would corrupt existing proxy storage.
    #[error("incompatible storage layout: {}", format_violations(.0))]
    IncompatibleStorageLayout(Vec<LayoutViolation>),

    /// The implementation has no UUPS upgrade function, so a UUPS proxy
    /// pointing at it could never be upgraded again.
    #[error("{contract} has no upgradeToAndCall or upgradeTo function; a UUPS proxy pointing at it could not be upgraded again")]
    NotUpgradeable { contract: String },

    /// The proxy address changed across an upgrade.
    #[error("proxy address drifted from {expected} to {actual}")]
    ProxyAddressDrift { expected: Address, actual: Address },

    /// A submitted transaction was not confirmed in time.
    #[error("transaction {tx_hash} not confirmed after {timeout_ms} ms; its outcome must be reconciled manually")]
    ConfirmationTimeout { tx_hash: B256, timeout_ms: u64 },

    /// The endpoint serves a different chain than the profile declares.
    #[error("network `{network}` expects chain id {expected} but the endpoint reports {actual}")]
    ChainIdMismatch {
        network: String,
        expected: u64,
        actual: u64,
    },

    /// The signer cannot pay for the transaction.
    #[error("insufficient funds on {address}: need {required} wei, have {available} wei")]
    InsufficientFunds {
        address: Address,
        required: U256,
        available: U256,
    },

    /// Another run holds the lock for this proxy.
    #[error("another run holds the lock at {0}")]
    ProxyLocked(String),

    /// The run was cancelled before any transaction was submitted.
    #[error("run aborted before {0}")]
    Aborted(&'static str),

    /// Two networks declare the same chain id.
    #[error("networks `{first}` and `{second}` both declare chain id {chain_id}")]
    DuplicateChainId {
        chain_id: u64,
        first: String,
        second: String,
    },

    /// Configuration or local state could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport, RPC or on-chain execution failure.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl OrchestrationError {
    /// Wrap a transport error, keeping its full context chain.
    pub fn network(err: anyhow::Error) -> Self {
        Self::NetworkError(format!("{err:#}"))
    }

    /// Wrap a local configuration or state error.
    pub fn config(err: anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }

    /// Errors that signal the stable-address or storage safety invariant
    /// would have been broken.
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            Self::ProxyAddressDrift { .. }
                | Self::IncompatibleStorageLayout(_)
                | Self::NotUpgradeable { .. }
        )
    }

    /// Stable short name of the variant, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownNetwork(_) => "UnknownNetwork",
            Self::MissingCredentials { .. } => "MissingCredentials",
            Self::InvalidCredential { .. } => "InvalidCredential",
            Self::NoSigners { .. } => "NoSigners",
            Self::ArtifactNotFound { .. } => "ArtifactNotFound",
            Self::AmbiguousArtifact { .. } => "AmbiguousArtifact",
            Self::InitArgsMismatch(_) => "InitArgsMismatch",
            Self::InvalidProxyAddress { .. } => "InvalidProxyAddress",
            Self::IncompatibleStorageLayout(_) => "IncompatibleStorageLayout",
            Self::NotUpgradeable { .. } => "NotUpgradeable",
            Self::ProxyAddressDrift { .. } => "ProxyAddressDrift",
            Self::ConfirmationTimeout { .. } => "ConfirmationTimeout",
            Self::ChainIdMismatch { .. } => "ChainIdMismatch",
            Self::InsufficientFunds { .. } => "InsufficientFunds",
            Self::ProxyLocked(_) => "ProxyLocked",
            Self::Aborted(_) => "Aborted",
            Self::DuplicateChainId { .. } => "DuplicateChainId",
            Self::Config(_) => "Config",
            Self::NetworkError(_) => "NetworkError",
        }
    }
}

fn format_violations(violations: &[LayoutViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for orchestration code.
pub type Result<T, E = OrchestrationError> = std::result::Result<T, E>;
