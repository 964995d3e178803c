//! uproxy-deploy - Orchestration of upgradeable proxy deployments.
//!
//! This crate deploys a contract behind an ERC-1967 proxy and later upgrades
//! the implementation behind that same proxy, across the networks defined in
//! a [`UproxyConfig`]. Control flows from the [`NetworkRegistry`] through the
//! signer resolver to the [`Orchestrator`], whose records are turned into
//! operator output by [`reporter::report`].

mod abort;
pub use abort::AbortSignal;

mod artifacts;
pub use artifacts::{ArtifactStore, ContractArtifact};

pub mod chain;
pub use chain::{ChainClient, Connector, RpcChain, RpcConnector};

pub mod config;
pub use config::{NetworkDefinition, UproxyConfig};

mod deployer;
pub use deployer::DeployRequest;

mod error;
pub use error::{OrchestrationError, Result};

mod factory;
pub use factory::{ContractFactory, DEFAULT_INITIALIZER, InitCall};

pub mod layout;

pub mod manifest;
pub use manifest::ManifestStore;

mod orchestrator;
pub use orchestrator::Orchestrator;

pub mod proxy;
pub use proxy::ProxyKind;

pub mod record;
pub use record::{DeploymentRecord, DeploymentStatus, UpgradeRecord, UpgradeStatus};

pub mod registry;
pub use registry::{Credential, NetworkProfile, NetworkRegistry};

pub mod reporter;

pub mod rpc;

mod signer;
pub use signer::{Signer, primary_signer, resolve_signers};

mod upgrader;
pub use upgrader::UpgradeRequest;
