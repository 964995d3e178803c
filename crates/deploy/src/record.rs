//! Deployment and upgrade records.
//!
//! A record is owned by the run that created it and is the only thing that
//! leaves an orchestrator. Stages only move forward, in a fixed order, and
//! `Failed` is reachable from any non-terminal stage.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256},
};
use serde::Serialize;

use crate::{OrchestrationError, proxy::ProxyKind};

/// Lifecycle of a first-time deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DeployStage {
    Uninitialized,
    FactoryBuilt,
    ProxyDeploying,
    Deployed,
    Failed,
}

impl DeployStage {
    fn next(self) -> Option<Self> {
        match self {
            Self::Uninitialized => Some(Self::FactoryBuilt),
            Self::FactoryBuilt => Some(Self::ProxyDeploying),
            Self::ProxyDeploying => Some(Self::Deployed),
            Self::Deployed | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::Failed)
    }
}

/// Lifecycle of an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeStage {
    Uninitialized,
    ProxyResolved,
    FactoryBuilt,
    UpgradeSubmitted,
    Upgraded,
    Failed,
}

impl UpgradeStage {
    fn next(self) -> Option<Self> {
        match self {
            Self::Uninitialized => Some(Self::ProxyResolved),
            Self::ProxyResolved => Some(Self::FactoryBuilt),
            Self::FactoryBuilt => Some(Self::UpgradeSubmitted),
            Self::UpgradeSubmitted => Some(Self::Upgraded),
            Self::Upgraded | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Upgraded | Self::Failed)
    }
}

/// Operator-facing status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    Pending,
    Deployed,
    Failed,
}

/// Operator-facing status of an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeStatus {
    Pending,
    Upgraded,
    Failed,
}

/// One validated initializer argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitArg {
    /// Parameter name from the ABI (may be empty).
    pub name: String,
    /// Solidity type.
    #[serde(rename = "type")]
    pub ty: String,
    /// Value as given by the operator.
    pub raw: String,
    /// Value after coercion to `ty`.
    #[serde(skip)]
    pub value: DynSolValue,
}

/// Serializable summary of the error that failed a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: &'static str,
    pub message: String,
    pub safety_violation: bool,
}

impl From<&OrchestrationError> for Failure {
    fn from(err: &OrchestrationError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            safety_violation: err.is_safety_violation(),
        }
    }
}

/// Common view of a finished run, used by the reporter.
pub trait RunRecord: Serialize {
    /// The stable proxy address when the run succeeded, else its failure.
    fn outcome(&self) -> Result<Address, Failure>;
}

/// Outcome of a record that never reached a terminal stage.
fn unfinished(stage: impl std::fmt::Display) -> Failure {
    Failure {
        kind: "Unfinished",
        message: format!("run stopped at stage {stage} without a result"),
        safety_violation: false,
    }
}

/// State of a first-time deployment.
#[derive(Debug, Serialize)]
pub struct DeploymentRecord {
    pub network: String,
    pub contract: String,
    /// Requested kind, or the one inferred from the implementation's ABI.
    pub kind: Option<ProxyKind>,
    /// Deploying account.
    pub deployer: Option<Address>,
    pub init_args: Vec<InitArg>,
    pub implementation_address: Option<Address>,
    pub proxy_address: Option<Address>,
    pub implementation_tx: Option<B256>,
    pub proxy_tx: Option<B256>,
    stage: DeployStage,
    status: DeploymentStatus,
    failure: Option<Failure>,
    #[serde(skip)]
    error: Option<OrchestrationError>,
}

impl DeploymentRecord {
    pub fn new(network: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            contract: contract.into(),
            kind: None,
            deployer: None,
            init_args: Vec::new(),
            implementation_address: None,
            proxy_address: None,
            implementation_tx: None,
            proxy_tx: None,
            stage: DeployStage::Uninitialized,
            status: DeploymentStatus::Pending,
            failure: None,
            error: None,
        }
    }

    pub fn stage(&self) -> DeployStage {
        self.stage
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn error(&self) -> Option<&OrchestrationError> {
        self.error.as_ref()
    }

    /// Move to the next stage. Returns `false` and leaves the record
    /// untouched when `to` is not the next stage.
    pub(crate) fn advance(&mut self, to: DeployStage) -> bool {
        if self.stage.next() != Some(to) {
            tracing::error!(from = %self.stage, to = %to, "Rejected deployment stage transition");
            return false;
        }
        tracing::debug!(from = %self.stage, to = %to, contract = %self.contract, "Deployment stage");
        self.stage = to;
        if to == DeployStage::Deployed {
            self.status = DeploymentStatus::Deployed;
        }
        true
    }

    /// Mark the run failed. Terminal records are left as they are.
    pub(crate) fn fail(&mut self, error: OrchestrationError) {
        if self.stage.is_terminal() {
            return;
        }
        tracing::error!(stage = %self.stage, kind = error.kind(), error = %error, "Deployment failed");
        self.stage = DeployStage::Failed;
        self.status = DeploymentStatus::Failed;
        self.failure = Some(Failure::from(&error));
        self.error = Some(error);
    }
}

impl RunRecord for DeploymentRecord {
    fn outcome(&self) -> Result<Address, Failure> {
        match (self.status, self.proxy_address, &self.failure) {
            (DeploymentStatus::Deployed, Some(proxy), _) => Ok(proxy),
            (_, _, Some(failure)) => Err(failure.clone()),
            _ => Err(unfinished(self.stage)),
        }
    }
}

/// State of an upgrade of an existing proxy.
#[derive(Debug, Serialize)]
pub struct UpgradeRecord {
    pub network: String,
    pub contract: String,
    /// Proxy address as supplied by the operator.
    pub requested_proxy: String,
    /// Parsed and verified proxy address.
    pub proxy_address: Option<Address>,
    pub kind: Option<ProxyKind>,
    pub previous_implementation: Option<Address>,
    pub new_implementation_address: Option<Address>,
    pub implementation_tx: Option<B256>,
    pub upgrade_tx: Option<B256>,
    stage: UpgradeStage,
    status: UpgradeStatus,
    failure: Option<Failure>,
    #[serde(skip)]
    error: Option<OrchestrationError>,
}

impl UpgradeRecord {
    pub fn new(
        network: impl Into<String>,
        requested_proxy: impl Into<String>,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            contract: contract.into(),
            requested_proxy: requested_proxy.into(),
            proxy_address: None,
            kind: None,
            previous_implementation: None,
            new_implementation_address: None,
            implementation_tx: None,
            upgrade_tx: None,
            stage: UpgradeStage::Uninitialized,
            status: UpgradeStatus::Pending,
            failure: None,
            error: None,
        }
    }

    pub fn stage(&self) -> UpgradeStage {
        self.stage
    }

    pub fn status(&self) -> UpgradeStatus {
        self.status
    }

    pub fn error(&self) -> Option<&OrchestrationError> {
        self.error.as_ref()
    }

    pub(crate) fn advance(&mut self, to: UpgradeStage) -> bool {
        if self.stage.next() != Some(to) {
            tracing::error!(from = %self.stage, to = %to, "Rejected upgrade stage transition");
            return false;
        }
        tracing::debug!(from = %self.stage, to = %to, proxy = %self.requested_proxy, "Upgrade stage");
        self.stage = to;
        if to == UpgradeStage::Upgraded {
            self.status = UpgradeStatus::Upgraded;
        }
        true
    }

    pub(crate) fn fail(&mut self, error: OrchestrationError) {
        if self.stage.is_terminal() {
            return;
        }
        tracing::error!(stage = %self.stage, kind = error.kind(), error = %error, "Upgrade failed");
        self.stage = UpgradeStage::Failed;
        self.status = UpgradeStatus::Failed;
        self.failure = Some(Failure::from(&error));
        self.error = Some(error);
    }
}

impl RunRecord for UpgradeRecord {
    fn outcome(&self) -> Result<Address, Failure> {
        match (self.status, self.proxy_address, &self.failure) {
            (UpgradeStatus::Upgraded, Some(proxy), _) => Ok(proxy),
            (_, _, Some(failure)) => Err(failure.clone()),
            _ => Err(unfinished(self.stage)),
        }
    }
}
