//! First-time deployment of an implementation behind a new proxy.

use alloy_core::primitives::{Address, TxKind};
use chrono::Utc;

use crate::{
    ContractFactory, Orchestrator, OrchestrationError, Result,
    chain::{ChainClient, Connector, Transactor},
    factory::DEFAULT_INITIALIZER,
    manifest::ImplementationEntry,
    orchestrator::created_address,
    proxy::{ProxyKind, inspect_proxy, supports_uups},
    record::{DeployStage, DeploymentRecord},
    signer::primary_signer,
};

/// What to deploy, where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub network: String,
    pub contract: String,
    /// Initializer arguments as given by the operator.
    pub args: Vec<String>,
    /// Proxy pattern. Inferred from the implementation's ABI when `None`.
    pub kind: Option<ProxyKind>,
    pub signer_index: Option<usize>,
    pub initializer: String,
    /// Proxy artifact overriding the kind's default.
    pub proxy_contract: Option<String>,
}

impl DeployRequest {
    pub fn new(network: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            contract: contract.into(),
            args: Vec::new(),
            kind: None,
            signer_index: None,
            initializer: DEFAULT_INITIALIZER.to_string(),
            proxy_contract: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn kind(mut self, kind: impl Into<Option<ProxyKind>>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn signer_index(mut self, index: usize) -> Self {
        self.signer_index = Some(index);
        self
    }

    pub fn initializer(mut self, initializer: impl Into<String>) -> Self {
        self.initializer = initializer.into();
        self
    }

    pub fn proxy_contract(mut self, contract: impl Into<String>) -> Self {
        self.proxy_contract = Some(contract.into());
        self
    }

    fn proxy_artifact(&self, kind: ProxyKind) -> &str {
        self.proxy_contract
            .as_deref()
            .unwrap_or_else(|| kind.default_contract())
    }
}

impl<N: Connector> Orchestrator<N> {
    /// Deploy `request.contract` behind a new proxy and initialize it.
    ///
    /// Always returns the terminal record; on failure it carries the cause.
    pub async fn deploy(&self, request: &DeployRequest) -> DeploymentRecord {
        let mut record = DeploymentRecord::new(&request.network, &request.contract);

        tracing::info!(
            network = %request.network,
            contract = %request.contract,
            kind = ?request.kind,
            args = request.args.len(),
            "Starting proxy deployment"
        );

        if let Err(e) = self.run_deploy(request, &mut record).await {
            record.fail(e);
        }
        record
    }

    async fn run_deploy(
        &self,
        request: &DeployRequest,
        record: &mut DeploymentRecord,
    ) -> Result<()> {
        let profile = self.registry.resolve(&request.network)?;
        let signer = primary_signer(profile, request.signer_index)?;
        record.deployer = Some(signer.address());

        // Uninitialized -> FactoryBuilt
        let implementation = ContractFactory::new(self.artifacts.find(&request.contract)?, &signer);
        implementation.ensure_argless_constructor()?;
        let kind = resolve_kind(request.kind, &implementation)?;
        record.kind = Some(kind);
        let proxy_artifact = self.artifacts.find(request.proxy_artifact(kind))?;
        let proxy = ContractFactory::new(proxy_artifact, &signer);
        let proxy_constructor = proxy.artifact().abi.constructor.clone();
        kind
            .encode_constructor(proxy_constructor.as_ref(), Address::ZERO, Address::ZERO, &[])
            .map_err(OrchestrationError::config)?;
        record.advance(DeployStage::FactoryBuilt);

        // FactoryBuilt -> ProxyDeploying
        let init = implementation.encode_initializer(&request.initializer, &request.args)?;
        record.init_args = init.args.clone();
        if let Some(signature) = &init.signature {
            tracing::info!(initializer = %signature, "Initializer arguments validated");
        }

        let chain = self
            .connector
            .connect(profile)
            .map_err(OrchestrationError::network)?;
        let tx = Transactor::connect(&chain, profile, &signer, &self.abort).await?;
        self.abort.check("implementation deployment")?;
        record.advance(DeployStage::ProxyDeploying);

        let implementation_tx = tx
            .submit(TxKind::Create, implementation.deploy_code(&[]), "implementation deployment")
            .await?;
        record.implementation_tx = Some(implementation_tx);
        let receipt = tx.wait_for_confirmation(implementation_tx).await?;
        let implementation_address = created_address(&receipt)?;
        record.implementation_address = Some(implementation_address);
        tracing::info!(
            contract = %request.contract,
            address = %implementation_address,
            "Implementation deployed"
        );

        let constructor_args = kind
            .encode_constructor(
                proxy_constructor.as_ref(),
                implementation_address,
                signer.address(),
                &init.calldata,
            )
            .map_err(OrchestrationError::config)?;
        let proxy_tx = tx
            .submit(TxKind::Create, proxy.deploy_code(&constructor_args), "proxy deployment")
            .await?;
        record.proxy_tx = Some(proxy_tx);
        let receipt = tx.wait_for_confirmation(proxy_tx).await?;
        let proxy_address = created_address(&receipt)?;

        // ProxyDeploying -> Deployed
        verify_proxy(&chain, proxy_address, implementation_address).await?;
        record.proxy_address = Some(proxy_address);
        record.advance(DeployStage::Deployed);

        tracing::info!(
            network = %request.network,
            proxy = %proxy_address,
            implementation = %implementation_address,
            "Proxy deployed"
        );

        if let Some(manifests) = &self.manifests {
            let entry = ImplementationEntry {
                address: implementation_address,
                contract: request.contract.clone(),
                tx_hash: Some(implementation_tx),
                storage_layout: implementation.artifact().storage_layout.clone(),
                deployed_at: Utc::now(),
            };
            let saved = manifests.update(&profile.name, tx.chain_id(), |m| {
                m.add_implementation(entry);
                m.add_proxy(proxy_address, kind, &request.contract, implementation_address);
            });
            if let Err(e) = saved {
                let error = format!("{e:#}");
                tracing::warn!(%error, "Failed to update the network manifest");
            }
        }

        Ok(())
    }
}

/// Pick the proxy kind for `implementation`.
///
/// UUPS needs the upgrade function in the implementation. Without one the
/// default is a transparent proxy, and an explicit UUPS request is refused.
fn resolve_kind(
    requested: Option<ProxyKind>,
    implementation: &ContractFactory,
) -> Result<ProxyKind> {
    match requested {
        Some(ProxyKind::Uups) => {
            implementation.ensure_uups()?;
            Ok(ProxyKind::Uups)
        }
        Some(kind) => Ok(kind),
        None if supports_uups(&implementation.artifact().abi) => Ok(ProxyKind::Uups),
        None => {
            tracing::info!(
                contract = %implementation.name(),
                "Implementation has no UUPS upgrade function, deploying a transparent proxy"
            );
            Ok(ProxyKind::Transparent)
        }
    }
}

/// Check that the new proxy is bound to the implementation just deployed.
async fn verify_proxy<C: ChainClient>(
    chain: &C,
    proxy: Address,
    implementation: Address,
) -> Result<()> {
    let state = inspect_proxy(chain, proxy).await?;
    if state.implementation != implementation {
        return Err(OrchestrationError::NetworkError(format!(
            "proxy {} points to {} instead of {}",
            proxy, state.implementation, implementation
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_request_defaults() {
        let request = DeployRequest::new("local", "Marketplace").args(["1000e18", "0"]);
        assert_eq!(request.kind, None);
        assert_eq!(request.initializer, "initialize");
        assert_eq!(request.args, vec!["1000e18".to_string(), "0".to_string()]);
        assert_eq!(request.proxy_artifact(ProxyKind::Uups), "ERC1967Proxy");
        assert_eq!(
            request.proxy_artifact(ProxyKind::Transparent),
            "TransparentUpgradeableProxy"
        );

        let request = request.kind(ProxyKind::Transparent);
        assert_eq!(request.kind, Some(ProxyKind::Transparent));
        assert_eq!(
            request.proxy_contract("MyProxy").proxy_artifact(ProxyKind::Transparent),
            "MyProxy"
        );
    }
}
