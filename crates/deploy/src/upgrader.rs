//! Replacement of the implementation behind an existing proxy.

use alloy_core::{
    primitives::{Address, TxKind},
    sol_types::SolEvent,
};
use chrono::Utc;

use crate::{
    ContractFactory, Orchestrator, OrchestrationError, Result,
    chain::{ChainClient, Connector, Transactor, TxReceipt},
    layout::{StorageLayout, ensure_upgrade_safe},
    manifest::ImplementationEntry,
    orchestrator::created_address,
    proxy::{IMPLEMENTATION_SLOT, ProxyKind, ProxyState, Upgraded, inspect_proxy, parse_address},
    record::{UpgradeRecord, UpgradeStage},
    signer::primary_signer,
};

/// Which proxy to move to which implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub network: String,
    /// Proxy address as supplied by the operator.
    pub proxy: String,
    /// New implementation contract.
    pub contract: String,
    pub signer_index: Option<usize>,
    /// Contract whose artifact describes the layout currently behind the
    /// proxy, overriding the manifest.
    pub reference: Option<String>,
}

impl UpgradeRequest {
    pub fn new(
        network: impl Into<String>,
        proxy: impl Into<String>,
        contract: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            proxy: proxy.into(),
            contract: contract.into(),
            signer_index: None,
            reference: None,
        }
    }

    pub fn signer_index(mut self, index: usize) -> Self {
        self.signer_index = Some(index);
        self
    }

    pub fn reference(mut self, contract: impl Into<String>) -> Self {
        self.reference = Some(contract.into());
        self
    }
}

impl<N: Connector> Orchestrator<N> {
    /// Upgrade the proxy in `request` to a freshly deployed implementation.
    ///
    /// Always returns the terminal record; on failure it carries the cause.
    pub async fn upgrade(&self, request: &UpgradeRequest) -> UpgradeRecord {
        let mut record = UpgradeRecord::new(&request.network, &request.proxy, &request.contract);

        tracing::info!(
            network = %request.network,
            proxy = %request.proxy,
            contract = %request.contract,
            "Starting proxy upgrade"
        );

        if let Err(e) = self.run_upgrade(request, &mut record).await {
            record.fail(e);
        }
        record
    }

    async fn run_upgrade(
        &self,
        request: &UpgradeRequest,
        record: &mut UpgradeRecord,
    ) -> Result<()> {
        let profile = self.registry.resolve(&request.network)?;
        let signer = primary_signer(profile, request.signer_index)?;

        // Uninitialized -> ProxyResolved
        let proxy_address = parse_address(&request.proxy)?;
        let chain = self
            .connector
            .connect(profile)
            .map_err(OrchestrationError::network)?;
        let tx = Transactor::connect(&chain, profile, &signer, &self.abort).await?;
        let state = inspect_proxy(&chain, proxy_address).await?;
        let _lock = self
            .manifests
            .as_ref()
            .map(|m| m.lock_proxy(&profile.name, proxy_address))
            .transpose()?;
        record.proxy_address = Some(proxy_address);
        record.kind = Some(state.kind);
        record.previous_implementation = Some(state.implementation);
        record.advance(UpgradeStage::ProxyResolved);
        tracing::info!(
            proxy = %proxy_address,
            kind = %state.kind,
            interface = %state.interface,
            implementation = %state.implementation,
            "Proxy resolved"
        );

        // ProxyResolved -> FactoryBuilt
        let implementation = ContractFactory::new(self.artifacts.find(&request.contract)?, &signer);
        implementation.ensure_argless_constructor()?;
        if state.kind == ProxyKind::Uups {
            implementation.ensure_uups()?;
        }
        record.advance(UpgradeStage::FactoryBuilt);

        // FactoryBuilt -> UpgradeSubmitted
        let (reference_name, reference_layout) = self.reference_layout(request, &state)?;
        ensure_upgrade_safe(
            &reference_name,
            reference_layout.as_ref(),
            implementation.name(),
            implementation.artifact().storage_layout.as_ref(),
        )?;

        let implementation_tx = tx
            .submit(TxKind::Create, implementation.deploy_code(&[]), "implementation deployment")
            .await?;
        record.implementation_tx = Some(implementation_tx);
        let receipt = tx.wait_for_confirmation(implementation_tx).await?;
        let new_implementation = created_address(&receipt)?;
        record.new_implementation_address = Some(new_implementation);
        tracing::info!(
            contract = %request.contract,
            address = %new_implementation,
            "Implementation deployed"
        );

        let (target, calldata) = state.upgrade_call(new_implementation);
        let upgrade_tx = tx.submit(TxKind::Call(target), calldata, "upgrade").await?;
        record.upgrade_tx = Some(upgrade_tx);
        record.advance(UpgradeStage::UpgradeSubmitted);

        // UpgradeSubmitted -> Upgraded
        let receipt = tx.wait_for_confirmation(upgrade_tx).await?;
        verify_upgrade(&chain, &state, new_implementation, &receipt).await?;
        record.advance(UpgradeStage::Upgraded);

        tracing::info!(
            network = %request.network,
            proxy = %proxy_address,
            from = %state.implementation,
            to = %new_implementation,
            "Proxy upgraded"
        );

        if let Some(manifests) = &self.manifests {
            let entry = ImplementationEntry {
                address: new_implementation,
                contract: request.contract.clone(),
                tx_hash: Some(implementation_tx),
                storage_layout: implementation.artifact().storage_layout.clone(),
                deployed_at: Utc::now(),
            };
            let saved = manifests.update(&profile.name, tx.chain_id(), |m| {
                m.add_implementation(entry);
                m.set_implementation(
                    proxy_address,
                    state.kind,
                    &request.contract,
                    new_implementation,
                );
            });
            if let Err(e) = saved {
                let error = format!("{e:#}");
                tracing::warn!(%error, "Failed to update the network manifest");
            }
        }

        Ok(())
    }

    /// Layout of the implementation currently behind the proxy: the
    /// `--reference` artifact if given, else the manifest entry.
    fn reference_layout(
        &self,
        request: &UpgradeRequest,
        state: &ProxyState,
    ) -> Result<(String, Option<StorageLayout>)> {
        if let Some(reference) = &request.reference {
            let artifact = self.artifacts.find(reference)?;
            return Ok((artifact.name, artifact.storage_layout));
        }

        let current = state.implementation.to_string();
        let Some(manifests) = &self.manifests else {
            return Ok((current, None));
        };
        let manifest = manifests
            .load(&request.network)
            .map_err(OrchestrationError::config)?;

        Ok(match manifest.implementation(state.implementation) {
            Some(entry) => (entry.contract.clone(), entry.storage_layout.clone()),
            None => (current, None),
        })
    }

    /// Offline layout check between two compiled contracts.
    pub fn validate_upgrade(&self, from: &str, to: &str) -> Result<()> {
        let old = self.artifacts.find(from)?;
        let new = self.artifacts.find(to)?;
        ensure_upgrade_safe(
            &old.name,
            old.storage_layout.as_ref(),
            &new.name,
            new.storage_layout.as_ref(),
        )
    }
}

/// Check that the proxy kept its address and now delegates to
/// `new_implementation`.
async fn verify_upgrade<C: ChainClient>(
    chain: &C,
    state: &ProxyState,
    new_implementation: Address,
    receipt: &TxReceipt,
) -> Result<()> {
    let upgraded = receipt
        .logs
        .iter()
        .filter(|log| log.topics.first() == Some(&Upgraded::SIGNATURE_HASH));

    let mut seen = false;
    for log in upgraded {
        if log.address != state.address {
            return Err(OrchestrationError::ProxyAddressDrift {
                expected: state.address,
                actual: log.address,
            });
        }
        seen = true;
    }
    if !seen {
        tracing::warn!(
            proxy = %state.address,
            "Upgrade receipt has no Upgraded event, checking storage only"
        );
    }

    let slot = chain
        .storage_at(state.address, IMPLEMENTATION_SLOT)
        .await
        .map_err(OrchestrationError::network)?;
    let bound = Address::from_word(slot);
    if bound != new_implementation {
        return Err(OrchestrationError::NetworkError(format!(
            "proxy {} delegates to {} after the upgrade, expected {}",
            state.address, bound, new_implementation
        )));
    }
    Ok(())
}
