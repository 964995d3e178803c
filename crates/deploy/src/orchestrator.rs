//! Shared context of the deployment and upgrade orchestrators.

use alloy_core::primitives::Address;

use crate::{
    AbortSignal, ArtifactStore, ManifestStore, NetworkRegistry, OrchestrationError, Result,
    chain::{Connector, TxReceipt},
};

/// Everything a run needs besides its request: the injected registry, a way
/// to reach networks, the compiled artifacts and the manifest directory.
pub struct Orchestrator<N> {
    pub(crate) registry: NetworkRegistry,
    pub(crate) connector: N,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) manifests: Option<ManifestStore>,
    pub(crate) abort: AbortSignal,
}

impl<N: Connector> Orchestrator<N> {
    pub fn new(registry: NetworkRegistry, connector: N, artifacts: ArtifactStore) -> Self {
        Self {
            registry,
            connector,
            artifacts,
            manifests: None,
            abort: AbortSignal::never(),
        }
    }

    /// Record runs in, and read reference layouts from, this manifest store.
    pub fn manifests(mut self, manifests: ManifestStore) -> Self {
        self.manifests = Some(manifests);
        self
    }

    /// Stop runs before their next submission once `abort` fires.
    pub fn abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }
}

/// Address of the contract created by a confirmed deployment.
pub(crate) fn created_address(receipt: &TxReceipt) -> Result<Address> {
    receipt.contract_address.ok_or_else(|| {
        OrchestrationError::NetworkError(format!(
            "receipt of {} carries no contract address",
            receipt.tx_hash
        ))
    })
}
