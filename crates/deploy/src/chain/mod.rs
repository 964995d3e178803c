//! Access to a chain: reads, transaction submission and receipts.
//!
//! [`ChainClient`] is the seam between the orchestrators and the network.
//! [`RpcChain`] implements it over JSON-RPC; tests substitute an in-memory
//! chain.

mod rpc_chain;
mod transactor;

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use anyhow::Result;

pub use rpc_chain::RpcChain;
pub use transactor::Transactor;

use crate::{NetworkProfile, Signer};

/// A fully priced transaction, ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    /// EIP-155 chain id.
    pub chain_id: u64,
    pub from: Address,
    pub to: TxKind,
    pub input: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
}

/// A log emitted by a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// `false` when execution reverted.
    pub success: bool,
    /// Created contract, for deployments.
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEntry>,
}

/// Operations the orchestrators need from a network.
pub trait ChainClient: Send + Sync {
    /// Chain id reported by the endpoint.
    fn chain_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Latest block number.
    fn block_number(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Runtime code at `address` (empty for accounts without code).
    fn code_at(&self, address: Address) -> impl Future<Output = Result<Bytes>> + Send;

    /// Raw storage word.
    fn storage_at(&self, address: Address, slot: B256) -> impl Future<Output = Result<B256>> + Send;

    /// Balance in wei.
    fn balance(&self, address: Address) -> impl Future<Output = Result<U256>> + Send;

    /// Output of a read-only call to `to` against the latest block. A revert is an error.
    fn static_call(&self, to: Address, input: Bytes) -> impl Future<Output = Result<Bytes>> + Send;

    /// Current legacy gas price in wei.
    fn gas_price(&self) -> impl Future<Output = Result<u128>> + Send;

    /// Gas needed to execute `tx` (its gas fields are ignored).
    fn estimate_gas(&self, tx: &TxRequest) -> impl Future<Output = Result<u64>> + Send;

    /// Sign `tx` with `signer` and broadcast it. Returns the transaction hash.
    fn send_transaction(
        &self,
        signer: &Signer,
        tx: TxRequest,
    ) -> impl Future<Output = Result<B256>> + Send;

    /// Receipt of a mined transaction, `None` while pending.
    fn receipt(&self, tx_hash: B256) -> impl Future<Output = Result<Option<TxReceipt>>> + Send;
}

/// Opens a [`ChainClient`] for a resolved network.
pub trait Connector: Send + Sync {
    type Chain: ChainClient;

    fn connect(&self, profile: &NetworkProfile) -> Result<Self::Chain>;
}

/// Connects over JSON-RPC to the profile's endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcConnector;

impl Connector for RpcConnector {
    type Chain = RpcChain;

    fn connect(&self, profile: &NetworkProfile) -> Result<RpcChain> {
        tracing::debug!(network = %profile.name, "Connecting over JSON-RPC");
        RpcChain::for_profile(profile)
    }
}
