//! [`ChainClient`] over an Ethereum JSON-RPC endpoint.

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use alloy_eips::eip2718::Encodable2718;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ChainClient, LogEntry, TxReceipt, TxRequest};
use crate::{
    NetworkProfile, Signer,
    rpc::{self, deserialize_u64_from_hex},
};

/// A JSON-RPC connection to one network.
#[derive(Debug, Clone)]
pub struct RpcChain {
    client: reqwest::Client,
    url: String,
}

impl RpcChain {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: rpc::create_client(rpc::DEFAULT_REQUEST_TIMEOUT)?,
            url: url.into(),
        })
    }

    /// Connection for a resolved network profile.
    pub fn for_profile(profile: &NetworkProfile) -> Result<Self> {
        Self::new(profile.rpc_url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        rpc::json_rpc_call(&self.client, &self.url, method, params).await
    }

    async fn quantity(&self, method: &str, params: Vec<Value>) -> Result<u64> {
        let value: String = self.call(method, params).await?;
        rpc::parse_quantity(&value)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    /// Absent on pre-Byzantium chains.
    status: Option<String>,
    contract_address: Option<Address>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Deserialize)]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
}

impl From<RpcReceipt> for TxReceipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            success: receipt.status.as_deref() != Some("0x0"),
            contract_address: receipt.contract_address,
            logs: receipt
                .logs
                .into_iter()
                .map(|log| LogEntry {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                })
                .collect(),
        }
    }
}

/// Call object for `eth_estimateGas`.
fn call_object(tx: &TxRequest) -> Value {
    let mut call = json!({
        "from": tx.from,
        "data": tx.input,
        "value": rpc::quantity(tx.value),
    });
    if let TxKind::Call(to) = tx.to {
        call["to"] = json!(to);
    }
    call
}

impl ChainClient for RpcChain {
    async fn chain_id(&self) -> Result<u64> {
        self.quantity("eth_chainId", vec![]).await
    }

    async fn block_number(&self) -> Result<u64> {
        self.quantity("eth_blockNumber", vec![]).await
    }

    async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.call("eth_getCode", vec![json!(address), json!("latest")])
            .await
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256> {
        self.call("eth_getStorageAt", vec![json!(address), json!(slot), json!("latest")])
            .await
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.call("eth_getBalance", vec![json!(address), json!("latest")])
            .await
    }

    async fn static_call(&self, to: Address, input: Bytes) -> Result<Bytes> {
        self.call("eth_call", vec![json!({ "to": to, "data": input }), json!("latest")])
            .await
    }

    async fn gas_price(&self) -> Result<u128> {
        let price: U256 = self.call("eth_gasPrice", vec![]).await?;
        u128::try_from(price).map_err(|_| anyhow::anyhow!("Gas price {} out of range", price))
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64> {
        self.quantity("eth_estimateGas", vec![call_object(tx)])
            .await
            .context("Gas estimation failed (the transaction would likely revert)")
    }

    async fn send_transaction(&self, signer: &Signer, tx: TxRequest) -> Result<B256> {
        let nonce = self
            .quantity(
                "eth_getTransactionCount",
                vec![json!(tx.from), json!("pending")],
            )
            .await
            .context("Failed to fetch nonce")?;

        let legacy = TxLegacy {
            chain_id: Some(tx.chain_id),
            nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: tx.to,
            value: tx.value,
            input: tx.input,
        };

        let signature = signer
            .sign_hash(&legacy.signature_hash())
            .context("Failed to sign transaction")?;
        let envelope = TxEnvelope::Legacy(legacy.into_signed(signature));
        let raw = Bytes::from(envelope.encoded_2718());

        tracing::debug!(from = %tx.from, nonce, gas = tx.gas_limit, "Broadcasting raw transaction");

        self.call("eth_sendRawTransaction", vec![json!(raw)]).await
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;
        Ok(receipt.map(Into::into))
    }
}
