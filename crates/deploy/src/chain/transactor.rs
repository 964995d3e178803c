//! Submission and confirmation of transactions on behalf of one signer.

use alloy_core::primitives::{B256, Bytes, TxKind, U256};
use tokio::time::Instant;

use super::{ChainClient, TxReceipt, TxRequest};
use crate::{AbortSignal, NetworkProfile, OrchestrationError, Result, Signer};

/// Sends transactions from a signer and waits for them per the network's
/// confirmation policy.
pub struct Transactor<'a, C> {
    chain: &'a C,
    profile: &'a NetworkProfile,
    signer: &'a Signer,
    abort: &'a AbortSignal,
    chain_id: u64,
}

impl<'a, C: ChainClient> Transactor<'a, C> {
    /// Connect to the profile's chain, checking its chain id.
    pub async fn connect(
        chain: &'a C,
        profile: &'a NetworkProfile,
        signer: &'a Signer,
        abort: &'a AbortSignal,
    ) -> Result<Self> {
        let actual = chain.chain_id().await.map_err(OrchestrationError::network)?;
        if let Some(expected) = profile.chain_id
            && expected != actual
        {
            return Err(OrchestrationError::ChainIdMismatch {
                network: profile.name.clone(),
                expected,
                actual,
            });
        }

        tracing::debug!(network = %profile.name, chain_id = actual, signer = %signer.address(), "Connected");

        Ok(Self {
            chain,
            profile,
            signer,
            abort,
            chain_id: actual,
        })
    }

    pub fn chain(&self) -> &'a C {
        self.chain
    }

    pub fn signer(&self) -> &'a Signer {
        self.signer
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Price, fund-check and broadcast a transaction.
    ///
    /// `stage` names the submission for abort reporting.
    pub async fn submit(&self, to: TxKind, input: Bytes, stage: &'static str) -> Result<B256> {
        self.abort.check(stage)?;

        let from = self.signer.address();
        let mut tx = TxRequest {
            chain_id: self.chain_id,
            from,
            to,
            input,
            value: U256::ZERO,
            gas_limit: 0,
            gas_price: 0,
        };

        tx.gas_price = self
            .chain
            .gas_price()
            .await
            .map_err(OrchestrationError::network)?;
        tx.gas_limit = match self.profile.gas_limit {
            Some(gas) => gas,
            None => self
                .chain
                .estimate_gas(&tx)
                .await
                .map_err(OrchestrationError::network)?,
        };

        let required = U256::from(tx.gas_limit) * U256::from(tx.gas_price) + tx.value;
        let available = self
            .chain
            .balance(from)
            .await
            .map_err(OrchestrationError::network)?;
        if available < required {
            return Err(OrchestrationError::InsufficientFunds {
                address: from,
                required,
                available,
            });
        }

        let tx_hash = self
            .chain
            .send_transaction(self.signer, tx)
            .await
            .map_err(OrchestrationError::network)?;

        tracing::info!(network = %self.profile.name, stage, tx_hash = %tx_hash, "Transaction submitted");
        Ok(tx_hash)
    }

    /// Block until `tx_hash` has the required confirmations.
    ///
    /// Poll errors are tolerated until the deadline. A reverted transaction
    /// fails with `NetworkError`.
    pub async fn wait_for_confirmation(&self, tx_hash: B256) -> Result<TxReceipt> {
        let timeout = self.profile.confirmation_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            match self.poll(tx_hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.success {
                        return Err(OrchestrationError::NetworkError(format!(
                            "transaction {} reverted in block {}",
                            tx_hash, receipt.block_number
                        )));
                    }
                    tracing::info!(
                        tx_hash = %tx_hash,
                        block = receipt.block_number,
                        confirmations = self.profile.confirmations,
                        "Transaction confirmed"
                    );
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(tx_hash = %tx_hash, error = %e, "Receipt poll failed"),
            }

            if Instant::now() >= deadline {
                return Err(OrchestrationError::ConfirmationTimeout {
                    tx_hash,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.profile.poll_interval()).await;
        }
    }

    /// Submit then wait for confirmation.
    pub async fn execute(&self, to: TxKind, input: Bytes, stage: &'static str) -> Result<TxReceipt> {
        let tx_hash = self.submit(to, input, stage).await?;
        self.wait_for_confirmation(tx_hash).await
    }

    /// The receipt once it is deep enough, `None` otherwise.
    async fn poll(&self, tx_hash: B256) -> anyhow::Result<Option<TxReceipt>> {
        let Some(receipt) = self.chain.receipt(tx_hash).await? else {
            return Ok(None);
        };
        if !receipt.success {
            return Ok(Some(receipt));
        }

        let head = self.chain.block_number().await?;
        let depth = head.saturating_sub(receipt.block_number) + 1;
        Ok((depth >= self.profile.confirmations).then_some(receipt))
    }
}
