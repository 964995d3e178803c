//! Signer resolution from a network's credentials.

use std::{fmt, str::FromStr};

use alloy_core::primitives::{Address, B256, Signature};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

use crate::{NetworkProfile, OrchestrationError, Result};

/// An identity able to authorize transactions on one network.
#[derive(Clone)]
pub struct Signer {
    /// Position in the network's credential list.
    pub index: usize,
    /// Network this signer was derived for.
    pub network: String,
    key: PrivateKeySigner,
}

impl Signer {
    /// The signer's account address.
    pub fn address(&self) -> Address {
        self.key.address()
    }

    /// Sign a transaction hash.
    pub fn sign_hash(&self, hash: &B256) -> anyhow::Result<Signature> {
        Ok(self.key.sign_hash_sync(hash)?)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("index", &self.index)
            .field("network", &self.network)
            .field("address", &self.address())
            .finish()
    }
}

impl PartialEq for Signer {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.network == other.network && self.address() == other.address()
    }
}

/// Derive every signer of a profile, in credential order.
///
/// The profile is validated first, so an unset secret fails with
/// `MissingCredentials` instead of reaching key parsing.
pub fn resolve_signers(profile: &NetworkProfile) -> Result<Vec<Signer>> {
    profile.validate()?;

    profile
        .credentials
        .iter()
        .enumerate()
        .map(|(index, credential)| {
            let key = PrivateKeySigner::from_str(credential.expose()).map_err(|_| {
                OrchestrationError::InvalidCredential {
                    network: profile.name.clone(),
                    index,
                }
            })?;
            Ok(Signer {
                index,
                network: profile.name.clone(),
                key,
            })
        })
        .collect()
}

/// The deploying identity: signer 0, or `index` when the operator overrides it.
pub fn primary_signer(profile: &NetworkProfile, index: Option<usize>) -> Result<Signer> {
    let index = index.unwrap_or(0);
    let signers = resolve_signers(profile)?;
    let available = signers.len();

    signers
        .into_iter()
        .nth(index)
        .ok_or_else(|| OrchestrationError::NoSigners {
            network: profile.name.clone(),
            index,
            available,
        })
}
