//! Upgradeable proxy conventions (ERC-1967).
//!
//! The proxy contracts themselves come from the upgradeable-proxy library's
//! compiled artifacts. This module only knows their storage slots, their
//! constructor shapes and the calls that move them to a new implementation.

use alloy_core::{
    dyn_abi::{DynSolValue, JsonAbiExt},
    json_abi::{Constructor, JsonAbi},
    primitives::{Address, B256, Bytes, b256},
    sol,
    sol_types::SolCall,
};
use serde::{Deserialize, Serialize};

use crate::{ChainClient, OrchestrationError, Result};

/// `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`
pub const IMPLEMENTATION_SLOT: B256 =
    b256!("0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// `bytes32(uint256(keccak256("eip1967.proxy.admin")) - 1)`
pub const ADMIN_SLOT: B256 =
    b256!("0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// Default artifact name of the UUPS proxy.
pub const ERC1967_PROXY_CONTRACT: &str = "ERC1967Proxy";

/// Default artifact name of the transparent proxy.
pub const TRANSPARENT_PROXY_CONTRACT: &str = "TransparentUpgradeableProxy";

/// `UPGRADE_INTERFACE_VERSION()` of OpenZeppelin 5 proxies and ProxyAdmins.
pub const UPGRADE_INTERFACE_V5: &str = "5.0.0";

sol! {
    /// UUPS upgrade entry point, implemented by the logic contract.
    function upgradeToAndCall(address newImplementation, bytes data) external payable;

    /// UUPS upgrade without a call (OpenZeppelin 4).
    function upgradeTo(address newImplementation) external;

    /// Transparent proxy upgrade entry point, on the ProxyAdmin.
    function upgradeAndCall(address proxy, address implementation, bytes data) external payable;

    /// ProxyAdmin upgrade without a call (OpenZeppelin 4).
    function upgrade(address proxy, address implementation) external;

    /// Present from OpenZeppelin 5 on, where only the `AndCall` variants exist.
    function UPGRADE_INTERFACE_VERSION() external view returns (string);

    /// Emitted by the proxy whenever its implementation changes.
    event Upgraded(address indexed implementation);
}

/// Whether an implementation ABI carries the UUPS upgrade logic, so a proxy
/// pointing at it can be upgraded again.
pub fn supports_uups(abi: &JsonAbi) -> bool {
    abi.functions().any(|f| {
        let signature = f.signature();
        signature == "upgradeToAndCall(address,bytes)" || signature == "upgradeTo(address)"
    })
}

/// Which upgrade pattern a proxy follows.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ProxyKind {
    /// ERC1967Proxy; the implementation carries the upgrade logic.
    Uups,
    /// TransparentUpgradeableProxy administered by a ProxyAdmin contract.
    Transparent,
}

impl ProxyKind {
    /// Default proxy artifact for this kind.
    pub fn default_contract(&self) -> &'static str {
        match self {
            ProxyKind::Uups => ERC1967_PROXY_CONTRACT,
            ProxyKind::Transparent => TRANSPARENT_PROXY_CONTRACT,
        }
    }

    /// ABI-encode the proxy constructor arguments.
    ///
    /// UUPS: `(address logic, bytes data)`.
    /// Transparent: `(address logic, address initialOwner, bytes data)`.
    pub fn encode_constructor(
        &self,
        constructor: Option<&Constructor>,
        implementation: Address,
        owner: Address,
        init_data: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let constructor = constructor
            .ok_or_else(|| anyhow::anyhow!("{} proxy artifact declares no constructor", self))?;

        let values = match self {
            ProxyKind::Uups => vec![
                DynSolValue::Address(implementation),
                DynSolValue::Bytes(init_data.to_vec()),
            ],
            ProxyKind::Transparent => vec![
                DynSolValue::Address(implementation),
                DynSolValue::Address(owner),
                DynSolValue::Bytes(init_data.to_vec()),
            ],
        };

        constructor
            .abi_encode_input(&values)
            .map_err(|e| {
                anyhow::anyhow!("Proxy constructor does not match a {} proxy: {}", self, e)
            })
    }
}

/// Upgrade functions exposed by a proxy (UUPS) or its ProxyAdmin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum UpgradeInterface {
    /// OpenZeppelin 5: `upgradeToAndCall` / `upgradeAndCall`, where empty data skips the call.
    V5,
    /// Earlier releases: `upgradeTo` / `upgrade`. Their `AndCall` variants
    /// always call into the new implementation, even with empty data.
    Legacy,
}

/// On-chain state of a recognized proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyState {
    pub address: Address,
    pub implementation: Address,
    /// ProxyAdmin contract, for transparent proxies.
    pub admin: Option<Address>,
    pub kind: ProxyKind,
    pub interface: UpgradeInterface,
}

impl ProxyState {
    /// Contract receiving the upgrade transaction: the ProxyAdmin of a
    /// transparent proxy, the proxy itself otherwise.
    pub fn upgrade_target(&self) -> Address {
        match (self.kind, self.admin) {
            (ProxyKind::Transparent, Some(admin)) => admin,
            _ => self.address,
        }
    }

    /// Target and calldata of the transaction that moves the proxy to
    /// `new_implementation` without calling into it.
    pub fn upgrade_call(&self, new_implementation: Address) -> (Address, Bytes) {
        let target = self.upgrade_target();
        let calldata = match (target == self.address, self.interface) {
            (true, UpgradeInterface::V5) => upgradeToAndCallCall {
                newImplementation: new_implementation,
                data: Bytes::new(),
            }
            .abi_encode(),
            (true, UpgradeInterface::Legacy) => upgradeToCall {
                newImplementation: new_implementation,
            }
            .abi_encode(),
            (false, UpgradeInterface::V5) => upgradeAndCallCall {
                proxy: self.address,
                implementation: new_implementation,
                data: Bytes::new(),
            }
            .abi_encode(),
            (false, UpgradeInterface::Legacy) => upgradeCall {
                proxy: self.address,
                implementation: new_implementation,
            }
            .abi_encode(),
        };
        (target, calldata.into())
    }
}

/// Parse an operator-supplied address: `0x` followed by 40 hex characters.
///
/// Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_address(addr: &str) -> Result<Address> {
    let invalid = |reason: &str| OrchestrationError::InvalidProxyAddress {
        address: addr.to_string(),
        reason: reason.to_string(),
    };

    let Some(digits) = addr.strip_prefix("0x") else {
        return Err(invalid("expected a 0x prefix"));
    };
    if digits.len() != 40 {
        return Err(invalid("expected 40 hex characters"));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("contains non-hex characters"));
    }

    let mixed_case = digits.chars().any(|c| c.is_ascii_lowercase())
        && digits.chars().any(|c| c.is_ascii_uppercase());
    if mixed_case {
        return Address::parse_checksummed(addr, None).map_err(|_| invalid("bad EIP-55 checksum"));
    }

    addr.parse().map_err(|_| invalid("not an address"))
}

/// Read an address stored right-aligned in a storage word.
fn slot_address(word: B256) -> Option<Address> {
    let address = Address::from_word(word);
    (!address.is_zero()).then_some(address)
}

/// Confirm that `address` is an upgradeable proxy and read its bindings.
pub async fn inspect_proxy<C: ChainClient>(chain: &C, address: Address) -> Result<ProxyState> {
    let invalid = |reason: String| OrchestrationError::InvalidProxyAddress {
        address: address.to_string(),
        reason,
    };

    let code = chain
        .code_at(address)
        .await
        .map_err(OrchestrationError::network)?;
    if code.is_empty() {
        return Err(invalid("no contract deployed at this address".to_string()));
    }

    let implementation = chain
        .storage_at(address, IMPLEMENTATION_SLOT)
        .await
        .map_err(OrchestrationError::network)?;
    let implementation = slot_address(implementation)
        .ok_or_else(|| invalid("ERC-1967 implementation slot is empty".to_string()))?;

    let admin = chain
        .storage_at(address, ADMIN_SLOT)
        .await
        .map_err(OrchestrationError::network)
        .map(slot_address)?;

    let (kind, upgrade_target) = match admin {
        Some(admin) => (ProxyKind::Transparent, admin),
        None => (ProxyKind::Uups, address),
    };
    let interface = upgrade_interface(chain, upgrade_target).await;

    Ok(ProxyState {
        address,
        implementation,
        admin,
        kind,
        interface,
    })
}

/// Ask `target` for `UPGRADE_INTERFACE_VERSION()`. A revert or any answer
/// other than "5.0.0" means the legacy entry points.
async fn upgrade_interface<C: ChainClient>(chain: &C, target: Address) -> UpgradeInterface {
    let input = UPGRADE_INTERFACE_VERSIONCall {}.abi_encode();
    let output = match chain.static_call(target, input.into()).await {
        Ok(output) => output,
        Err(e) => {
            let error = format!("{e:#}");
            tracing::debug!(
                %target,
                %error,
                "No upgrade interface version, using legacy upgrade calls"
            );
            return UpgradeInterface::Legacy;
        }
    };

    match UPGRADE_INTERFACE_VERSIONCall::abi_decode_returns(&output) {
        Ok(version) if version == UPGRADE_INTERFACE_V5 => UpgradeInterface::V5,
        Ok(version) => {
            tracing::warn!(
                %target,
                %version,
                "Unknown upgrade interface version, using legacy upgrade calls"
            );
            UpgradeInterface::Legacy
        }
        Err(_) => UpgradeInterface::Legacy,
    }
}
