//! In-memory chain used by the integration tests.
//!
//! It executes just enough of the EVM's observable behaviour for proxy
//! orchestration: contract creation addresses, ERC-1967 slots, the upgrade
//! entry points of OpenZeppelin 4 and 5 proxies and the `Upgraded` event.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, TxKind, U256, keccak256},
    sol_types::{SolCall, SolEvent},
};
use uproxy_deploy::{
    ChainClient, Connector, NetworkProfile, Signer,
    chain::{LogEntry, TxReceipt, TxRequest},
    proxy::{
        ADMIN_SLOT, IMPLEMENTATION_SLOT, UPGRADE_INTERFACE_V5, UPGRADE_INTERFACE_VERSIONCall,
        Upgraded, upgradeAndCallCall, upgradeCall, upgradeToAndCallCall, upgradeToCall,
    },
};

/// Gas reported by `estimate_gas`.
pub const DEV_GAS_ESTIMATE: u64 = 1_000_000;

/// Legacy gas price: 1 gwei.
pub const DEV_GAS_PRICE: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyCode {
    Erc1967,
    Transparent,
}

/// OpenZeppelin release line of a ProxyAdmin or a UUPS implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// `upgradeTo` / `upgrade`; the `AndCall` variants always call into the
    /// new implementation.
    V4,
    /// `AndCall` variants only, with `UPGRADE_INTERFACE_VERSION()`.
    V5,
}

impl Generation {
    /// Whether an upgrade entry point of this generation accepts the call.
    /// `data` is `None` for `upgradeTo` / `upgrade`.
    fn accepts(self, data: Option<&Bytes>) -> bool {
        match (self, data) {
            (Generation::V5, data) => data.is_some(),
            // Empty data lands in a fallback the implementation does not have.
            (Generation::V4, Some(data)) => !data.is_empty(),
            (Generation::V4, None) => true,
        }
    }
}

#[derive(Debug, Default)]
struct Account {
    nonce: u64,
    balance: U256,
    code: Bytes,
    storage: HashMap<B256, B256>,
    /// Set on ProxyAdmins.
    generation: Option<Generation>,
}

/// Success, created address and logs of an executed transaction.
type Outcome = (bool, Option<Address>, Vec<LogEntry>);

fn reverted() -> Outcome {
    (false, None, vec![])
}

#[derive(Debug, Default)]
struct DevState {
    chain_id: u64,
    block: u64,
    accounts: HashMap<Address, Account>,
    receipts: HashMap<B256, TxReceipt>,
    submitted: Vec<TxRequest>,
    proxy_codes: Vec<(Bytes, ProxyCode)>,
    /// Implementation code carrying UUPS upgrade logic.
    uups_codes: Vec<(Bytes, Generation)>,
    /// Proxies placed with `install_proxy`.
    installed: u64,
    /// Data passed to each proxy's constructor.
    init_data: HashMap<Address, Bytes>,
    /// Owner of each ProxyAdmin.
    admin_owners: HashMap<Address, Address>,
    stalled: bool,
    drift: bool,
}

/// A shared, cloneable in-memory chain.
#[derive(Debug, Clone, Default)]
pub struct DevChain {
    state: Arc<Mutex<DevState>>,
}

fn word_address(data: &[u8], word: usize) -> Address {
    let start = word * 32;
    Address::from_slice(&data[start + 12..start + 32])
}

fn word_usize(data: &[u8], word: usize) -> usize {
    let start = word * 32;
    U256::from_be_slice(&data[start..start + 32]).to::<usize>()
}

/// Read a dynamic `bytes` argument whose offset is in head word `word`.
fn dynamic_bytes(data: &[u8], word: usize) -> Bytes {
    let offset = word_usize(data, word);
    let len = U256::from_be_slice(&data[offset..offset + 32]).to::<usize>();
    Bytes::copy_from_slice(&data[offset + 32..offset + 32 + len])
}

impl DevChain {
    pub fn new(chain_id: u64) -> Self {
        let chain = Self::default();
        chain.lock().chain_id = chain_id;
        chain
    }

    fn lock(&self) -> MutexGuard<'_, DevState> {
        self.state.lock().unwrap()
    }

    /// Treat creation code starting with `bytecode` as a proxy of `kind`.
    pub fn register_proxy_code(&self, bytecode: Bytes, kind: ProxyCode) {
        self.lock().proxy_codes.push((bytecode, kind));
    }

    /// Treat implementations whose code starts with `bytecode` as UUPS
    /// implementations of `generation`.
    pub fn register_uups_code(&self, bytecode: Bytes, generation: Generation) {
        self.lock().uups_codes.push((bytecode, generation));
    }

    /// Place a proxy deployed outside the orchestrator, with `owner`
    /// owning the ProxyAdmin of a transparent proxy.
    pub fn install_proxy(
        &self,
        kind: ProxyCode,
        generation: Generation,
        implementation_code: Bytes,
        owner: Address,
    ) -> Address {
        let mut state = self.lock();
        let origin = Address::repeat_byte(0xee);
        let n = state.installed;
        state.installed += 1;

        let implementation = origin.create(2 * n);
        let proxy = origin.create(2 * n + 1);
        state.accounts.entry(implementation).or_default().code = implementation_code;
        state.accounts.entry(proxy).or_default().code =
            Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]);
        state.set_slot(proxy, IMPLEMENTATION_SLOT, implementation);
        if kind == ProxyCode::Transparent {
            state.create_admin(proxy, owner, generation);
        }
        proxy
    }

    pub fn fund(&self, address: Address, amount: U256) {
        self.lock().accounts.entry(address).or_default().balance = amount;
    }

    /// Accept transactions but never mine them.
    pub fn stall(&self) {
        self.lock().stalled = true;
    }

    /// Emit `Upgraded` from the wrong address on upgrades.
    pub fn drift(&self) {
        self.lock().drift = true;
    }

    pub fn submitted(&self) -> usize {
        self.lock().submitted.len()
    }

    /// Calldata of the most recent transaction.
    pub fn last_input(&self) -> Option<Bytes> {
        self.lock().submitted.last().map(|tx| tx.input.clone())
    }

    pub fn implementation_of(&self, proxy: Address) -> Address {
        self.slot(proxy, IMPLEMENTATION_SLOT)
    }

    pub fn admin_of(&self, proxy: Address) -> Address {
        self.slot(proxy, ADMIN_SLOT)
    }

    pub fn init_data(&self, proxy: Address) -> Option<Bytes> {
        self.lock().init_data.get(&proxy).cloned()
    }

    pub fn has_code(&self, address: Address) -> bool {
        self.lock()
            .accounts
            .get(&address)
            .is_some_and(|a| !a.code.is_empty())
    }

    fn slot(&self, address: Address, slot: B256) -> Address {
        let state = self.lock();
        let word = state
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&slot))
            .copied()
            .unwrap_or_default();
        Address::from_word(word)
    }
}

impl DevState {
    fn set_slot(&mut self, address: Address, slot: B256, value: Address) {
        self.accounts
            .entry(address)
            .or_default()
            .storage
            .insert(slot, value.into_word());
    }

    /// ProxyAdmin of a transparent proxy, at the proxy's first creation address.
    fn create_admin(&mut self, proxy: Address, owner: Address, generation: Generation) {
        let admin = proxy.create(1);
        let account = self.accounts.entry(admin).or_default();
        account.code = Bytes::from_static(&[0xad, 0x31]);
        account.generation = Some(generation);
        self.admin_owners.insert(admin, owner);
        self.set_slot(proxy, ADMIN_SLOT, admin);
    }

    fn implementation(&self, proxy: Address) -> Option<Address> {
        self.accounts
            .get(&proxy)?
            .storage
            .get(&IMPLEMENTATION_SLOT)
            .map(|word| Address::from_word(*word))
    }

    fn is_transparent(&self, proxy: Address) -> bool {
        self.accounts
            .get(&proxy)
            .is_some_and(|a| a.storage.contains_key(&ADMIN_SLOT))
    }

    /// Generation of the UUPS logic deployed at `address`, if any.
    fn uups_generation(&self, address: Address) -> Option<Generation> {
        let code = &self.accounts.get(&address)?.code;
        self.uups_codes
            .iter()
            .find(|(uups, _)| code.starts_with(&uups[..]))
            .map(|(_, generation)| *generation)
    }

    /// `upgradeToAndCall` / `upgradeTo` sent to a UUPS proxy, which runs
    /// the upgrade function of its current implementation.
    fn upgrade_uups(
        &mut self,
        proxy: Address,
        implementation: Address,
        data: Option<&Bytes>,
    ) -> Outcome {
        if self.is_transparent(proxy) {
            return reverted();
        }
        let current = self.implementation(proxy);
        let Some(generation) = current.and_then(|current| self.uups_generation(current)) else {
            return reverted();
        };
        // proxiableUUID check on the new implementation.
        if self.uups_generation(implementation).is_none() || !generation.accepts(data) {
            return reverted();
        }
        self.set_slot(proxy, IMPLEMENTATION_SLOT, implementation);
        (true, None, vec![self.upgraded_log(proxy, implementation)])
    }

    /// `upgradeAndCall` / `upgrade` sent to a ProxyAdmin.
    fn upgrade_through_admin(
        &mut self,
        admin: Address,
        sender: Address,
        proxy: Address,
        implementation: Address,
        data: Option<&Bytes>,
    ) -> Outcome {
        if self.admin_owners.get(&admin) != Some(&sender) {
            return reverted();
        }
        let generation = self
            .accounts
            .get(&admin)
            .and_then(|a| a.generation)
            .unwrap_or(Generation::V5);
        if !generation.accepts(data) {
            return reverted();
        }
        self.set_slot(proxy, IMPLEMENTATION_SLOT, implementation);
        (true, None, vec![self.upgraded_log(proxy, implementation)])
    }

    /// Generation answering `UPGRADE_INTERFACE_VERSION()` at `address`.
    fn interface_generation(&self, address: Address) -> Option<Generation> {
        if self.admin_owners.contains_key(&address) {
            return self.accounts.get(&address).and_then(|a| a.generation);
        }
        if self.is_transparent(address) {
            return None;
        }
        // A UUPS proxy delegates to its implementation.
        self.implementation(address)
            .and_then(|current| self.uups_generation(current))
    }

    fn upgraded_log(&self, proxy: Address, implementation: Address) -> LogEntry {
        let emitter = if self.drift {
            Address::repeat_byte(0xdd)
        } else {
            proxy
        };
        LogEntry {
            address: emitter,
            topics: vec![Upgraded::SIGNATURE_HASH, implementation.into_word()],
            data: Bytes::new(),
        }
    }

    /// Apply a transaction.
    fn execute(&mut self, tx: &TxRequest, nonce: u64) -> Outcome {
        match tx.to {
            TxKind::Create => {
                let address = tx.from.create(nonce);
                let proxy = self
                    .proxy_codes
                    .iter()
                    .find(|(code, _)| tx.input.starts_with(&code[..]))
                    .map(|(code, kind)| (code.len(), *kind));

                self.accounts.entry(address).or_default().code = tx.input.clone();

                let Some((code_len, kind)) = proxy else {
                    return (true, Some(address), vec![]);
                };

                let args = &tx.input[code_len..];
                let implementation = word_address(args, 0);
                self.set_slot(address, IMPLEMENTATION_SLOT, implementation);
                let data = match kind {
                    ProxyCode::Erc1967 => dynamic_bytes(args, 1),
                    ProxyCode::Transparent => {
                        // The proxy creates its own ProxyAdmin.
                        self.create_admin(address, word_address(args, 1), Generation::V5);
                        dynamic_bytes(args, 2)
                    }
                };
                self.init_data.insert(address, data);
                let log = self.upgraded_log(address, implementation);
                (true, Some(address), vec![log])
            }
            TxKind::Call(to) => {
                let input: &[u8] = &tx.input;
                if input.len() < 4 {
                    return reverted();
                }
                let (selector, args) = input.split_at(4);

                if selector == upgradeToAndCallCall::SELECTOR {
                    let data = dynamic_bytes(args, 1);
                    return self.upgrade_uups(to, word_address(args, 0), Some(&data));
                }
                if selector == upgradeToCall::SELECTOR {
                    return self.upgrade_uups(to, word_address(args, 0), None);
                }
                if selector == upgradeAndCallCall::SELECTOR {
                    let data = dynamic_bytes(args, 2);
                    return self.upgrade_through_admin(
                        to,
                        tx.from,
                        word_address(args, 0),
                        word_address(args, 1),
                        Some(&data),
                    );
                }
                if selector == upgradeCall::SELECTOR {
                    return self.upgrade_through_admin(
                        to,
                        tx.from,
                        word_address(args, 0),
                        word_address(args, 1),
                        None,
                    );
                }

                reverted()
            }
        }
    }
}

impl ChainClient for DevChain {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        Ok(self.lock().chain_id)
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        Ok(self.lock().block)
    }

    async fn code_at(&self, address: Address) -> anyhow::Result<Bytes> {
        Ok(self
            .lock()
            .accounts
            .get(&address)
            .map(|a| a.code.clone())
            .unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: B256) -> anyhow::Result<B256> {
        Ok(self
            .lock()
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&slot))
            .copied()
            .unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> anyhow::Result<U256> {
        Ok(self
            .lock()
            .accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default())
    }

    async fn static_call(&self, to: Address, input: Bytes) -> anyhow::Result<Bytes> {
        let state = self.lock();
        anyhow::ensure!(
            input.starts_with(&UPGRADE_INTERFACE_VERSIONCall::SELECTOR),
            "execution reverted"
        );
        match state.interface_generation(to) {
            Some(Generation::V5) => {
                let version =
                    DynSolValue::Tuple(vec![DynSolValue::String(UPGRADE_INTERFACE_V5.into())]);
                Ok(version.abi_encode_params().into())
            }
            _ => anyhow::bail!("execution reverted"),
        }
    }

    async fn gas_price(&self) -> anyhow::Result<u128> {
        Ok(DEV_GAS_PRICE)
    }

    async fn estimate_gas(&self, _tx: &TxRequest) -> anyhow::Result<u64> {
        Ok(DEV_GAS_ESTIMATE)
    }

    async fn send_transaction(&self, signer: &Signer, tx: TxRequest) -> anyhow::Result<B256> {
        let mut state = self.lock();
        anyhow::ensure!(tx.from == signer.address(), "sender does not match signer");
        anyhow::ensure!(tx.chain_id == state.chain_id, "wrong chain id");

        let account = state.accounts.entry(tx.from).or_default();
        let nonce = account.nonce;
        account.nonce += 1;

        let mut preimage = tx.from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&tx.input);
        let tx_hash = keccak256(preimage);

        state.submitted.push(tx.clone());
        if state.stalled {
            return Ok(tx_hash);
        }

        let (success, contract_address, logs) = state.execute(&tx, nonce);
        state.block += 1;
        let receipt = TxReceipt {
            tx_hash,
            block_number: state.block,
            success,
            contract_address,
            logs: if success { logs } else { vec![] },
        };
        state.receipts.insert(tx_hash, receipt);
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> anyhow::Result<Option<TxReceipt>> {
        Ok(self.lock().receipts.get(&tx_hash).cloned())
    }
}

impl Connector for DevChain {
    type Chain = DevChain;

    fn connect(&self, _profile: &NetworkProfile) -> anyhow::Result<DevChain> {
        Ok(self.clone())
    }
}
