//! Per-network manifest of deployed proxies and implementations.
//!
//! The manifest caches what this tool deployed so that an upgrade can find
//! the storage layout of the implementation currently behind a proxy. It is
//! never the source of truth for which proxy to upgrade: the operator always
//! supplies the proxy address.

use std::{
    fs::{self, File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{OrchestrationError, layout::StorageLayout, proxy::ProxyKind};

/// A proxy deployed on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub address: Address,
    pub kind: ProxyKind,
    /// Contract behind the proxy.
    pub contract: String,
    /// Current implementation.
    pub implementation: Address,
    pub deployed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An implementation contract deployed on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationEntry {
    pub address: Address,
    pub contract: String,
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_layout: Option<StorageLayout>,
    pub deployed_at: DateTime<Utc>,
}

/// Everything recorded for one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkManifest {
    pub network: String,
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub proxies: Vec<ProxyEntry>,
    #[serde(default)]
    pub implementations: Vec<ImplementationEntry>,
}

impl NetworkManifest {
    pub fn proxy(&self, address: Address) -> Option<&ProxyEntry> {
        self.proxies.iter().find(|p| p.address == address)
    }

    pub fn implementation(&self, address: Address) -> Option<&ImplementationEntry> {
        self.implementations.iter().find(|i| i.address == address)
    }

    /// Record an implementation, replacing an entry at the same address.
    pub fn add_implementation(&mut self, entry: ImplementationEntry) {
        self.implementations.retain(|i| i.address != entry.address);
        self.implementations.push(entry);
    }

    /// Record a freshly deployed proxy.
    pub fn add_proxy(&mut self, address: Address, kind: ProxyKind, contract: &str, implementation: Address) {
        let now = Utc::now();
        self.proxies.retain(|p| p.address != address);
        self.proxies.push(ProxyEntry {
            address,
            kind,
            contract: contract.to_string(),
            implementation,
            deployed_at: now,
            updated_at: now,
        });
    }

    /// Point a proxy at its new implementation. Proxies deployed by other
    /// tools are added on first upgrade.
    pub fn set_implementation(&mut self, proxy: Address, kind: ProxyKind, contract: &str, implementation: Address) {
        match self.proxies.iter_mut().find(|p| p.address == proxy) {
            Some(entry) => {
                entry.contract = contract.to_string();
                entry.implementation = implementation;
                entry.updated_at = Utc::now();
            }
            None => self.add_proxy(proxy, kind, contract, implementation),
        }
    }
}

/// Held for the duration of an upgrade. Released on drop.
#[derive(Debug)]
pub struct ProxyLock {
    file: File,
    path: PathBuf,
}

impl ProxyLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProxyLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release proxy lock");
        }
    }
}

/// Directory holding one manifest file per network.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{}.json", network))
    }

    fn locks_dir(&self) -> PathBuf {
        self.dir.join("locks")
    }

    /// Load a network's manifest; empty when none was written yet.
    pub fn load(&self, network: &str) -> Result<NetworkManifest> {
        let path = self.manifest_path(network);
        if !path.exists() {
            return Ok(NetworkManifest {
                network: network.to_string(),
                ..Default::default()
            });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    /// Read-modify-write a network's manifest under an exclusive lock.
    pub fn update<F>(&self, network: &str, chain_id: u64, f: F) -> Result<NetworkManifest>
    where
        F: FnOnce(&mut NetworkManifest),
    {
        let locks = self.locks_dir();
        fs::create_dir_all(&locks)
            .with_context(|| format!("Failed to create {}", locks.display()))?;

        let lock_path = locks.join(format!("{}.manifest.lock", network));
        let lock = open_lock_file(&lock_path)?;
        lock.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;

        let mut manifest = self.load(network)?;
        manifest.chain_id = Some(chain_id);
        f(&mut manifest);

        let path = self.manifest_path(network);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move manifest into place at {}", path.display()))?;

        FileExt::unlock(&lock).with_context(|| format!("Failed to unlock {}", lock_path.display()))?;

        tracing::debug!(path = %path.display(), "Manifest saved");
        Ok(manifest)
    }

    /// Take the exclusive run lock for `proxy` on `network` without waiting.
    pub fn lock_proxy(&self, network: &str, proxy: Address) -> crate::Result<ProxyLock> {
        let locks = self.locks_dir();
        fs::create_dir_all(&locks)
            .with_context(|| format!("Failed to create {}", locks.display()))
            .map_err(OrchestrationError::config)?;

        let path = locks.join(format!("{}-{:x}.lock", network, proxy));
        let file = open_lock_file(&path).map_err(OrchestrationError::config)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Proxy lock acquired");
                Ok(ProxyLock { file, path })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(OrchestrationError::ProxyLocked(path.display().to_string()))
            }
            Err(e) => Err(OrchestrationError::Config(format!(
                "Failed to lock {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))
}
