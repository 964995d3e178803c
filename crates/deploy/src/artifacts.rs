//! Compiled contract artifacts.
//!
//! Reads Hardhat (`artifacts/**/<Name>.json`) and Foundry (`out/**/<Name>.json`)
//! outputs. Only the fields the orchestrators need are parsed.

use std::{
    fs,
    path::{Path, PathBuf},
};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use anyhow::Context;
use serde::Deserialize;

use crate::{OrchestrationError, Result, layout::StorageLayout};

/// A deployable contract artifact.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    /// Contract name.
    pub name: String,
    /// Source unit the contract was compiled from, when known.
    pub source_name: Option<String>,
    /// Artifact file path.
    pub path: PathBuf,
    pub abi: JsonAbi,
    /// Creation bytecode.
    pub bytecode: Bytes,
    /// Storage layout, when the compiler was asked to emit it.
    pub storage_layout: Option<StorageLayout>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    source_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
    storage_layout: Option<StorageLayout>,
}

/// Hardhat writes bytecode as a string, Foundry as `{ "object": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object { object: String },
}

impl RawBytecode {
    fn as_hex(&self) -> &str {
        match self {
            RawBytecode::Hex(hex) => hex,
            RawBytecode::Object { object } => object,
        }
    }
}

impl ContractArtifact {
    /// Parse an artifact file. Returns `Ok(None)` for JSON files that are not
    /// artifacts of `contract`.
    fn read(path: &Path, contract: &str) -> anyhow::Result<Option<Self>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let Ok(raw) = serde_json::from_str::<RawArtifact>(&content) else {
            return Ok(None);
        };

        let name = raw.contract_name.unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        });
        if name != contract {
            return Ok(None);
        }

        let hex = raw.bytecode.as_hex();
        if hex.contains("__$") {
            anyhow::bail!("{} requires library linking, which is not supported", path.display());
        }
        let bytecode: Bytes = hex
            .parse()
            .with_context(|| format!("Invalid bytecode in {}", path.display()))?;

        Ok(Some(Self {
            name,
            source_name: raw.source_name,
            path: path.to_path_buf(),
            abi: raw.abi,
            bytecode,
            storage_layout: raw.storage_layout,
        }))
    }

    /// Whether the artifact can be deployed (abstract contracts and
    /// interfaces have no creation code).
    pub fn is_deployable(&self) -> bool {
        !self.bytecode.is_empty()
    }
}

/// Lookup of artifacts below a root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the deployable artifact of `contract`.
    pub fn find(&self, contract: &str) -> Result<ContractArtifact> {
        let not_found = |reason: String| OrchestrationError::ArtifactNotFound {
            contract: contract.to_string(),
            reason,
        };

        if !self.root.is_dir() {
            return Err(not_found(format!(
                "artifacts directory {} does not exist",
                self.root.display()
            )));
        }

        let mut candidates = Vec::new();
        collect_candidates(&self.root, contract, &mut candidates)
            .map_err(|e| not_found(format!("{e:#}")))?;

        let mut matches = Vec::new();
        for path in candidates {
            if let Some(artifact) = ContractArtifact::read(&path, contract)
                .map_err(|e| not_found(format!("{e:#}")))?
            {
                matches.push(artifact);
            }
        }

        match matches.len() {
            0 => Err(not_found(format!(
                "no compiled artifact under {}",
                self.root.display()
            ))),
            1 => {
                let artifact = matches.remove(0);
                if !artifact.is_deployable() {
                    return Err(not_found(format!(
                        "{} has no creation bytecode (abstract contract or interface)",
                        artifact.path.display()
                    )));
                }
                tracing::debug!(contract, path = %artifact.path.display(), "Artifact resolved");
                Ok(artifact)
            }
            _ => Err(OrchestrationError::AmbiguousArtifact {
                contract: contract.to_string(),
                candidates: matches
                    .iter()
                    .map(|a| a.path.display().to_string())
                    .collect(),
            }),
        }
    }
}

/// Recursively collect `<contract>.json` files in path order.
fn collect_candidates(dir: &Path, contract: &str, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let file_name = format!("{}.json", contract);
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_candidates(&path, contract, out)?;
        } else if entry.file_name().to_string_lossy() == file_name {
            out.push(path);
        }
    }
    Ok(())
}
