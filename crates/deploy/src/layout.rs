//! Storage layout model and upgrade compatibility rules.
//!
//! Layouts are read from the compiler's `storageLayout` output. Types are
//! compared structurally (label, size, encoding, members) and never by the
//! AST-id suffixes of type identifiers, which change between compilations.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
};

use alloy_core::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::OrchestrationError;

/// Solidity storage slot width in bytes.
const SLOT_BYTES: u64 = 32;

/// Label prefix of reserved storage gaps.
const GAP_PREFIX: &str = "__gap";

/// A contract's storage layout as emitted by the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    /// State variables in declaration order.
    #[serde(default)]
    pub storage: Vec<StorageItem>,
    /// Type descriptions keyed by type identifier.
    #[serde(default, deserialize_with = "deserialize_types")]
    pub types: BTreeMap<String, TypeDescriptor>,
}

/// One state variable (or struct member).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
    pub label: String,
    /// Byte offset inside the slot.
    #[serde(default)]
    pub offset: u64,
    /// Slot index, a decimal string in compiler output.
    pub slot: String,
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
}

/// Description of a storage type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDescriptor {
    pub label: String,
    pub encoding: String,
    pub number_of_bytes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<StorageItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

/// solc emits `"types": null` for contracts without state.
fn deserialize_types<'de, D>(deserializer: D) -> Result<BTreeMap<String, TypeDescriptor>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// A reason the new layout cannot safely replace the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutViolation {
    /// A variable of the old layout is gone.
    Deleted { label: String, slot: String },
    /// A variable now lives at a different position.
    Moved {
        label: String,
        from_slot: String,
        to_slot: String,
    },
    /// Another variable took the position of an old one.
    Renamed {
        slot: String,
        from: String,
        to: String,
    },
    /// Same position and name, different type.
    TypeChanged {
        label: String,
        from: String,
        to: String,
    },
    /// A variable spills over the end of a former storage gap.
    GapMisaligned { gap: String, label: String },
    /// A type referenced by a layout is not described in it.
    UnknownType { type_id: String },
    /// No layout is known for one side of the comparison.
    Unavailable { contract: String },
}

impl fmt::Display for LayoutViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deleted { label, slot } => write!(f, "`{label}` (slot {slot}) was deleted"),
            Self::Moved {
                label,
                from_slot,
                to_slot,
            } => write!(f, "`{label}` moved from slot {from_slot} to slot {to_slot}"),
            Self::Renamed { slot, from, to } => {
                write!(f, "slot {slot}: `{from}` was replaced by `{to}`")
            }
            Self::TypeChanged { label, from, to } => {
                write!(f, "`{label}` changed type from {from} to {to}")
            }
            Self::GapMisaligned { gap, label } => {
                write!(f, "`{label}` does not fit in the space reserved by `{gap}`")
            }
            Self::UnknownType { type_id } => write!(f, "type {type_id} is not described"),
            Self::Unavailable { contract } => write!(
                f,
                "no storage layout for `{contract}` (compile with the storageLayout output selection)"
            ),
        }
    }
}

impl StorageItem {
    fn is_gap(&self) -> bool {
        self.label.starts_with(GAP_PREFIX)
    }

    fn slot_number(&self) -> U256 {
        self.slot.parse().unwrap_or(U256::MAX)
    }

    /// Absolute byte position of the variable's first byte.
    fn start(&self) -> U256 {
        self.slot_number()
            .saturating_mul(U256::from(SLOT_BYTES))
            .saturating_add(U256::from(self.offset))
    }

    fn same_position(&self, other: &StorageItem) -> bool {
        self.slot_number() == other.slot_number() && self.offset == other.offset
    }
}

impl StorageLayout {
    /// Size of a variable in bytes, if its type is described.
    fn size_of(&self, item: &StorageItem) -> Option<U256> {
        self.types
            .get(&item.type_id)
            .and_then(|t| t.number_of_bytes.parse::<U256>().ok())
    }

    /// Absolute byte position one past the variable's last byte.
    fn end(&self, item: &StorageItem) -> Option<U256> {
        self.size_of(item).map(|size| item.start().saturating_add(size))
    }

    fn type_label(&self, type_id: &str) -> String {
        self.types
            .get(type_id)
            .map(|t| t.label.clone())
            .unwrap_or_else(|| type_id.to_string())
    }

    fn find_label(&self, label: &str) -> Option<&StorageItem> {
        self.storage.iter().find(|item| item.label == label)
    }
}

/// Check whether `new` can replace `old` behind a live proxy.
///
/// Every non-gap variable of `old` must keep its slot, offset, name and type.
/// Appending variables is allowed, as is consuming the tail of a `__gap`
/// array as long as the reserved region still ends at the same byte.
pub fn check_upgrade(old: &StorageLayout, new: &StorageLayout) -> Vec<LayoutViolation> {
    let mut violations = Vec::new();

    for old_item in &old.storage {
        if old_item.is_gap() {
            check_gap(old, new, old_item, &mut violations);
            continue;
        }

        let at_position = new
            .storage
            .iter()
            .find(|item| item.same_position(old_item) && !item.is_gap());

        match at_position {
            Some(new_item) if new_item.label == old_item.label => {
                let mut assumed = HashSet::new();
                match types_equal(old, &old_item.type_id, new, &new_item.type_id, &mut assumed) {
                    Ok(true) => {}
                    Ok(false) => violations.push(LayoutViolation::TypeChanged {
                        label: old_item.label.clone(),
                        from: old.type_label(&old_item.type_id),
                        to: new.type_label(&new_item.type_id),
                    }),
                    Err(type_id) => violations.push(LayoutViolation::UnknownType { type_id }),
                }
            }
            Some(new_item) => match new.find_label(&old_item.label) {
                Some(moved) => violations.push(LayoutViolation::Moved {
                    label: old_item.label.clone(),
                    from_slot: old_item.slot.clone(),
                    to_slot: moved.slot.clone(),
                }),
                None => violations.push(LayoutViolation::Renamed {
                    slot: old_item.slot.clone(),
                    from: old_item.label.clone(),
                    to: new_item.label.clone(),
                }),
            },
            None => match new.find_label(&old_item.label) {
                Some(moved) => violations.push(LayoutViolation::Moved {
                    label: old_item.label.clone(),
                    from_slot: old_item.slot.clone(),
                    to_slot: moved.slot.clone(),
                }),
                None => violations.push(LayoutViolation::Deleted {
                    label: old_item.label.clone(),
                    slot: old_item.slot.clone(),
                }),
            },
        }
    }

    violations
}

/// Fail with `IncompatibleStorageLayout` unless `new` can replace `old`.
///
/// A side without a layout fails the check.
pub fn ensure_upgrade_safe(
    old_contract: &str,
    old: Option<&StorageLayout>,
    new_contract: &str,
    new: Option<&StorageLayout>,
) -> crate::Result<()> {
    let (old, new) = match (old, new) {
        (Some(old), Some(new)) => (old, new),
        (old, new) => {
            let missing = [(old_contract, old.is_none()), (new_contract, new.is_none())]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(contract, _)| LayoutViolation::Unavailable {
                    contract: contract.to_string(),
                })
                .collect();
            return Err(OrchestrationError::IncompatibleStorageLayout(missing));
        }
    };

    let violations = check_upgrade(old, new);
    if !violations.is_empty() {
        return Err(OrchestrationError::IncompatibleStorageLayout(violations));
    }

    tracing::info!(from = old_contract, to = new_contract, variables = old.storage.len(), "Storage layout is upgrade safe");
    Ok(())
}

/// New variables may occupy a former gap but must not cross its end.
fn check_gap(
    old: &StorageLayout,
    new: &StorageLayout,
    gap: &StorageItem,
    violations: &mut Vec<LayoutViolation>,
) {
    let Some(gap_end) = old.end(gap) else {
        violations.push(LayoutViolation::UnknownType {
            type_id: gap.type_id.clone(),
        });
        return;
    };
    let gap_start = gap.start();

    for item in &new.storage {
        let start = item.start();
        if start < gap_start || start >= gap_end {
            continue;
        }
        match new.end(item) {
            Some(end) if end <= gap_end => {}
            Some(_) => violations.push(LayoutViolation::GapMisaligned {
                gap: gap.label.clone(),
                label: item.label.clone(),
            }),
            None => violations.push(LayoutViolation::UnknownType {
                type_id: item.type_id.clone(),
            }),
        }
    }
}

/// Structural type equality. `Err` carries an undescribed type id.
fn types_equal(
    old: &StorageLayout,
    old_id: &str,
    new: &StorageLayout,
    new_id: &str,
    assumed: &mut HashSet<(String, String)>,
) -> Result<bool, String> {
    // Recursive types (a struct reachable from its own mapping) are assumed
    // equal on the second visit.
    if !assumed.insert((old_id.to_string(), new_id.to_string())) {
        return Ok(true);
    }

    let a = old.types.get(old_id).ok_or_else(|| old_id.to_string())?;
    let b = new.types.get(new_id).ok_or_else(|| new_id.to_string())?;

    if a.label != b.label || a.encoding != b.encoding || a.number_of_bytes != b.number_of_bytes {
        return Ok(false);
    }

    for (x, y) in [(&a.key, &b.key), (&a.value, &b.value), (&a.base, &b.base)] {
        match (x, y) {
            (None, None) => {}
            (Some(x), Some(y)) => {
                if !types_equal(old, x, new, y, assumed)? {
                    return Ok(false);
                }
            }
            _ => return Ok(false),
        }
    }

    match (&a.members, &b.members) {
        (None, None) => Ok(true),
        (Some(xs), Some(ys)) if xs.len() == ys.len() => {
            for (x, y) in xs.iter().zip(ys) {
                if x.label != y.label || !x.same_position(y) {
                    return Ok(false);
                }
                if !types_equal(old, &x.type_id, new, &y.type_id, assumed)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}
