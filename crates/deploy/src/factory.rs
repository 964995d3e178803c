//! Contract factories: an artifact bound to the account that deploys it.
//!
//! Upgradeable implementations are never constructed with arguments. Their
//! state is set by an initializer called through the proxy, so the factory is
//! also where initializer arguments are checked and encoded.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::Function,
    primitives::{Address, Bytes},
};

use crate::{
    OrchestrationError, Result, Signer, artifacts::ContractArtifact, proxy::supports_uups,
    record::InitArg,
};

/// Initializer called when none is named.
pub const DEFAULT_INITIALIZER: &str = "initialize";

/// Encoded initializer call.
#[derive(Debug, Clone, PartialEq)]
pub struct InitCall {
    /// Selected overload, e.g. `initialize(uint256,uint256)`. `None` when
    /// the contract is deployed without initialization.
    pub signature: Option<String>,
    pub args: Vec<InitArg>,
    /// Selector and arguments, empty when not initializing.
    pub calldata: Bytes,
}

/// A compiled contract ready to be deployed by one signer.
#[derive(Debug, Clone)]
pub struct ContractFactory {
    artifact: ContractArtifact,
    deployer: Address,
}

impl ContractFactory {
    pub fn new(artifact: ContractArtifact, signer: &Signer) -> Self {
        Self {
            artifact,
            deployer: signer.address(),
        }
    }

    pub fn artifact(&self) -> &ContractArtifact {
        &self.artifact
    }

    pub fn name(&self) -> &str {
        &self.artifact.name
    }

    pub fn deployer(&self) -> Address {
        self.deployer
    }

    /// Creation input: bytecode followed by encoded constructor arguments.
    pub fn deploy_code(&self, constructor_args: &[u8]) -> Bytes {
        self.artifact
            .bytecode
            .iter()
            .chain(constructor_args)
            .copied()
            .collect::<Vec<u8>>()
            .into()
    }

    /// Reject implementations whose constructor needs arguments.
    pub fn ensure_argless_constructor(&self) -> Result<()> {
        match &self.artifact.abi.constructor {
            Some(constructor) if !constructor.inputs.is_empty() => {
                Err(OrchestrationError::InitArgsMismatch(format!(
                    "{} has a constructor with {} argument(s); upgradeable implementations must be set up through an initializer",
                    self.name(),
                    constructor.inputs.len()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Reject implementations a UUPS proxy could not be upgraded away from.
    pub fn ensure_uups(&self) -> Result<()> {
        if supports_uups(&self.artifact.abi) {
            Ok(())
        } else {
            Err(OrchestrationError::NotUpgradeable {
                contract: self.name().to_string(),
            })
        }
    }

    /// Check `args` against the initializer's declared signature and encode
    /// the call.
    ///
    /// Overloads are matched by arity, then by whether every argument
    /// coerces to the declared type. Without an initializer in the ABI only
    /// an empty argument list is accepted, and no call is made.
    pub fn encode_initializer(&self, initializer: &str, args: &[String]) -> Result<InitCall> {
        let overloads = self
            .artifact
            .abi
            .function(initializer)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if overloads.is_empty() {
            if args.is_empty() {
                return Ok(InitCall {
                    signature: None,
                    args: Vec::new(),
                    calldata: Bytes::new(),
                });
            }
            return Err(OrchestrationError::InitArgsMismatch(format!(
                "{} declares no `{}` function but {} argument(s) were given",
                self.name(),
                initializer,
                args.len()
            )));
        }

        let same_arity: Vec<&Function> = overloads
            .iter()
            .filter(|f| f.inputs.len() == args.len())
            .collect();
        if same_arity.is_empty() {
            let expected = overloads
                .iter()
                .map(|f| f.signature())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(OrchestrationError::InitArgsMismatch(format!(
                "expected arguments for {}, got {}",
                expected,
                args.len()
            )));
        }

        let mut first_error = None;
        for function in same_arity {
            match encode_call(function, args) {
                Ok(call) => return Ok(call),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(OrchestrationError::InitArgsMismatch(
            first_error.unwrap_or_default(),
        ))
    }
}

fn encode_call(function: &Function, args: &[String]) -> std::result::Result<InitCall, String> {
    let mut init_args = Vec::with_capacity(args.len());
    for (index, (param, raw)) in function.inputs.iter().zip(args).enumerate() {
        let ty = param
            .resolve()
            .map_err(|e| format!("cannot resolve type of parameter {}: {}", index, e))?;
        let value = coerce(&ty, raw).map_err(|e| {
            format!(
                "argument {} (`{}`) of {} is not a valid {}: {}",
                index,
                raw,
                function.signature(),
                ty.sol_type_name(),
                e
            )
        })?;
        init_args.push(InitArg {
            name: param.name.clone(),
            ty: ty.sol_type_name().into_owned(),
            raw: raw.clone(),
            value,
        });
    }

    let values: Vec<DynSolValue> = init_args.iter().map(|a| a.value.clone()).collect();
    let calldata = function
        .abi_encode_input(&values)
        .map_err(|e| format!("failed to encode {}: {}", function.signature(), e))?;

    Ok(InitCall {
        signature: Some(function.signature()),
        args: init_args,
        calldata: calldata.into(),
    })
}

/// Coerce an operator string to `ty`, accepting scientific notation such as
/// `1000e18` for integers.
fn coerce(ty: &DynSolType, raw: &str) -> std::result::Result<DynSolValue, String> {
    let raw = raw.trim();
    let expanded = match ty {
        DynSolType::Int(_) | DynSolType::Uint(_) => match expand_exponent(raw) {
            Some(digits) => Some(digits),
            None if is_scientific(raw) => {
                return Err("not an integer that fits in 256 bits".to_string());
            }
            None => None,
        },
        _ => None,
    };
    ty.coerce_str(expanded.as_deref().unwrap_or(raw))
        .map_err(|e| e.to_string())
}

/// Decimal digits of `type(uint256).max`.
const MAX_DECIMAL_DIGITS: usize = 78;

/// Whether `raw` is written as `<decimal>e<exponent>`.
fn is_scientific(raw: &str) -> bool {
    let body = raw.strip_prefix('-').unwrap_or(raw);
    body.split_once(['e', 'E']).is_some_and(|(mantissa, exponent)| {
        !mantissa.is_empty()
            && !exponent.is_empty()
            && mantissa.chars().all(|c| c.is_ascii_digit() || c == '.')
            && exponent.chars().all(|c| c.is_ascii_digit())
    })
}

/// `1000e18` -> `1000000000000000000000`, `1.5e3` -> `1500`. Returns `None`
/// for anything that is not an integral decimal in exponent form.
fn expand_exponent(raw: &str) -> Option<String> {
    if raw.starts_with("0x") || raw.starts_with("-0x") {
        return None;
    }
    let (sign, body) = match raw.strip_prefix('-') {
        Some(body) => ("-", body),
        None => ("", raw),
    };
    let (mantissa, exponent) = body.split_once(['e', 'E'])?;
    let exponent: usize = exponent.parse().ok()?;
    if exponent > MAX_DECIMAL_DIGITS {
        return None;
    }
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    if !int.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let frac = frac.trim_end_matches('0');
    if frac.len() > exponent {
        return None;
    }
    let digits = format!("{}{}{}", int, frac, "0".repeat(exponent - frac.len()));
    let digits = digits.trim_start_matches('0');
    Some(format!("{}{}", sign, if digits.is_empty() { "0" } else { digits }))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use alloy_core::{json_abi::JsonAbi, primitives::U256};

    use super::*;

    fn artifact(abi: &str) -> ContractArtifact {
        ContractArtifact {
            name: "Marketplace".to_string(),
            source_name: None,
            path: PathBuf::from("Marketplace.json"),
            abi: serde_json::from_str::<JsonAbi>(abi).unwrap(),
            bytecode: Bytes::from_static(&[0x60, 0x80]),
            storage_layout: None,
        }
    }

    fn factory(abi: &str) -> ContractFactory {
        ContractFactory {
            artifact: artifact(abi),
            deployer: Address::repeat_byte(0x01),
        }
    }

    const MARKETPLACE_ABI: &str = r#"[
        {"type":"constructor","inputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"initialize","inputs":[{"name":"auctionStep","type":"uint256"},{"name":"minimumPrice","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
    ]"#;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_encode_initializer_keeps_arguments() {
        let call = factory(MARKETPLACE_ABI)
            .encode_initializer(DEFAULT_INITIALIZER, &strings(&["1000e18", "0"]))
            .unwrap();

        assert_eq!(call.signature.as_deref(), Some("initialize(uint256,uint256)"));
        assert_eq!(call.args[0].raw, "1000e18");
        assert_eq!(call.args[0].name, "auctionStep");
        assert_eq!(
            call.args[0].value,
            DynSolValue::Uint(U256::from(1000u64) * U256::from(10u64).pow(U256::from(18u64)), 256)
        );
        assert_eq!(call.args[1].value, DynSolValue::Uint(U256::ZERO, 256));
        // selector + two words
        assert_eq!(call.calldata.len(), 4 + 64);
    }

    #[test]
    fn test_wrong_arity_is_rejected() {
        let err = factory(MARKETPLACE_ABI)
            .encode_initializer(DEFAULT_INITIALIZER, &strings(&["1"]))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InitArgsMismatch(msg) if msg.contains("initialize(uint256,uint256)")));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let err = factory(MARKETPLACE_ABI)
            .encode_initializer(DEFAULT_INITIALIZER, &strings(&["lots", "0"]))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InitArgsMismatch(_)));
    }

    #[test]
    fn test_overload_selected_by_type() {
        let abi = r#"[
            {"type":"function","name":"initialize","inputs":[{"name":"owner","type":"address"}],"outputs":[],"stateMutability":"nonpayable"},
            {"type":"function","name":"initialize","inputs":[{"name":"step","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
        ]"#;
        let call = factory(abi)
            .encode_initializer(DEFAULT_INITIALIZER, &strings(&["42"]))
            .unwrap();
        assert_eq!(call.signature.as_deref(), Some("initialize(uint256)"));
    }

    #[test]
    fn test_no_initializer() {
        let factory = factory("[]");
        let call = factory.encode_initializer(DEFAULT_INITIALIZER, &[]).unwrap();
        assert!(call.calldata.is_empty());
        assert!(call.signature.is_none());

        assert!(factory
            .encode_initializer(DEFAULT_INITIALIZER, &strings(&["1"]))
            .is_err());
    }

    #[test]
    fn test_constructor_with_arguments_is_rejected() {
        let abi = r#"[{"type":"constructor","inputs":[{"name":"x","type":"uint256"}],"stateMutability":"nonpayable"}]"#;
        assert!(factory(abi).ensure_argless_constructor().is_err());
        assert!(factory(MARKETPLACE_ABI).ensure_argless_constructor().is_ok());
    }

    #[test]
    fn test_ensure_uups() {
        let err = factory(MARKETPLACE_ABI).ensure_uups().unwrap_err();
        assert!(matches!(err, OrchestrationError::NotUpgradeable { .. }));

        let abi = r#"[{"type":"function","name":"upgradeToAndCall","inputs":[{"name":"newImplementation","type":"address"},{"name":"data","type":"bytes"}],"outputs":[],"stateMutability":"payable"}]"#;
        assert!(factory(abi).ensure_uups().is_ok());
    }

    #[test]
    fn test_expand_exponent() {
        assert_eq!(expand_exponent("1000e18").as_deref(), Some("1000000000000000000000"));
        assert_eq!(expand_exponent("1.5e3").as_deref(), Some("1500"));
        assert_eq!(expand_exponent("-2E2").as_deref(), Some("-200"));
        assert_eq!(expand_exponent("0e5").as_deref(), Some("0"));
        assert_eq!(expand_exponent("1.25e1"), None);
        assert_eq!(expand_exponent("0xe1"), None);
        assert_eq!(expand_exponent("42"), None);
        assert_eq!(expand_exponent("1e79"), None);
        assert_eq!(expand_exponent("1e18446744073709551615"), None);
    }

    #[test]
    fn test_huge_exponent_is_rejected() {
        let factory = factory(MARKETPLACE_ABI);
        for raw in ["1e18446744073709551615", "1e99999999999", "1e79"] {
            let err = factory
                .encode_initializer(DEFAULT_INITIALIZER, &strings(&[raw, "0"]))
                .unwrap_err();
            assert!(matches!(err, OrchestrationError::InitArgsMismatch(_)), "{raw}");
        }

        // Largest power of ten below 2^256.
        let call = factory
            .encode_initializer(DEFAULT_INITIALIZER, &strings(&["1e77", "0"]))
            .unwrap();
        assert_eq!(call.args[0].value, DynSolValue::Uint(U256::from(10u64).pow(U256::from(77u64)), 256));
    }

    #[test]
    fn test_deploy_code_appends_arguments() {
        let factory = factory(MARKETPLACE_ABI);
        assert_eq!(factory.deploy_code(&[0xaa]).as_ref(), &[0x60, 0x80, 0xaa]);
    }
}
