//! Typed call construction.
//!
//! Arguments are addressed by parameter name and checked against the declared types before
//! encoding; nothing is silently truncated or reordered.

use alloy_dyn_abi::{DynSolType, DynSolValue, JsonAbiExt};
use alloy_primitives::{Address, Bytes, I256, Selector, fixed_bytes};
use scfuzz_common::{Contract, HarnessError, Method, Result};
use std::collections::BTreeMap;

/// Selector of the probe sent when a call cannot be resolved; it matches no common function.
pub const PROBE_SELECTOR: Selector = fixed_bytes!("3d52b82c");

/// Probe selector used for contracts that define [`PROBE_SELECTOR`].
pub const FALLBACK_PROBE_SELECTOR: Selector = fixed_bytes!("ffffffff");

/// Calldata ready to be dispatched.
#[derive(Clone, Debug)]
pub struct EncodedCall {
    pub to: Address,
    /// Label of the target contract.
    pub contract: String,
    /// The resolved method, `None` for probes.
    pub method: Option<Method>,
    pub data: Bytes,
}

impl EncodedCall {
    pub fn is_probe(&self) -> bool {
        self.method.is_none()
    }

    /// Whether the call is executed with `eth_call`.
    pub fn is_constant(&self) -> bool {
        self.method.as_ref().is_some_and(Method::is_constant)
    }

    pub fn signature(&self) -> Option<&str> {
        self.method.as_ref().map(|m| m.signature.as_str())
    }

    pub fn method_name(&self) -> Option<&str> {
        self.method.as_ref().map(Method::name)
    }
}

/// Builds calldata from named arguments.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxBuilder;

impl TxBuilder {
    /// Resolves `name` on `contract` and encodes `args`.
    ///
    /// Every declared input must be present. Values must match their declared type and fit its
    /// size, otherwise [`HarnessError::InvalidArgument`] is returned.
    pub fn build(
        contract: &Contract,
        name: &str,
        args: &BTreeMap<String, DynSolValue>,
    ) -> Result<EncodedCall> {
        let label = contract.label();
        let method = contract.abi()?.resolve_method(&label, name, Some(args.len()))?;
        let values = ordered_args(method, args)?;
        let data = method.function.abi_encode_input(&values).map_err(|e| {
            HarnessError::InvalidArgument {
                method: method.signature.clone(),
                param: method.input_names().join(", "),
                reason: e.to_string(),
            }
        })?;
        trace!(contract = %label, method = %method.signature, len = data.len(), "encoded call");
        Ok(EncodedCall {
            to: contract.address,
            contract: label,
            method: Some(method.clone()),
            data: data.into(),
        })
    }

    /// Parses string arguments with the declared types of `method`.
    ///
    /// Inputs that are not given are left out for [`Self::build`] to report.
    pub fn coerce_args(
        method: &Method,
        args: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, DynSolValue>> {
        let names = method.input_names();
        args.iter()
            .map(|(name, raw)| {
                let invalid = |reason: String| HarnessError::InvalidArgument {
                    method: method.signature.clone(),
                    param: name.clone(),
                    reason,
                };
                let index = names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| invalid("no such parameter".to_string()))?;
                let ty = DynSolType::parse(&method.inputs()[index].selector_type())
                    .map_err(|e| invalid(e.to_string()))?;
                let value = ty.coerce_str(raw).map_err(|e| invalid(e.to_string()))?;
                Ok((name.clone(), value))
            })
            .collect()
    }

    /// The invalid selector probe, which exercises the fallback of `contract`.
    pub fn probe(contract: &Contract) -> EncodedCall {
        let defines_probe = contract
            .abi
            .as_ref()
            .is_some_and(|abi| abi.method_by_selector(PROBE_SELECTOR).is_some());
        let selector = if defines_probe { FALLBACK_PROBE_SELECTOR } else { PROBE_SELECTOR };
        EncodedCall {
            to: contract.address,
            contract: contract.label(),
            method: None,
            data: Bytes::copy_from_slice(selector.as_slice()),
        }
    }
}

/// Arguments in declaration order, each fitted to its declared type.
fn ordered_args(method: &Method, args: &BTreeMap<String, DynSolValue>) -> Result<Vec<DynSolValue>> {
    let names = method.input_names();
    let missing = names.iter().filter(|n| !args.contains_key(*n)).cloned().collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(HarnessError::MissingArgument { method: method.signature.clone(), missing });
    }
    if let Some(extra) = args.keys().find(|k| !names.contains(k)) {
        return Err(HarnessError::InvalidArgument {
            method: method.signature.clone(),
            param: extra.clone(),
            reason: "no such parameter".to_string(),
        });
    }

    method
        .inputs()
        .iter()
        .zip(&names)
        .map(|(param, name)| {
            let invalid = |reason: String| HarnessError::InvalidArgument {
                method: method.signature.clone(),
                param: name.clone(),
                reason,
            };
            let ty = DynSolType::parse(&param.selector_type()).map_err(|e| invalid(e.to_string()))?;
            fit(&ty, &args[name]).map_err(invalid)
        })
        .collect()
}

/// Checks that `value` is representable as `ty` and returns it with the declared size.
fn fit(ty: &DynSolType, value: &DynSolValue) -> Result<DynSolValue, String> {
    let mismatch = || {
        format!(
            "expected {}, got {}",
            ty.sol_type_name(),
            value.sol_type_name().unwrap_or_else(|| "a custom value".into())
        )
    };
    Ok(match (ty, value) {
        (DynSolType::Bool, DynSolValue::Bool(_))
        | (DynSolType::Address, DynSolValue::Address(_))
        | (DynSolType::Function, DynSolValue::Function(_))
        | (DynSolType::Bytes, DynSolValue::Bytes(_))
        | (DynSolType::String, DynSolValue::String(_)) => value.clone(),
        (DynSolType::Uint(bits), DynSolValue::Uint(v, _)) => {
            if v.bit_len() > *bits {
                return Err(format!("{v} does not fit in uint{bits}"));
            }
            DynSolValue::Uint(*v, *bits)
        }
        (DynSolType::Int(bits), DynSolValue::Int(v, _)) => {
            let max = I256::MAX.asr(256 - bits);
            let min = -max - I256::ONE;
            if *v > max || *v < min {
                return Err(format!("{v} does not fit in int{bits}"));
            }
            DynSolValue::Int(*v, *bits)
        }
        (DynSolType::FixedBytes(size), DynSolValue::FixedBytes(word, len)) => {
            if len > size {
                return Err(format!("{len} bytes do not fit in bytes{size}"));
            }
            DynSolValue::FixedBytes(*word, *size)
        }
        (DynSolType::Array(inner), DynSolValue::Array(values)) => DynSolValue::Array(
            values.iter().map(|v| fit(inner, v)).collect::<Result<_, _>>()?,
        ),
        (DynSolType::FixedArray(inner, len), DynSolValue::FixedArray(values)) => {
            if values.len() != *len {
                return Err(format!("expected {len} elements, got {}", values.len()));
            }
            DynSolValue::FixedArray(values.iter().map(|v| fit(inner, v)).collect::<Result<_, _>>()?)
        }
        (DynSolType::Tuple(types), DynSolValue::Tuple(values)) => {
            if values.len() != types.len() {
                return Err(format!("expected {} fields, got {}", types.len(), values.len()));
            }
            DynSolValue::Tuple(
                types.iter().zip(values).map(|(t, v)| fit(t, v)).collect::<Result<_, _>>()?,
            )
        }
        _ => return Err(mismatch()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256, address, hex};
    use scfuzz_common::AbiModel;
    use scfuzz_evm_core::disassemble;
    use std::sync::Arc;

    const ABI: &str = r#"[
        {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"value","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"setLevel","inputs":[{"name":"","type":"uint8"},{"name":"delta","type":"int8"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"tag","inputs":[{"name":"id","type":"bytes4"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"mint","inputs":[{"name":"to","type":"address"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"mint","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"totalSupply","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}
    ]"#;

    const TO: Address = address!("0x00000000000000000000000000000000000000bb");

    fn contract(abi: Option<&str>) -> Contract {
        Contract {
            name: abi.map(|_| "Token".to_string()),
            address: address!("0x00000000000000000000000000000000000000aa"),
            creator: Address::ZERO,
            creation_tx: B256::ZERO,
            block_number: 1,
            abi: abi.map(|abi| Arc::new(AbiModel::from_json(abi).unwrap())),
            deployed_code: Bytes::new(),
            code: Arc::new(disassemble(&[])),
        }
    }

    fn args(values: &[(&str, DynSolValue)]) -> BTreeMap<String, DynSolValue> {
        values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn encodes_named_args() {
        let call = TxBuilder::build(
            &contract(Some(ABI)),
            "transfer",
            &args(&[
                ("value", DynSolValue::Uint(U256::from(5), 256)),
                ("to", DynSolValue::Address(TO)),
            ]),
        )
        .unwrap();
        assert_eq!(call.signature(), Some("transfer(address,uint256)"));
        assert!(!call.is_constant());
        assert!(!call.is_probe());
        assert_eq!(&call.data[..4], hex!("a9059cbb"));
        assert_eq!(call.data.len(), 4 + 64);
        assert_eq!(call.data[4 + 31], 0xbb);
        assert_eq!(call.data[4 + 63], 5);
    }

    #[test]
    fn overload_by_arity() {
        let c = contract(Some(ABI));
        let one = TxBuilder::build(&c, "mint", &args(&[("to", DynSolValue::Address(TO))])).unwrap();
        assert_eq!(one.signature(), Some("mint(address)"));

        let err = TxBuilder::build(&c, "mint", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, HarnessError::AmbiguousOverload { .. }), "{err:?}");
    }

    #[test]
    fn lists_every_missing_argument() {
        let err = TxBuilder::build(&contract(Some(ABI)), "setLevel", &BTreeMap::new()).unwrap_err();
        match err {
            HarnessError::MissingArgument { method, missing } => {
                assert_eq!(method, "setLevel(uint8,int8)");
                assert_eq!(missing, ["_0", "delta"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_values_that_do_not_fit() {
        let c = contract(Some(ABI));
        let too_big = args(&[
            ("_0", DynSolValue::Uint(U256::from(256), 256)),
            ("delta", DynSolValue::Int(I256::ZERO, 256)),
        ]);
        let err = TxBuilder::build(&c, "setLevel", &too_big).unwrap_err();
        assert!(
            matches!(&err, HarnessError::InvalidArgument { param, .. } if param == "_0"),
            "{err:?}"
        );

        let too_small = args(&[
            ("_0", DynSolValue::Uint(U256::from(255), 256)),
            ("delta", DynSolValue::Int(I256::try_from(-129).unwrap(), 256)),
        ]);
        let err = TxBuilder::build(&c, "setLevel", &too_small).unwrap_err();
        assert!(
            matches!(&err, HarnessError::InvalidArgument { param, .. } if param == "delta"),
            "{err:?}"
        );

        let fits = args(&[
            ("_0", DynSolValue::Uint(U256::from(255), 256)),
            ("delta", DynSolValue::Int(I256::try_from(-128).unwrap(), 256)),
        ]);
        TxBuilder::build(&c, "setLevel", &fits).unwrap();

        let wrong_type = args(&[("id", DynSolValue::String("abcd".into()))]);
        let err = TxBuilder::build(&c, "tag", &wrong_type).unwrap_err();
        assert!(err.to_string().contains("expected bytes4"), "{err}");

        let extra = args(&[
            ("to", DynSolValue::Address(TO)),
            ("value", DynSolValue::Uint(U256::from(1), 256)),
            ("memo", DynSolValue::Bool(true)),
        ]);
        let err = TxBuilder::build(&c, "transfer(address,uint256)", &extra).unwrap_err();
        assert!(
            matches!(&err, HarnessError::InvalidArgument { param, .. } if param == "memo"),
            "{err:?}"
        );
    }

    #[test]
    fn coerces_strings() {
        let c = contract(Some(ABI));
        let method = c.abi().unwrap().resolve_method("Token", "transfer", None).unwrap();
        let raw = [("to", TO.to_string()), ("value", "1000".to_string())]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let typed = TxBuilder::coerce_args(method, &raw).unwrap();
        assert_eq!(typed["to"], DynSolValue::Address(TO));
        assert_eq!(typed["value"], DynSolValue::Uint(U256::from(1000), 256));

        let bad = [("value".to_string(), "lots".to_string())].into_iter().collect();
        assert!(matches!(
            TxBuilder::coerce_args(method, &bad),
            Err(HarnessError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn probes() {
        let probe = TxBuilder::probe(&contract(Some(ABI)));
        assert!(probe.is_probe());
        assert_eq!(probe.data.as_ref(), PROBE_SELECTOR.as_slice());
        assert_eq!(probe.contract, "Token");

        let unknown = contract(None);
        assert_eq!(TxBuilder::probe(&unknown).contract, format!("unknown@{}", unknown.address));
        assert!(matches!(
            TxBuilder::build(&unknown, "transfer", &BTreeMap::new()),
            Err(HarnessError::UnknownContract { .. })
        ));

        let mut abi = AbiModel::from_json(ABI).unwrap();
        abi.methods[0].selector = PROBE_SELECTOR;
        let mut clashing = contract(Some(ABI));
        clashing.abi = Some(Arc::new(abi));
        let probe = TxBuilder::probe(&clashing);
        assert_eq!(probe.data.as_ref(), FALLBACK_PROBE_SELECTOR.as_slice());
    }

    #[test]
    fn constant_methods() {
        let call =
            TxBuilder::build(&contract(Some(ABI)), "totalSupply", &BTreeMap::new()).unwrap();
        assert!(call.is_constant());
        assert_eq!(call.method_name(), Some("totalSupply"));
    }
}
