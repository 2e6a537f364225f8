//! Per-contract ABI model and name resolution.

use crate::errors::{HarnessError, Result};
use alloy_dyn_abi::{DecodedEvent, DynSolValue, EventExt, FunctionExt};
use alloy_json_abi::{Event, Function, JsonAbi, Param, StateMutability};
use alloy_primitives::{B256, LogData, Selector};

/// A callable function of a contract.
#[derive(Clone, Debug)]
pub struct Method {
    /// Canonical signature, e.g. `transfer(address,uint256)`.
    pub signature: String,
    pub selector: Selector,
    pub function: Function,
}

impl Method {
    fn new(function: &Function) -> Self {
        Self {
            signature: function.signature(),
            selector: function.selector(),
            function: function.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn inputs(&self) -> &[Param] {
        &self.function.inputs
    }

    pub fn outputs(&self) -> &[Param] {
        &self.function.outputs
    }

    pub fn mutability(&self) -> StateMutability {
        self.function.state_mutability
    }

    /// `view` and `pure` functions are executed with `eth_call`.
    pub fn is_constant(&self) -> bool {
        matches!(self.mutability(), StateMutability::View | StateMutability::Pure)
    }

    pub fn is_payable(&self) -> bool {
        self.mutability() == StateMutability::Payable
    }

    /// Input names in declaration order, unnamed inputs are addressed as `_0`, `_1`, ...
    pub fn input_names(&self) -> Vec<String> {
        param_names(self.inputs())
    }

    /// Decodes the return data of a call.
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<DynSolValue>> {
        self.function.abi_decode_output(data).map_err(|e| HarnessError::Decode {
            what: format!("output of `{}`", self.signature),
            reason: e.to_string(),
        })
    }
}

/// An event of a contract.
#[derive(Clone, Debug)]
pub struct EventEntry {
    pub signature: String,
    /// `keccak256(signature)`, the first topic of non-anonymous logs.
    pub topic: B256,
    pub event: Event,
}

impl EventEntry {
    fn new(event: &Event) -> Self {
        Self { signature: event.signature(), topic: event.selector(), event: event.clone() }
    }

    pub fn name(&self) -> &str {
        &self.event.name
    }

    pub fn decode(&self, log: &LogData) -> Result<DecodedEvent> {
        self.event.decode_log(log).map_err(|e| HarnessError::Decode {
            what: format!("log of `{}`", self.signature),
            reason: e.to_string(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ConstructorEntry {
    pub inputs: Vec<Param>,
    pub payable: bool,
}

/// Typed model of a contract ABI, computed once per contract.
#[derive(Clone, Debug, Default)]
pub struct AbiModel {
    pub constructor: Option<ConstructorEntry>,
    pub methods: Vec<Method>,
    pub events: Vec<EventEntry>,
    pub has_fallback: bool,
    pub has_receive: bool,
    abi: JsonAbi,
}

impl AbiModel {
    pub fn parse(abi: &JsonAbi) -> Self {
        let constructor = abi.constructor.as_ref().map(|c| ConstructorEntry {
            inputs: c.inputs.clone(),
            payable: c.state_mutability == StateMutability::Payable,
        });
        Self {
            constructor,
            methods: abi.functions().map(Method::new).collect(),
            events: abi.events().map(EventEntry::new).collect(),
            has_fallback: abi.fallback.is_some(),
            has_receive: abi.receive.is_some(),
            abi: abi.clone(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_str(json)
            .map_err(|e| HarnessError::Decode { what: "ABI".to_string(), reason: e.to_string() })?;
        Ok(Self::parse(&abi))
    }

    pub fn json_abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Whether any overload of `name` is payable.
    pub fn payable(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name() == name && m.is_payable())
    }

    pub fn method_by_selector(&self, selector: Selector) -> Option<&Method> {
        self.methods.iter().find(|m| m.selector == selector)
    }

    /// Resolves a function by name or full signature.
    ///
    /// A bare name must identify exactly one function. Overloads are only disambiguated by
    /// `arity` when exactly one overload takes that many arguments.
    pub fn resolve_method(
        &self,
        contract: &str,
        name: &str,
        arity: Option<usize>,
    ) -> Result<&Method> {
        let candidates = if name.contains('(') {
            self.methods.iter().filter(|m| m.signature == name).collect::<Vec<_>>()
        } else {
            self.methods.iter().filter(|m| m.name() == name).collect()
        };
        let not_found = || HarnessError::MethodNotFound {
            contract: contract.to_string(),
            name: name.to_string(),
        };
        pick(candidates, arity, |m| m.inputs().len(), |m| m.signature.clone(), name)?
            .ok_or_else(not_found)
    }

    /// Resolves an event, following the same rules as [`Self::resolve_method`].
    pub fn resolve_event(
        &self,
        contract: &str,
        name: &str,
        arity: Option<usize>,
    ) -> Result<&EventEntry> {
        let candidates = if name.contains('(') {
            self.events.iter().filter(|e| e.signature == name).collect::<Vec<_>>()
        } else {
            self.events.iter().filter(|e| e.name() == name).collect()
        };
        let not_found = || HarnessError::EventNotFound {
            contract: contract.to_string(),
            name: name.to_string(),
        };
        pick(candidates, arity, |e| e.event.inputs.len(), |e| e.signature.clone(), name)?
            .ok_or_else(not_found)
    }

    /// Functions that change state, the ones worth fuzzing.
    pub fn mutating_methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter().filter(|m| !m.is_constant())
    }
}

fn pick<'a, T>(
    candidates: Vec<&'a T>,
    arity: Option<usize>,
    len: impl Fn(&T) -> usize,
    sig: impl Fn(&T) -> String,
    name: &str,
) -> Result<Option<&'a T>> {
    match candidates.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some(*one)),
        many => {
            let by_arity = arity
                .map(|n| many.iter().filter(|c| len(**c) == n).collect::<Vec<_>>())
                .unwrap_or_default();
            match by_arity.as_slice() {
                [one] => Ok(Some(**one)),
                _ => Err(HarnessError::AmbiguousOverload {
                    name: name.to_string(),
                    candidates: many.iter().map(|c| sig(*c)).collect(),
                }),
            }
        }
    }
}

/// Names of `params`, substituting `_<index>` for unnamed ones.
pub fn param_names(params: &[Param]) -> Vec<String> {
    params
        .iter()
        .enumerate()
        .map(|(i, p)| if p.name.is_empty() { format!("_{i}") } else { p.name.clone() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{b256, hex};

    const TOKEN_ABI: &str = r#"[
        {"type":"constructor","inputs":[{"name":"supply","type":"uint256"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"value","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"},
        {"type":"function","name":"balanceOf","inputs":[{"name":"owner","type":"address"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
        {"type":"function","name":"deposit","inputs":[],"outputs":[],"stateMutability":"payable"},
        {"type":"function","name":"mint","inputs":[{"name":"to","type":"address"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"mint","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"burn","inputs":[{"name":"a","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"function","name":"burn","inputs":[{"name":"b","type":"bytes32"}],"outputs":[],"stateMutability":"nonpayable"},
        {"type":"event","name":"Transfer","inputs":[{"name":"from","type":"address","indexed":true},{"name":"to","type":"address","indexed":true},{"name":"value","type":"uint256","indexed":false}],"anonymous":false}
    ]"#;

    fn model() -> AbiModel {
        AbiModel::from_json(TOKEN_ABI).unwrap()
    }

    #[test]
    fn selectors_and_topics() {
        let model = model();
        let transfer = model.resolve_method("Token", "transfer", None).unwrap();
        assert_eq!(transfer.signature, "transfer(address,uint256)");
        assert_eq!(transfer.selector, Selector::from(hex!("a9059cbb")));
        assert!(!transfer.is_constant());

        let transfer_event = model.resolve_event("Token", "Transfer", None).unwrap();
        assert_eq!(
            transfer_event.topic,
            b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        );
        assert!(model.constructor.is_some());
        assert!(model.payable("deposit"));
        assert!(!model.payable("transfer"));
        assert!(model.resolve_method("Token", "balanceOf", None).unwrap().is_constant());
    }

    #[test]
    fn resolution_rules() {
        let model = model();
        let err = model.resolve_method("Token", "doesNotExist", Some(0)).unwrap_err();
        assert!(matches!(err, HarnessError::MethodNotFound { .. }));

        // arity disambiguates
        let mint = model.resolve_method("Token", "mint", Some(2)).unwrap();
        assert_eq!(mint.signature, "mint(address,uint256)");

        // same arity stays ambiguous
        let err = model.resolve_method("Token", "burn", Some(1)).unwrap_err();
        match err {
            HarnessError::AmbiguousOverload { candidates, .. } => assert_eq!(candidates.len(), 2),
            err => panic!("unexpected {err}"),
        }
        let err = model.resolve_method("Token", "mint", None).unwrap_err();
        assert!(matches!(err, HarnessError::AmbiguousOverload { .. }));

        // full signature always wins
        let burn = model.resolve_method("Token", "burn(bytes32)", None).unwrap();
        assert_eq!(burn.input_names(), ["b"]);

        let err = model.resolve_event("Token", "Approval", None).unwrap_err();
        assert!(matches!(err, HarnessError::EventNotFound { .. }));
    }

    #[test]
    fn unnamed_params() {
        let params = [Param::parse("uint256").unwrap(), Param::parse("address to").unwrap()];
        assert_eq!(param_names(&params), ["_0", "to"]);
    }

    #[test]
    fn mutating() {
        let names = model().mutating_methods().map(|m| m.name().to_string()).collect::<Vec<_>>();
        assert!(!names.contains(&"balanceOf".to_string()));
        assert!(names.contains(&"transfer".to_string()));
    }
}
