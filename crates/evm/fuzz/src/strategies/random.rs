use super::{Observation, Strategy, fuzz_param};
use crate::TxIntent;
use alloy_dyn_abi::DynSolType;
use alloy_primitives::U256;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};

/// Uniformly random transactions over the known contracts.
#[derive(Clone, Debug)]
pub struct RandomStrategy {
    rng: StdRng,
    /// Chance of attaching ether to a payable call.
    pub value_probability: f64,
    /// Largest value attached, in wei.
    pub max_value: u128,
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RandomStrategy {
    /// A strategy seeded with `seed`, or from the OS when `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng, value_probability: 0.5, max_value: 10u128.pow(18) }
    }
}

impl Strategy for RandomStrategy {
    fn name(&self) -> &str {
        "random"
    }

    fn select_transaction(&mut self, observation: &Observation) -> Option<TxIntent> {
        let targets = observation
            .targets
            .iter()
            .filter(|t| t.callable().next().is_some())
            .collect::<Vec<_>>();
        let target = *targets.choose(&mut self.rng)?;
        let methods = target.callable().collect::<Vec<_>>();
        let method = *methods.choose(&mut self.rng)?;
        let sender = *observation.senders.choose(&mut self.rng)?;
        let addresses = observation.addresses();

        let mut intent = TxIntent::function(sender, target.address, method.signature.clone())
            .with_trace(true);
        for (param, name) in method.inputs().iter().zip(method.input_names()) {
            let ty = match DynSolType::parse(&param.selector_type()) {
                Ok(ty) => ty,
                Err(err) => {
                    warn!(method = %method.signature, %name, %err, "unsupported parameter type");
                    continue;
                }
            };
            intent = intent.arg(name, fuzz_param(&ty, &mut self.rng, &addresses));
        }
        if method.is_payable() && self.max_value > 0 && self.rng.random_bool(self.value_probability)
        {
            intent = intent.with_value(U256::from(self.rng.random_range(1..=self.max_value)));
        }
        trace!(%intent, "selected");
        Some(intent)
    }
}
