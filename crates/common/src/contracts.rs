//! Contracts deployed on the node, joined with their compiled artifacts.

use crate::{
    abi::AbiModel,
    artifacts::ArtifactStore,
    errors::{HarnessError, Result},
    provider::RpcClient,
};
use alloy_primitives::{Address, B256, Bytes, map::HashMap};
use scfuzz_evm_core::{Disassembly, DisassemblyCache};
use std::{fmt, sync::Arc};

/// A deployed contract.
#[derive(Clone, Debug)]
pub struct Contract {
    /// Artifact name, `None` when no artifact matches the deployed code.
    pub name: Option<String>,
    pub address: Address,
    pub creator: Address,
    pub creation_tx: B256,
    pub block_number: u64,
    pub abi: Option<Arc<AbiModel>>,
    pub deployed_code: Bytes,
    pub code: Arc<Disassembly>,
}

impl Contract {
    /// Whether the contract matched an artifact and can receive typed calls.
    pub fn is_known(&self) -> bool {
        self.name.is_some()
    }

    /// The artifact name, or `unknown@<address>`.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("unknown@{}", self.address),
        }
    }

    /// The ABI, or [`HarnessError::UnknownContract`].
    pub fn abi(&self) -> Result<&AbiModel> {
        self.abi.as_deref().ok_or(HarnessError::UnknownContract { contract: self.address })
    }
}

impl PartialEq for Contract {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.address == other.address
            && self.creator == other.creator
            && self.creation_tx == other.creation_tx
            && self.block_number == other.block_number
            && self.deployed_code == other.deployed_code
    }
}

impl Eq for Contract {}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.label(), self.address)
    }
}

/// Every contract created on the chain, in creation order.
#[derive(Clone, Debug, Default)]
pub struct ContractDirectory {
    contracts: Vec<Contract>,
}

impl ContractDirectory {
    /// Scans blocks `0..=latest` for contract creations and matches each deployment against the
    /// artifact store by exact deployed bytecode.
    pub async fn discover(
        client: &RpcClient,
        store: &ArtifactStore,
        cache: &mut DisassemblyCache,
    ) -> Result<Self> {
        let latest = client.block_number().await?;
        let mut models: HashMap<String, Arc<AbiModel>> = HashMap::default();
        let mut contracts = Vec::new();

        for number in 0..=latest {
            for hash in client.block_transactions(number).await? {
                let Some(receipt) = client.receipt(hash).await? else {
                    warn!(%hash, number, "missing receipt for mined transaction");
                    continue;
                };
                let Some(address) = receipt.contract_address else { continue };

                let deployed_code = client.code_at(address).await?;
                let artifact = store.find_by_deployed_code(&deployed_code)?;
                let abi = artifact.map(|a| {
                    models
                        .entry(a.name.clone())
                        .or_insert_with(|| Arc::new(AbiModel::parse(&a.abi)))
                        .clone()
                });
                let contract = Contract {
                    name: artifact.map(|a| a.name.clone()),
                    address,
                    creator: receipt.from,
                    creation_tx: hash,
                    block_number: number,
                    abi,
                    code: cache.get_or_disassemble(&deployed_code),
                    deployed_code,
                };
                debug!(contract = %contract, creator = %contract.creator, "discovered contract");
                contracts.push(contract);
            }
        }

        let known = contracts.iter().filter(|c| c.is_known()).count();
        info!(total = contracts.len(), known, latest, "contract discovery finished");
        Ok(Self { contracts })
    }

    pub fn from_contracts(contracts: Vec<Contract>) -> Self {
        Self { contracts }
    }

    pub fn by_address(&self, address: Address) -> Option<&Contract> {
        self.contracts.iter().find(|c| c.address == address)
    }

    /// The most recent deployment of the artifact `name`.
    pub fn by_name(&self, name: &str) -> Option<&Contract> {
        self.contracts.iter().rev().find(|c| c.name.as_deref() == Some(name))
    }

    /// Contracts that matched an artifact.
    pub fn known(&self) -> impl Iterator<Item = &Contract> {
        self.contracts.iter().filter(|c| c.is_known())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Contract> {
        self.contracts.iter()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

impl<'a> IntoIterator for &'a ContractDirectory {
    type Item = &'a Contract;
    type IntoIter = std::slice::Iter<'a, Contract>;

    fn into_iter(self) -> Self::IntoIter {
        self.contracts.iter()
    }
}
