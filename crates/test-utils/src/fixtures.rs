//! Chain, artifact and trace fixtures.

use alloy_primitives::{Address, B256, Bytes, U256, hex, keccak256};
use serde_json::{Value, json};
use std::{fs, path::PathBuf};
use tempfile::TempDir;

/// ABI of [`TOKEN_RUNTIME`].
pub const TOKEN_ABI: &str = r#"[
    {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},{"name":"value","type":"uint256"}],"outputs":[{"name":"","type":"bool"}],"stateMutability":"nonpayable"},
    {"type":"function","name":"balanceOf","inputs":[{"name":"owner","type":"address"}],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
    {"type":"event","name":"Transfer","inputs":[{"name":"from","type":"address","indexed":true},{"name":"to","type":"address","indexed":true},{"name":"value","type":"uint256","indexed":false}],"anonymous":false}
]"#;

/// A two method dispatcher: `transfer` stores to slot 0, `balanceOf` loads it and jumps to a
/// shared exit.
pub const TOKEN_RUNTIME: &str =
    "0x60003560e01c8063a9059cbb14601e57806370a0823114602557600080fd5b6001600055005b600054602d56fe5b00";

/// Program counters and opcodes executed by a `transfer` call of [`TOKEN_RUNTIME`].
pub const TOKEN_TRANSFER_PATH: &[(u64, &str)] = &[
    (0, "PUSH1"),
    (2, "CALLDATALOAD"),
    (3, "PUSH1"),
    (5, "SHR"),
    (6, "DUP1"),
    (7, "PUSH4"),
    (12, "EQ"),
    (13, "PUSH1"),
    (15, "JUMPI"),
    (30, "JUMPDEST"),
    (31, "PUSH1"),
    (33, "PUSH1"),
    (35, "SSTORE"),
    (36, "STOP"),
];

pub fn token_runtime() -> Bytes {
    Bytes::from(hex::decode(TOKEN_RUNTIME).expect("valid hex"))
}

/// A contract creation served by [`crate::MockNode::install_chain`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub creator: Address,
    pub code: Bytes,
    pub tx_hash: B256,
}

impl Deployment {
    /// The `nonce`th creation of `creator`, at its `CREATE` address.
    pub fn new(nonce: u64, creator: Address, code: impl Into<Bytes>) -> Self {
        Self {
            address: creator.create(nonce),
            creator,
            code: code.into(),
            tx_hash: keccak256(format!("deployment {creator} {nonce}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiptFixture {
    pub hash: B256,
    pub block: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub status: bool,
    pub gas_used: u64,
    pub logs: Vec<Value>,
}

impl Default for ReceiptFixture {
    fn default() -> Self {
        Self {
            hash: B256::ZERO,
            block: 1,
            from: Address::ZERO,
            to: None,
            contract_address: None,
            status: true,
            gas_used: 21_000,
            logs: Vec::new(),
        }
    }
}

impl ReceiptFixture {
    pub fn to_json(&self) -> Value {
        json!({
            "transactionHash": self.hash,
            "transactionIndex": "0x0",
            "blockNumber": format!("{:#x}", self.block),
            "blockHash": keccak256(self.block.to_be_bytes()),
            "from": self.from,
            "to": self.to,
            "contractAddress": self.contract_address,
            "gasUsed": format!("{:#x}", self.gas_used),
            "cumulativeGasUsed": format!("{:#x}", self.gas_used),
            "status": if self.status { "0x1" } else { "0x0" },
            "logs": self.logs,
        })
    }
}

/// A log entry as returned in receipts and by `eth_getLogs`.
pub fn log_json(
    address: Address,
    topics: &[B256],
    data: &[u8],
    tx_hash: B256,
    block: u64,
) -> Value {
    json!({
        "address": address,
        "topics": topics,
        "data": Bytes::copy_from_slice(data),
        "blockNumber": format!("{block:#x}"),
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "logIndex": "0x0",
        "removed": false,
    })
}

/// One struct-log step, stack bottom to top.
pub fn step_json(pc: u64, op: &str, depth: u64, stack: &[U256]) -> Value {
    json!({
        "pc": pc,
        "op": op,
        "gas": 100_000,
        "gasCost": 3,
        "depth": depth,
        "stack": stack.iter().map(|w| format!("{w:#x}")).collect::<Vec<_>>(),
        "memory": [],
        "storage": {},
    })
}

/// A `debug_traceTransaction` result.
pub fn trace_json(steps: Vec<Value>, failed: bool) -> Value {
    json!({ "gas": 30_000, "failed": failed, "returnValue": "", "structLogs": steps })
}

/// The steps of a `transfer` call into [`TOKEN_RUNTIME`] at depth 1.
pub fn token_transfer_steps() -> Vec<Value> {
    TOKEN_TRANSFER_PATH.iter().map(|&(pc, op)| step_json(pc, op, 1, &[])).collect()
}

/// A temporary truffle project with a `build/contracts` directory.
#[derive(Debug)]
pub struct ArtifactProject {
    dir: TempDir,
}

impl ArtifactProject {
    pub fn new() -> eyre::Result<Self> {
        let dir = tempfile::Builder::new().prefix("scfuzz-project").tempdir()?;
        fs::create_dir_all(dir.path().join("build").join("contracts"))?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn build_dir(&self) -> PathBuf {
        self.dir.path().join("build").join("contracts")
    }

    /// Writes `<name>.json` with the given ABI JSON and deployed bytecode.
    pub fn add_artifact(
        &self,
        name: &str,
        abi: &str,
        deployed_bytecode: &str,
    ) -> eyre::Result<PathBuf> {
        let abi: Value = serde_json::from_str(abi)?;
        let artifact = json!({
            "contractName": name,
            "abi": abi,
            "bytecode": "0x",
            "deployedBytecode": deployed_bytecode,
        });
        self.add_file(&format!("{name}.json"), &serde_json::to_string_pretty(&artifact)?)
    }

    /// Writes an arbitrary file into the build directory.
    pub fn add_file(&self, file_name: &str, contents: &str) -> eyre::Result<PathBuf> {
        let path = self.build_dir().join(file_name);
        fs::write(&path, contents)?;
        Ok(path)
    }
}
