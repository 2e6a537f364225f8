//! A mocked chain holding the token contract, and the harness pointed at it.

use alloy_primitives::{Address, B256, Bytes, address, b256};
use scfuzz::{Harness, HarnessConfig};
use scfuzz_test_utils::{
    ArtifactProject, Deployment, MockNode, ReceiptFixture, Reply,
    fixtures::{TOKEN_ABI, TOKEN_RUNTIME, token_runtime, token_transfer_steps, trace_json},
};
use serde_json::{Value, json};

/// First account of the default mnemonic, creator of every deployment.
pub const DEPLOYER: Address = address!("0x627306090abaB3A6e1400e9345bC60c78a8BEf57");
/// Second account of the default mnemonic.
pub const ATTACKER: Address = address!("0xf17f52151EbEF6C7334FAD080c5704D77216b732");

pub const TX_HASH: B256 =
    b256!("0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060");

/// A contract deployed after the token, with its artifact.
pub struct Extra {
    pub name: &'static str,
    pub abi: &'static str,
    pub code: Bytes,
}

pub struct Fixture {
    pub node: MockNode,
    pub project: ArtifactProject,
    /// In creation order, the token first.
    pub deployments: Vec<Deployment>,
    pub harness: Harness,
}

impl Fixture {
    pub fn token(&self) -> Address {
        self.deployments[0].address
    }

    /// Answers every `eth_sendTransaction` with [`TX_HASH`], mined with `status`.
    pub fn mine(&self, to: Address, status: bool, logs: Vec<Value>) {
        self.node.respond("eth_sendTransaction", json!(TX_HASH));
        self.node.add_receipt(&ReceiptFixture {
            hash: TX_HASH,
            block: self.deployments.len() as u64 + 1,
            from: DEPLOYER,
            to: Some(to),
            status,
            logs,
            ..Default::default()
        });
    }

    /// Like [`Self::mine`], serving the token's `transfer` path as the trace.
    pub fn mine_transfer(&self) {
        self.mine(self.token(), true, Vec::new());
        self.node.add_trace(TX_HASH, trace_json(token_transfer_steps(), false));
    }

    /// Data of every submitted transaction, in order.
    pub fn sent_data(&self) -> Vec<String> {
        self.node
            .requests("eth_sendTransaction")
            .iter()
            .filter_map(|params| params[0]["data"].as_str().map(str::to_string))
            .collect()
    }
}

pub async fn setup() -> Fixture {
    setup_with(Vec::new(), |_| {}).await
}

/// The token plus `extras`, all created by [`DEPLOYER`]; `configure` adjusts the config.
pub async fn setup_with(
    extras: Vec<Extra>,
    configure: impl FnOnce(&mut HarnessConfig),
) -> Fixture {
    scfuzz_test_utils::init_tracing();
    let node = MockNode::start().await;
    let project = ArtifactProject::new().unwrap();
    project.add_artifact("Token", TOKEN_ABI, TOKEN_RUNTIME).unwrap();

    let mut deployments = vec![Deployment::new(0, DEPLOYER, token_runtime())];
    for (nonce, extra) in (1..).zip(extras) {
        project.add_artifact(extra.name, extra.abi, &extra.code.to_string()).unwrap();
        deployments.push(Deployment::new(nonce, DEPLOYER, extra.code));
    }
    node.install_chain(&[DEPLOYER, ATTACKER], &deployments);
    node.respond("evm_setAccountBalance", json!(true));

    let mut config = HarnessConfig::with_root(project.root());
    config.rpc.url = Some(node.url().to_string());
    config.rpc.receipt_timeout_secs = 1;
    config.rpc.poll_interval_ms = 10;
    config.build.enabled = false;
    config.build_dir = Some(project.build_dir());
    configure(&mut config);

    let harness = Harness::new(config).unwrap();
    Fixture { node, project, deployments, harness }
}

/// Reverts every `eth_sendTransaction` the way ganache does, naming the mined hash.
pub fn revert_with_hash(node: &MockNode) {
    node.respond_with("eth_sendTransaction", |_| Reply::Error {
        code: -32000,
        message: "VM Exception while processing transaction: revert".to_string(),
        data: Some(json!({ "hash": TX_HASH })),
    });
}
