use crate::utils::{ATTACKER, DEPLOYER, Extra, TX_HASH, setup, setup_with};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, Bytes, U256};
use scfuzz::{BugKind, ErrorCategory, HarnessError, TxIntent};
use scfuzz_common::{ArtifactStore, ContractDirectory, RpcClient};
use scfuzz_evm_core::DisassemblyCache;
use scfuzz_test_utils::fixtures::{TOKEN_ABI, TOKEN_RUNTIME, step_json, trace_json};
use serde_json::json;

const OVERLOADED_ABI: &str = r#"[
    {"type":"function","name":"mint","inputs":[{"name":"to","type":"address"}],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"function","name":"mint","inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
]"#;

fn transfer(token: Address, sender: Address) -> TxIntent {
    TxIntent::function(sender, token, "transfer")
        .arg("to", DynSolValue::Address(ATTACKER))
        .arg("value", DynSolValue::Uint(U256::from(7), 256))
}

#[tokio::test(flavor = "multi_thread")]
async fn discovers_once() {
    let mut fx = setup().await;
    let token = fx.token();

    let directory = fx.harness.discover().await.unwrap();
    assert_eq!(directory.len(), 1);
    assert_eq!(directory.by_address(token).unwrap().label(), "Token");
    fx.harness.discover().await.unwrap();

    assert_eq!(fx.node.requests("eth_blockNumber").len(), 1);
    assert!(fx.harness.coverage().is_registered(token));
}

#[tokio::test(flavor = "multi_thread")]
async fn rediscovery_finds_the_same_contracts() {
    let extra = Extra { name: "Vault", abi: "[]", code: Bytes::from_static(&[0x60, 0x01]) };
    let fx = setup_with(vec![extra], |_| {}).await;
    let client = RpcClient::new(fx.node.url());
    let store = ArtifactStore::load(fx.project.build_dir()).unwrap();
    let mut cache = DisassemblyCache::default();

    let listing = |directory: &ContractDirectory| {
        directory.iter().map(|c| (c.address, c.label(), c.creator)).collect::<Vec<_>>()
    };
    let first = ContractDirectory::discover(&client, &store, &mut cache).await.unwrap();
    let second = ContractDirectory::discover(&client, &store, &mut cache).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(listing(&first), listing(&second));
    assert_eq!(
        listing(&first).iter().map(|(address, ..)| *address).collect::<Vec<_>>(),
        fx.deployments.iter().map(|d| d.address).collect::<Vec<_>>()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn identical_bytecode_artifacts_are_ambiguous() {
    let mut fx = setup().await;
    fx.project.add_artifact("TokenCopy", TOKEN_ABI, TOKEN_RUNTIME).unwrap();

    let err = fx.harness.discover().await.unwrap_err();
    let HarnessError::DuplicateArtifact { names, .. } = &err else { panic!("{err:?}") };
    assert_eq!(names, &["Token".to_string(), "TokenCopy".to_string()]);
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(err.is_fatal());
}

#[tokio::test(flavor = "multi_thread")]
async fn derives_the_node_accounts() {
    let mut fx = setup().await;
    let accounts = fx.harness.accounts().await.unwrap();
    assert_eq!(accounts.addresses(), vec![DEPLOYER, ATTACKER]);
    assert_eq!(accounts.deployer().unwrap().address, DEPLOYER);
}

#[tokio::test(flavor = "multi_thread")]
async fn view_calls_are_not_transactions() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.node.respond("eth_call", json!(format!("0x{:064x}", 42)));

    let intent = TxIntent::function(DEPLOYER, token, "balanceOf")
        .arg("owner", DynSolValue::Address(ATTACKER))
        .with_trace(true);
    let result = fx.harness.call(&intent).await.unwrap();

    assert!(result.success);
    assert_eq!(result.tx_hash, None);
    assert!(result.trace.is_none());
    assert_eq!(result.values().unwrap(), &[DynSolValue::Uint(U256::from(42), 256)]);
    assert!(fx.node.requests("eth_sendTransaction").is_empty());
    assert!(fx.node.requests("debug_traceTransaction").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn transfer_is_traced_into_coverage() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine_transfer();

    let (result, feedback) = fx.harness.step(&transfer(token, DEPLOYER)).await.unwrap();
    assert!(result.success);
    assert_eq!(result.tx_hash, Some(TX_HASH));
    assert_eq!(result.trace.as_ref().map(Vec::len), Some(14));
    assert!(result.receipt().unwrap().status);
    assert_eq!(feedback.new_instructions, 14);
    assert!(feedback.new_blocks > 0);
    assert!(feedback.bugs.is_empty());

    let (_, feedback) = fx.harness.step(&transfer(token, DEPLOYER)).await.unwrap();
    assert_eq!(feedback.new_instructions, 0);
    assert_eq!(feedback.new_blocks, 0);
    assert_eq!(fx.harness.steps(), 2);

    let coverage = fx.harness.coverage().get(token).unwrap();
    assert_eq!(coverage.hits(35), 2);
    assert_eq!(coverage.method_coverage()["transfer"].calls, 2);

    let sent = fx.node.requests("eth_sendTransaction");
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0][0]["gas"], "0x6691b7");
    assert!(fx.sent_data()[0].starts_with("0xa9059cbb"));
}

#[tokio::test(flavor = "multi_thread")]
async fn untraced_calls_leave_coverage_alone() {
    let mut fx = setup_with(Vec::new(), |config| config.trace.enabled = false).await;
    let token = fx.token();
    fx.mine_transfer();

    let (result, feedback) = fx.harness.step(&transfer(token, DEPLOYER)).await.unwrap();
    assert!(result.success);
    assert!(result.trace.is_none());
    assert_eq!(feedback.new_instructions, 0);
    assert!(fx.node.requests("debug_traceTransaction").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_methods_become_probes() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine(token, false, Vec::new());

    let intent = TxIntent::function(ATTACKER, token, "withdraw");
    let result = fx.harness.call(&intent).await.unwrap();
    assert!(result.probe);
    assert!(!result.success);
    assert_eq!(fx.sent_data(), vec!["0x3d52b82c".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_methods_are_always_traced() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine(token, true, Vec::new());
    let steps = vec![
        step_json(0, "PUSH20", 1, &[]),
        step_json(21, "SELFDESTRUCT", 1, &[U256::from_be_slice(DEPLOYER.as_slice())]),
    ];
    fx.node.add_trace(TX_HASH, trace_json(steps, false));
    fx.harness.accounts().await.unwrap();

    let intent = TxIntent::function(DEPLOYER, token, "withdraw").with_trace(false);
    let result = fx.harness.call(&intent).await.unwrap();
    assert!(result.probe);
    assert_eq!(result.trace.as_ref().map(Vec::len), Some(2));
    assert_eq!(fx.node.requests("debug_traceTransaction").len(), 1);

    let record = fx.harness.oracle().record(BugKind::Suicidal, "Token", "<fallback>").unwrap();
    assert_eq!(record.first_tx, Some(TX_HASH));
    assert_eq!(fx.harness.coverage().get(token).unwrap().hits(0), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn contracts_without_abi_only_get_probes() {
    let extra = Extra { name: "Unused", abi: "[]", code: Bytes::from_static(&[0x60, 0x01]) };
    let mut fx = setup_with(vec![extra], |_| {}).await;
    // drop the artifact so the second deployment is anonymous
    std::fs::remove_file(fx.project.build_dir().join("Unused.json")).unwrap();
    let anonymous = fx.deployments[1].address;
    fx.mine(anonymous, true, Vec::new());

    let directory = fx.harness.discover().await.unwrap();
    assert!(!directory.by_address(anonymous).unwrap().is_known());

    let result = fx.harness.call(&transfer(anonymous, DEPLOYER)).await.unwrap();
    assert!(result.probe);
    assert_eq!(fx.sent_data(), vec!["0x3d52b82c".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn resolution_errors_send_nothing() {
    let mut fx = setup().await;
    let token = fx.token();

    let missing = TxIntent::function(DEPLOYER, token, "transfer")
        .arg("to", DynSolValue::Address(ATTACKER));
    let err = fx.harness.call(&missing).await.unwrap_err();
    let HarnessError::MissingArgument { missing, .. } = &err else { panic!("{err:?}") };
    assert_eq!(missing, &["value".to_string()]);

    let invalid = transfer(token, DEPLOYER).arg("value", DynSolValue::Bool(true));
    let err = fx.harness.call(&invalid).await.unwrap_err();
    assert!(matches!(&err, HarnessError::InvalidArgument { param, .. } if param == "value"));
    assert_eq!(err.category(), ErrorCategory::Resolution);
    assert!(!err.is_fatal());

    let stranger = Address::with_last_byte(0x99);
    let err = fx.harness.call(&transfer(stranger, DEPLOYER)).await.unwrap_err();
    assert!(matches!(err, HarnessError::UnknownContract { contract } if contract == stranger));

    assert!(fx.node.requests("eth_sendTransaction").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn overloads_resolve_by_arity() {
    let extra = Extra {
        name: "Minter",
        abi: OVERLOADED_ABI,
        code: Bytes::from_static(&[0x60, 0x00, 0x00]),
    };
    let mut fx = setup_with(vec![extra], |_| {}).await;
    let minter = fx.deployments[1].address;
    fx.mine(minter, true, Vec::new());

    let err = fx.harness.call(&TxIntent::function(DEPLOYER, minter, "mint")).await.unwrap_err();
    let HarnessError::AmbiguousOverload { candidates, .. } = &err else { panic!("{err:?}") };
    assert_eq!(candidates.len(), 2);

    let intent = TxIntent::function(DEPLOYER, minter, "mint")
        .arg("to", DynSolValue::Address(ATTACKER))
        .arg("amount", DynSolValue::Uint(U256::from(1), 256));
    let result = fx.harness.call(&intent).await.unwrap();
    assert!(result.success);
    assert!(!result.probe);
    assert_eq!(fx.sent_data().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn reports_bugs_once() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine(token, true, Vec::new());
    let steps = vec![
        step_json(0, "PUSH20", 1, &[]),
        step_json(21, "SELFDESTRUCT", 1, &[U256::from_be_slice(DEPLOYER.as_slice())]),
    ];
    fx.node.add_trace(TX_HASH, trace_json(steps, false));
    fx.harness.accounts().await.unwrap();

    let (_, feedback) = fx.harness.step(&transfer(token, DEPLOYER)).await.unwrap();
    assert!(feedback.bugs.contains(&BugKind::Suicidal));

    let observation = fx.harness.observation();
    let record =
        observation.new_bugs.iter().find(|b| b.kind == BugKind::Suicidal).unwrap().clone();
    assert_eq!(record.contract, "Token");
    assert_eq!(record.method, "transfer");
    assert_eq!(record.first_tx, Some(TX_HASH));
    assert_eq!(observation.last.as_ref().unwrap().bugs, feedback.bugs);

    fx.harness.step(&transfer(token, DEPLOYER)).await.unwrap();
    assert!(fx.harness.observation().new_bugs.is_empty());
    let record = fx.harness.oracle().record(BugKind::Suicidal, "Token", "transfer").unwrap();
    assert_eq!(record.occurrences, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn reverted_steps_report_no_bugs() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine(token, false, Vec::new());
    let steps = vec![step_json(0, "SELFDESTRUCT", 1, &[U256::ZERO])];
    fx.node.add_trace(TX_HASH, trace_json(steps, true));

    let (result, feedback) = fx.harness.step(&transfer(token, DEPLOYER)).await.unwrap();
    assert!(!result.success);
    assert!(feedback.bugs.is_empty());
    assert!(fx.harness.oracle().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn sets_balances() {
    let mut fx = setup().await;
    fx.harness.set_balance(ATTACKER, U256::from(5)).await.unwrap();

    let params = fx.node.requests("evm_setAccountBalance");
    assert_eq!(params.len(), 1);
    let address: Address = serde_json::from_value(params[0][0].clone()).unwrap();
    assert_eq!(address, ATTACKER);
    assert_eq!(params[0][1], "0x5");
}

#[tokio::test(flavor = "multi_thread")]
async fn set_balance_needs_the_node() {
    let mut fx = setup_with(Vec::new(), |config| {
        config.rpc.url = Some("http://127.0.0.1:1".to_string());
    })
    .await;
    let err = fx.harness.set_balance(ATTACKER, U256::from(5)).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transport, "{err:?}");
    assert!(fx.node.requests("evm_setAccountBalance").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_node_is_fatal() {
    let mut fx = setup_with(Vec::new(), |config| {
        config.rpc.url = Some("http://127.0.0.1:1".to_string());
    })
    .await;
    let err = fx.harness.discover().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transport, "{err:?}");
    assert!(err.is_fatal());
}
