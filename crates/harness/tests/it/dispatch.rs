use crate::utils::{ATTACKER, DEPLOYER, TX_HASH, revert_with_hash, setup};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, U256, keccak256};
use scfuzz::{HarnessError, TxIntent};
use scfuzz_test_utils::fixtures::log_json;
use serde_json::{Value, json};

fn transfer_log(emitter: Address, value: u64) -> Value {
    log_json(
        emitter,
        &[
            keccak256("Transfer(address,address,uint256)"),
            DEPLOYER.into_word(),
            ATTACKER.into_word(),
        ],
        &U256::from(value).to_be_bytes::<32>(),
        TX_HASH,
        2,
    )
}

fn transfer(token: Address) -> TxIntent {
    TxIntent::function(DEPLOYER, token, "transfer")
        .arg("to", DynSolValue::Address(ATTACKER))
        .arg("value", DynSolValue::Uint(U256::from(7), 256))
}

#[tokio::test(flavor = "multi_thread")]
async fn reverted_receipts_are_results() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine(token, false, Vec::new());

    let result = fx.harness.call(&transfer(token)).await.unwrap();
    assert!(!result.success);
    assert!(!result.probe);
    assert_eq!(result.tx_hash, Some(TX_HASH));
    assert_eq!(result.message.as_deref(), Some("transaction reverted"));
}

#[tokio::test(flavor = "multi_thread")]
async fn revert_errors_carrying_a_hash_are_results() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine(token, false, Vec::new());
    revert_with_hash(&fx.node);

    let result = fx.harness.call(&transfer(token)).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.tx_hash, Some(TX_HASH));
    assert!(result.message.unwrap().contains("revert"));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_sends_are_failed_results() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.node.respond_error("eth_sendTransaction", -32000, "sender account not recognized", None);

    let result = fx.harness.call(&transfer(token)).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.tx_hash, None);
    assert!(result.receipt().is_none());
    assert!(result.message.unwrap().contains("sender account not recognized"));
    assert!(fx.node.requests("eth_getTransactionReceipt").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_receipts_keep_the_hash() {
    let mut fx = setup().await;
    let token = fx.token();
    let pending = B256::with_last_byte(1);
    fx.node.respond("eth_sendTransaction", json!(pending));

    let result = fx.harness.call(&transfer(token)).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.tx_hash, Some(pending));
    assert!(result.receipt().is_none());
    assert!(result.message.unwrap().contains("timed out"));
    assert!(fx.node.requests("eth_getTransactionReceipt").len() > 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_traces_keep_the_receipt() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine(token, true, Vec::new());

    let result = fx.harness.call(&transfer(token).with_trace(true)).await.unwrap();
    assert!(result.success);
    assert_eq!(result.tx_hash, Some(TX_HASH));
    assert!(result.receipt().unwrap().status);
    assert!(result.trace.is_none());
    assert!(result.message.unwrap().contains("unknown transaction"));
    assert_eq!(fx.node.requests("debug_traceTransaction").len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn view_call_reverts_are_results() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.node.respond_error("eth_call", 3, "execution reverted", Some(json!("0x")));

    let intent = TxIntent::function(DEPLOYER, token, "balanceOf")
        .arg("owner", DynSolValue::Address(ATTACKER));
    let result = fx.harness.call(&intent).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.tx_hash, None);
    assert!(result.message.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn events_of_a_receipt() {
    let mut fx = setup().await;
    let token = fx.token();
    let elsewhere = Address::with_last_byte(0x42);
    fx.mine(token, true, vec![transfer_log(token, 7), transfer_log(elsewhere, 9)]);

    let intent = TxIntent::event(token, "Transfer", Some(TX_HASH));
    let result = fx.harness.call(&intent).await.unwrap();
    assert!(result.success);
    assert_eq!(result.tx_hash, Some(TX_HASH));
    let events = result.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].indexed,
        vec![DynSolValue::Address(DEPLOYER), DynSolValue::Address(ATTACKER)]
    );
    assert_eq!(events[0].body, vec![DynSolValue::Uint(U256::from(7), 256)]);
    assert!(fx.node.requests("eth_getLogs").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn events_of_the_whole_chain() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.node.respond("eth_getLogs", json!([transfer_log(token, 1), transfer_log(token, 2)]));

    let events = fx.harness.events(token, "Transfer", None).await.unwrap();
    let values = events.iter().map(|e| e.body[0].clone()).collect::<Vec<_>>();
    assert_eq!(
        values,
        vec![DynSolValue::Uint(U256::from(1), 256), DynSolValue::Uint(U256::from(2), 256)]
    );

    let filter = &fx.node.requests("eth_getLogs")[0][0];
    let topic: B256 = serde_json::from_value(filter["topics"][0].clone()).unwrap();
    assert_eq!(topic, keccak256("Transfer(address,address,uint256)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn event_errors() {
    let mut fx = setup().await;
    let token = fx.token();

    let err = fx.harness.events(token, "Approval", None).await.unwrap_err();
    assert!(matches!(&err, HarnessError::EventNotFound { name, .. } if name == "Approval"));

    let unknown = Some(B256::with_last_byte(7));
    let err = fx.harness.events(token, "Transfer", unknown).await.unwrap_err();
    assert!(matches!(err, HarnessError::Rpc(_)), "{err:?}");
}
