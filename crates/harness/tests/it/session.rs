use crate::utils::{ATTACKER, DEPLOYER, setup, setup_with};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, U256};
use scfuzz::{Budget, Observation, RandomStrategy, Session, StopReason, Strategy, TxIntent};
use scfuzz_test_utils::Reply;
use serde_json::json;
use std::{collections::VecDeque, time::Duration};

/// Replays a fixed list of intents, remembering what it observed.
struct Scripted {
    intents: VecDeque<TxIntent>,
    seen: Vec<(u64, u64, usize)>,
}

impl Scripted {
    fn new(intents: impl IntoIterator<Item = TxIntent>) -> Self {
        Self { intents: intents.into_iter().collect(), seen: Vec::new() }
    }
}

impl Strategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn select_transaction(&mut self, observation: &Observation) -> Option<TxIntent> {
        self.seen.push((observation.step, observation.episode, observation.senders.len()));
        self.intents.pop_front()
    }
}

fn transfer(token: Address) -> TxIntent {
    TxIntent::function(DEPLOYER, token, "transfer")
        .arg("to", DynSolValue::Address(ATTACKER))
        .arg("value", DynSolValue::Uint(U256::from(1), 256))
}

#[tokio::test(flavor = "multi_thread")]
async fn random_session_spends_its_step_budget() {
    let mut fx = setup().await;
    fx.mine_transfer();
    let mut strategy = RandomStrategy::new(Some(1));

    let budget = Budget::steps(5).with_episode_length(2);
    let report = Session::run(&mut fx.harness, &mut strategy, budget).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::StepBudget);
    assert_eq!(report.strategy, "random");
    assert_eq!(report.steps, 5);
    assert_eq!(report.successes, 5);
    assert_eq!(report.failures, 0);
    assert_eq!(report.episodes, 3);
    assert_eq!(fx.harness.episode(), 2);
    assert_eq!(fx.node.requests("eth_sendTransaction").len(), 5);

    let token = &report.coverage.contracts[0];
    assert_eq!(token.name, "Token");
    assert_eq!(token.covered_instructions, 14);
    assert_eq!(token.methods["transfer"].calls, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn tolerated_failures_are_counted() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine_transfer();

    let missing = TxIntent::function(DEPLOYER, token, "transfer");
    let stranger = transfer(Address::with_last_byte(0x99));
    let mut strategy = Scripted::new([transfer(token), missing, stranger, transfer(token)]);

    let report = Session::run(&mut fx.harness, &mut strategy, Budget::steps(10)).await.unwrap();
    assert_eq!(report.stop_reason, StopReason::StrategyExhausted);
    assert_eq!(report.steps, 4);
    assert_eq!(report.successes, 2);
    assert_eq!(report.failures, 2);
    assert_eq!(report.failures_by_category["resolution"], 2);

    // every observation sees both unlocked accounts
    assert_eq!(strategy.seen.len(), 5);
    assert!(strategy.seen.iter().all(|&(_, episode, senders)| episode == 0 && senders == 2));
    assert_eq!(strategy.seen.last().map(|s| s.0), Some(4));
}

#[tokio::test(flavor = "multi_thread")]
async fn unmined_transactions_count_as_reverts() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.node.respond("eth_sendTransaction", json!(B256::with_last_byte(1)));

    let mut strategy = Scripted::new([transfer(token)]);
    let report = Session::run(&mut fx.harness, &mut strategy, Budget::default()).await.unwrap();
    assert_eq!(report.reverts, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(report.stop_reason, StopReason::StrategyExhausted);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_transactions_do_not_stop_the_session() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine_transfer();
    fx.node.enqueue("eth_sendTransaction", Reply::error(-32000, "insufficient funds for gas"));

    let mut strategy = Scripted::new([transfer(token), transfer(token)]);
    let report = Session::run(&mut fx.harness, &mut strategy, Budget::default()).await.unwrap();
    assert_eq!(report.steps, 2);
    assert_eq!(report.reverts, 1);
    assert_eq!(report.successes, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(report.stop_reason, StopReason::StrategyExhausted);
}

#[tokio::test(flavor = "multi_thread")]
async fn time_budget() {
    let mut fx = setup().await;
    let token = fx.token();
    fx.mine_transfer();

    let mut strategy = Scripted::new(std::iter::repeat_n(transfer(token), 1000));
    let budget = Budget { max_steps: None, max_duration: Some(Duration::ZERO), episode_length: 0 };
    let report = Session::run(&mut fx.harness, &mut strategy, budget).await.unwrap();
    assert_eq!(report.stop_reason, StopReason::TimeBudget);
    assert_eq!(report.steps, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_accounts_abort_the_session() {
    let mut fx = setup_with(Vec::new(), |config| {
        config.node.mnemonic =
            "test test test test test test test test test test test junk".to_string();
    })
    .await;
    let token = fx.token();

    let mut strategy = Scripted::new([transfer(token)]);
    let err = Session::run(&mut fx.harness, &mut strategy, Budget::steps(1)).await.unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert!(strategy.seen.is_empty());
    assert!(fx.node.requests("eth_sendTransaction").is_empty());
}
