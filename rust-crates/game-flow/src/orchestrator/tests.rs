#![allow(non_snake_case)]

use std::{
    sync::Arc,
    time::Duration,
};

use coinflip_abi::test_helpers::resolved_event;
use ethers::types::{
    H256,
    U256,
};
use proptest::prelude::*;
use tokio::task::JoinHandle;

use super::*;
use crate::{
    affordability::Unaffordable,
    test_helpers::{
        ConfirmationScript,
        FAKE_CONFIRMATION_BLOCK,
        FakeChain,
        eth,
        milli_eth,
        wait_for_status,
    },
};

type Flow = Arc<GameFlow<FakeChain>>;

fn setup(config: FlowConfig) -> (Arc<FakeChain>, Flow) {
    let chain = Arc::new(FakeChain::new());
    let flow = Arc::new(GameFlow::new(chain.clone(), config));
    (chain, flow)
}

fn spawn_start(flow: &Flow, bet: U256, side: CoinSide) -> JoinHandle<Result<Outcome, FlowError>> {
    let flow = flow.clone();
    tokio::spawn(async move { flow.start(bet, side).await })
}

fn current_nonce(flow: &Flow) -> U256 {
    flow.snapshot()
        .game
        .and_then(|game| game.nonce)
        .expect("game has no nonce yet")
}

fn labels(snapshot: &FlowSnapshot) -> Vec<&'static str> {
    snapshot.steps.iter().map(|step| step.label()).collect()
}

#[tokio::test]
async fn start__sufficient_balances_walks_every_milestone() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Tails);
    chain.wait_for_subscriptions(1).await;

    // when
    let nonce = current_nonce(&flow);
    chain.deliver(vec![resolved_event(
        nonce.as_u64(),
        chain.player_address(),
        milli_eth(50),
        true,
    )]);
    let outcome = task.await.unwrap().unwrap();

    // then
    let snapshot = flow.snapshot();
    assert_eq!(
        outcome,
        Outcome {
            side: CoinSide::Tails,
            won: true
        }
    );
    assert_eq!(snapshot.status, GameStatus::Resolved(outcome));
    assert_eq!(
        labels(&snapshot),
        vec!["Confirming transaction", "Game started", "Game resolved"]
    );
    assert_eq!(chain.releases(), 1);
    assert_eq!(chain.open_subscriptions(), 0);
    assert_eq!(chain.last_from_block(), Some(FAKE_CONFIRMATION_BLOCK));
}

#[tokio::test]
async fn start__records_game_details() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.set_next_nonce(41);

    // when
    let task = spawn_start(&flow, milli_eth(10), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    // then
    let game = flow.snapshot().game.unwrap();
    assert_eq!(game.player, chain.player_address());
    assert_eq!(game.bet, milli_eth(10));
    assert_eq!(game.chosen_side, CoinSide::Heads);
    assert_eq!(game.nonce, Some(U256::from(41)));
    assert!(game.tx_hash.is_some());
    task.abort();
}

#[tokio::test]
async fn start__confirmation_error_fails_without_subscribing() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let reverted = ChainError::Reverted(H256::from_low_u64_be(1));
    chain.script_next_confirmation(ConfirmationScript::Fail(reverted.clone()));

    // when
    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    // then
    let expected = FlowError::Confirmation(reverted);
    assert_eq!(result, Err(expected.clone()));
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.status, GameStatus::Failed(expected));
    assert_eq!(labels(&snapshot), vec!["Confirming transaction"]);
    assert_eq!(chain.subscriptions_opened(), 0);
    assert_eq!(chain.releases(), 0);
}

#[tokio::test]
async fn start__submission_error_fails_and_reset_allows_retry() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.fail_next_submission(ChainError::Rejected("user denied".to_string()));

    // when
    let first = flow.start(milli_eth(50), CoinSide::Heads).await;
    flow.reset().unwrap();
    let retry = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    // then
    assert!(matches!(first, Err(FlowError::Submission(_))));
    assert_eq!(chain.submissions(), 2);
    assert_eq!(chain.confirmations(), 1);
    assert!(matches!(
        flow.snapshot().status,
        GameStatus::AwaitingResolution { .. }
    ));
    retry.abort();
}

#[tokio::test]
async fn start__player_short_of_bet_never_submits() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.set_player_balance(milli_eth(10));

    // when
    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    // then
    assert_eq!(
        result,
        Err(FlowError::Precondition(Unaffordable::Player {
            balance: milli_eth(10),
            bet: milli_eth(50),
        }))
    );
    assert_eq!(chain.submissions(), 0);
    assert_eq!(flow.snapshot().status, GameStatus::Idle);
    assert!(flow.snapshot().steps.is_empty());
}

#[tokio::test]
async fn start__house_short_of_payout_never_submits() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.set_house_balance(milli_eth(94));

    // when
    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    // then
    assert!(matches!(
        result,
        Err(FlowError::Precondition(Unaffordable::House { .. }))
    ));
    assert_eq!(chain.submissions(), 0);
    assert_eq!(flow.snapshot().status, GameStatus::Idle);
}

#[tokio::test]
async fn start__zero_bet_is_rejected_before_reading_balances() {
    let (chain, flow) = setup(FlowConfig::default());

    let result = flow.start(U256::zero(), CoinSide::Heads).await;

    assert_eq!(result, Err(FlowError::ZeroBet));
    assert_eq!(chain.balance_reads(), 0);
    assert_eq!(chain.submissions(), 0);
}

#[tokio::test]
async fn start__unreadable_balances_never_submit() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let err = ChainError::Transport("connection refused".to_string());
    chain.fail_balance_reads(Some(err.clone()));

    // when
    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    // then
    assert_eq!(result, Err(FlowError::BalanceUnavailable(err)));
    assert_eq!(chain.submissions(), 0);
    assert_eq!(flow.snapshot().status, GameStatus::Idle);
}

#[tokio::test]
async fn start__missing_creation_event_is_protocol_mismatch() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.script_next_confirmation(ConfirmationScript::NoCreationEvent);

    // when
    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    // then
    assert!(matches!(result, Err(FlowError::ProtocolMismatch(_))));
    let snapshot = flow.snapshot();
    assert!(matches!(
        snapshot.status,
        GameStatus::Failed(FlowError::ProtocolMismatch(_))
    ));
    assert_eq!(labels(&snapshot), vec!["Confirming transaction"]);
    assert_eq!(chain.subscriptions_opened(), 0);
}

#[tokio::test]
async fn start__creation_event_of_another_transaction_is_ignored() {
    let (chain, flow) = setup(FlowConfig::default());
    chain.script_next_confirmation(ConfirmationScript::ForeignCreationEvent);

    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    assert!(matches!(result, Err(FlowError::ProtocolMismatch(_))));
}

#[tokio::test]
async fn start__undecodable_creation_event_fails_flow() {
    let (chain, flow) = setup(FlowConfig::default());
    chain.script_next_confirmation(ConfirmationScript::MalformedCreationEvent);

    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    assert!(matches!(
        result,
        Err(FlowError::Decode(ChainError::Decode(_)))
    ));
    assert_eq!(chain.subscriptions_opened(), 0);
}

#[tokio::test]
async fn start__subscription_failure_fails_after_game_started() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.fail_next_subscription(ChainError::Transport("filter not found".to_string()));

    // when
    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    // then
    assert!(matches!(result, Err(FlowError::Subscription(_))));
    assert_eq!(
        labels(&flow.snapshot()),
        vec!["Confirming transaction", "Game started"]
    );
    assert_eq!(chain.releases(), 0);
}

#[tokio::test]
async fn start__resolves_only_on_own_nonce() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.set_next_nonce(8);
    let player = chain.player_address();
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    // when
    chain.deliver(vec![resolved_event(7, player, milli_eth(50), true)]);
    chain.deliver(vec![resolved_event(9, player, milli_eth(50), true)]);
    tokio::task::yield_now().await;
    let before_match = flow.snapshot().status;
    chain.deliver(vec![resolved_event(8, player, milli_eth(50), false)]);
    let outcome = task.await.unwrap().unwrap();

    // then
    assert_eq!(
        before_match,
        GameStatus::AwaitingResolution {
            nonce: U256::from(8)
        }
    );
    assert_eq!(
        outcome,
        Outcome {
            side: CoinSide::Tails,
            won: false
        }
    );
}

#[tokio::test]
async fn start__picks_own_nonce_out_of_a_mixed_batch() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.set_next_nonce(8);
    let player = chain.player_address();
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    // when
    chain.deliver(vec![
        resolved_event(7, player, milli_eth(50), false),
        resolved_event(8, player, milli_eth(50), true),
        resolved_event(9, player, milli_eth(50), false),
    ]);
    let outcome = task.await.unwrap().unwrap();

    // then
    assert_eq!(
        outcome,
        Outcome {
            side: CoinSide::Heads,
            won: true
        }
    );
}

#[tokio::test]
async fn start__empty_batches_keep_waiting() {
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    chain.deliver(Vec::new());
    chain.deliver(Vec::new());
    tokio::task::yield_now().await;

    assert!(matches!(
        flow.snapshot().status,
        GameStatus::AwaitingResolution { .. }
    ));
    assert!(!task.is_finished());
    flow.cancel();
    assert_eq!(task.await.unwrap(), Err(FlowError::Cancelled));
}

#[tokio::test]
async fn start__refused_while_a_game_is_in_flight() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    // when
    let second = flow.start(milli_eth(50), CoinSide::Tails).await;

    // then
    assert_eq!(
        second,
        Err(FlowError::FlowInProgress("awaiting resolution"))
    );
    assert_eq!(chain.submissions(), 1);
    task.abort();
}

#[tokio::test]
async fn cancel__twice_has_the_same_effect_as_once() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    // when
    let first = flow.cancel();
    let second = flow.cancel();

    // then
    assert!(first);
    assert!(!second);
    assert_eq!(task.await.unwrap(), Err(FlowError::Cancelled));
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.status, GameStatus::Cancelled);
    assert!(snapshot.steps.is_empty());
    assert_eq!(chain.releases(), 1);
    assert_eq!(chain.open_subscriptions(), 0);
}

#[tokio::test]
async fn cancel__during_confirmation_discards_late_result() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let gate = chain.hold_next_confirmation();
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_submissions(1).await;
    wait_for_status(&flow, |status| *status == GameStatus::AwaitingConfirmation).await;

    // when
    flow.cancel();
    gate.open();
    let result = task.await.unwrap();

    // then
    assert_eq!(result, Err(FlowError::Cancelled));
    assert_eq!(flow.snapshot().status, GameStatus::Cancelled);
    assert_eq!(chain.subscriptions_opened(), 0);
    assert_eq!(chain.releases(), 0);
}

#[tokio::test]
async fn cancel__late_confirmation_after_reset_is_ignored() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let gate = chain.hold_next_confirmation();
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_submissions(1).await;
    wait_for_status(&flow, |status| *status == GameStatus::AwaitingConfirmation).await;
    flow.cancel();
    flow.reset().unwrap();

    // when
    gate.open();
    let result = task.await.unwrap();

    // then
    assert_eq!(result, Err(FlowError::Cancelled));
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.status, GameStatus::Idle);
    assert!(snapshot.steps.is_empty());
    assert!(snapshot.game.is_none());
    assert_eq!(chain.subscriptions_opened(), 0);
}

#[tokio::test]
async fn cancel__late_confirmation_failure_after_reset_is_ignored() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    chain.script_next_confirmation(ConfirmationScript::Fail(ChainError::Timeout(
        Duration::from_secs(120),
    )));
    let gate = chain.hold_next_confirmation();
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_submissions(1).await;
    wait_for_status(&flow, |status| *status == GameStatus::AwaitingConfirmation).await;
    flow.cancel();
    flow.reset().unwrap();

    // when
    gate.open();
    let result = task.await.unwrap();

    // then
    assert_eq!(result, Err(FlowError::Cancelled));
    assert_eq!(flow.snapshot().status, GameStatus::Idle);
}

#[tokio::test]
async fn cancel__late_confirmation_does_not_touch_the_next_game() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let gate = chain.hold_next_confirmation();
    let abandoned = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_submissions(1).await;
    wait_for_status(&flow, |status| *status == GameStatus::AwaitingConfirmation).await;
    flow.cancel();
    flow.reset().unwrap();
    let next = spawn_start(&flow, milli_eth(20), CoinSide::Tails);
    chain.wait_for_subscriptions(1).await;
    let nonce = current_nonce(&flow);

    // when
    gate.open();
    let late = abandoned.await.unwrap();

    // then
    assert_eq!(late, Err(FlowError::Cancelled));
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.status, GameStatus::AwaitingResolution { nonce });
    assert_eq!(labels(&snapshot), vec!["Confirming transaction", "Game started"]);
    assert_eq!(chain.subscriptions_opened(), 1);

    chain.deliver(vec![resolved_event(
        nonce.as_u64(),
        chain.player_address(),
        milli_eth(20),
        false,
    )]);
    let outcome = next.await.unwrap().unwrap();
    assert_eq!(outcome.side, CoinSide::Heads);
    assert_eq!(chain.releases(), 1);
}

#[tokio::test]
async fn cancel__after_resolution_is_a_no_op() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;
    let nonce = current_nonce(&flow).as_u64();
    chain.deliver(vec![resolved_event(
        nonce,
        chain.player_address(),
        milli_eth(50),
        true,
    )]);
    task.await.unwrap().unwrap();

    // when
    let cancelled = flow.cancel();

    // then
    assert!(!cancelled);
    assert!(matches!(flow.snapshot().status, GameStatus::Resolved(_)));
    assert_eq!(flow.snapshot().steps.len(), 3);
    assert_eq!(chain.releases(), 1);
}

#[tokio::test]
async fn cancel__from_idle_requires_reset_before_next_game() {
    // given
    let (chain, flow) = setup(FlowConfig::default());

    // when
    assert!(flow.cancel());
    let refused = flow.start(milli_eth(50), CoinSide::Heads).await;
    flow.reset().unwrap();

    // then
    assert_eq!(refused, Err(FlowError::FlowInProgress("cancelled")));
    assert_eq!(chain.submissions(), 0);
    assert_eq!(flow.snapshot().status, GameStatus::Idle);
}

#[tokio::test]
async fn reset__refused_while_in_flight() {
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    let result = flow.reset();

    assert_eq!(
        result,
        Err(FlowError::FlowInProgress("awaiting resolution"))
    );
    assert_eq!(chain.releases(), 0);
    task.abort();
}

#[tokio::test]
async fn reset__clears_game_and_steps_after_failure() {
    let (chain, flow) = setup(FlowConfig::default());
    chain.script_next_confirmation(ConfirmationScript::NoCreationEvent);
    let _ = flow.start(milli_eth(50), CoinSide::Heads).await;

    flow.reset().unwrap();

    let snapshot = flow.snapshot();
    assert_eq!(snapshot.status, GameStatus::Idle);
    assert!(snapshot.game.is_none());
    assert!(snapshot.steps.is_empty());
}

#[tokio::test]
async fn start__resolution_timeout_behaves_like_cancel() {
    // given
    let config = FlowConfig::default().with_resolution_timeout(Duration::from_millis(20));
    let (chain, flow) = setup(config);

    // when
    let result = flow.start(milli_eth(50), CoinSide::Heads).await;

    // then
    assert_eq!(
        result,
        Err(FlowError::ResolutionTimedOut(Duration::from_millis(20)))
    );
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.status, GameStatus::Cancelled);
    assert!(snapshot.steps.is_empty());
    assert_eq!(chain.releases(), 1);
}

#[tokio::test]
async fn start__closed_stream_fails_and_releases() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;
    let nonce = current_nonce(&flow);

    // when
    chain.close_streams();
    let result = task.await.unwrap();

    // then
    assert_eq!(result, Err(FlowError::StreamClosed(nonce)));
    assert_eq!(
        labels(&flow.snapshot()),
        vec!["Confirming transaction", "Game started"]
    );
    assert_eq!(chain.releases(), 1);
}

#[tokio::test]
async fn start__refreshes_balances_after_resolution() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;
    chain.set_player_balance(eth(11));
    chain.set_house_balance(eth(99));

    // when
    let nonce = current_nonce(&flow).as_u64();
    chain.deliver(vec![resolved_event(
        nonce,
        chain.player_address(),
        milli_eth(50),
        true,
    )]);
    task.await.unwrap().unwrap();

    // then
    let balances = flow.snapshot().balances.unwrap();
    assert_eq!(balances.player, eth(11));
    assert_eq!(balances.house, eth(99));
}

#[tokio::test]
async fn start__failed_balance_refresh_keeps_resolution() {
    let (chain, flow) = setup(FlowConfig::default());
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;
    chain.fail_balance_reads(Some(ChainError::Transport("offline".to_string())));

    let nonce = current_nonce(&flow).as_u64();
    chain.deliver(vec![resolved_event(
        nonce,
        chain.player_address(),
        milli_eth(50),
        true,
    )]);
    let result = task.await.unwrap();

    assert!(result.is_ok());
    assert!(matches!(flow.snapshot().status, GameStatus::Resolved(_)));
}

#[tokio::test]
async fn subscribe__observes_each_milestone() {
    // given
    let (chain, flow) = setup(FlowConfig::default());
    let mut updates = flow.subscribe();
    let task = spawn_start(&flow, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;

    // when
    let started = updates.borrow_and_update().clone();
    flow.cancel();
    updates.changed().await.unwrap();
    let cancelled = updates.borrow_and_update().clone();

    // then
    assert_eq!(labels(&started), vec!["Confirming transaction", "Game started"]);
    assert_eq!(cancelled.status, GameStatus::Cancelled);
    assert!(cancelled.steps.is_empty());
    task.await.unwrap().unwrap_err();
}

#[tokio::test]
async fn start__concurrent_flows_on_one_contract_stay_isolated() {
    // given
    let chain = Arc::new(FakeChain::new());
    let first = Arc::new(GameFlow::new(chain.clone(), FlowConfig::default()));
    let second = Arc::new(GameFlow::new(chain.clone(), FlowConfig::default()));
    let player = chain.player_address();
    let first_task = spawn_start(&first, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(1).await;
    let second_task = spawn_start(&second, milli_eth(50), CoinSide::Heads);
    chain.wait_for_subscriptions(2).await;
    let first_nonce = current_nonce(&first).as_u64();
    let second_nonce = current_nonce(&second).as_u64();

    // when
    chain.deliver(vec![resolved_event(second_nonce, player, milli_eth(50), false)]);
    let second_outcome = second_task.await.unwrap().unwrap();
    let first_status = first.snapshot().status;
    chain.deliver(vec![resolved_event(first_nonce, player, milli_eth(50), true)]);
    let first_outcome = first_task.await.unwrap().unwrap();

    // then
    assert_ne!(first_nonce, second_nonce);
    assert!(!second_outcome.won);
    assert!(matches!(
        first_status,
        GameStatus::AwaitingResolution { .. }
    ));
    assert!(first_outcome.won);
    assert_eq!(chain.releases(), 2);
}

#[derive(Clone, Debug)]
enum Plan {
    Resolve { misses: usize },
    FailSubmission,
    FailConfirmation,
    CancelDuringConfirmation,
    ResetBeforeLateConfirmation,
    CancelDuringResolution { misses: usize },
    CloseStream,
}

fn plan() -> impl Strategy<Value = Plan> {
    prop_oneof![
        (0..3usize).prop_map(|misses| Plan::Resolve { misses }),
        Just(Plan::FailSubmission),
        Just(Plan::FailConfirmation),
        Just(Plan::CancelDuringConfirmation),
        Just(Plan::ResetBeforeLateConfirmation),
        (0..3usize).prop_map(|misses| Plan::CancelDuringResolution { misses }),
        Just(Plan::CloseStream),
    ]
}

struct PlanResult {
    subscribed: usize,
    released: usize,
    // a result that arrived after cancel and reset changed the idle flow
    disturbed_idle: bool,
}

async fn run_plan(chain: &Arc<FakeChain>, flow: &Flow, plan: &Plan) -> PlanResult {
    let subscribed = chain.subscriptions_opened();
    let released = chain.releases();
    let player = chain.player_address();

    let mut gate = None;
    match plan {
        Plan::FailSubmission => {
            chain.fail_next_submission(ChainError::Rejected("user denied".to_string()))
        }
        Plan::FailConfirmation => chain.script_next_confirmation(ConfirmationScript::Fail(
            ChainError::Timeout(Duration::from_secs(1)),
        )),
        Plan::CancelDuringConfirmation | Plan::ResetBeforeLateConfirmation => {
            gate = Some(chain.hold_next_confirmation())
        }
        _ => {}
    }

    let submissions = chain.submissions();
    let task = spawn_start(flow, milli_eth(50), CoinSide::Heads);
    match plan {
        Plan::Resolve { misses } | Plan::CancelDuringResolution { misses } => {
            chain.wait_for_subscriptions(1).await;
            let nonce = current_nonce(flow).as_u64();
            for miss in 0..*misses {
                let other = nonce + 1000 + miss as u64;
                chain.deliver(vec![resolved_event(other, player, milli_eth(50), true)]);
            }
            if matches!(plan, Plan::Resolve { .. }) {
                chain.deliver(vec![resolved_event(nonce, player, milli_eth(50), true)]);
            } else {
                flow.cancel();
            }
        }
        Plan::CancelDuringConfirmation => {
            chain.wait_for_submissions(submissions + 1).await;
            flow.cancel();
            if let Some(gate) = gate.take() {
                gate.open();
            }
        }
        Plan::ResetBeforeLateConfirmation => {
            chain.wait_for_submissions(submissions + 1).await;
            flow.cancel();
            flow.reset().expect("cancelled flow should reset");
            if let Some(gate) = gate.take() {
                gate.open();
            }
        }
        Plan::CloseStream => {
            chain.wait_for_subscriptions(1).await;
            chain.close_streams();
        }
        Plan::FailSubmission | Plan::FailConfirmation => {}
    }
    let _ = task.await;
    let disturbed_idle = matches!(plan, Plan::ResetBeforeLateConfirmation) && {
        let snapshot = flow.snapshot();
        snapshot.status != GameStatus::Idle || snapshot.game.is_some() || !snapshot.steps.is_empty()
    };

    flow.cancel();
    flow.reset().expect("flow should be terminal");
    PlanResult {
        subscribed: chain.subscriptions_opened() - subscribed,
        released: chain.releases() - released,
        disturbed_idle,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn start__releases_subscription_exactly_once_per_subscribed_flow(
        plans in prop::collection::vec(plan(), 1..4),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let results = runtime.block_on(async {
            let chain = Arc::new(FakeChain::new());
            let flow = Arc::new(GameFlow::new(chain.clone(), FlowConfig::default()));
            let mut results = Vec::new();
            for plan in &plans {
                results.push((plan.clone(), run_plan(&chain, &flow, plan).await));
            }
            results
        });

        for (plan, result) in results {
            let reaches_resolution = matches!(
                plan,
                Plan::Resolve { .. } | Plan::CancelDuringResolution { .. } | Plan::CloseStream
            );
            prop_assert_eq!(result.subscribed, usize::from(reaches_resolution));
            prop_assert_eq!(result.released, result.subscribed);
            prop_assert!(!result.disturbed_idle, "late result changed an idle flow");
        }
    }
}
