// Copyright 2025-2026 Waygate Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

use waygate_core::blockchain::{LockStatus, TxStatus};
use waygate_core::machine::{self, RedeemPolicy};
use waygate_core::role::SwapRole;
use waygate_core::store::SwapStore;
use waygate_core::swap::{StateFlag, SwapId, SwapPhase};
use waygate_core::transaction::TxLabel;

use chrono::{Duration as ChronoDuration, Utc};

use std::time::Duration;

mod chain;

#[tokio::test]
async fn initiator_pays_and_redeems_through_the_full_path() {
    let mut env = chain::setup(RedeemPolicy::Auto);
    let swap_id = SwapId::random();
    let record = chain::test_record(swap_id, SwapRole::Initiator);

    env.own
        .plan_lock(vec![chain::lock_tx(TxLabel::Payment, "0x-payer")]);
    env.party
        .script_lock_statuses(vec![LockStatus::Pending, LockStatus::Confirmed]);
    env.party.set_spendable("tz1-fees");

    env.machine.register(record).await.unwrap();
    env.machine.pay(swap_id).await.unwrap();

    let record = chain::wait_for_flag(&env.store, swap_id, StateFlag::RedeemConfirmed).await;
    for flag in [
        StateFlag::PaymentSigned,
        StateFlag::PaymentBroadcast,
        StateFlag::PartyPaymentSeen,
        StateFlag::PartyPaymentConfirmed,
        StateFlag::RedeemSigned,
        StateFlag::RedeemBroadcast,
        StateFlag::RedeemConfirmed,
    ] {
        assert!(record.has(flag), "missing {}", flag);
    }
    assert!(!record.has(StateFlag::RefundSigned));
    assert_eq!(record.phase(), SwapPhase::Redeemed);
    assert!(record.is_settled());

    assert_eq!(env.own.broadcast_labels(), vec![TxLabel::Payment]);
    assert_eq!(env.party.broadcast_labels(), vec![TxLabel::Redeem]);
    assert_eq!(
        record.payment_tx.as_ref().map(|tx| tx.label),
        Some(TxLabel::Payment)
    );
    assert_eq!(
        record.redeem_tx.as_ref().map(|tx| tx.label),
        Some(TxLabel::Redeem)
    );

    let registered = env.updates.recv().await.unwrap();
    assert_eq!(registered.swap_id, swap_id);
    assert!(registered.changed_tx.is_none());

    let signed = env.updates.recv().await.unwrap();
    assert!(signed.state.contains(StateFlag::PaymentSigned));
    assert!(!signed.state.contains(StateFlag::PaymentBroadcast));
    assert!(signed.changed_tx.is_none());

    let broadcast = env.updates.recv().await.unwrap();
    assert!(broadcast.state.contains(StateFlag::PaymentBroadcast));
    let change = broadcast.changed_tx.expect("broadcast update names its tx");
    assert_eq!(change.label, TxLabel::Payment);
    assert_eq!(change.id, env.own.broadcasts()[0].1);

    env.machine.shutdown().await;
}

#[tokio::test]
async fn acceptor_redeems_with_the_secret_revealed_by_the_counterparty() {
    let env = chain::setup(RedeemPolicy::Auto);
    let swap_id = SwapId::random();
    let record = chain::test_record(swap_id, SwapRole::Acceptor);
    assert!(record.secret.is_none());

    env.own
        .plan_lock(vec![chain::lock_tx(TxLabel::Payment, "0x-payer")]);
    env.party.script_lock_statuses(vec![LockStatus::Confirmed]);
    env.party.set_spendable("tz1-fees");

    env.machine.register(record).await.unwrap();
    env.machine.pay(swap_id).await.unwrap();

    // The counterparty redeems the local lock, putting the preimage on-chain.
    env.own.reveal_secret(chain::test_secret());

    let record = chain::wait_for_flag(&env.store, swap_id, StateFlag::RedeemConfirmed).await;
    assert_eq!(record.secret, Some(chain::test_secret()));
    assert!(record.has(StateFlag::PartyPaymentConfirmed));
    assert_eq!(env.party.broadcast_labels(), vec![TxLabel::Redeem]);

    env.machine.shutdown().await;
}

#[tokio::test]
async fn a_redeemed_lock_turns_refund_into_redeem() {
    let env = chain::setup(RedeemPolicy::Auto);
    let swap_id = SwapId::random();
    let mut record = chain::test_record(swap_id, SwapRole::Acceptor);
    record.created_at = Utc::now() - ChronoDuration::hours(6);
    record.state.insert(StateFlag::PaymentSigned);
    record.state.insert(StateFlag::PaymentBroadcast);
    env.store.insert(record).await.unwrap();

    // The local lock expired, but its funds are gone: the counterparty redeemed late.
    env.own.reveal_secret(chain::test_secret());
    env.party.set_spendable("tz1-fees");

    env.machine.refund(swap_id).await.unwrap();

    let record = chain::wait_for_flag(&env.store, swap_id, StateFlag::RedeemConfirmed).await;
    assert_eq!(record.secret, Some(chain::test_secret()));
    assert!(!record.has(StateFlag::RefundBroadcast));
    assert_eq!(record.phase(), SwapPhase::Redeemed);
    assert!(env.own.broadcasts().is_empty());
    assert_eq!(env.party.broadcast_labels(), vec![TxLabel::Redeem]);

    env.machine.shutdown().await;
}

#[tokio::test]
async fn payment_waits_for_funds_and_retries_on_the_next_trigger() {
    let env = chain::setup(RedeemPolicy::Auto);
    let swap_id = SwapId::random();
    let record = chain::test_record(swap_id, SwapRole::Initiator);
    env.machine.register(record).await.unwrap();

    env.own
        .plan_lock_failure(waygate_core::blockchain::Error::InsufficientFunds {
            needed: 100_000,
            available: 25_000,
        });
    env.machine.pay(swap_id).await.unwrap();

    let record = env.store.get(swap_id).await.unwrap();
    assert_eq!(record.phase(), SwapPhase::Created);
    assert!(env.own.broadcasts().is_empty());

    env.own
        .plan_lock(vec![chain::lock_tx(TxLabel::Payment, "0x-payer")]);
    env.machine.pay(swap_id).await.unwrap();

    let record = chain::wait_for_flag(&env.store, swap_id, StateFlag::PaymentBroadcast).await;
    assert!(record.has(StateFlag::PaymentSigned));
    assert_eq!(env.own.broadcast_labels(), vec![TxLabel::Payment]);

    env.machine.shutdown().await;
}

#[tokio::test]
async fn token_allowance_confirms_within_the_payment() {
    let env = chain::setup(RedeemPolicy::Auto);
    let swap_id = SwapId::random();
    let record = chain::test_record(swap_id, SwapRole::Initiator);
    env.machine.register(record).await.unwrap();

    env.own.plan_lock(vec![
        chain::lock_tx(TxLabel::Payment, "0x-payer"),
        chain::lock_tx(TxLabel::TokenApprove, "0x-payer"),
    ]);
    env.machine.pay(swap_id).await.unwrap();

    let record = env.store.get(swap_id).await.unwrap();
    assert!(record.has(StateFlag::PaymentSigned));
    assert!(record.has(StateFlag::PaymentBroadcast));
    assert_eq!(
        env.own.broadcast_labels(),
        vec![TxLabel::Payment, TxLabel::TokenApprove]
    );
    // Only the payment itself fills the record slot, allowances are not re-attached.
    assert_eq!(
        record.payment_tx.as_ref().map(|tx| tx.label),
        Some(TxLabel::Payment)
    );

    env.machine.shutdown().await;
}

#[tokio::test]
async fn a_stuck_allowance_fails_the_payment() {
    let mut timings = chain::fast_timings();
    timings.approve_timeout = Duration::from_millis(50);
    let env = chain::setup_with(RedeemPolicy::Auto, timings);
    let swap_id = SwapId::random();
    let record = chain::test_record(swap_id, SwapRole::Initiator);
    env.machine.register(record).await.unwrap();

    env.own.plan_lock(vec![
        chain::lock_tx(TxLabel::Payment, "0x-payer"),
        chain::lock_tx(TxLabel::TokenApprove, "0x-payer"),
    ]);
    env.own.set_default_tx_status(TxStatus::Pending);

    let result = env.machine.pay(swap_id).await;
    assert!(matches!(
        result,
        Err(machine::Error::ApproveTimeout(id)) if id == swap_id
    ));

    // The payment went out before the allowance stalled; its facts stay recorded.
    let record = env.store.get(swap_id).await.unwrap();
    assert!(record.has(StateFlag::PaymentSigned));
    assert!(record.has(StateFlag::PaymentBroadcast));

    env.machine.shutdown().await;
}

#[tokio::test]
async fn a_refunded_counterparty_lock_marks_the_swap_unsettled() {
    let env = chain::setup(RedeemPolicy::Auto);
    let swap_id = SwapId::random();
    let mut record = chain::test_record(swap_id, SwapRole::Acceptor);
    record.created_at = Utc::now() - ChronoDuration::hours(11);
    record.state.insert(StateFlag::PaymentSigned);
    record.state.insert(StateFlag::PaymentBroadcast);
    record.state.insert(StateFlag::PartyPaymentSeen);
    record.state.insert(StateFlag::PartyPaymentConfirmed);
    env.store.insert(record).await.unwrap();

    env.party.set_refunded();

    let result = env.machine.redeem(swap_id).await;
    assert!(matches!(
        result,
        Err(machine::Error::Unsettled(id)) if id == swap_id
    ));

    let record = env.store.get(swap_id).await.unwrap();
    assert!(record.has(StateFlag::Unsettled));
    assert_eq!(record.phase(), SwapPhase::Unsettled);
    assert!(record.is_terminal());
    assert!(!record.is_settled());
    assert!(env.own.broadcasts().is_empty());
    assert!(env.party.broadcasts().is_empty());

    env.machine.shutdown().await;
}

#[tokio::test]
async fn a_helper_redeem_settles_the_swap_without_own_broadcasts() {
    let env = chain::setup(RedeemPolicy::Auto);
    let swap_id = SwapId::random();
    let mut record = chain::test_record(swap_id, SwapRole::Acceptor);
    record.party_reward_for_redeem = 2_500;
    assert!(record.secret.is_none());

    env.own
        .plan_lock(vec![chain::lock_tx(TxLabel::Payment, "0x-payer")]);
    env.party.script_lock_statuses(vec![LockStatus::Confirmed]);

    env.machine.register(record).await.unwrap();
    env.machine.pay(swap_id).await.unwrap();
    chain::wait_for_flag(&env.store, swap_id, StateFlag::PartyPaymentConfirmed).await;

    // A third party collects the reward, redeeming the counterparty lock toward this party.
    env.party.reveal_secret(chain::test_secret());

    let record = chain::wait_for_flag(&env.store, swap_id, StateFlag::RedeemConfirmed).await;
    assert_eq!(record.secret, Some(chain::test_secret()));
    assert!(record.is_settled());
    assert!(!record.has(StateFlag::RedeemBroadcast));
    assert_eq!(env.own.broadcast_labels(), vec![TxLabel::Payment]);
    assert!(env.party.broadcasts().is_empty());

    env.machine.shutdown().await;
}

#[tokio::test]
async fn concurrent_payments_from_one_address_take_turns() {
    let env = chain::setup(RedeemPolicy::Auto);
    let first = SwapId::random();
    let second = SwapId::random();

    // Both swaps fund their payment from the same address.
    env.own
        .plan_lock(vec![chain::lock_tx(TxLabel::Payment, "0x-shared")]);
    env.own
        .plan_lock(vec![chain::lock_tx(TxLabel::Payment, "0x-shared")]);

    env.machine
        .register(chain::test_record(first, SwapRole::Initiator))
        .await
        .unwrap();
    env.machine
        .register(chain::test_record(second, SwapRole::Initiator))
        .await
        .unwrap();

    let (one, two) = tokio::join!(env.machine.pay(first), env.machine.pay(second));
    one.unwrap();
    two.unwrap();

    assert_eq!(
        env.own.broadcast_labels(),
        vec![TxLabel::Payment, TxLabel::Payment]
    );
    assert_eq!(env.own.signing_overlaps(), 0);
    for swap_id in [first, second] {
        let record = env.store.get(swap_id).await.unwrap();
        assert!(record.has(StateFlag::PaymentBroadcast));
    }

    env.machine.shutdown().await;
}
