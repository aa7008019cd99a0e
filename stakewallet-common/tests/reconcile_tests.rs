//! Spent-state reconciliation, re-acceptance and rebroadcast


use bitcoin::{OutPoint, ScriptBuf};

use stakewallet_common::events::{ChangeType, MismatchKind, WalletEvent};
use stakewallet_common::interfaces::{SpentPosition, TxIndex};
use stakewallet_common::mock::{funding_tx, test_script, test_tx};
use stakewallet_common::reconcile::ReconcileMode;
use stakewallet_common::wallet_tx::WalletTransaction;
use test_helpers::{TestWallet, NOW, TIP};

#[test]
fn test_lost_coin_dry_run_then_repair() {
    let tw = TestWallet::new();
    let outpoints = tw.fund_each(&[40, 60]);
    let mismatches = tw.events.subscribe("spent_mismatch");

    tw.wallet
        .repository()
        .lock()
        .mark_spent(&outpoints[0], true)
        .unwrap();

    let report = tw.wallet.fix_spent_coins(ReconcileMode::DryRun).unwrap();
    assert_eq!(report.mismatches, 1);
    assert_eq!(report.lost_coins, 1);
    assert_eq!(report.balance_in_question, 40);
    assert!(tw.is_spent(&outpoints[0]));

    let report = tw.wallet.fix_spent_coins(ReconcileMode::Repair).unwrap();
    assert_eq!(report.mismatches, 1);
    assert!(!tw.is_spent(&outpoints[0]));
    assert!(!tw.store.transaction(&outpoints[0].txid).unwrap().is_spent(0));

    let report = tw.wallet.fix_spent_coins(ReconcileMode::DryRun).unwrap();
    assert_eq!(report.mismatches, 0);
    assert_eq!(tw.wallet.balance(), 100);

    let events: Vec<WalletEvent> = mismatches.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[1],
        WalletEvent::SpentMismatch {
            kind: MismatchKind::LostCoin,
            value: 40,
            repaired: true,
            ..
        }
    ));
}

#[test]
fn test_missed_spend_is_repaired() {
    let tw = TestWallet::new();
    let outpoints = tw.fund_each(&[40, 60]);
    let spender = funding_tx(99, &[]).txid();
    tw.chain.set_index_spent(
        &outpoints[1],
        Some(SpentPosition {
            txid: spender,
            height: 950,
        }),
    );

    let report = tw.wallet.fix_spent_coins(ReconcileMode::Repair).unwrap();
    assert_eq!(report.missed_spends, 1);
    assert_eq!(report.balance_in_question, 60);
    assert!(tw.is_spent(&outpoints[1]));
    assert_eq!(tw.wallet.balance(), 40);
}

#[test]
fn test_unindexed_transactions_are_skipped() {
    let tw = TestWallet::new();
    let mut wtx = WalletTransaction::new(funding_tx(70, &[(9, test_script(1))]), NOW);
    wtx.mark_spent(0).unwrap();
    tw.wallet.add_to_wallet(wtx).unwrap();

    let report = tw.wallet.fix_spent_coins(ReconcileMode::Repair).unwrap();
    assert_eq!(report.mismatches, 0);
}

#[test]
fn test_observed_spend_marks_inputs() {
    let tw = TestWallet::new();
    let outpoints = tw.fund_each(&[40]);

    let foreign = funding_tx(80, &[(5, test_script(9))]);
    assert!(!tw.wallet.add_if_involving_me(&foreign, None, NOW, false).unwrap());
    assert!(tw.wallet.get_transaction(&foreign.txid()).is_none());

    let spend = test_tx(&[outpoints[0]], &[(39, test_script(9))]);
    assert!(tw.wallet.add_if_involving_me(&spend, None, NOW, false).unwrap());
    assert!(tw.is_spent(&outpoints[0]));
    assert!(tw.wallet.get_transaction(&spend.txid()).is_some());

    assert!(!tw.wallet.add_if_involving_me(&spend, None, NOW, false).unwrap());
}

#[test]
fn test_confirmation_clears_own_spent_markers() {
    let tw = TestWallet::new();
    let tx = funding_tx(81, &[(25, test_script(1)), (5, test_script(9))]);
    let mut wtx = WalletTransaction::new(tx.clone(), NOW);
    wtx.mark_spent(0).unwrap();
    tw.wallet.add_to_wallet(wtx).unwrap();
    assert!(tw.is_spent(&OutPoint::new(tx.txid(), 0)));

    let block = tw.chain.confirm(&tx, TIP, NOW);
    assert!(tw.wallet.add_if_involving_me(&tx, Some(block), NOW, true).unwrap());

    let recorded = tw.wallet.get_transaction(&tx.txid()).unwrap();
    assert_eq!(recorded.block, Some(block));
    assert!(!recorded.is_spent(0));
}

#[test]
fn test_reaccept_replays_index_and_finds_missing_spend() {
    let tw = TestWallet::new();
    let outpoints = tw.fund_each(&[40, 60]);

    // Spent in a block the wallet never saw
    let spend = test_tx(&[outpoints[0]], &[(39, test_script(9))]);
    let block = tw.chain.confirm(&spend, 950, NOW - 5_000);

    let pending = WalletTransaction::new(funding_tx(60, &[(5, test_script(1))]), NOW);
    let pending_txid = pending.txid();
    tw.wallet.add_to_wallet(pending).unwrap();

    let report = tw.wallet.reaccept_wallet_transactions().unwrap();
    assert_eq!(report.corrected, 1);
    assert_eq!(report.discovered, 1);
    assert_eq!(report.passes, 2);
    assert!(report.reaccepted >= 1);

    assert!(tw.is_spent(&outpoints[0]));
    assert!(!tw.is_spent(&outpoints[1]));
    let found = tw.wallet.get_transaction(&spend.txid()).unwrap();
    assert_eq!(found.block, Some(block));
    assert!(tw.relay.accepted().contains(&pending_txid));
}

#[test]
fn test_reaccept_skips_index_with_wrong_output_count() {
    let tw = TestWallet::new();
    let outpoints = tw.fund_each(&[40]);
    let position = Some(SpentPosition {
        txid: funding_tx(98, &[]).txid(),
        height: 990,
    });
    tw.chain.set_tx_index(
        outpoints[0].txid,
        TxIndex {
            spent: vec![position, position],
        },
    );

    let report = tw.wallet.reaccept_wallet_transactions().unwrap();
    assert_eq!(report.corrected, 0);
    assert!(!tw.is_spent(&outpoints[0]));
}

#[test]
fn test_disconnected_coinstake_releases_inputs() {
    let tw = TestWallet::new();
    let outpoints = tw.fund_each(&[40]);

    let coinstake = test_tx(&[outpoints[0]], &[(0, ScriptBuf::new()), (45, test_script(1))]);
    let block = tw.chain.confirm(&coinstake, TIP, NOW);
    assert!(tw.wallet.add_if_involving_me(&coinstake, Some(block), NOW, false).unwrap());
    assert!(tw.is_spent(&outpoints[0]));
    assert_eq!(tw.wallet.stake(), 5);

    tw.chain.disconnect_block(&block.hash);
    tw.wallet.disable_transaction(&coinstake).unwrap();
    assert!(!tw.is_spent(&outpoints[0]));
    assert_eq!(tw.wallet.stake(), 0);

    // Plain spends are left alone
    let spend = test_tx(&[outpoints[0]], &[(39, test_script(9))]);
    tw.wallet.add_if_involving_me(&spend, None, NOW, false).unwrap();
    tw.wallet.disable_transaction(&spend).unwrap();
    assert!(tw.is_spent(&outpoints[0]));
}

#[test]
fn test_forced_resend_relays_valid_and_erases_invalid() {
    let tw = TestWallet::new();
    let confirmed = tw.fund_each(&[40]);
    let deleted = tw.events.subscribe("transaction_changed");

    let valid = WalletTransaction::new(funding_tx(61, &[(5, test_script(1))]), NOW - 1_000);
    let valid_txid = valid.txid();
    let invalid = WalletTransaction::new(funding_tx(62, &[(6, test_script(1))]), NOW - 2_000);
    let invalid_txid = invalid.txid();
    tw.wallet.add_to_wallet(valid).unwrap();
    tw.wallet.add_to_wallet(invalid).unwrap();
    tw.chain.set_invalid(invalid_txid);

    let report = tw.wallet.resend_wallet_transactions(true).unwrap().unwrap();
    assert_eq!(report.relayed, vec![valid_txid]);
    assert_eq!(report.erased, vec![invalid_txid]);
    assert!(!tw.relay.relayed().contains(&confirmed[0].txid));

    assert!(tw.wallet.get_transaction(&invalid_txid).is_none());
    assert!(tw.store.transaction(&invalid_txid).is_none());
    assert_eq!(tw.relay.removed(), vec![invalid_txid]);
    assert!(deleted.try_iter().any(|e| e
        == WalletEvent::TransactionChanged {
            txid: invalid_txid.to_string(),
            change: ChangeType::Deleted,
        }));
}

#[test]
fn test_timed_resend_waits_and_skips_recent() {
    let tw = TestWallet::new();
    let aged = WalletTransaction::new(funding_tx(63, &[(5, test_script(1))]), NOW - 1_000);
    let aged_txid = aged.txid();
    let recent = WalletTransaction::new(funding_tx(64, &[(5, test_script(1))]), NOW - 100);
    tw.wallet.add_to_wallet(aged).unwrap();
    tw.wallet.add_to_wallet(recent).unwrap();

    assert_eq!(tw.wallet.resend_wallet_transactions(false).unwrap(), None);

    tw.chain.set_adjusted_time(NOW + 2_000);
    let report = tw.wallet.resend_wallet_transactions(false).unwrap().unwrap();
    assert_eq!(report.relayed, vec![aged_txid]);

    assert_eq!(tw.wallet.resend_wallet_transactions(false).unwrap(), None);
}
