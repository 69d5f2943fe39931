mod common;

use escrow_core::bitcoin::fee::{FeeQuote, SatPerVByte};
use escrow_core::escalation::EscalationState;
use escrow_core::protocol::{self, Trigger};
use escrow_core::role::TradeSide;
use escrow_core::trade::TradeState;
use escrow_core::version::ProtocolVersion;
use escrow_core::{Error, FailureKind};

use common::*;

#[test]
fn seller_claims_the_escrow_after_the_timelock() {
    let mut market = Market::new();
    let id = market.open(TradeSide::Buyer, ProtocolVersion::V5);
    market.confirm_deposit(id);
    let deposit_txid = market.taker.trade(&id).unwrap().deposit_tx_id.unwrap();
    let seller = &mut market.taker;

    let err = seller.escalate(id).unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Protocol(protocol::Error::CooperativeWindowOpen { confirmations: 1, .. })
    ));
    let trade = seller.trade(&id).unwrap();
    assert_eq!(trade.state, TradeState::DepositConfirmed);
    assert_eq!(trade.escalation, EscalationState::CooperativeWait);
    assert!(trade.error_message.is_some());

    market.mine(COOPERATIVE_WINDOW);
    let seller = &mut market.taker;
    seller.escalate(id).unwrap();
    let trade = seller.trade(&id).unwrap();
    assert_eq!(trade.state, TradeState::Escalated);
    assert_eq!(trade.escalation, EscalationState::ClaimDelayWait);
    let warning_txid = trade.warning_tx_id.unwrap();
    let warning = market.transaction(&warning_txid);
    assert_eq!(warning.input.len(), 1);
    assert_eq!(warning.input[0].previous_output.txid, deposit_txid);

    // the seller no longer accepts a cooperative payout
    market.maker.start_payment(id).unwrap();
    let err = pump(&mut market.maker, &mut market.taker).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Desync);

    let seller = &mut market.taker;
    let err = seller.claim(id).unwrap_err();
    assert!(matches!(
        err.root(),
        Error::Protocol(protocol::Error::ClaimTimelockNotMatured { confirmations: 0, required }) if *required == CLAIM_DELAY
    ));
    assert_eq!(
        seller.trade(&id).unwrap().escalation,
        EscalationState::ClaimDelayWait
    );

    market.mine(CLAIM_DELAY);
    let seller = &mut market.taker;
    seller.wallet_mut().set_fee_quote(Some(FeeQuote {
        rate: SatPerVByte::from_sat(5),
        age_secs: 3_600,
    }));
    let err = seller.claim(id).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Resource);
    assert!(matches!(
        err.root(),
        Error::Protocol(protocol::Error::StaleFeeQuote { .. })
    ));
    assert!(seller.trade(&id).unwrap().claim_tx_id.is_none());

    seller.wallet_mut().set_fee_quote(Some(FeeQuote {
        rate: SatPerVByte::from_sat(5),
        age_secs: 0,
    }));
    let balance = seller.wallet().balance();
    seller.claim(id).unwrap();
    let trade = seller.trade(&id).unwrap();
    assert_eq!(trade.escalation, EscalationState::ClaimBroadcast);
    let claim_txid = trade.claim_tx_id.unwrap();
    assert!(seller.wallet().balance() > balance);

    // not mined yet
    assert!(seller.claim_confirmed(id).is_err());
    market.mine(1);
    let seller = &mut market.taker;
    seller.claim_confirmed(id).unwrap();
    let trade = seller.trade(&id).unwrap();
    assert_eq!(trade.state, TradeState::Completed);
    assert_eq!(trade.escalation, EscalationState::Settled);
    let claim = market.transaction(&claim_txid);
    assert_eq!(claim.input[0].previous_output.txid, warning_txid);
    assert_eq!(claim.input[0].sequence, CLAIM_DELAY);
}

#[test]
fn arbitrated_trades_open_a_dispute() {
    let mut market = Market::new();
    let id = market.open(TradeSide::Seller, ProtocolVersion::V1);
    market.confirm_deposit(id);
    market.maker.escalate(id).unwrap();
    let trade = market.maker.trade(&id).unwrap();
    assert_eq!(trade.state, TradeState::DisputeOpened);
    assert_eq!(trade.escalation, EscalationState::CooperativeWait);
    assert!(trade.warning_tx_id.is_none());
    assert!(matches!(
        market.maker.claim(id).unwrap_err(),
        Error::Protocol(protocol::Error::InvalidTrigger {
            trigger: Trigger::Claim,
            state: TradeState::DisputeOpened
        })
    ));
}

#[test]
fn escalation_needs_a_locked_escrow() {
    let mut market = Market::new();
    let id = market.take(TradeSide::Buyer, ProtocolVersion::V5);
    assert!(matches!(
        market.taker.escalate(id).unwrap_err(),
        Error::Protocol(protocol::Error::EscalationNotPermitted(
            TradeState::TakerSentInputsRequest
        ))
    ));
    assert!(matches!(
        market.taker.claim(id).unwrap_err(),
        Error::Protocol(protocol::Error::InvalidTrigger { .. })
    ));
}

#[test]
fn warning_broadcast_is_resumed() {
    let mut market = Market::new();
    let id = market.open(TradeSide::Seller, ProtocolVersion::V5);
    market.confirm_deposit(id);
    market.mine(COOPERATIVE_WINDOW);

    let maker = &mut market.maker;
    maker
        .wallet_mut()
        .reject_broadcasts(Some("connection refused".into()));
    let err = maker.escalate(id).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transport);
    let trade = maker.trade(&id).unwrap();
    assert_eq!(trade.state, TradeState::DepositConfirmed);
    assert_eq!(trade.escalation, EscalationState::WarningBroadcast);
    assert!(trade.process.warning_tx.is_some());

    maker.wallet_mut().reject_broadcasts(None);
    assert_eq!(maker.resume().unwrap(), 1);
    let trade = maker.trade(&id).unwrap();
    assert_eq!(trade.state, TradeState::Escalated);
    assert_eq!(trade.escalation, EscalationState::ClaimDelayWait);
    assert!(market
        .chain
        .borrow()
        .transaction(&trade.warning_tx_id.unwrap())
        .is_some());
}
