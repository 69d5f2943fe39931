mod common;

use bitcoin::Transaction;

use escrow_core::escalation::EscalationState;
use escrow_core::message::TradeMessage;
use escrow_core::role::TradeSide;
use escrow_core::services::{OfferBook, Wallet};
use escrow_core::trade::{Trade, TradeState};
use escrow_core::version::ProtocolVersion;

use common::*;

fn paid_to(tx: &Transaction, trade: &Trade) -> u64 {
    let address = trade.process.payout_address.as_ref().unwrap();
    tx.output
        .iter()
        .filter(|o| o.script_pubkey == address.script_pubkey())
        .map(|o| o.value)
        .sum()
}

fn run_trade(direction: TradeSide, version: ProtocolVersion) {
    let mut market = Market::new();
    let id = market.open(direction, version);

    let deposit_txid = market.taker.trade(&id).unwrap().deposit_tx_id.unwrap();
    assert_eq!(
        market.maker.trade(&id).unwrap().deposit_tx_id,
        Some(deposit_txid)
    );
    assert_eq!(
        market.maker.trade(&id).unwrap().state,
        TradeState::DepositPublished
    );
    let deposit = market.transaction(&deposit_txid);
    let escrow = TRADE_AMOUNT + 2 * SECURITY_DEPOSIT + 2 * TX_FEE;
    assert!(deposit.output.iter().any(|o| o.value == escrow));
    // maker inputs come first
    let maker_inputs = &market.maker.trade(&id).unwrap().process.inputs;
    assert_eq!(
        deposit.input[0].previous_output,
        maker_inputs[0].outpoint
    );
    assert!(market.maker.offer_book().find(&id).is_none());

    market.confirm_deposit(id);
    {
        let (buyer, seller) = market.sides(direction);
        buyer.start_payment(id).unwrap();
        pump(buyer, seller).unwrap();
        assert_eq!(
            seller.trade(&id).unwrap().state,
            TradeState::SellerReceivedPaymentStarted
        );
        seller.confirm_payment_received(id).unwrap();
        pump(buyer, seller).unwrap();
    }

    for node in [&market.maker, &market.taker] {
        let trade = node.trade(&id).unwrap();
        assert_eq!(trade.state, TradeState::Completed);
        assert_eq!(trade.escalation, EscalationState::CooperativeWait);
        assert!(node.wallet().reserved(id).is_empty());
    }
    let (buyer, seller) = market.sides(direction);
    let payout_txid = buyer.trade(&id).unwrap().payout_tx_id.unwrap();
    assert_eq!(seller.trade(&id).unwrap().payout_tx_id, Some(payout_txid));
    let payout = market.transaction(&payout_txid);
    let (buyer, seller) = market.sides(direction);
    assert_eq!(
        paid_to(&payout, buyer.trade(&id).unwrap()),
        TRADE_AMOUNT + SECURITY_DEPOSIT
    );
    assert_eq!(
        paid_to(&payout, seller.trade(&id).unwrap()),
        SECURITY_DEPOSIT
    );
    assert_eq!(
        payout.output.iter().map(|o| o.value).sum::<u64>(),
        escrow - 2 * TX_FEE
    );
}

#[test]
fn arbitrated_trade_with_buyer_as_maker() {
    run_trade(TradeSide::Buyer, ProtocolVersion::V1);
}

#[test]
fn arbitrated_trade_with_seller_as_maker() {
    run_trade(TradeSide::Seller, ProtocolVersion::V1);
}

#[test]
fn self_enforcing_trade_with_buyer_as_maker() {
    run_trade(TradeSide::Buyer, ProtocolVersion::V5);
}

#[test]
fn self_enforcing_trade_with_seller_as_maker() {
    run_trade(TradeSide::Seller, ProtocolVersion::V5);
}

#[test]
fn fee_transactions_pay_the_fee_receiver() {
    let mut market = Market::new();
    let id = market.take(TradeSide::Buyer, ProtocolVersion::V1);
    let maker_fee = market.maker.offer_book().find(&id).unwrap().maker_fee_tx_id;
    let taker_fee = market.taker.trade(&id).unwrap().taker_fee_tx_id;
    assert_eq!(
        market.taker.trade(&id).unwrap().state,
        TradeState::TakerSentInputsRequest
    );
    for txid in [maker_fee.unwrap(), taker_fee.unwrap()] {
        let tx = market.transaction(&txid);
        assert!(tx
            .output
            .iter()
            .any(|o| o.value == TRADE_FEE && o.script_pubkey == FEE_RECEIVER.script_pubkey()));
    }
    assert_eq!(market.maker.wallet().broadcast_count(), 1);
    assert_eq!(market.taker.wallet().broadcast_count(), 1);
    assert_eq!(market.taker.wallet().unconfirmed_change_count(), 1);
}

#[test]
fn deposit_is_never_sent_with_witnesses() {
    let mut market = Market::new();
    let id = market.take(TradeSide::Seller, ProtocolVersion::V5);

    let request = sent(&mut market.taker);
    market.maker.handle_message(request).unwrap();
    let response = sent(&mut market.maker);
    match &response {
        TradeMessage::InputsForDepositTxResponse(m) => {
            assert!(!m.deposit_tx.has_any_witness());
            assert!(m.warning_signature.is_some());
            assert_eq!(m.claim_delay.unwrap().as_u32(), CLAIM_DELAY);
        }
        m => panic!("unexpected {}", m),
    }
    // the maker keeps its own signed copy
    let maker = market.maker.trade(&id).unwrap();
    assert!(maker
        .process
        .own_signed_deposit
        .as_ref()
        .unwrap()
        .has_any_witness());

    market.taker.handle_message(response).unwrap();
    let deposit_tx = sent(&mut market.taker);
    match &deposit_tx {
        TradeMessage::DepositTx(m) => {
            assert!(!m.deposit_tx.has_any_witness());
            // neither party can publish it alone
            assert!(market.maker.wallet_mut().broadcast(m.deposit_tx.as_tx()).is_err());
        }
        m => panic!("unexpected {}", m),
    }
    market.maker.handle_message(deposit_tx).unwrap();
    match sent(&mut market.maker) {
        TradeMessage::DepositSignatures(m) => {
            let maker = market.maker.trade(&id).unwrap();
            assert_eq!(m.witnesses.len(), maker.process.inputs.len());
            assert!(m.witnesses.iter().all(|w| !w.is_empty()));
        }
        m => panic!("unexpected {}", m),
    }
    assert_eq!(market.chain.borrow().len(), 2);
}
