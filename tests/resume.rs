mod common;

use escrow_core::message::TradeMessage;
use escrow_core::protocol::TradeManager;
use escrow_core::role::TradeSide;
use escrow_core::services::store::JsonFileStore;
use escrow_core::services::Persistence;
use escrow_core::trade::TradeState;
use escrow_core::version::ProtocolVersion;
use escrow_core::FailureKind;

use common::*;

#[test]
fn taker_resends_its_request_after_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut market = Market::new();
    let offer = market
        .maker
        .place_offer(
            offer(TradeSide::Buyer, ProtocolVersion::V5),
            bitcoin::Amount::from_sat(TX_FEE),
        )
        .unwrap();
    let terms = terms(&offer);

    let taker_wallet = wallet(7, &market.chain, 2_000_000);
    let mut taker = node_with(TAKER, taker_wallet, JsonFileStore::open(dir.path()).unwrap());
    let id = taker.take_offer(offer, terms).unwrap();
    // the request is lost with the process
    taker.network_mut().clear();
    let (wallet, network, _, offer_book) = taker.into_parts();

    let store = JsonFileStore::open(dir.path()).unwrap();
    assert_eq!(store.load_all().unwrap().len(), 1);
    let mut taker = TradeManager::new(
        config(),
        escrow_core::trade::NodeAddress::new(TAKER),
        wallet,
        network,
        store,
        offer_book,
    )
    .unwrap();
    assert!(taker.trade(&id).is_none());
    assert_eq!(taker.resume().unwrap(), 1);
    assert_eq!(
        taker.trade(&id).unwrap().state,
        TradeState::TakerSentInputsRequest
    );
    assert!(matches!(
        taker.network_mut().pop(),
        Some((_, TradeMessage::InputsForDepositTxRequest(_)))
    ));
    taker.network_mut().clear();

    // resuming again resends the very same message
    taker.resume().unwrap();
    let (_, first) = taker.network_mut().pop().unwrap();
    taker.resume().unwrap();
    let (_, second) = taker.network_mut().pop().unwrap();
    assert_eq!(first.uid(), second.uid());
    market.maker.handle_message(first).unwrap();
    market.maker.handle_message(second).unwrap();
    assert_eq!(market.maker.network_mut().pending(), 1);

    pump(&mut market.maker, &mut taker).unwrap();
    assert_eq!(
        taker.trade(&id).unwrap().state,
        TradeState::DepositPublished
    );
    assert_eq!(
        market.maker.trade(&id).unwrap().state,
        TradeState::DepositPublished
    );
    // the stored copy is the live one
    let stored = JsonFileStore::open(dir.path()).unwrap().load_all().unwrap();
    assert_eq!(&stored[0], taker.trade(&id).unwrap());
}

#[test]
fn interrupted_deposit_broadcast_is_resumed_once() {
    let mut market = Market::new();
    let id = market.take(TradeSide::Seller, ProtocolVersion::V1);
    let request = sent(&mut market.taker);
    market.maker.handle_message(request).unwrap();
    let response = sent(&mut market.maker);
    market.taker.handle_message(response).unwrap();
    let deposit = sent(&mut market.taker);
    market.maker.handle_message(deposit).unwrap();
    let signatures = sent(&mut market.maker);

    market
        .taker
        .wallet_mut()
        .reject_broadcasts(Some("mempool full".into()));
    let err = market.taker.handle_message(signatures).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transport);
    let taker = market.taker.trade(&id).unwrap();
    assert_eq!(taker.state, TradeState::TakerReceivedDepositSignatures);
    assert!(taker.deposit_tx_id.is_none());
    assert!(taker.process.final_deposit.as_ref().unwrap().is_fully_signed());
    assert!(taker.error_message.is_some());
    assert_eq!(market.taker.wallet().broadcast_count(), 1);

    market.taker.wallet_mut().reject_broadcasts(None);
    assert_eq!(market.taker.resume().unwrap(), 1);
    assert_eq!(market.taker.wallet().broadcast_count(), 2);
    assert_eq!(
        market.taker.trade(&id).unwrap().state,
        TradeState::DepositPublished
    );
    pump(&mut market.maker, &mut market.taker).unwrap();
    assert_eq!(
        market.maker.trade(&id).unwrap().state,
        TradeState::DepositPublished
    );

    // a second restart only resends the notification, ignored by the maker
    assert_eq!(market.taker.resume().unwrap(), 1);
    assert_eq!(market.taker.wallet().broadcast_count(), 2);
    let maker = market.maker.trade(&id).unwrap().clone();
    pump(&mut market.maker, &mut market.taker).unwrap();
    assert_eq!(market.maker.trade(&id).unwrap(), &maker);
}

#[test]
fn closed_trades_are_loaded_but_not_resumed() {
    let mut market = Market::new();
    let id = market.open(TradeSide::Buyer, ProtocolVersion::V1);
    market.confirm_deposit(id);
    market.maker.start_payment(id).unwrap();
    pump(&mut market.maker, &mut market.taker).unwrap();
    market.taker.confirm_payment_received(id).unwrap();
    pump(&mut market.maker, &mut market.taker).unwrap();

    assert_eq!(market.taker.resume().unwrap(), 0);
    assert_eq!(market.maker.resume().unwrap(), 0);
    assert_eq!(
        market.taker.trade(&id).unwrap().state,
        TradeState::Completed
    );
    assert_eq!(market.taker.network_mut().pending(), 0);
}
