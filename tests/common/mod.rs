#![allow(dead_code)]

use std::rc::Rc;

use bitcoin::{Address, Amount, Network, PublicKey, Transaction, Txid};
use secp256k1::rand::thread_rng;
use secp256k1::{Secp256k1, SecretKey};

use escrow_core::bitcoin::timelock::CSVTimelock;
use escrow_core::config::ProtocolConfig;
use escrow_core::message::TradeMessage;
use escrow_core::offer::Offer;
use escrow_core::protocol::TradeManager;
use escrow_core::role::TradeSide;
use escrow_core::services::memory::{
    MemoryChain, MemoryNetwork, MemoryOfferBook, MemoryWallet, SharedChain,
};
use escrow_core::services::store::MemoryStore;
use escrow_core::services::Persistence;
use escrow_core::trade::{NodeAddress, TradeId, TradeTerms};
use escrow_core::version::ProtocolVersion;
use escrow_core::Res;

pub const MAKER: &str = "maker.onion:9999";
pub const TAKER: &str = "taker.onion:9999";

pub const TRADE_AMOUNT: u64 = 1_000_000;
pub const SECURITY_DEPOSIT: u64 = 150_000;
pub const TRADE_FEE: u64 = 5_000;
pub const TX_FEE: u64 = 1_000;
pub const COOPERATIVE_WINDOW: u32 = 6;
pub const CLAIM_DELAY: u32 = 10;

lazy_static::lazy_static! {
    pub static ref FEE_RECEIVER: Address = {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(&mut thread_rng());
        let pk = PublicKey::new(secp256k1::PublicKey::from_secret_key(&secp, &sk));
        Address::p2wpkh(&pk, Network::Regtest).unwrap()
    };
}

pub type Node<S = MemoryStore> = TradeManager<MemoryWallet, MemoryNetwork, S, MemoryOfferBook>;

pub fn config() -> ProtocolConfig {
    let mut config = ProtocolConfig::new(Network::Regtest, FEE_RECEIVER.clone());
    config.cooperative_window_blocks = COOPERATIVE_WINDOW;
    config.claim_delay = CSVTimelock::new(CLAIM_DELAY);
    config
}

pub fn wallet(seed: u8, chain: &SharedChain, funds: u64) -> MemoryWallet {
    let mut wallet = MemoryWallet::new(seed, Network::Regtest, Rc::clone(chain));
    wallet.fund(Amount::from_sat(funds)).unwrap();
    wallet
}

pub fn node_with<S: Persistence>(address: &str, wallet: MemoryWallet, store: S) -> Node<S> {
    TradeManager::new(
        config(),
        NodeAddress::new(address),
        wallet,
        MemoryNetwork::new(),
        store,
        MemoryOfferBook::new(),
    )
    .unwrap()
}

pub fn offer(direction: TradeSide, version: ProtocolVersion) -> Offer {
    Offer {
        id: TradeId::random(),
        direction,
        amount: Amount::from_sat(TRADE_AMOUNT),
        min_amount: Amount::from_sat(TRADE_AMOUNT / 2),
        price: 3_000_000,
        currency_code: "EUR".into(),
        payment_method_id: "SEPA".into(),
        buyer_security_deposit: Amount::from_sat(SECURITY_DEPOSIT),
        seller_security_deposit: Amount::from_sat(SECURITY_DEPOSIT),
        maker_fee: Amount::from_sat(TRADE_FEE),
        maker_fee_tx_id: None,
        version,
        maker_address: NodeAddress::new(MAKER),
    }
}

pub fn terms(offer: &Offer) -> TradeTerms {
    TradeTerms {
        amount: offer.amount,
        price: offer.price,
        tx_fee: Amount::from_sat(TX_FEE),
        taker_fee: Amount::from_sat(TRADE_FEE),
    }
}

/// Deliver the messages of both outboxes until they are empty. Stops on the first failure.
pub fn pump<S, T>(a: &mut Node<S>, b: &mut Node<T>) -> Res<usize>
where
    S: Persistence,
    T: Persistence,
{
    let mut delivered = 0;
    loop {
        if let Some((peer, message)) = a.network_mut().pop() {
            assert_eq!(&peer, b.node_address());
            b.handle_message(message)?;
        } else if let Some((peer, message)) = b.network_mut().pop() {
            assert_eq!(&peer, a.node_address());
            a.handle_message(message)?;
        } else {
            return Ok(delivered);
        }
        delivered += 1;
    }
}

/// Take the next message sent by `node`.
pub fn sent<S: Persistence>(node: &mut Node<S>) -> TradeMessage {
    node.network_mut().pop().map(|(_, m)| m).unwrap()
}

/// A maker and a taker trading on the same chain, both funded.
pub struct Market {
    pub chain: SharedChain,
    pub maker: Node,
    pub taker: Node,
}

impl Market {
    pub fn new() -> Self {
        Self::with_funds(2_000_000, 2_000_000)
    }

    pub fn with_funds(maker: u64, taker: u64) -> Self {
        let chain = MemoryChain::shared();
        Self {
            maker: node_with(MAKER, wallet(1, &chain, maker), MemoryStore::new()),
            taker: node_with(TAKER, wallet(2, &chain, taker), MemoryStore::new()),
            chain,
        }
    }

    /// Place an offer on the maker and take it, without exchanging any message.
    pub fn take(&mut self, direction: TradeSide, version: ProtocolVersion) -> TradeId {
        let offer = self
            .maker
            .place_offer(offer(direction, version), Amount::from_sat(TX_FEE))
            .unwrap();
        let terms = terms(&offer);
        self.taker.take_offer(offer, terms).unwrap()
    }

    /// Place and take an offer, then exchange messages until the deposit is published.
    pub fn open(&mut self, direction: TradeSide, version: ProtocolVersion) -> TradeId {
        let id = self.take(direction, version);
        pump(&mut self.maker, &mut self.taker).unwrap();
        id
    }

    /// Mine a block and notify both parties the deposit confirmed.
    pub fn confirm_deposit(&mut self, id: TradeId) {
        self.mine(1);
        self.maker.deposit_confirmed(id).unwrap();
        self.taker.deposit_confirmed(id).unwrap();
    }

    pub fn mine(&self, blocks: u32) {
        self.chain.borrow_mut().mine(blocks);
    }

    pub fn transaction(&self, txid: &Txid) -> Transaction {
        self.chain.borrow().transaction(txid).unwrap()
    }

    /// The buyer and the seller of a trade where the maker is on `direction`.
    pub fn sides(&mut self, direction: TradeSide) -> (&mut Node, &mut Node) {
        match direction {
            TradeSide::Buyer => (&mut self.maker, &mut self.taker),
            TradeSide::Seller => (&mut self.taker, &mut self.maker),
        }
    }
}
