// Copyright 2021-2022 Farcaster Devs
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

//! Collaborators consumed by the protocol: the Bitcoin wallet, the peer-to-peer network, the
//! trade store and the offer book. The [`memory`] and [`store`] modules provide reference
//! implementations.

use std::io;

use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{Address, Amount, OutPoint, PublicKey, Transaction, Txid};
use thiserror::Error;

use crate::bitcoin::fee::FeeQuote;
use crate::bitcoin::input::RawTransactionInput;
use crate::message::TradeMessage;
use crate::offer::{self, Offer};
use crate::trade::{NodeAddress, Trade, TradeId};
use crate::{transaction, FailureKind};

pub mod memory;
pub mod store;

/// Errors raised by a [`Wallet`].
#[derive(Error, Debug)]
pub enum WalletError {
    /// The wallet cannot fund the requested amount.
    #[error("Insufficient funds: {required} required, {available} available")]
    InsufficientFunds {
        /// Requested amount.
        required: Amount,
        /// Spendable amount not reserved by another trade.
        available: Amount,
    },
    /// The wallet does not own the output.
    #[error("Unknown input {0}")]
    UnknownInput(OutPoint),
    /// The wallet cannot sign this kind of output.
    #[error("Unsupported input {0}")]
    UnsupportedInput(OutPoint),
    /// The network refused the transaction.
    #[error("Broadcast of {txid} rejected: {reason}")]
    BroadcastRejected {
        /// Id of the rejected transaction.
        txid: Txid,
        /// Reason given by the network.
        reason: String,
    },
    /// No fee estimate is available.
    #[error("Fee estimation failed: {0}")]
    FeeEstimation(String),
    /// A transaction error.
    #[error("Transaction error: {0}")]
    Transaction(#[from] transaction::Error),
}

impl WalletError {
    /// Return the category of the failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InsufficientFunds { .. } | Self::FeeEstimation(_) => FailureKind::Resource,
            Self::UnknownInput(_) | Self::UnsupportedInput(_) => FailureKind::Validation,
            Self::BroadcastRejected { .. } => FailureKind::Transport,
            Self::Transaction(e) => e.kind(),
        }
    }
}

/// Errors raised by a [`Network`].
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The message could not be delivered to the peer.
    #[error("Failed to send {message} to {peer}: {reason}")]
    SendFailed {
        /// Recipient.
        peer: NodeAddress,
        /// Description of the message.
        message: String,
        /// Reason of the failure.
        reason: String,
    },
}

/// Errors raised by a [`Persistence`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Purpose of a wallet address entry bound to a trade.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[display(Debug)]
pub enum AddressContext {
    /// Key of the 2-of-2 escrow and of the warning output.
    MultiSig,
    /// Destination of the payout and of the claim.
    Payout,
    /// Change of the deposit and fee transactions.
    Change,
}

/// A key and its address, bound to a trade and a purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Trade the entry is bound to.
    pub trade_id: TradeId,
    /// Purpose of the entry.
    pub context: AddressContext,
    /// Public key of the entry.
    pub pubkey: PublicKey,
    /// P2WPKH address of the key.
    pub address: Address,
}

/// The Bitcoin wallet of a party.
pub trait Wallet {
    /// Network of the wallet.
    fn network(&self) -> bitcoin::Network;

    /// Select and reserve unspent outputs worth at least `amount` for the trade. No output is
    /// ever reserved by two trades; successive calls for the same trade add to its reservation.
    fn reserve_inputs_for_trade(
        &mut self,
        trade_id: TradeId,
        amount: Amount,
    ) -> Result<Vec<RawTransactionInput>, WalletError>;

    /// Release every output reserved for the trade and not spent yet.
    fn release_reservation(&mut self, trade_id: TradeId);

    /// Return the address entry of the trade for `context`, creating it if needed.
    fn address_entry(
        &mut self,
        trade_id: TradeId,
        context: AddressContext,
    ) -> Result<AddressEntry, WalletError>;

    /// Sign the inputs of `tx` spending `inputs`, other inputs are left untouched.
    fn sign_inputs(
        &mut self,
        tx: &mut Transaction,
        inputs: &[RawTransactionInput],
    ) -> Result<(), WalletError>;

    /// Sign a signature hash with the key of the trade address entry for `context`.
    fn sign_hash(
        &mut self,
        trade_id: TradeId,
        context: AddressContext,
        sighash: Sha256dHash,
    ) -> Result<Signature, WalletError>;

    /// Broadcast a transaction. Broadcasting a transaction already known is not an error.
    fn broadcast(&mut self, tx: &Transaction) -> Result<Txid, WalletError>;

    /// Confirmations of a transaction, `None` if unknown, `Some(0)` if unconfirmed.
    fn confirmations(&self, txid: &Txid) -> Option<u32>;

    /// A transaction seen by the wallet, confirmed or not.
    fn transaction(&self, txid: &Txid) -> Option<Transaction>;

    /// Number of unconfirmed outputs owned by the wallet.
    fn unconfirmed_change_count(&self) -> usize;

    /// Current fee rate estimate.
    fn fee_quote(&self) -> Result<FeeQuote, WalletError>;
}

/// The peer-to-peer network. Delivery of incoming messages is done by calling
/// [`crate::protocol::TradeManager::handle_message`].
pub trait Network {
    /// Send a message to a peer.
    fn send(&mut self, peer: &NodeAddress, message: TradeMessage) -> Result<(), NetworkError>;
}

/// Durable storage of the trades.
pub trait Persistence {
    /// Save the trade, replacing any previous version. Saves of one trade are applied in order.
    fn save(&mut self, trade: &Trade) -> Result<(), StoreError>;

    /// Load every saved trade.
    fn load_all(&self) -> Result<Vec<Trade>, StoreError>;
}

/// The offers published by the maker.
pub trait OfferBook {
    /// Publish an offer.
    fn add_offer(&mut self, offer: Offer) -> Result<(), offer::Error>;

    /// Remove an offer, returning it.
    fn remove_offer(&mut self, id: &TradeId) -> Option<Offer>;

    /// Publish again an offer removed by a trade that failed or was canceled.
    fn restore_offer(&mut self, offer: Offer);

    /// Return the offer with this id.
    fn find(&self, id: &TradeId) -> Option<Offer>;
}
