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

//! Protocol messages exchanged between the maker and the taker of a trade.
//!
//! Every message carries a unique id, used to drop duplicates, the id of the trade it belongs to
//! and the network address of its sender. Ordering and delivery are owned by the network layer.

use std::fmt;

use bitcoin::blockdata::witness::Witness;
use bitcoin::hashes::sha256;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{Address, PublicKey, Transaction, Txid};
use uuid::Uuid;

use crate::bitcoin::fee::SatPerVByte;
use crate::bitcoin::input::{ChangeOutput, RawTransactionInput};
use crate::bitcoin::timelock::CSVTimelock;
use crate::bitcoin::DepositTx;
use crate::trade::{NodeAddress, TradeId, TradeTerms};
use crate::version::ProtocolVersion;

/// The kind of a [`TradeMessage`], used to decide if a message is expected in a given state.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(Debug)]
pub enum MessageKind {
    /// Taker to maker, opens the trade.
    InputsForDepositTxRequest,
    /// Maker to taker, carries the prepared deposit.
    InputsForDepositTxResponse,
    /// Taker to maker, deposit signed on the taker side without its signatures.
    DepositTx,
    /// Maker to taker, maker deposit input witnesses.
    DepositSignatures,
    /// Taker to maker, the deposit was broadcast.
    DepositTxPublished,
    /// Buyer to seller, payment started with the buyer payout signature.
    PaymentStarted,
    /// Seller to buyer, the payout was broadcast.
    PayoutTxPublished,
}

/// `inputs_for_deposit_tx_request` is sent by the taker once its fee transaction is published. It
/// proposes the trade terms and discloses the taker contribution to the deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputsForDepositTxRequest {
    /// Message id.
    pub uid: Uuid,
    /// Trade id, the id of the offer taken.
    pub trade_id: TradeId,
    /// Taker address.
    pub sender: NodeAddress,
    /// Terms proposed by the taker.
    pub terms: TradeTerms,
    /// Protocol version.
    pub version: ProtocolVersion,
    /// Counter currency.
    pub currency_code: String,
    /// Taker fee transaction id.
    pub taker_fee_tx_id: Txid,
    /// Taker inputs.
    pub inputs: Vec<RawTransactionInput>,
    /// Taker change, absent if below dust.
    pub change: Option<ChangeOutput>,
    /// Taker multisig key.
    pub multisig_pubkey: PublicKey,
    /// Taker payout address.
    pub payout_address: Address,
}

/// `inputs_for_deposit_tx_response` carries the deposit built by the maker, stripped of every
/// witness, and the maker contribution. On self-enforcing trades it also fixes the escalation
/// parameters and carries the maker signature on the taker warning transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputsForDepositTxResponse {
    /// Message id.
    pub uid: Uuid,
    /// Trade id.
    pub trade_id: TradeId,
    /// Maker address.
    pub sender: NodeAddress,
    /// Prepared deposit, without any witness.
    pub deposit_tx: DepositTx,
    /// Maker inputs.
    pub inputs: Vec<RawTransactionInput>,
    /// Maker change, absent if below dust.
    pub change: Option<ChangeOutput>,
    /// Maker multisig key.
    pub multisig_pubkey: PublicKey,
    /// Maker payout address.
    pub payout_address: Address,
    /// Maker fee transaction id.
    pub maker_fee_tx_id: Option<Txid>,
    /// Fee rate of both warning transactions.
    pub escalation_fee_rate: Option<SatPerVByte>,
    /// Timelock of both warning outputs.
    pub claim_delay: Option<CSVTimelock>,
    /// Maker signature on the taker warning transaction.
    pub warning_signature: Option<Signature>,
}

/// `deposit_tx_message` returns the deposit signed by the taker with the taker input scripts
/// blanked, so the maker cannot broadcast it alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositTxMessage {
    /// Message id.
    pub uid: Uuid,
    /// Trade id.
    pub trade_id: TradeId,
    /// Taker address.
    pub sender: NodeAddress,
    /// Deposit without any taker signature.
    pub deposit_tx: DepositTx,
    /// Hash of the contract computed by the taker.
    pub contract_hash: sha256::Hash,
    /// Taker signature on the maker warning transaction.
    pub warning_signature: Option<Signature>,
}

/// `deposit_signatures_message` releases the maker deposit input witnesses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositSignaturesMessage {
    /// Message id.
    pub uid: Uuid,
    /// Trade id.
    pub trade_id: TradeId,
    /// Maker address.
    pub sender: NodeAddress,
    /// Witnesses of the maker inputs, in input order.
    pub witnesses: Vec<Witness>,
}

/// `deposit_tx_published_message` notifies the maker the deposit was broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositTxPublishedMessage {
    /// Message id.
    pub uid: Uuid,
    /// Trade id.
    pub trade_id: TradeId,
    /// Taker address.
    pub sender: NodeAddress,
    /// Id of the broadcast deposit.
    pub deposit_tx_id: Txid,
}

/// `payment_started_message` notifies the seller the counter currency payment was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStartedMessage {
    /// Message id.
    pub uid: Uuid,
    /// Trade id.
    pub trade_id: TradeId,
    /// Buyer address.
    pub sender: NodeAddress,
    /// Buyer signature on the payout.
    pub payout_signature: Signature,
}

/// `payout_tx_published_message` hands the broadcast payout to the buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutTxPublishedMessage {
    /// Message id.
    pub uid: Uuid,
    /// Trade id.
    pub trade_id: TradeId,
    /// Seller address.
    pub sender: NodeAddress,
    /// The fully signed payout.
    pub payout_tx: Transaction,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeMessage {
    /// Taker inputs and terms.
    InputsForDepositTxRequest(InputsForDepositTxRequest),
    /// Prepared deposit and maker inputs.
    InputsForDepositTxResponse(InputsForDepositTxResponse),
    /// Deposit signed by the taker.
    DepositTx(DepositTxMessage),
    /// Maker deposit witnesses.
    DepositSignatures(DepositSignaturesMessage),
    /// Deposit broadcast.
    DepositTxPublished(DepositTxPublishedMessage),
    /// Payment started.
    PaymentStarted(PaymentStartedMessage),
    /// Payout broadcast.
    PayoutTxPublished(PayoutTxPublishedMessage),
}

macro_rules! header {
    ($self:ident, $field:ident) => {
        match $self {
            TradeMessage::InputsForDepositTxRequest(m) => &m.$field,
            TradeMessage::InputsForDepositTxResponse(m) => &m.$field,
            TradeMessage::DepositTx(m) => &m.$field,
            TradeMessage::DepositSignatures(m) => &m.$field,
            TradeMessage::DepositTxPublished(m) => &m.$field,
            TradeMessage::PaymentStarted(m) => &m.$field,
            TradeMessage::PayoutTxPublished(m) => &m.$field,
        }
    };
}

impl TradeMessage {
    /// Unique id of the message.
    pub fn uid(&self) -> Uuid {
        *header!(self, uid)
    }

    /// Trade the message belongs to.
    pub fn trade_id(&self) -> TradeId {
        *header!(self, trade_id)
    }

    /// Network address of the sender.
    pub fn sender(&self) -> &NodeAddress {
        header!(self, sender)
    }

    /// Kind of the message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::InputsForDepositTxRequest(_) => MessageKind::InputsForDepositTxRequest,
            Self::InputsForDepositTxResponse(_) => MessageKind::InputsForDepositTxResponse,
            Self::DepositTx(_) => MessageKind::DepositTx,
            Self::DepositSignatures(_) => MessageKind::DepositSignatures,
            Self::DepositTxPublished(_) => MessageKind::DepositTxPublished,
            Self::PaymentStarted(_) => MessageKind::PaymentStarted,
            Self::PayoutTxPublished(_) => MessageKind::PayoutTxPublished,
        }
    }
}

impl fmt::Display for TradeMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} for trade {}", self.kind(), self.uid(), self.trade_id())
    }
}
