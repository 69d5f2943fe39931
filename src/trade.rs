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

//! A trade executed against an offer: its agreed terms, its lifecycle state and the process model
//! mutated by the protocol tasks. Also defines the contract both parties hash to make sure they
//! agree on the same terms.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Address, Amount, Txid};
use uuid::Uuid;

use crate::bitcoin::amount::string;
use crate::bitcoin::multisig::MultisigKeys;
use crate::escalation::EscalationState;
use crate::model::ProcessModel;
use crate::offer::Offer;
use crate::role::{ProtocolRole, TradeAmounts, TradeRole, TradeSide};
use crate::version::ProtocolVersion;

/// The identifier of a trade, equal to the identifier of the offer it executes. This is a
/// wrapper around [`Uuid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
#[display(inner)]
pub struct TradeId(pub Uuid);

impl TradeId {
    /// Generate a random identifier.
    pub fn random() -> Self {
        TradeId(Uuid::new_v4())
    }
}

impl From<Uuid> for TradeId {
    fn from(u: Uuid) -> Self {
        TradeId(u)
    }
}

/// Opaque network address of a peer, interpreted by the network layer only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
#[display(inner)]
pub struct NodeAddress(String);

impl NodeAddress {
    /// Wrap a network address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a trade. Every state is set by a task, the name says which party set it and
/// after which step.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(Debug)]
pub enum TradeState {
    /// Trade created, no task completed yet.
    Created,
    /// The taker published its trade fee transaction.
    TakerPublishedFeeTx,
    /// The taker sent its inputs to the maker.
    TakerSentInputsRequest,
    /// The maker built and signed the deposit and sent it stripped to the taker.
    MakerSentInputsResponse,
    /// The taker signed the deposit and sent it back without its signatures.
    TakerSentDepositTx,
    /// The maker released its deposit input signatures.
    MakerSentDepositSignatures,
    /// The taker holds the fully signed deposit transaction.
    TakerReceivedDepositSignatures,
    /// The deposit transaction was broadcast.
    DepositPublished,
    /// The deposit transaction is confirmed.
    DepositConfirmed,
    /// The buyer started the fiat payment and sent its payout signature.
    BuyerSentPaymentStarted,
    /// The seller received the payment started message.
    SellerReceivedPaymentStarted,
    /// The seller broadcast the payout transaction.
    PayoutPublished,
    /// The trade completed.
    Completed,
    /// Version 1 trades: a dispute was opened with the arbitrators.
    DisputeOpened,
    /// Self-enforcing trades: the party escalated with its warning transaction.
    Escalated,
    /// The trade was canceled before the deposit was published.
    Canceled,
    /// The trade failed before the deposit was published.
    Failed,
}

impl TradeState {
    /// True if no task can run on the trade anymore.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    /// True while no party can publish the deposit transaction yet. Past this point the funds
    /// may be locked and the trade is never compensated or canceled.
    pub fn is_before_deposit_published(&self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::TakerPublishedFeeTx
                | Self::TakerSentInputsRequest
                | Self::MakerSentInputsResponse
                | Self::TakerSentDepositTx
        )
    }

    /// True once the deposit is published and no payout or escalation happened.
    pub fn is_escrow_locked(&self) -> bool {
        matches!(
            self,
            Self::DepositPublished
                | Self::DepositConfirmed
                | Self::BuyerSentPaymentStarted
                | Self::SellerReceivedPaymentStarted
        )
    }
}

/// Terms proposed by the taker when taking an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTerms {
    /// Amount of bitcoin exchanged.
    #[serde(with = "string")]
    pub amount: Amount,
    /// Price in the smallest unit of the counter currency per bitcoin.
    pub price: u64,
    /// Mining fee for one protocol transaction.
    #[serde(with = "string")]
    pub tx_fee: Amount,
    /// Trade-initiation fee paid by the taker.
    #[serde(with = "string")]
    pub taker_fee: Amount,
}

/// A trade with its process model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Trade id, the offer id.
    pub id: TradeId,
    /// Maker or taker, buyer or seller.
    pub role: ProtocolRole,
    /// Protocol version of the trade.
    pub version: ProtocolVersion,
    /// Agreed amounts.
    pub amounts: TradeAmounts,
    /// Agreed price.
    pub price: u64,
    /// Counter currency.
    pub currency_code: String,
    /// Trade-initiation fee paid by the taker.
    #[serde(with = "string")]
    pub taker_fee: Amount,
    /// Lifecycle state.
    pub state: TradeState,
    /// Escalation state, only leaves the cooperative wait on self-enforcing trades.
    pub escalation: EscalationState,
    /// Network address of the counterparty.
    pub peer_address: NodeAddress,
    /// The offer as published, restored on the offer book if the trade fails early.
    pub offer: Offer,
    /// Maker fee transaction id.
    pub maker_fee_tx_id: Option<Txid>,
    /// Taker fee transaction id.
    pub taker_fee_tx_id: Option<Txid>,
    /// Deposit transaction id.
    pub deposit_tx_id: Option<Txid>,
    /// Payout transaction id.
    pub payout_tx_id: Option<Txid>,
    /// Warning transaction id.
    pub warning_tx_id: Option<Txid>,
    /// Claim transaction id.
    pub claim_tx_id: Option<Txid>,
    /// Message of the last failure.
    pub error_message: Option<String>,
    /// Outcome of the previous attempts of a maker trade restarted from its offer.
    #[serde(default)]
    pub previous_attempts: Vec<String>,
    /// Data exchanged and produced by the protocol.
    pub process: ProcessModel,
}

impl Trade {
    /// Create the trade of `role` against `offer` with the terms proposed by the taker.
    pub fn new(offer: Offer, role: TradeRole, terms: TradeTerms, peer_address: NodeAddress) -> Self {
        let side = match role {
            TradeRole::Maker => offer.direction,
            TradeRole::Taker => offer.direction.other(),
        };
        Self {
            id: offer.id,
            role: ProtocolRole::new(role, side),
            version: offer.version,
            amounts: offer.trade_amounts(terms.amount, terms.tx_fee),
            price: terms.price,
            currency_code: offer.currency_code.clone(),
            taker_fee: terms.taker_fee,
            state: TradeState::Created,
            escalation: EscalationState::default(),
            peer_address,
            maker_fee_tx_id: offer.maker_fee_tx_id,
            taker_fee_tx_id: None,
            deposit_tx_id: None,
            payout_tx_id: None,
            warning_tx_id: None,
            claim_tx_id: None,
            error_message: None,
            previous_attempts: vec![],
            process: ProcessModel::new(offer.id),
            offer,
        }
    }

    /// True if the trade is closed.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Start over from a failed or canceled attempt of the same trade. The outcome of the attempt
    /// is archived and its processed messages are still ignored as duplicates.
    pub fn restart_from(&mut self, previous: &Trade) {
        self.previous_attempts = previous.previous_attempts.clone();
        self.previous_attempts.push(match &previous.error_message {
            Some(message) => format!("{}: {}", previous.state, message),
            None => previous.state.to_string(),
        });
        self.process.inherit_processed(&previous.process);
    }

    /// The terms proposed by the taker.
    pub fn terms(&self) -> TradeTerms {
        TradeTerms {
            amount: self.amounts.trade_amount,
            price: self.price,
            tx_fee: self.amounts.tx_fee,
            taker_fee: self.taker_fee,
        }
    }
}

/// The terms both parties agree on, hashed and compared before the maker releases its deposit
/// signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Trade id.
    pub trade_id: TradeId,
    /// Protocol version.
    pub version: ProtocolVersion,
    /// Agreed amounts.
    pub amounts: TradeAmounts,
    /// Agreed price.
    pub price: u64,
    /// Counter currency.
    pub currency_code: String,
    /// Opaque payment method identifier.
    pub payment_method_id: String,
    /// Side of the maker.
    pub maker_side: TradeSide,
    /// Escrow keys.
    pub multisig_keys: MultisigKeys,
    /// Payout address of the buyer.
    pub buyer_payout_address: Address,
    /// Payout address of the seller.
    pub seller_payout_address: Address,
    /// Maker fee transaction id.
    pub maker_fee_tx_id: Option<Txid>,
    /// Taker fee transaction id.
    pub taker_fee_tx_id: Option<Txid>,
    /// Deposit transaction id.
    pub deposit_tx_id: Txid,
}

impl Contract {
    /// Hash of the JSON serialization of the contract.
    pub fn hash(&self) -> Result<sha256::Hash, serde_json::Error> {
        Ok(sha256::Hash::hash(&serde_json::to_vec(self)?))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn trade_id_display_and_serde() {
        let uuid = Uuid::from_str("6c3e4b8a-59a0-4c3f-9a0d-6e1e5c7d8f90").unwrap();
        let id = TradeId::from(uuid);
        assert_eq!(format!("{}", id), "6c3e4b8a-59a0-4c3f-9a0d-6e1e5c7d8f90");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"6c3e4b8a-59a0-4c3f-9a0d-6e1e5c7d8f90\""
        );
    }

    #[test]
    fn state_phases() {
        assert!(TradeState::TakerSentDepositTx.is_before_deposit_published());
        assert!(!TradeState::MakerSentDepositSignatures.is_before_deposit_published());
        assert!(!TradeState::TakerReceivedDepositSignatures.is_before_deposit_published());
        assert!(TradeState::DepositConfirmed.is_escrow_locked());
        assert!(!TradeState::PayoutPublished.is_escrow_locked());
        assert!(TradeState::Canceled.is_closed());
        assert!(!TradeState::DisputeOpened.is_closed());
    }
}
