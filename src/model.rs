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

//! The process model of a trade: what this party produced and what it learned from the trading
//! peer. Peer data can only be written through a [`PeerWriter`], obtained after checking the
//! message belongs to this trade, and every peer field is written at most once.

use bitcoin::blockdata::witness::Witness;
use bitcoin::hashes::sha256;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{Address, PublicKey, Transaction, Txid};
use thiserror::Error;
use uuid::Uuid;

use crate::bitcoin::fee::SatPerVByte;
use crate::bitcoin::input::{ChangeOutput, RawTransactionInput};
use crate::bitcoin::timelock::CSVTimelock;
use crate::bitcoin::DepositTx;
use crate::message::TradeMessage;
use crate::trade::TradeId;
use crate::FailureKind;

/// Errors raised when accessing the process model.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The message is for another trade.
    #[error("Trade id mismatch: expected {expected}, found {found}")]
    TradeIdMismatch {
        /// Id of this trade.
        expected: TradeId,
        /// Id carried by the message.
        found: TradeId,
    },
    /// A write-once peer field already holds a different value.
    #[error("Peer field {0} is already set to a different value")]
    AlreadySet(&'static str),
    /// Data required by the current step is not in the model.
    #[error("Missing {0} in the process model")]
    Missing(&'static str),
}

impl Error {
    /// Return the category of the failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::TradeIdMismatch { .. } => FailureKind::Desync,
            Self::AlreadySet(_) | Self::Missing(_) => FailureKind::Validation,
        }
    }
}

fn write_once<T: PartialEq>(slot: &mut Option<T>, value: T, field: &'static str) -> Result<(), Error> {
    match slot {
        Some(current) if *current == value => Ok(()),
        Some(_) => Err(Error::AlreadySet(field)),
        None => {
            *slot = Some(value);
            Ok(())
        }
    }
}

/// What the protocol learned from the counterparty. Read-only outside of [`PeerWriter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPeer {
    multisig_pubkey: Option<PublicKey>,
    inputs: Option<Vec<RawTransactionInput>>,
    change: Option<ChangeOutput>,
    payout_address: Option<Address>,
    fee_tx_id: Option<Txid>,
    deposit_tx: Option<DepositTx>,
    deposit_witnesses: Option<Vec<Witness>>,
    payout_signature: Option<Signature>,
    warning_signature: Option<Signature>,
    contract_hash: Option<sha256::Hash>,
}

impl TradingPeer {
    /// Multisig key advertised by the peer.
    pub fn multisig_pubkey(&self) -> Option<&PublicKey> {
        self.multisig_pubkey.as_ref()
    }

    /// Inputs disclosed by the peer to fund the deposit.
    pub fn inputs(&self) -> Option<&[RawTransactionInput]> {
        self.inputs.as_deref()
    }

    /// Change output of the peer, absent if below dust or if the inputs are not received yet.
    pub fn change(&self) -> Option<&ChangeOutput> {
        self.change.as_ref()
    }

    /// Payout address of the peer.
    pub fn payout_address(&self) -> Option<&Address> {
        self.payout_address.as_ref()
    }

    /// Trade fee transaction id of the peer.
    pub fn fee_tx_id(&self) -> Option<Txid> {
        self.fee_tx_id
    }

    /// Deposit transaction as sent by the peer, without any of its signatures.
    pub fn deposit_tx(&self) -> Option<&DepositTx> {
        self.deposit_tx.as_ref()
    }

    /// Deposit input witnesses released by the peer.
    pub fn deposit_witnesses(&self) -> Option<&[Witness]> {
        self.deposit_witnesses.as_deref()
    }

    /// Payout signature of the peer.
    pub fn payout_signature(&self) -> Option<&Signature> {
        self.payout_signature.as_ref()
    }

    /// Signature of the peer on our warning transaction.
    pub fn warning_signature(&self) -> Option<&Signature> {
        self.warning_signature.as_ref()
    }

    /// Contract hash computed by the peer.
    pub fn contract_hash(&self) -> Option<&sha256::Hash> {
        self.contract_hash.as_ref()
    }
}

/// Write access to the [`TradingPeer`] of a trade, for one message.
#[derive(Debug)]
pub struct PeerWriter<'a> {
    peer: &'a mut TradingPeer,
}

impl<'a> PeerWriter<'a> {
    /// Set the peer multisig key.
    pub fn set_multisig_pubkey(&mut self, key: PublicKey) -> Result<(), Error> {
        write_once(&mut self.peer.multisig_pubkey, key, "multisig_pubkey")
    }

    /// Set the peer inputs and change, validated by the caller.
    pub fn set_inputs(
        &mut self,
        inputs: Vec<RawTransactionInput>,
        change: Option<ChangeOutput>,
    ) -> Result<(), Error> {
        if self.peer.inputs.is_some() && self.peer.change != change {
            return Err(Error::AlreadySet("change"));
        }
        write_once(&mut self.peer.inputs, inputs, "inputs")?;
        self.peer.change = change;
        Ok(())
    }

    /// Set the peer payout address.
    pub fn set_payout_address(&mut self, address: Address) -> Result<(), Error> {
        write_once(&mut self.peer.payout_address, address, "payout_address")
    }

    /// Set the peer fee transaction id.
    pub fn set_fee_tx_id(&mut self, txid: Txid) -> Result<(), Error> {
        write_once(&mut self.peer.fee_tx_id, txid, "fee_tx_id")
    }

    /// Set the deposit transaction sent by the peer.
    pub fn set_deposit_tx(&mut self, tx: DepositTx) -> Result<(), Error> {
        write_once(&mut self.peer.deposit_tx, tx, "deposit_tx")
    }

    /// Set the deposit input witnesses released by the peer.
    pub fn set_deposit_witnesses(&mut self, witnesses: Vec<Witness>) -> Result<(), Error> {
        write_once(&mut self.peer.deposit_witnesses, witnesses, "deposit_witnesses")
    }

    /// Set the peer payout signature, verified by the caller.
    pub fn set_payout_signature(&mut self, sig: Signature) -> Result<(), Error> {
        write_once(&mut self.peer.payout_signature, sig, "payout_signature")
    }

    /// Set the peer signature on our warning transaction, verified by the caller.
    pub fn set_warning_signature(&mut self, sig: Signature) -> Result<(), Error> {
        write_once(&mut self.peer.warning_signature, sig, "warning_signature")
    }

    /// Set the contract hash computed by the peer.
    pub fn set_contract_hash(&mut self, hash: sha256::Hash) -> Result<(), Error> {
        write_once(&mut self.peer.contract_hash, hash, "contract_hash")
    }
}

/// Data produced and received while executing the protocol of one trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModel {
    trade_id: TradeId,
    /// Own multisig key, as advertised to the peer.
    pub multisig_pubkey: Option<PublicKey>,
    /// Own payout address.
    pub payout_address: Option<Address>,
    /// Own inputs reserved for the deposit.
    pub inputs: Vec<RawTransactionInput>,
    /// Own change output of the deposit.
    pub change: Option<ChangeOutput>,
    /// Own trade fee transaction id.
    pub fee_tx_id: Option<Txid>,
    /// Deposit transaction without any signature, as agreed.
    pub prepared_deposit: Option<DepositTx>,
    /// Deposit transaction with only our input signatures, never sent.
    pub own_signed_deposit: Option<DepositTx>,
    /// Fully signed deposit transaction.
    pub final_deposit: Option<DepositTx>,
    /// Own payout signature.
    pub payout_signature: Option<Signature>,
    /// Fully signed payout transaction.
    pub payout_tx: Option<Transaction>,
    /// Fee rate of the warning transactions, chosen by the maker.
    pub escalation_fee_rate: Option<SatPerVByte>,
    /// Relative timelock of the warning outputs.
    pub claim_delay: Option<CSVTimelock>,
    /// Our signature on the warning transaction of the peer.
    pub peer_warning_signature: Option<Signature>,
    /// Fully signed own warning transaction, once escalated.
    pub warning_tx: Option<Transaction>,
    /// Signed claim transaction.
    pub claim_tx: Option<Transaction>,
    /// Own contract hash.
    pub contract_hash: Option<sha256::Hash>,
    /// Last message sent to the peer, resent as is when resuming.
    pub last_sent: Option<TradeMessage>,
    processed_messages: Vec<Uuid>,
    peer: TradingPeer,
}

impl ProcessModel {
    /// An empty process model for the trade `trade_id`.
    pub fn new(trade_id: TradeId) -> Self {
        Self {
            trade_id,
            multisig_pubkey: None,
            payout_address: None,
            inputs: vec![],
            change: None,
            fee_tx_id: None,
            prepared_deposit: None,
            own_signed_deposit: None,
            final_deposit: None,
            payout_signature: None,
            payout_tx: None,
            escalation_fee_rate: None,
            claim_delay: None,
            peer_warning_signature: None,
            warning_tx: None,
            claim_tx: None,
            contract_hash: None,
            last_sent: None,
            processed_messages: vec![],
            peer: TradingPeer::default(),
        }
    }

    /// Id of the trade owning this model.
    pub fn trade_id(&self) -> TradeId {
        self.trade_id
    }

    /// Read access to the trading peer.
    pub fn peer(&self) -> &TradingPeer {
        &self.peer
    }

    /// Write access to the trading peer for a message carrying `trade_id`.
    pub fn peer_writer(&mut self, trade_id: TradeId) -> Result<PeerWriter, Error> {
        if trade_id != self.trade_id {
            return Err(Error::TradeIdMismatch {
                expected: self.trade_id,
                found: trade_id,
            });
        }
        Ok(PeerWriter {
            peer: &mut self.peer,
        })
    }

    /// True if the message `uid` was already processed.
    pub fn is_processed(&self, uid: &Uuid) -> bool {
        self.processed_messages.contains(uid)
    }

    /// Remember the message `uid` as processed.
    pub fn mark_processed(&mut self, uid: Uuid) {
        if !self.is_processed(&uid) {
            self.processed_messages.push(uid);
        }
    }

    /// Remember the messages processed by a previous attempt of the same trade.
    pub fn inherit_processed(&mut self, previous: &ProcessModel) {
        for uid in previous.processed_messages.iter() {
            self.mark_processed(*uid);
        }
    }
}

/// Unwrap a model field required by the current step.
pub fn required<T>(value: Option<T>, field: &'static str) -> Result<T, Error> {
    value.ok_or(Error::Missing(field))
}
