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

//! In-memory collaborators, used by the tests and as reference implementations.
//!
//! Wallets of both parties share a [`MemoryChain`]: a list of accepted transactions with their
//! confirmation count. The chain rejects double spends, transactions with an empty input witness
//! and spends of relative timelocked outputs that did not mature, it does not execute scripts.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::EcdsaSighashType;
use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use bitcoin::{Address, Amount, Network, OutPoint, PublicKey, Transaction, Txid};
use tracing::debug;

use crate::bitcoin::amount;
use crate::bitcoin::fee::{FeeQuote, SatPerVByte};
use crate::bitcoin::input::RawTransactionInput;
use crate::bitcoin::signing::{self, TxInRef};
use crate::message::TradeMessage;
use crate::offer::{self, Offer};
use crate::services::{
    AddressContext, AddressEntry, NetworkError, OfferBook, Wallet, WalletError,
};
use crate::trade::{NodeAddress, TradeId};
use crate::transaction;

/// A chain shared by several wallets.
pub type SharedChain = Rc<RefCell<MemoryChain>>;

#[derive(Debug, Clone)]
struct ChainTx {
    tx: Transaction,
    confirmations: u32,
}

const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

/// Accepted transactions and their confirmations.
#[derive(Debug, Default)]
pub struct MemoryChain {
    txs: Vec<ChainTx>,
}

impl MemoryChain {
    /// Create an empty chain shared between wallets.
    pub fn shared() -> SharedChain {
        Rc::new(RefCell::new(Self::default()))
    }

    fn get(&self, txid: &Txid) -> Option<&ChainTx> {
        self.txs.iter().find(|t| t.tx.txid() == *txid)
    }

    /// Return the transaction if accepted.
    pub fn transaction(&self, txid: &Txid) -> Option<Transaction> {
        self.get(txid).map(|t| t.tx.clone())
    }

    /// Return the confirmations of the transaction if accepted.
    pub fn confirmations(&self, txid: &Txid) -> Option<u32> {
        self.get(txid).map(|t| t.confirmations)
    }

    /// Number of accepted transactions.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Return true if no transaction was accepted.
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Mine `blocks` blocks containing every accepted transaction.
    pub fn mine(&mut self, blocks: u32) {
        for t in self.txs.iter_mut() {
            t.confirmations = t.confirmations.saturating_add(blocks);
        }
    }

    /// Accept a transaction, returns false if it was already accepted.
    pub fn submit(&mut self, tx: &Transaction) -> Result<bool, String> {
        let txid = tx.txid();
        if self.get(&txid).is_some() {
            return Ok(false);
        }
        if let Some(i) = tx.input.iter().position(|i| i.witness.is_empty()) {
            return Err(format!("input {} has no witness", i));
        }
        for txin in tx.input.iter() {
            let double_spend = self
                .txs
                .iter()
                .flat_map(|t| t.tx.input.iter())
                .any(|i| i.previous_output == txin.previous_output);
            if double_spend {
                return Err(format!("{} already spent", txin.previous_output));
            }
            if tx.version >= 2 && txin.sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG == 0 {
                let lock = txin.sequence & SEQUENCE_LOCKTIME_MASK;
                let confirmations = self
                    .confirmations(&txin.previous_output.txid)
                    .unwrap_or(u32::MAX);
                if confirmations < lock {
                    return Err("non-BIP68-final".to_string());
                }
            }
        }
        self.txs.push(ChainTx {
            tx: tx.clone(),
            confirmations: 0,
        });
        Ok(true)
    }
}

#[derive(Debug, Clone)]
struct Utxo {
    input: RawTransactionInput,
    confirmations: u32,
}

/// A deterministic wallet holding P2WPKH and legacy outputs.
#[derive(Debug)]
pub struct MemoryWallet {
    network: Network,
    chain: SharedChain,
    secp: Secp256k1<All>,
    seed: u8,
    keys: Vec<(SecretKey, PublicKey)>,
    funded: Vec<RawTransactionInput>,
    entries: BTreeMap<(TradeId, AddressContext), AddressEntry>,
    reservations: HashMap<OutPoint, TradeId>,
    fee_quote: Option<FeeQuote>,
    rejection: Option<String>,
    broadcasts: usize,
}

impl MemoryWallet {
    /// Create a wallet deriving its keys from `seed`.
    pub fn new(seed: u8, network: Network, chain: SharedChain) -> Self {
        Self {
            network,
            chain,
            secp: Secp256k1::new(),
            seed,
            keys: vec![],
            funded: vec![],
            entries: BTreeMap::new(),
            reservations: HashMap::new(),
            fee_quote: Some(FeeQuote {
                rate: SatPerVByte::from_sat(10),
                age_secs: 0,
            }),
            rejection: None,
            broadcasts: 0,
        }
    }

    fn next_key(&mut self) -> Result<(SecretKey, PublicKey), WalletError> {
        let mut preimage = vec![self.seed];
        preimage.extend_from_slice(&(self.keys.len() as u64).to_le_bytes());
        let sk = SecretKey::from_slice(&sha256::Hash::hash(&preimage)[..])
            .map_err(transaction::Error::from)?;
        let pk = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(
            &self.secp, &sk,
        ));
        self.keys.push((sk, pk));
        Ok((sk, pk))
    }

    fn p2wpkh(pubkey: &PublicKey) -> Result<Script, WalletError> {
        let wpkh = pubkey
            .wpubkey_hash()
            .ok_or(transaction::Error::MissingPublicKey)?;
        Ok(Script::new_v0_p2wpkh(&wpkh))
    }

    fn fund_with(&mut self, value: Amount, legacy: bool) -> Result<OutPoint, WalletError> {
        let (_, pk) = self.next_key()?;
        let script_pubkey = if legacy {
            Script::new_p2pkh(&pk.pubkey_hash())
        } else {
            Self::p2wpkh(&pk)?
        };
        let outpoint = OutPoint::new(Txid::hash(&pk.to_bytes()), 0);
        self.funded.push(RawTransactionInput {
            outpoint,
            value,
            script_pubkey,
        });
        Ok(outpoint)
    }

    /// Add a confirmed P2WPKH output of `value` to the wallet.
    pub fn fund(&mut self, value: Amount) -> Result<OutPoint, WalletError> {
        self.fund_with(value, false)
    }

    /// Add a confirmed legacy P2PKH output of `value` to the wallet.
    pub fn fund_legacy(&mut self, value: Amount) -> Result<OutPoint, WalletError> {
        self.fund_with(value, true)
    }

    fn secret_for_script(&self, script: &Script) -> Option<(SecretKey, PublicKey, bool)> {
        self.keys.iter().find_map(|(sk, pk)| {
            let segwit = pk
                .wpubkey_hash()
                .map(|h| Script::new_v0_p2wpkh(&h) == *script)
                .unwrap_or(false);
            if segwit {
                Some((*sk, *pk, true))
            } else if Script::new_p2pkh(&pk.pubkey_hash()) == *script {
                Some((*sk, *pk, false))
            } else {
                None
            }
        })
    }

    fn unspent(&self) -> Vec<Utxo> {
        let chain = self.chain.borrow();
        let spent: HashSet<OutPoint> = chain
            .txs
            .iter()
            .flat_map(|t| t.tx.input.iter().map(|i| i.previous_output))
            .collect();
        let mut utxos: Vec<Utxo> = self
            .funded
            .iter()
            .map(|input| Utxo {
                input: input.clone(),
                confirmations: u32::MAX,
            })
            .collect();
        for t in chain.txs.iter() {
            let txid = t.tx.txid();
            for (vout, out) in t.tx.output.iter().enumerate() {
                if self.secret_for_script(&out.script_pubkey).is_some() {
                    utxos.push(Utxo {
                        input: RawTransactionInput {
                            outpoint: OutPoint::new(txid, vout as u32),
                            value: Amount::from_sat(out.value),
                            script_pubkey: out.script_pubkey.clone(),
                        },
                        confirmations: t.confirmations,
                    });
                }
            }
        }
        utxos.retain(|u| !spent.contains(&u.input.outpoint));
        utxos
    }

    /// Spendable balance, reserved outputs included.
    pub fn balance(&self) -> Amount {
        Amount::from_sat(self.unspent().iter().map(|u| u.input.value.as_sat()).sum())
    }

    /// Outputs currently reserved for the trade.
    pub fn reserved(&self, trade_id: TradeId) -> Vec<OutPoint> {
        let mut outpoints: Vec<OutPoint> = self
            .reservations
            .iter()
            .filter(|(_, id)| **id == trade_id)
            .map(|(o, _)| *o)
            .collect();
        outpoints.sort();
        outpoints
    }

    /// Replace the fee estimate, `None` makes estimation fail.
    pub fn set_fee_quote(&mut self, quote: Option<FeeQuote>) {
        self.fee_quote = quote;
    }

    /// Reject every following broadcast with `reason`, `None` accepts them again.
    pub fn reject_broadcasts(&mut self, reason: Option<String>) {
        self.rejection = reason;
    }

    /// Number of transactions accepted by the chain through this wallet.
    pub fn broadcast_count(&self) -> usize {
        self.broadcasts
    }

    /// Bind a fresh key to the trade entry for `context`, as if the wallet lost the previous one.
    pub fn rotate_entry(
        &mut self,
        trade_id: TradeId,
        context: AddressContext,
    ) -> Result<AddressEntry, WalletError> {
        self.entries.remove(&(trade_id, context));
        self.address_entry(trade_id, context)
    }

    /// The chain this wallet broadcasts to.
    pub fn chain(&self) -> SharedChain {
        Rc::clone(&self.chain)
    }
}

impl Wallet for MemoryWallet {
    fn network(&self) -> Network {
        self.network
    }

    fn reserve_inputs_for_trade(
        &mut self,
        trade_id: TradeId,
        amount: Amount,
    ) -> Result<Vec<RawTransactionInput>, WalletError> {
        let free: Vec<RawTransactionInput> = self
            .unspent()
            .into_iter()
            .map(|u| u.input)
            .filter(|i| !self.reservations.contains_key(&i.outpoint))
            .collect();
        let mut selected = vec![];
        let mut total = Amount::ZERO;
        for input in free.iter() {
            if total >= amount {
                break;
            }
            total = amount::checked_sum([total, input.value])?;
            selected.push(input.clone());
        }
        if total < amount {
            return Err(WalletError::InsufficientFunds {
                required: amount,
                available: total,
            });
        }
        for input in selected.iter() {
            self.reservations.insert(input.outpoint, trade_id);
        }
        debug!(%trade_id, inputs = selected.len(), "Reserved inputs");
        Ok(selected)
    }

    fn release_reservation(&mut self, trade_id: TradeId) {
        self.reservations.retain(|_, id| *id != trade_id);
    }

    fn address_entry(
        &mut self,
        trade_id: TradeId,
        context: AddressContext,
    ) -> Result<AddressEntry, WalletError> {
        if let Some(entry) = self.entries.get(&(trade_id, context)) {
            return Ok(entry.clone());
        }
        let (_, pubkey) = self.next_key()?;
        let address = Address::p2wpkh(&pubkey, self.network).map_err(transaction::Error::new)?;
        let entry = AddressEntry {
            trade_id,
            context,
            pubkey,
            address,
        };
        self.entries.insert((trade_id, context), entry.clone());
        Ok(entry)
    }

    fn sign_inputs(
        &mut self,
        tx: &mut Transaction,
        inputs: &[RawTransactionInput],
    ) -> Result<(), WalletError> {
        for input in inputs {
            let index = tx
                .input
                .iter()
                .position(|i| i.previous_output == input.outpoint)
                .ok_or(WalletError::UnknownInput(input.outpoint))?;
            let (sk, pk, segwit) = self
                .secret_for_script(&input.script_pubkey)
                .ok_or(WalletError::UnknownInput(input.outpoint))?;
            if !segwit {
                return Err(WalletError::UnsupportedInput(input.outpoint));
            }
            let sig = signing::sign_input(
                &self.secp,
                TxInRef::new(tx, index),
                &signing::p2wpkh_script_code(&pk),
                input.value.as_sat(),
                EcdsaSighashType::All,
                &sk,
            )?;
            tx.input[index].witness = signing::p2wpkh_witness(sig, &pk);
        }
        Ok(())
    }

    fn sign_hash(
        &mut self,
        trade_id: TradeId,
        context: AddressContext,
        sighash: Sha256dHash,
    ) -> Result<Signature, WalletError> {
        let entry = self.address_entry(trade_id, context)?;
        let sk = self
            .keys
            .iter()
            .find(|(_, pk)| *pk == entry.pubkey)
            .map(|(sk, _)| *sk)
            .ok_or(transaction::Error::MissingPublicKey)?;
        Ok(signing::sign_hash(sighash, &sk)?)
    }

    fn broadcast(&mut self, tx: &Transaction) -> Result<Txid, WalletError> {
        let txid = tx.txid();
        if let Some(reason) = self.rejection.clone() {
            return Err(WalletError::BroadcastRejected { txid, reason });
        }
        let accepted = self
            .chain
            .borrow_mut()
            .submit(tx)
            .map_err(|reason| WalletError::BroadcastRejected { txid, reason })?;
        if accepted {
            self.broadcasts += 1;
        }
        Ok(txid)
    }

    fn confirmations(&self, txid: &Txid) -> Option<u32> {
        self.chain.borrow().confirmations(txid)
    }

    fn transaction(&self, txid: &Txid) -> Option<Transaction> {
        self.chain.borrow().transaction(txid)
    }

    fn unconfirmed_change_count(&self) -> usize {
        self.unspent()
            .iter()
            .filter(|u| u.confirmations == 0)
            .count()
    }

    fn fee_quote(&self) -> Result<FeeQuote, WalletError> {
        self.fee_quote
            .ok_or_else(|| WalletError::FeeEstimation("no fee estimate available".into()))
    }
}

/// A network collecting sent messages in an outbox.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    outbox: VecDeque<(NodeAddress, TradeMessage)>,
    offline: bool,
}

impl MemoryNetwork {
    /// Create an online network with an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest sent message.
    pub fn pop(&mut self) -> Option<(NodeAddress, TradeMessage)> {
        self.outbox.pop_front()
    }

    /// Drop every sent message.
    pub fn clear(&mut self) {
        self.outbox.clear();
    }

    /// Number of messages waiting in the outbox.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Make every following send fail, or succeed again.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }
}

impl crate::services::Network for MemoryNetwork {
    fn send(&mut self, peer: &NodeAddress, message: TradeMessage) -> Result<(), NetworkError> {
        if self.offline {
            return Err(NetworkError::SendFailed {
                peer: peer.clone(),
                message: message.to_string(),
                reason: "peer unreachable".into(),
            });
        }
        self.outbox.push_back((peer.clone(), message));
        Ok(())
    }
}

/// The offers of a maker, kept in memory.
#[derive(Debug, Default)]
pub struct MemoryOfferBook {
    offers: BTreeMap<TradeId, Offer>,
}

impl MemoryOfferBook {
    /// Create an empty offer book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of published offers.
    pub fn len(&self) -> usize {
        self.offers.len()
    }

    /// Return true if no offer is published.
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

impl OfferBook for MemoryOfferBook {
    fn add_offer(&mut self, offer: Offer) -> Result<(), offer::Error> {
        if self.offers.contains_key(&offer.id) {
            return Err(offer::Error::AlreadyExists(offer.id));
        }
        self.offers.insert(offer.id, offer);
        Ok(())
    }

    fn remove_offer(&mut self, id: &TradeId) -> Option<Offer> {
        self.offers.remove(id)
    }

    fn restore_offer(&mut self, offer: Offer) {
        self.offers.insert(offer.id, offer);
    }

    fn find(&self, id: &TradeId) -> Option<Offer> {
        self.offers.get(id).cloned()
    }
}
