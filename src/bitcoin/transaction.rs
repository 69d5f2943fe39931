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

//! Single input transactions spending a script output, wrapped around a partially signed
//! transaction. The sub-transaction type decides how the final witness is assembled from the
//! collected signatures.

use std::fmt::Debug;
use std::marker::PhantomData;

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{EcdsaSighashType, OutPoint, Transaction, TxOut};
use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::{Amount, EcdsaSig, PublicKey, Txid};

use crate::bitcoin::signing::{self, TxInRef};
use crate::transaction::Error;

/// An output that can be consumed by the next transaction of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataOutput {
    /// Reference to the output.
    pub out_point: OutPoint,
    /// The output itself.
    pub tx_out: TxOut,
    /// The witness script locking the output.
    pub script_pubkey: Option<Script>,
}

impl MetadataOutput {
    /// Value of the output.
    pub fn value(&self) -> Amount {
        Amount::from_sat(self.tx_out.value)
    }
}

/// Assembles the final witness of a sub-transaction from its partial signatures.
pub trait SubTransaction: Debug {
    /// Set the final script witness of the input.
    fn finalize(psbt: &mut PartiallySignedTransaction) -> Result<(), Error>;
}

/// A single input transaction of type `T`.
#[derive(Debug, Clone)]
pub struct Tx<T: SubTransaction> {
    pub(crate) psbt: PartiallySignedTransaction,
    pub(crate) _t: PhantomData<T>,
}

impl<T> Tx<T>
where
    T: SubTransaction,
{
    pub(crate) fn from_unsigned(unsigned_tx: Transaction, prev: &MetadataOutput) -> Result<Self, Error> {
        let mut psbt = PartiallySignedTransaction::from_unsigned_tx(unsigned_tx)?;
        psbt.inputs[0].witness_utxo = Some(prev.tx_out.clone());
        psbt.inputs[0].witness_script = prev.script_pubkey.clone();
        Ok(Tx {
            psbt,
            _t: PhantomData,
        })
    }

    /// Borrow the partially signed transaction.
    pub fn as_partial(&self) -> &PartiallySignedTransaction {
        &self.psbt
    }

    /// The unsigned transaction.
    pub fn unsigned_tx(&self) -> &Transaction {
        &self.psbt.unsigned_tx
    }

    /// Id of the transaction, not malleable as the only input is SegWit.
    pub fn txid(&self) -> Txid {
        self.psbt.unsigned_tx.txid()
    }

    /// Value of the first output.
    pub fn output_amount(&self) -> Amount {
        Amount::from_sat(self.psbt.unsigned_tx.output[0].value)
    }

    /// The first output, consumable by the next transaction.
    pub fn consumable_output(&self) -> MetadataOutput {
        MetadataOutput {
            out_point: OutPoint::new(self.txid(), 0),
            tx_out: self.psbt.unsigned_tx.output[0].clone(),
            script_pubkey: self.psbt.outputs[0].witness_script.clone(),
        }
    }

    /// The [`BIP-143`][bip-143] sighash of the input, to be signed by each required key.
    ///
    /// [bip-143]: https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki
    pub fn signature_hash(&self) -> Result<Sha256dHash, Error> {
        let witness_utxo = self.psbt.inputs[0]
            .witness_utxo
            .as_ref()
            .ok_or(Error::MissingWitness)?;
        let script = self.psbt.inputs[0]
            .witness_script
            .as_ref()
            .ok_or(Error::MissingWitness)?;
        signing::signature_hash(
            TxInRef::new(&self.psbt.unsigned_tx, 0),
            script,
            witness_utxo.value,
            EcdsaSighashType::All,
        )
    }

    /// Verify the signature against the sighash and add it to the partial signatures.
    pub fn add_signature(&mut self, pubkey: PublicKey, sig: Signature) -> Result<(), Error> {
        signing::verify_hash(self.signature_hash()?, &sig, &pubkey)
            .map_err(|_| Error::InvalidSignature(0))?;
        self.psbt.inputs[0].partial_sigs.insert(
            pubkey,
            EcdsaSig {
                sig,
                hash_ty: EcdsaSighashType::All,
            },
        );
        Ok(())
    }

    /// Build the final witness from the collected signatures.
    pub fn finalize(&mut self) -> Result<(), Error> {
        T::finalize(&mut self.psbt)
    }

    /// Extract the signed transaction, fails if not finalized.
    pub fn extract(&self) -> Result<Transaction, Error> {
        if self.psbt.inputs[0].final_script_witness.is_none() {
            return Err(Error::MissingWitness);
        }
        Ok(self.psbt.clone().extract_tx())
    }
}

/// Find the signature of `pubkey` in the partial signatures of the first input.
pub(crate) fn partial_sig(
    psbt: &PartiallySignedTransaction,
    pubkey: &PublicKey,
) -> Result<Signature, Error> {
    psbt.inputs[0]
        .partial_sigs
        .get(pubkey)
        .map(|s| s.sig)
        .ok_or(Error::MissingSignature)
}
