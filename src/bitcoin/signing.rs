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

//! [`BIP-143`][bip-143] signature hashes, ECDSA signing and verification of SegWit v0 inputs.
//!
//! [bip-143]: https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{EcdsaSighashType, Transaction};
use bitcoin::blockdata::witness::Witness;
use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::secp256k1::{ecdsa::Signature, Message, Secp256k1, SecretKey, Signing};
use bitcoin::util::sighash::SighashCache;
use bitcoin::{EcdsaSig, PublicKey};

use crate::bitcoin::input::RawTransactionInput;
use crate::transaction::Error;

/// A reference to an input of a transaction.
#[derive(Debug, Clone, Copy)]
pub struct TxInRef<'a> {
    /// The transaction holding the input.
    pub transaction: &'a Transaction,
    /// Index of the input.
    pub index: usize,
}

impl<'a> TxInRef<'a> {
    /// Reference the input `index` of `transaction`.
    pub fn new(transaction: &'a Transaction, index: usize) -> Self {
        Self { transaction, index }
    }
}

/// Computes the [`BIP-143`][bip-143] compliant sighash for a [`EcdsaSighashType::All`]
/// signature for the given input.
///
/// [bip-143]: https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki
pub fn signature_hash(
    txin: TxInRef,
    script_code: &Script,
    value: u64,
    sighash_type: EcdsaSighashType,
) -> Result<Sha256dHash, Error> {
    Ok(SighashCache::new(txin.transaction)
        .segwit_signature_hash(txin.index, script_code, value, sighash_type)
        .map_err(Error::new)?
        .as_hash())
}

/// Computes the [`BIP-143`][bip-143] compliant signature for the given input.
///
/// [bip-143]: https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki
pub fn sign_input<C>(
    context: &Secp256k1<C>,
    txin: TxInRef,
    script_code: &Script,
    value: u64,
    sighash_type: EcdsaSighashType,
    secret_key: &SecretKey,
) -> Result<Signature, Error>
where
    C: Signing,
{
    let sighash = signature_hash(txin, script_code, value, sighash_type)?;
    let msg = Message::from_slice(&sighash[..])?;
    let mut sig = context.sign_ecdsa(&msg, secret_key);
    sig.normalize_s();
    Ok(sig)
}

/// Computes the signature for the given hash. Assumes that the hash is correctly computed.
pub fn sign_hash(sighash: Sha256dHash, secret_key: &SecretKey) -> Result<Signature, Error> {
    let context = Secp256k1::signing_only();
    let msg = Message::from_slice(&sighash[..])?;
    let mut sig = context.sign_ecdsa(&msg, secret_key);
    sig.normalize_s();
    Ok(sig)
}

/// Verify a signature over `sighash` made with the secret key of `pubkey`.
pub fn verify_hash(
    sighash: Sha256dHash,
    signature: &Signature,
    pubkey: &PublicKey,
) -> Result<(), Error> {
    let context = Secp256k1::verification_only();
    let msg = Message::from_slice(&sighash[..])?;
    context.verify_ecdsa(&msg, signature, &pubkey.inner)?;
    Ok(())
}

/// The script code used to sign a P2WPKH input, the legacy P2PKH script of the key.
pub fn p2wpkh_script_code(pubkey: &PublicKey) -> Script {
    Script::new_p2pkh(&pubkey.pubkey_hash())
}

/// The witness spending a P2WPKH output.
pub fn p2wpkh_witness(signature: Signature, pubkey: &PublicKey) -> Witness {
    let sig = EcdsaSig {
        sig: signature,
        hash_ty: EcdsaSighashType::All,
    };
    Witness::from_vec(vec![sig.to_vec(), pubkey.to_bytes()])
}

/// Verify the witness of input `index` of `tx` spends `prevout` with a valid signature.
pub fn verify_p2wpkh_input(
    tx: &Transaction,
    index: usize,
    prevout: &RawTransactionInput,
) -> Result<(), Error> {
    let txin = tx.input.get(index).ok_or(Error::MissingWitness)?;
    let items = txin.witness.to_vec();
    if items.len() != 2 {
        return Err(Error::InvalidSignature(index));
    }
    let sig = EcdsaSig::from_slice(&items[0]).map_err(|_| Error::InvalidSignature(index))?;
    let pubkey = PublicKey::from_slice(&items[1]).map_err(|_| Error::MissingPublicKey)?;
    let wpkh = pubkey.wpubkey_hash().ok_or(Error::MissingPublicKey)?;
    if Script::new_v0_p2wpkh(&wpkh) != prevout.script_pubkey {
        return Err(Error::InvalidSignature(index));
    }
    let sighash = signature_hash(
        TxInRef::new(tx, index),
        &p2wpkh_script_code(&pubkey),
        prevout.value.as_sat(),
        sig.hash_ty,
    )?;
    verify_hash(sighash, &sig.sig, &pubkey).map_err(|_| Error::InvalidSignature(index))
}

#[cfg(test)]
mod tests {
    use bitcoin::blockdata::transaction::{OutPoint, TxOut};
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, Txid};

    use super::*;

    fn keypair(byte: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        let pk = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk));
        (sk, pk)
    }

    fn spending(prevout: &RawTransactionInput) -> Transaction {
        Transaction {
            version: 2,
            lock_time: 0,
            input: vec![prevout.to_tx_in()],
            output: vec![TxOut {
                value: 90_000,
                script_pubkey: prevout.script_pubkey.clone(),
            }],
        }
    }

    #[test]
    fn sign_and_verify_p2wpkh() {
        let (sk, pk) = keypair(3);
        let prevout = RawTransactionInput {
            outpoint: OutPoint::new(Txid::hash(b"funding"), 1),
            value: Amount::from_sat(100_000),
            script_pubkey: Script::new_v0_p2wpkh(&pk.wpubkey_hash().unwrap()),
        };
        let mut tx = spending(&prevout);
        let sig = sign_input(
            &Secp256k1::new(),
            TxInRef::new(&tx, 0),
            &p2wpkh_script_code(&pk),
            prevout.value.as_sat(),
            EcdsaSighashType::All,
            &sk,
        )
        .unwrap();
        tx.input[0].witness = p2wpkh_witness(sig, &pk);
        assert!(verify_p2wpkh_input(&tx, 0, &prevout).is_ok());

        // a signature from another key does not verify
        let (other_sk, _) = keypair(4);
        let sighash = signature_hash(
            TxInRef::new(&tx, 0),
            &p2wpkh_script_code(&pk),
            prevout.value.as_sat(),
            EcdsaSighashType::All,
        )
        .unwrap();
        let forged = sign_hash(sighash, &other_sk).unwrap();
        tx.input[0].witness = p2wpkh_witness(forged, &pk);
        assert!(matches!(
            verify_p2wpkh_input(&tx, 0, &prevout),
            Err(Error::InvalidSignature(0))
        ));
    }

    #[test]
    fn empty_witness_is_rejected() {
        let (_, pk) = keypair(5);
        let prevout = RawTransactionInput {
            outpoint: OutPoint::new(Txid::hash(b"funding"), 0),
            value: Amount::from_sat(100_000),
            script_pubkey: Script::new_v0_p2wpkh(&pk.wpubkey_hash().unwrap()),
        };
        let tx = spending(&prevout);
        assert!(verify_p2wpkh_input(&tx, 0, &prevout).is_err());
    }
}
