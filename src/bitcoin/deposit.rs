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

//! The deposit transaction, funded by both parties, locking the trade amount and the security
//! deposits into the 2-of-2 escrow output.
//!
//! Layout: maker inputs then taker inputs; output 0 is the escrow output, followed by the maker
//! change and the taker change when they are above dust. Every input is a P2WPKH output so the
//! transaction id is known before any signature is exchanged.

use std::ops::Range;

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{OutPoint, Transaction, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::{Amount, Txid};

use crate::bitcoin::input::{self, ChangeOutput, RawTransactionInput};
use crate::bitcoin::multisig::MultisigKeys;
use crate::bitcoin::transaction::MetadataOutput;
use crate::bitcoin::signing;
use crate::transaction::Error;

/// The inputs and change of one party.
#[derive(Debug, Clone, Copy)]
pub struct Contribution<'a> {
    /// Inputs funding the contribution.
    pub inputs: &'a [RawTransactionInput],
    /// Change returned to the party, if above dust.
    pub change: Option<&'a ChangeOutput>,
}

/// The deposit transaction at any stage: unsigned, partially or fully signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositTx(Transaction);

impl DepositTx {
    /// Build the unsigned deposit transaction. Fails if an input is not P2WPKH or if the inputs
    /// do not cover the escrow output and the changes.
    pub fn initialize(
        maker: Contribution,
        taker: Contribution,
        keys: &MultisigKeys,
        escrow_amount: Amount,
    ) -> Result<Self, Error> {
        input::validate_segwit(maker.inputs)?;
        input::validate_segwit(taker.inputs).map_err(|e| match e {
            Error::NonSegwitInput { index } => Error::NonSegwitInput {
                index: index + maker.inputs.len(),
            },
            e => e,
        })?;

        let funding = input::sum(maker.inputs)?
            .checked_add(input::sum(taker.inputs)?)
            .ok_or(Error::AmountOverflow)?;
        let spent = [maker.change, taker.change]
            .iter()
            .flatten()
            .try_fold(escrow_amount, |acc, c| acc.checked_add(c.value))
            .ok_or(Error::AmountOverflow)?;
        if funding < spent {
            return Err(Error::NotEnoughAssets);
        }

        let mut output = vec![TxOut {
            value: escrow_amount.as_sat(),
            script_pubkey: keys.script_pubkey(),
        }];
        output.extend(
            [maker.change, taker.change]
                .iter()
                .flatten()
                .map(|c| c.to_tx_out()),
        );

        Ok(Self(Transaction {
            version: 2,
            lock_time: 0,
            input: maker
                .inputs
                .iter()
                .chain(taker.inputs.iter())
                .map(RawTransactionInput::to_tx_in)
                .collect(),
            output,
        }))
    }

    /// Wrap a transaction received from the counterparty.
    pub fn from_tx(tx: Transaction) -> Self {
        Self(tx)
    }

    /// Borrow the inner transaction.
    pub fn as_tx(&self) -> &Transaction {
        &self.0
    }

    /// Mutably borrow the inner transaction, for the wallet to sign its inputs.
    pub fn as_tx_mut(&mut self) -> &mut Transaction {
        &mut self.0
    }

    /// Consume and return the inner transaction.
    pub fn into_tx(self) -> Transaction {
        self.0
    }

    /// Id of the transaction, identical at every signing stage.
    pub fn txid(&self) -> Txid {
        self.0.txid()
    }

    /// The escrow output spent by the payout or the warning transaction.
    pub fn escrow_output(&self, keys: &MultisigKeys) -> Result<MetadataOutput, Error> {
        let tx_out = self
            .0
            .output
            .get(0)
            .cloned()
            .ok_or(Error::WrongTemplate("Missing escrow output"))?;
        if tx_out.script_pubkey != keys.script_pubkey() {
            return Err(Error::WrongTemplate("Escrow output does not match the keys"));
        }
        Ok(MetadataOutput {
            out_point: OutPoint::new(self.txid(), 0),
            tx_out,
            script_pubkey: Some(keys.redeem_script()),
        })
    }

    /// A copy without any witness or input script, carrying no signature of anybody.
    pub fn stripped(&self) -> Self {
        let mut tx = self.0.clone();
        for txin in tx.input.iter_mut() {
            txin.script_sig = Script::default();
            txin.witness = Witness::new();
        }
        Self(tx)
    }

    /// A copy where the inputs in `range` carry no witness.
    pub fn with_blanked_inputs(&self, range: Range<usize>) -> Self {
        let mut tx = self.0.clone();
        for txin in tx.input.iter_mut().skip(range.start).take(range.len()) {
            txin.script_sig = Script::default();
            txin.witness = Witness::new();
        }
        Self(tx)
    }

    /// True if at least one input carries a witness.
    pub fn has_any_witness(&self) -> bool {
        self.0.input.iter().any(|i| !i.witness.is_empty())
    }

    /// True if every input carries a witness.
    pub fn is_fully_signed(&self) -> bool {
        self.0.input.iter().all(|i| !i.witness.is_empty())
    }

    /// The witnesses of the inputs in `range`, fails if one is missing.
    pub fn input_witnesses(&self, range: Range<usize>) -> Result<Vec<Witness>, Error> {
        if range.end > self.0.input.len() {
            return Err(Error::InputCountMismatch {
                expected: range.end,
                found: self.0.input.len(),
            });
        }
        self.0.input[range]
            .iter()
            .map(|i| {
                if i.witness.is_empty() {
                    Err(Error::MissingWitness)
                } else {
                    Ok(i.witness.clone())
                }
            })
            .collect()
    }

    /// Check the transaction spends exactly `expected` inputs.
    pub fn check_input_count(&self, expected: usize) -> Result<(), Error> {
        match self.0.input.len() {
            found if found == expected => Ok(()),
            found => Err(Error::InputCountMismatch { expected, found }),
        }
    }

    /// Set the witnesses released by the counterparty on the inputs starting at `offset`.
    pub fn combine(&self, witnesses: Vec<Witness>, offset: usize) -> Result<Self, Error> {
        let mut tx = self.0.clone();
        if offset + witnesses.len() > tx.input.len() {
            return Err(Error::InputCountMismatch {
                expected: offset + witnesses.len(),
                found: tx.input.len(),
            });
        }
        for (txin, witness) in tx.input.iter_mut().skip(offset).zip(witnesses) {
            txin.witness = witness;
        }
        Ok(Self(tx))
    }

    /// Verify the transaction, stripped of any signature, is the one built locally from the
    /// agreed inputs, outputs and amounts.
    pub fn verify_template(&self, expected: &DepositTx, escrow_amount: Amount) -> Result<(), Error> {
        let found = self.0.output.get(0).map(|o| o.value).unwrap_or(0);
        if found != escrow_amount.as_sat() {
            return Err(Error::MultisigAmountMismatch {
                expected: escrow_amount.as_sat(),
                found,
            });
        }
        self.check_input_count(expected.0.input.len())?;
        if self.stripped() != expected.stripped() {
            return Err(Error::WrongTemplate(
                "Deposit does not match the agreed inputs and outputs",
            ));
        }
        Ok(())
    }

    /// Verify the P2WPKH signatures of the inputs starting at `offset` spending `prevouts`.
    pub fn verify_inputs(&self, offset: usize, prevouts: &[RawTransactionInput]) -> Result<(), Error> {
        prevouts
            .iter()
            .enumerate()
            .try_for_each(|(i, prevout)| signing::verify_p2wpkh_input(&self.0, offset + i, prevout))
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::blockdata::transaction::EcdsaSighashType;
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::{Address, Network, PublicKey};

    use super::*;
    use crate::bitcoin::signing::{p2wpkh_script_code, p2wpkh_witness, sign_input, TxInRef};

    struct Party {
        sk: SecretKey,
        pk: PublicKey,
        inputs: Vec<RawTransactionInput>,
        change: ChangeOutput,
    }

    fn party(byte: u8, value: u64, change: u64) -> Party {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        let pk = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk));
        let inputs = vec![RawTransactionInput {
            outpoint: OutPoint::new(Txid::hash(&[byte]), 0),
            value: Amount::from_sat(value),
            script_pubkey: Script::new_v0_p2wpkh(&pk.wpubkey_hash().unwrap()),
        }];
        let change = ChangeOutput {
            address: Address::p2wpkh(&pk, Network::Regtest).unwrap(),
            value: Amount::from_sat(change),
        };
        Party {
            sk,
            pk,
            inputs,
            change,
        }
    }

    fn sign(tx: &mut DepositTx, offset: usize, party: &Party) {
        let secp = Secp256k1::new();
        for (i, prevout) in party.inputs.iter().enumerate() {
            let sig = sign_input(
                &secp,
                TxInRef::new(tx.as_tx(), offset + i),
                &p2wpkh_script_code(&party.pk),
                prevout.value.as_sat(),
                EcdsaSighashType::All,
                &party.sk,
            )
            .unwrap();
            tx.as_tx_mut().input[offset + i].witness = p2wpkh_witness(sig, &party.pk);
        }
    }

    fn setup() -> (Party, Party, MultisigKeys, DepositTx) {
        let maker = party(1, 400_000, 250_000);
        let taker = party(2, 1_500_000, 346_000);
        let keys = MultisigKeys {
            buyer: maker.pk,
            seller: taker.pk,
        };
        let tx = DepositTx::initialize(
            Contribution {
                inputs: &maker.inputs,
                change: Some(&maker.change),
            },
            Contribution {
                inputs: &taker.inputs,
                change: Some(&taker.change),
            },
            &keys,
            Amount::from_sat(1_302_000),
        )
        .unwrap();
        (maker, taker, keys, tx)
    }

    #[test]
    fn layout() {
        let (maker, _, keys, tx) = setup();
        let tx_ref = tx.as_tx();
        assert_eq!(tx_ref.input.len(), 2);
        assert_eq!(tx_ref.input[0].previous_output, maker.inputs[0].outpoint);
        assert_eq!(tx_ref.output.len(), 3);
        assert_eq!(tx_ref.output[0].value, 1_302_000);
        assert_eq!(tx_ref.output[0].script_pubkey, keys.script_pubkey());
        assert_eq!(tx_ref.output[1].value, 250_000);
        let escrow = tx.escrow_output(&keys).unwrap();
        assert_eq!(escrow.out_point, OutPoint::new(tx.txid(), 0));
        assert_eq!(escrow.value(), Amount::from_sat(1_302_000));
    }

    #[test]
    fn stripped_deposit_carries_no_signature() {
        let (maker, taker, _, mut tx) = setup();
        sign(&mut tx, 0, &maker);
        assert!(tx.has_any_witness());
        let sent = tx.stripped();
        assert!(!sent.has_any_witness());
        assert_eq!(sent.txid(), tx.txid());
        // the receiver cannot finalize from what it received
        let mut received = sent.clone();
        sign(&mut received, 1, &taker);
        assert!(!received.is_fully_signed());
        assert!(received.input_witnesses(0..1).is_err());
        assert!(received.verify_inputs(0, &maker.inputs).is_err());
    }

    #[test]
    fn combine_and_verify() {
        let (maker, taker, _, tx) = setup();
        let mut maker_signed = tx.clone();
        sign(&mut maker_signed, 0, &maker);
        let mut taker_signed = tx.stripped();
        sign(&mut taker_signed, 1, &taker);

        let released = maker_signed.input_witnesses(0..1).unwrap();
        let final_tx = taker_signed.combine(released, 0).unwrap();
        final_tx.check_input_count(2).unwrap();
        assert!(final_tx.is_fully_signed());
        final_tx.verify_inputs(0, &maker.inputs).unwrap();
        final_tx.verify_inputs(1, &taker.inputs).unwrap();
        assert!(matches!(
            final_tx.check_input_count(3),
            Err(Error::InputCountMismatch {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn template_mismatch() {
        let (maker, taker, keys, tx) = setup();
        assert!(tx.verify_template(&tx, Amount::from_sat(1_302_000)).is_ok());
        assert!(matches!(
            tx.verify_template(&tx, Amount::from_sat(1_301_000)),
            Err(Error::MultisigAmountMismatch { .. })
        ));
        let other = DepositTx::initialize(
            Contribution {
                inputs: &maker.inputs,
                change: None,
            },
            Contribution {
                inputs: &taker.inputs,
                change: Some(&taker.change),
            },
            &keys,
            Amount::from_sat(1_302_000),
        )
        .unwrap();
        assert!(matches!(
            other.verify_template(&tx, Amount::from_sat(1_302_000)),
            Err(Error::WrongTemplate(_))
        ));
    }

    #[test]
    fn legacy_input_is_rejected_before_building() {
        let maker = party(1, 400_000, 250_000);
        let mut taker = party(2, 1_500_000, 346_000);
        taker.inputs[0].script_pubkey = Script::new_p2pkh(&taker.pk.pubkey_hash());
        let keys = MultisigKeys {
            buyer: maker.pk,
            seller: taker.pk,
        };
        let res = DepositTx::initialize(
            Contribution {
                inputs: &maker.inputs,
                change: None,
            },
            Contribution {
                inputs: &taker.inputs,
                change: None,
            },
            &keys,
            Amount::from_sat(1_302_000),
        );
        assert!(matches!(res, Err(Error::NonSegwitInput { index: 1 })));
    }

    #[test]
    fn not_enough_funds() {
        let maker = party(1, 100_000, 0);
        let taker = party(2, 100_000, 0);
        let keys = MultisigKeys {
            buyer: maker.pk,
            seller: taker.pk,
        };
        let res = DepositTx::initialize(
            Contribution {
                inputs: &maker.inputs,
                change: None,
            },
            Contribution {
                inputs: &taker.inputs,
                change: None,
            },
            &keys,
            Amount::from_sat(1_302_000),
        );
        assert!(matches!(res, Err(Error::NotEnoughAssets)));
    }
}
