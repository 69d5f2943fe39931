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

//! The warning transaction moves the escrowed funds into an output both parties can still spend
//! together, or the claimant alone once the relative timelock matured.

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction, Script};
use bitcoin::blockdata::transaction::{OutPoint, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::PublicKey;

use crate::bitcoin::fee::{self, SatPerVByte};
use crate::bitcoin::multisig::MultisigKeys;
use crate::bitcoin::payout::finalize_escrow_spend;
use crate::bitcoin::timelock::CSVTimelock;
use crate::bitcoin::transaction::{MetadataOutput, SubTransaction, Tx};
use crate::bitcoin::amount::is_dust;
use crate::transaction::Error;

/// The warning output script:
///
/// ```text
/// IF 2 <buyer> <seller> 2 CHECKMULTISIG ELSE <delay> CSV DROP <claimant> CHECKSIG ENDIF
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningLock {
    /// Both escrow keys, for the cooperative branch.
    pub keys: MultisigKeys,
    /// The party allowed to claim alone after the timelock.
    pub claimant: PublicKey,
    /// Relative timelock of the claim branch.
    pub delay: CSVTimelock,
}

impl WarningLock {
    /// The witness script of the warning output.
    pub fn script(&self) -> Script {
        Builder::new()
            .push_opcode(opcodes::all::OP_IF)
            .push_opcode(opcodes::all::OP_PUSHNUM_2)
            .push_key(&self.keys.buyer)
            .push_key(&self.keys.seller)
            .push_opcode(opcodes::all::OP_PUSHNUM_2)
            .push_opcode(opcodes::all::OP_CHECKMULTISIG)
            .push_opcode(opcodes::all::OP_ELSE)
            .push_int(self.delay.as_u32().into())
            .push_opcode(opcodes::all::OP_CSV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_key(&self.claimant)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .push_opcode(opcodes::all::OP_ENDIF)
            .into_script()
    }

    /// The P2WSH script pubkey of the warning output.
    pub fn v0_p2wsh(&self) -> Script {
        self.script().to_v0_p2wsh()
    }

    /// Parse a warning script, fails if it does not follow the template.
    pub fn from_script(s: &Script) -> Result<Self, Error> {
        let mut ints = s.instructions();
        let mut next = || match ints.next() {
            Some(Ok(i)) => Ok(i),
            Some(Err(e)) => Err(Error::new(e)),
            None => Err(Error::WrongTemplate("Warning script too short")),
        };
        let op = |i: Instruction, op: opcodes::All| match i {
            Instruction::Op(o) if o == op => Ok(()),
            _ => Err(Error::WrongTemplate("Unexpected opcode in warning script")),
        };
        let key = |i: Instruction| match i {
            Instruction::PushBytes(b) => PublicKey::from_slice(b).map_err(Error::new),
            _ => Err(Error::MissingPublicKey),
        };

        op(next()?, opcodes::all::OP_IF)?;
        op(next()?, opcodes::all::OP_PUSHNUM_2)?;
        let buyer = key(next()?)?;
        let seller = key(next()?)?;
        op(next()?, opcodes::all::OP_PUSHNUM_2)?;
        op(next()?, opcodes::all::OP_CHECKMULTISIG)?;
        op(next()?, opcodes::all::OP_ELSE)?;
        let delay = match next()? {
            Instruction::PushBytes(b) => decode_script_int(b)?,
            Instruction::Op(o) => {
                let n = o.into_u8();
                let base = opcodes::all::OP_PUSHNUM_1.into_u8();
                if (base..base + 16).contains(&n) {
                    (n - base + 1) as u32
                } else {
                    return Err(Error::WrongTemplate("Missing timelock"));
                }
            }
        };
        op(next()?, opcodes::all::OP_CSV)?;
        op(next()?, opcodes::all::OP_DROP)?;
        let claimant = key(next()?)?;
        op(next()?, opcodes::all::OP_CHECKSIG)?;
        op(next()?, opcodes::all::OP_ENDIF)?;
        if next().is_ok() {
            return Err(Error::WrongTemplate("Too many opcodes"));
        }

        Ok(Self {
            keys: MultisigKeys { buyer, seller },
            claimant,
            delay: CSVTimelock::new(delay),
        })
    }

    /// The warning output of a warning transaction locked by this script.
    pub fn output_of(&self, tx: &Transaction) -> Result<MetadataOutput, Error> {
        let tx_out = tx
            .output
            .get(0)
            .cloned()
            .ok_or(Error::WrongTemplate("Missing warning output"))?;
        if tx_out.script_pubkey != self.v0_p2wsh() {
            return Err(Error::WrongTemplate("Warning output does not match the script"));
        }
        Ok(MetadataOutput {
            out_point: OutPoint::new(tx.txid(), 0),
            tx_out,
            script_pubkey: Some(self.script()),
        })
    }
}

// Minimally encoded little-endian script number, sign bit unused for timelocks.
fn decode_script_int(bytes: &[u8]) -> Result<u32, Error> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(Error::WrongTemplate("Invalid timelock encoding"));
    }
    Ok(bytes
        .iter()
        .rev()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Spends the escrow output to the warning output, signed by both parties before the deposit
/// is broadcast and finalized by the claimant when escalating.
#[derive(Debug)]
pub struct Warning;

/// The warning transaction.
pub type WarningTx = Tx<Warning>;

impl SubTransaction for Warning {
    fn finalize(psbt: &mut PartiallySignedTransaction) -> Result<(), Error> {
        finalize_escrow_spend(psbt)
    }
}

impl Tx<Warning> {
    /// Build the warning transaction of `lock.claimant`, its fee computed from the agreed rate
    /// and the simulated size of the signed transaction.
    pub fn initialize(
        escrow: &MetadataOutput,
        lock: &WarningLock,
        fee_rate: SatPerVByte,
    ) -> Result<Self, Error> {
        let escrow_script_len = escrow
            .script_pubkey
            .as_ref()
            .ok_or(Error::MissingWitness)?
            .len();

        let mut unsigned_tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: escrow.out_point,
                script_sig: Script::default(),
                sequence: CSVTimelock::disable(),
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: escrow.tx_out.value,
                script_pubkey: lock.v0_p2wsh(),
            }],
        };

        let vsize = fee::simulated_vsize(&unsigned_tx, |_| {
            fee::upper_bound_multisig_witness(escrow_script_len)
        });
        let fee = fee_rate.fee_for(vsize)?;
        let value = escrow
            .value()
            .checked_sub(fee)
            .ok_or(Error::NotEnoughAssets)?;
        if is_dust(value) {
            return Err(Error::NotEnoughAssets);
        }
        unsigned_tx.output[0].value = value.as_sat();

        let mut tx = Tx::from_unsigned(unsigned_tx, escrow)?;
        tx.psbt.outputs[0].witness_script = Some(lock.script());
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::{Amount, Txid};

    use super::*;
    use crate::bitcoin::signing::sign_hash;

    fn keypair(byte: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        let pk = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk));
        (sk, pk)
    }

    fn lock(delay: u32) -> WarningLock {
        let (_, buyer) = keypair(1);
        let (_, seller) = keypair(2);
        WarningLock {
            keys: MultisigKeys { buyer, seller },
            claimant: seller,
            delay: CSVTimelock::new(delay),
        }
    }

    #[test]
    fn script_roundtrip() {
        for delay in [1, 10, 16, 17, 144, 4320, 65535].iter() {
            let lock = lock(*delay);
            assert_eq!(WarningLock::from_script(&lock.script()).unwrap(), lock);
        }
        let escrow_script = lock(144).keys.redeem_script();
        assert!(WarningLock::from_script(&escrow_script).is_err());
    }

    #[test]
    fn warning_pays_fee_from_escrow() {
        let (buyer_sk, buyer) = keypair(1);
        let (seller_sk, seller) = keypair(2);
        let keys = MultisigKeys { buyer, seller };
        let escrow = MetadataOutput {
            out_point: OutPoint::new(Txid::hash(b"deposit"), 0),
            tx_out: TxOut {
                value: 1_302_000,
                script_pubkey: keys.script_pubkey(),
            },
            script_pubkey: Some(keys.redeem_script()),
        };
        let lock = lock(144);
        let mut warning = WarningTx::initialize(&escrow, &lock, SatPerVByte::from_sat(10)).unwrap();
        let fee = escrow.value() - warning.output_amount();
        assert!(fee > Amount::from_sat(1_000) && fee < Amount::from_sat(3_000));
        assert_eq!(warning.consumable_output().script_pubkey, Some(lock.script()));

        let sighash = warning.signature_hash().unwrap();
        warning
            .add_signature(seller, sign_hash(sighash, &seller_sk).unwrap())
            .unwrap();
        assert!(warning.finalize().is_err());
        warning
            .add_signature(buyer, sign_hash(sighash, &buyer_sk).unwrap())
            .unwrap();
        warning.finalize().unwrap();
        let tx = warning.extract().unwrap();
        assert_eq!(lock.output_of(&tx).unwrap().out_point.txid, tx.txid());
    }
}
