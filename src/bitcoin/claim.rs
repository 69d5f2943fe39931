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

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{EcdsaSighashType, Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::{Address, EcdsaSig};

use crate::bitcoin::amount::is_dust;
use crate::bitcoin::fee::{self, SatPerVByte};
use crate::bitcoin::transaction::{partial_sig, MetadataOutput, SubTransaction, Tx};
use crate::bitcoin::warning::WarningLock;
use crate::transaction::Error;

/// Spends the warning output alone through the timelocked branch.
#[derive(Debug)]
pub struct Claim;

/// The claim transaction.
pub type ClaimTx = Tx<Claim>;

impl SubTransaction for Claim {
    fn finalize(psbt: &mut PartiallySignedTransaction) -> Result<(), Error> {
        let script = psbt.inputs[0]
            .witness_script
            .clone()
            .ok_or(Error::MissingWitness)?;
        let lock = WarningLock::from_script(&script)?;
        let sig = EcdsaSig {
            sig: partial_sig(psbt, &lock.claimant)?,
            hash_ty: EcdsaSighashType::All,
        };
        psbt.inputs[0].final_script_witness = Some(Witness::from_vec(vec![
            sig.to_vec(),
            vec![], // OP_FALSE
            script.into_bytes(),
        ]));
        Ok(())
    }
}

impl Tx<Claim> {
    /// Build the claim spending `warning` to `destination`. The input sequence is the relative
    /// timelock of the warning script, the fee is computed from `fee_rate`.
    pub fn initialize(
        warning: &MetadataOutput,
        destination: &Address,
        fee_rate: SatPerVByte,
    ) -> Result<Self, Error> {
        let script = warning
            .script_pubkey
            .as_ref()
            .ok_or(Error::MissingWitness)?;
        let lock = WarningLock::from_script(script)?;

        let mut unsigned_tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: warning.out_point,
                script_sig: Script::default(),
                sequence: lock.delay.as_u32(),
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: warning.tx_out.value,
                script_pubkey: destination.script_pubkey(),
            }],
        };

        let vsize = fee::simulated_vsize(&unsigned_tx, |_| {
            fee::upper_bound_timelock_witness(script.len())
        });
        let value = warning
            .value()
            .checked_sub(fee_rate.fee_for(vsize)?)
            .ok_or(Error::NotEnoughAssets)?;
        if is_dust(value) {
            return Err(Error::NotEnoughAssets);
        }
        unsigned_tx.output[0].value = value.as_sat();

        Tx::from_unsigned(unsigned_tx, warning)
    }
}
