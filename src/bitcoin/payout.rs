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
use bitcoin::blockdata::transaction::{Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::util::psbt::PartiallySignedTransaction;
use bitcoin::{Address, Amount};

use crate::bitcoin::multisig::{self, MultisigKeys};
use crate::bitcoin::transaction::{partial_sig, MetadataOutput, SubTransaction, Tx};
use crate::transaction::Error;

/// Releases the escrowed funds: the buyer receives the trade amount and its security deposit,
/// the seller its security deposit, the reserved payout fee goes to the miners.
#[derive(Debug)]
pub struct Payout;

/// The cooperative payout transaction.
pub type PayoutTx = Tx<Payout>;

/// Spend the escrow output with both signatures, shared by the payout and warning transactions.
pub(crate) fn finalize_escrow_spend(psbt: &mut PartiallySignedTransaction) -> Result<(), Error> {
    let script = psbt.inputs[0]
        .witness_script
        .clone()
        .ok_or(Error::MissingWitness)?;
    let keys = MultisigKeys::from_script(&script)?;
    let buyer_sig = partial_sig(psbt, &keys.buyer)?;
    let seller_sig = partial_sig(psbt, &keys.seller)?;
    psbt.inputs[0].final_script_witness = Some(multisig::witness(buyer_sig, seller_sig, &script));
    Ok(())
}

impl SubTransaction for Payout {
    fn finalize(psbt: &mut PartiallySignedTransaction) -> Result<(), Error> {
        finalize_escrow_spend(psbt)
    }
}

impl Tx<Payout> {
    /// Build the payout spending the escrow output to both payout addresses.
    pub fn initialize(
        escrow: &MetadataOutput,
        buyer_address: &Address,
        buyer_amount: Amount,
        seller_address: &Address,
        seller_amount: Amount,
    ) -> Result<Self, Error> {
        let paid = buyer_amount
            .checked_add(seller_amount)
            .ok_or(Error::AmountOverflow)?;
        if paid > escrow.value() {
            return Err(Error::NotEnoughAssets);
        }

        let unsigned_tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: escrow.out_point,
                script_sig: Script::default(),
                sequence: u32::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: buyer_amount.as_sat(),
                    script_pubkey: buyer_address.script_pubkey(),
                },
                TxOut {
                    value: seller_amount.as_sat(),
                    script_pubkey: seller_address.script_pubkey(),
                },
            ],
        };

        Tx::from_unsigned(unsigned_tx, escrow)
    }

    /// True if the transaction spends the given escrow output.
    pub fn spends(&self, escrow: &MetadataOutput) -> bool {
        self.psbt.unsigned_tx.input[0].previous_output == escrow.out_point
    }
}
