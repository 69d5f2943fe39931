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

//! Trade-initiation fee transaction: pays the trade fee to the fee receiver and returns the
//! change to the wallet.

use bitcoin::blockdata::transaction::{Transaction, TxOut};
use bitcoin::{Address, Amount};

use crate::bitcoin::amount::{self, is_dust};
use crate::bitcoin::input::{self, RawTransactionInput};
use crate::transaction::Error;

/// Build the unsigned trade fee transaction. The mining fee is `tx_fee`, a change below dust is
/// left to the miners.
pub fn build(
    inputs: &[RawTransactionInput],
    receiver: &Address,
    trade_fee: Amount,
    tx_fee: Amount,
    change_address: &Address,
) -> Result<Transaction, Error> {
    if is_dust(trade_fee) {
        return Err(Error::WrongTemplate("Trade fee below dust"));
    }
    let required = amount::checked_sum([trade_fee, tx_fee])?;
    let mut output = vec![TxOut {
        value: trade_fee.as_sat(),
        script_pubkey: receiver.script_pubkey(),
    }];
    if let Some(change) = input::change_value(inputs, required)? {
        output.push(TxOut {
            value: change.as_sat(),
            script_pubkey: change_address.script_pubkey(),
        });
    }
    Ok(Transaction {
        version: 2,
        lock_time: 0,
        input: inputs.iter().map(RawTransactionInput::to_tx_in).collect(),
        output,
    })
}
