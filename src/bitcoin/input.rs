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

//! Raw inputs and change outputs exchanged by the parties to build the deposit transaction.

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{OutPoint, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::{Address, Amount};

use crate::bitcoin::amount::{self, is_dust};
use crate::transaction::Error;

/// A wallet output selected to fund the deposit, as disclosed to the counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawTransactionInput {
    /// The spent output.
    pub outpoint: OutPoint,
    /// Value of the spent output.
    #[serde(with = "amount::string")]
    pub value: Amount,
    /// Script of the spent output.
    pub script_pubkey: Script,
}

impl RawTransactionInput {
    /// True if the spent output is a native SegWit v0 public key hash.
    pub fn is_p2wpkh(&self) -> bool {
        self.script_pubkey.is_v0_p2wpkh()
    }

    /// An unsigned transaction input spending this output, sequence final.
    pub fn to_tx_in(&self) -> TxIn {
        TxIn {
            previous_output: self.outpoint,
            script_sig: Script::default(),
            sequence: u32::MAX,
            witness: Witness::new(),
        }
    }

    /// The spent output, as required to compute a segwit signature hash.
    pub fn to_tx_out(&self) -> TxOut {
        TxOut {
            value: self.value.as_sat(),
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// A change output returning the excess of the inputs to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOutput {
    /// Change address of the owner.
    pub address: Address,
    /// Change value.
    #[serde(with = "amount::string")]
    pub value: Amount,
}

impl ChangeOutput {
    /// The transaction output paying the change.
    pub fn to_tx_out(&self) -> TxOut {
        TxOut {
            value: self.value.as_sat(),
            script_pubkey: self.address.script_pubkey(),
        }
    }
}

/// Fails on the first input that is not a native SegWit v0 public key hash, the deposit
/// transaction id must not be malleable before it is signed.
pub fn validate_segwit(inputs: &[RawTransactionInput]) -> Result<(), Error> {
    match inputs.iter().position(|i| !i.is_p2wpkh()) {
        Some(index) => Err(Error::NonSegwitInput { index }),
        None => Ok(()),
    }
}

/// Sum of the input values.
pub fn sum(inputs: &[RawTransactionInput]) -> Result<Amount, Error> {
    amount::checked_sum(inputs.iter().map(|i| i.value))
}

/// Change left after paying `required` from `inputs`. No change is returned when the excess is
/// dust, it is then left as fee.
pub fn change_value(
    inputs: &[RawTransactionInput],
    required: Amount,
) -> Result<Option<Amount>, Error> {
    let change = sum(inputs)?
        .checked_sub(required)
        .ok_or(Error::NotEnoughAssets)?;
    Ok(if is_dust(change) { None } else { Some(change) })
}

/// Check a change output declared by the counterparty against its inputs and required funding.
pub fn check_change(
    inputs: &[RawTransactionInput],
    required: Amount,
    declared: Option<&ChangeOutput>,
) -> Result<(), Error> {
    let expected = change_value(inputs, required)?;
    let found = declared.map(|c| c.value);
    if expected != found {
        return Err(Error::InvalidChange {
            expected: expected.map(|a| a.as_sat()).unwrap_or(0),
            found: found.map(|a| a.as_sat()).unwrap_or(0),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;
    use bitcoin::{Network, PubkeyHash, Txid, WPubkeyHash};

    use super::*;

    fn input(value: u64, script_pubkey: Script) -> RawTransactionInput {
        RawTransactionInput {
            outpoint: OutPoint::new(Txid::hash(&value.to_le_bytes()), 0),
            value: Amount::from_sat(value),
            script_pubkey,
        }
    }

    fn p2wpkh() -> Script {
        Script::new_v0_p2wpkh(&WPubkeyHash::hash(&[1u8; 33]))
    }

    fn p2pkh() -> Script {
        Script::new_p2pkh(&PubkeyHash::hash(&[1u8; 33]))
    }

    #[test]
    fn rejects_legacy_inputs() {
        let inputs = vec![input(1_000, p2wpkh()), input(2_000, p2pkh())];
        let err = validate_segwit(&inputs).unwrap_err();
        assert!(matches!(err, Error::NonSegwitInput { index: 1 }));
        assert!(err.to_string().starts_with("all inputs must be P2WH"));
        assert!(validate_segwit(&inputs[..1]).is_ok());
    }

    #[test]
    fn change_respects_dust() {
        let inputs = vec![input(100_000, p2wpkh()), input(60_000, p2wpkh())];
        assert_eq!(
            change_value(&inputs, Amount::from_sat(150_000)).unwrap(),
            Some(Amount::from_sat(10_000))
        );
        assert_eq!(
            change_value(&inputs, Amount::from_sat(159_500)).unwrap(),
            None
        );
        assert!(matches!(
            change_value(&inputs, Amount::from_sat(160_001)),
            Err(Error::NotEnoughAssets)
        ));
    }

    #[test]
    fn declared_change_is_checked() {
        let inputs = vec![input(200_000, p2wpkh())];
        let address = Address::p2wsh(&p2wpkh(), Network::Regtest);
        let good = ChangeOutput {
            address: address.clone(),
            value: Amount::from_sat(50_000),
        };
        assert!(check_change(&inputs, Amount::from_sat(150_000), Some(&good)).is_ok());
        let bad = ChangeOutput {
            address,
            value: Amount::from_sat(60_000),
        };
        assert!(matches!(
            check_change(&inputs, Amount::from_sat(150_000), Some(&bad)),
            Err(Error::InvalidChange { .. })
        ));
        assert!(check_change(&inputs, Amount::from_sat(150_000), None).is_err());
    }
}
