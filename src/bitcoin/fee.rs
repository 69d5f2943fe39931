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

//! Transaction fee unit type. Defines the [`SatPerVByte`] unit used to compute the fee of the
//! escalation transactions from their simulated virtual size, and the [`FeeQuote`] returned by
//! the wallet fee estimator.
//!
//! ```rust
//! use escrow_core::bitcoin::fee::SatPerVByte;
//!
//!# fn main() -> Result<(), escrow_core::bitcoin::ParseError> {
//! // Parse a Bitcoin amount suffixed with '/vB'
//! let rate = "10 satoshi/vB".parse::<SatPerVByte>()?;
//!
//! // Always displayed as 'satoshi/vB'
//! assert_eq!("10 satoshi/vB", format!("{}", rate));
//!# Ok(())
//!# }
//! ```

use std::str::FromStr;

use bitcoin::blockdata::transaction::Transaction;
use bitcoin::blockdata::witness::Witness;
use bitcoin::util::amount::Denomination;
use bitcoin::Amount;

use serde::ser::{Serialize, Serializer};
use serde::{de, Deserialize, Deserializer};

use crate::bitcoin::ParseError;
use crate::transaction::Error;

/// The unit used to mesure a quantity, or weight, for a Bitcoin transaction.
pub const WEIGHT_UNIT: &str = "vB";

/// An amount of satoshis per virtual byte a transaction must use for its fee.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Hash, Eq, Display)]
#[display(display_sats_per_vbyte)]
pub struct SatPerVByte(Amount);

fn display_sats_per_vbyte(rate: &SatPerVByte) -> String {
    format!(
        "{}/{}",
        rate.as_native_unit()
            .to_string_with_denomination(Denomination::Satoshi),
        WEIGHT_UNIT
    )
}

impl SatPerVByte {
    /// Create a fee quantity per virtual byte of given satoshis.
    pub fn from_sat(satoshis: u64) -> Self {
        SatPerVByte(Amount::from_sat(satoshis))
    }

    /// Return the number of satoshis per virtual byte.
    pub fn as_sat(&self) -> u64 {
        self.0.as_sat()
    }

    /// Return the rate as the native `bitcoin` crate amount.
    pub fn as_native_unit(&self) -> Amount {
        self.0
    }

    /// Fee for a transaction of the given virtual size, integer arithmetic only.
    pub fn fee_for(&self, vsize: usize) -> Result<Amount, Error> {
        self.0
            .checked_mul(vsize as u64)
            .ok_or(Error::AmountOverflow)
    }
}

impl Serialize for SatPerVByte {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(format!("{}", self).as_ref())
    }
}

impl<'de> Deserialize<'de> for SatPerVByte {
    fn deserialize<D>(deserializer: D) -> Result<SatPerVByte, D::Error>
    where
        D: Deserializer<'de>,
    {
        SatPerVByte::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

impl FromStr for SatPerVByte {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split('/').collect::<Vec<&str>>();
        if parts.len() != 2 {
            return Err(ParseError::Format("sat/vB format is not respected"));
        }
        let amount = parts[0].parse::<Amount>()?;
        match parts[1] {
            WEIGHT_UNIT => Ok(Self(amount)),
            _ => Err(ParseError::Format("Weight unit parse failed")),
        }
    }
}

/// A fee rate estimation with the age of the underlying data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    /// Estimated rate.
    pub rate: SatPerVByte,
    /// Seconds elapsed since the estimation was fetched.
    pub age_secs: u64,
}

impl FeeQuote {
    /// Return true if the quote is not older than `max_age_secs`.
    pub fn is_fresh(&self, max_age_secs: u64) -> bool {
        self.age_secs <= max_age_secs
    }
}

/// Virtual size of `tx` once every input carries the witness built by `witness`, used to
/// compute a fee before the real signatures exist.
pub fn simulated_vsize<F>(tx: &Transaction, witness: F) -> usize
where
    F: Fn(usize) -> Witness,
{
    let mut tx = tx.clone();
    for (index, input) in tx.input.iter_mut().enumerate() {
        input.witness = witness(index);
    }
    tx.vsize()
}

/// Upper bound of a 2-of-2 multisig spend witness: the empty element, two signatures and the
/// redeem script of the given length.
pub fn upper_bound_multisig_witness(script_len: usize) -> Witness {
    Witness::from_vec(vec![vec![], vec![0; 73], vec![0; 73], vec![0; script_len]])
}

/// Upper bound of a single signature timelocked spend witness: the signature, the branch
/// selector and the witness script of the given length.
pub fn upper_bound_timelock_witness(script_len: usize) -> Witness {
    Witness::from_vec(vec![vec![0; 73], vec![], vec![0; script_len]])
}
