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

//! Amount helpers: dust threshold, checked sums and string serialization.

use bitcoin::Amount;

use crate::transaction::Error;

/// Outputs below this value are not relayed and are never created, the value is left to the
/// miners instead.
pub const DUST_LIMIT_SAT: u64 = 546;

/// Return true if the amount is below the dust limit.
pub fn is_dust(amount: Amount) -> bool {
    amount.as_sat() < DUST_LIMIT_SAT
}

/// Sum amounts, failing on overflow.
pub fn checked_sum<I>(amounts: I) -> Result<Amount, Error>
where
    I: IntoIterator<Item = Amount>,
{
    amounts
        .into_iter()
        .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
        .ok_or(Error::AmountOverflow)
}

/// Serialize any `Display + FromStr` value, such as [`Amount`], as a string, e.g.
/// `"0.01000000 BTC"`.
pub mod string {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct SerdeTest {
        #[serde(with = "string")]
        amount: Amount,
    }

    #[test]
    fn dust_threshold() {
        assert!(is_dust(Amount::from_sat(545)));
        assert!(!is_dust(Amount::from_sat(546)));
    }

    #[test]
    fn sum_overflow() {
        assert_eq!(
            checked_sum(vec![Amount::from_sat(1), Amount::from_sat(2)]).unwrap(),
            Amount::from_sat(3)
        );
        assert!(matches!(
            checked_sum(vec![Amount::from_sat(u64::MAX), Amount::from_sat(1)]),
            Err(Error::AmountOverflow)
        ));
    }

    #[test]
    fn serialize_amount_in_yaml() {
        let test = SerdeTest {
            amount: Amount::from_sat(1_302_000),
        };
        let s = serde_yaml::to_string(&test).expect("Encode amount in yaml");
        assert_eq!("---\namount: 0.01302000 BTC\n", s);
        let back: SerdeTest = serde_yaml::from_str(&s).expect("Decode amount from yaml");
        assert_eq!(test, back);
    }
}
