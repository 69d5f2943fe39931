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

//! Relative timelock used by the warning output and set as `nSequence` on the claim input.

use std::str::FromStr;

use crate::bitcoin::ParseError;

/// An `OP_CSV` value in blocks to use in transactions and scripts. BIP68 only reads the low 16
/// bits of a block based relative lock, decoding refuses anything above [`CSVTimelock::MAX`].
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Copy, Hash, Display, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[display("{0} blocks")]
pub struct CSVTimelock(u32);

impl CSVTimelock {
    /// Highest relative timelock in blocks expressible in `nSequence`.
    pub const MAX: u32 = 0xffff;

    /// Create a new raw check sequence verify timelock of given value.
    pub fn new(timelock: u32) -> Self {
        Self(timelock)
    }

    /// Return the value of the check sequence verify.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Return the value of nSequence that disable `CHECK_SEQUENCE_VERIFY`.
    pub fn disable() -> u32 {
        (1 << 31) as u32
    }

    /// True when an output confirmed `confirmations` times can be spent with this timelock.
    pub fn is_matured(&self, confirmations: u32) -> bool {
        confirmations >= self.0
    }

    /// True if the value is read the same by the chain: non-zero, without the disable flag and
    /// within the 16 bits of a block based lock.
    pub fn is_valid(&self) -> bool {
        self.0 > 0 && self.0 <= Self::MAX
    }
}

impl TryFrom<u32> for CSVTimelock {
    type Error = ParseError;

    fn try_from(blocks: u32) -> Result<Self, Self::Error> {
        if blocks > Self::MAX {
            return Err(ParseError::Format("relative timelock above 65535 blocks"));
        }
        Ok(CSVTimelock(blocks))
    }
}

impl From<CSVTimelock> for u32 {
    fn from(timelock: CSVTimelock) -> Self {
        timelock.0
    }
}

impl FromStr for CSVTimelock {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CSVTimelock::try_from(s.trim_end_matches(" blocks").parse::<u32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let timelock = CSVTimelock::from_str("144").unwrap();
        assert_eq!(timelock, CSVTimelock::new(144));
        assert_eq!(format!("{}", timelock), "144 blocks");
        assert_eq!(CSVTimelock::from_str("144 blocks").unwrap(), timelock);
        assert!(CSVTimelock::from_str("soon").is_err());
    }

    #[test]
    fn maturity() {
        let timelock = CSVTimelock::new(144);
        assert!(!timelock.is_matured(143));
        assert!(timelock.is_matured(144));
        assert_eq!(CSVTimelock::disable(), 0x8000_0000);
    }

    #[test]
    fn out_of_range_values_are_refused() {
        assert_eq!(
            CSVTimelock::from_str("65535").unwrap(),
            CSVTimelock::new(CSVTimelock::MAX)
        );
        assert!(CSVTimelock::from_str("70000").is_err());
        assert!(CSVTimelock::from_str("2147483792 blocks").is_err());
        assert!(serde_yaml::from_str::<CSVTimelock>("70000").is_err());
        assert_eq!(
            serde_yaml::from_str::<CSVTimelock>("144").unwrap(),
            CSVTimelock::new(144)
        );
        assert!(!CSVTimelock::new(70_000).is_valid());
        assert!(!CSVTimelock::new(CSVTimelock::disable() | 144).is_valid());
        assert!(!CSVTimelock::new(0).is_valid());
        assert!(CSVTimelock::new(144).is_valid());
    }
}
