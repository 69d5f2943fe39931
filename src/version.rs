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

//! Trade protocol versions. Version 1 relies on arbitration when a party stops cooperating,
//! version 5 adds the self-enforcing warning and claim transactions.

use std::str::FromStr;

use crate::offer::Error;

/// A trade protocol version, carried by offers and by the first protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
#[display("v{0}")]
pub struct ProtocolVersion(u16);

impl ProtocolVersion {
    /// Arbitrated protocol.
    pub const V1: Self = Self(1);
    /// Self-enforcing protocol with warning and claim transactions.
    pub const V5: Self = Self(5);

    /// Create a version from its raw value, supported or not.
    pub fn new(version: u16) -> Self {
        Self(version)
    }

    /// Version as `u16`.
    pub fn to_u16(&self) -> u16 {
        self.0
    }

    /// True if this library can execute trades of this version.
    pub fn is_supported(&self) -> bool {
        *self == Self::V1 || *self == Self::V5
    }

    /// True if the parties exchange pre-signed warning transactions and may escalate alone.
    pub fn is_self_enforcing(&self) -> bool {
        *self >= Self::V5
    }

    /// Fail if the version is not supported.
    pub fn check_supported(&self) -> Result<(), Error> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(Error::UnsupportedVersion(*self))
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V5
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim_start_matches('v')
            .parse::<u16>()
            .map(Self)
            .map_err(|_| Error::UnsupportedVersion(Self(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_versions() {
        assert!(ProtocolVersion::V1.is_supported());
        assert!(ProtocolVersion::V5.is_supported());
        assert!(!ProtocolVersion::new(2).is_supported());
        assert!(ProtocolVersion::new(3).check_supported().is_err());
        assert!(!ProtocolVersion::V1.is_self_enforcing());
        assert!(ProtocolVersion::V5.is_self_enforcing());
    }

    #[test]
    fn display_and_parse() {
        assert_eq!(format!("{}", ProtocolVersion::V5), "v5");
        assert_eq!(ProtocolVersion::from_str("v1").unwrap(), ProtocolVersion::V1);
        assert_eq!(ProtocolVersion::from_str("5").unwrap(), ProtocolVersion::V5);
        assert!(ProtocolVersion::from_str("five").is_err());
    }
}
