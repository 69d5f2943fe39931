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

//! Protocol configuration shared by every trade of a node. Deserializable from any serde format,
//! missing fields take their default value.
//!
//! ```yaml
//! network: regtest
//! fee_receiver: bcrt1q...
//! max_unconfirmed_change_outputs: 20
//! min_tx_fee: 0.00000500 BTC
//! max_tx_fee: 0.00100000 BTC
//! claim_delay: 144
//! cooperative_window_blocks: 4320
//! max_fee_quote_age_secs: 600
//! max_escalation_fee_rate: 200 satoshi/vB
//! ```

use bitcoin::{Address, Amount, Network};
use thiserror::Error;

use crate::bitcoin::amount::string;
use crate::bitcoin::fee::SatPerVByte;
use crate::bitcoin::timelock::CSVTimelock;

/// Errors raised by an incoherent configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The minimum transaction fee is above the maximum.
    #[error("Invalid transaction fee bounds: min {min} is above max {max}")]
    InvalidFeeBounds {
        /// Configured minimum.
        min: Amount,
        /// Configured maximum.
        max: Amount,
    },
    /// The claim delay must be at least one block.
    #[error("Claim delay must be at least one block")]
    ZeroClaimDelay,
    /// The claim delay does not fit in the 16 bits of a block based relative lock.
    #[error("Claim delay of {delay} blocks is above the maximum {max}")]
    ClaimDelayOutOfRange {
        /// Configured delay.
        delay: u32,
        /// Highest delay the chain reads unchanged.
        max: u32,
    },
    /// The fee receiver address is not on the configured network.
    #[error("Fee receiver address is for {found} while the network is {expected}")]
    NetworkMismatch {
        /// Configured network.
        expected: Network,
        /// Network of the address.
        found: Network,
    },
}

/// Configuration of the trade protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Bitcoin network the trades are executed on.
    #[serde(with = "string")]
    pub network: Network,
    /// Address receiving the trade-initiation fees.
    pub fee_receiver: Address,
    /// A trade is refused while the wallet holds more unconfirmed change outputs than this.
    #[serde(default = "default_max_unconfirmed_change_outputs")]
    pub max_unconfirmed_change_outputs: usize,
    /// Lowest per-transaction mining fee a trade may agree on.
    #[serde(default = "default_min_tx_fee", with = "string")]
    pub min_tx_fee: Amount,
    /// Highest per-transaction mining fee a trade may agree on.
    #[serde(default = "default_max_tx_fee", with = "string")]
    pub max_tx_fee: Amount,
    /// Relative timelock of the warning output before the claim can be broadcast.
    #[serde(default = "default_claim_delay")]
    pub claim_delay: CSVTimelock,
    /// Deposit confirmations after which a party may escalate alone.
    #[serde(default = "default_cooperative_window_blocks")]
    pub cooperative_window_blocks: u32,
    /// Fee quotes older than this are refused when building escalation transactions.
    #[serde(default = "default_max_fee_quote_age_secs")]
    pub max_fee_quote_age_secs: u64,
    /// Highest fee rate accepted for the pre-signed warning transactions.
    #[serde(default = "default_max_escalation_fee_rate")]
    pub max_escalation_fee_rate: SatPerVByte,
}

fn default_max_unconfirmed_change_outputs() -> usize {
    20
}

fn default_min_tx_fee() -> Amount {
    Amount::from_sat(500)
}

fn default_max_tx_fee() -> Amount {
    Amount::from_sat(100_000)
}

fn default_claim_delay() -> CSVTimelock {
    CSVTimelock::new(144)
}

fn default_cooperative_window_blocks() -> u32 {
    4320
}

fn default_max_fee_quote_age_secs() -> u64 {
    600
}

fn default_max_escalation_fee_rate() -> SatPerVByte {
    SatPerVByte::from_sat(200)
}

impl ProtocolConfig {
    /// A configuration with every optional field set to its default value.
    pub fn new(network: Network, fee_receiver: Address) -> Self {
        Self {
            network,
            fee_receiver,
            max_unconfirmed_change_outputs: default_max_unconfirmed_change_outputs(),
            min_tx_fee: default_min_tx_fee(),
            max_tx_fee: default_max_tx_fee(),
            claim_delay: default_claim_delay(),
            cooperative_window_blocks: default_cooperative_window_blocks(),
            max_fee_quote_age_secs: default_max_fee_quote_age_secs(),
            max_escalation_fee_rate: default_max_escalation_fee_rate(),
        }
    }

    /// Check the bounds are coherent.
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_tx_fee > self.max_tx_fee {
            return Err(Error::InvalidFeeBounds {
                min: self.min_tx_fee,
                max: self.max_tx_fee,
            });
        }
        if self.claim_delay.as_u32() == 0 {
            return Err(Error::ZeroClaimDelay);
        }
        if !self.claim_delay.is_valid() {
            return Err(Error::ClaimDelayOutOfRange {
                delay: self.claim_delay.as_u32(),
                max: CSVTimelock::MAX,
            });
        }
        if self.fee_receiver.network != self.network {
            return Err(Error::NetworkMismatch {
                expected: self.network,
                found: self.fee_receiver.network,
            });
        }
        Ok(())
    }

    /// True if the per-transaction fee is within the configured bounds.
    pub fn accepts_tx_fee(&self, tx_fee: Amount) -> bool {
        tx_fee >= self.min_tx_fee && tx_fee <= self.max_tx_fee
    }
}
