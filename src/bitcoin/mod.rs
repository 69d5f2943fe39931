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

//! Bitcoin transactions of the escrow protocol: the deposit transaction locking both parties
//! funds into a 2-of-2 SegWit v0 multisig output, the cooperative payout, and the warning and
//! claim transactions of the self-enforcing escalation.
//!
//! ```text
//!                  ┌──────────┐
//!   maker inputs ─►│          │   ┌──────────┐
//!                  │ deposit  ├──►│  payout  │
//!   taker inputs ─►│          │   └──────────┘
//!                  └────┬─────┘
//!                       │         ┌──────────┐     ┌──────────┐
//!                       └────────►│ warning  ├────►│  claim   │
//!                                 └──────────┘     └──────────┘
//! ```

use thiserror::Error;

pub mod amount;
pub mod claim;
pub mod deposit;
pub mod fee;
pub mod input;
pub mod multisig;
pub mod payout;
pub mod signing;
pub mod timelock;
pub mod trade_fee;
pub mod transaction;
pub mod warning;

pub use claim::ClaimTx;
pub use deposit::DepositTx;
pub use payout::PayoutTx;
pub use warning::WarningTx;

/// Errors raised when parsing Bitcoin related values from strings.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The string does not follow the expected format.
    #[error("Parse failed: {0}")]
    Format(&'static str),
    /// The amount part cannot be parsed.
    #[error("Amount parse error: {0}")]
    Amount(#[from] bitcoin::util::amount::ParseAmountError),
    /// The integer part cannot be parsed.
    #[error("Integer parse error: {0}")]
    Int(#[from] std::num::ParseIntError),
}
