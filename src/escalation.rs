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

//! Escalation of self-enforcing trades when the counterparty stops cooperating.
//!
//! ```text
//! CooperativeWait ─► WarningBroadcast ─► ClaimDelayWait ─► ClaimBroadcast ─► Settled
//! ```

/// Progress of the unilateral escalation of a trade.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display(Debug)]
pub enum EscalationState {
    /// The parties are expected to settle with the cooperative payout.
    CooperativeWait,
    /// The warning transaction was broadcast.
    WarningBroadcast,
    /// Waiting for the warning output timelock to mature.
    ClaimDelayWait,
    /// The claim transaction was broadcast.
    ClaimBroadcast,
    /// The claim transaction is confirmed.
    Settled,
}

impl Default for EscalationState {
    fn default() -> Self {
        Self::CooperativeWait
    }
}

impl EscalationState {
    /// True once the escrow output was spent by the warning transaction.
    pub fn is_escalated(&self) -> bool {
        *self != Self::CooperativeWait
    }

    /// The state following this one, `None` once settled.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::CooperativeWait => Some(Self::WarningBroadcast),
            Self::WarningBroadcast => Some(Self::ClaimDelayWait),
            Self::ClaimDelayWait => Some(Self::ClaimBroadcast),
            Self::ClaimBroadcast => Some(Self::Settled),
            Self::Settled => None,
        }
    }
}
