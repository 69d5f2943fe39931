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

//! Roles used to distinguish participants during a trade. A participant is either the maker or
//! the taker of an offer, and either the buyer or the seller of bitcoin. The four combinations
//! form a [`ProtocolRole`] and every role-dependent formula is looked up in its [`RoleTable`].

use std::fmt;
use std::str::FromStr;

use bitcoin::Amount;

use crate::transaction::Error;

/// Possible roles during the negotiation phase.
#[derive(Display, Debug, Clone, Hash, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum TradeRole {
    /// The maker role publishes the offer and waits for a taker.
    Maker,
    /// The taker role accepts a published offer and initiates the trade protocol.
    Taker,
}

impl TradeRole {
    /// Return the other trade role.
    pub fn other(&self) -> Self {
        match self {
            Self::Maker => Self::Taker,
            Self::Taker => Self::Maker,
        }
    }
}

impl FromStr for TradeRole {
    type Err = crate::offer::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Maker" | "maker" => Ok(TradeRole::Maker),
            "Taker" | "taker" => Ok(TradeRole::Taker),
            _ => Err(crate::offer::Error::UnknownRole(s.into())),
        }
    }
}

/// Side of a participant in the exchange: the buyer pays fiat and receives bitcoin, the seller
/// receives fiat and pays bitcoin.
#[derive(Display, Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[display(Debug)]
pub enum TradeSide {
    /// Buys bitcoin against the counter currency.
    Buyer,
    /// Sells bitcoin against the counter currency.
    Seller,
}

impl TradeSide {
    /// Return the other side.
    pub fn other(&self) -> Self {
        match self {
            Self::Buyer => Self::Seller,
            Self::Seller => Self::Buyer,
        }
    }
}

impl FromStr for TradeSide {
    type Err = crate::offer::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buyer" | "buyer" => Ok(TradeSide::Buyer),
            "Seller" | "seller" => Ok(TradeSide::Seller),
            _ => Err(crate::offer::Error::UnknownRole(s.into())),
        }
    }
}

/// The tagged union `{Maker, Taker} × {Buyer, Seller}` used to select tasks and formulas.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRole {
    /// Maker or taker.
    pub role: TradeRole,
    /// Buyer or seller.
    pub side: TradeSide,
}

impl ProtocolRole {
    /// Buyer as maker.
    pub const BUYER_AS_MAKER: Self = Self::new(TradeRole::Maker, TradeSide::Buyer);
    /// Seller as maker.
    pub const SELLER_AS_MAKER: Self = Self::new(TradeRole::Maker, TradeSide::Seller);
    /// Buyer as taker.
    pub const BUYER_AS_TAKER: Self = Self::new(TradeRole::Taker, TradeSide::Buyer);
    /// Seller as taker.
    pub const SELLER_AS_TAKER: Self = Self::new(TradeRole::Taker, TradeSide::Seller);

    /// All the valid combinations.
    pub const ALL: [Self; 4] = [
        Self::BUYER_AS_MAKER,
        Self::SELLER_AS_MAKER,
        Self::BUYER_AS_TAKER,
        Self::SELLER_AS_TAKER,
    ];

    /// Create a protocol role.
    pub const fn new(role: TradeRole, side: TradeSide) -> Self {
        Self { role, side }
    }

    /// The role of the counterparty.
    pub fn peer(&self) -> Self {
        Self::new(self.role.other(), self.side.other())
    }

    /// Return the formula table of this role.
    pub fn table(&self) -> &'static RoleTable {
        match self.side {
            TradeSide::Buyer => &BUYER_TABLE,
            TradeSide::Seller => &SELLER_TABLE,
        }
    }

    /// True if this participant is the maker.
    pub fn is_maker(&self) -> bool {
        self.role == TradeRole::Maker
    }

    /// True if this participant is the buyer.
    pub fn is_buyer(&self) -> bool {
        self.side == TradeSide::Buyer
    }

    /// The maker builds and first signs the deposit transaction.
    pub fn builds_deposit(&self) -> bool {
        self.is_maker()
    }

    /// The taker finalizes and broadcasts the deposit transaction.
    pub fn finalizes_deposit(&self) -> bool {
        !self.is_maker()
    }
}

/// The amounts agreed for a trade, in satoshis. Inputs of every role-dependent formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeAmounts {
    /// Amount of bitcoin exchanged.
    #[serde(with = "crate::bitcoin::amount::string")]
    pub trade_amount: Amount,
    /// Security deposit locked by the buyer.
    #[serde(with = "crate::bitcoin::amount::string")]
    pub buyer_security_deposit: Amount,
    /// Security deposit locked by the seller.
    #[serde(with = "crate::bitcoin::amount::string")]
    pub seller_security_deposit: Amount,
    /// Mining fee for one protocol transaction.
    #[serde(with = "crate::bitcoin::amount::string")]
    pub tx_fee: Amount,
}

impl TradeAmounts {
    /// Fee kept in the multisig output to pay for the payout transaction, always twice the per
    /// transaction fee.
    pub fn reserved_payout_fee(&self) -> Result<Amount, Error> {
        self.tx_fee.checked_mul(2).ok_or(Error::AmountOverflow)
    }

    /// Value of the multisig output of the deposit transaction: trade amount, both security
    /// deposits and the reserved payout fee.
    pub fn multisig_output_amount(&self) -> Result<Amount, Error> {
        BUYER_TABLE
            .contribution(self)?
            .checked_add(SELLER_TABLE.contribution(self)?)
            .ok_or(Error::AmountOverflow)
    }

    /// Total paid out by the cooperative payout transaction.
    pub fn payout_total(&self) -> Result<Amount, Error> {
        self.multisig_output_amount()?
            .checked_sub(self.reserved_payout_fee()?)
            .ok_or(Error::AmountOverflow)
    }
}

impl fmt::Display for ProtocolRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} as {}", self.side, self.role)
    }
}

/// Formulas depending on the trade side, looked up by [`ProtocolRole::table`] instead of being
/// repeated per role combination.
#[derive(Debug)]
pub struct RoleTable {
    /// The side the table applies to.
    pub side: TradeSide,
    contribution: fn(&TradeAmounts) -> Option<Amount>,
    deposit_fee_share: fn(&TradeAmounts) -> Amount,
    payout: fn(&TradeAmounts) -> Option<Amount>,
    /// Signs the payout transaction first, when the fiat payment was started.
    pub signs_payout_first: bool,
}

impl RoleTable {
    /// Value this side contributes to the multisig output.
    pub fn contribution(&self, amounts: &TradeAmounts) -> Result<Amount, Error> {
        (self.contribution)(amounts).ok_or(Error::AmountOverflow)
    }

    /// Part of the deposit transaction mining fee paid by this side, outside of the multisig
    /// output.
    pub fn deposit_fee_share(&self, amounts: &TradeAmounts) -> Amount {
        (self.deposit_fee_share)(amounts)
    }

    /// Value this side must fund with its own inputs.
    pub fn required_funding(&self, amounts: &TradeAmounts) -> Result<Amount, Error> {
        self.contribution(amounts)?
            .checked_add(self.deposit_fee_share(amounts))
            .ok_or(Error::AmountOverflow)
    }

    /// Value this side receives from the cooperative payout.
    pub fn payout(&self, amounts: &TradeAmounts) -> Result<Amount, Error> {
        (self.payout)(amounts).ok_or(Error::AmountOverflow)
    }
}

static BUYER_TABLE: RoleTable = RoleTable {
    side: TradeSide::Buyer,
    contribution: |a| Some(a.buyer_security_deposit),
    deposit_fee_share: |_| Amount::ZERO,
    payout: |a| a.trade_amount.checked_add(a.buyer_security_deposit),
    signs_payout_first: true,
};

static SELLER_TABLE: RoleTable = RoleTable {
    side: TradeSide::Seller,
    contribution: |a| {
        a.seller_security_deposit
            .checked_add(a.trade_amount)?
            .checked_add(a.tx_fee.checked_mul(2)?)
    },
    deposit_fee_share: |a| a.tx_fee,
    payout: |a| Some(a.seller_security_deposit),
    signs_payout_first: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn amounts() -> TradeAmounts {
        TradeAmounts {
            trade_amount: Amount::from_sat(1_000_000),
            buyer_security_deposit: Amount::from_sat(150_000),
            seller_security_deposit: Amount::from_sat(150_000),
            tx_fee: Amount::from_sat(1_000),
        }
    }

    #[test]
    fn multisig_amount_for_all_roles() {
        let amounts = amounts();
        for role in ProtocolRole::ALL.iter() {
            let own = role.table().contribution(&amounts).unwrap();
            let peer = role.peer().table().contribution(&amounts).unwrap();
            assert_eq!(own + peer, Amount::from_sat(1_302_000), "{}", role);
        }
        assert_eq!(
            amounts.multisig_output_amount().unwrap(),
            Amount::from_sat(1_302_000)
        );
    }

    #[test]
    fn seller_funds_deposit_and_payout_fees() {
        let amounts = amounts();
        let seller = ProtocolRole::SELLER_AS_TAKER.table();
        assert_eq!(
            seller.required_funding(&amounts).unwrap(),
            Amount::from_sat(150_000 + 1_000_000 + 2_000 + 1_000)
        );
        let buyer = ProtocolRole::BUYER_AS_MAKER.table();
        assert_eq!(
            buyer.required_funding(&amounts).unwrap(),
            Amount::from_sat(150_000)
        );
    }

    #[test]
    fn payout_shares_exclude_reserved_fee() {
        let amounts = amounts();
        let buyer = ProtocolRole::BUYER_AS_TAKER.table().payout(&amounts).unwrap();
        let seller = ProtocolRole::SELLER_AS_MAKER.table().payout(&amounts).unwrap();
        assert_eq!(buyer + seller, amounts.payout_total().unwrap());
        assert_eq!(
            amounts.multisig_output_amount().unwrap() - amounts.payout_total().unwrap(),
            Amount::from_sat(2_000)
        );
    }

    #[test]
    fn overflow_is_reported() {
        let mut amounts = amounts();
        amounts.trade_amount = Amount::from_sat(u64::MAX);
        assert!(matches!(
            amounts.multisig_output_amount(),
            Err(Error::AmountOverflow)
        ));
    }

    #[test]
    fn peer_role_is_symmetric() {
        for role in ProtocolRole::ALL.iter() {
            assert_eq!(role.peer().peer(), *role);
            assert_ne!(role.peer().role, role.role);
            assert_ne!(role.peer().side, role.side);
        }
        assert_eq!(
            TradeRole::from_str("maker").unwrap(),
            TradeRole::Maker
        );
        assert_eq!(TradeSide::from_str("Seller").unwrap(), TradeSide::Seller);
    }
}
