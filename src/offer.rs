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

//! An offer published by a maker and the checks run before a trade is executed against it.

use bitcoin::{Amount, Txid};
use thiserror::Error;

use crate::bitcoin::amount::string;
use crate::role::{TradeAmounts, TradeSide};
use crate::trade::{NodeAddress, TradeId};
use crate::version::ProtocolVersion;

/// Errors raised when validating an offer or a trade against its offer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The string is not a known role or side.
    #[error("Unknown role: {0}")]
    UnknownRole(String),
    /// The protocol version is not supported.
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(ProtocolVersion),
    /// The trade amount is not within the offer range.
    #[error("Trade amount {amount} is outside of the offer range [{min}, {max}]")]
    AmountOutOfRange {
        /// Requested amount.
        amount: Amount,
        /// Offer minimum amount.
        min: Amount,
        /// Offer amount.
        max: Amount,
    },
    /// The offer or trade amount is zero.
    #[error("Amount must be positive")]
    ZeroAmount,
    /// A security deposit is zero.
    #[error("Security deposits must be positive")]
    ZeroSecurityDeposit,
    /// The offer minimum amount is above its amount.
    #[error("Minimum amount {min} is above the amount {max}")]
    InvalidRange {
        /// Offer minimum amount.
        min: Amount,
        /// Offer amount.
        max: Amount,
    },
    /// The trade currency is not the offer currency.
    #[error("Currency mismatch: offer in {expected}, trade in {found}")]
    CurrencyMismatch {
        /// Offer currency.
        expected: String,
        /// Trade currency.
        found: String,
    },
    /// The trade price is not the offer price.
    #[error("Price mismatch: offer at {expected}, trade at {found}")]
    PriceMismatch {
        /// Offer price.
        expected: u64,
        /// Trade price.
        found: u64,
    },
    /// The per-transaction mining fee is outside of the configured bounds.
    #[error("Transaction fee {tx_fee} is outside of the accepted range [{min}, {max}]")]
    TxFeeOutOfRange {
        /// Agreed fee.
        tx_fee: Amount,
        /// Configured minimum.
        min: Amount,
        /// Configured maximum.
        max: Amount,
    },
    /// No offer with this id is available.
    #[error("Offer {0} not found")]
    NotFound(TradeId),
    /// An offer with this id is already published.
    #[error("Offer {0} already exists")]
    AlreadyExists(TradeId),
}

/// An offer to buy or sell bitcoin against a counter currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Offer id, also the id of the trade executed against it.
    pub id: TradeId,
    /// Side of the maker.
    pub direction: TradeSide,
    /// Maximum amount of bitcoin.
    #[serde(with = "string")]
    pub amount: Amount,
    /// Minimum amount of bitcoin a taker may request.
    #[serde(with = "string")]
    pub min_amount: Amount,
    /// Price in the smallest unit of the counter currency per bitcoin.
    pub price: u64,
    /// Counter currency code.
    pub currency_code: String,
    /// Opaque payment method identifier.
    pub payment_method_id: String,
    /// Security deposit locked by the buyer.
    #[serde(with = "string")]
    pub buyer_security_deposit: Amount,
    /// Security deposit locked by the seller.
    #[serde(with = "string")]
    pub seller_security_deposit: Amount,
    /// Trade-initiation fee paid by the maker.
    #[serde(with = "string")]
    pub maker_fee: Amount,
    /// Id of the maker fee transaction, set once published.
    pub maker_fee_tx_id: Option<Txid>,
    /// Protocol version of trades executed against this offer.
    pub version: ProtocolVersion,
    /// Network address of the maker.
    pub maker_address: NodeAddress,
}

impl Offer {
    /// Validate the offer itself.
    pub fn validate(&self) -> Result<(), Error> {
        self.version.check_supported()?;
        if self.amount == Amount::ZERO || self.min_amount == Amount::ZERO {
            return Err(Error::ZeroAmount);
        }
        if self.min_amount > self.amount {
            return Err(Error::InvalidRange {
                min: self.min_amount,
                max: self.amount,
            });
        }
        if self.buyer_security_deposit == Amount::ZERO
            || self.seller_security_deposit == Amount::ZERO
        {
            return Err(Error::ZeroSecurityDeposit);
        }
        Ok(())
    }

    /// Check the terms of a trade against this offer.
    pub fn check_terms(
        &self,
        amount: Amount,
        price: u64,
        currency_code: &str,
        version: ProtocolVersion,
    ) -> Result<(), Error> {
        self.validate()?;
        if amount < self.min_amount || amount > self.amount {
            return Err(Error::AmountOutOfRange {
                amount,
                min: self.min_amount,
                max: self.amount,
            });
        }
        if currency_code != self.currency_code {
            return Err(Error::CurrencyMismatch {
                expected: self.currency_code.clone(),
                found: currency_code.into(),
            });
        }
        if price != self.price {
            return Err(Error::PriceMismatch {
                expected: self.price,
                found: price,
            });
        }
        if version != self.version {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(())
    }

    /// The amounts of a trade of `amount` against this offer.
    pub fn trade_amounts(&self, amount: Amount, tx_fee: Amount) -> TradeAmounts {
        TradeAmounts {
            trade_amount: amount,
            buyer_security_deposit: self.buyer_security_deposit,
            seller_security_deposit: self.seller_security_deposit,
            tx_fee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Uuid;

    fn offer() -> Offer {
        Offer {
            id: TradeId(Uuid::new_v4()),
            direction: TradeSide::Buyer,
            amount: Amount::from_sat(1_000_000),
            min_amount: Amount::from_sat(500_000),
            price: 2_500_000,
            currency_code: "EUR".into(),
            payment_method_id: "SEPA".into(),
            buyer_security_deposit: Amount::from_sat(150_000),
            seller_security_deposit: Amount::from_sat(150_000),
            maker_fee: Amount::from_sat(5_000),
            maker_fee_tx_id: None,
            version: ProtocolVersion::V5,
            maker_address: NodeAddress::new("maker.onion:9999"),
        }
    }

    #[test]
    fn validate_offer() {
        assert!(offer().validate().is_ok());
        let mut bad = offer();
        bad.min_amount = Amount::from_sat(2_000_000);
        assert!(matches!(bad.validate(), Err(Error::InvalidRange { .. })));
        let mut bad = offer();
        bad.seller_security_deposit = Amount::ZERO;
        assert_eq!(bad.validate(), Err(Error::ZeroSecurityDeposit));
        let mut bad = offer();
        bad.version = ProtocolVersion::new(4);
        assert!(matches!(bad.validate(), Err(Error::UnsupportedVersion(_))));
    }

    #[test]
    fn check_trade_terms() {
        let offer = offer();
        let amount = Amount::from_sat(750_000);
        assert!(offer
            .check_terms(amount, 2_500_000, "EUR", ProtocolVersion::V5)
            .is_ok());
        assert!(matches!(
            offer.check_terms(Amount::from_sat(1_000_001), 2_500_000, "EUR", ProtocolVersion::V5),
            Err(Error::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            offer.check_terms(amount, 2_400_000, "EUR", ProtocolVersion::V5),
            Err(Error::PriceMismatch { .. })
        ));
        assert!(matches!(
            offer.check_terms(amount, 2_500_000, "USD", ProtocolVersion::V5),
            Err(Error::CurrencyMismatch { .. })
        ));
        assert!(matches!(
            offer.check_terms(amount, 2_500_000, "EUR", ProtocolVersion::V1),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn serde_offer_in_yaml() {
        let offer = offer();
        let s = serde_yaml::to_string(&offer).expect("Encode offer in yaml");
        let back: Offer = serde_yaml::from_str(&s).expect("Decode offer from yaml");
        assert_eq!(offer, back);
    }
}
