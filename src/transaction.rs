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

//! Transaction labels and the errors raised while building, signing, verifying and finalizing
//! the escrow transactions.

use std::error;

use thiserror::Error;

use crate::FailureKind;

/// A list specifying general categories of transaction error.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing signature data.
    #[error("Missing signature")]
    MissingSignature,
    /// Missing witness data.
    #[error("Missing witness data")]
    MissingWitness,
    /// Missing public key in the partial transaction.
    #[error("Public key not found in the partial transaction")]
    MissingPublicKey,
    /// A transaction the step depends on is not known yet.
    #[error("Missing {0} transaction")]
    MissingTransaction(TxLabel),
    /// Not enough assets to create the transaction.
    #[error("Not enough assets to create the transaction")]
    NotEnoughAssets,
    /// An amount computation overflowed.
    #[error("Amount overflow")]
    AmountOverflow,
    /// An input of the deposit transaction is not a native segwit v0 key-hash input.
    #[error("all inputs must be P2WH, input {index} is not")]
    NonSegwitInput {
        /// Position of the offending input in the exchanged list.
        index: usize,
    },
    /// The declared change does not match the inputs and the contribution.
    #[error("Invalid change output: expected {expected} sat, found {found} sat")]
    InvalidChange {
        /// Change value computed locally.
        expected: u64,
        /// Change value declared.
        found: u64,
    },
    /// The transaction does not spend the expected number of inputs.
    #[error("Input count mismatch: expected {expected}, found {found}")]
    InputCountMismatch {
        /// Number of inputs expected from the exchanged raw inputs.
        expected: usize,
        /// Number of inputs found in the transaction.
        found: usize,
    },
    /// The multisig output value is not the agreed one.
    #[error("Multisig output mismatch: expected {expected} sat, found {found} sat")]
    MultisigAmountMismatch {
        /// Agreed value.
        expected: u64,
        /// Value found in the transaction.
        found: u64,
    },
    /// A signature does not verify against the transaction.
    #[error("Invalid signature for input {0}")]
    InvalidSignature(usize),
    /// Wrong transaction template.
    #[error("Wrong transaction template: {0}")]
    WrongTemplate(&'static str),
    /// Any transaction error not part of this list.
    #[error("Transaction error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new transaction error of type other with an arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Error`, returning its inner error (if any).
    ///
    /// If this [`enum@Error`] was constructed via [`new`] then this function will return [`Some`],
    /// otherwise it will return [`None`].
    ///
    /// [`new`]: Error::new
    ///
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }

    /// Return the category of the failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotEnoughAssets => FailureKind::Resource,
            _ => FailureKind::Validation,
        }
    }
}

impl From<bitcoin::secp256k1::Error> for Error {
    fn from(e: bitcoin::secp256k1::Error) -> Self {
        Self::new(e)
    }
}

impl From<bitcoin::util::psbt::Error> for Error {
    fn from(e: bitcoin::util::psbt::Error) -> Self {
        Self::new(e)
    }
}

impl From<bitcoin::consensus::encode::Error> for Error {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        Self::new(e)
    }
}

/// Identifies the transactions of the protocol, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display(Debug)]
pub enum TxLabel {
    /// Trade-initiation fee paid by the maker when publishing the offer.
    MakerFee,
    /// Trade-initiation fee paid by the taker when accepting the offer.
    TakerFee,
    /// Locks both parties funds in the 2-of-2 multisig output.
    Deposit,
    /// Releases the escrowed funds according to the trade outcome.
    Payout,
    /// Moves the escrowed funds into a timelocked output, self-enforcing escalation.
    Warning,
    /// Spends the warning output after its relative timelock matured.
    Claim,
}
