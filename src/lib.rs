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

//! Escrow core library: the trade execution protocol of a peer-to-peer Bitcoin exchange.
//!
//! Two untrusted parties, the maker who published an offer and the taker who accepted it, build
//! a 2-of-2 multisig deposit transaction together, sign it in a way that prevents any premature
//! broadcast, and later release the escrowed funds with a cooperatively signed payout
//! transaction. With the self-enforcing protocol version a party can escalate alone: broadcast a
//! pre-signed warning transaction and, once its relative timelock matured, a claim transaction.
//!
//! The protocol is executed as chains of small tasks ([`task`]) selected from the role, side,
//! version and current state of a trade ([`protocol::selector`]). Wallet, network, persistence
//! and offer book are consumed through the traits of [`services`].

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate serde;

use thiserror::Error;

pub use ::uuid::Uuid;

pub mod bitcoin;
pub mod config;
pub mod escalation;
pub mod message;
pub mod model;
pub mod offer;
pub mod protocol;
pub mod role;
pub mod services;
pub mod task;
pub mod trade;
pub mod transaction;
pub mod version;

/// The broad category of a failure, lets callers branch on the nature of an error without
/// matching on messages.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(Debug)]
pub enum FailureKind {
    /// Offer, amount, input type, key or contract mismatch. Never retried automatically.
    Validation,
    /// Insufficient funds, too many unconfirmed transactions, fee estimation or storage
    /// failures. Actionable by the user.
    Resource,
    /// Broadcast rejection or message send failure.
    Transport,
    /// A message for the wrong trade or for a step that is not the current one.
    Desync,
}

/// A list of all the errors the library can return.
#[derive(Error, Debug)]
pub enum Error {
    /// An offer validation error.
    #[error("Offer error: {0}")]
    Offer(#[from] offer::Error),
    /// A transaction construction or verification error.
    #[error("Transaction error: {0}")]
    Transaction(#[from] transaction::Error),
    /// A process model error.
    #[error("Model error: {0}")]
    Model(#[from] model::Error),
    /// A wallet collaborator error.
    #[error("Wallet error: {0}")]
    Wallet(#[from] services::WalletError),
    /// A network collaborator error.
    #[error("Network error: {0}")]
    Network(#[from] services::NetworkError),
    /// A persistence collaborator error.
    #[error("Storage error: {0}")]
    Store(#[from] services::StoreError),
    /// A protocol execution error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::Error),
    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),
    /// A task chain stopped on a failing task.
    #[error("{chain} failed at {task}: {source}")]
    ChainFailed {
        /// Name of the chain.
        chain: String,
        /// Name of the failing task.
        task: String,
        /// The error raised by the task.
        source: Box<Error>,
    },
}

impl Error {
    /// Return the category of the failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Offer(_) | Error::Config(_) => FailureKind::Validation,
            Error::Transaction(e) => e.kind(),
            Error::Model(e) => e.kind(),
            Error::Wallet(e) => e.kind(),
            Error::Network(_) => FailureKind::Transport,
            Error::Store(_) => FailureKind::Resource,
            Error::Protocol(e) => e.kind(),
            Error::ChainFailed { source, .. } => source.kind(),
        }
    }

    /// Return the innermost error, unwrapping chain failures.
    pub fn root(&self) -> &Error {
        match self {
            Error::ChainFailed { source, .. } => source.root(),
            e => e,
        }
    }
}

/// Result of a high level function.
pub type Res<T> = Result<T, Error>;
