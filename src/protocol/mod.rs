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

//! Execution of the trade protocol. A [`TradeManager`] owns the trades of a node and the
//! collaborators. Every external event is a [`Trigger`], mapped by the [`selector`] to a chain of
//! [`tasks::Step`] executed by a fresh [`TaskRunner`] against the [`TaskContext`] of the trade.
//!
//! ```text
//!  taker                                                maker
//!  ─────                                                ─────
//!  take_offer: fee tx ── InputsForDepositTxRequest ──►  build deposit, sign
//!  verify, sign       ◄── InputsForDepositTxResponse ─  (stripped deposit)
//!                     ── DepositTx (blanked) ─────────►  check txid and contract
//!  combine, broadcast ◄── DepositSignatures ───────────
//!                     ── DepositTxPublished ──────────►
//! ```

use std::collections::BTreeMap;

use bitcoin::{Amount, PublicKey, Txid};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::bitcoin::fee::SatPerVByte;
use crate::bitcoin::timelock::CSVTimelock;
use crate::config::{self, ProtocolConfig};
use crate::message::{MessageKind, TradeMessage};
use crate::offer::{self, Offer};
use crate::role::TradeRole;
use crate::services::{Network, OfferBook, Persistence, Wallet};
use crate::task::{TaskFailure, TaskModel, TaskRunner};
use crate::trade::{NodeAddress, Trade, TradeId, TradeState, TradeTerms};
use crate::transaction::TxLabel;
use crate::{FailureKind, Res};

pub mod selector;
pub mod tasks;

use tasks::Step;

/// Errors raised while executing the protocol.
#[derive(Error, Debug)]
pub enum Error {
    /// The key of the wallet multisig entry is not the key advertised to the peer.
    #[error("Multisig key mismatch: advertised {advertised}, wallet holds {wallet}")]
    MultisigKeyMismatch {
        /// Key sent to the peer.
        advertised: PublicKey,
        /// Key of the wallet address entry.
        wallet: PublicKey,
    },
    /// The wallet holds too many unconfirmed outputs.
    #[error("Too many unconfirmed transactions: {count} unconfirmed outputs, at most {max}")]
    TooManyUnconfirmed {
        /// Unconfirmed outputs of the wallet.
        count: usize,
        /// Configured limit.
        max: usize,
    },
    /// The message is not expected in the current state of the trade.
    #[error("Unexpected {kind} message in state {state}")]
    UnexpectedMessage {
        /// Kind of the message.
        kind: MessageKind,
        /// State of the trade.
        state: TradeState,
    },
    /// No trade with this id.
    #[error("Trade {0} not found")]
    TradeNotFound(TradeId),
    /// The message was not sent by the trading peer.
    #[error("Message from {found} while the trading peer is {expected}")]
    PeerMismatch {
        /// Address of the trading peer.
        expected: NodeAddress,
        /// Address of the sender.
        found: NodeAddress,
    },
    /// The trigger cannot be applied to the trade in its current state.
    #[error("{trigger} is not possible in state {state}")]
    InvalidTrigger {
        /// The trigger.
        trigger: Trigger,
        /// State of the trade.
        state: TradeState,
    },
    /// The deposit may be published, cancel is not possible anymore.
    #[error("Cancel is not permitted in state {0}, the deposit may already be published")]
    CancelNotPermitted(TradeState),
    /// No escrow to escalate in this state.
    #[error("Escalation is not permitted in state {0}")]
    EscalationNotPermitted(TradeState),
    /// The deposit is not old enough to escalate alone.
    #[error("Cooperative window still open: {confirmations} deposit confirmations, {required} required")]
    CooperativeWindowOpen {
        /// Confirmations of the deposit.
        confirmations: u32,
        /// Configured window.
        required: u32,
    },
    /// The warning output is still timelocked.
    #[error("Claim timelock not matured: {confirmations} confirmations of {required}")]
    ClaimTimelockNotMatured {
        /// Confirmations of the warning transaction.
        confirmations: u32,
        /// Relative timelock of the warning output.
        required: u32,
    },
    /// The fee estimate is too old to build a transaction.
    #[error("Fee quote is {age_secs}s old, at most {max_age_secs}s accepted")]
    StaleFeeQuote {
        /// Age of the quote.
        age_secs: u64,
        /// Configured limit.
        max_age_secs: u64,
    },
    /// The contract hash of the peer is not ours.
    #[error("Contract hash mismatch")]
    ContractMismatch,
    /// The contract could not be serialized.
    #[error("Contract encoding failed: {0}")]
    ContractEncoding(#[from] serde_json::Error),
    /// The deposit id is not the one of the agreed deposit.
    #[error("Deposit transaction id mismatch: expected {expected}, found {found}")]
    DepositTxIdMismatch {
        /// Id of the agreed deposit.
        expected: Txid,
        /// Id received.
        found: Txid,
    },
    /// The payout id is not the one of the agreed payout.
    #[error("Payout transaction id mismatch: expected {expected}, found {found}")]
    PayoutTxIdMismatch {
        /// Id of the agreed payout.
        expected: Txid,
        /// Id received.
        found: Txid,
    },
    /// The warning fee rate chosen by the maker is above the configured maximum.
    #[error("Escalation fee rate {rate} is above the maximum {max}")]
    EscalationFeeRateTooHigh {
        /// Proposed rate.
        rate: SatPerVByte,
        /// Configured maximum.
        max: SatPerVByte,
    },
    /// The claim delay of the maker is not the configured one.
    #[error("Claim delay mismatch: expected {expected}, found {found}")]
    ClaimDelayMismatch {
        /// Configured delay.
        expected: CSVTimelock,
        /// Proposed delay.
        found: CSVTimelock,
    },
    /// The trade fee transaction of the peer is unknown.
    #[error("Trade fee transaction {0} not found")]
    FeeTxNotFound(Txid),
    /// The trade fee transaction of the peer does not pay the agreed fee to the fee receiver.
    #[error("Trade fee transaction {txid} pays {paid} to the fee receiver, {expected} expected")]
    FeeTxUnderpaid {
        /// Id of the fee transaction.
        txid: Txid,
        /// Amount paid to the fee receiver.
        paid: Amount,
        /// Agreed fee.
        expected: Amount,
    },
    /// A transaction the step waits for is not confirmed.
    #[error("{0} transaction not confirmed")]
    NotConfirmed(TxLabel),
}

impl Error {
    /// Return the category of the failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnexpectedMessage { .. }
            | Self::TradeNotFound(_)
            | Self::PeerMismatch { .. } => FailureKind::Desync,
            Self::TooManyUnconfirmed { .. } | Self::StaleFeeQuote { .. } => FailureKind::Resource,
            _ => FailureKind::Validation,
        }
    }
}

/// An external event driving a trade.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(Debug)]
pub enum Trigger {
    /// The taker accepts an offer.
    TakeOffer,
    /// A message from the peer arrived.
    Message(MessageKind),
    /// The deposit transaction confirmed.
    DepositConfirmed,
    /// The buyer started the counter currency payment.
    StartPayment,
    /// The seller received the counter currency payment.
    ConfirmPaymentReceived,
    /// The user escalates a stalled trade.
    Escalate,
    /// The user claims the warning output.
    Claim,
    /// The claim transaction confirmed.
    ClaimConfirmed,
    /// The user cancels the trade.
    Cancel,
    /// The maker looks for a deposit the taker never reported.
    RecoverDeposit,
    /// The node restarted.
    Resume,
}

/// Everything a task can access: the trade, its process model and the collaborators.
pub struct TaskContext<'a> {
    /// The trade the chain runs against.
    pub trade: &'a mut Trade,
    /// Wallet of the node.
    pub wallet: &'a mut dyn Wallet,
    /// Network of the node.
    pub network: &'a mut dyn Network,
    /// Trade store.
    pub store: &'a mut dyn Persistence,
    /// Offers of the node.
    pub offer_book: &'a mut dyn OfferBook,
    /// Protocol configuration.
    pub config: &'a ProtocolConfig,
    /// Network address of the node.
    pub node: &'a NodeAddress,
    /// The message that triggered the chain, if any.
    pub message: Option<&'a TradeMessage>,
}

impl TaskModel for TaskContext<'_> {
    fn persist(&mut self) -> Res<()> {
        self.store.save(&*self.trade)?;
        Ok(())
    }
}

fn on_chain_failure(ctx: &mut TaskContext<'_>, failure: &TaskFailure) {
    if failure.error.kind() == FailureKind::Desync {
        return;
    }
    ctx.trade.error_message = Some(failure.to_string());
    if ctx.trade.state.is_before_deposit_published() {
        tasks::offer::compensate(ctx);
        ctx.trade.state = TradeState::Failed;
    }
    if let Err(e) = ctx.persist() {
        error!(trade_id = %ctx.trade.id, "Failed to persist the failed trade: {}", e);
    }
}

/// Owns the trades of a node and drives them with the collaborators.
pub struct TradeManager<W, N, S, O> {
    config: ProtocolConfig,
    node: NodeAddress,
    wallet: W,
    network: N,
    store: S,
    offer_book: O,
    trades: BTreeMap<TradeId, Trade>,
}

impl<W, N, S, O> TradeManager<W, N, S, O>
where
    W: Wallet,
    N: Network,
    S: Persistence,
    O: OfferBook,
{
    /// Create a manager, the configuration must be coherent and on the network of the wallet.
    pub fn new(
        config: ProtocolConfig,
        node: NodeAddress,
        wallet: W,
        network: N,
        store: S,
        offer_book: O,
    ) -> Res<Self> {
        config.validate()?;
        if wallet.network() != config.network {
            return Err(config::Error::NetworkMismatch {
                expected: config.network,
                found: wallet.network(),
            }
            .into());
        }
        Ok(Self {
            config,
            node,
            wallet,
            network,
            store,
            offer_book,
            trades: BTreeMap::new(),
        })
    }

    /// Validate an offer, publish its maker fee transaction and add it to the offer book.
    pub fn place_offer(&mut self, offer: Offer, tx_fee: Amount) -> Res<Offer> {
        offer.validate()?;
        if self.offer_book.find(&offer.id).is_some() || self.trades.contains_key(&offer.id) {
            return Err(offer::Error::AlreadyExists(offer.id).into());
        }
        let offer = tasks::offer::publish_offer(&mut self.wallet, &self.config, offer, tx_fee)?;
        self.offer_book.add_offer(offer.clone())?;
        info!(offer_id = %offer.id, "Offer placed");
        Ok(offer)
    }

    /// Take an offer of the peer, start the trade and send the inputs to the maker.
    pub fn take_offer(&mut self, offer: Offer, terms: TradeTerms) -> Res<TradeId> {
        let id = offer.id;
        if self.trades.contains_key(&id) {
            return Err(offer::Error::AlreadyExists(id).into());
        }
        let peer = offer.maker_address.clone();
        let trade = Trade::new(offer, TradeRole::Taker, terms, peer);
        self.store.save(&trade)?;
        self.trades.insert(id, trade);
        self.trigger(id, Trigger::TakeOffer, None)?;
        Ok(id)
    }

    /// Process a message received from a peer.
    pub fn handle_message(&mut self, message: TradeMessage) -> Res<()> {
        let id = message.trade_id();
        if let Some(trade) = self.trades.get(&id) {
            if trade.process.is_processed(&message.uid()) {
                warn!(trade_id = %id, uid = %message.uid(), kind = %message.kind(), "Ignoring duplicate message");
                return Ok(());
            }
        }

        // a request restarts the offer of a maker trade that failed or was canceled
        if let TradeMessage::InputsForDepositTxRequest(request) = &message {
            let restartable = self
                .trades
                .get(&id)
                .map(|t| t.role.is_maker() && matches!(t.state, TradeState::Failed | TradeState::Canceled))
                .unwrap_or(true);
            if restartable {
                let offer = self
                    .offer_book
                    .find(&id)
                    .ok_or(offer::Error::NotFound(id))?;
                let mut trade = Trade::new(
                    offer,
                    TradeRole::Maker,
                    request.terms,
                    request.sender.clone(),
                );
                if let Some(previous) = self.trades.get(&id) {
                    info!(trade_id = %id, previous_state = %previous.state, "Restarting trade from its offer");
                    trade.restart_from(previous);
                }
                self.trades.insert(id, trade);
            }
        }

        let trade = self.trades.get(&id).ok_or(Error::TradeNotFound(id))?;
        if *message.sender() != trade.peer_address {
            return Err(Error::PeerMismatch {
                expected: trade.peer_address.clone(),
                found: message.sender().clone(),
            }
            .into());
        }

        let res = self.trigger(id, Trigger::Message(message.kind()), Some(&message));
        if let Err(e) = &res {
            if e.kind() == FailureKind::Desync {
                return res;
            }
        }
        if let Some(trade) = self.trades.get_mut(&id) {
            trade.process.mark_processed(message.uid());
            self.store.save(trade)?;
        }
        res
    }

    /// The deposit transaction of the trade confirmed.
    pub fn deposit_confirmed(&mut self, id: TradeId) -> Res<()> {
        self.trigger(id, Trigger::DepositConfirmed, None)
    }

    /// The buyer started the counter currency payment.
    pub fn start_payment(&mut self, id: TradeId) -> Res<()> {
        self.trigger(id, Trigger::StartPayment, None)
    }

    /// The seller received the counter currency payment, release the escrow.
    pub fn confirm_payment_received(&mut self, id: TradeId) -> Res<()> {
        self.trigger(id, Trigger::ConfirmPaymentReceived, None)
    }

    /// Escalate a stalled trade: broadcast the warning transaction, or open a dispute on trades
    /// that are not self-enforcing.
    pub fn escalate(&mut self, id: TradeId) -> Res<()> {
        self.trigger(id, Trigger::Escalate, None)
    }

    /// Claim the warning output once its timelock matured.
    pub fn claim(&mut self, id: TradeId) -> Res<()> {
        self.trigger(id, Trigger::Claim, None)
    }

    /// The claim transaction confirmed.
    pub fn claim_confirmed(&mut self, id: TradeId) -> Res<()> {
        self.trigger(id, Trigger::ClaimConfirmed, None)
    }

    /// Cancel a trade before its deposit can be published.
    pub fn cancel(&mut self, id: TradeId) -> Res<()> {
        self.trigger(id, Trigger::Cancel, None)
    }

    /// Settle a maker trade left waiting after releasing its deposit signatures. If the deposit
    /// reached the chain the trade follows it and can be escalated, otherwise the trade fails, its
    /// offer goes back to the offer book and its inputs are released.
    pub fn recover_deposit(&mut self, id: TradeId) -> Res<()> {
        self.trigger(id, Trigger::RecoverDeposit, None)
    }

    /// Load the stored trades and resume their pending steps. Returns the number of chains
    /// resumed successfully, failures are logged and recorded on their trade.
    pub fn resume(&mut self) -> Res<usize> {
        let mut resumed = 0;
        for trade in self.store.load_all()? {
            let id = trade.id;
            let steps = selector::resume(&trade);
            self.trades.insert(id, trade);
            if let Some(steps) = steps {
                match self.run_chain(id, Trigger::Resume, steps, None) {
                    Ok(()) => resumed += 1,
                    Err(e) => warn!(trade_id = %id, "Resume failed: {}", e),
                }
            }
        }
        Ok(resumed)
    }

    fn trigger(
        &mut self,
        id: TradeId,
        trigger: Trigger,
        message: Option<&TradeMessage>,
    ) -> Res<()> {
        let trade = self.trades.get(&id).ok_or(Error::TradeNotFound(id))?;
        let steps = selector::select(trade, trigger)?;
        self.run_chain(id, trigger, steps, message)
    }

    fn run_chain(
        &mut self,
        id: TradeId,
        trigger: Trigger,
        steps: Vec<Step>,
        message: Option<&TradeMessage>,
    ) -> Res<()> {
        let trade = self.trades.get_mut(&id).ok_or(Error::TradeNotFound(id))?;
        let name = format!("{} {}", trade.role, trigger);
        let mut ctx = TaskContext {
            trade,
            wallet: &mut self.wallet,
            network: &mut self.network,
            store: &mut self.store,
            offer_book: &mut self.offer_book,
            config: &self.config,
            node: &self.node,
            message,
        };
        TaskRunner::new(name, steps)
            .on_success(|ctx| {
                info!(trade_id = %ctx.trade.id, state = %ctx.trade.state, "Trade progressed")
            })
            .on_failure(on_chain_failure)
            .run(&mut ctx)
            .map_err(crate::Error::from)
    }

    /// Return the trade with this id.
    pub fn trade(&self, id: &TradeId) -> Option<&Trade> {
        self.trades.get(id)
    }

    /// Iterate over the trades.
    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values()
    }

    /// Protocol configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Network address of the node.
    pub fn node_address(&self) -> &NodeAddress {
        &self.node
    }

    /// The wallet.
    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    /// The wallet, mutably.
    pub fn wallet_mut(&mut self) -> &mut W {
        &mut self.wallet
    }

    /// The network.
    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    /// The trade store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The trade store, mutably.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The offer book.
    pub fn offer_book(&self) -> &O {
        &self.offer_book
    }

    /// Stop the manager and give back its collaborators, the trades stay in the store.
    pub fn into_parts(self) -> (W, N, S, O) {
        (self.wallet, self.network, self.store, self.offer_book)
    }
}
