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

//! The protocol steps. Every [`Step`] is a small task run against the [`TaskContext`] of a
//! trade, chained by the [`super::selector`].
//!
//! Steps sending a message are split in two: a `Prepare*` step builds the message, stores it as
//! the last sent message and advances the trade state, then [`Step::SendMessage`] hands it to the
//! network. A chain interrupted between the two is completed on resume by sending the stored
//! message again, with the same message id.

use bitcoin::{Address, PublicKey};
use tracing::debug;

use crate::bitcoin::deposit::Contribution;
use crate::bitcoin::multisig::MultisigKeys;
use crate::bitcoin::transaction::MetadataOutput;
use crate::bitcoin::warning::WarningLock;
use crate::bitcoin::{DepositTx, PayoutTx, WarningTx};
use crate::message::{MessageKind, TradeMessage};
use crate::model::required;
use crate::protocol::{Error, TaskContext};
use crate::role::TradeSide;
use crate::services::AddressContext;
use crate::task::Task;
use crate::trade::Contract;
use crate::Res;

pub mod deposit;
pub mod escalation;
pub mod offer;
pub mod payout;
pub mod setup;

macro_rules! steps {
    ($($(#[$doc:meta])* $step:ident => $run:path, mutates: $mutates:expr;)+) => {
        /// A step of the trade protocol.
        #[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[display(Debug)]
        pub enum Step {
            $($(#[$doc])* $step,)+
        }

        impl<'a> Task<TaskContext<'a>> for Step {
            fn name(&self) -> &'static str {
                match self {
                    $(Self::$step => stringify!($step),)+
                }
            }

            fn run(&self, ctx: &mut TaskContext<'a>) -> Res<()> {
                match self {
                    $(Self::$step => $run(ctx),)+
                }
            }

            fn mutates(&self) -> bool {
                match self {
                    $(Self::$step => $mutates,)+
                }
            }
        }
    };
}

steps! {
    /// Check the trade terms against the offer and the configured fee bounds.
    ValidateOffer => offer::validate_offer, mutates: false;
    /// Refuse to trade with too many unconfirmed outputs in the wallet.
    CheckUnconfirmedLimit => offer::check_unconfirmed_limit, mutates: false;
    /// Publish the taker fee transaction.
    CreateTakerFeeTx => offer::create_taker_fee_tx, mutates: true;
    /// Take the offer out of the offer book.
    RemoveOffer => offer::remove_offer, mutates: true;
    /// Cancel the trade and release its resources.
    Cancel => offer::cancel, mutates: true;
    /// Reserve the taker inputs and prepare the inputs request.
    TakerPrepareInputsRequest => setup::taker_prepare_inputs_request, mutates: true;
    /// Validate the taker inputs, change and fee transaction.
    MakerProcessInputsRequest => setup::maker_process_inputs_request, mutates: true;
    /// Build the deposit and sign the maker inputs.
    MakerCreateDeposit => deposit::maker_create_deposit, mutates: true;
    /// Fix the fee rate and timelock of the warning transactions.
    MakerSetEscalationTerms => deposit::maker_set_escalation_terms, mutates: true;
    /// Sign the warning transaction of the peer.
    SignPeerWarning => deposit::sign_peer_warning, mutates: true;
    /// Prepare the response carrying the stripped deposit.
    MakerPrepareInputsResponse => deposit::maker_prepare_inputs_response, mutates: true;
    /// Verify the deposit received from the maker against the one built locally.
    TakerProcessInputsResponse => deposit::taker_process_inputs_response, mutates: true;
    /// Verify the peer signature on our warning transaction.
    VerifyPeerWarningSignature => deposit::verify_peer_warning_signature, mutates: true;
    /// Sign the taker inputs of the deposit.
    TakerSignDeposit => deposit::taker_sign_deposit, mutates: true;
    /// Prepare the deposit message, taker input witnesses blanked.
    TakerPrepareDepositTx => deposit::taker_prepare_deposit_tx, mutates: true;
    /// Check the deposit returned by the taker and the contract hash.
    MakerProcessDepositTx => deposit::maker_process_deposit_tx, mutates: true;
    /// Prepare the release of the maker input witnesses.
    MakerPrepareDepositSignatures => deposit::maker_prepare_deposit_signatures, mutates: true;
    /// Combine and verify the maker input witnesses.
    TakerProcessDepositSignatures => deposit::taker_process_deposit_signatures, mutates: true;
    /// Broadcast the fully signed deposit.
    BroadcastDeposit => deposit::broadcast_deposit, mutates: true;
    /// Prepare the deposit published notification.
    PrepareDepositPublished => deposit::prepare_deposit_published, mutates: true;
    /// Record the deposit published by the taker.
    MakerProcessDepositPublished => deposit::maker_process_deposit_published, mutates: true;
    /// Follow a deposit the taker did not report, or give up the trade.
    MakerRecoverDeposit => deposit::maker_recover_deposit, mutates: true;
    /// Check the deposit confirmed.
    ConfirmDeposit => deposit::confirm_deposit, mutates: true;
    /// Sign the payout as buyer.
    SignPayout => payout::sign_payout, mutates: true;
    /// Prepare the payment started message.
    PreparePaymentStarted => payout::prepare_payment_started, mutates: true;
    /// Verify the buyer payout signature.
    ProcessPaymentStarted => payout::process_payment_started, mutates: true;
    /// Sign and finalize the payout as seller.
    FinalizePayout => payout::finalize_payout, mutates: true;
    /// Broadcast the payout.
    BroadcastPayout => payout::broadcast_payout, mutates: true;
    /// Prepare the payout published message.
    PreparePayoutPublished => payout::prepare_payout_published, mutates: true;
    /// Check the payout published by the seller.
    ProcessPayoutPublished => payout::process_payout_published, mutates: true;
    /// Close the trade.
    Complete => payout::complete, mutates: true;
    /// Refuse to escalate before the end of the cooperative window.
    CheckCooperativeWindow => escalation::check_cooperative_window, mutates: false;
    /// Sign and finalize our warning transaction.
    FinalizeWarning => escalation::finalize_warning, mutates: true;
    /// Broadcast our warning transaction.
    BroadcastWarning => escalation::broadcast_warning, mutates: true;
    /// Hand the trade over to arbitration.
    OpenDispute => escalation::open_dispute, mutates: true;
    /// Refuse to claim before the warning output matured.
    CheckClaimMatured => escalation::check_claim_matured, mutates: false;
    /// Refuse to build a transaction from a stale fee estimate.
    CheckFeeQuote => escalation::check_fee_quote, mutates: false;
    /// Build and sign the claim transaction.
    SignClaim => escalation::sign_claim, mutates: true;
    /// Broadcast the claim transaction.
    BroadcastClaim => escalation::broadcast_claim, mutates: true;
    /// Check the claim confirmed and settle the trade.
    ConfirmClaim => escalation::confirm_claim, mutates: true;
    /// Send the last prepared message.
    SendMessage => send_message, mutates: false;
}

fn send_message(ctx: &mut TaskContext) -> Res<()> {
    let message = required(ctx.trade.process.last_sent.clone(), "last_sent")?;
    debug!(trade_id = %ctx.trade.id, peer = %ctx.trade.peer_address, "Sending {}", message);
    ctx.network.send(&ctx.trade.peer_address, message)?;
    Ok(())
}

macro_rules! message_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub(crate) fn $name(&self) -> Res<&'a $ty> {
            match self.message {
                Some(TradeMessage::$variant(m)) => Ok(m),
                _ => Err(Error::UnexpectedMessage {
                    kind: MessageKind::$variant,
                    state: self.trade.state,
                }
                .into()),
            }
        }
    };
}

impl<'a> TaskContext<'a> {
    message_getter!(
        inputs_request,
        InputsForDepositTxRequest,
        crate::message::InputsForDepositTxRequest
    );
    message_getter!(
        inputs_response,
        InputsForDepositTxResponse,
        crate::message::InputsForDepositTxResponse
    );
    message_getter!(deposit_tx_message, DepositTx, crate::message::DepositTxMessage);
    message_getter!(
        deposit_signatures,
        DepositSignatures,
        crate::message::DepositSignaturesMessage
    );
    message_getter!(
        deposit_published,
        DepositTxPublished,
        crate::message::DepositTxPublishedMessage
    );
    message_getter!(
        payment_started,
        PaymentStarted,
        crate::message::PaymentStartedMessage
    );
    message_getter!(
        payout_published,
        PayoutTxPublished,
        crate::message::PayoutTxPublishedMessage
    );

    /// Store a prepared message as the last sent.
    pub(crate) fn prepare(&mut self, message: TradeMessage) {
        self.trade.process.last_sent = Some(message);
    }

    /// The 2-of-2 keys, once the peer key is known.
    pub(crate) fn keys(&self) -> Res<MultisigKeys> {
        let model = &self.trade.process;
        let own = required(model.multisig_pubkey, "multisig_pubkey")?;
        let peer = *required(model.peer().multisig_pubkey(), "peer_multisig_pubkey")?;
        Ok(MultisigKeys::from_side(self.trade.role.side, own, peer))
    }

    /// Fails if the wallet multisig entry of the trade no longer holds the key advertised to the
    /// peer. Called before signing anything with it.
    pub(crate) fn check_multisig_key(&mut self) -> Res<PublicKey> {
        let advertised = required(self.trade.process.multisig_pubkey, "multisig_pubkey")?;
        let entry = self
            .wallet
            .address_entry(self.trade.id, AddressContext::MultiSig)?;
        if entry.pubkey != advertised {
            return Err(Error::MultisigKeyMismatch {
                advertised,
                wallet: entry.pubkey,
            }
            .into());
        }
        Ok(advertised)
    }

    /// Number of inputs of the maker, placed first in the deposit.
    pub(crate) fn maker_input_count(&self) -> Res<usize> {
        let model = &self.trade.process;
        Ok(if self.trade.role.is_maker() {
            model.inputs.len()
        } else {
            required(model.peer().inputs(), "peer_inputs")?.len()
        })
    }

    /// Build the unsigned deposit from both contributions.
    pub(crate) fn build_deposit(&self) -> Res<DepositTx> {
        let model = &self.trade.process;
        let own = Contribution {
            inputs: &model.inputs,
            change: model.change.as_ref(),
        };
        let peer = Contribution {
            inputs: required(model.peer().inputs(), "peer_inputs")?,
            change: model.peer().change(),
        };
        let (maker, taker) = if self.trade.role.is_maker() {
            (own, peer)
        } else {
            (peer, own)
        };
        Ok(DepositTx::initialize(
            maker,
            taker,
            &self.keys()?,
            self.trade.amounts.multisig_output_amount()?,
        )?)
    }

    pub(crate) fn prepared_deposit(&self) -> Res<&DepositTx> {
        Ok(required(
            self.trade.process.prepared_deposit.as_ref(),
            "prepared_deposit",
        )?)
    }

    /// The escrow output of the agreed deposit.
    pub(crate) fn escrow_output(&self) -> Res<MetadataOutput> {
        Ok(self.prepared_deposit()?.escrow_output(&self.keys()?)?)
    }

    /// The lock of the warning output claimable by `side`.
    pub(crate) fn warning_lock(&self, side: TradeSide) -> Res<WarningLock> {
        let keys = self.keys()?;
        Ok(WarningLock {
            keys,
            claimant: *keys.get(side),
            delay: required(self.trade.process.claim_delay, "claim_delay")?,
        })
    }

    /// The warning transaction of `side`, without signatures.
    pub(crate) fn warning_tx(&self, side: TradeSide) -> Res<WarningTx> {
        let rate = required(self.trade.process.escalation_fee_rate, "escalation_fee_rate")?;
        Ok(WarningTx::initialize(
            &self.escrow_output()?,
            &self.warning_lock(side)?,
            rate,
        )?)
    }

    fn payout_addresses(&self) -> Res<(&Address, &Address)> {
        let model = &self.trade.process;
        let own = required(model.payout_address.as_ref(), "payout_address")?;
        let peer = required(model.peer().payout_address(), "peer_payout_address")?;
        Ok(if self.trade.role.is_buyer() {
            (own, peer)
        } else {
            (peer, own)
        })
    }

    /// The cooperative payout, without signatures.
    pub(crate) fn payout_tx(&self) -> Res<PayoutTx> {
        let (buyer_address, seller_address) = self.payout_addresses()?;
        let amounts = &self.trade.amounts;
        let own = self.trade.role.table().payout(amounts)?;
        let peer = self.trade.role.peer().table().payout(amounts)?;
        let (buyer_amount, seller_amount) = if self.trade.role.is_buyer() {
            (own, peer)
        } else {
            (peer, own)
        };
        Ok(PayoutTx::initialize(
            &self.escrow_output()?,
            buyer_address,
            buyer_amount,
            seller_address,
            seller_amount,
        )?)
    }

    /// The contract of the trade, once the deposit is agreed.
    pub(crate) fn contract(&self) -> Res<Contract> {
        let (buyer_payout_address, seller_payout_address) = self.payout_addresses()?;
        let trade = &*self.trade;
        Ok(Contract {
            trade_id: trade.id,
            version: trade.version,
            amounts: trade.amounts,
            price: trade.price,
            currency_code: trade.currency_code.clone(),
            payment_method_id: trade.offer.payment_method_id.clone(),
            maker_side: trade.offer.direction,
            multisig_keys: self.keys()?,
            buyer_payout_address: buyer_payout_address.clone(),
            seller_payout_address: seller_payout_address.clone(),
            maker_fee_tx_id: trade.maker_fee_tx_id,
            taker_fee_tx_id: trade.taker_fee_tx_id,
            deposit_tx_id: self.prepared_deposit()?.txid(),
        })
    }
}
