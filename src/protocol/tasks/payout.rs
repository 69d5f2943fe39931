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

//! Cooperative payout. The buyer signs the payout first and sends its signature with the payment
//! started message; the seller completes, broadcasts and hands the payout back once the counter
//! currency payment is received.

use tracing::info;
use uuid::Uuid;

use crate::message::{PaymentStartedMessage, PayoutTxPublishedMessage, TradeMessage};
use crate::model::required;
use crate::protocol::{Error, TaskContext};
use crate::services::AddressContext;
use crate::trade::TradeState;
use crate::Res;

pub(super) fn sign_payout(ctx: &mut TaskContext) -> Res<()> {
    ctx.check_multisig_key()?;
    let payout = ctx.payout_tx()?;
    let sig = ctx.wallet.sign_hash(
        ctx.trade.id,
        AddressContext::MultiSig,
        payout.signature_hash()?,
    )?;
    ctx.trade.process.payout_signature = Some(sig);
    Ok(())
}

pub(super) fn prepare_payment_started(ctx: &mut TaskContext) -> Res<()> {
    let message = PaymentStartedMessage {
        uid: Uuid::new_v4(),
        trade_id: ctx.trade.id,
        sender: ctx.node.clone(),
        payout_signature: required(ctx.trade.process.payout_signature, "payout_signature")?,
    };
    ctx.prepare(TradeMessage::PaymentStarted(message));
    ctx.trade.state = TradeState::BuyerSentPaymentStarted;
    Ok(())
}

pub(super) fn process_payment_started(ctx: &mut TaskContext) -> Res<()> {
    let message = ctx.payment_started()?;
    let mut payout = ctx.payout_tx()?;
    let peer_key = *ctx.keys()?.get(ctx.trade.role.side.other());
    payout.add_signature(peer_key, message.payout_signature)?;
    ctx.trade
        .process
        .peer_writer(message.trade_id)?
        .set_payout_signature(message.payout_signature)?;
    ctx.trade.state = TradeState::SellerReceivedPaymentStarted;
    Ok(())
}

pub(super) fn finalize_payout(ctx: &mut TaskContext) -> Res<()> {
    if ctx.trade.process.payout_tx.is_some() {
        return Ok(());
    }
    ctx.check_multisig_key()?;
    let keys = ctx.keys()?;
    let side = ctx.trade.role.side;
    let mut payout = ctx.payout_tx()?;
    let peer_sig = *required(
        ctx.trade.process.peer().payout_signature(),
        "peer_payout_signature",
    )?;
    payout.add_signature(*keys.get(side.other()), peer_sig)?;
    let own_sig = ctx.wallet.sign_hash(
        ctx.trade.id,
        AddressContext::MultiSig,
        payout.signature_hash()?,
    )?;
    payout.add_signature(*keys.get(side), own_sig)?;
    payout.finalize()?;
    ctx.trade.process.payout_tx = Some(payout.extract()?);
    Ok(())
}

pub(super) fn broadcast_payout(ctx: &mut TaskContext) -> Res<()> {
    let payout = required(ctx.trade.process.payout_tx.as_ref(), "payout_tx")?;
    let txid = ctx.wallet.broadcast(payout)?;
    ctx.trade.payout_tx_id = Some(txid);
    ctx.trade.state = TradeState::PayoutPublished;
    info!(trade_id = %ctx.trade.id, %txid, "Payout published");
    Ok(())
}

pub(super) fn prepare_payout_published(ctx: &mut TaskContext) -> Res<()> {
    let message = PayoutTxPublishedMessage {
        uid: Uuid::new_v4(),
        trade_id: ctx.trade.id,
        sender: ctx.node.clone(),
        payout_tx: required(ctx.trade.process.payout_tx.clone(), "payout_tx")?,
    };
    ctx.prepare(TradeMessage::PayoutTxPublished(message));
    Ok(())
}

pub(super) fn process_payout_published(ctx: &mut TaskContext) -> Res<()> {
    let message = ctx.payout_published()?;
    let expected = ctx.payout_tx()?.txid();
    let found = message.payout_tx.txid();
    if found != expected {
        return Err(Error::PayoutTxIdMismatch { expected, found }.into());
    }
    ctx.trade.payout_tx_id = Some(found);
    ctx.trade.process.payout_tx = Some(message.payout_tx.clone());
    ctx.trade.state = TradeState::PayoutPublished;
    Ok(())
}

pub(super) fn complete(ctx: &mut TaskContext) -> Res<()> {
    ctx.trade.state = TradeState::Completed;
    ctx.wallet.release_reservation(ctx.trade.id);
    info!(trade_id = %ctx.trade.id, "Trade completed");
    Ok(())
}
