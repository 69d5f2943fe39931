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

//! Offer checks, trade fee transactions and cancellation.

use bitcoin::{Amount, Txid};
use tracing::{debug, info};

use crate::bitcoin::{amount, trade_fee};
use crate::config::ProtocolConfig;
use crate::message::TradeMessage;
use crate::offer::{self, Offer};
use crate::protocol::{Error, TaskContext};
use crate::services::{AddressContext, Wallet};
use crate::trade::{TradeId, TradeState};
use crate::Res;

pub(crate) fn check_tx_fee(config: &ProtocolConfig, tx_fee: Amount) -> Res<()> {
    if !config.accepts_tx_fee(tx_fee) {
        return Err(offer::Error::TxFeeOutOfRange {
            tx_fee,
            min: config.min_tx_fee,
            max: config.max_tx_fee,
        }
        .into());
    }
    Ok(())
}

pub(crate) fn check_unconfirmed<W>(wallet: &W, config: &ProtocolConfig) -> Res<()>
where
    W: Wallet + ?Sized,
{
    let count = wallet.unconfirmed_change_count();
    if count > config.max_unconfirmed_change_outputs {
        return Err(Error::TooManyUnconfirmed {
            count,
            max: config.max_unconfirmed_change_outputs,
        }
        .into());
    }
    Ok(())
}

fn sign_and_broadcast_fee_tx<W>(
    wallet: &mut W,
    config: &ProtocolConfig,
    id: TradeId,
    trade_fee: Amount,
    tx_fee: Amount,
) -> Res<Txid>
where
    W: Wallet + ?Sized,
{
    let inputs = wallet.reserve_inputs_for_trade(id, amount::checked_sum([trade_fee, tx_fee])?)?;
    let change = wallet.address_entry(id, AddressContext::Change)?;
    let mut tx = trade_fee::build(
        &inputs,
        &config.fee_receiver,
        trade_fee,
        tx_fee,
        &change.address,
    )?;
    wallet.sign_inputs(&mut tx, &inputs)?;
    Ok(wallet.broadcast(&tx)?)
}

/// Fund, sign and broadcast a trade fee transaction. The inputs are reserved only while the
/// transaction is built.
pub(crate) fn publish_fee_tx<W>(
    wallet: &mut W,
    config: &ProtocolConfig,
    id: TradeId,
    trade_fee: Amount,
    tx_fee: Amount,
) -> Res<Txid>
where
    W: Wallet + ?Sized,
{
    let res = sign_and_broadcast_fee_tx(wallet, config, id, trade_fee, tx_fee);
    wallet.release_reservation(id);
    let txid = res?;
    info!(trade_id = %id, %txid, fee = %trade_fee, "Trade fee transaction published");
    Ok(txid)
}

/// Publish the maker fee transaction of an offer.
pub(crate) fn publish_offer<W>(
    wallet: &mut W,
    config: &ProtocolConfig,
    mut offer: Offer,
    tx_fee: Amount,
) -> Res<Offer>
where
    W: Wallet + ?Sized,
{
    check_tx_fee(config, tx_fee)?;
    check_unconfirmed(wallet, config)?;
    let txid = publish_fee_tx(wallet, config, offer.id, offer.maker_fee, tx_fee)?;
    offer.maker_fee_tx_id = Some(txid);
    Ok(offer)
}

/// Fails unless the fee transaction `txid` of the peer pays at least `fee` to the configured fee
/// receiver.
pub(crate) fn check_peer_fee_tx(ctx: &TaskContext, txid: Txid, fee: Amount) -> Res<()> {
    let tx = ctx
        .wallet
        .transaction(&txid)
        .ok_or(Error::FeeTxNotFound(txid))?;
    let receiver = ctx.config.fee_receiver.script_pubkey();
    let paid = Amount::from_sat(
        tx.output
            .iter()
            .filter(|o| o.script_pubkey == receiver)
            .map(|o| o.value)
            .sum(),
    );
    if paid < fee {
        return Err(Error::FeeTxUnderpaid {
            txid,
            paid,
            expected: fee,
        }
        .into());
    }
    Ok(())
}

pub(super) fn validate_offer(ctx: &mut TaskContext) -> Res<()> {
    let trade = &*ctx.trade;
    // the maker checks what the taker proposed, the taker what it accepted
    let (currency_code, version) = match ctx.message {
        Some(TradeMessage::InputsForDepositTxRequest(request)) => {
            (request.currency_code.as_str(), request.version)
        }
        _ => (trade.currency_code.as_str(), trade.version),
    };
    trade.offer.check_terms(
        trade.amounts.trade_amount,
        trade.price,
        currency_code,
        version,
    )?;
    check_tx_fee(ctx.config, trade.amounts.tx_fee)
}

pub(super) fn check_unconfirmed_limit(ctx: &mut TaskContext) -> Res<()> {
    check_unconfirmed(&*ctx.wallet, ctx.config)
}

pub(super) fn create_taker_fee_tx(ctx: &mut TaskContext) -> Res<()> {
    if ctx.trade.taker_fee_tx_id.is_none() {
        let txid = publish_fee_tx(
            &mut *ctx.wallet,
            ctx.config,
            ctx.trade.id,
            ctx.trade.taker_fee,
            ctx.trade.amounts.tx_fee,
        )?;
        ctx.trade.taker_fee_tx_id = Some(txid);
        ctx.trade.process.fee_tx_id = Some(txid);
    }
    ctx.trade.state = TradeState::TakerPublishedFeeTx;
    Ok(())
}

pub(super) fn remove_offer(ctx: &mut TaskContext) -> Res<()> {
    if ctx.offer_book.remove_offer(&ctx.trade.id).is_none() {
        debug!(trade_id = %ctx.trade.id, "Offer already removed");
    }
    Ok(())
}

/// Give back what a trade that did not publish its deposit holds: the offer of the maker goes
/// back to the offer book and the reserved inputs are released.
pub(crate) fn compensate(ctx: &mut TaskContext) {
    if ctx.trade.role.is_maker() {
        ctx.offer_book.restore_offer(ctx.trade.offer.clone());
    }
    ctx.wallet.release_reservation(ctx.trade.id);
}

pub(super) fn cancel(ctx: &mut TaskContext) -> Res<()> {
    compensate(ctx);
    ctx.trade.state = TradeState::Canceled;
    info!(trade_id = %ctx.trade.id, "Trade canceled");
    Ok(())
}
