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

//! Trade setup: each party reserves its contribution to the deposit and the taker discloses its
//! inputs to the maker.

use uuid::Uuid;

use crate::bitcoin::input::{self, ChangeOutput};
use crate::config;
use crate::message::{InputsForDepositTxRequest, TradeMessage};
use crate::model::required;
use crate::protocol::tasks::offer;
use crate::protocol::TaskContext;
use crate::services::AddressContext;
use crate::trade::TradeState;
use crate::Res;

/// Reserve the own inputs of the deposit and bind the multisig, payout and change entries of the
/// wallet to the trade. Inputs already reserved by a previous run are kept.
pub(super) fn reserve_contribution(ctx: &mut TaskContext) -> Res<()> {
    let id = ctx.trade.id;
    if ctx.trade.process.inputs.is_empty() {
        let funding = ctx.trade.role.table().required_funding(&ctx.trade.amounts)?;
        let inputs = ctx.wallet.reserve_inputs_for_trade(id, funding)?;
        let change = match input::change_value(&inputs, funding)? {
            Some(value) => Some(ChangeOutput {
                address: ctx.wallet.address_entry(id, AddressContext::Change)?.address,
                value,
            }),
            None => None,
        };
        ctx.trade.process.inputs = inputs;
        ctx.trade.process.change = change;
    }
    if ctx.trade.process.multisig_pubkey.is_none() {
        let entry = ctx.wallet.address_entry(id, AddressContext::MultiSig)?;
        ctx.trade.process.multisig_pubkey = Some(entry.pubkey);
    }
    if ctx.trade.process.payout_address.is_none() {
        let entry = ctx.wallet.address_entry(id, AddressContext::Payout)?;
        ctx.trade.process.payout_address = Some(entry.address);
    }
    Ok(())
}

pub(super) fn taker_prepare_inputs_request(ctx: &mut TaskContext) -> Res<()> {
    reserve_contribution(ctx)?;
    let trade = &*ctx.trade;
    let model = &trade.process;
    let request = InputsForDepositTxRequest {
        uid: Uuid::new_v4(),
        trade_id: trade.id,
        sender: ctx.node.clone(),
        terms: trade.terms(),
        version: trade.version,
        currency_code: trade.currency_code.clone(),
        taker_fee_tx_id: required(trade.taker_fee_tx_id, "taker_fee_tx_id")?,
        inputs: model.inputs.clone(),
        change: model.change.clone(),
        multisig_pubkey: required(model.multisig_pubkey, "multisig_pubkey")?,
        payout_address: required(model.payout_address.clone(), "payout_address")?,
    };
    ctx.prepare(TradeMessage::InputsForDepositTxRequest(request));
    ctx.trade.state = TradeState::TakerSentInputsRequest;
    Ok(())
}

pub(super) fn maker_process_inputs_request(ctx: &mut TaskContext) -> Res<()> {
    let request = ctx.inputs_request()?;
    input::validate_segwit(&request.inputs)?;
    let peer_funding = ctx
        .trade
        .role
        .peer()
        .table()
        .required_funding(&ctx.trade.amounts)?;
    input::check_change(&request.inputs, peer_funding, request.change.as_ref())?;
    if request.payout_address.network != ctx.config.network {
        return Err(config::Error::NetworkMismatch {
            expected: ctx.config.network,
            found: request.payout_address.network,
        }
        .into());
    }
    offer::check_peer_fee_tx(ctx, request.taker_fee_tx_id, ctx.trade.taker_fee)?;

    let mut peer = ctx.trade.process.peer_writer(request.trade_id)?;
    peer.set_multisig_pubkey(request.multisig_pubkey)?;
    peer.set_inputs(request.inputs.clone(), request.change.clone())?;
    peer.set_payout_address(request.payout_address.clone())?;
    peer.set_fee_tx_id(request.taker_fee_tx_id)?;
    ctx.trade.taker_fee_tx_id = Some(request.taker_fee_tx_id);
    Ok(())
}
