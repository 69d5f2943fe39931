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

//! Deposit transaction exchange.
//!
//! The maker builds the deposit and signs its own inputs but only sends it stripped of every
//! witness. The taker rebuilds it from the disclosed inputs, signs its inputs and returns it with
//! its own witnesses blanked. The maker then releases its input witnesses, and only the taker can
//! assemble and broadcast the fully signed deposit.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bitcoin::input;
use crate::message::{
    DepositSignaturesMessage, DepositTxMessage, DepositTxPublishedMessage,
    InputsForDepositTxResponse, TradeMessage,
};
use crate::model::required;
use crate::protocol::tasks::escalation::fresh_fee_rate;
use crate::protocol::tasks::offer;
use crate::protocol::tasks::setup::reserve_contribution;
use crate::protocol::{Error, TaskContext};
use crate::services::AddressContext;
use crate::trade::TradeState;
use crate::transaction::{self, TxLabel};
use crate::Res;

fn reject_signed(deposit: &crate::bitcoin::DepositTx) -> Res<()> {
    if deposit.has_any_witness() {
        return Err(transaction::Error::WrongTemplate("Received deposit carries signatures").into());
    }
    Ok(())
}

pub(super) fn maker_create_deposit(ctx: &mut TaskContext) -> Res<()> {
    reserve_contribution(ctx)?;
    let deposit = ctx.build_deposit()?;
    ctx.check_multisig_key()?;
    let mut signed = deposit.clone();
    ctx.wallet
        .sign_inputs(signed.as_tx_mut(), &ctx.trade.process.inputs)?;
    debug!(trade_id = %ctx.trade.id, txid = %deposit.txid(), "Deposit built and signed");
    ctx.trade.process.prepared_deposit = Some(deposit);
    ctx.trade.process.own_signed_deposit = Some(signed);
    Ok(())
}

pub(super) fn maker_set_escalation_terms(ctx: &mut TaskContext) -> Res<()> {
    let rate = fresh_fee_rate(ctx)?;
    ctx.trade.process.escalation_fee_rate = Some(rate);
    ctx.trade.process.claim_delay = Some(ctx.config.claim_delay);
    Ok(())
}

pub(super) fn sign_peer_warning(ctx: &mut TaskContext) -> Res<()> {
    let tx = ctx.warning_tx(ctx.trade.role.side.other())?;
    ctx.check_multisig_key()?;
    let sig = ctx
        .wallet
        .sign_hash(ctx.trade.id, AddressContext::MultiSig, tx.signature_hash()?)?;
    debug!(
        trade_id = %ctx.trade.id,
        sig = %hex::encode(sig.serialize_compact()),
        "Peer warning transaction signed"
    );
    ctx.trade.process.peer_warning_signature = Some(sig);
    Ok(())
}

pub(super) fn maker_prepare_inputs_response(ctx: &mut TaskContext) -> Res<()> {
    let trade = &*ctx.trade;
    let model = &trade.process;
    let response = InputsForDepositTxResponse {
        uid: Uuid::new_v4(),
        trade_id: trade.id,
        sender: ctx.node.clone(),
        deposit_tx: ctx.prepared_deposit()?.stripped(),
        inputs: model.inputs.clone(),
        change: model.change.clone(),
        multisig_pubkey: required(model.multisig_pubkey, "multisig_pubkey")?,
        payout_address: required(model.payout_address.clone(), "payout_address")?,
        maker_fee_tx_id: trade.maker_fee_tx_id,
        escalation_fee_rate: model.escalation_fee_rate,
        claim_delay: model.claim_delay,
        warning_signature: model.peer_warning_signature,
    };
    ctx.prepare(TradeMessage::InputsForDepositTxResponse(response));
    ctx.trade.state = TradeState::MakerSentInputsResponse;
    Ok(())
}

pub(super) fn taker_process_inputs_response(ctx: &mut TaskContext) -> Res<()> {
    let response = ctx.inputs_response()?;
    reject_signed(&response.deposit_tx)?;
    input::validate_segwit(&response.inputs)?;
    let peer_funding = ctx
        .trade
        .role
        .peer()
        .table()
        .required_funding(&ctx.trade.amounts)?;
    input::check_change(&response.inputs, peer_funding, response.change.as_ref())?;
    if let Some(txid) = response.maker_fee_tx_id {
        offer::check_peer_fee_tx(ctx, txid, ctx.trade.offer.maker_fee)?;
    }

    if ctx.trade.version.is_self_enforcing() {
        let rate = required(response.escalation_fee_rate, "escalation_fee_rate")?;
        if rate > ctx.config.max_escalation_fee_rate {
            return Err(Error::EscalationFeeRateTooHigh {
                rate,
                max: ctx.config.max_escalation_fee_rate,
            }
            .into());
        }
        let delay = required(response.claim_delay, "claim_delay")?;
        if delay != ctx.config.claim_delay {
            return Err(Error::ClaimDelayMismatch {
                expected: ctx.config.claim_delay,
                found: delay,
            }
            .into());
        }
        ctx.trade.process.escalation_fee_rate = Some(rate);
        ctx.trade.process.claim_delay = Some(delay);
    }

    let mut peer = ctx.trade.process.peer_writer(response.trade_id)?;
    peer.set_multisig_pubkey(response.multisig_pubkey)?;
    peer.set_inputs(response.inputs.clone(), response.change.clone())?;
    peer.set_payout_address(response.payout_address.clone())?;
    if let Some(txid) = response.maker_fee_tx_id {
        peer.set_fee_tx_id(txid)?;
    }
    peer.set_deposit_tx(response.deposit_tx.clone())?;
    ctx.trade.maker_fee_tx_id = response.maker_fee_tx_id;

    let expected = ctx.build_deposit()?;
    response
        .deposit_tx
        .verify_template(&expected, ctx.trade.amounts.multisig_output_amount()?)?;
    ctx.trade.process.prepared_deposit = Some(expected);
    Ok(())
}

pub(super) fn verify_peer_warning_signature(ctx: &mut TaskContext) -> Res<()> {
    let (trade_id, sig) = match ctx.message {
        Some(TradeMessage::InputsForDepositTxResponse(m)) => (m.trade_id, m.warning_signature),
        Some(TradeMessage::DepositTx(m)) => (m.trade_id, m.warning_signature),
        _ => (ctx.trade.id, None),
    };
    let sig = required(sig, "peer_warning_signature")?;
    let side = ctx.trade.role.side;
    let mut tx = ctx.warning_tx(side)?;
    tx.add_signature(*ctx.keys()?.get(side.other()), sig)?;
    ctx.trade
        .process
        .peer_writer(trade_id)?
        .set_warning_signature(sig)?;
    Ok(())
}

pub(super) fn taker_sign_deposit(ctx: &mut TaskContext) -> Res<()> {
    ctx.check_multisig_key()?;
    let mut signed = ctx.prepared_deposit()?.clone();
    ctx.wallet
        .sign_inputs(signed.as_tx_mut(), &ctx.trade.process.inputs)?;
    ctx.trade.process.own_signed_deposit = Some(signed);
    Ok(())
}

pub(super) fn taker_prepare_deposit_tx(ctx: &mut TaskContext) -> Res<()> {
    let contract_hash = ctx.contract()?.hash().map_err(Error::from)?;
    let maker_inputs = ctx.maker_input_count()?;
    let signed = required(
        ctx.trade.process.own_signed_deposit.as_ref(),
        "own_signed_deposit",
    )?;
    let message = DepositTxMessage {
        uid: Uuid::new_v4(),
        trade_id: ctx.trade.id,
        sender: ctx.node.clone(),
        deposit_tx: signed.with_blanked_inputs(maker_inputs..signed.as_tx().input.len()),
        contract_hash,
        warning_signature: ctx.trade.process.peer_warning_signature,
    };
    ctx.trade.process.contract_hash = Some(contract_hash);
    ctx.prepare(TradeMessage::DepositTx(message));
    ctx.trade.state = TradeState::TakerSentDepositTx;
    Ok(())
}

pub(super) fn maker_process_deposit_tx(ctx: &mut TaskContext) -> Res<()> {
    let message = ctx.deposit_tx_message()?;
    reject_signed(&message.deposit_tx)?;
    let expected = ctx.prepared_deposit()?.txid();
    if message.deposit_tx.txid() != expected {
        return Err(Error::DepositTxIdMismatch {
            expected,
            found: message.deposit_tx.txid(),
        }
        .into());
    }
    let contract_hash = ctx.contract()?.hash().map_err(Error::from)?;
    if contract_hash != message.contract_hash {
        return Err(Error::ContractMismatch.into());
    }

    let mut peer = ctx.trade.process.peer_writer(message.trade_id)?;
    peer.set_deposit_tx(message.deposit_tx.clone())?;
    peer.set_contract_hash(message.contract_hash)?;
    ctx.trade.process.contract_hash = Some(contract_hash);
    Ok(())
}

pub(super) fn maker_prepare_deposit_signatures(ctx: &mut TaskContext) -> Res<()> {
    let maker_inputs = ctx.maker_input_count()?;
    let witnesses = required(
        ctx.trade.process.own_signed_deposit.as_ref(),
        "own_signed_deposit",
    )?
    .input_witnesses(0..maker_inputs)?;
    let message = DepositSignaturesMessage {
        uid: Uuid::new_v4(),
        trade_id: ctx.trade.id,
        sender: ctx.node.clone(),
        witnesses,
    };
    ctx.prepare(TradeMessage::DepositSignatures(message));
    ctx.trade.state = TradeState::MakerSentDepositSignatures;
    Ok(())
}

pub(super) fn taker_process_deposit_signatures(ctx: &mut TaskContext) -> Res<()> {
    let message = ctx.deposit_signatures()?;
    let maker_inputs = ctx.maker_input_count()?;
    if message.witnesses.len() != maker_inputs {
        return Err(transaction::Error::InputCountMismatch {
            expected: maker_inputs,
            found: message.witnesses.len(),
        }
        .into());
    }

    let model = &ctx.trade.process;
    let signed = required(model.own_signed_deposit.as_ref(), "own_signed_deposit")?;
    let final_deposit = signed.combine(message.witnesses.clone(), 0)?;
    final_deposit.check_input_count(ctx.prepared_deposit()?.as_tx().input.len())?;
    final_deposit.verify_inputs(0, required(model.peer().inputs(), "peer_inputs")?)?;
    if !final_deposit.is_fully_signed() {
        return Err(transaction::Error::MissingWitness.into());
    }

    ctx.trade
        .process
        .peer_writer(message.trade_id)?
        .set_deposit_witnesses(message.witnesses.clone())?;
    ctx.trade.process.final_deposit = Some(final_deposit);
    ctx.trade.state = TradeState::TakerReceivedDepositSignatures;
    Ok(())
}

pub(super) fn broadcast_deposit(ctx: &mut TaskContext) -> Res<()> {
    let txid = match ctx.trade.deposit_tx_id {
        Some(txid) => {
            debug!(trade_id = %ctx.trade.id, %txid, "Deposit already broadcast");
            txid
        }
        None => {
            let deposit = required(ctx.trade.process.final_deposit.as_ref(), "final_deposit")?;
            ctx.wallet.broadcast(deposit.as_tx())?
        }
    };
    ctx.trade.deposit_tx_id = Some(txid);
    ctx.trade.state = TradeState::DepositPublished;
    info!(trade_id = %ctx.trade.id, %txid, "Deposit published");
    Ok(())
}

pub(super) fn prepare_deposit_published(ctx: &mut TaskContext) -> Res<()> {
    let message = DepositTxPublishedMessage {
        uid: Uuid::new_v4(),
        trade_id: ctx.trade.id,
        sender: ctx.node.clone(),
        deposit_tx_id: required(ctx.trade.deposit_tx_id, "deposit_tx_id")?,
    };
    ctx.prepare(TradeMessage::DepositTxPublished(message));
    Ok(())
}

pub(super) fn maker_process_deposit_published(ctx: &mut TaskContext) -> Res<()> {
    let message = ctx.deposit_published()?;
    let expected = ctx.prepared_deposit()?.txid();
    if message.deposit_tx_id != expected {
        return Err(Error::DepositTxIdMismatch {
            expected,
            found: message.deposit_tx_id,
        }
        .into());
    }
    ctx.trade.deposit_tx_id = Some(expected);
    if ctx.trade.state == TradeState::MakerSentDepositSignatures {
        ctx.trade.state = TradeState::DepositPublished;
    }
    Ok(())
}

/// The taker holds every signature of the deposit but never reported it. Follow the deposit if it
/// reached the chain, otherwise fail the trade and give back its offer and inputs. Spending the
/// released inputs elsewhere is what invalidates the deposit held by the taker.
pub(super) fn maker_recover_deposit(ctx: &mut TaskContext) -> Res<()> {
    let txid = ctx.prepared_deposit()?.txid();
    match ctx.wallet.confirmations(&txid) {
        Some(confirmations) => {
            ctx.trade.deposit_tx_id = Some(txid);
            ctx.trade.state = TradeState::DepositPublished;
            info!(trade_id = %ctx.trade.id, %txid, confirmations, "Unreported deposit found");
        }
        None => {
            offer::compensate(ctx);
            ctx.trade.error_message = Some(format!("Deposit {} was never published", txid));
            ctx.trade.state = TradeState::Failed;
            warn!(trade_id = %ctx.trade.id, %txid, "Deposit never published, trade failed");
        }
    }
    Ok(())
}

pub(super) fn confirm_deposit(ctx: &mut TaskContext) -> Res<()> {
    let txid = match ctx.trade.deposit_tx_id {
        Some(txid) => txid,
        None => ctx.prepared_deposit()?.txid(),
    };
    match ctx.wallet.confirmations(&txid) {
        Some(confirmations) if confirmations > 0 => {}
        _ => return Err(Error::NotConfirmed(TxLabel::Deposit).into()),
    }
    ctx.trade.deposit_tx_id = Some(txid);
    ctx.trade.state = TradeState::DepositConfirmed;
    ctx.wallet.release_reservation(ctx.trade.id);
    info!(trade_id = %ctx.trade.id, %txid, "Deposit confirmed");
    Ok(())
}
