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

//! Escalation of a stalled trade. Self-enforcing trades broadcast the warning transaction
//! pre-signed by the peer and claim its output once the relative timelock matured; other trades
//! open a dispute.

use tracing::{info, warn};

use crate::bitcoin::fee::SatPerVByte;
use crate::bitcoin::ClaimTx;
use crate::escalation::EscalationState;
use crate::model::required;
use crate::protocol::{Error, TaskContext};
use crate::services::AddressContext;
use crate::trade::TradeState;
use crate::transaction::TxLabel;
use crate::Res;

/// The current fee rate, capped to the configured maximum. Fails on a stale estimate.
pub(crate) fn fresh_fee_rate(ctx: &TaskContext) -> Res<SatPerVByte> {
    let quote = ctx.wallet.fee_quote()?;
    if !quote.is_fresh(ctx.config.max_fee_quote_age_secs) {
        return Err(Error::StaleFeeQuote {
            age_secs: quote.age_secs,
            max_age_secs: ctx.config.max_fee_quote_age_secs,
        }
        .into());
    }
    Ok(quote.rate.min(ctx.config.max_escalation_fee_rate))
}

pub(super) fn check_cooperative_window(ctx: &mut TaskContext) -> Res<()> {
    if !ctx.trade.version.is_self_enforcing() {
        return Ok(());
    }
    let txid = required(ctx.trade.deposit_tx_id, "deposit_tx_id")?;
    let confirmations = ctx.wallet.confirmations(&txid).unwrap_or(0);
    if confirmations < ctx.config.cooperative_window_blocks {
        return Err(Error::CooperativeWindowOpen {
            confirmations,
            required: ctx.config.cooperative_window_blocks,
        }
        .into());
    }
    Ok(())
}

pub(super) fn finalize_warning(ctx: &mut TaskContext) -> Res<()> {
    ctx.check_multisig_key()?;
    let keys = ctx.keys()?;
    let side = ctx.trade.role.side;
    let mut warning = ctx.warning_tx(side)?;
    let peer_sig = *required(
        ctx.trade.process.peer().warning_signature(),
        "peer_warning_signature",
    )?;
    warning.add_signature(*keys.get(side.other()), peer_sig)?;
    let own_sig = ctx.wallet.sign_hash(
        ctx.trade.id,
        AddressContext::MultiSig,
        warning.signature_hash()?,
    )?;
    warning.add_signature(*keys.get(side), own_sig)?;
    warning.finalize()?;
    ctx.trade.process.warning_tx = Some(warning.extract()?);
    ctx.trade.escalation = EscalationState::WarningBroadcast;
    Ok(())
}

pub(super) fn broadcast_warning(ctx: &mut TaskContext) -> Res<()> {
    let warning = required(ctx.trade.process.warning_tx.as_ref(), "warning_tx")?;
    let txid = ctx.wallet.broadcast(warning)?;
    ctx.trade.warning_tx_id = Some(txid);
    ctx.trade.escalation = EscalationState::ClaimDelayWait;
    ctx.trade.state = TradeState::Escalated;
    warn!(trade_id = %ctx.trade.id, %txid, "Trade escalated, warning transaction published");
    Ok(())
}

pub(super) fn open_dispute(ctx: &mut TaskContext) -> Res<()> {
    ctx.trade.state = TradeState::DisputeOpened;
    warn!(trade_id = %ctx.trade.id, "Dispute opened");
    Ok(())
}

pub(super) fn check_claim_matured(ctx: &mut TaskContext) -> Res<()> {
    let txid = required(ctx.trade.warning_tx_id, "warning_tx_id")?;
    let delay = required(ctx.trade.process.claim_delay, "claim_delay")?;
    let confirmations = ctx.wallet.confirmations(&txid).unwrap_or(0);
    if !delay.is_matured(confirmations) {
        return Err(Error::ClaimTimelockNotMatured {
            confirmations,
            required: delay.as_u32(),
        }
        .into());
    }
    Ok(())
}

pub(super) fn check_fee_quote(ctx: &mut TaskContext) -> Res<()> {
    fresh_fee_rate(ctx).map(|_| ())
}

pub(super) fn sign_claim(ctx: &mut TaskContext) -> Res<()> {
    ctx.check_multisig_key()?;
    let rate = fresh_fee_rate(ctx)?;
    let lock = ctx.warning_lock(ctx.trade.role.side)?;
    let warning_output = lock.output_of(required(
        ctx.trade.process.warning_tx.as_ref(),
        "warning_tx",
    )?)?;
    let destination = ctx
        .wallet
        .address_entry(ctx.trade.id, AddressContext::Payout)?
        .address;
    let mut claim = ClaimTx::initialize(&warning_output, &destination, rate)?;
    let sig = ctx.wallet.sign_hash(
        ctx.trade.id,
        AddressContext::MultiSig,
        claim.signature_hash()?,
    )?;
    claim.add_signature(lock.claimant, sig)?;
    claim.finalize()?;
    ctx.trade.process.claim_tx = Some(claim.extract()?);
    Ok(())
}

pub(super) fn broadcast_claim(ctx: &mut TaskContext) -> Res<()> {
    let claim = required(ctx.trade.process.claim_tx.as_ref(), "claim_tx")?;
    let txid = ctx.wallet.broadcast(claim)?;
    ctx.trade.claim_tx_id = Some(txid);
    ctx.trade.escalation = EscalationState::ClaimBroadcast;
    info!(trade_id = %ctx.trade.id, %txid, "Claim transaction published");
    Ok(())
}

pub(super) fn confirm_claim(ctx: &mut TaskContext) -> Res<()> {
    let txid = required(ctx.trade.claim_tx_id, "claim_tx_id")?;
    match ctx.wallet.confirmations(&txid) {
        Some(confirmations) if confirmations > 0 => {}
        _ => return Err(Error::NotConfirmed(TxLabel::Claim).into()),
    }
    ctx.trade.escalation = EscalationState::Settled;
    ctx.trade.state = TradeState::Completed;
    ctx.wallet.release_reservation(ctx.trade.id);
    info!(trade_id = %ctx.trade.id, "Trade settled by claim");
    Ok(())
}
