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

//! Chain selection. Maps a trigger on a trade to the chain of steps to run, from the role and
//! side of the party, the protocol version and the current state of the trade.
//!
//! | trigger                      | party                  | state                        |
//! |------------------------------|------------------------|------------------------------|
//! | take offer                   | taker                  | created                      |
//! | inputs request               | maker                  | created                      |
//! | inputs response              | taker                  | sent inputs request          |
//! | deposit tx                   | maker                  | sent inputs response         |
//! | deposit signatures           | taker                  | sent deposit tx              |
//! | deposit published            | maker                  | sent deposit signatures      |
//! | recover deposit              | maker                  | sent deposit signatures      |
//! | start payment                | buyer                  | deposit confirmed            |
//! | payment started              | seller                 | deposit published, confirmed |
//! | confirm payment received     | seller                 | received payment started     |
//! | payout published             | buyer                  | sent payment started         |

use crate::escalation::EscalationState;
use crate::message::MessageKind;
use crate::protocol::tasks::Step;
use crate::protocol::{Error, Trigger};
use crate::trade::{Trade, TradeState};

use Step::*;

/// The message kinds the trade accepts in its current state.
pub fn expected_messages(trade: &Trade) -> Vec<MessageKind> {
    let role = trade.role;
    let mut kinds = vec![];
    match (role.is_maker(), trade.state) {
        (true, TradeState::Created) => kinds.push(MessageKind::InputsForDepositTxRequest),
        (false, TradeState::TakerSentInputsRequest) => {
            kinds.push(MessageKind::InputsForDepositTxResponse)
        }
        (true, TradeState::MakerSentInputsResponse) => kinds.push(MessageKind::DepositTx),
        (false, TradeState::TakerSentDepositTx) => kinds.push(MessageKind::DepositSignatures),
        (true, TradeState::MakerSentDepositSignatures)
        | (true, TradeState::DepositPublished)
        | (true, TradeState::DepositConfirmed) => kinds.push(MessageKind::DepositTxPublished),
        _ => {}
    }
    match trade.state {
        TradeState::DepositPublished | TradeState::DepositConfirmed if !role.is_buyer() => {
            kinds.push(MessageKind::PaymentStarted)
        }
        TradeState::BuyerSentPaymentStarted if role.is_buyer() => {
            kinds.push(MessageKind::PayoutTxPublished)
        }
        _ => {}
    }
    kinds
}

fn message_chain(kind: MessageKind, self_enforcing: bool) -> Vec<Step> {
    let v5 = |steps: &[Step]| if self_enforcing { steps.to_vec() } else { vec![] };
    match kind {
        MessageKind::InputsForDepositTxRequest => [
            vec![
                ValidateOffer,
                CheckUnconfirmedLimit,
                MakerProcessInputsRequest,
                RemoveOffer,
                MakerCreateDeposit,
            ],
            v5(&[MakerSetEscalationTerms, SignPeerWarning]),
            vec![MakerPrepareInputsResponse, SendMessage],
        ]
        .concat(),
        MessageKind::InputsForDepositTxResponse => [
            vec![TakerProcessInputsResponse],
            v5(&[VerifyPeerWarningSignature]),
            vec![TakerSignDeposit],
            v5(&[SignPeerWarning]),
            vec![TakerPrepareDepositTx, SendMessage],
        ]
        .concat(),
        MessageKind::DepositTx => [
            vec![MakerProcessDepositTx],
            v5(&[VerifyPeerWarningSignature]),
            vec![MakerPrepareDepositSignatures, SendMessage],
        ]
        .concat(),
        MessageKind::DepositSignatures => vec![
            TakerProcessDepositSignatures,
            BroadcastDeposit,
            PrepareDepositPublished,
            SendMessage,
        ],
        MessageKind::DepositTxPublished => vec![MakerProcessDepositPublished],
        MessageKind::PaymentStarted => vec![ProcessPaymentStarted],
        MessageKind::PayoutTxPublished => vec![ProcessPayoutPublished, Complete],
    }
}

/// Select the chain of steps to run for `trigger`. Fails without touching the trade if the
/// trigger is not valid in its current state.
pub fn select(trade: &Trade, trigger: Trigger) -> Result<Vec<Step>, Error> {
    let role = trade.role;
    let state = trade.state;
    let self_enforcing = trade.version.is_self_enforcing();
    let invalid = || Error::InvalidTrigger { trigger, state };

    match trigger {
        Trigger::Message(kind) => {
            if !expected_messages(trade).contains(&kind) {
                return Err(Error::UnexpectedMessage { kind, state });
            }
            Ok(message_chain(kind, self_enforcing))
        }
        Trigger::TakeOffer if !role.is_maker() && state == TradeState::Created => Ok(vec![
            ValidateOffer,
            CheckUnconfirmedLimit,
            CreateTakerFeeTx,
            TakerPrepareInputsRequest,
            SendMessage,
        ]),
        Trigger::DepositConfirmed => match state {
            TradeState::DepositPublished | TradeState::MakerSentDepositSignatures => {
                Ok(vec![ConfirmDeposit])
            }
            _ => Err(invalid()),
        },
        Trigger::StartPayment if role.is_buyer() && state == TradeState::DepositConfirmed => {
            Ok(vec![SignPayout, PreparePaymentStarted, SendMessage])
        }
        Trigger::ConfirmPaymentReceived
            if !role.is_buyer() && state == TradeState::SellerReceivedPaymentStarted =>
        {
            Ok(vec![
                FinalizePayout,
                BroadcastPayout,
                PreparePayoutPublished,
                SendMessage,
                Complete,
            ])
        }
        Trigger::Escalate => {
            if !state.is_escrow_locked() {
                return Err(Error::EscalationNotPermitted(state));
            }
            if self_enforcing {
                Ok(vec![CheckCooperativeWindow, FinalizeWarning, BroadcastWarning])
            } else {
                Ok(vec![CheckCooperativeWindow, OpenDispute])
            }
        }
        Trigger::Claim
            if state == TradeState::Escalated
                && trade.escalation == EscalationState::ClaimDelayWait =>
        {
            Ok(vec![CheckClaimMatured, CheckFeeQuote, SignClaim, BroadcastClaim])
        }
        Trigger::ClaimConfirmed
            if state == TradeState::Escalated
                && trade.escalation == EscalationState::ClaimBroadcast =>
        {
            Ok(vec![ConfirmClaim])
        }
        Trigger::Cancel => {
            if !state.is_before_deposit_published() {
                return Err(Error::CancelNotPermitted(state));
            }
            Ok(vec![Cancel])
        }
        Trigger::RecoverDeposit
            if role.is_maker() && state == TradeState::MakerSentDepositSignatures =>
        {
            Ok(vec![MakerRecoverDeposit])
        }
        _ => Err(invalid()),
    }
}

/// The steps to run when a stored trade is loaded: resend the last message of a trade waiting for
/// its peer, or finish a chain interrupted between two steps.
pub fn resume(trade: &Trade) -> Option<Vec<Step>> {
    if trade.state.is_escrow_locked() && trade.escalation == EscalationState::WarningBroadcast {
        return Some(vec![BroadcastWarning]);
    }
    let resend = || trade.process.last_sent.as_ref().map(|_| vec![SendMessage]);
    match trade.state {
        TradeState::TakerPublishedFeeTx => Some(vec![TakerPrepareInputsRequest, SendMessage]),
        TradeState::TakerReceivedDepositSignatures => Some(vec![
            BroadcastDeposit,
            PrepareDepositPublished,
            SendMessage,
        ]),
        TradeState::TakerSentInputsRequest
        | TradeState::MakerSentInputsResponse
        | TradeState::TakerSentDepositTx
        | TradeState::MakerSentDepositSignatures
        | TradeState::BuyerSentPaymentStarted => resend(),
        TradeState::DepositPublished if !trade.role.is_maker() => resend(),
        TradeState::PayoutPublished if !trade.role.is_buyer() => {
            Some(vec![SendMessage, Complete])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;

    use super::*;
    use crate::offer::Offer;
    use crate::role::{TradeRole, TradeSide};
    use crate::trade::{NodeAddress, TradeId, TradeTerms};
    use crate::version::ProtocolVersion;

    fn trade(role: TradeRole, direction: TradeSide, version: ProtocolVersion) -> Trade {
        let offer = Offer {
            id: TradeId::random(),
            direction,
            amount: Amount::from_sat(1_000_000),
            min_amount: Amount::from_sat(500_000),
            price: 3_000_000,
            currency_code: "EUR".into(),
            payment_method_id: "SEPA".into(),
            buyer_security_deposit: Amount::from_sat(150_000),
            seller_security_deposit: Amount::from_sat(150_000),
            maker_fee: Amount::from_sat(5_000),
            maker_fee_tx_id: None,
            version,
            maker_address: NodeAddress::new("maker"),
        };
        let terms = TradeTerms {
            amount: Amount::from_sat(1_000_000),
            price: 3_000_000,
            tx_fee: Amount::from_sat(1_000),
            taker_fee: Amount::from_sat(5_000),
        };
        Trade::new(offer, role, terms, NodeAddress::new("peer"))
    }

    #[test]
    fn take_offer_only_for_new_taker_trades() {
        let mut t = trade(TradeRole::Taker, TradeSide::Buyer, ProtocolVersion::V1);
        let chain = select(&t, Trigger::TakeOffer).unwrap();
        assert_eq!(chain.first(), Some(&ValidateOffer));
        assert_eq!(chain.last(), Some(&SendMessage));

        t.state = TradeState::TakerSentInputsRequest;
        assert!(matches!(
            select(&t, Trigger::TakeOffer),
            Err(Error::InvalidTrigger { .. })
        ));
        let maker = trade(TradeRole::Maker, TradeSide::Buyer, ProtocolVersion::V1);
        assert!(select(&maker, Trigger::TakeOffer).is_err());
    }

    #[test]
    fn request_chain_depends_on_version() {
        let v1 = trade(TradeRole::Maker, TradeSide::Buyer, ProtocolVersion::V1);
        let v5 = trade(TradeRole::Maker, TradeSide::Buyer, ProtocolVersion::V5);
        let kind = Trigger::Message(MessageKind::InputsForDepositTxRequest);
        let chain_v1 = select(&v1, kind).unwrap();
        let chain_v5 = select(&v5, kind).unwrap();
        assert!(!chain_v1.contains(&SignPeerWarning));
        assert!(chain_v5.contains(&MakerSetEscalationTerms));
        assert!(chain_v5.contains(&SignPeerWarning));
        assert_eq!(chain_v5.len(), chain_v1.len() + 2);
        // the offer leaves the book only once the request is validated
        let pos = |c: &[Step], s: Step| c.iter().position(|x| *x == s).unwrap();
        assert!(pos(&chain_v1, MakerProcessInputsRequest) < pos(&chain_v1, RemoveOffer));
    }

    #[test]
    fn unexpected_messages_are_desync() {
        let t = trade(TradeRole::Taker, TradeSide::Seller, ProtocolVersion::V1);
        let err = select(&t, Trigger::Message(MessageKind::DepositSignatures)).unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::Desync);
        assert!(expected_messages(&t).is_empty());
    }

    #[test]
    fn payment_messages_follow_the_side() {
        let mut seller = trade(TradeRole::Taker, TradeSide::Buyer, ProtocolVersion::V1);
        seller.state = TradeState::DepositPublished;
        assert_eq!(expected_messages(&seller), vec![MessageKind::PaymentStarted]);
        let mut maker = trade(TradeRole::Maker, TradeSide::Seller, ProtocolVersion::V1);
        maker.state = TradeState::DepositPublished;
        assert_eq!(
            expected_messages(&maker),
            vec![MessageKind::DepositTxPublished, MessageKind::PaymentStarted]
        );
        assert!(select(&seller, Trigger::StartPayment).is_err());

        let mut buyer = trade(TradeRole::Taker, TradeSide::Buyer, ProtocolVersion::V1);
        buyer.state = TradeState::DepositConfirmed;
        assert_eq!(
            select(&buyer, Trigger::StartPayment).unwrap(),
            vec![SignPayout, PreparePaymentStarted, SendMessage]
        );
        buyer.state = TradeState::BuyerSentPaymentStarted;
        assert_eq!(
            expected_messages(&buyer),
            vec![MessageKind::PayoutTxPublished]
        );
    }

    #[test]
    fn cancel_only_before_deposit_publication() {
        let mut t = trade(TradeRole::Taker, TradeSide::Buyer, ProtocolVersion::V5);
        for state in [
            TradeState::Created,
            TradeState::TakerPublishedFeeTx,
            TradeState::TakerSentInputsRequest,
            TradeState::TakerSentDepositTx,
        ] {
            t.state = state;
            assert_eq!(select(&t, Trigger::Cancel).unwrap(), vec![Cancel]);
        }
        for state in [
            TradeState::MakerSentDepositSignatures,
            TradeState::DepositPublished,
            TradeState::Completed,
        ] {
            t.state = state;
            assert!(matches!(
                select(&t, Trigger::Cancel),
                Err(Error::CancelNotPermitted(s)) if s == state
            ));
        }
    }

    #[test]
    fn only_a_maker_waiting_for_the_deposit_recovers_it() {
        let mut maker = trade(TradeRole::Maker, TradeSide::Buyer, ProtocolVersion::V5);
        maker.state = TradeState::MakerSentDepositSignatures;
        assert_eq!(
            select(&maker, Trigger::RecoverDeposit).unwrap(),
            vec![MakerRecoverDeposit]
        );
        maker.state = TradeState::DepositPublished;
        assert!(matches!(
            select(&maker, Trigger::RecoverDeposit),
            Err(Error::InvalidTrigger { .. })
        ));
        // a late notification is still accepted
        assert_eq!(
            expected_messages(&maker),
            vec![MessageKind::DepositTxPublished]
        );

        let mut taker = trade(TradeRole::Taker, TradeSide::Seller, ProtocolVersion::V5);
        taker.state = TradeState::MakerSentDepositSignatures;
        assert!(select(&taker, Trigger::RecoverDeposit).is_err());
    }

    #[test]
    fn escalation_by_version() {
        let mut v5 = trade(TradeRole::Maker, TradeSide::Seller, ProtocolVersion::V5);
        assert!(matches!(
            select(&v5, Trigger::Escalate),
            Err(Error::EscalationNotPermitted(TradeState::Created))
        ));
        v5.state = TradeState::DepositConfirmed;
        assert_eq!(
            select(&v5, Trigger::Escalate).unwrap(),
            vec![CheckCooperativeWindow, FinalizeWarning, BroadcastWarning]
        );
        assert!(select(&v5, Trigger::Claim).is_err());
        v5.state = TradeState::Escalated;
        v5.escalation = EscalationState::ClaimDelayWait;
        assert_eq!(select(&v5, Trigger::Claim).unwrap().last(), Some(&BroadcastClaim));

        let mut v1 = trade(TradeRole::Maker, TradeSide::Seller, ProtocolVersion::V1);
        v1.state = TradeState::DepositPublished;
        assert_eq!(
            select(&v1, Trigger::Escalate).unwrap(),
            vec![CheckCooperativeWindow, OpenDispute]
        );
    }

    #[test]
    fn resume_resends_only_with_a_stored_message() {
        let mut t = trade(TradeRole::Taker, TradeSide::Buyer, ProtocolVersion::V1);
        assert_eq!(resume(&t), None);
        t.state = TradeState::TakerSentInputsRequest;
        assert_eq!(resume(&t), None);
        t.state = TradeState::TakerPublishedFeeTx;
        assert_eq!(
            resume(&t),
            Some(vec![TakerPrepareInputsRequest, SendMessage])
        );
        t.state = TradeState::TakerReceivedDepositSignatures;
        assert_eq!(resume(&t).unwrap().first(), Some(&BroadcastDeposit));
    }
}
