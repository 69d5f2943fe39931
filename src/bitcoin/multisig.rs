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

//! The 2-of-2 escrow script `2 <buyer> <seller> 2 CHECKMULTISIG` locking the deposit.

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction, Script};
use bitcoin::blockdata::transaction::EcdsaSighashType;
use bitcoin::blockdata::witness::Witness;
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{EcdsaSig, PublicKey};

use crate::role::TradeSide;
use crate::transaction::Error;

/// The two keys of the escrow, ordered buyer first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigKeys {
    /// Multisig key of the buyer.
    pub buyer: PublicKey,
    /// Multisig key of the seller.
    pub seller: PublicKey,
}

impl MultisigKeys {
    /// Order the own and peer keys according to the own side.
    pub fn from_side(side: TradeSide, own: PublicKey, peer: PublicKey) -> Self {
        match side {
            TradeSide::Buyer => Self {
                buyer: own,
                seller: peer,
            },
            TradeSide::Seller => Self {
                buyer: peer,
                seller: own,
            },
        }
    }

    /// Return the key of the given side.
    pub fn get(&self, side: TradeSide) -> &PublicKey {
        match side {
            TradeSide::Buyer => &self.buyer,
            TradeSide::Seller => &self.seller,
        }
    }

    /// The redeem script of the escrow output.
    pub fn redeem_script(&self) -> Script {
        Builder::new()
            .push_opcode(opcodes::all::OP_PUSHNUM_2)
            .push_key(&self.buyer)
            .push_key(&self.seller)
            .push_opcode(opcodes::all::OP_PUSHNUM_2)
            .push_opcode(opcodes::all::OP_CHECKMULTISIG)
            .into_script()
    }

    /// The P2WSH script pubkey of the escrow output.
    pub fn script_pubkey(&self) -> Script {
        self.redeem_script().to_v0_p2wsh()
    }

    /// Parse the keys back from a redeem script.
    pub fn from_script(s: &Script) -> Result<Self, Error> {
        use bitcoin::blockdata::opcodes::all;

        let mut ints = s.instructions();
        expect_op(ints.next(), all::OP_PUSHNUM_2)?;
        let buyer = push_key(ints.next())?;
        let seller = push_key(ints.next())?;
        expect_op(ints.next(), all::OP_PUSHNUM_2)?;
        expect_op(ints.next(), all::OP_CHECKMULTISIG)?;
        if ints.next().is_some() {
            return Err(Error::WrongTemplate("Too many opcodes"));
        }
        Ok(Self { buyer, seller })
    }
}

fn expect_op(
    next: Option<Result<Instruction, bitcoin::blockdata::script::Error>>,
    op: opcodes::All,
) -> Result<(), Error> {
    match next {
        Some(Ok(Instruction::Op(o))) if o == op => Ok(()),
        Some(Err(e)) => Err(Error::new(e)),
        _ => Err(Error::WrongTemplate("Unexpected opcode in multisig script")),
    }
}

fn push_key(
    next: Option<Result<Instruction, bitcoin::blockdata::script::Error>>,
) -> Result<PublicKey, Error> {
    match next {
        Some(Ok(Instruction::PushBytes(b))) => PublicKey::from_slice(b).map_err(Error::new),
        Some(Err(e)) => Err(Error::new(e)),
        _ => Err(Error::MissingPublicKey),
    }
}

/// The witness spending the escrow output with both signatures. `CHECKMULTISIG` consumes one
/// extra stack element and expects the signatures in the order of the keys.
pub fn witness(buyer_sig: Signature, seller_sig: Signature, redeem_script: &Script) -> Witness {
    let buyer_sig = EcdsaSig {
        sig: buyer_sig,
        hash_ty: EcdsaSighashType::All,
    };
    let seller_sig = EcdsaSig {
        sig: seller_sig,
        hash_ty: EcdsaSighashType::All,
    };
    Witness::from_vec(vec![
        vec![],
        buyer_sig.to_vec(),
        seller_sig.to_vec(),
        redeem_script.to_bytes(),
    ])
}
