//! Transactions and transaction-related structures.
//!
//! A transaction is a variant over version codes: plain transparent
//! transactions, shielded transactions carrying joinsplits, and
//! sidechain-capable transactions carrying the four crosschain output lists.
//! The variant-specific payloads are held as optional extension blocks so
//! that the common fields can be handled uniformly.

use crate::cached::Cached;
use crate::{
    amount::{Amount, Error as AmountError, NegativeAllowed, NonNegative},
    sidechain::Scid,
    transparent, WireSerialize,
};
use serde::{Deserialize, Serialize};

mod hash;
mod joinsplit;
mod lock_time;
mod serialize;
mod sidechain_payload;
pub mod sighash;

#[cfg(test)]
mod tests;

pub use hash::Hash;
pub use joinsplit::{Anchor, JoinSplit, JoinSplitData, NoteCommitment, Nullifier};
pub(crate) use serialize::HashReader;
pub use lock_time::LockTime;
pub use sidechain_payload::{
    BwtRequestOutput, CswInput, ForwardTransferOutput, SidechainCreationOutput, SidechainPayload,
};

/// Version code of transactions without shielded or sidechain data.
pub const TRANSPARENT_TX_VERSION: i32 = 1;

/// Version code of transactions that may carry joinsplits.
pub const SHIELDED_TX_VERSION: i32 = 2;

/// Version code of sidechain-capable transactions.
pub const SC_TX_VERSION: i32 = -4;

/// A mainchain transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction version. Decides which extension blocks are allowed.
    pub version: i32,
    /// The transparent spend inputs.
    pub inputs: Vec<transparent::Input>,
    /// The transparent outputs.
    pub outputs: Vec<transparent::Output>,
    /// The earliest time or block height this transaction may be included.
    pub locktime: LockTime,
    /// Joinsplits plus the binding signature, present on shielded and
    /// sidechain-capable versions.
    pub joinsplit_data: Option<JoinSplitData>,
    /// The four crosschain output lists, present on `SC_TX_VERSION` only.
    pub sidechain_payload: Option<SidechainPayload>,
    hash: Cached<Hash>,
}

impl Transaction {
    pub fn new(
        version: i32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        locktime: LockTime,
    ) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            locktime,
            joinsplit_data: None,
            sidechain_payload: None,
            hash: Cached::new(),
        }
    }

    /// Get the hash of this transaction.
    pub fn hash(&self) -> Hash {
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        Hash::from(self)
    }

    pub fn contains_coinbase_input(&self) -> bool {
        self.inputs
            .iter()
            .any(|input| matches!(input, transparent::Input::Coinbase { .. }))
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && matches!(
                self.inputs.get(0),
                Some(transparent::Input::Coinbase { .. })
            )
    }

    /// Returns `true` if this transaction carries any of the four crosschain
    /// output lists.
    pub fn has_sidechain_payload(&self) -> bool {
        self.sidechain_payload
            .as_ref()
            .map(|payload| !payload.is_empty())
            .unwrap_or(false)
    }

    /// The joinsplits of this transaction, in order.
    pub fn joinsplits(&self) -> impl Iterator<Item = &JoinSplit> {
        self.joinsplit_data
            .iter()
            .flat_map(|data| data.joinsplits.iter())
    }

    /// Every shielded nullifier revealed by this transaction.
    pub fn nullifiers(&self) -> impl Iterator<Item = &Nullifier> {
        self.joinsplits()
            .flat_map(|joinsplit| joinsplit.nullifiers.iter())
    }

    /// Every outpoint spent by this transaction's transparent inputs.
    pub fn spent_outpoints(&self) -> impl Iterator<Item = transparent::OutPoint> + '_ {
        self.inputs.iter().filter_map(transparent::Input::outpoint)
    }

    /// The sidechain creations of this transaction, paired with their
    /// derived scids.
    pub fn sidechain_creations(
        &self,
    ) -> impl Iterator<Item = (Scid, &SidechainCreationOutput)> + '_ {
        let creation_tx = self.hash();
        self.sidechain_payload
            .iter()
            .flat_map(|payload| payload.sc_creations.iter())
            .enumerate()
            .map(move |(index, creation)| (Scid::derive(creation_tx, index as u32), creation))
    }

    pub fn forward_transfers(&self) -> impl Iterator<Item = &ForwardTransferOutput> {
        self.sidechain_payload
            .iter()
            .flat_map(|payload| payload.forward_transfers.iter())
    }

    pub fn bwt_requests(&self) -> impl Iterator<Item = &BwtRequestOutput> {
        self.sidechain_payload
            .iter()
            .flat_map(|payload| payload.bwt_requests.iter())
    }

    pub fn csw_inputs(&self) -> impl Iterator<Item = &CswInput> {
        self.sidechain_payload
            .iter()
            .flat_map(|payload| payload.csw_inputs.iter())
    }

    /// The total value of the transparent outputs plus every value directed
    /// into sidechains.
    pub fn value_out(&self) -> Result<Amount<NonNegative>, AmountError> {
        let mut total: Amount<NonNegative> =
            self.outputs.iter().map(|out| &out.value).sum::<Result<Amount<NonNegative>, AmountError>>()?;
        if let Some(payload) = self.sidechain_payload.as_ref() {
            total = (total + payload.value_out()?)?;
        }
        Ok(total)
    }

    /// The total value entering this transaction from shielded pools and csw
    /// inputs. Transparent input values live in the spent coins, so they are
    /// not known without a coin view.
    pub fn value_in_from_extensions(&self) -> Result<Amount<NonNegative>, AmountError> {
        let mut total = Amount::<NonNegative>::zero();
        for joinsplit in self.joinsplits() {
            total = (total + joinsplit.vpub_new)?;
        }
        for csw in self.csw_inputs() {
            total = (total + csw.value)?;
        }
        Ok(total)
    }

    /// The total value leaving this transaction into shielded pools.
    pub fn shielded_value_out(&self) -> Result<Amount<NonNegative>, AmountError> {
        let mut total = Amount::<NonNegative>::zero();
        for joinsplit in self.joinsplits() {
            total = (total + joinsplit.vpub_old)?;
        }
        Ok(total)
    }

    /// The balance delta contributed by the transaction itself, ignoring
    /// transparent inputs: extension value in, minus outputs, minus shielded
    /// value out.
    pub fn intrinsic_balance(&self) -> Result<Amount<NegativeAllowed>, AmountError> {
        let value_in = self.value_in_from_extensions()?.constrain::<NegativeAllowed>()?;
        let value_out = self.value_out()?.constrain::<NegativeAllowed>()?;
        let shielded_out = self.shielded_value_out()?.constrain::<NegativeAllowed>()?;
        (value_in - value_out) - shielded_out
    }

    /// Returns the serialized length (in bytes) of this transaction.
    ///
    /// Sidechain payloads have variable-length nested fields, so the length
    /// is measured by serializing.
    pub fn len(&self) -> usize {
        self.wire_serialize_to_vec()
            .expect("serialization into a vec is infallible")
            .len()
    }
}
