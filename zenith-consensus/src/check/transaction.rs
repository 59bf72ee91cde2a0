//! Transaction checks.
//!
//! Everything in this file can be decided from the transaction alone; the
//! chain- and pool-dependent rules live in `contextual`.

use std::collections::HashSet;

use zenith_chain::{
    parameters::MAX_BLOCK_SIZE,
    transaction::{sighash, Transaction, SC_TX_VERSION},
};

use crate::error::TransactionError;

/// Checks that the transaction has inputs and outputs.
///
/// Shielded value counts on both sides; sidechain-capable transactions may
/// run entirely on crosschain lists and are allowed to have neither regular
/// inputs nor outputs.
pub fn has_inputs_and_outputs(tx: &Transaction) -> Result<(), TransactionError> {
    let joinsplit_count = tx.joinsplits().count();
    let csw_count = tx.csw_inputs().count();
    let crosschain_out = tx.has_sidechain_payload();

    if tx.inputs.is_empty() && joinsplit_count == 0 && csw_count == 0 {
        if tx.version != SC_TX_VERSION || !crosschain_out {
            return Err(TransactionError::NoInputs);
        }
    }
    if tx.outputs.is_empty() && joinsplit_count == 0 && !crosschain_out {
        return Err(TransactionError::NoOutputs);
    }
    Ok(())
}

/// Oversize rejection: a transaction larger than a block can never be
/// mined.
pub fn size_is_bounded(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.len() > MAX_BLOCK_SIZE {
        return Err(TransactionError::Oversized);
    }
    Ok(())
}

/// No duplicate spends within one transaction, across transparent inputs
/// and csw nullifiers.
pub fn no_duplicate_inputs(tx: &Transaction) -> Result<(), TransactionError> {
    let mut outpoints = HashSet::new();
    for outpoint in tx.spent_outpoints() {
        if !outpoints.insert(outpoint) {
            return Err(TransactionError::DuplicateInputs);
        }
    }
    let mut csw_nullifiers = HashSet::new();
    for csw in tx.csw_inputs() {
        if !csw_nullifiers.insert((csw.scid, csw.nullifier)) {
            return Err(TransactionError::DuplicateInputs);
        }
    }
    Ok(())
}

/// All amounts in range, individually and in sum.
pub fn amounts_are_in_range(tx: &Transaction) -> Result<(), TransactionError> {
    // individually enforced by the Amount type; sums checked here
    tx.value_out()?;
    tx.value_in_from_extensions()?;
    tx.shielded_value_out()?;
    Ok(())
}

/// Coinbase shape: exactly one input with a null prevout, bounded script
/// sig, no joinsplits, no crosschain data.
pub fn coinbase_shape(tx: &Transaction) -> Result<(), TransactionError> {
    use zenith_chain::transparent::Input;

    if !tx.is_coinbase() {
        if tx.contains_coinbase_input() {
            return Err(TransactionError::BadCoinbaseShape);
        }
        return Ok(());
    }
    match &tx.inputs[0] {
        Input::Coinbase { data, .. } => {
            if data.as_ref().len() < 2 || data.as_ref().len() > 100 {
                return Err(TransactionError::BadCoinbaseScriptSigLength);
            }
        }
        Input::PrevOut { .. } => return Err(TransactionError::BadCoinbaseShape),
    }
    if tx.joinsplits().next().is_some() {
        return Err(TransactionError::CoinbaseHasJoinSplits);
    }
    if tx.has_sidechain_payload() {
        return Err(TransactionError::CoinbaseHasSidechainPayload);
    }
    Ok(())
}

/// `vpub_old * vpub_new == 0` in every joinsplit: value may enter or leave
/// the shielded pool in one joinsplit, never both.
pub fn joinsplit_vpubs_are_one_sided(tx: &Transaction) -> Result<(), TransactionError> {
    for joinsplit in tx.joinsplits() {
        if !joinsplit.vpub_old.is_zero() && !joinsplit.vpub_new.is_zero() {
            return Err(TransactionError::BothVpubsNonZero);
        }
    }
    Ok(())
}

/// No nullifier may appear twice within one transaction.
pub fn no_duplicate_nullifiers(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = HashSet::new();
    for nullifier in tx.nullifiers() {
        if !seen.insert(*nullifier) {
            return Err(TransactionError::DuplicateNullifier);
        }
    }
    Ok(())
}

/// Verify the canonical ed25519 joinsplit binding signature over the
/// no-input sighash.
pub fn joinsplit_signature_is_valid(tx: &Transaction) -> Result<(), TransactionError> {
    let data = match &tx.joinsplit_data {
        Some(data) => data,
        None => return Ok(()),
    };
    let digest = sighash::joinsplit_signature_hash(tx);
    data.verify_signature(&digest)
        .map_err(|_| TransactionError::BadJoinSplitSignature)
}

/// Run the whole context-free battery in order.
pub fn check(tx: &Transaction) -> Result<(), TransactionError> {
    has_inputs_and_outputs(tx)?;
    size_is_bounded(tx)?;
    no_duplicate_inputs(tx)?;
    amounts_are_in_range(tx)?;
    coinbase_shape(tx)?;
    joinsplit_vpubs_are_one_sided(tx)?;
    no_duplicate_nullifiers(tx)?;
    joinsplit_signature_is_valid(tx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    use zenith_chain::transaction::{
        JoinSplit, JoinSplitData, LockTime, NoteCommitment, Nullifier, SidechainPayload,
    };
    use zenith_chain::transparent::{Input, OutPoint, Output, Script};

    fn base_tx() -> Transaction {
        Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: zenith_chain::transaction::Hash([1; 32]),
                    index: 0,
                },
                unlock_script: Script(vec![0x01]),
                sequence: 0,
            }],
            vec![Output {
                value: 1_000i64.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::unlocked(),
        )
    }

    fn joinsplit(vpub_old: i64, vpub_new: i64) -> JoinSplit {
        JoinSplit {
            vpub_old: vpub_old.try_into().unwrap(),
            vpub_new: vpub_new.try_into().unwrap(),
            anchor: zenith_chain::transaction::Anchor([0; 32]),
            nullifiers: [Nullifier([1; 32]), Nullifier([2; 32])],
            commitments: [NoteCommitment([3; 32]), NoteCommitment([4; 32])],
            proof: vec![0; 8],
        }
    }

    #[test]
    fn empty_tx_is_rejected() {
        let tx = Transaction::new(1, vec![], vec![], LockTime::unlocked());
        assert_eq!(has_inputs_and_outputs(&tx), Err(TransactionError::NoInputs));
    }

    #[test]
    fn sidechain_only_tx_is_allowed_empty() {
        let mut tx = Transaction::new(
            zenith_chain::transaction::SC_TX_VERSION,
            vec![],
            vec![],
            LockTime::unlocked(),
        );
        tx.sidechain_payload = Some(SidechainPayload {
            csw_inputs: vec![],
            sc_creations: vec![],
            forward_transfers: vec![zenith_chain::transaction::ForwardTransferOutput {
                scid: zenith_chain::sidechain::Scid([1; 32]),
                amount: 1i64.try_into().unwrap(),
                address: zenith_chain::sidechain::FieldElement([0; 32]),
                mc_return_address: [0; 20],
            }],
            bwt_requests: vec![],
        });
        assert_eq!(has_inputs_and_outputs(&tx), Ok(()));
    }

    #[test]
    fn duplicate_inputs_are_rejected() {
        let mut tx = base_tx();
        tx.inputs.push(tx.inputs[0].clone());
        assert_eq!(no_duplicate_inputs(&tx), Err(TransactionError::DuplicateInputs));
    }

    #[test]
    fn both_vpubs_nonzero_is_rejected() {
        let mut tx = base_tx();
        tx.version = zenith_chain::transaction::SHIELDED_TX_VERSION;
        tx.joinsplit_data = Some(JoinSplitData {
            joinsplits: vec![joinsplit(10, 10)],
            pub_key: [0; 32],
            sig: [0; 64],
        });
        assert_eq!(
            joinsplit_vpubs_are_one_sided(&tx),
            Err(TransactionError::BothVpubsNonZero)
        );

        tx.joinsplit_data = Some(JoinSplitData {
            joinsplits: vec![joinsplit(10, 0), joinsplit(0, 10)],
            pub_key: [0; 32],
            sig: [0; 64],
        });
        assert_eq!(joinsplit_vpubs_are_one_sided(&tx), Ok(()));
    }

    #[test]
    fn duplicate_nullifiers_within_one_tx_are_rejected() {
        let mut tx = base_tx();
        tx.version = zenith_chain::transaction::SHIELDED_TX_VERSION;
        let mut js = joinsplit(0, 0);
        js.nullifiers = [Nullifier([1; 32]), Nullifier([1; 32])];
        tx.joinsplit_data = Some(JoinSplitData {
            joinsplits: vec![js],
            pub_key: [0; 32],
            sig: [0; 64],
        });
        assert_eq!(
            no_duplicate_nullifiers(&tx),
            Err(TransactionError::DuplicateNullifier)
        );
    }

    #[test]
    fn joinsplit_signature_roundtrip() {
        use rand::rngs::OsRng;

        let sk = ed25519_zebra::SigningKey::new(OsRng);
        let vk = ed25519_zebra::VerificationKey::from(&sk);

        let mut tx = base_tx();
        tx.version = zenith_chain::transaction::SHIELDED_TX_VERSION;
        tx.joinsplit_data = Some(JoinSplitData {
            joinsplits: vec![joinsplit(0, 10)],
            pub_key: vk.into(),
            sig: [0; 64],
        });

        // sign over the sighash with the empty-signature convention
        let digest = sighash::joinsplit_signature_hash(&tx);
        let sig = sk.sign(&digest);
        tx.joinsplit_data.as_mut().unwrap().sig = sig.into();

        assert_eq!(joinsplit_signature_is_valid(&tx), Ok(()));

        // flipping a byte of the signature breaks it
        tx.joinsplit_data.as_mut().unwrap().sig[0] ^= 1;
        assert_eq!(
            joinsplit_signature_is_valid(&tx),
            Err(TransactionError::BadJoinSplitSignature)
        );
    }

    #[test]
    fn amount_overflow_is_rejected() {
        let mut tx = base_tx();
        tx.outputs = vec![
            Output {
                value: zenith_chain::amount::MAX_MONEY.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            },
            Output {
                value: 1i64.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            },
        ];
        assert!(amounts_are_in_range(&tx).is_err());
    }
}
