//! Context-free block check functions, plus the contextual header rules
//! that only need the parent chain of headers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use zenith_chain::{
    block::{Block, Hash, Header, Height},
    parameters::{Network, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE},
    work::difficulty::ExpandedDifficulty,
    WireSerialize,
};

use crate::error::{BlockError, CertificateError};

/// Returns `Ok(())` if there is exactly one coinbase transaction in
/// `block`, and that coinbase transaction is the first transaction in the
/// block.
pub fn coinbase_is_first(block: &Block) -> Result<(), BlockError> {
    let first = block.transactions.get(0).ok_or(BlockError::NoTransactions)?;
    if !first.is_coinbase() {
        return Err(BlockError::BadCoinbasePosition);
    }
    let mut rest = block.transactions.iter().skip(1);
    if rest.any(|tx| tx.contains_coinbase_input()) {
        return Err(BlockError::BadCoinbasePosition);
    }
    Ok(())
}

/// Returns `Ok(())` if `hash` passes the target difficulty limit for
/// `network` (PoWLimit) and the difficulty filter, based on the fields in
/// `header`.
///
/// Note: the comparisons in this function are u256 integer comparisons;
/// greater values represent *less* work.
pub fn difficulty_is_valid(
    header: &Header,
    network: Network,
    hash: &Hash,
) -> Result<(), BlockError> {
    let difficulty_threshold = header
        .difficulty_threshold
        .to_expanded()
        .ok_or(BlockError::InvalidDifficulty)?;

    if difficulty_threshold > ExpandedDifficulty::target_difficulty_limit(network) {
        return Err(BlockError::InvalidDifficulty);
    }

    if hash > &difficulty_threshold {
        return Err(BlockError::DifficultyFilter);
    }

    Ok(())
}

/// Verify the Equihash solution attached to the header.
pub fn equihash_solution_is_valid(header: &Header) -> Result<(), BlockError> {
    header
        .is_equihash_solution_valid()
        .map_err(|_| BlockError::BadEquihashSolution)
}

/// Bounded size and sigops for the whole block.
pub fn size_and_sigops_are_bounded(block: &Block) -> Result<(), BlockError> {
    let size = block
        .wire_serialize_to_vec()
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX);
    if size > MAX_BLOCK_SIZE {
        return Err(BlockError::Oversized);
    }

    let mut sigops = 0u64;
    for tx in &block.transactions {
        for input in &tx.inputs {
            if let zenith_chain::transparent::Input::PrevOut { unlock_script, .. } = input {
                sigops += zenith_script::sigop_count(unlock_script, false);
            }
        }
        for output in &tx.outputs {
            sigops += zenith_script::sigop_count(&output.lock_script, false);
        }
    }
    for cert in &block.certificates {
        for output in &cert.outputs {
            sigops += zenith_script::sigop_count(&output.lock_script, false);
        }
    }
    if sigops > MAX_BLOCK_SIGOPS {
        return Err(BlockError::TooManySigOps);
    }
    Ok(())
}

/// Check Merkle root validity over transactions and certificates.
///
/// The inherited Merkle construction is malleable: duplicate entries can
/// produce the same root as their single occurrence. Duplicates imply a
/// double-spend, so the hash set check is a hard reject.
pub fn merkle_root_validity(block: &Block) -> Result<(), BlockError> {
    let hashes: Vec<_> = block
        .transactions
        .iter()
        .map(|tx| tx.hash())
        .chain(block.certificates.iter().map(|cert| cert.hash()))
        .collect();

    let merkle_root = hashes.iter().cloned().collect();
    if block.header.merkle_root != merkle_root {
        return Err(BlockError::BadMerkleRoot);
    }

    if hashes.len() != hashes.iter().collect::<HashSet<_>>().len() {
        return Err(BlockError::DuplicateTransaction);
    }

    Ok(())
}

/// Every transaction and certificate in the block passes its context-free
/// battery.
pub fn transactions_are_well_formed(block: &Block) -> Result<(), BlockError> {
    for tx in &block.transactions {
        super::transaction::check(tx)?;
    }
    for cert in &block.certificates {
        super::certificate::check(cert)?;
    }
    Ok(())
}

/// Certificate ordering within a block must be canonical: groups ordered
/// by ascending scid, strictly increasing (epoch, quality) inside each
/// group. (All certificates already follow all transactions by
/// construction of the block format.)
///
/// Requiring each newly opened group's scid to be strictly greater than
/// the previous one also rules out split groups, so exactly one layout of
/// any certificate set is acceptable.
pub fn certificate_order_is_canonical(block: &Block) -> Result<(), BlockError> {
    let mut last_key: Option<(zenith_chain::sidechain::Scid, u32, u64)> = None;

    for cert in &block.certificates {
        if let Some((scid, epoch, quality)) = last_key {
            if cert.scid == scid {
                if (cert.epoch_number, cert.quality) <= (epoch, quality) {
                    return Err(CertificateError::NonCanonicalOrder.into());
                }
            } else if cert.scid < scid {
                return Err(CertificateError::NonCanonicalOrder.into());
            }
        }
        last_key = Some((cert.scid, cert.epoch_number, cert.quality));
    }
    Ok(())
}

/// The full context-free `CheckBlock` battery.
pub fn check(block: &Block, network: Network, require_pow: bool) -> Result<(), BlockError> {
    coinbase_is_first(block)?;
    size_and_sigops_are_bounded(block)?;
    merkle_root_validity(block)?;
    transactions_are_well_formed(block)?;
    certificate_order_is_canonical(block)?;
    if require_pow {
        let hash = block.hash();
        difficulty_is_valid(&block.header, network, &hash)?;
        equihash_solution_is_valid(&block.header)?;
    }
    Ok(())
}

/// Returns `Ok(())` if `header.time` is less than or equal to 2 hours in
/// the future, according to the node's local clock (`now`).
///
/// This is a non-deterministic rule, as clocks vary over time and between
/// different nodes.
pub fn time_is_valid_at(
    header: &Header,
    now: DateTime<Utc>,
    height: &Height,
    hash: &Hash,
) -> Result<(), BlockError> {
    header
        .time_is_valid_at(now, height, hash)
        .map_err(|_| BlockError::TimeTooFarAhead)
}

/// Median-time-past rule: the block's time must exceed the median of the
/// previous 11 block times.
pub fn time_is_after_median_time_past(
    header: &Header,
    previous_times: &[DateTime<Utc>],
) -> Result<(), BlockError> {
    if previous_times.is_empty() {
        return Ok(());
    }
    let mut times: Vec<_> = previous_times.to_vec();
    times.sort_unstable();
    let median = times[times.len() / 2];
    if header.time <= median {
        return Err(BlockError::TimeTooEarly);
    }
    Ok(())
}

/// The coinbase must commit to the height it is mined at.
pub fn height_is_embedded_in_coinbase(
    block: &Block,
    expected: Height,
) -> Result<(), BlockError> {
    match block.coinbase_height() {
        Some(height) if height == expected => Ok(()),
        _ => Err(BlockError::WrongEmbeddedHeight),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    use std::sync::Arc;
    use zenith_chain::amount::Amount;
    use zenith_chain::block::EquihashSolution;
    use zenith_chain::cached::Cached;
    use zenith_chain::certificate::Certificate;
    use zenith_chain::sidechain::{FieldElement, ScProof, Scid};
    use zenith_chain::transaction::{LockTime, Transaction};
    use zenith_chain::transparent::{CoinbaseData, Input, Output, Script};
    use zenith_chain::work::difficulty::CompactDifficulty;
    use chrono::TimeZone;

    fn coinbase(height: u32) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::Coinbase {
                height: Some(Cached::from(Height(height))),
                data: CoinbaseData::new(vec![0x01, height as u8]),
                sequence: 0,
            }],
            vec![Output {
                value: 1_250_000_000i64.try_into().unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::unlocked(),
        ))
    }

    fn cert(scid_salt: u8, epoch: u32, quality: u64) -> Arc<Certificate> {
        Arc::new(Certificate::new(
            Scid([scid_salt; 32]),
            epoch,
            quality,
            FieldElement([quality as u8; 32]),
            ScProof(vec![1]),
            vec![],
            vec![],
            vec![],
            vec![],
            Amount::zero(),
            Amount::zero(),
        ))
    }

    fn block_with_certs(certs: Vec<Arc<Certificate>>) -> Block {
        let transactions = vec![coinbase(7)];
        let mut block = Block {
            header: zenith_chain::block::Header::new(
                3,
                Hash([0; 32]),
                zenith_chain::block::merkle::Root([0; 32]),
                Utc.timestamp(1_600_000_000, 0),
                CompactDifficulty(0x1d00ffff),
                [0; 32],
                EquihashSolution(vec![0; 4]),
            ),
            transactions,
            certificates: certs,
        };
        block.header.merkle_root = block.merkle_root();
        block
    }

    #[test]
    fn coinbase_must_come_first() {
        let block = block_with_certs(vec![]);
        assert_eq!(coinbase_is_first(&block), Ok(()));

        let mut no_coinbase = block;
        no_coinbase.transactions.clear();
        assert_eq!(coinbase_is_first(&no_coinbase), Err(BlockError::NoTransactions));
    }

    #[test]
    fn merkle_root_must_match() {
        let mut block = block_with_certs(vec![]);
        block.header.merkle_root = zenith_chain::block::merkle::Root([0xFF; 32]);
        assert_eq!(merkle_root_validity(&block), Err(BlockError::BadMerkleRoot));
    }

    #[test]
    fn duplicate_transactions_are_rejected() {
        let mut block = block_with_certs(vec![]);
        let dup = block.transactions[0].clone();
        block.transactions.push(dup);
        block.header.merkle_root = block.merkle_root();
        // with an even count the duplicate also survives merkle-root
        // malleability, so the explicit set check must fire
        assert!(matches!(
            merkle_root_validity(&block),
            Err(BlockError::DuplicateTransaction) | Err(BlockError::BadMerkleRoot)
        ));
    }

    #[test]
    fn cert_groups_must_be_contiguous_and_ascending() {
        // ascending quality within one scid group, groups by ascending
        // scid: fine
        let ordered = block_with_certs(vec![cert(1, 0, 5), cert(1, 0, 9), cert(2, 0, 1)]);
        assert_eq!(certificate_order_is_canonical(&ordered), Ok(()));

        // descending quality: rejected
        let descending = block_with_certs(vec![cert(1, 0, 9), cert(1, 0, 5)]);
        assert!(certificate_order_is_canonical(&descending).is_err());

        // split group: rejected
        let split = block_with_certs(vec![cert(1, 0, 5), cert(2, 0, 1), cert(1, 0, 9)]);
        assert!(certificate_order_is_canonical(&split).is_err());

        // groups out of scid order: rejected, even though each group is
        // internally well-formed
        let descending_groups = block_with_certs(vec![cert(2, 0, 1), cert(1, 0, 5)]);
        assert!(certificate_order_is_canonical(&descending_groups).is_err());
    }

    #[test]
    fn median_time_past() {
        let times: Vec<_> = (0..11)
            .map(|i| Utc.timestamp(1_000_000 + i * 100, 0))
            .collect();
        let mut header = block_with_certs(vec![]).header;

        header.time = Utc.timestamp(1_000_000 + 5 * 100, 0);
        assert_eq!(
            time_is_after_median_time_past(&header, &times),
            Err(BlockError::TimeTooEarly)
        );

        header.time = Utc.timestamp(1_000_000 + 6 * 100, 0);
        assert_eq!(time_is_after_median_time_past(&header, &times), Ok(()));
    }

    #[test]
    fn embedded_height_must_match() {
        let block = block_with_certs(vec![]);
        assert_eq!(height_is_embedded_in_coinbase(&block, Height(7)), Ok(()));
        assert_eq!(
            height_is_embedded_in_coinbase(&block, Height(8)),
            Err(BlockError::WrongEmbeddedHeight)
        );
    }
}
