//! The per-sidechain registry record and its state machine.
//!
//! A sidechain is created by one confirmed transaction and destroyed only by
//! pruning. Its dynamic fields move with each confirmed certificate, each
//! confirmed csw input, scheduled maturity of forward transfers, and the
//! cease event. All mutations here are arithmetic; whether a mutation is
//! *allowed* is decided by the consensus crate before calling in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use zenith_chain::{
    amount::{Amount, Error as AmountError, NonNegative},
    block,
    certificate::Certificate,
    sidechain::{
        BitVectorCertificateFieldConfig, FieldElement, FieldElementCertificateFieldConfig, ScVk,
    },
    transaction::{self, SidechainCreationOutput},
};

/// The lifecycle state of a sidechain, derived from its record and the
/// inspection height.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SidechainState {
    /// The creation is only in the mempool.
    Unconfirmed,
    /// Confirmed and accepting forward transfers and certificates.
    Alive,
    /// The cease deadline passed without a qualifying certificate; only csw
    /// inputs may reduce the balance.
    Ceased,
}

/// Summary of the last top-quality certificate confirmed for a sidechain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LastCertSummary {
    pub hash: transaction::Hash,
    pub epoch: u32,
    pub quality: u64,
    /// The epoch the certificate refers to; equals `epoch` for ceasing
    /// sidechains, tracked separately for the non-ceasing flow.
    pub referenced_epoch: u32,
    /// Hash of the certificate's public data, consumed by csw proofs.
    pub data_hash: FieldElement,
    /// The minimum forward-transfer fee this certificate set.
    pub forward_transfer_sc_fee: Amount<NonNegative>,
    /// The minimum backward-transfer-request fee this certificate set.
    pub mainchain_bwt_request_sc_fee: Amount<NonNegative>,
}

/// One sidechain's registry entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SidechainRecord {
    // fixed creation parameters
    pub creation_tx_hash: transaction::Hash,
    /// `None` while the creation is unconfirmed (mempool-built records).
    pub creation_height: Option<block::Height>,
    pub version: u8,
    /// Zero marks a non-ceasing sidechain.
    pub withdrawal_epoch_length: u32,
    pub cert_vk: ScVk,
    pub ceased_vk: Option<ScVk>,
    pub constant: Option<FieldElement>,
    pub custom_data: Vec<u8>,
    pub field_element_config: Vec<FieldElementCertificateFieldConfig>,
    pub bit_vector_config: Vec<BitVectorCertificateFieldConfig>,
    pub mbtr_data_length: u8,

    // dynamic state
    pub balance: Amount<NonNegative>,
    /// Scheduled immature credits: maturity height → amount.
    pub immature_amounts: BTreeMap<block::Height, Amount<NonNegative>>,
    pub last_cert: Option<LastCertSummary>,
    /// The mainchain height pinned by the last certificate's cumulative
    /// commitment root (non-ceasing sidechains).
    pub last_referenced_height: Option<block::Height>,
    /// The height the last certificate was included at.
    pub last_inclusion_height: Option<block::Height>,
    /// Current minimum forward-transfer fee.
    pub forward_transfer_sc_fee: Amount<NonNegative>,
    /// Current minimum backward-transfer-request fee.
    pub mainchain_bwt_request_sc_fee: Amount<NonNegative>,
    /// The height the sidechain ceased at, once it has.
    pub ceased_at: Option<block::Height>,
}

impl SidechainRecord {
    /// Build the record for a creation output confirmed at `height`.
    pub fn from_creation(
        creation_tx_hash: transaction::Hash,
        creation: &SidechainCreationOutput,
        height: block::Height,
    ) -> SidechainRecord {
        SidechainRecord {
            creation_tx_hash,
            creation_height: Some(height),
            version: creation.version,
            withdrawal_epoch_length: creation.withdrawal_epoch_length,
            cert_vk: creation.cert_vk.clone(),
            ceased_vk: creation.ceased_vk.clone(),
            constant: creation.constant,
            custom_data: creation.custom_data.clone(),
            field_element_config: creation.field_element_config.clone(),
            bit_vector_config: creation.bit_vector_config.clone(),
            mbtr_data_length: creation.mainchain_bwt_request_data_length,
            balance: Amount::zero(),
            immature_amounts: BTreeMap::new(),
            last_cert: None,
            last_referenced_height: None,
            last_inclusion_height: None,
            forward_transfer_sc_fee: creation.forward_transfer_sc_fee,
            mainchain_bwt_request_sc_fee: creation.mainchain_bwt_request_sc_fee,
            ceased_at: None,
        }
    }

    /// Build an ephemeral record for an unconfirmed creation, as the
    /// mempool coin-view overlay does.
    pub fn from_unconfirmed_creation(
        creation_tx_hash: transaction::Hash,
        creation: &SidechainCreationOutput,
    ) -> SidechainRecord {
        let mut record = Self::from_creation(creation_tx_hash, creation, block::Height(0));
        record.creation_height = None;
        record
    }

    pub fn is_non_ceasing(&self) -> bool {
        self.withdrawal_epoch_length == 0
    }

    /// The lifecycle state of this sidechain.
    pub fn state(&self) -> SidechainState {
        if self.ceased_at.is_some() {
            SidechainState::Ceased
        } else if self.creation_height.is_none() {
            SidechainState::Unconfirmed
        } else {
            SidechainState::Alive
        }
    }

    /// The last mainchain height of withdrawal epoch `epoch`: epoch 0
    /// spans the `withdrawal_epoch_length` blocks starting at the creation
    /// height.
    ///
    /// Only meaningful for ceasing sidechains with a confirmed creation.
    pub fn end_height_for_epoch(&self, epoch: u32) -> Option<block::Height> {
        let creation = self.creation_height?;
        if self.is_non_ceasing() {
            return None;
        }
        let delta = epoch
            .checked_add(1)?
            .checked_mul(self.withdrawal_epoch_length)?;
        (creation + delta).and_then(|height| height - 1)
    }

    /// The epoch the next certificate must refer to.
    pub fn next_epoch(&self) -> u32 {
        match &self.last_cert {
            Some(summary) => summary.referenced_epoch + 1,
            None => 0,
        }
    }

    /// The currently scheduled cease height: one full epoch past the end of
    /// the epoch the next certificate must attest. At creation this is
    /// `creation + 2 * withdrawal_epoch_length - 1`; each confirmed
    /// top-quality certificate pushes it one epoch further out.
    pub fn current_ceasing_height(&self) -> Option<block::Height> {
        if self.is_non_ceasing() || self.creation_height.is_none() {
            return None;
        }
        let end = self.end_height_for_epoch(self.next_epoch())?;
        end + self.withdrawal_epoch_length
    }

    /// Whether a certificate for `epoch` with `referenced_height` respects
    /// this record's timing rules when included at `at_height`.
    ///
    /// Ceasing sidechains accept exactly the next epoch, after that epoch
    /// has ended and strictly before the cease deadline. Non-ceasing
    /// sidechains accept any not-yet-attested epoch whose referenced height
    /// strictly increases.
    pub fn check_cert_timing(
        &self,
        epoch: u32,
        referenced_height: Option<block::Height>,
        at_height: block::Height,
    ) -> bool {
        if self.is_non_ceasing() {
            let referenced_height = match referenced_height {
                Some(height) => height,
                None => return false,
            };
            if epoch < self.next_epoch() {
                return false;
            }
            match self.last_referenced_height {
                Some(last) => referenced_height > last,
                None => true,
            }
        } else {
            if epoch != self.next_epoch() {
                return false;
            }
            let end = match self.end_height_for_epoch(epoch) {
                Some(end) => end,
                None => return false,
            };
            if at_height <= end {
                return false;
            }
            match self.current_ceasing_height() {
                Some(deadline) => at_height < deadline,
                None => false,
            }
        }
    }

    /// Schedule `amount` to mature into the balance at `maturity_height`.
    pub fn credit_immature(
        &mut self,
        maturity_height: block::Height,
        amount: Amount<NonNegative>,
    ) -> Result<(), AmountError> {
        let slot = self
            .immature_amounts
            .entry(maturity_height)
            .or_insert_with(Amount::zero);
        *slot = (*slot + amount)?;
        Ok(())
    }

    /// Remove a scheduled immature credit (disconnect path). Errors if the
    /// slot does not hold at least `amount`.
    pub fn uncredit_immature(
        &mut self,
        maturity_height: block::Height,
        amount: Amount<NonNegative>,
    ) -> Result<(), AmountError> {
        let slot = self
            .immature_amounts
            .get_mut(&maturity_height)
            .ok_or(AmountError::Invalid { value: -1 })?;
        *slot = (*slot - amount)?;
        if slot.is_zero() {
            self.immature_amounts.remove(&maturity_height);
        }
        Ok(())
    }

    /// Mature every scheduled credit at `height` into the balance.
    pub fn mature_amounts_at(&mut self, height: block::Height) -> Result<Amount<NonNegative>, AmountError> {
        let amount = match self.immature_amounts.remove(&height) {
            Some(amount) => amount,
            None => return Ok(Amount::zero()),
        };
        self.balance = (self.balance + amount)?;
        Ok(amount)
    }

    /// Reverse [`Self::mature_amounts_at`].
    pub fn unmature_amounts_at(
        &mut self,
        height: block::Height,
        amount: Amount<NonNegative>,
    ) -> Result<(), AmountError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.balance = (self.balance - amount)?;
        self.credit_immature(height, amount)
    }

    /// Apply a confirmed top-quality certificate: deduct its backward
    /// transfers from the balance and update the dynamic summary.
    pub fn apply_certificate(
        &mut self,
        cert: &Certificate,
        inclusion_height: block::Height,
        referenced_height: Option<block::Height>,
    ) -> Result<(), AmountError> {
        let bwt_total = cert.bwt_total()?;
        self.balance = (self.balance - bwt_total)?;
        self.last_cert = Some(LastCertSummary {
            hash: cert.hash(),
            epoch: cert.epoch_number,
            quality: cert.quality,
            referenced_epoch: cert.epoch_number,
            data_hash: cert_data_hash(cert),
            forward_transfer_sc_fee: cert.forward_transfer_sc_fee,
            mainchain_bwt_request_sc_fee: cert.mainchain_bwt_request_sc_fee,
        });
        self.forward_transfer_sc_fee = cert.forward_transfer_sc_fee;
        self.mainchain_bwt_request_sc_fee = cert.mainchain_bwt_request_sc_fee;
        self.last_inclusion_height = Some(inclusion_height);
        if self.is_non_ceasing() {
            self.last_referenced_height = referenced_height;
        }
        Ok(())
    }

    /// Apply a confirmed csw input: consume balance.
    pub fn apply_csw(&mut self, value: Amount<NonNegative>) -> Result<(), AmountError> {
        self.balance = (self.balance - value)?;
        Ok(())
    }

    /// Reverse a confirmed csw input.
    pub fn revert_csw(&mut self, value: Amount<NonNegative>) -> Result<(), AmountError> {
        self.balance = (self.balance + value)?;
        Ok(())
    }

    /// Fire the cease event.
    pub fn cease(&mut self, height: block::Height) {
        self.ceased_at = Some(height);
    }

    /// Reverse the cease event (disconnect path).
    pub fn revive(&mut self) {
        self.ceased_at = None;
    }
}

/// The data hash a certificate exposes to csw proofs: a digest of its
/// public fields under the sidechain's field configuration.
pub fn cert_data_hash(cert: &Certificate) -> FieldElement {
    use zenith_chain::serialization::sha256d;
    use zenith_chain::WireSerialize;

    let mut preimage = Vec::new();
    cert.scid
        .wire_serialize(&mut preimage)
        .expect("serialization into a vec is infallible");
    cert.epoch_number
        .wire_serialize(&mut preimage)
        .expect("serialization into a vec is infallible");
    cert.quality
        .wire_serialize(&mut preimage)
        .expect("serialization into a vec is infallible");
    cert.end_epoch_cum_tree_root
        .wire_serialize(&mut preimage)
        .expect("serialization into a vec is infallible");
    cert.custom_fields
        .wire_serialize(&mut preimage)
        .expect("serialization into a vec is infallible");
    FieldElement(sha256d::digest(&preimage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    use zenith_chain::sidechain::{ScProof, Scid};

    fn creation(epoch_len: u32) -> SidechainCreationOutput {
        SidechainCreationOutput {
            version: 2,
            withdrawal_epoch_length: epoch_len,
            amount: 100_000_000i64.try_into().unwrap(),
            address: FieldElement([1; 32]),
            custom_data: vec![],
            constant: None,
            cert_vk: ScVk(vec![1; 8]),
            ceased_vk: Some(ScVk(vec![2; 8])),
            field_element_config: vec![],
            bit_vector_config: vec![],
            forward_transfer_sc_fee: Amount::zero(),
            mainchain_bwt_request_sc_fee: Amount::zero(),
            mainchain_bwt_request_data_length: 0,
        }
    }

    fn record(epoch_len: u32, height: u32) -> SidechainRecord {
        SidechainRecord::from_creation(
            transaction::Hash([7; 32]),
            &creation(epoch_len),
            block::Height(height),
        )
    }

    fn cert(scid: Scid, epoch: u32, quality: u64, bwt: i64) -> Certificate {
        Certificate::new(
            scid,
            epoch,
            quality,
            FieldElement([9; 32]),
            ScProof(vec![1]),
            vec![],
            vec![],
            vec![],
            vec![zenith_chain::certificate::BackwardTransfer {
                value: bwt.try_into().unwrap(),
                pk_dest: [4; 20],
            }],
            Amount::zero(),
            Amount::zero(),
        )
    }

    #[test]
    fn epoch_arithmetic() {
        let record = record(10, 1);
        assert_eq!(record.end_height_for_epoch(0), Some(block::Height(10)));
        assert_eq!(record.end_height_for_epoch(1), Some(block::Height(20)));
        assert_eq!(record.current_ceasing_height(), Some(block::Height(20)));
    }

    #[test]
    fn immature_credit_matures_once() {
        let mut record = record(10, 1);
        let amount: Amount<NonNegative> = 100_000_000i64.try_into().unwrap();
        record.credit_immature(block::Height(11), amount).unwrap();
        assert!(record.balance.is_zero());

        let matured = record.mature_amounts_at(block::Height(11)).unwrap();
        assert_eq!(matured, amount);
        assert_eq!(record.balance, amount);

        // nothing left at that height
        assert!(record
            .mature_amounts_at(block::Height(11))
            .unwrap()
            .is_zero());
    }

    #[test]
    fn unmature_restores_the_schedule() {
        let mut record = record(10, 1);
        let amount: Amount<NonNegative> = 50i64.try_into().unwrap();
        record.credit_immature(block::Height(11), amount).unwrap();
        let matured = record.mature_amounts_at(block::Height(11)).unwrap();
        record.unmature_amounts_at(block::Height(11), matured).unwrap();
        assert!(record.balance.is_zero());
        assert_eq!(
            record.immature_amounts.get(&block::Height(11)),
            Some(&amount)
        );
    }

    #[test]
    fn certificate_moves_balance_and_reschedules() {
        let mut record = record(10, 1);
        record
            .credit_immature(block::Height(3), 100i64.try_into().unwrap())
            .unwrap();
        record.mature_amounts_at(block::Height(3)).unwrap();

        let cert = cert(Scid([2; 32]), 0, 7, 40);
        record
            .apply_certificate(&cert, block::Height(12), None)
            .unwrap();
        assert_eq!(record.balance.zatoshi(), 60);
        assert_eq!(record.next_epoch(), 1);
        // cease deadline moved one epoch out: end(1) + len
        assert_eq!(record.current_ceasing_height(), Some(block::Height(30)));
    }

    #[test]
    fn ceasing_timing_accepts_only_next_epoch_in_window() {
        let mut record = record(10, 1);
        // epoch 0 ends at 10; submission window is (10, 20)
        assert!(record.check_cert_timing(0, None, block::Height(11)));
        assert!(record.check_cert_timing(0, None, block::Height(19)));
        assert!(!record.check_cert_timing(0, None, block::Height(10)));
        assert!(!record.check_cert_timing(0, None, block::Height(20)));
        assert!(!record.check_cert_timing(1, None, block::Height(11)));

        let cert = cert(Scid([2; 32]), 0, 1, 0);
        record
            .apply_certificate(&cert, block::Height(12), None)
            .unwrap();
        // epoch 1 ends at 20; its window is (20, 30)
        assert!(!record.check_cert_timing(0, None, block::Height(21)));
        assert!(record.check_cert_timing(1, None, block::Height(21)));
        assert!(!record.check_cert_timing(1, None, block::Height(30)));
    }

    #[test]
    fn non_ceasing_requires_strictly_increasing_referenced_heights() {
        let mut record = record(0, 1);
        assert!(record.is_non_ceasing());
        assert!(record.check_cert_timing(0, Some(block::Height(100)), block::Height(300)));

        let cert0 = cert(Scid([2; 32]), 0, 0, 0);
        record
            .apply_certificate(&cert0, block::Height(101), Some(block::Height(100)))
            .unwrap();

        assert!(record.check_cert_timing(1, Some(block::Height(200)), block::Height(300)));
        assert!(!record.check_cert_timing(1, Some(block::Height(100)), block::Height(300)));
        assert!(!record.check_cert_timing(1, Some(block::Height(50)), block::Height(300)));
    }

    #[test]
    fn cease_and_revive() {
        let mut record = record(10, 1);
        assert_eq!(record.state(), SidechainState::Alive);
        record.cease(block::Height(20));
        assert_eq!(record.state(), SidechainState::Ceased);
        record.revive();
        assert_eq!(record.state(), SidechainState::Alive);
    }

    #[test]
    fn csw_consumes_balance_within_bounds() {
        let mut record = record(10, 1);
        record
            .credit_immature(block::Height(2), 100i64.try_into().unwrap())
            .unwrap();
        record.mature_amounts_at(block::Height(2)).unwrap();

        record.apply_csw(40i64.try_into().unwrap()).unwrap();
        assert_eq!(record.balance.zatoshi(), 60);
        // over-withdrawal fails arithmetically
        assert!(record.apply_csw(70i64.try_into().unwrap()).is_err());
    }
}
