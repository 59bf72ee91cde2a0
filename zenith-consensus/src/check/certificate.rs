//! Context-free certificate checks.

use std::collections::HashSet;

use zenith_chain::{certificate::Certificate, parameters::MAX_BLOCK_SIZE, WireSerialize};

use crate::error::{CertificateError, TransactionError};

/// A certificate needs something to attest: an empty bwt list is allowed
/// (pure state attestation), an absent or malformed proof is not.
pub fn has_proof(cert: &Certificate) -> Result<(), CertificateError> {
    if !cert.proof.is_well_formed() {
        return Err(CertificateError::BadProof);
    }
    Ok(())
}

/// Oversize rejection.
pub fn size_is_bounded(cert: &Certificate) -> Result<(), CertificateError> {
    let size = cert
        .wire_serialize_to_vec()
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX);
    if size > MAX_BLOCK_SIZE {
        return Err(CertificateError::Transaction(TransactionError::Oversized));
    }
    Ok(())
}

/// No duplicate spends within the certificate.
pub fn no_duplicate_inputs(cert: &Certificate) -> Result<(), CertificateError> {
    let mut outpoints = HashSet::new();
    for outpoint in cert.spent_outpoints() {
        if !outpoints.insert(outpoint) {
            return Err(CertificateError::Transaction(
                TransactionError::DuplicateInputs,
            ));
        }
    }
    Ok(())
}

/// Certificates never carry coinbase inputs.
pub fn no_coinbase_inputs(cert: &Certificate) -> Result<(), CertificateError> {
    if cert
        .inputs
        .iter()
        .any(|input| matches!(input, zenith_chain::transparent::Input::Coinbase { .. }))
    {
        return Err(CertificateError::Transaction(
            TransactionError::UnexpectedCoinbase,
        ));
    }
    Ok(())
}

/// Amount sums stay in range.
pub fn amounts_are_in_range(cert: &Certificate) -> Result<(), CertificateError> {
    cert.bwt_total()
        .map_err(TransactionError::from)
        .map_err(CertificateError::from)?;
    cert.change_total()
        .map_err(TransactionError::from)
        .map_err(CertificateError::from)?;
    Ok(())
}

/// Run the whole context-free battery in order.
pub fn check(cert: &Certificate) -> Result<(), CertificateError> {
    has_proof(cert)?;
    size_is_bounded(cert)?;
    no_duplicate_inputs(cert)?;
    no_coinbase_inputs(cert)?;
    amounts_are_in_range(cert)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;
    use zenith_chain::amount::Amount;
    use zenith_chain::certificate::BackwardTransfer;
    use zenith_chain::sidechain::{FieldElement, ScProof, Scid};
    use zenith_chain::transparent::{Input, OutPoint, Script};

    fn cert() -> Certificate {
        Certificate::new(
            Scid([1; 32]),
            0,
            1,
            FieldElement([2; 32]),
            ScProof(vec![1, 2, 3]),
            vec![],
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: zenith_chain::transaction::Hash([3; 32]),
                    index: 0,
                },
                unlock_script: Script(vec![0x01]),
                sequence: 0,
            }],
            vec![],
            vec![BackwardTransfer {
                value: 1_000i64.try_into().unwrap(),
                pk_dest: [4; 20],
            }],
            Amount::zero(),
            Amount::zero(),
        )
    }

    #[test]
    fn well_formed_cert_passes() {
        assert_eq!(check(&cert()), Ok(()));
    }

    #[test]
    fn empty_proof_fails() {
        let mut cert = cert();
        cert.proof = ScProof(vec![]);
        assert!(check(&cert).is_err());
    }

    #[test]
    fn duplicate_inputs_fail() {
        let mut cert = cert();
        cert.inputs.push(cert.inputs[0].clone());
        assert_eq!(
            check(&cert),
            Err(CertificateError::Transaction(
                TransactionError::DuplicateInputs
            ))
        );
    }
}
