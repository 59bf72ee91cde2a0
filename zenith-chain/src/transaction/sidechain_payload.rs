//! The crosschain output lists of sidechain-capable transactions.
//!
//! A sidechain-capable transaction may declare new sidechains, transfer
//! value forward into existing sidechains, request backward transfers, and
//! reclaim the balance of ceased sidechains through csw inputs.

use std::io;

use serde::{Deserialize, Serialize};

use crate::{
    amount::{Amount, Error as AmountError, NonNegative},
    serialization::{SerializationError, WireDeserialize, WireSerialize},
    sidechain::{
        BitVectorCertificateFieldConfig, FieldElement, FieldElementCertificateFieldConfig,
        ScProof, ScVk, Scid,
    },
    transparent::Script,
};

/// The declaration of a new sidechain.
///
/// The scid is not a field: it is derived from the containing transaction's
/// hash and the creation's position in this list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SidechainCreationOutput {
    /// Sidechain implementation version.
    pub version: u8,
    /// The length of a withdrawal epoch in mainchain blocks. Zero declares a
    /// non-ceasing sidechain.
    pub withdrawal_epoch_length: u32,
    /// The initial forward transfer funding the sidechain.
    pub amount: Amount<NonNegative>,
    /// The sidechain-side address credited with `amount`.
    pub address: FieldElement,
    /// Free-form sidechain metadata.
    pub custom_data: Vec<u8>,
    /// An optional constant baked into every certificate proof.
    pub constant: Option<FieldElement>,
    /// The verification key for withdrawal certificate proofs.
    pub cert_vk: ScVk,
    /// The verification key for ceased-sidechain-withdrawal proofs, if the
    /// sidechain supports csw.
    pub ceased_vk: Option<ScVk>,
    /// Declared custom field-element slots for certificates.
    pub field_element_config: Vec<FieldElementCertificateFieldConfig>,
    /// Declared compressed bit-vector slots for certificates.
    pub bit_vector_config: Vec<BitVectorCertificateFieldConfig>,
    /// The initial minimum fee a forward transfer must pay the sidechain.
    pub forward_transfer_sc_fee: Amount<NonNegative>,
    /// The initial minimum fee a backward-transfer request must pay.
    pub mainchain_bwt_request_sc_fee: Amount<NonNegative>,
    /// Required length of the request data vector of backward-transfer
    /// requests toward this sidechain.
    pub mainchain_bwt_request_data_length: u8,
}

impl SidechainCreationOutput {
    pub fn is_non_ceasing(&self) -> bool {
        self.withdrawal_epoch_length == 0
    }
}

/// A transfer of mainchain value into an existing sidechain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ForwardTransferOutput {
    /// The target sidechain.
    pub scid: Scid,
    /// The transferred value.
    pub amount: Amount<NonNegative>,
    /// The sidechain-side address credited with `amount`.
    pub address: FieldElement,
    /// The mainchain address refunded if the sidechain rejects the
    /// transfer.
    pub mc_return_address: [u8; 20],
}

/// A mainchain-side request for a sidechain to start a backward transfer.
///
/// Balance-preserving for the sidechain except for the fee it carries.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BwtRequestOutput {
    /// The target sidechain.
    pub scid: Scid,
    /// The fee offered to the sidechain for servicing the request.
    pub sc_fee: Amount<NonNegative>,
    /// Request data interpreted by the sidechain; its length must equal the
    /// sidechain's declared `mainchain_bwt_request_data_length`.
    pub sc_request_data: Vec<FieldElement>,
    /// The mainchain destination of the requested backward transfer.
    pub mc_dest_address: [u8; 20],
}

/// A ceased sidechain withdrawal: an input that reclaims balance from a
/// sidechain that ceased, proven against its last cumulative commitment
/// tree.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CswInput {
    /// The ceased sidechain being drained.
    pub scid: Scid,
    /// The reclaimed value.
    pub value: Amount<NonNegative>,
    /// The csw nullifier; unique per scid forever.
    pub nullifier: FieldElement,
    /// Hash of the public key allowed to spend this withdrawal.
    pub pub_key_hash: [u8; 20],
    /// The SNARK proof of the withdrawal.
    pub proof: ScProof,
    /// The data hash of the active certificate the proof refers to, when the
    /// sidechain had one.
    pub act_cert_data_hash: Option<FieldElement>,
    /// The cumulative commitment-tree hash at the cease height.
    pub ceasing_cum_tree_hash: FieldElement,
    /// The one-shot redeem script authorizing this input, produced at
    /// creation time.
    pub redeem_script: Script,
}

/// The four crosschain lists of a sidechain-capable transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SidechainPayload {
    pub sc_creations: Vec<SidechainCreationOutput>,
    pub forward_transfers: Vec<ForwardTransferOutput>,
    pub bwt_requests: Vec<BwtRequestOutput>,
    pub csw_inputs: Vec<CswInput>,
}

impl SidechainPayload {
    pub fn is_empty(&self) -> bool {
        self.sc_creations.is_empty()
            && self.forward_transfers.is_empty()
            && self.bwt_requests.is_empty()
            && self.csw_inputs.is_empty()
    }

    /// Total value leaving the mainchain pool through this payload:
    /// creations' initial funding, forward transfers, and request fees.
    pub fn value_out(&self) -> Result<Amount<NonNegative>, AmountError> {
        let mut total = Amount::<NonNegative>::zero();
        for creation in &self.sc_creations {
            total = (total + creation.amount)?;
        }
        for fwd in &self.forward_transfers {
            total = (total + fwd.amount)?;
        }
        for mbtr in &self.bwt_requests {
            total = (total + mbtr.sc_fee)?;
        }
        Ok(total)
    }

    /// Total value entering the mainchain pool through csw inputs.
    pub fn csw_value_in(&self) -> Result<Amount<NonNegative>, AmountError> {
        let mut total = Amount::<NonNegative>::zero();
        for csw in &self.csw_inputs {
            total = (total + csw.value)?;
        }
        Ok(total)
    }
}

impl WireSerialize for SidechainCreationOutput {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.version.wire_serialize(&mut writer)?;
        self.withdrawal_epoch_length.wire_serialize(&mut writer)?;
        self.amount.wire_serialize(&mut writer)?;
        self.address.wire_serialize(&mut writer)?;
        self.custom_data.wire_serialize(&mut writer)?;
        match &self.constant {
            Some(constant) => {
                true.wire_serialize(&mut writer)?;
                constant.wire_serialize(&mut writer)?;
            }
            None => false.wire_serialize(&mut writer)?,
        }
        self.cert_vk.wire_serialize(&mut writer)?;
        match &self.ceased_vk {
            Some(vk) => {
                true.wire_serialize(&mut writer)?;
                vk.wire_serialize(&mut writer)?;
            }
            None => false.wire_serialize(&mut writer)?,
        }
        self.field_element_config.wire_serialize(&mut writer)?;
        self.bit_vector_config.wire_serialize(&mut writer)?;
        self.forward_transfer_sc_fee.wire_serialize(&mut writer)?;
        self.mainchain_bwt_request_sc_fee
            .wire_serialize(&mut writer)?;
        self.mainchain_bwt_request_data_length
            .wire_serialize(&mut writer)
    }
}

impl WireDeserialize for SidechainCreationOutput {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(SidechainCreationOutput {
            version: u8::wire_deserialize(&mut reader)?,
            withdrawal_epoch_length: u32::wire_deserialize(&mut reader)?,
            amount: WireDeserialize::wire_deserialize(&mut reader)?,
            address: FieldElement::wire_deserialize(&mut reader)?,
            custom_data: <Vec<u8>>::wire_deserialize(&mut reader)?,
            constant: if bool::wire_deserialize(&mut reader)? {
                Some(FieldElement::wire_deserialize(&mut reader)?)
            } else {
                None
            },
            cert_vk: ScVk::wire_deserialize(&mut reader)?,
            ceased_vk: if bool::wire_deserialize(&mut reader)? {
                Some(ScVk::wire_deserialize(&mut reader)?)
            } else {
                None
            },
            field_element_config: WireDeserialize::wire_deserialize(&mut reader)?,
            bit_vector_config: WireDeserialize::wire_deserialize(&mut reader)?,
            forward_transfer_sc_fee: WireDeserialize::wire_deserialize(&mut reader)?,
            mainchain_bwt_request_sc_fee: WireDeserialize::wire_deserialize(&mut reader)?,
            mainchain_bwt_request_data_length: u8::wire_deserialize(&mut reader)?,
        })
    }
}

impl WireSerialize for ForwardTransferOutput {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.scid.wire_serialize(&mut writer)?;
        self.amount.wire_serialize(&mut writer)?;
        self.address.wire_serialize(&mut writer)?;
        writer.write_all(&self.mc_return_address)
    }
}

impl WireDeserialize for ForwardTransferOutput {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let scid = Scid::wire_deserialize(&mut reader)?;
        let amount = WireDeserialize::wire_deserialize(&mut reader)?;
        let address = FieldElement::wire_deserialize(&mut reader)?;
        let mut mc_return_address = [0u8; 20];
        reader.read_exact(&mut mc_return_address)?;
        Ok(ForwardTransferOutput {
            scid,
            amount,
            address,
            mc_return_address,
        })
    }
}

impl WireSerialize for BwtRequestOutput {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.scid.wire_serialize(&mut writer)?;
        self.sc_fee.wire_serialize(&mut writer)?;
        self.sc_request_data.wire_serialize(&mut writer)?;
        writer.write_all(&self.mc_dest_address)
    }
}

impl WireDeserialize for BwtRequestOutput {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let scid = Scid::wire_deserialize(&mut reader)?;
        let sc_fee = WireDeserialize::wire_deserialize(&mut reader)?;
        let sc_request_data = WireDeserialize::wire_deserialize(&mut reader)?;
        let mut mc_dest_address = [0u8; 20];
        reader.read_exact(&mut mc_dest_address)?;
        Ok(BwtRequestOutput {
            scid,
            sc_fee,
            sc_request_data,
            mc_dest_address,
        })
    }
}

impl WireSerialize for CswInput {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.scid.wire_serialize(&mut writer)?;
        self.value.wire_serialize(&mut writer)?;
        self.nullifier.wire_serialize(&mut writer)?;
        writer.write_all(&self.pub_key_hash)?;
        self.proof.wire_serialize(&mut writer)?;
        match &self.act_cert_data_hash {
            Some(hash) => {
                true.wire_serialize(&mut writer)?;
                hash.wire_serialize(&mut writer)?;
            }
            None => false.wire_serialize(&mut writer)?,
        }
        self.ceasing_cum_tree_hash.wire_serialize(&mut writer)?;
        self.redeem_script.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for CswInput {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let scid = Scid::wire_deserialize(&mut reader)?;
        let value = WireDeserialize::wire_deserialize(&mut reader)?;
        let nullifier = FieldElement::wire_deserialize(&mut reader)?;
        let mut pub_key_hash = [0u8; 20];
        reader.read_exact(&mut pub_key_hash)?;
        Ok(CswInput {
            scid,
            value,
            nullifier,
            pub_key_hash,
            proof: ScProof::wire_deserialize(&mut reader)?,
            act_cert_data_hash: if bool::wire_deserialize(&mut reader)? {
                Some(FieldElement::wire_deserialize(&mut reader)?)
            } else {
                None
            },
            ceasing_cum_tree_hash: FieldElement::wire_deserialize(&mut reader)?,
            redeem_script: Script::wire_deserialize(&mut reader)?,
        })
    }
}

impl WireSerialize for SidechainPayload {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        self.sc_creations.wire_serialize(&mut writer)?;
        self.forward_transfers.wire_serialize(&mut writer)?;
        self.bwt_requests.wire_serialize(&mut writer)?;
        self.csw_inputs.wire_serialize(&mut writer)
    }
}

impl WireDeserialize for SidechainPayload {
    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(SidechainPayload {
            sc_creations: WireDeserialize::wire_deserialize(&mut reader)?,
            forward_transfers: WireDeserialize::wire_deserialize(&mut reader)?,
            bwt_requests: WireDeserialize::wire_deserialize(&mut reader)?,
            csw_inputs: WireDeserialize::wire_deserialize(&mut reader)?,
        })
    }
}
