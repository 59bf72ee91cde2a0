//! Standard output-script templates.
//!
//! Admission policy only relays outputs matching one of these shapes. Each
//! base template has a replay-protected variant that appends
//! `<block-hash-suffix> <height> OP_CHECKBLOCKATHEIGHT`.

use zenith_chain::{block, transparent::Script};

use crate::interpreter::{decode_script_num, ScriptIter};
use crate::opcodes::*;
use crate::ScriptError;

/// The classified shape of an output script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxOutType {
    NonStandard,
    PubKey,
    PubKeyHash,
    ScriptHash,
    Multisig,
    NullData,
    PubKeyReplay,
    PubKeyHashReplay,
    ScriptHashReplay,
    MultisigReplay,
    NullDataReplay,
}

impl TxOutType {
    /// Whether this shape carries the replay-protection suffix.
    pub fn is_replay_protected(&self) -> bool {
        matches!(
            self,
            TxOutType::PubKeyReplay
                | TxOutType::PubKeyHashReplay
                | TxOutType::ScriptHashReplay
                | TxOutType::MultisigReplay
                | TxOutType::NullDataReplay
        )
    }
}

/// The parameters committed by a replay-protected script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckBlockAtHeightParams {
    /// The suffix the referenced block's hash must end with.
    pub hash_suffix: Vec<u8>,
    /// The referenced mainchain height.
    pub height: block::Height,
}

/// One parsed script element: either a bare opcode or a data push.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Element {
    Op(u8),
    Data(Vec<u8>),
}

fn parse_elements(script: &Script) -> Option<Vec<Element>> {
    let mut elements = Vec::new();
    for entry in ScriptIter::new(script.as_bytes()) {
        match entry {
            Ok((_, Some(data))) => elements.push(Element::Data(data.to_vec())),
            Ok((OP_0, None)) => elements.push(Element::Data(Vec::new())),
            Ok((opcode, None)) => elements.push(Element::Op(opcode)),
            Err(_) => return None,
        }
    }
    Some(elements)
}

fn is_small_data(data: &[u8]) -> bool {
    data.len() <= 80
}

fn is_pub_key(data: &[u8]) -> bool {
    match data.len() {
        33 => data[0] == 0x02 || data[0] == 0x03,
        65 => data[0] == 0x04,
        _ => false,
    }
}

/// Fast structural check for the P2SH shape, used by the evaluator for
/// redeem-script indirection.
pub fn is_pay_to_script_hash(script: &Script) -> bool {
    let bytes = script.as_bytes();
    bytes.len() == 23 && bytes[0] == OP_HASH160 && bytes[1] == 0x14 && bytes[22] == OP_EQUAL
}

/// Split off a trailing `<suffix> <height> OP_CHECKBLOCKATHEIGHT` group, if
/// present and well-formed. The height must be minimally encoded in at most
/// 4 bytes.
fn split_replay_suffix(elements: &[Element]) -> Option<(&[Element], CheckBlockAtHeightParams)> {
    if elements.len() < 3 {
        return None;
    }
    let n = elements.len();
    match (&elements[n - 3], &elements[n - 2], &elements[n - 1]) {
        (Element::Data(suffix), Element::Data(height_raw), Element::Op(OP_CHECKBLOCKATHEIGHT))
            if is_small_data(suffix) =>
        {
            let height = match decode_script_num(height_raw, 4) {
                Ok(h) if h >= 0 => block::Height(h as u32),
                _ => return None,
            };
            Some((
                &elements[..n - 3],
                CheckBlockAtHeightParams {
                    hash_suffix: suffix.clone(),
                    height,
                },
            ))
        }
        _ => None,
    }
}

fn classify_base(elements: &[Element]) -> Option<TxOutType> {
    use Element::*;

    match elements {
        // <pubkey> OP_CHECKSIG
        [Data(key), Op(OP_CHECKSIG)] if is_pub_key(key) => Some(TxOutType::PubKey),
        // OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
        [Op(OP_DUP), Op(OP_HASH160), Data(hash), Op(OP_EQUALVERIFY), Op(OP_CHECKSIG)]
            if hash.len() == 20 =>
        {
            Some(TxOutType::PubKeyHash)
        }
        // OP_HASH160 <20 bytes> OP_EQUAL
        [Op(OP_HASH160), Data(hash), Op(OP_EQUAL)] if hash.len() == 20 => {
            Some(TxOutType::ScriptHash)
        }
        // OP_RETURN [<=80 bytes]*
        [Op(OP_RETURN), rest @ ..] => {
            if rest
                .iter()
                .all(|element| matches!(element, Data(data) if is_small_data(data)))
            {
                Some(TxOutType::NullData)
            } else {
                None
            }
        }
        // m <pubkey>+ n OP_CHECKMULTISIG
        [Op(m), middle @ .., Op(n), Op(OP_CHECKMULTISIG)]
            if (OP_1..=OP_16).contains(m) && (OP_1..=OP_16).contains(n) =>
        {
            let m = m - OP_1 + 1;
            let n = n - OP_1 + 1;
            if m > n || middle.len() != n as usize {
                return None;
            }
            if middle
                .iter()
                .all(|element| matches!(element, Data(key) if is_pub_key(key)))
            {
                Some(TxOutType::Multisig)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Classify an output script against the standard templates.
pub fn classify(script: &Script) -> TxOutType {
    let elements = match parse_elements(script) {
        Some(elements) => elements,
        None => return TxOutType::NonStandard,
    };

    if let Some((base, _params)) = split_replay_suffix(&elements) {
        return match classify_base(base) {
            Some(TxOutType::PubKey) => TxOutType::PubKeyReplay,
            Some(TxOutType::PubKeyHash) => TxOutType::PubKeyHashReplay,
            Some(TxOutType::ScriptHash) => TxOutType::ScriptHashReplay,
            Some(TxOutType::Multisig) => TxOutType::MultisigReplay,
            Some(TxOutType::NullData) => TxOutType::NullDataReplay,
            _ => TxOutType::NonStandard,
        };
    }

    classify_base(&elements).unwrap_or(TxOutType::NonStandard)
}

/// Whether this output script matches any standard template.
pub fn is_standard(script: &Script) -> bool {
    classify(script) != TxOutType::NonStandard
}

/// Extract the replay-protection parameters of a script, if it carries the
/// trailing `<suffix> <height> OP_CHECKBLOCKATHEIGHT` group.
///
/// Deliberately independent of template classification: the reorg sweep
/// must re-evaluate every protected script it relayed, standard or not.
pub fn checkblockatheight_params(script: &Script) -> Option<CheckBlockAtHeightParams> {
    let elements = parse_elements(script)?;
    let (_base, params) = split_replay_suffix(&elements)?;
    Some(params)
}

/// Validate a replay-protected script's reference against the chain: either
/// the reference is deeper than the window, or the hash at that height must
/// end with the suffix.
pub fn check_replay_protection<H: crate::ChainHistory>(
    params: &CheckBlockAtHeightParams,
    history: &H,
) -> Result<(), ScriptError> {
    use zenith_chain::parameters::CBH_DELTA_HEIGHT;

    let tip = history.tip_height();
    if params.height > tip {
        return Err(ScriptError::CheckBlockAtHeightNotFound(params.height.0));
    }
    if tip.0.saturating_sub(params.height.0) > CBH_DELTA_HEIGHT {
        return Ok(());
    }
    match history.block_hash_at(params.height) {
        Some(hash) if hash.ends_with(&params.hash_suffix) => Ok(()),
        Some(_) => Err(ScriptError::CheckBlockAtHeightMismatch),
        None => Err(ScriptError::CheckBlockAtHeightNotFound(params.height.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2pkh() -> Vec<u8> {
        let mut script = vec![OP_DUP, OP_HASH160, 0x14];
        script.extend_from_slice(&[0x11; 20]);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        script
    }

    #[test]
    fn p2pkh_is_standard() {
        assert_eq!(classify(&Script(p2pkh())), TxOutType::PubKeyHash);
    }

    #[test]
    fn p2pkh_replay_variant() {
        let mut script = p2pkh();
        // suffix push (2 bytes), height push (900), OP_CHECKBLOCKATHEIGHT
        script.extend_from_slice(&[0x02, 0xab, 0xcd, 0x02, 0x84, 0x03, OP_CHECKBLOCKATHEIGHT]);
        let script = Script(script);
        assert_eq!(classify(&script), TxOutType::PubKeyHashReplay);

        let params = checkblockatheight_params(&script).unwrap();
        assert_eq!(params.height, block::Height(900));
        assert_eq!(params.hash_suffix, vec![0xab, 0xcd]);
    }

    #[test]
    fn non_minimal_height_is_nonstandard() {
        let mut script = p2pkh();
        // height 900 padded to three bytes
        script.extend_from_slice(&[0x02, 0xab, 0xcd, 0x03, 0x84, 0x03, 0x00, OP_CHECKBLOCKATHEIGHT]);
        assert_eq!(classify(&Script(script)), TxOutType::NonStandard);
    }

    #[test]
    fn garbage_is_nonstandard() {
        assert_eq!(classify(&Script(vec![0xFF, 0xFE])), TxOutType::NonStandard);
    }

    #[test]
    fn null_data_standard() {
        let mut script = vec![OP_RETURN, 0x03];
        script.extend_from_slice(b"abc");
        assert_eq!(classify(&Script(script)), TxOutType::NullData);
    }

    #[test]
    fn multisig_shape() {
        let mut script = vec![OP_1];
        script.push(33);
        let mut key = vec![0x02];
        key.extend_from_slice(&[0x22; 32]);
        script.extend_from_slice(&key);
        script.push(33);
        script.extend_from_slice(&key);
        script.extend_from_slice(&[OP_1 + 1, OP_CHECKMULTISIG]);
        assert_eq!(classify(&Script(script)), TxOutType::Multisig);
    }

    #[test]
    fn p2sh_fast_path() {
        let mut script = vec![OP_HASH160, 0x14];
        script.extend_from_slice(&[0x33; 20]);
        script.push(OP_EQUAL);
        assert!(is_pay_to_script_hash(&Script(script)));
    }
}
