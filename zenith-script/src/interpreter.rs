//! The script stack machine.

use ripemd160::{Digest as RipemdDigest, Ripemd160};
use sha2::{Digest, Sha256};

use zenith_chain::{
    block,
    parameters::CBH_DELTA_HEIGHT,
    transaction::{sighash, Transaction},
    transparent::Script,
};

use crate::opcodes::*;
use crate::ScriptError;

/// Evaluation flag set.
///
/// Policy evaluation is stricter than consensus evaluation; block connect
/// uses the consensus set so that once-valid chains stay valid.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VerificationFlags {
    /// Require the final stack to contain exactly one (true) element.
    pub clean_stack: bool,
    /// Enforce `OP_CHECKBLOCKATHEIGHT` against the active chain. Always set
    /// in this implementation; kept as a flag to express the consensus /
    /// policy split.
    pub check_block_at_height: bool,
    /// Reject non-minimal script-number encodings in CBH parameters.
    pub minimal_cbh_encoding: bool,
}

impl VerificationFlags {
    /// The flag set applied to mempool admission.
    pub fn standard() -> VerificationFlags {
        VerificationFlags {
            clean_stack: true,
            check_block_at_height: true,
            minimal_cbh_encoding: true,
        }
    }

    /// The flag set applied during block connect.
    pub fn consensus() -> VerificationFlags {
        VerificationFlags {
            clean_stack: false,
            check_block_at_height: true,
            minimal_cbh_encoding: true,
        }
    }
}

/// Read access to the active chain, as needed by
/// `OP_CHECKBLOCKATHEIGHT`.
pub trait ChainHistory {
    /// The hash of the active chain's block at `height`, if any.
    fn block_hash_at(&self, height: block::Height) -> Option<block::Hash>;

    /// The height of the active tip.
    fn tip_height(&self) -> block::Height;
}

/// The seam between script evaluation and transaction signatures.
pub trait SignatureChecker {
    /// Check `sig` (DER plus the trailing hash-type byte) by `pub_key` over
    /// the current script code.
    fn check_sig(&self, sig: &[u8], pub_key: &[u8], script_code: &Script) -> bool;
}

/// Checks signatures against one input of a concrete transaction.
pub struct TransactionSignatureChecker<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
}

impl<'a> SignatureChecker for TransactionSignatureChecker<'a> {
    fn check_sig(&self, sig: &[u8], pub_key: &[u8], script_code: &Script) -> bool {
        let (sig_der, hash_type_byte) = match sig.split_last() {
            Some((last, rest)) => (rest, *last),
            None => return false,
        };

        let anyone_can_pay = hash_type_byte as u32 & sighash::ANYONE_CAN_PAY != 0;
        let hash_type = match hash_type_byte as u32 & 0x1f {
            2 => sighash::HashType::None,
            3 => sighash::HashType::Single,
            _ => sighash::HashType::All,
        };

        let digest = match sighash::signature_hash(
            self.tx,
            self.input_index,
            script_code,
            hash_type,
            anyone_can_pay,
        ) {
            Ok(digest) => digest,
            Err(_) => return false,
        };

        let secp = secp256k1::Secp256k1::verification_only();
        let message = match secp256k1::Message::from_slice(&digest) {
            Ok(message) => message,
            Err(_) => return false,
        };
        let signature = match secp256k1::Signature::from_der(sig_der) {
            Ok(signature) => signature,
            Err(_) => return false,
        };
        let pub_key = match secp256k1::PublicKey::from_slice(pub_key) {
            Ok(pub_key) => pub_key,
            Err(_) => return false,
        };

        secp.verify(&message, &signature, &pub_key).is_ok()
    }
}

/// An iterator over (opcode, push-data) pairs of a script.
pub(crate) struct ScriptIter<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ScriptIter<'a> {
    pub fn new(bytes: &'a [u8]) -> ScriptIter<'a> {
        ScriptIter { bytes, position: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ScriptError> {
        if self.position + count > self.bytes.len() {
            return Err(ScriptError::BadPush);
        }
        let slice = &self.bytes[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }
}

impl<'a> Iterator for ScriptIter<'a> {
    type Item = Result<(u8, Option<&'a [u8]>), ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.bytes.len() {
            return None;
        }
        let opcode = self.bytes[self.position];
        self.position += 1;

        let result = match opcode {
            len @ 0x01..=0x4b => self.take(len as usize).map(|data| (opcode, Some(data))),
            OP_PUSHDATA1 => self
                .take(1)
                .map(|len| len[0] as usize)
                .and_then(|len| self.take(len))
                .map(|data| (opcode, Some(data))),
            OP_PUSHDATA2 => self
                .take(2)
                .map(|len| u16::from_le_bytes([len[0], len[1]]) as usize)
                .and_then(|len| self.take(len))
                .map(|data| (opcode, Some(data))),
            OP_PUSHDATA4 => self
                .take(4)
                .map(|len| u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize)
                .and_then(|len| self.take(len))
                .map(|data| (opcode, Some(data))),
            _ => Ok((opcode, None)),
        };
        Some(result)
    }
}

/// Decode a minimally-encoded script number of at most `max_size` bytes.
pub(crate) fn decode_script_num(data: &[u8], max_size: usize) -> Result<i64, ScriptError> {
    if data.len() > max_size {
        return Err(ScriptError::ScriptNumber);
    }
    if data.is_empty() {
        return Ok(0);
    }
    // reject padded encodings: the last byte must carry information beyond
    // the sign bit of the byte before it
    let last = data[data.len() - 1];
    if last & 0x7f == 0 && (data.len() == 1 || data[data.len() - 2] & 0x80 == 0) {
        return Err(ScriptError::ScriptNumber);
    }
    let mut result: i64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i == data.len() - 1 {
            result |= ((byte & 0x7f) as i64) << (8 * i);
            if byte & 0x80 != 0 {
                result = -result;
            }
        } else {
            result |= (byte as i64) << (8 * i);
        }
    }
    Ok(result)
}

fn is_truthy(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            // negative zero is false
            return !(i == data.len() - 1 && byte == 0x80);
        }
    }
    false
}

/// Evaluate `unlock_script` then `lock_script` against a shared stack, as in
/// the inherited pay-to-script model.
///
/// P2SH redeem-script indirection is resolved here: when the lock script
/// matches the script-hash template, the last pushed element of the unlock
/// script is deserialized and evaluated as a script itself.
pub fn verify_script<C: SignatureChecker, H: ChainHistory>(
    unlock_script: &Script,
    lock_script: &Script,
    flags: VerificationFlags,
    checker: &C,
    history: &H,
) -> Result<(), ScriptError> {
    let mut stack: Vec<Vec<u8>> = Vec::new();
    eval_script(unlock_script, &mut stack, flags, checker, history)?;

    // keep a copy for P2SH evaluation
    let stack_after_unlock = stack.clone();

    eval_script(lock_script, &mut stack, flags, checker, history)?;

    match stack.last() {
        Some(top) if is_truthy(top) => {}
        _ => return Err(ScriptError::EvalFalse),
    }

    if crate::standard::is_pay_to_script_hash(lock_script) {
        let mut stack = stack_after_unlock;
        let redeem_bytes = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        let redeem_script = Script(redeem_bytes);
        eval_script(&redeem_script, &mut stack, flags, checker, history)?;
        match stack.last() {
            Some(top) if is_truthy(top) => {}
            _ => return Err(ScriptError::EvalFalse),
        }
        if flags.clean_stack && stack.len() != 1 {
            return Err(ScriptError::CleanStack);
        }
        return Ok(());
    }

    if flags.clean_stack && stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }

    Ok(())
}

fn eval_script<C: SignatureChecker, H: ChainHistory>(
    script: &Script,
    stack: &mut Vec<Vec<u8>>,
    flags: VerificationFlags,
    checker: &C,
    history: &H,
) -> Result<(), ScriptError> {
    if script.as_bytes().len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }

    let mut op_count = 0usize;
    let mut iter = ScriptIter::new(script.as_bytes());

    while let Some(entry) = iter.next() {
        let (opcode, data) = entry?;

        if let Some(data) = data {
            if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptError::PushSize);
            }
            stack.push(data.to_vec());
            continue;
        }

        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::OpCount);
            }
        }

        match opcode {
            OP_0 => stack.push(Vec::new()),
            OP_1NEGATE => stack.push(vec![0x81]),
            op @ OP_1..=OP_16 => stack.push(vec![op - OP_1 + 1]),
            OP_NOP => {}
            OP_DUP => {
                let top = stack.last().ok_or(ScriptError::InvalidStackOperation)?;
                stack.push(top.clone());
            }
            OP_DROP => {
                stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
            }
            OP_VERIFY => {
                let top = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                if !is_truthy(&top) {
                    return Err(ScriptError::Verify);
                }
            }
            OP_RETURN => return Err(ScriptError::OpReturn),
            OP_EQUAL | OP_EQUALVERIFY => {
                let b = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let a = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let equal = a == b;
                if opcode == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::EqualVerify);
                    }
                } else {
                    stack.push(if equal { vec![1] } else { Vec::new() });
                }
            }
            OP_SHA256 => {
                let top = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                stack.push(Sha256::digest(&top).to_vec());
            }
            OP_HASH160 => {
                let top = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let sha = Sha256::digest(&top);
                stack.push(Ripemd160::digest(&sha).to_vec());
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pub_key = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let sig = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let ok = checker.check_sig(&sig, &pub_key, script);
                if opcode == OP_CHECKSIGVERIFY {
                    if !ok {
                        return Err(ScriptError::SigFailure);
                    }
                } else {
                    stack.push(if ok { vec![1] } else { Vec::new() });
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let key_count_raw = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let key_count = decode_script_num(&key_count_raw, 4)?;
                if key_count < 0 || key_count as usize > MAX_PUBKEYS_PER_MULTISIG {
                    return Err(ScriptError::PubKeyCount);
                }
                op_count += key_count as usize;
                if op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ScriptError::OpCount);
                }
                let mut pub_keys = Vec::with_capacity(key_count as usize);
                for _ in 0..key_count {
                    pub_keys.push(stack.pop().ok_or(ScriptError::InvalidStackOperation)?);
                }
                let sig_count_raw = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let sig_count = decode_script_num(&sig_count_raw, 4)?;
                if sig_count < 0 || sig_count > key_count {
                    return Err(ScriptError::SigCount);
                }
                let mut sigs = Vec::with_capacity(sig_count as usize);
                for _ in 0..sig_count {
                    sigs.push(stack.pop().ok_or(ScriptError::InvalidStackOperation)?);
                }
                // the historical off-by-one dummy element
                stack.pop().ok_or(ScriptError::InvalidStackOperation)?;

                let mut ok = true;
                let mut key_iter = pub_keys.iter();
                'sig_loop: for sig in &sigs {
                    loop {
                        match key_iter.next() {
                            Some(pub_key) => {
                                if checker.check_sig(sig, pub_key, script) {
                                    continue 'sig_loop;
                                }
                            }
                            None => {
                                ok = false;
                                break 'sig_loop;
                            }
                        }
                    }
                }

                if opcode == OP_CHECKMULTISIGVERIFY {
                    if !ok {
                        return Err(ScriptError::SigFailure);
                    }
                } else {
                    stack.push(if ok { vec![1] } else { Vec::new() });
                }
            }
            OP_CHECKBLOCKATHEIGHT => {
                if !flags.check_block_at_height {
                    // behave as a NOP when disabled
                    continue;
                }
                let height_raw = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
                let suffix = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;

                let height = decode_script_num(&height_raw, 4)?;
                if height < 0 {
                    return Err(ScriptError::ScriptNumber);
                }
                check_block_at_height(block::Height(height as u32), &suffix, history)?;
                // the committed pair is consumed; the element below it (the
                // preceding check's result) becomes the top again
            }
            other => return Err(ScriptError::BadOpcode(other)),
        }
    }

    Ok(())
}

/// The replay-protection rule: references older than `CBH_DELTA_HEIGHT`
/// blocks are accepted unconditionally; within the window, the active
/// chain's hash at the height must end with the committed suffix.
fn check_block_at_height<H: ChainHistory>(
    height: block::Height,
    suffix: &[u8],
    history: &H,
) -> Result<(), ScriptError> {
    let tip = history.tip_height();

    if height > tip {
        return Err(ScriptError::CheckBlockAtHeightNotFound(height.0));
    }

    // deep history is exempt, so very old transactions stay spendable
    // across any conceivable reorg
    if tip.0.saturating_sub(height.0) > CBH_DELTA_HEIGHT {
        return Ok(());
    }

    match history.block_hash_at(height) {
        Some(hash) if hash.ends_with(suffix) => Ok(()),
        Some(_) => Err(ScriptError::CheckBlockAtHeightMismatch),
        None => Err(ScriptError::CheckBlockAtHeightNotFound(height.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSignatures;
    impl SignatureChecker for NoSignatures {
        fn check_sig(&self, _: &[u8], _: &[u8], _: &Script) -> bool {
            false
        }
    }

    struct FixedChain {
        tip: block::Height,
        hash: block::Hash,
    }

    impl ChainHistory for FixedChain {
        fn block_hash_at(&self, height: block::Height) -> Option<block::Hash> {
            if height <= self.tip {
                Some(self.hash)
            } else {
                None
            }
        }
        fn tip_height(&self) -> block::Height {
            self.tip
        }
    }

    fn chain_with_suffix(suffix: [u8; 2]) -> FixedChain {
        let mut bytes = [0u8; 32];
        bytes[30] = suffix[0];
        bytes[31] = suffix[1];
        FixedChain {
            tip: block::Height(1000),
            hash: block::Hash(bytes),
        }
    }

    #[test]
    fn trivial_anyone_can_spend() {
        let unlock = Script(vec![]);
        let lock = Script(vec![OP_1]);
        verify_script(
            &unlock,
            &lock,
            VerificationFlags::standard(),
            &NoSignatures,
            &chain_with_suffix([0, 0]),
        )
        .unwrap();
    }

    #[test]
    fn equalverify_failure() {
        let unlock = Script(vec![0x01, 0xAA]);
        let lock = Script(vec![0x01, 0xBB, OP_EQUALVERIFY, OP_1]);
        let result = verify_script(
            &unlock,
            &lock,
            VerificationFlags::standard(),
            &NoSignatures,
            &chain_with_suffix([0, 0]),
        );
        assert_eq!(result, Err(ScriptError::EqualVerify));
    }

    #[test]
    fn check_block_at_height_accepts_matching_suffix() {
        // OP_1 <suffix> <height=900> OP_CHECKBLOCKATHEIGHT
        let lock = Script(vec![
            OP_1,
            0x02,
            0xab,
            0xcd,
            0x02,
            0x84,
            0x03,
            OP_CHECKBLOCKATHEIGHT,
        ]);
        verify_script(
            &Script(vec![]),
            &lock,
            VerificationFlags::standard(),
            &NoSignatures,
            &chain_with_suffix([0xab, 0xcd]),
        )
        .unwrap();
    }

    #[test]
    fn check_block_at_height_rejects_wrong_suffix() {
        let lock = Script(vec![
            OP_1,
            0x02,
            0xab,
            0xcd,
            0x02,
            0x84,
            0x03,
            OP_CHECKBLOCKATHEIGHT,
        ]);
        let result = verify_script(
            &Script(vec![]),
            &lock,
            VerificationFlags::standard(),
            &NoSignatures,
            &chain_with_suffix([0x12, 0x34]),
        );
        assert_eq!(result, Err(ScriptError::CheckBlockAtHeightMismatch));
    }

    #[test]
    fn script_numbers_must_be_minimal() {
        assert_eq!(decode_script_num(&[0x84, 0x03], 4), Ok(900));
        assert_eq!(decode_script_num(&[], 4), Ok(0));
        assert_eq!(decode_script_num(&[0x01, 0x00], 4), Err(ScriptError::ScriptNumber));
        assert_eq!(decode_script_num(&[0x01, 0x02, 0x03, 0x04, 0x05], 4), Err(ScriptError::ScriptNumber));
    }

    #[test]
    fn deep_history_reference_is_exempt() {
        let lock = Script(vec![OP_1, 0x02, 0xff, 0xff, 0x01, 0x01, OP_CHECKBLOCKATHEIGHT]);
        let history = FixedChain {
            tip: block::Height(60_000),
            hash: block::Hash([0; 32]),
        };
        // height 1 is older than the window; the bogus suffix is ignored
        verify_script(
            &Script(vec![]),
            &lock,
            VerificationFlags::standard(),
            &NoSignatures,
            &history,
        )
        .unwrap();
    }
}
