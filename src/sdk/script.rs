use kaspa_consensus_core::hashing::sighash_type::SIG_HASH_ALL;
use kaspa_txscript::{
    opcodes::codes::{
        Op1Negate, Op16, OpCheckMultiSig, OpCheckMultiSigECDSA, OpCheckMultiSigVerify,
        OpCheckSig, OpCheckSigECDSA, OpCheckSigVerify, OpFalse, OpPushData1, OpPushData2,
        OpPushData4, OpTrue,
    },
    script_builder::ScriptBuilder,
};

use super::error::GuardianError;

/// Signature pushed by the claim path: 64-byte Schnorr sig + sighash byte.
pub const CLAIM_SIGNATURE_LEN: usize = 65;

/// Sig ops charged for a multisig whose key count is not a small-int push.
const MAX_PUBKEYS_PER_MULTISIG: u8 = 20;

/// One parsed script element: the opcode plus any bytes it pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOp {
    pub opcode: u8,
    pub data: Vec<u8>,
}

impl ScriptOp {
    /// Integer value of a push, when the element is one.
    pub fn as_number(&self) -> Option<i64> {
        match self.opcode {
            OpFalse => Some(0),
            Op1Negate => Some(-1),
            op @ OpTrue..=Op16 => Some(i64::from(op - OpTrue) + 1),
            op if op <= OpPushData4 => decode_script_num(&self.data),
            _ => None,
        }
    }
}

fn decode_script_num(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 8 {
        return None;
    }
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        value |= i64::from(*b) << (8 * i);
    }
    let last = bytes.len() - 1;
    if bytes[last] & 0x80 != 0 {
        value &= !(0x80_i64 << (8 * last));
        value = -value;
    }
    Some(value)
}

fn read_le(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .enumerate()
        .fold(0usize, |acc, (i, b)| acc | (usize::from(*b) << (8 * i)))
}

/// Split a script into opcodes and push payloads.
pub fn parse_script(script: &[u8]) -> Result<Vec<ScriptOp>, GuardianError> {
    let mut ops = Vec::new();
    let mut pos = 0;
    while pos < script.len() {
        let opcode = script[pos];
        pos += 1;
        let len = match opcode {
            0x01..=0x4b => usize::from(opcode),
            OpPushData1 | OpPushData2 | OpPushData4 => {
                let width = match opcode {
                    OpPushData1 => 1,
                    OpPushData2 => 2,
                    _ => 4,
                };
                let prefix = script.get(pos..pos + width).ok_or_else(|| {
                    GuardianError::ScriptLayoutInvalid(format!(
                        "truncated push length at offset {pos}"
                    ))
                })?;
                pos += width;
                read_le(prefix)
            }
            _ => 0,
        };
        let data = script.get(pos..pos + len).ok_or_else(|| {
            GuardianError::ScriptLayoutInvalid(format!(
                "push of {len} bytes at offset {pos} runs past end of script"
            ))
        })?;
        pos += len;
        ops.push(ScriptOp {
            opcode,
            data: data.to_vec(),
        });
    }
    Ok(ops)
}

/// Signature operations a redeem script will charge when executed.
///
/// Counts every reachable check-sig opcode once; multisig costs the preceding
/// small-int key count, or the protocol maximum when that is not static.
pub fn count_sig_ops(redeem_script: &[u8]) -> Result<u8, GuardianError> {
    let ops = parse_script(redeem_script)?;
    let mut total: u32 = 0;
    for (i, op) in ops.iter().enumerate() {
        match op.opcode {
            OpCheckSig | OpCheckSigVerify | OpCheckSigECDSA => total += 1,
            OpCheckMultiSig | OpCheckMultiSigVerify | OpCheckMultiSigECDSA => {
                let keys = i
                    .checked_sub(1)
                    .and_then(|j| ops.get(j))
                    .filter(|prev| (OpTrue..=Op16).contains(&prev.opcode))
                    .and_then(ScriptOp::as_number)
                    .map(|n| n as u32)
                    .unwrap_or(u32::from(MAX_PUBKEYS_PER_MULTISIG));
                total += keys;
            }
            _ => {}
        }
    }
    Ok(u8::try_from(total).unwrap_or(u8::MAX))
}

/// Unlocking script for the covenant claim entrypoint.
///
/// ```text
/// <signature(65)> <selector> <beneficiary_xonly_pk(32)> <redeem_script>
/// ```
///
/// The redeem script's claim branch consumes the stack top-down: pubkey,
/// selector, then signature for the final `OpCheckSig`.
pub fn build_claim_sig_script(
    signature: &[u8],
    selector: i64,
    beneficiary_pk: &[u8; 32],
    redeem_script: &[u8],
) -> Result<Vec<u8>, GuardianError> {
    if signature.len() != CLAIM_SIGNATURE_LEN {
        return Err(GuardianError::ScriptLayoutInvalid(format!(
            "signature must be {CLAIM_SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }
    Ok(ScriptBuilder::new()
        .add_data(signature)?
        .add_i64(selector)?
        .add_data(beneficiary_pk)?
        .add_data(redeem_script)?
        .drain())
}

/// Re-parse a built claim script and check every element against what the
/// covenant expects.
pub fn validate_claim_layout(
    sig_script: &[u8],
    selector: i64,
    beneficiary_pk: &[u8; 32],
    redeem_script: &[u8],
) -> Result<(), GuardianError> {
    let ops = parse_script(sig_script)?;
    let [sig, sel, pk, redeem] = ops.as_slice() else {
        return Err(GuardianError::ScriptLayoutInvalid(format!(
            "expected 4 pushes, found {}",
            ops.len()
        )));
    };

    if sig.data.len() != CLAIM_SIGNATURE_LEN {
        return Err(GuardianError::ScriptLayoutInvalid(format!(
            "element 0: expected {CLAIM_SIGNATURE_LEN}-byte signature, found {} bytes",
            sig.data.len()
        )));
    }
    if sig.data.last() != Some(&SIG_HASH_ALL.to_u8()) {
        return Err(GuardianError::ScriptLayoutInvalid(
            "element 0: signature is not SIG_HASH_ALL".into(),
        ));
    }
    match sel.as_number() {
        Some(n) if n == selector => {}
        other => {
            return Err(GuardianError::ScriptLayoutInvalid(format!(
                "element 1: expected selector {selector}, found {other:?}"
            )));
        }
    }
    if pk.data.as_slice() != beneficiary_pk.as_slice() {
        return Err(GuardianError::ScriptLayoutInvalid(
            "element 2: public key does not match beneficiary".into(),
        ));
    }
    if redeem.data.as_slice() != redeem_script {
        return Err(GuardianError::ScriptLayoutInvalid(
            "element 3: redeem script does not match covenant".into(),
        ));
    }
    Ok(())
}
