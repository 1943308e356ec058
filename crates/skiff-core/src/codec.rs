//! Transaction wire codec.
//!
//! Explicit little-endian layout:
//!
//! ```text
//! u32  version
//! u32  input count
//!   per input:  hash32 prev txid · u32 prev index · u32 len · script_sig
//! u32  output count
//!   per output: u64 value · u32 len · script_pubkey
//! u32  lock_time
//! ```
//!
//! [`decode`] is self-delimiting: it returns the number of bytes consumed
//! so encodings can be embedded in a larger stream.
//!
//! Two identifiers derive from the encoding, both BLAKE3:
//! - [`txid`] hashes the full encoding; rewriting a signature changes it.
//! - [`ntxid`] hashes the encoding with every input's signature script
//!   replaced by the empty script, so it is invariant under malleation.

use crate::error::CodecError;
use crate::script::Script;
use crate::types::{Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Minimum encoded size of one input (prev txid + prev index + length).
const MIN_INPUT_LEN: usize = 32 + 4 + 4;
/// Minimum encoded size of one output (value + length).
const MIN_OUTPUT_LEN: usize = 8 + 4;

/// Encode a transaction to its wire form.
pub fn encode(tx: &Transaction) -> Vec<u8> {
    encode_with_sigs(tx, true)
}

/// Compute the transaction ID: BLAKE3 over the full encoding.
pub fn txid(tx: &Transaction) -> Hash256 {
    Hash256(blake3::hash(&encode_with_sigs(tx, true)).into())
}

/// Compute the normalized transaction ID: BLAKE3 over the encoding with
/// all signature scripts blanked. Equal across malleated siblings.
pub fn ntxid(tx: &Transaction) -> Hash256 {
    Hash256(blake3::hash(&encode_with_sigs(tx, false)).into())
}

fn encode_with_sigs(tx: &Transaction, include_sigs: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(tx, include_sigs));
    out.extend_from_slice(&tx.version.to_le_bytes());

    out.extend_from_slice(&(tx.inputs.len() as u32).to_le_bytes());
    for input in &tx.inputs {
        out.extend_from_slice(input.previous_output.txid.as_bytes());
        out.extend_from_slice(&input.previous_output.index.to_le_bytes());
        let sig: &[u8] = if include_sigs {
            input.script_sig.as_bytes()
        } else {
            &[]
        };
        out.extend_from_slice(&(sig.len() as u32).to_le_bytes());
        out.extend_from_slice(sig);
    }

    out.extend_from_slice(&(tx.outputs.len() as u32).to_le_bytes());
    for output in &tx.outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        out.extend_from_slice(&(output.script_pubkey.len() as u32).to_le_bytes());
        out.extend_from_slice(output.script_pubkey.as_bytes());
    }

    out.extend_from_slice(&tx.lock_time.to_le_bytes());
    out
}

fn encoded_len(tx: &Transaction, include_sigs: bool) -> usize {
    let inputs: usize = tx
        .inputs
        .iter()
        .map(|i| MIN_INPUT_LEN + if include_sigs { i.script_sig.len() } else { 0 })
        .sum();
    let outputs: usize = tx
        .outputs
        .iter()
        .map(|o| MIN_OUTPUT_LEN + o.script_pubkey.len())
        .sum();
    4 + 4 + inputs + 4 + outputs + 4
}

/// Decode a transaction from the start of `data`.
///
/// Returns the transaction and the number of bytes consumed. Trailing
/// bytes are left untouched.
pub fn decode(data: &[u8]) -> Result<(Transaction, usize), CodecError> {
    let mut cursor = Cursor::new(data);

    let version = cursor.read_u32()?;

    let input_count = cursor.read_u32()? as usize;
    if input_count > cursor.remaining() / MIN_INPUT_LEN {
        return Err(CodecError::Oversized {
            declared: input_count,
            remaining: cursor.remaining(),
        });
    }
    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let txid = cursor.read_hash()?;
        let index = cursor.read_u32()?;
        let len = cursor.read_u32()? as usize;
        let script_sig = Script::new(cursor.take(len)?.to_vec());
        inputs.push(TxInput {
            previous_output: OutPoint { txid, index },
            script_sig,
        });
    }

    let output_count = cursor.read_u32()? as usize;
    if output_count > cursor.remaining() / MIN_OUTPUT_LEN {
        return Err(CodecError::Oversized {
            declared: output_count,
            remaining: cursor.remaining(),
        });
    }
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let value = cursor.read_u64()?;
        let len = cursor.read_u32()? as usize;
        let script_pubkey = Script::new(cursor.take(len)?.to_vec());
        outputs.push(TxOutput {
            value,
            script_pubkey,
        });
    }

    let lock_time = cursor.read_u32()?;

    Ok((
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        },
        cursor.pos,
    ))
}

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_hash(&mut self) -> Result<Hash256, CodecError> {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(self.take(32)?);
        Ok(Hash256(bytes))
    }
}
