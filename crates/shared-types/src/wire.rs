//! # Bitcoin Wire Encoding
//!
//! Transactions and blocks in the P2P network's native encoding, including
//! the BIP144 witness serialization.
//!
//! ## Wire Format
//!
//! ```text
//! tx     = version:i32 [0x00 0x01] vin:varint(TxIn*) vout:varint(TxOut*) [witness*] lock_time:u32
//! header = version:i32 prev_block:32 merkle_root:32 timestamp:u32 bits:u32 nonce:u32
//! block  = header txs:varint(tx*)
//! ```
//!
//! All integers are little-endian. The witness marker/flag is written only
//! when at least one input carries witness data.

use crate::entities::Hash;
use crate::errors::WireError;
use serde::{Deserialize, Serialize};

/// Size of a serialized block header.
pub const BLOCK_HEADER_LEN: usize = 80;

const WITNESS_MARKER: u8 = 0x00;
const WITNESS_FLAG: u8 = 0x01;

/// Types that serialize to the wire encoding.
pub trait WireEncode {
    /// Append the encoding to `out`.
    fn encode_to(&self, out: &mut Vec<u8>);

    fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }
}

/// Types that deserialize from the wire encoding.
pub trait WireDecode: Sized {
    /// Read one value from the reader, leaving any following bytes.
    fn decode_from(reader: &mut WireReader<'_>) -> Result<Self, WireError>;

    /// Decode a value that must span all of `bytes`.
    fn from_wire_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(bytes);
        let value = Self::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Cursor over wire bytes.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail unless every byte was consumed.
    pub fn finish(&self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn peek_u8(&self) -> Result<u8, WireError> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(WireError::UnexpectedEof {
                needed: 1,
                remaining: 0,
            })
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let mut arr = [0u8; 2];
        arr.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(arr))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(arr))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_hash(&mut self) -> Result<Hash, WireError> {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(self.take(32)?);
        Ok(Hash(arr))
    }

    /// Read a canonical CompactSize integer.
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let (value, min) = match self.read_u8()? {
            0xff => (self.read_u64()?, 0x1_0000_0000),
            0xfe => (u64::from(self.read_u32()?), 0x1_0000),
            0xfd => (u64::from(self.read_u16()?), 0xfd),
            small => return Ok(u64::from(small)),
        };
        if value < min {
            return Err(WireError::NonCanonicalVarInt);
        }
        Ok(value)
    }

    /// Read an element count, bounded by the bytes left to read.
    ///
    /// Every element occupies at least one byte, so a larger count can only
    /// come from a malformed or hostile payload.
    pub fn read_count(&mut self) -> Result<usize, WireError> {
        let count = self.read_varint()?;
        if count > self.remaining() as u64 {
            return Err(WireError::CountTooLarge {
                count,
                remaining: self.remaining(),
            });
        }
        Ok(count as usize)
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.read_count()?;
        Ok(self.take(len)?.to_vec())
    }
}

/// Append a CompactSize integer.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Reference to a previous transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub vout: u32,
}

impl OutPoint {
    /// The outpoint spent by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash::ZERO,
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

/// Transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    /// Segregated witness stack; empty for legacy inputs.
    pub witness: Vec<Vec<u8>>,
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in satoshis.
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// A Bitcoin transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// True if any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Transaction id: double SHA-256 of the witness-stripped encoding.
    pub fn txid(&self) -> Hash {
        let mut out = Vec::new();
        self.encode_with(&mut out, false);
        Hash::double_sha256(&out)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    fn encode_with(&self, out: &mut Vec<u8>, allow_witness: bool) {
        let witness = allow_witness && self.has_witness();
        out.extend_from_slice(&self.version.to_le_bytes());
        if witness {
            out.push(WITNESS_MARKER);
            out.push(WITNESS_FLAG);
        }
        write_varint(out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(input.previous_output.txid.as_bytes());
            out.extend_from_slice(&input.previous_output.vout.to_le_bytes());
            write_var_bytes(out, &input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_var_bytes(out, &output.script_pubkey);
        }
        if witness {
            for input in &self.inputs {
                write_varint(out, input.witness.len() as u64);
                for item in &input.witness {
                    write_var_bytes(out, item);
                }
            }
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }
}

impl WireEncode for Transaction {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.encode_with(out, true);
    }
}

impl WireDecode for Transaction {
    fn decode_from(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let version = reader.read_i32()?;

        // A zero input count followed by 0x01 is the segwit marker/flag.
        let mut witness = false;
        let mut input_count = reader.read_count()?;
        if input_count == 0 {
            let flag = reader.peek_u8()?;
            if flag != WITNESS_FLAG {
                return Err(WireError::BadWitnessFlag(flag));
            }
            reader.read_u8()?;
            witness = true;
            input_count = reader.read_count()?;
        }

        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let txid = reader.read_hash()?;
            let vout = reader.read_u32()?;
            let script_sig = reader.read_var_bytes()?;
            let sequence = reader.read_u32()?;
            inputs.push(TxIn {
                previous_output: OutPoint { txid, vout },
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = reader.read_count()?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let value = reader.read_u64()? as i64;
            let script_pubkey = reader.read_var_bytes()?;
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        if witness {
            for input in &mut inputs {
                let items = reader.read_count()?;
                let mut stack = Vec::with_capacity(items);
                for _ in 0..items {
                    stack.push(reader.read_var_bytes()?);
                }
                input.witness = stack;
            }
        }

        let lock_time = reader.read_u32()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

/// An 80-byte block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    /// Unix seconds.
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Block hash: double SHA-256 of the serialized header.
    pub fn block_hash(&self) -> Hash {
        Hash::double_sha256(&self.to_wire_bytes())
    }
}

impl WireEncode for BlockHeader {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.prev_block.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
    }
}

impl WireDecode for BlockHeader {
    fn decode_from(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            version: reader.read_i32()?,
            prev_block: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
            timestamp: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }
}

/// A full block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn block_hash(&self) -> Hash {
        self.header.block_hash()
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.prev_block
    }
}

impl WireEncode for Block {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.header.encode_to(out);
        write_varint(out, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_to(out);
        }
    }
}

impl WireDecode for Block {
    fn decode_from(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        let header = BlockHeader::decode_from(reader)?;
        let count = reader.read_count()?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::decode_from(reader)?);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint {
                    txid: Hash([0x11; 32]),
                    vout: 0,
                },
                script_sig: vec![0x51],
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![TxOut {
                value: 50_000,
                script_pubkey: vec![0x76, 0xa9, 0x14],
            }],
            lock_time: 0,
        }
    }

    fn segwit_tx() -> Transaction {
        let mut tx = legacy_tx();
        tx.version = 2;
        tx.inputs[0].script_sig.clear();
        tx.inputs[0].witness = vec![vec![0x30; 71], vec![0x02; 33]];
        tx
    }

    #[test]
    fn test_varint_boundaries() {
        for (value, len) in [
            (0u64, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ] {
            let mut out = Vec::new();
            write_varint(&mut out, value);
            assert_eq!(out.len(), len, "length for {value:#x}");
            let mut reader = WireReader::new(&out);
            assert_eq!(reader.read_varint().unwrap(), value);
        }
    }

    #[test]
    fn test_non_canonical_varint_rejected() {
        let mut reader = WireReader::new(&[0xfd, 0x10, 0x00]);
        assert_eq!(reader.read_varint(), Err(WireError::NonCanonicalVarInt));
    }

    #[test]
    fn test_legacy_tx_has_no_marker() {
        let tx = legacy_tx();
        let bytes = tx.to_wire_bytes();
        // version (4) then input count, no 0x00 0x01 marker
        assert_eq!(bytes[4], 0x01);
        assert_eq!(Transaction::from_wire_bytes(&bytes).unwrap(), tx);
    }

    #[test]
    fn test_segwit_tx_uses_marker_and_strips_witness_for_txid() {
        let tx = segwit_tx();
        let bytes = tx.to_wire_bytes();
        assert_eq!(&bytes[4..6], &[WITNESS_MARKER, WITNESS_FLAG]);

        let decoded = Transaction::from_wire_bytes(&bytes).unwrap();
        assert_eq!(decoded, tx);

        let mut stripped = tx.clone();
        stripped.inputs[0].witness.clear();
        assert_eq!(tx.txid(), stripped.txid(), "txid must ignore witness data");
    }

    #[test]
    fn test_bad_witness_flag_rejected() {
        // version, zero input count, flag 0x02
        let bytes = [1, 0, 0, 0, 0x00, 0x02, 0, 0, 0, 0, 0];
        assert_eq!(
            Transaction::from_wire_bytes(&bytes),
            Err(WireError::BadWitnessFlag(0x02))
        );
    }

    #[test]
    fn test_truncated_tx_rejected() {
        let bytes = legacy_tx().to_wire_bytes();
        let result = Transaction::from_wire_bytes(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(WireError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = legacy_tx().to_wire_bytes();
        bytes.push(0xee);
        assert_eq!(
            Transaction::from_wire_bytes(&bytes),
            Err(WireError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_hostile_count_rejected_before_allocation() {
        // version, then input count claiming 2^32 entries
        let bytes = [1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(
            Transaction::from_wire_bytes(&bytes),
            Err(WireError::CountTooLarge { .. })
        ));
    }

    #[test]
    fn test_block_header_is_80_bytes() {
        let header = BlockHeader {
            version: 0x2000_0000,
            prev_block: Hash([0xaa; 32]),
            merkle_root: Hash([0xbb; 32]),
            timestamp: 1_700_000_000,
            bits: 0x207f_ffff,
            nonce: 0,
        };
        assert_eq!(header.to_wire_bytes().len(), BLOCK_HEADER_LEN);
    }

    #[test]
    fn test_genesis_block_hash_matches_mainnet() {
        // Bitcoin mainnet genesis header
        let header = BlockHeader {
            version: 1,
            prev_block: Hash::ZERO,
            merkle_root: Hash(
                hex::decode("3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a")
                    .unwrap()
                    .try_into()
                    .unwrap(),
            ),
            timestamp: 1_231_006_505,
            bits: 0x1d00_ffff,
            nonce: 2_083_236_893,
        };
        assert_eq!(
            header.block_hash().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn test_block_with_mixed_transactions() {
        let block = Block {
            header: BlockHeader {
                version: 4,
                prev_block: Hash([1; 32]),
                merkle_root: Hash([2; 32]),
                timestamp: 42,
                bits: 0x207f_ffff,
                nonce: 7,
            },
            transactions: vec![legacy_tx(), segwit_tx()],
        };
        let bytes = block.to_wire_bytes();
        let decoded = Block::from_wire_bytes(&bytes).unwrap();
        assert_eq!(decoded.block_hash(), block.block_hash());
        assert_eq!(decoded.transactions.len(), 2);
        assert!(decoded.transactions[1].has_witness());
    }
}
