//! Consensus wire encoding
//!
//! Everything is little-endian. A transaction serializes as
//! `version | varint(#in) | inputs | varint(#out) | outputs | lock_time`,
//! an input as `outpoint | varint(len) | sig_script | sequence`, an output
//! as `value | varint(len) | pk_script`, and a block as
//! `header | varint(#tx) | transactions`. The txid blanks signature scripts;
//! the block hash covers the header through `nonce`, excluding the
//! validator signature.

use crate::error::{ConsensusError, Result};
use crate::types::{Block, BlockHeader, Hash, OutPoint, Transaction, TxIn, TxOut};

pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

pub fn varint_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Byte reader over a serialized message.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(ConsensusError::Serialization(format!(
                "unexpected end of data at offset {}",
                self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_hash(&mut self) -> Result<Hash> {
        Ok(self.take(32)?.try_into().unwrap())
    }

    fn read_varint(&mut self) -> Result<u64> {
        let disc = self.take(1)?[0];
        let value = match disc {
            0xfd => u16::from_le_bytes(self.take(2)?.try_into().unwrap()) as u64,
            0xfe => u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as u64,
            0xff => u64::from_le_bytes(self.take(8)?.try_into().unwrap()),
            n => n as u64,
        };
        Ok(value)
    }

    fn read_byte_vec(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()?;
        if len > self.data.len() as u64 {
            return Err(ConsensusError::Serialization(format!(
                "declared length {} exceeds message size",
                len
            )));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    fn done(&self) -> bool {
        self.pos == self.data.len()
    }
}

fn write_outpoint(buf: &mut Vec<u8>, out: &OutPoint) {
    buf.extend_from_slice(&out.hash);
    buf.extend_from_slice(&out.index.to_le_bytes());
}

/// Serialize a transaction. With `with_sigs` false the signature scripts are
/// encoded as empty, which is the txid form.
pub fn serialize_transaction(tx: &Transaction, with_sigs: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + tx.inputs.len() * 48 + tx.outputs.len() * 40);
    buf.extend_from_slice(&tx.version.to_le_bytes());
    write_varint(&mut buf, tx.inputs.len() as u64);
    for input in &tx.inputs {
        write_outpoint(&mut buf, &input.prev_out);
        if with_sigs {
            write_varint(&mut buf, input.sig_script.len() as u64);
            buf.extend_from_slice(&input.sig_script);
        } else {
            write_varint(&mut buf, 0);
        }
        buf.extend_from_slice(&input.sequence.to_le_bytes());
    }
    write_varint(&mut buf, tx.outputs.len() as u64);
    for output in &tx.outputs {
        buf.extend_from_slice(&output.value.to_le_bytes());
        write_varint(&mut buf, output.pk_script.len() as u64);
        buf.extend_from_slice(&output.pk_script);
    }
    buf.extend_from_slice(&tx.lock_time.to_le_bytes());
    buf
}

pub fn deserialize_transaction(data: &[u8]) -> Result<Transaction> {
    let mut reader = Reader::new(data);
    let tx = read_transaction(&mut reader)?;
    if !reader.done() {
        return Err(ConsensusError::Serialization(
            "trailing bytes after transaction".to_string(),
        ));
    }
    Ok(tx)
}

fn read_transaction(reader: &mut Reader<'_>) -> Result<Transaction> {
    let version = reader.read_u32()?;
    let input_count = reader.read_varint()?;
    let mut inputs = Vec::new();
    for _ in 0..input_count {
        let hash = reader.read_hash()?;
        let index = reader.read_u32()?;
        let sig_script = reader.read_byte_vec()?;
        let sequence = reader.read_u32()?;
        inputs.push(TxIn {
            prev_out: OutPoint::new(hash, index),
            sig_script,
            sequence,
        });
    }
    let output_count = reader.read_varint()?;
    let mut outputs = Vec::new();
    for _ in 0..output_count {
        let value = reader.read_i64()?;
        let pk_script = reader.read_byte_vec()?;
        outputs.push(TxOut { value, pk_script });
    }
    let lock_time = reader.read_u32()?;
    Ok(Transaction::new(version, inputs, outputs, lock_time))
}

/// Serialize a block header. The hash form (`with_sig` false) stops after
/// `nonce`.
pub fn serialize_header(header: &BlockHeader, with_sig: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(100 + header.validator_sig.len());
    buf.extend_from_slice(&header.version.to_le_bytes());
    buf.extend_from_slice(&header.prev_block);
    buf.extend_from_slice(&header.merkle_root);
    buf.extend_from_slice(&header.timestamp.to_le_bytes());
    buf.extend_from_slice(&header.bits.to_le_bytes());
    buf.extend_from_slice(&header.height.to_le_bytes());
    buf.extend_from_slice(&header.size.to_le_bytes());
    buf.extend_from_slice(&header.nonce.to_le_bytes());
    if with_sig {
        write_varint(&mut buf, header.validator_sig.len() as u64);
        buf.extend_from_slice(&header.validator_sig);
    }
    buf
}

fn read_header(reader: &mut Reader<'_>) -> Result<BlockHeader> {
    let version = reader.read_u32()?;
    let prev_block = reader.read_hash()?;
    let merkle_root = reader.read_hash()?;
    let timestamp = reader.read_i64()?;
    let bits = reader.read_u32()?;
    let height = reader.read_u32()?;
    let size = reader.read_u32()?;
    let nonce = reader.read_u64()?;
    let validator_sig = reader.read_byte_vec()?;
    Ok(BlockHeader {
        version,
        prev_block,
        merkle_root,
        timestamp,
        bits,
        height,
        size,
        nonce,
        validator_sig,
    })
}

pub fn serialize_block(block: &Block) -> Vec<u8> {
    let mut buf = serialize_header(&block.header, true);
    write_varint(&mut buf, block.transactions.len() as u64);
    for tx in &block.transactions {
        buf.extend_from_slice(&serialize_transaction(tx, true));
    }
    buf
}

pub fn deserialize_block(data: &[u8]) -> Result<Block> {
    let mut reader = Reader::new(data);
    let header = read_header(&mut reader)?;
    let tx_count = reader.read_varint()?;
    if tx_count > data.len() as u64 {
        return Err(ConsensusError::Serialization(format!(
            "declared transaction count {} exceeds message size",
            tx_count
        )));
    }
    let mut transactions = Vec::new();
    for _ in 0..tx_count {
        transactions.push(read_transaction(&mut reader)?);
    }
    if !reader.done() {
        return Err(ConsensusError::Serialization(
            "trailing bytes after block".to_string(),
        ));
    }
    Ok(Block {
        header,
        transactions,
    })
}
