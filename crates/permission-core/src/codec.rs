//! Positional binary codec for registry box values.
//!
//! Layout (all integers unsigned big-endian):
//!
//! ```text
//! 0   votes                     u64
//! 8   permission                u64
//! 16  subscription_amount       u64
//! 24  subscription_permission   u64
//! 32  staking_amount            u64
//! 40  staking_permission        u64
//! 48  (amount u64, doc_index u8) * n
//! ```
//!
//! No lengths are stored; the number of document pairs follows from the box
//! size. The layout is shared with the on-chain contract and must stay
//! bit-exact.

use crate::error::CodecError;
use crate::record::{DocContribution, PermissionRecord};
use base64::{engine::general_purpose, Engine as _};

pub const MANDATORY_VALUES_SIZE: usize = 48;
pub const DOC_PAIR_SIZE: usize = 9;
pub const MAX_BOX_SIZE: usize = 32_768;
pub const MAX_DOC_CONTRIBUTIONS: usize = (MAX_BOX_SIZE - MANDATORY_VALUES_SIZE) / DOC_PAIR_SIZE;

/// Serialized size of a record with `doc_pairs` document contributions.
pub const fn encoded_len(doc_pairs: usize) -> usize {
    MANDATORY_VALUES_SIZE + DOC_PAIR_SIZE * doc_pairs
}

#[derive(Default)]
struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos + len;
        let slice = self.data.get(self.pos..end).ok_or(CodecError::MalformedRecord {
            len: self.data.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.read_exact(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }
}

pub fn encode(record: &PermissionRecord) -> Result<Vec<u8>, CodecError> {
    let docs = record.doc_contributions();
    if docs.len() > MAX_DOC_CONTRIBUTIONS {
        return Err(CodecError::TooManyContributions(docs.len()));
    }
    let mut writer = BinaryWriter::with_capacity(encoded_len(docs.len()));
    let (subscription_amount, subscription_permission) = record.subscription();
    let (staking_amount, staking_permission) = record.staking();
    writer.write_u64(record.votes());
    writer.write_u64(record.permission());
    writer.write_u64(subscription_amount);
    writer.write_u64(subscription_permission);
    writer.write_u64(staking_amount);
    writer.write_u64(staking_permission);
    for doc in docs {
        writer.write_u64(doc.amount);
        writer.write_u8(doc.doc_index);
    }
    Ok(writer.into_inner())
}

pub fn decode(bytes: &[u8]) -> Result<PermissionRecord, CodecError> {
    if bytes.len() < MANDATORY_VALUES_SIZE
        || (bytes.len() - MANDATORY_VALUES_SIZE) % DOC_PAIR_SIZE != 0
    {
        return Err(CodecError::MalformedRecord { len: bytes.len() });
    }
    let mut reader = BinaryReader::new(bytes);
    let votes = reader.read_u64()?;
    let permission = reader.read_u64()?;
    let subscription = (reader.read_u64()?, reader.read_u64()?);
    let staking = (reader.read_u64()?, reader.read_u64()?);

    let pairs = (bytes.len() - MANDATORY_VALUES_SIZE) / DOC_PAIR_SIZE;
    let mut doc_contributions = Vec::with_capacity(pairs);
    for _ in 0..pairs {
        let amount = reader.read_u64()?;
        let doc_index = reader.read_u8()?;
        doc_contributions.push(DocContribution { amount, doc_index });
    }

    Ok(PermissionRecord::from_stored(
        votes,
        permission,
        subscription,
        staking,
        doc_contributions,
    ))
}

pub fn encode_base64(record: &PermissionRecord) -> Result<String, CodecError> {
    Ok(general_purpose::STANDARD.encode(encode(record)?))
}

pub fn decode_base64(text: &str) -> Result<PermissionRecord, CodecError> {
    let bytes = general_purpose::STANDARD
        .decode(text)
        .map_err(|e| CodecError::Base64(e.to_string()))?;
    decode(&bytes)
}
