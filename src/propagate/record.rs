//! On-disk record format for the append-only stream.
//!
//! Each record consists of:
//! - Checksum (4 bytes): CRC32 of the payload
//! - Length (4 bytes): Length of the payload
//! - Payload (variable): bincode-encoded command

use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use super::PropEntry;
use crate::error::{Error, Result};

/// Size of the record header (checksum + length).
pub const HEADER_SIZE: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    db: u32,
    argv: Vec<Vec<u8>>,
}

/// A framed append-only-log record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Serialized command payload.
    pub data: Vec<u8>,
}

impl Record {
    /// Serializes a propagated command into a record.
    pub fn from_entry(entry: &PropEntry) -> Self {
        let payload = Payload {
            db: entry.db as u32,
            argv: entry.argv.iter().map(|a| a.to_vec()).collect(),
        };
        // Vec/u32 payloads cannot fail to serialize
        let data = bincode::serialize(&payload).unwrap_or_default();
        Self { data }
    }

    /// Deserializes the record back into a propagated command.
    pub fn to_entry(&self) -> Result<PropEntry> {
        let payload: Payload = bincode::deserialize(&self.data)?;
        Ok(PropEntry {
            db: payload.db as usize,
            argv: payload.argv.into_iter().map(bytes::Bytes::from).collect(),
        })
    }

    /// Encodes the record into bytes.
    ///
    /// Format: [checksum: u32][length: u32][payload: bytes]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        buf.put_u32_le(checksum(&self.data));
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
        buf.to_vec()
    }

    /// Decodes one record from the front of `data`, returning it together
    /// with the number of bytes consumed.
    pub fn decode(mut data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corruption(format!("record too short: {} bytes", data.len())));
        }
        let expected = data.get_u32_le();
        let length = data.get_u32_le() as usize;
        if data.len() < length {
            return Err(Error::corruption(format!(
                "incomplete record: expected {} bytes, got {}",
                length,
                data.len()
            )));
        }
        let payload = data[..length].to_vec();
        let actual = checksum(&payload);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Ok((Self { data: payload }, HEADER_SIZE + length))
    }

    /// Get the total size of the encoded record.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

/// Decodes a whole buffer of concatenated records.
pub fn decode_all(mut data: &[u8]) -> Result<Vec<PropEntry>> {
    let mut entries = Vec::new();
    while !data.is_empty() {
        let (record, consumed) = Record::decode(data)?;
        entries.push(record.to_entry()?);
        data = &data[consumed..];
    }
    Ok(entries)
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
