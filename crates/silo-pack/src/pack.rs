use std::collections::HashMap;

use silo_types::Checksum;

use crate::error::{PackError, PackResult};

const MAGIC: &[u8; 4] = b"SILO";
const VERSION: u32 = 1;
const COMPRESSION_LEVEL: i32 = 3;

/// An in-memory pack: an ordered sequence of distinct content-addressed
/// payloads plus a checksum → position index.
///
/// Serialized layout:
/// ```text
/// "SILO" | u32 version | u32 entry count
/// per entry: 32-byte checksum
///            varint uncompressed size | varint compressed size
///            u32 CRC32 of compressed bytes | compressed bytes (zstd)
/// trailer:  32-byte BLAKE3 of everything preceding it
/// ```
#[derive(Clone, Debug, Default)]
pub struct Pack {
    entries: Vec<(Checksum, Vec<u8>)>,
    index: HashMap<Checksum, usize>,
    size: u64,
}

impl Pack {
    /// Create a new empty pack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload under its checksum.
    ///
    /// If the checksum is already indexed this is a no-op (content-addressing
    /// guarantees the bytes are identical). Returns `true` if the payload was
    /// appended.
    pub fn add_chunk(&mut self, checksum: Checksum, data: &[u8]) -> bool {
        if self.index.contains_key(&checksum) {
            return false;
        }
        self.index.insert(checksum, self.entries.len());
        self.size += data.len() as u64;
        self.entries.push((checksum, data.to_vec()));
        true
    }

    /// Retrieve a payload by checksum. `None` means "not in this pack".
    pub fn get_chunk(&self, checksum: &Checksum) -> Option<&[u8]> {
        self.index
            .get(checksum)
            .map(|&pos| self.entries[pos].1.as_slice())
    }

    /// Check whether a checksum is indexed.
    pub fn contains(&self, checksum: &Checksum) -> bool {
        self.index.contains_key(checksum)
    }

    /// Total bytes of all distinct payloads held (uncompressed).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of distinct payloads held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pack holds no payloads.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The checksums of all payloads, in insertion order.
    pub fn checksums(&self) -> impl Iterator<Item = &Checksum> {
        self.entries.iter().map(|(checksum, _)| checksum)
    }

    /// Serialize the pack. The result is immutable; amendments require
    /// building a new pack.
    pub fn to_bytes(&self) -> PackResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        for (checksum, data) in &self.entries {
            buf.extend_from_slice(checksum.as_bytes());

            let compressed = zstd::encode_all(data.as_slice(), COMPRESSION_LEVEL)
                .map_err(|e| PackError::CompressionFailed(e.to_string()))?;

            encode_varint(&mut buf, data.len() as u64);
            encode_varint(&mut buf, compressed.len() as u64);
            buf.extend_from_slice(&crc32fast::hash(&compressed).to_be_bytes());
            buf.extend_from_slice(&compressed);
        }

        let trailer = *blake3::hash(&buf).as_bytes();
        buf.extend_from_slice(&trailer);
        Ok(buf)
    }

    /// Deserialize a pack, verifying the trailer checksum, every entry CRC,
    /// and every decompressed length.
    pub fn from_bytes(data: &[u8]) -> PackResult<Self> {
        if data.len() < 12 + 32 {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "pack data too short".into(),
            });
        }
        if &data[0..4] != MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let body_len = data.len() - 32;
        let expected_trailer: [u8; 32] = data[body_len..].try_into().unwrap();
        let actual_trailer = *blake3::hash(&data[..body_len]).as_bytes();
        if expected_trailer != actual_trailer {
            return Err(PackError::ChecksumMismatch);
        }

        let count = u32::from_be_bytes(data[8..12].try_into().unwrap()) as usize;
        let mut pack = Self::new();
        let mut pos = 12;

        for _ in 0..count {
            let entry_offset = pos as u64;
            if pos + 32 > body_len {
                return Err(PackError::CorruptEntry {
                    offset: entry_offset,
                    reason: "truncated checksum".into(),
                });
            }
            let checksum =
                Checksum::from_raw(data[pos..pos + 32].try_into().unwrap());
            pos += 32;

            let (uncompressed_size, consumed) = decode_varint(&data[pos..body_len])?;
            pos += consumed;
            let (compressed_size, consumed) = decode_varint(&data[pos..body_len])?;
            pos += consumed;

            if pos + 4 > body_len {
                return Err(PackError::CorruptEntry {
                    offset: entry_offset,
                    reason: "truncated CRC".into(),
                });
            }
            let expected_crc = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
            pos += 4;

            // Compare against the remaining bytes before converting: a
            // declared size near u64::MAX must not overflow the cursor.
            if compressed_size > (body_len - pos) as u64 {
                return Err(PackError::CorruptEntry {
                    offset: entry_offset,
                    reason: "compressed data extends beyond pack".into(),
                });
            }
            let end = pos + compressed_size as usize;
            let compressed = &data[pos..end];
            pos = end;

            if crc32fast::hash(compressed) != expected_crc {
                return Err(PackError::CrcMismatch { checksum });
            }

            let payload = zstd::decode_all(compressed)
                .map_err(|e| PackError::DecompressionFailed(e.to_string()))?;
            if payload.len() != uncompressed_size as usize {
                return Err(PackError::CorruptEntry {
                    offset: entry_offset,
                    reason: format!(
                        "size mismatch: expected {uncompressed_size}, got {}",
                        payload.len()
                    ),
                });
            }

            pack.add_chunk(checksum, &payload);
        }

        if pos != body_len {
            return Err(PackError::CorruptEntry {
                offset: pos as u64,
                reason: "trailing bytes after last entry".into(),
            });
        }
        Ok(pack)
    }
}

/// Encode a u64 as a variable-length integer.
fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes consumed).
fn decode_varint(data: &[u8]) -> PackResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(PackError::CorruptEntry {
        offset: 0,
        reason: "truncated varint".into(),
    })
}
