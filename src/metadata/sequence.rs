//! FSEQ binary playback header
//!
//! Only the fixed header at the start of the file is read. All multi-byte
//! fields are little-endian.
//!
//! | offset | width | field                                   |
//! |--------|-------|-----------------------------------------|
//! | 0      | 4     | magic `PSEQ`                            |
//! | 4      | 2     | channel data offset                     |
//! | 6      | 1     | minor version                           |
//! | 7      | 1     | major version                           |
//! | 8      | 2     | header length                           |
//! | 10     | 4     | channel count                           |
//! | 14     | 4     | frame count                             |
//! | 18     | 1     | step time in milliseconds               |
//! | 20     | 1     | compression type (v2+, low nibble)      |

use serde::{Deserialize, Serialize};

use super::MetadataError;

/// Magic marker at offset 0
pub const MAGIC: &[u8; 4] = b"PSEQ";

/// Upper bound on bytes read from a sequence file
pub const HEADER_READ_LIMIT: usize = 1024;

/// Sanity bound for channel and frame counts
pub const MAX_SANE_COUNT: u32 = 1_000_000;

/// Bytes needed to read every mandatory field
const MIN_HEADER_LEN: usize = 19;

const OFFSET_CHANNEL_DATA: usize = 4;
const OFFSET_MINOR_VERSION: usize = 6;
const OFFSET_MAJOR_VERSION: usize = 7;
const OFFSET_HEADER_LEN: usize = 8;
const OFFSET_CHANNEL_COUNT: usize = 10;
const OFFSET_FRAME_COUNT: usize = 14;
const OFFSET_STEP_TIME: usize = 18;
const OFFSET_COMPRESSION: usize = 20;

/// Compression applied to frame data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "code")]
pub enum Compression {
    None,
    Zstd,
    Zlib,
    Unknown(u8),
}

impl Compression {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::None,
            1 => Self::Zstd,
            2 => Self::Zlib,
            other => Self::Unknown(other),
        }
    }
}

/// Fields read from a sequence header plus derived timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub channel_data_offset: u16,
    pub header_length: u16,
    pub channel_count: u32,
    pub frame_count: u32,
    pub step_time_ms: u8,
    /// Absent for v1 files or truncated headers
    pub compression: Option<Compression>,
    pub duration_secs: f64,
    pub frames_per_second: u32,
}

/// Bounds-checked little-endian reads over a header slice
#[derive(Debug, Clone, Copy)]
pub struct HeaderReader<'a> {
    bytes: &'a [u8],
}

impl<'a> HeaderReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn slice<const N: usize>(&self, offset: usize, field: &'static str) -> Result<[u8; N], MetadataError> {
        offset
            .checked_add(N)
            .and_then(|end| self.bytes.get(offset..end))
            .and_then(|s| s.try_into().ok())
            .ok_or(MetadataError::Truncated {
                field,
                offset,
                needed: N,
                available: self.bytes.len(),
            })
    }

    /// 1 byte at `offset`
    pub fn u8_at(&self, offset: usize, field: &'static str) -> Result<u8, MetadataError> {
        self.slice::<1>(offset, field).map(|b| b[0])
    }

    /// 2 bytes little-endian at `offset`
    pub fn u16_le_at(&self, offset: usize, field: &'static str) -> Result<u16, MetadataError> {
        self.slice::<2>(offset, field).map(u16::from_le_bytes)
    }

    /// 4 bytes little-endian at `offset`
    pub fn u32_le_at(&self, offset: usize, field: &'static str) -> Result<u32, MetadataError> {
        self.slice::<4>(offset, field).map(u32::from_le_bytes)
    }

    /// Whether the first bytes equal `magic`
    pub fn has_magic(&self, magic: &[u8]) -> bool {
        self.bytes.starts_with(magic)
    }
}

impl SequenceHeader {
    /// Parse a header from the leading bytes of a sequence file
    ///
    /// Reads at most [`HEADER_READ_LIMIT`] bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let bytes = &bytes[..bytes.len().min(HEADER_READ_LIMIT)];
        let reader = HeaderReader::new(bytes);

        if !reader.has_magic(MAGIC) {
            return Err(MetadataError::BadMagic);
        }
        if reader.len() < MIN_HEADER_LEN {
            return Err(MetadataError::Truncated {
                field: "header",
                offset: 0,
                needed: MIN_HEADER_LEN,
                available: reader.len(),
            });
        }

        let channel_data_offset = reader.u16_le_at(OFFSET_CHANNEL_DATA, "channel_data_offset")?;
        let minor_version = reader.u8_at(OFFSET_MINOR_VERSION, "minor_version")?;
        let major_version = reader.u8_at(OFFSET_MAJOR_VERSION, "major_version")?;
        let header_length = reader.u16_le_at(OFFSET_HEADER_LEN, "header_length")?;
        let channel_count = reader.u32_le_at(OFFSET_CHANNEL_COUNT, "channel_count")?;
        let frame_count = reader.u32_le_at(OFFSET_FRAME_COUNT, "frame_count")?;
        let step_time_ms = reader.u8_at(OFFSET_STEP_TIME, "step_time")?;

        check_count("channel_count", channel_count)?;
        check_count("frame_count", frame_count)?;
        if step_time_ms == 0 {
            return Err(MetadataError::InvalidField {
                field: "step_time",
                reason: "must be non-zero".to_string(),
            });
        }

        let compression = if major_version >= 2 {
            reader
                .u8_at(OFFSET_COMPRESSION, "compression")
                .ok()
                .map(|b| Compression::from_code(b & 0x0F))
        } else {
            None
        };

        Ok(Self {
            major_version,
            minor_version,
            channel_data_offset,
            header_length,
            channel_count,
            frame_count,
            step_time_ms,
            compression,
            duration_secs: frame_count as f64 * step_time_ms as f64 / 1000.0,
            frames_per_second: (1000.0 / step_time_ms as f64).round() as u32,
        })
    }
}

fn check_count(field: &'static str, value: u32) -> Result<(), MetadataError> {
    if value == 0 {
        return Err(MetadataError::InvalidField {
            field,
            reason: "must be non-zero".to_string(),
        });
    }
    if value > MAX_SANE_COUNT {
        return Err(MetadataError::InvalidField {
            field,
            reason: format!("{value} exceeds limit of {MAX_SANE_COUNT}"),
        });
    }
    Ok(())
}
