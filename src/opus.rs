//! Opus-in-Ogg header structures and packet TOC decoding.
//!
//! `OpusHead` and `OpusTags` follow the RFC 7845 mapping (19-byte
//! identification body, little-endian fields, length-prefixed comment
//! block). The TOC helpers implement the RFC 6716 table-of-contents byte:
//! configuration number, stereo flag and frame-count code.

use crate::error::VoiceError;

const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";
const OPUS_TAGS_MAGIC: &[u8; 8] = b"OpusTags";

/// Stream layout carried by (or synthesized for) the identification header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    pub stream_count: u8,
    pub coupled_count: u8,
    pub mapping: Vec<u8>,
}

/// Parsed `OpusHead` identification header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusHead {
    pub version: u8,
    pub channel_count: u8,
    pub pre_skip: u16,
    /// Input sample rate; the voice path requires 48 kHz.
    pub sample_rate: u32,
    pub output_gain: i16,
    pub channel_mapping_family: u8,
    pub channel_mapping: ChannelMapping,
}

impl OpusHead {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, VoiceError> {
        if data.len() < 19 {
            return Err(VoiceError::Format("OpusHead packet too short".into()));
        }
        if &data[0..8] != OPUS_HEAD_MAGIC {
            return Err(VoiceError::Format("missing OpusHead magic".into()));
        }
        let version = data[8];
        if version == 0 || version > 15 {
            return Err(VoiceError::Format(format!(
                "unsupported Opus version: {version}"
            )));
        }
        let channel_count = data[9];
        if channel_count == 0 {
            return Err(VoiceError::Format("channel count must be > 0".into()));
        }
        let pre_skip = u16::from_le_bytes([data[10], data[11]]);
        let sample_rate = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        let output_gain = i16::from_le_bytes([data[16], data[17]]);
        let channel_mapping_family = data[18];

        let channel_mapping = if channel_mapping_family == 0 {
            // Family 0 leaves the table implicit: one stream, coupled for
            // stereo, identity mapping.
            let mut mapping = vec![0u8];
            if channel_count == 2 {
                mapping.push(1);
            }
            ChannelMapping {
                stream_count: 1,
                coupled_count: channel_count - 1,
                mapping,
            }
        } else {
            let needed = 21 + channel_count as usize;
            if data.len() < needed {
                return Err(VoiceError::Format(
                    "OpusHead channel mapping table too short".into(),
                ));
            }
            ChannelMapping {
                stream_count: data[19],
                coupled_count: data[20],
                mapping: data[21..needed].to_vec(),
            }
        };

        if channel_mapping.stream_count == 0 {
            return Err(VoiceError::Format("stream count must be > 0".into()));
        }
        if sample_rate != 48_000 {
            return Err(VoiceError::Configuration(format!(
                "sample rate must be 48000 Hz, got {sample_rate}"
            )));
        }

        Ok(Self {
            version,
            channel_count,
            pre_skip,
            sample_rate,
            output_gain,
            channel_mapping_family,
            channel_mapping,
        })
    }
}

/// Parsed `OpusTags` comment header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpusTags {
    pub vendor: String,
    pub comments: Vec<String>,
}

impl OpusTags {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, VoiceError> {
        if data.len() < 8 || &data[0..8] != OPUS_TAGS_MAGIC {
            return Err(VoiceError::Format("missing OpusTags magic".into()));
        }
        let mut offset = 8;
        let vendor = read_prefixed_string(data, &mut offset, "vendor string")?;
        let comment_count = read_u32(data, &mut offset, "comment count")?;
        let mut comments = Vec::with_capacity(comment_count.min(64) as usize);
        for _ in 0..comment_count {
            comments.push(read_prefixed_string(data, &mut offset, "comment")?);
        }
        Ok(Self { vendor, comments })
    }
}

fn read_u32(data: &[u8], offset: &mut usize, what: &str) -> Result<u32, VoiceError> {
    let end = *offset + 4;
    if end > data.len() {
        return Err(VoiceError::Format(format!("truncated {what}")));
    }
    let value = u32::from_le_bytes([
        data[*offset],
        data[*offset + 1],
        data[*offset + 2],
        data[*offset + 3],
    ]);
    *offset = end;
    Ok(value)
}

fn read_prefixed_string(data: &[u8], offset: &mut usize, what: &str) -> Result<String, VoiceError> {
    let len = read_u32(data, offset, what)? as usize;
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| VoiceError::Format(format!("truncated {what}")))?;
    let value = String::from_utf8_lossy(&data[*offset..end]).into_owned();
    *offset = end;
    Ok(value)
}

/// Table-of-contents byte of an Opus packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toc(pub u8);

impl Toc {
    pub fn config(self) -> u8 {
        self.0 >> 3
    }

    pub fn is_stereo(self) -> bool {
        self.0 & 0x04 != 0
    }

    /// Frame-count code: 0 = one frame, 1 = two equal, 2 = two sized,
    /// 3 = arbitrary count with a control byte.
    pub fn code(self) -> u8 {
        self.0 & 0x03
    }

    /// Duration of one frame in microseconds, from the configuration number.
    pub fn frame_duration_micros(self) -> u64 {
        let config = u64::from(self.config());
        if config < 12 {
            match config % 4 {
                0 => 10_000,
                ms => ms * 20_000,
            }
        } else if config < 16 {
            10_000 << (config % 2)
        } else {
            2_500 << (config % 4)
        }
    }

    /// The same TOC describing a single frame (frame-count bits cleared).
    pub fn single_frame(self) -> u8 {
        self.0 & !0x03
    }
}

/// Decodes one per-frame length: values above 251 spill into a second byte.
pub(crate) fn read_frame_length(data: &[u8], offset: &mut usize) -> Result<usize, VoiceError> {
    let first = *data
        .get(*offset)
        .ok_or_else(|| VoiceError::Format("truncated frame length".into()))?;
    *offset += 1;
    let mut length = first as usize;
    if first > 251 {
        let second = *data
            .get(*offset)
            .ok_or_else(|| VoiceError::Format("truncated frame length".into()))?;
        *offset += 1;
        length += (second as usize) << 2;
    }
    Ok(length)
}
