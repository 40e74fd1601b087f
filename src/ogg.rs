//! Ogg physical page parsing and packet reassembly.
//!
//! The reader walks pages incrementally over a blocking `Read` source:
//! capture pattern, 27-byte header, lacing table, payload. Lacing values of
//! 255 continue the current packet (possibly across pages via the
//! continuation flag); the first value below 255 terminates it. Logical
//! streams are tracked per serial number, and any stream whose first packet
//! does not begin with the `OpusHead` magic is discarded wholesale.

use std::collections::VecDeque;
use std::io::{self, Read};

use crate::error::VoiceError;

pub(crate) const FLAG_CONTINUATION: u8 = 0x01;
pub(crate) const FLAG_BOS: u8 = 0x02;
pub(crate) const FLAG_EOS: u8 = 0x04;

/// Maximum packet bytes a single page's lacing table can describe
/// (255 entries of 255 bytes).
pub(crate) const MAX_PAGE_PACKET: usize = 65_025;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";

/// CRC-32 as used by Ogg pages: polynomial 0x04C11DB7, MSB first,
/// zero initial value, no final XOR. The CRC field itself is zeroed
/// while checksumming.
pub(crate) mod crc {
    const POLYNOMIAL: u32 = 0x04C1_1DB7;

    const fn table_entry(idx: u32) -> u32 {
        let mut r = idx << 24;
        let mut bit = 0;
        while bit < 8 {
            if r & 0x8000_0000 != 0 {
                r = (r << 1) ^ POLYNOMIAL;
            } else {
                r <<= 1;
            }
            bit += 1;
        }
        r
    }

    const fn build_table() -> [u32; 256] {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            table[i] = table_entry(i as u32);
            i += 1;
        }
        table
    }

    /// Lookup table derived from the polynomial at compile time.
    static TABLE: [u32; 256] = build_table();

    pub fn update(cur: u32, data: &[u8]) -> u32 {
        let mut crc = cur;
        for &byte in data {
            crc = (crc << 8) ^ TABLE[(((crc >> 24) & 0xFF) ^ u32::from(byte)) as usize];
        }
        crc
    }

    pub fn checksum(data: &[u8]) -> u32 {
        update(0, data)
    }

}

/// Options for the page reader.
#[derive(Clone, Debug)]
pub struct OggReaderOptions {
    /// Whether to verify the CRC-32 of every page against its stored value.
    pub validate_crc: bool,
}

impl Default for OggReaderOptions {
    fn default() -> Self {
        Self { validate_crc: true }
    }
}

/// A fully reassembled logical packet.
#[derive(Debug)]
pub(crate) struct OggPacket {
    pub serial: u32,
    /// Granule position of the page that completed this packet.
    pub granule: u64,
    /// Set when the completing page carried the end-of-stream flag.
    pub eos: bool,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct StreamAssembly {
    /// Bytes of a packet still waiting for its terminating lacing value.
    partial: Vec<u8>,
    /// First completed packet has been seen and the keep/ignore decision made.
    started: bool,
    ignored: bool,
}

/// Streaming Ogg packet reader.
///
/// Forward-only: packets come out in container order, and a clean end of
/// input at a page boundary ends the sequence with `Ok(None)`.
pub(crate) struct OggPacketReader<R: Read> {
    reader: R,
    options: OggReaderOptions,
    streams: Vec<(u32, StreamAssembly)>,
    queue: VecDeque<OggPacket>,
    finished: bool,
}

impl<R: Read> OggPacketReader<R> {
    pub fn new(reader: R, options: OggReaderOptions) -> Self {
        Self {
            reader,
            options,
            streams: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
        }
    }

    /// Returns the next complete packet from a non-ignored stream, or `None`
    /// once the input is exhausted at a page boundary.
    pub fn next_packet(&mut self) -> Result<Option<OggPacket>, VoiceError> {
        loop {
            if let Some(packet) = self.queue.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished {
                return Ok(None);
            }
            self.read_page()?;
        }
    }

    /// Reads one page and feeds its segments into per-stream assembly.
    fn read_page(&mut self) -> Result<(), VoiceError> {
        let mut header = [0u8; 27];
        if !read_capture(&mut self.reader, &mut header[..4])? {
            self.finished = true;
            return Ok(());
        }
        if &header[..4] != CAPTURE_PATTERN {
            return Err(VoiceError::Format(format!(
                "bad capture pattern: {:02X?}",
                &header[..4]
            )));
        }
        read_fully(&mut self.reader, &mut header[4..], "page header")?;

        let version = header[4];
        if version != 0 {
            return Err(VoiceError::Format(format!(
                "unsupported Ogg page version: {version}"
            )));
        }
        let flags = header[5];
        let granule = u64::from_le_bytes([
            header[6], header[7], header[8], header[9], header[10], header[11], header[12],
            header[13],
        ]);
        let serial = u32::from_le_bytes([header[14], header[15], header[16], header[17]]);
        let stored_crc = u32::from_le_bytes([header[22], header[23], header[24], header[25]]);
        let segment_count = header[26] as usize;

        let mut lacing = vec![0u8; segment_count];
        read_fully(&mut self.reader, &mut lacing, "lacing table")?;

        let data_len: usize = lacing.iter().map(|&v| v as usize).sum();
        let mut data = vec![0u8; data_len];
        read_fully(&mut self.reader, &mut data, "page payload")?;

        if self.options.validate_crc {
            let mut zeroed = header;
            zeroed[22..26].copy_from_slice(&[0, 0, 0, 0]);
            let mut computed = crc::update(0, &zeroed);
            computed = crc::update(computed, &lacing);
            computed = crc::update(computed, &data);
            if computed != stored_crc {
                return Err(VoiceError::Format(format!(
                    "page CRC mismatch: stored 0x{stored_crc:08X}, computed 0x{computed:08X}"
                )));
            }
        }

        let is_bos = flags & FLAG_BOS != 0;
        let eos = flags & FLAG_EOS != 0;
        let continued = flags & FLAG_CONTINUATION != 0;

        let index = match self.streams.iter().position(|(s, _)| *s == serial) {
            Some(index) => index,
            None if is_bos => {
                self.streams.push((serial, StreamAssembly::default()));
                self.streams.len() - 1
            }
            None => {
                tracing::debug!(serial, "page for unknown logical stream, skipping");
                return Ok(());
            }
        };
        let assembly = &mut self.streams[index].1;
        if assembly.ignored {
            return Ok(());
        }

        if continued && assembly.partial.is_empty() {
            return Err(VoiceError::Format(
                "continuation page without a packet in progress".into(),
            ));
        }
        if !continued && !assembly.partial.is_empty() {
            return Err(VoiceError::Format(
                "expected continuation page for packet in progress".into(),
            ));
        }

        let mut offset = 0usize;
        for &seg in &lacing {
            let len = seg as usize;
            assembly.partial.extend_from_slice(&data[offset..offset + len]);
            offset += len;
            if seg == 255 {
                continue;
            }

            let packet = std::mem::take(&mut assembly.partial);
            if !assembly.started {
                assembly.started = true;
                if !packet.starts_with(OPUS_HEAD_MAGIC) {
                    assembly.ignored = true;
                    tracing::debug!(serial, "skipping non-Opus logical stream");
                    return Ok(());
                }
            }
            self.queue.push_back(OggPacket {
                serial,
                granule,
                eos,
                data: packet,
            });
        }

        Ok(())
    }
}

/// Reads the 4-byte capture position. `Ok(false)` means the input ended
/// cleanly before a new page started; ending mid-pattern is a format error.
fn read_capture<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, VoiceError> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) if offset == 0 => return Ok(false),
            Ok(0) => {
                return Err(VoiceError::Format(
                    "truncated capture pattern at end of input".into(),
                ));
            }
            Ok(n) => offset += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

/// Reads exactly `buf.len()` bytes; any end of input here is truncation.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8], context: &str) -> Result<(), VoiceError> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => return Err(VoiceError::Format(format!("truncated {context}"))),
            Ok(n) => offset += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
