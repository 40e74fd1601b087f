//! Ogg/Opus muxing: page serialization and WAV → voice-note conversion.
//!
//! The writer emits the canonical three-part sequence: a BOS page carrying
//! `OpusHead`, a comment page carrying `OpusTags`, then one audio page per
//! 60 ms PCM chunk with the granule position advancing by the chunk's sample
//! count. The final (short) chunk is zero-padded before encoding and its
//! page carries the EOS flag.

use std::io::{self, Read};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::common::{spawn_ingest_task, ChannelReader, CHANNEL_CAPACITY};
use crate::error::VoiceError;
use crate::ogg::{crc, FLAG_BOS, FLAG_EOS, MAX_PAGE_PACKET};
use crate::pcm::PcmFormat;
use crate::util::le_bytes_to_interleaved_i16;
use crate::wav;

/// Decoder-side skip recommended for libopus output, in 48 kHz samples.
const PRE_SKIP: u16 = 312;

/// Upper bound for one encoded 60 ms packet.
const MAX_ENCODED_PACKET: usize = 4000;

/// Opus encoder tuning for the write path.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Target bitrate in bits per second.
    pub bitrate: i32,
    /// Enable in-band forward error correction.
    pub inband_fec: bool,
    /// Expected packet loss percentage advertised to the encoder.
    pub packet_loss_perc: i32,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            bitrate: 130_000,
            inband_fec: true,
            packet_loss_perc: 1,
        }
    }
}

/// Serializes packets into single Ogg pages for one logical stream.
pub(crate) struct OggPageWriter {
    serial: u32,
    sequence: u32,
}

impl OggPageWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
        }
    }

    /// Builds one page around `packet`, patching the CRC in at offset 22.
    ///
    /// Packets of 65025 bytes or more cannot be laced into one page and are
    /// rejected before anything is produced.
    pub fn build_page(
        &mut self,
        flags: u8,
        granule: u64,
        packet: &[u8],
    ) -> Result<Vec<u8>, VoiceError> {
        if packet.len() >= MAX_PAGE_PACKET {
            return Err(VoiceError::Configuration(format!(
                "packet of {} bytes does not fit a single Ogg page",
                packet.len()
            )));
        }

        let mut lacing = Vec::with_capacity(packet.len() / 255 + 1);
        let mut remaining = packet.len();
        while remaining >= 255 {
            lacing.push(255u8);
            remaining -= 255;
        }
        // A final value below 255 terminates the packet; an exact multiple
        // of 255 therefore needs the explicit trailing zero.
        lacing.push(remaining as u8);

        let mut page = Vec::with_capacity(27 + lacing.len() + packet.len());
        page.extend_from_slice(b"OggS");
        page.push(0);
        page.push(flags);
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&self.serial.to_le_bytes());
        page.extend_from_slice(&self.sequence.to_le_bytes());
        page.extend_from_slice(&[0, 0, 0, 0]);
        page.push(lacing.len() as u8);
        page.extend_from_slice(&lacing);
        page.extend_from_slice(packet);

        let checksum = crc::checksum(&page);
        page[22..26].copy_from_slice(&checksum.to_le_bytes());

        self.sequence += 1;
        Ok(page)
    }
}

/// Converts a WAV source (PCM, 48 kHz, 16-bit) into an Ogg/Opus stream.
///
/// One blocking operation: the sink receives a complete, valid stream and is
/// shut down afterwards. There is no partial-progress reporting.
pub async fn convert_wav_to_ogg_opus<R, W>(
    wav_in: R,
    mut ogg_out: W,
    options: EncoderOptions,
) -> Result<(), VoiceError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (ingest_tx, ingest_rx) = mpsc::channel(CHANNEL_CAPACITY);
    spawn_ingest_task(wav_in, ingest_tx);

    let (page_tx, mut page_rx) = mpsc::channel::<Result<Vec<u8>, VoiceError>>(CHANNEL_CAPACITY);
    let muxer = tokio::task::spawn_blocking(move || {
        let result = run_muxer(ChannelReader::new(ingest_rx), options, &page_tx);
        if let Err(err) = &result {
            let _ = page_tx.blocking_send(Err(err.clone()));
        }
        result
    });

    while let Some(page) = page_rx.recv().await {
        let page = page?;
        ogg_out.write_all(&page).await?;
    }
    ogg_out.shutdown().await?;

    match muxer.await {
        Ok(result) => result,
        Err(err) => Err(VoiceError::TaskJoin {
            role: "ogg-opus-mux",
            details: err.to_string(),
        }),
    }
}

/// Blocking side of the conversion: WAV walk, encoder setup, page loop.
fn run_muxer(
    mut reader: ChannelReader,
    options: EncoderOptions,
    tx: &mpsc::Sender<Result<Vec<u8>, VoiceError>>,
) -> Result<(), VoiceError> {
    let format = wav::read_wav_header(&mut reader)?;
    format
        .validate_for_voice()
        .map_err(VoiceError::Configuration)?;

    let channels = match format.channels {
        1 => opus::Channels::Mono,
        _ => opus::Channels::Stereo,
    };
    let mut encoder = opus::Encoder::new(format.sample_rate, channels, opus::Application::Audio)?;
    encoder.set_bitrate(opus::Bitrate::Bits(options.bitrate))?;
    encoder.set_inband_fec(options.inband_fec)?;
    encoder.set_packet_loss_perc(options.packet_loss_perc)?;

    let mut pages = OggPageWriter::new(rand::random());

    let head = opus_head_packet(&format);
    if !send_page(tx, pages.build_page(FLAG_BOS, 0, &head)?) {
        return Ok(());
    }
    let tags = opus_tags_packet();
    if !send_page(tx, pages.build_page(0, 0, &tags)?) {
        return Ok(());
    }

    let chunk_bytes = format.bytes_per_chunk();
    let frames_per_chunk = format.frames_per_chunk() as u64;
    let mut pcm = vec![0u8; chunk_bytes];
    let mut packet = vec![0u8; MAX_ENCODED_PACKET];
    let mut granule = 0u64;

    loop {
        let read = read_chunk(&mut reader, &mut pcm)?;
        let eos = read < chunk_bytes;
        // Keep encoder invocation uniform: the last short chunk is padded
        // with silence up to the full 60 ms.
        pcm[read..].fill(0);

        let samples = le_bytes_to_interleaved_i16(&pcm).map_err(VoiceError::Configuration)?;
        let encoded = encoder.encode(&samples, &mut packet)?;

        granule += frames_per_chunk;
        let flags = if eos { FLAG_EOS } else { 0 };
        if !send_page(tx, pages.build_page(flags, granule, &packet[..encoded])?) {
            return Ok(());
        }
        if eos {
            return Ok(());
        }
    }
}

/// 19-byte `OpusHead` identification packet, channel mapping family 0.
fn opus_head_packet(format: &PcmFormat) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1);
    head.push(format.channels);
    head.extend_from_slice(&PRE_SKIP.to_le_bytes());
    head.extend_from_slice(&format.sample_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    head.push(0);
    head
}

/// `OpusTags` packet naming the encoder and a documentation pointer.
fn opus_tags_packet() -> Vec<u8> {
    let vendor = format!("voxogg {}, {}", env!("CARGO_PKG_VERSION"), opus::version());
    let comments = [
        format!(
            "ENCODER=voxogg {} with {}",
            env!("CARGO_PKG_VERSION"),
            opus::version()
        ),
        "See https://docs.rs/voxogg for voice streaming notes".to_string(),
    ];

    let mut tags = Vec::new();
    tags.extend_from_slice(b"OpusTags");
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor.as_bytes());
    tags.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for comment in &comments {
        tags.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        tags.extend_from_slice(comment.as_bytes());
    }
    tags
}

fn send_page(tx: &mpsc::Sender<Result<Vec<u8>, VoiceError>>, page: Vec<u8>) -> bool {
    tx.blocking_send(Ok(page)).is_ok()
}

/// Reads up to `buf.len()` bytes; a short count means the source ended.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, VoiceError> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => break,
            Ok(n) => offset += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(offset)
}
