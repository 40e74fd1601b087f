//! Reassembly of Ogg/Opus streams into fixed 60 ms voice units.
//!
//! Each logical stream walks `ReadHeader → ReadComment → Streaming`: the BOS
//! packet yields the `OpusHead`, the second packet the `OpusTags`, and every
//! later packet runs through the TOC state machine. Packets whose frames fit
//! the running 60 ms window are appended verbatim; everything else is split
//! into single-frame packets and re-framed. A unit is emitted exactly when
//! the accumulated duration reaches 60 000 µs — never above it.

use std::collections::VecDeque;
use std::io::Read;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{spawn_ingest_task, ChannelReader, CHANNEL_CAPACITY};
use crate::error::VoiceError;
use crate::ogg::{OggPacket, OggPacketReader, OggReaderOptions};
use crate::opus::{read_frame_length, OpusHead, OpusTags, Toc};

/// Duration of one emitted voice unit, in microseconds.
const UNIT_DURATION_MICROS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamPhase {
    ReadHeader,
    ReadComment,
    Streaming,
}

/// Demux state for one logical (serial-numbered) stream.
struct LogicalStream {
    phase: StreamPhase,
    /// Interleaved Opus streams per packet, from the channel mapping.
    stream_count: usize,
    /// Accumulated unit bytes, flushed at exactly 60 000 µs.
    payload: Vec<u8>,
    duration_micros: u64,
    last_granule: u64,
}

impl LogicalStream {
    fn new() -> Self {
        Self {
            phase: StreamPhase::ReadHeader,
            stream_count: 1,
            payload: Vec::new(),
            duration_micros: 0,
            last_granule: 0,
        }
    }
}

/// Lazy, forward-only reader of 60 ms Opus voice units.
///
/// Progress is driven one unit at a time; the only suspension point is the
/// underlying byte source. The sequence is not restartable.
pub struct VoiceUnitReader<R: Read> {
    packets: OggPacketReader<R>,
    streams: Vec<(u32, LogicalStream)>,
    units: VecDeque<Bytes>,
    head: Option<OpusHead>,
    tags: Option<OpusTags>,
    /// Serial of the stream whose headers are exposed (first Opus stream).
    primary_serial: Option<u32>,
    finished: bool,
}

impl<R: Read> VoiceUnitReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, OggReaderOptions::default())
    }

    pub fn with_options(reader: R, options: OggReaderOptions) -> Self {
        Self {
            packets: OggPacketReader::new(reader, options),
            streams: Vec::new(),
            units: VecDeque::new(),
            head: None,
            tags: None,
            primary_serial: None,
            finished: false,
        }
    }

    /// Identification header of the first Opus stream, once parsed.
    pub fn opus_head(&self) -> Option<&OpusHead> {
        self.head.as_ref()
    }

    /// Comment header of the first Opus stream, once parsed.
    pub fn opus_tags(&self) -> Option<&OpusTags> {
        self.tags.as_ref()
    }

    /// Last granule position observed on the primary Opus stream.
    pub fn granule_position(&self) -> u64 {
        self.primary_serial
            .and_then(|serial| self.streams.iter().find(|(s, _)| *s == serial))
            .map(|(_, stream)| stream.last_granule)
            .unwrap_or(0)
    }

    /// Pumps packets until both headers of the first Opus stream are parsed.
    pub fn read_headers(&mut self) -> Result<(OpusHead, OpusTags), VoiceError> {
        while self.head.is_none() {
            if !self.pump_one()? {
                return Err(VoiceError::Format("missing OpusHead packet".into()));
            }
        }
        while self.tags.is_none() {
            if !self.pump_one()? {
                return Err(VoiceError::Format("missing OpusTags packet".into()));
            }
        }
        let head = self
            .head
            .clone()
            .ok_or_else(|| VoiceError::Format("missing OpusHead packet".into()))?;
        let tags = self
            .tags
            .clone()
            .ok_or_else(|| VoiceError::Format("missing OpusTags packet".into()))?;
        Ok((head, tags))
    }

    /// Returns the next 60 ms unit, or `None` once the input is exhausted.
    ///
    /// A partially filled window at end of input is discarded: units are
    /// only ever emitted at exactly 60 000 µs.
    pub fn next_unit(&mut self) -> Result<Option<Bytes>, VoiceError> {
        loop {
            if let Some(unit) = self.units.pop_front() {
                return Ok(Some(unit));
            }
            if self.finished {
                return Ok(None);
            }
            if !self.pump_one()? {
                for (serial, stream) in &self.streams {
                    if stream.duration_micros > 0 {
                        tracing::debug!(
                            serial,
                            leftover_micros = stream.duration_micros,
                            "dropping unfinished voice unit at end of input"
                        );
                    }
                }
            }
        }
    }

    /// Feeds one packet through the per-stream state machine.
    /// Returns `false` when the input is exhausted.
    fn pump_one(&mut self) -> Result<bool, VoiceError> {
        let packet = match self.packets.next_packet()? {
            Some(packet) => packet,
            None => {
                self.finished = true;
                return Ok(false);
            }
        };
        self.handle_packet(packet)?;
        Ok(true)
    }

    fn handle_packet(&mut self, packet: OggPacket) -> Result<(), VoiceError> {
        let index = match self.streams.iter().position(|(s, _)| *s == packet.serial) {
            Some(index) => index,
            None => {
                self.streams.push((packet.serial, LogicalStream::new()));
                self.streams.len() - 1
            }
        };
        let stream = &mut self.streams[index].1;

        match stream.phase {
            StreamPhase::ReadHeader => {
                let head = OpusHead::parse(&packet.data)?;
                stream.stream_count = head.channel_mapping.stream_count as usize;
                stream.phase = StreamPhase::ReadComment;
                if self.head.is_none() {
                    tracing::debug!(
                        serial = packet.serial,
                        channels = head.channel_count,
                        streams = head.channel_mapping.stream_count,
                        "found Opus stream"
                    );
                    self.primary_serial = Some(packet.serial);
                    self.head = Some(head);
                }
            }
            StreamPhase::ReadComment => {
                let tags = OpusTags::parse(&packet.data)?;
                stream.phase = StreamPhase::Streaming;
                if self.primary_serial == Some(packet.serial) {
                    self.tags = Some(tags);
                }
            }
            StreamPhase::Streaming => {
                demux_packet(stream, &mut self.units, &packet.data)?;
            }
        }

        stream.last_granule = packet.granule;
        if packet.eos {
            tracing::debug!(
                serial = packet.serial,
                granule = packet.granule,
                "logical stream ended"
            );
        }
        Ok(())
    }
}

/// Runs one reassembled packet through the TOC state machine, appending to
/// the stream's accumulation buffer and flushing completed 60 ms units.
fn demux_packet(
    stream: &mut LogicalStream,
    units: &mut VecDeque<Bytes>,
    content: &[u8],
) -> Result<(), VoiceError> {
    let len = content.len();
    let stream_count = stream.stream_count.max(1);
    let mut offset = 0usize;
    let mut sub_stream = 0usize;

    while offset < len {
        // All interleaved streams but the last carry their frame sizes
        // in-band (self-delimited framing).
        let self_delimited = sub_stream % stream_count < stream_count - 1;
        sub_stream += 1;

        let packet_start = offset;
        let toc = Toc(content[offset]);
        offset += 1;
        let frame_duration = toc.frame_duration_micros();

        let mut sizes: Vec<usize> = Vec::new();
        let mut padding_len = 0usize;

        match toc.code() {
            0 => {
                sizes.push(if self_delimited {
                    read_frame_length(content, &mut offset)?
                } else {
                    len - offset
                });
            }
            1 => {
                let size = if self_delimited {
                    read_frame_length(content, &mut offset)?
                } else {
                    let remaining = len - offset;
                    if remaining % 2 != 0 {
                        return Err(VoiceError::Format(
                            "two-frame packet with odd payload length".into(),
                        ));
                    }
                    remaining / 2
                };
                sizes.push(size);
                sizes.push(size);
            }
            2 => {
                let first = read_frame_length(content, &mut offset)?;
                sizes.push(first);
                sizes.push(if self_delimited {
                    read_frame_length(content, &mut offset)?
                } else {
                    (len - offset).checked_sub(first).ok_or_else(|| {
                        VoiceError::Format("frame length exceeds packet bounds".into())
                    })?
                });
            }
            _ => {
                let control = *content.get(offset).ok_or_else(|| {
                    VoiceError::Format("truncated frame-count byte".into())
                })?;
                offset += 1;
                let count = (control & 0x3F) as usize;
                let vbr = control & 0x80 != 0;
                if count == 0 {
                    return Err(VoiceError::Format(
                        "arbitrary-count packet with zero frames".into(),
                    ));
                }

                if control & 0x40 != 0 {
                    // Chained padding lengths: 255 adds 254 bytes and
                    // continues, anything else ends the chain.
                    loop {
                        let value = *content.get(offset).ok_or_else(|| {
                            VoiceError::Format("truncated padding length".into())
                        })?;
                        offset += 1;
                        if value == 255 {
                            padding_len += 254;
                        } else {
                            padding_len += value as usize;
                            break;
                        }
                    }
                }

                if vbr {
                    let explicit = if self_delimited { count } else { count - 1 };
                    for _ in 0..explicit {
                        sizes.push(read_frame_length(content, &mut offset)?);
                    }
                    if !self_delimited {
                        let consumed: usize = sizes.iter().sum();
                        let last = (len - offset)
                            .checked_sub(consumed + padding_len)
                            .ok_or_else(|| {
                                VoiceError::Format("frame lengths exceed packet bounds".into())
                            })?;
                        sizes.push(last);
                    }
                } else {
                    let size = if self_delimited {
                        read_frame_length(content, &mut offset)?
                    } else {
                        let remaining =
                            (len - offset).checked_sub(padding_len).ok_or_else(|| {
                                VoiceError::Format("padding exceeds packet bounds".into())
                            })?;
                        if remaining % count != 0 {
                            return Err(VoiceError::Format(
                                "constant-bitrate frames do not divide packet payload".into(),
                            ));
                        }
                        remaining / count
                    };
                    sizes.extend(std::iter::repeat_n(size, count));
                }
            }
        }

        let total_duration = sizes.len() as u64 * frame_duration;
        let frames_total: usize = sizes.iter().sum();

        if !self_delimited
            && stream.duration_micros + total_duration <= UNIT_DURATION_MICROS
        {
            // Fast path: the whole packet fits the window, keep its original
            // framing (header, frames and padding verbatim).
            let end = offset + frames_total + padding_len;
            if end > len {
                return Err(VoiceError::Format(
                    "frame lengths exceed packet bounds".into(),
                ));
            }
            stream.payload.extend_from_slice(&content[packet_start..end]);
            stream.duration_micros += total_duration;
            if stream.duration_micros == UNIT_DURATION_MICROS {
                flush_unit(stream, units);
            }
            offset = end;
            continue;
        }

        // Split path: re-frame each frame as its own single-frame packet.
        for &size in &sizes {
            let end = offset.checked_add(size).filter(|&end| end <= len).ok_or_else(
                || VoiceError::Format("frame length exceeds packet bounds".into()),
            )?;
            stream.payload.push(toc.single_frame());
            stream.payload.extend_from_slice(&content[offset..end]);
            offset = end;
            stream.duration_micros += frame_duration;
            if stream.duration_micros >= UNIT_DURATION_MICROS {
                if stream.duration_micros > UNIT_DURATION_MICROS {
                    return Err(VoiceError::Configuration(format!(
                        "accumulated duration {} µs overshoots the 60000 µs unit; \
                         the source frame sizes do not divide 60 ms windows",
                        stream.duration_micros
                    )));
                }
                flush_unit(stream, units);
            }
        }

        // Trailing padding is dropped, never carried into units.
        offset = offset.checked_add(padding_len).filter(|&end| end <= len).ok_or_else(
            || VoiceError::Format("padding exceeds packet bounds".into()),
        )?;
    }

    Ok(())
}

fn flush_unit(stream: &mut LogicalStream, units: &mut VecDeque<Bytes>) {
    units.push_back(Bytes::from(std::mem::take(&mut stream.payload)));
    stream.duration_micros = 0;
}

/// Async sequence of 60 ms voice units backed by a blocking demux task.
#[derive(Debug)]
pub struct VoiceUnitStream {
    head: OpusHead,
    tags: OpusTags,
    rx: mpsc::Receiver<Result<Bytes, VoiceError>>,
    producer: Option<JoinHandle<Result<(), VoiceError>>>,
}

impl VoiceUnitStream {
    pub fn opus_head(&self) -> &OpusHead {
        &self.head
    }

    pub fn opus_tags(&self) -> &OpusTags {
        &self.tags
    }

    /// Waits for the next unit; `Ok(None)` is a clean end of stream.
    pub async fn next(&mut self) -> Result<Option<Bytes>, VoiceError> {
        if let Some(result) = self.rx.recv().await {
            return result.map(Some);
        }
        match self.producer.take() {
            Some(handle) => match handle.await {
                Ok(Ok(())) => Ok(None),
                Ok(Err(err)) => Err(err),
                Err(err) => Err(VoiceError::TaskJoin {
                    role: "voice-demux",
                    details: err.to_string(),
                }),
            },
            None => Ok(None),
        }
    }
}

impl Drop for VoiceUnitStream {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}

/// Opens an Ogg/Opus source and returns the lazy unit sequence once both
/// Opus headers have been parsed.
pub async fn read_voice_units<R>(reader: R) -> Result<VoiceUnitStream, VoiceError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (ingest_tx, ingest_rx) = mpsc::channel(CHANNEL_CAPACITY);
    spawn_ingest_task(reader, ingest_tx);

    let (unit_tx, unit_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (info_tx, info_rx) = oneshot::channel::<Result<(OpusHead, OpusTags), VoiceError>>();

    let producer = tokio::task::spawn_blocking(move || -> Result<(), VoiceError> {
        let mut units = VoiceUnitReader::new(ChannelReader::new(ingest_rx));
        match units.read_headers() {
            Ok(headers) => {
                if info_tx.send(Ok(headers)).is_err() {
                    return Ok(());
                }
            }
            Err(err) => {
                let _ = info_tx.send(Err(err.clone()));
                return Err(err);
            }
        }

        loop {
            match units.next_unit() {
                Ok(Some(unit)) => {
                    if unit_tx.blocking_send(Ok(unit)).is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    let _ = unit_tx.blocking_send(Err(err.clone()));
                    return Err(err);
                }
            }
        }
    });

    let (head, tags) = info_rx.await.map_err(|_| VoiceError::ChannelClosed)??;
    Ok(VoiceUnitStream {
        head,
        tags,
        rx: unit_rx,
        producer: Some(producer),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::ogg::FLAG_BOS;
    use crate::testutil::{
        build_page, opus_head_packet, opus_head_packet_multistream, opus_tags_packet,
    };

    const SERIAL: u32 = 0x5EED;

    /// One stream: OpusHead, OpusTags, then one page per audio packet.
    fn single_stream_container(head: Vec<u8>, audio_packets: &[Vec<u8>]) -> Vec<u8> {
        let mut data = build_page(FLAG_BOS, 0, SERIAL, 0, &[&head], false);
        data.extend_from_slice(&build_page(
            0,
            0,
            SERIAL,
            1,
            &[&opus_tags_packet("demo", &[])],
            false,
        ));
        for (i, packet) in audio_packets.iter().enumerate() {
            data.extend_from_slice(&build_page(
                0,
                960 * (i as u64 + 1),
                SERIAL,
                2 + i as u32,
                &[packet],
                false,
            ));
        }
        data
    }

    fn reader_over(data: Vec<u8>) -> VoiceUnitReader<Cursor<Vec<u8>>> {
        VoiceUnitReader::new(Cursor::new(data))
    }

    /// Single-frame packet with a 20 ms SILK configuration.
    fn packet_20ms(body: &[u8]) -> Vec<u8> {
        let mut packet = vec![1 << 3];
        packet.extend_from_slice(body);
        packet
    }

    #[test]
    fn headers_surface_before_any_unit() {
        let data = single_stream_container(opus_head_packet(2, 312), &[]);
        let mut reader = reader_over(data);
        let (head, tags) = reader.read_headers().unwrap();
        assert_eq!(head.channel_count, 2);
        assert_eq!(head.pre_skip, 312);
        assert_eq!(tags.vendor, "demo");
        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn fast_path_emits_verbatim_packets_at_60ms() {
        let packets = vec![
            packet_20ms(b"first"),
            packet_20ms(b"second!"),
            packet_20ms(b"third"),
            packet_20ms(b"tail"),
        ];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &packets));

        let unit = reader.next_unit().unwrap().unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&packets[0]);
        expected.extend_from_slice(&packets[1]);
        expected.extend_from_slice(&packets[2]);
        assert_eq!(unit.as_ref(), expected.as_slice());
        assert_eq!(reader.granule_position(), 2880);

        // The fourth packet only fills 20 ms of the next window.
        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn code3_packet_splits_into_single_frame_packets() {
        // One 20 ms packet, then a CBR code-3 packet holding 3×20 ms frames
        // of 4 bytes each. The second packet cannot ride the fast path.
        let mut code3 = vec![(1 << 3) | 3, 3];
        code3.extend_from_slice(b"aaaabbbbcccc");
        let packets = vec![packet_20ms(b"head"), code3];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &packets));

        let unit = reader.next_unit().unwrap().unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&packets[0]);
        expected.extend_from_slice(&[1 << 3]);
        expected.extend_from_slice(b"aaaa");
        expected.extend_from_slice(&[1 << 3]);
        expected.extend_from_slice(b"bbbb");
        assert_eq!(unit.as_ref(), expected.as_slice());

        // Third frame (20 ms) stays unflushed, input ends.
        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn code3_vbr_implicit_last_frame_rides_fast_path() {
        // VBR, padded: control byte 0xC3 = vbr | padding | 3 frames.
        // Padding length 2; explicit sizes 1 and 2, implicit last frame 3.
        let mut packet = vec![(1 << 3) | 3, 0xC3, 2, 1, 2];
        packet.extend_from_slice(b"Xyyzzz");
        packet.extend_from_slice(&[0xEE, 0xEE]); // padding bytes
        let packets = vec![packet];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &packets));

        // 3 × 20 ms = 60 ms: exactly one unit, verbatim with its padding.
        let unit = reader.next_unit().unwrap().unwrap();
        assert_eq!(unit.as_ref(), packets[0].as_slice());
        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn split_path_drops_trailing_padding() {
        // CBR code-3 packet (3 × 20 ms, 2 bytes each) plus 2 padding bytes,
        // entering a window already 20 ms full.
        let mut code3 = vec![(1 << 3) | 3, 0x43, 2];
        code3.extend_from_slice(b"aabbcc");
        code3.extend_from_slice(&[0x77, 0x77]);
        let packets = vec![packet_20ms(b"head"), code3];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &packets));

        let unit = reader.next_unit().unwrap().unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&packets[0]);
        expected.extend_from_slice(&[1 << 3]);
        expected.extend_from_slice(b"aa");
        expected.extend_from_slice(&[1 << 3]);
        expected.extend_from_slice(b"bb");
        assert_eq!(unit.as_ref(), expected.as_slice());

        // Last frame is 20 ms short of a unit and the padding never surfaces.
        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn chained_padding_lengths_accumulate() {
        // Padding chain [255, 3] = 254 + 3 = 257 bytes after a single 60 ms
        // frame. Mis-counting the chain would break the CBR size division.
        let mut packet = vec![(3 << 3) | 3, 0x41, 255, 3];
        packet.extend_from_slice(b"fr");
        packet.extend_from_slice(&[0u8; 257]);
        let packets = vec![packet];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &packets));

        let unit = reader.next_unit().unwrap().unwrap();
        assert_eq!(unit.as_ref(), packets[0].as_slice());
        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn overshoot_is_a_configuration_error() {
        // 40 ms packets: second one lands at 80 ms in the split path.
        let forty = vec![2 << 3, 0xAB, 0xCD];
        let packets = vec![forty.clone(), forty];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &packets));

        match reader.next_unit() {
            Err(VoiceError::Configuration(msg)) => assert!(msg.contains("80000")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn sixty_ms_frames_pass_through_unsplit() {
        let packets = vec![vec![3 << 3, 0x01, 0x02], vec![3 << 3, 0x03]];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &packets));

        assert_eq!(
            reader.next_unit().unwrap().unwrap().as_ref(),
            packets[0].as_slice()
        );
        assert_eq!(
            reader.next_unit().unwrap().unwrap().as_ref(),
            packets[1].as_slice()
        );
        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn multistream_packets_interleave_self_delimited_frames() {
        // Two interleaved streams per packet: the first self-delimited, the
        // second implicit. Each Ogg packet carries 2 × 20 ms.
        let head = opus_head_packet_multistream(2, 2, 0, &[0, 1]);
        let mut audio = Vec::new();
        // Self-delimited 20 ms single frame, explicit length 3.
        audio.extend_from_slice(&[1 << 3, 3, b'x', b'y', b'z']);
        // Implicit 20 ms single frame over the remainder.
        audio.extend_from_slice(&[1 << 3, b'r', b'e', b's', b't']);

        let packets = vec![audio.clone(), audio.clone(), audio];
        let mut reader = reader_over(single_stream_container(head, &packets));

        // Self-delimited frames are re-framed one by one; the flush lands
        // mid-way through the second packet.
        let unit = reader.next_unit().unwrap().unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&[1 << 3, b'x', b'y', b'z']);
        expected.extend_from_slice(&[1 << 3, b'r', b'e', b's', b't']);
        expected.extend_from_slice(&[1 << 3, b'x', b'y', b'z']);
        assert_eq!(unit.as_ref(), expected.as_slice());

        let unit = reader.next_unit().unwrap().unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&[1 << 3, b'r', b'e', b's', b't']);
        expected.extend_from_slice(&[1 << 3, b'x', b'y', b'z']);
        expected.extend_from_slice(&[1 << 3, b'r', b'e', b's', b't']);
        assert_eq!(unit.as_ref(), expected.as_slice());

        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn non_opus_stream_bytes_never_reach_units() {
        let vorbis_serial = 0x0BAD;
        let mut data = build_page(FLAG_BOS, 0, vorbis_serial, 0, &[b"\x01vorbis-header"], false);
        data.extend_from_slice(&build_page(
            FLAG_BOS,
            0,
            SERIAL,
            0,
            &[&opus_head_packet(1, 0)],
            false,
        ));
        data.extend_from_slice(&build_page(
            0,
            0,
            vorbis_serial,
            1,
            &[b"vorbis-audio-bytes"],
            false,
        ));
        data.extend_from_slice(&build_page(
            0,
            0,
            SERIAL,
            1,
            &[&opus_tags_packet("demo", &[])],
            false,
        ));
        let audio: Vec<Vec<u8>> = (0..3).map(|_| packet_20ms(b"opus")).collect();
        for (i, packet) in audio.iter().enumerate() {
            data.extend_from_slice(&build_page(
                0,
                960 * (i as u64 + 1),
                SERIAL,
                2 + i as u32,
                &[packet],
                false,
            ));
        }

        let mut reader = reader_over(data);
        let unit = reader.next_unit().unwrap().unwrap();
        let mut expected = Vec::new();
        for packet in &audio {
            expected.extend_from_slice(packet);
        }
        assert_eq!(unit.as_ref(), expected.as_slice());
        assert!(reader.next_unit().unwrap().is_none());
    }

    #[test]
    fn code1_equal_frames_split_evenly() {
        // Code 1 packet with two 20 ms frames of 3 bytes each, landing on a
        // 20 ms-filled window: 20 + 40 = 60 ms exactly, via the fast path.
        let code1 = vec![(1 << 3) | 1, b'a', b'b', b'c', b'd', b'e', b'f'];
        let packets = vec![packet_20ms(b"lead"), code1];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &packets));

        let unit = reader.next_unit().unwrap().unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&packets[0]);
        expected.extend_from_slice(&packets[1]);
        assert_eq!(unit.as_ref(), expected.as_slice());
    }

    #[test]
    fn code1_odd_payload_is_rejected() {
        let bad = vec![(1 << 3) | 1, 1, 2, 3];
        let mut reader = reader_over(single_stream_container(opus_head_packet(1, 0), &[bad]));
        assert!(matches!(
            reader.next_unit(),
            Err(VoiceError::Format(_))
        ));
    }

    #[tokio::test]
    async fn async_facade_yields_the_same_units() {
        let packets: Vec<Vec<u8>> = (0..6).map(|i| packet_20ms(&[i as u8; 4])).collect();
        let data = single_stream_container(opus_head_packet(1, 0), &packets);

        let mut stream = read_voice_units(Cursor::new(data)).await.unwrap();
        assert_eq!(stream.opus_head().channel_count, 1);
        assert_eq!(stream.opus_tags().vendor, "demo");

        let mut units = Vec::new();
        while let Some(unit) = stream.next().await.unwrap() {
            units.push(unit);
        }
        assert_eq!(units.len(), 2);
    }

    #[tokio::test]
    async fn async_facade_reports_missing_headers() {
        let err = read_voice_units(Cursor::new(Vec::<u8>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, VoiceError::Format(_)));
    }
}
