//! Shared helpers for unit tests: hand-built Ogg pages and Opus headers.

use crate::ogg::crc;

/// Builds a single page carrying `packets` whole packets, with a correct
/// CRC. With `open_ended`, the last packet is left unterminated (its final
/// lacing value stays 255) so it can continue on a following page.
pub(crate) fn build_page(
    flags: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    packets: &[&[u8]],
    open_ended: bool,
) -> Vec<u8> {
    let mut lacing = Vec::new();
    let mut payload = Vec::new();
    for (i, packet) in packets.iter().enumerate() {
        let last = i == packets.len() - 1;
        let mut remaining = packet.len();
        while remaining >= 255 {
            lacing.push(255);
            remaining -= 255;
        }
        if !(last && open_ended && remaining == 0) {
            lacing.push(remaining as u8);
        }
        payload.extend_from_slice(packet);
    }

    let mut page = Vec::new();
    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(flags);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&[0, 0, 0, 0]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    page.extend_from_slice(&payload);

    let checksum = crc::checksum(&page);
    page[22..26].copy_from_slice(&checksum.to_le_bytes());
    page
}

/// A family-0 `OpusHead` packet.
pub(crate) fn opus_head_packet(channels: u8, pre_skip: u16) -> Vec<u8> {
    let mut head = Vec::new();
    head.extend_from_slice(b"OpusHead");
    head.push(1);
    head.push(channels);
    head.extend_from_slice(&pre_skip.to_le_bytes());
    head.extend_from_slice(&48_000u32.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    head.push(0);
    head
}

/// A family-1 `OpusHead` packet with an explicit stream layout.
pub(crate) fn opus_head_packet_multistream(
    channels: u8,
    stream_count: u8,
    coupled_count: u8,
    mapping: &[u8],
) -> Vec<u8> {
    let mut head = Vec::new();
    head.extend_from_slice(b"OpusHead");
    head.push(1);
    head.push(channels);
    head.extend_from_slice(&0u16.to_le_bytes());
    head.extend_from_slice(&48_000u32.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    head.push(1);
    head.push(stream_count);
    head.push(coupled_count);
    head.extend_from_slice(mapping);
    head
}

/// An `OpusTags` packet with the given vendor and comments.
pub(crate) fn opus_tags_packet(vendor: &str, comments: &[&str]) -> Vec<u8> {
    let mut tags = Vec::new();
    tags.extend_from_slice(b"OpusTags");
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor.as_bytes());
    tags.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for comment in comments {
        tags.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        tags.extend_from_slice(comment.as_bytes());
    }
    tags
}
