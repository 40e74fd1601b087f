//! Minimal RIFF/WAVE walking for the write path.
//!
//! Only enough of the container is read to extract the PCM parameters from
//! the `fmt ` chunk and position the reader at the start of the `data`
//! payload. Unknown chunks are skipped, honoring RIFF's even-byte padding.

use std::io::{self, Read};

use crate::error::VoiceError;
use crate::pcm::PcmFormat;

const PCM_FORMAT_TAG: u16 = 0x0001;

/// Reads the WAV preamble and returns the PCM parameters, leaving `reader`
/// positioned at the first byte of PCM sample data.
pub(crate) fn read_wav_header<R: Read>(reader: &mut R) -> Result<PcmFormat, VoiceError> {
    let mut riff = [0u8; 12];
    read_fully(reader, &mut riff, "RIFF header")?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(VoiceError::Format(
            "input is not a RIFF/WAVE stream".into(),
        ));
    }

    let mut format: Option<PcmFormat> = None;
    loop {
        let mut chunk_header = [0u8; 8];
        read_fully(reader, &mut chunk_header, "chunk header")?;
        let chunk_id = [
            chunk_header[0],
            chunk_header[1],
            chunk_header[2],
            chunk_header[3],
        ];
        let chunk_size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]) as usize;

        match &chunk_id {
            b"fmt " => {
                if chunk_size < 16 {
                    return Err(VoiceError::Format("fmt chunk too small".into()));
                }
                let mut fmt = vec![0u8; chunk_size];
                read_fully(reader, &mut fmt, "fmt chunk")?;
                skip(reader, chunk_size % 2)?;

                let audio_format = u16::from_le_bytes([fmt[0], fmt[1]]);
                if audio_format != PCM_FORMAT_TAG {
                    return Err(VoiceError::Configuration(format!(
                        "WAV stream must contain PCM audio, got format tag {audio_format}"
                    )));
                }
                let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                let bits_per_sample = u16::from_le_bytes([fmt[14], fmt[15]]);
                if channels == 0 || channels > 0xFF {
                    return Err(VoiceError::Configuration(format!(
                        "unsupported WAV channel count: {channels}"
                    )));
                }
                if bits_per_sample == 0 || bits_per_sample > 32 {
                    return Err(VoiceError::Configuration(format!(
                        "unsupported WAV bit depth: {bits_per_sample}"
                    )));
                }
                format = Some(PcmFormat {
                    sample_rate,
                    channels: channels as u8,
                    bits_per_sample: bits_per_sample as u8,
                });
            }
            b"data" => {
                return format.ok_or_else(|| {
                    VoiceError::Format("data chunk before fmt chunk".into())
                });
            }
            _ => {
                skip(reader, chunk_size + chunk_size % 2)?;
            }
        }
    }
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8], context: &str) -> Result<(), VoiceError> {
    let mut offset = 0;
    while offset < buf.len() {
        match reader.read(&mut buf[offset..]) {
            Ok(0) => {
                return Err(VoiceError::Format(format!(
                    "unexpected end of input in WAV {context}"
                )));
            }
            Ok(n) => offset += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn skip<R: Read>(reader: &mut R, len: usize) -> Result<(), VoiceError> {
    let copied = io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
    if copied < len as u64 {
        return Err(VoiceError::Format(
            "unexpected end of input while skipping WAV chunk".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn build_wav(format: PcmFormat, pcm: &[u8]) -> Vec<u8> {
    let byte_rate =
        format.sample_rate * u32::from(format.channels) * format.bytes_per_sample() as u32;
    let block_align = u16::from(format.channels) * format.bytes_per_sample() as u16;

    let mut wav = Vec::new();
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + pcm.len() as u32).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&u16::from(format.channels).to_le_bytes());
    wav.extend_from_slice(&format.sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&u16::from(format.bits_per_sample).to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn voice_format() -> PcmFormat {
        PcmFormat {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
        }
    }

    #[test]
    fn extracts_pcm_parameters() {
        let wav = build_wav(voice_format(), &[0u8; 16]);
        let mut cursor = Cursor::new(wav);
        let format = read_wav_header(&mut cursor).unwrap();
        assert_eq!(format.sample_rate, 48_000);
        assert_eq!(format.channels, 2);
        assert_eq!(format.bits_per_sample, 16);

        // Reader is positioned at the PCM payload.
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![0u8; 16]);
    }

    #[test]
    fn skips_unknown_chunks() {
        let mut wav = build_wav(voice_format(), b"PCM!");
        // Splice an unknown chunk (odd size, so padding applies) between
        // the header and the fmt chunk.
        let mut spliced = wav[..12].to_vec();
        spliced.extend_from_slice(b"LIST");
        spliced.extend_from_slice(&3u32.to_le_bytes());
        spliced.extend_from_slice(b"abc\0");
        spliced.extend_from_slice(&wav.split_off(12));

        let mut cursor = Cursor::new(spliced);
        let format = read_wav_header(&mut cursor).unwrap();
        assert_eq!(format.sample_rate, 48_000);
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"PCM!");
    }

    #[test]
    fn rejects_non_wave_input() {
        let mut cursor = Cursor::new(b"OggS definitely not a wav".to_vec());
        assert!(matches!(
            read_wav_header(&mut cursor),
            Err(VoiceError::Format(_))
        ));
    }

    #[test]
    fn rejects_non_pcm_format_tag() {
        let mut wav = build_wav(voice_format(), &[]);
        wav[20] = 3; // IEEE float format tag
        let mut cursor = Cursor::new(wav);
        assert!(matches!(
            read_wav_header(&mut cursor),
            Err(VoiceError::Configuration(_))
        ));
    }

    #[test]
    fn truncated_header_is_a_format_error() {
        let wav = build_wav(voice_format(), &[]);
        let mut cursor = Cursor::new(wav[..10].to_vec());
        assert!(matches!(
            read_wav_header(&mut cursor),
            Err(VoiceError::Format(_))
        ));
    }
}
