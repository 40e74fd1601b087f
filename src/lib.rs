//! # voxogg
//!
//! Asynchronous Ogg/Opus voice-frame streaming utilities.
//!
//! Voice transports want Opus audio in fixed 60 ms units. This library
//! reassembles an Ogg-encapsulated Opus stream into exactly those units,
//! and in the other direction muxes PCM audio into a valid Ogg/Opus byte
//! stream. The container work is done here byte by byte — Ogg page layout,
//! CRC-32 verification, Opus TOC framing — while the actual audio coding is
//! delegated to libopus on the write path only.
//!
//! ## Features
//!
//! - **Exact 60 ms units**: packets are merged and split so that every
//!   emitted payload accounts for precisely 60 000 µs of audio
//! - **True streaming**: both directions work on non-seekable streams with
//!   bounded memory
//! - **Async API over a blocking core**: Tokio `AsyncRead`/`AsyncWrite` at
//!   the edges, plain `std::io::Read` state machines inside
//! - **Multi-stream aware**: self-delimited Opus framing is re-framed, and
//!   non-Opus logical streams in the container are skipped
//!
//! ## Example: demux a voice note
//!
//! ```no_run
//! use voxogg::read_voice_units;
//! use tokio::fs::File;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = File::open("note.ogg").await?;
//!     let mut units = read_voice_units(file).await?;
//!
//!     let head = units.opus_head();
//!     println!("{} channel(s), pre-skip {}", head.channel_count, head.pre_skip);
//!
//!     while let Some(unit) = units.next().await? {
//!         // Each `unit` holds exactly 60 ms of Opus payload.
//!         send_to_transport(&unit);
//!     }
//!     Ok(())
//! }
//! # fn send_to_transport(_unit: &[u8]) {}
//! ```
//!
//! ## Example: encode a WAV file
//!
//! ```no_run
//! use voxogg::{convert_wav_to_ogg_opus, EncoderOptions};
//! use tokio::fs::File;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let wav = File::open("input.wav").await?;
//!     let ogg = File::create("note.ogg").await?;
//!     convert_wav_to_ogg_opus(wav, ogg, EncoderOptions::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod demux;
pub mod error;
pub mod mux;
pub mod opus;

mod common;
mod ogg;
mod pcm;
mod util;
mod wav;

#[cfg(test)]
mod testutil;

pub use demux::{read_voice_units, VoiceUnitReader, VoiceUnitStream};
pub use error::VoiceError;
pub use mux::{convert_wav_to_ogg_opus, EncoderOptions};
pub use ogg::OggReaderOptions;
pub use opus::{ChannelMapping, OpusHead, OpusTags};
pub use pcm::PcmFormat;
