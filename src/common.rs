//! Plumbing between async tasks and the synchronous parsing core.
//!
//! The Ogg page reader and the muxer are plain blocking state machines over
//! `std::io::Read`. Their async entry points run them on `spawn_blocking`
//! tasks and feed them through bounded channels; this module holds the
//! adapters shared by both paths.

use std::io::{self, Read};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
    task::JoinHandle,
};

use crate::error::VoiceError;

/// Size of chunks when ingesting input data.
pub(crate) const INGEST_CHUNK_SIZE: usize = 16 * 1024;

/// Channel capacity for async message passing between tasks.
///
/// Bounded so the ingest task stops reading when the parser falls behind.
pub(crate) const CHANNEL_CAPACITY: usize = 8;

/// Adapter that bridges async channel reading to sync `std::io::Read`.
///
/// The parsing core suspends exactly here: `read` blocks on the channel
/// until the ingest task delivers more bytes or signals end of input.
pub(crate) struct ChannelReader {
    rx: mpsc::Receiver<Result<Bytes, VoiceError>>,
    current: Bytes,
    offset: usize,
    finished: bool,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<Result<Bytes, VoiceError>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            offset: 0,
            finished: false,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.offset < self.current.len() {
                let n = buf.len().min(self.current.len() - self.offset);
                buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }

            if self.finished {
                return Ok(0);
            }

            match self.rx.blocking_recv() {
                Some(Ok(bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    self.current = bytes;
                    self.offset = 0;
                }
                Some(Err(err)) => {
                    self.finished = true;
                    return Err(io::Error::other(err.to_string()));
                }
                None => {
                    self.finished = true;
                    return Ok(0);
                }
            }
        }
    }
}

/// Spawns a task that reads the async source in chunks and forwards them
/// through a bounded channel to the blocking side.
pub(crate) fn spawn_ingest_task<R>(
    reader: R,
    ingest_tx: mpsc::Sender<Result<Bytes, VoiceError>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = tokio::io::BufReader::new(reader);
        let mut buf = vec![0u8; INGEST_CHUNK_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if ingest_tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = ingest_tx.send(Err(VoiceError::from(err))).await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_reader_concatenates_chunks() {
        let (tx, rx) = mpsc::channel(4);
        tx.blocking_send(Ok(Bytes::from_static(b"hello ")))
            .unwrap();
        tx.blocking_send(Ok(Bytes::from_static(b"world"))).unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn channel_reader_surfaces_errors() {
        let (tx, rx) = mpsc::channel(4);
        tx.blocking_send(Err(VoiceError::Format("broken".into())))
            .unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}
