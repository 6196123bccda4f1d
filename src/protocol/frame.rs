//! Frame envelope with async encode/decode.
//!
//! Uses `bytes::Bytes` for zero-copy payload sharing between the
//! receive loop and dispatched handlers.
//!
//! Decoding recovers from stream corruption: a read that does not start
//! on the sync marker consumes exactly one byte and fails with
//! [`SodibusError::Desync`], so a caller can retry in a loop and scan
//! forward until the stream realigns. All other read failures are fatal
//! to the connection.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire::{HEADER_SIZE, SYNC_MARKER};
use crate::error::{Result, SodibusError};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type tag (see [`super::wire::frame_type`]).
    pub frame_type: u8,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from a type tag and payload.
    pub fn new(frame_type: u8, payload: Bytes) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Create a frame from a type tag and raw bytes (copies data).
    pub fn from_parts(frame_type: u8, payload: &[u8]) -> Self {
        Self {
            frame_type,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Encode the frame into a contiguous byte vector.
    ///
    /// # Example
    ///
    /// ```
    /// use sodibus_client::protocol::{Frame, SYNC_MARKER, HEADER_SIZE};
    /// use bytes::Bytes;
    ///
    /// let frame = Frame::new(0x03, Bytes::from_static(b"hello"));
    /// let bytes = frame.encode();
    /// assert_eq!(bytes[0], SYNC_MARKER);
    /// assert_eq!(bytes.len(), HEADER_SIZE + 5);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.push(SYNC_MARKER);
        buf.push(self.frame_type);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Read one frame from an async stream.
    ///
    /// Reads a single byte first; if it is not the sync marker the byte
    /// is consumed and the call fails with [`SodibusError::Desync`].
    /// Otherwise reads the type tag, the big-endian length, and exactly
    /// `length` payload bytes.
    ///
    /// # Errors
    ///
    /// - [`SodibusError::Desync`] - stream misaligned, retry to rescan
    /// - [`SodibusError::Protocol`] - declared length exceeds `max_payload`
    /// - [`SodibusError::Io`] - underlying read failure, fatal
    pub async fn read<R>(reader: &mut R, max_payload: u32) -> Result<Frame>
    where
        R: AsyncRead + Unpin,
    {
        let marker = reader.read_u8().await?;
        if marker != SYNC_MARKER {
            return Err(SodibusError::Desync);
        }

        let frame_type = reader.read_u8().await?;
        let len = reader.read_u32().await?;

        if len > max_payload {
            return Err(SodibusError::Protocol(format!(
                "payload length {} exceeds maximum {}",
                len, max_payload
            )));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;

        Ok(Frame {
            frame_type,
            payload: Bytes::from(payload),
        })
    }

    /// Write the frame to an async stream and flush.
    pub async fn write<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}
