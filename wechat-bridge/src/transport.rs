//! Native-messaging wire format.
//!
//! Every frame is a 4-byte little-endian payload length followed by that
//! many bytes of UTF-8 JSON. The browser enforces a 1 MiB ceiling on
//! messages to a native host; a longer length prefix means the stream is
//! desynchronized and cannot be recovered by skipping, so it is fatal.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard ceiling on a single frame payload.
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The frame length exceeds [`MAX_FRAME_LEN`]; the stream is beyond
    /// recovery and the host must shut down.
    #[error("frame length {0} exceeds the {MAX_FRAME_LEN} byte limit, stream desynchronized")]
    Oversized(u64),
    /// The payload bytes were consumed but did not parse as JSON. The
    /// stream itself is still framed correctly, so the frame can be
    /// dropped and reading can continue.
    #[error("malformed frame payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the read loop may keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Malformed(_))
    }
}

pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one frame. `Ok(None)` is a clean end-of-stream: the peer
    /// closed the pipe before (or exactly at) a length prefix.
    pub async fn read(&mut self) -> Result<Option<Value>, TransportError> {
        let mut header = [0u8; 4];
        match self.inner.read_exact(&mut header).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let len = u32::from_le_bytes(header);
        if len > MAX_FRAME_LEN {
            return Err(TransportError::Oversized(u64::from(len)));
        }

        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload).await?;

        let value = serde_json::from_slice(&payload)?;
        Ok(Some(value))
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Escape hatch for writing raw bytes, used by tests that need to
    /// produce deliberately broken frames.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub async fn write(&mut self, value: &Value) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(value)?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or(TransportError::Oversized(payload.len() as u64))?;

        self.inner.write_all(&len.to_le_bytes()).await?;
        self.inner.write_all(&payload).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame_bytes(payload: &[u8]) -> Vec<u8> {
        let mut bytes = (payload.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[tokio::test]
    async fn round_trips_a_frame() {
        let message = json!({"action": "ping", "id": 7});
        let mut buffer = Vec::new();
        FrameWriter::new(&mut buffer).write(&message).await.unwrap();

        let mut reader = FrameReader::new(buffer.as_slice());
        assert_eq!(reader.read().await.unwrap(), Some(message));
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_stream_is_end_of_stream() {
        let mut reader = FrameReader::new(&[][..]);
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_header_is_end_of_stream() {
        let mut reader = FrameReader::new(&[0x02, 0x00][..]);
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_payload_is_an_io_error() {
        let mut bytes = 10u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        let mut reader = FrameReader::new(bytes.as_slice());
        assert!(matches!(
            reader.read().await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn oversized_length_is_fatal() {
        let bytes = (MAX_FRAME_LEN + 1).to_le_bytes().to_vec();
        let mut reader = FrameReader::new(bytes.as_slice());
        let err = reader.read().await.unwrap_err();
        assert!(
            matches!(err, TransportError::Oversized(len) if len == u64::from(MAX_FRAME_LEN) + 1)
        );
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn oversized_write_reports_the_payload_length() {
        // A string of MAX_FRAME_LEN bytes serializes with two extra quote
        // bytes, just past the ceiling.
        let message = Value::String("a".repeat(MAX_FRAME_LEN as usize));
        let mut buffer = Vec::new();
        let err = FrameWriter::new(&mut buffer)
            .write(&message)
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransportError::Oversized(len) if len == u64::from(MAX_FRAME_LEN) + 2)
        );
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_recoverable_and_keeps_framing() {
        let mut bytes = frame_bytes(b"not json");
        bytes.extend(frame_bytes(br#"{"action":"ping"}"#));

        let mut reader = FrameReader::new(bytes.as_slice());
        let err = reader.read().await.unwrap_err();
        assert!(err.is_recoverable());
        // The bad payload was consumed, so the next frame parses cleanly.
        assert_eq!(
            reader.read().await.unwrap(),
            Some(json!({"action": "ping"}))
        );
    }

    #[tokio::test]
    async fn length_prefix_is_little_endian() {
        let message = json!({});
        let mut buffer = Vec::new();
        FrameWriter::new(&mut buffer).write(&message).await.unwrap();
        assert_eq!(&buffer[..4], &[2, 0, 0, 0]);
        assert_eq!(&buffer[4..], b"{}");
    }
}
