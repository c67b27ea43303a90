//! Reading and writing whole frames on a byte stream, with deadlines.

use shared::protocol::{FrameHeader, HEADER_LEN};
use shared::{Message, ProtocolError};
use std::io::ErrorKind;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Anything that ends a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// A raw frame whose payload has not been interpreted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn decode(&self) -> Result<Message, ProtocolError> {
        Message::decode(self.msg_type, &self.payload)
    }
}

async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), ConnectionError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ConnectionError::Closed),
        Err(e) => Err(e.into()),
    }
}

/// Reads one complete frame. The whole frame must arrive within `limit`.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: Duration,
) -> Result<Frame, ConnectionError> {
    let read = async {
        let mut header = [0u8; HEADER_LEN];
        fill(reader, &mut header).await?;
        let header = FrameHeader::decode(&header)?;

        let mut payload = vec![0u8; header.len as usize];
        fill(reader, &mut payload).await?;
        Ok(Frame {
            msg_type: header.msg_type,
            payload,
        })
    };

    timeout(limit, read)
        .await
        .map_err(|_| ConnectionError::Timeout(limit))?
}

/// Reads and decodes one frame.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: Duration,
) -> Result<Message, ConnectionError> {
    let frame = read_frame(reader, limit).await?;
    Ok(frame.decode()?)
}

/// Writes an encoded frame in full, or fails. The write must finish within `limit`.
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    frame: &[u8],
    limit: Duration,
) -> Result<(), ConnectionError> {
    let write = async {
        writer.write_all(frame).await?;
        writer.flush().await
    };

    timeout(limit, write)
        .await
        .map_err(|_| ConnectionError::Timeout(limit))??;
    Ok(())
}

pub async fn write_message<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    message: &Message,
    limit: Duration,
) -> Result<(), ConnectionError> {
    let frame = message.to_frame()?;
    write_frame(writer, &frame, limit).await
}
