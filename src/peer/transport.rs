use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};

/// Frames larger than this are treated as hostile and dropped with the
/// connection.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Length-prefixed message framing over any byte stream.
///
/// Generic over the stream so the state machine can be driven over an
/// in-memory pipe as well as a TCP socket.
pub struct PeerTransport<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(32 * 1024),
        }
    }

    /// Reads from the stream until the buffer holds at least `wanted`
    /// bytes. EOF before that is a disconnect.
    async fn fill(&mut self, wanted: usize) -> Result<(), PeerError> {
        while self.buffer.len() < wanted {
            let read = timeout(READ_TIMEOUT, self.stream.read_buf(&mut self.buffer))
                .await
                .map_err(|_| PeerError::Timeout)??;
            if read == 0 {
                return Err(PeerError::Disconnected);
            }
        }
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), PeerError> {
        timeout(WRITE_TIMEOUT, self.stream.write_all(frame))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        self.write_frame(&handshake.encode()).await
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        self.fill(HANDSHAKE_LEN).await?;
        let frame = self.buffer.split_to(HANDSHAKE_LEN);
        Handshake::decode(&frame)
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        self.write_frame(&message.encode()).await
    }

    /// Reads one complete frame, length prefix included.
    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        self.fill(4).await?;
        let mut prefix = &self.buffer[..4];
        let length = prefix.get_u32() as usize;
        if length > MAX_FRAME_LEN {
            return Err(PeerError::InvalidMessage(format!(
                "frame of {length} bytes exceeds the {MAX_FRAME_LEN} byte cap"
            )));
        }

        self.fill(4 + length).await?;
        let frame = self.buffer.split_to(4 + length);
        Message::decode(frame.freeze())
    }
}
