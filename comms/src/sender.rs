use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FRAME_LEN_SIZE, FrameLen, Serialize};

/// The sending end of a framed channel.
pub struct OnoSender<W: AsyncWrite + Unpin> {
    tx: W,
    head: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            head: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame and flushes it.
    ///
    /// The serialized head is copied into an internal buffer, a borrowed payload is written
    /// straight from the message.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.head.clear();
        self.head.extend_from_slice(&[0; FRAME_LEN_SIZE]);

        let payload = msg.serialize(&mut self.head);
        let body_len = self.head.len() - FRAME_LEN_SIZE + payload.map_or(0, <[u8]>::len);
        self.head[..FRAME_LEN_SIZE].copy_from_slice(&(body_len as FrameLen).to_be_bytes());

        self.tx.write_all(&self.head).await?;
        if let Some(payload) = payload {
            self.tx.write_all(payload).await?;
        }

        self.tx.flush().await
    }
}
