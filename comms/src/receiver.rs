use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, FRAME_LEN_SIZE, FrameLen};

/// The receiving end of a framed channel.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R, max_frame_len: usize) -> Self {
        Self { rx, max_frame_len }
    }

    /// Changes the largest frame this receiver accepts.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Waits for the next frame and decodes it.
    ///
    /// # Arguments
    /// * `buf` - The storage the frame is read into, the returned value may borrow from it.
    ///           It's resized as needed so it can be reused across calls.
    ///
    /// # Returns
    /// The decoded value, or an error if the stream failed, the frame is larger than allowed or
    /// it doesn't decode.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut len = [0; FRAME_LEN_SIZE];
        self.rx.read_exact(&mut len).await?;

        let len = usize::try_from(FrameLen::from_be_bytes(len))
            .ok()
            .filter(|&len| len <= self.max_frame_len)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame exceeds the {} byte limit", self.max_frame_len),
                )
            })?;

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let frame = &mut bytemuck::cast_slice_mut::<B, u8>(buf)[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}
