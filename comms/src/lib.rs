//! Length prefixed framing of `Msg`s over any async byte stream.
//!
//! Every frame is a big endian `u64` length followed by that many bytes: a 4 byte kind header
//! and the message body.

mod codec;
pub mod msg;
mod receiver;
mod sender;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{Align4, Deserialize, Serialize};
pub use receiver::OnoReceiver;
pub use sender::OnoSender;

type FrameLen = u64;
const FRAME_LEN_SIZE: usize = size_of::<FrameLen>();

/// The largest frame a receiver accepts unless told otherwise, 1 GiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 30;

/// Splits a stream into the two ends of a framed channel.
///
/// # Arguments
/// * `rx` - The readable half.
/// * `tx` - The writable half.
///
/// # Returns
/// The receiving and sending ends.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (
        OnoReceiver::new(rx, DEFAULT_MAX_FRAME_LEN),
        OnoSender::new(tx),
    )
}
