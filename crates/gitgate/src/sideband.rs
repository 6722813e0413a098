//! Side-band message framing and the push messenger handed to hooks.
//!
//! Side-band frames are pkt-lines whose first payload byte names a channel:
//! `\x02` carries human-readable progress text, `\x03` carries an error.
//! Git clients demultiplex on that byte, so framed text can be interleaved
//! with binary pack data on one stream without corrupting it.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::push::{PushOutcome, ResolveGuard};

/// Progress channel byte.
pub(crate) const PROGRESS_CHANNEL: u8 = 0x02;
/// Error channel byte.
pub(crate) const ERROR_CHANNEL: u8 = 0x03;
/// Opcode closing a side-band stream.
pub(crate) const SIDE_BAND_END: &[u8] = b"00000000";

/// Longest text slice carried by one frame: the 65520-byte pkt-line cap
/// minus the 4-byte length prefix, the channel byte and the trailing
/// newline. Longer messages span multiple frames.
const MAX_TEXT_PER_FRAME: usize = 65514;

/// Frames `text` for the given side-band channel. Every frame's length
/// prefix covers prefix, channel byte, text and the newline; the newline is
/// appended to the final frame only.
pub(crate) fn encode_side_band(channel: u8, text: &str) -> Bytes {
    let payload = text.as_bytes();
    let mut framed = BytesMut::with_capacity(payload.len() + 8);
    if payload.is_empty() {
        put_frame(&mut framed, channel, b"", true);
        return framed.freeze();
    }
    let frames = payload.len().div_ceil(MAX_TEXT_PER_FRAME);
    for (index, chunk) in payload.chunks(MAX_TEXT_PER_FRAME).enumerate() {
        put_frame(&mut framed, channel, chunk, index + 1 == frames);
    }
    framed.freeze()
}

fn put_frame(out: &mut BytesMut, channel: u8, chunk: &[u8], newline: bool) {
    let length = 4 + 1 + chunk.len() + usize::from(newline);
    out.extend_from_slice(format!("{length:04x}").as_bytes());
    out.put_u8(channel);
    out.extend_from_slice(chunk);
    if newline {
        out.put_u8(b'\n');
    }
}

/// The channel a push hook talks back through.
///
/// Messages written here are queued as side-band frames and prepended to the
/// response stream once the push settles; [`accept`](Messenger::accept) and
/// [`deny`](Messenger::deny) settle it. All methods are safe to call from
/// any task; the first settlement wins and everything after it is a no-op.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

struct MessengerInner {
    buffer: Mutex<MessageBuffer>,
    guard: ResolveGuard,
}

#[derive(Default)]
struct MessageBuffer {
    frames: Vec<Bytes>,
    /// An end opcode has been queued; no further frames may follow it.
    ended: bool,
    /// The relay has collected the frames; late writes are dropped.
    sealed: bool,
}

impl Messenger {
    pub(crate) fn new(guard: ResolveGuard) -> Self {
        Self {
            inner: Arc::new(MessengerInner {
                buffer: Mutex::new(MessageBuffer::default()),
                guard,
            }),
        }
    }

    /// Queues `text` on the progress channel.
    pub fn write(&self, text: &str) {
        let mut buffer = self.inner.buffer.lock();
        if buffer.sealed || buffer.ended {
            debug!("side-band channel already closed, dropping message");
            return;
        }
        buffer.frames.push(encode_side_band(PROGRESS_CHANNEL, text));
    }

    /// Queues `reason` on the error channel, closes the stream and denies
    /// the push. The client sees the reason as the failure body.
    pub fn error(&self, reason: &str) {
        {
            let mut buffer = self.inner.buffer.lock();
            if !(buffer.sealed || buffer.ended) {
                buffer.frames.push(encode_side_band(ERROR_CHANNEL, reason));
                buffer.frames.push(Bytes::from_static(SIDE_BAND_END));
                buffer.ended = true;
            }
        }
        self.deny(reason);
    }

    /// Optionally queues a final progress message, then closes the stream
    /// with the end opcode and accepts the push. The response finishes with
    /// the queued frames instead of relaying further subprocess output.
    pub fn end(&self, final_text: Option<&str>) {
        {
            let mut buffer = self.inner.buffer.lock();
            if !(buffer.sealed || buffer.ended) {
                if let Some(text) = final_text {
                    buffer.frames.push(encode_side_band(PROGRESS_CHANNEL, text));
                }
                buffer.frames.push(Bytes::from_static(SIDE_BAND_END));
                buffer.ended = true;
            }
        }
        self.accept();
    }

    /// Accepts the push. No-op if the push already settled.
    pub fn accept(&self) {
        if !self.inner.guard.resolve(PushOutcome::Accepted) {
            debug!("push already settled, ignoring accept");
        }
    }

    /// Denies the push with a reason shown to the client. No-op if the push
    /// already settled.
    pub fn deny(&self, reason: &str) {
        let denied = self.inner.guard.resolve(PushOutcome::Denied {
            reason: reason.to_string(),
        });
        if !denied {
            debug!("push already settled, ignoring deny");
        }
    }

    pub(crate) fn guard(&self) -> ResolveGuard {
        self.inner.guard.clone()
    }

    /// Hands the queued frames to the relay and seals the channel. Returns
    /// the frames and whether the hook closed the stream.
    pub(crate) fn take_frames(&self) -> (Vec<Bytes>, bool) {
        let mut buffer = self.inner.buffer.lock();
        buffer.sealed = true;
        (std::mem::take(&mut buffer.frames), buffer.ended)
    }
}
