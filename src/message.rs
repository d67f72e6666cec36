//! Message encoding seam.
//!
//! The connection core never interprets message payloads. Outbound
//! messages implement [`RequestMessage`] and serialize themselves into an
//! output buffer; inbound replies are handed to a caller-supplied decode
//! closure together with the [`EncoderSettings`] in effect. Both sides of
//! the seam are chosen by the caller, so one connection can carry any
//! mix of message kinds.

use crate::error::Result;
use crate::protocol::{BufferWriter, DEFAULT_MAX_FRAME_SIZE};

/// Settings handed to message encoders and decoders.
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    /// Upper bound on an encoded frame, in bytes.
    pub max_frame_size: usize,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// An outbound request message.
///
/// Implementations write a complete frame (length prefix included) when
/// asked to encode. The connection marks a message sent only after its
/// bytes were actually added to the output buffer; gated messages whose
/// [`should_be_sent`](RequestMessage::should_be_sent) returns false are
/// skipped entirely.
pub trait RequestMessage {
    /// The id the server will echo in the reply's response-to field.
    fn request_id(&self) -> i32;

    /// Gate predicate; a false return skips the message.
    fn should_be_sent(&self) -> bool {
        true
    }

    /// Called after the message's bytes were written to the output buffer.
    fn mark_sent(&mut self);

    /// Serialize one complete frame into the writer.
    fn encode(&self, writer: &mut BufferWriter<'_>, settings: &EncoderSettings) -> Result<()>;
}
