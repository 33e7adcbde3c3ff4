//! Frame extraction from raw serial chunks.
//!
//! The motion controller is read with a line-oriented primitive, so every chunk
//! handed to its extractor is already one line and comes straight back out as a
//! frame. The laser speaks `[<routing>:<body>\<sender>]` and delivers it in
//! arbitrary pieces; its extractor keeps a buffer until a `]` shows up.
//!
//! ## Laser buffer drain
//!
//! As soon as the buffer holds a `]`, everything in it is emitted as one frame
//! and the buffer is emptied. Several bracketed messages in one chunk therefore
//! become a single multi-message frame, and any bytes that arrived after the
//! last `]` in that chunk are emitted with it rather than held back for the next
//! frame. Splitting into sub-messages is the decoder's job.

use crate::link::Link;

/// Closing delimiter of a laser message.
pub const LASER_TERMINATOR: char = ']';

/// A complete, delimited unit of protocol text from one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Link the frame arrived on
    pub link: Link,
    /// Frame text without the motion line ending
    pub text: String,
}

/// Per-link frame assembler.
///
/// One instance per link, owned by that link's receive task and never shared.
#[derive(Debug)]
pub struct FrameExtractor {
    link: Link,
    buffer: String,
}

impl FrameExtractor {
    /// Create an empty extractor for `link`.
    pub fn new(link: Link) -> Self {
        Self {
            link,
            buffer: String::new(),
        }
    }

    /// Link this extractor serves.
    pub fn link(&self) -> Link {
        self.link
    }

    /// Text accumulated but not yet emitted (always empty for the motion link).
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Feed one raw chunk, returning a frame if the chunk completed one.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<Frame> {
        let text = String::from_utf8_lossy(chunk);
        match self.link {
            Link::Motion => {
                let line = text.trim_end_matches(['\r', '\n']);
                if line.is_empty() {
                    return None;
                }
                Some(Frame {
                    link: Link::Motion,
                    text: line.to_string(),
                })
            }
            Link::Laser => {
                self.buffer.push_str(&text);
                if !self.buffer.contains(LASER_TERMINATOR) {
                    return None;
                }
                Some(Frame {
                    link: Link::Laser,
                    text: std::mem::take(&mut self.buffer),
                })
            }
        }
    }
}
