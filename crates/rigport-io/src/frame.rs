//! Command and reply buffers.

use rigport_core::error::{Error, Result};
use rigport_core::trace::{Encoding, render};

/// One command to send, with a label for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: Vec<u8>,
    label: String,
    encoding: Encoding,
}

impl CommandFrame {
    /// A printable command, e.g. `"FA;"`. The label defaults to the text.
    pub fn ascii(text: &str) -> Self {
        CommandFrame {
            bytes: text.as_bytes().to_vec(),
            label: text.to_string(),
            encoding: Encoding::Ascii,
        }
    }

    /// A binary command. The label defaults to its hex rendering.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        CommandFrame {
            label: render(Encoding::Hex, &bytes),
            bytes,
            encoding: Encoding::Hex,
        }
    }

    pub fn labelled(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The bytes accumulated for one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyBuffer {
    pub bytes: Vec<u8>,
    /// 1-based attempt that produced the reply.
    pub attempt: u32,
}

impl ReplyBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The reply as text, for ASCII dialects.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes)
            .map_err(|_| Error::MalformedReply(format!("not ASCII: {:02X?}", self.bytes)))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
