//! Command profile contract and decode helpers
//!
//! A terminal family plugs into the engine through [`CommandProfile`]: the
//! engine only asks it to classify inbound function codes (and for a default
//! baud rate); payload encoding and positional field decoding are
//! table-driven details owned by the family modules in [`crate::pos`].

use bytes::Bytes;

use super::framing;

/// Classification of an inbound frame against the pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// The bare acknowledgment byte; handled by the engine before
    /// classification is ever consulted.
    Ack,
    /// Pushed mid-transaction; forwarded to the request's intermediate
    /// channel, never resolves the request.
    Intermediate,
    /// Terminates and resolves the pending request.
    Final,
}

/// One terminal family's dialect.
///
/// Immutable and stateless from the engine's perspective; a single profile
/// value may be shared across engines.
pub trait CommandProfile: Send + Sync {
    /// Family name, for logs.
    fn name(&self) -> &'static str;

    /// Baud rate this family speaks by default.
    fn default_baud_rate(&self) -> u32;

    /// Classify an inbound function code. Codes the family does not
    /// recognize are final: an uncertain frame must resolve the request
    /// rather than hang it.
    fn classify(&self, function_code: &str) -> FrameClass {
        let _ = function_code;
        FrameClass::Final
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    /// Leading 4-character numeric token of the inner payload.
    pub function_code: String,
    /// Inner pipe-delimited text, envelope stripped.
    pub text: String,
    /// The frame exactly as received, envelope included.
    pub raw: Bytes,
}

impl ResponseEnvelope {
    /// Decode a raw frame. The envelope is stripped but never verified.
    pub fn from_frame(raw: Bytes) -> Self {
        let text = framing::decode(&raw);
        let function_code = text.chars().take(4).collect();
        Self {
            function_code,
            text,
            raw,
        }
    }

    /// Positional field access over the inner text.
    pub fn fields(&self) -> Fields<'_> {
        Fields::split(&self.text)
    }
}

/// Lenient positional access to a pipe-delimited payload.
///
/// Missing or blank positions decode to empty string or zero rather than
/// failing; a garbled field never aborts the whole decode.
pub struct Fields<'a> {
    chunks: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    /// Split a payload on `|`.
    pub fn split(text: &'a str) -> Self {
        Self {
            chunks: text.split('|').collect(),
        }
    }

    /// Number of positions present.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the payload carried no positions at all.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Field as text; missing positions are empty.
    pub fn text(&self, index: usize) -> String {
        self.chunks.get(index).copied().unwrap_or("").to_string()
    }

    /// Field as text, or `None` when the position is absent entirely. Blank
    /// but present positions are `Some("")`.
    pub fn text_opt(&self, index: usize) -> Option<String> {
        self.chunks.get(index).map(|chunk| chunk.to_string())
    }

    /// Field as text with surrounding whitespace removed.
    pub fn trimmed(&self, index: usize) -> String {
        self.chunks
            .get(index)
            .copied()
            .unwrap_or("")
            .trim()
            .to_string()
    }

    /// Whether the position is absent or blank.
    pub fn is_blank(&self, index: usize) -> bool {
        self.chunks
            .get(index)
            .map_or(true, |chunk| chunk.trim().is_empty())
    }

    /// Field as an integer, taking the leading digit run; missing, blank, or
    /// garbled positions decode to zero.
    pub fn int(&self, index: usize) -> i64 {
        self.int_opt(index).unwrap_or(0)
    }

    /// Field as an integer, or `None` when the position is absent or blank.
    /// A `-` only counts as a sign at the start of the run; a later one ends
    /// it, so `"3-4"` decodes as `3`.
    pub fn int_opt(&self, index: usize) -> Option<i64> {
        let chunk = self.chunks.get(index)?.trim();
        let mut run = chunk
            .chars()
            .skip_while(|c| !c.is_ascii_digit() && *c != '-');
        let mut digits = String::new();
        digits.extend(run.next());
        digits.extend(run.take_while(char::is_ascii_digit));
        if digits.is_empty() {
            return None;
        }
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::framing;

    #[test]
    fn test_envelope_from_frame() {
        let raw = framing::encode("0200|0|999|001");
        let envelope = ResponseEnvelope::from_frame(raw);
        assert_eq!(envelope.function_code, "0200");
        assert_eq!(envelope.text, "0200|0|999|001");
        assert_eq!(envelope.fields().int(1), 0);
        assert_eq!(envelope.fields().int(2), 999);
    }

    #[test]
    fn test_fields_default_to_blank_and_zero() {
        let fields = Fields::split("0800|0");
        assert_eq!(fields.text(5), "");
        assert_eq!(fields.int(5), 0);
        assert_eq!(fields.int_opt(5), None);
        assert!(fields.is_blank(5));
    }

    #[test]
    fn test_fields_tolerate_garbage() {
        let fields = Fields::split("0200|x7|  42 ||-3");
        assert_eq!(fields.int(1), 7);
        assert_eq!(fields.int(2), 42);
        assert_eq!(fields.int(3), 0);
        assert_eq!(fields.int_opt(3), None);
        assert_eq!(fields.int(4), -3);
    }

    #[test]
    fn test_int_run_stops_at_interior_dash() {
        let fields = Fields::split("0200|3-4|-12-5|x9-1|--3");
        assert_eq!(fields.int_opt(1), Some(3));
        assert_eq!(fields.int_opt(2), Some(-12));
        assert_eq!(fields.int_opt(3), Some(9));
        assert_eq!(fields.int_opt(4), None);
    }

    #[test]
    fn test_default_classification_is_final() {
        struct Bare;
        impl CommandProfile for Bare {
            fn name(&self) -> &'static str {
                "bare"
            }
            fn default_baud_rate(&self) -> u32 {
                115200
            }
        }
        assert_eq!(Bare.classify("9999"), FrameClass::Final);
    }
}
