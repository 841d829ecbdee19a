//! Raw diagnostic output captured from a worker.

use std::sync::{Arc, Mutex};

/// Append-only accumulator for bytes drained from the diagnostic pipe.
///
/// Written only by the collector task; readable from any thread at any time.
/// Readers get a consistent snapshot, never a torn one.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl DiagnosticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        match self.bytes.lock() {
            Ok(mut bytes) => bytes.extend_from_slice(chunk),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(chunk),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.bytes.lock() {
            Ok(bytes) => bytes.is_empty(),
            Err(poisoned) => poisoned.into_inner().is_empty(),
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        match self.bytes.lock() {
            Ok(bytes) => bytes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Decode captured diagnostic bytes.
///
/// Tries the worker-declared charset first; an absent or unrecognized
/// charset falls back to 7-bit US-ASCII, so a readable string is producible
/// even when the handshake never completed.
pub fn decode_diagnostics(bytes: &[u8], charset: Option<&str>) -> String {
    if let Some(label) = charset
        && let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes())
    {
        let (text, _, _) = encoding.decode(bytes);
        return text.into_owned();
    }
    ascii_lossy(bytes)
}

/// Strict 7-bit fallback. The WHATWG "us-ascii" label aliases windows-1252,
/// which is not 7-bit clean, so this cannot go through `encoding_rs`.
fn ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_grows_monotonically() {
        let buffer = DiagnosticBuffer::new();
        assert!(buffer.is_empty());

        buffer.append(b"first ");
        buffer.append(b"");
        buffer.append(b"second");

        assert!(!buffer.is_empty());
        assert_eq!(buffer.snapshot(), b"first second");
    }

    #[test]
    fn snapshot_is_independent_of_later_appends() {
        let buffer = DiagnosticBuffer::new();
        buffer.append(b"early");
        let snapshot = buffer.snapshot();
        buffer.append(b" late");

        assert_eq!(snapshot, b"early");
        assert_eq!(buffer.snapshot(), b"early late");
    }

    #[test]
    fn declared_utf8_decodes_multibyte_text() {
        let text = "zażółć gęślą jaźń";
        assert_eq!(decode_diagnostics(text.as_bytes(), Some("UTF-8")), text);
        assert_eq!(decode_diagnostics(text.as_bytes(), Some("utf8")), text);
    }

    #[test]
    fn declared_latin1_decodes_high_bytes() {
        // 0xE9 is 'é' in ISO-8859-1.
        assert_eq!(decode_diagnostics(&[0x63, 0x61, 0x66, 0xE9], Some("iso-8859-1")), "café");
    }

    #[test]
    fn unrecognized_charset_falls_back_to_ascii() {
        let decoded = decode_diagnostics(&[b'o', b'k', 0xFF], Some("x-klingon"));
        assert_eq!(decoded, "ok\u{FFFD}");
    }

    #[test]
    fn missing_charset_falls_back_to_ascii() {
        assert_eq!(decode_diagnostics(b"plain ascii", None), "plain ascii");
        assert_eq!(decode_diagnostics(&[0x80], None), "\u{FFFD}");
    }
}
