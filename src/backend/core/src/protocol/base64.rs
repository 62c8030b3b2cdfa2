//! Base64 helpers for image payloads.
//!
//! Encoding is standard padded base64. Decoding is tolerant: characters
//! outside the 64-char alphabet are skipped, `=` terminates the payload,
//! and a dangling 6-bit residue is dropped. Tolerance matters because
//! payloads cross several transports that may inject whitespace.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Encode bytes as standard padded base64.
pub fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode base64 text, skipping unknown characters; `=` terminates.
pub fn decode_tolerant(input: &str) -> Vec<u8> {
    let mut filtered = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '=' {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '+' || c == '/' {
            filtered.push(c);
        }
    }

    // A lone trailing character carries under 8 bits and decodes to nothing.
    if filtered.len() % 4 == 1 {
        filtered.pop();
    }

    LENIENT.decode(filtered.as_bytes()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let cases: Vec<Vec<u8>> = vec![
            b"".to_vec(),
            b"f".to_vec(),
            b"fo".to_vec(),
            b"foo".to_vec(),
            b"foobar".to_vec(),
            (0u8..=255).collect(),
            vec![0xff; 1023],
        ];
        for case in cases {
            assert_eq!(decode_tolerant(&encode(&case)), case);
        }
    }

    #[test]
    fn test_unknown_characters_skipped() {
        let clean = encode(b"edge inference payload");
        let noisy: String = clean
            .chars()
            .flat_map(|c| [c, '\n'])
            .collect();
        assert_eq!(decode_tolerant(&noisy), b"edge inference payload");
    }

    #[test]
    fn test_equals_terminates() {
        let mut text = encode(b"head");
        text.push_str("=ignored garbage that would decode to more bytes");
        assert_eq!(decode_tolerant(&text), b"head");
    }

    #[test]
    fn test_dangling_residue_dropped() {
        // "QQ" decodes to b"A"; a fifth char alone cannot complete a byte.
        assert_eq!(decode_tolerant("QQ"), b"A");
        assert_eq!(decode_tolerant("QUJDR"), b"ABC");
    }

    #[test]
    fn test_empty_and_junk_only() {
        assert!(decode_tolerant("").is_empty());
        assert!(decode_tolerant("\r\n \t!!").is_empty());
    }
}
