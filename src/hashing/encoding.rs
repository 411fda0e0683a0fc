//! Incremental text/binary classification.
//!
//! Chunks are fed in stream order; UTF-8 validation carries incomplete
//! sequences across chunk boundaries. Any NUL byte makes the stream binary.

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Result of classifying a complete stream (or a header prefix).
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingVerdict {
    pub is_binary: bool,
    pub charset: Option<&'static str>,
    pub confidence: f32,
}

#[derive(Debug, Default)]
pub struct EncodingDetector {
    total: u64,
    saw_nul: bool,
    utf8_valid: bool,
    carry: Vec<u8>,
    non_ascii: u64,
    suspicious: u64,
    bom: bool,
    started: bool,
}

impl EncodingDetector {
    pub fn new() -> Self {
        Self {
            utf8_valid: true,
            ..Default::default()
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        if !self.started {
            self.started = true;
            self.bom = chunk.starts_with(UTF8_BOM);
        }
        self.total += chunk.len() as u64;

        for &b in chunk {
            match b {
                0 => self.saw_nul = true,
                b'\t' | b'\n' | b'\r' | 0x0C | 0x1B => {}
                0x01..=0x1F | 0x7F => self.suspicious += 1,
                0x80..=0xFF => self.non_ascii += 1,
                _ => {}
            }
        }

        if self.utf8_valid && !self.saw_nul {
            self.check_utf8(chunk);
        }
    }

    fn check_utf8(&mut self, chunk: &[u8]) {
        let joined;
        let data = if self.carry.is_empty() {
            chunk
        } else {
            let mut buf = std::mem::take(&mut self.carry);
            buf.extend_from_slice(chunk);
            joined = buf;
            &joined[..]
        };

        match std::str::from_utf8(data) {
            Ok(_) => {}
            Err(e) if e.error_len().is_none() => {
                self.carry = data[e.valid_up_to()..].to_vec();
            }
            Err(_) => self.utf8_valid = false,
        }
    }

    /// Definitely binary regardless of what follows.
    pub fn is_binary_so_far(&self) -> bool {
        self.saw_nul
    }

    pub fn bytes_seen(&self) -> u64 {
        self.total
    }

    /// Classifies the bytes seen so far. Streams whose best text guess falls
    /// below `threshold` are binary.
    pub fn finish(&self, threshold: f32) -> EncodingVerdict {
        self.verdict(threshold, false)
    }

    /// Like [`finish`](Self::finish), for a prefix of a longer stream: an
    /// incomplete UTF-8 sequence at the very end is not held against it.
    pub fn finish_prefix(&self, threshold: f32) -> EncodingVerdict {
        self.verdict(threshold, true)
    }

    fn verdict(&self, threshold: f32, prefix: bool) -> EncodingVerdict {
        if self.total == 0 {
            return EncodingVerdict {
                is_binary: false,
                charset: None,
                confidence: 1.0,
            };
        }
        if self.saw_nul {
            return EncodingVerdict {
                is_binary: true,
                charset: None,
                confidence: 0.0,
            };
        }

        let suspicious_ratio = self.suspicious as f32 / self.total as f32;
        let utf8 = self.utf8_valid && (self.carry.is_empty() || (prefix && self.carry.len() <= 3));

        let (charset, confidence) = if utf8 {
            let charset = if self.non_ascii == 0 && !self.bom {
                "us-ascii"
            } else {
                "utf-8"
            };
            let base = if self.bom { 1.0 } else { 0.95 };
            (charset, base - 4.0 * suspicious_ratio)
        } else {
            let high_ratio = self.non_ascii as f32 / self.total as f32;
            ("windows-1252", 0.8 - 4.0 * suspicious_ratio - 0.5 * high_ratio)
        };
        let confidence = confidence.clamp(0.0, 1.0);

        if confidence < threshold {
            EncodingVerdict {
                is_binary: true,
                charset: None,
                confidence,
            }
        } else {
            EncodingVerdict {
                is_binary: false,
                charset: Some(charset),
                confidence,
            }
        }
    }
}

/// One-shot classification of a complete buffer.
pub fn classify(data: &[u8], threshold: f32) -> EncodingVerdict {
    let mut detector = EncodingDetector::new();
    detector.feed(data);
    detector.finish(threshold)
}

/// Classification of a buffer that may stop part way through the stream.
pub fn classify_prefix(data: &[u8], threshold: f32) -> EncodingVerdict {
    let mut detector = EncodingDetector::new();
    detector.feed(data);
    detector.finish_prefix(threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_text() {
        let verdict = classify(b"", 0.5);
        assert!(!verdict.is_binary);
        assert_eq!(verdict.charset, None);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn test_ascii_text() {
        let verdict = classify(b"hello\n", 0.5);
        assert!(!verdict.is_binary);
        assert_eq!(verdict.charset, Some("us-ascii"));
    }

    #[test]
    fn test_nul_is_binary() {
        let verdict = classify(b"MZ\x90\x00\x03", 0.5);
        assert!(verdict.is_binary);
        assert_eq!(verdict.charset, None);
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let text = "naïve café".as_bytes();
        let mut detector = EncodingDetector::new();
        // split inside the two-byte sequence for 'ï'
        detector.feed(&text[..3]);
        detector.feed(&text[3..]);
        let verdict = detector.finish(0.5);
        assert!(!verdict.is_binary);
        assert_eq!(verdict.charset, Some("utf-8"));
    }

    #[test]
    fn test_truncated_utf8_is_not_utf8() {
        let verdict = classify(&[b'a', b'b', 0xC3], 0.1);
        assert_ne!(verdict.charset, Some("utf-8"));
    }

    #[test]
    fn test_prefix_cut_inside_character_is_utf8() {
        let text = "<root>漢漢漢</root>".as_bytes();
        // stop one byte into the second '漢'
        let prefix = &text[..10];
        assert!(std::str::from_utf8(prefix).is_err());

        let verdict = classify_prefix(prefix, 0.5);
        assert!(!verdict.is_binary);
        assert_eq!(verdict.charset, Some("utf-8"));
        assert_ne!(classify(prefix, 0.1).charset, Some("utf-8"));
    }

    #[test]
    fn test_prefix_still_rejects_invalid_bytes() {
        let verdict = classify_prefix(&[b'a', 0xFF, b'b', 0xE6], 0.1);
        assert_ne!(verdict.charset, Some("utf-8"));
    }

    #[test]
    fn test_latin1_falls_back() {
        let verdict = classify(b"caf\xe9 au lait, tr\xe8s bien", 0.5);
        assert!(!verdict.is_binary);
        assert_eq!(verdict.charset, Some("windows-1252"));
        assert!(verdict.confidence < 0.8);
    }

    #[test]
    fn test_control_heavy_is_binary() {
        let data: Vec<u8> = (1u8..=8).cycle().take(64).collect();
        assert!(classify(&data, 0.5).is_binary);
    }
}
