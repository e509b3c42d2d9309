//! HTTP/2 client connection preface.

/// The preface is always exactly 24 bytes.
pub const PREFACE_SIZE: usize = 24;

/// The literal every HTTP/2 client connection must open with.
pub const PREFACE: &[u8; PREFACE_SIZE] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Result of matching buffered bytes against the preface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefaceCheck {
    /// The full 24-byte literal is present.
    Match,
    /// Everything seen so far matches, but the literal is incomplete.
    NeedMore,
    /// The bytes can never become the preface.
    Mismatch,
}

/// Compare an incoming prefix against the preface literal.
///
/// Mismatches are detected as early as the first wrong byte, so a plain
/// HTTP/1 request is rejected without waiting for 24 bytes.
#[must_use]
pub fn check(prefix: &[u8]) -> PrefaceCheck {
    let upto = prefix.len().min(PREFACE_SIZE);
    if prefix[..upto] != PREFACE[..upto] {
        return PrefaceCheck::Mismatch;
    }
    if prefix.len() < PREFACE_SIZE {
        PrefaceCheck::NeedMore
    } else {
        PrefaceCheck::Match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_literal_matches() {
        assert_eq!(check(PREFACE), PrefaceCheck::Match);
    }

    #[test]
    fn partial_prefix_waits() {
        assert_eq!(check(b"PRI * HT"), PrefaceCheck::NeedMore);
        assert_eq!(check(b""), PrefaceCheck::NeedMore);
    }

    #[test]
    fn http1_request_fails_on_first_byte() {
        assert_eq!(check(b"GET / HTTP/1.1\r\n\r\n"), PrefaceCheck::Mismatch);
    }

    #[test]
    fn trailing_bytes_beyond_the_literal_are_ignored() {
        let mut wire = PREFACE.to_vec();
        wire.extend_from_slice(&[0, 0, 0, 4, 0, 0, 0, 0, 0]);
        assert_eq!(check(&wire), PrefaceCheck::Match);
    }
}
