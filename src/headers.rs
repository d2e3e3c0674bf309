//! Header name rendering for script-visible results.

/// Bytes allowed in an HTTP token (RFC 7230 `tchar`).
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}

/// Render a header name in canonical MIME form: the first letter and every
/// letter following a hyphen upper-cased, the rest lower-cased.
///
/// Names containing bytes that are not valid in a header name are returned
/// unchanged.
pub fn canonical_header_key(name: &str) -> String {
    if name.is_empty() || !name.bytes().all(is_token_byte) {
        return name.to_owned();
    }

    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_simple() {
        assert_eq!(canonical_header_key("content-type"), "Content-Type");
        assert_eq!(canonical_header_key("CONTENT-LENGTH"), "Content-Length");
        assert_eq!(canonical_header_key("x-request-id"), "X-Request-Id");
    }

    #[test]
    fn test_canonical_keeps_underscores() {
        assert_eq!(canonical_header_key("x_custom"), "X_custom");
    }

    #[test]
    fn test_canonical_invalid_unchanged() {
        assert_eq!(canonical_header_key("bad header"), "bad header");
        assert_eq!(canonical_header_key(""), "");
    }
}
