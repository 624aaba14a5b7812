//! IRI-component safety. Emitted `@id`s are built from source-controlled
//! identifier columns, so every component is scrubbed: traversal sequences
//! and separators are percent-encoded, null bytes and control characters are
//! rejected outright.

use std::fmt::Write;

#[derive(Debug, thiserror::Error)]
pub enum SanitizeError {
    #[error("IRI component is empty (or only slashes)")]
    EmptyIriComponent,

    #[error("IRI component contains {0}")]
    ForbiddenCharacter(&'static str),

    #[error("base URI '{uri}' is malformed: {detail}; it must be an absolute IRI ending in '/' or '#'")]
    MalformedBaseUri { uri: String, detail: String },
}

/// Bytes that survive unescaped in a path segment: RFC 3986 unreserved plus
/// sub-delims, `:` and `@`. Notably absent: `/`, `\`, `?`, `#`, `%`.
fn is_segment_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'-' | b'.' | b'_' | b'~'
                | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'='
                | b':' | b'@'
        )
}

fn is_hex(byte: u8) -> bool {
    byte.is_ascii_hexdigit()
}

/// Escapes one identifier into a path-segment-safe token.
///
/// Null bytes and ASCII control characters fail; backslashes, slashes (and
/// with them any `../` traversal), and all other unsafe bytes are
/// percent-encoded. An existing `%XX` escape is left alone, which makes the
/// function idempotent: `sanitize(sanitize(s)) == sanitize(s)`.
pub fn sanitize_iri_component(raw: &str) -> Result<String, SanitizeError> {
    if raw.bytes().any(|b| b == 0) {
        return Err(SanitizeError::ForbiddenCharacter("a null byte"));
    }
    if raw.bytes().any(|b| b.is_ascii_control()) {
        return Err(SanitizeError::ForbiddenCharacter("an ASCII control character"));
    }
    if raw.trim_matches('/').is_empty() {
        return Err(SanitizeError::EmptyIriComponent);
    }

    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == b'%' && i + 2 < bytes.len() && is_hex(bytes[i + 1]) && is_hex(bytes[i + 2]) {
            // Already-encoded escape; copying it through keeps re-runs stable.
            out.push('%');
            out.push(bytes[i + 1] as char);
            out.push(bytes[i + 2] as char);
            i += 3;
            continue;
        }
        if is_segment_safe(byte) {
            out.push(byte as char);
        } else {
            write!(&mut out, "%{byte:02X}").unwrap();
        }
        i += 1;
    }
    Ok(out)
}

/// A base URI must be an absolute, parseable IRI ending with `/` or `#` so
/// that appending an identifier token yields a well-formed `@id`.
pub fn validate_base_uri(uri: &str) -> Result<(), SanitizeError> {
    if !(uri.ends_with('/') || uri.ends_with('#')) {
        return Err(SanitizeError::MalformedBaseUri {
            uri: uri.to_string(),
            detail: "missing trailing '/' or '#'".to_string(),
        });
    }
    url::Url::parse(uri).map_err(|e| SanitizeError::MalformedBaseUri {
        uri: uri.to_string(),
        detail: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_identifiers_pass_through() {
        assert_eq!(sanitize_iri_component("989897099").unwrap(), "989897099");
        assert_eq!(
            sanitize_iri_component("staff-2024.b").unwrap(),
            "staff-2024.b"
        );
    }

    #[test]
    fn traversal_sequences_are_neutralized() {
        let token = sanitize_iri_component("../etc/passwd").unwrap();
        assert_eq!(token, "..%2Fetc%2Fpasswd");
        assert!(!token.contains("../"));

        let windows = sanitize_iri_component(r"..\etc").unwrap();
        assert!(!windows.contains('\\'));
        assert_eq!(windows, "..%5Cetc");
    }

    #[test]
    fn sanitization_is_idempotent() {
        for input in ["../etc/passwd", "a b c", "50%", "already%20safe", "héllo"] {
            let once = sanitize_iri_component(input).unwrap();
            let twice = sanitize_iri_component(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn bare_percent_is_escaped_but_valid_escapes_survive() {
        assert_eq!(sanitize_iri_component("50%").unwrap(), "50%25");
        assert_eq!(sanitize_iri_component("a%2Fb").unwrap(), "a%2Fb");
    }

    #[test]
    fn empty_and_slash_only_input_is_rejected() {
        assert!(matches!(
            sanitize_iri_component(""),
            Err(SanitizeError::EmptyIriComponent)
        ));
        assert!(matches!(
            sanitize_iri_component("///"),
            Err(SanitizeError::EmptyIriComponent)
        ));
    }

    #[test]
    fn control_characters_and_null_bytes_are_rejected() {
        assert!(matches!(
            sanitize_iri_component("a\0b"),
            Err(SanitizeError::ForbiddenCharacter(_))
        ));
        assert!(matches!(
            sanitize_iri_component("a\tb"),
            Err(SanitizeError::ForbiddenCharacter(_))
        ));
    }

    #[test]
    fn base_uris_require_trailing_separator_and_parseability() {
        assert!(validate_base_uri("cepi:person/").is_ok());
        assert!(validate_base_uri("https://data.example.edu/person#").is_ok());
        assert!(matches!(
            validate_base_uri("cepi:person"),
            Err(SanitizeError::MalformedBaseUri { .. })
        ));
        assert!(matches!(
            validate_base_uri("not a uri/"),
            Err(SanitizeError::MalformedBaseUri { .. })
        ));
    }
}
