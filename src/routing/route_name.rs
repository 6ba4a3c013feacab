//! Route-name escaping for payload URLs and payload files.
//!
//! A pathname is turned into a file-safe name that never starts or ends
//! with `/`:
//!
//! ```text
//! ""             → "_.txt"
//! "/"            → "_/_.txt"
//! "/nested/foo"  → "_/nested/foo.txt"
//! "/nested/"     → "_/nested/_.txt"
//! ```

use crate::error::ProtocolError;

/// Reserved sentinel character.
pub const SENTINEL: char = '_';

const SUFFIX: &str = ".txt";

/// Encode a pathname into a route name.
///
/// Pathnames starting with the sentinel are rejected, as are pathnames
/// ending in `/_`, since neither would survive decoding.
pub fn encode_route_name(pathname: &str) -> Result<String, ProtocolError> {
    if pathname.starts_with(SENTINEL) || pathname.ends_with("/_") {
        return Err(ProtocolError::ReservedRouteName(pathname.to_string()));
    }
    let mut name = pathname.to_string();
    if name.ends_with('/') {
        name.push(SENTINEL);
    }
    if name.starts_with('/') {
        name.insert(0, SENTINEL);
    }
    if name.is_empty() {
        name.push(SENTINEL);
    }
    name.push_str(SUFFIX);
    Ok(name)
}

/// Decode a route name back into its pathname.
pub fn decode_route_name(name: &str) -> Result<String, ProtocolError> {
    let Some(stem) = name.strip_suffix(SUFFIX) else {
        return Err(ProtocolError::RouteName(name.to_string()));
    };
    if stem == "_" {
        return Ok(String::new());
    }
    let pathname = if stem.starts_with("_/") { &stem[1..] } else { stem };
    let mut decoded = pathname.to_string();
    if decoded.ends_with("/_") {
        decoded.pop();
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_examples() {
        assert_eq!(encode_route_name("").unwrap(), "_.txt");
        assert_eq!(encode_route_name("/").unwrap(), "_/_.txt");
        assert_eq!(encode_route_name("/nested/foo").unwrap(), "_/nested/foo.txt");
        assert_eq!(encode_route_name("/nested/").unwrap(), "_/nested/_.txt");
        assert_eq!(encode_route_name("plain").unwrap(), "plain.txt");
    }

    #[test]
    fn test_empty_round_trip() {
        let encoded = encode_route_name("").unwrap();
        assert_eq!(decode_route_name(&encoded).unwrap(), "");
    }

    #[test]
    fn test_round_trip() {
        for p in ["/", "/a", "/a/", "a/b", "/x_y/z", "/deep/er/path/"] {
            let encoded = encode_route_name(p).unwrap();
            assert_eq!(decode_route_name(&encoded).unwrap(), p, "{encoded}");
        }
    }

    #[test]
    fn test_rejects_missing_suffix() {
        assert!(matches!(
            decode_route_name("_/nested/foo"),
            Err(ProtocolError::RouteName(_))
        ));
        assert!(decode_route_name("_/nested/foo.json").is_err());
    }

    #[test]
    fn test_rejects_reserved_input() {
        assert!(encode_route_name("_secret").is_err());
        assert!(encode_route_name("/a/_").is_err());
    }
}
