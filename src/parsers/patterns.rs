//! Precompiled detection patterns for each parser.
//!
//! Patterns are deliberately loose at their edges: most of them consume one
//! boundary character, which the parser engine trims before lookup. Values
//! are validated after extraction where a regex alone cannot (IPv4 octets).

use once_cell::sync::Lazy;
use regex::Regex;

// Hostnames and FQDNs; the trailing label must be alphabetic
pub static RE_HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:\b|_)[a-z0-9\-.]{1,200}\.[a-z]{1,63}\b"#).expect("valid hostname regex")
});

// IPv4 with optional prefix length; one leading boundary character is consumed
pub static RE_IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[^\w.\-])(?:\d{1,3}\.){3}\d{1,3}(?:/\d{1,2})?"#)
        .expect("valid ipv4 regex")
});

// EUI-64 hardware addresses written as eight octet groups
pub static RE_MAC_EUI64: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|[^:\-0-9a-f])(?:[0-9a-f]{2}[:\-]){7}[0-9a-f]{2}(?:\s|$)"#)
        .expect("valid eui-64 regex")
});

// EUI-64 hardware addresses in the four-quad notation
pub static RE_MAC_QUAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|[^:\-0-9a-f])(?:[0-9a-f]{4}[:\-]){3}[0-9a-f]{4}(?:\s|$)"#)
        .expect("valid quad mac regex")
});

// 48-bit MAC addresses; must not continue into more address groups
pub static RE_MAC_48: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|[^:\-0-9a-f])(?:[0-9a-f]{2}[:\-]){5}[0-9a-f]{2}(?:$|[^\w:\-])"#)
        .expect("valid mac regex")
});

// grep output for binary content
pub static RE_BINARY_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^Binary file .* matches$"#).expect("valid binary marker regex"));
