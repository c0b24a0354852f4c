//! Query-parameter encoding for upstream subquery URLs.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything outside `A-Z a-z 0-9 - . _ ~ , * ( ) !` is percent-encoded
/// as UTF-8 bytes.
const PARAM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b',')
    .remove(b'*')
    .remove(b'(')
    .remove(b')')
    .remove(b'!');

/// Percent-encode a query-parameter value.
pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, PARAM_VALUE).to_string()
}

/// Encode one `name=value` pair. Empty values produce `name=`.
pub fn encode_param(name: &str, value: &str) -> String {
    format!("{}={}", name, encode_value(value))
}

/// Accumulates encoded query parameters for one subquery URL.
#[derive(Debug, Default)]
pub struct QueryString {
    parts: Vec<String>,
}

impl QueryString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: &str) {
        self.parts.push(encode_param(name, value));
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Join onto `base` as `base?a=1&b=2`.
    pub fn append_to(&self, base: &str) -> String {
        if self.parts.is_empty() {
            base.to_string()
        } else {
            format!("{}?{}", base, self.parts.join("&"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_passes_through() {
        let v = "Abc-xyz_0.9~,*()!";
        assert_eq!(encode_value(v), v);
    }

    #[test]
    fn reserved_characters_are_escaped() {
        assert_eq!(encode_value("a b"), "a%20b");
        assert_eq!(encode_value("a&b=c"), "a%26b%3Dc");
        assert_eq!(encode_value("a/b"), "a%2Fb");
    }

    #[test]
    fn non_ascii_encodes_as_utf8_bytes() {
        assert_eq!(encode_value("Mammuthus é"), "Mammuthus%20%C3%A9");
    }

    #[test]
    fn empty_value_produces_bare_equals() {
        assert_eq!(encode_param("count", ""), "count=");
    }

    #[test]
    fn query_string_joins_in_insertion_order() {
        let mut q = QueryString::new();
        q.push("base_name", "Canis lupus");
        q.push("max_ma", "2.5");
        assert_eq!(
            q.append_to("https://example.org/occs/list.json"),
            "https://example.org/occs/list.json?base_name=Canis%20lupus&max_ma=2.5"
        );
    }
}
