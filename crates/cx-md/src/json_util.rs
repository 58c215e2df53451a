//! Non-throwing JSON field helpers shared by the decoder.
//!
//! Exchange payloads encode numbers as JSON strings (`"30000.5"`); these
//! helpers accept either encoding and never panic — a missing or malformed
//! field yields `None` and the caller decides how to count it.

/// Parse a JSON value (string or number) as `f64`.
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s).ok()
    } else {
        v.as_f64()
    }
}

/// Parse a named field on a JSON object as `f64` (string or number).
#[inline]
pub fn parse_f64_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    parse_str_f64(v.get(key))
}

/// Read a named field as `&str`, empty-tolerant.
#[inline]
pub fn str_field<'a>(v: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    v.get(key)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_string_and_number_encodings() {
        let v: serde_json::Value =
            serde_json::json!({"s": "30000.5", "n": 30000.5, "bad": "x", "null": null});
        assert_eq!(parse_f64_field(&v, "s"), Some(30000.5));
        assert_eq!(parse_f64_field(&v, "n"), Some(30000.5));
        assert_eq!(parse_f64_field(&v, "bad"), None);
        assert_eq!(parse_f64_field(&v, "null"), None);
        assert_eq!(parse_f64_field(&v, "missing"), None);
    }

    #[test]
    fn str_field_reads_strings_only() {
        let v = serde_json::json!({"a": "x", "b": 1});
        assert_eq!(str_field(&v, "a"), Some("x"));
        assert_eq!(str_field(&v, "b"), None);
    }
}
